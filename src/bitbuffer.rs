use crate::error::Error;
use crate::types::ByteOrder;

/// A bit-granular cursor over a fixed, already-resident byte region.
///
/// The position is an absolute bit offset and only moves forward during a
/// decode pass. All reads are bounds-checked against the end of the region;
/// a failed read does not advance the position.
#[derive(Debug)]
pub struct BitBuffer<'a> {
    data: &'a [u8],
    pos: u64,
}

fn low_mask(bits: u32) -> u8 {
    if bits >= 8 {
        0xFF
    } else {
        (1u8 << bits) - 1
    }
}

impl<'a> BitBuffer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BitBuffer { data, pos: 0 }
    }

    /// Current absolute position in bits.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Move to an absolute bit offset. Positions beyond the end of the
    /// region are representable; any subsequent read reports a bounds error.
    pub fn set_position(&mut self, pos: u64) {
        self.pos = pos;
    }

    pub fn capacity_bits(&self) -> u64 {
        self.data.len() as u64 * 8
    }

    pub fn remaining_bits(&self) -> u64 {
        self.capacity_bits().saturating_sub(self.pos)
    }

    pub fn can_read(&self, bits: u64) -> bool {
        bits <= self.remaining_bits()
    }

    /// Advance to the next multiple of `to_bits` without consuming data.
    pub fn align(&mut self, to_bits: u64) {
        if to_bits > 1 {
            self.pos = self.pos.div_ceil(to_bits) * to_bits;
        }
    }

    fn bounds_error(&self, requested: u64) -> Error {
        Error::Bounds {
            position: self.pos,
            requested,
            capacity: self.capacity_bits(),
        }
    }

    /// Read `bits` (0..=64) as an unsigned integer.
    ///
    /// Big-endian fields are reassembled most-significant-first; little-endian
    /// fields fill from the least significant bit of each byte upward, so a
    /// field spanning a partial final byte is masked, never rounded.
    pub fn read(&mut self, bits: u32, byte_order: ByteOrder) -> Result<u64, Error> {
        debug_assert!(bits <= 64);
        if !self.can_read(u64::from(bits)) {
            return Err(self.bounds_error(u64::from(bits)));
        }

        let mut remaining = bits;
        let mut produced = 0u32;
        let mut value = 0u64;
        while remaining > 0 {
            let byte = self.data[(self.pos / 8) as usize];
            let bit_in_byte = (self.pos % 8) as u32;
            let avail = 8 - bit_in_byte;
            let take = avail.min(remaining);
            match byte_order {
                ByteOrder::BigEndian => {
                    let chunk = u64::from((byte >> (avail - take)) & low_mask(take));
                    value = (value << take) | chunk;
                }
                ByteOrder::LittleEndian => {
                    let chunk = u64::from((byte >> bit_in_byte) & low_mask(take));
                    value |= chunk << produced;
                }
            }
            produced += take;
            remaining -= take;
            self.pos += u64::from(take);
        }
        Ok(value)
    }

    /// Read `bits` (1..=64) as a sign-extended integer.
    pub fn read_signed(&mut self, bits: u32, byte_order: ByteOrder) -> Result<i64, Error> {
        let raw = self.read(bits, byte_order)?;
        if bits < 64 && raw & (1u64 << (bits - 1)) != 0 {
            Ok((raw | (u64::MAX << bits)) as i64)
        } else {
            Ok(raw as i64)
        }
    }

    /// Read an IEEE-754 value described by exponent/mantissa widths.
    ///
    /// Only the 32 bit (8/24) and 64 bit (11/53) layouts have a lossless
    /// landing zone in an f64.
    pub fn read_float(
        &mut self,
        exponent: u32,
        mantissa: u32,
        byte_order: ByteOrder,
    ) -> Result<f64, Error> {
        match exponent + mantissa {
            32 => Ok(f64::from(f32::from_bits(
                self.read(32, byte_order)? as u32
            ))),
            64 => Ok(f64::from_bits(self.read(64, byte_order)?)),
            _ => Err(Error::UnsupportedFloatLayout { exponent, mantissa }),
        }
    }

    /// Read NUL-terminated bytes, aligning to the next byte first. The
    /// terminator is consumed but not returned.
    pub fn read_string_bytes(&mut self) -> Result<Vec<u8>, Error> {
        self.align(8);
        let mut bytes = Vec::new();
        loop {
            let b = self.read(8, ByteOrder::LittleEndian)? as u8;
            if b == 0 {
                break;
            }
            bytes.push(b);
        }
        Ok(bytes)
    }

    /// Read a NUL-terminated string; invalid UTF-8 is replaced rather than
    /// failing the event.
    pub fn read_string(&mut self) -> Result<String, Error> {
        Ok(String::from_utf8_lossy(&self.read_string_bytes()?).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Test-side encoder, the mirror image of `BitBuffer::read`.
    fn write_bits(data: &mut [u8], pos: &mut u64, value: u64, bits: u32, byte_order: ByteOrder) {
        let mut remaining = bits;
        while remaining > 0 {
            let idx = (*pos / 8) as usize;
            let bit_in_byte = (*pos % 8) as u32;
            let avail = 8 - bit_in_byte;
            let take = avail.min(remaining);
            let chunk = match byte_order {
                ByteOrder::BigEndian => ((value >> (remaining - take)) as u8) & low_mask(take),
                ByteOrder::LittleEndian => ((value >> (bits - remaining)) as u8) & low_mask(take),
            };
            match byte_order {
                ByteOrder::BigEndian => data[idx] |= chunk << (avail - take),
                ByteOrder::LittleEndian => data[idx] |= chunk << bit_in_byte,
            }
            remaining -= take;
            *pos += u64::from(take);
        }
    }

    #[test]
    fn round_trip_all_widths_both_orders() {
        for order in [ByteOrder::LittleEndian, ByteOrder::BigEndian] {
            for bits in 1..=64u32 {
                let value = if bits == 64 {
                    0xA5A5_5A5A_DEAD_BEEF
                } else {
                    0xA5A5_5A5A_DEAD_BEEF & ((1u64 << bits) - 1)
                };
                let mut data = vec![0u8; 9];
                let mut wpos = 0;
                write_bits(&mut data, &mut wpos, value, bits, order);

                let mut buf = BitBuffer::new(&data);
                assert_eq!(buf.read(bits, order).unwrap(), value, "{order} {bits} bits");
                assert_eq!(buf.position(), u64::from(bits));
            }
        }
    }

    #[test]
    fn round_trip_unaligned_offsets() {
        for order in [ByteOrder::LittleEndian, ByteOrder::BigEndian] {
            for lead in 1..8u32 {
                let mut data = vec![0u8; 8];
                let mut wpos = 0;
                write_bits(&mut data, &mut wpos, 0, lead, order);
                write_bits(&mut data, &mut wpos, 0x5ED, 12, order);

                let mut buf = BitBuffer::new(&data);
                buf.set_position(u64::from(lead));
                assert_eq!(buf.read(12, order).unwrap(), 0x5ED, "{order} lead {lead}");
            }
        }
    }

    #[test]
    fn signed_values_are_sign_extended() {
        let mut data = vec![0u8; 2];
        let mut wpos = 0;
        // -3 in 5 bits is 0b11101
        write_bits(&mut data, &mut wpos, 0b11101, 5, ByteOrder::BigEndian);
        let mut buf = BitBuffer::new(&data);
        assert_eq!(buf.read_signed(5, ByteOrder::BigEndian).unwrap(), -3);

        let data = 0x7Fu8.to_le_bytes();
        let mut buf = BitBuffer::new(&data);
        assert_eq!(buf.read_signed(8, ByteOrder::LittleEndian).unwrap(), 127);
    }

    #[test]
    fn float_one_with_default_layout() {
        let le = 1.0f32.to_bits().to_le_bytes();
        let mut buf = BitBuffer::new(&le);
        assert_eq!(buf.read_float(8, 24, ByteOrder::LittleEndian).unwrap(), 1.0);

        let be = 1.0f32.to_bits().to_be_bytes();
        let mut buf = BitBuffer::new(&be);
        assert_eq!(buf.read_float(8, 24, ByteOrder::BigEndian).unwrap(), 1.0);
    }

    #[test]
    fn double_width_float() {
        let le = (-2.5f64).to_bits().to_le_bytes();
        let mut buf = BitBuffer::new(&le);
        assert_eq!(
            buf.read_float(11, 53, ByteOrder::LittleEndian).unwrap(),
            -2.5
        );
    }

    #[test]
    fn unsupported_float_layout() {
        let data = [0u8; 8];
        let mut buf = BitBuffer::new(&data);
        assert_eq!(
            buf.read_float(5, 10, ByteOrder::LittleEndian),
            Err(Error::UnsupportedFloatLayout {
                exponent: 5,
                mantissa: 10
            })
        );
    }

    #[test]
    fn align_advances_without_consuming() {
        let data = [0xFFu8; 4];
        let mut buf = BitBuffer::new(&data);
        buf.read(3, ByteOrder::LittleEndian).unwrap();
        let before = buf.position();
        buf.align(16);
        assert_eq!(buf.position() % 16, 0);
        assert!(buf.position() >= before);

        // Already aligned positions stay put
        buf.align(16);
        assert_eq!(buf.position(), 16);
    }

    #[test]
    fn out_of_range_read_fails_without_advancing() {
        let data = [0u8; 2];
        let mut buf = BitBuffer::new(&data);
        buf.read(10, ByteOrder::LittleEndian).unwrap();
        let err = buf.read(10, ByteOrder::LittleEndian).unwrap_err();
        assert_eq!(
            err,
            Error::Bounds {
                position: 10,
                requested: 10,
                capacity: 16
            }
        );
        assert_eq!(buf.position(), 10);
        assert!(buf.can_read(6));
        assert!(!buf.can_read(7));
    }

    #[test]
    fn nul_terminated_string() {
        let mut data = vec![0u8; 1];
        data.extend_from_slice(b"sched_switch\0");
        let mut buf = BitBuffer::new(&data);
        buf.read(3, ByteOrder::LittleEndian).unwrap();
        // Unaligned position snaps to the next byte before the string
        assert_eq!(buf.read_string().unwrap(), "sched_switch");
        assert_eq!(buf.position() % 8, 0);
    }

    #[test]
    fn unterminated_string_is_a_bounds_error() {
        let data = *b"abc";
        let mut buf = BitBuffer::new(&data);
        assert!(matches!(
            buf.read_string().unwrap_err(),
            Error::Bounds { .. }
        ));
    }
}
