use crate::bitbuffer::BitBuffer;
use crate::declaration::{Declaration, StructDeclaration};
use crate::error::Error;
use crate::event::{decode_struct, EventDefinition, FieldValue, Scope};
use crate::metadata::{StreamDeclarations, TraceMetadata};
use std::sync::Arc;
use uuid::Uuid;

pub const PACKET_MAGIC: u64 = 0xC1FC_1FC1;

/// Packet-level metadata, parsed once per packet and read-only afterward.
#[derive(Clone, Debug, PartialEq)]
pub struct PacketDescriptor {
    pub stream_id: u64,
    /// Stream instance (CPU) id from the packet context, 0 when absent
    pub cpu: u32,
    /// Bit offset where event data ends; padding may follow
    pub content_bits: u64,
    /// Total packet size in bits
    pub packet_bits: u64,
    pub timestamp_begin: Option<u64>,
    pub timestamp_end: Option<u64>,
    pub lost_events: u64,
    pub trace_uuid: Option<Uuid>,
    /// Decoded packet context fields, available to event field lookups
    pub context_fields: Vec<(String, FieldValue)>,
}

/// A supplier of decoded events in stream order. `Ok(None)` is clean
/// exhaustion; errors are fatal for the source.
pub trait EventSource {
    fn next_event(&mut self) -> Result<Option<EventDefinition>, Error>;

    fn descriptor(&self) -> Option<&PacketDescriptor> {
        None
    }
}

/// The per-packet decode engine. Position-agnostic: callers hand it a bit
/// buffer, which lets one engine serve both the borrowed reader and the
/// owned source below.
#[derive(Debug)]
struct PacketDecoder {
    metadata: Arc<TraceMetadata>,
    stream_id: u64,
    descriptor: PacketDescriptor,
    last_timestamp: u64,
}

impl PacketDecoder {
    /// Decode the packet header and stream packet context, leaving the
    /// buffer positioned at the first event.
    fn begin(metadata: Arc<TraceMetadata>, buf: &mut BitBuffer<'_>) -> Result<Self, Error> {
        let header_fields = match metadata.packet_header.as_ref() {
            Some(decl) => structure_fields(decode_struct(decl, buf, None)?),
            None => Vec::new(),
        };

        if let Some(magic) = find_field(&header_fields, "magic") {
            if magic.as_unsigned() != Some(PACKET_MAGIC) {
                return Err(Error::MalformedPacketHeader(format!(
                    "bad magic {magic:?}, expected 0x{PACKET_MAGIC:08X}"
                )));
            }
        }

        let trace_uuid = find_field(&header_fields, "uuid").and_then(uuid_from_field);
        if let (Some(expected), Some(found)) = (metadata.uuid, trace_uuid) {
            if expected != found {
                return Err(Error::MalformedPacketHeader(format!(
                    "packet UUID {found} does not match the trace UUID {expected}"
                )));
            }
        }

        let stream_id = find_field(&header_fields, "stream_id")
            .and_then(FieldValue::as_unsigned)
            .unwrap_or(0);
        let stream = metadata.stream(stream_id).ok_or_else(|| {
            Error::MalformedPacketHeader(format!("no stream declaration for stream ID {stream_id}"))
        })?;

        let context_fields = match stream.packet_context.as_ref() {
            Some(decl) => structure_fields(decode_struct(decl, buf, None)?),
            None => Vec::new(),
        };

        let packet_bits = find_field(&context_fields, "packet_size")
            .and_then(FieldValue::as_unsigned)
            .unwrap_or_else(|| buf.capacity_bits());
        let content_bits = find_field(&context_fields, "content_size")
            .and_then(FieldValue::as_unsigned)
            .unwrap_or(packet_bits);
        if content_bits > buf.capacity_bits() {
            return Err(Error::MalformedPacketHeader(format!(
                "content size of {content_bits} bits exceeds the {} bit packet region",
                buf.capacity_bits()
            )));
        }

        let descriptor = PacketDescriptor {
            stream_id,
            cpu: find_field(&context_fields, "cpu_id")
                .and_then(FieldValue::as_unsigned)
                .unwrap_or(0) as u32,
            content_bits,
            packet_bits,
            timestamp_begin: find_field(&context_fields, "timestamp_begin")
                .and_then(FieldValue::as_unsigned),
            timestamp_end: find_field(&context_fields, "timestamp_end")
                .and_then(FieldValue::as_unsigned),
            lost_events: find_field(&context_fields, "events_discarded")
                .and_then(FieldValue::as_unsigned)
                .unwrap_or(0),
            trace_uuid,
            context_fields,
        };

        Ok(PacketDecoder {
            metadata,
            stream_id,
            descriptor,
            last_timestamp: 0,
        })
    }

    fn stream(&self) -> &StreamDeclarations {
        // Validated during begin()
        &self.metadata.streams[&self.stream_id]
    }

    fn has_more_events(&self, buf: &BitBuffer<'_>) -> bool {
        buf.position() < self.descriptor.content_bits
    }

    /// Decode the next event: header, contexts, then the payload field by
    /// field in declared order.
    fn read_event(&mut self, buf: &mut BitBuffer<'_>) -> Result<Option<EventDefinition>, Error> {
        if !self.has_more_events(buf) {
            return Ok(None);
        }

        let header_fields = match self.stream().event_header.as_ref() {
            Some(decl) => {
                let packet_scope = Scope::root(&self.descriptor.context_fields);
                structure_fields(decode_struct(decl, buf, Some(&packet_scope))?)
            }
            None => Vec::new(),
        };

        let event_id = find_field(&header_fields, "id")
            .and_then(FieldValue::as_unsigned)
            .unwrap_or(0);
        let raw_timestamp = find_field(&header_fields, "timestamp")
            .and_then(FieldValue::as_unsigned)
            .unwrap_or(self.last_timestamp);

        // The truncation width belongs to the header shape this event used;
        // variant headers can carry different widths per option
        let timestamp_bits = self
            .stream()
            .event_header
            .as_ref()
            .and_then(|h| timestamp_width_in(h, &header_fields));
        let timestamp = match timestamp_bits {
            Some(bits) => reconstruct_timestamp(self.last_timestamp, raw_timestamp, bits),
            None => raw_timestamp,
        };
        self.last_timestamp = timestamp;

        let stream = self.stream();
        let declaration = stream
            .events
            .get(&event_id)
            .cloned()
            .ok_or(Error::UnknownEventId(event_id))?;

        let packet_scope = Scope::root(&self.descriptor.context_fields);
        let header_scope = Scope::nested(&packet_scope, &header_fields);

        let stream_context_fields = match stream.event_context.as_ref() {
            Some(decl) => structure_fields(decode_struct(decl, buf, Some(&header_scope))?),
            None => Vec::new(),
        };
        let stream_ctx_scope = Scope::nested(&header_scope, &stream_context_fields);

        let context_fields = match declaration.context.as_ref() {
            Some(decl) => structure_fields(decode_struct(decl, buf, Some(&stream_ctx_scope))?),
            None => Vec::new(),
        };
        let context_scope = Scope::nested(&stream_ctx_scope, &context_fields);

        let payload = decode_struct(&declaration.payload, buf, Some(&context_scope))?;

        if buf.position() > self.descriptor.content_bits {
            return Err(Error::Bounds {
                position: buf.position(),
                requested: 0,
                capacity: self.descriptor.content_bits,
            });
        }

        Ok(Some(EventDefinition {
            declaration,
            timestamp,
            cpu: self.descriptor.cpu,
            stream_id: self.descriptor.stream_id,
            stream_context: wrap_structure(stream_context_fields),
            context: wrap_structure(context_fields),
            payload,
        }))
    }
}

/// Rebuild an absolute timestamp from a truncated header field.
///
/// The truncated value replaces the low `bits` of the previous timestamp;
/// when it appears to move backward within the truncated window the window
/// has wrapped, so carry into the high bits.
pub(crate) fn reconstruct_timestamp(previous: u64, raw: u64, bits: u32) -> u64 {
    if bits >= 64 {
        return raw;
    }
    let mask = (1u64 << bits) - 1;
    let high = previous & !mask;
    if raw < previous & mask {
        (high + mask + 1) | raw
    } else {
        high | raw
    }
}

/// Width of the `timestamp` field actually present in one decoded header.
///
/// Walks the declaration and the decoded value tree together, so a variant
/// header reports the width of the option that was selected for this event.
fn timestamp_width_in(decl: &StructDeclaration, fields: &[(String, FieldValue)]) -> Option<u32> {
    for (name, field_decl) in decl.fields.iter() {
        let value = fields.iter().find(|(n, _)| n == name).map(|(_, v)| v);
        match field_decl {
            Declaration::Integer(d) if name == "timestamp" => return Some(d.size),
            Declaration::Struct(inner) => {
                if let Some(FieldValue::Structure(inner_fields)) = value {
                    if let Some(bits) = timestamp_width_in(inner, inner_fields) {
                        return Some(bits);
                    }
                }
            }
            Declaration::Variant(v) => {
                if let Some(FieldValue::Variant { selected, value }) = value {
                    if let (Some(Declaration::Struct(inner)), FieldValue::Structure(inner_fields)) =
                        (v.option(selected), value.as_ref())
                    {
                        if let Some(bits) = timestamp_width_in(inner, inner_fields) {
                            return Some(bits);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    None
}

fn structure_fields(value: FieldValue) -> Vec<(String, FieldValue)> {
    match value {
        FieldValue::Structure(fields) => fields,
        other => vec![(String::new(), other)],
    }
}

fn wrap_structure(fields: Vec<(String, FieldValue)>) -> Option<FieldValue> {
    if fields.is_empty() {
        None
    } else {
        Some(FieldValue::Structure(fields))
    }
}

fn find_field<'a>(fields: &'a [(String, FieldValue)], name: &str) -> Option<&'a FieldValue> {
    for (field_name, value) in fields {
        if field_name == name {
            return Some(value);
        }
        if let Some(found) = value.find(name) {
            return Some(found);
        }
    }
    None
}

fn uuid_from_field(value: &FieldValue) -> Option<Uuid> {
    let FieldValue::Array(elements) = value else {
        return None;
    };
    if elements.len() != 16 {
        return None;
    }
    let mut bytes = [0u8; 16];
    for (i, element) in elements.iter().enumerate() {
        bytes[i] = u8::try_from(element.as_unsigned()?).ok()?;
    }
    Some(Uuid::from_bytes(bytes))
}

/// Decodes one packet from a caller-owned byte region.
///
/// State machine per packet: header, then the stream's packet context, then
/// events until the content size is exhausted.
#[derive(Debug)]
pub struct PacketReader<'a> {
    buf: BitBuffer<'a>,
    decoder: PacketDecoder,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8], metadata: Arc<TraceMetadata>) -> Result<Self, Error> {
        let mut buf = BitBuffer::new(data);
        let decoder = PacketDecoder::begin(metadata, &mut buf)?;
        Ok(PacketReader { buf, decoder })
    }

    pub fn descriptor(&self) -> &PacketDescriptor {
        &self.decoder.descriptor
    }

    pub fn cpu(&self) -> u32 {
        self.decoder.descriptor.cpu
    }

    pub fn has_more_events(&self) -> bool {
        self.decoder.has_more_events(&self.buf)
    }

    pub fn read_next_event(&mut self) -> Result<Option<EventDefinition>, Error> {
        self.decoder.read_event(&mut self.buf)
    }
}

/// Like [`PacketReader`] but owns its packet bytes, so it can move across
/// threads as the producer side of the pipeline.
#[derive(Debug)]
pub struct PacketSource {
    data: Arc<[u8]>,
    decoder: PacketDecoder,
    position: u64,
}

impl PacketSource {
    pub fn new(data: Vec<u8>, metadata: Arc<TraceMetadata>) -> Result<Self, Error> {
        let data: Arc<[u8]> = data.into();
        let mut buf = BitBuffer::new(&data);
        let decoder = PacketDecoder::begin(metadata, &mut buf)?;
        let position = buf.position();
        Ok(PacketSource {
            data,
            decoder,
            position,
        })
    }

    pub fn descriptor(&self) -> &PacketDescriptor {
        &self.decoder.descriptor
    }
}

impl EventSource for PacketSource {
    fn next_event(&mut self) -> Result<Option<EventDefinition>, Error> {
        let data = Arc::clone(&self.data);
        let mut buf = BitBuffer::new(&data);
        buf.set_position(self.position);
        let result = self.decoder.read_event(&mut buf);
        self.position = buf.position();
        result
    }

    fn descriptor(&self) -> Option<&PacketDescriptor> {
        Some(&self.decoder.descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ast::{AssignmentExpr, RightExpr, RootNode, TypeSpecifier, UnaryExpr};
    use crate::metadata::parse_trace;
    use pretty_assertions::assert_eq;

    fn assign_str(key: &[&str], value: &str) -> AssignmentExpr {
        AssignmentExpr::new(
            key,
            RightExpr::Unary(vec![UnaryExpr::String(value.to_string())]),
        )
    }

    fn assign_u64(key: &[&str], value: u64) -> AssignmentExpr {
        AssignmentExpr::new(key, RightExpr::Unary(vec![UnaryExpr::Unsigned(value)]))
    }

    fn uint_spec(size: u64) -> TypeSpecifier {
        TypeSpecifier::Integer(vec![assign_u64(&["size"], size)])
    }

    fn struct_spec(fields: Vec<(&str, TypeSpecifier)>) -> TypeSpecifier {
        TypeSpecifier::Struct {
            fields: fields
                .into_iter()
                .map(|(n, s)| (n.to_string(), s))
                .collect(),
            align: None,
        }
    }

    /// A little-endian trace with a 32 bit magic + 8 bit stream id packet
    /// header, an 8 bit truncated timestamp, and two event classes.
    pub(crate) fn test_metadata() -> Arc<TraceMetadata> {
        let roots = vec![
            RootNode::Trace(vec![
                assign_str(&["byte_order"], "le"),
                AssignmentExpr::new(
                    &["packet", "header"],
                    RightExpr::Type(struct_spec(vec![
                        ("magic", uint_spec(32)),
                        ("stream_id", uint_spec(8)),
                    ])),
                ),
            ]),
            RootNode::Stream(vec![
                assign_u64(&["id"], 0),
                AssignmentExpr::new(
                    &["event", "header"],
                    RightExpr::Type(struct_spec(vec![
                        ("id", uint_spec(8)),
                        ("timestamp", uint_spec(8)),
                    ])),
                ),
                AssignmentExpr::new(
                    &["packet", "context"],
                    RightExpr::Type(struct_spec(vec![
                        ("content_size", uint_spec(32)),
                        ("packet_size", uint_spec(32)),
                        ("cpu_id", uint_spec(8)),
                        ("events_discarded", uint_spec(8)),
                    ])),
                ),
            ]),
            RootNode::Event(vec![
                assign_str(&["name"], "alpha"),
                assign_u64(&["id"], 1),
                AssignmentExpr::new(
                    &["fields"],
                    RightExpr::Type(struct_spec(vec![("value", uint_spec(16))])),
                ),
            ]),
            RootNode::Event(vec![
                assign_str(&["name"], "beta"),
                assign_u64(&["id"], 2),
                AssignmentExpr::new(
                    &["fields"],
                    RightExpr::Type(struct_spec(vec![
                        ("len", uint_spec(8)),
                        (
                            "data",
                            TypeSpecifier::Sequence {
                                length_field: "len".to_string(),
                                element: Box::new(uint_spec(8)),
                            },
                        ),
                    ])),
                ),
            ]),
        ];
        parse_trace(&roots).unwrap()
    }

    /// Header + context + three events, with two bytes of padding after the
    /// content boundary.
    pub(crate) fn test_packet() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&(PACKET_MAGIC as u32).to_le_bytes());
        data.push(0); // stream_id

        let content_bytes = 5 + 10 + 4 + 5 + 4; // header, context, events
        let packet_bytes = content_bytes + 2;
        data.extend_from_slice(&((content_bytes as u32) * 8).to_le_bytes());
        data.extend_from_slice(&((packet_bytes as u32) * 8).to_le_bytes());
        data.push(1); // cpu_id
        data.push(3); // events_discarded

        // alpha @ ts 10
        data.extend_from_slice(&[1, 10]);
        data.extend_from_slice(&0xBEEFu16.to_le_bytes());
        // beta @ ts 250
        data.extend_from_slice(&[2, 250]);
        data.extend_from_slice(&[2, 0x11, 0x22]);
        // alpha again; raw 5 < 250 means the 8 bit clock wrapped
        data.extend_from_slice(&[1, 5]);
        data.extend_from_slice(&0x0102u16.to_le_bytes());

        data.extend_from_slice(&[0xAA, 0xBB]); // padding
        data
    }

    #[test]
    fn decodes_descriptor_then_events_in_order() {
        let data = test_packet();
        let mut reader = PacketReader::new(&data, test_metadata()).unwrap();

        let desc = reader.descriptor();
        assert_eq!(desc.stream_id, 0);
        assert_eq!(desc.cpu, 1);
        assert_eq!(desc.lost_events, 3);
        assert_eq!(desc.content_bits, 28 * 8);
        assert_eq!(desc.packet_bits, 30 * 8);

        assert!(reader.has_more_events());
        let e1 = reader.read_next_event().unwrap().unwrap();
        assert_eq!(e1.name(), "alpha");
        assert_eq!(e1.timestamp, 10);
        assert_eq!(e1.cpu, 1);
        assert_eq!(
            e1.payload_field("value"),
            Some(&FieldValue::UnsignedInteger(0xBEEF))
        );

        let e2 = reader.read_next_event().unwrap().unwrap();
        assert_eq!(e2.name(), "beta");
        assert_eq!(e2.timestamp, 250);
        assert_eq!(
            e2.payload_field("data"),
            Some(&FieldValue::Array(vec![
                FieldValue::UnsignedInteger(0x11),
                FieldValue::UnsignedInteger(0x22),
            ]))
        );

        // The truncated clock wrapped between events two and three
        let e3 = reader.read_next_event().unwrap().unwrap();
        assert_eq!(e3.name(), "alpha");
        assert_eq!(e3.timestamp, 256 + 5);

        // Padding past the content boundary is never read as an event
        assert!(!reader.has_more_events());
        assert_eq!(reader.read_next_event().unwrap(), None);
    }

    #[test]
    fn bad_magic_is_fatal_for_the_packet() {
        let mut data = test_packet();
        data[0] ^= 0xFF;
        let err = PacketReader::new(&data, test_metadata()).unwrap_err();
        assert!(matches!(err, Error::MalformedPacketHeader(_)));
    }

    #[test]
    fn unknown_event_id_is_fatal_for_the_event() {
        let data = test_packet();
        let mut patched = data.clone();
        patched[15] = 9; // first event id byte
        let mut reader = PacketReader::new(&patched, test_metadata()).unwrap();
        assert_eq!(
            reader.read_next_event().unwrap_err(),
            Error::UnknownEventId(9)
        );
    }

    #[test]
    fn content_size_larger_than_region_is_rejected() {
        let mut data = test_packet();
        // Blow up the content_size field
        data[5..9].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            PacketReader::new(&data, test_metadata()).unwrap_err(),
            Error::MalformedPacketHeader(_)
        ));
    }

    #[test]
    fn owned_source_yields_the_same_events() {
        let mut source = PacketSource::new(test_packet(), test_metadata()).unwrap();
        assert_eq!(source.descriptor().cpu, 1);
        let mut names = Vec::new();
        while let Some(event) = source.next_event().unwrap() {
            names.push(event.name().to_string());
        }
        assert_eq!(names, vec!["alpha", "beta", "alpha"]);
    }

    /// A stream whose event header is the compact/extended variant shape:
    /// an 8 bit timestamp in the compact option, 64 bits in the extended one.
    fn compact_extended_metadata() -> Arc<TraceMetadata> {
        let header = TypeSpecifier::Struct {
            fields: vec![
                (
                    "id".to_string(),
                    TypeSpecifier::Enum {
                        container: Some(Box::new(uint_spec(8))),
                        mappings: vec![
                            ("compact".to_string(), 0, 0),
                            ("extended".to_string(), 1, 1),
                        ],
                    },
                ),
                (
                    "v".to_string(),
                    TypeSpecifier::Variant {
                        tag: "id".to_string(),
                        options: vec![
                            (
                                "compact".to_string(),
                                struct_spec(vec![("timestamp", uint_spec(8))]),
                            ),
                            (
                                "extended".to_string(),
                                struct_spec(vec![("timestamp", uint_spec(64))]),
                            ),
                        ],
                    },
                ),
            ],
            align: None,
        };
        let roots = vec![
            RootNode::Trace(vec![assign_str(&["byte_order"], "le")]),
            RootNode::Stream(vec![
                assign_u64(&["id"], 0),
                AssignmentExpr::new(&["event", "header"], RightExpr::Type(header)),
            ]),
            RootNode::Event(vec![
                assign_str(&["name"], "compact_evt"),
                assign_u64(&["id"], 0),
            ]),
            RootNode::Event(vec![
                assign_str(&["name"], "extended_evt"),
                assign_u64(&["id"], 1),
            ]),
        ];
        parse_trace(&roots).unwrap()
    }

    #[test]
    fn variant_header_reconstructs_with_the_selected_width() {
        let mut data = Vec::new();
        data.extend_from_slice(&[0, 200]); // compact @ 200
        data.push(1); // extended
        data.extend_from_slice(&(1u64 << 40).to_le_bytes());
        data.extend_from_slice(&[0, 10]); // compact again, low bits only

        let mut reader = PacketReader::new(&data, compact_extended_metadata()).unwrap();
        let e1 = reader.read_next_event().unwrap().unwrap();
        assert_eq!(e1.name(), "compact_evt");
        assert_eq!(e1.timestamp, 200);

        // The extended header's full-width timestamp must not be folded
        // through the compact 8 bit window
        let e2 = reader.read_next_event().unwrap().unwrap();
        assert_eq!(e2.name(), "extended_evt");
        assert_eq!(e2.timestamp, 1 << 40);

        // The compact window now carries over the extended high bits
        let e3 = reader.read_next_event().unwrap().unwrap();
        assert_eq!(e3.name(), "compact_evt");
        assert_eq!(e3.timestamp, (1 << 40) | 10);
        assert!(!reader.has_more_events());
    }

    #[test]
    fn timestamp_reconstruction_properties() {
        // No wrap: high bits of the previous value carry over
        assert_eq!(reconstruct_timestamp(0x0500, 0x10, 8), 0x0510);
        // Equal low bits stay put
        assert_eq!(reconstruct_timestamp(0x0510, 0x10, 8), 0x0510);
        // Backward movement in the window means a wrap
        assert_eq!(reconstruct_timestamp(0x05FF, 0x01, 8), 0x0601);
        assert!(reconstruct_timestamp(0x05FF, 0x01, 8) >= 0x05FF);
        // Full-width timestamps pass through untouched
        assert_eq!(reconstruct_timestamp(u64::MAX, 42, 64), 42);
    }
}
