use crate::types::ByteOrder;
use std::sync::Arc;

/// Static description of a field's binary layout.
///
/// A closed set: the binary decoder dispatches over these tags exhaustively,
/// so adding a kind here forces the decode path to handle it.
#[derive(Clone, Debug, PartialEq)]
pub enum Declaration {
    Integer(IntegerDeclaration),
    Float(FloatDeclaration),
    Struct(StructDeclaration),
    Variant(VariantDeclaration),
    Array(ArrayDeclaration),
    Sequence(SequenceDeclaration),
    Enum(EnumDeclaration),
    String(StringDeclaration),
}

impl Declaration {
    /// Alignment in bits. Always a power of two >= 1.
    pub fn alignment(&self) -> u64 {
        match self {
            Declaration::Integer(d) => d.align,
            Declaration::Float(d) => d.align,
            Declaration::Struct(d) => d.align,
            Declaration::Variant(_) => 1,
            Declaration::Array(d) => d.element.alignment(),
            Declaration::Sequence(d) => d.element.alignment(),
            Declaration::Enum(d) => d.container.align,
            Declaration::String(_) => 8,
        }
    }

    /// Total bit width when it is statically computable.
    ///
    /// Sequences, variants and strings only know their width at decode time,
    /// as do structs containing any of those.
    pub fn fixed_bit_width(&self) -> Option<u64> {
        match self {
            Declaration::Integer(d) => Some(u64::from(d.size)),
            Declaration::Float(d) => Some(u64::from(d.exponent) + u64::from(d.mantissa)),
            Declaration::Enum(d) => Some(u64::from(d.container.size)),
            Declaration::Array(d) => d.element.fixed_bit_width().map(|w| w * d.length),
            Declaration::Struct(d) => {
                let mut width = 0u64;
                for (_, field) in d.fields.iter() {
                    let align = field.alignment();
                    width = width.div_ceil(align) * align;
                    width += field.fixed_bit_width()?;
                }
                Some(width)
            }
            Declaration::Variant(_) | Declaration::Sequence(_) | Declaration::String(_) => None,
        }
    }
}

/// How an integer field should be displayed, from the TSDL `base` attribute.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub enum DisplayBase {
    Binary,
    Octal,
    #[default]
    Decimal,
    Hexadecimal,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntegerDeclaration {
    /// Width in bits, 1..=64
    pub size: u32,
    /// Alignment in bits
    pub align: u64,
    pub signed: bool,
    pub byte_order: ByteOrder,
    pub base: DisplayBase,
    /// Name of the clock this integer samples, from the `map` attribute
    pub clock_map: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FloatDeclaration {
    /// Exponent width in bits (`exp_dig`)
    pub exponent: u32,
    /// Mantissa width in bits including the implicit bit (`mant_dig`)
    pub mantissa: u32,
    pub align: u64,
    pub byte_order: ByteOrder,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StructDeclaration {
    /// Fields in declared order; decode order is the declared order
    pub fields: Vec<(String, Declaration)>,
    pub align: u64,
}

impl StructDeclaration {
    pub fn empty() -> Self {
        StructDeclaration {
            fields: Vec::new(),
            align: 1,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Declaration> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VariantDeclaration {
    /// Name of the enum field whose label selects the option. Must be
    /// decoded before the variant itself.
    pub tag: String,
    /// Options keyed by tag label, in declared order
    pub options: Vec<(String, Declaration)>,
}

impl VariantDeclaration {
    pub fn option(&self, label: &str) -> Option<&Declaration> {
        self.options
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, d)| d)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ArrayDeclaration {
    pub length: u64,
    pub element: Box<Declaration>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SequenceDeclaration {
    /// Name of the already-decoded field holding the element count
    pub length_field: String,
    pub element: Box<Declaration>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnumDeclaration {
    pub container: IntegerDeclaration,
    /// (label, lo, hi) in declared order; ranges are inclusive and may
    /// overlap, first match wins
    pub ranges: Vec<(String, i64, i64)>,
}

impl EnumDeclaration {
    pub fn label_for(&self, value: i64) -> Option<&str> {
        self.ranges
            .iter()
            .find(|(_, lo, hi)| value >= *lo && value <= *hi)
            .map(|(label, _, _)| label.as_str())
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    Ascii,
    None,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StringDeclaration {
    pub encoding: Encoding,
}

/// One event class from the metadata, shared read-only across all packet
/// readers of a trace.
#[derive(Clone, Debug, PartialEq)]
pub struct EventDeclaration {
    pub id: u64,
    pub name: String,
    pub log_level: Option<u64>,
    /// Per-event context, decoded between the stream event context and
    /// the payload
    pub context: Option<StructDeclaration>,
    pub payload: StructDeclaration,
}

pub type EventDeclarationRef = Arc<EventDeclaration>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn u32_decl() -> IntegerDeclaration {
        IntegerDeclaration {
            size: 32,
            align: 8,
            signed: false,
            byte_order: ByteOrder::LittleEndian,
            base: DisplayBase::Decimal,
            clock_map: None,
        }
    }

    #[test]
    fn struct_width_accounts_for_alignment_gaps() {
        let decl = Declaration::Struct(StructDeclaration {
            fields: vec![
                (
                    "flags".to_string(),
                    Declaration::Integer(IntegerDeclaration {
                        size: 5,
                        align: 1,
                        ..u32_decl()
                    }),
                ),
                ("count".to_string(), Declaration::Integer(u32_decl())),
            ],
            align: 8,
        });
        // 5 bits of flags, 3 bits of padding up to the 8 bit alignment,
        // then 32 bits of count
        assert_eq!(decl.fixed_bit_width(), Some(40));
    }

    #[test]
    fn sequence_width_is_dynamic() {
        let decl = Declaration::Sequence(SequenceDeclaration {
            length_field: "len".to_string(),
            element: Box::new(Declaration::Integer(u32_decl())),
        });
        assert_eq!(decl.fixed_bit_width(), None);
        assert_eq!(decl.alignment(), 8);
    }

    #[test]
    fn enum_label_first_match_wins() {
        let decl = EnumDeclaration {
            container: u32_decl(),
            ranges: vec![
                ("IDLE".to_string(), 0, 0),
                ("RUNNING".to_string(), 1, 10),
                ("ANY".to_string(), 0, 10),
            ],
        };
        assert_eq!(decl.label_for(0), Some("IDLE"));
        assert_eq!(decl.label_for(5), Some("RUNNING"));
        assert_eq!(decl.label_for(11), None);
    }
}
