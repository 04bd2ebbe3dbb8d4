use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Unexpected metadata syntax. {0}")]
    GrammarViolation(String),

    #[error("Unknown attribute '{attribute}' in {construct} declaration")]
    UnknownAttribute {
        construct: &'static str,
        attribute: String,
    },

    #[error("Missing required attribute '{attribute}' in {construct} declaration")]
    MissingRequiredAttribute {
        construct: &'static str,
        attribute: &'static str,
    },

    #[error(
        "Bit buffer read of {requested} bits at position {position} exceeds the {capacity} bit region"
    )]
    Bounds {
        position: u64,
        requested: u64,
        capacity: u64,
    },

    #[error("Malformed packet header. {0}")]
    MalformedPacketHeader(String),

    #[error("No event declaration registered for event ID {0}")]
    UnknownEventId(u64),

    #[error("Sequence length field '{0}' was not decoded before the sequence")]
    MissingLengthField(String),

    #[error("Variant tag field '{0}' was not decoded before the variant")]
    MissingTagField(String),

    #[error("Variant tag label '{label}' does not select any option of the variant tagged by '{tag}'")]
    UnresolvedVariantOption { tag: String, label: String },

    #[error("Cannot decode a {exponent}/{mantissa} bit floating point layout; only 32 and 64 bit totals are supported")]
    UnsupportedFloatLayout { exponent: u32, mantissa: u32 },

    #[error("The packet reader was closed before the stream was exhausted")]
    Closed,
}
