use crate::bitbuffer::BitBuffer;
use crate::declaration::{Declaration, Encoding, EventDeclarationRef, StructDeclaration};
use crate::error::Error;

/// One decoded field, mirroring the shape of its declaration.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    UnsignedInteger(u64),
    SignedInteger(i64),
    Float(f64),
    String(String),
    /// Enum discriminant plus the first matching label mapping, if any
    Enum {
        value: i64,
        label: Option<String>,
    },
    /// Ordered (name, value) pairs in declared order
    Structure(Vec<(String, FieldValue)>),
    /// Fixed arrays and dynamic sequences both land here
    Array(Vec<FieldValue>),
    /// The selected option of a variant
    Variant {
        selected: String,
        value: Box<FieldValue>,
    },
}

impl FieldValue {
    /// The value as an unsigned integer, for sequence lengths and similar
    /// structural references.
    pub fn as_unsigned(&self) -> Option<u64> {
        match self {
            FieldValue::UnsignedInteger(v) => Some(*v),
            FieldValue::SignedInteger(v) if *v >= 0 => Some(*v as u64),
            FieldValue::Enum { value, .. } if *value >= 0 => Some(*value as u64),
            _ => None,
        }
    }

    /// Depth-first search for a named field within a decoded tree.
    pub fn find(&self, name: &str) -> Option<&FieldValue> {
        match self {
            FieldValue::Structure(fields) => {
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
            FieldValue::Variant { value, .. } => value.find(name),
            _ => None,
        }
    }
}

/// Lexical scope chain for resolving sequence lengths and variant tags
/// against already-decoded fields, innermost first.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Scope<'a> {
    parent: Option<&'a Scope<'a>>,
    fields: &'a [(String, FieldValue)],
}

impl<'a> Scope<'a> {
    pub(crate) fn root(fields: &'a [(String, FieldValue)]) -> Self {
        Scope {
            parent: None,
            fields,
        }
    }

    pub(crate) fn nested(parent: &'a Scope<'a>, fields: &'a [(String, FieldValue)]) -> Self {
        Scope {
            parent: Some(parent),
            fields,
        }
    }

    fn lookup(&self, name: &str) -> Option<&FieldValue> {
        for (field_name, value) in self.fields.iter().rev() {
            if field_name == name {
                return Some(value);
            }
        }
        self.parent.and_then(|p| p.lookup(name))
    }
}

/// Decode one declaration at the buffer's current position.
///
/// Single dispatch point over the closed declaration set; compound kinds
/// recurse with an extended scope so later fields can reference earlier ones.
pub(crate) fn decode(
    decl: &Declaration,
    buf: &mut BitBuffer<'_>,
    scope: Option<&Scope<'_>>,
) -> Result<FieldValue, Error> {
    buf.align(decl.alignment());
    match decl {
        Declaration::Integer(d) => {
            if d.signed {
                Ok(FieldValue::SignedInteger(
                    buf.read_signed(d.size, d.byte_order)?,
                ))
            } else {
                Ok(FieldValue::UnsignedInteger(buf.read(d.size, d.byte_order)?))
            }
        }
        Declaration::Float(d) => Ok(FieldValue::Float(buf.read_float(
            d.exponent,
            d.mantissa,
            d.byte_order,
        )?)),
        Declaration::String(d) => {
            let bytes = buf.read_string_bytes()?;
            let text = match d.encoding {
                // `none` strings carry opaque bytes; surface them the same
                // lossy way rather than inventing a binary value shape
                Encoding::Utf8 | Encoding::None => String::from_utf8_lossy(&bytes).into_owned(),
                Encoding::Ascii => bytes
                    .iter()
                    .map(|&b| {
                        if b.is_ascii() {
                            b as char
                        } else {
                            char::REPLACEMENT_CHARACTER
                        }
                    })
                    .collect(),
            };
            Ok(FieldValue::String(text))
        }
        Declaration::Enum(d) => {
            let value = if d.container.signed {
                buf.read_signed(d.container.size, d.container.byte_order)?
            } else {
                buf.read(d.container.size, d.container.byte_order)? as i64
            };
            Ok(FieldValue::Enum {
                value,
                label: d.label_for(value).map(str::to_string),
            })
        }
        Declaration::Struct(d) => decode_struct(d, buf, scope),
        Declaration::Array(d) => {
            let mut elements = Vec::with_capacity(d.length as usize);
            for _ in 0..d.length {
                elements.push(decode(&d.element, buf, scope)?);
            }
            Ok(FieldValue::Array(elements))
        }
        Declaration::Sequence(d) => {
            let length = scope
                .and_then(|s| s.lookup(&d.length_field))
                .and_then(FieldValue::as_unsigned)
                .ok_or_else(|| Error::MissingLengthField(d.length_field.clone()))?;
            let mut elements = Vec::with_capacity(length.min(4096) as usize);
            for _ in 0..length {
                elements.push(decode(&d.element, buf, scope)?);
            }
            Ok(FieldValue::Array(elements))
        }
        Declaration::Variant(d) => {
            let tag = scope
                .and_then(|s| s.lookup(&d.tag))
                .ok_or_else(|| Error::MissingTagField(d.tag.clone()))?;
            let label = match tag {
                FieldValue::Enum {
                    label: Some(label), ..
                } => label.clone(),
                _ => return Err(Error::MissingTagField(d.tag.clone())),
            };
            let option = d
                .option(&label)
                .ok_or_else(|| Error::UnresolvedVariantOption {
                    tag: d.tag.clone(),
                    label: label.clone(),
                })?;
            let value = decode(option, buf, scope)?;
            Ok(FieldValue::Variant {
                selected: label,
                value: Box::new(value),
            })
        }
    }
}

/// Decode a struct's fields in declared order. Each field decodes inside a
/// scope that covers its already-decoded siblings plus the enclosing frames.
pub(crate) fn decode_struct(
    decl: &StructDeclaration,
    buf: &mut BitBuffer<'_>,
    outer: Option<&Scope<'_>>,
) -> Result<FieldValue, Error> {
    buf.align(decl.align);
    let mut fields: Vec<(String, FieldValue)> = Vec::with_capacity(decl.fields.len());
    for (name, field_decl) in decl.fields.iter() {
        let value = {
            let scope = match outer {
                Some(parent) => Scope::nested(parent, &fields),
                None => Scope::root(&fields),
            };
            decode(field_decl, buf, Some(&scope))?
        };
        fields.push((name.clone(), value));
    }
    Ok(FieldValue::Structure(fields))
}

/// One decoded event instance.
///
/// Holds a shared reference to its declaration and the decoded field trees;
/// carries no back-reference to the buffer it was decoded from.
#[derive(Clone, Debug, PartialEq)]
pub struct EventDefinition {
    pub declaration: EventDeclarationRef,
    /// Absolute timestamp in raw clock cycles, reconstructed from the
    /// possibly-truncated header field
    pub timestamp: u64,
    /// Stream instance (CPU) the event was recorded on
    pub cpu: u32,
    pub stream_id: u64,
    pub stream_context: Option<FieldValue>,
    pub context: Option<FieldValue>,
    pub payload: FieldValue,
}

impl EventDefinition {
    pub fn name(&self) -> &str {
        &self.declaration.name
    }

    pub fn id(&self) -> u64 {
        self.declaration.id
    }

    /// Look up a payload field by name, searching nested structures.
    pub fn payload_field(&self, name: &str) -> Option<&FieldValue> {
        self.payload.find(name)
    }
}
