//! Declaration parsers for individual TSDL constructs.
//!
//! Every construct parser is a single pass over its assignment-expression
//! children: each left-hand side must resolve to a known attribute keyword
//! and each right-hand side is handed to a keyword-specific sub-parser.
//! Unknown keys and missing required keys are hard failures naming the
//! offending attribute.

use crate::declaration::{
    ArrayDeclaration, Declaration, DisplayBase, Encoding, EnumDeclaration, FloatDeclaration,
    IntegerDeclaration, SequenceDeclaration, StringDeclaration, StructDeclaration,
    VariantDeclaration,
};
use crate::error::Error;
use crate::metadata::ast::{AssignmentExpr, RightExpr, TypeSpecifier, UnaryExpr};
use crate::types::ByteOrder;
use std::str::FromStr;

/// Parse any type specifier into a declaration, resolving `native` byte
/// orders against the trace-wide order.
pub fn parse_type(spec: &TypeSpecifier, trace_byte_order: ByteOrder) -> Result<Declaration, Error> {
    match spec {
        TypeSpecifier::Integer(attrs) => {
            parse_integer(attrs, trace_byte_order).map(Declaration::Integer)
        }
        TypeSpecifier::FloatingPoint(attrs) => {
            parse_float(attrs, trace_byte_order).map(Declaration::Float)
        }
        TypeSpecifier::String(attrs) => parse_string(attrs).map(Declaration::String),
        TypeSpecifier::Struct { fields, align } => {
            parse_struct(fields, *align, trace_byte_order).map(Declaration::Struct)
        }
        TypeSpecifier::Enum {
            container,
            mappings,
        } => parse_enum(container.as_deref(), mappings, trace_byte_order).map(Declaration::Enum),
        TypeSpecifier::Variant { tag, options } => {
            let mut parsed = Vec::with_capacity(options.len());
            for (label, option_spec) in options {
                parsed.push((label.clone(), parse_type(option_spec, trace_byte_order)?));
            }
            Ok(Declaration::Variant(VariantDeclaration {
                tag: tag.clone(),
                options: parsed,
            }))
        }
        TypeSpecifier::Array { length, element } => {
            Ok(Declaration::Array(ArrayDeclaration {
                length: *length,
                element: Box::new(parse_type(element, trace_byte_order)?),
            }))
        }
        TypeSpecifier::Sequence {
            length_field,
            element,
        } => Ok(Declaration::Sequence(SequenceDeclaration {
            length_field: length_field.clone(),
            element: Box::new(parse_type(element, trace_byte_order)?),
        })),
    }
}

pub fn parse_integer(
    attrs: &[AssignmentExpr],
    trace_byte_order: ByteOrder,
) -> Result<IntegerDeclaration, Error> {
    const CONSTRUCT: &str = "integer";
    let mut size: Option<u32> = None;
    let mut align: Option<u64> = None;
    let mut signed = false;
    let mut byte_order = trace_byte_order;
    let mut base = DisplayBase::Decimal;
    let mut clock_map = None;

    for attr in attrs {
        match attr.keyword().as_str() {
            "size" => {
                let s = unary_u64(attr, CONSTRUCT)?;
                if s == 0 || s > 64 {
                    return Err(Error::GrammarViolation(format!(
                        "integer size {s} is outside the supported 1..=64 bit range"
                    )));
                }
                size = Some(s as u32);
            }
            "align" => align = Some(parse_alignment(unary_u64(attr, CONSTRUCT)?)?),
            "signed" => signed = unary_bool(attr, CONSTRUCT)?,
            "byte_order" => byte_order = parse_byte_order(attr, trace_byte_order)?,
            "base" => base = parse_base(attr)?,
            // Display encoding for text arrays; carried by the grammar but
            // irrelevant to the binary shape
            "encoding" => {}
            "map" => clock_map = Some(unary_concat(attr)),
            other => {
                return Err(Error::UnknownAttribute {
                    construct: CONSTRUCT,
                    attribute: other.to_string(),
                })
            }
        }
    }

    let size = size.ok_or(Error::MissingRequiredAttribute {
        construct: CONSTRUCT,
        attribute: "size",
    })?;
    // Byte-sized integers default to byte alignment, bit-packed ones to none
    let align = align.unwrap_or(if size % 8 == 0 { 8 } else { 1 });

    Ok(IntegerDeclaration {
        size,
        align,
        signed,
        byte_order,
        base,
        clock_map,
    })
}

pub fn parse_float(
    attrs: &[AssignmentExpr],
    trace_byte_order: ByteOrder,
) -> Result<FloatDeclaration, Error> {
    const CONSTRUCT: &str = "floating_point";
    // IEEE-754 single precision layout unless told otherwise
    let mut exponent = 8u32;
    let mut mantissa = 24u32;
    let mut align = 1u64;
    let mut byte_order = trace_byte_order;

    for attr in attrs {
        match attr.keyword().as_str() {
            "exp_dig" => exponent = parse_float_width(attr, CONSTRUCT)?,
            "mant_dig" => mantissa = parse_float_width(attr, CONSTRUCT)?,
            "align" => align = parse_alignment(unary_u64(attr, CONSTRUCT)?)?,
            "byte_order" => byte_order = parse_byte_order(attr, trace_byte_order)?,
            other => {
                return Err(Error::UnknownAttribute {
                    construct: CONSTRUCT,
                    attribute: other.to_string(),
                })
            }
        }
    }

    // Unreachable from legal TSDL (the defaults are nonzero), but a caller
    // explicitly zeroing both widths must not yield a zero-width declaration
    if exponent + mantissa == 0 {
        return Err(Error::MissingRequiredAttribute {
            construct: CONSTRUCT,
            attribute: "size",
        });
    }

    Ok(FloatDeclaration {
        exponent,
        mantissa,
        align,
        byte_order,
    })
}

pub fn parse_string(attrs: &[AssignmentExpr]) -> Result<StringDeclaration, Error> {
    const CONSTRUCT: &str = "string";
    let mut encoding = Encoding::Utf8;
    for attr in attrs {
        match attr.keyword().as_str() {
            "encoding" => {
                encoding = match unary_concat(attr).as_str() {
                    "UTF8" | "utf8" => Encoding::Utf8,
                    "ASCII" | "ascii" => Encoding::Ascii,
                    "none" => Encoding::None,
                    other => {
                        return Err(Error::GrammarViolation(format!(
                            "'{other}' is not a string encoding"
                        )))
                    }
                };
            }
            other => {
                return Err(Error::UnknownAttribute {
                    construct: CONSTRUCT,
                    attribute: other.to_string(),
                })
            }
        }
    }
    Ok(StringDeclaration { encoding })
}

pub fn parse_struct(
    fields: &[(String, TypeSpecifier)],
    explicit_align: Option<u64>,
    trace_byte_order: ByteOrder,
) -> Result<StructDeclaration, Error> {
    let mut parsed = Vec::with_capacity(fields.len());
    let mut align = match explicit_align {
        Some(a) => parse_alignment(a)?,
        None => 1,
    };
    for (name, spec) in fields {
        let decl = parse_type(spec, trace_byte_order)?;
        align = align.max(decl.alignment());
        parsed.push((name.clone(), decl));
    }
    Ok(StructDeclaration {
        fields: parsed,
        align,
    })
}

fn parse_enum(
    container: Option<&TypeSpecifier>,
    mappings: &[(String, i64, i64)],
    trace_byte_order: ByteOrder,
) -> Result<EnumDeclaration, Error> {
    let container = match container {
        Some(TypeSpecifier::Integer(attrs)) => parse_integer(attrs, trace_byte_order)?,
        Some(_) => {
            return Err(Error::GrammarViolation(
                "enum container must be an integer type".to_string(),
            ))
        }
        None => {
            return Err(Error::MissingRequiredAttribute {
                construct: "enum",
                attribute: "container",
            })
        }
    };
    // Range bounds are signed; a full-width unsigned discriminant could wrap
    // negative and match the wrong mapping
    if container.size == 64 && !container.signed {
        return Err(Error::GrammarViolation(
            "a 64 bit unsigned enum container exceeds the signed discriminant range".to_string(),
        ));
    }
    Ok(EnumDeclaration {
        container,
        ranges: mappings.to_vec(),
    })
}

/// Exponent and mantissa widths share the 0..=64 bound so the total width
/// stays representable; narrowing an unbounded value would silently change it.
fn parse_float_width(attr: &AssignmentExpr, construct: &'static str) -> Result<u32, Error> {
    let width = unary_u64(attr, construct)?;
    if width > 64 {
        return Err(Error::GrammarViolation(format!(
            "attribute '{}' of {construct} exceeds the supported 64 bit width",
            attr.keyword()
        )));
    }
    Ok(width as u32)
}

/// Alignment of 0 is normalized to 1; anything else must be a power of two.
fn parse_alignment(align: u64) -> Result<u64, Error> {
    if align == 0 {
        Ok(1)
    } else if align.is_power_of_two() {
        Ok(align)
    } else {
        Err(Error::GrammarViolation(format!(
            "alignment {align} is not a power of two"
        )))
    }
}

fn parse_byte_order(
    attr: &AssignmentExpr,
    trace_byte_order: ByteOrder,
) -> Result<ByteOrder, Error> {
    let value = unary_concat(attr);
    if value == "native" {
        return Ok(trace_byte_order);
    }
    ByteOrder::from_str(&value).map_err(Error::GrammarViolation)
}

fn parse_base(attr: &AssignmentExpr) -> Result<DisplayBase, Error> {
    let tokens = unary_tokens(attr);
    if let [UnaryExpr::Unsigned(n)] = tokens {
        return match *n {
            2 => Ok(DisplayBase::Binary),
            8 => Ok(DisplayBase::Octal),
            10 => Ok(DisplayBase::Decimal),
            16 => Ok(DisplayBase::Hexadecimal),
            _ => Err(Error::GrammarViolation(format!(
                "{n} is not a display base"
            ))),
        };
    }
    match unary_concat(attr).as_str() {
        "binary" | "bin" | "b" => Ok(DisplayBase::Binary),
        "octal" | "oct" | "o" => Ok(DisplayBase::Octal),
        "decimal" | "dec" | "d" | "i" | "u" => Ok(DisplayBase::Decimal),
        "hexadecimal" | "hex" | "x" | "X" | "p" => Ok(DisplayBase::Hexadecimal),
        other => Err(Error::GrammarViolation(format!(
            "'{other}' is not a display base"
        ))),
    }
}

fn unary_tokens(attr: &AssignmentExpr) -> &[UnaryExpr] {
    match &attr.right {
        RightExpr::Unary(tokens) => tokens,
        RightExpr::Type(_) => &[],
    }
}

/// Reconstruct a right-hand side from its run of unary tokens, joining
/// dotted components the way the grammar split them.
pub(crate) fn unary_concat(attr: &AssignmentExpr) -> String {
    let mut out = String::new();
    for token in unary_tokens(attr) {
        if !out.is_empty() {
            out.push('.');
        }
        match token {
            UnaryExpr::String(s) => out.push_str(s),
            UnaryExpr::Unsigned(n) => out.push_str(&n.to_string()),
            UnaryExpr::Signed(n) => out.push_str(&n.to_string()),
        }
    }
    out
}

pub(crate) fn unary_u64(attr: &AssignmentExpr, construct: &'static str) -> Result<u64, Error> {
    match unary_tokens(attr) {
        [UnaryExpr::Unsigned(n)] => Ok(*n),
        [UnaryExpr::Signed(n)] if *n >= 0 => Ok(*n as u64),
        _ => Err(Error::GrammarViolation(format!(
            "attribute '{}' of {construct} requires an unsigned integer value",
            attr.keyword()
        ))),
    }
}

fn unary_bool(attr: &AssignmentExpr, construct: &'static str) -> Result<bool, Error> {
    match unary_tokens(attr) {
        [UnaryExpr::Unsigned(0)] => Ok(false),
        [UnaryExpr::Unsigned(1)] => Ok(true),
        [UnaryExpr::String(s)] if s == "false" => Ok(false),
        [UnaryExpr::String(s)] if s == "true" => Ok(true),
        _ => Err(Error::GrammarViolation(format!(
            "attribute '{}' of {construct} requires a boolean value",
            attr.keyword()
        ))),
    }
}
