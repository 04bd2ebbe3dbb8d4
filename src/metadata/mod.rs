//! Metadata parsing: turns the TSDL syntax tree produced by the external
//! grammar front end into the immutable declaration registry the binary
//! decoder runs against.

use crate::declaration::{EventDeclaration, EventDeclarationRef, StructDeclaration};
use crate::error::Error;
use crate::metadata::ast::{AssignmentExpr, RightExpr, RootNode, TypeSpecifier, UnaryExpr};
use crate::metadata::decl::{parse_struct, unary_concat, unary_u64};
use crate::types::ByteOrder;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

pub mod ast;
pub mod decl;

/// An environment entry value; TSDL allows quoted strings and integers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnvValue {
    Integer(i64),
    String(String),
}

/// Trace environment: ordered string key to value mapping, built once per
/// trace and immutable after construction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Environment {
    entries: Vec<(String, EnvValue)>,
}

impl Environment {
    /// Insert preserving first-seen position. The grammar does not enforce
    /// key uniqueness; a duplicate overwrites the earlier value.
    pub fn insert(&mut self, key: String, value: EnvValue) {
        if let Some(existing) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            warn!("Duplicate environment key '{key}' overwrites an earlier value");
            existing.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&EnvValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Iteration preserves insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &EnvValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One clock class described by the metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClockDescriptor {
    pub name: String,
    pub uuid: Option<Uuid>,
    pub description: Option<String>,
    /// Cycles per second
    pub frequency: u64,
    pub offset_seconds: i64,
    pub offset_cycles: u64,
    pub precision: u64,
    /// Whether timestamps are anchored to the Unix epoch (`absolute`)
    pub unix_epoch_origin: bool,
}

impl Default for ClockDescriptor {
    fn default() -> Self {
        ClockDescriptor {
            name: String::new(),
            uuid: None,
            description: None,
            frequency: 1_000_000_000,
            offset_seconds: 0,
            offset_cycles: 0,
            precision: 0,
            unix_epoch_origin: false,
        }
    }
}

/// Declarations scoped to one stream class.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamDeclarations {
    pub id: u64,
    pub event_header: Option<StructDeclaration>,
    pub packet_context: Option<StructDeclaration>,
    pub event_context: Option<StructDeclaration>,
    pub events: BTreeMap<u64, EventDeclarationRef>,
}

/// Everything the binary decoder needs, parsed once per trace and shared
/// read-only across all packet readers.
#[derive(Clone, Debug, PartialEq)]
pub struct TraceMetadata {
    pub byte_order: ByteOrder,
    pub major: Option<u64>,
    pub minor: Option<u64>,
    pub uuid: Option<Uuid>,
    pub environment: Environment,
    pub clocks: BTreeMap<String, ClockDescriptor>,
    pub packet_header: Option<StructDeclaration>,
    pub streams: BTreeMap<u64, StreamDeclarations>,
}

impl TraceMetadata {
    pub fn stream(&self, id: u64) -> Option<&StreamDeclarations> {
        self.streams.get(&id)
    }
}

/// Parse a whole TSDL document into trace metadata.
///
/// The trace block's byte order is resolved first so that `native` byte
/// orders elsewhere in the document inherit it regardless of block order.
pub fn parse_trace(roots: &[RootNode]) -> Result<Arc<TraceMetadata>, Error> {
    let byte_order = find_trace_byte_order(roots)?;

    let mut metadata = TraceMetadata {
        byte_order,
        major: None,
        minor: None,
        uuid: None,
        environment: Environment::default(),
        clocks: BTreeMap::new(),
        packet_header: None,
        streams: BTreeMap::new(),
    };

    for root in roots {
        match root {
            RootNode::Trace(attrs) => parse_trace_block(attrs, &mut metadata)?,
            RootNode::Environment(attrs) => parse_environment(attrs, &mut metadata.environment)?,
            RootNode::Clock(attrs) => {
                let clock = parse_clock(attrs)?;
                metadata.clocks.insert(clock.name.clone(), clock);
            }
            RootNode::Stream(attrs) => parse_stream_block(attrs, &mut metadata)?,
            RootNode::Event(attrs) => parse_event_block(attrs, &mut metadata)?,
        }
    }

    Ok(Arc::new(metadata))
}

fn find_trace_byte_order(roots: &[RootNode]) -> Result<ByteOrder, Error> {
    for root in roots {
        if let RootNode::Trace(attrs) = root {
            for attr in attrs {
                if attr.keyword() == "byte_order" {
                    let value = unary_concat(attr);
                    if value == "native" {
                        return Err(Error::GrammarViolation(
                            "the trace byte_order cannot be 'native'".to_string(),
                        ));
                    }
                    return ByteOrder::from_str(&value).map_err(Error::GrammarViolation);
                }
            }
        }
    }
    Err(Error::MissingRequiredAttribute {
        construct: "trace",
        attribute: "byte_order",
    })
}

fn parse_trace_block(attrs: &[AssignmentExpr], metadata: &mut TraceMetadata) -> Result<(), Error> {
    const CONSTRUCT: &str = "trace";
    for attr in attrs {
        match attr.keyword().as_str() {
            // Already resolved by the pre-scan
            "byte_order" => {}
            "major" => metadata.major = Some(unary_u64(attr, CONSTRUCT)?),
            "minor" => metadata.minor = Some(unary_u64(attr, CONSTRUCT)?),
            "uuid" => {
                let raw = unary_concat(attr);
                let uuid = Uuid::from_str(&raw).map_err(|_| {
                    Error::GrammarViolation(format!("'{raw}' is not a trace UUID"))
                })?;
                metadata.uuid = Some(uuid);
            }
            "packet.header" => {
                metadata.packet_header =
                    Some(expect_struct(attr, CONSTRUCT, metadata.byte_order)?);
            }
            other => {
                return Err(Error::UnknownAttribute {
                    construct: CONSTRUCT,
                    attribute: other.to_string(),
                })
            }
        }
    }
    Ok(())
}

/// Each child is an assignment; both sides are reconstructed from their
/// unary-token runs. Values that are a single integer token stay integers.
fn parse_environment(attrs: &[AssignmentExpr], env: &mut Environment) -> Result<(), Error> {
    for attr in attrs {
        let key = attr.keyword();
        if key.is_empty() {
            return Err(Error::GrammarViolation(
                "environment entry with an empty key".to_string(),
            ));
        }
        let value = match &attr.right {
            RightExpr::Unary(tokens) => match tokens.as_slice() {
                [UnaryExpr::Unsigned(n)] => EnvValue::Integer(*n as i64),
                [UnaryExpr::Signed(n)] => EnvValue::Integer(*n),
                _ => EnvValue::String(unary_concat(attr)),
            },
            RightExpr::Type(_) => {
                return Err(Error::GrammarViolation(format!(
                    "environment entry '{key}' cannot hold a type"
                )))
            }
        };
        env.insert(key, value);
    }
    Ok(())
}

fn parse_clock(attrs: &[AssignmentExpr]) -> Result<ClockDescriptor, Error> {
    const CONSTRUCT: &str = "clock";
    let mut clock = ClockDescriptor::default();
    let mut named = false;
    for attr in attrs {
        match attr.keyword().as_str() {
            "name" => {
                clock.name = unary_concat(attr);
                named = true;
            }
            "uuid" => {
                let raw = unary_concat(attr);
                let uuid = Uuid::from_str(&raw).map_err(|_| {
                    Error::GrammarViolation(format!("'{raw}' is not a clock UUID"))
                })?;
                clock.uuid = Some(uuid);
            }
            "description" => clock.description = Some(unary_concat(attr)),
            "freq" => clock.frequency = unary_u64(attr, CONSTRUCT)?,
            "precision" => clock.precision = unary_u64(attr, CONSTRUCT)?,
            "offset_s" => clock.offset_seconds = unary_i64(attr, CONSTRUCT)?,
            "offset" => clock.offset_cycles = unary_u64(attr, CONSTRUCT)?,
            "absolute" => {
                clock.unix_epoch_origin = matches!(
                    unary_concat(attr).as_str(),
                    "true" | "TRUE" | "1"
                );
            }
            other => {
                return Err(Error::UnknownAttribute {
                    construct: CONSTRUCT,
                    attribute: other.to_string(),
                })
            }
        }
    }
    if !named {
        return Err(Error::MissingRequiredAttribute {
            construct: CONSTRUCT,
            attribute: "name",
        });
    }
    Ok(clock)
}

fn parse_stream_block(attrs: &[AssignmentExpr], metadata: &mut TraceMetadata) -> Result<(), Error> {
    const CONSTRUCT: &str = "stream";
    let mut stream = StreamDeclarations::default();
    for attr in attrs {
        match attr.keyword().as_str() {
            "id" => stream.id = unary_u64(attr, CONSTRUCT)?,
            "event.header" => {
                stream.event_header = Some(expect_struct(attr, CONSTRUCT, metadata.byte_order)?)
            }
            "packet.context" => {
                stream.packet_context = Some(expect_struct(attr, CONSTRUCT, metadata.byte_order)?)
            }
            "event.context" => {
                stream.event_context = Some(expect_struct(attr, CONSTRUCT, metadata.byte_order)?)
            }
            other => {
                return Err(Error::UnknownAttribute {
                    construct: CONSTRUCT,
                    attribute: other.to_string(),
                })
            }
        }
    }
    // An event block may have created the stream entry already
    let entry = metadata.streams.entry(stream.id).or_default();
    let events = std::mem::take(&mut entry.events);
    *entry = StreamDeclarations { events, ..stream };
    Ok(())
}

fn parse_event_block(attrs: &[AssignmentExpr], metadata: &mut TraceMetadata) -> Result<(), Error> {
    const CONSTRUCT: &str = "event";
    let mut name: Option<String> = None;
    let mut id = 0u64;
    let mut stream_id = 0u64;
    let mut log_level = None;
    let mut context = None;
    let mut payload = None;

    for attr in attrs {
        match attr.keyword().as_str() {
            "name" => name = Some(unary_concat(attr)),
            "id" => id = unary_u64(attr, CONSTRUCT)?,
            "stream_id" => stream_id = unary_u64(attr, CONSTRUCT)?,
            "loglevel" => log_level = Some(unary_u64(attr, CONSTRUCT)?),
            "context" => context = Some(expect_struct(attr, CONSTRUCT, metadata.byte_order)?),
            "fields" => payload = Some(expect_struct(attr, CONSTRUCT, metadata.byte_order)?),
            other => {
                return Err(Error::UnknownAttribute {
                    construct: CONSTRUCT,
                    attribute: other.to_string(),
                })
            }
        }
    }

    let name = name.ok_or(Error::MissingRequiredAttribute {
        construct: CONSTRUCT,
        attribute: "name",
    })?;

    let event = Arc::new(EventDeclaration {
        id,
        name: name.clone(),
        log_level,
        context,
        payload: payload.unwrap_or_else(StructDeclaration::empty),
    });

    let stream = metadata.streams.entry(stream_id).or_default();
    stream.id = stream_id;
    if stream.events.insert(id, event).is_some() {
        return Err(Error::GrammarViolation(format!(
            "duplicate event ID {id} ('{name}') in stream {stream_id}"
        )));
    }
    Ok(())
}

fn expect_struct(
    attr: &AssignmentExpr,
    construct: &'static str,
    byte_order: ByteOrder,
) -> Result<StructDeclaration, Error> {
    match &attr.right {
        RightExpr::Type(TypeSpecifier::Struct { fields, align }) => {
            parse_struct(fields, *align, byte_order)
        }
        _ => Err(Error::GrammarViolation(format!(
            "attribute '{}' of {construct} requires a struct type",
            attr.keyword()
        ))),
    }
}

fn unary_i64(attr: &AssignmentExpr, construct: &'static str) -> Result<i64, Error> {
    match &attr.right {
        RightExpr::Unary(tokens) => match tokens.as_slice() {
            [UnaryExpr::Unsigned(n)] if *n <= i64::MAX as u64 => Ok(*n as i64),
            [UnaryExpr::Signed(n)] => Ok(*n),
            _ => Err(Error::GrammarViolation(format!(
                "attribute '{}' of {construct} requires an integer value",
                attr.keyword()
            ))),
        },
        RightExpr::Type(_) => Err(Error::GrammarViolation(format!(
            "attribute '{}' of {construct} requires an integer value",
            attr.keyword()
        ))),
    }
}
