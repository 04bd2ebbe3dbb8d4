//! # Overview
//!
//! Conceptually CTF data is organized as follows (from the CTF spec):
//! * Trace (binary metadata description shared by every physical trace file)
//!   - One or more streams
//!     * Series of packets, each a series of events
//!
//! This crate turns that layout into decoded events in three layers:
//!
//! * [`metadata`] consumes a pre-parsed TSDL syntax tree (the text grammar
//!   front end is an external collaborator) and assembles an immutable
//!   [`metadata::TraceMetadata`]: byte order, environment, clocks, and the
//!   per-stream event declaration registry.
//! * [`packet`] walks one binary packet at a time against that metadata:
//!   packet header (magic, UUID, stream id), stream packet context, then
//!   events until the content size is exhausted, reconstructing truncated
//!   event timestamps along the way. Bit-granular reads live in
//!   [`bitbuffer`], decoded values in [`event`].
//! * [`pipeline`] wraps any event source with a producer thread that decodes
//!   ahead into fixed-size chunks on a bounded queue, delivering events in
//!   order and deferring producer errors behind the events decoded before
//!   them.
//!
//! Field values are dynamically shaped ([`event::FieldValue`]) because the
//! event layout is only known once the trace's own metadata has been parsed.

#![deny(warnings, clippy::all)]

pub mod bitbuffer;
pub mod config;
pub mod declaration;
pub mod error;
pub mod event;
pub mod metadata;
pub mod packet;
pub mod pipeline;
pub mod prelude;
pub mod symbols;
pub mod tracing;
pub mod types;
