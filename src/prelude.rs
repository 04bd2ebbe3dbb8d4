pub use crate::bitbuffer::BitBuffer;
pub use crate::config::ReaderConfig;
pub use crate::declaration::{Declaration, EventDeclaration, EventDeclarationRef};
pub use crate::error::Error;
pub use crate::event::{EventDefinition, FieldValue};
pub use crate::metadata::{parse_trace, ClockDescriptor, Environment, TraceMetadata};
pub use crate::packet::{EventSource, PacketDescriptor, PacketReader, PacketSource};
pub use crate::pipeline::{QueueDepth, ThreadedPacketReader};
pub use crate::symbols::{CallSite, NoopResolver, SymbolResolver};
pub use crate::types::{ByteOrder, ChunkSize, Interruptor, QueueCapacity};
