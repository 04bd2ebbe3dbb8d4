use derive_more::{Display, From, Into};
use serde::Deserialize;
use std::num::ParseIntError;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::Arc;

#[derive(Clone, Debug)]
#[repr(transparent)]
pub struct Interruptor(Arc<AtomicBool>);

impl Interruptor {
    pub fn new() -> Self {
        Interruptor(Arc::new(AtomicBool::new(false)))
    }

    pub fn set(&self) {
        self.0.store(true, SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(SeqCst)
    }
}

impl Default for Interruptor {
    fn default() -> Self {
        Self::new()
    }
}

/// Byte order of a field's binary representation.
///
/// The `native` TSDL keyword is resolved against the trace-wide byte order
/// during metadata parsing, so declarations only ever carry a concrete order.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Display)]
#[serde(try_from = "String")]
pub enum ByteOrder {
    #[display(fmt = "le")]
    LittleEndian,
    #[display(fmt = "be")]
    BigEndian,
}

impl TryFrom<String> for ByteOrder {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        ByteOrder::from_str(&s)
    }
}

impl FromStr for ByteOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "le" => Ok(ByteOrder::LittleEndian),
            "be" | "network" => Ok(ByteOrder::BigEndian),
            _ => Err(format!("'{s}' is not a byte order")),
        }
    }
}

/// Number of decoded events accumulated into a single cross-thread chunk.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, From, Into, Display,
)]
#[repr(transparent)]
pub struct ChunkSize(pub usize);

impl Default for ChunkSize {
    fn default() -> Self {
        // Amortizes the channel hand-off over ~1K events
        ChunkSize(1023)
    }
}

impl FromStr for ChunkSize {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ChunkSize(s.trim().parse::<usize>()?))
    }
}

/// Maximum number of completed chunks held in the pipeline queue.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, From, Into, Display,
)]
#[repr(transparent)]
pub struct QueueCapacity(pub usize);

impl Default for QueueCapacity {
    fn default() -> Self {
        // ~64K events in flight with the default chunk size
        QueueCapacity(63)
    }
}

impl FromStr for QueueCapacity {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(QueueCapacity(s.trim().parse::<usize>()?))
    }
}
