use crate::types::{ChunkSize, QueueCapacity};
use serde::Deserialize;

/// Tunables for the threaded packet reader pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ReaderConfig {
    /// Number of decoded events batched into one chunk before it's
    /// handed across the thread boundary
    pub chunk_size: ChunkSize,

    /// Number of completed chunks the bounded queue will hold before the
    /// producer blocks; this is the sole flow-control mechanism
    pub queue_capacity: QueueCapacity,

    /// Optional name reported in queue depth snapshots, useful when several
    /// stream readers run concurrently
    pub queue_name: Option<String>,
}
