//! Vul-Driller Store
//!
//! Persisted state for the vulnerability identifier driller:
//! - the sighting row type and its identity rules
//! - the JSON/CSV dataset with atomic replacement
//! - checkpoint markers that record how far history has been processed

pub mod checkpoint;
pub mod dataset;
pub mod error;
pub mod sighting;

pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use dataset::{read_json, write_json_atomic, JsonDatasetStore, SightingStore};
pub use error::{Result, StoreError};
pub use sighting::{RowKey, Sighting, COMMIT_MESSAGE_ORIGIN};
