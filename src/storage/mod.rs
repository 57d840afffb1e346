pub mod checkpoint;
pub mod duckdb;
pub mod traits;

pub use checkpoint::ScanCheckpoint;
pub use traits::{CountrySummary, NewLogEntry, Storage, StorageError, StoredLogEntry};
