// Instruction records and their settlement state
pub mod models;
pub mod repository;

pub use repository::{InMemoryRecordStore, PgRecordStore, RecordStore};
