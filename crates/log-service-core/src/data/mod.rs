//! Log record persistence.

mod entry;
mod repository;

pub use entry::{LogEntry, NewLogEntry};
pub use repository::{LogRepository, StoreLogRepository};
