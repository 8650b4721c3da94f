pub mod config;
pub mod error;
pub mod fsutil;
pub mod hashsum;
pub mod inventory;
pub mod layout;
pub mod log_sanitize;
pub mod logging;
pub mod partition_table;
pub mod size;

pub use error::{Error, Result};
pub use layout::{Document, Flags, PartitionSpec, Strictness, Unit};
pub use partition_table::{PartitionRecord, PartitionTable, encode};
