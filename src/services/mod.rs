pub mod batches;
pub mod settlements;
pub mod usage;
