pub mod material_batch;
pub mod material_expense;
pub mod settlement;
pub mod usage_record;
