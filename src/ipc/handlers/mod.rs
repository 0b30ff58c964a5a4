pub mod batch;
pub mod core;
pub mod preview;
pub mod records;
