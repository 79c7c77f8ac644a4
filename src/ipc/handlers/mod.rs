pub mod core;
pub mod data;
pub mod imports;
pub mod records;
pub mod setup;
