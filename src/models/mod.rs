pub mod classification;
pub mod file_entry;
pub mod migration;
pub mod task;
