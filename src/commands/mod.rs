pub mod classify_commands;
pub mod classify_pipeline;
