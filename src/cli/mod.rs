//! CLI subcommand implementations for the audioharvest binary.

pub mod capture_cmd;
pub mod doctor;
pub mod run_cmd;
