//! CLI subcommand implementations for the palate binary.

pub mod convert_cmd;
pub mod doctor;
pub mod harvest_cmd;
pub mod urls_cmd;
