//! Background services

pub mod import_processor;
pub mod run_registry;
