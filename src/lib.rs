// Library root — exposes internals for integration tests and future crate consumers.
// The binary entry point is src/main.rs.

pub mod config;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod logger;
pub mod rank;
pub mod store;
