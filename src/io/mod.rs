//! I/O boundaries - detector ingest, collector egress, HTTP surfaces

pub mod api;
pub mod control;
pub mod detection;
pub mod discovery;
pub mod reporting;
pub mod store;
