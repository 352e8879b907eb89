//! Domain types - markers, observations, visit sessions

pub mod session;
pub mod types;
