//! Data types for the harvest engine.

pub mod config;
pub mod job;
pub mod profile;
pub mod record;
