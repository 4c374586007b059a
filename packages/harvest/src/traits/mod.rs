//! Core trait abstractions for the harvest engine.
//!
//! The engine talks to the remote service and the clock only through these
//! seams, so every component can be driven by mocks in tests.

pub mod client;
pub mod sleeper;
