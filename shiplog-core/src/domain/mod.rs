//! Core domain types
//!
//! These types are shared between the runner (which produces and batches
//! events) and the client (which serializes them onto the wire).

pub mod destination;
pub mod log;
