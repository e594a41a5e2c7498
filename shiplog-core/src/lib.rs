//! Shiplog Core
//!
//! Core types shared by the shiplog crates.
//!
//! This crate contains:
//! - Domain types: log events, batches and the destination they are shipped to

pub mod domain;
