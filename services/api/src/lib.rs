//! services/api/src/lib.rs
//!
//! Library root for the `api` service: adapters for the core ports, the
//! study engine, configuration, and the web layer.

pub mod adapters;
pub mod config;
pub mod error;
pub mod study;
pub mod web;
