//! Vigil server library.
//!
//! Configuration, logging, service bootstrap and the JSON-lines command
//! surface used by the `vigil` binary.

#![deny(unsafe_code)]

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod logging;
pub mod session;
pub mod shutdown;
