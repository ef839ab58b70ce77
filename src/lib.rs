//! stackweave: topology composition for containerized web applications.
//!
//! Declares a network, shared file storage, a managed database and a
//! load-balanced container service, then derives the security rules and
//! identity grants that let them reach each other.

pub mod cli;
pub mod core;
pub mod resources;
pub mod synth;
