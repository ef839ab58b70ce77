//! Stack components.
//!
//! Each component registers its resources on the composition context and
//! returns a typed handle for the components that build on it:
//! 1. network: address space, subnets, NAT
//! 2. storage and database: placed in the private subnets
//! 3. compute: the task definition wired to both
//! 4. service: the load-balanced service around the task
//! 5. permissions: rules and grants for everything declared so far

pub mod compute;
pub mod database;
pub mod network;
pub mod permissions;
pub mod security;
pub mod service;
pub mod storage;
