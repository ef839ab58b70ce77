//! Core composition logic: configuration, naming, the resource graph and ordering.

pub mod context;
pub mod error;
pub mod graph;
pub mod naming;
pub mod parser;
pub mod resolver;
pub mod stack;
pub mod types;
