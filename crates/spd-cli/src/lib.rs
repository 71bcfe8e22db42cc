#![doc = include_str!(concat!(env!("OUT_DIR"), "/README_GENERATED.md"))]
#![deny(unused_crate_dependencies)]

#[cfg(test)]
use tempfile as _;

pub mod commands;
pub mod handlers;
pub mod parser;

pub use commands::Commands;
pub use parser::Cli;
