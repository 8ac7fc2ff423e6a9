#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod cluster;
pub mod config;
pub mod context;
pub mod crypto;
pub mod dependency;
pub mod error;
pub mod lease;
pub mod ledger;
pub mod shell;
pub mod system;
pub mod templates;
pub mod workflow;

pub mod test_utils;

pub use cli::{Cli, Commands};
pub use error::{Error, Result};
