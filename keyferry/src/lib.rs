//! keyferry engine.
//!
//! Moves game keys bought on Humble Bundle onto a Steam account. A run signs
//! in to both services, gathers every key, checks what the account already
//! owns, then reveals and activates what is left, one key at a time, keeping
//! a durable ledger of every outcome.
//!
//! The network seam is the pair of traits in [`remote`]; [`adapters`]
//! implements them over the `storefronts` HTTP bindings.

pub mod adapters;
pub mod auth;
pub mod catalog;
pub mod choice;
pub mod config;
pub mod error;
pub mod inventory;
pub mod keys;
pub mod ledger;
pub mod logging;
pub mod ownership;
pub mod redemption;
pub mod remote;
pub mod runner;
pub mod session;

pub use auth::RunMode;
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use runner::{ExitStatus, Redeemer, RedeemerParts, RunError, RunOptions, RunReport};
