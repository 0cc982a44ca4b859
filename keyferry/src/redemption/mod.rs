//! Reveal and activation of keys, one at a time.
//!
//! Activation is serialized: the target platform throttles per account, and
//! a rate-limit answer must stop every later attempt.

mod controller;
mod cooldown;
mod outcome;
mod retry;
mod summary;

pub use controller::{RedemptionController, RedemptionEvent, RedemptionPolicy, Sessions};
pub use cooldown::CooldownGate;
pub use outcome::{Classified, RedemptionOutcome, classify_activation, codes};
pub use retry::RetryConfig;
pub use summary::{HaltReason, KeyDisposition, KeyReport, RunSummary};
