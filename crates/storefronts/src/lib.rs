//! HTTP bindings for the two storefronts keyferry talks to.
//!
//! [`humble`] covers login, order listing and key reveal on Humble Bundle.
//! [`steam`] covers the `IAuthenticationService` login flows, store session
//! finalization, ownership data and key registration on Steam.
//!
//! Cookies travel as plain `name=value; name=value` header strings, see
//! [`cookie_utils`].

pub mod cookie_utils;
mod default;
pub mod error;
pub mod humble;
pub mod steam;

pub use default::{DEFAULT_UA, default_client};
pub use error::StorefrontError;
