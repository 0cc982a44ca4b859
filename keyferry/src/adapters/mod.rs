//! Remote client implementations over the `storefronts` HTTP bindings.

mod humble;
mod steam;

pub use humble::HumbleClient;
pub use steam::SteamClient;

use storefronts::StorefrontError;

use crate::remote::RemoteError;

pub(crate) fn remote_error(error: StorefrontError) -> RemoteError {
    match error {
        StorefrontError::Unauthorized => RemoteError::Unauthorized,
        StorefrontError::Network(e) => RemoteError::Transport(e.to_string()),
        StorefrontError::Status(status) if status.is_server_error() => {
            RemoteError::Transport(format!("server error {}", status))
        }
        StorefrontError::Status(status) if status == reqwest::StatusCode::TOO_MANY_REQUESTS => {
            RemoteError::Transport(format!("throttled ({})", status))
        }
        other => RemoteError::Protocol(other.to_string()),
    }
}
