use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::AuthFailure;
use super::operator::Operator;
use crate::remote::{LoginGrant, PollHandle, PollStatus, TargetPlatformClient};
use crate::session::Provider;

/// Poll a pending target platform login until it is granted.
///
/// Checks `cancel` on every iteration. Rotated challenges replace `handle`
/// and are shown again through `operator`, when given. Poll errors are
/// logged and tolerated until `max_wait` runs out.
pub(crate) async fn poll_until_granted(
    client: &dyn TargetPlatformClient,
    handle: &mut PollHandle,
    interval: Duration,
    max_wait: Duration,
    cancel: &CancellationToken,
    operator: Option<&dyn Operator>,
) -> Result<LoginGrant, AuthFailure> {
    let deadline = Instant::now() + max_wait;

    loop {
        if cancel.is_cancelled() {
            return Err(AuthFailure::Cancelled);
        }

        match client.poll_login(handle).await {
            Ok(PollStatus::Granted(grant)) => {
                debug!("Login approved");
                return Ok(grant);
            }
            Ok(PollStatus::Expired) => {
                debug!("Login request expired");
                return Err(AuthFailure::Timeout);
            }
            Ok(PollStatus::Pending { rotated }) => {
                if let Some(challenge) = rotated {
                    debug!("Login challenge rotated");
                    *handle = challenge.handle;
                    if let Some(operator) = operator {
                        operator
                            .present_challenge(Provider::TargetPlatform, &challenge.challenge_url)
                            .await;
                    }
                }
            }
            Err(e) => warn!(error = %e, "Login poll failed, retrying"),
        }

        if Instant::now() + interval > deadline {
            return Err(AuthFailure::Timeout);
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(AuthFailure::Cancelled),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
