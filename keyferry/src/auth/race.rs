//! First-success race between two login paths.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug)]
pub(crate) enum Winner<A, B> {
    First(A),
    Second(B),
}

/// Run both branches concurrently; the first `Ok` wins.
///
/// A branch returning `Err` withdraws without ending the race. Once there is
/// a winner `token` is cancelled, and both branches are joined before
/// returning, so no branch outlives the race. With no winner, the failures
/// are returned in branch order.
pub(crate) async fn race<A, B, E, FA, FB>(
    token: CancellationToken,
    first: FA,
    second: FB,
) -> Result<Winner<A, B>, Vec<E>>
where
    A: Send + 'static,
    B: Send + 'static,
    E: Send + 'static,
    FA: Future<Output = Result<A, E>> + Send + 'static,
    FB: Future<Output = Result<B, E>> + Send + 'static,
{
    let (tx, rx) = oneshot::channel::<Winner<A, B>>();
    // Single resolution: whoever takes the sender first decides the race.
    let slot = Arc::new(Mutex::new(Some(tx)));

    let first_task = {
        let slot = slot.clone();
        let token = token.clone();
        tokio::spawn(async move {
            match first.await {
                Ok(value) => {
                    if let Some(tx) = slot.lock().take() {
                        let _ = tx.send(Winner::First(value));
                        token.cancel();
                    }
                    None
                }
                Err(e) => Some(e),
            }
        })
    };

    let second_task = {
        let slot = slot.clone();
        let token = token.clone();
        tokio::spawn(async move {
            match second.await {
                Ok(value) => {
                    if let Some(tx) = slot.lock().take() {
                        let _ = tx.send(Winner::Second(value));
                        token.cancel();
                    }
                    None
                }
                Err(e) => Some(e),
            }
        })
    };

    drop(slot);
    let winner = rx.await.ok();
    token.cancel();

    let mut failures = Vec::new();
    for handle in [first_task, second_task] {
        match handle.await {
            Ok(Some(e)) => failures.push(e),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Login branch panicked"),
        }
    }

    winner.ok_or(failures)
}
