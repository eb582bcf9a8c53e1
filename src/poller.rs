//! Fixed-cadence status polling with inclusive stop-on-match and cancellation.
//!
//! A poll fires its first fetch immediately, then one fetch per interval tick
//! until a fetched value satisfies the stop condition. The matching value is
//! delivered before the sequence ends. A failed fetch is delivered and ends the
//! sequence as well; there is no retry.
//!
//! When a tick fires while the previous fetch is still in flight, that fetch is
//! dropped and replaced by the new one, so an older response can never land
//! after a newer one.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

use crate::api::InstanceBackend;
use crate::error::ApiError;
use crate::models::{Credentials, VmStatus};

/// Interval between status checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Owner of a running poll loop.
///
/// Dropping the handle cancels the loop.
pub struct PollHandle<T, E> {
    rx: mpsc::Receiver<Result<T, E>>,
    token: CancellationToken,
    _guard: DropGuard,
}

impl<T, E> PollHandle<T, E> {
    /// Next value of the sequence, or `None` once it has finished.
    pub async fn next(&mut self) -> Option<Result<T, E>> {
        self.rx.recv().await
    }

    /// Stop the loop. Values already delivered stay readable.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Start polling `fetch` every `period` until `done` holds for a fetched value.
pub fn poll_until<T, E, F, Fut, P>(mut fetch: F, done: P, period: Duration) -> PollHandle<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    P: Fn(&T) -> bool + Send + 'static,
{
    let (tx, rx) = mpsc::channel(8);
    let token = CancellationToken::new();
    let loop_token = token.clone();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<Pin<Box<Fut>>> = None;
        let mut attempt = 0u32;

        loop {
            tokio::select! {
                biased;

                _ = loop_token.cancelled() => {
                    debug!(attempt, "Poll cancelled");
                    return;
                }
                result = settle(&mut in_flight) => {
                    in_flight = None;
                    match result {
                        Ok(value) => {
                            let finished = done(&value);
                            if tx.send(Ok(value)).await.is_err() || finished {
                                debug!(attempt, finished, "Poll finished");
                                return;
                            }
                        }
                        Err(e) => {
                            debug!(attempt, "Poll fetch failed, stopping");
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if in_flight.is_some() {
                        debug!(attempt, "Previous check still in flight, superseding it");
                    }
                    attempt += 1;
                    in_flight = Some(Box::pin(fetch()));
                }
            }
        }
    });

    PollHandle {
        rx,
        _guard: token.clone().drop_guard(),
        token,
    }
}

/// Poll an instance's status until its raw state equals `target`.
pub fn poll_until_state<B: InstanceBackend>(
    backend: Arc<B>,
    credentials: Credentials,
    instance_id: String,
    target: impl Into<String>,
    period: Duration,
) -> PollHandle<VmStatus, ApiError> {
    let target = target.into();
    let fetch = move || {
        let backend = backend.clone();
        let credentials = credentials.clone();
        let instance_id = instance_id.clone();
        async move { backend.check_status(&credentials, &instance_id).await }
    };
    poll_until(fetch, move |status: &VmStatus| status.raw == target, period)
}

async fn settle<F: Future + Unpin>(slot: &mut Option<F>) -> F::Output {
    match slot {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}
