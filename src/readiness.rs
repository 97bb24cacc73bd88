//! Bounded readiness probing for a resolved engine address
//!
//! A freshly provisioned engine takes a moment to start serving; the
//! waiter polls the worker listing until it answers, with a hard cap on
//! attempts so a dead engine fails the connection instead of hanging it.

use std::future::Future;
use std::time::Duration;

use kiln_client::KilnClient;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ConnectError;

/// Probe cadence and budget for [`wait_ready`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyConfig {
    /// Delay between consecutive probe attempts.
    pub period: Duration,
    /// Maximum number of probe attempts before giving up.
    pub attempts: u32,
}

impl Default for ReadyConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(100),
            attempts: 100,
        }
    }
}

/// Wait until the engine at `addr` answers its worker listing, the
/// attempt budget runs out, or `cancel` fires.
///
/// The probe client is private to this call and dropped on every exit
/// path. Individual probe failures are expected while the engine boots;
/// they are logged at debug level and not carried into the final error.
pub async fn wait_ready(
    addr: &str,
    config: &ReadyConfig,
    cancel: &CancellationToken,
) -> Result<(), ConnectError> {
    let probe = KilnClient::connect(addr)?;
    poll_ready(config, cancel, move || {
        let probe = probe.clone();
        async move { probe.list_workers().await.map(|_| ()) }
    })
    .await
}

/// Drive the probe loop. Exactly one probe per attempt, a sleep between
/// attempts but never after the last, and the sleep races cancellation
/// so a cancelled caller never waits out a full period.
async fn poll_ready<F, Fut, E>(
    config: &ReadyConfig,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<(), ConnectError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    for attempt in 1..=config.attempts {
        match probe().await {
            Ok(()) => {
                debug!(attempt, "engine is ready");
                return Ok(());
            }
            Err(err) => {
                debug!(attempt, error = %err, "engine not ready yet");
                if attempt == config.attempts {
                    break;
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(ConnectError::Cancelled),
            _ = time::sleep(config.period) => {}
        }
    }
    Err(ConnectError::Unresponsive {
        attempts: config.attempts,
    })
}
