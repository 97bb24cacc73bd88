//! Connection factory: resolve, wait, construct

use std::sync::Arc;

use kiln_client::{ClientOpts, KilnClient};
use opentelemetry::global;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::ConnectError;
use crate::provider::Provider;
use crate::readiness::{wait_ready, ReadyConfig};
use crate::remote::Remote;
use crate::telemetry::{detect_tracer_delegate, EnvDetect, ExporterDetect};

/// Resolve `remote` and return a ready, tracing-wired engine client.
///
/// Shorthand for [`Connector::new`] with defaults: 100 readiness probes
/// at 100 ms, no cancellation, environment-driven exporter detection.
pub async fn connect(remote: &str) -> Result<KilnClient, ConnectError> {
    Connector::new(remote.parse()?).establish().await
}

/// Configurable connection factory.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use kiln::{Connector, ReadyConfig};
///
/// async fn example() -> Result<(), kiln::ConnectError> {
///     let client = Connector::new("docker-container://buildbox".parse()?)
///         .ready_config(ReadyConfig {
///             period: Duration::from_millis(50),
///             attempts: 20,
///         })
///         .establish()
///         .await?;
///     let workers = client.list_workers().await?;
///     println!("{} workers", workers.len());
///     Ok(())
/// }
/// ```
pub struct Connector {
    remote: Remote,
    ready: ReadyConfig,
    cancel: CancellationToken,
    detect: Arc<dyn ExporterDetect>,
}

impl Connector {
    pub fn new(remote: Remote) -> Self {
        Self {
            remote,
            ready: ReadyConfig::default(),
            cancel: CancellationToken::new(),
            detect: Arc::new(EnvDetect),
        }
    }

    /// Override readiness probe cadence and budget.
    pub fn ready_config(mut self, config: ReadyConfig) -> Self {
        self.ready = config;
        self
    }

    /// Token that aborts the readiness wait when cancelled.
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Replace environment-driven exporter detection.
    pub fn exporter_detect(mut self, detect: Arc<dyn ExporterDetect>) -> Self {
        self.detect = detect;
        self
    }

    /// Run the full sequence: pick the provider, resolve the descriptor,
    /// wait for engine readiness, then construct the final client with
    /// fail-fast transport and tracing wired in.
    pub async fn establish(self) -> Result<KilnClient, ConnectError> {
        let scheme = self.remote.scheme();
        let provider =
            Provider::for_scheme(scheme).ok_or_else(|| ConnectError::UnknownProvider {
                scheme: scheme.to_string(),
            })?;

        let addr = provider.resolve(&self.remote).await?;
        debug!(remote = %self.remote, addr = %addr, "remote resolved");

        wait_ready(&addr, &self.ready, &self.cancel).await?;

        let mut opts = ClientOpts::new()
            .fail_fast(true)
            .tracer_provider(global::tracer_provider());
        if let Some(delegate) = detect_tracer_delegate(self.detect.as_ref())? {
            debug!("attaching tracer delegate to engine client");
            opts = opts.trace_delegate(delegate);
        }

        let client = KilnClient::connect_with(&addr, opts).await?;
        info!(remote = %self.remote, addr = %addr, "engine connection established");
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_scheme_fails_with_the_scheme_named() {
        let connector = Connector::new("not-a-real-scheme://demo".parse().unwrap());
        let err = connector.establish().await.unwrap_err();
        match err {
            ConnectError::UnknownProvider { scheme } => {
                assert_eq!(scheme, "not-a-real-scheme");
            }
            other => panic!("expected UnknownProvider, got {other}"),
        }
    }

    #[tokio::test]
    async fn connect_propagates_descriptor_parse_errors() {
        let err = connect("not a descriptor").await.unwrap_err();
        assert!(matches!(err, ConnectError::Remote(_)));
    }
}
