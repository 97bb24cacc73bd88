/*!
 * Kiln - connect to kilnd build engines
 *
 * Resolves a remote descriptor into a live engine client:
 * - `docker-container://name` - a container the operator already runs
 * - `docker-image://ref` - an engine provisioned on demand from an image
 * - `unix:///path` - an engine already listening on a socket
 *
 * The scheme picks a provider, the provider yields a transport address,
 * a bounded readiness probe confirms the engine answers, and the final
 * client is constructed fail-fast with tracing wired in.
 *
 * ```rust,no_run
 * async fn example() -> Result<(), kiln::ConnectError> {
 *     kiln::bootstrap::init_logging();
 *     let client = kiln::connect("unix:///run/kilnd.sock").await?;
 *     for worker in client.list_workers().await? {
 *         println!("worker {}", worker.id);
 *     }
 *     Ok(())
 * }
 * ```
 */

pub mod bootstrap;
pub mod connect;
mod docker;
pub mod error;
pub mod provider;
pub mod readiness;
pub mod remote;
pub mod telemetry;

// Re-export commonly used types
pub use connect::{connect, Connector};
pub use error::ConnectError;
pub use provider::{Provider, ProviderError};
pub use readiness::{wait_ready, ReadyConfig};
pub use remote::{Remote, RemoteError};
pub use telemetry::{
    detect_tracer_delegate, ConsoleExporter, EnvDetect, ExporterDetect, OtlpExporter,
    TelemetryError, TraceExporter,
};

// Client surface, re-exported so embedders need only this crate
pub use kiln_client::{ClientError, ClientOpts, EngineAddr, KilnClient, SpanRecord, TraceDelegate};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
