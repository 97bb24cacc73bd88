//! Error taxonomy for establishing engine connections

use thiserror::Error;

use kiln_client::ClientError;

use crate::provider::ProviderError;
use crate::remote::RemoteError;
use crate::telemetry::TelemetryError;

/// Terminal failure of a connection attempt.
///
/// Every stage of the sequence keeps its own variant so callers can tell
/// a descriptor typo from a dead engine from a misconfigured exporter.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The descriptor would not parse at all.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The descriptor's scheme has no registered provider.
    #[error("no provider registered for scheme {scheme:?}")]
    UnknownProvider { scheme: String },

    /// The provider could not produce a transport address.
    #[error("provider failed: {0}")]
    Provider(#[from] ProviderError),

    /// The engine never answered within the probe budget.
    #[error("engine failed to respond after {attempts} readiness probes")]
    Unresponsive { attempts: u32 },

    /// The caller cancelled the wait.
    #[error("cancelled while waiting for the engine")]
    Cancelled,

    /// Trace exporter detection failed. Fatal rather than a silent
    /// fallback to an untraced connection.
    #[error("trace exporter detection failed: {0}")]
    Telemetry(#[from] TelemetryError),

    /// The final engine client could not be constructed.
    #[error("engine client: {0}")]
    Client(#[from] ClientError),
}

impl ConnectError {
    /// Whether the readiness budget ran out.
    pub fn is_unresponsive(&self) -> bool {
        matches!(self, ConnectError::Unresponsive { .. })
    }

    /// Whether the caller's cancellation cut the attempt short.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ConnectError::Cancelled)
    }
}
