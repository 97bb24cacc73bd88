//! Scheme dispatch for remote descriptor resolution

use thiserror::Error;
use tracing::debug;

use crate::docker;
use crate::remote::Remote;

/// Scheme for engines already running inside a named docker container.
pub const SCHEME_DOCKER_CONTAINER: &str = "docker-container";
/// Scheme for engines provisioned on demand from a docker image.
pub const SCHEME_DOCKER_IMAGE: &str = "docker-image";
/// Scheme for descriptors that already name a connectable endpoint.
pub const SCHEME_UNIX: &str = "unix";

/// Resolver for one descriptor scheme.
///
/// The provider set is closed: every supported scheme maps to exactly one
/// variant, and unmatched schemes fail before any resolution work starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// Resolves a running container's published control port.
    DockerContainer,
    /// Provisions (or reuses) a container from an image, then resolves it.
    DockerImage,
    /// Returns the descriptor unchanged; it already is an endpoint.
    Passthrough,
}

impl Provider {
    /// Look up the provider responsible for `scheme`.
    pub fn for_scheme(scheme: &str) -> Option<Provider> {
        match scheme {
            SCHEME_DOCKER_CONTAINER => Some(Provider::DockerContainer),
            SCHEME_DOCKER_IMAGE => Some(Provider::DockerImage),
            SCHEME_UNIX => Some(Provider::Passthrough),
            _ => None,
        }
    }

    /// The scheme this provider serves.
    pub fn scheme(&self) -> &'static str {
        match self {
            Provider::DockerContainer => SCHEME_DOCKER_CONTAINER,
            Provider::DockerImage => SCHEME_DOCKER_IMAGE,
            Provider::Passthrough => SCHEME_UNIX,
        }
    }

    /// Resolve a descriptor to a transport address an engine client can
    /// dial. May provision infrastructure as a side effect.
    pub async fn resolve(&self, remote: &Remote) -> Result<String, ProviderError> {
        debug!(provider = self.scheme(), remote = %remote, "resolving remote");
        match self {
            Provider::DockerContainer => docker::resolve_container(remote).await,
            Provider::DockerImage => docker::resolve_image(remote).await,
            Provider::Passthrough => Ok(remote.to_string()),
        }
    }
}

/// Failure inside a provider while resolving a descriptor.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("descriptor {remote:?} is missing the {what} the {scheme} provider needs")]
    MissingPayload {
        remote: String,
        scheme: &'static str,
        what: &'static str,
    },

    #[error("failed to run {command:?}: {source}")]
    CommandIo {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command:?} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("container {name:?} not found")]
    ContainerNotFound { name: String },

    #[error("container {name:?} is not running")]
    ContainerNotRunning { name: String },

    #[error("container {name:?} does not publish engine port {port}")]
    PortUnpublished { name: String, port: u16 },

    #[error("unreadable inspect output for container {name:?}: {source}")]
    InspectOutput {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}
