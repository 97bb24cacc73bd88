//! Remote descriptor parsing

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use url::Url;

/// A parsed descriptor naming a build engine backend.
///
/// The scheme selects a provider (`docker-container://`, `docker-image://`,
/// `unix://`) and the remainder is that provider's payload: a container
/// name, an image reference, or a socket path. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remote {
    url: Url,
}

impl Remote {
    /// Parse a descriptor from its string form.
    pub fn parse(input: &str) -> Result<Self, RemoteError> {
        let url = Url::parse(input).map_err(|source| RemoteError::Invalid {
            input: input.to_string(),
            source,
        })?;
        Ok(Self { url })
    }

    /// The provider-selecting scheme, lowercase.
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// The host component, if any. Carries the container name for
    /// `docker-container://` and the registry or first path segment for
    /// `docker-image://`.
    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }

    /// Explicit port, if any.
    pub fn port(&self) -> Option<u16> {
        self.url.port()
    }

    /// The path component, empty string when absent.
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// The full descriptor in canonical string form.
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl fmt::Display for Remote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

impl FromStr for Remote {
    type Err = RemoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Failure to parse a remote descriptor.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("invalid remote descriptor {input:?}: {source}")]
    Invalid {
        input: String,
        #[source]
        source: url::ParseError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unix_descriptor() {
        let remote = Remote::parse("unix:///var/run/build.sock").unwrap();
        assert_eq!(remote.scheme(), "unix");
        assert_eq!(remote.path(), "/var/run/build.sock");
        assert_eq!(remote.to_string(), "unix:///var/run/build.sock");
    }

    #[test]
    fn parses_container_descriptor() {
        let remote = Remote::parse("docker-container://buildbox").unwrap();
        assert_eq!(remote.scheme(), "docker-container");
        assert_eq!(remote.host(), Some("buildbox"));
    }

    #[test]
    fn parses_image_descriptor_with_registry_and_tag() {
        let remote = Remote::parse("docker-image://ghcr.io/kiln/kilnd:v0.4").unwrap();
        assert_eq!(remote.scheme(), "docker-image");
        assert_eq!(remote.host(), Some("ghcr.io"));
        assert_eq!(remote.path(), "/kiln/kilnd:v0.4");
    }

    #[test]
    fn unrecognized_schemes_still_parse() {
        // Scheme validity is a parse concern; whether a provider exists
        // for it is decided later.
        let remote = Remote::parse("not-a-real-scheme://demo").unwrap();
        assert_eq!(remote.scheme(), "not-a-real-scheme");
    }

    #[test]
    fn rejects_schemeless_input() {
        let err = Remote::parse("/var/run/build.sock").unwrap_err();
        let RemoteError::Invalid { input, .. } = err;
        assert_eq!(input, "/var/run/build.sock");
    }

    #[test]
    fn rejects_empty_input() {
        assert!(Remote::parse("").is_err());
    }

    #[test]
    fn from_str_round_trips() {
        let remote: Remote = "docker-container://buildbox".parse().unwrap();
        assert_eq!(remote.as_str().parse::<Remote>().unwrap(), remote);
    }
}
