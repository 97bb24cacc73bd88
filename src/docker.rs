//! Docker-backed engine resolution
//!
//! Shells out to the `docker` CLI rather than speaking the daemon API
//! directly. Inspect-output parsing and container naming live in pure
//! helpers so the interesting logic tests without a daemon.

use std::collections::HashMap;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::provider::{ProviderError, SCHEME_DOCKER_CONTAINER, SCHEME_DOCKER_IMAGE};
use crate::remote::Remote;

/// Container-side port every kilnd engine serves its control API on.
pub(crate) const CONTROL_PORT: u16 = 7411;

/// Name prefix for containers provisioned from images.
const CONTAINER_PREFIX: &str = "kilnd-";

/// Hex digits of the image digest kept in a provisioned container name.
const NAME_DIGEST_LEN: usize = 12;

/// Resolve a `docker-container://name` descriptor against a container the
/// operator manages. The container must already be running and publish
/// the control port.
pub(crate) async fn resolve_container(remote: &Remote) -> Result<String, ProviderError> {
    let name = container_name(remote)?;
    let state = inspect_container(name).await?;
    if !state.running {
        return Err(ProviderError::ContainerNotRunning {
            name: name.to_string(),
        });
    }
    address_for(&state, name)
}

/// Resolve a `docker-image://ref` descriptor, provisioning an engine
/// container from the image when none is running yet.
///
/// Container names derive from the image reference, so reconnecting to
/// the same image reuses the same container and switching references
/// leaves a stale one behind. Stale engines are pruned best-effort
/// before a new one starts.
pub(crate) async fn resolve_image(remote: &Remote) -> Result<String, ProviderError> {
    let image = image_ref(remote)?;
    let name = provisioned_name(&image);

    match inspect_container(&name).await {
        Ok(state) if state.running => {
            debug!(container = %name, image = %image, "reusing provisioned engine container");
        }
        Ok(_) => {
            // Stopped leftover from an earlier run; replace it.
            remove_container(&name).await?;
            prune_stale(&name).await;
            start_engine(&image, &name).await?;
        }
        Err(ProviderError::ContainerNotFound { .. }) => {
            prune_stale(&name).await;
            start_engine(&image, &name).await?;
        }
        Err(err) => return Err(err),
    }

    let state = inspect_container(&name).await?;
    if !state.running {
        return Err(ProviderError::ContainerNotRunning { name });
    }
    address_for(&state, &name)
}

fn container_name(remote: &Remote) -> Result<&str, ProviderError> {
    match remote.host() {
        Some(name) if !name.is_empty() => Ok(name),
        _ => Err(ProviderError::MissingPayload {
            remote: remote.to_string(),
            scheme: SCHEME_DOCKER_CONTAINER,
            what: "container name",
        }),
    }
}

/// Reassemble the image reference from descriptor components. The host
/// carries the registry (or sole path segment), the port and path follow
/// verbatim, so `docker-image://ghcr.io/kiln/kilnd:v0.4` yields
/// `ghcr.io/kiln/kilnd:v0.4`.
fn image_ref(remote: &Remote) -> Result<String, ProviderError> {
    let host = match remote.host() {
        Some(host) if !host.is_empty() => host,
        _ => {
            return Err(ProviderError::MissingPayload {
                remote: remote.to_string(),
                scheme: SCHEME_DOCKER_IMAGE,
                what: "image reference",
            })
        }
    };

    let mut image = String::from(host);
    if let Some(port) = remote.port() {
        image.push(':');
        image.push_str(&port.to_string());
    }
    image.push_str(remote.path());
    Ok(image)
}

/// Deterministic container name for an image reference.
pub(crate) fn provisioned_name(image: &str) -> String {
    let digest = Sha256::digest(image.as_bytes());
    format!("{CONTAINER_PREFIX}{}", &hex::encode(digest)[..NAME_DIGEST_LEN])
}

fn address_for(state: &ContainerState, name: &str) -> Result<String, ProviderError> {
    let port = state
        .published_port(CONTROL_PORT)
        .ok_or_else(|| ProviderError::PortUnpublished {
            name: name.to_string(),
            port: CONTROL_PORT,
        })?;
    Ok(format!("http://127.0.0.1:{port}"))
}

async fn start_engine(image: &str, name: &str) -> Result<(), ProviderError> {
    debug!(image = %image, container = %name, "provisioning engine container");
    let publish = format!("127.0.0.1:0:{CONTROL_PORT}");
    run_docker(&[
        "run",
        "-d",
        "--name",
        name,
        "-p",
        &publish,
        "--restart",
        "unless-stopped",
        image,
    ])
    .await?;
    Ok(())
}

async fn remove_container(name: &str) -> Result<(), ProviderError> {
    run_docker(&["rm", "-fv", name]).await.map(|_| ())
}

/// Best-effort removal of engine containers provisioned from other image
/// references. Failures are logged and never fail resolution.
async fn prune_stale(keep: &str) {
    let listing = match run_docker(&[
        "ps",
        "-a",
        "--filter",
        "name=kilnd-",
        "--format",
        "{{.Names}}",
    ])
    .await
    {
        Ok(stdout) => stdout,
        Err(err) => {
            warn!(error = %err, "could not list stale engine containers");
            return;
        }
    };

    for name in stale_names(&listing, keep) {
        debug!(container = %name, "pruning stale engine container");
        if let Err(err) = run_docker(&["rm", "-fv", name]).await {
            warn!(container = %name, error = %err, "failed to prune stale engine container");
        }
    }
}

/// Names from a `docker ps` listing that belong to provisioned engines
/// other than `keep`. The daemon-side name filter is a substring match,
/// so re-check the prefix here.
fn stale_names<'a>(listing: &'a str, keep: &str) -> Vec<&'a str> {
    listing
        .lines()
        .map(str::trim)
        .filter(|name| name.starts_with(CONTAINER_PREFIX) && *name != keep)
        .collect()
}

async fn inspect_container(name: &str) -> Result<ContainerState, ProviderError> {
    match run_docker(&["inspect", "--type", "container", name]).await {
        Ok(stdout) => parse_inspect(&stdout, name),
        Err(ProviderError::CommandFailed { stderr, .. })
            if stderr.contains("No such container") =>
        {
            Err(ProviderError::ContainerNotFound {
                name: name.to_string(),
            })
        }
        Err(err) => Err(err),
    }
}

async fn run_docker(args: &[&str]) -> Result<String, ProviderError> {
    let command = format!("docker {}", args.join(" "));
    let output = Command::new("docker")
        .args(args)
        .output()
        .await
        .map_err(|source| ProviderError::CommandIo {
            command: command.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(ProviderError::CommandFailed {
            command,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Running state and published ports of an inspected container.
#[derive(Debug)]
pub(crate) struct ContainerState {
    pub(crate) running: bool,
    ports: HashMap<String, Option<Vec<PortBinding>>>,
}

impl ContainerState {
    /// Host port publishing `container_port/tcp`, if any. Prefers
    /// loopback or wildcard bindings since the address we hand out is
    /// 127.0.0.1.
    pub(crate) fn published_port(&self, container_port: u16) -> Option<u16> {
        let bindings = self.ports.get(&format!("{container_port}/tcp"))?.as_ref()?;
        bindings
            .iter()
            .find(|b| matches!(b.host_ip.as_str(), "" | "0.0.0.0" | "::" | "127.0.0.1"))
            .or_else(|| bindings.first())
            .and_then(|b| b.host_port.parse().ok())
    }
}

#[derive(Debug, Deserialize)]
struct InspectEntry {
    #[serde(rename = "State")]
    state: InspectState,
    #[serde(rename = "NetworkSettings", default)]
    network: InspectNetwork,
}

#[derive(Debug, Deserialize)]
struct InspectState {
    #[serde(rename = "Running")]
    running: bool,
}

#[derive(Debug, Default, Deserialize)]
struct InspectNetwork {
    // Unpublished ports map to null, hence the inner Option.
    #[serde(rename = "Ports", default)]
    ports: HashMap<String, Option<Vec<PortBinding>>>,
}

#[derive(Debug, Deserialize)]
struct PortBinding {
    #[serde(rename = "HostIp", default)]
    host_ip: String,
    #[serde(rename = "HostPort")]
    host_port: String,
}

fn parse_inspect(stdout: &str, name: &str) -> Result<ContainerState, ProviderError> {
    let entries: Vec<InspectEntry> =
        serde_json::from_str(stdout).map_err(|source| ProviderError::InspectOutput {
            name: name.to_string(),
            source,
        })?;
    let entry = entries
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::ContainerNotFound {
            name: name.to_string(),
        })?;
    Ok(ContainerState {
        running: entry.state.running,
        ports: entry.network.ports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUNNING_INSPECT: &str = r#"[
        {
            "State": { "Running": true, "Status": "running" },
            "NetworkSettings": {
                "Ports": {
                    "7411/tcp": [
                        { "HostIp": "127.0.0.1", "HostPort": "32768" }
                    ]
                }
            }
        }
    ]"#;

    const STOPPED_INSPECT: &str = r#"[
        {
            "State": { "Running": false, "Status": "exited" },
            "NetworkSettings": { "Ports": {} }
        }
    ]"#;

    const UNPUBLISHED_INSPECT: &str = r#"[
        {
            "State": { "Running": true },
            "NetworkSettings": { "Ports": { "7411/tcp": null } }
        }
    ]"#;

    #[test]
    fn parses_running_container_with_published_port() {
        let state = parse_inspect(RUNNING_INSPECT, "buildbox").unwrap();
        assert!(state.running);
        assert_eq!(state.published_port(CONTROL_PORT), Some(32768));
    }

    #[test]
    fn parses_stopped_container() {
        let state = parse_inspect(STOPPED_INSPECT, "buildbox").unwrap();
        assert!(!state.running);
        assert_eq!(state.published_port(CONTROL_PORT), None);
    }

    #[test]
    fn null_port_bindings_mean_unpublished() {
        let state = parse_inspect(UNPUBLISHED_INSPECT, "buildbox").unwrap();
        assert_eq!(state.published_port(CONTROL_PORT), None);
    }

    #[test]
    fn prefers_loopback_binding_over_others() {
        let json = r#"[
            {
                "State": { "Running": true },
                "NetworkSettings": {
                    "Ports": {
                        "7411/tcp": [
                            { "HostIp": "192.168.1.5", "HostPort": "40000" },
                            { "HostIp": "127.0.0.1", "HostPort": "40001" }
                        ]
                    }
                }
            }
        ]"#;
        let state = parse_inspect(json, "buildbox").unwrap();
        assert_eq!(state.published_port(CONTROL_PORT), Some(40001));
    }

    #[test]
    fn garbage_inspect_output_is_an_error() {
        let err = parse_inspect("not json at all", "buildbox").unwrap_err();
        assert!(matches!(err, ProviderError::InspectOutput { .. }));
    }

    #[test]
    fn empty_inspect_array_means_not_found() {
        let err = parse_inspect("[]", "buildbox").unwrap_err();
        assert!(matches!(err, ProviderError::ContainerNotFound { .. }));
    }

    #[test]
    fn provisioned_names_are_stable_and_prefixed() {
        let a = provisioned_name("ghcr.io/kiln/kilnd:v0.4");
        let b = provisioned_name("ghcr.io/kiln/kilnd:v0.4");
        let c = provisioned_name("ghcr.io/kiln/kilnd:v0.5");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with(CONTAINER_PREFIX));
        assert_eq!(a.len(), CONTAINER_PREFIX.len() + NAME_DIGEST_LEN);
    }

    #[test]
    fn image_ref_reassembles_registry_port_and_path() {
        let remote = Remote::parse("docker-image://registry.local:5000/kiln/kilnd:v0.4").unwrap();
        assert_eq!(image_ref(&remote).unwrap(), "registry.local:5000/kiln/kilnd:v0.4");

        let remote = Remote::parse("docker-image://ghcr.io/kiln/kilnd").unwrap();
        assert_eq!(image_ref(&remote).unwrap(), "ghcr.io/kiln/kilnd");
    }

    #[test]
    fn image_ref_requires_a_host() {
        let remote = Remote::parse("docker-image:///kilnd").unwrap();
        assert!(matches!(
            image_ref(&remote),
            Err(ProviderError::MissingPayload { .. })
        ));
    }

    #[test]
    fn container_name_comes_from_the_host() {
        let remote = Remote::parse("docker-container://buildbox").unwrap();
        assert_eq!(container_name(&remote).unwrap(), "buildbox");

        let remote = Remote::parse("docker-container:///nope").unwrap();
        assert!(matches!(
            container_name(&remote),
            Err(ProviderError::MissingPayload { .. })
        ));
    }

    #[test]
    fn stale_name_filtering_spares_the_current_engine() {
        let listing = "kilnd-aaaaaaaaaaaa\nkilnd-bbbbbbbbbbbb\nunrelated-container\n";
        let stale = stale_names(listing, "kilnd-aaaaaaaaaaaa");
        assert_eq!(stale, vec!["kilnd-bbbbbbbbbbbb"]);
    }

    #[test]
    fn stale_name_filtering_handles_empty_listings() {
        assert!(stale_names("", "kilnd-aaaaaaaaaaaa").is_empty());
        assert!(stale_names("\n\n", "kilnd-aaaaaaaaaaaa").is_empty());
    }

    // Requires a docker daemon with a kilnd container named "buildbox"
    // publishing port 7411.
    #[tokio::test]
    #[ignore]
    async fn resolves_a_live_container() {
        let remote = Remote::parse("docker-container://buildbox").unwrap();
        let addr = resolve_container(&remote).await.unwrap();
        assert!(addr.starts_with("http://127.0.0.1:"));
    }
}
