//! Engine backends - endpoint parsing and connecting to a build engine
//!
//! Endpoints look like `<scheme>://[address]`:
//!
//! | endpoint                        | engine                               |
//! |---------------------------------|--------------------------------------|
//! | `local://`                      | commands run directly with `sh -c`   |
//! | `docker://`                     | local docker daemon, default socket  |
//! | `docker:///var/run/docker.sock` | daemon at `unix:///var/run/...`      |
//! | `docker://dockerd:2375`         | daemon at `tcp://dockerd:2375`       |
//! | `docker+unix://x`, `docker+tcp://x` | daemon at `unix://x`, `tcp://x`  |
//!
//! A bare `docker://` address is taken as a socket path when it starts with
//! `/` and as a tcp host otherwise; use `docker+unix://` for relative socket
//! paths.

mod process;

pub use process::{ExecSpec, ProcessEngine, DEFAULT_IMAGE};

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use std::sync::Arc;
use tokio::process::Command;

use crate::core::EngineRef;
use crate::error::ConnectError;

/// Where builds are executed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Endpoint {
    #[default]
    Local,
    /// Docker daemon; `None` keeps the docker CLI's own default.
    Docker { host: Option<String> },
}

impl Endpoint {
    pub fn parse(url: &str) -> Result<Self, ConnectError> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| ConnectError::Malformed(url.to_string()))?;

        let mut parts = scheme.splitn(2, '+');
        match (parts.next(), parts.next()) {
            (Some("local"), None) => Ok(Endpoint::Local),
            (Some("docker"), None) if rest.is_empty() => Ok(Endpoint::Docker { host: None }),
            (Some("docker"), None) => {
                let proto = if rest.starts_with('/') { "unix" } else { "tcp" };
                Ok(Endpoint::Docker {
                    host: Some(format!("{}://{}", proto, rest)),
                })
            }
            (Some("docker"), Some(proto @ ("unix" | "tcp"))) if !rest.is_empty() => {
                Ok(Endpoint::Docker {
                    host: Some(format!("{}://{}", proto, rest)),
                })
            }
            (Some("docker"), Some("unix" | "tcp")) => Err(ConnectError::Malformed(url.to_string())),
            _ => Err(ConnectError::UnsupportedScheme(scheme.to_string())),
        }
    }
}

impl FromStr for Endpoint {
    type Err = ConnectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Endpoint::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Local => f.write_str("local://"),
            Endpoint::Docker { host: None } => f.write_str("docker://"),
            Endpoint::Docker { host: Some(host) } => write!(f, "docker ({})", host),
        }
    }
}

/// Build an engine for `endpoint`, running targets relative to `root`.
///
/// Docker endpoints are probed with `docker version` so an unreachable daemon
/// fails here instead of once per target.
pub async fn connect(endpoint: &Endpoint, root: PathBuf) -> Result<EngineRef, ConnectError> {
    if let Endpoint::Docker { host } = endpoint {
        let mut probe = Command::new("docker");
        if let Some(host) = host {
            probe.arg("-H").arg(host);
        }
        probe
            .args(["version", "--format", "{{.Server.Version}}"])
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let unreachable_at = |reason: String| ConnectError::Unreachable {
            endpoint: endpoint.to_string(),
            reason,
        };
        let output = probe.output().await.map_err(|e| unreachable_at(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(unreachable_at(stderr.trim().to_string()));
        }
        log::info!(
            "connected to docker {} at {}",
            String::from_utf8_lossy(&output.stdout).trim(),
            endpoint
        );
    }

    Ok(Arc::new(ProcessEngine::new(endpoint.clone(), root)))
}
