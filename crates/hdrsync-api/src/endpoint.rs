// Companion endpoint construction.
//
// The companion listens on a fixed loopback port. Most socket clients
// connect to it directly; some embedded clients enforce upgrade semantics
// that misfire against a name-based loopback endpoint, so those use the
// literal loopback address and probe the socket path itself.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;

/// Default port the companion process listens on.
pub const DEFAULT_PORT: u16 = 59210;

/// Default loopback host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

const LOOPBACK_V4: &str = "127.0.0.1";

/// Capability flag describing how the hosting platform's socket client
/// behaves against a plain loopback endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientPlatform {
    /// Probe a dedicated HTTP path, connect to the configured host.
    #[default]
    Standard,
    /// Probe the socket path and accept `426 Upgrade Required` as success;
    /// connect through the literal loopback address.
    UpgradeAware,
}

/// Where the companion process can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanionEndpoint {
    pub host: String,
    pub port: u16,
    /// Socket path, e.g. `/`.
    pub path: String,
    /// Plain-HTTP reachability path used on [`ClientPlatform::Standard`].
    pub probe_path: String,
}

impl Default for CompanionEndpoint {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            path: "/".into(),
            probe_path: "/ping".into(),
        }
    }
}

impl CompanionEndpoint {
    /// Build the socket URL for the given platform.
    pub fn socket_url(&self, platform: ClientPlatform) -> Result<Url, Error> {
        let host = self.host_for(platform);
        let url = Url::parse(&format!(
            "ws://{}:{}{}",
            host,
            self.port,
            normalize_path(&self.path)
        ))?;
        Ok(url)
    }

    /// Build the reachability probe URL for the given platform.
    pub fn probe_url(&self, platform: ClientPlatform) -> Result<Url, Error> {
        let host = self.host_for(platform);
        let path = match platform {
            ClientPlatform::Standard => normalize_path(&self.probe_path),
            ClientPlatform::UpgradeAware => normalize_path(&self.path),
        };
        let url = Url::parse(&format!("http://{}:{}{}", host, self.port, path))?;
        Ok(url)
    }

    fn host_for(&self, platform: ClientPlatform) -> &str {
        match platform {
            ClientPlatform::UpgradeAware if self.host.eq_ignore_ascii_case("localhost") => {
                LOOPBACK_V4
            }
            _ => &self.host,
        }
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_owned()
    } else {
        format!("/{path}")
    }
}
