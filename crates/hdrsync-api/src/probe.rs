//! Reachability probe for the companion process.
//!
//! A short-timeout, best-effort HTTP GET against a fixed loopback endpoint,
//! issued before the socket handshake so that an absent companion costs a
//! refused TCP connect instead of a hanging upgrade.
//!
//! Any HTTP response means *something* is listening: 2xx and
//! `426 Upgrade Required` are definite, other statuses are inconclusive but
//! still permit a connection attempt. Only a refused connection or a timeout
//! blocks it.

use std::fmt;

use reqwest::StatusCode;
use tracing::{debug, trace};
use url::Url;

use crate::endpoint::{ClientPlatform, CompanionEndpoint};
use crate::error::Error;
use crate::transport::TransportConfig;

/// Result of a single reachability probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The probe endpoint answered with a 2xx status.
    Reachable,
    /// The socket endpoint answered `426 Upgrade Required`.
    UpgradeRequired,
    /// Something answered, but not conclusively the companion.
    Inconclusive { detail: String },
    /// The connection was refused; nothing is listening.
    Refused,
    /// The probe did not complete within its timeout.
    TimedOut,
}

impl ProbeOutcome {
    /// Whether a socket handshake should be attempted after this outcome.
    pub fn permits_connect(&self) -> bool {
        matches!(
            self,
            Self::Reachable | Self::UpgradeRequired | Self::Inconclusive { .. }
        )
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reachable => f.write_str("reachable"),
            Self::UpgradeRequired => f.write_str("reachable (upgrade required)"),
            Self::Inconclusive { detail } => write!(f, "inconclusive ({detail})"),
            Self::Refused => f.write_str("refused"),
            Self::TimedOut => f.write_str("timed out"),
        }
    }
}

/// Issues reachability probes against one endpoint.
#[derive(Debug, Clone)]
pub struct Prober {
    http: reqwest::Client,
    url: Url,
}

impl Prober {
    pub fn new(
        endpoint: &CompanionEndpoint,
        platform: ClientPlatform,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let url = endpoint.probe_url(platform)?;
        let http = transport.build_client()?;
        Ok(Self { http, url })
    }

    /// Create a prober with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, url: Url) -> Self {
        Self { http, url }
    }

    /// The URL being probed.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Run one probe. Never fails; every failure is folded into the outcome.
    pub async fn probe(&self) -> ProbeOutcome {
        trace!(url = %self.url, "probing companion");

        let outcome = match self.http.get(self.url.clone()).send().await {
            Ok(resp) => classify_status(resp.status()),
            Err(e) => classify_error(&e),
        };

        debug!(url = %self.url, %outcome, "probe finished");
        outcome
    }
}

fn classify_status(status: StatusCode) -> ProbeOutcome {
    if status.is_success() {
        ProbeOutcome::Reachable
    } else if status == StatusCode::UPGRADE_REQUIRED {
        ProbeOutcome::UpgradeRequired
    } else {
        ProbeOutcome::Inconclusive {
            detail: format!("HTTP {}", status.as_u16()),
        }
    }
}

fn classify_error(err: &reqwest::Error) -> ProbeOutcome {
    if err.is_timeout() {
        ProbeOutcome::TimedOut
    } else if err.is_connect() {
        ProbeOutcome::Refused
    } else {
        ProbeOutcome::Inconclusive {
            detail: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_and_upgrade_required_are_reachable() {
        assert_eq!(classify_status(StatusCode::OK), ProbeOutcome::Reachable);
        assert_eq!(classify_status(StatusCode::NO_CONTENT), ProbeOutcome::Reachable);
        assert_eq!(
            classify_status(StatusCode::UPGRADE_REQUIRED),
            ProbeOutcome::UpgradeRequired
        );
    }

    #[test]
    fn other_statuses_are_inconclusive_but_permit_connect() {
        let outcome = classify_status(StatusCode::NOT_FOUND);
        assert!(matches!(outcome, ProbeOutcome::Inconclusive { .. }));
        assert!(outcome.permits_connect());
    }

    #[test]
    fn refused_and_timeout_block_connect() {
        assert!(!ProbeOutcome::Refused.permits_connect());
        assert!(!ProbeOutcome::TimedOut.permits_connect());
    }
}
