use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use av_model::Host;

/// A recency-suppression record: the last time `host` was verified against `cves`.
/// Survives across runs (unless debug mode); pruned by the recency threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VulnVerification {
    pub host: Host,
    pub cves: Vec<String>,
    pub verified_at: DateTime<Utc>,
}

impl VulnVerification {
    pub fn new(host: Host, cves: Vec<String>) -> Self {
        Self {
            host,
            cves,
            verified_at: Utc::now(),
        }
    }

    pub fn matches(&self, host: &Host, cves: &[String]) -> bool {
        &self.host == host && self.cves.iter().any(|c| cves.contains(c))
    }

    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.verified_at
    }
}
