use std::collections::BTreeMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A network endpoint: address plus port. Addresses may be IPv4 or IPv6.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Host {
    pub address: IpAddr,
    pub port: u16,
}

impl Host {
    pub fn new(address: IpAddr, port: u16) -> Self {
        Self { address, port }
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// A single opaque, totally-ordered identifier assigned at admission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub u64);

/// An immutable security-monitoring event, implicating a host and a set of vulnerability ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub src: Host,
    pub dst: Host,
    pub cves: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub raw: BTreeMap<String, Value>,
}

impl Event {
    /// All CVEs present and non-empty — the precondition for running verification at all.
    pub fn has_cves(&self) -> bool {
        self.cves.iter().any(|c| !c.trim().is_empty())
    }
}
