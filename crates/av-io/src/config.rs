use std::net::IpAddr;
use std::time::Duration;

use av_model::ArgumentValidationError;

/// One authorized internal network, e.g. `10.0.0.0/8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternalSubnet {
    pub network: IpAddr,
    pub prefix_len: u8,
}

impl InternalSubnet {
    pub fn parse(spec: &str) -> Result<Self, ArgumentValidationError> {
        let (addr_part, prefix_part) = spec
            .split_once('/')
            .ok_or_else(|| ArgumentValidationError::Invalid(format!("subnet '{spec}' missing /prefix")))?;
        let network: IpAddr = addr_part
            .parse()
            .map_err(|_| ArgumentValidationError::Invalid(format!("invalid subnet address '{addr_part}'")))?;
        let prefix_len: u8 = prefix_part
            .parse()
            .map_err(|_| ArgumentValidationError::Invalid(format!("invalid subnet prefix '{prefix_part}'")))?;
        Ok(Self { network, prefix_len })
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(net), IpAddr::V4(a)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u32::MAX << (32 - self.prefix_len.min(32))
                };
                (u32::from(net) & mask) == (u32::from(*a) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(a)) => {
                let mask = if self.prefix_len == 0 {
                    0u128
                } else {
                    u128::MAX << (128 - self.prefix_len.min(128) as u32)
                };
                (u128::from(net) & mask) == (u128::from(*a) & mask)
            }
            _ => false,
        }
    }
}

/// One `(host, address)` space the operator has authorized for active testing (§5).
pub fn address_in_any_subnet(addr: &IpAddr, subnets: &[InternalSubnet]) -> bool {
    subnets.iter().any(|s| s.contains(addr))
}

/// Explicit configuration snapshot threaded through every public call, replacing the
/// original's global constant classes (`ArfConfig`/`MsfConfig`/...) — §9 design note.
#[derive(Debug, Clone)]
pub struct Config {
    pub module_repo_dir: std::path::PathBuf,
    pub report_dir: std::path::PathBuf,
    pub event_file: Option<std::path::PathBuf>,
    pub internal_subnets: Vec<InternalSubnet>,
    pub local_host: IpAddr,
    pub ledger_host: String,
    pub ledger_port: u16,
    pub ledger_db_name: String,
    pub module_timeout: Duration,
    pub verification_recency_threshold: Duration,
    pub continuous_mode: bool,
    pub manual_mode: bool,
    pub verbose: bool,
}

impl Config {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 180;
    pub const DEFAULT_THRESHOLD_SECS: u64 = 1800;
    /// Continuous-mode poll cadence (§5: "10 s minus work time").
    pub const POLL_INTERVAL: Duration = Duration::from_secs(10);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subnet_contains_address_in_range() {
        let subnet = InternalSubnet::parse("10.0.0.0/8").unwrap();
        assert!(subnet.contains(&"10.1.2.3".parse().unwrap()));
        assert!(!subnet.contains(&"192.168.1.1".parse().unwrap()));
    }

    #[test]
    fn subnet_exact_host_match_at_slash_32() {
        let subnet = InternalSubnet::parse("10.0.0.5/32").unwrap();
        assert!(subnet.contains(&"10.0.0.5".parse().unwrap()));
        assert!(!subnet.contains(&"10.0.0.6".parse().unwrap()));
    }

    #[test]
    fn rejects_malformed_spec() {
        assert!(InternalSubnet::parse("not-a-subnet").is_err());
    }
}
