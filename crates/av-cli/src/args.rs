use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::Context;
use av_io::{Config, InternalSubnet};
use av_model::CliArgs;
use clap::{ArgAction, ArgGroup, Parser};
use serde_json::Value;

/// Mirrors the flag set of §6/§6G one-for-one: module repo, report dir, event file, the
/// mutually-exclusive-but-required subnet pair, ledger connection parameters, module
/// timeout, recency threshold, and the continuous/manual/verbose toggles.
#[derive(Parser, Debug)]
#[command(name = "arf")]
#[command(author, version)]
#[command(about = "Attack-verification engine: plausibility -> scanner -> exploit verification pipeline")]
#[command(group(
    ArgGroup::new("subnets")
        .args(["subnet", "subnet_file"])
        .required(true)
        .multiple(false)
))]
pub struct Args {
    /// Module repository directory (scanned recursively for vulns/ and modules/ YAML)
    #[arg(short = 'r', long = "repo", value_name = "DIR")]
    pub module_repo: PathBuf,

    /// Directory the CSV report is written into
    #[arg(short = 'x', long = "report-dir", value_name = "DIR", default_value = "reports")]
    pub report_dir: PathBuf,

    /// Event file to verify (required unless -c/--continuous is given)
    #[arg(short = 'e', long = "event-file", value_name = "FILE")]
    pub event_file: Option<PathBuf>,

    /// Authorized internal subnet in CIDR form; repeatable. Mutually exclusive with -n.
    #[arg(short = 's', long = "subnet", value_name = "CIDR", action = ArgAction::Append)]
    pub subnet: Vec<String>,

    /// File with one authorized internal subnet (CIDR) per line. Mutually exclusive with -s.
    #[arg(short = 'n', long = "subnet-file", value_name = "FILE")]
    pub subnet_file: Option<PathBuf>,

    /// Local host address modules may bind to for callback listeners
    #[arg(short = 'l', long = "local-host", default_value = "127.0.0.1")]
    pub local_host: IpAddr,

    /// Run ledger (document store) host
    #[arg(short = 'd', long = "ledger-host", env = "ARF_LEDGER_HOST", default_value = "localhost")]
    pub ledger_host: String,

    /// Run ledger port
    #[arg(short = 'p', long = "ledger-port", env = "ARF_LEDGER_PORT", default_value_t = 27017)]
    pub ledger_port: u16,

    /// Run ledger database name
    #[arg(short = 'a', long = "ledger-db", env = "ARF_LEDGER_DB", default_value = "arf")]
    pub ledger_db: String,

    /// Per-module execution timeout, in seconds
    #[arg(short = 't', long = "timeout", default_value_t = Config::DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// Verification-recency suppression threshold, in seconds
    #[arg(short = 'o', long = "recency-threshold", default_value_t = Config::DEFAULT_THRESHOLD_SECS)]
    pub threshold_secs: u64,

    /// Poll the ledger's unprocessed-event queue indefinitely instead of a single pass
    #[arg(short = 'c', long = "continuous")]
    pub continuous: bool,

    /// Prompt the operator to override automatically-evaluated parameters
    #[arg(short = 'm', long = "manual")]
    pub manual: bool,

    /// Verbose (debug-level) logging; equivalent to RUST_LOG=debug
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Exploitation-framework RPC endpoint
    #[arg(long = "rpc-endpoint", env = "ARF_RPC_ENDPOINT", default_value = "http://127.0.0.1:55553/api/")]
    pub rpc_endpoint: String,

    /// Exploitation-framework RPC user
    #[arg(long = "rpc-user", env = "ARF_RPC_USER", default_value = "msf")]
    pub rpc_user: String,

    /// Exploitation-framework RPC password
    #[arg(long = "rpc-password", env = "ARF_RPC_PASSWORD", default_value = "")]
    pub rpc_password: String,

    /// Named CLI argument consumable by `ARF_ARG`-sourced parameters, `KEY=VALUE`; repeatable
    #[arg(long = "arg", value_name = "KEY=VALUE", action = ArgAction::Append)]
    pub arf_arg: Vec<String>,
}

impl Args {
    pub fn resolve_subnets(&self) -> anyhow::Result<Vec<InternalSubnet>> {
        let specs: Vec<String> = if !self.subnet.is_empty() {
            self.subnet.clone()
        } else {
            let path = self
                .subnet_file
                .as_ref()
                .expect("clap ArgGroup guarantees -s or -n is present");
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading subnet file {}", path.display()))?;
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string)
                .collect()
        };
        specs
            .iter()
            .map(|s| InternalSubnet::parse(s).map_err(anyhow::Error::from))
            .collect()
    }

    pub fn to_cli_args(&self) -> CliArgs {
        let mut map: BTreeMap<String, Value> = BTreeMap::new();
        for entry in &self.arf_arg {
            if let Some((key, value)) = entry.split_once('=') {
                map.insert(key.to_string(), Value::String(value.to_string()));
            } else {
                tracing::warn!(entry, "ignoring malformed --arg (expected KEY=VALUE)");
            }
        }
        map
    }

    pub fn to_config(&self, internal_subnets: Vec<InternalSubnet>) -> Config {
        Config {
            module_repo_dir: self.module_repo.clone(),
            report_dir: self.report_dir.clone(),
            event_file: self.event_file.clone(),
            internal_subnets,
            local_host: self.local_host,
            ledger_host: self.ledger_host.clone(),
            ledger_port: self.ledger_port,
            ledger_db_name: self.ledger_db.clone(),
            module_timeout: std::time::Duration::from_secs(self.timeout_secs),
            verification_recency_threshold: std::time::Duration::from_secs(self.threshold_secs),
            continuous_mode: self.continuous,
            manual_mode: self.manual,
            verbose: self.verbose,
        }
    }
}
