use async_trait::async_trait;
use av_model::{Event, EventId, LedgerError, ModuleDescriptor, ModulesForVuln, VerificationRecord};

use crate::model::VulnVerification;

/// Abstracts the document store backing every cache and the run ledger (C8). All operations
/// named here are the ones enumerated in §8 of the specification.
#[async_trait]
pub trait RunLedger: Send + Sync {
    /// Clears the per-run caches (`cached_events`, `cached_vulns`, `cached_modules`,
    /// `cached_report_data`, `cached_cvss_scores`) — called once at run start.
    async fn clear_run_caches(&self) -> Result<(), LedgerError>;

    /// Assigns the next insertion-ordered `EventId` and stores the event in `cached_events`.
    async fn cache_event(&self, event: Event) -> Result<Event, LedgerError>;
    async fn get_cached_events(&self) -> Result<Vec<Event>, LedgerError>;

    /// The continuous-mode `events` queue, populated externally; draining marks events processed.
    async fn poll_unprocessed_events(&self) -> Result<Vec<Event>, LedgerError>;

    async fn cache_modules(&self, modules: Vec<ModuleDescriptor>) -> Result<(), LedgerError>;
    async fn get_cached_modules(&self) -> Result<Vec<ModuleDescriptor>, LedgerError>;

    async fn cache_vulns(&self, vulns: Vec<ModulesForVuln>) -> Result<(), LedgerError>;
    async fn get_cached_vulns(&self) -> Result<Vec<ModulesForVuln>, LedgerError>;

    /// Admits a new verification record (creates the `arf_exec_stats` row in the open state).
    async fn admit_verification(&self, record: VerificationRecord) -> Result<(), LedgerError>;
    /// Writes the closed verification record — the single terminal write per event (§9).
    async fn conclude_verification(&self, record: VerificationRecord) -> Result<(), LedgerError>;
    async fn get_verification_data(&self) -> Result<Vec<VerificationRecord>, LedgerError>;

    /// Most recent `vuln_verification` row matching `(host, any(cve))`, if any.
    async fn most_recent_vuln_verification(
        &self,
        host: &av_model::Host,
        cves: &[String],
    ) -> Result<Option<VulnVerification>, LedgerError>;
    async fn insert_vuln_verification(&self, record: VulnVerification) -> Result<(), LedgerError>;
    /// Prunes `vuln_verification` rows older than `threshold_secs`; returns the number removed.
    async fn prune_vuln_verifications(&self, threshold_secs: i64) -> Result<usize, LedgerError>;

    /// `None` = cache miss; `Some(None)` = cached "no score"; `Some(Some(score))` = cached score.
    async fn get_cached_cvss(&self, cve: &str) -> Result<Option<Option<f64>>, LedgerError>;
    async fn cache_cvss(&self, cve: &str, score: Option<f64>) -> Result<(), LedgerError>;

    async fn write_report_data(&self, rows: Vec<serde_json::Value>) -> Result<(), LedgerError>;
    async fn get_report_data(&self) -> Result<Vec<serde_json::Value>, LedgerError>;
}
