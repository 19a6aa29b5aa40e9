use std::collections::BTreeMap;

use async_trait::async_trait;
use av_model::{Event, EventId, Host, LedgerError, ModuleDescriptor, ModulesForVuln, VerificationRecord};
use parking_lot::RwLock;

use crate::model::VulnVerification;
use crate::trait_def::RunLedger;

/// Deterministic, process-local implementation of `RunLedger`, used by default in tests
/// (§9 design note: "an in-memory implementation enables deterministic tests").
#[derive(Default)]
pub struct InMemoryLedger {
    next_id: RwLock<u64>,
    cached_events: RwLock<Vec<Event>>,
    unprocessed_queue: RwLock<Vec<Event>>,
    cached_modules: RwLock<Vec<ModuleDescriptor>>,
    cached_vulns: RwLock<Vec<ModulesForVuln>>,
    records: RwLock<BTreeMap<u64, VerificationRecord>>,
    vuln_verifications: RwLock<Vec<VulnVerification>>,
    cached_cvss: RwLock<BTreeMap<String, Option<f64>>>,
    report_data: RwLock<Vec<serde_json::Value>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/continuous-mode helper: seeds the unprocessed-event queue directly.
    pub fn seed_unprocessed(&self, events: Vec<Event>) {
        self.unprocessed_queue.write().extend(events);
    }
}

#[async_trait]
impl RunLedger for InMemoryLedger {
    async fn clear_run_caches(&self) -> Result<(), LedgerError> {
        self.cached_events.write().clear();
        self.cached_modules.write().clear();
        self.cached_vulns.write().clear();
        self.report_data.write().clear();
        self.cached_cvss.write().clear();
        Ok(())
    }

    async fn cache_event(&self, mut event: Event) -> Result<Event, LedgerError> {
        let mut next_id = self.next_id.write();
        event.id = EventId(*next_id);
        *next_id += 1;
        self.cached_events.write().push(event.clone());
        Ok(event)
    }

    async fn get_cached_events(&self) -> Result<Vec<Event>, LedgerError> {
        Ok(self.cached_events.read().clone())
    }

    async fn poll_unprocessed_events(&self) -> Result<Vec<Event>, LedgerError> {
        Ok(std::mem::take(&mut *self.unprocessed_queue.write()))
    }

    async fn cache_modules(&self, modules: Vec<ModuleDescriptor>) -> Result<(), LedgerError> {
        self.cached_modules.write().extend(modules);
        Ok(())
    }

    async fn get_cached_modules(&self) -> Result<Vec<ModuleDescriptor>, LedgerError> {
        Ok(self.cached_modules.read().clone())
    }

    async fn cache_vulns(&self, vulns: Vec<ModulesForVuln>) -> Result<(), LedgerError> {
        self.cached_vulns.write().extend(vulns);
        Ok(())
    }

    async fn get_cached_vulns(&self) -> Result<Vec<ModulesForVuln>, LedgerError> {
        Ok(self.cached_vulns.read().clone())
    }

    async fn admit_verification(&self, record: VerificationRecord) -> Result<(), LedgerError> {
        self.records.write().insert(record.event_id.0, record);
        Ok(())
    }

    async fn conclude_verification(&self, record: VerificationRecord) -> Result<(), LedgerError> {
        self.records.write().insert(record.event_id.0, record);
        Ok(())
    }

    async fn get_verification_data(&self) -> Result<Vec<VerificationRecord>, LedgerError> {
        Ok(self.records.read().values().cloned().collect())
    }

    async fn most_recent_vuln_verification(
        &self,
        host: &Host,
        cves: &[String],
    ) -> Result<Option<VulnVerification>, LedgerError> {
        let guard = self.vuln_verifications.read();
        Ok(guard
            .iter()
            .filter(|v| v.matches(host, cves))
            .max_by_key(|v| v.verified_at)
            .cloned())
    }

    async fn insert_vuln_verification(&self, record: VulnVerification) -> Result<(), LedgerError> {
        self.vuln_verifications.write().push(record);
        Ok(())
    }

    async fn prune_vuln_verifications(&self, threshold_secs: i64) -> Result<usize, LedgerError> {
        let mut guard = self.vuln_verifications.write();
        let before = guard.len();
        guard.retain(|v| v.age().num_seconds() <= threshold_secs);
        Ok(before - guard.len())
    }

    async fn get_cached_cvss(&self, cve: &str) -> Result<Option<Option<f64>>, LedgerError> {
        Ok(self.cached_cvss.read().get(cve).copied())
    }

    async fn cache_cvss(&self, cve: &str, score: Option<f64>) -> Result<(), LedgerError> {
        self.cached_cvss.write().insert(cve.to_string(), score);
        Ok(())
    }

    async fn write_report_data(&self, rows: Vec<serde_json::Value>) -> Result<(), LedgerError> {
        self.report_data.write().extend(rows);
        Ok(())
    }

    async fn get_report_data(&self) -> Result<Vec<serde_json::Value>, LedgerError> {
        Ok(self.report_data.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use av_model::Host;
    use std::net::IpAddr;

    fn host() -> Host {
        Host::new("10.0.0.5".parse::<IpAddr>().unwrap(), 445)
    }

    #[tokio::test]
    async fn recency_suppression_finds_most_recent_match() {
        let ledger = InMemoryLedger::new();
        ledger
            .insert_vuln_verification(VulnVerification::new(host(), vec!["CVE-2021-1234".into()]))
            .await
            .unwrap();

        let found = ledger
            .most_recent_vuln_verification(&host(), &["CVE-2021-1234".into()])
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn prune_removes_nothing_when_fresh() {
        let ledger = InMemoryLedger::new();
        ledger
            .insert_vuln_verification(VulnVerification::new(host(), vec!["CVE-2021-1234".into()]))
            .await
            .unwrap();
        let removed = ledger.prune_vuln_verifications(1800).await.unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn cvss_cache_distinguishes_miss_from_cached_none() {
        let ledger = InMemoryLedger::new();
        assert_eq!(ledger.get_cached_cvss("CVE-2021-1234").await.unwrap(), None);
        ledger.cache_cvss("CVE-2021-1234", None).await.unwrap();
        assert_eq!(ledger.get_cached_cvss("CVE-2021-1234").await.unwrap(), Some(None));
    }

    #[tokio::test]
    async fn cache_event_assigns_monotonic_ids() {
        let ledger = InMemoryLedger::new();
        let e1 = sample_event();
        let e2 = sample_event();
        let a = ledger.cache_event(e1).await.unwrap();
        let b = ledger.cache_event(e2).await.unwrap();
        assert!(a.id.0 < b.id.0);
    }

    fn sample_event() -> Event {
        Event {
            id: EventId(0),
            src: host(),
            dst: host(),
            cves: vec!["CVE-2021-1234".into()],
            timestamp: chrono::Utc::now(),
            raw: Default::default(),
        }
    }
}
