use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use av_io::{select_binding, CvssFetcher};
use av_ledger::{RunLedger, VulnVerification};
use av_model::{
    ClassResults, CliArgs, Event, ModuleDescriptor, ModulesForVuln, VerificationRecord,
};
use tracing::{debug, info, warn};

use crate::executor::ModuleExecutor;

/// Per-event orchestration (C6, §4.6): the three-stage gate (plausibility -> {scanner,
/// exploit} -> post-plausibility), with duplicate suppression and a single terminal ledger
/// write.
pub struct VerificationPipeline {
    executor: Arc<ModuleExecutor>,
    ledger: Arc<dyn RunLedger>,
    cvss: Arc<CvssFetcher>,
    vulns: Vec<ModulesForVuln>,
    modules: BTreeMap<String, ModuleDescriptor>,
    module_timeout: Duration,
    recency_threshold: Duration,
}

impl VerificationPipeline {
    pub fn new(
        executor: Arc<ModuleExecutor>,
        ledger: Arc<dyn RunLedger>,
        cvss: Arc<CvssFetcher>,
        vulns: Vec<ModulesForVuln>,
        modules: Vec<ModuleDescriptor>,
        module_timeout: Duration,
        recency_threshold: Duration,
    ) -> Self {
        Self {
            executor,
            ledger,
            cvss,
            vulns,
            modules: modules.into_iter().map(|m| (m.name.clone(), m)).collect(),
            module_timeout,
            recency_threshold,
        }
    }

    /// Runs one event through the full pipeline. Never errors: every failure mode closes the
    /// admitted `VerificationRecord` with an explanatory `details` string instead (§4.6, §7).
    pub async fn process_event(&self, event: Event, cli_args: &CliArgs) {
        if !event.has_cves() {
            debug!(event_id = event.id.0, "event carries no CVEs, skipping");
            let mut record =
                VerificationRecord::admitted(event.id, event.src.clone(), event.dst.clone(), BTreeMap::new());
            record.close_skipped("not verified: missing CVE IDs");
            let _ = self.ledger.conclude_verification(record).await;
            return;
        }

        let mut cvss_scores = BTreeMap::new();
        for cve in &event.cves {
            cvss_scores.insert(cve.clone(), self.cvss.fetch(cve).await);
        }

        let mut record =
            VerificationRecord::admitted(event.id, event.src.clone(), event.dst.clone(), cvss_scores);

        if let Ok(Some(recent)) = self
            .ledger
            .most_recent_vuln_verification(&event.dst, &event.cves)
            .await
        {
            if recent.age() <= chrono::Duration::from_std(self.recency_threshold).unwrap_or_default() {
                record.close_skipped(format!(
                    "suppressed: {} verified against {:?} {} ago",
                    recent.host,
                    recent.cves,
                    recent.age()
                ));
                let _ = self.ledger.conclude_verification(record).await;
                return;
            }
        }

        let _ = self
            .ledger
            .insert_vuln_verification(VulnVerification::new(event.dst.clone(), event.cves.clone()))
            .await;

        let binding = match select_binding(&self.vulns, &event.cves) {
            Ok(b) => b,
            Err(e) => {
                warn!(event_id = event.id.0, error = %e, "no unique module binding for event");
                record.close_skipped(e.to_string());
                let _ = self.ledger.conclude_verification(record).await;
                return;
            }
        };

        let mut results = ClassResults::default();

        for module_ref in &binding.plausibility {
            self.run_one(&mut results.plaus, module_ref, &event, cli_args).await;
        }
        results.plaus.finalize_outcome();

        if results.plaus.result == Some(av_model::ClassOutcome::None) {
            info!(event_id = event.id.0, "plausibility NONE, short-circuiting");
            let verdict = av_model::aggregate_verdict(&results);
            record.close_verified(verdict, results);
            let _ = self.ledger.conclude_verification(record).await;
            return;
        }

        for module_ref in &binding.scanners {
            self.run_one(&mut results.scanner, module_ref, &event, cli_args).await;
        }
        results.scanner.finalize_outcome();

        for module_ref in &binding.exploits {
            self.run_one(&mut results.exploit, module_ref, &event, cli_args).await;
        }
        results.exploit.finalize_outcome();

        for module_ref in &binding.plausibility {
            self.run_one(&mut results.post_plaus, module_ref, &event, cli_args).await;
        }
        results.post_plaus.finalize_outcome();

        let verdict = av_model::aggregate_verdict(&results);
        record.close_verified(verdict, results);
        let _ = self.ledger.conclude_verification(record).await;
    }

    async fn run_one(
        &self,
        class_result: &mut av_model::ClassResult,
        module_ref: &av_model::ModuleRef,
        event: &Event,
        cli_args: &CliArgs,
    ) {
        let descriptor = match self.modules.get(&module_ref.name) {
            Some(d) => d,
            None => {
                warn!(module = %module_ref.name, "module reference has no matching descriptor");
                class_result.record(
                    av_model::ExecDetails::new(&module_ref.name, "pipeline")
                        .with_error("no matching module descriptor in repository"),
                );
                return;
            }
        };
        let details = self
            .executor
            .exec_and_evaluate(descriptor, Some(module_ref), event, cli_args, self.module_timeout)
            .await;
        class_result.record(details);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::NoPrompt;
    use async_trait::async_trait;
    use av_exec::ExecutionBackend;
    use av_io::InternalSubnet;
    use av_ledger::InMemoryLedger;
    use av_model::{EventId, ExecDetails, Host, ModuleClass, ModuleExecutionError, ModuleRef, ModuleType, SuccessCriterion, SuccessStrategy};
    use std::net::IpAddr;

    struct AlwaysVulnerable;
    #[async_trait]
    impl ExecutionBackend for AlwaysVulnerable {
        async fn run(
            &self,
            descriptor: &ModuleDescriptor,
            _params: &BTreeMap<String, String>,
            _timeout: Duration,
        ) -> Result<ExecDetails, ModuleExecutionError> {
            let mut d = ExecDetails::new(&descriptor.name, "test");
            d.output = Some("VULNERABLE".to_string());
            Ok(d)
        }
    }

    fn module(name: &str, class: ModuleClass) -> ModuleDescriptor {
        ModuleDescriptor {
            name: name.to_string(),
            class,
            module_type: ModuleType::Standalone,
            path: None,
            exec_mode: None,
            parameters: vec![],
            payload_parameters: vec![],
            success: vec![SuccessCriterion {
                strategy: SuccessStrategy::Output,
                conclusion: true,
                argument: Some("VULNERABLE".to_string()),
            }],
            result: None,
            source: Default::default(),
        }
    }

    fn event() -> Event {
        Event {
            id: EventId(1),
            src: Host::new("10.0.0.1".parse::<IpAddr>().unwrap(), 1234),
            dst: Host::new("10.0.0.2".parse::<IpAddr>().unwrap(), 80),
            cves: vec!["CVE-2021-1234".into()],
            timestamp: chrono::Utc::now(),
            raw: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn empty_cve_event_closes_a_skipped_record() {
        let ledger: Arc<dyn RunLedger> = Arc::new(InMemoryLedger::new());
        let executor = Arc::new(ModuleExecutor::new(
            Arc::new(AlwaysVulnerable),
            Arc::new(AlwaysVulnerable),
            vec![InternalSubnet::parse("10.0.0.0/8").unwrap()],
            Arc::new(NoPrompt),
            false,
            vec![],
        ));
        let cvss = Arc::new(CvssFetcher::new(ledger.clone()));
        let pipeline = VerificationPipeline::new(
            executor,
            ledger.clone(),
            cvss,
            vec![],
            vec![],
            Duration::from_secs(5),
            Duration::from_secs(1800),
        );
        let mut ev = event();
        ev.cves.clear();
        pipeline.process_event(ev, &CliArgs::new()).await;

        let records = ledger.get_verification_data().await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].verification_success);
        assert!(records[0].details.contains("missing CVE IDs"));
        assert!(records[0].verdict.is_none());
    }

    #[tokio::test]
    async fn happy_path_records_exploitable_verdict() {
        let ledger: Arc<dyn RunLedger> = Arc::new(InMemoryLedger::new());
        let executor = Arc::new(ModuleExecutor::new(
            Arc::new(AlwaysVulnerable),
            Arc::new(AlwaysVulnerable),
            vec![InternalSubnet::parse("10.0.0.0/8").unwrap()],
            Arc::new(NoPrompt),
            false,
            vec![
                module("plaus1", ModuleClass::Plausibility),
                module("scan1", ModuleClass::Scanner),
                module("exploit1", ModuleClass::Exploit),
            ],
        ));
        let cvss = Arc::new(CvssFetcher::new(ledger.clone()));
        let vulns = vec![ModulesForVuln {
            cves: vec!["CVE-2021-1234".into()],
            plausibility: vec![ModuleRef { name: "plaus1".into(), ..Default::default() }],
            scanners: vec![ModuleRef { name: "scan1".into(), ..Default::default() }],
            exploits: vec![ModuleRef { name: "exploit1".into(), ..Default::default() }],
        }];
        let pipeline = VerificationPipeline::new(
            executor,
            ledger.clone(),
            cvss,
            vulns,
            vec![
                module("plaus1", ModuleClass::Plausibility),
                module("scan1", ModuleClass::Scanner),
                module("exploit1", ModuleClass::Exploit),
            ],
            Duration::from_secs(5),
            Duration::from_secs(1800),
        );
        pipeline.process_event(event(), &CliArgs::new()).await;

        let records = ledger.get_verification_data().await.unwrap();
        assert_eq!(records.len(), 1);
        let verdict = records[0].verdict.unwrap();
        assert_eq!(verdict.vuln_state, av_model::VulnerabilityState::Exploitable);
    }
}
