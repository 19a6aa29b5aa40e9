//! End-to-end pipeline scenarios from the specification's "concrete scenarios" list,
//! driven through the real `VerificationPipeline` rather than the verdict aggregator alone.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use av_exec::ExecutionBackend;
use av_io::InternalSubnet;
use av_ledger::{InMemoryLedger, RunLedger, VulnVerification};
use av_model::{
    CliArgs, Event, EventId, ExecDetails, Host, ModuleClass, ModuleDescriptor,
    ModuleExecutionError, ModuleRef, ModuleType, ModulesForVuln, SuccessCriterion,
    SuccessStrategy, VulnerabilityState,
};
use av_pipeline::{ModuleExecutor, NoPrompt, VerificationPipeline};

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

fn subnets() -> Vec<InternalSubnet> {
    vec![InternalSubnet::parse("10.0.0.0/8").unwrap()]
}

fn descriptor(name: &str, class: ModuleClass) -> ModuleDescriptor {
    ModuleDescriptor {
        name: name.to_string(),
        class,
        module_type: ModuleType::Standalone,
        path: None,
        exec_mode: None,
        parameters: vec![],
        payload_parameters: vec![],
        success: vec![
            SuccessCriterion {
                strategy: SuccessStrategy::Output,
                conclusion: true,
                argument: Some("VULNERABLE".to_string()),
            },
            SuccessCriterion {
                strategy: SuccessStrategy::Fallback,
                conclusion: false,
                argument: None,
            },
        ],
        result: None,
        source: Default::default(),
    }
}

fn module_ref(name: &str) -> ModuleRef {
    ModuleRef {
        name: name.to_string(),
        ..Default::default()
    }
}

struct FixedOutputBackend {
    output: &'static str,
}

#[async_trait]
impl ExecutionBackend for FixedOutputBackend {
    async fn run(
        &self,
        descriptor: &ModuleDescriptor,
        _params: &BTreeMap<String, String>,
        _timeout: Duration,
    ) -> Result<ExecDetails, ModuleExecutionError> {
        let mut details = ExecDetails::new(&descriptor.name, "test");
        details.output = Some(self.output.to_string());
        Ok(details)
    }
}

/// A backend that fails every module belonging to one class, by name prefix.
struct FailingClassBackend {
    erroring_prefix: &'static str,
}

#[async_trait]
impl ExecutionBackend for FailingClassBackend {
    async fn run(
        &self,
        descriptor: &ModuleDescriptor,
        _params: &BTreeMap<String, String>,
        _timeout: Duration,
    ) -> Result<ExecDetails, ModuleExecutionError> {
        if descriptor.name.starts_with(self.erroring_prefix) {
            return Err(ModuleExecutionError::Backend("simulated backend failure".into()));
        }
        let mut details = ExecDetails::new(&descriptor.name, "test");
        details.output = Some("VULNERABLE".to_string());
        Ok(details)
    }
}

/// A backend whose plausibility module succeeds on its first call and fails thereafter,
/// simulating host-state drift between the pre- and post-plausibility passes.
struct DriftingPlausibilityBackend {
    calls: AtomicUsize,
}

#[async_trait]
impl ExecutionBackend for DriftingPlausibilityBackend {
    async fn run(
        &self,
        descriptor: &ModuleDescriptor,
        _params: &BTreeMap<String, String>,
        _timeout: Duration,
    ) -> Result<ExecDetails, ModuleExecutionError> {
        let mut details = ExecDetails::new(&descriptor.name, "test");
        if descriptor.class == ModuleClass::Plausibility {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            details.output = Some(if n == 0 { "VULNERABLE".to_string() } else { "not affected".to_string() });
        } else {
            details.output = Some("VULNERABLE".to_string());
        }
        Ok(details)
    }
}

#[tokio::test]
async fn plausibility_none_short_circuits_scanner_and_exploit() {
    let ledger: Arc<dyn RunLedger> = Arc::new(InMemoryLedger::new());
    let backend = Arc::new(FixedOutputBackend { output: "not affected" });
    let executor = Arc::new(ModuleExecutor::new(
        backend.clone(),
        backend,
        subnets(),
        Arc::new(NoPrompt),
        false,
        vec![
            descriptor("plaus1", ModuleClass::Plausibility),
            descriptor("scan1", ModuleClass::Scanner),
            descriptor("scan2", ModuleClass::Scanner),
        ],
    ));
    let cvss = Arc::new(av_io::CvssFetcher::new(ledger.clone()));
    let vulns = vec![ModulesForVuln {
        cves: vec!["CVE-2021-1234".into()],
        plausibility: vec![module_ref("plaus1")],
        scanners: vec![module_ref("scan1"), module_ref("scan2")],
        exploits: vec![],
    }];
    let pipeline = VerificationPipeline::new(
        executor,
        ledger.clone(),
        cvss,
        vulns,
        vec![
            descriptor("plaus1", ModuleClass::Plausibility),
            descriptor("scan1", ModuleClass::Scanner),
            descriptor("scan2", ModuleClass::Scanner),
        ],
        Duration::from_secs(5),
        Duration::from_secs(1800),
    );

    pipeline.process_event(event(), &CliArgs::new()).await;

    let records = ledger.get_verification_data().await.unwrap();
    assert_eq!(records.len(), 1);
    let verdict = records[0].verdict.unwrap();
    assert_eq!(verdict.vuln_state, VulnerabilityState::Unknown);
}

#[tokio::test]
async fn recency_suppression_prevents_second_execution_batch() {
    let ledger = Arc::new(InMemoryLedger::new());
    let host = event().dst;
    ledger
        .insert_vuln_verification(VulnVerification::new(host, vec!["CVE-2021-1234".into()]))
        .await
        .unwrap();

    let backend = Arc::new(FixedOutputBackend { output: "VULNERABLE" });
    let ledger_trait: Arc<dyn RunLedger> = ledger.clone();
    let executor = Arc::new(ModuleExecutor::new(
        backend.clone(),
        backend,
        subnets(),
        Arc::new(NoPrompt),
        false,
        vec![descriptor("scan1", ModuleClass::Scanner)],
    ));
    let cvss = Arc::new(av_io::CvssFetcher::new(ledger_trait.clone()));
    let vulns = vec![ModulesForVuln {
        cves: vec!["CVE-2021-1234".into()],
        plausibility: vec![],
        scanners: vec![module_ref("scan1")],
        exploits: vec![],
    }];
    let pipeline = VerificationPipeline::new(
        executor,
        ledger_trait.clone(),
        cvss,
        vulns,
        vec![descriptor("scan1", ModuleClass::Scanner)],
        Duration::from_secs(5),
        Duration::from_secs(1800),
    );

    pipeline.process_event(event(), &CliArgs::new()).await;

    let records = ledger_trait.get_verification_data().await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(!records[0].verification_success);
    assert!(records[0].details.contains("suppressed"));
}

#[tokio::test]
async fn erroneous_scanner_module_poisons_verdict_to_unknown() {
    let ledger: Arc<dyn RunLedger> = Arc::new(InMemoryLedger::new());
    let backend = Arc::new(FailingClassBackend { erroring_prefix: "scan" });
    let executor = Arc::new(ModuleExecutor::new(
        backend.clone(),
        backend,
        subnets(),
        Arc::new(NoPrompt),
        false,
        vec![
            descriptor("plaus1", ModuleClass::Plausibility),
            descriptor("scan1", ModuleClass::Scanner),
            descriptor("exploit1", ModuleClass::Exploit),
        ],
    ));
    let cvss = Arc::new(av_io::CvssFetcher::new(ledger.clone()));
    let vulns = vec![ModulesForVuln {
        cves: vec!["CVE-2021-1234".into()],
        plausibility: vec![module_ref("plaus1")],
        scanners: vec![module_ref("scan1")],
        exploits: vec![module_ref("exploit1")],
    }];
    let pipeline = VerificationPipeline::new(
        executor,
        ledger.clone(),
        cvss,
        vulns,
        vec![
            descriptor("plaus1", ModuleClass::Plausibility),
            descriptor("scan1", ModuleClass::Scanner),
            descriptor("exploit1", ModuleClass::Exploit),
        ],
        Duration::from_secs(5),
        Duration::from_secs(1800),
    );

    pipeline.process_event(event(), &CliArgs::new()).await;

    let records = ledger.get_verification_data().await.unwrap();
    let verdict = records[0].verdict.unwrap();
    assert_eq!(verdict.vuln_state, VulnerabilityState::Unknown);
}

#[tokio::test]
async fn host_state_changed_when_post_plausibility_drifts() {
    let ledger: Arc<dyn RunLedger> = Arc::new(InMemoryLedger::new());
    let backend = Arc::new(DriftingPlausibilityBackend { calls: AtomicUsize::new(0) });
    let executor = Arc::new(ModuleExecutor::new(
        backend.clone(),
        backend,
        subnets(),
        Arc::new(NoPrompt),
        false,
        vec![
            descriptor("plaus1", ModuleClass::Plausibility),
            descriptor("scan1", ModuleClass::Scanner),
        ],
    ));
    let cvss = Arc::new(av_io::CvssFetcher::new(ledger.clone()));
    let vulns = vec![ModulesForVuln {
        cves: vec!["CVE-2021-1234".into()],
        plausibility: vec![module_ref("plaus1")],
        scanners: vec![module_ref("scan1")],
        exploits: vec![],
    }];
    let pipeline = VerificationPipeline::new(
        executor,
        ledger.clone(),
        cvss,
        vulns,
        vec![
            descriptor("plaus1", ModuleClass::Plausibility),
            descriptor("scan1", ModuleClass::Scanner),
        ],
        Duration::from_secs(5),
        Duration::from_secs(1800),
    );

    pipeline.process_event(event(), &CliArgs::new()).await;

    let records = ledger.get_verification_data().await.unwrap();
    let verdict = records[0].verdict.unwrap();
    assert_eq!(verdict.host_state, av_model::HostState::Changed);
}
