use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::exec::{ClassOutcome, ClassResult};
use crate::host::{EventId, Host};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Plausibility {
    Plausible,
    Uncertain,
    NotPlausible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VulnerabilityState {
    Exploitable,
    NotExploitable,
    NotVulnerable,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    High,
    Medium,
    Low,
    /// `⊥`: undefined, paired with `VulnerabilityState::Unknown`.
    Undefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostState {
    Unchanged,
    Changed,
    NotComparable,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Verdict {
    pub plausibility: Plausibility,
    pub vuln_state: VulnerabilityState,
    pub confidence: Confidence,
    pub host_state: HostState,
}

/// The four class results an event accumulates over the course of verification (§3, §4.6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassResults {
    pub plaus: ClassResult,
    pub scanner: ClassResult,
    pub exploit: ClassResult,
    pub post_plaus: ClassResult,
}

fn has_erroneous(cr: &ClassResult) -> bool {
    !cr.erroneous_modules.is_empty()
}

/// C7: folds the four class results into a single verdict. Pure function of its inputs —
/// re-applying it to the same `ClassResults` always yields the same `Verdict` (§8 idempotence law).
pub fn aggregate_verdict(results: &ClassResults) -> Verdict {
    let plausibility = match results.plaus.result {
        Some(ClassOutcome::All) => Plausibility::Plausible,
        Some(ClassOutcome::None) => Plausibility::NotPlausible,
        _ => Plausibility::Uncertain,
    };

    let any_erroneous = has_erroneous(&results.plaus)
        || has_erroneous(&results.scanner)
        || has_erroneous(&results.exploit)
        || has_erroneous(&results.post_plaus);

    let exploit_succeeded = !matches!(results.exploit.result, Some(ClassOutcome::None) | None)
        && !results.exploit.successful_modules.is_empty();
    let scanner_succeeded = !matches!(results.scanner.result, Some(ClassOutcome::None) | None)
        && !results.scanner.successful_modules.is_empty();
    let any_technical_success =
        results.scanner.count() > 0 && !results.scanner.successful_modules.is_empty()
            || results.exploit.count() > 0 && !results.exploit.successful_modules.is_empty();

    let vuln_state = if plausibility == Plausibility::NotPlausible || any_erroneous {
        VulnerabilityState::Unknown
    } else if exploit_succeeded {
        VulnerabilityState::Exploitable
    } else if scanner_succeeded {
        VulnerabilityState::NotExploitable
    } else if any_technical_success {
        VulnerabilityState::NotVulnerable
    } else {
        VulnerabilityState::Unknown
    };

    let confidence = match vuln_state {
        VulnerabilityState::Unknown => Confidence::Undefined,
        _ if matches!(
            (plausibility, vuln_state),
            (
                Plausibility::Plausible | Plausibility::Uncertain,
                VulnerabilityState::Exploitable
            ) | (
                Plausibility::NotPlausible,
                VulnerabilityState::NotVulnerable
            )
        ) =>
        {
            Confidence::High
        }
        _ if plausibility == Plausibility::NotPlausible
            && vuln_state != VulnerabilityState::NotVulnerable =>
        {
            Confidence::Low
        }
        _ => Confidence::Medium,
    };

    let host_state = {
        let sets_equal = results.plaus.successful_modules.iter().collect::<std::collections::BTreeSet<_>>()
            == results.post_plaus.successful_modules.iter().collect::<std::collections::BTreeSet<_>>()
            && results.plaus.erroneous_modules.iter().collect::<std::collections::BTreeSet<_>>()
                == results.post_plaus.erroneous_modules.iter().collect::<std::collections::BTreeSet<_>>();
        if sets_equal {
            if results.plaus.result == results.post_plaus.result {
                HostState::Unchanged
            } else {
                HostState::Changed
            }
        } else {
            HostState::NotComparable
        }
    };

    Verdict {
        plausibility,
        vuln_state,
        confidence,
        host_state,
    }
}

/// The persisted, per-event record (C8's unit of storage). Created on admission, closed on
/// completion — written exactly once at the terminal of the pipeline (see design notes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub event_id: EventId,
    pub src: Host,
    pub dst: Host,
    pub cvss_scores: BTreeMap<String, Option<f64>>,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub verdict: Option<Verdict>,
    pub verification_success: bool,
    pub details: String,
    /// Per-class successful/erroneous module names, captured at the terminal write for the
    /// CSV report (C12) — empty for skipped/short-circuited classes.
    pub class_results: ClassResults,
}

impl VerificationRecord {
    pub fn admitted(
        event_id: EventId,
        src: Host,
        dst: Host,
        cvss_scores: BTreeMap<String, Option<f64>>,
    ) -> Self {
        Self {
            event_id,
            src,
            dst,
            cvss_scores,
            start: Utc::now(),
            end: None,
            verdict: None,
            verification_success: false,
            details: String::new(),
            class_results: ClassResults::default(),
        }
    }

    pub fn close_skipped(&mut self, reason: impl Into<String>) {
        self.end = Some(Utc::now());
        self.verification_success = false;
        self.details = reason.into();
    }

    pub fn close_verified(&mut self, verdict: Verdict, class_results: ClassResults) {
        self.end = Some(Utc::now());
        self.verdict = Some(verdict);
        self.verification_success = true;
        self.details = "verified".to_string();
        self.class_results = class_results;
    }
}
