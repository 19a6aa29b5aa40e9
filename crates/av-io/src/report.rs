use av_model::{Confidence, HostState, Plausibility, VerificationRecord, VulnerabilityState};
use chrono::Utc;
use serde::Serialize;

/// A single flattened, CSV-serializable projection of one concluded `VerificationRecord`
/// (C12). Field names become the CSV header row.
#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub event_id: u64,
    pub src: String,
    pub dst: String,
    pub cves: String,
    pub cvss_scores: String,
    pub start: String,
    pub end: String,
    pub plaus_successful: String,
    pub plaus_erroneous: String,
    pub scanner_successful: String,
    pub scanner_erroneous: String,
    pub exploit_successful: String,
    pub exploit_erroneous: String,
    pub post_plaus_successful: String,
    pub post_plaus_erroneous: String,
    pub plausibility: String,
    pub vuln_state: String,
    pub confidence: String,
    pub host_state: String,
    pub verification_success: bool,
    pub details: String,
}

fn joined(names: &[String]) -> String {
    names.join(";")
}

impl ReportEntry {
    /// Mirrors the original `ReportEntry.incorporate_cached_data` transformation (§3).
    pub fn from_record(record: &VerificationRecord) -> Self {
        let cvss_scores = record
            .cvss_scores
            .iter()
            .map(|(cve, score)| match score {
                Some(s) => format!("{cve}:{s}"),
                None => format!("{cve}:?"),
            })
            .collect::<Vec<_>>()
            .join(";");

        let (plausibility, vuln_state, confidence, host_state) = match &record.verdict {
            Some(v) => (
                display_plausibility(v.plausibility),
                display_vuln_state(v.vuln_state),
                display_confidence(v.confidence),
                display_host_state(v.host_state),
            ),
            None => ("-".to_string(), "-".to_string(), "-".to_string(), "-".to_string()),
        };

        let cr = &record.class_results;

        Self {
            event_id: record.event_id.0,
            src: record.src.to_string(),
            dst: record.dst.to_string(),
            cves: record.cvss_scores.keys().cloned().collect::<Vec<_>>().join(";"),
            cvss_scores,
            start: record.start.to_rfc3339(),
            end: record.end.map(|e| e.to_rfc3339()).unwrap_or_default(),
            plaus_successful: joined(&cr.plaus.successful_modules),
            plaus_erroneous: joined(&cr.plaus.erroneous_modules),
            scanner_successful: joined(&cr.scanner.successful_modules),
            scanner_erroneous: joined(&cr.scanner.erroneous_modules),
            exploit_successful: joined(&cr.exploit.successful_modules),
            exploit_erroneous: joined(&cr.exploit.erroneous_modules),
            post_plaus_successful: joined(&cr.post_plaus.successful_modules),
            post_plaus_erroneous: joined(&cr.post_plaus.erroneous_modules),
            plausibility,
            vuln_state,
            confidence,
            host_state,
            verification_success: record.verification_success,
            details: record.details.clone(),
        }
    }
}

fn display_plausibility(p: Plausibility) -> String {
    match p {
        Plausibility::Plausible => "PLAUSIBLE",
        Plausibility::Uncertain => "UNCERTAIN",
        Plausibility::NotPlausible => "NOT_PLAUSIBLE",
    }
    .to_string()
}

fn display_vuln_state(v: VulnerabilityState) -> String {
    match v {
        VulnerabilityState::Exploitable => "EXPLOITABLE",
        VulnerabilityState::NotExploitable => "NOT_EXPLOITABLE",
        VulnerabilityState::NotVulnerable => "NOT_VULNERABLE",
        VulnerabilityState::Unknown => "UNKNOWN",
    }
    .to_string()
}

fn display_confidence(c: Confidence) -> String {
    match c {
        Confidence::High => "HIGH",
        Confidence::Medium => "MEDIUM",
        Confidence::Low => "LOW",
        Confidence::Undefined => "-",
    }
    .to_string()
}

fn display_host_state(h: HostState) -> String {
    match h {
        HostState::Unchanged => "UNCHANGED",
        HostState::Changed => "CHANGED",
        HostState::NotComparable => "NOT_COMPARABLE",
    }
    .to_string()
}

/// Renders concluded records to a timestamped CSV file inside `report_dir` (§6, C12).
pub struct ReportWriter {
    report_dir: std::path::PathBuf,
}

impl ReportWriter {
    pub fn new(report_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            report_dir: report_dir.into(),
        }
    }

    pub fn write_report(&self, rows: &[ReportEntry]) -> std::io::Result<std::path::PathBuf> {
        std::fs::create_dir_all(&self.report_dir)?;
        let file_name = format!("arf-report_{}.csv", Utc::now().format("%Y%m%d-%H%M%S"));
        let path = self.report_dir.join(file_name);
        let mut writer = csv::Writer::from_path(&path)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use av_model::{ClassResult, ClassResults, EventId, ExecDetails, Host, Verdict};
    use std::collections::BTreeMap;

    fn sample_record() -> VerificationRecord {
        let mut cvss = BTreeMap::new();
        cvss.insert("CVE-2021-1234".to_string(), Some(9.8));
        let src = Host::new("10.0.0.1".parse().unwrap(), 1234);
        let dst = Host::new("10.0.0.2".parse().unwrap(), 80);
        let mut record = VerificationRecord::admitted(EventId(1), src, dst, cvss);

        let mut exploit = ClassResult::empty();
        let mut details = ExecDetails::new("exploit1", "test");
        details.exec_success = true;
        details.module_success = Some(true);
        exploit.record(details);
        exploit.finalize_outcome();
        let class_results = ClassResults {
            exploit,
            ..ClassResults::default()
        };

        record.close_verified(
            Verdict {
                plausibility: Plausibility::Plausible,
                vuln_state: VulnerabilityState::Exploitable,
                confidence: Confidence::High,
                host_state: HostState::Unchanged,
            },
            class_results,
        );
        record
    }

    #[test]
    fn report_entry_carries_header_relevant_fields() {
        let entry = ReportEntry::from_record(&sample_record());
        assert_eq!(entry.plausibility, "PLAUSIBLE");
        assert_eq!(entry.vuln_state, "EXPLOITABLE");
        assert!(entry.verification_success);
        assert_eq!(entry.src, "10.0.0.1:1234");
        assert_eq!(entry.exploit_successful, "exploit1");
    }

    #[test]
    fn write_report_produces_named_csv_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path());
        let entries = vec![ReportEntry::from_record(&sample_record())];
        let path = writer.write_report(&entries).unwrap();
        assert!(path.file_name().unwrap().to_str().unwrap().starts_with("arf-report_"));
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("event_id,"));
    }
}
