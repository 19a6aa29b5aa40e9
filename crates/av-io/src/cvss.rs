use std::sync::Arc;

use av_ledger::RunLedger;
use serde::Deserialize;
use tracing::{debug, warn};

const NVD_FEED_URL: &str = "https://services.nvd.nist.gov/rest/json/cves/2.0";

#[derive(Debug, Deserialize)]
struct NvdResponse {
    vulnerabilities: Vec<NvdVulnerability>,
}

#[derive(Debug, Deserialize)]
struct NvdVulnerability {
    cve: NvdCve,
}

#[derive(Debug, Deserialize)]
struct NvdCve {
    metrics: Option<NvdMetrics>,
}

#[derive(Debug, Deserialize)]
struct NvdMetrics {
    #[serde(rename = "cvssMetricV31")]
    v31: Option<Vec<NvdCvssMetric>>,
    #[serde(rename = "cvssMetricV30")]
    v30: Option<Vec<NvdCvssMetric>>,
    #[serde(rename = "cvssMetricV2")]
    v2: Option<Vec<NvdCvssMetric>>,
}

#[derive(Debug, Deserialize)]
struct NvdCvssMetric {
    #[serde(rename = "cvssData")]
    cvss_data: NvdCvssData,
}

#[derive(Debug, Deserialize)]
struct NvdCvssData {
    #[serde(rename = "baseScore")]
    base_score: f64,
}

/// Cache-first CVSS base-score lookup (§6, C11). Network or parse failure yields `None`,
/// never a fatal error.
pub struct CvssFetcher {
    client: reqwest::Client,
    ledger: Arc<dyn RunLedger>,
}

impl CvssFetcher {
    pub fn new(ledger: Arc<dyn RunLedger>) -> Self {
        Self {
            client: reqwest::Client::new(),
            ledger,
        }
    }

    pub async fn fetch(&self, cve: &str) -> Option<f64> {
        if let Ok(Some(cached)) = self.ledger.get_cached_cvss(cve).await {
            return cached;
        }
        let score = self.fetch_from_nvd(cve).await;
        let _ = self.ledger.cache_cvss(cve, score).await;
        score
    }

    async fn fetch_from_nvd(&self, cve: &str) -> Option<f64> {
        let response = self
            .client
            .get(NVD_FEED_URL)
            .query(&[("cveId", cve)])
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!(cve, error = %e, "CVSS fetch request failed");
                return None;
            }
        };

        let parsed: Result<NvdResponse, _> = response.json().await;
        let parsed = match parsed {
            Ok(p) => p,
            Err(e) => {
                debug!(cve, error = %e, "CVSS response did not match expected schema");
                return None;
            }
        };

        let metrics = parsed.vulnerabilities.into_iter().next()?.cve.metrics?;
        metrics
            .v31
            .as_ref()
            .and_then(|m| m.first())
            .or_else(|| metrics.v30.as_ref().and_then(|m| m.first()))
            .map(|m| m.cvss_data.base_score)
            .or_else(|| metrics.v2.as_ref().and_then(|m| m.first()).map(|m| m.cvss_data.base_score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use av_ledger::InMemoryLedger;

    #[tokio::test]
    async fn cache_hit_short_circuits_network_call() {
        let ledger: Arc<dyn RunLedger> = Arc::new(InMemoryLedger::new());
        ledger.cache_cvss("CVE-2021-1234", Some(9.8)).await.unwrap();
        let fetcher = CvssFetcher::new(ledger);
        let score = fetcher.fetch("CVE-2021-1234").await;
        assert_eq!(score, Some(9.8));
    }
}
