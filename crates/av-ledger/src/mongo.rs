use async_trait::async_trait;
use av_model::{Event, EventId, Host, LedgerError, ModuleDescriptor, ModulesForVuln, VerificationRecord};
use bson::doc;
use futures::TryStreamExt;
use mongodb::options::FindOneOptions;
use mongodb::{Client, Collection, Database};
use parking_lot::Mutex;

use crate::model::VulnVerification;
use crate::trait_def::RunLedger;

const COLL_CACHED_EVENTS: &str = "cached_events";
const COLL_EVENTS_QUEUE: &str = "events";
const COLL_EXEC_STATS: &str = "arf_exec_stats";
const COLL_CACHED_VULNS: &str = "cached_vulns";
const COLL_CACHED_MODULES: &str = "cached_modules";
const COLL_VULN_VERIFICATION: &str = "vuln_verification";
const COLL_REPORT_DATA: &str = "cached_report_data";
const COLL_CVSS_SCORES: &str = "cached_cvss_scores";

/// MongoDB-backed implementation of the run ledger, using one collection per cache named
/// after the original table constants (§6).
pub struct MongoLedger {
    db: Database,
    next_event_id: Mutex<u64>,
}

impl MongoLedger {
    pub async fn connect(host: &str, port: u16, db_name: &str) -> Result<Self, LedgerError> {
        let uri = format!("mongodb://{host}:{port}");
        let client = Client::with_uri_str(&uri)
            .await
            .map_err(|e| LedgerError::Connection(e.to_string()))?;
        let db = client.database(db_name);
        Ok(Self {
            db,
            next_event_id: Mutex::new(0),
        })
    }

    fn events(&self) -> Collection<Event> {
        self.db.collection(COLL_CACHED_EVENTS)
    }
    fn queue(&self) -> Collection<Event> {
        self.db.collection(COLL_EVENTS_QUEUE)
    }
    fn exec_stats(&self) -> Collection<VerificationRecord> {
        self.db.collection(COLL_EXEC_STATS)
    }
    fn vulns(&self) -> Collection<ModulesForVuln> {
        self.db.collection(COLL_CACHED_VULNS)
    }
    fn modules(&self) -> Collection<ModuleDescriptor> {
        self.db.collection(COLL_CACHED_MODULES)
    }
    fn vuln_verification(&self) -> Collection<VulnVerification> {
        self.db.collection(COLL_VULN_VERIFICATION)
    }
    fn report_data(&self) -> Collection<serde_json::Value> {
        self.db.collection(COLL_REPORT_DATA)
    }
    fn cvss(&self) -> Collection<bson::Document> {
        self.db.collection(COLL_CVSS_SCORES)
    }
}

fn op(e: mongodb::error::Error) -> LedgerError {
    LedgerError::Operation(e.to_string())
}

#[async_trait]
impl RunLedger for MongoLedger {
    async fn clear_run_caches(&self) -> Result<(), LedgerError> {
        self.events().delete_many(doc! {}).await.map_err(op)?;
        self.vulns().delete_many(doc! {}).await.map_err(op)?;
        self.modules().delete_many(doc! {}).await.map_err(op)?;
        self.report_data().delete_many(doc! {}).await.map_err(op)?;
        self.cvss().delete_many(doc! {}).await.map_err(op)?;
        Ok(())
    }

    async fn cache_event(&self, mut event: Event) -> Result<Event, LedgerError> {
        let mut next = self.next_event_id.lock();
        event.id = EventId(*next);
        *next += 1;
        self.events().insert_one(&event).await.map_err(op)?;
        Ok(event)
    }

    async fn get_cached_events(&self) -> Result<Vec<Event>, LedgerError> {
        let cursor = self.events().find(doc! {}).await.map_err(op)?;
        cursor.try_collect().await.map_err(op)
    }

    async fn poll_unprocessed_events(&self) -> Result<Vec<Event>, LedgerError> {
        let cursor = self.queue().find(doc! {}).await.map_err(op)?;
        let batch: Vec<Event> = cursor.try_collect().await.map_err(op)?;
        let ids: Vec<_> = batch.iter().map(|e| e.id.0 as i64).collect();
        if !ids.is_empty() {
            self.queue()
                .delete_many(doc! { "id.0": { "$in": ids } })
                .await
                .map_err(op)?;
        }
        Ok(batch)
    }

    async fn cache_modules(&self, modules: Vec<ModuleDescriptor>) -> Result<(), LedgerError> {
        if !modules.is_empty() {
            self.modules().insert_many(&modules).await.map_err(op)?;
        }
        Ok(())
    }

    async fn get_cached_modules(&self) -> Result<Vec<ModuleDescriptor>, LedgerError> {
        let cursor = self.modules().find(doc! {}).await.map_err(op)?;
        cursor.try_collect().await.map_err(op)
    }

    async fn cache_vulns(&self, vulns: Vec<ModulesForVuln>) -> Result<(), LedgerError> {
        if !vulns.is_empty() {
            self.vulns().insert_many(&vulns).await.map_err(op)?;
        }
        Ok(())
    }

    async fn get_cached_vulns(&self) -> Result<Vec<ModulesForVuln>, LedgerError> {
        let cursor = self.vulns().find(doc! {}).await.map_err(op)?;
        cursor.try_collect().await.map_err(op)
    }

    async fn admit_verification(&self, record: VerificationRecord) -> Result<(), LedgerError> {
        self.exec_stats().insert_one(&record).await.map_err(op)?;
        Ok(())
    }

    async fn conclude_verification(&self, record: VerificationRecord) -> Result<(), LedgerError> {
        let filter = doc! { "event_id.0": record.event_id.0 as i64 };
        self.exec_stats()
            .replace_one(filter, &record)
            .with_options(mongodb::options::ReplaceOptions::builder().upsert(true).build())
            .await
            .map_err(op)?;
        Ok(())
    }

    async fn get_verification_data(&self) -> Result<Vec<VerificationRecord>, LedgerError> {
        let cursor = self.exec_stats().find(doc! {}).await.map_err(op)?;
        cursor.try_collect().await.map_err(op)
    }

    async fn most_recent_vuln_verification(
        &self,
        host: &Host,
        cves: &[String],
    ) -> Result<Option<VulnVerification>, LedgerError> {
        let filter = doc! {
            "host.address": host.address.to_string(),
            "host.port": host.port as i32,
            "cves": { "$in": cves },
        };
        let options = FindOneOptions::builder()
            .sort(doc! { "verified_at": -1 })
            .build();
        self.vuln_verification()
            .find_one(filter)
            .with_options(options)
            .await
            .map_err(op)
    }

    async fn insert_vuln_verification(&self, record: VulnVerification) -> Result<(), LedgerError> {
        self.vuln_verification().insert_one(&record).await.map_err(op)?;
        Ok(())
    }

    async fn prune_vuln_verifications(&self, threshold_secs: i64) -> Result<usize, LedgerError> {
        let cutoff = chrono::Utc::now() - chrono::Duration::seconds(threshold_secs);
        let result = self
            .vuln_verification()
            .delete_many(doc! { "verified_at": { "$lt": bson::DateTime::from_chrono(cutoff) } })
            .await
            .map_err(op)?;
        Ok(result.deleted_count as usize)
    }

    async fn get_cached_cvss(&self, cve: &str) -> Result<Option<Option<f64>>, LedgerError> {
        let found = self
            .cvss()
            .find_one(doc! { "cve": cve })
            .await
            .map_err(op)?;
        Ok(found.map(|d| d.get_f64("score").ok()))
    }

    async fn cache_cvss(&self, cve: &str, score: Option<f64>) -> Result<(), LedgerError> {
        let mut document = doc! { "cve": cve };
        if let Some(s) = score {
            document.insert("score", s);
        }
        self.cvss()
            .replace_one(doc! { "cve": cve }, document)
            .with_options(mongodb::options::ReplaceOptions::builder().upsert(true).build())
            .await
            .map_err(op)?;
        Ok(())
    }

    async fn write_report_data(&self, rows: Vec<serde_json::Value>) -> Result<(), LedgerError> {
        if !rows.is_empty() {
            self.report_data().insert_many(&rows).await.map_err(op)?;
        }
        Ok(())
    }

    async fn get_report_data(&self) -> Result<Vec<serde_json::Value>, LedgerError> {
        let cursor = self.report_data().find(doc! {}).await.map_err(op)?;
        cursor.try_collect().await.map_err(op)
    }
}
