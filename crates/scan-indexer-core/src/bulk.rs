//! Bulk ingestion engine.
//!
//! Streams records of one record type into one index in batches of at
//! most `bulk_size` operations. Each record is written under its own `id`,
//! so re-ingesting a record overwrites the existing document instead of
//! duplicating it.
//!
//! Consistency model: a batch is one bulk call. If the store reports a
//! failed item the batch is considered failed and ingestion stops, but
//! other items of that batch (and earlier batches) may already be written.
//! There is no cross-batch atomicity.

use tracing::{debug, error, info};

use crate::models::Record;
use crate::store::{BulkOperation, Store, StoreError};

/// Default number of records per bulk call.
pub const DEFAULT_BULK_SIZE: usize = 1200;

/// Failure while writing a record stream.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("bulk write to index '{index}' failed: {detail}")]
    BulkWrite { index: String, detail: String },
}

impl IngestError {
    pub fn is_connection(&self) -> bool {
        matches!(self, IngestError::Store(e) if e.is_connection())
    }
}

/// Outcome of ingesting one record stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub index: String,
    pub records: usize,
    pub batches: usize,
}

/// Writes record streams to a [`Store`] in bounded batches.
pub struct BulkIngester<'a, S: Store + ?Sized> {
    store: &'a S,
    bulk_size: usize,
    log_data_inserts: bool,
}

impl<'a, S: Store + ?Sized> BulkIngester<'a, S> {
    /// A `bulk_size` of zero is treated as one.
    pub fn new(store: &'a S, bulk_size: usize) -> Self {
        Self {
            store,
            bulk_size: bulk_size.max(1),
            log_data_inserts: false,
        }
    }

    /// Log every document at debug level as it is queued.
    pub fn log_data_inserts(mut self, enabled: bool) -> Self {
        self.log_data_inserts = enabled;
        self
    }

    pub fn bulk_size(&self) -> usize {
        self.bulk_size
    }

    /// Write every record to `index`, then refresh the index so later
    /// queries observe the new documents.
    pub async fn ingest<'r, I>(&self, index: &str, records: I) -> Result<IngestReport, IngestError>
    where
        I: IntoIterator<Item = &'r Record>,
    {
        let mut report = IngestReport {
            index: index.to_string(),
            ..IngestReport::default()
        };
        let mut batch: Vec<BulkOperation> = Vec::new();

        for record in records {
            let document = record.to_document();
            if self.log_data_inserts {
                debug!(index, id = record.id(), document = %document, "Queued document");
            }
            batch.push(BulkOperation {
                index: index.to_string(),
                id: record.id().to_string(),
                document,
            });
            report.records += 1;

            if batch.len() >= self.bulk_size {
                self.flush(index, &mut batch).await?;
                report.batches += 1;
            }
        }

        if !batch.is_empty() {
            self.flush(index, &mut batch).await?;
            report.batches += 1;
        }

        self.store.refresh(index).await?;
        Ok(report)
    }

    async fn flush(&self, index: &str, batch: &mut Vec<BulkOperation>) -> Result<(), IngestError> {
        info!(index, entries = batch.len(), "Writing entries to index");
        let response = self.store.bulk(batch.as_slice()).await?;
        batch.clear();

        if let Some(item) = response.first_error() {
            let detail = item
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_default();
            error!(
                index,
                id = %item.id,
                status = item.status,
                failed = response.failed(),
                error = %detail,
                "Error while inserting data"
            );
            return Err(IngestError::BulkWrite {
                index: index.to_string(),
                detail,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use serde_json::json;

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| Record::new(format!("r{i}")).with_field("n", i))
            .collect()
    }

    async fn store_with(index: &str) -> InMemoryStore {
        let store = InMemoryStore::new();
        store.create_index(index, &json!({})).await.unwrap();
        store
    }

    #[tokio::test]
    async fn batches_are_bounded_and_remainder_flushed() {
        let store = store_with("finding_nmap_p").await;
        let recs = records(2500);
        let report = BulkIngester::new(&store, 1200)
            .ingest("finding_nmap_p", &recs)
            .await
            .unwrap();

        assert_eq!(store.bulk_call_sizes(), vec![1200, 1200, 100]);
        assert_eq!(report.records, 2500);
        assert_eq!(report.batches, 3);
        assert_eq!(store.count("finding_nmap_p", "*").await.unwrap(), 2500);
    }

    #[tokio::test]
    async fn exact_multiple_has_no_empty_tail() {
        let store = store_with("host_nmap_p").await;
        let recs = records(2400);
        BulkIngester::new(&store, 1200)
            .ingest("host_nmap_p", &recs)
            .await
            .unwrap();
        assert_eq!(store.bulk_call_sizes(), vec![1200, 1200]);
    }

    #[tokio::test]
    async fn batch_count_is_ceiling_of_n_over_threshold() {
        for (n, threshold) in [(1, 5), (5, 5), (6, 5), (17, 4), (100, 7)] {
            let store = store_with("i").await;
            let recs = records(n);
            BulkIngester::new(&store, threshold)
                .ingest("i", &recs)
                .await
                .unwrap();
            let sizes = store.bulk_call_sizes();
            assert_eq!(sizes.len(), n.div_ceil(threshold), "n={n} t={threshold}");
            assert!(sizes.iter().all(|s| *s <= threshold));
            let tail = if n % threshold == 0 { threshold } else { n % threshold };
            assert_eq!(*sizes.last().unwrap(), tail);
        }
    }

    #[tokio::test]
    async fn empty_stream_makes_no_bulk_calls() {
        let store = store_with("cipher_nmap_p").await;
        let report = BulkIngester::new(&store, 10)
            .ingest("cipher_nmap_p", std::iter::empty::<&Record>())
            .await
            .unwrap();
        assert!(store.bulk_call_sizes().is_empty());
        assert_eq!(report.batches, 0);
    }

    #[tokio::test]
    async fn reingest_same_id_keeps_one_document() {
        let store = store_with("finding_nessus_p").await;
        let rec = Record::new("same").with_field("plugin_id", "10107");
        let ingester = BulkIngester::new(&store, 10);
        ingester.ingest("finding_nessus_p", [&rec]).await.unwrap();
        ingester.ingest("finding_nessus_p", [&rec]).await.unwrap();
        assert_eq!(store.count("finding_nessus_p", "*").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn item_error_fails_the_batch() {
        let store = store_with("service_nmap_p").await;
        store.reject_id("r3");
        let recs = records(10);
        let err = BulkIngester::new(&store, 4)
            .ingest("service_nmap_p", &recs)
            .await
            .unwrap_err();

        match err {
            IngestError::BulkWrite { index, detail } => {
                assert_eq!(index, "service_nmap_p");
                assert!(detail.contains("mapper_parsing_exception"));
            }
            other => panic!("unexpected error: {other}"),
        }
        // First batch partially written, later batches never sent.
        assert_eq!(store.bulk_call_sizes(), vec![4]);
        assert!(store.document("service_nmap_p", "r0").is_some());
    }

    #[tokio::test]
    async fn connection_failure_is_flagged() {
        let store = store_with("i").await;
        store.set_unreachable(true);
        let recs = records(3);
        let err = BulkIngester::new(&store, 2)
            .ingest("i", &recs)
            .await
            .unwrap_err();
        assert!(err.is_connection());
    }

    #[test]
    fn zero_bulk_size_is_clamped() {
        let store = InMemoryStore::new();
        assert_eq!(BulkIngester::new(&store, 0).bulk_size(), 1);
    }
}
