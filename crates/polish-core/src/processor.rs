//! Fragment processor
//!
//! Each worker runs one processor over its fragment:
//! 1. Resume from the fragment's checkpoint, or start at offset 0
//! 2. Enhance the remaining records strictly in order
//! 3. Flush a checkpoint every `checkpoint_interval` records
//! 4. Mark the checkpoint completed with a final flush
//!
//! Records below the checkpoint offset are never sent again. Dropping the
//! `process` future abandons the in-flight call; only flushed records survive.
//!
//! Checkpoint and heartbeat writes fsync, so they run on tokio's blocking
//! pool and never stall the other fragments sharing the runtime.

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::enhancer::Enhancer;
use crate::error::{PipelineError, Result};
use crate::inference::InferenceClient;
use crate::record::{Fragment, FragmentId};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Records between checkpoint flushes
    pub checkpoint_interval: usize,
    /// Pause between inference calls
    pub request_delay: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: 100,
            request_delay: Duration::from_millis(100),
        }
    }
}

/// What a `process` call did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSummary {
    pub fragment_id: FragmentId,
    pub total: usize,
    /// Offset the run resumed at
    pub resumed_from: usize,
    /// Records enhanced (or error-marked) by this run
    pub newly_processed: usize,
    pub error_count: usize,
}

impl ProcessSummary {
    fn from_checkpoint(checkpoint: &Checkpoint, resumed_from: usize) -> Self {
        Self {
            fragment_id: checkpoint.fragment_id,
            total: checkpoint.total,
            resumed_from,
            newly_processed: checkpoint.processed - resumed_from,
            error_count: checkpoint.error_count,
        }
    }
}

pub struct FragmentProcessor<C> {
    enhancer: Enhancer<C>,
    store: CheckpointStore,
    config: ProcessorConfig,
}

impl<C: InferenceClient> FragmentProcessor<C> {
    pub fn new(enhancer: Enhancer<C>, store: CheckpointStore, config: ProcessorConfig) -> Self {
        Self {
            enhancer,
            store,
            config,
        }
    }

    /// Process the fragment to completion, resuming from its checkpoint
    ///
    /// Fails only when the final flush cannot be written; the fragment is then
    /// left incomplete and the next run resumes from the last good flush.
    pub async fn process(&self, fragment: &Fragment) -> Result<ProcessSummary> {
        let id = fragment.fragment_id;
        let existing = self.resume_point(fragment);

        if let Some(done) = existing.as_ref().filter(|c| c.completed) {
            info!(
                fragment_id = %id,
                total = done.total,
                errors = done.error_count,
                "Fragment already complete"
            );
            return Ok(ProcessSummary::from_checkpoint(done, done.processed));
        }

        let mut checkpoint = existing.unwrap_or_else(|| Checkpoint::new(fragment));
        let resumed_from = checkpoint.processed;

        if resumed_from > 0 {
            info!(
                fragment_id = %id,
                processed = resumed_from,
                remaining = checkpoint.remaining(),
                total = fragment.len(),
                "Resuming from checkpoint"
            );
        } else {
            info!(fragment_id = %id, total = fragment.len(), "Starting fragment");
            checkpoint.touch();
            if let Err(e) = self.save(&checkpoint).await {
                warn!(fragment_id = %id, error = %e, "Could not write initial checkpoint");
            }
        }

        let interval = self.config.checkpoint_interval.max(1);
        let remaining = &fragment.records[resumed_from..];

        for (position, record) in remaining.iter().enumerate() {
            let enhanced = self.enhancer.enhance(record).await;
            checkpoint.push(enhanced);

            if let Err(e) = self.beat(id, checkpoint.processed).await {
                debug!(fragment_id = %id, error = %e, "Heartbeat write failed");
            }

            if checkpoint.processed % interval == 0 && checkpoint.processed < checkpoint.total {
                self.flush(&mut checkpoint).await;
            }

            let is_last = position + 1 == remaining.len();
            if !is_last && !self.config.request_delay.is_zero() {
                tokio::time::sleep(self.config.request_delay).await;
            }
        }

        checkpoint.finish();
        self.save(&checkpoint).await?;

        info!(
            fragment_id = %id,
            processed = checkpoint.processed,
            total = checkpoint.total,
            errors = checkpoint.error_count,
            "Fragment complete"
        );
        Ok(ProcessSummary::from_checkpoint(&checkpoint, resumed_from))
    }

    /// Periodic flush; a failure is retried at the next flush point
    async fn flush(&self, checkpoint: &mut Checkpoint) {
        checkpoint.touch();
        match self.save(checkpoint).await {
            Ok(()) => info!(
                fragment_id = %checkpoint.fragment_id,
                processed = checkpoint.processed,
                total = checkpoint.total,
                "Processed {}/{}",
                checkpoint.processed,
                checkpoint.total
            ),
            Err(e) => warn!(
                fragment_id = %checkpoint.fragment_id,
                processed = checkpoint.processed,
                error = %e,
                "Checkpoint flush failed, retrying at next flush"
            ),
        }
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let store = self.store.clone();
        let snapshot = checkpoint.clone();
        let path = self.store.path(checkpoint.fragment_id);
        tokio::task::spawn_blocking(move || store.save(&snapshot))
            .await
            .map_err(|e| PipelineError::Io {
                path,
                source: std::io::Error::other(e),
            })?
    }

    async fn beat(&self, id: FragmentId, processed: usize) -> Result<()> {
        let store = self.store.clone();
        let path = self.store.heartbeat_path(id);
        tokio::task::spawn_blocking(move || store.beat(id, processed))
            .await
            .map_err(|e| PipelineError::Io {
                path,
                source: std::io::Error::other(e),
            })?
    }

    fn resume_point(&self, fragment: &Fragment) -> Option<Checkpoint> {
        let checkpoint = self.store.load(fragment.fragment_id)?;
        if checkpoint.matches(fragment) {
            return Some(checkpoint);
        }
        warn!(
            fragment_id = %fragment.fragment_id,
            checkpoint_total = checkpoint.total,
            fragment_total = fragment.len(),
            "Checkpoint does not match fragment, starting over"
        );
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::InferenceError;
    use crate::inference::GenerationRequest;
    use crate::record::{Record, RecordOutcome};
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Uppercases the original text; fails for texts listed in `fail_on`
    #[derive(Default)]
    struct Upper {
        calls: AtomicUsize,
        fail_on: Vec<String>,
    }

    #[async_trait]
    impl InferenceClient for Upper {
        async fn generate(&self, request: &GenerationRequest) -> std::result::Result<String, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on.iter().any(|t| request.prompt == *t) {
                return Err(InferenceError::Connection("refused".into()));
            }
            Ok(request.prompt.to_uppercase())
        }
    }

    fn fragment(len: usize) -> Fragment {
        Fragment {
            fragment_id: FragmentId::new(1),
            start_index: 0,
            records: (0..len)
                .map(|i| Record {
                    original_index: i,
                    payload: json!({"output": format!("r{}", i)}),
                })
                .collect(),
        }
    }

    fn processor(client: Arc<Upper>, dir: &TempDir, interval: usize) -> FragmentProcessor<Arc<Upper>> {
        let enhancer = Enhancer::new(client)
            .with_template(crate::prompt::PromptTemplate::new("{original}").unwrap())
            .with_retry(RetryPolicy::immediate(2));
        FragmentProcessor::new(
            enhancer,
            CheckpointStore::new(dir.path()),
            ProcessorConfig {
                checkpoint_interval: interval,
                request_delay: Duration::ZERO,
            },
        )
    }

    #[tokio::test]
    async fn test_process_enhances_every_record() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(Upper::default());
        let fragment = fragment(7);

        let summary = processor(client.clone(), &dir, 3).process(&fragment).await.unwrap();

        assert_eq!(summary.newly_processed, 7);
        assert_eq!(summary.resumed_from, 0);
        let checkpoint = CheckpointStore::new(dir.path()).load(FragmentId::new(1)).unwrap();
        assert!(checkpoint.completed);
        assert_eq!(checkpoint.records[6].payload["output"], "R6");
        assert_eq!(client.calls.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_completed_fragment_is_not_reprocessed() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(Upper::default());
        let fragment = fragment(4);
        let processor = processor(client.clone(), &dir, 2);

        processor.process(&fragment).await.unwrap();
        let again = processor.process(&fragment).await.unwrap();

        assert_eq!(again.newly_processed, 0);
        assert_eq!(client.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_resume_skips_flushed_records() {
        let dir = TempDir::new().unwrap();
        let fragment = fragment(5);
        let store = CheckpointStore::new(dir.path());

        let mut partial = Checkpoint::new(&fragment);
        for record in &fragment.records[..3] {
            partial.push(crate::record::FieldMapping::default().enhanced(record, "done".into()));
        }
        store.save(&partial).unwrap();

        let client = Arc::new(Upper::default());
        let summary = processor(client.clone(), &dir, 2).process(&fragment).await.unwrap();

        assert_eq!(summary.resumed_from, 3);
        assert_eq!(summary.newly_processed, 2);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
        let checkpoint = store.load(FragmentId::new(1)).unwrap();
        assert_eq!(checkpoint.records[0].payload["output"], "done");
        assert_eq!(checkpoint.records[4].payload["output"], "R4");
    }

    #[tokio::test]
    async fn test_failed_record_does_not_abort_fragment() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(Upper {
            fail_on: vec!["r2".to_string()],
            ..Default::default()
        });

        let summary = processor(client, &dir, 10).process(&fragment(4)).await.unwrap();

        assert_eq!(summary.error_count, 1);
        let checkpoint = CheckpointStore::new(dir.path()).load(FragmentId::new(1)).unwrap();
        assert!(checkpoint.completed);
        assert_eq!(
            checkpoint.records[2].outcome,
            RecordOutcome::Failed {
                error: "connection failed: refused".to_string()
            }
        );
        assert_eq!(checkpoint.records[2].payload["output"], "r2");
        assert_eq!(checkpoint.records[3].payload["output"], "R3");
    }

    #[tokio::test]
    async fn test_mismatched_checkpoint_starts_over() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        let stale = fragment(3);
        let mut checkpoint = Checkpoint::new(&stale);
        checkpoint.push(crate::record::FieldMapping::default().enhanced(&stale.records[0], "old".into()));
        store.save(&checkpoint).unwrap();

        let client = Arc::new(Upper::default());
        let summary = processor(client.clone(), &dir, 10).process(&fragment(5)).await.unwrap();

        assert_eq!(summary.resumed_from, 0);
        assert_eq!(client.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_empty_fragment_completes_immediately() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(Upper::default());

        let summary = processor(client.clone(), &dir, 10).process(&fragment(0)).await.unwrap();

        assert_eq!(summary.total, 0);
        assert!(CheckpointStore::new(dir.path()).load(FragmentId::new(1)).unwrap().completed);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_final_flush_is_an_error() {
        let dir = TempDir::new().unwrap();
        // A file where the checkpoint directory should be
        let blocked = dir.path().join("results");
        std::fs::write(&blocked, b"not a directory").unwrap();

        let enhancer = Enhancer::new(Arc::new(Upper::default())).with_retry(RetryPolicy::immediate(1));
        let processor = FragmentProcessor::new(
            enhancer,
            CheckpointStore::new(&blocked),
            ProcessorConfig {
                checkpoint_interval: 1,
                request_delay: Duration::ZERO,
            },
        );

        let err = processor.process(&fragment(2)).await.unwrap_err();
        assert!(matches!(err, crate::error::PipelineError::Io { .. }));
    }

    /// Replaces the results directory with a plain file while it handles `r1`
    /// and puts the directory back at `r3`; records what was durable at `r4`
    struct BlocksResultsDir {
        results: PathBuf,
        durable_at_r4: Mutex<Option<Option<usize>>>,
    }

    #[async_trait]
    impl InferenceClient for BlocksResultsDir {
        async fn generate(&self, request: &GenerationRequest) -> std::result::Result<String, InferenceError> {
            match request.prompt.as_str() {
                "r1" => {
                    std::fs::remove_dir_all(&self.results).unwrap();
                    std::fs::write(&self.results, b"not a directory").unwrap();
                },
                "r3" => {
                    std::fs::remove_file(&self.results).unwrap();
                    std::fs::create_dir(&self.results).unwrap();
                },
                "r4" => {
                    let durable = CheckpointStore::new(&self.results)
                        .load(FragmentId::new(1))
                        .map(|c| c.processed);
                    *self.durable_at_r4.lock().unwrap() = Some(durable);
                },
                _ => {},
            }
            Ok(request.prompt.to_uppercase())
        }
    }

    #[tokio::test]
    async fn test_failed_periodic_flush_is_retried_at_next_flush() {
        let dir = TempDir::new().unwrap();
        let results = dir.path().join("results");
        let client = Arc::new(BlocksResultsDir {
            results: results.clone(),
            durable_at_r4: Mutex::new(None),
        });
        let enhancer = Enhancer::new(client.clone())
            .with_template(crate::prompt::PromptTemplate::new("{original}").unwrap())
            .with_retry(RetryPolicy::immediate(1));
        let processor = FragmentProcessor::new(
            enhancer,
            CheckpointStore::new(&results),
            ProcessorConfig {
                checkpoint_interval: 2,
                request_delay: Duration::ZERO,
            },
        );

        // The flush after r1 fails; the one after r3 must carry r0..r3
        let summary = processor.process(&fragment(6)).await.unwrap();

        assert_eq!(summary.newly_processed, 6);
        assert_eq!(summary.error_count, 0);
        assert_eq!(*client.durable_at_r4.lock().unwrap(), Some(Some(4)));

        let checkpoint = CheckpointStore::new(&results).load(FragmentId::new(1)).unwrap();
        assert!(checkpoint.completed);
        assert_eq!(checkpoint.processed, 6);
        assert_eq!(checkpoint.records[1].payload["output"], "R1");
        assert_eq!(checkpoint.records[5].payload["output"], "R5");
    }
}
