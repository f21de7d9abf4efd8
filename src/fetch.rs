//! Parallel overview fetch orchestration
//!
//! A requested article-number range is partitioned into fixed-size chunks
//! and dispatched across a bounded worker set. Each worker leases one pooled
//! session, selects the group if needed, streams `XOVER` for its chunk, and
//! parses the lines into rows. Completed chunks drain in arrival order, so
//! callers must not assume monotonic `article_num` ordering on the way out.
//!
//! Transport failures retry per chunk with exponential backoff; chunks that
//! exhaust their retries are recorded and the run continues, so the caller
//! can re-run a narrower range. Persistence goes through a single writer
//! task draining a bounded queue, one transaction per chunk.

use crate::error::{exit_codes, IndexError, Result};
use crate::overview::{parse_overview_lines, OverviewRow, ParseTally};
use crate::pool::{NntpPool, RetryConfig};
use crate::store::{HeaderStore, UpsertStats};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Inclusive range of article numbers forming one XOVER request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    /// Lowest article number in the chunk
    pub low: u64,
    /// Highest article number in the chunk
    pub high: u64,
}

/// Partition `[low, high]` into chunks of `chunk_size` (last chunk shorter)
pub fn partition_chunks(low: u64, high: u64, chunk_size: u64) -> Vec<ChunkRange> {
    if low > high || chunk_size == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current = low;
    while current <= high {
        let chunk_high = current
            .saturating_add(chunk_size - 1)
            .min(high);
        chunks.push(ChunkRange {
            low: current,
            high: chunk_high,
        });
        if chunk_high == u64::MAX {
            break;
        }
        current = chunk_high + 1;
    }
    chunks
}

/// Source of raw overview lines for one chunk
///
/// The production implementation is [`PooledChunkSource`]; tests substitute
/// mocks that replay canned lines or inject failures.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// Fetch raw XOVER lines for an inclusive range within a group
    async fn fetch_overview(&self, group: &str, low: u64, high: u64) -> Result<Vec<String>>;
}

/// Chunk source backed by an [`NntpPool`]
///
/// Each call leases one session for the duration of the chunk. The session
/// keeps its selected group across leases, so repeat chunks for the same
/// group skip the GROUP round trip. A session that faults marks itself
/// broken and the pool discards it on return.
pub struct PooledChunkSource {
    pool: NntpPool,
}

impl PooledChunkSource {
    /// Wrap a pool as a chunk source
    pub fn new(pool: NntpPool) -> Self {
        Self { pool }
    }

    /// Resolve the server-side `(count, low, high)` for a group
    pub async fn group_info(&self, group: &str) -> Result<crate::commands::GroupInfo> {
        let mut conn = self.pool.get().await?;
        conn.select_group(group).await
    }
}

#[async_trait]
impl ChunkSource for PooledChunkSource {
    async fn fetch_overview(&self, group: &str, low: u64, high: u64) -> Result<Vec<String>> {
        let mut conn = self.pool.get().await?;
        conn.select_group(group).await?;
        conn.xover_lines(low, high).await
    }
}

/// Orchestrator tuning
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Articles per XOVER request
    pub chunk_size: u64,
    /// Parallel worker cap
    pub max_workers: usize,
    /// Per-chunk retry policy for transport failures
    pub retry: RetryConfig,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            chunk_size: 100_000,
            max_workers: 10,
            retry: RetryConfig::default(),
        }
    }
}

/// Progress snapshot reported after each completed chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchProgress {
    /// Chunks finished (including failed and cancelled ones)
    pub chunks_done: usize,
    /// Total chunks in this run
    pub chunks_total: usize,
    /// Rows parsed so far
    pub rows_so_far: u64,
}

/// Result of an in-memory fetch run
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Parsed rows, in chunk-arrival order
    pub rows: Vec<OverviewRow>,
    /// Chunks that exhausted their retries
    pub failed_chunks: Vec<ChunkRange>,
    /// Line-level parse counters
    pub tally: ParseTally,
    /// Whether the run stopped on cancellation
    pub cancelled: bool,
}

impl FetchOutcome {
    /// Exit code per the driver contract: 5 cancelled, 4 partial, 0 clean
    pub fn exit_code(&self) -> u8 {
        if self.cancelled {
            exit_codes::CANCELLED
        } else if !self.failed_chunks.is_empty() {
            exit_codes::PARTIAL_FAILURE
        } else {
            exit_codes::SUCCESS
        }
    }
}

/// Result of a fetch-and-persist run
#[derive(Debug, Default)]
pub struct IndexOutcome {
    /// Rows newly written to the store
    pub inserted: u64,
    /// Rows ignored as duplicates
    pub ignored: u64,
    /// Chunks that exhausted their retries
    pub failed_chunks: Vec<ChunkRange>,
    /// Line-level parse counters
    pub tally: ParseTally,
    /// Whether the run stopped on cancellation
    pub cancelled: bool,
}

impl IndexOutcome {
    /// Exit code per the driver contract: 5 cancelled, 4 partial, 0 clean
    pub fn exit_code(&self) -> u8 {
        if self.cancelled {
            exit_codes::CANCELLED
        } else if !self.failed_chunks.is_empty() {
            exit_codes::PARTIAL_FAILURE
        } else {
            exit_codes::SUCCESS
        }
    }
}

/// Outcome of one chunk after retries
enum ChunkResult {
    /// Rows parsed (possibly zero for a 423 range)
    Rows(Vec<OverviewRow>, ParseTally),
    /// Retries exhausted or non-retryable chunk error
    Failed,
    /// Skipped because cancellation was pending
    Cancelled,
    /// Error that must abort the whole run (auth rejection)
    Fatal(IndexError),
}

/// Parallel fetch orchestrator
pub struct Fetcher {
    options: FetchOptions,
    cancel: CancellationToken,
}

impl Fetcher {
    /// Create a fetcher with a fresh cancellation token
    pub fn new(options: FetchOptions) -> Self {
        Self {
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that cancels this fetcher's runs when triggered
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Fetch a range into memory
    ///
    /// `progress` is invoked after every completed chunk with
    /// `(chunks_done, chunks_total, rows_so_far)`. Rows come back in chunk
    /// arrival order, not article order.
    ///
    /// # Errors
    ///
    /// [`IndexError::AuthFailed`] aborts the run. Per-chunk transport
    /// failures do not; they land in `failed_chunks`.
    pub async fn fetch_range<S>(
        &self,
        source: Arc<S>,
        group: &str,
        low: u64,
        high: u64,
        mut progress: impl FnMut(FetchProgress),
    ) -> Result<FetchOutcome>
    where
        S: ChunkSource + 'static,
    {
        let mut outcome = FetchOutcome::default();
        let mut fatal: Option<IndexError> = None;

        let chunks = partition_chunks(low, high, self.options.chunk_size);
        let chunks_total = chunks.len();
        info!(
            "Fetching {} in {} chunks of up to {} articles ({} workers)",
            group, chunks_total, self.options.chunk_size, self.options.max_workers
        );

        let semaphore = Arc::new(Semaphore::new(self.options.max_workers.max(1)));
        let mut tasks: JoinSet<(ChunkRange, ChunkResult)> = JoinSet::new();

        for chunk in chunks {
            let source = source.clone();
            let group = group.to_string();
            let semaphore = semaphore.clone();
            let retry = self.options.retry.clone();
            let cancel = self.cancel.clone();

            tasks.spawn(async move {
                // Closed only when the JoinSet is dropped
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (chunk, ChunkResult::Cancelled);
                };
                let result = fetch_chunk(&*source, &group, chunk, &retry, &cancel).await;
                (chunk, result)
            });
        }

        let mut chunks_done = 0usize;
        while let Some(joined) = tasks.join_next().await {
            let (chunk, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("Worker task panicked: {}", e);
                    continue;
                }
            };

            chunks_done += 1;
            match result {
                ChunkResult::Rows(rows, tally) => {
                    outcome.tally.merge(tally);
                    outcome.rows.extend(rows);
                }
                ChunkResult::Failed => outcome.failed_chunks.push(chunk),
                ChunkResult::Cancelled => outcome.cancelled = true,
                ChunkResult::Fatal(e) => {
                    // Stop dispatching; in-flight chunks wind down as cancelled
                    self.cancel.cancel();
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                }
            }

            progress(FetchProgress {
                chunks_done,
                chunks_total,
                rows_so_far: outcome.rows.len() as u64,
            });
        }

        if let Some(e) = fatal {
            return Err(e);
        }
        if self.cancel.is_cancelled() {
            outcome.cancelled = true;
        }

        outcome.failed_chunks.sort_by_key(|c| c.low);
        Ok(outcome)
    }

    /// Fetch a range and persist it through a single writer
    ///
    /// Workers hand completed chunk buffers to a bounded queue (capacity =
    /// `max_workers`, providing backpressure); one writer task performs
    /// `upsert_batch` inside one transaction per chunk. A store failure
    /// cancels the run and propagates.
    pub async fn fetch_into_store<S>(
        &self,
        source: Arc<S>,
        store: &HeaderStore,
        group: &str,
        low: u64,
        high: u64,
        mut progress: impl FnMut(FetchProgress),
    ) -> Result<IndexOutcome>
    where
        S: ChunkSource + 'static,
    {
        let mut outcome = IndexOutcome::default();
        let mut fatal: Option<IndexError> = None;

        let chunks = partition_chunks(low, high, self.options.chunk_size);
        let chunks_total = chunks.len();
        info!(
            "Indexing {} in {} chunks of up to {} articles ({} workers)",
            group, chunks_total, self.options.chunk_size, self.options.max_workers
        );

        let (tx, mut rx) = mpsc::channel::<Vec<OverviewRow>>(self.options.max_workers.max(1));

        // Single writer: serializes all store writes, one transaction per chunk
        let writer_store = store.clone();
        let writer_cancel = self.cancel.clone();
        let writer = tokio::spawn(async move {
            let mut stats = UpsertStats::default();
            while let Some(rows) = rx.recv().await {
                match writer_store.upsert_batch(&rows).await {
                    Ok(batch) => stats.merge(batch),
                    Err(e) => {
                        warn!("Store write failed, cancelling run: {}", e);
                        writer_cancel.cancel();
                        return Err(e);
                    }
                }
            }
            Ok(stats)
        });

        let semaphore = Arc::new(Semaphore::new(self.options.max_workers.max(1)));
        let mut tasks: JoinSet<(ChunkRange, ChunkResult, u64)> = JoinSet::new();

        for chunk in chunks {
            let source = source.clone();
            let group = group.to_string();
            let semaphore = semaphore.clone();
            let retry = self.options.retry.clone();
            let cancel = self.cancel.clone();
            let tx = tx.clone();

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (chunk, ChunkResult::Cancelled, 0);
                };
                match fetch_chunk(&*source, &group, chunk, &retry, &cancel).await {
                    ChunkResult::Rows(rows, tally) => {
                        let count = rows.len() as u64;
                        // Queue full → backpressure; receiver gone → store
                        // already failed and the run is cancelling
                        if !rows.is_empty() && tx.send(rows).await.is_err() {
                            return (chunk, ChunkResult::Cancelled, 0);
                        }
                        (chunk, ChunkResult::Rows(Vec::new(), tally), count)
                    }
                    other => (chunk, other, 0),
                }
            });
        }
        drop(tx);

        let mut chunks_done = 0usize;
        let mut rows_so_far = 0u64;
        while let Some(joined) = tasks.join_next().await {
            let (chunk, result, row_count) = match joined {
                Ok(triple) => triple,
                Err(e) => {
                    warn!("Worker task panicked: {}", e);
                    continue;
                }
            };

            chunks_done += 1;
            rows_so_far += row_count;
            match result {
                ChunkResult::Rows(_, tally) => outcome.tally.merge(tally),
                ChunkResult::Failed => outcome.failed_chunks.push(chunk),
                ChunkResult::Cancelled => outcome.cancelled = true,
                ChunkResult::Fatal(e) => {
                    self.cancel.cancel();
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                }
            }

            progress(FetchProgress {
                chunks_done,
                chunks_total,
                rows_so_far,
            });
        }

        // Writer drains whatever is already queued before exiting
        match writer.await {
            Ok(Ok(stats)) => {
                outcome.inserted = stats.inserted;
                outcome.ignored = stats.ignored;
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(e) => {
                return Err(IndexError::Other(format!("Writer task failed: {}", e)));
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }
        if self.cancel.is_cancelled() {
            outcome.cancelled = true;
        }

        outcome.failed_chunks.sort_by_key(|c| c.low);
        info!(
            "Indexed {}: {} inserted, {} ignored, {} failed chunks, {} parse errors",
            group,
            outcome.inserted,
            outcome.ignored,
            outcome.failed_chunks.len(),
            outcome.tally.parse_errors
        );
        Ok(outcome)
    }
}

/// Fetch one chunk with the retry policy applied
///
/// `NoSuchRange` yields zero rows without retrying. Transport errors retry
/// with backoff until the policy is exhausted; auth rejection is fatal for
/// the whole run. Cancellation is checked between attempts.
async fn fetch_chunk<S: ChunkSource + ?Sized>(
    source: &S,
    group: &str,
    chunk: ChunkRange,
    retry: &RetryConfig,
    cancel: &CancellationToken,
) -> ChunkResult {
    for attempt in 0..=retry.max_retries {
        if cancel.is_cancelled() {
            return ChunkResult::Cancelled;
        }

        match source.fetch_overview(group, chunk.low, chunk.high).await {
            Ok(lines) => {
                let (rows, tally) = parse_overview_lines(group, &lines);
                debug!(
                    "Chunk {}-{}: {} lines, {} rows, {} parse errors",
                    chunk.low, chunk.high, lines.len(), rows.len(), tally.parse_errors
                );
                return ChunkResult::Rows(rows, tally);
            }
            Err(IndexError::NoSuchRange { low, high }) => {
                debug!("Chunk {}-{}: no articles in range (423)", low, high);
                return ChunkResult::Rows(Vec::new(), ParseTally::default());
            }
            Err(e @ IndexError::AuthFailed(_)) => {
                return ChunkResult::Fatal(e);
            }
            Err(IndexError::Cancelled) => {
                return ChunkResult::Cancelled;
            }
            Err(e) if !e.is_transport() => {
                warn!(
                    "Chunk {}-{} failed with non-retryable error: {}",
                    chunk.low, chunk.high, e
                );
                return ChunkResult::Failed;
            }
            Err(e) => {
                if attempt < retry.max_retries {
                    let delay = retry.backoff_delay(attempt);
                    warn!(
                        "Chunk {}-{} failed (attempt {}/{}), retrying in {:?}: {}",
                        chunk.low,
                        chunk.high,
                        attempt + 1,
                        retry.max_retries + 1,
                        delay,
                        e
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return ChunkResult::Cancelled,
                    }
                } else {
                    warn!(
                        "Chunk {}-{} failed after {} attempts: {}",
                        chunk.low,
                        chunk.high,
                        retry.max_retries + 1,
                        e
                    );
                }
            }
        }
    }

    // Cancellation pending swallows the failure; the range was not lost,
    // the run is being abandoned
    if cancel.is_cancelled() {
        ChunkResult::Cancelled
    } else {
        ChunkResult::Failed
    }
}
