//! # Traffic Engine
//!
//! Run orchestration: segments the road network once, then turns a
//! [`SampleStore`] into a [`Timeline`].
//!
//! ## Architecture
//!
//! - The segmented network is built at construction and shared read-only
//!   (`Arc`) with every run.
//! - Each time bucket is an independent unit of work: it builds its own
//!   spatial index, matches every segment and aggregates the candidates.
//!   With the `parallel` feature buckets run on rayon's pool, otherwise
//!   sequentially.
//! - Bucket outcomes are handed back to the calling thread, ordered by
//!   timestamp and inserted into a [`TimelineBuilder`] one at a time. The
//!   builder is the only place results meet.
//! - A failing bucket is reported and skipped; the run carries on.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};

use crate::aggregator::{AggregatedSegmentState, Aggregator, ClassificationConfig};
use crate::matcher::{MatchConfig, SegmentMatcher};
use crate::road_class::{FreeFlowModel, RoadClassifier};
use crate::samples::{SampleStore, TimeBucket};
use crate::segmenter::{Road, SegmentConfig, SegmentedNetwork};
use crate::timeline::{Timeline, TimelineBuilder};
use crate::{Result, TrafficError};

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for a [`TrafficEngine`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineConfig {
    /// Road segmentation.
    pub segment: SegmentConfig,

    /// Segment ↔ sample matching (radius and k).
    pub matcher: MatchConfig,

    /// Congestion thresholds.
    pub classification: ClassificationConfig,

    /// Road-class rule table.
    pub classifier: RoadClassifier,

    /// Modelled free-flow speeds per road class.
    pub free_flow: FreeFlowModel,

    /// Width of a time bucket in seconds.
    /// Default: 60
    pub bucket_width_secs: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            segment: SegmentConfig::default(),
            matcher: MatchConfig::default(),
            classification: ClassificationConfig::default(),
            classifier: RoadClassifier::default(),
            free_flow: FreeFlowModel::default(),
            bucket_width_secs: 60,
        }
    }
}

impl EngineConfig {
    /// Reject values no run can work with.
    pub fn validate(&self) -> Result<()> {
        self.segment.validate()?;
        self.matcher.validate()?;

        let c = &self.classification;
        if !(c.moderate_ratio >= 0.0 && c.moderate_ratio <= c.free_ratio && c.free_ratio.is_finite()) {
            return Err(TrafficError::InvalidConfig(format!(
                "thresholds must satisfy 0 <= moderate ({}) <= free ({})",
                c.moderate_ratio, c.free_ratio
            )));
        }

        for range in [self.free_flow.central, self.free_flow.medium, self.free_flow.peripheral] {
            if !(range.min_kmh > 0.0 && range.min_kmh <= range.max_kmh && range.max_kmh.is_finite()) {
                return Err(TrafficError::InvalidConfig(format!(
                    "free-flow range {}-{} km/h is invalid",
                    range.min_kmh, range.max_kmh
                )));
            }
        }

        if self.bucket_width_secs <= 0 {
            return Err(TrafficError::InvalidConfig(format!(
                "bucket width must be positive, got {}s",
                self.bucket_width_secs
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Run State & Reports
// ============================================================================

/// Lifecycle of a run. Bucket phases carry the bucket timestamp.
///
/// The network is segmented once, when the engine is built. `Segmenting`
/// appears in the trail of a full run as the stage that run builds on, and
/// is left out of a re-aggregation, which only replays matching and
/// aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RunPhase {
    Idle,
    Segmenting,
    Matching(i64),
    Aggregating(i64),
    Exporting,
    Done,
}

/// Shared run-level cancellation flag.
///
/// Clones observe the same flag. Buckets not yet started when the flag is
/// raised are reported as [`BucketStatus::Cancelled`]; buckets already
/// running finish and are kept whole.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// How a bucket ended.
#[derive(Debug, Clone, PartialEq)]
pub enum BucketStatus {
    /// Matched and aggregated; `estimates` segments got a state.
    Completed { estimates: usize, unmatched: usize },
    /// Failed in `phase`; nothing from this bucket is in the timeline.
    Failed { phase: RunPhase, error: TrafficError },
    /// Skipped because the run was cancelled first.
    Cancelled,
}

/// Per-bucket outcome of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketReport {
    pub timestamp: i64,
    pub sample_count: usize,
    pub status: BucketStatus,
}

impl BucketReport {
    pub fn is_completed(&self) -> bool {
        matches!(self.status, BucketStatus::Completed { .. })
    }
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub timeline: Timeline,
    /// One entry per bucket, in timestamp order
    pub buckets: Vec<BucketReport>,
    /// Roads that could not be segmented
    pub road_failures: Vec<TrafficError>,
    /// Phase trail of the run
    pub phases: Vec<RunPhase>,
}

impl RunReport {
    pub fn completed(&self) -> usize {
        self.buckets.iter().filter(|b| b.is_completed()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &BucketReport> + '_ {
        self.buckets
            .iter()
            .filter(|b| matches!(b.status, BucketStatus::Failed { .. }))
    }

    pub fn cancelled(&self) -> usize {
        self.buckets
            .iter()
            .filter(|b| b.status == BucketStatus::Cancelled)
            .count()
    }

    /// Total segment estimates across completed buckets.
    pub fn matched_segments(&self) -> usize {
        self.buckets
            .iter()
            .map(|b| match b.status {
                BucketStatus::Completed { estimates, .. } => estimates,
                _ => 0,
            })
            .sum()
    }

    /// Total segment-buckets with no sample in range.
    pub fn unmatched_segments(&self) -> usize {
        self.buckets
            .iter()
            .map(|b| match b.status {
                BucketStatus::Completed { unmatched, .. } => unmatched,
                _ => 0,
            })
            .sum()
    }
}

/// Progress callback: `(buckets processed, total buckets)`.
///
/// Called from the worker that finished the bucket, so it may run on several
/// threads at once. Cancelled buckets are not counted.
pub type ProgressCallback = Arc<dyn Fn(u32, u32) + Send + Sync>;

/// Per-run state shared by every bucket worker.
struct RunContext<'a> {
    matcher: &'a SegmentMatcher,
    aggregator: Aggregator,
    cancel: &'a CancelToken,
    on_progress: Option<ProgressCallback>,
    processed: AtomicU32,
    total: u32,
}

impl RunContext<'_> {
    fn bucket_done(&self) {
        let processed = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(ref cb) = self.on_progress {
            cb(processed, self.total);
        }
    }
}

/// Result of one bucket worker before it is merged.
struct BucketOutcome {
    report: BucketReport,
    states: Vec<AggregatedSegmentState>,
    trail: Vec<RunPhase>,
}

// ============================================================================
// Traffic Engine
// ============================================================================

/// Segmented road network plus the configuration to run samples against it.
#[derive(Debug, Clone)]
pub struct TrafficEngine {
    network: Arc<SegmentedNetwork>,
    config: EngineConfig,
}

impl TrafficEngine {
    /// Validate `config` and segment `roads`.
    ///
    /// Malformed roads do not fail construction; they are listed in
    /// [`SegmentedNetwork::failures`] and in every [`RunReport`].
    pub fn new(roads: &[Road], config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let start = Instant::now();
        let network = SegmentedNetwork::build(roads, &config.segment, &config.classifier)?;
        info!(
            "[TrafficEngine] Network ready: {} segments in {:?}",
            network.len(),
            start.elapsed()
        );

        Ok(Self {
            network: Arc::new(network),
            config,
        })
    }

    pub fn network(&self) -> &Arc<SegmentedNetwork> {
        &self.network
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Empty sample store using the configured bucket width.
    pub fn sample_store(&self) -> Result<SampleStore> {
        SampleStore::new(self.config.bucket_width_secs)
    }

    /// Process every bucket in `store` with the configured matching.
    pub fn run(&self, store: &SampleStore) -> RunReport {
        self.run_with_cancel(store, &CancelToken::new())
    }

    /// Like [`run`](Self::run), stopping unscheduled buckets once `cancel` is raised.
    pub fn run_with_cancel(&self, store: &SampleStore, cancel: &CancelToken) -> RunReport {
        self.run_with_progress(store, cancel, None)
    }

    /// Like [`run_with_cancel`](Self::run_with_cancel), reporting each
    /// processed bucket to `on_progress`.
    pub fn run_with_progress(
        &self,
        store: &SampleStore,
        cancel: &CancelToken,
        on_progress: Option<ProgressCallback>,
    ) -> RunReport {
        let matcher = SegmentMatcher::new(self.config.matcher);
        self.execute(store, &matcher, cancel, on_progress, true)
    }

    /// Replay matching and aggregation with a different radius or k.
    ///
    /// The segmented network is reused as is.
    pub fn reaggregate(&self, store: &SampleStore, config: MatchConfig) -> Result<RunReport> {
        config.validate()?;
        info!(
            "[TrafficEngine] Re-aggregating with k={} radius={}m",
            config.k, config.max_radius
        );
        Ok(self.execute(store, &SegmentMatcher::new(config), &CancelToken::new(), None, false))
    }

    fn execute(
        &self,
        store: &SampleStore,
        matcher: &SegmentMatcher,
        cancel: &CancelToken,
        on_progress: Option<ProgressCallback>,
        full_run: bool,
    ) -> RunReport {
        let start = Instant::now();
        let buckets: Vec<&TimeBucket> = store.buckets().collect();
        let ctx = RunContext {
            matcher,
            aggregator: Aggregator::new(self.config.classification, self.config.free_flow),
            cancel,
            on_progress,
            processed: AtomicU32::new(0),
            total: buckets.len() as u32,
        };

        #[cfg(feature = "parallel")]
        let mut outcomes: Vec<BucketOutcome> = {
            use rayon::prelude::*;
            debug!("[TrafficEngine] Processing {} buckets in parallel", buckets.len());
            buckets
                .par_iter()
                .map(|bucket| self.process_bucket(bucket, &ctx))
                .collect()
        };

        #[cfg(not(feature = "parallel"))]
        let mut outcomes: Vec<BucketOutcome> = {
            debug!("[TrafficEngine] Processing {} buckets sequentially", buckets.len());
            buckets
                .iter()
                .map(|bucket| self.process_bucket(bucket, &ctx))
                .collect()
        };

        outcomes.sort_by_key(|o| o.report.timestamp);

        let mut phases = vec![RunPhase::Idle];
        if full_run {
            phases.push(RunPhase::Segmenting);
        }
        let mut builder = TimelineBuilder::new(Arc::clone(&self.network));
        let mut reports = Vec::with_capacity(outcomes.len());

        for outcome in outcomes {
            let BucketOutcome { mut report, states, trail } = outcome;
            phases.extend(trail);

            if report.is_completed() {
                if let Err(error) = builder.insert(report.timestamp, states) {
                    warn!("[TrafficEngine] Bucket {} dropped: {}", report.timestamp, error);
                    report.status = BucketStatus::Failed {
                        phase: RunPhase::Exporting,
                        error,
                    };
                }
            }
            reports.push(report);
        }

        phases.push(RunPhase::Exporting);
        let timeline = builder.finish();
        phases.push(RunPhase::Done);

        let report = RunReport {
            timeline,
            buckets: reports,
            road_failures: self.network.failures().to_vec(),
            phases,
        };

        info!(
            "[TrafficEngine] Run finished in {:?}: {} buckets ({} completed, {} failed, {} cancelled), {} segment estimates",
            start.elapsed(),
            report.buckets.len(),
            report.completed(),
            report.failed().count(),
            report.cancelled(),
            report.matched_segments()
        );

        report
    }

    /// Match and aggregate one bucket. Shares nothing mutable with other buckets.
    fn process_bucket(&self, bucket: &TimeBucket, ctx: &RunContext<'_>) -> BucketOutcome {
        let timestamp = bucket.timestamp;
        let sample_count = bucket.samples.len();

        if ctx.cancel.is_cancelled() {
            return BucketOutcome {
                report: BucketReport { timestamp, sample_count, status: BucketStatus::Cancelled },
                states: Vec::new(),
                trail: Vec::new(),
            };
        }

        let matches = match ctx.matcher.match_bucket(self.network.segments(), bucket) {
            Ok(matches) => matches,
            Err(error) => {
                warn!("[TrafficEngine] Bucket {} failed: {}", timestamp, error);
                ctx.bucket_done();
                return BucketOutcome {
                    report: BucketReport {
                        timestamp,
                        sample_count,
                        status: BucketStatus::Failed {
                            phase: RunPhase::Matching(timestamp),
                            error,
                        },
                    },
                    states: Vec::new(),
                    trail: vec![RunPhase::Matching(timestamp)],
                };
            }
        };

        let states: Vec<AggregatedSegmentState> = matches
            .matched
            .iter()
            .filter_map(|(segment, candidates)| ctx.aggregator.aggregate(segment, timestamp, candidates))
            .collect();
        ctx.bucket_done();

        BucketOutcome {
            report: BucketReport {
                timestamp,
                sample_count,
                status: BucketStatus::Completed {
                    estimates: states.len(),
                    unmatched: matches.unmatched,
                },
            },
            states,
            trail: vec![RunPhase::Matching(timestamp), RunPhase::Aggregating(timestamp)],
        }
    }
}
