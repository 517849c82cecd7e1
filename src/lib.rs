//! # Traffic Timeline
//!
//! Segment-level road speed estimation from sparse, noisy speed samples, and
//! time-indexed traffic playback.
//!
//! This library provides:
//! - Road network segmentation into bounded-length pieces
//! - Per-time-bucket spatial indexing of speed samples (R-tree, great-circle metric)
//! - Segment ↔ sample matching within a radius
//! - Speed aggregation and congestion classification per segment per bucket
//! - An ordered, replayable timeline of display-ready features
//!
//! ## Features
//!
//! - **`parallel`** (default) - One rayon worker per time bucket
//! - **`serde`** - `Serialize`/`Deserialize` on public data types
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use traffic_timeline::{EngineConfig, GpsPoint, Road, Sample, SampleStore, TrafficEngine};
//!
//! let roads = vec![Road::new(
//!     "проспект Абая",
//!     vec![GpsPoint::new(43.2400, 76.9500), GpsPoint::new(43.2400, 76.9520)],
//! )];
//! let engine = TrafficEngine::new(&roads, EngineConfig::default()).unwrap();
//!
//! let mut store = SampleStore::new(60).unwrap();
//! store.push(Sample::new(43.2401, 76.9505, 35.0, 1_714_608_000));
//! store.push(Sample::new(43.2399, 76.9515, 20.0, 1_714_608_000));
//!
//! let report = engine.run(&store);
//! for frame in report.timeline.frames() {
//!     for feature in &frame.features {
//!         println!("{} @ {}: {:?} ({})", feature.road_name, frame.timestamp,
//!             feature.speed, feature.tier.as_str());
//!     }
//! }
//! ```

use thiserror::Error;

pub mod geo_utils;

// Road network decomposition
pub mod segmenter;
pub use segmenter::{
    Road, RoadGeometry, RoadSegment, SegmentConfig, SegmentedNetwork, split_polyline,
};

// Road-class rule table and free-flow model
pub mod road_class;
pub use road_class::{ClassRule, FreeFlowModel, FreeFlowRange, RoadClassifier, RoadTier, RulePattern};

// Sample ingestion and time bucketing
pub mod samples;
pub use samples::{Sample, SampleFeed, SampleStore, SyntheticFeed, TimeBucket, snap_timestamp};

// Per-bucket nearest-neighbour index
pub mod spatial_index;
pub use spatial_index::{Neighbor, SpatialIndex};

// Segment → sample matching
pub mod matcher;
pub use matcher::{BucketMatches, Candidate, MatchConfig, SegmentMatcher};

// Speed aggregation and congestion tiers
pub mod aggregator;
pub use aggregator::{
    AggregatedSegmentState, Aggregator, ClassificationConfig, CongestionTier, FreeFlowSource,
};

// Ordered playback sequence
pub mod timeline;
pub use timeline::{Frames, PlaybackFrame, SegmentFeature, Timeline, TimelineBuilder, TimelineFrame};

// Run orchestration
pub mod engine;
pub use engine::{
    BucketReport, BucketStatus, CancelToken, EngineConfig, ProgressCallback, RunPhase, RunReport,
    TrafficEngine,
};

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude (WGS84 degrees).
///
/// # Example
/// ```
/// use traffic_timeline::GpsPoint;
/// let point = GpsPoint::new(43.2389, 76.8897); // Almaty
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Bounding box over a set of points.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from GPS points.
    pub fn from_points(points: &[GpsPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lng = f64::MAX;
        let mut max_lng = f64::MIN;

        for p in points {
            min_lat = min_lat.min(p.latitude);
            max_lat = max_lat.max(p.latitude);
            min_lng = min_lng.min(p.longitude);
            max_lng = max_lng.max(p.longitude);
        }

        Some(Self { min_lat, max_lat, min_lng, max_lng })
    }

    /// Grow these bounds to include `other`.
    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min_lat: self.min_lat.min(other.min_lat),
            max_lat: self.max_lat.max(other.max_lat),
            min_lng: self.min_lng.min(other.min_lng),
            max_lng: self.max_lng.max(other.max_lng),
        }
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> GpsPoint {
        GpsPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Failures raised by the engine.
///
/// Two outcomes are *not* errors: a segment with no samples in
/// range simply has no state for that bucket, and a low-confidence estimate is
/// reported through [`AggregatedSegmentState::low_confidence`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrafficError {
    /// A road polyline is degenerate (fewer than two points, zero length, or
    /// malformed coordinates).
    #[error("invalid geometry for road '{road}': {reason}")]
    InvalidGeometry { road: String, reason: String },

    /// A timeline insert did not advance past the last flushed bucket.
    #[error("timestamp {timestamp} is not after the last flushed bucket {last}")]
    OutOfOrderTimestamp { timestamp: i64, last: i64 },

    /// A sample in a bucket has a NaN or out-of-range coordinate.
    #[error("bucket {bucket}: sample #{index} has malformed coordinates ({latitude}, {longitude})")]
    IndexBuildFailure {
        bucket: i64,
        index: usize,
        latitude: f64,
        longitude: f64,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, TrafficError>;

// ============================================================================
// Tests
// ============================================================================
