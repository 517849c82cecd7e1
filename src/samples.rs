//! Speed samples, the feed abstraction, and time bucketing.
//!
//! Samples arrive through a [`SampleFeed`] (a live poller, replayed files, a
//! screenshot heuristic, or [`SyntheticFeed`]; the engine cannot tell them
//! apart) and are grouped by [`SampleStore`] into [`TimeBucket`]s keyed by a
//! snapped timestamp.

use std::collections::BTreeMap;

use log::debug;

use crate::road_class::{FreeFlowModel, RoadTier};
use crate::{GpsPoint, Result, TrafficError};

/// One speed observation.
///
/// Speeds are km/h, timestamps Unix seconds. Non-finite readings count as
/// missing.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sample {
    pub point: GpsPoint,
    pub speed: Option<f64>,
    pub free_flow_speed: Option<f64>,
    /// Source confidence, 0.0-1.0
    pub confidence: Option<f64>,
    pub timestamp: i64,
}

impl Sample {
    /// A sample with a current speed reading.
    pub fn new(latitude: f64, longitude: f64, speed: f64, timestamp: i64) -> Self {
        Self {
            point: GpsPoint::new(latitude, longitude),
            speed: Some(speed),
            free_flow_speed: None,
            confidence: None,
            timestamp,
        }
    }

    /// A sample whose source reported no current speed.
    pub fn without_speed(latitude: f64, longitude: f64, timestamp: i64) -> Self {
        Self {
            speed: None,
            ..Self::new(latitude, longitude, 0.0, timestamp)
        }
    }

    pub fn with_free_flow(mut self, free_flow_speed: f64) -> Self {
        self.free_flow_speed = Some(free_flow_speed);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Current speed, if present and finite.
    pub fn current_speed(&self) -> Option<f64> {
        self.speed.filter(|s| s.is_finite())
    }

    /// Free-flow speed, if present, finite and positive.
    pub fn reference_speed(&self) -> Option<f64> {
        self.free_flow_speed.filter(|s| s.is_finite() && *s > 0.0)
    }

    /// Confidence, if present and finite.
    pub fn confidence_value(&self) -> Option<f64> {
        self.confidence.filter(|c| c.is_finite())
    }
}

/// Source of observations.
pub trait SampleFeed {
    /// Drain every observation currently available.
    fn poll(&mut self) -> Vec<Sample>;
}

impl SampleFeed for Vec<Sample> {
    fn poll(&mut self) -> Vec<Sample> {
        std::mem::take(self)
    }
}

/// Snap a timestamp down to the start of its bucket.
///
/// Near `i64::MIN`, where the floored bucket start is not representable, the
/// lowest representable bucket start is returned instead.
///
/// # Example
/// ```
/// use traffic_timeline::snap_timestamp;
/// assert_eq!(snap_timestamp(125, 60), 120);
/// assert_eq!(snap_timestamp(-5, 60), -60);
/// ```
#[inline]
pub fn snap_timestamp(timestamp: i64, width_secs: i64) -> i64 {
    let bucket = timestamp.div_euclid(width_secs);
    bucket
        .checked_mul(width_secs)
        .unwrap_or_else(|| (bucket + 1) * width_secs)
}

/// Samples sharing one snapped timestamp, in ingestion order.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeBucket {
    pub timestamp: i64,
    pub samples: Vec<Sample>,
}

impl TimeBucket {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Time-bucketed sample collection.
///
/// # Example
/// ```
/// use traffic_timeline::{Sample, SampleStore};
///
/// let mut store = SampleStore::new(60).unwrap();
/// store.push(Sample::new(43.24, 76.95, 40.0, 3_600));
/// store.push(Sample::new(43.25, 76.96, 20.0, 3_659));
/// store.push(Sample::new(43.25, 76.96, 25.0, 3_660));
///
/// let keys: Vec<i64> = store.buckets().map(|b| b.timestamp).collect();
/// assert_eq!(keys, vec![3_600, 3_660]);
/// assert_eq!(store.sample_count(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct SampleStore {
    bucket_width: i64,
    buckets: BTreeMap<i64, TimeBucket>,
}

impl SampleStore {
    /// Empty store snapping timestamps to `bucket_width_secs`.
    pub fn new(bucket_width_secs: i64) -> Result<Self> {
        if bucket_width_secs <= 0 {
            return Err(TrafficError::InvalidConfig(format!(
                "bucket width must be positive, got {}s",
                bucket_width_secs
            )));
        }
        Ok(Self {
            bucket_width: bucket_width_secs,
            buckets: BTreeMap::new(),
        })
    }

    /// Build a store from any collection of samples.
    pub fn from_samples(bucket_width_secs: i64, samples: impl IntoIterator<Item = Sample>) -> Result<Self> {
        let mut store = Self::new(bucket_width_secs)?;
        for sample in samples {
            store.push(sample);
        }
        Ok(store)
    }

    /// Add one sample to its bucket.
    pub fn push(&mut self, sample: Sample) {
        let key = snap_timestamp(sample.timestamp, self.bucket_width);
        self.buckets
            .entry(key)
            .or_insert_with(|| TimeBucket { timestamp: key, samples: Vec::new() })
            .samples
            .push(sample);
    }

    /// Pull everything the feed has and bucket it. Returns the number ingested.
    pub fn ingest<F: SampleFeed + ?Sized>(&mut self, feed: &mut F) -> usize {
        let batch = feed.poll();
        let count = batch.len();
        for sample in batch {
            self.push(sample);
        }
        debug!(
            "[SampleStore] Ingested {} samples, {} buckets total",
            count,
            self.buckets.len()
        );
        count
    }

    pub fn bucket_width(&self) -> i64 {
        self.bucket_width
    }

    /// Buckets in ascending timestamp order.
    pub fn buckets(&self) -> impl Iterator<Item = &TimeBucket> + '_ {
        self.buckets.values()
    }

    pub fn bucket(&self, timestamp: i64) -> Option<&TimeBucket> {
        self.buckets.get(&snap_timestamp(timestamp, self.bucket_width))
    }

    /// Number of buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn sample_count(&self) -> usize {
        self.buckets.values().map(|b| b.samples.len()).sum()
    }
}

// ============================================================================
// Synthetic Feed
// ============================================================================

/// Deterministic synthetic observations following a daily congestion profile.
///
/// For each probe and each hour in range, emits one sample at
/// `day_start + hour * 3600` with the tier's modelled free-flow speed and a
/// current speed scaled by the hour's congestion ratio: rush hours (07-10,
/// 17-20) slow central roads most, lunch (12-14) is moderately busy, nights
/// (22-06) run free. Intended for demos and tests; it goes through
/// [`SampleFeed`] like any real source.
#[derive(Debug, Clone)]
pub struct SyntheticFeed {
    probes: Vec<(GpsPoint, RoadTier)>,
    day_start: i64,
    hours: std::ops::Range<u32>,
    model: FreeFlowModel,
    drained: bool,
}

impl SyntheticFeed {
    pub fn new(day_start: i64, hours: std::ops::Range<u32>) -> Self {
        Self {
            probes: Vec::new(),
            day_start,
            hours,
            model: FreeFlowModel::default(),
            drained: false,
        }
    }

    /// Add a probe location on a road of the given tier.
    pub fn probe(mut self, point: GpsPoint, tier: RoadTier) -> Self {
        self.probes.push((point, tier));
        self
    }

    pub fn with_model(mut self, model: FreeFlowModel) -> Self {
        self.model = model;
        self
    }

    /// Congestion ratio (current / free-flow) for a tier at an hour of day.
    pub fn congestion_ratio(tier: RoadTier, hour: u32) -> f64 {
        match hour % 24 {
            7..=9 | 17..=19 => match tier {
                RoadTier::Central => 0.40,
                RoadTier::Medium => 0.575,
                RoadTier::Peripheral => 0.75,
            },
            12..=13 => 0.80,
            0..=5 | 22..=23 => 1.0,
            _ => 0.90,
        }
    }

    fn sample_at(&self, point: GpsPoint, tier: RoadTier, hour: u32) -> Sample {
        let free_flow = self.model.free_flow(tier);
        let speed = (free_flow * Self::congestion_ratio(tier, hour)).clamp(5.0, free_flow);
        Sample::new(point.latitude, point.longitude, speed, self.day_start + hour as i64 * 3_600)
            .with_free_flow(free_flow)
    }
}

impl SampleFeed for SyntheticFeed {
    fn poll(&mut self) -> Vec<Sample> {
        if self.drained {
            return Vec::new();
        }
        self.drained = true;

        self.hours
            .clone()
            .flat_map(|hour| {
                self.probes
                    .iter()
                    .map(move |&(point, tier)| (point, tier, hour))
            })
            .map(|(point, tier, hour)| self.sample_at(point, tier, hour))
            .collect()
    }
}
