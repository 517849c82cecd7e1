//! Speed aggregation and congestion classification.
//!
//! Combines a segment's candidate samples into one [`AggregatedSegmentState`]:
//!
//! | Field | Rule |
//! |-------|------|
//! | speed | mean of candidate current speeds; `None` if every reading is missing |
//! | free-flow | mean of candidate free-flow readings, else the tier's modelled value |
//! | tier | speed / free-flow against the [`ClassificationConfig`] thresholds |
//! | confidence | mean of supplied confidences, else `None` |
//!
//! Means are summed in candidate order (nearest first, then insertion order),
//! so aggregating the same candidates twice gives bit-identical results.

use crate::matcher::Candidate;
use crate::road_class::FreeFlowModel;
use crate::segmenter::RoadSegment;

/// Discrete congestion classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum CongestionTier {
    Free,
    Moderate,
    Congested,
    /// No usable speed reading
    Unknown,
}

impl CongestionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CongestionTier::Free => "free",
            CongestionTier::Moderate => "moderate",
            CongestionTier::Congested => "congested",
            CongestionTier::Unknown => "unknown",
        }
    }

    /// Display colour (RGB).
    pub fn color(&self) -> [u8; 3] {
        match self {
            CongestionTier::Free => [0, 255, 0],
            CongestionTier::Moderate => [255, 165, 0],
            CongestionTier::Congested => [255, 0, 0],
            CongestionTier::Unknown => [128, 128, 128],
        }
    }
}

/// Where a state's free-flow speed came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FreeFlowSource {
    /// Averaged from sample readings
    Observed,
    /// Taken from the road-tier model
    Modelled,
}

/// Thresholds for classification.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClassificationConfig {
    /// Ratio at or above which traffic is free-flowing.
    /// Default: 0.8
    pub free_ratio: f64,

    /// Ratio at or above which traffic is moderate (below is congested).
    /// Default: 0.5
    pub moderate_ratio: f64,

    /// Mean confidence below which an estimate is flagged low-confidence.
    /// Default: 0.5
    pub low_confidence_threshold: f64,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            free_ratio: 0.8,
            moderate_ratio: 0.5,
            low_confidence_threshold: 0.5,
        }
    }
}

impl ClassificationConfig {
    /// Tier for a speed / free-flow ratio.
    ///
    /// # Example
    /// ```
    /// use traffic_timeline::{ClassificationConfig, CongestionTier};
    ///
    /// let config = ClassificationConfig::default();
    /// assert_eq!(config.classify(0.8), CongestionTier::Free);
    /// assert_eq!(config.classify(0.5), CongestionTier::Moderate);
    /// assert_eq!(config.classify(0.49), CongestionTier::Congested);
    /// ```
    pub fn classify(&self, ratio: f64) -> CongestionTier {
        if !ratio.is_finite() {
            CongestionTier::Unknown
        } else if ratio >= self.free_ratio {
            CongestionTier::Free
        } else if ratio >= self.moderate_ratio {
            CongestionTier::Moderate
        } else {
            CongestionTier::Congested
        }
    }
}

/// One segment's estimate for one bucket.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AggregatedSegmentState {
    pub segment_id: u32,
    pub timestamp: i64,
    /// Mean current speed, km/h; `None` when no candidate had a reading
    pub estimated_speed: Option<f64>,
    /// km/h
    pub free_flow_speed: f64,
    pub free_flow_source: FreeFlowSource,
    /// Number of matched samples
    pub sample_count: u32,
    pub tier: CongestionTier,
    pub confidence: Option<f64>,
    /// Set when the speed is unknown or confidence is below threshold
    pub low_confidence: bool,
}

impl AggregatedSegmentState {
    /// Speed / free-flow ratio, when the speed is known.
    pub fn ratio(&self) -> Option<f64> {
        self.estimated_speed.map(|s| s / self.free_flow_speed)
    }
}

/// Arithmetic mean in iteration order.
fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0u32), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Turns candidate sets into segment states.
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    classification: ClassificationConfig,
    free_flow: FreeFlowModel,
}

impl Aggregator {
    pub fn new(classification: ClassificationConfig, free_flow: FreeFlowModel) -> Self {
        Self { classification, free_flow }
    }

    pub fn classification(&self) -> &ClassificationConfig {
        &self.classification
    }

    /// Aggregate a segment's candidates at `timestamp`.
    ///
    /// Returns `None` for an empty candidate set: a segment without samples
    /// has no state.
    pub fn aggregate(
        &self,
        segment: &RoadSegment,
        timestamp: i64,
        candidates: &[Candidate<'_>],
    ) -> Option<AggregatedSegmentState> {
        if candidates.is_empty() {
            return None;
        }

        let estimated_speed = mean(candidates.iter().filter_map(|c| c.sample.current_speed()));

        let (free_flow_speed, free_flow_source) =
            match mean(candidates.iter().filter_map(|c| c.sample.reference_speed())) {
                Some(observed) => (observed, FreeFlowSource::Observed),
                None => (self.free_flow.free_flow(segment.tier), FreeFlowSource::Modelled),
            };

        let confidence = mean(candidates.iter().filter_map(|c| c.sample.confidence_value()));

        let tier = match estimated_speed {
            Some(speed) if free_flow_speed > 0.0 => self.classification.classify(speed / free_flow_speed),
            _ => CongestionTier::Unknown,
        };

        let low_confidence = tier == CongestionTier::Unknown
            || confidence.map_or(false, |c| c < self.classification.low_confidence_threshold);

        Some(AggregatedSegmentState {
            segment_id: segment.id,
            timestamp,
            estimated_speed,
            free_flow_speed,
            free_flow_source,
            sample_count: candidates.len() as u32,
            tier,
            confidence,
            low_confidence,
        })
    }
}
