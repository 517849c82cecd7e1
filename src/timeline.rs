//! # Timeline
//!
//! Ordered, replayable sequence of per-bucket segment states.
//!
//! [`TimelineBuilder`] accepts buckets in strictly increasing timestamp order
//! and rejects anything else, so the finished [`Timeline`] can be played back
//! front to back without re-sorting. Playback is lazy: [`Timeline::frames`]
//! returns a fresh iterator each call and joins segment geometry onto the
//! states only as frames are pulled.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use traffic_timeline::{
//!     GpsPoint, Road, RoadClassifier, SegmentConfig, SegmentedNetwork, TimelineBuilder,
//!     TrafficError,
//! };
//!
//! let roads = vec![Road::new("r", vec![GpsPoint::new(43.24, 76.95), GpsPoint::new(43.2402, 76.95)])];
//! let network = SegmentedNetwork::build(&roads, &SegmentConfig::default(), &RoadClassifier::default()).unwrap();
//!
//! let mut builder = TimelineBuilder::new(Arc::new(network));
//! builder.insert(20, vec![]).unwrap();
//! assert!(matches!(
//!     builder.insert(10, vec![]),
//!     Err(TrafficError::OutOfOrderTimestamp { timestamp: 10, last: 20 })
//! ));
//!
//! let timeline = builder.finish();
//! assert_eq!(timeline.timestamps().collect::<Vec<_>>(), vec![20]);
//! ```

use std::iter::StepBy;
use std::sync::Arc;

use log::{debug, warn};

use crate::aggregator::{AggregatedSegmentState, CongestionTier};
use crate::segmenter::SegmentedNetwork;
use crate::{Bounds, GpsPoint, Result, TrafficError};

/// States for one bucket, ordered by segment id.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimelineFrame {
    pub timestamp: i64,
    pub states: Vec<AggregatedSegmentState>,
}

/// A display-ready feature: one segment's geometry with its state at one time.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SegmentFeature {
    pub segment_id: u32,
    pub road_name: String,
    pub polyline: Vec<GpsPoint>,
    pub timestamp: i64,
    /// km/h; `None` when unknown
    pub speed: Option<f64>,
    /// km/h
    pub free_flow_speed: f64,
    pub tier: CongestionTier,
    pub confidence: Option<f64>,
    pub low_confidence: bool,
    pub sample_count: u32,
    /// Tier colour, RGB
    pub color: [u8; 3],
}

/// All features for one timestamp.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PlaybackFrame {
    pub timestamp: i64,
    pub features: Vec<SegmentFeature>,
}

/// Accumulates bucket results in timestamp order.
#[derive(Debug)]
pub struct TimelineBuilder {
    network: Arc<SegmentedNetwork>,
    frames: Vec<TimelineFrame>,
}

impl TimelineBuilder {
    pub fn new(network: Arc<SegmentedNetwork>) -> Self {
        Self {
            network,
            frames: Vec::new(),
        }
    }

    /// Timestamp of the most recently flushed bucket.
    pub fn last_timestamp(&self) -> Option<i64> {
        self.frames.last().map(|f| f.timestamp)
    }

    /// Append one bucket's states.
    ///
    /// `timestamp` must be strictly greater than every timestamp already
    /// inserted; otherwise fails with [`TrafficError::OutOfOrderTimestamp`]
    /// and the builder is unchanged. A segment appearing more than once keeps
    /// its first state.
    pub fn insert(&mut self, timestamp: i64, mut states: Vec<AggregatedSegmentState>) -> Result<()> {
        if let Some(last) = self.last_timestamp() {
            if timestamp <= last {
                return Err(TrafficError::OutOfOrderTimestamp { timestamp, last });
            }
        }

        states.sort_by_key(|s| s.segment_id);
        let before = states.len();
        states.dedup_by_key(|s| s.segment_id);
        if states.len() < before {
            warn!(
                "[Timeline] Bucket {}: dropped {} duplicate segment states",
                timestamp,
                before - states.len()
            );
        }
        debug!("[Timeline] Flushed bucket {} with {} states", timestamp, states.len());
        self.frames.push(TimelineFrame { timestamp, states });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn finish(self) -> Timeline {
        Timeline {
            network: self.network,
            frames: self.frames,
        }
    }
}

/// Finished, immutable timeline.
#[derive(Debug, Clone)]
pub struct Timeline {
    network: Arc<SegmentedNetwork>,
    frames: Vec<TimelineFrame>,
}

impl Timeline {
    pub fn network(&self) -> &Arc<SegmentedNetwork> {
        &self.network
    }

    /// Raw per-bucket states, in timestamp order.
    pub fn raw_frames(&self) -> &[TimelineFrame] {
        &self.frames
    }

    pub fn timestamps(&self) -> impl Iterator<Item = i64> + '_ {
        self.frames.iter().map(|f| f.timestamp)
    }

    /// States for one bucket, if that bucket produced a frame.
    pub fn states_at(&self, timestamp: i64) -> Option<&[AggregatedSegmentState]> {
        self.frames
            .binary_search_by_key(&timestamp, |f| f.timestamp)
            .ok()
            .map(|i| self.frames[i].states.as_slice())
    }

    /// State of one segment at one bucket. `None` means no estimate.
    pub fn state(&self, segment_id: u32, timestamp: i64) -> Option<&AggregatedSegmentState> {
        let states = self.states_at(timestamp)?;
        states
            .binary_search_by_key(&segment_id, |s| s.segment_id)
            .ok()
            .map(|i| &states[i])
    }

    /// Playback from the first frame. Each call starts a new cursor.
    pub fn frames(&self) -> Frames<'_> {
        Frames {
            timeline: self,
            next: 0,
        }
    }

    /// Playback keeping every `n`-th frame, starting with the first.
    /// `n` of zero is treated as one.
    pub fn frames_every(&self, n: usize) -> StepBy<Frames<'_>> {
        self.frames().step_by(n.max(1))
    }

    /// Every feature of every frame, flattened in playback order.
    pub fn export_features(&self) -> Vec<SegmentFeature> {
        self.frames().flat_map(|frame| frame.features).collect()
    }

    /// Bounding box of every segment that appears in the timeline.
    pub fn bounds(&self) -> Option<Bounds> {
        self.frames
            .iter()
            .flat_map(|f| f.states.iter())
            .filter_map(|s| self.network.segment(s.segment_id))
            .filter_map(|segment| Bounds::from_points(&segment.polyline))
            .reduce(|a, b| a.union(&b))
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn playback_frame(&self, frame: &TimelineFrame) -> PlaybackFrame {
        let features = frame
            .states
            .iter()
            .filter_map(|state| {
                let segment = self.network.segment(state.segment_id)?;
                Some(SegmentFeature {
                    segment_id: state.segment_id,
                    road_name: segment.road_name.clone(),
                    polyline: segment.polyline.clone(),
                    timestamp: frame.timestamp,
                    speed: state.estimated_speed,
                    free_flow_speed: state.free_flow_speed,
                    tier: state.tier,
                    confidence: state.confidence,
                    low_confidence: state.low_confidence,
                    sample_count: state.sample_count,
                    color: state.tier.color(),
                })
            })
            .collect();

        PlaybackFrame {
            timestamp: frame.timestamp,
            features,
        }
    }
}

/// Lazy playback iterator over a [`Timeline`].
#[derive(Debug, Clone)]
pub struct Frames<'a> {
    timeline: &'a Timeline,
    next: usize,
}

impl Iterator for Frames<'_> {
    type Item = PlaybackFrame;

    fn next(&mut self) -> Option<PlaybackFrame> {
        let frame = self.timeline.frames.get(self.next)?;
        self.next += 1;
        Some(self.timeline.playback_frame(frame))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.timeline.frames.len() - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Frames<'_> {}
