//! Segment ↔ sample matching.
//!
//! Each segment is matched by querying the bucket's [`SpatialIndex`] at the
//! segment anchor. Every sample the index returns is handed on as a
//! candidate; choosing among them is the aggregator's job. A segment with no
//! sample in range simply gets no candidates for that bucket.

use log::debug;

use crate::samples::{Sample, TimeBucket};
use crate::segmenter::RoadSegment;
use crate::spatial_index::SpatialIndex;
use crate::{Result, TrafficError};

/// Configuration for segment matching.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MatchConfig {
    /// Maximum number of samples per segment.
    /// Default: 5
    pub k: usize,

    /// Search radius around the segment anchor, meters.
    /// Default: 70.0
    pub max_radius: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            k: 5,
            max_radius: 70.0,
        }
    }
}

impl MatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(TrafficError::InvalidConfig("k must be at least 1".to_string()));
        }
        if !(self.max_radius.is_finite() && self.max_radius > 0.0) {
            return Err(TrafficError::InvalidConfig(format!(
                "max_radius must be positive, got {}",
                self.max_radius
            )));
        }
        Ok(())
    }
}

/// A sample matched to a segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate<'a> {
    pub sample: &'a Sample,
    /// Distance from the segment anchor, meters
    pub distance: f64,
}

/// Matching result for one bucket.
#[derive(Debug, Clone)]
pub struct BucketMatches<'a> {
    pub timestamp: i64,
    /// Matched segments with their candidates, in segment order
    pub matched: Vec<(&'a RoadSegment, Vec<Candidate<'a>>)>,
    /// Segments with no sample in range
    pub unmatched: usize,
}

/// Resolves segments to nearby samples.
#[derive(Debug, Clone, Default)]
pub struct SegmentMatcher {
    config: MatchConfig,
}

impl SegmentMatcher {
    pub fn new(config: MatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Candidates for one segment, nearest first.
    ///
    /// `samples` should be the slice `index` was built from; hits outside it
    /// are ignored. Returns `None` when no sample lies within the radius.
    pub fn match_segment<'a>(
        &self,
        segment: &RoadSegment,
        index: &SpatialIndex,
        samples: &'a [Sample],
    ) -> Option<Vec<Candidate<'a>>> {
        let candidates: Vec<Candidate<'a>> = index
            .query(&segment.anchor, self.config.k, self.config.max_radius)
            .into_iter()
            .filter_map(|n| {
                samples.get(n.index).map(|sample| Candidate {
                    sample,
                    distance: n.distance,
                })
            })
            .collect();

        (!candidates.is_empty()).then_some(candidates)
    }

    /// Build the bucket's index and match every segment against it.
    ///
    /// Fails only if the index cannot be built.
    pub fn match_bucket<'a>(
        &self,
        segments: &'a [RoadSegment],
        bucket: &'a TimeBucket,
    ) -> Result<BucketMatches<'a>> {
        let index = SpatialIndex::build(bucket.timestamp, &bucket.samples)?;

        let mut matched = Vec::new();
        let mut unmatched = 0;
        for segment in segments {
            match self.match_segment(segment, &index, &bucket.samples) {
                Some(candidates) => matched.push((segment, candidates)),
                None => unmatched += 1,
            }
        }

        debug!(
            "[Matcher] Bucket {}: {} samples, {} segments matched, {} unmatched",
            bucket.timestamp,
            bucket.samples.len(),
            matched.len(),
            unmatched
        );

        Ok(BucketMatches {
            timestamp: bucket.timestamp,
            matched,
            unmatched,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::road_class::RoadTier;
    use crate::GpsPoint;

    fn segment_at(id: u32, lat: f64, lng: f64) -> RoadSegment {
        let a = GpsPoint::new(lat - 0.0001, lng);
        let b = GpsPoint::new(lat + 0.0001, lng);
        RoadSegment {
            id,
            road_index: 0,
            road_name: "test".to_string(),
            road_tag: None,
            polyline: vec![a, b],
            length: crate::geo_utils::haversine_distance(&a, &b),
            anchor: GpsPoint::new(lat, lng),
            tier: RoadTier::Peripheral,
        }
    }

    #[test]
    fn test_only_nearby_sample_qualifies() {
        let bucket = TimeBucket {
            timestamp: 0,
            samples: vec![
                Sample::new(43.2401, 76.9501, 40.0, 0),
                Sample::new(43.2600, 76.9700, 10.0, 0),
            ],
        };
        let segments = vec![segment_at(0, 43.2400, 76.9500)];
        let matcher = SegmentMatcher::new(MatchConfig { k: 5, max_radius: 70.0 });

        let result = matcher.match_bucket(&segments, &bucket).unwrap();
        assert_eq!(result.matched.len(), 1);
        let (segment, candidates) = &result.matched[0];
        assert_eq!(segment.id, 0);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].sample.speed, Some(40.0));
    }

    #[test]
    fn test_all_candidates_forwarded() {
        let bucket = TimeBucket {
            timestamp: 0,
            samples: vec![
                Sample::new(43.2401, 76.9500, 30.0, 0),
                Sample::new(43.2399, 76.9500, 50.0, 0),
                Sample::new(43.2402, 76.9500, 20.0, 0),
            ],
        };
        let segments = vec![segment_at(0, 43.2400, 76.9500)];
        let result = SegmentMatcher::default().match_bucket(&segments, &bucket).unwrap();
        assert_eq!(result.matched[0].1.len(), 3);
    }

    #[test]
    fn test_segment_without_samples_is_absent() {
        let bucket = TimeBucket {
            timestamp: 60,
            samples: vec![Sample::new(43.2401, 76.9500, 30.0, 60)],
        };
        let segments = vec![segment_at(0, 43.2400, 76.9500), segment_at(1, 43.3000, 76.9500)];
        let result = SegmentMatcher::default().match_bucket(&segments, &bucket).unwrap();
        assert_eq!(result.matched.len(), 1);
        assert_eq!(result.matched[0].0.id, 0);
        assert_eq!(result.unmatched, 1);
    }

    #[test]
    fn test_equal_distance_keeps_insertion_order() {
        let bucket = TimeBucket {
            timestamp: 0,
            samples: vec![
                Sample::new(43.2401, 76.9500, 10.0, 0),
                Sample::new(43.2401, 76.9500, 20.0, 0),
                Sample::new(43.2401, 76.9500, 30.0, 0),
            ],
        };
        let segments = vec![segment_at(0, 43.2400, 76.9500)];
        let matcher = SegmentMatcher::new(MatchConfig { k: 2, max_radius: 70.0 });
        let result = matcher.match_bucket(&segments, &bucket).unwrap();
        let speeds: Vec<Option<f64>> = result.matched[0].1.iter().map(|c| c.sample.speed).collect();
        assert_eq!(speeds, vec![Some(10.0), Some(20.0)]);
    }

    #[test]
    fn test_malformed_bucket_fails() {
        let bucket = TimeBucket {
            timestamp: 0,
            samples: vec![Sample::new(f64::NAN, 76.95, 10.0, 0)],
        };
        let segments = vec![segment_at(0, 43.2400, 76.9500)];
        assert!(matches!(
            SegmentMatcher::default().match_bucket(&segments, &bucket),
            Err(TrafficError::IndexBuildFailure { .. })
        ));
    }

    #[test]
    fn test_mismatched_sample_slice_is_ignored() {
        let samples = vec![
            Sample::new(43.2401, 76.9500, 30.0, 0),
            Sample::new(43.2402, 76.9500, 50.0, 0),
        ];
        let index = SpatialIndex::build(0, &samples).unwrap();
        let segment = segment_at(0, 43.2400, 76.9500);
        let matcher = SegmentMatcher::default();

        let partial = matcher.match_segment(&segment, &index, &samples[..1]).unwrap();
        assert_eq!(partial.len(), 1);
        assert_eq!(partial[0].sample.speed, Some(30.0));
        assert!(matcher.match_segment(&segment, &index, &[]).is_none());
    }

    #[test]
    fn test_config_validation() {
        assert!(MatchConfig::default().validate().is_ok());
        assert!(MatchConfig { k: 0, max_radius: 70.0 }.validate().is_err());
        assert!(MatchConfig { k: 3, max_radius: 0.0 }.validate().is_err());
        assert!(MatchConfig { k: 3, max_radius: f64::NAN }.validate().is_err());
    }
}
