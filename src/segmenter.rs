//! # Geometry Segmenter
//!
//! Cuts each road polyline into sub-polylines of at most
//! [`SegmentConfig::max_segment_length`] meters. Segments are the atomic unit
//! of speed estimation.
//!
//! ## Algorithm
//! 1. Walk the polyline accumulating haversine arc length
//! 2. Whenever the running length reaches the limit, place a cut point on the
//!    current edge at exactly the remaining haversine distance and start a
//!    new piece there
//! 3. Keep the trailing partial piece as-is
//!
//! Cut points are shared between neighbouring pieces, so concatenating the
//! pieces (dropping the repeated joints) reproduces the input path. Vertex
//! order is never changed.
//!
//! A network is segmented once; the resulting [`SegmentedNetwork`] is
//! read-only and shared between bucket workers.

use log::{debug, info, warn};

use crate::geo_utils::{arc_midpoint, haversine_distance, point_along_edge, polyline_length};
use crate::road_class::{RoadClassifier, RoadTier};
use crate::{GpsPoint, Result, TrafficError};

/// Lengths below this are treated as zero (meters).
pub(crate) const LENGTH_EPSILON: f64 = 1e-6;

/// Configuration for network segmentation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SegmentConfig {
    /// Maximum segment length in meters.
    /// Default: 75.0
    pub max_segment_length: f64,

    /// Roads shorter than this are dropped before segmentation (not failed).
    /// Default: 0.0 (keep every road)
    pub min_road_length: f64,
}

impl SegmentConfig {
    /// Reject a maximum length the splitter cannot cut to.
    pub fn validate(&self) -> Result<()> {
        if !(self.max_segment_length.is_finite() && self.max_segment_length > LENGTH_EPSILON) {
            return Err(TrafficError::InvalidConfig(format!(
                "max_segment_length must be greater than {} m, got {}",
                LENGTH_EPSILON, self.max_segment_length
            )));
        }
        Ok(())
    }
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_segment_length: 75.0,
            min_road_length: 0.0,
        }
    }
}

/// Road geometry as delivered by the network source.
///
/// The variant is decided once when the road is built and the segmenter
/// handles each case explicitly.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RoadGeometry {
    /// One continuous polyline to be cut into segments
    RawPath(Vec<GpsPoint>),
    /// Pieces already cut upstream, kept in the given order
    PrecomputedSegments(Vec<Vec<GpsPoint>>),
}

/// A named road from the network source.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Road {
    pub name: String,
    /// Optional classification tag, e.g. an OSM `highway` value
    pub tag: Option<String>,
    pub geometry: RoadGeometry,
}

impl Road {
    /// A road given as a single polyline.
    pub fn new(name: impl Into<String>, points: Vec<GpsPoint>) -> Self {
        Self {
            name: name.into(),
            tag: None,
            geometry: RoadGeometry::RawPath(points),
        }
    }

    /// A road whose geometry was already cut into pieces.
    pub fn precomputed(name: impl Into<String>, pieces: Vec<Vec<GpsPoint>>) -> Self {
        Self {
            name: name.into(),
            tag: None,
            geometry: RoadGeometry::PrecomputedSegments(pieces),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Total length of the road geometry in meters.
    pub fn length(&self) -> f64 {
        match &self.geometry {
            RoadGeometry::RawPath(points) => polyline_length(points),
            RoadGeometry::PrecomputedSegments(pieces) => {
                pieces.iter().map(|p| polyline_length(p)).sum()
            }
        }
    }
}

/// A bounded-length piece of one road.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoadSegment {
    /// Dense id, equal to the segment's position in the network
    pub id: u32,
    /// Index of the parent road in the input network
    pub road_index: u32,
    pub road_name: String,
    pub road_tag: Option<String>,
    /// Sub-polyline, at least two points, in the road's direction
    pub polyline: Vec<GpsPoint>,
    /// Length in meters
    pub length: f64,
    /// Arc-length midpoint, used for proximity queries
    pub anchor: GpsPoint,
    /// Tier of the parent road, resolved once at segmentation
    pub tier: RoadTier,
}

/// Split a polyline into pieces no longer than `max_length` meters.
///
/// `road` only labels the error. Fails with [`TrafficError::InvalidGeometry`]
/// when the polyline has fewer than two points, an invalid coordinate, or
/// zero length.
///
/// # Example
/// ```
/// use traffic_timeline::{GpsPoint, split_polyline, geo_utils};
///
/// let line = vec![GpsPoint::new(43.2400, 76.9500), GpsPoint::new(43.2420, 76.9500)];
/// let pieces = split_polyline("demo", &line, 100.0).unwrap();
///
/// assert_eq!(pieces.len(), 3); // ~222 m → 100 + 100 + 22
/// assert_eq!(pieces[0][0], line[0]);
/// assert_eq!(*pieces[2].last().unwrap(), line[1]);
/// assert!(geo_utils::polyline_length(&pieces[0]) <= 100.0 + 1e-6);
/// ```
pub fn split_polyline(road: &str, points: &[GpsPoint], max_length: f64) -> Result<Vec<Vec<GpsPoint>>> {
    let invalid = |reason: String| TrafficError::InvalidGeometry {
        road: road.to_string(),
        reason,
    };

    SegmentConfig { max_segment_length: max_length, min_road_length: 0.0 }.validate()?;
    if points.len() < 2 {
        return Err(invalid(format!("polyline has {} point(s), need at least 2", points.len())));
    }
    if let Some(i) = points.iter().position(|p| !p.is_valid()) {
        return Err(invalid(format!(
            "vertex {} has malformed coordinates ({}, {})",
            i, points[i].latitude, points[i].longitude
        )));
    }
    if polyline_length(points) <= LENGTH_EPSILON {
        return Err(invalid("polyline has zero length".to_string()));
    }

    let mut pieces: Vec<Vec<GpsPoint>> = Vec::new();
    let mut current: Vec<GpsPoint> = vec![points[0]];
    let mut accumulated = 0.0;

    for w in points.windows(2) {
        let mut from = w[0];
        let to = w[1];
        let mut edge = haversine_distance(&from, &to);
        if edge <= LENGTH_EPSILON {
            // Duplicate vertex
            continue;
        }

        while accumulated + edge > max_length + LENGTH_EPSILON {
            let needed = max_length - accumulated;
            if needed > LENGTH_EPSILON {
                let cut = point_along_edge(&from, &to, needed);
                current.push(cut);
                from = cut;
                edge = haversine_distance(&from, &to);
            }
            let joint = current[current.len() - 1];
            pieces.push(std::mem::replace(&mut current, vec![joint]));
            accumulated = 0.0;
        }

        current.push(to);
        accumulated += edge;
    }

    if current.len() >= 2 {
        pieces.push(current);
    }
    if pieces.is_empty() {
        // Only sub-epsilon edges
        return Err(invalid("polyline has zero length".to_string()));
    }

    Ok(pieces)
}

/// The segmented road network. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct SegmentedNetwork {
    segments: Vec<RoadSegment>,
    failures: Vec<TrafficError>,
    skipped_short: usize,
    max_segment_length: f64,
}

impl SegmentedNetwork {
    /// Segment every road in `roads`.
    ///
    /// Malformed roads are skipped and recorded in [`failures`](Self::failures);
    /// the rest of the network proceeds. Only an invalid configuration fails
    /// the whole build.
    pub fn build(roads: &[Road], config: &SegmentConfig, classifier: &RoadClassifier) -> Result<Self> {
        config.validate()?;

        let mut network = SegmentedNetwork {
            max_segment_length: config.max_segment_length,
            ..Default::default()
        };

        for (road_index, road) in roads.iter().enumerate() {
            if config.min_road_length > 0.0 && road.length() < config.min_road_length {
                network.skipped_short += 1;
                continue;
            }

            let pieces = match segment_road(road, config.max_segment_length) {
                Ok(pieces) => pieces,
                Err(e) => {
                    warn!("[Segmenter] Skipping road #{}: {}", road_index, e);
                    network.failures.push(e);
                    continue;
                }
            };

            let tier = classifier.classify(&road.name, road.tag.as_deref());
            debug!(
                "[Segmenter] Road '{}' ({}) -> {} segments",
                road.name,
                tier.as_str(),
                pieces.len()
            );

            for polyline in pieces {
                let length = polyline_length(&polyline);
                let anchor = match arc_midpoint(&polyline) {
                    Some(anchor) => anchor,
                    None => continue,
                };
                network.segments.push(RoadSegment {
                    id: network.segments.len() as u32,
                    road_index: road_index as u32,
                    road_name: road.name.clone(),
                    road_tag: road.tag.clone(),
                    polyline,
                    length,
                    anchor,
                    tier,
                });
            }
        }

        info!(
            "[Segmenter] {} roads -> {} segments ({} failed, {} too short)",
            roads.len(),
            network.segments.len(),
            network.failures.len(),
            network.skipped_short
        );

        Ok(network)
    }

    pub fn segments(&self) -> &[RoadSegment] {
        &self.segments
    }

    pub fn segment(&self, id: u32) -> Option<&RoadSegment> {
        self.segments.get(id as usize)
    }

    /// Roads that could not be segmented.
    pub fn failures(&self) -> &[TrafficError] {
        &self.failures
    }

    /// Roads dropped by `min_road_length`.
    pub fn skipped_short(&self) -> usize {
        self.skipped_short
    }

    pub fn max_segment_length(&self) -> f64 {
        self.max_segment_length
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

fn segment_road(road: &Road, max_length: f64) -> Result<Vec<Vec<GpsPoint>>> {
    match &road.geometry {
        RoadGeometry::RawPath(points) => split_polyline(&road.name, points, max_length),
        RoadGeometry::PrecomputedSegments(pieces) => {
            if pieces.is_empty() {
                return Err(TrafficError::InvalidGeometry {
                    road: road.name.clone(),
                    reason: "no precomputed segments".to_string(),
                });
            }
            let mut out = Vec::with_capacity(pieces.len());
            for piece in pieces {
                // Oversized pieces are cut further; in-range pieces come back unchanged
                out.extend(split_polyline(&road.name, piece, max_length)?);
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_utils::EARTH_RADIUS_M;

    /// Degrees of latitude spanning `meters` along a meridian.
    fn lat_offset(meters: f64) -> f64 {
        (meters / EARTH_RADIUS_M).to_degrees()
    }

    fn concatenate(pieces: &[Vec<GpsPoint>]) -> Vec<GpsPoint> {
        let mut out: Vec<GpsPoint> = Vec::new();
        for piece in pieces {
            let skip = if out.is_empty() { 0 } else { 1 };
            out.extend(piece.iter().skip(skip).copied());
        }
        out
    }

    #[test]
    fn test_300m_line_into_four_75m_segments() {
        let line = vec![
            GpsPoint::new(43.2400, 76.9500),
            GpsPoint::new(43.2400 + lat_offset(300.0), 76.9500),
        ];
        let pieces = split_polyline("straight", &line, 75.0).unwrap();
        assert_eq!(pieces.len(), 4);
        for piece in &pieces {
            assert!((polyline_length(piece) - 75.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_trailing_partial_piece_kept() {
        let line = vec![
            GpsPoint::new(43.2400, 76.9500),
            GpsPoint::new(43.2400 + lat_offset(180.0), 76.9500),
        ];
        let pieces = split_polyline("partial", &line, 75.0).unwrap();
        assert_eq!(pieces.len(), 3);
        assert!((polyline_length(&pieces[2]) - 30.0).abs() < 1e-6);
    }

    #[test]
    fn test_concatenation_reconstructs_polyline() {
        let line = vec![
            GpsPoint::new(43.2400, 76.9500),
            GpsPoint::new(43.2410, 76.9510),
            GpsPoint::new(43.2415, 76.9530),
            GpsPoint::new(43.2430, 76.9535),
            // Long diagonal edge
            GpsPoint::new(43.2630, 76.9835),
        ];
        let max = 60.0;
        let pieces = split_polyline("bendy", &line, max).unwrap();

        let joined = concatenate(&pieces);
        assert_eq!(joined.first(), line.first());
        assert_eq!(joined.last(), line.last());

        // Every input vertex appears, in order
        let mut cursor = 0;
        for vertex in &line {
            let found = joined[cursor..].iter().position(|p| {
                (p.latitude - vertex.latitude).abs() < 1e-9
                    && (p.longitude - vertex.longitude).abs() < 1e-9
            });
            let offset = found.expect("input vertex missing from segments");
            cursor += offset;
        }

        // Total length is preserved (cut points sit on the lat/lng edges)
        let total: f64 = pieces.iter().map(|p| polyline_length(p)).sum();
        assert!((total - polyline_length(&line)).abs() < 0.01);

        // Every piece respects the limit; the trailing one up to the cut tolerance
        let (last, full) = pieces.split_last().unwrap();
        for piece in full {
            assert!(polyline_length(piece) <= max + 1e-9);
        }
        assert!(polyline_length(last) <= max + LENGTH_EPSILON);
    }

    #[test]
    fn test_long_diagonal_edge_pieces_within_limit() {
        let line = vec![GpsPoint::new(43.10, 76.80), GpsPoint::new(43.30, 77.10)];
        let pieces = split_polyline("diagonal", &line, 75.0).unwrap();
        assert!(pieces.len() > 400);

        let (last, full) = pieces.split_last().unwrap();
        for piece in full {
            let length = polyline_length(piece);
            assert!(length <= 75.0 + 1e-9, "piece of {} m", length);
            assert!(length >= 75.0 - 1e-6, "piece of {} m", length);
        }
        assert!(polyline_length(last) <= 75.0 + LENGTH_EPSILON);
    }

    #[test]
    fn test_short_polyline_single_segment() {
        let line = vec![GpsPoint::new(43.2400, 76.9500), GpsPoint::new(43.2401, 76.9500)];
        let pieces = split_polyline("short", &line, 75.0).unwrap();
        assert_eq!(pieces, vec![line]);
    }

    #[test]
    fn test_degenerate_polylines_rejected() {
        let single = vec![GpsPoint::new(43.24, 76.95)];
        assert!(matches!(
            split_polyline("single", &single, 75.0),
            Err(TrafficError::InvalidGeometry { .. })
        ));

        let zero = vec![GpsPoint::new(43.24, 76.95), GpsPoint::new(43.24, 76.95)];
        assert!(matches!(
            split_polyline("zero", &zero, 75.0),
            Err(TrafficError::InvalidGeometry { .. })
        ));

        let nan = vec![GpsPoint::new(43.24, 76.95), GpsPoint::new(f64::NAN, 76.95)];
        assert!(matches!(
            split_polyline("nan", &nan, 75.0),
            Err(TrafficError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn test_duplicate_vertices_collapsed() {
        let line = vec![
            GpsPoint::new(43.2400, 76.9500),
            GpsPoint::new(43.2400, 76.9500),
            GpsPoint::new(43.2402, 76.9500),
        ];
        let pieces = split_polyline("dup", &line, 75.0).unwrap();
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].len(), 2);
    }

    #[test]
    fn test_network_skips_bad_roads() {
        let roads = vec![
            Road::new("good", vec![GpsPoint::new(43.2400, 76.9500), GpsPoint::new(43.2410, 76.9500)]),
            Road::new("bad", vec![GpsPoint::new(43.2400, 76.9500)]),
            Road::new("also good", vec![GpsPoint::new(43.2500, 76.9500), GpsPoint::new(43.2502, 76.9500)]),
        ];
        let network = SegmentedNetwork::build(&roads, &SegmentConfig::default(), &RoadClassifier::default()).unwrap();

        assert_eq!(network.failures().len(), 1);
        assert!(network.segments().iter().all(|s| s.road_name != "bad"));
        assert!(network.segments().iter().any(|s| s.road_index == 2));

        // Ids are dense and match positions
        for (i, s) in network.segments().iter().enumerate() {
            assert_eq!(s.id as usize, i);
        }
    }

    #[test]
    fn test_tier_cached_per_road() {
        let roads = vec![
            Road::new("проспект Абая", vec![GpsPoint::new(43.2400, 76.9000), GpsPoint::new(43.2400, 76.9100)]),
            Road::new("улица Жандосова", vec![GpsPoint::new(43.2200, 76.9000), GpsPoint::new(43.2200, 76.9050)])
                .with_tag("secondary"),
        ];
        let network = SegmentedNetwork::build(&roads, &SegmentConfig::default(), &RoadClassifier::default()).unwrap();
        for s in network.segments() {
            match s.road_index {
                0 => assert_eq!(s.tier, RoadTier::Central),
                _ => assert_eq!(s.tier, RoadTier::Medium),
            }
        }
    }

    #[test]
    fn test_precomputed_pieces_kept_in_order() {
        let a = vec![GpsPoint::new(43.2400, 76.9500), GpsPoint::new(43.2402, 76.9500)];
        let b = vec![GpsPoint::new(43.2402, 76.9500), GpsPoint::new(43.2404, 76.9500)];
        let roads = vec![Road::precomputed("pre", vec![a.clone(), b.clone()])];
        let network = SegmentedNetwork::build(&roads, &SegmentConfig::default(), &RoadClassifier::default()).unwrap();
        assert_eq!(network.len(), 2);
        assert_eq!(network.segments()[0].polyline, a);
        assert_eq!(network.segments()[1].polyline, b);
    }

    #[test]
    fn test_precomputed_oversized_piece_is_cut() {
        let long = vec![
            GpsPoint::new(43.2400, 76.9500),
            GpsPoint::new(43.2400 + lat_offset(150.0), 76.9500),
        ];
        let roads = vec![Road::precomputed("pre", vec![long])];
        let network = SegmentedNetwork::build(&roads, &SegmentConfig::default(), &RoadClassifier::default()).unwrap();
        assert_eq!(network.len(), 2);
        assert!(network.segments().iter().all(|s| s.length <= 75.0 + 1e-6));
    }

    #[test]
    fn test_min_road_length_filter() {
        let roads = vec![
            Road::new("tiny", vec![GpsPoint::new(43.2400, 76.9500), GpsPoint::new(43.2401, 76.9500)]),
            Road::new("long", vec![GpsPoint::new(43.2400, 76.9500), GpsPoint::new(43.2420, 76.9500)]),
        ];
        let config = SegmentConfig { min_road_length: 100.0, ..Default::default() };
        let network = SegmentedNetwork::build(&roads, &config, &RoadClassifier::default()).unwrap();
        assert_eq!(network.skipped_short(), 1);
        assert!(network.failures().is_empty());
        assert!(network.segments().iter().all(|s| s.road_name == "long"));
    }

    #[test]
    fn test_invalid_max_length_rejected() {
        let config = SegmentConfig { max_segment_length: 0.0, ..Default::default() };
        assert!(matches!(
            SegmentedNetwork::build(&[], &config, &RoadClassifier::default()),
            Err(TrafficError::InvalidConfig(_))
        ));

        // Positive but below the length tolerance
        let tiny = SegmentConfig { max_segment_length: 1e-7, ..Default::default() };
        assert!(tiny.validate().is_err());
        assert!(SegmentedNetwork::build(&[], &tiny, &RoadClassifier::default()).is_err());
        let line = vec![GpsPoint::new(43.2400, 76.9500), GpsPoint::new(43.2401, 76.9500)];
        assert!(matches!(split_polyline("tiny", &line, 1e-7), Err(TrafficError::InvalidConfig(_))));
    }

    #[test]
    fn test_anchor_is_midpoint() {
        let roads = vec![Road::new("r", vec![GpsPoint::new(43.2400, 76.9500), GpsPoint::new(43.2402, 76.9500)])];
        let network = SegmentedNetwork::build(&roads, &SegmentConfig::default(), &RoadClassifier::default()).unwrap();
        let s = &network.segments()[0];
        assert!((s.anchor.latitude - 43.2401).abs() < 1e-9);
    }
}
