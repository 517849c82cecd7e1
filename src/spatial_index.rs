//! Per-bucket nearest-neighbour index over sample coordinates.
//!
//! Samples are placed in an R-tree as points on a sphere of Earth's radius
//! (Earth-centred Cartesian coordinates). Straight-line chord distance on that
//! sphere grows monotonically with great-circle distance, so a chord search
//! selects exactly the samples a haversine search would, with no
//! raw-degree distortion away from the equator. Reported distances are
//! haversine meters.

use std::f64::consts::PI;

use rstar::{PointDistance, RTree, RTreeObject, AABB};

use crate::geo_utils::{haversine_distance, EARTH_RADIUS_M};
use crate::samples::Sample;
use crate::{GpsPoint, Result, TrafficError};

/// A sample position with its insertion index for R-tree queries
#[derive(Debug, Clone, Copy)]
struct IndexedSample {
    idx: usize,
    xyz: [f64; 3],
}

impl RTreeObject for IndexedSample {
    type Envelope = AABB<[f64; 3]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.xyz)
    }
}

impl PointDistance for IndexedSample {
    fn distance_2(&self, point: &[f64; 3]) -> f64 {
        let dx = self.xyz[0] - point[0];
        let dy = self.xyz[1] - point[1];
        let dz = self.xyz[2] - point[2];
        dx * dx + dy * dy + dz * dz
    }
}

fn to_cartesian(p: &GpsPoint) -> [f64; 3] {
    let lat = p.latitude.to_radians();
    let lng = p.longitude.to_radians();
    [
        EARTH_RADIUS_M * lat.cos() * lng.cos(),
        EARTH_RADIUS_M * lat.cos() * lng.sin(),
        EARTH_RADIUS_M * lat.sin(),
    ]
}

/// Chord length subtending a great-circle arc of `arc_m` meters.
fn chord_for_arc(arc_m: f64) -> f64 {
    let half_angle = (arc_m / (2.0 * EARTH_RADIUS_M)).min(PI / 2.0);
    2.0 * EARTH_RADIUS_M * half_angle.sin()
}

/// A query hit: position of the sample in the bucket and its distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Index into the slice the index was built from
    pub index: usize,
    /// Great-circle distance in meters
    pub distance: f64,
}

/// Nearest-neighbour structure for one time bucket.
#[derive(Debug)]
pub struct SpatialIndex {
    tree: RTree<IndexedSample>,
    points: Vec<GpsPoint>,
}

impl SpatialIndex {
    /// Bulk-load the index over a bucket's samples.
    ///
    /// Fails with [`TrafficError::IndexBuildFailure`] on the first sample
    /// with a NaN or out-of-range coordinate.
    pub fn build(bucket: i64, samples: &[Sample]) -> Result<Self> {
        let points: Vec<GpsPoint> = samples.iter().map(|s| s.point).collect();
        Self::from_points(bucket, points)
    }

    /// Bulk-load the index over bare coordinates.
    pub fn from_points(bucket: i64, points: Vec<GpsPoint>) -> Result<Self> {
        if let Some(index) = points.iter().position(|p| !p.is_valid()) {
            return Err(TrafficError::IndexBuildFailure {
                bucket,
                index,
                latitude: points[index].latitude,
                longitude: points[index].longitude,
            });
        }

        let indexed: Vec<IndexedSample> = points
            .iter()
            .enumerate()
            .map(|(idx, p)| IndexedSample { idx, xyz: to_cartesian(p) })
            .collect();

        Ok(Self {
            tree: RTree::bulk_load(indexed),
            points,
        })
    }

    /// Up to `k` samples within `max_radius` meters of `point`.
    ///
    /// Results are sorted by ascending distance; equal distances keep
    /// insertion order. Empty when nothing qualifies or `point` is invalid.
    ///
    /// # Example
    /// ```
    /// use traffic_timeline::{GpsPoint, SpatialIndex};
    ///
    /// let points = vec![
    ///     GpsPoint::new(43.2600, 76.9700),
    ///     GpsPoint::new(43.2401, 76.9501),
    /// ];
    /// let index = SpatialIndex::from_points(0, points).unwrap();
    ///
    /// let hits = index.query(&GpsPoint::new(43.2400, 76.9500), 5, 70.0);
    /// assert_eq!(hits.len(), 1);
    /// assert_eq!(hits[0].index, 1);
    /// ```
    pub fn query(&self, point: &GpsPoint, k: usize, max_radius: f64) -> Vec<Neighbor> {
        if k == 0 || !point.is_valid() || !(max_radius >= 0.0) {
            return Vec::new();
        }

        let center = to_cartesian(point);
        // Slightly generous chord; the haversine check below is authoritative
        let chord = chord_for_arc(max_radius) * (1.0 + 1e-9) + 1e-6;

        let mut hits: Vec<Neighbor> = self
            .tree
            .locate_within_distance(center, chord * chord)
            .filter_map(|s| {
                let distance = haversine_distance(point, &self.points[s.idx]);
                (distance <= max_radius).then_some(Neighbor { index: s.idx, distance })
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.index.cmp(&b.index))
        });
        hits.truncate(k);
        hits
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_of(points: &[(f64, f64)]) -> SpatialIndex {
        SpatialIndex::from_points(0, points.iter().map(|&(lat, lng)| GpsPoint::new(lat, lng)).collect()).unwrap()
    }

    #[test]
    fn test_query_sorted_by_distance() {
        let index = index_of(&[
            (43.2403, 76.9500), // ~33 m
            (43.2401, 76.9500), // ~11 m
            (43.2402, 76.9500), // ~22 m
        ]);
        let hits = index.query(&GpsPoint::new(43.2400, 76.9500), 5, 70.0);
        let order: Vec<usize> = hits.iter().map(|h| h.index).collect();
        assert_eq!(order, vec![1, 2, 0]);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn test_query_respects_k_and_radius() {
        let index = index_of(&[
            (43.2401, 76.9500),
            (43.2402, 76.9500),
            (43.2403, 76.9500),
            (43.2500, 76.9500), // ~1.1 km
        ]);
        let anchor = GpsPoint::new(43.2400, 76.9500);
        assert_eq!(index.query(&anchor, 2, 70.0).len(), 2);
        assert_eq!(index.query(&anchor, 10, 70.0).len(), 3);
        assert_eq!(index.query(&anchor, 10, 5.0).len(), 0);
        assert_eq!(index.query(&anchor, 0, 70.0).len(), 0);
        assert_eq!(index.query(&anchor, 10, 2_000.0).len(), 4);
    }

    #[test]
    fn test_ties_break_by_insertion_order() {
        let index = index_of(&[
            (43.2401, 76.9500),
            (43.2401, 76.9500),
            (43.2401, 76.9500),
        ]);
        let hits = index.query(&GpsPoint::new(43.2400, 76.9500), 2, 70.0);
        assert_eq!(hits.iter().map(|h| h.index).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_longitude_distance_uses_great_circle() {
        // At 60°N a degree of longitude is half as long as at the equator.
        // 0.001° of longitude there is ~55.6 m: inside 70 m even though
        // 0.001° of latitude (~111 m) would not be.
        let index = index_of(&[(60.0, 10.001), (60.001, 10.0)]);
        let hits = index.query(&GpsPoint::new(60.0, 10.0), 5, 70.0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].index, 0);
        assert!((hits[0].distance - 55.6).abs() < 0.5);
    }

    #[test]
    fn test_malformed_coordinates_fail_build() {
        let points = vec![GpsPoint::new(43.24, 76.95), GpsPoint::new(f64::NAN, 76.95)];
        match SpatialIndex::from_points(120, points) {
            Err(TrafficError::IndexBuildFailure { bucket, index, .. }) => {
                assert_eq!(bucket, 120);
                assert_eq!(index, 1);
            }
            other => panic!("expected IndexBuildFailure, got {:?}", other),
        }

        let out_of_range = vec![GpsPoint::new(95.0, 76.95)];
        assert!(SpatialIndex::from_points(0, out_of_range).is_err());
    }

    #[test]
    fn test_empty_index() {
        let index = SpatialIndex::from_points(0, vec![]).unwrap();
        assert!(index.is_empty());
        assert!(index.query(&GpsPoint::new(43.24, 76.95), 5, 70.0).is_empty());
    }

    #[test]
    fn test_invalid_query_point() {
        let index = index_of(&[(43.2401, 76.9500)]);
        assert!(index.query(&GpsPoint::new(f64::NAN, 76.95), 5, 70.0).is_empty());
    }
}
