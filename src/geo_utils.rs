//! # Geographic Utilities
//!
//! Distance and interpolation helpers shared by the segmenter, the spatial
//! index and the matcher. Every distance in the engine goes through
//! [`haversine_distance`], so segment lengths, anchor placement and match
//! radii all use the same great-circle metric.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two GPS points |
//! | [`polyline_length`] | Total length of a polyline in meters |
//! | [`interpolate`] | Point at a fraction of the way between two points |
//! | [`point_along_edge`] | Point at a haversine distance along one edge |
//! | [`point_at_distance`] | Point at a given arc length along a polyline |
//! | [`arc_midpoint`] | Point halfway along a polyline by arc length |
//!
//! ## Example
//!
//! ```rust
//! use traffic_timeline::{GpsPoint, geo_utils};
//!
//! let road = vec![
//!     GpsPoint::new(43.2400, 76.9500),
//!     GpsPoint::new(43.2410, 76.9500),
//! ];
//!
//! let length = geo_utils::polyline_length(&road);
//! assert!((length - 111.2).abs() < 0.5);
//!
//! let mid = geo_utils::arc_midpoint(&road).unwrap();
//! assert!((mid.latitude - 43.2405).abs() < 1e-9);
//! ```
//!
//! ## Algorithm Notes
//!
//! Interpolation is linear in latitude/longitude. Over road-segment scales
//! (tens to hundreds of meters) the deviation from the great circle is far
//! below GPS noise, and along a meridian it is exact.

use geo::{Distance, Haversine, Point};
use crate::GpsPoint;

/// Mean Earth radius in meters, matching the radius used by `geo`'s haversine.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

// =============================================================================
// Distance Functions
// =============================================================================

/// Great-circle distance between two GPS points in meters.
///
/// # Example
///
/// ```rust
/// use traffic_timeline::{GpsPoint, geo_utils};
///
/// let almaty = GpsPoint::new(43.2389, 76.8897);
/// let astana = GpsPoint::new(51.1694, 71.4491);
///
/// let distance = geo_utils::haversine_distance(&almaty, &astana);
/// assert!((distance - 970_000.0).abs() < 20_000.0);
/// ```
#[inline]
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let point1 = Point::new(p1.longitude, p1.latitude);
    let point2 = Point::new(p2.longitude, p2.latitude);
    Haversine::distance(point1, point2)
}

/// Total length of a polyline in meters.
///
/// Empty or single-point polylines return 0.0.
pub fn polyline_length(points: &[GpsPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

// =============================================================================
// Interpolation
// =============================================================================

/// Point at `ratio` (0.0..=1.0) of the way from `a` to `b`.
#[inline]
pub fn interpolate(a: &GpsPoint, b: &GpsPoint, ratio: f64) -> GpsPoint {
    GpsPoint::new(
        a.latitude + ratio * (b.latitude - a.latitude),
        a.longitude + ratio * (b.longitude - a.longitude),
    )
}

/// Point on the straight `a`→`b` line whose haversine distance from `a` is
/// `distance` meters, rounded down so it never lies further.
///
/// Linear lat/lng ratios do not track great-circle distance on diagonal
/// edges, so the ratio is found by bisection. Clamps to `a` and `b`.
pub fn point_along_edge(a: &GpsPoint, b: &GpsPoint, distance: f64) -> GpsPoint {
    if !(distance > 0.0) {
        return *a;
    }
    if distance >= haversine_distance(a, b) {
        return *b;
    }

    let (mut lo, mut hi) = (0.0_f64, 1.0_f64);
    for _ in 0..64 {
        let mid = 0.5 * (lo + hi);
        if mid <= lo || mid >= hi {
            break;
        }
        if haversine_distance(a, &interpolate(a, b, mid)) <= distance {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    interpolate(a, b, lo)
}

/// Point at `distance` meters along a polyline, measured from its first vertex.
///
/// Distances past the end clamp to the last vertex. Returns `None` for an
/// empty polyline.
pub fn point_at_distance(points: &[GpsPoint], distance: f64) -> Option<GpsPoint> {
    let first = points.first()?;
    if distance <= 0.0 {
        return Some(*first);
    }

    let mut accumulated = 0.0;
    for w in points.windows(2) {
        let edge = haversine_distance(&w[0], &w[1]);
        if edge > 0.0 && accumulated + edge >= distance {
            return Some(interpolate(&w[0], &w[1], (distance - accumulated) / edge));
        }
        accumulated += edge;
    }

    points.last().copied()
}

/// Point halfway along a polyline by arc length.
pub fn arc_midpoint(points: &[GpsPoint]) -> Option<GpsPoint> {
    point_at_distance(points, polyline_length(points) / 2.0)
}

// =============================================================================
// Unit Tests
// =============================================================================
