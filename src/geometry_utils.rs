use geo_types::{Coord, LineString, MultiPolygon};

/// Equirectangular plane around a survey origin: lon/lat degrees become
/// metres east and north of it. Good for regional extents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalTangentPlane {
    origin: Coord<f64>,
    metres_per_deg_lon: f64,
    metres_per_deg_lat: f64,
}

impl LocalTangentPlane {
    const EARTH_RADIUS_M: f64 = 6_371_007.2;

    pub fn new(lon: f64, lat: f64) -> Self {
        let per_deg = Self::EARTH_RADIUS_M * std::f64::consts::PI / 180.0;
        Self {
            origin: Coord { x: lon, y: lat },
            metres_per_deg_lon: per_deg * lat.to_radians().cos(),
            metres_per_deg_lat: per_deg,
        }
    }

    pub fn project(&self, lonlat: Coord<f64>) -> Coord<f64> {
        Coord {
            x: (lonlat.x - self.origin.x) * self.metres_per_deg_lon,
            y: (lonlat.y - self.origin.y) * self.metres_per_deg_lat,
        }
    }

    /// Back to lon/lat, for export.
    pub fn unproject(&self, metres: Coord<f64>) -> Coord<f64> {
        Coord {
            x: self.origin.x + metres.x / self.metres_per_deg_lon,
            y: self.origin.y + metres.y / self.metres_per_deg_lat,
        }
    }
}

// --- Metric Geometry Functions (XY Space) ---

pub fn distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt()
}

/// Calculate Euclidean length of a polyline in metric space.
pub fn polyline_length(coords: &[Coord<f64>]) -> f64 {
    if coords.len() < 2 {
        return 0.0;
    }
    let mut len = 0.0;
    for i in 0..coords.len() - 1 {
        len += distance(coords[i], coords[i + 1]);
    }
    len
}

/// Closest point on segment `a`-`b`; returns (fraction along the segment, point).
fn project_onto_segment(p: Coord<f64>, a: Coord<f64>, b: Coord<f64>) -> (f64, Coord<f64>) {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len_sq = dx * dx + dy * dy;
    if len_sq <= f64::EPSILON {
        return (0.0, a);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0);
    (
        t,
        Coord {
            x: a.x + dx * t,
            y: a.y + dy * t,
        },
    )
}

/// Where a point lands when projected onto a polyline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolylineProjection {
    /// Index of the segment start coordinate.
    pub segment: usize,
    pub distance_along: f64,
    pub distance_to_line: f64,
    pub point: Coord<f64>,
}

/// Project point to polyline in metric space.
pub fn project_point_to_polyline(
    point: Coord<f64>,
    coords: &[Coord<f64>],
) -> Option<PolylineProjection> {
    if coords.len() < 2 {
        return coords.first().map(|c| PolylineProjection {
            segment: 0,
            distance_along: 0.0,
            distance_to_line: distance(point, *c),
            point: *c,
        });
    }

    let mut best: Option<PolylineProjection> = None;
    let mut walked = 0.0;
    for i in 0..coords.len() - 1 {
        let (a, b) = (coords[i], coords[i + 1]);
        let seg_len = distance(a, b);
        let (t, projected) = project_onto_segment(point, a, b);
        let d = distance(point, projected);
        if best.is_none_or(|current| d < current.distance_to_line) {
            best = Some(PolylineProjection {
                segment: i,
                distance_along: walked + t * seg_len,
                distance_to_line: d,
                point: projected,
            });
        }
        walked += seg_len;
    }
    best
}

pub fn point_polyline_distance(point: Coord<f64>, coords: &[Coord<f64>]) -> f64 {
    project_point_to_polyline(point, coords)
        .map(|p| p.distance_to_line)
        .unwrap_or(f64::INFINITY)
}

/// Cut a polyline at a projected point, producing the two halves that meet at `at`.
pub fn split_polyline(
    coords: &[Coord<f64>],
    projection: &PolylineProjection,
    at: Coord<f64>,
) -> (Vec<Coord<f64>>, Vec<Coord<f64>>) {
    let mut head: Vec<Coord<f64>> = coords[..=projection.segment].to_vec();
    head.push(at);
    let mut tail: Vec<Coord<f64>> = vec![at];
    tail.extend_from_slice(&coords[projection.segment + 1..]);
    (dedup_consecutive(head), dedup_consecutive(tail))
}

/// Drop repeated consecutive coordinates.
pub fn dedup_consecutive(mut coords: Vec<Coord<f64>>) -> Vec<Coord<f64>> {
    coords.dedup_by(|a, b| distance(*a, *b) <= f64::EPSILON);
    coords
}

/// Densify a polyline in metric space by adding points (max_spacing_m).
pub fn densify_polyline(coords: &[Coord<f64>], max_spacing_m: f64) -> Vec<Coord<f64>> {
    if coords.len() < 2 {
        return coords.to_vec();
    }
    let mut result = Vec::with_capacity(coords.len() * 2);
    result.push(coords[0]);

    for i in 0..coords.len() - 1 {
        let p1 = coords[i];
        let p2 = coords[i + 1];
        let dist = distance(p1, p2);

        if dist > max_spacing_m {
            let steps = (dist / max_spacing_m).ceil() as usize;
            for j in 1..steps {
                let t = j as f64 / steps as f64;
                result.push(Coord {
                    x: p1.x + (p2.x - p1.x) * t,
                    y: p1.y + (p2.y - p1.y) * t,
                });
            }
        }
        result.push(p2);
    }
    result
}

/// Fraction of `a`'s densified samples lying within `buffer_m` of `b`.
pub fn coverage_fraction(
    a: &[Coord<f64>],
    b: &[Coord<f64>],
    buffer_m: f64,
    spacing_m: f64,
) -> f64 {
    let samples = densify_polyline(a, spacing_m);
    if samples.is_empty() || b.is_empty() {
        return 0.0;
    }
    let covered = samples
        .iter()
        .filter(|p| point_polyline_distance(**p, b) <= buffer_m)
        .count();
    covered as f64 / samples.len() as f64
}

/// Turning angle in degrees at `vertex` for a path `before -> vertex -> after`.
/// 0 means straight on, 180 a full reversal.
pub fn deflection_deg(before: Coord<f64>, vertex: Coord<f64>, after: Coord<f64>) -> f64 {
    let (ax, ay) = (vertex.x - before.x, vertex.y - before.y);
    let (bx, by) = (after.x - vertex.x, after.y - vertex.y);
    let norm = (ax * ax + ay * ay).sqrt() * (bx * bx + by * by).sqrt();
    if norm <= f64::EPSILON {
        return 0.0;
    }
    ((ax * bx + ay * by) / norm).clamp(-1.0, 1.0).acos().to_degrees()
}

/// Distance from a point to the nearest ring (exterior or hole) of any polygon.
pub fn distance_to_boundary(point: Coord<f64>, boundary: &MultiPolygon<f64>) -> f64 {
    boundary
        .0
        .iter()
        .flat_map(|polygon| std::iter::once(polygon.exterior()).chain(polygon.interiors()))
        .map(|ring| point_polyline_distance(point, &ring.0))
        .fold(f64::INFINITY, f64::min)
}

fn orientation(a: Coord<f64>, b: Coord<f64>, c: Coord<f64>) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

/// Proper crossing of two segments (touching at endpoints does not count).
pub fn segments_cross(a: Coord<f64>, b: Coord<f64>, c: Coord<f64>, d: Coord<f64>) -> bool {
    let o1 = orientation(a, b, c);
    let o2 = orientation(a, b, d);
    let o3 = orientation(c, d, a);
    let o4 = orientation(c, d, b);
    o1 * o2 < 0.0 && o3 * o4 < 0.0
}

/// A closed ring whose non-adjacent segments cross each other.
pub fn ring_self_intersects(ring: &LineString<f64>) -> bool {
    let coords = &ring.0;
    let n = coords.len();
    if n < 4 {
        return false;
    }
    let segments = n - 1;
    for i in 0..segments {
        for j in (i + 2)..segments {
            if i == 0 && j == segments - 1 {
                continue; // first and last segment share the closing vertex
            }
            if segments_cross(coords[i], coords[i + 1], coords[j], coords[j + 1]) {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(x: f64, y: f64) -> Coord<f64> {
        Coord { x, y }
    }

    #[test]
    fn projection_reports_distance_along() {
        let path = vec![c(0.0, 0.0), c(10.0, 0.0), c(10.0, 10.0)];
        let p = project_point_to_polyline(c(10.5, 4.0), &path).unwrap();
        assert_eq!(p.segment, 1);
        assert!((p.distance_along - 14.0).abs() < 1e-9);
        assert!((p.distance_to_line - 0.5).abs() < 1e-9);
    }

    #[test]
    fn split_keeps_both_halves_joined() {
        let path = vec![c(0.0, 0.0), c(10.0, 0.0)];
        let p = project_point_to_polyline(c(4.0, 0.1), &path).unwrap();
        let (head, tail) = split_polyline(&path, &p, c(4.0, 0.1));
        assert_eq!(head, vec![c(0.0, 0.0), c(4.0, 0.1)]);
        assert_eq!(tail, vec![c(4.0, 0.1), c(10.0, 0.0)]);
    }

    #[test]
    fn deflection_of_straight_and_right_angle() {
        assert!(deflection_deg(c(0.0, 0.0), c(1.0, 0.0), c(2.0, 0.0)).abs() < 1e-9);
        assert!((deflection_deg(c(0.0, 0.0), c(1.0, 0.0), c(1.0, 1.0)) - 90.0).abs() < 1e-9);
    }

    #[test]
    fn coverage_of_shorter_duplicate() {
        let long = vec![c(0.0, 0.0), c(100.0, 0.0)];
        let short = vec![c(10.0, 0.3), c(60.0, 0.3)];
        assert_eq!(coverage_fraction(&short, &long, 1.0, 5.0), 1.0);
        assert!(coverage_fraction(&long, &short, 1.0, 5.0) < 0.6);
    }

    #[test]
    fn bowtie_ring_is_self_intersecting() {
        let bowtie = LineString::from(vec![(0.0, 0.0), (1.0, 1.0), (1.0, 0.0), (0.0, 1.0), (0.0, 0.0)]);
        let square = LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]);
        assert!(ring_self_intersects(&bowtie));
        assert!(!ring_self_intersects(&square));
    }

    #[test]
    fn tangent_plane_measures_metres_from_origin() {
        let plane = LocalTangentPlane::new(8.5, 47.3);
        let north = plane.project(c(8.5, 47.31));
        assert!(north.x.abs() < 1e-9);
        assert!((north.y - 1111.95).abs() < 0.1, "north {}", north.y);
        let back = plane.unproject(plane.project(c(8.51, 47.31)));
        assert!((back.x - 8.51).abs() < 1e-9 && (back.y - 47.31).abs() < 1e-9);
    }
}
