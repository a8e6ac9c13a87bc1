use geo::{Coord, EuclideanLength, LineString, MultiPolygon, Polygon};
use osm_io::osm::model::coordinate::Coordinate;
use shapefile::{PolygonRing, Shape};

use crate::error::{ConvertError, Result};

/// Scale factor of the fixed-point coordinate representation (seven decimal
/// digits, the precision of the input data).
pub const COORDINATE_PRECISION: f64 = 10_000_000.0;

/// A lon/lat position in fixed-point representation.
///
/// Interning and all node de-duplication is keyed on this type, so equality
/// is exact. Two floats that round to the same seventh decimal digit are the
/// same location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    x: i64,
    y: i64,
}

impl Location {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self {
            x: (lon * COORDINATE_PRECISION).round() as i64,
            y: (lat * COORDINATE_PRECISION).round() as i64,
        }
    }

    pub fn from_coord(c: &Coord<f64>) -> Self {
        Self::new(c.x, c.y)
    }

    pub fn lon(&self) -> f64 {
        self.x as f64 / COORDINATE_PRECISION
    }

    pub fn lat(&self) -> f64 {
        self.y as f64 / COORDINATE_PRECISION
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat(), self.lon())
    }
}

/// Feature geometry as a tagged variant. All polymorphism downstream is a
/// pattern match on this enum.
#[derive(Debug, Clone)]
pub enum Geometry {
    Point(Coord<f64>),
    LineString(LineString<f64>),
    Polygon(Polygon<f64>),
    MultiPolygon(MultiPolygon<f64>),
}

impl Geometry {
    pub fn from_shape(shape: Shape) -> Result<Geometry> {
        match shape {
            Shape::Point(p) => Ok(Geometry::Point(Coord { x: p.x, y: p.y })),
            Shape::PointM(p) => Ok(Geometry::Point(Coord { x: p.x, y: p.y })),
            Shape::PointZ(p) => Ok(Geometry::Point(Coord { x: p.x, y: p.y })),
            Shape::Polyline(line) => {
                let parts = line.parts();
                if parts.len() != 1 {
                    return Err(ConvertError::GeometryMismatch {
                        expected: "single-part polyline",
                        found: format!("polyline with {} parts", parts.len()),
                    });
                }
                let coords: Vec<Coord<f64>> =
                    parts[0].iter().map(|p| Coord { x: p.x, y: p.y }).collect();
                if coords.len() < 2 {
                    return Err(ConvertError::GeometryMismatch {
                        expected: "polyline with at least two vertices",
                        found: format!("polyline with {} vertices", coords.len()),
                    });
                }
                Ok(Geometry::LineString(LineString(coords)))
            }
            Shape::Polygon(polygon) => {
                let mut polys: Vec<Polygon<f64>> = Vec::new();
                let mut pending_inners: Vec<LineString<f64>> = Vec::new();
                for ring in polygon.rings() {
                    let ls = closed_ring(ring.points().iter().map(|p| Coord { x: p.x, y: p.y }));
                    match ring {
                        PolygonRing::Outer(_) => polys.push(Polygon::new(ls, vec![])),
                        PolygonRing::Inner(_) => match polys.last_mut() {
                            Some(poly) => poly.interiors_push(ls),
                            None => pending_inners.push(ls),
                        },
                    }
                }
                if let Some(poly) = polys.first_mut() {
                    for inner in pending_inners.drain(..) {
                        poly.interiors_push(inner);
                    }
                }
                match polys.len() {
                    0 => Err(ConvertError::GeometryMismatch {
                        expected: "polygon",
                        found: "polygon without rings".to_string(),
                    }),
                    1 => Ok(Geometry::Polygon(polys.remove(0))),
                    _ => Ok(Geometry::MultiPolygon(MultiPolygon(polys))),
                }
            }
            other => Err(ConvertError::GeometryMismatch {
                expected: "point, polyline or polygon",
                found: format!("{:?}", other.shapetype()),
            }),
        }
    }

    pub fn into_line_string(self) -> Result<LineString<f64>> {
        match self {
            Geometry::LineString(ls) => Ok(ls),
            other => Err(ConvertError::GeometryMismatch {
                expected: "linestring",
                found: other.type_name().to_string(),
            }),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "point",
            Geometry::LineString(_) => "linestring",
            Geometry::Polygon(_) => "polygon",
            Geometry::MultiPolygon(_) => "multipolygon",
        }
    }
}

fn closed_ring<I: Iterator<Item = Coord<f64>>>(coords: I) -> LineString<f64> {
    let mut coords: Vec<Coord<f64>> = coords.collect();
    if let (Some(first), Some(last)) = (coords.first().copied(), coords.last().copied()) {
        if first != last {
            coords.push(first);
        }
    }
    LineString(coords)
}

fn segment_distance(a: &Coord<f64>, b: &Coord<f64>) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

/// Moves `moving` towards `reference` by `move_distance` (intercept theorem).
fn move_point(moving: &Coord<f64>, reference: &Coord<f64>, move_distance: f64) -> Coord<f64> {
    let distance = segment_distance(moving, reference);
    let ratio = move_distance / distance;
    Coord {
        x: moving.x + ratio * (reference.x - moving.x),
        y: moving.y + ratio * (reference.y - moving.y),
    }
}

fn cut_front(mut cut: f64, coords: &mut Vec<Coord<f64>>) -> Result<()> {
    let mut node_distance = segment_distance(&coords[0], &coords[1]);
    while cut >= node_distance {
        coords.remove(0);
        cut -= node_distance;
        if coords.len() < 2 {
            return Err(ConvertError::Topology("offset curve shorter than cap".to_string()));
        }
        node_distance = segment_distance(&coords[0], &coords[1]);
    }
    if cut > 0.0 {
        coords[0] = move_point(&coords[0], &coords[1], cut);
    }
    Ok(())
}

fn cut_back(mut cut: f64, coords: &mut Vec<Coord<f64>>) -> Result<()> {
    let mut len = coords.len();
    let mut node_distance = segment_distance(&coords[len - 1], &coords[len - 2]);
    while cut >= node_distance {
        coords.pop();
        cut -= node_distance;
        len = coords.len();
        if len < 2 {
            return Err(ConvertError::Topology("offset curve shorter than cap".to_string()));
        }
        node_distance = segment_distance(&coords[len - 1], &coords[len - 2]);
    }
    if cut > 0.0 {
        coords[len - 1] = move_point(&coords[len - 1], &coords[len - 2], cut);
    }
    Ok(())
}

const CAP_CUT_RATIO: f64 = 0.1;
const CAP_MAX_CUT: f64 = 0.00025;

/// Trims both ends of a curve so interpolation ways do not overshoot into
/// junctions. The cut length is `min(0.00025, 0.1 * length)`, consumed
/// vertex by vertex with the final partial step interpolated along the
/// closing segment.
pub fn cut_caps(ls: &LineString<f64>) -> Result<LineString<f64>> {
    let length = ls.euclidean_length();
    if ls.0.len() < 2 || length == 0.0 {
        return Err(ConvertError::Topology("cannot trim degenerate curve".to_string()));
    }
    let cut = CAP_MAX_CUT.min(length * CAP_CUT_RATIO);
    let mut coords = ls.0.clone();
    cut_front(cut, &mut coords)?;
    cut_back(cut, &mut coords)?;
    Ok(LineString(coords))
}

const MITER_LIMIT: f64 = 3.0;

/// Builds a single-sided parallel curve of `ls` at `offset` degrees, on the
/// left or right of the line direction. Joints are mitered with a limit, so
/// near-reversals fall back to the plain segment normal.
pub fn offset_curve(ls: &LineString<f64>, offset: f64, left: bool) -> Result<LineString<f64>> {
    let mut pts: Vec<Coord<f64>> = Vec::with_capacity(ls.0.len());
    for c in &ls.0 {
        if pts.last() != Some(c) {
            pts.push(*c);
        }
    }
    if pts.len() < 2 {
        return Err(ConvertError::Topology("cannot offset degenerate linestring".to_string()));
    }

    let mut normals: Vec<(f64, f64)> = Vec::with_capacity(pts.len() - 1);
    for w in pts.windows(2) {
        let dx = w[1].x - w[0].x;
        let dy = w[1].y - w[0].y;
        let len = dx.hypot(dy);
        if left {
            normals.push((-dy / len, dx / len));
        } else {
            normals.push((dy / len, -dx / len));
        }
    }

    let mut out: Vec<Coord<f64>> = Vec::with_capacity(pts.len());
    let (nx, ny) = normals[0];
    out.push(Coord { x: pts[0].x + nx * offset, y: pts[0].y + ny * offset });

    for i in 1..pts.len() - 1 {
        let (ax, ay) = normals[i - 1];
        let (bx, by) = normals[i];
        let (mut mx, mut my) = (ax + bx, ay + by);
        let mlen = mx.hypot(my);
        let scale;
        if mlen < 1e-12 {
            // segments reverse onto each other, no meaningful miter
            mx = bx;
            my = by;
            scale = offset;
        } else {
            mx /= mlen;
            my /= mlen;
            scale = (offset / (mx * ax + my * ay)).min(offset * MITER_LIMIT);
        }
        out.push(Coord { x: pts[i].x + mx * scale, y: pts[i].y + my * scale });
    }

    let (nx, ny) = normals[normals.len() - 1];
    let last = pts[pts.len() - 1];
    out.push(Coord { x: last.x + nx * offset, y: last.y + ny * offset });

    Ok(LineString(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_fixed_point_equality() {
        let a = Location::new(8.6821270, 50.1109220);
        let b = Location::new(8.68212700000001, 50.11092199999999);
        assert_eq!(a, b);
        assert_eq!(a.lon(), 8.6821270);
        assert_eq!(a.lat(), 50.1109220);
    }

    #[test]
    fn location_distinguishes_seventh_decimal() {
        let a = Location::new(8.6821270, 50.1109220);
        let b = Location::new(8.6821271, 50.1109220);
        assert_ne!(a, b);
    }

    #[test]
    fn offset_curve_left_of_horizontal_line() {
        let ls = LineString(vec![
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 1.0, y: 0.0 },
            Coord { x: 2.0, y: 0.0 },
        ]);
        let off = offset_curve(&ls, 0.1, true).unwrap();
        for c in &off.0 {
            assert!((c.y - 0.1).abs() < 1e-9);
        }
        let off = offset_curve(&ls, 0.1, false).unwrap();
        for c in &off.0 {
            assert!((c.y + 0.1).abs() < 1e-9);
        }
    }

    #[test]
    fn offset_curve_keeps_vertex_count() {
        let ls = LineString(vec![
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 1.0, y: 0.0 },
            Coord { x: 1.0, y: 1.0 },
        ]);
        let off = offset_curve(&ls, 0.05, true).unwrap();
        assert_eq!(off.0.len(), 3);
    }

    #[test]
    fn cut_caps_trims_both_ends() {
        let ls = LineString(vec![
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 0.001, y: 0.0 },
        ]);
        // length 0.001 -> cut = min(0.00025, 0.0001) = 0.0001 per end
        let cut = cut_caps(&ls).unwrap();
        assert_eq!(cut.0.len(), 2);
        assert!((cut.0[0].x - 0.0001).abs() < 1e-12);
        assert!((cut.0[1].x - 0.0009).abs() < 1e-12);
    }

    #[test]
    fn cut_caps_consumes_short_leading_segments() {
        // first segment shorter than the cut, must be dropped entirely
        let ls = LineString(vec![
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 0.00005, y: 0.0 },
            Coord { x: 0.01, y: 0.0 },
        ]);
        let cut = cut_caps(&ls).unwrap();
        assert_eq!(cut.0.len(), 2);
        assert!(cut.0[0].x > 0.00005);
    }

    #[test]
    fn ring_grouping_from_shape() {
        let shape = Shape::Polygon(shapefile::Polygon::with_rings(vec![
            PolygonRing::Outer(vec![
                shapefile::Point::new(0.0, 0.0),
                shapefile::Point::new(0.0, 4.0),
                shapefile::Point::new(4.0, 4.0),
                shapefile::Point::new(4.0, 0.0),
                shapefile::Point::new(0.0, 0.0),
            ]),
            PolygonRing::Inner(vec![
                shapefile::Point::new(1.0, 1.0),
                shapefile::Point::new(2.0, 1.0),
                shapefile::Point::new(2.0, 2.0),
                shapefile::Point::new(1.0, 2.0),
                shapefile::Point::new(1.0, 1.0),
            ]),
        ]));
        match Geometry::from_shape(shape).unwrap() {
            Geometry::Polygon(poly) => {
                assert_eq!(poly.interiors().len(), 1);
                assert_eq!(poly.exterior().0.first(), poly.exterior().0.last());
            }
            other => panic!("expected polygon, got {}", other.type_name()),
        }
    }
}
