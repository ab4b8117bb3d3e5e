//! Polygon/rectangle intersection areas
//!
//! Sutherland-Hodgman clipping against an axis-aligned rectangle followed
//! by the shoelace formula. Exact for simple rings because the clip window
//! is convex.

use super::{Coord, Polygon};

/// Axis-aligned rectangle, e.g. a grid cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    /// Left edge.
    pub min_x: f64,
    /// Bottom edge.
    pub min_y: f64,
    /// Right edge.
    pub max_x: f64,
    /// Top edge.
    pub max_y: f64,
}

impl Rect {
    /// Rectangle from two corner ordinates; edges are sorted.
    #[must_use]
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            min_x: x0.min(x1),
            min_y: y0.min(y1),
            max_x: x0.max(x1),
            max_y: y0.max(y1),
        }
    }

    /// Smallest rectangle containing every coordinate.
    #[must_use]
    pub fn enclosing(coords: &[Coord]) -> Option<Self> {
        let first = coords.first()?;
        let init = Self::new(first.x, first.y, first.x, first.y);
        Some(coords.iter().skip(1).fold(init, |r, c| Self {
            min_x: r.min_x.min(c.x),
            min_y: r.min_y.min(c.y),
            max_x: r.max_x.max(c.x),
            max_y: r.max_y.max(c.y),
        }))
    }

    /// Area.
    #[must_use]
    pub fn area(&self) -> f64 {
        (self.max_x - self.min_x) * (self.max_y - self.min_y)
    }
}

/// Unsigned shoelace area of a ring. Closed and open rings agree.
#[must_use]
pub fn ring_area(ring: &[Coord]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let twice: f64 = ring
        .iter()
        .zip(ring.iter().cycle().skip(1))
        .map(|(a, b)| a.x * b.y - b.x * a.y)
        .sum();
    twice.abs() / 2.0
}

#[derive(Clone, Copy)]
enum Edge {
    Left(f64),
    Right(f64),
    Bottom(f64),
    Top(f64),
}

impl Edge {
    fn inside(self, c: Coord) -> bool {
        match self {
            Self::Left(v) => c.x >= v,
            Self::Right(v) => c.x <= v,
            Self::Bottom(v) => c.y >= v,
            Self::Top(v) => c.y <= v,
        }
    }

    fn intersect(self, a: Coord, b: Coord) -> Coord {
        match self {
            Self::Left(v) | Self::Right(v) => {
                let t = (v - a.x) / (b.x - a.x);
                Coord::new(v, a.y + t * (b.y - a.y))
            }
            Self::Bottom(v) | Self::Top(v) => {
                let t = (v - a.y) / (b.y - a.y);
                Coord::new(a.x + t * (b.x - a.x), v)
            }
        }
    }
}

/// Clip a ring to `rect`. The output ring is open (first vertex not
/// repeated) and empty when the ring misses the rectangle.
#[must_use]
pub fn clip_ring(ring: &[Coord], rect: &Rect) -> Vec<Coord> {
    let mut output: Vec<Coord> = ring.to_vec();
    if output.len() > 1 && output.first() == output.last() {
        output.pop();
    }

    for edge in [
        Edge::Left(rect.min_x),
        Edge::Right(rect.max_x),
        Edge::Bottom(rect.min_y),
        Edge::Top(rect.max_y),
    ] {
        if output.is_empty() {
            break;
        }
        let input = std::mem::take(&mut output);
        let mut prev = input[input.len() - 1];
        for &curr in &input {
            match (edge.inside(prev), edge.inside(curr)) {
                (true, true) => output.push(curr),
                (true, false) => output.push(edge.intersect(prev, curr)),
                (false, true) => {
                    output.push(edge.intersect(prev, curr));
                    output.push(curr);
                }
                (false, false) => {}
            }
            prev = curr;
        }
    }
    output
}

/// Area of `polygon ∩ rect`: exterior overlap minus hole overlaps.
#[must_use]
pub fn polygon_rect_area(polygon: &Polygon, rect: &Rect) -> f64 {
    let outer = ring_area(&clip_ring(&polygon.exterior, rect));
    let holes: f64 = polygon
        .interiors
        .iter()
        .map(|hole| ring_area(&clip_ring(hole, rect)))
        .sum();
    (outer - holes).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<Coord> {
        vec![
            Coord::new(x0, y0),
            Coord::new(x1, y0),
            Coord::new(x1, y1),
            Coord::new(x0, y1),
            Coord::new(x0, y0),
        ]
    }

    #[test]
    fn test_ring_area() {
        assert_eq!(ring_area(&square(0.0, 0.0, 2.0, 3.0)), 6.0);
        let triangle = [Coord::new(0.0, 0.0), Coord::new(4.0, 0.0), Coord::new(0.0, 2.0)];
        assert_eq!(ring_area(&triangle), 4.0);
        assert_eq!(ring_area(&triangle[..2]), 0.0);
    }

    #[test]
    fn test_clip_fully_inside() {
        let rect = Rect::new(-10.0, -10.0, 10.0, 10.0);
        let poly = Polygon::new(square(0.0, 0.0, 1.0, 1.0));
        assert_eq!(polygon_rect_area(&poly, &rect), 1.0);
    }

    #[test]
    fn test_clip_half_overlap() {
        let rect = Rect::new(0.0, 0.0, 1.0, 1.0);
        let poly = Polygon::new(square(0.5, 0.0, 1.5, 1.0));
        assert!((polygon_rect_area(&poly, &rect) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_clip_disjoint() {
        let rect = Rect::new(0.0, 0.0, 1.0, 1.0);
        let poly = Polygon::new(square(2.0, 2.0, 3.0, 3.0));
        assert_eq!(polygon_rect_area(&poly, &rect), 0.0);
    }

    #[test]
    fn test_hole_subtracts() {
        let rect = Rect::new(0.0, 0.0, 4.0, 4.0);
        let poly = Polygon {
            exterior: square(0.0, 0.0, 4.0, 4.0),
            interiors: vec![square(1.0, 1.0, 2.0, 2.0)],
        };
        assert_eq!(polygon_rect_area(&poly, &rect), 15.0);
    }

    #[test]
    fn test_triangle_clipped_by_cell() {
        // Right triangle (0,0)-(2,0)-(0,2) against the unit cell covers it all.
        let rect = Rect::new(0.0, 0.0, 1.0, 1.0);
        let poly = Polygon::new(vec![
            Coord::new(0.0, 0.0),
            Coord::new(2.0, 0.0),
            Coord::new(0.0, 2.0),
        ]);
        assert!((polygon_rect_area(&poly, &rect) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_enclosing() {
        let r = Rect::enclosing(&square(1.0, 2.0, 3.0, 5.0)).unwrap();
        assert_eq!(r, Rect::new(1.0, 2.0, 3.0, 5.0));
        assert!(Rect::enclosing(&[]).is_none());
    }
}
