//! Infrastructure geometries and classification
//!
//! Features are partitioned by geometry kind because each kind takes a
//! different aggregation path: points are sampled, lines are sampled at
//! their vertices, polygons get area-weighted zonal statistics. Multi-part
//! geometries are grouped with their base kind.

mod clip;
mod wkt;

pub use clip::{clip_ring, polygon_rect_area, ring_area, Rect};
pub use wkt::parse_wkt;

use crate::{Error, Result};
use rustc_hash::FxHashSet;
use std::str::FromStr;

/// A 2-D coordinate in the configured reference system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coord {
    /// Easting / longitude.
    pub x: f64,
    /// Northing / latitude.
    pub y: f64,
}

impl Coord {
    /// Create a coordinate.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Whether both ordinates are finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// A polygon with one exterior ring and zero or more holes.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    /// Exterior ring.
    pub exterior: Vec<Coord>,
    /// Interior rings (holes).
    pub interiors: Vec<Vec<Coord>>,
}

impl Polygon {
    /// Polygon without holes.
    #[must_use]
    pub fn new(exterior: Vec<Coord>) -> Self {
        Self {
            exterior,
            interiors: Vec::new(),
        }
    }

    /// Axis-aligned bounding box of the exterior ring.
    #[must_use]
    pub fn bounds(&self) -> Option<Rect> {
        Rect::enclosing(&self.exterior)
    }
}

/// Feature geometry.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    /// Single point.
    Point(Coord),
    /// Set of points.
    MultiPoint(Vec<Coord>),
    /// Polyline.
    LineString(Vec<Coord>),
    /// Set of polylines.
    MultiLineString(Vec<Vec<Coord>>),
    /// Polygon with holes.
    Polygon(Polygon),
    /// Set of polygons.
    MultiPolygon(Vec<Polygon>),
}

/// Aggregation family of a geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryKind {
    /// `Point`, `MultiPoint`
    Point,
    /// `LineString`, `MultiLineString`
    Line,
    /// `Polygon`, `MultiPolygon`
    Polygon,
}

impl Geometry {
    /// Aggregation family.
    #[must_use]
    pub const fn kind(&self) -> GeometryKind {
        match self {
            Self::Point(_) | Self::MultiPoint(_) => GeometryKind::Point,
            Self::LineString(_) | Self::MultiLineString(_) => GeometryKind::Line,
            Self::Polygon(_) | Self::MultiPolygon(_) => GeometryKind::Polygon,
        }
    }

    /// Every vertex of point and line geometries, in order, duplicates
    /// removed. Polygons yield their exterior rings.
    #[must_use]
    pub fn vertices(&self) -> Vec<Coord> {
        let all: Vec<Coord> = match self {
            Self::Point(c) => vec![*c],
            Self::MultiPoint(cs) | Self::LineString(cs) => cs.clone(),
            Self::MultiLineString(lines) => lines.iter().flatten().copied().collect(),
            Self::Polygon(p) => p.exterior.clone(),
            Self::MultiPolygon(ps) => ps.iter().flat_map(|p| p.exterior.iter().copied()).collect(),
        };
        let mut seen: FxHashSet<(u64, u64)> = FxHashSet::default();
        all.into_iter()
            .filter(|c| seen.insert((c.x.to_bits(), c.y.to_bits())))
            .collect()
    }

    /// Polygon parts (empty for non-polygons).
    #[must_use]
    pub fn polygons(&self) -> &[Polygon] {
        match self {
            Self::Polygon(p) => std::slice::from_ref(p),
            Self::MultiPolygon(ps) => ps,
            _ => &[],
        }
    }
}

impl FromStr for Geometry {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_wkt(s)
    }
}

/// An infrastructure asset supplied read-only by the asset inventory.
#[derive(Debug, Clone, PartialEq)]
pub struct InfrastructureFeature {
    /// Stable external id (e.g. OpenStreetMap id).
    pub id: i64,
    /// Geometry in the configured reference system.
    pub geometry: Geometry,
}

impl InfrastructureFeature {
    /// Create a feature.
    #[must_use]
    pub const fn new(id: i64, geometry: Geometry) -> Self {
        Self { id, geometry }
    }

    /// Parse a feature from an `(id, WKT)` pair.
    ///
    /// # Errors
    /// Returns error if the WKT is malformed.
    pub fn from_wkt(id: i64, wkt: &str) -> Result<Self> {
        Ok(Self::new(id, parse_wkt(wkt)?))
    }
}

/// Disjoint point-like, line-like and polygon-like feature subsets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifiedFeatures {
    /// `Point` / `MultiPoint`
    pub points: Vec<InfrastructureFeature>,
    /// `LineString` / `MultiLineString`
    pub lines: Vec<InfrastructureFeature>,
    /// `Polygon` / `MultiPolygon`
    pub polygons: Vec<InfrastructureFeature>,
}

impl ClassifiedFeatures {
    /// Total number of features across all kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len() + self.lines.len() + self.polygons.len()
    }

    /// Whether there are no features.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Partition features by geometry kind, preserving input order.
#[must_use]
pub fn classify(features: impl IntoIterator<Item = InfrastructureFeature>) -> ClassifiedFeatures {
    let mut out = ClassifiedFeatures::default();
    for feature in features {
        match feature.geometry.kind() {
            GeometryKind::Point => out.points.push(feature),
            GeometryKind::Line => out.lines.push(feature),
            GeometryKind::Polygon => out.polygons.push(feature),
        }
    }
    out
}
