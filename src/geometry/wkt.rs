//! Well-Known Text reader for the geometry types the pipeline aggregates.
//!
//! Accepts optional `Z`/`M`/`ZM` dimension tags (extra ordinates are
//! dropped) and both `MULTIPOINT` spellings.

use super::{Coord, Geometry, Polygon};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Number(f64),
    Open,
    Close,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();
    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            _ => {
                let mut end = start;
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '(' | ')' | ',') {
                        break;
                    }
                    end = i + c.len_utf8();
                    chars.next();
                }
                let text = &input[start..end];
                let token = if text.starts_with(|c: char| c.is_ascii_alphabetic()) {
                    // `NaN`/`inf` parse as numbers, everything else alphabetic is a keyword
                    text.parse::<f64>()
                        .map_or_else(|_| Token::Word(text.to_ascii_uppercase()), Token::Number)
                } else {
                    Token::Number(text.parse().map_err(|_| {
                        Error::Geometry(format!("Invalid number {text:?} in WKT"))
                    })?)
                };
                tokens.push(token);
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.next() {
            Some(ref t) if t == expected => Ok(()),
            other => Err(Error::Geometry(format!(
                "Expected {expected:?} in WKT, found {other:?}"
            ))),
        }
    }

    fn keyword(&mut self) -> Result<String> {
        match self.next() {
            Some(Token::Word(w)) => Ok(w),
            other => Err(Error::Geometry(format!(
                "Expected geometry keyword, found {other:?}"
            ))),
        }
    }

    fn skip_dimension_tag(&mut self) -> Result<()> {
        if let Some(Token::Word(w)) = self.peek() {
            match w.as_str() {
                "Z" | "M" | "ZM" => {
                    self.pos += 1;
                }
                "EMPTY" => return Err(Error::Geometry("Empty geometry".to_string())),
                other => {
                    return Err(Error::Geometry(format!("Unexpected WKT keyword {other}")));
                }
            }
        }
        Ok(())
    }

    fn coord(&mut self) -> Result<Coord> {
        let mut ordinates = Vec::with_capacity(2);
        while let Some(Token::Number(n)) = self.peek() {
            ordinates.push(*n);
            self.pos += 1;
        }
        match ordinates.as_slice() {
            [x, y, ..] if ordinates.len() <= 4 => Ok(Coord::new(*x, *y)),
            _ => Err(Error::Geometry(format!(
                "Coordinate needs 2-4 ordinates, found {}",
                ordinates.len()
            ))),
        }
    }

    /// `( item, item, ... )`
    fn list<T>(&mut self, mut item: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        self.expect(&Token::Open)?;
        let mut items = vec![item(self)?];
        while self.peek() == Some(&Token::Comma) {
            self.pos += 1;
            items.push(item(self)?);
        }
        self.expect(&Token::Close)?;
        Ok(items)
    }

    fn coords(&mut self) -> Result<Vec<Coord>> {
        self.list(Self::coord)
    }

    fn multipoint_member(&mut self) -> Result<Coord> {
        if self.peek() == Some(&Token::Open) {
            self.pos += 1;
            let c = self.coord()?;
            self.expect(&Token::Close)?;
            Ok(c)
        } else {
            self.coord()
        }
    }

    fn polygon(&mut self) -> Result<Polygon> {
        let mut rings = self.list(Self::coords)?.into_iter();
        let exterior = rings.next().unwrap_or_default();
        Ok(Polygon {
            exterior,
            interiors: rings.collect(),
        })
    }

    fn geometry(&mut self) -> Result<Geometry> {
        let keyword = self.keyword()?;
        self.skip_dimension_tag()?;
        let geometry = match keyword.as_str() {
            "POINT" => {
                self.expect(&Token::Open)?;
                let c = self.coord()?;
                self.expect(&Token::Close)?;
                Geometry::Point(c)
            }
            "MULTIPOINT" => Geometry::MultiPoint(self.list(Self::multipoint_member)?),
            "LINESTRING" => Geometry::LineString(self.coords()?),
            "MULTILINESTRING" => Geometry::MultiLineString(self.list(Self::coords)?),
            "POLYGON" => Geometry::Polygon(self.polygon()?),
            "MULTIPOLYGON" => Geometry::MultiPolygon(self.list(Self::polygon)?),
            other => {
                return Err(Error::Geometry(format!("Unsupported geometry type {other}")));
            }
        };
        Ok(geometry)
    }
}

/// Parse a WKT string into a [`Geometry`].
///
/// # Errors
/// Returns [`Error::Geometry`] for malformed, empty or unsupported input.
pub fn parse_wkt(input: &str) -> Result<Geometry> {
    let mut parser = Parser {
        tokens: tokenize(input)?,
        pos: 0,
    };
    let geometry = parser.geometry()?;
    if parser.pos != parser.tokens.len() {
        return Err(Error::Geometry(format!("Trailing input in WKT: {input:?}")));
    }
    Ok(geometry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point() {
        assert_eq!(
            parse_wkt("POINT(1.5 -2)").unwrap(),
            Geometry::Point(Coord::new(1.5, -2.0))
        );
    }

    #[test]
    fn test_point_z_drops_ordinate() {
        assert_eq!(
            parse_wkt("point z (1 2 3)").unwrap(),
            Geometry::Point(Coord::new(1.0, 2.0))
        );
    }

    #[test]
    fn test_multipoint_both_spellings() {
        let a = parse_wkt("MULTIPOINT ((1 2), (3 4))").unwrap();
        let b = parse_wkt("MULTIPOINT (1 2, 3 4)").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_polygon_with_hole() {
        let g = parse_wkt(
            "POLYGON ((0 0, 4 0, 4 4, 0 4, 0 0), (1 1, 2 1, 2 2, 1 2, 1 1))",
        )
        .unwrap();
        let Geometry::Polygon(p) = g else {
            panic!("expected polygon");
        };
        assert_eq!(p.exterior.len(), 5);
        assert_eq!(p.interiors.len(), 1);
    }

    #[test]
    fn test_multipolygon() {
        let g = parse_wkt("MULTIPOLYGON (((0 0, 1 0, 1 1, 0 0)), ((5 5, 6 5, 6 6, 5 5)))").unwrap();
        assert_eq!(g.polygons().len(), 2);
    }

    #[test]
    fn test_nan_coordinates_parse() {
        let g = parse_wkt("POLYGON ((NaN 0, 1 0, 1 1, NaN 0))").unwrap();
        assert!(!g.polygons()[0].exterior[0].is_finite());
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(parse_wkt("POINT (1)").is_err());
        assert!(parse_wkt("POINT EMPTY").is_err());
        assert!(parse_wkt("LINESTRING (0 0, 1 1").is_err());
        assert!(parse_wkt("GEOMETRYCOLLECTION (POINT (1 1))").is_err());
        assert!(parse_wkt("POINT (1 1) POINT (2 2)").is_err());
    }
}
