//! Page layout calculations

use std::fmt;
use std::str::FromStr;

/// Page dimensions in points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageDimensions {
    pub width: f32,
    pub height: f32,
}

impl PageDimensions {
    /// US Letter size (8.5" × 11")
    pub fn letter() -> Self {
        Self { width: 612.0, height: 792.0 }
    }

    /// A4 canvas used for image pages
    pub fn a4() -> Self {
        Self { width: 595.28, height: 841.89 }
    }
}

/// An axis-aligned rectangle in default user space (a PDF box)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub llx: f32,
    pub lly: f32,
    pub urx: f32,
    pub ury: f32,
}

impl Rect {
    /// Build from two corners in any order
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { llx: x0.min(x1), lly: y0.min(y1), urx: x0.max(x1), ury: y0.max(y1) }
    }

    pub fn from_dimensions(dims: PageDimensions) -> Self {
        Self::new(0.0, 0.0, dims.width, dims.height)
    }

    pub fn width(&self) -> f32 {
        self.urx - self.llx
    }

    pub fn height(&self) -> f32 {
        self.ury - self.lly
    }
}

/// A 2D affine transformation `[a b c d e f]`, as taken by `cm`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformMatrix {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl TransformMatrix {
    /// Identity matrix (no transformation)
    pub fn identity() -> Self {
        Self { a: 1.0, b: 0.0, c: 0.0, d: 1.0, e: 0.0, f: 0.0 }
    }

    pub fn from_array([a, b, c, d, e, f]: [f32; 6]) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub fn to_array(self) -> [f32; 6] {
        [self.a, self.b, self.c, self.d, self.e, self.f]
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    /// `self` applied first, then `other`; what `self cm` does to a CTM of `other`
    pub fn then(&self, other: &Self) -> Self {
        Self {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    /// Inverse transformation, or `None` for a singular matrix
    pub fn inverse(&self) -> Option<Self> {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() < 1e-10 || !det.is_finite() {
            return None;
        }
        Some(Self {
            a: self.d / det,
            b: -self.b / det,
            c: -self.c / det,
            d: self.a / det,
            e: (self.c * self.f - self.d * self.e) / det,
            f: (self.b * self.e - self.a * self.f) / det,
        })
    }

    /// Map a point through the transformation
    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (self.a * x + self.c * y + self.e, self.b * x + self.d * y + self.f)
    }
}

/// Where an image lands on its page
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub scale: f32,
}

/// Fit an image into the canvas, centered, never upscaling
pub fn fit_centered(canvas: PageDimensions, image_width: f32, image_height: f32) -> Placement {
    let scale = (canvas.width / image_width)
        .min(canvas.height / image_height)
        .min(1.0);
    let width = image_width * scale;
    let height = image_height * scale;
    Placement {
        x: (canvas.width - width) / 2.0,
        y: (canvas.height - height) / 2.0,
        width,
        height,
        scale,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Horizontal {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vertical {
    Top,
    Middle,
    Bottom,
}

/// Anchor of an overlay on the page
///
/// The eight compass anchors plus the page center.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub vertical: Vertical,
    pub horizontal: Horizontal,
}

impl Position {
    pub const fn new(vertical: Vertical, horizontal: Horizontal) -> Self {
        Self { vertical, horizontal }
    }

    pub const BOTTOM_CENTER: Position = Position::new(Vertical::Bottom, Horizontal::Center);
    pub const CENTER: Position = Position::new(Vertical::Middle, Horizontal::Center);

    /// Lower-left corner of a `width` × `height` box anchored inside `page`
    pub fn place(&self, page: Rect, width: f32, height: f32, margin: f32) -> (f32, f32) {
        let x = match self.horizontal {
            Horizontal::Left => page.llx + margin,
            Horizontal::Center => page.llx + (page.width() - width) / 2.0,
            Horizontal::Right => page.urx - margin - width,
        };
        let y = match self.vertical {
            Vertical::Bottom => page.lly + margin,
            Vertical::Middle => page.lly + (page.height() - height) / 2.0,
            Vertical::Top => page.ury - margin - height,
        };
        (x, y)
    }
}

impl FromStr for Position {
    type Err = String;

    /// Accepts `top-left`, `bottom-center`, `center`, `middle-right`, ...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        if normalized == "center" || normalized == "middle" {
            return Ok(Position::CENTER);
        }
        let (v, h) = normalized
            .split_once('-')
            .ok_or_else(|| format!("Invalid position: {s}"))?;
        let vertical = match v {
            "top" => Vertical::Top,
            "middle" | "center" => Vertical::Middle,
            "bottom" => Vertical::Bottom,
            _ => return Err(format!("Invalid position: {s}")),
        };
        let horizontal = match h {
            "left" => Horizontal::Left,
            "center" => Horizontal::Center,
            "right" => Horizontal::Right,
            _ => return Err(format!("Invalid position: {s}")),
        };
        Ok(Position::new(vertical, horizontal))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Position::CENTER {
            return write!(f, "center");
        }
        let v = match self.vertical {
            Vertical::Top => "top",
            Vertical::Middle => "middle",
            Vertical::Bottom => "bottom",
        };
        let h = match self.horizontal {
            Horizontal::Left => "left",
            Horizontal::Center => "center",
            Horizontal::Right => "right",
        };
        write!(f, "{v}-{h}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_google_docs_transform_inverse() {
        let flip = TransformMatrix::from_array([0.24, 0.0, 0.0, -0.24, 0.0, 792.0]);
        let inverse = flip.inverse().expect("invertible");
        let round_trip = inverse.then(&flip);
        for (got, want) in round_trip.to_array().iter().zip(TransformMatrix::identity().to_array()) {
            assert!((got - want).abs() < 1e-3, "{round_trip:?}");
        }
        let (x, y) = flip.apply(100.0, 100.0);
        assert!((x - 24.0).abs() < 1e-3 && (y - 768.0).abs() < 1e-3);
        assert!(TransformMatrix::from_array([0.0; 6]).inverse().is_none());
    }

    #[test]
    fn test_fit_tall_image_on_a4() {
        let placement = fit_centered(PageDimensions::a4(), 1000.0, 2000.0);
        assert!((placement.scale - 0.420_945).abs() < 1e-4);
        assert!((placement.width - 420.9).abs() < 0.1);
        assert!((placement.height - 841.89).abs() < 0.1);
        assert!((placement.x - 87.19).abs() < 0.1);
        assert!(placement.y.abs() < 0.01);
    }

    #[test]
    fn test_small_image_is_not_upscaled() {
        let placement = fit_centered(PageDimensions::a4(), 100.0, 50.0);
        assert_eq!(placement.scale, 1.0);
        assert_eq!(placement.width, 100.0);
        assert!((placement.x - 247.64).abs() < 0.01);
    }

    #[test]
    fn test_position_parsing() {
        assert_eq!("bottom-right".parse::<Position>().expect("parse"),
            Position::new(Vertical::Bottom, Horizontal::Right));
        assert_eq!("Top_Left".parse::<Position>().expect("parse"),
            Position::new(Vertical::Top, Horizontal::Left));
        assert_eq!("center".parse::<Position>().expect("parse"), Position::CENTER);
        assert!("upper-left".parse::<Position>().is_err());
        assert_eq!(Position::BOTTOM_CENTER.to_string(), "bottom-center");
    }

    #[test]
    fn test_place_uses_page_origin() {
        let page = Rect::new(10.0, 20.0, 610.0, 820.0);
        let top_right = Position::new(Vertical::Top, Horizontal::Right);
        assert_eq!(top_right.place(page, 24.0, 12.0, 30.0), (556.0, 778.0));
        assert_eq!(Position::BOTTOM_CENTER.place(page, 20.0, 12.0, 30.0), (300.0, 50.0));
    }
}
