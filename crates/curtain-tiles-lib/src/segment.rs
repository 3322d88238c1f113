//! Normalized curtain rectangles and the texture remap used by fallback tiles

/// A rectangular region of the curtain in normalized coordinates
///
/// `start`/`end` are fractions of the path length, `top`/`bottom` are fractions of the curtain
/// depth (0 = top edge, 1 = bottom edge).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Segment {
    /// Percent along the path where the segment begins
    pub start: f64,
    /// Percent along the path where the segment ends
    pub end: f64,
    /// Percent of depth of the segment's upper edge
    pub top: f64,
    /// Percent of depth of the segment's lower edge
    pub bottom: f64,
}

impl Segment {
    /// The whole curtain
    pub const FULL: Segment = Segment {
        start: 0.0,
        end: 1.0,
        top: 0.0,
        bottom: 1.0,
    };

    pub const fn new(start: f64, end: f64, top: f64, bottom: f64) -> Self {
        Self {
            start,
            end,
            top,
            bottom,
        }
    }

    /// Width of the segment along the path
    #[inline]
    pub fn horizontal_delta(&self) -> f64 {
        self.end - self.start
    }

    /// Height of the segment in depth percent
    #[inline]
    pub fn vertical_delta(&self) -> f64 {
        self.bottom - self.top
    }

    #[inline]
    pub fn horizontal_center(&self) -> f64 {
        (self.start + self.end) * 0.5
    }

    #[inline]
    pub fn vertical_center(&self) -> f64 {
        (self.top + self.bottom) * 0.5
    }

    /// Check whether `other` lies completely within this segment
    pub fn contains(&self, other: &Segment) -> bool {
        const EPSILON: f64 = 1e-12;
        other.start >= self.start - EPSILON
            && other.end <= self.end + EPSILON
            && other.top >= self.top - EPSILON
            && other.bottom <= self.bottom + EPSILON
    }
}

/// Affine texture coordinate remap `(u, v) -> (offset + scale * (u, v))`
///
/// Used to draw a tile with the texture of one of its ancestors: no resampling is involved,
/// the tile's texture coordinates are simply moved into the sub-rectangle of the ancestor
/// texture that covers the tile.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TexCoordTransform {
    pub scale_u: f64,
    pub scale_v: f64,
    pub offset_u: f64,
    pub offset_v: f64,
}

impl TexCoordTransform {
    pub const IDENTITY: TexCoordTransform = TexCoordTransform {
        scale_u: 1.0,
        scale_v: 1.0,
        offset_u: 0.0,
        offset_v: 0.0,
    };

    /// Transform mapping the texture coordinates of `tile` into those of `ancestor`
    pub fn for_fallback(tile: &Segment, ancestor: &Segment) -> Self {
        let ancestor_h = ancestor.horizontal_delta();
        let ancestor_v = ancestor.vertical_delta();
        if ancestor_h <= 0.0 || ancestor_v <= 0.0 {
            return Self::IDENTITY;
        }

        Self {
            scale_u: tile.horizontal_delta() / ancestor_h,
            scale_v: tile.vertical_delta() / ancestor_v,
            offset_u: (tile.start - ancestor.start) / ancestor_h,
            offset_v: (tile.top - ancestor.top) / ancestor_v,
        }
    }

    #[inline]
    pub fn apply(&self, u: f64, v: f64) -> (f64, f64) {
        (
            self.offset_u + self.scale_u * u,
            self.offset_v + self.scale_v * v,
        )
    }

    /// Column-major 4x4 texture matrix, as expected by most graphics APIs
    pub fn to_matrix(&self) -> glam::DMat4 {
        glam::DMat4::from_cols_array(&[
            self.scale_u,
            0.0,
            0.0,
            0.0,
            0.0,
            self.scale_v,
            0.0,
            0.0,
            0.0,
            0.0,
            1.0,
            0.0,
            self.offset_u,
            self.offset_v,
            0.0,
            1.0,
        ])
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

impl Default for TexCoordTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}
