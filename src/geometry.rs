//! Rotation-aware quad geometry.
//!
//! Every filter pass draws the same four-vertex strip; what changes per
//! input is the texture-coordinate corner assignment, selected by the
//! producer's [`Rotation`]. Coordinates use u right / v down with v = 0 at
//! the top row of the source image.

use serde::{Deserialize, Serialize};

/// How a consumer must reinterpret a producer's frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rotation {
    #[default]
    None,
    /// 90 degrees counter-clockwise.
    RotateLeft,
    /// 90 degrees clockwise.
    RotateRight,
    FlipVertical,
    FlipHorizontal,
    RotateRightFlipVertical,
    RotateRightFlipHorizontal,
    RotateLeftFlipHorizontal,
    Rotate180,
}

impl Rotation {
    /// True for modes that exchange the frame's width and height.
    pub fn swaps_dimensions(self) -> bool {
        matches!(
            self,
            Rotation::RotateLeft
                | Rotation::RotateRight
                | Rotation::RotateRightFlipVertical
                | Rotation::RotateRightFlipHorizontal
                | Rotation::RotateLeftFlipHorizontal
        )
    }

    /// The rotation that undoes this one.
    pub fn inverse(self) -> Rotation {
        match self {
            Rotation::RotateLeft => Rotation::RotateRight,
            Rotation::RotateRight => Rotation::RotateLeft,
            other => other,
        }
    }
}

/// Pixel dimensions of a frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_zero(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Dimensions as seen after applying `rotation`.
    pub fn rotated(self, rotation: Rotation) -> Self {
        if rotation.swaps_dimensions() {
            Self {
                width: self.height,
                height: self.width,
            }
        } else {
            self
        }
    }
}

/// Frame timestamp in seconds. Producers must hand out non-decreasing
/// values per stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd)]
pub struct FrameTime(pub f64);

impl FrameTime {
    pub fn from_seconds(seconds: f64) -> Self {
        Self(seconds)
    }
}

/// Quad corners in strip order: bottom-left, bottom-right, top-left,
/// top-right. Drawn as a four-vertex triangle strip.
pub const QUAD_VERTEX_COUNT: u32 = 4;

/// Normalized-device positions of the full-screen quad, strip order.
pub fn quad_positions() -> [[f32; 2]; 4] {
    [[-1.0, -1.0], [1.0, -1.0], [-1.0, 1.0], [1.0, 1.0]]
}

/// Quad positions shrunk toward center by per-axis scale factors.
///
/// Used for aspect-fit letterboxing; degenerates to [`quad_positions`]
/// when both scales are 1.0.
pub fn scaled_quad_positions(width_scale: f32, height_scale: f32) -> [[f32; 2]; 4] {
    [
        [-width_scale, -height_scale],
        [width_scale, -height_scale],
        [-width_scale, height_scale],
        [width_scale, height_scale],
    ]
}

/// Texture coordinates for each quad corner such that sampling with them
/// applies `rotation` to the source image.
pub fn texture_coordinates(rotation: Rotation) -> [[f32; 2]; 4] {
    match rotation {
        Rotation::None => [[0.0, 1.0], [1.0, 1.0], [0.0, 0.0], [1.0, 0.0]],
        Rotation::RotateLeft => [[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]],
        Rotation::RotateRight => [[1.0, 1.0], [1.0, 0.0], [0.0, 1.0], [0.0, 0.0]],
        Rotation::FlipVertical => [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]],
        Rotation::FlipHorizontal => [[1.0, 1.0], [0.0, 1.0], [1.0, 0.0], [0.0, 0.0]],
        Rotation::RotateRightFlipVertical => {
            [[0.0, 1.0], [0.0, 0.0], [1.0, 1.0], [1.0, 0.0]]
        }
        Rotation::RotateRightFlipHorizontal => {
            [[1.0, 0.0], [1.0, 1.0], [0.0, 0.0], [0.0, 1.0]]
        }
        Rotation::RotateLeftFlipHorizontal => {
            [[0.0, 1.0], [0.0, 0.0], [1.0, 1.0], [1.0, 0.0]]
        }
        Rotation::Rotate180 => [[1.0, 0.0], [0.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
    }
}

/// Where a normalized source-space point lands after `rotation`.
pub fn rotated_point(point: [f32; 2], rotation: Rotation) -> [f32; 2] {
    let [x, y] = point;
    match rotation {
        Rotation::None => [x, y],
        Rotation::RotateLeft => [y, 1.0 - x],
        Rotation::RotateRight => [1.0 - y, x],
        Rotation::FlipVertical => [x, 1.0 - y],
        Rotation::FlipHorizontal => [1.0 - x, y],
        Rotation::RotateRightFlipVertical => [1.0 - y, 1.0 - x],
        Rotation::RotateRightFlipHorizontal => [y, x],
        Rotation::RotateLeftFlipHorizontal => [1.0 - y, 1.0 - x],
        Rotation::Rotate180 => [1.0 - x, 1.0 - y],
    }
}

/// Dimensions of `size` after `rotation`.
pub fn rotated_size(size: FrameSize, rotation: Rotation) -> FrameSize {
    size.rotated(rotation)
}

pub(crate) const ALL_ROTATIONS: [Rotation; 9] = [
    Rotation::None,
    Rotation::RotateLeft,
    Rotation::RotateRight,
    Rotation::FlipVertical,
    Rotation::FlipHorizontal,
    Rotation::RotateRightFlipVertical,
    Rotation::RotateRightFlipHorizontal,
    Rotation::RotateLeftFlipHorizontal,
    Rotation::Rotate180,
];

#[cfg(test)]
mod tests {
    use super::*;

    /// Screen-space uv of each quad corner, strip order.
    const CORNER_UV: [[f32; 2]; 4] = [[0.0, 1.0], [1.0, 1.0], [0.0, 0.0], [1.0, 0.0]];

    #[test]
    fn test_no_rotation_is_identity_sampling() {
        assert_eq!(texture_coordinates(Rotation::None), CORNER_UV);
    }

    #[test]
    fn test_texcoords_agree_with_inverse_point_transform() {
        // Corner c of the output samples the source at R^-1(uv(c)).
        for rotation in ALL_ROTATIONS {
            let coords = texture_coordinates(rotation);
            for (corner, uv) in CORNER_UV.iter().enumerate() {
                let expected = rotated_point(*uv, rotation.inverse());
                assert_eq!(
                    coords[corner], expected,
                    "{rotation:?} corner {corner}"
                );
            }
        }
    }

    #[test]
    fn test_rotation_inverse_round_trips_points() {
        let samples = [[0.0, 0.0], [1.0, 0.0], [0.25, 0.75], [0.5, 0.5]];
        for rotation in ALL_ROTATIONS {
            for p in samples {
                let there = rotated_point(p, rotation);
                let back = rotated_point(there, rotation.inverse());
                assert_eq!(back, p, "{rotation:?} failed to round-trip {p:?}");
            }
        }
    }

    #[test]
    fn test_swap_modes_invert_aspect() {
        let size = FrameSize::new(1920, 1080);
        for rotation in ALL_ROTATIONS {
            let rotated = rotated_size(size, rotation);
            if rotation.swaps_dimensions() {
                assert_eq!(rotated, FrameSize::new(1080, 1920), "{rotation:?}");
            } else {
                assert_eq!(rotated, size, "{rotation:?}");
            }
        }
    }

    #[test]
    fn test_unit_scale_matches_plain_quad() {
        assert_eq!(scaled_quad_positions(1.0, 1.0), quad_positions());
    }

    #[test]
    fn test_scaled_quad_shrinks_toward_center() {
        let scaled = scaled_quad_positions(0.5, 0.25);
        for [x, y] in scaled {
            assert!(x.abs() <= 0.5 && y.abs() <= 0.25);
        }
    }
}
