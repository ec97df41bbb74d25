//! Orientation normalization
//!
//! Container rotation hints are expressed as a count of counter-clockwise
//! quarter-turns and applied to each decoded frame before it reaches the
//! display sink. The output is always a freshly packed buffer.

use super::{VideoFrame, BYTES_PER_PIXEL};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Rotation hint carried by the stream, in degrees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct Rotation(i32);

impl Rotation {
    pub const NONE: Rotation = Rotation(0);

    /// Accepts 0, ±90, ±180 and ±270
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees {
            0 | 90 | 180 | 270 | -90 | -180 | -270 => Some(Rotation(degrees)),
            _ => None,
        }
    }

    /// Round a raw hint (e.g. from a display matrix) to the nearest supported angle
    ///
    /// Hints more than a degree away from a multiple of 90 are ignored.
    pub fn from_hint(degrees: f64) -> Self {
        if !degrees.is_finite() {
            return Rotation::NONE;
        }
        let rounded = (degrees / 90.0).round() * 90.0;
        if (rounded - degrees).abs() > 1.0 {
            log::warn!("Ignoring rotation hint {:.2} (not a multiple of 90)", degrees);
            return Rotation::NONE;
        }
        // 360 and -360 wrap to 0
        let wrapped = (rounded as i32) % 360;
        Rotation::from_degrees(wrapped).unwrap_or(Rotation::NONE)
    }

    /// Rotation stored in a 3x3 display matrix (nine native-endian i32s)
    ///
    /// Returns `None` for short or degenerate matrices.
    pub fn from_display_matrix(data: &[u8]) -> Option<Self> {
        if data.len() < 36 {
            return None;
        }
        let mut matrix = [0i32; 9];
        for (value, bytes) in matrix.iter_mut().zip(data.chunks_exact(4)) {
            *value = i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        }
        display_matrix_degrees(&matrix).map(Rotation::from_hint)
    }

    pub fn degrees(&self) -> i32 {
        self.0
    }

    /// Counter-clockwise quarter-turns that undo this rotation on screen
    pub fn quarter_turns(&self) -> u8 {
        match self.0 {
            90 | -270 => 1,
            180 | -180 => 2,
            270 | -90 => 3,
            _ => 0,
        }
    }

    /// Whether displayed width and height are swapped relative to the coded frame
    ///
    /// Follows the quarter-turn count, so -270 swaps like 90.
    pub fn swaps_dimensions(&self) -> bool {
        self.quarter_turns() % 2 == 1
    }

    /// Displayed (width, height) for a coded frame size
    pub fn display_size(&self, width: u32, height: u32) -> (u32, u32) {
        if self.swaps_dimensions() {
            (height, width)
        } else {
            (width, height)
        }
    }
}

impl TryFrom<i32> for Rotation {
    type Error = String;

    fn try_from(degrees: i32) -> Result<Self, Self::Error> {
        Rotation::from_degrees(degrees)
            .ok_or_else(|| format!("unsupported rotation {} (expected 0, ±90, ±180, ±270)", degrees))
    }
}

impl From<Rotation> for i32 {
    fn from(rotation: Rotation) -> i32 {
        rotation.0
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.0)
    }
}

/// Counter-clockwise angle encoded in a display matrix
///
/// The first two rows hold a 16.16 fixed-point rotation and scale; the
/// angle is the negated argument of the first column.
pub fn display_matrix_degrees(matrix: &[i32; 9]) -> Option<f64> {
    let fixed = |v: i32| v as f64 / 65536.0;
    let scale_x = fixed(matrix[0]).hypot(fixed(matrix[3]));
    let scale_y = fixed(matrix[1]).hypot(fixed(matrix[4]));
    if scale_x == 0.0 || scale_y == 0.0 {
        return None;
    }

    let radians = (fixed(matrix[1]) / scale_y).atan2(fixed(matrix[0]) / scale_x);
    let degrees = -radians.to_degrees();
    // -0.0 from an identity matrix
    Some(if degrees == 0.0 { 0.0 } else { degrees })
}

/// Apply a stream rotation to a decoded frame
pub fn normalize(frame: VideoFrame, rotation: Rotation) -> VideoFrame {
    rotate_quarter_turns(frame, rotation.quarter_turns())
}

/// Rotate a frame counter-clockwise by `turns` quarter-turns
pub fn rotate_quarter_turns(frame: VideoFrame, turns: u8) -> VideoFrame {
    let turns = turns % 4;
    if turns == 0 {
        return frame;
    }

    let w = frame.width as usize;
    let h = frame.height as usize;
    let (out_w, out_h) = if turns % 2 == 1 { (h, w) } else { (w, h) };
    let mut out = vec![0u8; frame.pixels.len()];

    for y in 0..out_h {
        for x in 0..out_w {
            // Source coordinate for destination (x, y)
            let (sx, sy) = match turns {
                1 => (w - 1 - y, x),
                2 => (w - 1 - x, h - 1 - y),
                _ => (y, h - 1 - x),
            };
            let src = (sy * w + sx) * BYTES_PER_PIXEL;
            let dst = (y * out_w + x) * BYTES_PER_PIXEL;
            out[dst..dst + BYTES_PER_PIXEL].copy_from_slice(&frame.pixels[src..src + BYTES_PER_PIXEL]);
        }
    }

    VideoFrame {
        pixels: out,
        pts: frame.pts,
        width: out_w as u32,
        height: out_h as u32,
    }
}
