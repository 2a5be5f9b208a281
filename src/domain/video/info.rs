// SPDX-License-Identifier: MPL-2.0
//! Static description of a video source.
//!
//! [`VideoInfo`] is discovered once when a source is opened and never
//! mutated afterwards; seeking reuses it.

use super::newtypes::FrameRate;

/// Projection of the captured image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Projection {
    #[default]
    Rectilinear,
    Equirectangular,
    HalfEquirectangular,
    Fisheye,
}

impl std::fmt::Display for Projection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Projection::Rectilinear => "rectilinear",
            Projection::Equirectangular => "equirectangular",
            Projection::HalfEquirectangular => "half equirectangular",
            Projection::Fisheye => "fisheye",
        };
        f.write_str(name)
    }
}

/// Color primaries tagged on the video track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorPrimaries {
    #[default]
    Bt709,
    Bt2020,
    DisplayP3,
    Unspecified,
}

/// Transfer function used by the decoded output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferFunction {
    #[default]
    Bt709,
    Linear,
    Pq,
    Hlg,
}

/// Matrix used to turn YCbCr samples into RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum YcbcrMatrix {
    Bt601,
    #[default]
    Bt709,
    Bt2020,
}

/// Video-range YCbCr to RGB coefficients, for normalized sample values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YcbcrCoefficients {
    /// Rows of the 3x3 matrix applied to `(Y, Cb, Cr) - offset`.
    pub rows: [[f32; 3]; 3],
    /// Offsets subtracted from `(Y, Cb, Cr)` before the matrix.
    pub offset: [f32; 3],
}

impl YcbcrMatrix {
    #[must_use]
    pub fn coefficients(self) -> YcbcrCoefficients {
        const Y_SCALE: f32 = 255.0 / 219.0;
        let (rv, gu, gv, bu) = match self {
            YcbcrMatrix::Bt601 => (1.596, -0.392, -0.813, 2.017),
            YcbcrMatrix::Bt709 => (1.793, -0.213, -0.533, 2.112),
            YcbcrMatrix::Bt2020 => (1.679, -0.187, -0.650, 2.142),
        };
        YcbcrCoefficients {
            rows: [
                [Y_SCALE, 0.0, rv],
                [Y_SCALE, gu, gv],
                [Y_SCALE, bu, 0.0],
            ],
            offset: [16.0 / 255.0, 0.5, 0.5],
        }
    }
}

/// Color description attached to the output of a decode session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColorDescription {
    pub primaries: ColorPrimaries,
    pub transfer: TransferFunction,
    pub matrix: YcbcrMatrix,
}

impl ColorDescription {
    /// Output description for a source with the given primaries.
    ///
    /// Wide-gamut sources are decoded to linear light in the BT.2020 space,
    /// everything else falls back to BT.709.
    #[must_use]
    pub fn for_primaries(primaries: ColorPrimaries) -> Self {
        match primaries {
            ColorPrimaries::Bt2020 => Self {
                primaries: ColorPrimaries::Bt2020,
                transfer: TransferFunction::Linear,
                matrix: YcbcrMatrix::Bt2020,
            },
            _ => Self {
                primaries: ColorPrimaries::Bt709,
                transfer: TransferFunction::Bt709,
                matrix: YcbcrMatrix::Bt709,
            },
        }
    }
}

/// Static metadata of an opened source.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    /// Per-eye pixel width.
    pub width: u32,
    /// Per-eye pixel height.
    pub height: u32,
    /// True when the track carries a stereo pair (multiview).
    pub is_spatial: bool,
    pub frame_rate: FrameRate,
    pub duration_secs: f64,
    pub projection: Projection,
    /// Horizontal field of view in degrees, when the container declares one.
    pub horizontal_fov_degrees: Option<f32>,
    /// Primaries tagged on the source track.
    pub color_primaries: ColorPrimaries,
}

impl VideoInfo {
    /// Per-eye size as a display string, or "unspecified" when unknown.
    #[must_use]
    pub fn size_string(&self) -> String {
        if self.width == 0 || self.height == 0 {
            return "unspecified".to_string();
        }
        let mut text = format!("{}x{}", self.width, self.height);
        if self.is_spatial {
            text.push_str(" per eye");
        }
        text
    }

    /// Projection as a display string; rectilinear sources without a field
    /// of view report "unspecified".
    #[must_use]
    pub fn projection_string(&self) -> String {
        if self.projection == Projection::Rectilinear && self.horizontal_fov_degrees.is_none() {
            return "unspecified".to_string();
        }
        self.projection.to_string()
    }

    /// Field of view as a display string, or "unspecified" when unknown.
    #[must_use]
    pub fn fov_string(&self) -> String {
        match self.horizontal_fov_degrees {
            Some(fov) if fov.is_finite() && fov > 0.0 => format!("{:.0}°", fov),
            _ => "unspecified".to_string(),
        }
    }

    /// Output color description derived from the source primaries.
    #[must_use]
    pub fn output_color(&self) -> ColorDescription {
        ColorDescription::for_primaries(self.color_primaries)
    }
}
