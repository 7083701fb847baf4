// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Pixel formats, dataspaces, and colorspace/HDR parameter lookup.
//!
//! A [`Dataspace`] packs three sub-fields (standard, transfer, range) into
//! one word. Planes need them translated into a color-conversion equation
//! ([`CscParams`]) and an HDR transfer selector ([`HdrStandard`]). Which
//! translations are allowed depends on the attributes of the hardware
//! resource that scans the plane out: see [`color_params`].

use crate::resource::MppAttributes;

/// Buffer pixel layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 8-bit RGBA.
    #[default]
    Rgba8888,
    /// 8-bit RGB with an ignored fourth byte.
    Rgbx8888,
    /// 8-bit BGRA.
    Bgra8888,
    /// Packed 24-bit RGB.
    Rgb888,
    /// Packed 16-bit RGB.
    Rgb565,
    /// 10-bit RGB with 2-bit alpha.
    Rgba1010102,
    /// Half-float RGBA.
    RgbaFp16,
    /// 8-bit 4:2:0 YUV, interleaved UV.
    Nv12,
    /// 8-bit 4:2:0 YUV, interleaved VU.
    Nv21,
    /// 8-bit 4:2:0 YUV, three planes.
    Yv12,
    /// 10-bit 4:2:0 YUV.
    P010,
}

impl PixelFormat {
    /// Bits per pixel averaged over all planes.
    #[must_use]
    pub const fn bits_per_pixel(self) -> u32 {
        match self {
            Self::Rgba8888 | Self::Rgbx8888 | Self::Bgra8888 | Self::Rgba1010102 => 32,
            Self::Rgb888 => 24,
            Self::Rgb565 => 16,
            Self::RgbaFp16 => 64,
            Self::Nv12 | Self::Nv21 | Self::Yv12 => 12,
            Self::P010 => 24,
        }
    }

    /// Returns `true` if the format carries an alpha channel.
    #[must_use]
    pub const fn has_alpha(self) -> bool {
        matches!(
            self,
            Self::Rgba8888 | Self::Bgra8888 | Self::Rgba1010102 | Self::RgbaFp16
        )
    }

    /// Returns `true` for YUV formats.
    #[must_use]
    pub const fn is_yuv(self) -> bool {
        matches!(self, Self::Nv12 | Self::Nv21 | Self::Yv12 | Self::P010)
    }

    /// Bytes needed for a `w` by `h` surface, rounded up.
    #[must_use]
    pub fn footprint(self, w: u32, h: u32) -> u64 {
        (u64::from(w) * u64::from(h) * u64::from(self.bits_per_pixel())).div_ceil(8)
    }
}

/// Color primaries and matrix sub-field of a dataspace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Standard {
    /// Not specified.
    Unspecified,
    /// BT.709.
    Bt709,
    /// BT.601, 625-line.
    Bt601_625,
    /// BT.601, 625-line, unadjusted.
    Bt601_625Unadjusted,
    /// BT.601, 525-line.
    Bt601_525,
    /// BT.601, 525-line, unadjusted.
    Bt601_525Unadjusted,
    /// BT.2020.
    Bt2020,
    /// BT.2020 constant luminance.
    Bt2020ConstantLuminance,
    /// BT.470M.
    Bt470M,
    /// Generic film.
    Film,
    /// DCI-P3.
    DciP3,
    /// Adobe RGB.
    AdobeRgb,
}

/// Transfer-function sub-field of a dataspace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Transfer {
    /// Not specified.
    Unspecified,
    /// Linear.
    Linear,
    /// sRGB.
    Srgb,
    /// SMPTE 170M.
    Smpte170M,
    /// Gamma 2.2.
    Gamma2_2,
    /// Gamma 2.6.
    Gamma2_6,
    /// Gamma 2.8.
    Gamma2_8,
    /// SMPTE ST 2084 (PQ).
    St2084,
    /// Hybrid log-gamma.
    Hlg,
}

/// Quantization-range sub-field of a dataspace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Range {
    /// Not specified.
    Unspecified,
    /// Full range.
    Full,
    /// Limited (video) range.
    Limited,
    /// Extended range.
    Extended,
}

/// A packed dataspace word.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Dataspace(pub u32);

impl core::fmt::Debug for Dataspace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Dataspace({:#x})", self.0)
    }
}

const STANDARD_SHIFT: u32 = 16;
const TRANSFER_SHIFT: u32 = 22;
const RANGE_SHIFT: u32 = 27;

impl Dataspace {
    /// Unknown dataspace.
    pub const UNKNOWN: Self = Self(0);
    /// sRGB: BT.709 primaries, sRGB transfer, full range.
    pub const SRGB: Self = Self::compose(1, 2, 1);
    /// Display P3: DCI-P3 primaries, sRGB transfer, full range.
    pub const DISPLAY_P3: Self = Self::compose(10, 2, 1);
    /// BT.2020 PQ, full range.
    pub const BT2020_PQ: Self = Self::compose(6, 7, 1);
    /// BT.709 video, limited range.
    pub const BT709: Self = Self::compose(1, 3, 2);

    /// Packs raw sub-field values.
    #[must_use]
    pub const fn compose(standard: u32, transfer: u32, range: u32) -> Self {
        Self((standard << STANDARD_SHIFT) | (transfer << TRANSFER_SHIFT) | (range << RANGE_SHIFT))
    }

    /// Decodes the standard sub-field.
    #[must_use]
    pub const fn standard(self) -> Standard {
        match (self.0 >> STANDARD_SHIFT) & 0x3f {
            1 => Standard::Bt709,
            2 => Standard::Bt601_625,
            3 => Standard::Bt601_625Unadjusted,
            4 => Standard::Bt601_525,
            5 => Standard::Bt601_525Unadjusted,
            6 => Standard::Bt2020,
            7 => Standard::Bt2020ConstantLuminance,
            8 => Standard::Bt470M,
            9 => Standard::Film,
            10 => Standard::DciP3,
            11 => Standard::AdobeRgb,
            _ => Standard::Unspecified,
        }
    }

    /// Decodes the transfer sub-field.
    #[must_use]
    pub const fn transfer(self) -> Transfer {
        match (self.0 >> TRANSFER_SHIFT) & 0x1f {
            1 => Transfer::Linear,
            2 => Transfer::Srgb,
            3 => Transfer::Smpte170M,
            4 => Transfer::Gamma2_2,
            5 => Transfer::Gamma2_6,
            6 => Transfer::Gamma2_8,
            7 => Transfer::St2084,
            8 => Transfer::Hlg,
            _ => Transfer::Unspecified,
        }
    }

    /// Decodes the range sub-field.
    #[must_use]
    pub const fn range(self) -> Range {
        match (self.0 >> RANGE_SHIFT) & 0x7 {
            1 => Range::Full,
            2 => Range::Limited,
            3 => Range::Extended,
            _ => Range::Unspecified,
        }
    }
}

/// Color-conversion equation for a plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CscParams {
    /// Primaries/matrix selector.
    pub standard: Standard,
    /// Quantization range.
    pub range: Range,
}

/// HDR transfer selector for a plane.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum HdrStandard {
    /// SDR path.
    #[default]
    Off,
    /// PQ (HDR10).
    St2084,
    /// Hybrid log-gamma.
    Hlg,
    /// Linear light.
    Linear,
    /// sRGB curve.
    Srgb,
    /// SMPTE 170M curve.
    Smpte170M,
    /// Gamma 2.2.
    Gamma2_2,
    /// Gamma 2.6.
    Gamma2_6,
    /// Gamma 2.8.
    Gamma2_8,
    /// Known transfer the plane cannot express.
    Unspecified,
}

/// Colorspace and HDR metadata carried in a plane descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ColorParams {
    /// Color-conversion equation.
    pub csc: CscParams,
    /// HDR transfer selector.
    pub hdr: HdrStandard,
}

impl Default for ColorParams {
    fn default() -> Self {
        Self {
            csc: CscParams {
                standard: Standard::Unspecified,
                range: Range::Unspecified,
            },
            hdr: HdrStandard::Off,
        }
    }
}

/// Derives plane color parameters for `dataspace` on a resource with `attrs`.
///
/// Without wide-color support only BT.709, BT.601, BT.2020 and DCI-P3 are
/// passed through; any other standard becomes unspecified. The transfer
/// function is only honoured when the resource supports some form of
/// wide-color or HDR; otherwise the plane stays on the SDR path.
#[must_use]
pub fn color_params(format: PixelFormat, dataspace: Dataspace, attrs: MppAttributes) -> ColorParams {
    let dataspace = if dataspace == Dataspace::UNKNOWN && !format.is_yuv() {
        Dataspace::SRGB
    } else {
        dataspace
    };

    let wcg = attrs.contains(MppAttributes::WCG);
    let standard = match dataspace.standard() {
        s @ (Standard::Bt709
        | Standard::Bt601_625
        | Standard::Bt601_625Unadjusted
        | Standard::Bt601_525
        | Standard::Bt601_525Unadjusted
        | Standard::Bt2020
        | Standard::DciP3) => s,
        s if wcg => s,
        _ => Standard::Unspecified,
    };

    let hdr_capable =
        attrs.intersects(MppAttributes::WCG | MppAttributes::HDR10 | MppAttributes::HDR10_PLUS);
    let hdr = if hdr_capable {
        match dataspace.transfer() {
            Transfer::St2084 => HdrStandard::St2084,
            Transfer::Hlg => HdrStandard::Hlg,
            Transfer::Linear => HdrStandard::Linear,
            Transfer::Srgb => HdrStandard::Srgb,
            Transfer::Smpte170M => HdrStandard::Smpte170M,
            Transfer::Gamma2_2 => HdrStandard::Gamma2_2,
            Transfer::Gamma2_6 => HdrStandard::Gamma2_6,
            Transfer::Gamma2_8 => HdrStandard::Gamma2_8,
            Transfer::Unspecified => HdrStandard::Unspecified,
        }
    } else {
        HdrStandard::Off
    };

    ColorParams {
        csc: CscParams {
            standard,
            range: dataspace.range(),
        },
        hdr,
    }
}
