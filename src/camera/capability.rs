//
// iidc-driver - IEEE 1394 IIDC camera driver
// Copyright (c) 2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Video formats, modes, frame rates and pixel formats; decoding of the camera's inquiry registers.
//!

use crate::bus::{RegisterAccessor, CSR_SPACE_BASE};
use crate::camera::registers::{self, basic_func, csr, format7, hi16, lo16, msb_bit, set_msb_bits};
use crate::camera::rom::SpecVersion;
use crate::camera::{CameraError, Dimension};
use std::collections::HashMap;
use strum::IntoEnumIterator;
use strum_macros as sm;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VideoFormat {
    /// VGA non-compressed.
    Format0,
    /// Super VGA non-compressed (1).
    Format1,
    /// Super VGA non-compressed (2).
    Format2,
    /// Partial image (scalable) format.
    Format7
}

impl VideoFormat {
    pub fn index(&self) -> u32 {
        match self {
            VideoFormat::Format0 => 0,
            VideoFormat::Format1 => 1,
            VideoFormat::Format2 => 2,
            VideoFormat::Format7 => 7
        }
    }

    /// Formats 3-5 are reserved and Format_6 (still image) is not used for acquisition.
    pub fn from_index(index: u32) -> Option<VideoFormat> {
        match index {
            0 => Some(VideoFormat::Format0),
            1 => Some(VideoFormat::Format1),
            2 => Some(VideoFormat::Format2),
            7 => Some(VideoFormat::Format7),
            _ => None
        }
    }
}

/// Pixel format (IIDC color coding); the order is that of Format_7 color coding ids.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, sm::EnumIter)]
pub enum PixelFormat {
    Y8,
    YUV411,
    YUV422,
    YUV444,
    RGB8,
    Y16,
    RGB16
}

impl PixelFormat {
    pub fn color_coding_id(&self) -> u32 { *self as u32 }

    pub fn from_color_coding_id(id: u32) -> Option<PixelFormat> {
        PixelFormat::iter().find(|pf| pf.color_coding_id() == id)
    }

    pub fn bits_per_pixel(&self) -> u32 {
        match self {
            PixelFormat::Y8 => 8,
            PixelFormat::YUV411 => 12,
            PixelFormat::YUV422 => 16,
            PixelFormat::YUV444 => 24,
            PixelFormat::RGB8 => 24,
            PixelFormat::Y16 => 16,
            PixelFormat::RGB16 => 48
        }
    }
}

/// Set of pixel formats, stored like the Format_7 COLOR_CODING_INQ register (Y8 = bit 31).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PixelFormats(u32);

impl PixelFormats {
    const NUM_SLOTS: u32 = 7;

    pub fn from_inquiry(value: u32) -> PixelFormats {
        PixelFormats(value & 0xFE00_0000)
    }

    pub fn single(pixel_format: PixelFormat) -> PixelFormats {
        PixelFormats(registers::with_msb_bit(0, pixel_format.color_coding_id(), true))
    }

    pub fn contains(&self, pixel_format: PixelFormat) -> bool {
        msb_bit(self.0, pixel_format.color_coding_id())
    }

    pub fn is_empty(&self) -> bool { self.0 == 0 }

    pub fn raw(&self) -> u32 { self.0 }

    pub fn to_vec(&self) -> Vec<PixelFormat> {
        set_msb_bits(self.0, Self::NUM_SLOTS)
            .into_iter()
            .filter_map(PixelFormat::from_color_coding_id)
            .collect()
    }
}

/// Fixed-size video mode of Formats 0-2.
#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, sm::EnumIter)]
pub enum FixedMode {
    YUV444_160x120,
    YUV422_320x240,
    YUV411_640x480,
    YUV422_640x480,
    RGB8_640x480,
    Y8_640x480,
    Y16_640x480,
    YUV422_800x600,
    RGB8_800x600,
    Y8_800x600,
    YUV422_1024x768,
    RGB8_1024x768,
    Y8_1024x768,
    Y16_800x600,
    Y16_1024x768,
    YUV422_1280x960,
    RGB8_1280x960,
    Y8_1280x960,
    YUV422_1600x1200,
    RGB8_1600x1200,
    Y8_1600x1200,
    Y16_1280x960,
    Y16_1600x1200
}

/// Format, mode number, width, height and pixel format of each `FixedMode` (in declaration order).
const FIXED_MODES: [(VideoFormat, u32, u32, u32, PixelFormat); 23] = [
    (VideoFormat::Format0, 0, 160, 120, PixelFormat::YUV444),
    (VideoFormat::Format0, 1, 320, 240, PixelFormat::YUV422),
    (VideoFormat::Format0, 2, 640, 480, PixelFormat::YUV411),
    (VideoFormat::Format0, 3, 640, 480, PixelFormat::YUV422),
    (VideoFormat::Format0, 4, 640, 480, PixelFormat::RGB8),
    (VideoFormat::Format0, 5, 640, 480, PixelFormat::Y8),
    (VideoFormat::Format0, 6, 640, 480, PixelFormat::Y16),
    (VideoFormat::Format1, 0, 800, 600, PixelFormat::YUV422),
    (VideoFormat::Format1, 1, 800, 600, PixelFormat::RGB8),
    (VideoFormat::Format1, 2, 800, 600, PixelFormat::Y8),
    (VideoFormat::Format1, 3, 1024, 768, PixelFormat::YUV422),
    (VideoFormat::Format1, 4, 1024, 768, PixelFormat::RGB8),
    (VideoFormat::Format1, 5, 1024, 768, PixelFormat::Y8),
    (VideoFormat::Format1, 6, 800, 600, PixelFormat::Y16),
    (VideoFormat::Format1, 7, 1024, 768, PixelFormat::Y16),
    (VideoFormat::Format2, 0, 1280, 960, PixelFormat::YUV422),
    (VideoFormat::Format2, 1, 1280, 960, PixelFormat::RGB8),
    (VideoFormat::Format2, 2, 1280, 960, PixelFormat::Y8),
    (VideoFormat::Format2, 3, 1600, 1200, PixelFormat::YUV422),
    (VideoFormat::Format2, 4, 1600, 1200, PixelFormat::RGB8),
    (VideoFormat::Format2, 5, 1600, 1200, PixelFormat::Y8),
    (VideoFormat::Format2, 6, 1280, 960, PixelFormat::Y16),
    (VideoFormat::Format2, 7, 1600, 1200, PixelFormat::Y16),
];

impl FixedMode {
    pub fn index(&self) -> usize { *self as usize }

    pub fn format(&self) -> VideoFormat { FIXED_MODES[self.index()].0 }

    pub fn mode_number(&self) -> u32 { FIXED_MODES[self.index()].1 }

    pub fn dimension(&self) -> Dimension {
        let entry = &FIXED_MODES[self.index()];
        Dimension::new(entry.2, entry.3)
    }

    pub fn pixel_format(&self) -> PixelFormat { FIXED_MODES[self.index()].4 }

    pub fn from_format_and_number(format: VideoFormat, mode_number: u32) -> Option<FixedMode> {
        FixedMode::iter().find(|m| m.format() == format && m.mode_number() == mode_number)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Mode {
    Fixed(FixedMode),
    /// Format_7 mode 0-7.
    Partial(u32)
}

impl Mode {
    pub fn format(&self) -> VideoFormat {
        match self {
            Mode::Fixed(m) => m.format(),
            Mode::Partial(_) => VideoFormat::Format7
        }
    }

    pub fn mode_number(&self) -> u32 {
        match self {
            Mode::Fixed(m) => m.mode_number(),
            Mode::Partial(n) => *n
        }
    }

    pub fn is_partial(&self) -> bool { matches!(self, Mode::Partial(_)) }

    pub fn from_format_and_number(format: VideoFormat, mode_number: u32) -> Option<Mode> {
        match format {
            VideoFormat::Format7 => if mode_number < 8 { Some(Mode::Partial(mode_number)) } else { None },
            _ => FixedMode::from_format_and_number(format, mode_number).map(Mode::Fixed)
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, sm::EnumIter)]
pub enum FrameRate {
    Fps1_875,
    Fps3_75,
    Fps7_5,
    Fps15,
    Fps30,
    Fps60,
    Fps120,
    /// IIDC 1.31 only.
    Fps240
}

impl FrameRate {
    pub fn index(&self) -> u32 { *self as u32 }

    pub fn from_index(index: u32) -> Option<FrameRate> {
        FrameRate::iter().find(|r| r.index() == index)
    }

    pub fn fps(&self) -> f64 {
        1.875 * (1 << self.index()) as f64
    }

    /// 1.875 fps = 15/8 fps; each next rate doubles.
    pub fn frame_period(&self) -> std::time::Duration {
        std::time::Duration::from_micros(8_000_000 / (15u64 << self.index()))
    }
}

/// Geometry and pixel formats of a video mode.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ModeDescriptor {
    pub max_dimension: Dimension,
    /// Granularity of region width and height.
    pub unit_dimension: Dimension,
    /// Granularity of region position (column = horizontal, row = vertical).
    pub unit_offset: Dimension,
    pub pixel_formats: PixelFormats
}

impl ModeDescriptor {
    pub fn for_fixed_mode(mode: FixedMode) -> ModeDescriptor {
        ModeDescriptor{
            max_dimension: mode.dimension(),
            unit_dimension: mode.dimension(),
            unit_offset: mode.dimension(),
            pixel_formats: PixelFormats::single(mode.pixel_format())
        }
    }
}

/// Basic functions advertised in BASIC_FUNC_INQ.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BasicFunctions {
    pub advanced_features: bool,
    pub mode_error_status: bool,
    pub feature_error_status: bool,
    pub power_control: bool,
    pub one_shot: bool,
    pub multi_shot: bool,
    pub memory_channels: u32
}

impl BasicFunctions {
    pub fn from_inquiry(value: u32) -> BasicFunctions {
        BasicFunctions{
            advanced_features: basic_func::advanced_features(value),
            mode_error_status: basic_func::vmode_error_status(value),
            feature_error_status: basic_func::feature_error_status(value),
            power_control: basic_func::power_control(value),
            one_shot: basic_func::one_shot(value),
            multi_shot: basic_func::multi_shot(value),
            memory_channels: basic_func::memory_channels(value)
        }
    }
}

/// Supported formats, modes and frame rates of a camera.
#[derive(Clone, Debug, Default)]
pub struct CapabilityTable {
    pub formats: Vec<VideoFormat>,
    pub modes: Vec<Mode>,
    /// Frame rates of fixed modes, slowest first.
    pub frame_rates: HashMap<Mode, Vec<FrameRate>>,
    pub descriptors: HashMap<Mode, ModeDescriptor>,
    /// Absolute addresses of Format_7 mode CSR blocks.
    pub format7_csr: HashMap<u32, u64>
}

impl CapabilityTable {
    pub fn supports_mode(&self, mode: Mode) -> bool { self.modes.contains(&mode) }

    pub fn frame_rates(&self, mode: Mode) -> &[FrameRate] {
        self.frame_rates.get(&mode).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn format7_csr(&self, mode_number: u32) -> Result<u64, CameraError> {
        self.format7_csr.get(&mode_number).copied().ok_or_else(|| CameraError::UnsupportedCapability(
            format!("Format_7 mode {} not present", mode_number)
        ))
    }
}

/// Reads format, mode and frame rate inquiry registers, and Format_7 mode descriptors.
pub fn read_capability_table(
    regs: &RegisterAccessor,
    base: u64,
    spec_version: SpecVersion
) -> Result<CapabilityTable, CameraError> {
    let mut table = CapabilityTable::default();

    let format_inq = regs.read(base + csr::V_FORMAT_INQ)?;
    for format_idx in set_msb_bits(format_inq, 8) {
        let format = match VideoFormat::from_index(format_idx) {
            Some(f) => f,
            None => {
                log::debug!("ignoring video format {}", format_idx);
                continue;
            }
        };
        table.formats.push(format);

        let mode_inq = regs.read(base + csr::V_MODE_INQ + 4 * format_idx as u64)?;
        for mode_number in set_msb_bits(mode_inq, 8) {
            let mode = match Mode::from_format_and_number(format, mode_number) {
                Some(m) => m,
                None => {
                    log::debug!("ignoring reserved mode {} of format {}", mode_number, format_idx);
                    continue;
                }
            };

            match mode {
                Mode::Fixed(fixed) => {
                    let rate_inq = regs.read(
                        base + csr::V_RATE_INQ + 32 * format_idx as u64 + 4 * mode_number as u64
                    )?;
                    let rates: Vec<FrameRate> = set_msb_bits(rate_inq, 8)
                        .into_iter()
                        .filter_map(FrameRate::from_index)
                        .collect();
                    if rates.is_empty() {
                        log::debug!("mode {:?} advertises no frame rates; ignoring", fixed);
                        continue;
                    }
                    table.frame_rates.insert(mode, rates);
                    table.descriptors.insert(mode, ModeDescriptor::for_fixed_mode(fixed));
                },

                Mode::Partial(n) => {
                    let offset = regs.read(base + csr::V_CSR_INQ_7 + 4 * n as u64)?;
                    let csr_base = CSR_SPACE_BASE + 4 * offset as u64;
                    table.format7_csr.insert(n, csr_base);
                    table.descriptors.insert(mode, read_format7_descriptor(regs, csr_base, spec_version)?);
                }
            }

            table.modes.push(mode);
        }
    }

    Ok(table)
}

/// Reads maximum size, unit size, unit position and color coding inquiry registers of a Format_7 mode.
pub fn read_format7_descriptor(
    regs: &RegisterAccessor,
    csr_base: u64,
    spec_version: SpecVersion
) -> Result<ModeDescriptor, CameraError> {
    let max_size = regs.read(csr_base + format7::MAX_IMAGE_SIZE_INQ)?;
    let unit_size = regs.read(csr_base + format7::UNIT_SIZE_INQ)?;
    let color_codings = regs.read(csr_base + format7::COLOR_CODING_INQ)?;

    let unit_dimension = Dimension::new(hi16(unit_size), lo16(unit_size));
    if unit_dimension.width == 0 || unit_dimension.height == 0 {
        return Err(CameraError::ProtocolMismatch("Format_7 unit size is zero".to_string()));
    }

    let mut unit_offset = unit_dimension;
    if spec_version >= SpecVersion::V1_30 {
        let unit_pos = regs.read(csr_base + format7::UNIT_POSITION_INQ)?;
        if hi16(unit_pos) != 0 && lo16(unit_pos) != 0 {
            unit_offset = Dimension::new(hi16(unit_pos), lo16(unit_pos));
        }
    }

    Ok(ModeDescriptor{
        max_dimension: Dimension::new(hi16(max_size), lo16(max_size)),
        unit_dimension,
        unit_offset,
        pixel_formats: PixelFormats::from_inquiry(color_codings)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_every_fixed_mode_has_table_entry() {
        for (idx, mode) in FixedMode::iter().enumerate() {
            assert_eq!(idx, mode.index());
            assert_eq!(Some(mode), FixedMode::from_format_and_number(mode.format(), mode.mode_number()));
            assert!(mode.dimension().num_pixels() > 0);
        }
        assert_eq!(FIXED_MODES.len(), FixedMode::iter().count());
    }

    #[test]
    fn given_frame_rates_compute_periods() {
        assert_eq!(std::time::Duration::from_micros(533_333), FrameRate::Fps1_875.frame_period());
        assert_eq!(std::time::Duration::from_micros(33_333), FrameRate::Fps30.frame_period());
        assert_eq!(std::time::Duration::from_micros(4_166), FrameRate::Fps240.frame_period());
        assert_eq!(30.0, FrameRate::Fps30.fps());
        assert_eq!(Some(FrameRate::Fps60), FrameRate::from_index(5));
        assert_eq!(None, FrameRate::from_index(8));
    }

    #[test]
    fn given_color_coding_inquiry_decode_pixel_formats() {
        // Y8, YUV422, RGB8, Y16 + reserved bits which must be ignored
        let pf = PixelFormats::from_inquiry(0x8000_0000 | 0x2000_0000 | 0x0800_0000 | 0x0400_0000 | 0x00FF_FFFF);
        assert_eq!(vec![PixelFormat::Y8, PixelFormat::YUV422, PixelFormat::RGB8, PixelFormat::Y16], pf.to_vec());
        assert!(pf.contains(PixelFormat::RGB8));
        assert!(!pf.contains(PixelFormat::RGB16));
        assert_eq!(vec![PixelFormat::RGB16], PixelFormats::single(PixelFormat::RGB16).to_vec());
    }

    #[test]
    fn given_partial_mode_numbers_validate() {
        assert_eq!(Some(Mode::Partial(3)), Mode::from_format_and_number(VideoFormat::Format7, 3));
        assert_eq!(None, Mode::from_format_and_number(VideoFormat::Format7, 8));
        assert_eq!(None, Mode::from_format_and_number(VideoFormat::Format0, 7));
        assert_eq!(
            Some(Mode::Fixed(FixedMode::Y8_640x480)),
            Mode::from_format_and_number(VideoFormat::Format0, 5)
        );
    }

    #[test]
    fn given_fixed_mode_descriptor_has_single_format() {
        let d = ModeDescriptor::for_fixed_mode(FixedMode::RGB8_800x600);
        assert_eq!(Dimension::new(800, 600), d.max_dimension);
        assert_eq!(vec![PixelFormat::RGB8], d.pixel_formats.to_vec());
    }
}
