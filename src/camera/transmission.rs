//
// iidc-driver - IEEE 1394 IIDC camera driver
// Copyright (c) 2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Isochronous transmission parameters.
//!

use crate::bus::{IsoSpeed, RegisterAccessor};
use crate::camera::capability::{FixedMode, FrameRate, PixelFormat, VideoFormat};
use crate::camera::registers::{format7, hi16, lo16, pack16};
use crate::camera::CameraError;

/// Quadlets per packet of Format_0 modes 0-6 for frame rates 1.875-240 fps; -1: unsupported.
const QUADLETS_PER_PACKET_FORMAT_0: [[i32; 8]; 7] = [
    [ -1,  -1,  15,  30,  60,  120,  240,  480],
    [ 10,  20,  40,  80, 160,  320,  640, 1280],
    [ 30,  60, 120, 240, 480,  960, 1920, 3840],
    [ 40,  80, 160, 320, 640, 1280, 2560, 5120],
    [ 60, 120, 240, 480, 960, 1920, 3840, 7680],
    [ 20,  40,  80, 160, 320,  640, 1280, 2560],
    [ 40,  80, 160, 320, 640, 1280, 2560, 5120]
];

const QUADLETS_PER_PACKET_FORMAT_1: [[i32; 8]; 8] = [
    [ -1, 125, 250,  500, 1000, 2000, 4000, 8000],
    [ -1,  -1, 375,  750, 1500, 3000, 6000,   -1],
    [ -1,  -1, 125,  250,  500, 1000, 2000, 4000],
    [ 96, 192, 384,  768, 1536, 3072, 6144,   -1],
    [144, 288, 576, 1152, 2304, 4608,   -1,   -1],
    [ 48,  96, 192,  384,  768, 1536, 3072, 6144],
    [ -1, 125, 250,  500, 1000, 2000, 4000, 8000],
    [ 96, 192, 384,  768, 1536, 3072, 6144,   -1]
];

const QUADLETS_PER_PACKET_FORMAT_2: [[i32; 8]; 8] = [
    [160, 320,  640, 1280, 2560, 5120,   -1, -1],
    [240, 480,  960, 1920, 3840, 7680,   -1, -1],
    [ 80, 160,  320,  640, 1280, 2560, 5120, -1],
    [250, 500, 1000, 2000, 4000, 8000,   -1, -1],
    [375, 750, 1500, 3000, 6000,   -1,   -1, -1],
    [125, 250,  500, 1000, 2000, 4000, 8000, -1],
    [160, 320,  640, 1280, 2560, 5120,   -1, -1],
    [250, 500, 1000, 2000, 4000, 8000,   -1, -1]
];

/// Parameters of isochronous frame transmission in the current mode.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct IsochronousTransmission {
    pub subchannel: u8,
    /// Speed code (see `IsoSpeed::code`).
    pub speed: u32,
    pub pixels_per_frame: u32,
    pub total_bytes: u32,
    pub unit_bytes_per_packet: u32,
    pub max_bytes_per_packet: u32,
    pub recommended_bytes_per_packet: u32,
    pub bytes_per_packet: u32,
    pub packets_per_frame: u32
}

impl IsochronousTransmission {
    pub fn bytes_in_last_packet(&self) -> u32 {
        self.total_bytes - self.bulk_bytes()
    }

    /// Bytes carried by all packets but the last one.
    pub fn bulk_bytes(&self) -> u32 {
        self.bytes_per_packet * self.packets_per_frame.saturating_sub(1)
    }

    pub fn validate(&self) -> Result<(), CameraError> {
        let reject = |msg: String| Err(CameraError::HardwareRejectedValue(msg));

        if self.bytes_per_packet == 0 || self.packets_per_frame == 0 || self.total_bytes == 0 {
            return reject(format!("empty transmission: {:?}", self));
        }
        if self.unit_bytes_per_packet == 0 || self.bytes_per_packet % self.unit_bytes_per_packet != 0 {
            return reject(format!(
                "{} bytes per packet is not a multiple of {}", self.bytes_per_packet, self.unit_bytes_per_packet
            ));
        }
        let bulk = self.bytes_per_packet as u64 * (self.packets_per_frame as u64 - 1);
        let capacity = self.bytes_per_packet as u64 * self.packets_per_frame as u64;
        if (self.total_bytes as u64) <= bulk || self.total_bytes as u64 > capacity {
            return reject(format!(
                "{} bytes do not fit {} packets of {} bytes",
                self.total_bytes, self.packets_per_frame, self.bytes_per_packet
            ));
        }

        Ok(())
    }

    /// Fails if packets do not fit the link's maximum payload at `speed`.
    pub fn check_link(&self, speed: IsoSpeed) -> Result<(), CameraError> {
        if self.bytes_per_packet > speed.max_payload() {
            Err(CameraError::UnsupportedCapability(format!(
                "{} bytes per packet exceed the maximum payload at {:?}", self.bytes_per_packet, speed
            )))
        } else {
            Ok(())
        }
    }

    /// Time needed to transmit the packets of a single frame.
    pub fn packet_duration(&self) -> std::time::Duration {
        crate::bus::ISO_CYCLE * self.packets_per_frame
    }
}

/// Returns the packet size in quadlets for a fixed mode at the given frame rate.
pub fn fixed_quadlets_per_packet(mode: FixedMode, rate: FrameRate) -> Option<u32> {
    let m = mode.mode_number() as usize;
    let r = rate.index() as usize;
    let quadlets = match mode.format() {
        VideoFormat::Format0 => QUADLETS_PER_PACKET_FORMAT_0[m][r],
        VideoFormat::Format1 => QUADLETS_PER_PACKET_FORMAT_1[m][r],
        VideoFormat::Format2 => QUADLETS_PER_PACKET_FORMAT_2[m][r],
        VideoFormat::Format7 => -1
    };

    if quadlets > 0 { Some(quadlets as u32) } else { None }
}

/// Computes transmission parameters of a fixed mode (without subchannel and speed).
pub fn for_fixed_mode(mode: FixedMode, rate: FrameRate) -> Result<IsochronousTransmission, CameraError> {
    let quadlets = fixed_quadlets_per_packet(mode, rate).ok_or_else(|| CameraError::UnsupportedCapability(
        format!("frame rate {:?} in mode {:?}", rate, mode)
    ))?;

    let bytes_per_packet = 4 * quadlets;
    let pixels_per_frame = mode.dimension().num_pixels();
    let total_bytes = (pixels_per_frame as u64 * mode.pixel_format().bits_per_pixel() as u64 / 8) as u32;

    let transmission = IsochronousTransmission{
        subchannel: 0,
        speed: 0,
        pixels_per_frame,
        total_bytes,
        unit_bytes_per_packet: bytes_per_packet,
        max_bytes_per_packet: bytes_per_packet,
        recommended_bytes_per_packet: bytes_per_packet,
        bytes_per_packet,
        packets_per_frame: total_bytes / bytes_per_packet
    };
    transmission.validate()?;

    Ok(transmission)
}

/// Selects bytes per packet of a Format_7 mode: the largest multiple of `unit` not exceeding
/// the camera's maximum and the link's maximum payload.
///
/// Returns 0 if no packet size is possible.
pub fn choose_bytes_per_packet(unit: u32, max: u32, link_max: u32) -> u32 {
    if unit == 0 {
        return 0;
    }

    max.min(link_max) / unit * unit
}

/// Negotiates bytes per packet with the camera and reads the resulting Format_7 transmission parameters.
///
/// # Parameters
///
/// * `csr_base` - Absolute address of the mode's CSR block.
/// * `pixel_format` - Current color coding; used if the camera does not report total bytes per frame.
///
pub fn for_partial_mode(
    regs: &RegisterAccessor,
    csr_base: u64,
    pixel_format: PixelFormat,
    speed: IsoSpeed
) -> Result<IsochronousTransmission, CameraError> {
    let packet_para = regs.read(csr_base + format7::PACKET_PARA_INQ)?;
    let unit = hi16(packet_para);
    let max = lo16(packet_para);
    let recommended = lo16(regs.read(csr_base + format7::BYTE_PER_PACKET)?);

    let bytes_per_packet = choose_bytes_per_packet(unit, max, speed.max_payload());
    if bytes_per_packet == 0 {
        return Err(CameraError::HardwareRejectedValue(format!(
            "no valid packet size (unit {}, max {}, recommended {})", unit, max, recommended
        )));
    }

    regs.write(csr_base + format7::BYTE_PER_PACKET, pack16(bytes_per_packet, 0))?;

    let packets_per_frame = regs.read(csr_base + format7::PACKET_PER_FRAME_INQ)?;
    let pixels_per_frame = regs.read(csr_base + format7::PIXEL_NUMBER_INQ)?;
    let total_hi = regs.read(csr_base + format7::TOTAL_BYTES_HI_INQ)? as u64;
    let total_lo = regs.read(csr_base + format7::TOTAL_BYTES_LO_INQ)? as u64;
    let mut total_bytes = (total_hi << 32) | total_lo;
    if total_bytes == 0 {
        total_bytes = pixels_per_frame as u64 * pixel_format.bits_per_pixel() as u64 / 8;
    }
    if total_bytes > u32::MAX as u64 {
        return Err(CameraError::HardwareRejectedValue(format!("frame of {} bytes", total_bytes)));
    }

    let transmission = IsochronousTransmission{
        subchannel: 0,
        speed: speed.code(),
        pixels_per_frame,
        total_bytes: total_bytes as u32,
        unit_bytes_per_packet: unit,
        max_bytes_per_packet: max,
        recommended_bytes_per_packet: recommended,
        bytes_per_packet,
        packets_per_frame
    };
    transmission.validate()?;
    log::debug!(
        "Format_7 transmission: {} bytes/packet, {} packets/frame, {} bytes total",
        bytes_per_packet, packets_per_frame, total_bytes
    );

    Ok(transmission)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn given_every_reachable_fixed_mode_and_rate_packets_cover_frame_exactly() {
        let mut num_checked = 0;
        for mode in FixedMode::iter() {
            for rate in FrameRate::iter() {
                if fixed_quadlets_per_packet(mode, rate).is_none() { continue; }

                let t = for_fixed_mode(mode, rate).unwrap();
                assert_eq!(
                    t.total_bytes,
                    t.bytes_per_packet * (t.packets_per_frame - 1) + t.bytes_in_last_packet(),
                    "{:?} @ {:?}", mode, rate
                );
                assert!(t.bytes_in_last_packet() > 0 && t.bytes_in_last_packet() <= t.bytes_per_packet);
                assert_eq!(0, t.bytes_per_packet % t.unit_bytes_per_packet);
                assert_eq!(
                    t.total_bytes as u64,
                    t.pixels_per_frame as u64 * mode.pixel_format().bits_per_pixel() as u64 / 8
                );
                num_checked += 1;
            }
        }
        assert!(num_checked > 150);
    }

    #[test]
    fn given_known_fixed_modes_compute_parameters() {
        let t = for_fixed_mode(FixedMode::Y8_640x480, FrameRate::Fps30).unwrap();
        assert_eq!(1280, t.bytes_per_packet);
        assert_eq!(240, t.packets_per_frame);
        assert_eq!(307_200, t.total_bytes);

        let t = for_fixed_mode(FixedMode::YUV422_1024x768, FrameRate::Fps15).unwrap();
        assert_eq!(3072, t.bytes_per_packet);
        assert_eq!(512, t.packets_per_frame);
    }

    #[test]
    fn given_unsupported_rate_fail() {
        assert!(matches!(
            for_fixed_mode(FixedMode::YUV444_160x120, FrameRate::Fps1_875),
            Err(CameraError::UnsupportedCapability(_))
        ));
        assert!(fixed_quadlets_per_packet(FixedMode::RGB8_1600x1200, FrameRate::Fps60).is_none());
    }

    #[test]
    fn given_packet_limits_choose_bytes_per_packet() {
        assert_eq!(4096, choose_bytes_per_packet(8, 8000, 4096));
        assert_eq!(4092, choose_bytes_per_packet(12, 8000, 4096));
        assert_eq!(7992, choose_bytes_per_packet(12, 8000, 8192));
        assert_eq!(1000, choose_bytes_per_packet(4, 1000, 8192));
        assert_eq!(0, choose_bytes_per_packet(4, 2, 8192));
        assert_eq!(0, choose_bytes_per_packet(0, 8000, 8192));
    }

    #[test]
    fn given_partial_last_packet_validate() {
        let t = IsochronousTransmission{
            total_bytes: 1000,
            unit_bytes_per_packet: 4,
            bytes_per_packet: 96,
            packets_per_frame: 11,
            ..Default::default()
        };
        assert!(t.validate().is_ok());
        assert_eq!(40, t.bytes_in_last_packet());
        assert_eq!(960, t.bulk_bytes());

        assert!(IsochronousTransmission{ packets_per_frame: 12, ..t }.validate().is_err());
        assert!(IsochronousTransmission{ packets_per_frame: 10, ..t }.validate().is_err());
        assert!(IsochronousTransmission{ bytes_per_packet: 98, ..t }.validate().is_err());
    }

    #[test]
    fn given_link_speed_check_payload() {
        let t = for_fixed_mode(FixedMode::RGB8_640x480, FrameRate::Fps60).unwrap();
        assert_eq!(7680, t.bytes_per_packet);
        assert!(t.check_link(IsoSpeed::S400).is_err());
        assert!(t.check_link(IsoSpeed::S800).is_ok());
    }
}
