//
// iidc-driver - IEEE 1394 IIDC camera driver
// Copyright (c) 2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! IIDC register offsets and bit field accessors.
//!
//! IIDC numbers bits from the most significant one: "bit 0" is `0x8000_0000`. Accessors below take
//! the conventional shift (LSB = 0) and are documented with the resulting bit range.
//!

/// Offsets relative to the command register base.
pub mod csr {
    pub const INITIALIZE: u64 = 0x000;
    pub const V_FORMAT_INQ: u64 = 0x100;
    /// `+ 4 * format`
    pub const V_MODE_INQ: u64 = 0x180;
    /// `+ 32 * format + 4 * mode`
    pub const V_RATE_INQ: u64 = 0x200;
    /// `+ 4 * mode`; quadlet offset of the Format_7 mode's CSR block.
    pub const V_CSR_INQ_7: u64 = 0x2E0;
    pub const BASIC_FUNC_INQ: u64 = 0x400;
    pub const FEATURE_HI_INQ: u64 = 0x404;
    pub const FEATURE_LO_INQ: u64 = 0x408;
    pub const CUR_V_FRM_RATE: u64 = 0x600;
    pub const CUR_V_MODE: u64 = 0x604;
    pub const CUR_V_FORMAT: u64 = 0x608;
    pub const ISO_CHANNEL: u64 = 0x60C;
    pub const CAMERA_POWER: u64 = 0x610;
    pub const ISO_EN: u64 = 0x614;
    pub const ONE_SHOT: u64 = 0x61C;
    pub const VMODE_ERROR_STATUS: u64 = 0x628;
    pub const FEATURE_ERROR_STATUS_HI: u64 = 0x640;
    pub const FEATURE_ERROR_STATUS_LO: u64 = 0x644;
    /// Feature control register = feature inquiry register + this value.
    pub const FEATURE_CONTROL_DELTA: u64 = 0x300;
}

/// Offsets relative to a Format_7 mode's CSR block.
pub mod format7 {
    pub const MAX_IMAGE_SIZE_INQ: u64 = 0x000;
    pub const UNIT_SIZE_INQ: u64 = 0x004;
    pub const IMAGE_POSITION: u64 = 0x008;
    pub const IMAGE_SIZE: u64 = 0x00C;
    pub const COLOR_CODING_ID: u64 = 0x010;
    pub const COLOR_CODING_INQ: u64 = 0x014;
    pub const PIXEL_NUMBER_INQ: u64 = 0x034;
    pub const TOTAL_BYTES_HI_INQ: u64 = 0x038;
    pub const TOTAL_BYTES_LO_INQ: u64 = 0x03C;
    pub const PACKET_PARA_INQ: u64 = 0x040;
    pub const BYTE_PER_PACKET: u64 = 0x044;
    pub const PACKET_PER_FRAME_INQ: u64 = 0x048;
    /// Only IIDC 1.30 and later.
    pub const UNIT_POSITION_INQ: u64 = 0x04C;
}

/// Returns IIDC bit `n` (`n` = 0 is the most significant bit).
pub fn msb_bit(value: u32, n: u32) -> bool {
    debug_assert!(n < 32);
    value & (0x8000_0000 >> n) != 0
}

pub fn with_msb_bit(value: u32, n: u32, state: bool) -> u32 {
    debug_assert!(n < 32);
    if state { value | (0x8000_0000 >> n) } else { value & !(0x8000_0000 >> n) }
}

/// Returns `width` bits starting at LSB-based bit `shift`.
pub fn field(value: u32, shift: u32, width: u32) -> u32 {
    (value >> shift) & mask(width)
}

/// Replaces `width` bits starting at LSB-based bit `shift`; excess bits of `field_value` are dropped.
pub fn with_field(value: u32, shift: u32, width: u32, field_value: u32) -> u32 {
    (value & !(mask(width) << shift)) | ((field_value & mask(width)) << shift)
}

fn mask(width: u32) -> u32 {
    if width >= 32 { u32::MAX } else { (1 << width) - 1 }
}

/// Bits 31-16.
pub fn hi16(value: u32) -> u32 { field(value, 16, 16) }

/// Bits 15-0.
pub fn lo16(value: u32) -> u32 { field(value, 0, 16) }

pub fn pack16(hi: u32, lo: u32) -> u32 {
    with_field(with_field(0, 16, 16, hi), 0, 16, lo)
}

/// Returns indices of the set bits among the first `count` IIDC bits (most significant first).
pub fn set_msb_bits(value: u32, count: u32) -> Vec<u32> {
    (0..count).filter(|&n| msb_bit(value, n)).collect()
}

/// Basic function inquiry register (0x400).
pub mod basic_func {
    use super::*;

    /// Bit 31.
    pub fn advanced_features(value: u32) -> bool { msb_bit(value, 0) }

    /// Bit 30 (IIDC 1.30).
    pub fn vmode_error_status(value: u32) -> bool { msb_bit(value, 1) }

    /// Bit 29 (IIDC 1.30).
    pub fn feature_error_status(value: u32) -> bool { msb_bit(value, 2) }

    /// Bit 15 (mask 0x8000).
    pub fn power_control(value: u32) -> bool { msb_bit(value, 16) }

    /// Bit 12 (mask 0x1000).
    pub fn one_shot(value: u32) -> bool { msb_bit(value, 19) }

    /// Bit 11 (mask 0x0800).
    pub fn multi_shot(value: u32) -> bool { msb_bit(value, 20) }

    /// Bits 3-0.
    pub fn memory_channels(value: u32) -> u32 { field(value, 0, 4) }
}

/// Current frame rate/mode/format registers (0x600-0x608): value in bits 31-29.
pub fn cur_value(value: u32) -> u32 { field(value, 29, 3) }

pub fn with_cur_value(value: u32) -> u32 { with_field(0, 29, 3, value) }

/// ISO_Channel register (0x60C).
pub mod iso_channel {
    use super::*;

    /// Bits 31-28.
    pub fn channel(value: u32) -> u32 { field(value, 28, 4) }

    /// Bits 25-24.
    pub fn speed(value: u32) -> u32 { field(value, 24, 2) }

    pub fn pack(channel: u32, speed: u32) -> u32 {
        with_field(with_field(0, 28, 4, channel), 24, 2, speed)
    }
}

/// One_Shot/Multi_Shot register (0x61C).
pub mod shot {
    use super::*;

    /// Bit 31.
    pub fn one_shot(value: u32) -> bool { msb_bit(value, 0) }

    /// Bit 30.
    pub fn multi_shot(value: u32) -> bool { msb_bit(value, 1) }

    /// Bits 15-0.
    pub fn count(value: u32) -> u32 { lo16(value) }

    pub fn one_shot_request() -> u32 { with_msb_bit(0, 0, true) }

    pub fn multi_shot_request(count: u32) -> u32 { with_field(with_msb_bit(0, 1, true), 0, 16, count) }
}

/// Bit 31 of single-flag registers (Initialize, Camera_Power, ISO_EN, Vmode_Error_Status).
pub fn flag(value: u32) -> bool { msb_bit(value, 0) }

pub fn with_flag(state: bool) -> u32 { with_msb_bit(0, 0, state) }

/// Format_7 COLOR_CODING_ID (bits 31-24).
pub fn color_coding_id(value: u32) -> u32 { field(value, 24, 8) }

pub fn with_color_coding_id(id: u32) -> u32 { with_field(0, 24, 8, id) }

/// Sync field (bits 3-0) of an isochronous packet header; IIDC sets it to 1 in the first packet of a frame.
pub fn iso_header_sync(header: u32) -> u32 { field(header, 0, 4) }

pub const ISO_SYNC_START_OF_FRAME: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_msb_numbering_access_bits() {
        assert!(msb_bit(0x8000_0000, 0));
        assert!(!msb_bit(0x8000_0000, 1));
        assert!(msb_bit(0x0000_0001, 31));
        assert_eq!(0x4000_0000, with_msb_bit(0, 1, true));
        assert_eq!(0x0000_0000, with_msb_bit(0x4000_0000, 1, false));
    }

    #[test]
    fn given_field_replace_only_its_bits() {
        let value = 0xFFFF_FFFF;
        assert_eq!(0xFF00_0FFF, with_field(value, 12, 12, 0));
        assert_eq!(0xABC, field(0x00AB_C000, 12, 12));
        assert_eq!(0x0000_1000, with_field(0, 12, 12, 0x1001 /* excess bit dropped */));
    }

    #[test]
    fn given_halves_pack_and_unpack() {
        let v = pack16(1280, 960);
        assert_eq!(1280, hi16(v));
        assert_eq!(960, lo16(v));
    }

    #[test]
    fn given_inquiry_list_set_bits() {
        assert_eq!(vec![0, 2, 7], set_msb_bits(0xA100_0000, 8));
        assert!(set_msb_bits(0x00FF_FFFF, 8).is_empty());
    }

    #[test]
    fn given_basic_func_decode_flags() {
        let value = 0x8000_0000 | 0x2000_0000 | 0x0000_1000 | 0x0000_0003;
        assert!(basic_func::advanced_features(value));
        assert!(!basic_func::vmode_error_status(value));
        assert!(basic_func::feature_error_status(value));
        assert!(basic_func::one_shot(value));
        assert!(!basic_func::multi_shot(value));
        assert!(!basic_func::power_control(value));
        assert_eq!(3, basic_func::memory_channels(value));
    }

    #[test]
    fn given_basic_func_single_flags_decode_separately() {
        assert!(basic_func::power_control(0x0000_8000));
        assert!(!basic_func::one_shot(0x0000_8000) && !basic_func::multi_shot(0x0000_8000));

        assert!(basic_func::one_shot(0x0000_1000));
        assert!(!basic_func::power_control(0x0000_1000) && !basic_func::multi_shot(0x0000_1000));

        assert!(basic_func::multi_shot(0x0000_0800));
        assert!(!basic_func::power_control(0x0000_0800) && !basic_func::one_shot(0x0000_0800));

        // neighbouring reserved bits
        for value in [0x0001_0000, 0x0000_4000, 0x0000_2000, 0x0000_0400] {
            assert!(!basic_func::power_control(value));
            assert!(!basic_func::one_shot(value));
            assert!(!basic_func::multi_shot(value));
        }
    }

    #[test]
    fn given_iso_channel_pack_fields() {
        let v = iso_channel::pack(5, 2);
        assert_eq!(0x5200_0000, v);
        assert_eq!(5, iso_channel::channel(v));
        assert_eq!(2, iso_channel::speed(v));
    }

    #[test]
    fn given_shot_requests_encode() {
        assert_eq!(0x8000_0000, shot::one_shot_request());
        assert_eq!(0x4000_0001, shot::multi_shot_request(1));
        assert!(shot::multi_shot(shot::multi_shot_request(1)));
        assert_eq!(1, shot::count(shot::multi_shot_request(1)));
    }
}
