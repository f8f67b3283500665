//
// iidc-driver - IEEE 1394 IIDC camera driver
// Copyright (c) 2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Simulated bus with IIDC cameras.
//!
//! A simulated camera implements the configuration ROM, inquiry/control/status registers
//! and one Format_7 mode, and produces isochronous frame packets while transmission is enabled.
//! Packets are generated when requests are dequeued, so no real time passes; a request which
//! cannot be completed (no transmission, stalled stream) is returned as if its timeout expired.
//!

use crate::bus::{Bus, BusError, IsoChannel, IsoRequest, NodeId, RequestStatus, CSR_SPACE_BASE};
use crate::camera::capability::{FixedMode, FrameRate, PixelFormat, VideoFormat};
use crate::camera::registers::{
    self, color_coding_id, cur_value, csr, flag, format7, hi16, iso_channel, lo16, pack16, shot, with_cur_value, with_msb_bit
};
use crate::camera::rom::CONFIG_ROM_BASE;
use crate::camera::{transmission, Feature};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use strum::IntoEnumIterator;

/// Command register base of simulated cameras (in quadlets from the start of the CSR space).
pub const COMMAND_REGS_OFFSET: u32 = 0x3C_0000;

/// Format_7 mode 0 CSR block of simulated cameras (in quadlets from the start of the CSR space).
pub const FORMAT7_MODE0_OFFSET: u32 = 0x3C_2000;

pub const FORMAT7_MAX_SIZE: (u32, u32) = (1280, 960);

pub const FORMAT7_UNIT_SIZE: (u32, u32) = (8, 2);

pub const FORMAT7_UNIT_POSITION: (u32, u32) = (4, 2);

pub const FORMAT7_MAX_BYTES_PER_PACKET: u32 = 8192;

pub const FORMAT7_RECOMMENDED_BYTES_PER_PACKET: u32 = 3072;

/// Current temperature reported by simulated cameras.
pub const CURRENT_TEMPERATURE: u32 = 293;

/// Byte at `offset` of simulated frame number `frame`.
pub fn frame_byte(frame: u64, offset: usize) -> u8 {
    (frame as usize * 31 + offset) as u8
}

/// Contents of simulated frame number `frame`.
pub fn frame_contents(frame: u64, length: usize) -> Vec<u8> {
    (0..length).map(|i| frame_byte(frame, i)).collect()
}

pub mod rom {
    //! Configuration ROM images.

    use crate::camera::rom::{sw_version, IIDC_UNIT_SPEC_ID};

    #[derive(Clone, Debug)]
    pub struct RomLayout {
        pub guid: u64,
        pub unit_directory_key: u32,
        /// Entry count declared by the unit directory header (the directory always contains 3 entries).
        pub unit_directory_length: u32,
        pub unit_spec_id: u32,
        pub unit_sw_version: u32,
        /// Command register base (in quadlets from the start of the CSR space).
        pub command_regs_offset: u32,
        pub vendor: Option<String>,
        pub model: Option<String>
    }

    impl Default for RomLayout {
        fn default() -> RomLayout {
            RomLayout{
                guid: 0x0008_1234_5678_9ABC,
                unit_directory_key: 0xD1,
                unit_directory_length: 3,
                unit_spec_id: IIDC_UNIT_SPEC_ID,
                unit_sw_version: sw_version::V1_30,
                command_regs_offset: super::COMMAND_REGS_OFFSET,
                vendor: Some("Simulated Vendor".to_string()),
                model: Some("IIDC Simulator".to_string())
            }
        }
    }

    fn entry(key: u32, value: u32) -> u32 {
        (key << 24) | (value & 0xFF_FFFF)
    }

    fn directory_header(length: u32) -> u32 {
        length << 16
    }

    fn text_leaf(text: &str) -> Vec<u32> {
        let mut bytes = text.as_bytes().to_vec();
        while bytes.len() % 4 != 0 { bytes.push(0); }
        let mut leaf = vec![directory_header(2 + bytes.len() as u32 / 4), 0, 0];
        leaf.extend(bytes.chunks(4).map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]])));

        leaf
    }

    /// Builds a general format configuration ROM (quadlet 0 is at 0xFFFF_F000_0400).
    pub fn build(layout: &RomLayout) -> Vec<u32> {
        const ROOT: usize = 5;
        const UNIT: usize = ROOT + 4;
        const DEPENDENT: usize = UNIT + 4;

        let mut rom = vec![
            0x0400_0000,
            0x3133_3934,
            0x2000_A000,
            (layout.guid >> 32) as u32,
            layout.guid as u32,
            // root directory
            directory_header(3),
            entry(0x03, (layout.guid >> 40) as u32),
            entry(0x0C, 0x00_83C0),
            entry(layout.unit_directory_key, (UNIT - (ROOT + 3)) as u32),
            // unit directory
            directory_header(layout.unit_directory_length),
            entry(0x12, layout.unit_spec_id),
            entry(0x13, layout.unit_sw_version),
            entry(0xD4, (DEPENDENT - (UNIT + 3)) as u32),
        ];

        let leaves: Vec<(u32, &String)> = [(0x81, &layout.vendor), (0x82, &layout.model)]
            .iter()
            .filter_map(|(key, text)| text.as_ref().map(|t| (*key, t)))
            .collect();

        rom.push(directory_header(1 + leaves.len() as u32));
        rom.push(entry(0x40, layout.command_regs_offset));
        let first_leaf_entry = rom.len();
        rom.extend(std::iter::repeat(0).take(leaves.len()));

        for (i, (key, text)) in leaves.iter().enumerate() {
            let entry_idx = first_leaf_entry + i;
            rom[entry_idx] = entry(*key, (rom.len() - entry_idx) as u32);
            rom.extend(text_leaf(text));
        }

        let crc_length = rom.len() as u32 - 1;
        rom[0] |= crc_length << 16;

        rom
    }
}

/// Faults injected into a simulated camera.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SimFault {
    /// Isochronous stream stops after the given number of further requests complete.
    StallAfterRequests(usize),
    /// First packet of the frame with the given number (counting from the next frame sent)
    /// has no start-of-frame sync field.
    NoSyncOnFrame(u64),
    /// Next write to the feature's control register is flagged in the feature error status.
    RejectFeatureWrite(Feature),
    /// All register reads fail.
    FailReads,
    /// Next video mode change is flagged in the video mode error status.
    RejectVideoMode,
    /// Request completing after the given number of further completed requests is returned
    /// with status `Failed`.
    FailRequest(usize)
}

fn absolute(offset: u32) -> u64 {
    CSR_SPACE_BASE + 4 * offset as u64
}

/// Default inquiry and control register values of simulated features.
fn feature_registers() -> Vec<(Feature, u32, u32)> {
    const PRESENCE: u32 = 1 << 31;
    const ONE_PUSH: u32 = 1 << 28;
    const READOUT: u32 = 1 << 27;
    const ON_OFF: u32 = 1 << 26;
    const AUTO: u32 = 1 << 25;
    const MANUAL: u32 = 1 << 24;
    const ON: u32 = 1 << 25;
    let generic = |flags: u32, min: u32, max: u32| PRESENCE | flags | (min << 12) | max;

    vec![
        (Feature::Brightness, generic(READOUT | ON_OFF | MANUAL, 0, 255), PRESENCE | ON),
        (Feature::WhiteBalance, generic(ONE_PUSH | READOUT | ON_OFF | AUTO | MANUAL, 0, 1023), PRESENCE | ON),
        (Feature::Shutter, generic(READOUT | ON_OFF | AUTO | MANUAL, 1, 4095), PRESENCE | ON | 1),
        (Feature::Gain, generic(ONE_PUSH | READOUT | ON_OFF | AUTO | MANUAL, 0, 680), PRESENCE | ON),
        (
            Feature::Temperature,
            generic(READOUT | ON_OFF | MANUAL, 200, 400),
            PRESENCE | ON | (CURRENT_TEMPERATURE << 12) | CURRENT_TEMPERATURE
        ),
        // readout, on/off, polarity, modes 0 and 1
        (Feature::Trigger, PRESENCE | READOUT | ON_OFF | (1 << 25) | 0xC000, PRESENCE),
    ]
}

/// Current transmission of a simulated camera.
#[derive(Copy, Clone, Debug)]
struct Stream {
    bytes_per_packet: usize,
    packets_per_frame: usize,
    total_bytes: usize
}

struct CameraState {
    rom: Vec<u32>,
    registers: HashMap<u64, u32>,
    write_log: Vec<(u64, u32)>,
    faults: Vec<SimFault>,
    vmode_rejected: bool,
    /// Number of frames sent so far.
    frame: u64,
    /// Index of the next packet within the current frame.
    packet_in_frame: usize,
    pending_shots: u32,
    /// Frame without sync field.
    no_sync_frame: Option<u64>,
    requests_until_stall: Option<usize>,
    requests_until_failure: Option<usize>
}

impl CameraState {
    fn command_base(&self) -> u64 { absolute(COMMAND_REGS_OFFSET) }

    fn format7_base(&self) -> u64 { absolute(FORMAT7_MODE0_OFFSET) }

    fn default_registers() -> HashMap<u64, u32> {
        let base = absolute(COMMAND_REGS_OFFSET);
        let f7 = absolute(FORMAT7_MODE0_OFFSET);
        let mut regs = HashMap::new();

        let mut set = |address: u64, value: u32| { regs.insert(address, value); };

        set(base + csr::INITIALIZE, 0);
        // formats 0 and 7
        set(base + csr::V_FORMAT_INQ, 0x8100_0000);
        for format in 0..8 {
            set(base + csr::V_MODE_INQ + 4 * format, 0);
        }
        // Format_0 modes 1, 3, 5
        set(base + csr::V_MODE_INQ, 0x5400_0000);
        // Format_7 mode 0
        set(base + csr::V_MODE_INQ + 4 * 7, 0x8000_0000);
        for offset in (0..0x100).step_by(4) {
            set(base + csr::V_RATE_INQ + offset, 0);
        }
        // mode 1: 15, 30 fps; mode 3: 7.5, 15 fps; mode 5: 15, 30, 60 fps
        set(base + csr::V_RATE_INQ + 4, 0x1800_0000);
        set(base + csr::V_RATE_INQ + 12, 0x3000_0000);
        set(base + csr::V_RATE_INQ + 20, 0x1C00_0000);
        for mode in 0..8 {
            set(base + csr::V_CSR_INQ_7 + 4 * mode, if mode == 0 { FORMAT7_MODE0_OFFSET } else { 0 });
        }
        // mode/feature error status, power control, one-shot, multi-shot
        set(base + csr::BASIC_FUNC_INQ, 0x6000_0000 | 0x0000_8000 | 0x0000_1000 | 0x0000_0800);

        let mut feature_hi = 0;
        for feature in Feature::iter() {
            set(base + feature.inquiry_offset(), 0);
            set(base + feature.control_offset(), 0);
        }
        for (feature, inquiry, control) in feature_registers() {
            feature_hi = with_msb_bit(feature_hi, feature.presence_bit().1, true);
            set(base + feature.inquiry_offset(), inquiry);
            set(base + feature.control_offset(), control);
        }
        set(base + csr::FEATURE_HI_INQ, feature_hi);
        set(base + csr::FEATURE_LO_INQ, 0);

        set(base + csr::CUR_V_FRM_RATE, with_cur_value(FrameRate::Fps30.index()));
        set(base + csr::CUR_V_MODE, with_cur_value(5));
        set(base + csr::CUR_V_FORMAT, with_cur_value(0));
        set(base + csr::ISO_CHANNEL, iso_channel::pack(0, 2));
        set(base + csr::CAMERA_POWER, registers::with_flag(true));
        set(base + csr::ISO_EN, 0);
        set(base + csr::ONE_SHOT, 0);
        set(base + csr::VMODE_ERROR_STATUS, 0);
        set(base + csr::FEATURE_ERROR_STATUS_HI, 0);
        set(base + csr::FEATURE_ERROR_STATUS_LO, 0);

        set(f7 + format7::MAX_IMAGE_SIZE_INQ, pack16(FORMAT7_MAX_SIZE.0, FORMAT7_MAX_SIZE.1));
        set(f7 + format7::UNIT_SIZE_INQ, pack16(FORMAT7_UNIT_SIZE.0, FORMAT7_UNIT_SIZE.1));
        set(f7 + format7::UNIT_POSITION_INQ, pack16(FORMAT7_UNIT_POSITION.0, FORMAT7_UNIT_POSITION.1));
        set(f7 + format7::IMAGE_POSITION, 0);
        set(f7 + format7::IMAGE_SIZE, pack16(FORMAT7_MAX_SIZE.0, FORMAT7_MAX_SIZE.1));
        // Y8, YUV422, RGB8, Y16
        set(f7 + format7::COLOR_CODING_INQ, 0xAC00_0000);
        set(f7 + format7::COLOR_CODING_ID, registers::with_color_coding_id(PixelFormat::Y8.color_coding_id()));
        set(f7 + format7::PACKET_PARA_INQ, pack16(4, FORMAT7_MAX_BYTES_PER_PACKET));
        set(f7 + format7::BYTE_PER_PACKET, pack16(0, FORMAT7_RECOMMENDED_BYTES_PER_PACKET));
        set(f7 + format7::PIXEL_NUMBER_INQ, 0);
        set(f7 + format7::TOTAL_BYTES_HI_INQ, 0);
        set(f7 + format7::TOTAL_BYTES_LO_INQ, 0);
        set(f7 + format7::PACKET_PER_FRAME_INQ, 0);

        regs
    }

    fn new(rom: Vec<u32>) -> CameraState {
        let mut state = CameraState{
            rom,
            registers: CameraState::default_registers(),
            write_log: vec![],
            faults: vec![],
            vmode_rejected: false,
            frame: 0,
            packet_in_frame: 0,
            pending_shots: 0,
            no_sync_frame: None,
            requests_until_stall: None,
            requests_until_failure: None
        };
        state.update_format7();

        state
    }

    fn reg(&self, address: u64) -> u32 {
        self.registers.get(&address).copied().unwrap_or(0)
    }

    fn take_fault(&mut self, pred: impl Fn(&SimFault) -> bool) -> Option<SimFault> {
        let idx = self.faults.iter().position(pred)?;
        Some(self.faults.remove(idx))
    }

    fn read(&self, address: u64) -> Result<u32, BusError> {
        if self.faults.contains(&SimFault::FailReads) {
            return Err(BusError::Transaction("no acknowledge".to_string()));
        }

        if address >= CONFIG_ROM_BASE && address < CONFIG_ROM_BASE + 4 * self.rom.len() as u64 {
            return Ok(self.rom[((address - CONFIG_ROM_BASE) / 4) as usize]);
        }

        self.registers.get(&address).copied().ok_or_else(
            || BusError::Transaction(format!("address error at 0x{:012X}", address))
        )
    }

    fn write(&mut self, address: u64, value: u32) -> Result<(), BusError> {
        if !self.registers.contains_key(&address) {
            return Err(BusError::Transaction(format!("address error at 0x{:012X}", address)));
        }
        self.write_log.push((address, value));

        let base = self.command_base();
        let f7 = self.format7_base();
        let offset = address.wrapping_sub(base);

        if let Some(feature) = Feature::iter().find(|f| offset == f.control_offset()) {
            self.write_feature_control(feature, value);
            return Ok(());
        }

        match offset {
            csr::INITIALIZE => if flag(value) { self.initialize(); },

            csr::ISO_EN => {
                let was_on = flag(self.reg(address));
                let on = flag(value);
                if on && !was_on {
                    self.start_stream();
                } else if !on && was_on {
                    self.stop_stream();
                }
                self.registers.insert(address, registers::with_flag(on));
            },

            csr::ONE_SHOT => {
                self.pending_shots = if shot::one_shot(value) {
                    1
                } else if shot::multi_shot(value) {
                    shot::count(value)
                } else {
                    0
                };
                if self.pending_shots > 0 && !flag(self.reg(base + csr::ISO_EN)) {
                    self.start_stream();
                }
                self.registers.insert(address, if self.pending_shots > 0 { value } else { 0 });
            },

            csr::CUR_V_MODE | csr::CUR_V_FORMAT | csr::CUR_V_FRM_RATE => {
                if offset == csr::CUR_V_MODE {
                    self.vmode_rejected = self.take_fault(|f| *f == SimFault::RejectVideoMode).is_some();
                }
                self.registers.insert(address, value);
                self.registers.insert(
                    base + csr::VMODE_ERROR_STATUS,
                    registers::with_flag(self.vmode_rejected)
                );
            },

            _ => {
                self.registers.insert(address, value);
                if address == f7 + format7::BYTE_PER_PACKET {
                    self.registers.insert(address, pack16(hi16(value), FORMAT7_RECOMMENDED_BYTES_PER_PACKET));
                }
                if address >= f7 && address < f7 + 0x100 {
                    self.update_format7();
                }
            }
        }

        Ok(())
    }

    fn write_feature_control(&mut self, feature: Feature, value: u32) {
        let base = self.command_base();
        let address = base + feature.control_offset();
        let mut value = with_msb_bit(value, 0, true);
        if feature == Feature::Temperature {
            value = registers::with_field(value, 0, 12, CURRENT_TEMPERATURE);
        }
        self.registers.insert(address, value);

        let rejected = self.take_fault(|f| *f == SimFault::RejectFeatureWrite(feature)).is_some();
        let error_address = base + feature.error_status_register();
        let status = with_msb_bit(self.reg(error_address), feature.presence_bit().1, rejected);
        self.registers.insert(error_address, status);
    }

    fn initialize(&mut self) {
        self.registers = CameraState::default_registers();
        self.update_format7();
        self.pending_shots = 0;
        self.packet_in_frame = 0;
    }

    /// Recomputes Format_7 inquiry registers which depend on image size, color coding and packet size.
    fn update_format7(&mut self) {
        let f7 = self.format7_base();
        let size = self.reg(f7 + format7::IMAGE_SIZE);
        let bits_per_pixel = PixelFormat::from_color_coding_id(color_coding_id(self.reg(f7 + format7::COLOR_CODING_ID)))
            .map(|pf| pf.bits_per_pixel())
            .unwrap_or(8);

        let pixels = hi16(size) * lo16(size);
        let total = pixels as u64 * bits_per_pixel as u64 / 8;
        let bytes_per_packet = hi16(self.reg(f7 + format7::BYTE_PER_PACKET)) as u64;
        let packets = if bytes_per_packet > 0 { (total + bytes_per_packet - 1) / bytes_per_packet } else { 0 };

        self.registers.insert(f7 + format7::PIXEL_NUMBER_INQ, pixels);
        self.registers.insert(f7 + format7::TOTAL_BYTES_HI_INQ, (total >> 32) as u32);
        self.registers.insert(f7 + format7::TOTAL_BYTES_LO_INQ, total as u32);
        self.registers.insert(f7 + format7::PACKET_PER_FRAME_INQ, packets as u32);
    }

    fn start_stream(&mut self) {
        self.packet_in_frame = 0;
    }

    fn stop_stream(&mut self) {
        if self.packet_in_frame > 0 {
            self.frame += 1;
            self.packet_in_frame = 0;
        }
    }

    fn transmitting(&self) -> bool {
        flag(self.reg(self.command_base() + csr::ISO_EN)) || self.pending_shots > 0
    }

    fn channel(&self) -> u32 {
        iso_channel::channel(self.reg(self.command_base() + csr::ISO_CHANNEL))
    }

    fn current_stream(&self) -> Option<Stream> {
        let base = self.command_base();
        let format = VideoFormat::from_index(cur_value(self.reg(base + csr::CUR_V_FORMAT)))?;
        let mode_number = cur_value(self.reg(base + csr::CUR_V_MODE));

        if format == VideoFormat::Format7 {
            let f7 = self.format7_base();
            let bytes_per_packet = hi16(self.reg(f7 + format7::BYTE_PER_PACKET)) as usize;
            let packets_per_frame = self.reg(f7 + format7::PACKET_PER_FRAME_INQ) as usize;
            let total_bytes = self.reg(f7 + format7::TOTAL_BYTES_LO_INQ) as usize;
            if mode_number != 0 || bytes_per_packet == 0 || packets_per_frame == 0 { return None; }
            Some(Stream{ bytes_per_packet, packets_per_frame, total_bytes })
        } else {
            let mode = FixedMode::from_format_and_number(format, mode_number)?;
            let rate = FrameRate::from_index(cur_value(self.reg(base + csr::CUR_V_FRM_RATE)))?;
            let t = transmission::for_fixed_mode(mode, rate).ok()?;
            Some(Stream{
                bytes_per_packet: t.bytes_per_packet as usize,
                packets_per_frame: t.packets_per_frame as usize,
                total_bytes: t.total_bytes as usize
            })
        }
    }

    /// Produces the next isochronous packet (header, payload) if transmitting.
    fn next_packet(&mut self) -> Option<(u32, Vec<u8>)> {
        if !self.transmitting() || self.requests_until_stall == Some(0) {
            return None;
        }
        let stream = self.current_stream()?;

        let start = self.packet_in_frame * stream.bytes_per_packet;
        let end = (start + stream.bytes_per_packet).min(stream.total_bytes);
        let mut payload: Vec<u8> = (start..end).map(|i| frame_byte(self.frame, i)).collect();
        payload.resize(stream.bytes_per_packet, 0);

        let sync = if self.packet_in_frame == 0 && self.no_sync_frame != Some(self.frame) {
            registers::ISO_SYNC_START_OF_FRAME
        } else {
            0
        };
        // data length, tag = 1, channel, tcode = 0xA, sync
        let header = ((stream.bytes_per_packet as u32) << 16) | (1 << 14) | (self.channel() << 8) | (0xA << 4) | sync;

        self.packet_in_frame += 1;
        if self.packet_in_frame == stream.packets_per_frame {
            self.packet_in_frame = 0;
            self.frame += 1;
            if self.pending_shots > 0 {
                self.pending_shots -= 1;
                if self.pending_shots == 0 {
                    let address = self.command_base() + csr::ONE_SHOT;
                    self.registers.insert(address, 0);
                }
            }
        }

        Some((header, payload))
    }

    /// Returns `true` if the completed request is to be reported as failed.
    fn on_request_completed(&mut self) -> bool {
        if let Some(remaining) = self.requests_until_stall.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
        match self.requests_until_failure {
            Some(0) => { self.requests_until_failure = None; true },
            Some(n) => { self.requests_until_failure = Some(n - 1); false },
            None => false
        }
    }
}

/// Simulated IIDC camera; clones share the same state.
#[derive(Clone)]
pub struct SimCamera {
    state: Arc<Mutex<CameraState>>
}

impl SimCamera {
    pub fn new() -> SimCamera {
        SimCamera::with_rom(rom::build(&rom::RomLayout::default()))
    }

    pub fn with_rom(rom: Vec<u32>) -> SimCamera {
        SimCamera{ state: Arc::new(Mutex::new(CameraState::new(rom))) }
    }

    fn lock(&self) -> MutexGuard<CameraState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner()
        }
    }

    /// Returns register value at `offset` from the command register base.
    pub fn register(&self, offset: u64) -> u32 {
        let state = self.lock();
        state.reg(state.command_base() + offset)
    }

    /// Sets register value at `offset` from the command register base (bypassing register semantics).
    pub fn set_register(&self, offset: u64, value: u32) {
        let mut state = self.lock();
        let address = state.command_base() + offset;
        state.registers.insert(address, value);
    }

    /// Returns register value at `offset` from the Format_7 mode 0 CSR block.
    pub fn format7_register(&self, offset: u64) -> u32 {
        let state = self.lock();
        state.reg(state.format7_base() + offset)
    }

    /// Returns all register writes as (offset from the command register base, value).
    pub fn write_log(&self) -> Vec<(u64, u32)> {
        let state = self.lock();
        let base = state.command_base();
        state.write_log.iter().map(|(address, value)| (address.wrapping_sub(base), *value)).collect()
    }

    pub fn num_writes(&self) -> usize { self.lock().write_log.len() }

    pub fn frames_sent(&self) -> u64 { self.lock().frame }

    pub fn inject(&self, fault: SimFault) {
        let mut state = self.lock();
        match fault {
            SimFault::StallAfterRequests(n) => state.requests_until_stall = Some(n),
            SimFault::FailRequest(n) => state.requests_until_failure = Some(n),
            SimFault::NoSyncOnFrame(n) => {
                let frame = state.frame + if state.packet_in_frame > 0 { 1 } else { 0 } + n;
                state.no_sync_frame = Some(frame);
            },
            _ => state.faults.push(fault)
        }
    }

    pub fn clear_faults(&self) {
        let mut state = self.lock();
        state.faults.clear();
        state.requests_until_stall = None;
        state.requests_until_failure = None;
        state.no_sync_frame = None;
    }
}

impl Default for SimCamera {
    fn default() -> SimCamera { SimCamera::new() }
}

enum SimNode {
    /// Node with a configuration ROM only.
    Device(Vec<u32>),
    Camera(SimCamera)
}

struct BusState {
    nodes: BTreeMap<NodeId, SimNode>,
    allocated_channels: u64
}

/// Simulated bus; clones share the same nodes.
#[derive(Clone)]
pub struct SimBus {
    state: Arc<Mutex<BusState>>
}

fn lock_bus(state: &Mutex<BusState>) -> MutexGuard<BusState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner()
    }
}

impl SimBus {
    pub fn new() -> SimBus {
        SimBus{ state: Arc::new(Mutex::new(BusState{ nodes: BTreeMap::new(), allocated_channels: 0 })) }
    }

    /// Adds a node which only has a configuration ROM.
    pub fn add_device(&self, node: NodeId, rom: Vec<u32>) {
        lock_bus(&self.state).nodes.insert(node, SimNode::Device(rom));
    }

    pub fn add_camera(&self, node: NodeId, camera: SimCamera) {
        lock_bus(&self.state).nodes.insert(node, SimNode::Camera(camera));
    }

    pub fn remove_node(&self, node: NodeId) {
        lock_bus(&self.state).nodes.remove(&node);
    }

    fn camera(&self, node: NodeId) -> Result<Option<SimCamera>, BusError> {
        match lock_bus(&self.state).nodes.get(&node) {
            None => Err(BusError::NoSuchNode(node)),
            Some(SimNode::Device(_)) => Ok(None),
            Some(SimNode::Camera(camera)) => Ok(Some(camera.clone()))
        }
    }

    fn read_device_rom(&self, node: NodeId, address: u64) -> Result<u32, BusError> {
        match lock_bus(&self.state).nodes.get(&node) {
            Some(SimNode::Device(rom)) if address >= CONFIG_ROM_BASE => {
                rom.get(((address - CONFIG_ROM_BASE) / 4) as usize).copied().ok_or_else(
                    || BusError::Transaction(format!("address error at 0x{:012X}", address))
                )
            },
            Some(_) => Err(BusError::Transaction(format!("address error at 0x{:012X}", address))),
            None => Err(BusError::NoSuchNode(node))
        }
    }
}

impl Default for SimBus {
    fn default() -> SimBus { SimBus::new() }
}

fn check_alignment(address: u64, length: usize) -> Result<(), BusError> {
    if address % 4 != 0 || length % 4 != 0 {
        Err(BusError::Transaction(format!("unaligned access of {} bytes at 0x{:012X}", length, address)))
    } else {
        Ok(())
    }
}

impl Bus for SimBus {
    fn nodes(&self) -> Result<Vec<NodeId>, BusError> {
        Ok(lock_bus(&self.state).nodes.keys().copied().collect())
    }

    fn read_block(&self, node: NodeId, address: u64, length: usize) -> Result<Vec<u8>, BusError> {
        check_alignment(address, length)?;
        let camera = self.camera(node)?;

        let mut result = Vec::with_capacity(length);
        for i in 0..(length / 4) as u64 {
            let quadlet_address = address + 4 * i;
            let quadlet = match &camera {
                Some(camera) => camera.lock().read(quadlet_address)?,
                None => self.read_device_rom(node, quadlet_address)?
            };
            result.extend_from_slice(&quadlet.to_be_bytes());
        }

        Ok(result)
    }

    fn write_block(&self, node: NodeId, address: u64, data: &[u8]) -> Result<(), BusError> {
        check_alignment(address, data.len())?;
        let camera = self.camera(node)?.ok_or_else(
            || BusError::Transaction(format!("address error at 0x{:012X}", address))
        )?;

        let mut state = camera.lock();
        for (i, chunk) in data.chunks(4).enumerate() {
            state.write(address + 4 * i as u64, u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))?;
        }

        Ok(())
    }

    fn allocate_iso_read_channel(
        &self,
        payload_size: u32,
        allowed_subchannels: u64
    ) -> Result<Box<dyn IsoChannel>, BusError> {
        let mut state = lock_bus(&self.state);
        let free = allowed_subchannels & !state.allocated_channels;
        if free == 0 {
            return Err(BusError::ChannelUnavailable);
        }
        let subchannel = free.trailing_zeros() as u8;
        state.allocated_channels |= 1 << subchannel;

        Ok(Box::new(SimIsoChannel{
            bus: Arc::clone(&self.state),
            subchannel,
            payload_size: payload_size as usize,
            pending: VecDeque::new(),
            finished: VecDeque::new()
        }))
    }
}

struct SimIsoChannel {
    bus: Arc<Mutex<BusState>>,
    subchannel: u8,
    payload_size: usize,
    pending: VecDeque<IsoRequest>,
    finished: VecDeque<IsoRequest>
}

impl SimIsoChannel {
    /// Returns the camera currently transmitting on this channel.
    fn transmitting_camera(&self) -> Option<SimCamera> {
        let bus = lock_bus(&self.bus);
        bus.nodes.values().find_map(|node| match node {
            SimNode::Camera(camera) => {
                let state = camera.lock();
                if state.transmitting() && state.channel() == self.subchannel as u32 {
                    Some(camera.clone())
                } else {
                    None
                }
            },
            SimNode::Device(_) => None
        })
    }

    fn move_completed(&mut self) {
        while let Some(front) = self.pending.front() {
            if front.received_packets() < front.packet_count() { break; }
            if let Some(mut request) = self.pending.pop_front() {
                if request.status() == RequestStatus::Pending {
                    request.finish(RequestStatus::Completed);
                }
                self.finished.push_back(request);
            }
        }
    }

    fn fill_pending(&mut self, count: usize) {
        self.move_completed();
        let camera = match self.transmitting_camera() {
            Some(camera) => camera,
            None => return
        };
        let mut state = camera.lock();

        while self.finished.len() < count {
            let request = match self.pending.front_mut() {
                Some(request) => request,
                None => break
            };
            let (header, payload) = match state.next_packet() {
                Some(packet) => packet,
                None => break
            };
            let length = payload.len().min(request.payload_size());
            if request.store_packet(header, &payload[..length]).is_err() {
                break;
            }
            if request.status() == RequestStatus::Completed {
                if state.on_request_completed() {
                    request.finish(RequestStatus::Failed);
                }
                self.move_completed();
            }
        }
    }
}

impl IsoChannel for SimIsoChannel {
    fn subchannel(&self) -> u8 { self.subchannel }

    fn queue(&mut self, request: IsoRequest) -> Result<(), BusError> {
        if request.subchannel() != self.subchannel {
            return Err(BusError::InvalidRequest(format!(
                "request for subchannel {} queued on channel {}", request.subchannel(), self.subchannel
            )));
        }
        if request.payload_size() > self.payload_size {
            return Err(BusError::InvalidRequest(format!(
                "payload of {} bytes exceeds channel maximum {}", request.payload_size(), self.payload_size
            )));
        }
        self.pending.push_back(request);
        self.move_completed();

        Ok(())
    }

    fn dequeue(
        &mut self,
        count: usize,
        _timeout: Option<std::time::Duration>
    ) -> Result<Vec<IsoRequest>, BusError> {
        self.fill_pending(count);
        let num = count.min(self.finished.len());

        Ok(self.finished.drain(..num).collect())
    }

    fn cancel(&mut self) -> Result<(), BusError> {
        self.move_completed();
        while let Some(mut request) = self.pending.pop_front() {
            request.finish(RequestStatus::Failed);
            self.finished.push_back(request);
        }

        Ok(())
    }
}

impl Drop for SimIsoChannel {
    fn drop(&mut self) {
        lock_bus(&self.bus).allocated_channels &= !(1u64 << self.subchannel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::registers::lo16;

    fn bus_with_camera() -> (SimBus, SimCamera) {
        let bus = SimBus::new();
        let camera = SimCamera::new();
        bus.add_camera(0, camera.clone());
        (bus, camera)
    }

    #[test]
    fn given_rom_read_return_quadlets() {
        let (bus, _) = bus_with_camera();
        let header = bus.read_quadlet(0, CONFIG_ROM_BASE).unwrap();
        assert_eq!(4, header >> 24);
        assert_eq!(0x3133_3934, bus.read_quadlet(0, CONFIG_ROM_BASE + 4).unwrap());
        assert!(bus.read_quadlet(0, CONFIG_ROM_BASE + 2).is_err());
        assert!(matches!(bus.read_quadlet(3, CONFIG_ROM_BASE), Err(BusError::NoSuchNode(3))));
    }

    #[test]
    fn given_byte_per_packet_write_update_packets_per_frame() {
        let (bus, camera) = bus_with_camera();
        let f7 = absolute(FORMAT7_MODE0_OFFSET);
        bus.write_quadlet(0, f7 + format7::BYTE_PER_PACKET, pack16(3072, 0)).unwrap();
        // 1280x960 Y8
        assert_eq!(400, camera.format7_register(format7::PACKET_PER_FRAME_INQ));
        assert_eq!(FORMAT7_RECOMMENDED_BYTES_PER_PACKET, lo16(camera.format7_register(format7::BYTE_PER_PACKET)));

        bus.write_quadlet(0, f7 + format7::IMAGE_SIZE, pack16(640, 482)).unwrap();
        assert_eq!(101, camera.format7_register(format7::PACKET_PER_FRAME_INQ));
        assert_eq!(640 * 482, camera.format7_register(format7::TOTAL_BYTES_LO_INQ));
    }

    #[test]
    fn given_one_shot_produce_single_frame() {
        let (bus, camera) = bus_with_camera();
        let mut channel = bus.allocate_iso_read_channel(4096, 1).unwrap();
        // Y8 640x480 @ 30 fps: 240 packets of 1280 bytes
        let request = IsoRequest::new(0, 0, 240, 1280, vec![0; 240 * 1280]).unwrap();
        channel.queue(request).unwrap();
        let extra = IsoRequest::new(1, 0, 1, 1280, vec![0; 1280]).unwrap();
        channel.queue(extra).unwrap();

        bus.write_quadlet(0, absolute(COMMAND_REGS_OFFSET) + csr::ONE_SHOT, shot::one_shot_request()).unwrap();
        let finished = channel.dequeue(2, None).unwrap();
        assert_eq!(1, finished.len());
        assert_eq!(registers::ISO_SYNC_START_OF_FRAME, registers::iso_header_sync(finished[0].headers()[0]));
        assert_eq!(0, registers::iso_header_sync(finished[0].headers()[1]));
        assert_eq!(frame_contents(0, 640 * 480), finished[0].buffer());
        assert_eq!(1, camera.frames_sent());
        assert_eq!(0, camera.register(csr::ONE_SHOT));

        channel.cancel().unwrap();
        let rest = channel.dequeue(1, None).unwrap();
        assert_eq!(RequestStatus::Failed, rest[0].status());
        assert_eq!(1, rest[0].tag());
    }

    #[test]
    fn given_allocated_channel_not_available_until_dropped() {
        let (bus, _) = bus_with_camera();
        let channel = bus.allocate_iso_read_channel(4096, 1).unwrap();
        assert!(matches!(bus.allocate_iso_read_channel(4096, 1), Err(BusError::ChannelUnavailable)));
        assert_eq!(1, bus.allocate_iso_read_channel(4096, 0b11).unwrap().subchannel());
        drop(channel);
        assert_eq!(0, bus.allocate_iso_read_channel(4096, 1).unwrap().subchannel());
    }

    #[test]
    fn given_zero_packet_request_complete_immediately() {
        let (bus, _) = bus_with_camera();
        let mut channel = bus.allocate_iso_read_channel(4096, 1).unwrap();
        channel.queue(IsoRequest::new(7, 0, 0, 1024, vec![]).unwrap()).unwrap();
        let finished = channel.dequeue(1, Some(std::time::Duration::from_millis(1))).unwrap();
        assert_eq!(RequestStatus::Completed, finished[0].status());
        assert_eq!(7, finished[0].tag());
    }

    #[test]
    fn given_failing_reads_fault_reads_fail() {
        let (bus, camera) = bus_with_camera();
        camera.inject(SimFault::FailReads);
        assert!(matches!(bus.read_quadlet(0, CONFIG_ROM_BASE), Err(BusError::Transaction(_))));
        camera.clear_faults();
        assert!(bus.read_quadlet(0, CONFIG_ROM_BASE).is_ok());
    }
}
