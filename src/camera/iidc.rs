//
// iidc-driver - IEEE 1394 IIDC camera driver
// Copyright (c) 2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Camera discovery and the mode/region controller.
//!

use crate::bus::{Bus, IsoChannel, IsoSpeed, NodeId, RegisterAccessor};
use crate::camera::capability::{self, BasicFunctions, CapabilityTable};
use crate::camera::feature::{self, FeatureDescriptor};
use crate::camera::registers::{self, color_coding_id, csr, cur_value, format7, hi16, iso_channel, lo16, pack16};
use crate::camera::rom::{self, SpecVersion};
use crate::camera::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Channels usable by IIDC cameras (the ISO_Channel register has 4 bits).
const IIDC_SUBCHANNELS: u64 = 0xFFFF;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ControllerState {
    /// No valid video mode selected.
    Idle,
    ModeSelected,
    Acquiring
}

/// Driver settings (see `config::Configuration::driver_settings`).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DriverSettings {
    /// Preferred isochronous channel; another free one is used if it is taken.
    pub iso_channel: u32,
    pub iso_speed: IsoSpeed,
    /// Number of frame buffers used for continuous acquisition.
    pub num_buffers: usize,
    /// Multiplier of the expected frame transmission time giving the dequeue timeout.
    pub timeout_factor: u32,
    /// Delay between disabling and re-enabling continuous transmission.
    pub sync_settle_delay: Duration
}

impl Default for DriverSettings {
    fn default() -> DriverSettings {
        DriverSettings{
            iso_channel: 0,
            iso_speed: IsoSpeed::S400,
            num_buffers: 4,
            timeout_factor: 4,
            sync_settle_delay: Duration::from_millis(10)
        }
    }
}

pub struct IIDCDriver {
    bus: Arc<dyn Bus>,
    settings: DriverSettings
}

impl IIDCDriver {
    pub fn new(bus: Arc<dyn Bus>) -> IIDCDriver {
        IIDCDriver::with_settings(bus, DriverSettings::default())
    }

    pub fn with_settings(bus: Arc<dyn Bus>, settings: DriverSettings) -> IIDCDriver {
        IIDCDriver{ bus, settings }
    }

    pub fn settings(&self) -> &DriverSettings { &self.settings }

    /// Returns nodes with a valid IIDC configuration ROM.
    pub fn list_cameras(&self) -> Result<Vec<NodeId>, CameraError> {
        Ok(self.enumerate_cameras()?.iter().map(|info| info.id().node).collect())
    }

    /// Returns information about all cameras on the bus; nodes which are not cameras are skipped.
    pub fn enumerate_cameras(&self) -> Result<Vec<CameraInfo>, CameraError> {
        let mut cameras = vec![];

        for node in self.bus.nodes()? {
            let regs = RegisterAccessor::new(Arc::clone(&self.bus), node);
            match rom::validate(&regs) {
                Ok(rom_info) => {
                    log::info!(
                        "found camera at node {}: {} {} (IIDC {})",
                        node, rom_info.vendor, rom_info.model, rom_info.spec_version
                    );
                    cameras.push(CameraInfo{
                        id: DeviceId{ node, guid: rom_info.guid },
                        vendor: rom_info.vendor,
                        model: rom_info.model
                    });
                },
                Err(e) => log::debug!("node {} is not a camera: {}", node, e)
            }
        }

        Ok(cameras)
    }

    pub fn open_camera(&self, node: NodeId) -> Result<IIDCCamera, CameraError> {
        let regs = RegisterAccessor::new(Arc::clone(&self.bus), node);
        let rom_info = rom::validate(&regs)?;
        let base = rom_info.command_regs_base;

        let basic_functions = BasicFunctions::from_inquiry(regs.read(base + csr::BASIC_FUNC_INQ)?);
        let capabilities = capability::read_capability_table(&regs, base, rom_info.spec_version)?;

        let channel = match self.bus.allocate_iso_read_channel(
            self.settings.iso_speed.max_payload(),
            1 << self.settings.iso_channel
        ) {
            Ok(channel) => channel,
            Err(_) => self.bus.allocate_iso_read_channel(self.settings.iso_speed.max_payload(), IIDC_SUBCHANNELS)?
        };

        let mut camera = IIDCCamera{
            regs,
            info: CameraInfo{
                id: DeviceId{ node, guid: rom_info.guid },
                vendor: rom_info.vendor,
                model: rom_info.model
            },
            spec_version: rom_info.spec_version,
            base,
            basic_functions,
            capabilities,
            features: HashMap::new(),
            mode: None,
            frame_rate: None,
            pixel_format: None,
            region: Region::default(),
            transmission: IsochronousTransmission::default(),
            settings: self.settings,
            channel,
            state: ControllerState::Idle
        };
        camera.refresh_state()?;

        log::info!(
            "opened {} (IIDC {}, GUID {:016X}) at node {}; mode: {:?}",
            camera.info.name(), camera.spec_version, camera.info.id.guid, node, camera.mode
        );

        Ok(camera)
    }
}

pub struct IIDCCamera {
    pub(super) regs: RegisterAccessor,
    pub(super) info: CameraInfo,
    pub(super) spec_version: SpecVersion,
    /// Absolute address of the command/status registers.
    pub(super) base: u64,
    pub(super) basic_functions: BasicFunctions,
    pub(super) capabilities: CapabilityTable,
    pub(super) features: HashMap<Feature, FeatureDescriptor>,
    pub(super) mode: Option<Mode>,
    /// Only for fixed modes.
    pub(super) frame_rate: Option<FrameRate>,
    pub(super) pixel_format: Option<PixelFormat>,
    pub(super) region: Region,
    pub(super) transmission: IsochronousTransmission,
    pub(super) settings: DriverSettings,
    pub(super) channel: Box<dyn IsoChannel>,
    pub(super) state: ControllerState
}

impl IIDCCamera {
    pub fn info(&self) -> &CameraInfo { &self.info }

    pub fn spec_version(&self) -> SpecVersion { self.spec_version }

    pub fn basic_functions(&self) -> &BasicFunctions { &self.basic_functions }

    pub fn state(&self) -> ControllerState { self.state }

    pub fn supported_formats(&self) -> &[VideoFormat] { &self.capabilities.formats }

    pub fn supported_modes(&self) -> &[Mode] { &self.capabilities.modes }

    pub fn supported_frame_rates(&self, mode: Mode) -> &[FrameRate] { self.capabilities.frame_rates(mode) }

    pub fn mode_descriptor(&self, mode: Mode) -> Option<&ModeDescriptor> { self.capabilities.descriptors.get(&mode) }

    pub fn mode(&self) -> Option<Mode> { self.mode }

    pub fn frame_rate(&self) -> Option<FrameRate> { self.frame_rate }

    pub fn pixel_format(&self) -> Option<PixelFormat> { self.pixel_format }

    pub fn region(&self) -> Region { self.region }

    pub fn transmission(&self) -> &IsochronousTransmission { &self.transmission }

    /// Size of a raw frame in bytes.
    pub fn frame_size(&self) -> usize { self.transmission.total_bytes as usize }

    pub fn settings(&self) -> &DriverSettings { &self.settings }

    fn ensure_not_acquiring(&self) -> Result<(), CameraError> {
        if self.state == ControllerState::Acquiring {
            Err(CameraError::UnsupportedCapability("operation not allowed during acquisition".to_string()))
        } else {
            Ok(())
        }
    }

    fn require_mode(&self) -> Result<Mode, CameraError> {
        self.mode.ok_or_else(|| CameraError::UnsupportedCapability("no video mode selected".to_string()))
    }

    /// Disables continuous and finite-shot transmission.
    pub(super) fn stop_transmission(&self) -> Result<(), CameraError> {
        self.regs.write(self.base + csr::ISO_EN, registers::with_flag(false))?;
        if self.basic_functions.one_shot || self.basic_functions.multi_shot {
            self.regs.write(self.base + csr::ONE_SHOT, 0)?;
        }

        Ok(())
    }

    /// Sets the camera's transmission channel and speed to those of the allocated receive channel.
    pub(super) fn program_iso_channel(&self) -> Result<(), CameraError> {
        self.regs.write(
            self.base + csr::ISO_CHANNEL,
            iso_channel::pack(self.channel.subchannel() as u32, self.settings.iso_speed.code())
        )?;

        Ok(())
    }

    /// Re-reads current mode, frame rate, pixel format, region, transmission parameters and features.
    pub(super) fn refresh_state(&mut self) -> Result<(), CameraError> {
        self.features = feature::read_feature_descriptors(&self.regs, self.base)?;

        let format_idx = cur_value(self.regs.read(self.base + csr::CUR_V_FORMAT)?);
        let mode_number = cur_value(self.regs.read(self.base + csr::CUR_V_MODE)?);
        let mode = VideoFormat::from_index(format_idx)
            .and_then(|format| Mode::from_format_and_number(format, mode_number))
            .filter(|mode| self.capabilities.supports_mode(*mode));

        self.mode = mode;
        self.frame_rate = None;
        self.pixel_format = None;
        self.region = Region::default();
        self.transmission = IsochronousTransmission::default();
        self.state = ControllerState::Idle;

        let mode = match mode {
            Some(mode) => mode,
            None => {
                log::warn!("camera is in unsupported format {} mode {}", format_idx, mode_number);
                return Ok(());
            }
        };

        let speed = self.settings.iso_speed;
        let mut transmission = match mode {
            Mode::Fixed(fixed) => {
                let rate_idx = cur_value(self.regs.read(self.base + csr::CUR_V_FRM_RATE)?);
                let rate = match FrameRate::from_index(rate_idx)
                    .filter(|rate| self.capabilities.frame_rates(mode).contains(rate)) {
                    Some(rate) => rate,
                    None => {
                        log::warn!("camera uses unsupported frame rate {} in mode {:?}", rate_idx, fixed);
                        return Ok(());
                    }
                };
                self.frame_rate = Some(rate);
                self.pixel_format = Some(fixed.pixel_format());
                self.region = Region::new(Offset::default(), fixed.dimension());
                transmission::for_fixed_mode(fixed, rate)?
            },

            Mode::Partial(n) => {
                let csr_base = self.capabilities.format7_csr(n)?;
                let descriptor = capability::read_format7_descriptor(&self.regs, csr_base, self.spec_version)?;
                self.capabilities.descriptors.insert(mode, descriptor);

                let position = self.regs.read(csr_base + format7::IMAGE_POSITION)?;
                let size = self.regs.read(csr_base + format7::IMAGE_SIZE)?;
                self.region = Region::new(
                    Offset::new(lo16(position), hi16(position)),
                    Dimension::new(hi16(size), lo16(size))
                );

                let coding = color_coding_id(self.regs.read(csr_base + format7::COLOR_CODING_ID)?);
                let pixel_format = PixelFormat::from_color_coding_id(coding).ok_or_else(
                    || CameraError::ProtocolMismatch(format!("invalid color coding id {}", coding))
                )?;
                self.pixel_format = Some(pixel_format);
                transmission::for_partial_mode(&self.regs, csr_base, pixel_format, speed)?
            }
        };

        transmission.check_link(speed)?;
        transmission.subchannel = self.channel.subchannel();
        transmission.speed = speed.code();
        self.transmission = transmission;
        self.state = ControllerState::ModeSelected;

        Ok(())
    }

    fn write_mode_registers(&self, format: u32, mode_number: u32, rate: Option<u32>) -> Result<(), CameraError> {
        self.regs.write(self.base + csr::CUR_V_FORMAT, registers::with_cur_value(format))?;
        self.regs.write(self.base + csr::CUR_V_MODE, registers::with_cur_value(mode_number))?;
        if let Some(rate) = rate {
            self.regs.write(self.base + csr::CUR_V_FRM_RATE, registers::with_cur_value(rate))?;
        }

        Ok(())
    }

    /// Fails if the link cannot carry `mode` at `rate`.
    fn check_fixed_mode_link(&self, mode: FixedMode, rate: FrameRate) -> Result<(), CameraError> {
        transmission::for_fixed_mode(mode, rate)?.check_link(self.settings.iso_speed)
    }

    fn video_mode_rejected(&self) -> Result<bool, CameraError> {
        if !self.basic_functions.mode_error_status {
            return Ok(false);
        }
        Ok(registers::flag(self.regs.read(self.base + csr::VMODE_ERROR_STATUS)?))
    }

    pub fn set_mode(&mut self, mode: Mode) -> Result<(), CameraError> {
        self.ensure_not_acquiring()?;
        if !self.capabilities.supports_mode(mode) {
            return Err(CameraError::UnsupportedCapability(format!("video mode {:?}", mode)));
        }

        let rate = match mode {
            Mode::Fixed(fixed) => {
                let supported = self.capabilities.frame_rates(mode);
                let rate = match self.frame_rate.filter(|r| supported.contains(r)) {
                    Some(rate) => rate,
                    None => supported.first().copied().ok_or_else(
                        || CameraError::UnsupportedCapability(format!("no frame rates in mode {:?}", mode))
                    )?
                };
                self.check_fixed_mode_link(fixed, rate)?;
                Some(rate)
            },
            Mode::Partial(_) => None
        };

        self.stop_transmission()?;

        let prev_format = cur_value(self.regs.read(self.base + csr::CUR_V_FORMAT)?);
        let prev_mode = cur_value(self.regs.read(self.base + csr::CUR_V_MODE)?);
        let prev_rate = cur_value(self.regs.read(self.base + csr::CUR_V_FRM_RATE)?);

        self.write_mode_registers(mode.format().index(), mode.mode_number(), rate.map(|r| r.index()))?;
        self.program_iso_channel()?;

        if self.video_mode_rejected()? {
            log::warn!("camera rejected video mode {:?}; restoring previous mode", mode);
            if let Err(e) = self.write_mode_registers(prev_format, prev_mode, Some(prev_rate)) {
                log::warn!("failed to restore video mode: {}", e);
            }
            if let Err(e) = self.refresh_state() {
                log::warn!("failed to read camera state: {}", e);
            }
            return Err(CameraError::HardwareRejectedValue(format!("video mode {:?}", mode)));
        }

        self.refresh_state()?;
        log::info!(
            "video mode set to {:?} ({:?}, {:?}, {}x{})",
            mode, self.frame_rate, self.pixel_format, self.region.dimension.width, self.region.dimension.height
        );

        Ok(())
    }

    pub fn set_frame_rate(&mut self, rate: FrameRate) -> Result<(), CameraError> {
        self.ensure_not_acquiring()?;
        let mode = self.require_mode()?;
        let fixed = match mode {
            Mode::Fixed(fixed) if self.capabilities.frame_rates(mode).contains(&rate) => fixed,
            _ => return Err(CameraError::UnsupportedCapability(format!("frame rate {:?} in mode {:?}", rate, mode)))
        };
        self.check_fixed_mode_link(fixed, rate)?;

        self.regs.write(self.base + csr::CUR_V_FRM_RATE, registers::with_cur_value(rate.index()))?;
        self.refresh_state()
    }

    /// Checks that `region` is aligned to the mode's units and fits within its maximum size.
    ///
    /// The whole window must fit: `offset + dimension` may not exceed the maximum size, so a
    /// dimension equal to the maximum is accepted only at offset 0.
    pub fn validate_region(descriptor: &ModeDescriptor, region: &Region) -> Result<(), CameraError> {
        let Region{ offset, dimension } = region;
        let unit = descriptor.unit_dimension;
        let unit_offset = descriptor.unit_offset;
        let max = descriptor.max_dimension;

        let valid = dimension.width > 0 && dimension.height > 0
            && dimension.width % unit.width == 0 && dimension.height % unit.height == 0
            && offset.column % unit_offset.width == 0 && offset.row % unit_offset.height == 0
            && offset.column as u64 + dimension.width as u64 <= max.width as u64
            && offset.row as u64 + dimension.height as u64 <= max.height as u64;

        if valid {
            Ok(())
        } else {
            Err(CameraError::UnsupportedCapability(format!(
                "region {:?} (unit {:?}, offset unit {:?}, max {:?})", region, unit, unit_offset, max
            )))
        }
    }

    pub fn set_region(&mut self, region: Region) -> Result<(), CameraError> {
        self.ensure_not_acquiring()?;
        let mode = self.require_mode()?;
        let mode_number = match mode {
            Mode::Partial(n) => n,
            Mode::Fixed(_) => return Err(CameraError::UnsupportedCapability(
                "region can be set only in Format_7 modes".to_string()
            ))
        };
        let descriptor = self.mode_descriptor(mode).copied().ok_or_else(
            || CameraError::UnsupportedCapability(format!("no descriptor of mode {:?}", mode))
        )?;
        IIDCCamera::validate_region(&descriptor, &region)?;

        let csr_base = self.capabilities.format7_csr(mode_number)?;
        self.regs.write(csr_base + format7::IMAGE_POSITION, pack16(region.offset.column, region.offset.row))?;
        self.regs.write(csr_base + format7::IMAGE_SIZE, pack16(region.dimension.width, region.dimension.height))?;
        self.refresh_state()?;
        log::info!("region set to {:?}", self.region);

        Ok(())
    }

    pub fn set_pixel_format(&mut self, pixel_format: PixelFormat) -> Result<(), CameraError> {
        self.ensure_not_acquiring()?;
        let mode = self.require_mode()?;
        let supported = self.mode_descriptor(mode).map(|d| d.pixel_formats.contains(pixel_format)).unwrap_or(false);
        if !supported {
            return Err(CameraError::UnsupportedCapability(format!("pixel format {:?} in mode {:?}", pixel_format, mode)));
        }

        match mode {
            Mode::Fixed(_) => Ok(()),
            Mode::Partial(n) => {
                let csr_base = self.capabilities.format7_csr(n)?;
                self.regs.write(
                    csr_base + format7::COLOR_CODING_ID,
                    registers::with_color_coding_id(pixel_format.color_coding_id())
                )?;
                self.refresh_state()
            }
        }
    }

    /// Resets the camera to its factory defaults.
    pub fn reset(&mut self) -> Result<(), CameraError> {
        self.ensure_not_acquiring()?;
        self.regs.write(self.base + csr::INITIALIZE, registers::with_flag(true))?;
        log::info!("camera {} reset", self.info.name());
        self.refresh_state()
    }

    pub fn set_power(&mut self, on: bool) -> Result<(), CameraError> {
        self.ensure_not_acquiring()?;
        if !self.basic_functions.power_control {
            return Err(CameraError::UnsupportedCapability("power control".to_string()));
        }
        self.regs.write(self.base + csr::CAMERA_POWER, registers::with_flag(on))?;

        Ok(())
    }

    pub fn close(self) {}
}

impl Drop for IIDCCamera {
    fn drop(&mut self) {
        if let Err(e) = self.stop_transmission() {
            log::warn!("failed to disable transmission of {}: {}", self.info.name(), e);
        }
        log::info!("closed {}", self.info.name());
    }
}
