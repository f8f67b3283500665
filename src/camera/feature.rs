//
// iidc-driver - IEEE 1394 IIDC camera driver
// Copyright (c) 2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Camera features (brightness, shutter, gain etc.): inquiry decoding, operating modes and values.
//!

use crate::bus::RegisterAccessor;
use crate::camera::registers::{csr, field, msb_bit, with_field, with_msb_bit};
use crate::camera::{CameraError, IIDCCamera};
use enum_dispatch::enum_dispatch;
use std::collections::HashMap;
use strum::IntoEnumIterator;
use strum_macros as sm;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, sm::EnumIter)]
pub enum Feature {
    Brightness,
    AutoExposure,
    Sharpness,
    WhiteBalance,
    Hue,
    Saturation,
    Gamma,
    Shutter,
    Gain,
    Iris,
    Focus,
    Temperature,
    Trigger,
    TriggerDelay,
    WhiteShading,
    FrameRate,
    Zoom,
    Pan,
    Tilt,
    OpticalFilter,
    CaptureSize,
    CaptureQuality
}

/// Number of features whose presence is reported in FEATURE_HI_INQ.
const NUM_HI_FEATURES: u32 = 16;

impl Feature {
    /// Offset of the feature's inquiry register relative to the command register base.
    pub fn inquiry_offset(&self) -> u64 {
        let idx = *self as u64;
        match self {
            Feature::Zoom | Feature::Pan | Feature::Tilt | Feature::OpticalFilter =>
                0x580 + 4 * (idx - NUM_HI_FEATURES as u64),
            Feature::CaptureSize => 0x5C0,
            Feature::CaptureQuality => 0x5C4,
            _ => 0x500 + 4 * idx
        }
    }

    pub fn control_offset(&self) -> u64 {
        self.inquiry_offset() + csr::FEATURE_CONTROL_DELTA
    }

    /// Returns the presence inquiry register and the feature's IIDC bit in it.
    ///
    /// Feature error status registers (0x640, 0x644) use the same bit layout.
    pub fn presence_bit(&self) -> (u64, u32) {
        let idx = *self as u32;
        match self {
            Feature::Zoom | Feature::Pan | Feature::Tilt | Feature::OpticalFilter =>
                (csr::FEATURE_LO_INQ, idx - NUM_HI_FEATURES),
            Feature::CaptureSize => (csr::FEATURE_LO_INQ, 16),
            Feature::CaptureQuality => (csr::FEATURE_LO_INQ, 17),
            _ => (csr::FEATURE_HI_INQ, idx)
        }
    }

    pub fn error_status_register(&self) -> u64 {
        match self.presence_bit().0 {
            csr::FEATURE_HI_INQ => csr::FEATURE_ERROR_STATUS_HI,
            _ => csr::FEATURE_ERROR_STATUS_LO
        }
    }

    pub fn is_trigger(&self) -> bool { *self == Feature::Trigger }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FeatureOperatingMode {
    Disabled,
    /// Camera controls the value continuously.
    Automatic,
    /// Camera adjusts the value once, then returns to manual control.
    AutoAdjustOnce,
    Manual
}

/// Generic feature inquiry register.
mod inquiry {
    use super::*;

    pub fn presence(value: u32) -> bool { msb_bit(value, 0) }
    pub fn absolute(value: u32) -> bool { msb_bit(value, 1) }
    pub fn one_push(value: u32) -> bool { msb_bit(value, 3) }
    pub fn readout(value: u32) -> bool { msb_bit(value, 4) }
    pub fn on_off(value: u32) -> bool { msb_bit(value, 5) }
    pub fn auto(value: u32) -> bool { msb_bit(value, 6) }
    pub fn manual(value: u32) -> bool { msb_bit(value, 7) }
    /// Bits 23-12.
    pub fn min(value: u32) -> u32 { field(value, 12, 12) }
    /// Bits 11-0.
    pub fn max(value: u32) -> u32 { field(value, 0, 12) }

    /// Trigger: bit 25.
    pub fn polarity(value: u32) -> bool { msb_bit(value, 6) }
    /// Trigger: availability of modes 0-3 (bits 15-12), mode 0 in the most significant bit.
    pub fn trigger_modes(value: u32) -> u32 { field(value, 12, 4) }
}

/// Generic feature control register.
mod control {
    use super::*;

    pub fn absolute(value: u32) -> bool { msb_bit(value, 1) }
    pub fn with_absolute(value: u32, state: bool) -> u32 { with_msb_bit(value, 1, state) }
    pub fn one_push(value: u32) -> bool { msb_bit(value, 5) }
    pub fn with_one_push(value: u32, state: bool) -> u32 { with_msb_bit(value, 5, state) }
    pub fn on(value: u32) -> bool { msb_bit(value, 6) }
    pub fn with_on(value: u32, state: bool) -> u32 { with_msb_bit(value, 6, state) }
    pub fn auto(value: u32) -> bool { msb_bit(value, 7) }
    pub fn with_auto(value: u32, state: bool) -> u32 { with_msb_bit(value, 7, state) }
    /// Bits 23-12: blue/U (white balance), target (temperature).
    pub fn high_value(value: u32) -> u32 { field(value, 12, 12) }
    pub fn with_high_value(value: u32, v: u32) -> u32 { with_field(value, 12, 12, v) }
    /// Bits 11-0: value, red/V (white balance), current (temperature).
    pub fn value(value: u32) -> u32 { field(value, 0, 12) }
    pub fn with_value(value: u32, v: u32) -> u32 { with_field(value, 0, 12, v) }

    /// Trigger: bits 19-16.
    pub fn trigger_mode(value: u32) -> u32 { field(value, 16, 4) }
    pub fn with_trigger_mode(value: u32, mode: u32) -> u32 { with_field(value, 16, 4, mode) }
    /// Trigger: bit 24.
    pub fn polarity(value: u32) -> bool { msb_bit(value, 7) }
    pub fn with_polarity(value: u32, state: bool) -> u32 { with_msb_bit(value, 7, state) }
}

#[enum_dispatch(FeatureDescriptor)]
pub trait FeatureCapabilities {
    fn available(&self) -> bool;

    /// Current value can be read.
    fn readable(&self) -> bool;

    /// Feature can be switched on and off.
    fn switchable(&self) -> bool;

    fn supports_operating_mode(&self, mode: FeatureOperatingMode) -> bool;

    /// Valid values (inclusive); `None` if the feature has no generic value.
    fn range(&self) -> Option<(u32, u32)>;
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct GenericFeatureDescriptor {
    pub available: bool,
    pub absolute: bool,
    pub one_push: bool,
    pub readable: bool,
    pub switchable: bool,
    pub auto: bool,
    pub manual: bool,
    pub minimum: u32,
    pub maximum: u32
}

impl GenericFeatureDescriptor {
    pub fn from_inquiry(value: u32) -> GenericFeatureDescriptor {
        let mut minimum = inquiry::min(value);
        let mut maximum = inquiry::max(value);
        if minimum > maximum { std::mem::swap(&mut minimum, &mut maximum); }

        GenericFeatureDescriptor{
            available: inquiry::presence(value),
            absolute: inquiry::absolute(value),
            one_push: inquiry::one_push(value),
            readable: inquiry::readout(value),
            switchable: inquiry::on_off(value),
            auto: inquiry::auto(value),
            manual: inquiry::manual(value),
            minimum,
            maximum
        }
    }
}

impl FeatureCapabilities for GenericFeatureDescriptor {
    fn available(&self) -> bool { self.available }

    fn readable(&self) -> bool { self.readable }

    fn switchable(&self) -> bool { self.switchable }

    fn supports_operating_mode(&self, mode: FeatureOperatingMode) -> bool {
        match mode {
            FeatureOperatingMode::Disabled => self.switchable,
            FeatureOperatingMode::Automatic => self.auto,
            FeatureOperatingMode::AutoAdjustOnce => self.one_push,
            FeatureOperatingMode::Manual => self.manual
        }
    }

    fn range(&self) -> Option<(u32, u32)> { Some((self.minimum, self.maximum)) }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TriggerFeatureDescriptor {
    pub available: bool,
    pub readable: bool,
    pub switchable: bool,
    pub polarity: bool,
    /// Bit 3: mode 0, ..., bit 0: mode 3.
    pub modes: u32
}

impl TriggerFeatureDescriptor {
    pub fn from_inquiry(value: u32) -> TriggerFeatureDescriptor {
        TriggerFeatureDescriptor{
            available: inquiry::presence(value),
            readable: inquiry::readout(value),
            switchable: inquiry::on_off(value),
            polarity: inquiry::polarity(value),
            modes: inquiry::trigger_modes(value)
        }
    }

    pub fn supports_trigger_mode(&self, mode: u32) -> bool {
        mode < 4 && self.modes & (0b1000 >> mode) != 0
    }
}

impl FeatureCapabilities for TriggerFeatureDescriptor {
    fn available(&self) -> bool { self.available }

    fn readable(&self) -> bool { self.readable }

    fn switchable(&self) -> bool { self.switchable }

    fn supports_operating_mode(&self, mode: FeatureOperatingMode) -> bool {
        match mode {
            FeatureOperatingMode::Disabled => self.switchable,
            FeatureOperatingMode::Manual => self.available,
            FeatureOperatingMode::Automatic | FeatureOperatingMode::AutoAdjustOnce => false
        }
    }

    fn range(&self) -> Option<(u32, u32)> { None }
}

#[enum_dispatch]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FeatureDescriptor {
    Generic(GenericFeatureDescriptor),
    Trigger(TriggerFeatureDescriptor)
}

impl FeatureDescriptor {
    pub fn decode(feature: Feature, inquiry: u32) -> FeatureDescriptor {
        if feature.is_trigger() {
            FeatureDescriptor::Trigger(TriggerFeatureDescriptor::from_inquiry(inquiry))
        } else {
            FeatureDescriptor::Generic(GenericFeatureDescriptor::from_inquiry(inquiry))
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TriggerSetting {
    pub enabled: bool,
    /// True: active high (rising edge).
    pub polarity: bool,
    /// Trigger mode 0-3.
    pub mode: u32,
    pub parameter: u32
}

/// Reads inquiry registers of all features advertised in the presence registers.
///
/// Only available features are returned.
pub fn read_feature_descriptors(
    regs: &RegisterAccessor,
    base: u64
) -> Result<HashMap<Feature, FeatureDescriptor>, CameraError> {
    let hi = regs.read(base + csr::FEATURE_HI_INQ)?;
    let lo = regs.read(base + csr::FEATURE_LO_INQ)?;

    let mut descriptors = HashMap::new();
    for feature in Feature::iter() {
        let (register, bit) = feature.presence_bit();
        let presence = if register == csr::FEATURE_HI_INQ { hi } else { lo };
        if !msb_bit(presence, bit) { continue; }

        let descriptor = FeatureDescriptor::decode(feature, regs.read(base + feature.inquiry_offset())?);
        if descriptor.available() {
            descriptors.insert(feature, descriptor);
        } else {
            log::debug!("{:?} is advertised, but its inquiry register reports it absent", feature);
        }
    }

    Ok(descriptors)
}

fn operating_mode_of(descriptor: &FeatureDescriptor, control_value: u32) -> FeatureOperatingMode {
    if descriptor.switchable() && !control::on(control_value) {
        return FeatureOperatingMode::Disabled;
    }

    match descriptor {
        FeatureDescriptor::Trigger(_) => FeatureOperatingMode::Manual,
        FeatureDescriptor::Generic(_) => if control::one_push(control_value) {
            FeatureOperatingMode::AutoAdjustOnce
        } else if control::auto(control_value) {
            FeatureOperatingMode::Automatic
        } else {
            FeatureOperatingMode::Manual
        }
    }
}

fn with_operating_mode(control_value: u32, mode: FeatureOperatingMode) -> u32 {
    let (on, auto, one_push) = match mode {
        FeatureOperatingMode::Disabled => return control::with_on(control_value, false),
        FeatureOperatingMode::Automatic => (true, true, false),
        FeatureOperatingMode::AutoAdjustOnce => (true, false, true),
        FeatureOperatingMode::Manual => (true, false, false)
    };

    control::with_one_push(control::with_auto(control::with_on(control_value, on), auto), one_push)
}

impl IIDCCamera {
    /// Returns available features.
    pub fn features(&self) -> Vec<Feature> {
        Feature::iter().filter(|f| self.features.contains_key(f)).collect()
    }

    pub fn feature_descriptor(&self, feature: Feature) -> Option<&FeatureDescriptor> {
        self.features.get(&feature)
    }

    fn available_feature(&self, feature: Feature) -> Result<FeatureDescriptor, CameraError> {
        self.features.get(&feature).copied().ok_or_else(
            || CameraError::UnsupportedCapability(format!("feature {:?} not available", feature))
        )
    }

    fn read_feature_control(&self, feature: Feature) -> Result<u32, CameraError> {
        Ok(self.regs.read(self.base + feature.control_offset())?)
    }

    /// Returns true if the camera flagged an error for the last write to `feature`'s control register.
    fn feature_write_failed(&self, feature: Feature) -> Result<bool, CameraError> {
        if !self.basic_functions.feature_error_status {
            return Ok(false);
        }
        let status = self.regs.read(self.base + feature.error_status_register())?;
        Ok(msb_bit(status, feature.presence_bit().1))
    }

    /// Writes feature control register; if the camera reports an error, restores `previous` (best effort).
    fn write_feature_control(&mut self, feature: Feature, previous: u32, new: u32) -> Result<(), CameraError> {
        self.regs.write(self.base + feature.control_offset(), new)?;

        if self.feature_write_failed(feature)? {
            log::warn!("camera rejected value 0x{:08X} of {:?}; restoring 0x{:08X}", new, feature, previous);
            if let Err(e) = self.regs.write(self.base + feature.control_offset(), previous) {
                log::warn!("failed to restore {:?}: {}", feature, e);
            }
            return Err(CameraError::HardwareRejectedValue(format!("{:?} = 0x{:08X}", feature, new)));
        }

        Ok(())
    }

    pub fn feature_operating_mode(&self, feature: Feature) -> Result<FeatureOperatingMode, CameraError> {
        let descriptor = self.available_feature(feature)?;
        Ok(operating_mode_of(&descriptor, self.read_feature_control(feature)?))
    }

    pub fn set_feature_operating_mode(
        &mut self,
        feature: Feature,
        mode: FeatureOperatingMode
    ) -> Result<(), CameraError> {
        let descriptor = self.available_feature(feature)?;
        if !descriptor.supports_operating_mode(mode) {
            return Err(CameraError::UnsupportedCapability(format!("{:?} in mode {:?}", feature, mode)));
        }

        let previous = self.read_feature_control(feature)?;
        let new = match descriptor {
            FeatureDescriptor::Trigger(_) => control::with_on(previous, mode != FeatureOperatingMode::Disabled),
            FeatureDescriptor::Generic(_) => with_operating_mode(previous, mode)
        };

        self.write_feature_control(feature, previous, new)
    }

    /// Checks that `values` may be written to a generic feature; returns the current control register value.
    fn prepare_value_write(&self, feature: Feature, values: &[u32]) -> Result<u32, CameraError> {
        let generic = match self.available_feature(feature)? {
            FeatureDescriptor::Generic(g) => g,
            FeatureDescriptor::Trigger(_) => return Err(CameraError::UnsupportedCapability(
                "trigger has no generic value; use `set_trigger`".to_string()
            ))
        };
        if !generic.manual {
            return Err(CameraError::UnsupportedCapability(format!("{:?} cannot be controlled manually", feature)));
        }
        for value in values {
            if *value < generic.minimum || *value > generic.maximum {
                return Err(CameraError::UnsupportedCapability(format!(
                    "{:?} value {} outside [{}, {}]", feature, value, generic.minimum, generic.maximum
                )));
            }
        }

        let current = self.read_feature_control(feature)?;
        let mode = operating_mode_of(&FeatureDescriptor::Generic(generic), current);
        if mode != FeatureOperatingMode::Manual {
            return Err(CameraError::InvalidFeatureState{ feature, mode });
        }

        Ok(current)
    }

    /// Returns the feature's value (bits 11-0 of its control register).
    ///
    /// For white balance this is the red/V component, for temperature the current temperature.
    pub fn feature_value(&self, feature: Feature) -> Result<u32, CameraError> {
        let descriptor = self.available_feature(feature)?;
        if descriptor.range().is_none() || !descriptor.readable() {
            return Err(CameraError::UnsupportedCapability(format!("{:?} value cannot be read", feature)));
        }

        Ok(control::value(self.read_feature_control(feature)?))
    }

    /// Sets the feature's value; the feature must be enabled and in manual mode.
    ///
    /// For temperature sets the target temperature. White balance requires `set_white_balance`.
    pub fn set_feature_value(&mut self, feature: Feature, value: u32) -> Result<(), CameraError> {
        if feature == Feature::WhiteBalance {
            return Err(CameraError::UnsupportedCapability(
                "white balance has two values; use `set_white_balance`".to_string()
            ));
        }
        let previous = self.prepare_value_write(feature, &[value])?;
        let cleared = control::with_absolute(previous, false);
        let new = if feature == Feature::Temperature {
            control::with_high_value(cleared, value)
        } else {
            control::with_value(cleared, value)
        };

        self.write_feature_control(feature, previous, new)
    }

    /// Returns (blue/U, red/V).
    pub fn white_balance(&self) -> Result<(u32, u32), CameraError> {
        self.available_feature(Feature::WhiteBalance)?;
        let value = self.read_feature_control(Feature::WhiteBalance)?;
        Ok((control::high_value(value), control::value(value)))
    }

    pub fn set_white_balance(&mut self, blue_u: u32, red_v: u32) -> Result<(), CameraError> {
        let previous = self.prepare_value_write(Feature::WhiteBalance, &[blue_u, red_v])?;
        let new = control::with_value(
            control::with_high_value(control::with_absolute(previous, false), blue_u),
            red_v
        );

        self.write_feature_control(Feature::WhiteBalance, previous, new)
    }

    /// Returns (target, current) temperature.
    pub fn temperature(&self) -> Result<(u32, u32), CameraError> {
        self.available_feature(Feature::Temperature)?;
        let value = self.read_feature_control(Feature::Temperature)?;
        Ok((control::high_value(value), control::value(value)))
    }

    pub fn set_temperature(&mut self, target: u32) -> Result<(), CameraError> {
        self.set_feature_value(Feature::Temperature, target)
    }

    pub fn trigger(&self) -> Result<TriggerSetting, CameraError> {
        self.available_feature(Feature::Trigger)?;
        let value = self.read_feature_control(Feature::Trigger)?;
        Ok(TriggerSetting{
            enabled: control::on(value),
            polarity: control::polarity(value),
            mode: control::trigger_mode(value),
            parameter: control::value(value)
        })
    }

    pub fn set_trigger(&mut self, setting: TriggerSetting) -> Result<(), CameraError> {
        let descriptor = match self.available_feature(Feature::Trigger)? {
            FeatureDescriptor::Trigger(t) => t,
            FeatureDescriptor::Generic(_) => return Err(CameraError::ProtocolMismatch(
                "trigger decoded as a generic feature".to_string()
            ))
        };
        if !descriptor.supports_trigger_mode(setting.mode) {
            return Err(CameraError::UnsupportedCapability(format!("trigger mode {}", setting.mode)));
        }
        if !setting.enabled && !descriptor.switchable {
            return Err(CameraError::UnsupportedCapability("trigger cannot be disabled".to_string()));
        }
        if setting.polarity && !descriptor.polarity {
            return Err(CameraError::UnsupportedCapability("trigger polarity cannot be changed".to_string()));
        }
        if setting.parameter > 0xFFF {
            return Err(CameraError::UnsupportedCapability(format!("trigger parameter {}", setting.parameter)));
        }

        let previous = self.read_feature_control(Feature::Trigger)?;
        let new = control::with_value(
            control::with_trigger_mode(
                control::with_polarity(control::with_on(previous, setting.enabled), setting.polarity),
                setting.mode
            ),
            setting.parameter
        );

        self.write_feature_control(Feature::Trigger, previous, new)
    }
}

macro_rules! feature_value_accessors {
    ($($getter:ident, $setter:ident: $feature:ident);* $(;)?) => {
        impl IIDCCamera {
            $(
                pub fn $getter(&self) -> Result<u32, CameraError> {
                    self.feature_value(Feature::$feature)
                }

                pub fn $setter(&mut self, value: u32) -> Result<(), CameraError> {
                    self.set_feature_value(Feature::$feature, value)
                }
            )*
        }
    }
}

feature_value_accessors!(
    brightness, set_brightness: Brightness;
    auto_exposure, set_auto_exposure: AutoExposure;
    sharpness, set_sharpness: Sharpness;
    hue, set_hue: Hue;
    saturation, set_saturation: Saturation;
    gamma, set_gamma: Gamma;
    shutter, set_shutter: Shutter;
    gain, set_gain: Gain;
    iris, set_iris: Iris;
    focus, set_focus: Focus;
    trigger_delay, set_trigger_delay: TriggerDelay;
    frame_rate_feature, set_frame_rate_feature: FrameRate;
    zoom, set_zoom: Zoom;
    pan, set_pan: Pan;
    tilt, set_tilt: Tilt;
    optical_filter, set_optical_filter: OpticalFilter;
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::simulator::{SimBus, SimCamera, SimFault};
    use crate::camera::{IIDCDriver, FeatureOperatingMode as M};
    use std::sync::Arc;

    fn open_simulated() -> (SimCamera, IIDCCamera) {
        let sim = SimCamera::new();
        let bus = SimBus::new();
        bus.add_camera(0, sim.clone());
        let driver = IIDCDriver::new(Arc::new(bus));
        let camera = driver.open_camera(0).unwrap();
        (sim, camera)
    }

    #[test]
    fn given_feature_table_addresses_match_register_map() {
        assert_eq!(0x500, Feature::Brightness.inquiry_offset());
        assert_eq!(0x800, Feature::Brightness.control_offset());
        assert_eq!(0x51C, Feature::Shutter.inquiry_offset());
        assert_eq!(0x53C, Feature::FrameRate.inquiry_offset());
        assert_eq!(0x580, Feature::Zoom.inquiry_offset());
        assert_eq!(0x88C, Feature::OpticalFilter.control_offset());
        assert_eq!(0x8C4, Feature::CaptureQuality.control_offset());
        assert_eq!((csr::FEATURE_HI_INQ, 8), Feature::Gain.presence_bit());
        assert_eq!((csr::FEATURE_LO_INQ, 1), Feature::Pan.presence_bit());
        assert_eq!(csr::FEATURE_ERROR_STATUS_LO, Feature::Tilt.error_status_register());
        assert_eq!(csr::FEATURE_ERROR_STATUS_HI, Feature::Trigger.error_status_register());
    }

    #[test]
    fn given_reversed_bounds_swap() {
        // presence, manual, min = 0x100, max = 0x010
        let d = GenericFeatureDescriptor::from_inquiry(0x8100_0000 | (0x100 << 12) | 0x010);
        assert!(d.available && d.manual && !d.auto);
        assert_eq!((0x010, 0x100), (d.minimum, d.maximum));
    }

    #[test]
    fn given_trigger_inquiry_decode() {
        // presence, readout, on/off, polarity, modes 0 and 3
        let d = TriggerFeatureDescriptor::from_inquiry(0x8E00_0000 | 0x0000_9000);
        assert!(d.available && d.readable && d.switchable && d.polarity);
        assert!(d.supports_trigger_mode(0));
        assert!(!d.supports_trigger_mode(1));
        assert!(d.supports_trigger_mode(3));
        assert!(!d.supports_trigger_mode(4));
        let d = FeatureDescriptor::Trigger(d);
        assert!(!d.supports_operating_mode(M::Automatic));
        assert!(d.supports_operating_mode(M::Manual));
        assert!(d.range().is_none());
    }

    #[test]
    fn given_operating_mode_bits_decode() {
        let d = FeatureDescriptor::Generic(GenericFeatureDescriptor{ available: true, switchable: true, ..Default::default() });
        assert_eq!(M::Disabled, operating_mode_of(&d, 0x8000_0000));
        assert_eq!(M::Manual, operating_mode_of(&d, 0x8200_0000));
        assert_eq!(M::Automatic, operating_mode_of(&d, 0x8300_0000));
        assert_eq!(M::AutoAdjustOnce, operating_mode_of(&d, 0x8600_0000));

        let not_switchable = FeatureDescriptor::Generic(GenericFeatureDescriptor{ available: true, ..Default::default() });
        assert_eq!(M::Manual, operating_mode_of(&not_switchable, 0x8000_0000));
    }

    #[test]
    fn given_simulated_camera_list_features() {
        let (_, camera) = open_simulated();
        let features = camera.features();
        assert!(features.contains(&Feature::Brightness));
        assert!(features.contains(&Feature::Trigger));
        assert!(!features.contains(&Feature::Zoom));
        assert!(matches!(camera.feature_descriptor(Feature::Trigger), Some(FeatureDescriptor::Trigger(_))));
    }

    #[test]
    fn given_operating_mode_set_twice_state_is_unchanged() {
        let (sim, mut camera) = open_simulated();
        for mode in [M::Disabled, M::Automatic, M::AutoAdjustOnce, M::Manual] {
            camera.set_feature_operating_mode(Feature::Gain, mode).unwrap();
            assert_eq!(mode, camera.feature_operating_mode(Feature::Gain).unwrap());
            let control = sim.register(Feature::Gain.control_offset());
            camera.set_feature_operating_mode(Feature::Gain, mode).unwrap();
            assert_eq!(mode, camera.feature_operating_mode(Feature::Gain).unwrap());
            assert_eq!(control, sim.register(Feature::Gain.control_offset()));
        }
    }

    #[test]
    fn given_trigger_only_disabled_and_manual_modes() {
        let (_, mut camera) = open_simulated();
        assert!(matches!(
            camera.set_feature_operating_mode(Feature::Trigger, M::Automatic),
            Err(CameraError::UnsupportedCapability(_))
        ));
        camera.set_feature_operating_mode(Feature::Trigger, M::Manual).unwrap();
        assert_eq!(M::Manual, camera.feature_operating_mode(Feature::Trigger).unwrap());
        camera.set_feature_operating_mode(Feature::Trigger, M::Disabled).unwrap();
        assert_eq!(M::Disabled, camera.feature_operating_mode(Feature::Trigger).unwrap());
    }

    #[test]
    fn given_value_out_of_range_fail_without_register_change() {
        let (sim, mut camera) = open_simulated();
        camera.set_feature_operating_mode(Feature::Brightness, M::Manual).unwrap();
        let (_, max) = camera.feature_descriptor(Feature::Brightness).unwrap().range().unwrap();
        let before = sim.register(Feature::Brightness.control_offset());
        let num_writes = sim.num_writes();

        assert!(matches!(camera.set_brightness(max + 1), Err(CameraError::UnsupportedCapability(_))));
        assert_eq!(before, sim.register(Feature::Brightness.control_offset()));
        assert_eq!(num_writes, sim.num_writes());
    }

    #[test]
    fn given_manual_mode_set_and_read_value() {
        let (_, mut camera) = open_simulated();
        camera.set_feature_operating_mode(Feature::Shutter, M::Manual).unwrap();
        camera.set_shutter(123).unwrap();
        assert_eq!(123, camera.shutter().unwrap());
    }

    #[test]
    fn given_automatic_mode_value_write_fails() {
        let (_, mut camera) = open_simulated();
        camera.set_feature_operating_mode(Feature::Gain, M::Automatic).unwrap();
        assert!(matches!(
            camera.set_gain(100),
            Err(CameraError::InvalidFeatureState{ feature: Feature::Gain, mode: M::Automatic })
        ));
        camera.set_feature_operating_mode(Feature::Gain, M::Disabled).unwrap();
        assert!(matches!(
            camera.set_gain(100),
            Err(CameraError::InvalidFeatureState{ feature: Feature::Gain, mode: M::Disabled })
        ));
    }

    #[test]
    fn given_rejected_value_restore_previous() {
        let (sim, mut camera) = open_simulated();
        camera.set_feature_operating_mode(Feature::Gain, M::Manual).unwrap();
        camera.set_gain(50).unwrap();
        sim.inject(SimFault::RejectFeatureWrite(Feature::Gain));

        assert!(matches!(camera.set_gain(60), Err(CameraError::HardwareRejectedValue(_))));
        assert_eq!(50, camera.gain().unwrap());
    }

    #[test]
    fn given_white_balance_set_both_components() {
        let (_, mut camera) = open_simulated();
        camera.set_feature_operating_mode(Feature::WhiteBalance, M::Manual).unwrap();
        camera.set_white_balance(300, 700).unwrap();
        assert_eq!((300, 700), camera.white_balance().unwrap());
        assert!(camera.set_feature_value(Feature::WhiteBalance, 10).is_err());
    }

    #[test]
    fn given_temperature_write_only_target() {
        let (_, mut camera) = open_simulated();
        camera.set_feature_operating_mode(Feature::Temperature, M::Manual).unwrap();
        let (_, current) = camera.temperature().unwrap();
        camera.set_temperature(280).unwrap();
        assert_eq!((280, current), camera.temperature().unwrap());
    }

    #[test]
    fn given_trigger_setting_round_trip() {
        let (_, mut camera) = open_simulated();
        let setting = TriggerSetting{ enabled: true, polarity: true, mode: 0, parameter: 5 };
        camera.set_trigger(setting).unwrap();
        assert_eq!(setting, camera.trigger().unwrap());
        assert!(camera.set_trigger(TriggerSetting{ mode: 2, ..setting }).is_err());
    }

    #[test]
    fn given_unavailable_feature_fail() {
        let (_, mut camera) = open_simulated();
        assert!(matches!(camera.zoom(), Err(CameraError::UnsupportedCapability(_))));
        assert!(matches!(camera.set_zoom(1), Err(CameraError::UnsupportedCapability(_))));
    }
}
