//
// iidc-driver - IEEE 1394 IIDC camera driver
// Copyright (c) 2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! IIDC camera driver.
//!

pub mod acquisition;
pub mod capability;
pub mod feature;
pub mod iidc;
pub mod registers;
pub mod rom;
pub mod transmission;

pub use acquisition::AcquisitionListener;
pub use capability::{FixedMode, FrameRate, Mode, ModeDescriptor, PixelFormat, PixelFormats, VideoFormat};
pub use feature::{Feature, FeatureDescriptor, FeatureOperatingMode, TriggerSetting};
pub use iidc::{ControllerState, IIDCCamera, IIDCDriver};
pub use rom::SpecVersion;
pub use transmission::IsochronousTransmission;

use crate::bus::{BusError, NodeId};

#[derive(Debug)]
pub enum CameraError {
    /// Configuration ROM does not describe an IIDC camera.
    ProtocolMismatch(String),
    /// Requested mode, frame rate, pixel format, region or feature is not supported by the camera.
    UnsupportedCapability(String),
    /// Feature value cannot be written in the feature's current operating mode.
    InvalidFeatureState{ feature: Feature, mode: FeatureOperatingMode },
    /// Camera reported an error after a register write.
    HardwareRejectedValue(String),
    Transport(BusError),
    /// Caller-supplied buffer size does not match the current frame size.
    DimensionMismatch{ expected: usize, actual: usize }
}

impl From<BusError> for CameraError {
    fn from(bus_error: BusError) -> CameraError {
        CameraError::Transport(bus_error)
    }
}

impl std::fmt::Display for CameraError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            CameraError::ProtocolMismatch(msg) => write!(f, "not an IIDC camera: {}", msg),
            CameraError::UnsupportedCapability(msg) => write!(f, "unsupported: {}", msg),
            CameraError::InvalidFeatureState{ feature, mode } =>
                write!(f, "cannot set value of {:?} in mode {:?}", feature, mode),
            CameraError::HardwareRejectedValue(msg) => write!(f, "camera rejected value: {}", msg),
            CameraError::Transport(e) => write!(f, "transport error: {}", e),
            CameraError::DimensionMismatch{ expected, actual } =>
                write!(f, "buffer size mismatch: expected {} bytes, got {}", expected, actual)
        }
    }
}

impl std::error::Error for CameraError {}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeviceId {
    pub node: NodeId,
    /// Globally unique id from the bus info block.
    pub guid: u64
}

#[derive(Clone, Debug)]
pub struct CameraInfo {
    id: DeviceId,
    vendor: String,
    model: String
}

impl CameraInfo {
    pub fn id(&self) -> DeviceId { self.id }
    pub fn vendor(&self) -> &str { &self.vendor }
    pub fn model(&self) -> &str { &self.model }
    pub fn name(&self) -> String { format!("{} {}", self.vendor, self.model).trim().to_string() }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Dimension {
    pub width: u32,
    pub height: u32
}

impl Dimension {
    pub fn new(width: u32, height: u32) -> Dimension { Dimension{ width, height } }

    pub fn num_pixels(&self) -> u32 { self.width * self.height }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Offset {
    pub row: u32,
    pub column: u32
}

impl Offset {
    pub fn new(row: u32, column: u32) -> Offset { Offset{ row, column } }
}

/// Active capture window.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Region {
    pub offset: Offset,
    pub dimension: Dimension
}

impl Region {
    pub fn new(offset: Offset, dimension: Dimension) -> Region { Region{ offset, dimension } }
}
