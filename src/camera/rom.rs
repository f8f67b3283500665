//
// iidc-driver - IEEE 1394 IIDC camera driver
// Copyright (c) 2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Configuration ROM validation.
//!
//! Walks the general ROM format (IEEE 1212): header, bus info block, root directory, unit directory
//! and unit dependent directory, checking that the node is a 1394 TA digital camera.
//!

use crate::bus::{RegisterAccessor, CSR_SPACE_BASE};
use crate::camera::CameraError;
use crate::camera::registers::field;

pub const CONFIG_ROM_BASE: u64 = CSR_SPACE_BASE + 0x400;

/// "1394" in ASCII.
const BUS_NAME: u32 = 0x3133_3934;

/// Unit_Spec_ID of the 1394 Trade Association.
pub const IIDC_UNIT_SPEC_ID: u32 = 0x00_A02D;

/// Maximum number of entries read from a single directory.
const MAX_DIRECTORY_ENTRIES: u32 = 64;

mod keys {
    pub const UNIT_DIRECTORY: u32 = 0xD1;
    pub const UNIT_SPEC_ID: u32 = 0x12;
    pub const UNIT_SW_VERSION: u32 = 0x13;
    pub const UNIT_DEPENDENT_DIRECTORY: u32 = 0xD4;
    pub const COMMAND_REGS_BASE: u32 = 0x40;
    pub const VENDOR_NAME_LEAF: u32 = 0x81;
    pub const MODEL_NAME_LEAF: u32 = 0x82;
}

/// Unit_SW_Version values.
pub mod sw_version {
    pub const V1_04: u32 = 0x00_0100;
    pub const V1_20: u32 = 0x00_0101;
    pub const V1_30: u32 = 0x00_0102;
}

/// Version of the IIDC specification implemented by a camera.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SpecVersion {
    V1_04,
    V1_20,
    V1_30,
    /// 1.31 or later.
    V1_31
}

impl SpecVersion {
    pub fn from_sw_version(sw_version: u32) -> SpecVersion {
        match sw_version {
            sw_version::V1_04 => SpecVersion::V1_04,
            sw_version::V1_20 => SpecVersion::V1_20,
            sw_version::V1_30 => SpecVersion::V1_30,
            _ => SpecVersion::V1_31
        }
    }

    /// Returns (major, minor, micro); e.g. 1.30 is (1, 3, 0).
    pub fn triple(&self) -> (u8, u8, u8) {
        match self {
            SpecVersion::V1_04 => (1, 0, 4),
            SpecVersion::V1_20 => (1, 2, 0),
            SpecVersion::V1_30 => (1, 3, 0),
            SpecVersion::V1_31 => (1, 3, 1)
        }
    }
}

impl std::fmt::Display for SpecVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let (major, minor, micro) = self.triple();
        write!(f, "{}.{}{}", major, minor, micro)
    }
}

/// Information obtained from a valid camera configuration ROM.
#[derive(Clone, Debug)]
pub struct RomInfo {
    pub guid: u64,
    pub spec_version: SpecVersion,
    /// Absolute address of the command/status register block.
    pub command_regs_base: u64,
    pub vendor: String,
    pub model: String
}

/// Directory entry: 8-bit key (type + id) and 24-bit value.
#[derive(Copy, Clone, Debug)]
struct Entry {
    address: u64,
    key: u32,
    value: u32
}

impl Entry {
    /// Absolute address referred to by a directory or leaf entry (value is an offset in quadlets).
    fn target(&self) -> u64 {
        self.address + 4 * self.value as u64
    }
}

fn mismatch(msg: &str) -> CameraError {
    CameraError::ProtocolMismatch(msg.to_string())
}

/// Reads the header of the directory at `address` and all its entries.
///
/// Fails if the declared entry count is below `min_entries`.
fn read_directory(regs: &RegisterAccessor, address: u64, min_entries: u32) -> Result<Vec<Entry>, CameraError> {
    let header = regs.read(address)?;
    let length = field(header, 16, 16);
    if length < min_entries || length > MAX_DIRECTORY_ENTRIES {
        return Err(CameraError::ProtocolMismatch(format!(
            "directory at 0x{:012X} declares {} entries", address, length
        )));
    }

    let mut entries = vec![];
    for i in 1..=length as u64 {
        let entry_address = address + 4 * i;
        let quadlet = regs.read(entry_address)?;
        entries.push(Entry{ address: entry_address, key: field(quadlet, 24, 8), value: field(quadlet, 0, 24) });
    }

    Ok(entries)
}

fn find(entries: &[Entry], key: u32) -> Option<Entry> {
    entries.iter().find(|e| e.key == key).copied()
}

/// Reads a minimal ASCII textual descriptor leaf.
fn read_text_leaf(regs: &RegisterAccessor, address: u64) -> Result<String, CameraError> {
    let header = regs.read(address)?;
    let length = field(header, 16, 16) as u64;
    if length < 2 || length > MAX_DIRECTORY_ENTRIES as u64 {
        return Err(mismatch("invalid textual descriptor leaf"));
    }

    // quadlets 1 and 2: descriptor type/specifier id, language
    let mut bytes = vec![];
    for i in 3..=length {
        bytes.extend_from_slice(&regs.read(address + 4 * i)?.to_be_bytes());
    }
    while bytes.last() == Some(&0) { bytes.pop(); }

    Ok(String::from_utf8_lossy(&bytes).trim().to_string())
}

/// Validates configuration ROM of the node behind `regs`.
pub fn validate(regs: &RegisterAccessor) -> Result<RomInfo, CameraError> {
    let header = regs.read(CONFIG_ROM_BASE)?;
    let info_length = field(header, 24, 8);
    if info_length < 4 {
        // a minimal ROM (info_length = 1) has no bus info block and no directories
        return Err(mismatch("no general ROM format"));
    }

    let bus_info = CONFIG_ROM_BASE + 4;
    if regs.read(bus_info)? != BUS_NAME {
        return Err(mismatch("bus name is not \"1394\""));
    }

    // bits 31-27: irmc, cmc, isc, bmc, pmc
    let flags = regs.read(bus_info + 4)?;
    let isochronous_capable = field(flags, 29, 1) == 1;
    if !isochronous_capable {
        return Err(mismatch("node is not isochronous-capable"));
    }

    let guid = ((regs.read(bus_info + 8)? as u64) << 32) | regs.read(bus_info + 12)? as u64;

    let root_directory = bus_info + 4 * info_length as u64;
    let root_entries = read_directory(regs, root_directory, 1)?;

    // a node may have several units; use the first one which is a camera
    let mut last_error = mismatch("no unit directory");
    for unit_entry in root_entries.iter().filter(|e| e.key == keys::UNIT_DIRECTORY) {
        match validate_unit(regs, unit_entry.target()) {
            Ok((spec_version, command_regs_base, vendor, model)) => {
                return Ok(RomInfo{ guid, spec_version, command_regs_base, vendor, model });
            },
            Err(e) => last_error = e
        }
    }

    Err(last_error)
}

/// Returns (spec. version, command register base, vendor name, model name).
fn validate_unit(
    regs: &RegisterAccessor,
    unit_directory: u64
) -> Result<(SpecVersion, u64, String, String), CameraError> {
    let unit_entries = read_directory(regs, unit_directory, 3)?;

    let spec_id = find(&unit_entries, keys::UNIT_SPEC_ID).ok_or_else(|| mismatch("no unit spec id"))?;
    if spec_id.value != IIDC_UNIT_SPEC_ID {
        return Err(CameraError::ProtocolMismatch(format!("unit spec id 0x{:06X}", spec_id.value)));
    }

    let version = find(&unit_entries, keys::UNIT_SW_VERSION).ok_or_else(|| mismatch("no unit sw version"))?;
    let spec_version = SpecVersion::from_sw_version(version.value);

    let dependent = find(&unit_entries, keys::UNIT_DEPENDENT_DIRECTORY)
        .ok_or_else(|| mismatch("no unit dependent directory"))?;
    let dependent_entries = read_directory(regs, dependent.target(), 1)?;

    let command_regs_base = find(&dependent_entries, keys::COMMAND_REGS_BASE)
        .ok_or_else(|| mismatch("no command regs base"))?;

    let vendor = match find(&dependent_entries, keys::VENDOR_NAME_LEAF) {
        Some(leaf) => read_text_leaf(regs, leaf.target())?,
        None => String::new()
    };
    let model = match find(&dependent_entries, keys::MODEL_NAME_LEAF) {
        Some(leaf) => read_text_leaf(regs, leaf.target())?,
        None => String::new()
    };

    Ok((spec_version, CSR_SPACE_BASE + 4 * command_regs_base.value as u64, vendor, model))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::simulator::{rom, SimBus, SimCamera};
    use crate::bus::Bus;
    use std::sync::Arc;

    fn accessor_for_rom(rom: Vec<u32>) -> RegisterAccessor {
        let bus = SimBus::new();
        bus.add_device(5, rom);
        let bus: Arc<dyn Bus> = Arc::new(bus);
        RegisterAccessor::new(bus, 5)
    }

    #[test]
    fn given_camera_rom_validate() {
        let bus = SimBus::new();
        bus.add_camera(0, SimCamera::new());
        let bus: Arc<dyn Bus> = Arc::new(bus);
        let info = validate(&RegisterAccessor::new(bus, 0)).unwrap();
        assert_eq!(SpecVersion::V1_30, info.spec_version);
        assert_eq!(CSR_SPACE_BASE + 0xF0_0000, info.command_regs_base);
        assert_eq!("Simulated Vendor", info.vendor);
        assert_eq!("IIDC Simulator", info.model);
        assert_eq!(0x0008_1234_5678_9ABC, info.guid);
    }

    #[test]
    fn given_sw_versions_map_spec_versions() {
        assert_eq!(SpecVersion::V1_04, SpecVersion::from_sw_version(0x100));
        assert_eq!(SpecVersion::V1_20, SpecVersion::from_sw_version(0x101));
        assert_eq!(SpecVersion::V1_30, SpecVersion::from_sw_version(0x102));
        assert_eq!(SpecVersion::V1_31, SpecVersion::from_sw_version(0x103));
        assert!(SpecVersion::V1_31 > SpecVersion::V1_30);
        assert_eq!("1.30", SpecVersion::V1_30.to_string());
        assert_eq!("1.04", SpecVersion::V1_04.to_string());
    }

    #[test]
    fn given_foreign_unit_spec_id_fail() {
        let regs = accessor_for_rom(rom::build(&rom::RomLayout{ unit_spec_id: 0x00_609E, ..Default::default() }));
        assert!(matches!(validate(&regs), Err(CameraError::ProtocolMismatch(_))));
    }

    #[test]
    fn given_wrong_bus_name_fail() {
        let mut image = rom::build(&rom::RomLayout::default());
        image[1] = 0x3133_3935;
        assert!(matches!(validate(&accessor_for_rom(image)), Err(CameraError::ProtocolMismatch(_))));
    }

    #[test]
    fn given_minimal_rom_fail() {
        assert!(matches!(
            validate(&accessor_for_rom(vec![0x0100_0000 | 0x00_1234])),
            Err(CameraError::ProtocolMismatch(_))
        ));
    }

    #[test]
    fn given_truncated_unit_directory_fail() {
        let regs = accessor_for_rom(rom::build(&rom::RomLayout{ unit_directory_length: 2, ..Default::default() }));
        assert!(matches!(validate(&regs), Err(CameraError::ProtocolMismatch(_))));
    }

    #[test]
    fn given_unit_entry_with_wrong_key_fail() {
        let regs = accessor_for_rom(rom::build(&rom::RomLayout{ unit_directory_key: 0xC1, ..Default::default() }));
        assert!(matches!(validate(&regs), Err(CameraError::ProtocolMismatch(_))));
    }

    #[test]
    fn given_rom_without_names_validate() {
        let regs = accessor_for_rom(rom::build(&rom::RomLayout{ vendor: None, model: None, ..Default::default() }));
        let info = validate(&regs).unwrap();
        assert!(info.vendor.is_empty() && info.model.is_empty());
    }
}
