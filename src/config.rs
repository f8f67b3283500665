//
// iidc-driver - IEEE 1394 IIDC camera driver
// Copyright (c) 2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Driver configuration.
//!
//! Settings are read from an INI file in the user's configuration directory; environment variables
//! `IIDC_<GROUP>__<KEY>` (e.g. `IIDC_BUS__ISOSPEED=800`) override them.
//!

use crate::bus::IsoSpeed;
use crate::camera::iidc::DriverSettings;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod groups {
    pub const ACQUISITION: &str = "Acquisition";
    pub const BUS: &str = "Bus";
    pub const MAIN: &str = "Main";
}

mod keys {
    // group: BUS
    pub const ISO_CHANNEL: &str = "IsoChannel";
    /// In Mbit/s.
    pub const ISO_SPEED: &str = "IsoSpeed";

    // group: ACQUISITION
    pub const NUM_BUFFERS: &str = "NumBuffers";
    /// Multiple of the frame transmission time.
    pub const TIMEOUT_FACTOR: &str = "TimeoutFactor";
    pub const SYNC_SETTLE_DELAY_MS: &str = "SyncSettleDelayMs";

    // group: MAIN
    pub const LOGGING: &str = "Logging";
}

const ENV_PREFIX: &str = "IIDC";

const MAX_ISO_CHANNEL: i64 = 15;

pub struct Configuration {
    config: config::Config
}

impl Configuration {
    /// Loads the configuration file (if present) and environment overrides.
    pub fn new() -> Configuration {
        let file_path = config_file_path();
        let result = config::Config::builder()
            .add_source(config::File::from(file_path.as_path()).format(config::FileFormat::Ini).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).prefix_separator("_").separator("__"))
            .build();

        match result {
            Ok(config) => Configuration{ config },
            Err(e) => {
                log::warn!("failed to load configuration from {}: {}", file_path.to_string_lossy(), e);
                Configuration{ config: config::Config::default() }
            }
        }
    }

    /// Creates configuration from INI-formatted text.
    pub fn from_ini(contents: &str) -> Result<Configuration, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(contents, config::FileFormat::Ini))
            .build()?;

        Ok(Configuration{ config })
    }

    fn path(group: &str, key: &str) -> String {
        format!("{}.{}", group, key).to_lowercase()
    }

    fn integer(&self, group: &str, key: &str) -> Option<i64> {
        match self.config.get_int(&Configuration::path(group, key)) {
            Ok(value) => Some(value),
            Err(config::ConfigError::NotFound(_)) => None,
            Err(e) => {
                log::warn!("invalid configuration value for {}/{}: {}", group, key, e);
                None
            }
        }
    }

    /// Returns the value if it is within `min..=max`; warns otherwise.
    fn integer_in_range(&self, group: &str, key: &str, min: i64, max: i64) -> Option<i64> {
        match self.integer(group, key) {
            Some(value) => if value >= min && value <= max {
                Some(value)
            } else {
                log::warn!("invalid configuration value for {}/{}: {}", group, key, value);
                None
            },

            None => None
        }
    }

    pub fn iso_channel(&self) -> u32 {
        self.integer_in_range(groups::BUS, keys::ISO_CHANNEL, 0, MAX_ISO_CHANNEL)
            .map(|value| value as u32)
            .unwrap_or(DriverSettings::default().iso_channel)
    }

    pub fn iso_speed(&self) -> IsoSpeed {
        match self.integer(groups::BUS, keys::ISO_SPEED) {
            Some(mbps) => match IsoSpeed::from_mbps(mbps as u32) {
                Some(speed) => speed,
                None => {
                    log::warn!("invalid configuration value for {}/{}: {}", groups::BUS, keys::ISO_SPEED, mbps);
                    DriverSettings::default().iso_speed
                }
            },

            None => DriverSettings::default().iso_speed
        }
    }

    pub fn num_buffers(&self) -> usize {
        self.integer_in_range(groups::ACQUISITION, keys::NUM_BUFFERS, 1, 256)
            .map(|value| value as usize)
            .unwrap_or(DriverSettings::default().num_buffers)
    }

    pub fn timeout_factor(&self) -> u32 {
        self.integer_in_range(groups::ACQUISITION, keys::TIMEOUT_FACTOR, 1, 1000)
            .map(|value| value as u32)
            .unwrap_or(DriverSettings::default().timeout_factor)
    }

    pub fn sync_settle_delay(&self) -> Duration {
        self.integer_in_range(groups::ACQUISITION, keys::SYNC_SETTLE_DELAY_MS, 0, 10_000)
            .map(|value| Duration::from_millis(value as u64))
            .unwrap_or(DriverSettings::default().sync_settle_delay)
    }

    pub fn logging_enabled(&self) -> bool {
        let path = Configuration::path(groups::MAIN, keys::LOGGING);
        match self.config.get_bool(&path) {
            Ok(value) => value,
            Err(config::ConfigError::NotFound(_)) => false,
            Err(e) => {
                log::warn!("invalid configuration value for {}/{}: {}", groups::MAIN, keys::LOGGING, e);
                false
            }
        }
    }

    pub fn driver_settings(&self) -> DriverSettings {
        DriverSettings{
            iso_channel: self.iso_channel(),
            iso_speed: self.iso_speed(),
            num_buffers: self.num_buffers(),
            timeout_factor: self.timeout_factor(),
            sync_settle_delay: self.sync_settle_delay()
        }
    }
}

impl Default for Configuration {
    fn default() -> Configuration { Configuration{ config: config::Config::default() } }
}

pub fn config_file_path() -> PathBuf {
    dirs::config_dir().unwrap_or(Path::new("").to_path_buf()).join("iidc_driver.cfg")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_empty_configuration_use_defaults() {
        let config = Configuration::default();
        assert_eq!(DriverSettings::default(), config.driver_settings());
        assert!(!config.logging_enabled());
    }

    #[test]
    fn given_ini_contents_read_settings() {
        let config = Configuration::from_ini(
            "[bus]\n\
             isochannel = 3\n\
             isospeed = 800\n\
             [acquisition]\n\
             numbuffers = 8\n\
             timeoutfactor = 2\n\
             syncsettledelayms = 25\n\
             [main]\n\
             logging = true\n"
        ).unwrap();

        let settings = config.driver_settings();
        assert_eq!(3, settings.iso_channel);
        assert_eq!(IsoSpeed::S800, settings.iso_speed);
        assert_eq!(8, settings.num_buffers);
        assert_eq!(2, settings.timeout_factor);
        assert_eq!(Duration::from_millis(25), settings.sync_settle_delay);
        assert!(config.logging_enabled());
    }

    #[test]
    fn given_invalid_values_fall_back_to_defaults() {
        let config = Configuration::from_ini(
            "[bus]\n\
             isochannel = 16\n\
             isospeed = 300\n\
             [acquisition]\n\
             numbuffers = 0\n\
             timeoutfactor = fast\n"
        ).unwrap();

        assert_eq!(DriverSettings::default(), config.driver_settings());
    }
}
