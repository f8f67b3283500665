//
// iidc-driver - IEEE 1394 IIDC camera driver
// Copyright (c) 2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Driver for IEEE 1394 digital cameras implementing the IIDC/DCAM register specification.
//!
//! The bus transport is supplied by the user as an implementation of `bus::Bus`; `bus::simulator`
//! provides a simulated bus with an IIDC camera.
//!

pub mod bus;
pub mod camera;
pub mod config;
pub mod image;
pub mod logging;
pub mod workers;

pub use camera::{CameraError, IIDCCamera, IIDCDriver};

pub const VERSION_STRING: &'static str = include_str!(concat!(env!("OUT_DIR"), "/version"));
