//! IqsProg is a firmware operations library designed
//! for Azoteq IQS5xx trackpad/touchscreen controllers on an I2C bus
//!
//! The library is generic over the `embedded-hal` 1.0 bus, reset line and
//! delay traits, so it runs against Linux i2c-dev as well as test doubles.
//!
//! ## Features
//! - Reset the controller and catch its bootloader window
//! - Identify product, project and firmware version
//! - Apply axis orientation and resolution overrides
//! - Parse vendor hex firmware files
//! - Program, check and verify program memory
//! - Suspend and resume
//! - Sample touch frames

#[macro_use]
extern crate lazy_static;

pub mod bootloader;
pub mod config;
pub mod definitions;
pub mod device;
pub mod error;
pub mod firmware;
pub mod programmer;
pub mod transport;

#[cfg(test)]
mod sim;

pub use config::{AxisConfig, Config};
pub use device::{BringUp, BringUpState, Device, InterruptLine, PowerState, TouchFrame};
pub use error::{Error, ErrorClass, Result};
pub use firmware::FirmwareImage;
