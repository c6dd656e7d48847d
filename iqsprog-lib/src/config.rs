//! IqsProg configuration file
//!
//! Platform settings consumed by bring-up and firmware update. Hardware
//! timing is not configurable; see [crate::definitions::timing].

use super::definitions::DEFAULT_ADDRESS;
use std::path::PathBuf;

/// Axis orientation and coordinate overrides supplied by the platform
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AxisConfig {
    pub swap_x_y: bool,
    pub invert_x: bool,
    pub invert_y: bool,
    /// Maximum x-coordinate; 0 keeps the device's own resolution
    pub max_x: u32,
    /// Maximum y-coordinate; 0 keeps the device's own resolution
    pub max_y: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// 7-bit bus address in normal mode
    pub address: u8,
    pub axes: AxisConfig,
    /// Directory firmware update requests are resolved against
    pub firmware_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            address: DEFAULT_ADDRESS,
            axes: AxisConfig::default(),
            firmware_dir: PathBuf::from("."),
        }
    }
}
