//! IqsProg definitions file
//!
//! Register map, program memory layout, product table and hardware timing
//! of the IQS550/572/525 family

use std::collections::HashMap;

/// Default 7-bit bus address of the controller
pub const DEFAULT_ADDRESS: u8 = 0x74;

/// Addressing attempts made before a register access is reported as failed
pub const NUM_RETRIES: usize = 10;
/// Maximum payload of a single register write
pub const WR_BYTES_MAX: usize = 2;

pub const PROJ_NUM_A000: u16 = 0;
pub const PROJ_NUM_B000: u16 = 15;
pub const MAJOR_VER_MIN: u8 = 2;

pub const RESUME: u8 = 0x00;
pub const SUSPEND: u8 = 0x01;

pub const SW_INPUT_EVENT: u8 = 0x10;
pub const SETUP_COMPLETE: u8 = 0x40;
pub const EVENT_MODE: u8 = 0x01;
pub const TP_EVENT: u8 = 0x04;

pub const FLIP_X: u8 = 0x01;
pub const FLIP_Y: u8 = 0x02;
pub const SWITCH_XY_AXIS: u8 = 0x04;

/// Coordinate span of one sensing channel
pub const NUM_POINTS: u16 = 256;
pub const NUM_CONTACTS: usize = 5;

// Registers
pub const PROD_NUM: u16 = 0x0000;
pub const ABS_X: u16 = 0x0016;
pub const SYS_CTRL1: u16 = 0x0432;
pub const SYS_CFG0: u16 = 0x058E;
pub const SYS_CFG1: u16 = 0x058F;
pub const TOTAL_RX: u16 = 0x063D;
pub const TOTAL_TX: u16 = 0x063E;
pub const XY_CFG0: u16 = 0x0669;
pub const X_RES: u16 = 0x066E;
pub const Y_RES: u16 = 0x0670;
pub const END_COMM: u16 = 0xEEEE;

// Program memory map: checksum/settings, application, customization
pub const CHKSM: u16 = 0x83C0;
pub const APP: u16 = 0x8400;
pub const CSTM: u16 = 0xBE00;
pub const PMAP_END: u16 = 0xBFFF;

pub const CHKSM_LEN: usize = (APP - CHKSM) as usize;
pub const APP_LEN: usize = (CSTM - APP) as usize;
pub const CSTM_LEN: usize = (PMAP_END as usize + 1) - CSTM as usize;
pub const PMAP_LEN: usize = (PMAP_END as usize + 1) - CHKSM as usize;

// Bootloader
pub const BL_ADDR_MASK: u8 = 0x40;
pub const BL_BLK_LEN_MAX: usize = 64;
pub const BL_ID: u16 = 0x0200;
pub const BL_CRC_PASS: u8 = 0x00;
pub const BL_CRC_FAIL: u8 = 0x01;
/// Reset cycles made while trying to catch the bootloader polling window
pub const BL_ATTEMPTS: usize = 3;

/// Longest firmware name accepted by an update request
pub const FW_FILE_LEN: usize = 64;

/// Hardware settle, program and clock-stretch windows.
///
/// These are protocol constants of the controller, not tuning knobs.
pub mod timing {
    use std::ops::RangeInclusive;

    /// Sleep between addressing attempts outside a communication window
    pub const RETRY_US: RangeInclusive<u32> = 200..=300;
    /// Width of the reset pulse
    pub const RESET_PULSE_US: RangeInclusive<u32> = 200..=300;
    /// Wait after reset before the device is addressed again
    pub const RESET_SETTLE_US: u32 = 10_000;
    /// CRC computation, so the bus is not clock-stretched for this long
    pub const BL_CRC_MS: u32 = 50;
    /// Firmware start-up after Execute
    pub const BL_EXEC_US: u32 = 10_000;
    /// Internal program cycle of one block
    pub const BL_BLOCK_US: u32 = 10_000;
    /// Initialization period kicked off by the first window closure
    pub const SETUP_SETTLE_MS: u32 = 100;
    /// Lets the RDY output deassert once the window is closed
    pub const WINDOW_CLOSE_US: RangeInclusive<u32> = 50..=100;
}

/// Per-product data
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Definition {
    pub name: &'static str,
}

lazy_static! {
    /// Supported products keyed by product number
    pub static ref DEFINITIONS: HashMap<u16, Definition> = [
        (40, Definition { name: "IQS550" }),
        (58, Definition { name: "IQS572" }),
        (52, Definition { name: "IQS525" }),
    ]
    .iter()
    .copied()
    .collect();
}

/// Bootloader status byte reported in the identity block.
///
/// `Reset` is never reported by the device; the driver uses it while the
/// identity is unknown, e.g. during a flash cycle or with the bootloader open.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[repr(u8)]
pub enum OperatingMode {
    Reset = 0x00,
    Available = 0xA5,
    None = 0xEE,
}

impl OperatingMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(OperatingMode::Reset),
            0xA5 => Some(OperatingMode::Available),
            0xEE => Some(OperatingMode::None),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_map_is_whole_blocks() {
        assert_eq!(PMAP_LEN, CHKSM_LEN + APP_LEN + CSTM_LEN);
        assert_eq!(PMAP_LEN % BL_BLK_LEN_MAX, 0);
        assert_eq!(CSTM_LEN % BL_BLK_LEN_MAX, 0);
    }

    #[test]
    fn known_products() {
        assert_eq!(DEFINITIONS[&40].name, "IQS550");
        assert_eq!(DEFINITIONS[&58].name, "IQS572");
        assert_eq!(DEFINITIONS[&52].name, "IQS525");
        assert!(DEFINITIONS.get(&41).is_none());
    }

    #[test]
    fn operating_mode_bytes() {
        assert_eq!(OperatingMode::from_u8(0xA5), Some(OperatingMode::Available));
        assert_eq!(OperatingMode::from_u8(0xEE), Some(OperatingMode::None));
        assert_eq!(OperatingMode::from_u8(0x00), Some(OperatingMode::Reset));
        assert_eq!(OperatingMode::from_u8(0x5A), None);
    }
}
