//! IqsProg programmer file

use super::bootloader::{self, Bootloader};
use super::definitions::*;
use super::device::{BringUp, BringUpState, Device, Session};
use super::error::{Error, Result};
use super::firmware::FirmwareImage;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::i2c::I2c;
use std::fs;

/// Validates a firmware update request and returns the file name.
///
/// One trailing newline is stripped, as left behind by `echo`.
pub fn firmware_name(request: &str) -> Result<&str> {
    let name = request.strip_suffix('\n').unwrap_or(request);

    if name.is_empty() {
        return Err(Error::EmptyName);
    }

    if name.len() > FW_FILE_LEN {
        return Err(Error::NameTooLong(name.len()));
    }

    Ok(name)
}

impl<I2C, RST, D> Device<I2C, RST, D>
where
    I2C: I2c,
    RST: OutputPin,
    D: DelayNs,
{
    /// Loads the named firmware file and programs it
    pub fn update_firmware(&self, request: &str) -> Result<BringUp> {
        let name = firmware_name(request)?;

        if self.mode() == OperatingMode::None {
            return Err(Error::NoBootloader);
        }

        let path = self.config.firmware_dir.join(name);
        let fw = fs::read(&path).map_err(|source| {
            log::error!("Failed to request firmware {}: {}", path.display(), source);
            Error::FirmwareAccess {
                path: path.clone(),
                source,
            }
        })?;

        let image = FirmwareImage::parse(&fw)?;
        log::info!("Loaded firmware {}", path.display());

        self.flash(&image)
    }

    /// Programs a complete image and brings the device back up.
    ///
    /// The session is held for the whole sequence. Whatever happens, the
    /// device is reset into a known state and re-identified before
    /// returning; the first error encountered is the one reported.
    pub fn flash(&self, image: &FirmwareImage) -> Result<BringUp> {
        if image.len() != PMAP_LEN {
            log::error!("Firmware image of {} bytes does not span program memory", image.len());
            return Err(Error::Layout(image.len()));
        }

        if self.mode() == OperatingMode::None {
            log::error!("Bootloader not available");
            return Err(Error::NoBootloader);
        }

        let mut guard = self.exclusive();
        let s = &mut *guard;

        // Touch sampling stays off until bring-up reports the new status
        self.set_mode(OperatingMode::Reset);
        s.state = BringUpState::Reset;

        let written = program(s, image);

        if let Err(err) = &written {
            log::error!("Failed to program firmware: {}", err);

            if let Err(err) = bootloader::reset(&mut s.transport, &mut s.reset) {
                log::error!("Failed to reset device: {}", err);
            }
            s.transport.delay_us(timing::RESET_SETTLE_US);
        }

        let identified = self.init(s);

        written?;
        let bring_up = identified?;

        if self.mode() == OperatingMode::Reset {
            log::error!("Device remained in bootloader mode");
            return Err(Error::StuckInBootloader);
        }

        log::info!("Firmware update complete");
        Ok(bring_up)
    }
}

fn program<I2C, RST, D>(s: &mut Session<I2C, RST, D>, image: &FirmwareImage) -> Result<()>
where
    I2C: I2c,
    RST: OutputPin,
    D: DelayNs,
{
    let mut bl = Bootloader::new(&mut s.transport, &mut s.reset);

    // The device may already be sitting in bootloader mode
    if bl.version().is_err() {
        bl.open()?;
    }

    // Write image
    bl.write(CHKSM, image.as_bytes())?;

    // Check CRC
    bl.crc()?;

    // Verify customization region
    bl.verify(CSTM, image.custom_region())?;

    // Start application
    bl.execute()
}
