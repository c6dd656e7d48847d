//! IqsProg bootloader file
//!
//! Command set understood by the controller while it sits in bootloader mode
//! at the alternate bus address

use super::definitions::{
    timing, BL_ATTEMPTS, BL_BLK_LEN_MAX, BL_CRC_PASS, BL_ID, CHKSM, NUM_RETRIES, PMAP_END,
};
use super::error::{check_blocks, Error, Result};
use super::transport::Transport;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{Error as _, OutputPin};
use embedded_hal::i2c::I2c;

/// Bootloader opcodes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Version = 0x00,
    Read = 0x01,
    Execute = 0x02,
    Crc = 0x03,
}

/// Pulses the reset line. The pin is asserted with `set_high`.
pub fn reset<I2C, D, RST>(transport: &mut Transport<I2C, D>, reset: &mut RST) -> Result<()>
where
    I2C: I2c,
    D: DelayNs,
    RST: OutputPin,
{
    reset
        .set_high()
        .map_err(|err| Error::ResetLine(err.kind()))?;
    transport.delay_range_us(timing::RESET_PULSE_US);

    reset
        .set_low()
        .map_err(|err| Error::ResetLine(err.kind()))
}

/// Bootloader session borrowing the transport and reset line
pub struct Bootloader<'a, I2C, D, RST> {
    transport: &'a mut Transport<I2C, D>,
    reset: &'a mut RST,
}

impl<'a, I2C, D, RST> Bootloader<'a, I2C, D, RST>
where
    I2C: I2c,
    D: DelayNs,
    RST: OutputPin,
{
    pub fn new(transport: &'a mut Transport<I2C, D>, reset: &'a mut RST) -> Self {
        Bootloader { transport, reset }
    }

    /// Queries the bootloader ID. Doubles as a liveness probe, so failures
    /// are not logged as errors.
    pub fn version(&mut self) -> Result<()> {
        self.send(Command::Version, &[Command::Version as u8])?;

        let mut mbuf = [0u8; 2];
        self.receive(Command::Version, &mut mbuf)?;

        let id = u16::from_be_bytes(mbuf);
        if id != BL_ID {
            log::debug!("Unrecognized bootloader ID: 0x{:04X}", id);
            return Err(Error::BootloaderId(id));
        }

        Ok(())
    }

    /// Reads one block at [address] into [block]
    pub fn read(&mut self, address: u16, block: &mut [u8; BL_BLK_LEN_MAX]) -> Result<()> {
        let [hi, lo] = address.to_be_bytes();
        self.send(Command::Read, &[Command::Read as u8, hi, lo])?;

        self.transport.bl_receive(block).map_err(|kind| {
            log::error!("Failed to read block at address 0x{:04X}: {}", address, kind);
            Error::BlockRead { address, kind }
        })
    }

    /// Asks the bootloader to check the written image
    pub fn crc(&mut self) -> Result<()> {
        self.send(Command::Crc, &[Command::Crc as u8])?;

        self.transport.delay_ms(timing::BL_CRC_MS);

        let mut mbuf = [0u8; 1];
        self.receive(Command::Crc, &mut mbuf)?;

        if mbuf[0] != BL_CRC_PASS {
            log::error!("Bootloader CRC failed");
            return Err(Error::Crc(mbuf[0]));
        }

        Ok(())
    }

    /// Boots the application firmware
    pub fn execute(&mut self) -> Result<()> {
        self.send(Command::Execute, &[Command::Execute as u8])?;
        self.transport.delay_us(timing::BL_EXEC_US);

        Ok(())
    }

    /// Resets the device and catches its bootloader polling window.
    ///
    /// The window lasts about 2 ms after reset is released; if no probe gets
    /// through in time the reset is cycled again.
    pub fn open(&mut self) -> Result<()> {
        let mut last = None;

        for attempt in 0..BL_ATTEMPTS {
            reset(self.transport, self.reset)?;

            for _ in 0..NUM_RETRIES {
                match self.version() {
                    Ok(()) => {
                        log::debug!("Bootloader opened after {} reset(s)", attempt + 1);
                        return Ok(());
                    }
                    Err(err) => last = Some(err),
                }
            }
        }

        let source = Box::new(last.unwrap_or(Error::StuckInBootloader));
        log::error!("Failed to open bootloader: {}", source);

        Err(Error::BootloaderOpen {
            attempts: BL_ATTEMPTS,
            source,
        })
    }

    /// Programs [data] in blocks starting at [address]
    pub fn write(&mut self, address: u16, data: &[u8]) -> Result<()> {
        check_range(address, data.len())?;

        let mut mbuf = [0u8; 2 + BL_BLK_LEN_MAX];

        for (i, block) in data.chunks(BL_BLK_LEN_MAX).enumerate() {
            let block_addr = address + (i * BL_BLK_LEN_MAX) as u16;
            mbuf[..2].copy_from_slice(&block_addr.to_be_bytes());
            mbuf[2..].copy_from_slice(block);

            self.transport.bl_send(&mbuf).map_err(|kind| {
                log::error!(
                    "Failed to write block at address 0x{:04X}: {}",
                    block_addr,
                    kind
                );
                Error::BlockWrite {
                    address: block_addr,
                    kind,
                }
            })?;

            log::debug!("Wrote block at address 0x{:04X}", block_addr);
            self.transport.delay_us(timing::BL_BLOCK_US);
        }

        Ok(())
    }

    /// Reads back the blocks at [address] and compares them with [data]
    pub fn verify(&mut self, address: u16, data: &[u8]) -> Result<()> {
        check_range(address, data.len())?;

        let mut bl_data = [0u8; BL_BLK_LEN_MAX];

        for (i, block) in data.chunks(BL_BLK_LEN_MAX).enumerate() {
            let block_addr = address + (i * BL_BLK_LEN_MAX) as u16;
            self.read(block_addr, &mut bl_data)?;

            if bl_data[..] != block[..] {
                log::error!("Failed to verify block at address 0x{:04X}", block_addr);
                return Err(Error::Verify(block_addr));
            }
        }

        Ok(())
    }

    fn send(&mut self, command: Command, mbuf: &[u8]) -> Result<()> {
        self.transport
            .bl_send(mbuf)
            .map_err(|kind| command_failed(command, kind))
    }

    fn receive(&mut self, command: Command, mbuf: &mut [u8]) -> Result<()> {
        self.transport
            .bl_receive(mbuf)
            .map_err(|kind| command_failed(command, kind))
    }
}

fn command_failed(command: Command, kind: embedded_hal::i2c::ErrorKind) -> Error {
    if command != Command::Version {
        log::error!(
            "Unsuccessful bootloader command 0x{:02X}: {}",
            command as u8,
            kind
        );
    }

    Error::BootloaderCommand {
        command: command as u8,
        kind,
    }
}

/// Whole blocks inside program memory only
fn check_range(address: u16, len: usize) -> Result<()> {
    check_blocks(len)?;

    if address < CHKSM || address as usize + len > PMAP_END as usize + 1 {
        return Err(Error::BlockRange { address, len });
    }

    Ok(())
}
