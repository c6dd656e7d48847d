//! IqsProg transport file
//!
//! Register access over the two-wire bus. The device only accepts traffic
//! inside a communication window: the first addressing attempt outside of
//! one fails and must be retried, after which the device clock stretches
//! until it is available.

use super::definitions::{timing, BL_ADDR_MASK, NUM_RETRIES, WR_BYTES_MAX};
use super::error::{Error, Result};
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{Error as _, ErrorKind, I2c};
use rand::Rng;
use std::ops::RangeInclusive;

/// Which of the two device addresses traffic goes to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Addressing {
    Normal,
    Bootloader,
}

/// Bus access to one controller
pub struct Transport<I2C, D> {
    i2c: I2C,
    delay: D,
    address: u8,
    /// Address the last transfer went to
    active: Addressing,
}

impl<I2C, D> Transport<I2C, D>
where
    I2C: I2c,
    D: DelayNs,
{
    /// Creates a transport talking to the controller at 7-bit [address]
    pub fn new(i2c: I2C, delay: D, address: u8) -> Self {
        Transport {
            i2c,
            delay,
            address,
            active: Addressing::Normal,
        }
    }

    /// Bus address used for [addressing]
    pub fn address(&self, addressing: Addressing) -> u8 {
        match addressing {
            Addressing::Normal => self.address,
            Addressing::Bootloader => self.address ^ BL_ADDR_MASK,
        }
    }

    /// Which address the session last talked to
    pub fn addressing(&self) -> Addressing {
        self.active
    }

    /// Reads `val.len()` bytes starting at register [reg]
    pub fn read_burst(&mut self, reg: u16, val: &mut [u8]) -> Result<()> {
        let reg_buf = reg.to_be_bytes();
        let address = self.address(Addressing::Normal);
        self.active = Addressing::Normal;
        let mut kind = ErrorKind::Other;

        for _ in 0..NUM_RETRIES {
            match self.i2c.write_read(address, &reg_buf, val) {
                Ok(()) => return Ok(()),
                Err(err) => kind = err.kind(),
            }

            self.delay_range_us(timing::RETRY_US);
        }

        log::error!("Failed to read from address 0x{:04X}: {}", reg, kind);

        Err(Error::Read {
            register: reg,
            kind,
        })
    }

    pub fn read_word(&mut self, reg: u16) -> Result<u16> {
        let mut val_buf = [0u8; 2];
        self.read_burst(reg, &mut val_buf)?;

        Ok(u16::from_be_bytes(val_buf))
    }

    pub fn read_byte(&mut self, reg: u16) -> Result<u8> {
        let mut val = [0u8; 1];
        self.read_burst(reg, &mut val)?;

        Ok(val[0])
    }

    /// Writes at most [WR_BYTES_MAX] bytes starting at register [reg]
    pub fn write_burst(&mut self, reg: u16, val: &[u8]) -> Result<()> {
        if val.len() > WR_BYTES_MAX {
            return Err(Error::WriteTooLong(val.len()));
        }

        let mut mbuf = [0u8; 2 + WR_BYTES_MAX];
        let mlen = 2 + val.len();
        mbuf[..2].copy_from_slice(&reg.to_be_bytes());
        mbuf[2..mlen].copy_from_slice(val);

        let address = self.address(Addressing::Normal);
        self.active = Addressing::Normal;
        let mut kind = ErrorKind::Other;

        for _ in 0..NUM_RETRIES {
            match self.i2c.write(address, &mbuf[..mlen]) {
                Ok(()) => return Ok(()),
                Err(err) => kind = err.kind(),
            }

            self.delay_range_us(timing::RETRY_US);
        }

        log::error!("Failed to write to address 0x{:04X}: {}", reg, kind);

        Err(Error::Write {
            register: reg,
            kind,
        })
    }

    pub fn write_word(&mut self, reg: u16, val: u16) -> Result<()> {
        self.write_burst(reg, &val.to_be_bytes())
    }

    pub fn write_byte(&mut self, reg: u16, val: u8) -> Result<()> {
        self.write_burst(reg, &[val])
    }

    /// Single write attempt at the bootloader address
    pub fn bl_send(&mut self, bytes: &[u8]) -> Result<(), ErrorKind> {
        let address = self.address(Addressing::Bootloader);
        self.active = Addressing::Bootloader;
        self.i2c.write(address, bytes).map_err(|err| err.kind())
    }

    /// Single read attempt at the bootloader address
    pub fn bl_receive(&mut self, buf: &mut [u8]) -> Result<(), ErrorKind> {
        let address = self.address(Addressing::Bootloader);
        self.active = Addressing::Bootloader;
        self.i2c.read(address, buf).map_err(|err| err.kind())
    }

    pub fn delay_us(&mut self, us: u32) {
        self.delay.delay_us(us);
    }

    pub fn delay_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }

    /// Sleeps for a random duration within [range]
    pub fn delay_range_us(&mut self, range: RangeInclusive<u32>) {
        let us = rand::thread_rng().gen_range(range);
        self.delay.delay_us(us);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::NoDelay;
    use embedded_hal_mock::eh1::i2c::{Mock, Transaction};

    const ADDRESS: u8 = 0x74;

    fn failed_read(reg: u16, len: usize) -> Transaction {
        Transaction::write_read(ADDRESS, reg.to_be_bytes().to_vec(), vec![0; len])
            .with_error(ErrorKind::NoAcknowledge(
                embedded_hal::i2c::NoAcknowledgeSource::Address,
            ))
    }

    #[test]
    fn bootloader_address_is_masked() {
        let mut i2c = Mock::new(&[]);
        let transport = Transport::new(&mut i2c, NoDelay, ADDRESS);
        assert_eq!(transport.address(Addressing::Normal), 0x74);
        assert_eq!(transport.address(Addressing::Bootloader), 0x34);
        drop(transport);
        i2c.done();
    }

    #[test]
    fn read_retries_outside_window() {
        let expectations = [
            failed_read(0x063D, 1),
            Transaction::write_read(ADDRESS, vec![0x06, 0x3D], vec![13]),
        ];
        let mut i2c = Mock::new(&expectations);
        let mut transport = Transport::new(&mut i2c, NoDelay, ADDRESS);
        assert_eq!(transport.read_byte(0x063D).unwrap(), 13);
        drop(transport);
        i2c.done();
    }

    #[test]
    fn read_gives_up_after_retry_ceiling() {
        let expectations: Vec<Transaction> =
            (0..NUM_RETRIES).map(|_| failed_read(0x066E, 2)).collect();
        let mut i2c = Mock::new(&expectations);
        let mut transport = Transport::new(&mut i2c, NoDelay, ADDRESS);
        match transport.read_word(0x066E) {
            Err(Error::Read { register, .. }) => assert_eq!(register, 0x066E),
            other => panic!("unexpected result {:?}", other),
        }
        drop(transport);
        i2c.done();
    }

    #[test]
    fn words_are_big_endian() {
        let expectations = [
            Transaction::write_read(ADDRESS, vec![0x06, 0x70], vec![0x03, 0x00]),
            Transaction::write(ADDRESS, vec![0x06, 0x6E, 0x0E, 0x00]),
        ];
        let mut i2c = Mock::new(&expectations);
        let mut transport = Transport::new(&mut i2c, NoDelay, ADDRESS);
        assert_eq!(transport.read_word(0x0670).unwrap(), 0x0300);
        transport.write_word(0x066E, 0x0E00).unwrap();
        drop(transport);
        i2c.done();
    }

    #[test]
    fn write_retries_then_succeeds() {
        let expectations = [
            Transaction::write(ADDRESS, vec![0xEE, 0xEE, 0x00]).with_error(ErrorKind::Other),
            Transaction::write(ADDRESS, vec![0xEE, 0xEE, 0x00]).with_error(ErrorKind::Other),
            Transaction::write(ADDRESS, vec![0xEE, 0xEE, 0x00]),
        ];
        let mut i2c = Mock::new(&expectations);
        let mut transport = Transport::new(&mut i2c, NoDelay, ADDRESS);
        transport.write_byte(0xEEEE, 0).unwrap();
        drop(transport);
        i2c.done();
    }

    #[test]
    fn long_write_is_rejected_without_traffic() {
        let mut i2c = Mock::new(&[]);
        let mut transport = Transport::new(&mut i2c, NoDelay, ADDRESS);
        assert!(matches!(
            transport.write_burst(0x0432, &[1, 2, 3]),
            Err(Error::WriteTooLong(3))
        ));
        drop(transport);
        i2c.done();
    }

    #[test]
    fn session_tracks_active_address() {
        let expectations = [
            Transaction::write(0x34, vec![0x00]),
            Transaction::read(0x34, vec![0x02, 0x00]),
            Transaction::write_read(ADDRESS, vec![0x00, 0x00], vec![0x00]),
        ];
        let mut i2c = Mock::new(&expectations);
        let mut transport = Transport::new(&mut i2c, NoDelay, ADDRESS);
        assert_eq!(transport.addressing(), Addressing::Normal);

        transport.bl_send(&[0x00]).unwrap();
        assert_eq!(transport.addressing(), Addressing::Bootloader);
        let mut id = [0u8; 2];
        transport.bl_receive(&mut id).unwrap();
        assert_eq!(transport.addressing(), Addressing::Bootloader);

        transport.read_byte(0x0000).unwrap();
        assert_eq!(transport.addressing(), Addressing::Normal);
        drop(transport);
        i2c.done();
    }
}
