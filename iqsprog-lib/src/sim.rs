//! Simulated controller for exercising multi-step sequences in tests

use crate::config::{AxisConfig, Config};
use crate::definitions::*;
use crate::device::{Device, InterruptLine};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType as PinErrorType, OutputPin};
use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};
use std::cell::RefCell;
use std::convert::Infallible;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Reset asserted
    Held,
    /// Reset released, bootloader polling for a probe
    Window,
    Bootloader,
    Application,
}

pub struct Controller {
    pub phase: Phase,
    pub regs: Vec<u8>,
    pub pmap: Vec<u8>,

    /// Whether the device boots the application when left alone
    pub firmware_valid: bool,
    pub bl_id: u16,
    pub crc_result: u8,
    /// Version probes missed after every reset release
    pub window_misses: usize,
    /// Upcoming application accesses refused
    pub nacks: usize,
    /// Block whose read-back comes out corrupted
    pub corrupt: Option<u16>,

    pub resets: usize,
    pub version_probes: usize,
    pub block_writes: usize,
    pub first_block: Option<u16>,
    pub crc_checks: usize,
    pub executes: usize,
    pub reg_writes: Vec<(u16, Vec<u8>)>,
    /// Bus operations seen at either address
    pub traffic: usize,

    pending_misses: usize,
    bl_reply: Vec<u8>,
    reg_ptr: u16,
}

impl Controller {
    pub fn new() -> Self {
        let mut ctrl = Controller {
            phase: Phase::Application,
            regs: vec![0; 0x10000],
            pmap: vec![0xFF; PMAP_LEN],
            firmware_valid: true,
            bl_id: BL_ID,
            crc_result: BL_CRC_PASS,
            window_misses: 0,
            nacks: 0,
            corrupt: None,
            resets: 0,
            version_probes: 0,
            block_writes: 0,
            first_block: None,
            crc_checks: 0,
            executes: 0,
            reg_writes: Vec::new(),
            traffic: 0,
            pending_misses: 0,
            bl_reply: Vec::new(),
            reg_ptr: 0,
        };

        ctrl.set_identity(&[0x00, 40, 0x00, 15, 2, 0, 0xA5]);
        ctrl.regs[TOTAL_RX as usize] = 10;
        ctrl.regs[TOTAL_TX as usize] = 15;
        ctrl.set_word(X_RES, 2304);
        ctrl.set_word(Y_RES, 3584);
        ctrl.regs[SYS_CFG0 as usize] = SW_INPUT_EVENT;
        ctrl
    }

    pub fn set_identity(&mut self, identity: &[u8; 7]) {
        self.regs[..7].copy_from_slice(identity);
    }

    pub fn set_word(&mut self, reg: u16, val: u16) {
        let reg = reg as usize;
        self.regs[reg..reg + 2].copy_from_slice(&val.to_be_bytes());
    }

    pub fn word(&self, reg: u16) -> u16 {
        let reg = reg as usize;
        u16::from_be_bytes([self.regs[reg], self.regs[reg + 1]])
    }

    pub fn writes_to(&self, reg: u16) -> Vec<Vec<u8>> {
        self.reg_writes
            .iter()
            .filter(|(r, _)| *r == reg)
            .map(|(_, data)| data.clone())
            .collect()
    }

    fn hold_reset(&mut self) {
        self.resets += 1;
        self.phase = Phase::Held;
        self.bl_reply.clear();
    }

    fn release_reset(&mut self) {
        if self.phase == Phase::Held {
            self.phase = Phase::Window;
            self.pending_misses = self.window_misses;
        }
    }

    fn leave_window(&mut self) {
        if self.phase == Phase::Window {
            self.phase = if self.firmware_valid {
                Phase::Application
            } else {
                Phase::Bootloader
            };
        }
    }

    fn bl_write(&mut self, bytes: &[u8]) -> Result<(), ErrorKind> {
        if self.phase == Phase::Window && bytes == [0x00] {
            self.version_probes += 1;
            if self.pending_misses > 0 {
                self.pending_misses -= 1;
                return Err(nack());
            }
            self.phase = Phase::Bootloader;
            self.bl_reply = self.bl_id.to_be_bytes().to_vec();
            return Ok(());
        }

        if self.phase != Phase::Bootloader {
            return Err(nack());
        }

        match bytes {
            [0x00] => {
                self.version_probes += 1;
                self.bl_reply = self.bl_id.to_be_bytes().to_vec();
            }
            [0x01, hi, lo] => {
                let addr = u16::from_be_bytes([*hi, *lo]);
                let offset = (addr - CHKSM) as usize;
                let mut block = self.pmap[offset..offset + BL_BLK_LEN_MAX].to_vec();
                if self.corrupt == Some(addr) {
                    block[0] ^= 0xFF;
                }
                self.bl_reply = block;
            }
            [0x02] => {
                self.executes += 1;
                if self.firmware_valid {
                    self.phase = Phase::Application;
                }
            }
            [0x03] => {
                self.crc_checks += 1;
                self.bl_reply = vec![self.crc_result];
            }
            _ if bytes.len() == 2 + BL_BLK_LEN_MAX => {
                let addr = u16::from_be_bytes([bytes[0], bytes[1]]);
                let offset = (addr - CHKSM) as usize;
                self.pmap[offset..offset + BL_BLK_LEN_MAX].copy_from_slice(&bytes[2..]);
                self.first_block.get_or_insert(addr);
                self.block_writes += 1;
            }
            _ => return Err(nack()),
        }

        Ok(())
    }

    fn bl_read(&mut self, buf: &mut [u8]) -> Result<(), ErrorKind> {
        if self.phase != Phase::Bootloader {
            return Err(nack());
        }

        let len = buf.len().min(self.bl_reply.len());
        buf[..len].copy_from_slice(&self.bl_reply[..len]);
        self.bl_reply.clear();
        Ok(())
    }

    fn app_access(&mut self) -> Result<(), ErrorKind> {
        self.leave_window();

        if self.phase != Phase::Application {
            return Err(nack());
        }

        if self.nacks > 0 {
            self.nacks -= 1;
            return Err(nack());
        }

        Ok(())
    }

    fn app_write(&mut self, bytes: &[u8]) {
        let reg = u16::from_be_bytes([bytes[0], bytes[1]]);
        self.reg_ptr = reg;

        if bytes.len() > 2 {
            let data = bytes[2..].to_vec();
            for (i, byte) in data.iter().enumerate() {
                self.regs[reg.wrapping_add(i as u16) as usize] = *byte;
            }
            self.reg_writes.push((reg, data));
        }
    }

    fn app_read(&mut self, buf: &mut [u8]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = self.regs[self.reg_ptr.wrapping_add(i as u16) as usize];
        }
    }
}

fn nack() -> ErrorKind {
    ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
}

pub struct SimBus {
    ctrl: Rc<RefCell<Controller>>,
}

impl ErrorType for SimBus {
    type Error = ErrorKind;
}

impl I2c for SimBus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut ctrl = self.ctrl.borrow_mut();
        ctrl.traffic += 1;

        if address == DEFAULT_ADDRESS ^ BL_ADDR_MASK {
            for op in operations.iter_mut() {
                match op {
                    Operation::Write(bytes) => ctrl.bl_write(*bytes)?,
                    Operation::Read(buf) => ctrl.bl_read(buf)?,
                }
            }
            return Ok(());
        }

        if address != DEFAULT_ADDRESS {
            return Err(nack());
        }

        ctrl.app_access()?;
        for op in operations.iter_mut() {
            match op {
                Operation::Write(bytes) => ctrl.app_write(*bytes),
                Operation::Read(buf) => ctrl.app_read(buf),
            }
        }

        Ok(())
    }
}

/// Reset line; counts pulses and drives the simulated controller if attached
#[derive(Default)]
pub struct FakePin {
    pulses: usize,
    ctrl: Option<Rc<RefCell<Controller>>>,
}

impl FakePin {
    pub fn pulses(&self) -> usize {
        self.pulses
    }
}

impl PinErrorType for FakePin {
    type Error = Infallible;
}

impl OutputPin for FakePin {
    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.pulses += 1;
        if let Some(ctrl) = &self.ctrl {
            ctrl.borrow_mut().hold_reset();
        }
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), Self::Error> {
        if let Some(ctrl) = &self.ctrl {
            ctrl.borrow_mut().release_reset();
        }
        Ok(())
    }
}

/// Bus and reset line wired to one simulated controller
pub fn wire(ctrl: Controller) -> (SimBus, FakePin, Rc<RefCell<Controller>>) {
    let ctrl = Rc::new(RefCell::new(ctrl));
    let bus = SimBus { ctrl: ctrl.clone() };
    let pin = FakePin {
        pulses: 0,
        ctrl: Some(ctrl.clone()),
    };

    (bus, pin, ctrl)
}

/// Device handle wired to one simulated controller
pub fn device(ctrl: Controller) -> (Device<SimBus, FakePin, NoDelay>, Rc<RefCell<Controller>>) {
    device_with(ctrl, AxisConfig::default())
}

pub fn device_with(
    ctrl: Controller,
    axes: AxisConfig,
) -> (Device<SimBus, FakePin, NoDelay>, Rc<RefCell<Controller>>) {
    let (bus, pin, ctrl) = wire(ctrl);
    let config = Config {
        axes,
        ..Config::default()
    };

    (Device::new(bus, pin, NoDelay, config), ctrl)
}

/// Interrupt line counting how often it was toggled
#[derive(Clone, Default)]
pub struct CountingInterrupt {
    disabled: Arc<AtomicUsize>,
    enabled: Arc<AtomicUsize>,
}

impl CountingInterrupt {
    pub fn disabled(&self) -> usize {
        self.disabled.load(Ordering::SeqCst)
    }

    pub fn enabled(&self) -> usize {
        self.enabled.load(Ordering::SeqCst)
    }
}

impl InterruptLine for CountingInterrupt {
    fn disable(&mut self) {
        self.disabled.fetch_add(1, Ordering::SeqCst);
    }

    fn enable(&mut self) {
        self.enabled.fetch_add(1, Ordering::SeqCst);
    }
}
