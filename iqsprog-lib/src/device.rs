//! IqsProg device file
//!
//! Owned handle to one controller: the exclusive bus session, bring-up
//! after reset, power state and touch sampling

use super::bootloader::{self, Bootloader};
use super::config::{AxisConfig, Config};
use super::definitions::*;
use super::error::{Error, Result};
use super::transport::Transport;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::i2c::I2c;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Interrupt line of the touch-sampling path.
///
/// Addressing the device outside of a communication window prompts it to
/// assert its RDY output, so the line is held off while a multi-step
/// sequence owns the bus.
pub trait InterruptLine {
    fn disable(&mut self);
    fn enable(&mut self);
}

/// For polled operation without an interrupt line
pub struct NoInterrupt;

impl InterruptLine for NoInterrupt {
    fn disable(&mut self) {}
    fn enable(&mut self) {}
}

/// Bring-up progress since the last reset
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BringUpState {
    Reset,
    Identifying,
    Bootloader,
    Normal,
}

/// Why bring-up left the device in bootloader mode
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootloaderReason {
    IdentityUnreadable,
    UnsupportedProject(u16),
    UnsupportedVersion(u8),
}

/// Identity block read at [PROD_NUM]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Identity {
    pub product: u16,
    pub project: u16,
    pub major: u8,
    pub minor: u8,
    pub status: u8,
}

impl Identity {
    /// Decodes the block read into `buf[1..]`.
    ///
    /// A000 and B000 devices use 8-bit and 16-bit addressing, respectively.
    /// Querying an A000 device with 16-bit addressing gives the appearance
    /// that the data is shifted by one byte; a nonzero leading byte suggests
    /// this is the case, and the missing zero in `buf[0]` is prepended.
    pub fn decode(buf: &[u8; 8]) -> Self {
        let start = if buf[1] > 0 { 0 } else { 1 };
        let b = &buf[start..start + 7];

        Identity {
            product: u16::from_be_bytes([b[0], b[1]]),
            project: u16::from_be_bytes([b[2], b[3]]),
            major: b[4],
            minor: b[5],
            status: b[6],
        }
    }

    pub fn name(&self) -> Option<&'static str> {
        DEFINITIONS.get(&self.product).map(|definition| definition.name)
    }
}

/// Maximum coordinates written back to the device
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub max_x: u16,
    pub max_y: u16,
}

/// Outcome of a completed bring-up
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BringUp {
    Normal {
        identity: Identity,
        resolution: Resolution,
    },
    Bootloader(BootloaderReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PowerState {
    Resume = RESUME,
    Suspend = SUSPEND,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Contact {
    pub x: u16,
    pub y: u16,
    pub strength: u16,
    pub area: u8,
}

impl Contact {
    pub const LEN: usize = 7;

    pub fn is_active(&self) -> bool {
        self.strength != 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TouchFrame {
    pub contacts: [Contact; NUM_CONTACTS],
}

pub(crate) struct Session<I2C, RST, D> {
    pub(crate) transport: Transport<I2C, D>,
    pub(crate) reset: RST,
    irq: Box<dyn InterruptLine + Send>,
    pub(crate) state: BringUpState,
    pub(crate) identity: Option<Identity>,
    pub(crate) resolution: Option<Resolution>,
}

/// Session held with the interrupt line disabled; re-enabled on drop
pub(crate) struct Exclusive<'a, I2C, RST, D> {
    session: MutexGuard<'a, Session<I2C, RST, D>>,
}

impl<'a, I2C, RST, D> Deref for Exclusive<'a, I2C, RST, D> {
    type Target = Session<I2C, RST, D>;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl<'a, I2C, RST, D> DerefMut for Exclusive<'a, I2C, RST, D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.session
    }
}

impl<'a, I2C, RST, D> Drop for Exclusive<'a, I2C, RST, D> {
    fn drop(&mut self) {
        self.session.irq.enable();
    }
}

/// One touch controller
pub struct Device<I2C, RST, D> {
    session: Mutex<Session<I2C, RST, D>>,
    mode: AtomicU8,
    pub(crate) config: Config,
}

impl<I2C, RST, D> Device<I2C, RST, D>
where
    I2C: I2c,
    RST: OutputPin,
    D: DelayNs,
{
    /// Creates a handle; nothing is sent until [Device::probe]
    pub fn new(i2c: I2C, reset: RST, delay: D, config: Config) -> Self {
        Device {
            session: Mutex::new(Session {
                transport: Transport::new(i2c, delay, config.address),
                reset,
                irq: Box::new(NoInterrupt),
                state: BringUpState::Reset,
                identity: None,
                resolution: None,
            }),
            mode: AtomicU8::new(OperatingMode::Reset as u8),
            config,
        }
    }

    /// Attaches the interrupt line of the touch-sampling path
    pub fn with_interrupt(mut self, irq: impl InterruptLine + Send + 'static) -> Self {
        let session = self
            .session
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        session.irq = Box::new(irq);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bootloader status of the running firmware; readable while a sequence
    /// holds the session
    pub fn mode(&self) -> OperatingMode {
        OperatingMode::from_u8(self.mode.load(Ordering::Acquire)).unwrap_or(OperatingMode::Reset)
    }

    pub(crate) fn set_mode(&self, mode: OperatingMode) {
        self.mode.store(mode as u8, Ordering::Release);
    }

    pub fn state(&self) -> BringUpState {
        self.lock().state
    }

    pub fn identity(&self) -> Option<Identity> {
        self.lock().identity
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.lock().resolution
    }

    fn lock(&self) -> MutexGuard<'_, Session<I2C, RST, D>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn exclusive(&self) -> Exclusive<'_, I2C, RST, D> {
        let mut session = self.lock();
        session.irq.disable();

        Exclusive { session }
    }

    /// Resets the device and runs bring-up
    pub fn probe(&self) -> Result<BringUp> {
        let mut guard = self.exclusive();
        let s = &mut *guard;

        self.set_mode(OperatingMode::Reset);
        s.state = BringUpState::Reset;

        bootloader::reset(&mut s.transport, &mut s.reset)?;
        s.transport.delay_us(timing::RESET_SETTLE_US);

        self.init(s)
    }

    /// Runs bring-up without resetting the device first
    pub fn identify(&self) -> Result<BringUp> {
        let mut guard = self.exclusive();
        self.init(&mut guard)
    }

    pub(crate) fn init(&self, s: &mut Session<I2C, RST, D>) -> Result<BringUp> {
        // Unknown until the identity block says otherwise
        self.set_mode(OperatingMode::Reset);
        s.state = BringUpState::Identifying;
        s.identity = None;
        s.resolution = None;

        match self.dev_init(s) {
            Ok(bring_up) => {
                s.state = match bring_up {
                    BringUp::Normal { .. } => BringUpState::Normal,
                    BringUp::Bootloader(_) => BringUpState::Bootloader,
                };
                Ok(bring_up)
            }
            Err(err) => {
                s.state = BringUpState::Reset;
                Err(err)
            }
        }
    }

    fn dev_init(&self, s: &mut Session<I2C, RST, D>) -> Result<BringUp> {
        // Read identity
        let mut buf = [0u8; 8];
        if s.transport.read_burst(PROD_NUM, &mut buf[1..]).is_err() {
            return enter_bootloader(s, BootloaderReason::IdentityUnreadable);
        }

        let identity = Identity::decode(&buf);

        // Check product
        let name = match identity.name() {
            Some(name) => name,
            None => {
                log::error!("Unrecognized product number: {}", identity.product);
                return Err(Error::UnrecognizedProduct(identity.product));
            }
        };

        // Check project
        match identity.project {
            PROJ_NUM_A000 => {
                log::error!("Unsupported project number: {}", identity.project);
                return enter_bootloader(s, BootloaderReason::UnsupportedProject(identity.project));
            }
            PROJ_NUM_B000 => {}
            project => {
                log::error!("Unrecognized project number: {}", project);
                return Err(Error::UnrecognizedProject(project));
            }
        }

        // Check firmware version
        if identity.major < MAJOR_VER_MIN {
            log::error!("Unsupported major version: {}", identity.major);
            return enter_bootloader(s, BootloaderReason::UnsupportedVersion(identity.major));
        }

        // Check bootloader status
        let mode = match OperatingMode::from_u8(identity.status) {
            Some(mode @ (OperatingMode::Available | OperatingMode::None)) => mode,
            _ => {
                log::error!("Unrecognized bootloader status: 0x{:02X}", identity.status);
                return Err(Error::UnrecognizedStatus(identity.status));
            }
        };

        // Configure axes
        let resolution = axis_init(s, &self.config.axes)?;

        // Mark setup complete
        let mut val = s.transport.read_byte(SYS_CFG0)?;
        val |= SETUP_COMPLETE;
        val &= !SW_INPUT_EVENT;
        s.transport.write_byte(SYS_CFG0, val)?;

        // Report touch events only
        s.transport.write_byte(SYS_CFG1, TP_EVENT | EVENT_MODE)?;
        s.transport.write_byte(END_COMM, 0)?;

        self.set_mode(mode);
        s.identity = Some(identity);
        s.resolution = Some(resolution);

        // Closing the first window after reset starts an initialization
        // period during which the device clock stretches.
        s.transport.delay_ms(timing::SETUP_SETTLE_MS);

        log::info!(
            "{} version {}.{} ready ({}x{})",
            name,
            identity.major,
            identity.minor,
            resolution.max_x,
            resolution.max_y
        );

        Ok(BringUp::Normal {
            identity,
            resolution,
        })
    }

    /// Requests a power state; skipped while the device is unidentified
    pub fn set_state(&self, state: PowerState) -> Result<()> {
        if self.mode() == OperatingMode::Reset {
            return Ok(());
        }

        let mut guard = self.exclusive();
        let s = &mut *guard;

        let error1 = s.transport.write_byte(SYS_CTRL1, state as u8);
        let error2 = s.transport.write_byte(END_COMM, 0);

        s.transport.delay_range_us(timing::WINDOW_CLOSE_US);

        error1.and(error2)
    }

    pub fn suspend(&self) -> Result<()> {
        self.set_state(PowerState::Suspend)
    }

    pub fn resume(&self) -> Result<()> {
        self.set_state(PowerState::Resume)
    }

    /// Reads one touch frame. Called from the interrupt path, so the session
    /// is taken without touching the interrupt line.
    pub fn read_touch(&self) -> Result<Option<TouchFrame>> {
        // The device does not assert RDY in bootloader mode
        if self.mode() == OperatingMode::Reset {
            return Ok(None);
        }

        let mut session = self.lock();

        let mut buf = [0u8; NUM_CONTACTS * Contact::LEN];
        session.transport.read_burst(ABS_X, &mut buf)?;

        let mut contacts = [Contact::default(); NUM_CONTACTS];
        for (contact, raw) in contacts.iter_mut().zip(buf.chunks_exact(Contact::LEN)) {
            *contact = Contact {
                x: u16::from_be_bytes([raw[0], raw[1]]),
                y: u16::from_be_bytes([raw[2], raw[3]]),
                strength: u16::from_be_bytes([raw[4], raw[5]]),
                area: raw[6],
            };
        }

        session.transport.write_byte(END_COMM, 0)?;
        session.transport.delay_range_us(timing::WINDOW_CLOSE_US);

        Ok(Some(TouchFrame { contacts }))
    }
}

fn enter_bootloader<I2C, RST, D>(
    s: &mut Session<I2C, RST, D>,
    reason: BootloaderReason,
) -> Result<BringUp>
where
    I2C: I2c,
    RST: OutputPin,
    D: DelayNs,
{
    log::warn!("Entering bootloader: {:?}", reason);
    Bootloader::new(&mut s.transport, &mut s.reset).open()?;

    Ok(BringUp::Bootloader(reason))
}

fn axis_init<I2C, RST, D>(s: &mut Session<I2C, RST, D>, axes: &AxisConfig) -> Result<Resolution>
where
    I2C: I2c,
    RST: OutputPin,
    D: DelayNs,
{
    let transport = &mut s.transport;

    let val = transport.read_byte(TOTAL_RX)?;
    let mut max_x_hw = (val as u16).wrapping_sub(1).wrapping_mul(NUM_POINTS);

    let val = transport.read_byte(TOTAL_TX)?;
    let mut max_y_hw = (val as u16).wrapping_sub(1).wrapping_mul(NUM_POINTS);

    let mut val = transport.read_byte(XY_CFG0)?;

    if val & SWITCH_XY_AXIS != 0 {
        std::mem::swap(&mut max_x_hw, &mut max_y_hw);
    }

    if axes.swap_x_y {
        val ^= SWITCH_XY_AXIS;
    }

    if axes.invert_x {
        val ^= if axes.swap_x_y { FLIP_Y } else { FLIP_X };
    }

    if axes.invert_y {
        val ^= if axes.swap_x_y { FLIP_X } else { FLIP_Y };
    }

    transport.write_byte(XY_CFG0, val)?;

    let max_x = resolve_max(transport, 'x', axes.max_x, max_x_hw, X_RES)?;
    let max_y = resolve_max(transport, 'y', axes.max_y, max_y_hw, Y_RES)?;

    // Written back in case the defaults were overridden or swapped
    let (x_reg, y_reg) = if axes.swap_x_y {
        (Y_RES, X_RES)
    } else {
        (X_RES, Y_RES)
    };
    transport.write_word(x_reg, max_x)?;
    transport.write_word(y_reg, max_y)?;

    Ok(Resolution { max_x, max_y })
}

fn resolve_max<I2C, D>(
    transport: &mut Transport<I2C, D>,
    axis: char,
    requested: u32,
    limit: u16,
    reg: u16,
) -> Result<u16>
where
    I2C: I2c,
    D: DelayNs,
{
    if requested > limit as u32 {
        log::error!(
            "Invalid maximum {}-coordinate: {} > {}",
            axis,
            requested,
            limit
        );
        return Err(Error::InvalidCoordinate {
            axis,
            requested,
            limit,
        });
    }

    if requested == 0 {
        return transport.read_word(reg);
    }

    Ok(requested as u16)
}
