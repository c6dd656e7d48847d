use clap::Parser;
use iqsprog_lib::definitions::DEFAULT_ADDRESS;
use iqsprog_lib::{AxisConfig, BringUp, Config, Device, FirmwareImage};
use linux_embedded_hal::sysfs_gpio::Direction;
use linux_embedded_hal::{Delay, I2cdev, SysfsPin};
use std::path::PathBuf;
use std::process;

/// IQS5xx I2C bootloader flash tool
#[derive(Parser, Debug)]
#[clap(version = "0.1.0")]
#[clap(
    about,
    long_about = "IqsProg is an application for firmware operations on Azoteq IQS5xx touch controllers over I2C"
)]
struct Args {
    /// I2C bus device to use
    #[clap(short, long, value_parser, default_value = "/dev/i2c-1")]
    bus: String,

    /// 7-bit device address, hex (0x74) or decimal
    #[clap(short, long, value_parser = parse_address, default_value_t = DEFAULT_ADDRESS)]
    address: u8,

    /// Sysfs GPIO number of the reset line
    #[clap(short = 'g', long, value_parser)]
    reset_gpio: Option<u64>,

    /// Reset line is active low
    #[clap(long, action)]
    reset_active_low: bool,

    /// Swap x and y axes
    #[clap(long, action)]
    swap_xy: bool,

    /// Invert x axis
    #[clap(long, action)]
    invert_x: bool,

    /// Invert y axis
    #[clap(long, action)]
    invert_y: bool,

    /// Maximum x-coordinate, 0 keeps the device default
    #[clap(long, value_parser, default_value_t = 0)]
    max_x: u32,

    /// Maximum y-coordinate, 0 keeps the device default
    #[clap(long, value_parser, default_value_t = 0)]
    max_y: u32,

    /// Directory firmware files are looked up in
    #[clap(long, value_parser, default_value = ".")]
    firmware_dir: PathBuf,

    /// Parse the provided file without touching hardware
    #[clap(short, long, action)]
    check: bool,

    /// Reset and identify the device
    #[clap(short, long, action)]
    probe: bool,

    /// Write file to flash, verify and start the application
    #[clap(short, long, action)]
    write: bool,

    /// Suspend the device
    #[clap(short, long, action)]
    suspend: bool,

    /// Resume the device
    #[clap(short, long, action)]
    resume: bool,

    /// Read one touch frame
    #[clap(short, long, action)]
    touch: bool,

    /// Target firmware file, relative to the firmware directory
    #[clap(short, long, action)]
    file: Option<String>,
}

fn parse_address(value: &str) -> Result<u8, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => value.parse(),
    };

    match parsed {
        Ok(address) if address < 0x80 => Ok(address),
        Ok(address) => Err(format!("0x{:02X} is not a 7-bit address", address)),
        Err(err) => Err(err.to_string()),
    }
}

fn fail(message: String) -> ! {
    println!("ERROR: {}", message);
    process::exit(1);
}

fn report(bring_up: &BringUp) {
    match bring_up {
        BringUp::Normal {
            identity,
            resolution,
        } => println!(
            "Detected {} version {}.{}, {}x{}",
            identity.name().unwrap_or("unknown"),
            identity.major,
            identity.minor,
            resolution.max_x,
            resolution.max_y
        ),
        BringUp::Bootloader(reason) => println!("Device is in bootloader mode ({:?})", reason),
    }
}

fn open_reset_pin(gpio: u64, active_low: bool) -> SysfsPin {
    let pin = SysfsPin::new(gpio);

    if let Err(err) = pin.export() {
        fail(format!("Cannot export GPIO {}: {}", gpio, err));
    }

    if let Err(err) = pin.set_active_low(active_low) {
        fail(format!("Cannot configure GPIO {}: {}", gpio, err));
    }

    // Deasserted until the first reset pulse
    if let Err(err) = pin.set_direction(Direction::Low) {
        fail(format!("Cannot configure GPIO {}: {}", gpio, err));
    }

    pin
}

fn main() {
    env_logger::init();

    let args = Args::parse();

    if args.check {
        let filename = match &args.file {
            Some(filename) => args.firmware_dir.join(filename),
            None => fail("No file to check".to_string()),
        };

        let fw = match std::fs::read(&filename) {
            Ok(fw) => fw,
            Err(err) => fail(format!("Cannot read {}: {}", filename.display(), err)),
        };

        match FirmwareImage::parse(&fw) {
            Ok(image) => println!(
                "Check OK: {} bytes ({} checksum, {} application, {} customization)",
                image.len(),
                image.checksum_region().len(),
                image.app_region().len(),
                image.custom_region().len()
            ),
            Err(err) => fail(format!("Check failed: {}", err)),
        }
        return;
    }

    if !(args.probe || args.write || args.suspend || args.resume || args.touch) {
        return;
    }

    let gpio = match args.reset_gpio {
        Some(gpio) => gpio,
        None => fail("A reset GPIO is required for hardware operations".to_string()),
    };

    let i2c = match I2cdev::new(&args.bus) {
        Ok(i2c) => i2c,
        Err(err) => fail(format!("Cannot open bus {}: {}", args.bus, err)),
    };

    let config = Config {
        address: args.address,
        axes: AxisConfig {
            swap_x_y: args.swap_xy,
            invert_x: args.invert_x,
            invert_y: args.invert_y,
            max_x: args.max_x,
            max_y: args.max_y,
        },
        firmware_dir: args.firmware_dir.clone(),
    };

    let device = Device::new(
        i2c,
        open_reset_pin(gpio, args.reset_active_low),
        Delay,
        config,
    );

    // Every action needs the operating mode learned at bring-up
    println!("Probing");
    match device.probe() {
        Ok(bring_up) => report(&bring_up),
        // A device with broken firmware can still be written
        Err(err) if args.write => println!("WARNING: Probing failed: {}", err),
        Err(err) => fail(format!("Probing failed: {} ({:?})", err, err.class())),
    }

    if args.write {
        let filename = match &args.file {
            Some(filename) => filename,
            None => fail("No file to write".to_string()),
        };

        println!("Writing {}", filename);
        match device.update_firmware(filename) {
            Ok(bring_up) => {
                println!("Write OK");
                report(&bring_up);
            }
            Err(err) => fail(format!("Write failed: {} ({:?})", err, err.class())),
        }
    }

    if args.suspend {
        println!("Suspending");
        if let Err(err) = device.suspend() {
            fail(format!("Suspending failed: {}", err));
        }
    }

    if args.resume {
        println!("Resuming");
        if let Err(err) = device.resume() {
            fail(format!("Resuming failed: {}", err));
        }
    }

    if args.touch {
        match device.read_touch() {
            Ok(Some(frame)) => {
                for (i, contact) in frame.contacts.iter().enumerate() {
                    if contact.is_active() {
                        println!(
                            "Contact {}: x={} y={} strength={} area={}",
                            i, contact.x, contact.y, contact.strength, contact.area
                        );
                    }
                }
            }
            Ok(None) => println!("Device is not reporting touches"),
            Err(err) => fail(format!("Reading touch failed: {}", err)),
        }
    }
}
