//! `/sys/class` attribute file control surface.
//!
//! Pins are driven through the [Linux GPIO sysfs](https://www.kernel.org/doc/Documentation/gpio/sysfs.txt)
//! interface, PWM channels through `/sys/class/pwm`, LEDs through
//! `/sys/class/leds`. Attributes are plain files holding newline
//! terminated decimal or token values; edge waits use `poll(2)` with
//! `POLLPRI` on the pin's `value` file.

use std::fs;
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::path::PathBuf;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use crate::backend::{GpioBackend, PwmBackend};
use crate::error::{Error, Result};
use crate::pins::{Direction, Led, Level, Trigger};

const GPIO_ROOT: &str = "/sys/class/gpio";
const PWM_ROOT: &str = "/sys/class/pwm";
const LED_ROOT: &str = "/sys/class/leds";

fn write_attribute(path: PathBuf, value: &str) -> io::Result<()> {
    let mut file = fs::OpenOptions::new().write(true).open(path)?;
    file.write_all(value.as_bytes())?;
    Ok(())
}

fn read_attribute(path: PathBuf) -> io::Result<String> {
    let mut contents = String::new();
    fs::File::open(path)?.read_to_string(&mut contents)?;
    Ok(contents.trim().to_string())
}

fn busy_or_io(e: io::Error, resource: String) -> Error {
    if e.raw_os_error() == Some(Errno::EBUSY as i32) {
        Error::Busy(resource)
    } else {
        Error::Io(e)
    }
}

fn gpio_path(pin: u32, attribute: &str) -> PathBuf {
    PathBuf::from(format!("{GPIO_ROOT}/gpio{pin}/{attribute}"))
}

/// GPIO and LED control through `/sys/class/gpio` and `/sys/class/leds`.
#[derive(Debug, Default)]
pub struct SysfsGpioBackend;

impl SysfsGpioBackend {
    pub fn new() -> Self {
        Self
    }
}

impl GpioBackend for SysfsGpioBackend {
    fn export(&self, pin: u32) -> Result<()> {
        write_attribute(PathBuf::from(format!("{GPIO_ROOT}/export")), &pin.to_string())
            .map_err(|e| busy_or_io(e, format!("gpio{pin}")))
    }

    fn unexport(&self, pin: u32) -> Result<()> {
        write_attribute(
            PathBuf::from(format!("{GPIO_ROOT}/unexport")),
            &pin.to_string(),
        )?;
        Ok(())
    }

    fn set_direction(&self, pin: u32, direction: Direction) -> Result<()> {
        let token = match direction {
            Direction::In => "in",
            Direction::Out => "out",
        };
        write_attribute(gpio_path(pin, "direction"), token)?;
        Ok(())
    }

    fn read_value(&self, pin: u32) -> Result<Level> {
        match read_attribute(gpio_path(pin, "value"))?.as_str() {
            "0" => Ok(Level::Low),
            "1" => Ok(Level::High),
            other => Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("gpio{pin} value is {other:?}, expected '0' or '1'"),
            ))),
        }
    }

    fn write_value(&self, pin: u32, level: Level) -> Result<()> {
        write_attribute(gpio_path(pin, "value"), if level.is_high() { "1" } else { "0" })?;
        Ok(())
    }

    fn set_edge(&self, pin: u32, trigger: Option<Trigger>) -> Result<()> {
        let token = match trigger {
            None => "none",
            Some(Trigger::Rising) => "rising",
            Some(Trigger::Falling) => "falling",
            Some(Trigger::Both) => "both",
        };
        write_attribute(gpio_path(pin, "edge"), token)?;
        Ok(())
    }

    fn wait_edge(&self, pin: u32, trigger: Trigger, timeout: Option<Duration>) -> Result<bool> {
        self.set_edge(pin, Some(trigger))?;

        let mut file = fs::File::open(gpio_path(pin, "value"))?;

        // the current level counts as a pending priority event until read
        let mut scratch = [0u8; 8];
        let _ = file.read(&mut scratch);

        let poll_timeout = match timeout {
            Some(d) => {
                let ms = i32::try_from(d.as_millis()).unwrap_or(i32::MAX);
                PollTimeout::try_from(ms).map_err(|_| {
                    Error::OutOfRange(format!("edge timeout of {ms}ms is not pollable"))
                })?
            }
            None => PollTimeout::NONE,
        };

        let mut fds = [PollFd::new(
            file.as_fd(),
            PollFlags::POLLPRI | PollFlags::POLLERR,
        )];
        let events = poll(&mut fds, poll_timeout).map_err(io::Error::from)?;
        Ok(events > 0)
    }

    fn set_led(&self, led: Led, level: Level) -> Result<()> {
        write_attribute(
            PathBuf::from(format!("{LED_ROOT}/{}/brightness", led.sysfs_name())),
            if level.is_high() { "1" } else { "0" },
        )?;
        Ok(())
    }
}

fn pwm_path(chip: u32, channel: u32, attribute: &str) -> PathBuf {
    PathBuf::from(format!("{PWM_ROOT}/pwmchip{chip}/pwm{channel}/{attribute}"))
}

/// Hardware PWM control through `/sys/class/pwm`.
#[derive(Debug, Default)]
pub struct SysfsPwmBackend;

impl SysfsPwmBackend {
    pub fn new() -> Self {
        Self
    }
}

impl PwmBackend for SysfsPwmBackend {
    fn export(&self, chip: u32, channel: u32) -> Result<()> {
        write_attribute(
            PathBuf::from(format!("{PWM_ROOT}/pwmchip{chip}/export")),
            &channel.to_string(),
        )
        .map_err(|e| busy_or_io(e, format!("pwmchip{chip}/pwm{channel}")))
    }

    fn unexport(&self, chip: u32, channel: u32) -> Result<()> {
        write_attribute(
            PathBuf::from(format!("{PWM_ROOT}/pwmchip{chip}/unexport")),
            &channel.to_string(),
        )?;
        Ok(())
    }

    fn set_period_ns(&self, chip: u32, channel: u32, period_ns: u64) -> Result<()> {
        write_attribute(pwm_path(chip, channel, "period"), &period_ns.to_string())?;
        Ok(())
    }

    fn set_duty_cycle_ns(&self, chip: u32, channel: u32, duty_ns: u64) -> Result<()> {
        write_attribute(pwm_path(chip, channel, "duty_cycle"), &duty_ns.to_string())?;
        Ok(())
    }

    fn set_polarity(&self, chip: u32, channel: u32, inverted: bool) -> Result<()> {
        write_attribute(
            pwm_path(chip, channel, "polarity"),
            if inverted { "inversed" } else { "normal" },
        )?;
        Ok(())
    }

    fn set_enable(&self, chip: u32, channel: u32, enabled: bool) -> Result<()> {
        write_attribute(
            pwm_path(chip, channel, "enable"),
            if enabled { "1" } else { "0" },
        )?;
        Ok(())
    }
}
