#[cfg(feature = "sysfs-gpio")]
pub mod sysfs;

pub mod mock;

#[cfg(feature = "sysfs-gpio")]
pub use sysfs::{SysfsGpioBackend, SysfsPwmBackend};

pub use mock::{GpioOp, MockGpioBackend, MockPwmBackend, PwmOp};

use std::time::Duration;

use crate::error::Result;
use crate::pins::{Direction, Led, Level, Trigger};

/// The filesystem-attribute control surface for GPIO pins and LEDs.
///
/// Exporting a pin that is held elsewhere fails with `Error::Busy`;
/// touching a pin the surface does not know propagates the underlying
/// I/O error.
pub trait GpioBackend: Send + Sync {
    fn export(&self, pin: u32) -> Result<()>;
    fn unexport(&self, pin: u32) -> Result<()>;
    fn set_direction(&self, pin: u32, direction: Direction) -> Result<()>;
    fn read_value(&self, pin: u32) -> Result<Level>;
    fn write_value(&self, pin: u32, level: Level) -> Result<()>;
    /// Arms or disarms the pin's edge notification attribute.
    fn set_edge(&self, pin: u32, trigger: Option<Trigger>) -> Result<()>;
    /// Arms the pin for `trigger` and blocks the calling thread until a
    /// qualifying edge occurs or `timeout` elapses. `None` waits forever.
    /// Returns `true` if an edge was seen, `false` on timeout.
    fn wait_edge(&self, pin: u32, trigger: Trigger, timeout: Option<Duration>) -> Result<bool>;
    fn set_led(&self, led: Led, level: Level) -> Result<()>;
}

/// The filesystem-attribute control surface for one hardware PWM chip.
///
/// The surface rejects any write that would leave the duty cycle length
/// greater than the period, so callers must order period and duty cycle
/// writes accordingly.
pub trait PwmBackend: Send + Sync {
    fn export(&self, chip: u32, channel: u32) -> Result<()>;
    fn unexport(&self, chip: u32, channel: u32) -> Result<()>;
    fn set_period_ns(&self, chip: u32, channel: u32, period_ns: u64) -> Result<()>;
    fn set_duty_cycle_ns(&self, chip: u32, channel: u32, duty_ns: u64) -> Result<()>;
    fn set_polarity(&self, chip: u32, channel: u32, inverted: bool) -> Result<()>;
    fn set_enable(&self, chip: u32, channel: u32, enabled: bool) -> Result<()>;
}
