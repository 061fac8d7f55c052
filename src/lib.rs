//! Filesystem-based GPIO, PWM and LED control for single board
//! computers.

pub mod backend;
mod error;
mod event;
mod gpio;
mod pins;
mod pwm;

pub use backend::{GpioBackend, GpioOp, MockGpioBackend, MockPwmBackend, PwmBackend, PwmOp};
pub use error::{Error, Result};
pub use event::EdgeCallback;
pub use gpio::{GpioManager, SetupOptions};
pub use pins::{
    Direction, Led, Level, Mode, PinMapping, PullUpDown, Trigger, load_mapping, sunxi_pin,
};
pub use pwm::Pwm;

#[cfg(feature = "sysfs-gpio")]
pub use backend::{SysfsGpioBackend, SysfsPwmBackend};
