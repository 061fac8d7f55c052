//! Hardware PWM channel control.
//!
//! The control surface enforces `period >= duty_cycle` on every write,
//! so frequency changes order the two writes to keep the invariant at
//! each intermediate step: growing the period writes the period first,
//! shrinking it writes the duty cycle first.

use std::sync::Arc;

use log::warn;

use crate::backend::PwmBackend;
use crate::error::{Error, Result};

const NANOS_PER_SEC: f64 = 1e9;

/// One exported hardware PWM channel.
///
/// Construction exports the channel (recovering once from a busy
/// resource), sets its polarity, enables it, and programs the initial
/// period. The signal itself starts once [`start`](Self::start) writes
/// the duty cycle.
///
/// A `Pwm` instance is meant for single-threaded use; it does not guard
/// its own state against concurrent mutation.
pub struct Pwm<B: PwmBackend> {
    backend: Arc<B>,
    chip: u32,
    channel: u32,
    frequency: f64,
    duty_cycle_percent: f64,
    inverted: bool,
    closed: bool,
}

impl<B: PwmBackend> Pwm<B> {
    pub fn new(
        backend: Arc<B>,
        chip: u32,
        channel: u32,
        frequency_hz: f64,
        duty_cycle_percent: f64,
        inverted: bool,
    ) -> Result<Self> {
        check_duty_cycle(duty_cycle_percent)?;
        check_frequency(frequency_hz)?;

        match backend.export(chip, channel) {
            Ok(()) => {}
            Err(Error::Busy(resource)) => {
                warn!("{resource} is already in use, re-exporting");
                backend.unexport(chip, channel)?;
                backend.export(chip, channel)?;
            }
            Err(e) => return Err(e),
        }

        let pwm = Self {
            backend,
            chip,
            channel,
            frequency: frequency_hz,
            duty_cycle_percent,
            inverted,
            closed: false,
        };

        // a previous export can leave a stale duty cycle behind that a
        // shorter initial period would collide with
        pwm.backend.set_duty_cycle_ns(chip, channel, 0)?;
        pwm.backend.set_polarity(chip, channel, inverted)?;
        pwm.backend.set_enable(chip, channel, true)?;
        pwm.backend.set_period_ns(chip, channel, pwm.period_ns())?;
        Ok(pwm)
    }

    /// The configured frequency in hertz.
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// The configured duty cycle percentage.
    pub fn duty_cycle(&self) -> f64 {
        self.duty_cycle_percent
    }

    pub fn is_inverted(&self) -> bool {
        self.inverted
    }

    fn period_ns(&self) -> u64 {
        (NANOS_PER_SEC / self.frequency).round() as u64
    }

    fn duty_ns(&self, period_ns: u64) -> u64 {
        (period_ns as f64 * self.duty_cycle_percent / 100.0).round() as u64
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed { Err(Error::Closed) } else { Ok(()) }
    }

    /// Begins signal generation by writing the configured duty cycle.
    pub fn start(&self) -> Result<()> {
        self.ensure_open()?;
        self.backend
            .set_duty_cycle_ns(self.chip, self.channel, self.duty_ns(self.period_ns()))
    }

    /// Stops the signal by writing a zero duty cycle. The channel stays
    /// enabled and exported.
    pub fn stop(&self) -> Result<()> {
        self.ensure_open()?;
        self.backend.set_duty_cycle_ns(self.chip, self.channel, 0)
    }

    /// Changes the duty cycle percentage and rewrites the duty cycle
    /// length against the current period.
    pub fn set_duty_cycle(&mut self, percent: f64) -> Result<()> {
        self.ensure_open()?;
        check_duty_cycle(percent)?;
        let duty = (self.period_ns() as f64 * percent / 100.0).round() as u64;
        self.backend.set_duty_cycle_ns(self.chip, self.channel, duty)?;
        self.duty_cycle_percent = percent;
        Ok(())
    }

    /// Changes the frequency, rescaling the duty cycle length to keep
    /// the configured percentage.
    pub fn change_frequency(&mut self, frequency_hz: f64) -> Result<()> {
        self.ensure_open()?;
        check_frequency(frequency_hz)?;

        let old_period = self.period_ns();
        let new_period = (NANOS_PER_SEC / frequency_hz).round() as u64;
        let new_duty = self.duty_ns(new_period);

        if new_period > old_period {
            self.backend.set_period_ns(self.chip, self.channel, new_period)?;
            self.backend.set_duty_cycle_ns(self.chip, self.channel, new_duty)?;
        } else {
            self.backend.set_duty_cycle_ns(self.chip, self.channel, new_duty)?;
            self.backend.set_period_ns(self.chip, self.channel, new_period)?;
        }

        self.frequency = frequency_hz;
        Ok(())
    }

    /// Inverts the signal polarity. The channel is disabled around the
    /// polarity write, since the control surface refuses to change the
    /// polarity of an active channel.
    pub fn invert_polarity(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.backend.set_enable(self.chip, self.channel, false)?;
        self.inverted = !self.inverted;
        self.backend
            .set_polarity(self.chip, self.channel, self.inverted)?;
        self.backend.set_enable(self.chip, self.channel, true)
    }

    /// Unexports the channel. Every call after this fails with
    /// [`Error::Closed`].
    pub fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.closed = true;
        self.backend.unexport(self.chip, self.channel)
    }
}

impl<B: PwmBackend> Drop for Pwm<B> {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.backend.set_enable(self.chip, self.channel, false);
            let _ = self.backend.unexport(self.chip, self.channel);
        }
    }
}

fn check_duty_cycle(percent: f64) -> Result<()> {
    if !(0.0..=100.0).contains(&percent) {
        return Err(Error::OutOfRange(format!(
            "duty cycle of {percent}% is outside 0..=100"
        )));
    }
    Ok(())
}

fn check_frequency(frequency_hz: f64) -> Result<()> {
    if !frequency_hz.is_finite() || frequency_hz <= 0.0 {
        return Err(Error::OutOfRange(format!(
            "frequency of {frequency_hz}Hz must be positive"
        )));
    }
    Ok(())
}
