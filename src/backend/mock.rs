//! In-memory control surface for tests.
//!
//! The mock keeps per-pin state, records every operation in order, and
//! lets tests inject input transitions that wake blocked edge waits. The
//! PWM mock rejects writes that would leave the duty cycle longer than
//! the period, the same way the kernel surface does.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::backend::{GpioBackend, PwmBackend};
use crate::error::{Error, Result};
use crate::pins::{Direction, Led, Level, Trigger};

fn poisoned<T>(e: PoisonError<T>) -> Error {
    Error::Io(io::Error::other(format!("lock poisoned: {e}")))
}

fn not_exported(what: String) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::NotFound, format!("{what} is not exported")))
}

/// Everything the GPIO surface was asked to do, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioOp {
    Export(u32),
    Unexport(u32),
    Direction(u32, Direction),
    Write(u32, Level),
    Edge(u32, Option<Trigger>),
    Led(Led, Level),
}

#[derive(Default)]
struct PinState {
    exported: bool,
    direction: Option<Direction>,
    level: Level,
    armed: Option<Trigger>,
    pending: VecDeque<Trigger>,
    busy: bool,
}

#[derive(Default)]
struct GpioInner {
    pins: HashMap<u32, PinState>,
    ops: Vec<GpioOp>,
    leds: HashMap<Led, Level>,
}

#[derive(Default)]
pub struct MockGpioBackend {
    inner: Mutex<GpioInner>,
    edge_wake: Condvar,
}

impl MockGpioBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, GpioInner>> {
        self.inner.lock().map_err(poisoned)
    }

    /// Marks a pin as held elsewhere: the next export fails with `Busy`
    /// until an unexport releases it.
    pub fn mark_busy(&self, pin: u32) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.pins.entry(pin).or_default().busy = true;
        }
    }

    /// Simulates an external transition on an input pin, waking any
    /// blocked edge waits if the level actually changed.
    pub fn drive_input(&self, pin: u32, level: Level) {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(_) => return,
        };
        let state = inner.pins.entry(pin).or_default();
        if state.level == level {
            return;
        }
        let kind = if level.is_high() { Trigger::Rising } else { Trigger::Falling };
        state.level = level;
        state.pending.push_back(kind);
        drop(inner);
        self.edge_wake.notify_all();
    }

    /// Ordered log of every operation the surface performed.
    pub fn ops(&self) -> Vec<GpioOp> {
        self.inner.lock().map(|inner| inner.ops.clone()).unwrap_or_default()
    }

    pub fn level(&self, pin: u32) -> Option<Level> {
        let inner = self.inner.lock().ok()?;
        inner.pins.get(&pin).filter(|p| p.exported).map(|p| p.level)
    }

    pub fn is_exported(&self, pin: u32) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.pins.get(&pin).is_some_and(|p| p.exported))
            .unwrap_or(false)
    }

    pub fn led_level(&self, led: Led) -> Option<Level> {
        self.inner.lock().ok()?.leds.get(&led).copied()
    }
}

impl GpioBackend for MockGpioBackend {
    fn export(&self, pin: u32) -> Result<()> {
        let mut inner = self.lock()?;
        inner.ops.push(GpioOp::Export(pin));
        let state = inner.pins.entry(pin).or_default();
        if state.busy || state.exported {
            return Err(Error::Busy(format!("gpio{pin}")));
        }
        state.exported = true;
        Ok(())
    }

    fn unexport(&self, pin: u32) -> Result<()> {
        let mut inner = self.lock()?;
        inner.ops.push(GpioOp::Unexport(pin));
        let state = inner
            .pins
            .get_mut(&pin)
            .ok_or_else(|| not_exported(format!("gpio{pin}")))?;
        if !state.exported && !state.busy {
            return Err(not_exported(format!("gpio{pin}")));
        }
        state.exported = false;
        state.busy = false;
        state.direction = None;
        state.armed = None;
        state.pending.clear();
        Ok(())
    }

    fn set_direction(&self, pin: u32, direction: Direction) -> Result<()> {
        let mut inner = self.lock()?;
        inner.ops.push(GpioOp::Direction(pin, direction));
        let state = inner
            .pins
            .get_mut(&pin)
            .filter(|p| p.exported)
            .ok_or_else(|| not_exported(format!("gpio{pin}")))?;
        state.direction = Some(direction);
        Ok(())
    }

    fn read_value(&self, pin: u32) -> Result<Level> {
        let inner = self.lock()?;
        inner
            .pins
            .get(&pin)
            .filter(|p| p.exported)
            .map(|p| p.level)
            .ok_or_else(|| not_exported(format!("gpio{pin}")))
    }

    fn write_value(&self, pin: u32, level: Level) -> Result<()> {
        let mut inner = self.lock()?;
        inner.ops.push(GpioOp::Write(pin, level));
        let state = inner
            .pins
            .get_mut(&pin)
            .filter(|p| p.exported)
            .ok_or_else(|| not_exported(format!("gpio{pin}")))?;
        if state.direction != Some(Direction::Out) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("gpio{pin} is not an output"),
            )));
        }
        state.level = level;
        Ok(())
    }

    fn set_edge(&self, pin: u32, trigger: Option<Trigger>) -> Result<()> {
        let mut inner = self.lock()?;
        inner.ops.push(GpioOp::Edge(pin, trigger));
        let state = inner
            .pins
            .get_mut(&pin)
            .filter(|p| p.exported)
            .ok_or_else(|| not_exported(format!("gpio{pin}")))?;
        // re-arming discards transitions seen before the caller watched
        if state.armed != trigger {
            state.pending.clear();
        }
        state.armed = trigger;
        Ok(())
    }

    fn wait_edge(&self, pin: u32, trigger: Trigger, timeout: Option<Duration>) -> Result<bool> {
        self.set_edge(pin, Some(trigger))?;

        let deadline = timeout.map(|d| Instant::now() + d);
        let mut inner = self.lock()?;
        loop {
            if let Some(state) = inner.pins.get_mut(&pin) {
                while let Some(kind) = state.pending.pop_front() {
                    if trigger.matches(kind) {
                        return Ok(true);
                    }
                }
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    let (guard, _) = self
                        .edge_wake
                        .wait_timeout(inner, deadline - now)
                        .map_err(poisoned)?;
                    inner = guard;
                }
                None => {
                    inner = self.edge_wake.wait(inner).map_err(poisoned)?;
                }
            }
        }
    }

    fn set_led(&self, led: Led, level: Level) -> Result<()> {
        let mut inner = self.lock()?;
        inner.ops.push(GpioOp::Led(led, level));
        inner.leds.insert(led, level);
        Ok(())
    }
}

/// Everything the PWM surface was asked to do, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PwmOp {
    Export(u32, u32),
    Unexport(u32, u32),
    Period(u32, u32, u64),
    Duty(u32, u32, u64),
    Polarity(u32, u32, bool),
    Enable(u32, u32, bool),
}

#[derive(Default)]
struct PwmChannelState {
    exported: bool,
    period_ns: u64,
    duty_ns: u64,
    inverted: bool,
    enabled: bool,
    busy: bool,
}

#[derive(Default)]
struct PwmInner {
    channels: HashMap<(u32, u32), PwmChannelState>,
    ops: Vec<PwmOp>,
}

#[derive(Default)]
pub struct MockPwmBackend {
    inner: Mutex<PwmInner>,
}

impl MockPwmBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, PwmInner>> {
        self.inner.lock().map_err(poisoned)
    }

    fn channel_mut<'a>(
        inner: &'a mut PwmInner,
        chip: u32,
        channel: u32,
    ) -> Result<&'a mut PwmChannelState> {
        inner
            .channels
            .get_mut(&(chip, channel))
            .filter(|c| c.exported)
            .ok_or_else(|| not_exported(format!("pwmchip{chip}/pwm{channel}")))
    }

    /// Marks a channel as held elsewhere until the next unexport.
    pub fn mark_busy(&self, chip: u32, channel: u32) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.channels.entry((chip, channel)).or_default().busy = true;
        }
    }

    /// Ordered log of every operation the surface performed.
    pub fn ops(&self) -> Vec<PwmOp> {
        self.inner.lock().map(|inner| inner.ops.clone()).unwrap_or_default()
    }

    pub fn period_ns(&self, chip: u32, channel: u32) -> Option<u64> {
        let inner = self.inner.lock().ok()?;
        inner.channels.get(&(chip, channel)).map(|c| c.period_ns)
    }

    pub fn duty_ns(&self, chip: u32, channel: u32) -> Option<u64> {
        let inner = self.inner.lock().ok()?;
        inner.channels.get(&(chip, channel)).map(|c| c.duty_ns)
    }

    pub fn is_enabled(&self, chip: u32, channel: u32) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.channels.get(&(chip, channel)).is_some_and(|c| c.enabled))
            .unwrap_or(false)
    }

    pub fn is_exported(&self, chip: u32, channel: u32) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.channels.get(&(chip, channel)).is_some_and(|c| c.exported))
            .unwrap_or(false)
    }
}

impl PwmBackend for MockPwmBackend {
    fn export(&self, chip: u32, channel: u32) -> Result<()> {
        let mut inner = self.lock()?;
        inner.ops.push(PwmOp::Export(chip, channel));
        let state = inner.channels.entry((chip, channel)).or_default();
        if state.busy || state.exported {
            return Err(Error::Busy(format!("pwmchip{chip}/pwm{channel}")));
        }
        state.exported = true;
        Ok(())
    }

    fn unexport(&self, chip: u32, channel: u32) -> Result<()> {
        let mut inner = self.lock()?;
        inner.ops.push(PwmOp::Unexport(chip, channel));
        let state = inner
            .channels
            .get_mut(&(chip, channel))
            .ok_or_else(|| not_exported(format!("pwmchip{chip}/pwm{channel}")))?;
        if !state.exported && !state.busy {
            return Err(not_exported(format!("pwmchip{chip}/pwm{channel}")));
        }
        *state = PwmChannelState::default();
        Ok(())
    }

    fn set_period_ns(&self, chip: u32, channel: u32, period_ns: u64) -> Result<()> {
        let mut inner = self.lock()?;
        inner.ops.push(PwmOp::Period(chip, channel, period_ns));
        let state = Self::channel_mut(&mut inner, chip, channel)?;
        if state.duty_ns > period_ns {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "period of {period_ns}ns is shorter than the {}ns duty cycle",
                    state.duty_ns
                ),
            )));
        }
        state.period_ns = period_ns;
        Ok(())
    }

    fn set_duty_cycle_ns(&self, chip: u32, channel: u32, duty_ns: u64) -> Result<()> {
        let mut inner = self.lock()?;
        inner.ops.push(PwmOp::Duty(chip, channel, duty_ns));
        let state = Self::channel_mut(&mut inner, chip, channel)?;
        if duty_ns > state.period_ns {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "duty cycle of {duty_ns}ns is longer than the {}ns period",
                    state.period_ns
                ),
            )));
        }
        state.duty_ns = duty_ns;
        Ok(())
    }

    fn set_polarity(&self, chip: u32, channel: u32, inverted: bool) -> Result<()> {
        let mut inner = self.lock()?;
        inner.ops.push(PwmOp::Polarity(chip, channel, inverted));
        let state = Self::channel_mut(&mut inner, chip, channel)?;
        if state.enabled {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "polarity cannot change while the channel is enabled",
            )));
        }
        state.inverted = inverted;
        Ok(())
    }

    fn set_enable(&self, chip: u32, channel: u32, enabled: bool) -> Result<()> {
        let mut inner = self.lock()?;
        inner.ops.push(PwmOp::Enable(chip, channel, enabled));
        let state = Self::channel_mut(&mut inner, chip, channel)?;
        state.enabled = enabled;
        Ok(())
    }
}
