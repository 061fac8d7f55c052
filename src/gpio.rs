use std::sync::Arc;
use std::time::Duration;

use log::warn;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::backend::GpioBackend;
use crate::error::{Error, Result};
use crate::event::{EdgeCallback, EventEngine};
use crate::pins::{self, Direction, Led, Level, Mode, PinMapping, PullUpDown, Trigger};

/// Optional parameters for [`GpioManager::setup`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SetupOptions {
    /// Initial level written after configuring an output channel.
    pub initial: Option<Level>,
    /// Pull resistor hint. Validated and acknowledged with an advisory
    /// warning; no electrical configuration is attempted.
    pub pull_up_down: Option<PullUpDown>,
}

#[derive(Debug, Clone, Copy)]
struct ExportedPin {
    pin: u32,
    direction: Direction,
}

#[derive(Default)]
struct ManagerState {
    mode: Option<Mode>,
    custom: Option<Box<dyn PinMapping>>,
    exports: FxHashMap<u32, ExportedPin>,
    warnings: bool,
}

impl ManagerState {
    fn resolve(&self, channel: u32) -> Result<u32> {
        let mode = self.mode.ok_or(Error::ModeNotSet)?;
        pins::resolve(mode, self.custom.as_deref(), channel)
    }

    fn require(&self, channel: u32, expected: Option<Direction>) -> Result<ExportedPin> {
        let record = self
            .exports
            .get(&channel)
            .ok_or(Error::NotConfigured(channel))?;
        if let Some(direction) = expected {
            if record.direction != direction {
                return Err(Error::WrongDirection {
                    channel,
                    configured: record.direction,
                });
            }
        }
        Ok(*record)
    }
}

/// Owns the numbering mode, the ledger of exported channels, and the
/// edge detection engine for one control surface.
///
/// All state lives in the manager rather than in process globals, so
/// independent managers (say, one per test) never interfere.
pub struct GpioManager<B: GpioBackend + 'static> {
    backend: Arc<B>,
    engine: EventEngine<B>,
    state: RwLock<ManagerState>,
}

impl<B: GpioBackend + 'static> GpioManager<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            engine: EventEngine::new(Arc::clone(&backend)),
            backend,
            state: RwLock::new(ManagerState {
                warnings: true,
                ..ManagerState::default()
            }),
        }
    }

    /// The active numbering mode, if one has been set.
    pub fn mode(&self) -> Option<Mode> {
        self.state.read().mode
    }

    /// Selects one of the built-in numbering modes. The mode can be set
    /// once and is cleared by [`cleanup_all`](Self::cleanup_all); use
    /// [`set_custom_mapping`](Self::set_custom_mapping) for caller
    /// supplied tables.
    pub fn set_mode(&self, mode: Mode) -> Result<()> {
        if mode == Mode::Custom {
            return Err(Error::OutOfRange(
                "custom numbering mode requires a mapping, use set_custom_mapping".to_string(),
            ));
        }
        let mut state = self.state.write();
        if state.mode.is_some() {
            return Err(Error::ModeAlreadySet);
        }
        state.mode = Some(mode);
        Ok(())
    }

    /// Installs a caller-supplied channel-to-pin table and selects
    /// [`Mode::Custom`].
    pub fn set_custom_mapping(&self, mapping: impl PinMapping + 'static) -> Result<()> {
        let mut state = self.state.write();
        if state.mode.is_some() {
            return Err(Error::ModeAlreadySet);
        }
        state.custom = Some(Box::new(mapping));
        state.mode = Some(Mode::Custom);
        Ok(())
    }

    /// Toggles advisory warnings for non-fatal conditions (busy-resource
    /// recovery, unimplemented pull resistors and debounce).
    pub fn set_warnings(&self, enabled: bool) {
        self.state.write().warnings = enabled;
    }

    /// Configures a channel for input or output.
    ///
    /// An exported pin held by someone else is recovered once: the pin is
    /// unexported and re-exported, with an advisory warning.
    pub fn setup(&self, channel: u32, direction: Direction, options: SetupOptions) -> Result<()> {
        let mut state = self.state.write();
        if state.mode.is_none() {
            return Err(Error::ModeNotSet);
        }
        if state.exports.contains_key(&channel) {
            return Err(Error::AlreadyConfigured(channel));
        }
        if let Some(pull) = options.pull_up_down {
            if state.warnings {
                warn!(
                    "pull resistor hint {pull:?} on channel {channel} is not implemented, \
                     continuing without it"
                );
            }
        }

        let pin = state.resolve(channel)?;
        match self.backend.export(pin) {
            Ok(()) => {}
            Err(Error::Busy(resource)) => {
                if state.warnings {
                    warn!("channel {channel} ({resource}) is already in use, re-exporting");
                }
                self.backend.unexport(pin)?;
                self.backend.export(pin)?;
            }
            Err(e) => return Err(e),
        }
        self.backend.set_direction(pin, direction)?;
        state.exports.insert(channel, ExportedPin { pin, direction });

        if direction == Direction::Out {
            if let Some(initial) = options.initial {
                self.backend.write_value(pin, initial)?;
            }
        }
        Ok(())
    }

    /// Configures several channels the same way, stopping at the first
    /// failure. Channels configured before the failure stay configured.
    pub fn setup_channels(
        &self,
        channels: &[u32],
        direction: Direction,
        options: SetupOptions,
    ) -> Result<()> {
        for &channel in channels {
            self.setup(channel, direction, options)?;
        }
        Ok(())
    }

    /// Reads the level of a configured channel. Output channels may be
    /// read back as well.
    pub fn read_value(&self, channel: u32) -> Result<Level> {
        let record = self.state.read().require(channel, None)?;
        self.backend.read_value(record.pin)
    }

    /// Sets the level of an output channel.
    pub fn write_value(&self, channel: u32, level: Level) -> Result<()> {
        let record = self.state.read().require(channel, Some(Direction::Out))?;
        self.backend.write_value(record.pin, level)
    }

    /// Writes one level to every listed channel, stopping at the first
    /// failure.
    pub fn write_all(&self, channels: &[u32], level: Level) -> Result<()> {
        for &channel in channels {
            self.write_value(channel, level)?;
        }
        Ok(())
    }

    /// Writes per-channel levels. The lists must have the same length;
    /// nothing is written otherwise.
    pub fn write_each(&self, channels: &[u32], levels: &[Level]) -> Result<()> {
        if channels.len() != levels.len() {
            return Err(Error::LengthMismatch);
        }
        for (&channel, &level) in channels.iter().zip(levels) {
            self.write_value(channel, level)?;
        }
        Ok(())
    }

    /// Sets an onboard LED. LEDs need no setup; this is a direct pass
    /// through to the control surface.
    pub fn set_led(&self, led: Led, level: Level) -> Result<()> {
        self.backend.set_led(led, level)
    }

    /// Sets every listed LED to one level, stopping at the first failure.
    pub fn set_leds(&self, leds: &[Led], level: Level) -> Result<()> {
        for &led in leds {
            self.set_led(led, level)?;
        }
        Ok(())
    }

    /// Sets per-LED levels. The lists must have the same length; nothing
    /// is written otherwise.
    pub fn set_led_each(&self, leds: &[Led], levels: &[Level]) -> Result<()> {
        if leds.len() != levels.len() {
            return Err(Error::LengthMismatch);
        }
        for (&led, &level) in leds.iter().zip(levels) {
            self.set_led(led, level)?;
        }
        Ok(())
    }

    /// Blocks the calling thread until a qualifying edge occurs on an
    /// input channel or `timeout` elapses. `None` waits indefinitely.
    /// Returns the channel on an edge and `None` on timeout.
    pub fn wait_for_edge(
        &self,
        channel: u32,
        trigger: Trigger,
        timeout: Option<Duration>,
    ) -> Result<Option<u32>> {
        let record = self.state.read().require(channel, Some(Direction::In))?;
        if self.backend.wait_edge(record.pin, trigger, timeout)? {
            Ok(Some(channel))
        } else {
            Ok(None)
        }
    }

    /// Starts background edge detection on an input channel, optionally
    /// with an initial callback. Edges are observable through
    /// [`event_detected`](Self::event_detected) and through callbacks.
    ///
    /// The bounce interval is recorded and acknowledged with an advisory
    /// warning; switch debounce is not implemented and duplicate edges
    /// are not suppressed.
    pub fn add_event_detect(
        &self,
        channel: u32,
        trigger: Trigger,
        callback: Option<EdgeCallback>,
        bounce: Option<Duration>,
    ) -> Result<()> {
        let record = {
            let state = self.state.read();
            let record = state.require(channel, Some(Direction::In))?;
            self.warn_bounce(&state, channel, bounce);
            record
        };
        self.engine
            .add_watch(channel, record.pin, trigger, callback, bounce)
    }

    /// Appends a callback to a channel that already has edge detection.
    /// Callbacks run on the dispatcher thread in registration order.
    pub fn add_event_callback(
        &self,
        channel: u32,
        callback: EdgeCallback,
        bounce: Option<Duration>,
    ) -> Result<()> {
        let record = {
            let state = self.state.read();
            let record = state.require(channel, Some(Direction::In))?;
            self.warn_bounce(&state, channel, bounce);
            record
        };
        self.engine.add_callback(channel, record.pin, callback)
    }

    /// Reports whether an edge occurred on the channel since the last
    /// call, clearing the latch. Safe to call while the watcher runs.
    pub fn event_detected(&self, channel: u32) -> Result<bool> {
        let record = self.state.read().require(channel, Some(Direction::In))?;
        Ok(self.engine.take_detected(record.pin))
    }

    /// Stops edge detection on the channel, joining its watcher before
    /// returning. Calling this on a channel without detection is fine.
    pub fn remove_event_detect(&self, channel: u32) -> Result<()> {
        let record = self.state.read().require(channel, Some(Direction::In))?;
        self.engine.remove_watch(record.pin);
        Ok(())
    }

    /// Releases a channel: stops any edge watch, unexports the pin, and
    /// removes the ledger entry.
    pub fn cleanup(&self, channel: u32) -> Result<()> {
        let mut state = self.state.write();
        let record = state.require(channel, None)?;
        self.engine.remove_watch(record.pin);
        self.backend.unexport(record.pin)?;
        state.exports.remove(&channel);
        Ok(())
    }

    /// Releases several channels, stopping at the first failure.
    pub fn cleanup_channels(&self, channels: &[u32]) -> Result<()> {
        for &channel in channels {
            self.cleanup(channel)?;
        }
        Ok(())
    }

    /// Releases every configured channel, then clears the numbering mode
    /// and re-enables advisory warnings. Teardown continues past
    /// failures; the first error is reported once everything has been
    /// attempted.
    pub fn cleanup_all(&self) -> Result<()> {
        let channels: Vec<u32> = self.state.read().exports.keys().copied().collect();
        let mut first_error = None;
        for channel in channels {
            if let Err(e) = self.cleanup(channel) {
                warn!("cleanup of channel {channel} failed: {e}");
                first_error.get_or_insert(e);
            }
        }

        let mut state = self.state.write();
        state.mode = None;
        state.custom = None;
        state.warnings = true;

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn warn_bounce(&self, state: &ManagerState, channel: u32, bounce: Option<Duration>) {
        if let Some(bounce) = bounce {
            if state.warnings {
                warn!(
                    "bounce interval of {}ms recorded on channel {channel}, but switch \
                     debounce is not implemented and duplicate edges are not suppressed",
                    bounce.as_millis()
                );
            }
        }
    }
}
