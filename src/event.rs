//! Edge detection engine and callback dispatch.
//!
//! Every watched pin gets one background watcher thread that repeats a
//! short bounded edge wait, checking its cancel flag in between, so
//! removal joins promptly. Qualifying edges set the pin's latch and, when
//! callbacks are registered, enqueue a job for the dispatcher: a single
//! worker thread that runs every callback across all pins strictly in
//! arrival order. A slow callback therefore delays all later callbacks;
//! callbacks for one pin never overlap and run in registration order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::warn;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::backend::GpioBackend;
use crate::error::{Error, Result};
use crate::pins::Trigger;

/// Handler invoked with the logical channel an edge occurred on.
pub type EdgeCallback = Arc<dyn Fn(u32) + Send + Sync>;

const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(10);

struct DispatchJob {
    channel: u32,
    callbacks: Arc<Mutex<Vec<EdgeCallback>>>,
}

struct Dispatcher {
    queue: Option<Sender<DispatchJob>>,
    worker: Option<JoinHandle<()>>,
}

impl Dispatcher {
    fn spawn() -> (Self, Sender<DispatchJob>) {
        let (queue, jobs) = mpsc::channel::<DispatchJob>();
        let worker = thread::spawn(move || {
            for job in jobs {
                // snapshot outside the callback run so a handler may
                // register further callbacks without deadlocking
                let callbacks: Vec<EdgeCallback> = job.callbacks.lock().clone();
                for callback in callbacks {
                    callback(job.channel);
                }
            }
        });
        let sender = queue.clone();
        let dispatcher = Self {
            queue: Some(queue),
            worker: Some(worker),
        };
        (dispatcher, sender)
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.queue.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

struct Watch {
    latch: Arc<AtomicBool>,
    callbacks: Arc<Mutex<Vec<EdgeCallback>>>,
    // recorded registration hint; debounce itself is not implemented
    #[allow(dead_code)]
    bounce: Option<Duration>,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Watch {
    fn stop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        // queued jobs that still reference this pin find nothing to run
        self.callbacks.lock().clear();
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        self.stop();
    }
}

pub(crate) struct EventEngine<B> {
    backend: Arc<B>,
    // drops before the dispatcher so every watcher's queue handle is gone
    // by the time the worker drains
    watches: Mutex<FxHashMap<u32, Watch>>,
    dispatcher: Mutex<Option<Dispatcher>>,
}

impl<B: GpioBackend + 'static> EventEngine<B> {
    pub(crate) fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            watches: Mutex::new(FxHashMap::default()),
            dispatcher: Mutex::new(None),
        }
    }

    fn dispatch_queue(&self) -> Sender<DispatchJob> {
        let mut slot = self.dispatcher.lock();
        if let Some(sender) = slot.as_ref().and_then(|d| d.queue.clone()) {
            return sender;
        }
        let (dispatcher, sender) = Dispatcher::spawn();
        *slot = Some(dispatcher);
        sender
    }

    pub(crate) fn add_watch(
        &self,
        channel: u32,
        pin: u32,
        trigger: Trigger,
        callback: Option<EdgeCallback>,
        bounce: Option<Duration>,
    ) -> Result<()> {
        let mut watches = self.watches.lock();
        if watches.contains_key(&pin) {
            return Err(Error::AlreadyWatching(channel));
        }

        // arm before the watcher starts so an edge arriving between
        // registration and the first wait is not lost
        self.backend.set_edge(pin, Some(trigger))?;

        let latch = Arc::new(AtomicBool::new(false));
        let callbacks = Arc::new(Mutex::new(callback.into_iter().collect::<Vec<_>>()));
        let cancel = Arc::new(AtomicBool::new(false));
        let queue = self.dispatch_queue();

        let worker = {
            let backend = Arc::clone(&self.backend);
            let latch = Arc::clone(&latch);
            let callbacks = Arc::clone(&callbacks);
            let cancel = Arc::clone(&cancel);
            thread::spawn(move || {
                while !cancel.load(Ordering::Relaxed) {
                    match backend.wait_edge(pin, trigger, Some(WATCH_POLL_INTERVAL)) {
                        Ok(true) => {
                            if cancel.load(Ordering::Relaxed) {
                                break;
                            }
                            latch.store(true, Ordering::SeqCst);
                            if !callbacks.lock().is_empty() {
                                let _ = queue.send(DispatchJob {
                                    channel,
                                    callbacks: Arc::clone(&callbacks),
                                });
                            }
                        }
                        Ok(false) => continue,
                        Err(e) => {
                            warn!("edge wait failed on gpio{pin}: {e}");
                            thread::yield_now();
                        }
                    }
                }
            })
        };

        watches.insert(
            pin,
            Watch {
                latch,
                callbacks,
                bounce,
                cancel,
                worker: Some(worker),
            },
        );
        Ok(())
    }

    pub(crate) fn add_callback(
        &self,
        channel: u32,
        pin: u32,
        callback: EdgeCallback,
    ) -> Result<()> {
        let watches = self.watches.lock();
        let watch = watches.get(&pin).ok_or(Error::NotWatching(channel))?;
        watch.callbacks.lock().push(callback);
        Ok(())
    }

    /// Atomically reads and clears the pin's edge latch.
    pub(crate) fn take_detected(&self, pin: u32) -> bool {
        self.watches
            .lock()
            .get(&pin)
            .map(|watch| watch.latch.swap(false, Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Stops and joins the pin's watcher. Returns whether one existed.
    pub(crate) fn remove_watch(&self, pin: u32) -> bool {
        let watch = self.watches.lock().remove(&pin);
        match watch {
            Some(mut watch) => {
                watch.stop();
                if let Err(e) = self.backend.set_edge(pin, None) {
                    warn!("failed to disarm edge notification on gpio{pin}: {e}");
                }
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    fn watch_bounce(&self, pin: u32) -> Option<Duration> {
        self.watches.lock().get(&pin).and_then(|watch| watch.bounce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockGpioBackend;
    use crate::pins::{Direction, Level};

    fn watched_backend(pin: u32) -> Arc<MockGpioBackend> {
        let backend = Arc::new(MockGpioBackend::new());
        backend.export(pin).unwrap();
        backend.set_direction(pin, Direction::In).unwrap();
        backend
    }

    #[test]
    fn watch_records_the_bounce_hint() {
        let backend = watched_backend(7);
        let engine = EventEngine::new(Arc::clone(&backend));
        engine
            .add_watch(12, 7, Trigger::Rising, None, Some(Duration::from_millis(200)))
            .unwrap();
        assert_eq!(engine.watch_bounce(7), Some(Duration::from_millis(200)));
        assert!(engine.remove_watch(7));
    }

    #[test]
    fn double_watch_is_rejected() {
        let backend = watched_backend(7);
        let engine = EventEngine::new(Arc::clone(&backend));
        engine.add_watch(12, 7, Trigger::Both, None, None).unwrap();
        assert!(matches!(
            engine.add_watch(12, 7, Trigger::Both, None, None),
            Err(Error::AlreadyWatching(12))
        ));
    }

    #[test]
    fn latch_reads_clear() {
        let backend = watched_backend(7);
        let engine = EventEngine::new(Arc::clone(&backend));
        engine.add_watch(12, 7, Trigger::Rising, None, None).unwrap();

        backend.drive_input(7, Level::High);
        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while !engine.take_detected(7) {
            assert!(std::time::Instant::now() < deadline, "edge never latched");
            thread::sleep(Duration::from_millis(1));
        }
        // a second poll without a new edge reads false
        assert!(!engine.take_detected(7));
    }

    #[test]
    fn remove_watch_is_idempotent() {
        let backend = watched_backend(7);
        let engine = EventEngine::new(Arc::clone(&backend));
        engine.add_watch(12, 7, Trigger::Both, None, None).unwrap();
        assert!(engine.remove_watch(7));
        assert!(!engine.remove_watch(7));
    }
}
