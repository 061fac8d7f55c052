use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use sysgpio::backend::MockGpioBackend;
use sysgpio::{Direction, EdgeCallback, Error, GpioManager, Level, Mode, SetupOptions, Trigger};

// board channel 11 -> PA01, channel 12 -> PA07
const BUTTON: u32 = 11;
const BUTTON_PIN: u32 = 1;
const SECOND: u32 = 12;

fn manager() -> (Arc<MockGpioBackend>, GpioManager<MockGpioBackend>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let backend = Arc::new(MockGpioBackend::new());
    let manager = GpioManager::new(Arc::clone(&backend));
    manager.set_mode(Mode::Board).unwrap();
    (backend, manager)
}

fn input_manager() -> (Arc<MockGpioBackend>, GpioManager<MockGpioBackend>) {
    let (backend, manager) = manager();
    manager
        .setup(BUTTON, Direction::In, SetupOptions::default())
        .unwrap();
    (backend, manager)
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "condition never became true");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn zero_timeout_wait_returns_immediately() {
    let (_backend, gpio) = input_manager();
    let result = gpio
        .wait_for_edge(BUTTON, Trigger::Rising, Some(Duration::ZERO))
        .unwrap();
    assert_eq!(result, None);
}

#[test]
fn wait_for_edge_returns_the_channel_on_an_edge() {
    let (backend, gpio) = input_manager();

    let driver = {
        let backend = Arc::clone(&backend);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            backend.drive_input(BUTTON_PIN, Level::High);
        })
    };

    let result = gpio
        .wait_for_edge(BUTTON, Trigger::Rising, Some(Duration::from_secs(2)))
        .unwrap();
    assert_eq!(result, Some(BUTTON));
    driver.join().unwrap();
}

#[test]
fn wait_for_edge_needs_an_input_channel() {
    let (_backend, gpio) = manager();
    assert!(matches!(
        gpio.wait_for_edge(BUTTON, Trigger::Both, Some(Duration::ZERO)),
        Err(Error::NotConfigured(BUTTON))
    ));

    gpio.setup(SECOND, Direction::Out, SetupOptions::default()).unwrap();
    assert!(matches!(
        gpio.wait_for_edge(SECOND, Trigger::Both, Some(Duration::ZERO)),
        Err(Error::WrongDirection { .. })
    ));
}

#[test]
fn event_detected_reads_and_clears_once_per_edge() {
    let (backend, gpio) = input_manager();
    gpio.add_event_detect(BUTTON, Trigger::Rising, None, None).unwrap();

    assert!(!gpio.event_detected(BUTTON).unwrap());

    backend.drive_input(BUTTON_PIN, Level::High);
    wait_until(|| gpio.event_detected(BUTTON).unwrap());
    assert!(!gpio.event_detected(BUTTON).unwrap());

    backend.drive_input(BUTTON_PIN, Level::Low);
    backend.drive_input(BUTTON_PIN, Level::High);
    wait_until(|| gpio.event_detected(BUTTON).unwrap());
    assert!(!gpio.event_detected(BUTTON).unwrap());
}

#[test]
fn non_matching_edges_are_not_latched() {
    let (backend, gpio) = input_manager();
    gpio.add_event_detect(BUTTON, Trigger::Falling, None, None).unwrap();

    backend.drive_input(BUTTON_PIN, Level::High);
    thread::sleep(Duration::from_millis(50));
    assert!(!gpio.event_detected(BUTTON).unwrap());

    backend.drive_input(BUTTON_PIN, Level::Low);
    wait_until(|| gpio.event_detected(BUTTON).unwrap());
}

#[test]
fn double_event_detect_is_rejected() {
    let (_backend, gpio) = input_manager();
    gpio.add_event_detect(BUTTON, Trigger::Both, None, None).unwrap();
    assert!(matches!(
        gpio.add_event_detect(BUTTON, Trigger::Both, None, None),
        Err(Error::AlreadyWatching(BUTTON))
    ));
}

#[test]
fn event_callback_requires_active_detection() {
    let (_backend, gpio) = input_manager();
    let result = gpio.add_event_callback(BUTTON, Arc::new(|_| {}), None);
    assert!(matches!(result, Err(Error::NotWatching(BUTTON))));
}

#[test]
fn callbacks_run_in_registration_order_off_the_main_thread() {
    let (backend, gpio) = input_manager();

    let calls: Arc<Mutex<Vec<(u32, &'static str, thread::ThreadId)>>> =
        Arc::new(Mutex::new(Vec::new()));

    let first: EdgeCallback = {
        let calls = Arc::clone(&calls);
        Arc::new(move |channel| {
            calls.lock().unwrap().push((channel, "a", thread::current().id()));
        })
    };
    let second: EdgeCallback = {
        let calls = Arc::clone(&calls);
        Arc::new(move |channel| {
            calls.lock().unwrap().push((channel, "b", thread::current().id()));
        })
    };

    gpio.add_event_detect(BUTTON, Trigger::Rising, Some(first), None).unwrap();
    gpio.add_event_callback(BUTTON, second, None).unwrap();

    backend.drive_input(BUTTON_PIN, Level::High);
    wait_until(|| calls.lock().unwrap().len() >= 2);

    let calls = calls.lock().unwrap();
    assert_eq!(calls[0].0, BUTTON);
    assert_eq!(calls[0].1, "a");
    assert_eq!(calls[1].1, "b");
    // both ran on the dispatcher thread, which is not the test thread
    assert_eq!(calls[0].2, calls[1].2);
    assert_ne!(calls[0].2, thread::current().id());
}

#[test]
fn callbacks_across_pins_never_interleave() {
    let (backend, gpio) = manager();
    gpio.setup_channels(&[BUTTON, SECOND], Direction::In, SetupOptions::default())
        .unwrap();

    let calls: Arc<Mutex<Vec<(u32, &'static str)>>> = Arc::new(Mutex::new(Vec::new()));
    for &channel in &[BUTTON, SECOND] {
        let first: EdgeCallback = {
            let calls = Arc::clone(&calls);
            Arc::new(move |ch| calls.lock().unwrap().push((ch, "a")))
        };
        let second: EdgeCallback = {
            let calls = Arc::clone(&calls);
            Arc::new(move |ch| calls.lock().unwrap().push((ch, "b")))
        };
        gpio.add_event_detect(channel, Trigger::Both, Some(first), None).unwrap();
        gpio.add_event_callback(channel, second, None).unwrap();
    }

    // drive both pins from concurrent threads
    let drivers: Vec<_> = [(BUTTON_PIN, 0u64), (7, 3u64)]
        .into_iter()
        .map(|(pin, stagger)| {
            let backend = Arc::clone(&backend);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(stagger));
                for _ in 0..5 {
                    backend.drive_input(pin, Level::High);
                    thread::sleep(Duration::from_millis(5));
                    backend.drive_input(pin, Level::Low);
                    thread::sleep(Duration::from_millis(5));
                }
            })
        })
        .collect();
    for driver in drivers {
        driver.join().unwrap();
    }

    // wait for the dispatcher to drain: the call log stops growing
    let mut seen = usize::MAX;
    for _ in 0..100 {
        let len = calls.lock().unwrap().len();
        if len == seen && len > 0 {
            break;
        }
        seen = len;
        thread::sleep(Duration::from_millis(50));
    }

    let calls = calls.lock().unwrap();
    assert!(!calls.is_empty());
    // each dispatched edge runs its pin's callbacks to completion in
    // registration order before the next edge's callbacks begin
    for pair in calls.chunks(2) {
        assert_eq!(pair.len(), 2);
        assert_eq!(pair[0].0, pair[1].0);
        assert_eq!(pair[0].1, "a");
        assert_eq!(pair[1].1, "b");
    }
}

#[test]
fn remove_event_detect_stops_the_watcher() {
    let (backend, gpio) = input_manager();

    let count = Arc::new(AtomicUsize::new(0));
    let callback: EdgeCallback = {
        let count = Arc::clone(&count);
        Arc::new(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    };
    gpio.add_event_detect(BUTTON, Trigger::Rising, Some(callback), None).unwrap();

    backend.drive_input(BUTTON_PIN, Level::High);
    wait_until(|| count.load(Ordering::SeqCst) == 1);

    gpio.remove_event_detect(BUTTON).unwrap();

    backend.drive_input(BUTTON_PIN, Level::Low);
    backend.drive_input(BUTTON_PIN, Level::High);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(!gpio.event_detected(BUTTON).unwrap());

    // removing again is harmless, and detection can be re-added
    gpio.remove_event_detect(BUTTON).unwrap();
    gpio.add_event_detect(BUTTON, Trigger::Rising, None, None).unwrap();
}

#[test]
fn bounce_hint_is_accepted_but_does_not_suppress_edges() {
    let (backend, gpio) = input_manager();
    gpio.add_event_detect(
        BUTTON,
        Trigger::Rising,
        None,
        Some(Duration::from_millis(200)),
    )
    .unwrap();

    backend.drive_input(BUTTON_PIN, Level::High);
    wait_until(|| gpio.event_detected(BUTTON).unwrap());

    // a second edge well inside the bounce interval still latches
    backend.drive_input(BUTTON_PIN, Level::Low);
    backend.drive_input(BUTTON_PIN, Level::High);
    wait_until(|| gpio.event_detected(BUTTON).unwrap());
}

#[test]
fn cleanup_tears_down_an_active_watch() {
    let (backend, gpio) = input_manager();
    gpio.add_event_detect(BUTTON, Trigger::Both, None, None).unwrap();

    gpio.cleanup(BUTTON).unwrap();
    assert!(!backend.is_exported(BUTTON_PIN));

    // a fresh setup can watch the pin again
    gpio.setup(BUTTON, Direction::In, SetupOptions::default()).unwrap();
    gpio.add_event_detect(BUTTON, Trigger::Both, None, None).unwrap();
}
