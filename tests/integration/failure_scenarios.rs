//! Failing, panicking and stuck probes

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use probe_monitor::{
    Console, ConsoleLevel, Monitor, MonitorError, ProbeMode,
    error::{ErrorCode, RecordingErrorSink},
};

use crate::helpers::*;

/// Console keeping every error message it is given
#[derive(Default)]
struct ErrorConsole {
    errors: Mutex<Vec<String>>,
}

impl ErrorConsole {
    fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl Console for ErrorConsole {
    fn print_console(&self, level: ConsoleLevel, msg: &str) {
        if level == ConsoleLevel::Error {
            self.errors.lock().unwrap().push(msg.to_string());
        }
    }
}

#[test]
fn test_failing_main_ends_the_run() {
    let console = Arc::new(ErrorConsole::default());
    let mut monitor = Monitor::new(&fast_settings()).with_console(console.clone());
    let (probe, handles) = TestProbe::with_behavior("A", Behavior::FailMain);
    monitor.add_probe(probe, ProbeMode::Polling).unwrap();

    assert!(monitor.start_probe("A"));
    assert!(wait_until(Duration::from_secs(2), || {
        !monitor.is_probe_launched("A").unwrap()
    }));

    thread::sleep(Duration::from_millis(100));
    assert_eq!(handles.calls.mains(), 1);
    // stop() is not called after a failure
    assert_eq!(handles.calls.stops(), 0);

    let errors = console.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("Exception in probe 'A' (during main())"));
    assert!(errors[0].contains("target unreachable"));
    assert!(errors[0].contains(&"-".repeat(60)));

    // the failed probe no longer counts for the target
    monitor.do_before_sending_data();
    assert!(monitor.is_target_ok());
    monitor.stop();
}

#[test]
fn test_panicking_main_is_contained() {
    let sink = Arc::new(RecordingErrorSink::new());
    let mut monitor = Monitor::new(&fast_settings()).with_error_sink(sink.clone());
    let (probe, handles) = TestProbe::with_behavior("A", Behavior::PanicMain);
    let (other_probe, other) = TestProbe::new("B");
    monitor.add_probe(probe, ProbeMode::Polling).unwrap();
    monitor.add_probe(other_probe, ProbeMode::Polling).unwrap();

    assert!(monitor.start_all_probes());
    assert!(wait_until(Duration::from_secs(2), || {
        !monitor.is_probe_launched("A").unwrap()
    }));
    assert_eq!(handles.calls.mains(), 1);

    // the other probe keeps running
    let seen = other.calls.mains();
    assert!(wait_until(Duration::from_secs(2), || other.calls.mains() > seen));
    assert!(monitor.is_probe_launched("B").unwrap());

    // a dead probe can be started again
    assert!(monitor.start_probe("A"));
    assert!(wait_until(Duration::from_secs(2), || handles.calls.mains() == 2));

    monitor.stop();
    assert!(sink.errors().is_empty());
}

#[test]
fn test_failing_start_skips_main() {
    let mut monitor = Monitor::new(&fast_settings());
    let (probe, handles) = TestProbe::with_behavior("A", Behavior::FailStart);
    monitor.add_probe(probe, ProbeMode::blocking(false)).unwrap();

    // the thread is launched, the failure happens inside it
    assert!(monitor.start_probe("A"));
    assert!(wait_until(Duration::from_secs(2), || {
        !monitor.is_probe_launched("A").unwrap()
    }));
    assert_eq!(handles.calls.starts(), 1);

    // nobody is left to arm, the cycle does not wait
    let start = Instant::now();
    monitor.do_before_sending_data();
    assert!(start.elapsed() < Duration::from_millis(500));
    assert_eq!(handles.calls.arms(), 0);
    assert_eq!(handles.calls.mains(), 0);

    monitor.stop();
    assert_eq!(handles.calls.stops(), 0);
}

#[test]
fn test_failing_arm_does_not_deadlock() {
    let mut monitor = Monitor::new(&fast_settings());
    let (probe, handles) = TestProbe::with_behavior("A", Behavior::FailArm);
    monitor.add_probe(probe, ProbeMode::blocking(true)).unwrap();
    assert!(monitor.start_probe("A"));

    let start = Instant::now();
    monitor.do_before_sending_data();
    assert!(start.elapsed() < Duration::from_millis(500));

    assert!(wait_until(Duration::from_secs(2), || {
        !monitor.is_probe_launched("A").unwrap()
    }));
    monitor.do_after_sending_data();
    monitor.do_after_timeout();
    assert_eq!(handles.calls.mains(), 0);

    monitor.stop();
}

#[test]
fn test_stuck_probe_is_reported() {
    let mut settings = fast_settings();
    settings.join_timeout_secs = 0.2;
    let sink = Arc::new(RecordingErrorSink::new());
    let mut monitor = Monitor::new(&settings).with_error_sink(sink.clone());

    let (probe, handles) = TestProbe::with_behavior("slow", Behavior::HangMain(Duration::from_secs(1)));
    monitor.add_probe(probe, ProbeMode::Polling).unwrap();
    assert!(monitor.start_probe("slow"));
    assert!(wait_until(Duration::from_secs(2), || handles.calls.mains() == 1));

    let start = Instant::now();
    assert!(!monitor.stop_probe("slow"));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(150));
    assert!(elapsed < Duration::from_millis(800));

    assert!(monitor.is_probe_launched("slow").unwrap());
    assert!(monitor.is_probe_stuck("slow").unwrap());

    let errors = sink.take();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, ErrorCode::OperationCancelled);
    assert_eq!(
        errors[0].message,
        "Timeout! Probe 'slow' seems to be stuck in its 'main()' method."
    );

    // it eventually honours the request
    assert!(wait_until(Duration::from_secs(3), || {
        !monitor.is_probe_launched("slow").unwrap()
    }));
    assert!(!monitor.is_probe_stuck("slow").unwrap());
    assert_eq!(handles.calls.stops(), 1);
    assert!(monitor.stop_probe("slow"));
}

#[test]
fn test_configure_does_not_wait_on_hung_hook() {
    let mut settings = fast_settings();
    settings.join_timeout_secs = 0.2;
    let sink = Arc::new(RecordingErrorSink::new());
    let mut monitor = Monitor::new(&settings).with_error_sink(sink.clone());

    let (hung, handles) = TestProbe::with_behavior("hang", Behavior::HangMain(Duration::from_millis(1500)));
    monitor.add_probe(hung, ProbeMode::Polling).unwrap();
    assert!(monitor.start_probe("hang"));
    assert!(wait_until(Duration::from_secs(2), || handles.calls.mains() == 1));

    let start = Instant::now();
    assert!(!monitor.configure_probe("hang", &[serde_json::json!(1)]));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(150));
    assert!(elapsed < Duration::from_millis(800));
    assert_eq!(handles.calls.configures(), 0);

    let errors = sink.take();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, ErrorCode::OperationCancelled);
    assert!(errors[0].message.contains("'hang'"));

    // accepted again once the hook returned
    monitor.stop_all_probes();
    sink.take();
    assert!(wait_until(Duration::from_secs(3), || {
        !monitor.is_probe_launched("hang").unwrap()
    }));
    assert!(monitor.configure_probe("hang", &[serde_json::json!(1)]));
    assert_eq!(handles.calls.configures(), 1);
}

#[test]
fn test_duplicate_registration_keeps_first_probe() {
    let mut monitor = Monitor::new(&fast_settings());
    let (first, first_handles) = TestProbe::new("A");
    let (second, second_handles) = TestProbe::new("A");

    monitor.add_probe(first, ProbeMode::Polling).unwrap();
    assert_matches!(
        monitor.add_probe(second, ProbeMode::blocking(true)),
        Err(MonitorError::AlreadyExistingProbe(name)) if name == "A"
    );
    assert_eq!(monitor.get_probes_names(), vec!["A".to_string()]);

    assert!(monitor.start_probe("A"));
    assert!(wait_until(Duration::from_secs(2), || first_handles.calls.mains() >= 1));
    assert_eq!(second_handles.calls.starts(), 0);

    monitor.stop();
}

#[test]
fn test_unknown_names() {
    let sink = Arc::new(RecordingErrorSink::new());
    let mut monitor = Monitor::new(&fast_settings()).with_error_sink(sink.clone());

    assert!(!monitor.start_probe("ghost"));
    assert!(!monitor.stop_probe("ghost"));
    assert_matches!(monitor.is_probe_launched("ghost"), Err(MonitorError::UnknownProbe(_)));
    assert_matches!(monitor.get_probe_delay("ghost"), Err(MonitorError::UnknownProbe(_)));

    let errors = sink.take();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|e| e.code == ErrorCode::CommandError));
}
