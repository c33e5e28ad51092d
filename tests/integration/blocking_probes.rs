//! Blocking probes and the send-cycle handshake

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use probe_monitor::{
    Monitor, ProbeMode, TargetStatus,
    error::{ErrorCode, RecordingErrorSink},
};

use crate::helpers::*;

#[test]
fn test_released_after_sending() {
    let mut monitor = Monitor::new(&fast_settings());
    let (probe, handles) = TestProbe::new("B");
    monitor.add_probe(probe, ProbeMode::blocking(false)).unwrap();
    assert!(monitor.start_probe("B"));

    handles.set_code(-3);
    monitor.do_before_sending_data();
    assert_eq!(handles.calls.arms(), 1);
    assert_eq!(handles.calls.mains(), 0);

    monitor.do_after_sending_data();
    assert!(wait_until(Duration::from_secs(2), || {
        monitor.get_probe_status("B").unwrap().code == Some(-3)
    }));
    assert_eq!(handles.calls.mains(), 1);
    assert_eq!(monitor.target_status(), TargetStatus::Degraded);

    // next cycle
    handles.set_code(0);
    monitor.do_before_sending_data();
    assert_eq!(handles.calls.arms(), 2);
    monitor.do_after_sending_data();
    assert!(wait_until(Duration::from_secs(2), || handles.calls.mains() == 2));
    assert!(wait_until(Duration::from_secs(2), || {
        monitor.get_probe_status("B").unwrap().code == Some(0)
    }));

    monitor.stop();
    assert!(!monitor.is_probe_launched("B").unwrap());
    assert_eq!(handles.calls.stops(), 1);
}

#[test]
fn test_release_follows_feedback_mode() {
    let mut monitor = Monitor::new(&fast_settings());
    let (now_probe, now) = TestProbe::new("now");
    let (later_probe, later) = TestProbe::new("later");
    monitor.add_probe(now_probe, ProbeMode::blocking(false)).unwrap();
    monitor.add_probe(later_probe, ProbeMode::blocking(true)).unwrap();
    assert!(monitor.start_all_probes());

    monitor.do_before_sending_data();
    assert_eq!(now.calls.arms(), 1);
    assert_eq!(later.calls.arms(), 1);

    monitor.do_after_sending_data();
    assert!(wait_until(Duration::from_secs(2), || now.calls.mains() == 1));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(later.calls.mains(), 0);

    monitor.do_after_timeout();
    assert!(wait_until(Duration::from_secs(2), || later.calls.mains() == 1));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(now.calls.mains(), 1);

    monitor.stop();
}

#[test]
fn test_after_timeout_does_not_release_immediate_probes() {
    let mut monitor = Monitor::new(&fast_settings());
    let (probe, handles) = TestProbe::new("now");
    monitor.add_probe(probe, ProbeMode::blocking(false)).unwrap();
    assert!(monitor.start_probe("now"));

    monitor.do_before_sending_data();
    monitor.do_after_timeout();
    thread::sleep(Duration::from_millis(150));
    assert_eq!(handles.calls.mains(), 0);

    monitor.stop();
    assert_eq!(handles.calls.mains(), 0);
}

#[test]
fn test_on_error_aborts_cycle() {
    let mut settings = fast_settings();
    settings.poll_interval_ms = 300;
    let poll = Duration::from_millis(300);
    let mut monitor = Monitor::new(&settings);
    let (probe, handles) = TestProbe::new("B");
    monitor.add_probe(probe, ProbeMode::blocking(false)).unwrap();
    assert!(monitor.start_probe("B"));

    monitor.do_before_sending_data();
    assert_eq!(handles.calls.arms(), 1);

    // the next before-send returns once the worker has left the aborted cycle
    // and armed again, so its duration bounds the wake-up
    monitor.do_on_error();
    let released = Instant::now();
    monitor.do_before_sending_data();
    assert!(released.elapsed() < poll + Duration::from_millis(150));
    assert_eq!(handles.calls.arms(), 2);
    assert_eq!(handles.calls.mains(), 0);
    assert!(monitor.is_probe_launched("B").unwrap());

    monitor.do_after_sending_data();
    assert!(wait_until(Duration::from_secs(2), || handles.calls.mains() == 1));

    monitor.stop();
}

#[test]
fn test_stop_wakes_armed_probe() {
    let mut monitor = Monitor::new(&fast_settings());
    let (probe, handles) = TestProbe::new("B");
    monitor.add_probe(probe, ProbeMode::blocking(true)).unwrap();
    assert!(monitor.start_probe("B"));

    monitor.do_before_sending_data();

    let start = Instant::now();
    assert!(monitor.stop_probe("B"));
    assert!(start.elapsed() < Duration::from_millis(500));
    assert_eq!(handles.calls.mains(), 0);
    assert_eq!(handles.calls.stops(), 1);
}

#[test]
fn test_disabled_hooks_do_nothing() {
    let mut monitor = Monitor::new(&fast_settings());
    let (probe, handles) = TestProbe::new("B");
    monitor.add_probe(probe, ProbeMode::blocking(false)).unwrap();
    assert!(monitor.start_probe("B"));

    monitor.disable_hooks();
    monitor.do_before_sending_data();
    monitor.do_after_sending_data();
    monitor.do_after_timeout();
    monitor.do_on_error();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(handles.calls.arms(), 0);
    assert_eq!(handles.calls.mains(), 0);
    assert!(monitor.do_after_sending_and_logging_data());

    monitor.enable_hooks();
    monitor.do_before_sending_data();
    assert_eq!(handles.calls.arms(), 1);

    monitor.stop();
}

#[test]
fn test_slow_arm_is_bounded_and_reported() {
    let mut settings = fast_settings();
    settings.arm_timeout_secs = 0.2;
    let sink = Arc::new(RecordingErrorSink::new());
    let mut monitor = Monitor::new(&settings).with_error_sink(sink.clone());

    let (slow_probe, slow) = TestProbe::with_behavior("slow", Behavior::SlowArm(Duration::from_millis(800)));
    let (fast_probe, fast) = TestProbe::new("fast");
    monitor.add_probe(slow_probe, ProbeMode::blocking(false)).unwrap();
    monitor.add_probe(fast_probe, ProbeMode::blocking(false)).unwrap();
    assert!(monitor.start_all_probes());

    let start = Instant::now();
    monitor.do_before_sending_data();
    assert!(start.elapsed() < Duration::from_millis(700));
    assert_eq!(fast.calls.arms(), 1);

    let errors = sink.take();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, ErrorCode::OperationCancelled);
    assert!(errors[0].message.contains("'slow'"));

    // the lagging probe was asked to stop
    assert!(monitor.is_probe_stuck("slow").unwrap());
    assert!(wait_until(Duration::from_secs(2), || {
        !monitor.is_probe_launched("slow").unwrap()
    }));
    assert_eq!(slow.calls.arms(), 1);
    assert_eq!(slow.calls.mains(), 0);

    monitor.do_after_sending_data();
    assert!(wait_until(Duration::from_secs(2), || fast.calls.mains() == 1));

    // once gone it is no longer reported
    monitor.do_before_sending_data();
    assert_eq!(fast.calls.arms(), 2);
    assert!(sink.take().is_empty());

    monitor.stop();
}

#[test]
fn test_idle_blocking_probe_is_not_reported() {
    let sink = Arc::new(RecordingErrorSink::new());
    let mut monitor = Monitor::new(&fast_settings()).with_error_sink(sink.clone());
    let (probe, handles) = TestProbe::new("idle");
    monitor.add_probe(probe, ProbeMode::blocking(true)).unwrap();

    for _ in 0..3 {
        let start = Instant::now();
        monitor.do_before_sending_data();
        assert!(start.elapsed() < Duration::from_millis(200));
    }
    assert_eq!(handles.calls.arms(), 0);
    assert!(sink.errors().is_empty());
}
