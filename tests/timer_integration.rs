//! Real-clock behavior of `PipelineTimer`.

mod common;

use common::{assert_near, env_timing_tolerance, wait_until, WAIT};
use frame_pipeline::PipelineTimer;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn ticks_at_configured_frequency() {
    let timer = PipelineTimer::new(20).unwrap();
    assert_eq!(timer.period(), Duration::from_millis(50));

    let fired = Arc::new(AtomicU64::new(0));
    {
        let fired = Arc::clone(&fired);
        timer.on_tick(move || {
            fired.fetch_add(1, Ordering::SeqCst);
        });
    }

    timer.start().unwrap();
    thread::sleep(Duration::from_millis(500));
    timer.stop();

    // First tick fires immediately, then one per period
    let ticks = fired.load(Ordering::SeqCst);
    assert_eq!(ticks, timer.tick_count());
    assert_near(ticks as f64, 11.0, env_timing_tolerance(), "ticks in 500 ms at 20 Hz");
}

#[test]
fn elapsed_freezes_on_stop_and_resets_on_start() {
    let timer = PipelineTimer::new(30).unwrap();
    assert_eq!(timer.elapsed(), Duration::ZERO);
    assert!(timer.start_time().is_none());

    timer.start().unwrap();
    thread::sleep(Duration::from_millis(200));
    timer.stop();

    let frozen = timer.elapsed();
    assert_near(
        frozen.as_secs_f64(),
        0.2,
        env_timing_tolerance(),
        "elapsed after 200 ms",
    );
    thread::sleep(Duration::from_millis(50));
    assert_eq!(timer.elapsed(), frozen);
    let first_start = timer.start_time().unwrap();

    timer.start().unwrap();
    assert!(timer.elapsed() < frozen);
    assert!(timer.start_time().unwrap() >= first_start);
    timer.stop();
}

#[test]
fn fps_measured_over_one_second_window() {
    let timer = Arc::new(PipelineTimer::new(30).unwrap());
    timer.start().unwrap();

    let counter = {
        let timer = Arc::clone(&timer);
        thread::spawn(move || {
            while timer.is_running() {
                timer.increment();
                thread::sleep(Duration::from_millis(10));
            }
        })
    };

    assert!(wait_until(WAIT, || timer.fps() > 0.0), "fps never updated");
    timer.stop();
    counter.join().unwrap();

    // One increment per ~10 ms of sleep
    let fps = timer.fps();
    assert!(fps > 20.0 && fps <= 101.0, "fps = {fps}");
}
