//! Blink scheduler (C5): periodically drives the eyes joint through a
//! close-then-open move, suppressed while the mouth is mid-speech.
//!
//! Scheduling uses the inverse-CDF trick for an exponential interval:
//! `-ln(U) / lambda` with `lambda = 1 / mean_interval_s`, one RNG draw
//! per event, swapped from a uniform ramp to an exponential one since
//! blink spacing should look involuntary rather than metronomic.

use crate::clock::Clock;
use crate::config::BlinkConfig;
use crate::servo::ServoEngine;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const TICK_PERIOD: Duration = Duration::from_millis(20);
const STOP_TIMEOUT: Duration = Duration::from_millis(500);

/// Draws the next inter-blink interval in seconds. Guards against `U = 0`
/// (which would make `ln` diverge) by redrawing from the open interval.
fn next_interval_s(mean_interval_s: f64) -> f64 {
    let lambda = 1.0 / mean_interval_s.max(1e-6);
    let mut rng = rand::thread_rng();
    let mut u: f64 = rng.gen();
    while u <= 0.0 {
        u = rng.gen();
    }
    -u.ln() / lambda
}

/// Blocks (in short polling increments against `clock`, not a single hard
/// sleep) until `duration_s` has elapsed since the call, or `running`
/// flips false. Polling the clock rather than sleeping the wall clock
/// directly keeps this on the same testability seam as every other
/// worker loop in the crate.
fn wait_for(clock: &dyn Clock, running: &AtomicBool, duration_s: f64) {
    let start = clock.now();
    loop {
        if !running.load(Ordering::Acquire) {
            return;
        }
        thread::sleep(TICK_PERIOD);
        if clock.now() - start >= duration_s {
            return;
        }
    }
}

/// Schmitt-trigger gate on how open the mouth is: a blink already in
/// flight rides out suppression, but a new one won't start until the
/// mouth has been below `suppress_mouth_off` for `suppress_off_ms`.
struct SuppressionGate {
    config: BlinkConfig,
    suppressed_since: Mutex<Option<f64>>,
    armed: Mutex<bool>,
}

impl SuppressionGate {
    fn new(config: BlinkConfig) -> Self {
        Self {
            config,
            suppressed_since: Mutex::new(None),
            armed: Mutex::new(false),
        }
    }

    /// `mouth_openness` is the mouth joint's current position normalized
    /// to `[0, 1]` across its configured range.
    fn can_blink_now(&self, mouth_openness: f64, now: f64) -> bool {
        let mut armed = self.armed.lock().unwrap();
        let mut since = self.suppressed_since.lock().unwrap();

        if mouth_openness > self.config.suppress_mouth_on {
            *armed = false;
            *since = None;
            return false;
        }

        if mouth_openness <= self.config.suppress_mouth_off {
            let first_quiet_ts = since.get_or_insert(now);
            if (now - *first_quiet_ts) * 1000.0 >= self.config.suppress_off_ms as f64 {
                *armed = true;
            }
        } else {
            *since = None;
        }

        *armed
    }
}

/// Drives the eyes joint's blink closures on its own worker thread, with
/// a non-owning read handle to the mouth joint for suppression.
pub struct BlinkScheduler {
    config: BlinkConfig,
    eyes: Arc<ServoEngine>,
    mouth: Arc<ServoEngine>,
    gate: Arc<SuppressionGate>,
    clock: Arc<dyn Clock>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl BlinkScheduler {
    pub fn new(
        config: BlinkConfig,
        eyes: Arc<ServoEngine>,
        mouth: Arc<ServoEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gate: Arc::new(SuppressionGate::new(config)),
            config,
            eyes,
            mouth,
            clock,
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    fn mouth_openness(mouth: &ServoEngine) -> f64 {
        let span = (mouth.max_angle() - mouth.min_angle()).max(1) as f64;
        ((mouth.angle() - mouth.min_angle()) as f64 / span).clamp(0.0, 1.0)
    }

    /// Exposed for deterministic tests; bypasses the RNG-driven schedule
    /// and just asks whether a blink could start right now.
    #[doc(hidden)]
    pub fn can_blink_now(&self) -> bool {
        let openness = Self::mouth_openness(&self.mouth);
        self.gate.can_blink_now(openness, self.clock.now())
    }

    /// Issues just the closing half of a blink (no reopen, no wait) —
    /// exposed for tests that only care that a blink was commanded at
    /// all. The full close-wait-reopen sequence lives in the worker loop
    /// started by [`Self::start`].
    #[doc(hidden)]
    pub fn trigger_blink(&self) {
        let close_duration_s = self.config.duration_ms as f64 / 1000.0;
        self.eyes
            .set_target_angle(self.eyes.min_angle(), Some(close_duration_s));
    }

    /// Idempotent: begins the worker thread that schedules and fires
    /// blinks.
    pub fn start(&self) {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_some() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);
        let eyes = Arc::clone(&self.eyes);
        let mouth = Arc::clone(&self.mouth);
        let gate = Arc::clone(&self.gate);
        let clock = Arc::clone(&self.clock);
        let running = Arc::clone(&self.running);
        let config = self.config;
        *worker = Some(thread::spawn(move || {
            let mut next_fire = clock.now() + next_interval_s(config.mean_interval_s);
            while running.load(Ordering::Acquire) {
                let now = clock.now();
                if now >= next_fire {
                    let openness = Self::mouth_openness(&mouth);
                    if gate.can_blink_now(openness, now) {
                        let close_duration_s = config.duration_ms as f64 / 1000.0;
                        eyes.set_target_angle(eyes.min_angle(), Some(close_duration_s));
                        wait_for(clock.as_ref(), &running, close_duration_s);
                        let reopen_duration_s = (close_duration_s / 1.5).max(0.01);
                        eyes.set_target_angle(eyes.neutral(), Some(reopen_duration_s));
                    }
                    next_fire = clock.now() + next_interval_s(config.mean_interval_s);
                }
                thread::sleep(TICK_PERIOD);
            }
        }));
        log::debug!("Blink scheduler thread started");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            let (tx, rx) = mpsc::channel();
            thread::spawn(move || {
                let _ = handle.join();
                let _ = tx.send(());
            });
            if rx.recv_timeout(STOP_TIMEOUT).is_err() {
                log::warn!("Blink scheduler worker exceeded stop timeout; abandoning thread");
            }
        }
        log::debug!("Blink scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::pwm::test_support::RecordingPwmSink;
    use crate::servo::JointConfig;

    fn engines(clock: Arc<ManualClock>) -> (Arc<ServoEngine>, Arc<ServoEngine>) {
        let mouth_cfg = JointConfig::new(18, 20, 120, 20, 500, 2500, 180.0);
        let eyes_cfg = JointConfig::new(23, 10, 90, 10, 500, 2500, 90.0);
        let mouth = Arc::new(ServoEngine::new(
            mouth_cfg,
            Arc::new(RecordingPwmSink::default()),
            clock.clone(),
        ));
        let eyes = Arc::new(ServoEngine::new(
            eyes_cfg,
            Arc::new(RecordingPwmSink::default()),
            clock,
        ));
        (mouth, eyes)
    }

    #[test]
    fn exponential_draw_is_positive_and_varied() {
        let draws: Vec<f64> = (0..50).map(|_| next_interval_s(6.0)).collect();
        assert!(draws.iter().all(|&d| d > 0.0));
        let distinct = draws
            .windows(2)
            .filter(|w| (w[0] - w[1]).abs() > 1e-9)
            .count();
        assert!(distinct > 0);
    }

    // S5: blink suppression while the mouth is open
    #[test]
    fn blink_suppression_s5() {
        let clock = ManualClock::new(0.0);
        let (mouth, eyes) = engines(clock.clone());
        let scheduler = BlinkScheduler::new(BlinkConfig::default(), eyes, mouth.clone(), clock.clone());

        // Drive the mouth fully open via velocity-limited tracking (no
        // worker thread is running, so advance it by hand).
        mouth.set_target_angle(mouth.max_angle(), None);
        for _ in 0..50 {
            clock.advance(0.02);
            mouth.advance_for_test(0.02);
        }
        assert_eq!(mouth.angle(), mouth.max_angle());

        for _ in 0..10 {
            clock.advance(1.0);
            assert!(!scheduler.can_blink_now(), "mouth open should suppress blinking");
        }

        // Close the mouth and poll until suppress_off_ms elapses, the way
        // the worker loop would tick every 20ms rather than check once.
        mouth.set_target_angle(mouth.min_angle(), None);
        for _ in 0..50 {
            clock.advance(0.02);
            mouth.advance_for_test(0.02);
        }
        assert_eq!(mouth.angle(), mouth.min_angle());
        let mut allowed = false;
        for _ in 0..20 {
            clock.advance(0.02);
            if scheduler.can_blink_now() {
                allowed = true;
                break;
            }
        }
        assert!(allowed, "should be allowed once the hold elapses");
    }

    #[test]
    fn trigger_blink_moves_eyes_toward_closed() {
        let clock = ManualClock::new(0.0);
        let (mouth, eyes) = engines(clock.clone());
        let scheduler = BlinkScheduler::new(BlinkConfig::default(), eyes.clone(), mouth, clock.clone());
        let start = eyes.angle();
        scheduler.trigger_blink();
        clock.advance(0.08);
        eyes.advance_for_test(0.08);
        assert!(eyes.angle() <= start);
    }

    // Exercises the real worker thread started by `start()` end to end —
    // earlier tests only called `can_blink_now()`/`trigger_blink()`
    // directly and never caught that the reopen step used to cancel the
    // close before a single pulse landed.
    #[test]
    fn worker_loop_closes_then_reopens_eyes_end_to_end() {
        let clock = ManualClock::new(0.0);
        let mouth_cfg = JointConfig::new(18, 20, 120, 20, 500, 2500, 180.0);
        // neutral != min_angle here so the close and reopen legs land on
        // observably different positions.
        let eyes_cfg = JointConfig::new(23, 10, 90, 50, 500, 2500, 400.0);
        let mouth = Arc::new(ServoEngine::new(
            mouth_cfg,
            Arc::new(RecordingPwmSink::default()),
            clock.clone(),
        ));
        let eyes = Arc::new(ServoEngine::new(
            eyes_cfg,
            Arc::new(RecordingPwmSink::default()),
            clock.clone(),
        ));

        let mut config = BlinkConfig::default();
        config.mean_interval_s = 1e-4;
        config.duration_ms = 40;
        let scheduler = BlinkScheduler::new(config, eyes.clone(), mouth, clock.clone());

        // Mouth sits at rest (openness 0) the whole test and is never
        // started, so pre-arm the suppression gate deterministically
        // before the worker thread starts racing against it — it's the
        // same `Arc<SuppressionGate>` the worker reads.
        for _ in 0..15 {
            clock.advance(0.02);
            scheduler.can_blink_now();
        }
        assert!(scheduler.can_blink_now(), "gate should be armed once the hold elapses");

        scheduler.start();

        // Eyes' own worker is never started; advance it by hand in
        // lockstep with the clock so the only background thread racing
        // against this one is the blink scheduler's.
        let mut saw_closed = false;
        for _ in 0..500 {
            clock.advance(0.002);
            eyes.advance_for_test(0.002);
            thread::sleep(Duration::from_millis(1));
            if eyes.angle() == eyes.min_angle() {
                saw_closed = true;
                break;
            }
        }
        assert!(
            saw_closed,
            "eyes should reach min_angle mid-blink, not be cancelled before a single pulse lands"
        );

        let mut saw_reopened = false;
        for _ in 0..500 {
            clock.advance(0.002);
            eyes.advance_for_test(0.002);
            thread::sleep(Duration::from_millis(1));
            if eyes.angle() == eyes.neutral() {
                saw_reopened = true;
                break;
            }
        }
        assert!(saw_reopened, "eyes should return to neutral once the reopen eases through");

        scheduler.stop();
    }
}
