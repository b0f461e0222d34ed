//! Top-level state machine (C6): ticks at a fixed cadence, fuses the
//! vocal detector's output with servo state, and drives mouth, eyes,
//! sleep entry/exit and telemetry.
//!
//! Owns every subsystem exclusively (no subsystem back-references the
//! state machine); the blink scheduler is the one exception that holds
//! its own `Arc<ServoEngine>` clones, per the design note on
//! back-references without ownership.

use crate::audio::AudioSource;
use crate::blink::BlinkScheduler;
use crate::bt::BluetoothCollaborator;
use crate::clock::Clock;
use crate::config::Config;
use crate::detector::VocalDetector;
use crate::pwm::PwmSink;
use crate::servo::{JointConfig, ServoEngine};
use crate::telemetry::{StatusSnapshot, TelemetryPublisher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BearState {
    Init,
    Running,
    Sleep,
}

impl BearState {
    fn as_str(&self) -> &'static str {
        match self {
            BearState::Init => "INIT",
            BearState::Running => "RUNNING",
            BearState::Sleep => "SLEEP",
        }
    }
}

/// Logs at most once per `throttle_s`, matching the original's
/// per-message rate limiter for "vocal detected" noise.
struct LogThrottle {
    throttle_s: f64,
    last_emit: Mutex<f64>,
}

impl LogThrottle {
    fn new(throttle_s: f64) -> Self {
        Self {
            throttle_s,
            last_emit: Mutex::new(f64::NEG_INFINITY),
        }
    }

    fn allow(&self, now: f64) -> bool {
        let mut last = self.last_emit.lock().unwrap();
        if now - *last >= self.throttle_s {
            *last = now;
            true
        } else {
            false
        }
    }
}

fn build_joint_config(cfg: &crate::config::JointSpec, max_speed: f64, pulse_min_ms: f64, pulse_max_ms: f64) -> JointConfig {
    JointConfig::new(
        cfg.pin,
        cfg.min_angle,
        cfg.max_angle,
        cfg.neutral,
        (pulse_min_ms * 1000.0).round() as u32,
        (pulse_max_ms * 1000.0).round() as u32,
        max_speed,
    )
}

pub struct TeddyStateMachine {
    config: Config,
    clock: Arc<dyn Clock>,
    audio: Arc<dyn AudioSource>,
    detector: Mutex<VocalDetector>,
    mouth: Arc<ServoEngine>,
    eyes: Arc<ServoEngine>,
    blinker: BlinkScheduler,
    bt: Arc<dyn BluetoothCollaborator>,
    telemetry: TelemetryPublisher,
    vocal_log_throttle: LogThrottle,
    state: Mutex<BearState>,
    last_vocal_ts: Mutex<f64>,
    last_vocalness: Mutex<f64>,
    last_status_publish_ts: Mutex<f64>,
    running: Arc<AtomicBool>,
}

impl TeddyStateMachine {
    pub fn new(
        config: Config,
        clock: Arc<dyn Clock>,
        audio: Arc<dyn AudioSource>,
        pwm: Arc<dyn PwmSink>,
        bt: Arc<dyn BluetoothCollaborator>,
    ) -> Self {
        let config = config.validated();
        let mouth_cfg = build_joint_config(
            &config.servos.mouth,
            config.servos.max_speed_deg_per_s.mouth,
            config.servos.pulse_min_ms,
            config.servos.pulse_max_ms,
        );
        let eyes_cfg = build_joint_config(
            &config.servos.eyes,
            config.servos.max_speed_deg_per_s.eyes,
            config.servos.pulse_min_ms,
            config.servos.pulse_max_ms,
        );
        let mouth = Arc::new(ServoEngine::new(mouth_cfg, Arc::clone(&pwm), Arc::clone(&clock)));
        let eyes = Arc::new(ServoEngine::new(eyes_cfg, pwm, Arc::clone(&clock)));
        let blinker = BlinkScheduler::new(
            config.blink,
            Arc::clone(&eyes),
            Arc::clone(&mouth),
            Arc::clone(&clock),
        );
        let detector = VocalDetector::new(config.speech.clone(), config.audio.sample_rate as f64);
        let telemetry = TelemetryPublisher::new(config.telemetry.status_path.clone());
        let throttle = config.logging.throttle_s;
        let now = clock.now();

        Self {
            config,
            clock,
            audio,
            detector: Mutex::new(detector),
            mouth,
            eyes,
            blinker,
            bt,
            telemetry,
            vocal_log_throttle: LogThrottle::new(throttle),
            state: Mutex::new(BearState::Init),
            last_vocal_ts: Mutex::new(now),
            last_vocalness: Mutex::new(0.0),
            last_status_publish_ts: Mutex::new(f64::NEG_INFINITY),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> BearState {
        *self.state.lock().unwrap()
    }

    pub fn mouth(&self) -> &Arc<ServoEngine> {
        &self.mouth
    }

    pub fn eyes(&self) -> &Arc<ServoEngine> {
        &self.eyes
    }

    /// Starts all subsystems: mouth, eyes, audio, Bluetooth, blinker —
    /// servos must be live before the blinker reads their angle.
    pub fn start_subsystems(&self) {
        self.mouth.start();
        self.eyes.start();
        self.audio.start();
        self.bt.start();
        self.blinker.start();
        *self.state.lock().unwrap() = BearState::Running;
    }

    /// Reverse of start order: blinker, audio, Bluetooth, mouth, eyes.
    pub fn stop_subsystems(&self) {
        self.blinker.stop();
        self.audio.stop();
        self.bt.stop();
        self.mouth.stop();
        self.eyes.stop();
    }

    /// One iteration of the tick loop, exposed directly for deterministic
    /// tests (the real `run()` loop just calls this and sleeps `tick_s`).
    pub fn tick(&self) {
        let now = self.clock.now();
        let levels = self.audio.get_levels();
        let decision = self.detector.lock().unwrap().is_vocal(&levels.raw, now);
        *self.last_vocalness.lock().unwrap() = decision.info.vocalness;

        if decision.vocal {
            *self.last_vocal_ts.lock().unwrap() = now;
            self.mouth.set_target_angle(self.mouth.max_angle(), Some(0.05));
            if self.vocal_log_throttle.allow(now) {
                log::info!("vocal detected: vocalness={:.3}", decision.info.vocalness);
            }
        } else {
            let last_vocal_ts = *self.last_vocal_ts.lock().unwrap();
            if (now - last_vocal_ts) * 1000.0 > self.config.speech.min_open_time_ms as f64 {
                self.mouth.set_target_angle(self.mouth.min_angle(), Some(0.08));
            }
        }

        let last_vocal_ts = *self.last_vocal_ts.lock().unwrap();
        if now - last_vocal_ts > self.config.speech.idle_timeout_s {
            self.eyes.set_target_angle(
                self.eyes.max_angle(),
                Some(self.config.servos.eye_close_duration_s),
            );
            if (self.eyes.angle() - self.eyes.max_angle()).abs() <= 3 {
                *self.state.lock().unwrap() = BearState::Sleep;
            }
        } else {
            self.eyes.set_target_angle(self.eyes.min_angle(), Some(0.2));
            let mut state = self.state.lock().unwrap();
            if *state == BearState::Sleep {
                log::info!("waking from sleep");
                *state = BearState::Running;
            }
        }

        let mut last_publish = self.last_status_publish_ts.lock().unwrap();
        if now - *last_publish >= self.config.telemetry.write_interval_s {
            let snapshot = StatusSnapshot {
                state: self.state().as_str().to_string(),
                bt_connected: self.bt.is_connected(),
                last_vocal_ts: *self.last_vocal_ts.lock().unwrap(),
                speech_confidence: *self.last_vocalness.lock().unwrap(),
                mouth_angle: self.mouth.angle(),
                eyes_angle: self.eyes.angle(),
                ts: now,
            };
            self.telemetry.publish(&snapshot);
            *last_publish = now;
        }
    }

    /// Starts subsystems and ticks until `stop()` is called. Blocks the
    /// calling thread; the launcher runs this on its main thread.
    pub fn run(&self) {
        self.start_subsystems();
        self.running.store(true, Ordering::SeqCst);
        let tick_period = Duration::from_secs_f64(self.config.main_loop.tick_s.max(0.001));
        while self.running.load(Ordering::Acquire) {
            self.tick();
            thread::sleep(tick_period);
        }
        self.stop_subsystems();
    }

    /// Signals `run()`'s loop to exit after its current tick.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
