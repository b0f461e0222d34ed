//! Typed mirror of the key-value configuration tree the surface loads
//! from disk and hands to the core at construction. Read-only thereafter.
//!
//! Loading the JSON file itself is a launcher concern (see `src/bin/teddy.rs`);
//! this module only defines the shape and the defaults.

use serde::{Deserialize, Serialize};

fn default_sample_rate() -> u32 {
    44100
}
fn default_channels() -> u32 {
    1
}
fn default_frame_size() -> u32 {
    2048
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    pub device: String,
    #[serde(default = "default_channels")]
    pub channels: u32,
    #[serde(default = "default_frame_size")]
    pub frame_size: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            device: "hw:Loopback,1,0".to_string(),
            channels: default_channels(),
            frame_size: default_frame_size(),
        }
    }
}

/// A single servo joint's geometry. Shared by the mouth and eyes entries
/// in `ServosConfig`; `pulse_min_ms`/`pulse_max_ms`/`max_speed_deg_per_s`
/// live one level up since the original config shares them across joints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct JointSpec {
    pub pin: u32,
    pub min_angle: i32,
    pub max_angle: i32,
    pub neutral: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MaxSpeedConfig {
    pub mouth: f64,
    pub eyes: f64,
}

impl Default for MaxSpeedConfig {
    fn default() -> Self {
        Self {
            mouth: 180.0,
            eyes: 90.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServosConfig {
    pub mouth: JointSpec,
    pub eyes: JointSpec,
    pub pulse_min_ms: f64,
    pub pulse_max_ms: f64,
    pub max_speed_deg_per_s: MaxSpeedConfig,
    pub eye_close_duration_s: f64,
}

impl Default for ServosConfig {
    fn default() -> Self {
        Self {
            mouth: JointSpec {
                pin: 18,
                min_angle: 20,
                max_angle: 120,
                neutral: 20,
            },
            eyes: JointSpec {
                pin: 23,
                min_angle: 10,
                max_angle: 90,
                neutral: 10,
            },
            pulse_min_ms: 0.5,
            pulse_max_ms: 2.5,
            max_speed_deg_per_s: MaxSpeedConfig::default(),
            eye_close_duration_s: 2.5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VocalnessWeights {
    pub rms: f64,
    pub centroid: f64,
    pub zcr: f64,
}

impl Default for VocalnessWeights {
    fn default() -> Self {
        Self {
            rms: 0.6,
            centroid: 0.3,
            zcr: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub goertzel_freqs: Vec<f64>,
    pub vocalness_weights: VocalnessWeights,
    pub rms_threshold: f64,
    pub zcr_threshold: f64,
    pub vocalness_threshold_on: f64,
    /// Reserved: see the detector module's notes on this threshold. It is
    /// carried through configuration and telemetry but does not currently
    /// participate in the hysteresis decision.
    pub vocalness_threshold_off: f64,
    pub off_hold_ms: u64,
    pub min_open_time_ms: u64,
    pub idle_timeout_s: f64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            goertzel_freqs: vec![300.0, 500.0, 1000.0],
            vocalness_weights: VocalnessWeights::default(),
            rms_threshold: 0.02,
            zcr_threshold: 0.05,
            vocalness_threshold_on: 0.45,
            vocalness_threshold_off: 0.30,
            off_hold_ms: 200,
            min_open_time_ms: 160,
            idle_timeout_s: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BlinkConfig {
    pub mean_interval_s: f64,
    pub duration_ms: u64,
    pub suppress_mouth_on: f64,
    pub suppress_mouth_off: f64,
    pub suppress_off_ms: u64,
}

impl Default for BlinkConfig {
    fn default() -> Self {
        Self {
            mean_interval_s: 6.0,
            duration_ms: 160,
            suppress_mouth_on: 0.25,
            suppress_mouth_off: 0.10,
            suppress_off_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MainLoopConfig {
    pub tick_s: f64,
}

impl Default for MainLoopConfig {
    fn default() -> Self {
        Self { tick_s: 0.04 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub status_path: String,
    pub write_interval_s: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            status_path: "/tmp/teddy_status.json".to_string(),
            write_interval_s: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub throttle_s: f64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: None,
            throttle_s: 5.0,
        }
    }
}

/// Top-level configuration tree, read-only once handed to `TeddyStateMachine`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub servos: ServosConfig,
    pub speech: SpeechConfig,
    pub blink: BlinkConfig,
    pub main_loop: MainLoopConfig,
    pub telemetry: TelemetryConfig,
    pub logging: LoggingConfig,
    /// MAC address of the paired Bluetooth speaker, if any. Reconnection
    /// logic lives outside the core; this is only surfaced via the stub
    /// collaborator's telemetry.
    #[serde(default)]
    pub bt_device_mac: String,
}

impl Default for JointSpec {
    fn default() -> Self {
        Self {
            pin: 0,
            min_angle: 0,
            max_angle: 180,
            neutral: 90,
        }
    }
}

impl Config {
    /// Repairs structurally invalid values rather than rejecting them:
    /// a daemon that fails to start on a bad config file is worse than
    /// one that clamps to something safe and keeps running. Mirrors the
    /// "clamp at use-sites" policy the servo engine itself follows for
    /// `set_target_angle`.
    pub fn validated(mut self) -> Self {
        self.servos.mouth = self.servos.mouth.validated();
        self.servos.eyes = self.servos.eyes.validated();
        if self.servos.pulse_min_ms >= self.servos.pulse_max_ms {
            self.servos.pulse_max_ms = self.servos.pulse_min_ms + 0.1;
        }
        if self.servos.max_speed_deg_per_s.mouth <= 0.0 {
            self.servos.max_speed_deg_per_s.mouth = 180.0;
        }
        if self.servos.max_speed_deg_per_s.eyes <= 0.0 {
            self.servos.max_speed_deg_per_s.eyes = 90.0;
        }
        if self.speech.goertzel_freqs.is_empty() {
            self.speech.goertzel_freqs = SpeechConfig::default().goertzel_freqs;
        }
        self
    }
}

impl JointSpec {
    fn validated(mut self) -> Self {
        if self.min_angle > self.max_angle {
            std::mem::swap(&mut self.min_angle, &mut self.max_angle);
        }
        self.neutral = self.neutral.clamp(self.min_angle, self.max_angle);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::default();
        assert_eq!(cfg.audio.sample_rate, 44100);
        assert_eq!(cfg.servos.mouth.min_angle, 20);
        assert_eq!(cfg.servos.mouth.max_angle, 120);
        assert_eq!(cfg.speech.goertzel_freqs, vec![300.0, 500.0, 1000.0]);
        assert_eq!(cfg.speech.off_hold_ms, 200);
        assert_eq!(cfg.blink.mean_interval_s, 6.0);
        assert_eq!(cfg.main_loop.tick_s, 0.04);
    }

    #[test]
    fn validated_repairs_inverted_joint_range() {
        let mut cfg = Config::default();
        cfg.servos.mouth.min_angle = 100;
        cfg.servos.mouth.max_angle = 20;
        let cfg = cfg.validated();
        assert!(cfg.servos.mouth.min_angle <= cfg.servos.mouth.max_angle);
    }

    #[test]
    fn deserializes_partial_json() {
        let json = r#"{"servos": {"mouth": {"pin": 18, "min_angle": 20, "max_angle": 120, "neutral": 20}}}"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.servos.mouth.pin, 18);
        // Untouched namespaces fall back to their defaults.
        assert_eq!(cfg.audio.sample_rate, 44100);
    }
}
