//! Vocal detector (C4): turns a raw PCM frame into a vocalness score and
//! a hysteretic vocal/non-vocal decision.
//!
//! # Feature Pipeline
//!
//! - RMS and a half zero-crossing rate over normalized samples.
//! - A small bank of Goertzel magnitudes (one recursive second-order
//!   filter per configured frequency) standing in for a full FFT —
//!   cheap enough to run every tick, good enough to separate sibilant
//!   (high-centroid) speech from low-frequency rumble.
//! - A weighted blend of RMS/centroid/inverse-ZCR into `vocalness`.
//!
//! The hysteresis (`hysteresis_state`) only *clears* after `off_hold_ms`
//! of continuous non-candidate frames, so a single dropped consonant
//! mid-word doesn't snap the mouth shut.

use crate::config::SpeechConfig;

/// Per-frame feature output, always in `[0, 1]` (zero for empty input).
#[derive(Debug, Clone, Copy, Default)]
pub struct VocalInfo {
    pub vocalness: f64,
    pub rms: f64,
    pub zcr: f64,
    pub centroid: f64,
}

/// Result of one `is_vocal` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct VocalDecision {
    pub vocal: bool,
    pub info: VocalInfo,
}

/// Single-frequency Goertzel magnitude over normalized samples.
pub fn goertzel(samples: &[f64], sample_rate: f64, freq: f64) -> f64 {
    let omega = 2.0 * std::f64::consts::PI * freq / sample_rate;
    let coeff = 2.0 * omega.cos();
    let mut s_prev = 0.0f64;
    let mut s_prev2 = 0.0f64;
    for &x in samples {
        let s = x + coeff * s_prev - s_prev2;
        s_prev2 = s_prev;
        s_prev = s;
    }
    (s_prev2 * s_prev2 + s_prev * s_prev - coeff * s_prev * s_prev2)
        .max(0.0)
        .sqrt()
}

fn decode_samples(raw: &[u8]) -> Vec<f64> {
    raw.chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f64 / 32768.0)
        .collect()
}

/// Stateless feature extraction shared by `is_vocal` and anything that
/// just wants the numbers (the `test_goertzel`-style sanity scripts).
pub fn compute_vocalness(raw: &[u8], cfg: &SpeechConfig, sample_rate: f64) -> VocalInfo {
    if raw.len() < 2 {
        return VocalInfo::default();
    }
    let samples = decode_samples(raw);
    if samples.is_empty() {
        return VocalInfo::default();
    }

    let rms = (samples.iter().map(|s| s * s).sum::<f64>() / samples.len() as f64).sqrt();

    let mut zc = 0u32;
    for w in samples.windows(2) {
        let a = if w[0] > 0.0 { 1 } else { 0 };
        let b = if w[1] > 0.0 { 1 } else { 0 };
        zc += (a - b).unsigned_abs() as u32;
    }
    let zcr = zc as f64 / (samples.len().saturating_sub(1)).max(1) as f64;

    let mags: Vec<f64> = cfg
        .goertzel_freqs
        .iter()
        .map(|&f| goertzel(&samples, sample_rate, f))
        .collect();
    let mag_sum: f64 = mags.iter().sum();
    let centroid = if mag_sum > 0.0 {
        let weighted: f64 = cfg
            .goertzel_freqs
            .iter()
            .zip(mags.iter())
            .map(|(f, m)| f * m)
            .sum();
        let max_freq = cfg
            .goertzel_freqs
            .iter()
            .cloned()
            .fold(f64::MIN, f64::max)
            .max(1.0);
        (weighted / mag_sum) / max_freq
    } else {
        0.0
    };

    let w = &cfg.vocalness_weights;
    let rms_term = (rms / (4.0 * cfg.rms_threshold).max(1e-9)).min(1.0);
    let zcr_term = (zcr / (4.0 * cfg.zcr_threshold).max(1e-9)).min(1.0);
    let vocalness =
        (w.rms * rms_term + w.centroid * centroid + w.zcr * zcr_term).clamp(0.0, 1.0);

    VocalInfo {
        vocalness,
        rms,
        zcr,
        centroid,
    }
}

/// Hysteretic vocal/non-vocal decision, confined to a single owner
/// thread — `is_vocal` is not re-entrant, matching the state machine's
/// exclusive ownership of one detector instance.
pub struct VocalDetector {
    config: SpeechConfig,
    sample_rate: f64,
    hysteresis_state: bool,
    last_above_ts: f64,
}

impl VocalDetector {
    pub fn new(config: SpeechConfig, sample_rate: f64) -> Self {
        Self {
            config,
            sample_rate,
            hysteresis_state: false,
            last_above_ts: 0.0,
        }
    }

    /// `now` is monotonic seconds (see [`crate::clock::Clock`]).
    pub fn is_vocal(&mut self, raw: &[u8], now: f64) -> VocalDecision {
        let info = compute_vocalness(raw, &self.config, self.sample_rate);

        let zcr_term = (info.zcr / (4.0 * self.config.zcr_threshold).max(1e-9)).min(1.0);
        let voicedness = (1.0 - zcr_term) > 0.55;
        let centroid_ok = info.centroid > 0.45;
        let rms_ok = info.rms > self.config.rms_threshold;
        let vocal_ok = info.vocalness >= self.config.vocalness_threshold_on;
        let candidate = rms_ok && vocal_ok && (centroid_ok || voicedness);

        if candidate {
            self.last_above_ts = now;
            self.hysteresis_state = true;
        } else if (now - self.last_above_ts) * 1000.0 >= self.config.off_hold_ms as f64 {
            self.hysteresis_state = false;
        }

        VocalDecision {
            vocal: self.hysteresis_state,
            info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_sine(freq: f64, sample_rate: f64, n: usize, amp: f64) -> Vec<u8> {
        let mut raw = Vec::with_capacity(n * 2);
        for i in 0..n {
            let s = amp * (2.0 * std::f64::consts::PI * freq * i as f64 / sample_rate).sin();
            let v = (s * 32767.0).clamp(-32767.0, 32767.0) as i16;
            raw.extend_from_slice(&v.to_le_bytes());
        }
        raw
    }

    #[test]
    fn empty_input_is_all_zero() {
        let cfg = SpeechConfig::default();
        let info = compute_vocalness(&[], &cfg, 44100.0);
        assert_eq!(info.vocalness, 0.0);
        assert_eq!(info.rms, 0.0);
        assert_eq!(info.zcr, 0.0);
        assert_eq!(info.centroid, 0.0);
    }

    #[test]
    fn vocalness_is_bounded() {
        let cfg = SpeechConfig::default();
        let raw = make_sine(500.0, 44100.0, 4410, 0.5);
        let info = compute_vocalness(&raw, &cfg, 44100.0);
        assert!((0.0..=1.0).contains(&info.vocalness));
    }

    // S1: pure-sine recognition
    #[test]
    fn pure_sine_recognition_s1() {
        let cfg = SpeechConfig::default();
        let raw = make_sine(500.0, 44100.0, 4410, 0.5);
        let info = compute_vocalness(&raw, &cfg, 44100.0);
        assert!((info.rms - 0.354).abs() < 0.01, "rms={}", info.rms);
        assert!((info.zcr - 0.0227).abs() < 0.01, "zcr={}", info.zcr);

        let samples = decode_samples(&raw);
        let mag_500 = goertzel(&samples, 44100.0, 500.0);
        let mag_300 = goertzel(&samples, 44100.0, 300.0);
        let mag_1000 = goertzel(&samples, 44100.0, 1000.0);
        assert!(mag_500 > mag_300);
        assert!(mag_500 > mag_1000);

        let mut detector = VocalDetector::new(cfg, 44100.0);
        let decision = detector.is_vocal(&raw, 0.0);
        assert!(decision.vocal);
    }

    // S2: silence hysteresis
    #[test]
    fn silence_hysteresis_s2() {
        let cfg = SpeechConfig::default();
        let sample_rate = 44100.0;
        let mut detector = VocalDetector::new(cfg, sample_rate);

        let vocal_frame = make_sine(500.0, sample_rate, 4410, 0.5);
        assert!(detector.is_vocal(&vocal_frame, 0.0).vocal);

        // silence frame: ~1 ms at 44.1kHz
        let silence = vec![0u8; (sample_rate as usize / 1000) * 2];

        let mut now = 0.0;
        for _ in 0..20 {
            now += 0.001;
            assert!(
                detector.is_vocal(&silence, now).vocal,
                "should still be within off_hold_ms at t={now}"
            );
        }

        // enough additional silence to clear the 200ms off-hold
        now += 0.2;
        assert!(!detector.is_vocal(&silence, now).vocal);
    }

    #[test]
    fn off_th_is_reserved_but_present_in_config() {
        // The config surface carries vocalness_threshold_off even though
        // the decision rule doesn't read it; see DESIGN.md for the
        // rationale.
        let cfg = SpeechConfig::default();
        assert_eq!(cfg.vocalness_threshold_off, 0.30);
    }
}
