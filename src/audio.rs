//! Audio source: delivers the latest captured PCM frame. Real device
//! acquisition (ALSA, etc.) is external to this crate; callers plug in
//! their own `AudioSource`.

use std::sync::Mutex;

/// Signed 16-bit little-endian mono PCM, plus the capture-side feature
/// estimates and a wall-clock timestamp. `raw` may be empty.
///
/// `rms`/`zcr`/`peak` here are computed by the capture side for
/// telemetry/debugging only — only the detector's own recomputation of
/// RMS/ZCR feeds the vocal decision.
#[derive(Debug, Clone, Default)]
pub struct AudioLevels {
    pub raw: Vec<u8>,
    pub rms: f64,
    pub zcr: f64,
    pub peak: f64,
    pub ts: f64,
}

/// Delivers the latest frame eagerly; must never block.
pub trait AudioSource: Send + Sync {
    fn start(&self);
    fn stop(&self);
    fn get_levels(&self) -> AudioLevels;
}

/// Always reports an empty frame. Useful where no audio capture is
/// wired up at all (unit tests of everything except the detector path).
#[derive(Debug, Default)]
pub struct SilentAudioSource;

impl AudioSource for SilentAudioSource {
    fn start(&self) {}
    fn stop(&self) {}
    fn get_levels(&self) -> AudioLevels {
        AudioLevels::default()
    }
}

/// Test/simulator double: holds a single "latest frame" slot a caller
/// can push into, standing in for the original's ALSA capture thread
/// (`_thread_main` + `_latest` + lock) without needing real hardware.
#[derive(Default)]
pub struct QueuedAudioSource {
    latest: Mutex<AudioLevels>,
}

impl QueuedAudioSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new frame; the next `get_levels()` call observes it.
    pub fn push(&self, levels: AudioLevels) {
        *self.latest.lock().unwrap() = levels;
    }
}

impl AudioSource for QueuedAudioSource {
    fn start(&self) {}
    fn stop(&self) {}
    fn get_levels(&self) -> AudioLevels {
        self.latest.lock().unwrap().clone()
    }
}
