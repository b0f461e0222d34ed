//! PWM sink: the GPIO transport the servo engine emits pulse-width
//! commands to. Real GPIO access is external to this crate; callers
//! plug in their own `PwmSink` (a `pigpio`/`rppal` wrapper, say).

/// Accepts `(pin, pulse_us)`. `pulse_us = 0` means "release" (stop
/// driving the servo). Implementations must be cheap — the servo worker
/// calls `emit` on its own thread once per tick and must never block
/// longer than a single tick on it.
pub trait PwmSink: Send + Sync {
    fn emit(&self, pin: u32, pulse_us: u32);
}

/// Fallback sink for environments without real GPIO hardware (no
/// `pigpio` daemon reachable, running in CI, etc). Logs at debug level
/// instead of driving a pin, mirroring the original's `self._pi is None`
/// simulation branch.
#[derive(Debug, Default)]
pub struct SimulatedPwmSink;

impl PwmSink for SimulatedPwmSink {
    fn emit(&self, pin: u32, pulse_us: u32) {
        log::debug!("Servo(pin={pin}) -> pulse={pulse_us} us (simulated)");
    }
}
