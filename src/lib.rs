//! Real-time animation core for an animatronic teddy bear.
//!
//! Wires together a vocal-activity detector, two servo engines (mouth
//! and eyes), a blink scheduler, and a telemetry publisher behind one
//! [`state_machine::TeddyStateMachine`]. Audio capture, GPIO transport,
//! and Bluetooth reconnection are external collaborators the host
//! process plugs in via the traits in [`audio`], [`pwm`], and [`bt`].

pub mod audio;
pub mod blink;
pub mod bt;
pub mod clock;
pub mod config;
pub mod detector;
pub mod pwm;
pub mod servo;
pub mod state_machine;
pub mod telemetry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use detector::{VocalDecision, VocalDetector, VocalInfo};
pub use servo::{JointConfig, ServoEngine};
pub use state_machine::{BearState, TeddyStateMachine};
pub use telemetry::{StatusSnapshot, TelemetryPublisher};
