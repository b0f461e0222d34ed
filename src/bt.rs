//! Bluetooth speaker collaborator. Reconnection policy (backoff,
//! shelling out to `bluetoothctl`) is external to this crate; the state
//! machine only needs a handle it can start, stop, and poll for
//! connectivity to fill in the telemetry snapshot's `bt_connected`.

/// `start`/`stop` bracket a reconnection worker the real implementation
/// would run; `is_connected` is polled once per telemetry publish.
pub trait BluetoothCollaborator: Send + Sync {
    fn start(&self);
    fn stop(&self);
    fn is_connected(&self) -> bool;
}

/// Reports "never connected" and never blocks. Lets the state machine
/// run standalone with no paired speaker configured.
#[derive(Debug, Default)]
pub struct StubBluetooth;

impl BluetoothCollaborator for StubBluetooth {
    fn start(&self) {}
    fn stop(&self) {}
    fn is_connected(&self) -> bool {
        false
    }
}
