//! Machine executor abstraction
//!
//! The virtual machine itself is an external collaborator. The session only
//! needs lifecycle control, whole-state save/restore, serial input, and a
//! notification stream of serial output bytes and readiness.

use crate::error::{CoreError, Result};
use crate::event::{Listeners, Subscription};
use crate::types::{InitialState, MachineEvent, Snapshot};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// Machine executor operations consumed by the session
#[async_trait]
pub trait Machine: Send + Sync {
    /// Boot the machine (or resume from the initial state given at launch)
    async fn start(&self) -> Result<()>;

    /// Pause execution
    async fn stop(&self) -> Result<()>;

    /// Resume execution after `stop`
    async fn run(&self) -> Result<()>;

    /// Capture full machine state
    async fn save_state(&self) -> Result<Snapshot>;

    /// Replace full machine state; fails with `CoreError::Restore`
    async fn restore_state(&self, snapshot: Snapshot) -> Result<()>;

    /// Write text to the serial console input
    fn send_serial(&self, text: &str) -> Result<()>;

    /// Register for output-byte and ready notifications
    fn subscribe(&self) -> Subscription<MachineEvent>;
}

/// Machine bootstrap: constructs an executor around an optional initial state
#[async_trait]
pub trait MachineLauncher: Send + Sync {
    async fn launch(&self, initial: Option<InitialState>) -> Result<Arc<dyn Machine>>;
}

#[derive(Debug, Default)]
struct MockMachineState {
    started: bool,
    running: bool,
    state: Snapshot,
    initial: Option<InitialState>,
    boot_output: Vec<u8>,
    sent: Vec<String>,
    restored: Vec<Snapshot>,
    fail_save: bool,
    fail_restore: bool,
    stops: usize,
    runs: usize,
}

/// Mock machine for testing
///
/// On `start`, a cold machine replays its configured boot output one byte at
/// a time; a machine launched with an initial state fires `Ready` instead.
#[derive(Default)]
pub struct MockMachine {
    listeners: Listeners<MachineEvent>,
    inner: Mutex<MockMachineState>,
}

impl MockMachine {
    pub fn new() -> Self {
        let machine = Self::default();
        machine.inner.lock().state = Snapshot::from(&b"mock-machine-state"[..]);
        machine
    }

    /// Serial output emitted on a cold `start`
    pub fn with_boot_output(self, output: &[u8]) -> Self {
        self.inner.lock().boot_output = output.to_vec();
        self
    }

    /// State returned by `save_state`
    pub fn with_state(self, state: impl Into<Snapshot>) -> Self {
        self.inner.lock().state = state.into();
        self
    }

    pub fn set_initial(&self, initial: Option<InitialState>) {
        self.inner.lock().initial = initial;
    }

    pub fn set_fail_save(&self, fail: bool) {
        self.inner.lock().fail_save = fail;
    }

    pub fn set_fail_restore(&self, fail: bool) {
        self.inner.lock().fail_restore = fail;
    }

    /// Push serial output as if the guest wrote it
    pub fn emit_output(&self, bytes: &[u8]) {
        for &byte in bytes {
            self.listeners.emit(MachineEvent::OutputByte(byte));
        }
    }

    pub fn emit_ready(&self) {
        self.listeners.emit(MachineEvent::Ready);
    }

    /// Everything sent to the serial input, one entry per send
    pub fn sent(&self) -> Vec<String> {
        self.inner.lock().sent.clone()
    }

    /// Snapshots accepted by `restore_state`
    pub fn restored(&self) -> Vec<Snapshot> {
        self.inner.lock().restored.clone()
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    pub fn stop_count(&self) -> usize {
        self.inner.lock().stops
    }

    pub fn run_count(&self) -> usize {
        self.inner.lock().runs
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

#[async_trait]
impl Machine for MockMachine {
    async fn start(&self) -> Result<()> {
        let (restoring, boot_output) = {
            let mut inner = self.inner.lock();
            if inner.started {
                return Err(CoreError::InvalidState("machine already started".into()));
            }
            inner.started = true;
            inner.running = true;
            if let Some(InitialState::Saved(snapshot)) = &inner.initial {
                inner.state = snapshot.clone();
            }
            (inner.initial.is_some(), inner.boot_output.clone())
        };

        if restoring {
            self.emit_ready();
        } else {
            self.emit_output(&boot_output);
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.running = false;
        inner.stops += 1;
        Ok(())
    }

    async fn run(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.running = true;
        inner.runs += 1;
        Ok(())
    }

    async fn save_state(&self) -> Result<Snapshot> {
        let inner = self.inner.lock();
        if inner.fail_save {
            return Err(CoreError::Machine("save_state failed".into()));
        }
        Ok(inner.state.clone())
    }

    async fn restore_state(&self, snapshot: Snapshot) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_restore {
            return Err(CoreError::Restore("incompatible snapshot".into()));
        }
        inner.state = snapshot.clone();
        inner.restored.push(snapshot);
        Ok(())
    }

    fn send_serial(&self, text: &str) -> Result<()> {
        self.inner.lock().sent.push(text.to_string());
        Ok(())
    }

    fn subscribe(&self) -> Subscription<MachineEvent> {
        self.listeners.subscribe()
    }
}

/// Launcher that always hands out the same mock machine
pub struct MockLauncher {
    machine: Arc<MockMachine>,
    launches: Mutex<Vec<Option<InitialState>>>,
}

impl MockLauncher {
    pub fn new(machine: Arc<MockMachine>) -> Self {
        Self {
            machine,
            launches: Mutex::new(Vec::new()),
        }
    }

    pub fn machine(&self) -> Arc<MockMachine> {
        self.machine.clone()
    }

    /// Initial states passed to each `launch`
    pub fn launches(&self) -> Vec<Option<InitialState>> {
        self.launches.lock().clone()
    }
}

#[async_trait]
impl MachineLauncher for MockLauncher {
    async fn launch(&self, initial: Option<InitialState>) -> Result<Arc<dyn Machine>> {
        self.launches.lock().push(initial.clone());
        self.machine.set_initial(initial);
        Ok(self.machine.clone())
    }
}
