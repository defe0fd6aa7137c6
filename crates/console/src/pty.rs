//! PTY-backed machine
//!
//! Runs a serial-console command under a pseudo-terminal and exposes it as a
//! [`Machine`]. The reader runs on a blocking thread (portable-pty reads are
//! blocking) and publishes every output byte in order. Machine state is the
//! console capture; see [`CaptureBuffer`].

use crate::capture::CaptureBuffer;
use async_trait::async_trait;
use parking_lot::Mutex;
use portable_pty::{
    native_pty_system, Child, ChildKiller, CommandBuilder, ExitStatus, MasterPty, PtySize,
};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tabvm_core::event::{Listeners, Subscription};
use tabvm_core::fetch::StateFetcher;
use tabvm_core::machine::{Machine, MachineLauncher};
use tabvm_core::types::{InitialState, MachineEvent, Snapshot};
use tabvm_core::{CoreError, Result};

/// Default capture size: several screenfuls of scrollback
pub const DEFAULT_CAPTURE_BYTES: usize = 1024 * 1024;

/// Command line run as the machine's serial console
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ConsoleCommand {
    /// First element is the program; `None` when empty
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    fn builder(&self) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(&self.program);
        cmd.args(&self.args);
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }
        cmd
    }
}

/// Where PTY output goes: capture, subscribers, or held back while stopped
#[derive(Clone)]
pub(crate) struct OutputSink {
    listeners: Listeners<MachineEvent>,
    capture: Arc<Mutex<CaptureBuffer>>,
    paused: Arc<AtomicBool>,
    held: Arc<Mutex<Vec<u8>>>,
}

impl OutputSink {
    pub(crate) fn new(capture_bytes: usize) -> Self {
        Self {
            listeners: Listeners::new(),
            capture: Arc::new(Mutex::new(CaptureBuffer::new(capture_bytes))),
            paused: Arc::new(AtomicBool::new(false)),
            held: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Record a chunk and publish it byte by byte, unless stopped
    pub(crate) fn deliver(&self, chunk: &[u8]) {
        if self.paused.load(Ordering::SeqCst) {
            self.held.lock().extend_from_slice(chunk);
            return;
        }
        self.publish(chunk);
    }

    fn publish(&self, chunk: &[u8]) {
        self.capture.lock().push(chunk);
        for &byte in chunk {
            self.listeners.emit(MachineEvent::OutputByte(byte));
        }
    }

    pub(crate) fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Resume and release output produced while stopped
    pub(crate) fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        let held = std::mem::take(&mut *self.held.lock());
        if !held.is_empty() {
            self.publish(&held);
        }
    }

    pub(crate) fn capture(&self) -> Vec<u8> {
        self.capture.lock().to_vec()
    }

    /// Replace the capture; output held while stopped belongs to the old state
    pub(crate) fn restore(&self, state: &[u8]) {
        self.held.lock().clear();
        {
            let mut capture = self.capture.lock();
            capture.replace(state);
            tracing::debug!(
                "Capture restored ({} of {} bytes kept)",
                capture.len(),
                capture.capacity()
            );
        }
        self.listeners.emit(MachineEvent::Ready);
    }

    pub(crate) fn subscribe(&self) -> Subscription<MachineEvent> {
        self.listeners.subscribe()
    }
}

struct PtyProcess {
    // Dropping the master closes the PTY
    _master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
}

/// Machine running a console command under a PTY
pub struct PtyMachine {
    command: ConsoleCommand,
    size: (u16, u16),
    sink: OutputSink,
    initial: Mutex<Option<Snapshot>>,
    process: Mutex<Option<PtyProcess>>,
}

impl PtyMachine {
    /// Not spawned until `start`; an initial state is applied right after
    pub fn new(
        command: ConsoleCommand,
        rows: u16,
        cols: u16,
        capture_bytes: usize,
        initial: Option<Snapshot>,
    ) -> Self {
        let sink = OutputSink::new(capture_bytes);
        if let Some(snapshot) = &initial {
            sink.capture.lock().replace(snapshot.as_bytes());
        }
        Self {
            command,
            size: (rows, cols),
            sink,
            initial: Mutex::new(initial),
            process: Mutex::new(None),
        }
    }

    fn spawn(&self) -> anyhow::Result<PtyProcess> {
        let (rows, cols) = self.size;
        let pair = native_pty_system().openpty(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        })?;

        let child = pair.slave.spawn_command(self.command.builder())?;
        let writer = pair.master.take_writer()?;
        let mut reader = pair.master.try_clone_reader()?;
        let sink = self.sink.clone();
        let program = self.command.program.clone();

        let pty_reader = tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => {
                        tracing::info!("{} exited", program);
                        break;
                    }
                    Ok(n) => {
                        tracing::trace!("PTY output: {} bytes", n);
                        sink.deliver(&buf[..n]);
                    }
                    Err(e) => {
                        tracing::debug!("PTY read ended: {}", e);
                        break;
                    }
                }
            }
        });

        tokio::spawn(async move {
            if let Err(e) = pty_reader.await {
                tracing::error!("PTY reader task panicked: {}", e);
            }
        });

        Ok(PtyProcess {
            _master: pair.master,
            child,
            writer,
        })
    }
}

fn not_started() -> CoreError {
    CoreError::InvalidState("console machine is not started".into())
}

#[async_trait]
impl Machine for PtyMachine {
    async fn start(&self) -> Result<()> {
        if self.process.lock().is_some() {
            return Err(CoreError::InvalidState("console machine already started".into()));
        }
        let process = self
            .spawn()
            .map_err(|e| CoreError::Machine(format!("Failed to spawn {}: {e}", self.command.program)))?;
        *self.process.lock() = Some(process);
        tracing::info!(
            "Console machine started: {} {}",
            self.command.program,
            self.command.args.join(" ")
        );

        if let Some(snapshot) = self.initial.lock().take() {
            tracing::debug!("Applying initial state ({} bytes)", snapshot.len());
            self.sink.restore(snapshot.as_bytes());
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.sink.pause();
        Ok(())
    }

    async fn run(&self) -> Result<()> {
        self.sink.resume();
        Ok(())
    }

    async fn save_state(&self) -> Result<Snapshot> {
        Ok(Snapshot::from(self.sink.capture()))
    }

    async fn restore_state(&self, snapshot: Snapshot) -> Result<()> {
        self.sink.restore(snapshot.as_bytes());
        Ok(())
    }

    fn send_serial(&self, text: &str) -> Result<()> {
        let mut process = self.process.lock();
        let process = process.as_mut().ok_or_else(not_started)?;
        process.writer.write_all(text.as_bytes())?;
        process.writer.flush()?;
        Ok(())
    }

    fn subscribe(&self) -> Subscription<MachineEvent> {
        self.sink.subscribe()
    }
}

impl Drop for PtyMachine {
    fn drop(&mut self) {
        if let Some(mut process) = self.process.lock().take() {
            if let Some(status) = reap(process.child.as_mut()) {
                tracing::debug!("Console command ended: {:?}", status);
            }
        }
    }
}

/// Kill the console command if it is still running and collect its status
fn reap(child: &mut dyn Child) -> Option<ExitStatus> {
    match child.try_wait() {
        Ok(Some(status)) => return Some(status),
        Ok(None) => {}
        Err(e) => tracing::debug!("Failed to poll console command: {}", e),
    }
    if let Err(e) = child.kill() {
        tracing::debug!("Failed to kill console command: {}", e);
    }
    match child.wait() {
        Ok(status) => Some(status),
        Err(e) => {
            tracing::warn!("Failed to reap console command: {}", e);
            None
        }
    }
}

/// Builds a fresh [`PtyMachine`] for each session launch
pub struct PtyLauncher {
    command: ConsoleCommand,
    fetcher: Arc<dyn StateFetcher>,
    capture_bytes: usize,
}

impl PtyLauncher {
    pub fn new(command: ConsoleCommand, fetcher: Arc<dyn StateFetcher>) -> Self {
        Self {
            command,
            fetcher,
            capture_bytes: DEFAULT_CAPTURE_BYTES,
        }
    }

    pub fn with_capture_bytes(mut self, capture_bytes: usize) -> Self {
        self.capture_bytes = capture_bytes;
        self
    }
}

#[async_trait]
impl MachineLauncher for PtyLauncher {
    async fn launch(&self, initial: Option<InitialState>) -> Result<Arc<dyn Machine>> {
        let snapshot = match initial {
            None => None,
            Some(InitialState::Saved(snapshot)) => Some(snapshot),
            Some(InitialState::Default(reference)) => {
                Some(Snapshot::from(self.fetcher.fetch(&reference.location).await?))
            }
        };
        let (cols, rows) = crossterm::terminal::size().unwrap_or((80, 24));
        Ok(Arc::new(PtyMachine::new(
            self.command.clone(),
            rows,
            cols,
            self.capture_bytes,
            snapshot,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabvm_core::fetch::{DefaultStateReference, LocalFetcher};

    fn command() -> ConsoleCommand {
        ConsoleCommand::from_argv(&["sh".to_string(), "-i".to_string()]).unwrap()
    }

    #[test]
    fn test_command_from_argv() {
        let cmd = command();
        assert_eq!(cmd.program, "sh");
        assert_eq!(cmd.args, vec!["-i"]);
        assert_eq!(ConsoleCommand::from_argv(&[]), None);
    }

    #[test]
    fn test_sink_publishes_bytes_in_order() {
        let sink = OutputSink::new(64);
        let mut events = sink.subscribe();
        sink.deliver(b"ok");

        assert_eq!(events.try_recv(), Some(MachineEvent::OutputByte(b'o')));
        assert_eq!(events.try_recv(), Some(MachineEvent::OutputByte(b'k')));
        assert_eq!(sink.capture(), b"ok");
    }

    #[test]
    fn test_sink_holds_output_while_stopped() {
        let sink = OutputSink::new(64);
        let mut events = sink.subscribe();
        sink.pause();
        sink.deliver(b"x");
        assert_eq!(events.try_recv(), None);
        assert!(sink.capture().is_empty());

        sink.resume();
        assert_eq!(events.try_recv(), Some(MachineEvent::OutputByte(b'x')));
        assert_eq!(sink.capture(), b"x");
    }

    #[test]
    fn test_sink_restore_discards_held_and_fires_ready() {
        let sink = OutputSink::new(64);
        let mut events = sink.subscribe();
        sink.pause();
        sink.deliver(b"stale");
        sink.restore(b"restored");
        sink.resume();

        assert_eq!(events.try_recv(), Some(MachineEvent::Ready));
        assert_eq!(events.try_recv(), None);
        assert_eq!(sink.capture(), b"restored");
    }

    #[tokio::test]
    async fn test_unstarted_machine() {
        let machine = PtyMachine::new(command(), 24, 80, 64, None);
        assert!(matches!(
            machine.send_serial("ls\r"),
            Err(CoreError::InvalidState(_))
        ));
        assert!(machine.save_state().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_state_replaces_capture() {
        let machine = PtyMachine::new(command(), 24, 80, 64, None);
        let mut events = machine.subscribe();
        machine
            .restore_state(Snapshot::from(vec![1u8, 2, 3]))
            .await
            .unwrap();

        assert_eq!(events.try_recv(), Some(MachineEvent::Ready));
        assert_eq!(machine.save_state().await.unwrap().as_bytes(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_launcher_resolves_initial_state() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("default.bin"), b"default capture").unwrap();
        let launcher = PtyLauncher::new(
            command(),
            Arc::new(LocalFetcher::with_base_dir(dir.path())),
        );

        let saved = launcher
            .launch(Some(InitialState::Saved(Snapshot::from(vec![7u8]))))
            .await
            .unwrap();
        assert_eq!(saved.save_state().await.unwrap().as_bytes(), &[7]);

        let default = launcher
            .launch(Some(InitialState::Default(DefaultStateReference::new("default.bin"))))
            .await
            .unwrap();
        assert_eq!(
            default.save_state().await.unwrap().as_bytes(),
            b"default capture"
        );

        let missing = launcher
            .launch(Some(InitialState::Default(DefaultStateReference::new("gone.bin"))))
            .await;
        assert!(matches!(missing, Err(CoreError::Fetch { .. })));
    }

    /// Child that exits only when killed
    #[derive(Debug, Clone, Default)]
    struct FakeChild {
        exited: bool,
        kills: usize,
        waits: usize,
    }

    impl ChildKiller for FakeChild {
        fn kill(&mut self) -> std::io::Result<()> {
            self.kills += 1;
            self.exited = true;
            Ok(())
        }

        fn clone_killer(&self) -> Box<dyn ChildKiller + Send + Sync> {
            Box::new(self.clone())
        }
    }

    impl Child for FakeChild {
        fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
            Ok(self.exited.then(|| ExitStatus::with_exit_code(0)))
        }

        fn wait(&mut self) -> std::io::Result<ExitStatus> {
            assert!(self.exited, "wait would block on a running child");
            self.waits += 1;
            Ok(ExitStatus::with_exit_code(137))
        }

        fn process_id(&self) -> Option<u32> {
            None
        }

        #[cfg(windows)]
        fn as_raw_handle(&self) -> Option<std::os::windows::io::RawHandle> {
            None
        }
    }

    #[test]
    fn test_reap_kills_then_waits() {
        let mut child = FakeChild::default();
        let status = reap(&mut child).unwrap();

        assert_eq!(status.exit_code(), 137);
        assert_eq!(child.kills, 1);
        assert_eq!(child.waits, 1);
    }

    #[test]
    fn test_reap_exited_child_is_not_killed() {
        let mut child = FakeChild {
            exited: true,
            ..FakeChild::default()
        };
        assert!(reap(&mut child).unwrap().success());
        assert_eq!(child.kills, 0);
        assert_eq!(child.waits, 0);
    }
}
