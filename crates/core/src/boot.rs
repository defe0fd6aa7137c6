//! Boot readiness detection
//!
//! Resolves once at startup, when the machine is interactively usable:
//!
//! - **Cold boot** (no initial state): watch raw serial output until the
//!   accumulated text ends with the prompt sentinel, then show everything
//!   printed so far.
//! - **Restore** (initial state supplied): wait for the machine's `Ready`
//!   notification, then reset the renderer to a clean prompt line.
//!
//! The path is fixed when the gate is armed. There is no timeout; a machine
//! that never signals leaves the caller waiting, with a periodic diagnostic
//! in the log.

use crate::config::BootConfig;
use crate::error::{CoreError, Result};
use crate::event::Subscription;
use crate::machine::Machine;
use crate::terminal::Renderer;
use crate::types::MachineEvent;
use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info};

/// How the machine reached readiness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootPath {
    Cold,
    Restore,
}

/// One-shot readiness gate
///
/// Arm it (which subscribes) before starting the machine so no early output
/// is missed; `wait` consumes the gate, so it can only resolve once.
pub struct BootGate {
    path: BootPath,
    events: Subscription<MachineEvent>,
    sentinel: Vec<u8>,
    diagnostic_interval: Duration,
}

impl BootGate {
    pub fn arm(machine: &dyn Machine, restoring: bool, config: &BootConfig) -> Self {
        let path = if restoring {
            BootPath::Restore
        } else {
            BootPath::Cold
        };
        debug!("Boot gate armed for {:?} path", path);
        Self {
            path,
            events: machine.subscribe(),
            sentinel: config.sentinel.as_bytes().to_vec(),
            diagnostic_interval: config.diagnostic_interval(),
        }
    }

    pub fn path(&self) -> BootPath {
        self.path
    }

    /// Wait for readiness; unsubscribes on return
    pub async fn wait(self, renderer: &dyn Renderer) -> Result<BootPath> {
        match self.path {
            BootPath::Cold => self.wait_for_prompt(renderer).await,
            BootPath::Restore => self.wait_for_ready(renderer).await,
        }
    }

    async fn wait_for_prompt(mut self, renderer: &dyn Renderer) -> Result<BootPath> {
        let mut serial = Vec::new();
        let mut ticker = interval_at(
            Instant::now() + self.diagnostic_interval,
            self.diagnostic_interval,
        );
        let mut waited = Duration::ZERO;

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(MachineEvent::OutputByte(byte)) => {
                        serial.push(byte);
                        if serial.ends_with(&self.sentinel) {
                            info!("Boot complete");
                            renderer.write(&String::from_utf8_lossy(&serial));
                            return Ok(BootPath::Cold);
                        }
                    }
                    Some(MachineEvent::Ready) => {}
                    None => return Err(closed()),
                },
                _ = ticker.tick() => {
                    waited += self.diagnostic_interval;
                    debug!("Waiting for boot... {} seconds", waited.as_secs());
                }
            }
        }
    }

    async fn wait_for_ready(mut self, renderer: &dyn Renderer) -> Result<BootPath> {
        loop {
            match self.events.recv().await {
                Some(MachineEvent::Ready) => {
                    info!("Machine is ready");
                    show_prompt(renderer, &String::from_utf8_lossy(&self.sentinel));
                    return Ok(BootPath::Restore);
                }
                Some(MachineEvent::OutputByte(_)) => {}
                None => return Err(closed()),
            }
        }
    }
}

/// Clear the renderer down to a single fresh prompt line
pub fn show_prompt(renderer: &dyn Renderer, prompt: &str) {
    renderer.reset();
    renderer.fit();
    renderer.write(prompt);
    renderer.focus();
}

fn closed() -> CoreError {
    CoreError::Machine("event stream closed before the machine was ready".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::MockMachine;
    use crate::terminal::MockRenderer;
    use std::sync::Arc;

    fn config() -> BootConfig {
        BootConfig::default()
    }

    #[tokio::test]
    async fn test_cold_boot_resolves_on_sentinel() {
        let machine = MockMachine::new();
        let renderer = MockRenderer::default();
        let gate = BootGate::arm(&machine, false, &config());
        assert_eq!(gate.path(), BootPath::Cold);

        machine.emit_output(b"Welcome to Alpine\r\nlocalhost:~# ");
        let path = gate.wait(&renderer).await.unwrap();

        assert_eq!(path, BootPath::Cold);
        assert_eq!(renderer.writes(), vec!["Welcome to Alpine\r\nlocalhost:~# "]);
        // Unsubscribed once resolved
        assert_eq!(machine.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_boot_ignores_partial_sentinel() {
        let machine = Arc::new(MockMachine::new());
        let renderer = Arc::new(MockRenderer::default());
        let gate = BootGate::arm(machine.as_ref(), false, &config());

        // Missing the trailing space
        machine.emit_output(b"localhost:~#");
        let task_renderer = renderer.clone();
        let task = tokio::spawn(async move { gate.wait(task_renderer.as_ref()).await });

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!task.is_finished());
        assert!(renderer.writes().is_empty());

        machine.emit_output(b" ");
        assert_eq!(task.await.unwrap().unwrap(), BootPath::Cold);
        assert_eq!(renderer.output(), "localhost:~# ");
    }

    #[tokio::test]
    async fn test_cold_boot_matches_only_at_tail() {
        let machine = MockMachine::new();
        let renderer = MockRenderer::default();
        let gate = BootGate::arm(&machine, false, &config());

        // Sentinel appears mid-stream; resolution happens right at that byte
        machine.emit_output(b"localhost:~# ls");
        gate.wait(&renderer).await.unwrap();
        assert_eq!(renderer.output(), "localhost:~# ");
    }

    #[tokio::test]
    async fn test_restore_path_waits_for_ready() {
        let machine = MockMachine::new();
        let renderer = MockRenderer::default();
        let gate = BootGate::arm(&machine, true, &config());

        // Output during restore does not resolve the restore path
        machine.emit_output(b"localhost:~# ");
        machine.emit_ready();
        let path = gate.wait(&renderer).await.unwrap();

        assert_eq!(path, BootPath::Restore);
        assert_eq!(renderer.reset_count(), 1);
        assert_eq!(renderer.writes(), vec!["localhost:~# "]);
        assert!(renderer.is_focused());
    }

    #[tokio::test]
    async fn test_cold_path_ignores_ready() {
        let machine = MockMachine::new();
        let renderer = MockRenderer::default();
        let gate = BootGate::arm(&machine, false, &config());

        machine.emit_ready();
        machine.emit_output(b"localhost:~# ");
        assert_eq!(gate.wait(&renderer).await.unwrap(), BootPath::Cold);
        assert_eq!(renderer.reset_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_stream_is_an_error() {
        let machine = MockMachine::new();
        let renderer = MockRenderer::default();
        let gate = BootGate::arm(&machine, false, &config());
        drop(machine);

        let result = gate.wait(&renderer).await;
        assert!(matches!(result, Err(CoreError::Machine(_))));
    }
}
