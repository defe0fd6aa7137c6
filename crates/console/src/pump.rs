//! Host terminal input pump
//!
//! Reads crossterm events on a dedicated thread. Ordinary keys, pastes and
//! resizes become renderer notifications for the session; `Ctrl+]` followed
//! by a letter issues a session command:
//!
//! | key | command          |
//! |-----|------------------|
//! | `s` | save now         |
//! | `r` | reset to default |
//! | `e` | export           |
//! | `i` | import           |
//! | `q` | quit             |

use crate::console::ConsoleRenderer;
use crate::keymap::{is_hotkey_prefix, translate};
use crate::ui::ConsoleUi;
use crossterm::event::{Event, KeyCode, KeyEvent as CtKeyEvent, KeyEventKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use tabvm_core::types::{InputEvent, KeyEvent, Modifiers, RendererEvent};
use tabvm_core::SessionCommand;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Whether the pump keeps reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct InputPump {
    renderer: Arc<ConsoleRenderer>,
    ui: Arc<ConsoleUi>,
    commands: mpsc::Sender<SessionCommand>,
    export_dir: PathBuf,
    export_file_name: String,
    prefix_armed: bool,
}

impl InputPump {
    pub fn new(
        renderer: Arc<ConsoleRenderer>,
        ui: Arc<ConsoleUi>,
        commands: mpsc::Sender<SessionCommand>,
        export_dir: PathBuf,
        export_file_name: String,
    ) -> Self {
        Self {
            renderer,
            ui,
            commands,
            export_dir,
            export_file_name,
            prefix_armed: false,
        }
    }

    /// Route one terminal event
    pub fn handle(&mut self, event: Event) -> Flow {
        match event {
            Event::Key(key) => self.on_key(key),
            Event::Paste(text) => {
                self.renderer
                    .emit(RendererEvent::Input(InputEvent::paste(text)));
                Flow::Continue
            }
            Event::Resize(cols, rows) => {
                self.renderer.set_size(rows, cols);
                self.renderer.emit(RendererEvent::Resize { rows, cols });
                Flow::Continue
            }
            _ => Flow::Continue,
        }
    }

    fn on_key(&mut self, key: CtKeyEvent) -> Flow {
        if key.kind == KeyEventKind::Release {
            return Flow::Continue;
        }

        if self.ui.is_confirming() {
            match key.code {
                KeyCode::Char('y') | KeyCode::Char('Y') => {
                    self.ui.answer(true);
                }
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                    self.ui.answer(false);
                }
                _ => {}
            }
            return Flow::Continue;
        }

        if self.prefix_armed {
            self.prefix_armed = false;
            return self.on_hotkey(key);
        }

        if is_hotkey_prefix(&key) {
            self.prefix_armed = true;
            return Flow::Continue;
        }

        if let Some(event) = translate(&key) {
            self.renderer.emit(RendererEvent::Key(event));
        }
        Flow::Continue
    }

    fn on_hotkey(&mut self, key: CtKeyEvent) -> Flow {
        // Prefix twice sends the prefix byte itself
        if is_hotkey_prefix(&key) {
            self.renderer.emit(RendererEvent::Key(KeyEvent::new(
                "\x1d",
                "]",
                Modifiers::ctrl(),
            )));
            return Flow::Continue;
        }

        let KeyCode::Char(c) = key.code else {
            return Flow::Continue;
        };

        if c == 'q' {
            self.send(SessionCommand::Shutdown);
            return Flow::Quit;
        }

        if !self.ui.controls_enabled() {
            debug!("Hotkey '{}' ignored while controls are disabled", c);
            return Flow::Continue;
        }

        let command = match c {
            's' => SessionCommand::SaveNow,
            'r' => SessionCommand::ResetToDefault,
            'e' => SessionCommand::Export(self.export_dir.clone()),
            'i' => SessionCommand::Import(self.export_dir.join(&self.export_file_name)),
            _ => return Flow::Continue,
        };
        self.send(command);
        Flow::Continue
    }

    fn send(&self, command: SessionCommand) {
        info!("Hotkey command: {:?}", command);
        if let Err(e) = self.commands.try_send(command) {
            warn!("Session command dropped: {}", e);
        }
    }

    /// Read terminal events until quit or a read error
    pub fn spawn(mut self) -> JoinHandle<()> {
        std::thread::spawn(move || loop {
            match crossterm::event::read() {
                Ok(event) => {
                    if self.handle(event) == Flow::Quit {
                        break;
                    }
                }
                Err(e) => {
                    error!("Terminal read error: {}", e);
                    self.send(SessionCommand::Shutdown);
                    break;
                }
            }
        })
    }
}
