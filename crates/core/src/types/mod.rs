//! Domain types shared by the session components

mod event;
mod snapshot;

pub use event::{InputEvent, InputKind, KeyEvent, MachineEvent, Modifiers, RendererEvent};
pub use snapshot::{InitialState, Snapshot};
