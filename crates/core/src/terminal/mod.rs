//! Terminal renderer and clipboard abstractions

mod traits;

pub use traits::{Clipboard, MockClipboard, MockRenderer, Renderer};
