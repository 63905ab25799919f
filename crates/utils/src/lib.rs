//! Shared helpers for instruction NER: progress bars, text and JSON IO

pub mod io;
pub mod progress;
pub mod text;

pub use io::*;
pub use progress::*;
pub use text::*;
