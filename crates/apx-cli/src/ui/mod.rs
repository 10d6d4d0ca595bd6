//! Terminal output.

pub mod console;
pub mod theme;

pub use console::Console;
pub use theme::{Icons, Theme};
