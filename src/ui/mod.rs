pub mod progress;
pub mod theme;

pub use progress::ProgressRenderer;
pub use theme::{Theme, theme};
