mod engine;
mod phase;
mod settings;

pub use engine::{SessionState, TimerEngine};
pub use phase::{Phase, TimerState};
pub use settings::{PresentationFlags, Settings};
