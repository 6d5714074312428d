//! Multi-layer exposure sheet: cels, the playhead state machine, playback
//! scheduling and change notification.

mod cel;
mod metronome;
mod scheduler;
mod sheet;

pub use cel::*;
pub use metronome::*;
pub use scheduler::*;
pub use sheet::*;

pub use timeline::{Fps, Frame, FrameKind, SparseTimeline};
