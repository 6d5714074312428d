use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

mod sparse;
pub use sparse::*;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimelineError {
    #[error("frame {0} is not an explicit entry")]
    NotExplicit(Frame),
    #[error("run from frame {first} to {last} is too long to materialize")]
    RunTooLong { first: Frame, last: Frame },
}

pub type Frame = i64; // 0-based frame index, negatives allowed

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Fps {
    pub num: u32,
    pub den: u32,
}

impl Fps {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Wall-clock length of one frame, rounded to whole milliseconds.
    pub fn frame_duration(&self) -> Duration {
        if self.num == 0 {
            return Duration::ZERO;
        }
        let millis = (1000.0 * self.den as f64 / self.num as f64).round();
        Duration::from_millis(millis as u64)
    }

    /// Whole frames per second, used for beat grouping.
    pub fn frames_per_second(&self) -> Frame {
        if self.den == 0 {
            return 0;
        }
        (self.num / self.den) as Frame
    }
}

impl Default for Fps {
    fn default() -> Self {
        Self::new(24, 1)
    }
}
