//! Sparse, unbounded frame index with run-length inheritance.
//!
//! Only explicitly assigned frames are stored. Every other frame inherits
//! the entry at the greatest explicit frame at or before it. An explicit
//! entry may hold a value or be an explicit clear; a clear is a member of the
//! explicit set even though it reads back the same as a frame that has
//! nothing before it.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

use serde::{Deserialize, Serialize};

use crate::{Frame, TimelineError};

/// What a frame resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exposure<T> {
    /// No explicit entry at or before the frame.
    Unset,
    /// Governed by an explicit clear.
    Cleared,
    Value(T),
}

impl<T> Exposure<T> {
    pub fn value(self) -> Option<T> {
        match self {
            Exposure::Value(v) => Some(v),
            Exposure::Unset | Exposure::Cleared => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        !matches!(self, Exposure::Value(_))
    }
}

/// Classification of a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    /// Explicit entry holding a value.
    Content,
    /// Explicit clear.
    Empty,
    /// Inherits a value from an earlier explicit entry.
    RepeatContent,
    /// Inherits a clear, or has no explicit entry before it.
    RepeatEmpty,
}

impl FrameKind {
    pub fn is_explicit(self) -> bool {
        matches!(self, FrameKind::Content | FrameKind::Empty)
    }

    pub fn is_repeat(self) -> bool {
        !self.is_explicit()
    }
}

/// Result of [`SparseTimeline::remove_or_clear`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveClear<V> {
    /// An explicit value was deleted and is handed back.
    Removed(V),
    /// An explicit clear was deleted, re-exposing the run before it.
    Uncleared,
    /// The frame only inherited, so an explicit clear was inserted.
    Cleared,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SparseTimeline<V> {
    entries: BTreeMap<Frame, Option<V>>,
}

impl<V> Default for SparseTimeline<V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<V> SparseTimeline<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of explicit entries, clears included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts or overwrites an explicit value.
    pub fn set(&mut self, frame: Frame, value: V) -> Option<V> {
        self.entries.insert(frame, Some(value)).flatten()
    }

    /// Inserts or overwrites an explicit clear.
    pub fn clear(&mut self, frame: Frame) -> Option<V> {
        self.entries.insert(frame, None).flatten()
    }

    /// Inserts an explicit entry; `None` marks a clear.
    pub fn assign(&mut self, frame: Frame, value: Option<V>) -> Option<V> {
        self.entries.insert(frame, value).flatten()
    }

    /// Value covering `frame`, if any.
    pub fn get(&self, frame: Frame) -> Option<&V> {
        self.lookup(frame).value()
    }

    pub fn lookup(&self, frame: Frame) -> Exposure<&V> {
        match self.entries.range(..=frame).next_back() {
            None => Exposure::Unset,
            Some((_, None)) => Exposure::Cleared,
            Some((_, Some(v))) => Exposure::Value(v),
        }
    }

    /// Deletes an explicit entry and returns what it held (`None` for a clear).
    pub fn delete(&mut self, frame: Frame) -> Result<Option<V>, TimelineError> {
        self.entries
            .remove(&frame)
            .ok_or(TimelineError::NotExplicit(frame))
    }

    pub fn is_explicit(&self, frame: Frame) -> bool {
        self.entries.contains_key(&frame)
    }

    /// Value of the explicit entry `steps` entries away from the one
    /// covering `frame`. Frames with no covering entry have no neighbours.
    pub fn get_relative(&self, frame: Frame, steps: i64) -> Option<&V> {
        let (&anchor, covering) = self.entries.range(..=frame).next_back()?;
        let entry = match steps {
            0 => covering,
            s if s > 0 => {
                self.entries
                    .range((Excluded(anchor), Unbounded))
                    .nth((s - 1) as usize)?
                    .1
            }
            s => {
                self.entries
                    .range(..anchor)
                    .rev()
                    .nth((s.unsigned_abs() - 1) as usize)?
                    .1
            }
        };
        entry.as_ref()
    }

    pub fn classify(&self, frame: Frame) -> FrameKind {
        match self.entries.get(&frame) {
            Some(Some(_)) => FrameKind::Content,
            Some(None) => FrameKind::Empty,
            None => match self.lookup(frame) {
                Exposure::Value(_) => FrameKind::RepeatContent,
                Exposure::Unset | Exposure::Cleared => FrameKind::RepeatEmpty,
            },
        }
    }

    /// Cycles a frame: explicit entries are deleted, inherited frames get an
    /// explicit clear. Not idempotent in a single step.
    pub fn remove_or_clear(&mut self, frame: Frame) -> RemoveClear<V> {
        match self.entries.remove(&frame) {
            Some(Some(value)) => RemoveClear::Removed(value),
            Some(None) => RemoveClear::Uncleared,
            None => {
                self.entries.insert(frame, None);
                RemoveClear::Cleared
            }
        }
    }

    /// Explicit frames in ascending order.
    pub fn explicit_frames(&self) -> impl Iterator<Item = Frame> + '_ {
        self.entries.keys().copied()
    }

    /// Explicit entries in ascending frame order; `None` is a clear.
    pub fn entries(&self) -> impl Iterator<Item = (Frame, Option<&V>)> + '_ {
        self.entries.iter().map(|(f, v)| (*f, v.as_ref()))
    }

    pub fn first_frame(&self) -> Option<Frame> {
        self.entries.keys().next().copied()
    }

    pub fn last_frame(&self) -> Option<Frame> {
        self.entries.keys().next_back().copied()
    }
}

impl<V: Clone> SparseTimeline<V> {
    /// Every frame from the first to the last explicit entry, inclusive,
    /// with inherited values repeated. Fails when that span does not fit in
    /// memory addressing.
    pub fn materialized_run(&self) -> Result<Vec<Option<V>>, TimelineError> {
        let (Some(first), Some(last)) = (self.first_frame(), self.last_frame()) else {
            return Ok(Vec::new());
        };
        last.checked_sub(first)
            .and_then(|span| usize::try_from(span).ok())
            .and_then(|span| span.checked_add(1))
            .ok_or(TimelineError::RunTooLong { first, last })?;

        let mut result = Vec::new();
        let mut iter = self.entries.iter().peekable();
        while let Some((frame, value)) = iter.next() {
            // bounded by last - first, checked above
            let span = match iter.peek() {
                Some((next, _)) => (**next - *frame) as usize,
                None => 1,
            };
            result.extend(std::iter::repeat(value.clone()).take(span));
        }
        Ok(result)
    }
}

impl<V> FromIterator<(Frame, Option<V>)> for SparseTimeline<V> {
    fn from_iter<I: IntoIterator<Item = (Frame, Option<V>)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
