use std::cell::RefCell;
use std::rc::Rc;

use timeline::{Fps, Frame};
use tracing::info;

use crate::{ListenerId, Sheet, SheetEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Once per second of footage.
    Strong,
    /// Every `frames_separation` frames.
    Soft,
}

/// Plays (or otherwise reports) metronome ticks.
pub trait TickSink {
    fn tick(&mut self, frame: Frame, tick: Tick);
}

/// Reports ticks through `tracing`.
#[derive(Debug, Default)]
pub struct TracingTickSink;

impl TickSink for TracingTickSink {
    fn tick(&mut self, frame: Frame, tick: Tick) {
        info!(frame, ?tick, "metronome");
    }
}

pub fn beat_at(frame: Frame, fps: Fps, frames_separation: Frame) -> Option<Tick> {
    let second = fps.frames_per_second();
    if second > 0 && frame % second == 0 {
        Some(Tick::Strong)
    } else if frames_separation > 0 && frame % frames_separation == 0 {
        Some(Tick::Soft)
    } else {
        None
    }
}

pub struct Metronome {
    sink: Rc<RefCell<dyn TickSink>>,
    listener: Option<ListenerId>,
}

impl Metronome {
    pub fn new(sink: Rc<RefCell<dyn TickSink>>) -> Self {
        Self {
            sink,
            listener: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.listener.is_some()
    }

    pub fn activate(&mut self, sheet: &mut Sheet) -> bool {
        if self.listener.is_some() {
            return false;
        }
        let sink = self.sink.clone();
        let id = sheet.subscribe(move |event, sheet| {
            if *event != SheetEvent::FrameChanged {
                return;
            }
            let frame = sheet.current_frame();
            if let Some(tick) = beat_at(frame, sheet.fps(), sheet.frames_separation()) {
                sink.borrow_mut().tick(frame, tick);
            }
        });
        self.listener = Some(id);
        true
    }

    pub fn deactivate(&mut self, sheet: &mut Sheet) -> bool {
        match self.listener.take() {
            Some(id) => sheet.unsubscribe(id),
            None => false,
        }
    }
}
