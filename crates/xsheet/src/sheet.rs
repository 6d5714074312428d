use serde::{Deserialize, Serialize};
use timeline::{Fps, Frame, FrameKind, RemoveClear, SparseTimeline};
use tracing::{debug, info, warn};

use crate::{Cel, CelId, Scheduler, SurfaceFactory, TimerToken};

fn default_frames_length() -> Frame {
    24 * 60
}

fn default_layers_length() -> usize {
    3
}

fn default_frames_separation() -> Frame {
    6
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SheetConfig {
    #[serde(default = "default_frames_length")]
    pub frames_length: Frame,
    #[serde(default = "default_layers_length")]
    pub layers_length: usize,
    /// Grouping unit for secondary grid lines and soft metronome ticks.
    #[serde(default = "default_frames_separation")]
    pub frames_separation: Frame,
    #[serde(default)]
    pub fps: Fps,
    #[serde(default)]
    pub playback_loop: bool,
}

impl Default for SheetConfig {
    fn default() -> Self {
        Self {
            frames_length: default_frames_length(),
            layers_length: default_layers_length(),
            frames_separation: default_frames_separation(),
            fps: Fps::default(),
            playback_loop: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetEvent {
    FrameChanged,
    LayerChanged,
    /// Sent after the `FrameChanged` of the removal that dropped the cel.
    CelRemoved(CelId),
    /// Every layer was replaced, possibly changing the layer count.
    Reloaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnMut(&SheetEvent, &Sheet)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Playback {
    Stopped,
    Running { token: TimerToken, looping: bool },
}

/// The exposure sheet: layers of cels plus the playhead.
pub struct Sheet {
    frames_length: Frame,
    frames_separation: Frame,
    fps: Fps,
    current_frame: Frame,
    current_layer: usize,
    layers: Vec<SparseTimeline<Cel>>,
    playback: Playback,
    scheduler: Box<dyn Scheduler>,
    surfaces: Box<dyn SurfaceFactory>,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: u64,
}

impl Sheet {
    pub fn new(
        config: &SheetConfig,
        scheduler: Box<dyn Scheduler>,
        surfaces: Box<dyn SurfaceFactory>,
    ) -> Self {
        let layers_length = config.layers_length.max(1);
        Self {
            frames_length: config.frames_length.max(1),
            frames_separation: config.frames_separation.max(1),
            fps: config.fps,
            current_frame: 0,
            current_layer: 0,
            layers: (0..layers_length).map(|_| SparseTimeline::new()).collect(),
            playback: Playback::Stopped,
            scheduler,
            surfaces,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    pub fn frames_length(&self) -> Frame {
        self.frames_length
    }

    pub fn layers_length(&self) -> usize {
        self.layers.len()
    }

    pub fn frames_separation(&self) -> Frame {
        self.frames_separation
    }

    pub fn fps(&self) -> Fps {
        self.fps
    }

    pub fn current_frame(&self) -> Frame {
        self.current_frame
    }

    pub fn current_layer(&self) -> usize {
        self.current_layer
    }

    pub fn layers(&self) -> &[SparseTimeline<Cel>] {
        &self.layers
    }

    pub fn layer(&self, idx: usize) -> Option<&SparseTimeline<Cel>> {
        self.layers.get(idx)
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&SheetEvent, &Sheet) + 'static) -> ListenerId {
        self.next_listener += 1;
        let id = ListenerId(self.next_listener);
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    fn emit(&mut self, event: SheetEvent) {
        let mut listeners = std::mem::take(&mut self.listeners);
        for (_, listener) in listeners.iter_mut() {
            listener(&event, self);
        }
        self.listeners = listeners;
    }

    pub fn goto_frame(&mut self, frame: Frame) -> bool {
        if frame < 0 || frame >= self.frames_length {
            warn!(frame, frames_length = self.frames_length, "goto rejected, frame out of range");
            return false;
        }
        if frame == self.current_frame {
            return false;
        }
        self.current_frame = frame;
        debug!(frame, "goto frame");
        self.emit(SheetEvent::FrameChanged);
        true
    }

    pub fn previous_frame(&mut self, looping: bool) -> bool {
        if self.current_frame == 0 {
            if !looping {
                return false;
            }
            self.current_frame = self.frames_length - 1;
        } else {
            self.current_frame -= 1;
        }
        self.emit(SheetEvent::FrameChanged);
        true
    }

    pub fn next_frame(&mut self, looping: bool) -> bool {
        if self.current_frame == self.frames_length - 1 {
            if !looping {
                return false;
            }
            self.current_frame = 0;
        } else {
            self.current_frame += 1;
        }
        self.emit(SheetEvent::FrameChanged);
        true
    }

    pub fn previous_layer(&mut self) -> bool {
        if self.current_layer == 0 {
            return false;
        }
        self.current_layer -= 1;
        self.emit(SheetEvent::LayerChanged);
        true
    }

    pub fn next_layer(&mut self) -> bool {
        if self.current_layer + 1 >= self.layers.len() {
            return false;
        }
        self.current_layer += 1;
        self.emit(SheetEvent::LayerChanged);
        true
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.playback, Playback::Running { .. })
    }

    pub fn play(&mut self, looping: bool) -> bool {
        if self.is_playing() {
            return false;
        }
        let token = self.scheduler.schedule_repeating(self.fps.frame_duration());
        self.playback = Playback::Running { token, looping };
        info!(looping, "playback started");
        true
    }

    pub fn stop(&mut self) -> bool {
        let Playback::Running { token, .. } = self.playback else {
            return false;
        };
        self.scheduler.cancel(token);
        self.playback = Playback::Stopped;
        info!(frame = self.current_frame, "playback stopped");
        true
    }

    /// Handles a fired playback timer. Tokens that do not belong to the
    /// running playback are ignored.
    pub fn tick(&mut self, token: TimerToken) -> bool {
        let Playback::Running { token: active, looping } = self.playback else {
            return false;
        };
        if token != active {
            return false;
        }
        if self.next_frame(looping) {
            return true;
        }
        self.stop();
        false
    }

    fn resolve(&self, frame: Option<Frame>, layer: Option<usize>) -> Option<(Frame, usize)> {
        let layer = layer.unwrap_or(self.current_layer);
        if layer >= self.layers.len() {
            return None;
        }
        Some((frame.unwrap_or(self.current_frame), layer))
    }

    fn offset_layer(&self, layer_diff: isize) -> Option<usize> {
        self.current_layer
            .checked_add_signed(layer_diff)
            .filter(|idx| *idx < self.layers.len())
    }

    pub fn classify(&self, frame: Option<Frame>, layer: Option<usize>) -> Option<FrameKind> {
        let (frame, layer) = self.resolve(frame, layer)?;
        Some(self.layers[layer].classify(frame))
    }

    pub fn has_cel(&self, frame: Option<Frame>, layer: Option<usize>) -> bool {
        self.classify(frame, layer) == Some(FrameKind::Content)
    }

    /// Creates a cel with a fresh surface, not yet placed on any layer.
    pub fn create_cel(&self) -> Cel {
        Cel::new(self.surfaces.create_surface())
    }

    pub fn add_cel(&mut self, frame: Option<Frame>, layer: Option<usize>) -> bool {
        let Some((frame, layer)) = self.resolve(frame, layer) else {
            warn!(?layer, "add cel rejected, no such layer");
            return false;
        };
        if self.layers[layer].classify(frame) == FrameKind::Content {
            return false;
        }
        let cel = self.create_cel();
        debug!(frame, layer, cel = %cel.id(), "add cel");
        self.layers[layer].set(frame, cel);
        self.emit(SheetEvent::FrameChanged);
        true
    }

    pub fn remove_clear(&mut self, frame: Option<Frame>, layer: Option<usize>) -> bool {
        let Some((frame, layer)) = self.resolve(frame, layer) else {
            warn!(?layer, "remove/clear rejected, no such layer");
            return false;
        };
        let outcome = self.layers[layer].remove_or_clear(frame);
        debug!(frame, layer, ?outcome, "remove/clear");
        self.emit(SheetEvent::FrameChanged);
        if let RemoveClear::Removed(cel) = outcome {
            self.emit(SheetEvent::CelRemoved(cel.id()));
        }
        true
    }

    pub fn get_cel(&self, frame: Option<Frame>, layer: Option<usize>) -> Option<&Cel> {
        let (frame, layer) = self.resolve(frame, layer)?;
        self.layers[layer].get(frame)
    }

    pub fn get_cel_relative(&self, frame_diff: Frame, layer_diff: isize) -> Option<&Cel> {
        let layer = self.offset_layer(layer_diff)?;
        self.layers[layer].get(self.current_frame + frame_diff)
    }

    /// Cel `steps` explicit entries away from the one exposed at the offset
    /// position.
    pub fn get_cel_relative_by_cels(
        &self,
        steps: i64,
        frame_diff: Frame,
        layer_diff: isize,
    ) -> Option<&Cel> {
        let layer = self.offset_layer(layer_diff)?;
        self.layers[layer].get_relative(self.current_frame + frame_diff, steps)
    }

    /// Swaps in a complete new set of layers. The playhead keeps its frame and
    /// the current layer is clamped to the new count.
    pub fn replace_layers(&mut self, mut layers: Vec<SparseTimeline<Cel>>) {
        if layers.is_empty() {
            layers.push(SparseTimeline::new());
        }
        self.layers = layers;
        self.current_layer = self.current_layer.min(self.layers.len() - 1);
        info!(layers = self.layers.len(), "layers replaced");
        self.emit(SheetEvent::Reloaded);
    }
}
