use std::cell::{Ref, RefCell};
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use compositor::{GraphBackend, GraphController, GraphError, MemoryGraph, OnionSkinSettings};
use thiserror::Error;
use tracing::{debug, info, warn};
use xsheet::{
    ManualScheduler, Metronome, RasterSurfaceFactory, Sheet, SurfaceFactory, TickSink,
    TracingTickSink,
};

use crate::{load_layers, save_sheet, ArchiveError, Config, SessionCommand};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("invalid setting: {0}")]
    InvalidSetting(String),
}

/// A sheet wired to its compositing graph, clock and metronome.
pub struct Session<B: GraphBackend + 'static = MemoryGraph> {
    config: Config,
    sheet: Sheet,
    scheduler: ManualScheduler,
    controller: Rc<RefCell<GraphController<B>>>,
    metronome: Metronome,
}

impl<B: GraphBackend + 'static> Session<B> {
    pub fn new(config: Config, backend: B) -> Result<Self, SessionError> {
        Self::with_parts(
            config,
            backend,
            Box::new(RasterSurfaceFactory),
            Rc::new(RefCell::new(TracingTickSink)),
        )
    }

    pub fn with_parts(
        config: Config,
        backend: B,
        surfaces: Box<dyn SurfaceFactory>,
        ticks: Rc<RefCell<dyn TickSink>>,
    ) -> Result<Self, SessionError> {
        let scheduler = ManualScheduler::new();
        let mut sheet = Sheet::new(&config.sheet, Box::new(scheduler.clone()), surfaces);
        let controller = GraphController::new(backend, &sheet, config.onionskin.clone())?;
        let controller = Rc::new(RefCell::new(controller));
        GraphController::attach(&controller, &mut sheet);
        info!(
            frames = sheet.frames_length(),
            layers = sheet.layers_length(),
            "session started"
        );
        Ok(Self {
            config,
            sheet,
            scheduler,
            controller,
            metronome: Metronome::new(ticks),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sheet(&self) -> &Sheet {
        &self.sheet
    }

    pub fn sheet_mut(&mut self) -> &mut Sheet {
        &mut self.sheet
    }

    pub fn controller(&self) -> Ref<'_, GraphController<B>> {
        self.controller.borrow()
    }

    pub fn settings(&self) -> OnionSkinSettings {
        self.controller.borrow().settings().clone()
    }

    pub fn scheduler(&self) -> &ManualScheduler {
        &self.scheduler
    }

    pub fn metronome_active(&self) -> bool {
        self.metronome.is_active()
    }

    /// Runs one command. The flag reports whether anything changed; rejected
    /// navigation is `Ok(false)`, not an error.
    pub fn apply(&mut self, command: SessionCommand) -> Result<bool, SessionError> {
        debug!(?command, "apply");
        let changed = match command {
            SessionCommand::GotoFrame { frame } => self.sheet.goto_frame(frame),
            SessionCommand::NextFrame { looping } => self.sheet.next_frame(looping),
            SessionCommand::PreviousFrame { looping } => self.sheet.previous_frame(looping),
            SessionCommand::PreviousLayer => self.sheet.previous_layer(),
            SessionCommand::NextLayer => self.sheet.next_layer(),
            SessionCommand::TogglePlay { looping } => {
                if self.sheet.is_playing() {
                    self.sheet.stop()
                } else {
                    let looping = looping.unwrap_or(self.config.sheet.playback_loop);
                    self.sheet.play(looping)
                }
            }
            SessionCommand::Stop => self.sheet.stop(),
            SessionCommand::ToggleOnionSkin => {
                let enabled = self.controller.borrow_mut().toggle_enabled(&self.sheet)?;
                info!(enabled, "onion skin toggled");
                true
            }
            SessionCommand::SetOnionMode { by_cels } => {
                let mut controller = self.controller.borrow_mut();
                if controller.settings().by_cels == by_cels {
                    false
                } else {
                    controller.set_by_cels(by_cels, &self.sheet)?;
                    true
                }
            }
            SessionCommand::SetOnionLength { length } => self.set_onion_length(length)?,
            SessionCommand::SetOnionFalloff { falloff } => {
                if !falloff.is_finite() {
                    return Err(SessionError::InvalidSetting(format!("falloff {falloff}")));
                }
                self.controller.borrow_mut().set_falloff(falloff, &self.sheet)?;
                true
            }
            SessionCommand::AddCel => self.sheet.add_cel(None, None),
            SessionCommand::RemoveClear => self.sheet.remove_clear(None, None),
            SessionCommand::ToggleMetronome => {
                if self.metronome.is_active() {
                    self.metronome.deactivate(&mut self.sheet)
                } else {
                    self.metronome.activate(&mut self.sheet)
                }
            }
            SessionCommand::Advance { millis } => self.advance(Duration::from_millis(millis)) > 0,
            SessionCommand::SetCanvasSize { width, height } => {
                self.controller.borrow_mut().set_canvas_size(width, height)?;
                true
            }
            SessionCommand::Save { path } => {
                self.save(&path)?;
                true
            }
            SessionCommand::Load { path } => {
                self.load(&path)?;
                true
            }
        };
        if !changed {
            debug!("command had no effect");
        }
        Ok(changed)
    }

    fn set_onion_length(&mut self, length: usize) -> Result<bool, SessionError> {
        if length == 0 {
            return Err(SessionError::InvalidSetting(
                "onion-skin length must be at least 1".into(),
            ));
        }
        let mut settings = self.settings();
        if settings.length == length {
            return Ok(false);
        }
        settings.length = length;
        self.controller.borrow_mut().rebuild(&self.sheet, settings)?;
        Ok(true)
    }

    /// Moves the clock forward and delivers every playback tick that fell
    /// due. Returns how many ticks advanced the playhead.
    pub fn advance(&mut self, elapsed: Duration) -> usize {
        self.scheduler
            .advance(elapsed)
            .into_iter()
            .filter(|token| self.sheet.tick(*token))
            .count()
    }

    pub fn save(&self, path: &Path) -> Result<(), SessionError> {
        save_sheet(&self.sheet, path)?;
        Ok(())
    }

    /// Replaces every layer with the archive's. Nothing changes if reading
    /// the archive fails.
    pub fn load(&mut self, path: &Path) -> Result<(), SessionError> {
        let layers = match load_layers(path, &self.sheet) {
            Ok(layers) => layers,
            Err(err) => {
                warn!(?path, %err, "load failed, sheet unchanged");
                return Err(err.into());
            }
        };
        let resized = layers.len() != self.controller.borrow().layers_length();
        self.sheet.replace_layers(layers);
        if resized {
            let settings = self.settings();
            self.controller.borrow_mut().rebuild(&self.sheet, settings)?;
        }
        Ok(())
    }
}

impl Session<MemoryGraph> {
    /// Indented dump of the in-memory compositing graph.
    pub fn describe_graph(&self) -> String {
        let controller = self.controller.borrow();
        controller.backend().describe(controller.root())
    }
}
