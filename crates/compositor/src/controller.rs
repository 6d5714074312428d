use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use xsheet::{Cel, CelId, ListenerId, Sheet, SheetEvent};

use crate::{GraphBackend, GraphError, NodeId, NodeKind, Pad, PropertyValue};

fn default_enabled() -> bool {
    true
}

fn default_by_cels() -> bool {
    true
}

fn default_length() -> usize {
    3
}

fn default_falloff() -> f64 {
    0.5
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OnionSkinSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Step through explicit cels instead of raw frames.
    #[serde(default = "default_by_cels")]
    pub by_cels: bool,
    #[serde(default = "default_length")]
    pub length: usize,
    #[serde(default = "default_falloff")]
    pub falloff: f64,
}

impl Default for OnionSkinSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            by_cels: default_by_cels(),
            length: default_length(),
            falloff: default_falloff(),
        }
    }
}

impl OnionSkinSettings {
    /// Opacity applied at every onion-skin step.
    pub fn opacity(&self) -> f64 {
        1.0 - self.falloff.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone)]
struct LayerNodes {
    current_over: NodeId,
    onion_overs: Vec<NodeId>,
    onion_opacities: Vec<NodeId>,
}

#[derive(Debug, Clone)]
struct Skeleton {
    root: NodeId,
    background: NodeId,
    layer_overs: Vec<NodeId>,
    layers: Vec<LayerNodes>,
}

impl Skeleton {
    fn build<B: GraphBackend>(
        backend: &mut B,
        layers_length: usize,
        settings: &OnionSkinSettings,
    ) -> Result<Self, GraphError> {
        let layers_length = layers_length.max(1);
        let root = backend.create_node(NodeKind::Nop);
        let layer_overs: Vec<NodeId> = (0..layers_length)
            .map(|_| backend.create_node(NodeKind::Over))
            .collect();

        backend.connect(layer_overs[0], root, Pad::Input)?;
        for pair in layer_overs.windows(2) {
            backend.connect(pair[1], pair[0], Pad::Input)?;
        }

        let background = backend.create_node(NodeKind::Rectangle);
        backend.set_property(background, "color", PropertyValue::Text("#fff".into()))?;
        backend.connect(background, layer_overs[layers_length - 1], Pad::Input)?;

        let opacity = settings.opacity();
        let mut layers = Vec::with_capacity(layers_length);
        for layer_over in &layer_overs {
            let current_over = backend.create_node(NodeKind::Over);
            backend.connect(current_over, *layer_over, Pad::Aux)?;

            let mut onion_overs = Vec::with_capacity(settings.length);
            let mut onion_opacities = Vec::with_capacity(settings.length);
            for _ in 0..settings.length {
                let over = backend.create_node(NodeKind::Over);
                let fade = backend.create_node(NodeKind::Opacity);
                backend.set_property(fade, "value", PropertyValue::Number(opacity))?;
                backend.connect(over, fade, Pad::Input)?;
                onion_overs.push(over);
                onion_opacities.push(fade);
            }
            // step i + 1 sits in the aux pad of step i
            for (over, deeper) in onion_overs.iter().zip(onion_opacities.iter().skip(1)) {
                backend.connect(*deeper, *over, Pad::Aux)?;
            }

            layers.push(LayerNodes {
                current_over,
                onion_overs,
                onion_opacities,
            });
        }

        Ok(Self {
            root,
            background,
            layer_overs,
            layers,
        })
    }

    fn nodes(&self) -> Vec<NodeId> {
        let mut nodes = vec![self.root, self.background];
        nodes.extend(self.layer_overs.iter().copied());
        for layer in &self.layers {
            nodes.push(layer.current_over);
            nodes.extend(layer.onion_overs.iter().copied());
            nodes.extend(layer.onion_opacities.iter().copied());
        }
        nodes
    }
}

/// Keeps a compositing graph wired to the sheet.
///
/// The node skeleton is built for a fixed layer count and onion-skin depth;
/// only the cel edges and opacity values change afterwards. Changing either
/// size goes through [`GraphController::rebuild`].
pub struct GraphController<B: GraphBackend> {
    backend: B,
    settings: OnionSkinSettings,
    skeleton: Skeleton,
    sources: HashMap<CelId, NodeId>,
}

impl<B: GraphBackend> GraphController<B> {
    pub fn new(backend: B, sheet: &Sheet, settings: OnionSkinSettings) -> Result<Self, GraphError> {
        let mut backend = backend;
        let skeleton = Skeleton::build(&mut backend, sheet.layers_length(), &settings)?;
        let mut controller = Self {
            backend,
            settings,
            skeleton,
            sources: HashMap::new(),
        };
        if controller.settings.enabled {
            controller.attach_onion_chains()?;
        }
        controller.update(sheet)?;
        Ok(controller)
    }

    /// Tears the graph down and builds it again for the sheet's current
    /// layer count and `settings`.
    pub fn rebuild(&mut self, sheet: &Sheet, settings: OnionSkinSettings) -> Result<(), GraphError> {
        self.remove_all_nodes()?;
        self.skeleton = Skeleton::build(&mut self.backend, sheet.layers_length(), &settings)?;
        self.settings = settings;
        if self.settings.enabled {
            self.attach_onion_chains()?;
        }
        debug!(layers = sheet.layers_length(), depth = self.settings.length, "compositing graph rebuilt");
        self.update(sheet)
    }

    /// Subscribes `controller` to `sheet` so every change rewires the graph.
    pub fn attach(controller: &Rc<RefCell<Self>>, sheet: &mut Sheet) -> ListenerId
    where
        B: 'static,
    {
        let weak = Rc::downgrade(controller);
        sheet.subscribe(move |event, sheet| {
            let Some(controller) = weak.upgrade() else {
                return;
            };
            let result = controller.borrow_mut().handle_event(event, sheet);
            if let Err(err) = result {
                error!(%err, ?event, "failed to rewire compositing graph");
            }
        })
    }

    pub fn root(&self) -> NodeId {
        self.skeleton.root
    }

    pub fn background(&self) -> NodeId {
        self.skeleton.background
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn settings(&self) -> &OnionSkinSettings {
        &self.settings
    }

    pub fn layers_length(&self) -> usize {
        self.skeleton.layers.len()
    }

    pub fn current_slot(&self, layer: usize) -> Option<NodeId> {
        self.skeleton.layers.get(layer).map(|l| l.current_over)
    }

    /// Onion-skin slot `depth` steps back (1-based).
    pub fn onion_slot(&self, layer: usize, depth: usize) -> Option<NodeId> {
        let idx = depth.checked_sub(1)?;
        self.skeleton.layers.get(layer)?.onion_overs.get(idx).copied()
    }

    pub fn onion_opacity(&self, layer: usize, depth: usize) -> Option<NodeId> {
        let idx = depth.checked_sub(1)?;
        self.skeleton.layers.get(layer)?.onion_opacities.get(idx).copied()
    }

    pub fn handle_event(&mut self, event: &SheetEvent, sheet: &Sheet) -> Result<(), GraphError> {
        match event {
            SheetEvent::FrameChanged | SheetEvent::LayerChanged => self.update(sheet),
            SheetEvent::CelRemoved(id) => self.release_source(*id),
            SheetEvent::Reloaded => {
                self.prune_sources(sheet)?;
                self.update(sheet)
            }
        }
    }

    /// Rewires every current and onion-skin slot from the sheet state.
    pub fn update(&mut self, sheet: &Sheet) -> Result<(), GraphError> {
        let current_layer = sheet.current_layer() as isize;
        for idx in 0..self.skeleton.layers.len() {
            let current_over = self.skeleton.layers[idx].current_over;
            let cel = sheet.get_cel(None, Some(idx)).cloned();
            self.wire(cel.as_ref(), current_over)?;

            if !self.settings.enabled {
                continue;
            }

            let layer_diff = idx as isize - current_layer;
            for depth in 0..self.skeleton.layers[idx].onion_overs.len() {
                let steps = -(depth as i64 + 1);
                let cel = if self.settings.by_cels {
                    sheet.get_cel_relative_by_cels(steps, 0, layer_diff)
                } else {
                    sheet.get_cel_relative(steps, layer_diff)
                }
                .cloned();
                let over = self.skeleton.layers[idx].onion_overs[depth];
                self.wire(cel.as_ref(), over)?;
            }
        }
        debug!(
            frame = sheet.current_frame(),
            layer = sheet.current_layer(),
            "compositing graph updated"
        );
        Ok(())
    }

    fn wire(&mut self, cel: Option<&Cel>, consumer: NodeId) -> Result<(), GraphError> {
        match cel {
            Some(cel) => {
                let source = self.source_for(cel);
                self.backend.connect(source, consumer, Pad::Input)
            }
            None => self.backend.disconnect(consumer, Pad::Input),
        }
    }

    fn source_for(&mut self, cel: &Cel) -> NodeId {
        let backend = &mut self.backend;
        *self
            .sources
            .entry(cel.id())
            .or_insert_with(|| backend.create_source(cel))
    }

    fn release_source(&mut self, id: CelId) -> Result<(), GraphError> {
        match self.sources.remove(&id) {
            Some(node) => self.backend.remove_node(node),
            None => Ok(()),
        }
    }

    fn prune_sources(&mut self, sheet: &Sheet) -> Result<(), GraphError> {
        let live: HashSet<CelId> = sheet
            .layers()
            .iter()
            .flat_map(|layer| layer.entries().filter_map(|(_, cel)| cel.map(Cel::id)))
            .collect();
        let stale: Vec<CelId> = self
            .sources
            .keys()
            .filter(|id| !live.contains(id))
            .copied()
            .collect();
        for id in stale {
            self.release_source(id)?;
        }
        Ok(())
    }

    fn attach_onion_chains(&mut self) -> Result<(), GraphError> {
        for layer in &self.skeleton.layers {
            if let Some(first) = layer.onion_opacities.first() {
                self.backend.connect(*first, layer.current_over, Pad::Aux)?;
            }
        }
        Ok(())
    }

    fn detach_onion_chains(&mut self) -> Result<(), GraphError> {
        for layer in &self.skeleton.layers {
            self.backend.disconnect(layer.current_over, Pad::Aux)?;
        }
        Ok(())
    }

    /// Shows or hides the onion skin. The chains stay built while hidden.
    pub fn set_enabled(&mut self, enabled: bool, sheet: &Sheet) -> Result<(), GraphError> {
        self.settings.enabled = enabled;
        if enabled {
            self.attach_onion_chains()?;
        } else {
            self.detach_onion_chains()?;
        }
        self.update(sheet)
    }

    pub fn toggle_enabled(&mut self, sheet: &Sheet) -> Result<bool, GraphError> {
        let enabled = !self.settings.enabled;
        self.set_enabled(enabled, sheet)?;
        Ok(enabled)
    }

    pub fn set_by_cels(&mut self, by_cels: bool, sheet: &Sheet) -> Result<(), GraphError> {
        self.settings.by_cels = by_cels;
        self.update(sheet)
    }

    pub fn set_falloff(&mut self, falloff: f64, sheet: &Sheet) -> Result<(), GraphError> {
        self.settings.falloff = falloff.clamp(0.0, 1.0);
        let opacity = self.settings.opacity();
        for layer in &self.skeleton.layers {
            for fade in &layer.onion_opacities {
                self.backend
                    .set_property(*fade, "value", PropertyValue::Number(opacity))?;
            }
        }
        self.update(sheet)
    }

    pub fn set_canvas_size(&mut self, width: u32, height: u32) -> Result<(), GraphError> {
        self.backend
            .set_property(self.skeleton.background, "width", PropertyValue::Number(width as f64))?;
        self.backend
            .set_property(self.skeleton.background, "height", PropertyValue::Number(height as f64))
    }

    fn remove_all_nodes(&mut self) -> Result<(), GraphError> {
        let mut nodes = self.skeleton.nodes();
        nodes.extend(self.sources.drain().map(|(_, node)| node));
        for node in nodes {
            self.backend.remove_node(node)?;
        }
        Ok(())
    }

    /// Removes every node this controller created and hands the backend back.
    pub fn dismantle(mut self) -> Result<B, GraphError> {
        self.remove_all_nodes()?;
        Ok(self.backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryGraph;
    use xsheet::{ManualScheduler, RasterSurfaceFactory, SheetConfig};

    fn sheet(layers_length: usize) -> Sheet {
        let config = SheetConfig {
            frames_length: 48,
            layers_length,
            ..SheetConfig::default()
        };
        Sheet::new(&config, Box::new(ManualScheduler::new()), Box::new(RasterSurfaceFactory))
    }

    fn source_of(controller: &GraphController<MemoryGraph>, consumer: NodeId) -> Option<CelId> {
        let producer = controller.backend().producer(consumer, Pad::Input)?;
        match controller.backend().node(producer)?.kind {
            NodeKind::Source { cel } => Some(cel),
            _ => None,
        }
    }

    #[test]
    fn test_skeleton_size() {
        let sheet = sheet(3);
        let controller =
            GraphController::new(MemoryGraph::new(), &sheet, OnionSkinSettings::default()).unwrap();
        // root + background + per layer: layer over, current over, 3 x (over + opacity)
        assert_eq!(controller.backend().len(), 2 + 3 * (2 + 3 * 2));
        assert_eq!(controller.layers_length(), 3);
        assert!(controller.onion_slot(0, 0).is_none());
        assert!(controller.onion_slot(0, 4).is_none());
    }

    #[test]
    fn test_static_wiring() {
        let sheet = sheet(2);
        let controller =
            GraphController::new(MemoryGraph::new(), &sheet, OnionSkinSettings::default()).unwrap();
        let graph = controller.backend();

        let top = graph.producer(controller.root(), Pad::Input).unwrap();
        let bottom = graph.producer(top, Pad::Input).unwrap();
        assert_eq!(graph.producer(bottom, Pad::Input), Some(controller.background()));
        assert_eq!(graph.producer(top, Pad::Aux), controller.current_slot(0));
        assert_eq!(graph.producer(bottom, Pad::Aux), controller.current_slot(1));

        let current = controller.current_slot(0).unwrap();
        assert_eq!(graph.producer(current, Pad::Aux), controller.onion_opacity(0, 1));
        let first = controller.onion_slot(0, 1).unwrap();
        assert_eq!(graph.producer(first, Pad::Aux), controller.onion_opacity(0, 2));
        assert_eq!(
            graph.producer(controller.onion_opacity(0, 1).unwrap(), Pad::Input),
            Some(first)
        );
        assert_eq!(
            graph.property(controller.onion_opacity(1, 3).unwrap(), "value"),
            Some(&PropertyValue::Number(0.5))
        );
    }

    #[test]
    fn test_current_slot_follows_playhead() {
        let mut sheet = sheet(1);
        let controller = Rc::new(RefCell::new(
            GraphController::new(MemoryGraph::new(), &sheet, OnionSkinSettings::default()).unwrap(),
        ));
        GraphController::attach(&controller, &mut sheet);
        let slot = controller.borrow().current_slot(0).unwrap();
        assert_eq!(source_of(&controller.borrow(), slot), None);

        sheet.add_cel(None, None);
        let cel = sheet.get_cel(None, None).map(Cel::id);
        assert_eq!(source_of(&controller.borrow(), slot), cel);

        sheet.goto_frame(5);
        assert_eq!(source_of(&controller.borrow(), slot), cel);

        sheet.remove_clear(Some(0), None);
        assert_eq!(source_of(&controller.borrow(), slot), None);
        // removed cel's source node is gone
        assert_eq!(controller.borrow().backend().len(), 2 + 2 + 3 * 2);
    }

    #[test]
    fn test_onion_by_frames() {
        let mut sheet = sheet(1);
        sheet.add_cel(Some(0), None);
        sheet.add_cel(Some(3), None);
        sheet.goto_frame(4);
        let settings = OnionSkinSettings {
            by_cels: false,
            ..OnionSkinSettings::default()
        };
        let controller = GraphController::new(MemoryGraph::new(), &sheet, settings).unwrap();
        let first = sheet.get_cel(Some(0), None).map(Cel::id);
        let second = sheet.get_cel(Some(3), None).map(Cel::id);

        // frames 3, 2, 1
        let slots: Vec<_> = (1..=3)
            .map(|d| source_of(&controller, controller.onion_slot(0, d).unwrap()))
            .collect();
        assert_eq!(slots, vec![second, first, first]);
    }

    #[test]
    fn test_toggle_detaches_chain_without_destroying_it() {
        let mut sheet = sheet(1);
        sheet.add_cel(Some(0), None);
        sheet.add_cel(Some(1), None);
        sheet.goto_frame(1);
        let mut controller =
            GraphController::new(MemoryGraph::new(), &sheet, OnionSkinSettings::default()).unwrap();
        let current = controller.current_slot(0).unwrap();
        let nodes = controller.backend().len();

        assert_eq!(controller.toggle_enabled(&sheet), Ok(false));
        assert_eq!(controller.backend().producer(current, Pad::Aux), None);
        assert_eq!(controller.backend().len(), nodes);

        assert_eq!(controller.toggle_enabled(&sheet), Ok(true));
        assert_eq!(
            controller.backend().producer(current, Pad::Aux),
            controller.onion_opacity(0, 1)
        );
        let first = sheet.get_cel(Some(0), None).map(Cel::id);
        assert_eq!(source_of(&controller, controller.onion_slot(0, 1).unwrap()), first);
    }

    #[test]
    fn test_falloff_and_canvas_size() {
        let sheet = sheet(2);
        let mut controller =
            GraphController::new(MemoryGraph::new(), &sheet, OnionSkinSettings::default()).unwrap();
        controller.set_falloff(0.25, &sheet).unwrap();
        controller.set_canvas_size(800, 400).unwrap();
        let graph = controller.backend();
        for layer in 0..2 {
            for depth in 1..=3 {
                let fade = controller.onion_opacity(layer, depth).unwrap();
                assert_eq!(graph.property(fade, "value"), Some(&PropertyValue::Number(0.75)));
            }
        }
        let bg = controller.background();
        assert_eq!(graph.property(bg, "width"), Some(&PropertyValue::Number(800.0)));
        assert_eq!(graph.property(bg, "height"), Some(&PropertyValue::Number(400.0)));
        assert_eq!(
            graph.property(bg, "color"),
            Some(&PropertyValue::Text("#fff".to_string()))
        );
    }

    #[test]
    fn test_dismantle_removes_all_nodes() {
        let mut sheet = sheet(2);
        sheet.add_cel(None, None);
        let controller =
            GraphController::new(MemoryGraph::new(), &sheet, OnionSkinSettings::default()).unwrap();
        let backend = controller.dismantle().unwrap();
        assert!(backend.is_empty());
    }

    #[test]
    fn test_rebuild_changes_depth() {
        let mut sheet = sheet(2);
        sheet.add_cel(None, None);
        let mut controller =
            GraphController::new(MemoryGraph::new(), &sheet, OnionSkinSettings::default()).unwrap();
        let settings = OnionSkinSettings {
            length: 1,
            ..OnionSkinSettings::default()
        };
        controller.rebuild(&sheet, settings).unwrap();

        // 2 + 2 layers x (layer over + current over + 1 x (over + opacity)) + the cel source
        assert_eq!(controller.backend().len(), 2 + 2 * 4 + 1);
        assert!(controller.onion_slot(0, 2).is_none());
        let slot = controller.current_slot(0).unwrap();
        assert_eq!(source_of(&controller, slot), sheet.get_cel(None, None).map(Cel::id));
    }
}
