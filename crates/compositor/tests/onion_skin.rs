use std::cell::RefCell;
use std::rc::Rc;

use compositor::{GraphController, MemoryGraph, NodeId, NodeKind, OnionSkinSettings, Pad};
use xsheet::{Cel, CelId, ManualScheduler, RasterSurfaceFactory, Sheet, SheetConfig};

fn source_of(controller: &GraphController<MemoryGraph>, consumer: NodeId) -> Option<CelId> {
    let graph = controller.backend();
    let producer = graph.producer(consumer, Pad::Input)?;
    match graph.node(producer)?.kind {
        NodeKind::Source { cel } => Some(cel),
        _ => None,
    }
}

fn new_sheet(layers_length: usize) -> Sheet {
    let config = SheetConfig {
        frames_length: 24,
        layers_length,
        ..SheetConfig::default()
    };
    Sheet::new(
        &config,
        Box::new(ManualScheduler::new()),
        Box::new(RasterSurfaceFactory),
    )
}

#[test]
fn test_neighbouring_layer_onion_skin_by_cels() {
    let mut sheet = new_sheet(2);

    // layer 0 gets three cels then a clear at frame 6
    for frame in [0, 2, 4] {
        assert!(sheet.add_cel(Some(frame), Some(0)));
    }
    sheet.remove_clear(Some(6), Some(0));
    let expected: Vec<Option<CelId>> = [4, 2, 0]
        .iter()
        .map(|f| sheet.get_cel(Some(*f), Some(0)).map(Cel::id))
        .collect();

    let settings = OnionSkinSettings {
        enabled: true,
        by_cels: true,
        length: 3,
        falloff: 0.5,
    };
    let controller = Rc::new(RefCell::new(
        GraphController::new(MemoryGraph::new(), &sheet, settings).unwrap(),
    ));
    GraphController::attach(&controller, &mut sheet);

    // work on layer 1, playhead at 6: layer 0 is one layer above (layer_diff = -1)
    assert!(sheet.next_layer());
    assert!(sheet.goto_frame(6));

    let controller = controller.borrow();
    let current = controller.current_slot(0).unwrap();
    assert_eq!(controller.backend().producer(current, Pad::Input), None);

    let onion: Vec<Option<CelId>> = (1..=3)
        .map(|depth| source_of(&controller, controller.onion_slot(0, depth).unwrap()))
        .collect();
    assert_eq!(onion, expected);
    assert!(onion.iter().all(Option::is_some));
}

#[test]
fn test_onion_skin_anchors_to_global_playhead() {
    let mut sheet = new_sheet(2);
    sheet.add_cel(Some(0), Some(1));
    sheet.add_cel(Some(10), Some(1));
    sheet.goto_frame(3);

    let controller =
        GraphController::new(MemoryGraph::new(), &sheet, OnionSkinSettings::default()).unwrap();

    // layer 1 is judged at frame 3 even though its last cel is at 10
    let current = source_of(&controller, controller.current_slot(1).unwrap());
    assert_eq!(current, sheet.get_cel(Some(0), Some(1)).map(Cel::id));
    assert_eq!(
        source_of(&controller, controller.onion_slot(1, 1).unwrap()),
        None
    );
}

#[test]
fn test_reload_drops_stale_sources() {
    let mut sheet = new_sheet(1);
    sheet.add_cel(None, None);
    let controller = Rc::new(RefCell::new(
        GraphController::new(MemoryGraph::new(), &sheet, OnionSkinSettings::default()).unwrap(),
    ));
    GraphController::attach(&controller, &mut sheet);
    let before = controller.borrow().backend().len();

    sheet.replace_layers(vec![Default::default()]);

    let controller = controller.borrow();
    assert_eq!(controller.backend().len(), before - 1);
    let current = controller.current_slot(0).unwrap();
    assert_eq!(controller.backend().producer(current, Pad::Input), None);
}
