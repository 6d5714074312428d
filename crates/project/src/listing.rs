use std::fmt::Write;
use std::ops::Range;

use xsheet::{Frame, FrameKind, Sheet};

pub fn kind_symbol(kind: FrameKind) -> char {
    match kind {
        FrameKind::Content => '#',
        FrameKind::RepeatContent => '|',
        FrameKind::Empty => 'x',
        FrameKind::RepeatEmpty => '.',
    }
}

/// Frames worth listing: through the last explicit entry of any layer and
/// the playhead, rounded up to a whole group of `frames_separation`.
pub fn listing_range(sheet: &Sheet) -> Range<Frame> {
    let last = sheet
        .layers()
        .iter()
        .filter_map(|layer| layer.last_frame())
        .max()
        .unwrap_or(0)
        .max(sheet.current_frame());
    let group = sheet.frames_separation();
    let end = ((last / group) + 1) * group;
    0..end.min(sheet.frames_length()).max(1)
}

/// Renders the exposure grid, one row per layer, with the current layer
/// marked by `>` and the playhead by `^` on the last line.
pub fn render_exposure(sheet: &Sheet, frames: Range<Frame>) -> String {
    let group = sheet.frames_separation();
    let column = |frame: Frame| {
        let offset = frame - frames.start;
        (offset + offset / group) as usize
    };

    let mut out = String::new();
    for (idx, layer) in sheet.layers().iter().enumerate() {
        let marker = if idx == sheet.current_layer() { '>' } else { ' ' };
        let _ = write!(out, "{marker}{idx:>3} ");
        for frame in frames.clone() {
            if frame != frames.start && (frame - frames.start) % group == 0 {
                out.push(' ');
            }
            out.push(kind_symbol(layer.classify(frame)));
        }
        out.push('\n');
    }

    if frames.contains(&sheet.current_frame()) {
        let _ = writeln!(
            out,
            "{}^ {}",
            " ".repeat(5 + column(sheet.current_frame())),
            sheet.current_frame()
        );
    }
    out
}
