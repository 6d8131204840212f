use serde::Serialize;

use crate::media::{DisplayMode, MediaItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutMode {
    Single,
    Split,
}

/// What goes on screen for one playhead position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutDecision {
    pub mode: LayoutMode,
    pub primary: MediaItem,
    pub secondary: Option<MediaItem>,
    /// Playhead step taken when leaving this layout on auto-advance.
    pub advance_by: usize,
}

impl LayoutDecision {
    pub fn single(primary: MediaItem) -> Self {
        Self {
            mode: LayoutMode::Single,
            primary,
            secondary: None,
            advance_by: 1,
        }
    }

    pub fn is_split(&self) -> bool {
        self.mode == LayoutMode::Split
    }

    /// Items in layer order (primary first).
    pub fn items(&self) -> impl Iterator<Item = &MediaItem> {
        std::iter::once(&self.primary).chain(self.secondary.iter())
    }

    /// Destination rectangles `(x, y, w, h)` for each layer on a canvas.
    ///
    /// Split layouts stack the two images top/bottom, each contained in half the height.
    pub fn slots(&self, canvas_w: u32, canvas_h: u32) -> Vec<(u32, u32, u32, u32)> {
        match &self.secondary {
            None => vec![fit_slot(&self.primary, 0, canvas_w, canvas_h)],
            Some(secondary) => {
                let top_h = canvas_h / 2;
                let bottom_h = canvas_h - top_h;
                let top = fit_slot(&self.primary, 0, canvas_w, top_h);
                let bottom = fit_slot(secondary, top_h, canvas_w, bottom_h);
                vec![top, bottom]
            }
        }
    }
}

/// Decide how `current` (and possibly `next`) are laid out.
///
/// Pure: the same inputs always give the same decision.
pub fn decide(current: &MediaItem, next: Option<&MediaItem>, mode: DisplayMode) -> LayoutDecision {
    match next {
        Some(next)
            if mode.supports_pairing() && current.is_landscape() && next.is_landscape() =>
        {
            LayoutDecision {
                mode: LayoutMode::Split,
                primary: current.clone(),
                secondary: Some(next.clone()),
                advance_by: 2,
            }
        }
        _ => LayoutDecision::single(current.clone()),
    }
}

/// Decision for `index` within `items`; pairing never wraps past the end.
pub fn decide_at(items: &[MediaItem], index: usize, mode: DisplayMode) -> Option<LayoutDecision> {
    let current = items.get(index)?;
    Some(decide(current, items.get(index + 1), mode))
}

/// The first `steps` layouts auto-advance would show, starting at index 0.
///
/// Stops early when a non-looping sequence reaches its end.
pub fn plan_sequence(
    items: &[MediaItem],
    mode: DisplayMode,
    looping: bool,
    steps: usize,
) -> Vec<(usize, LayoutDecision)> {
    let mut plan = Vec::new();
    let mut index = 0;
    while plan.len() < steps {
        let Some(decision) = decide_at(items, index, mode) else {
            break;
        };
        let raw = index + decision.advance_by;
        plan.push((index, decision));
        index = if raw < items.len() {
            raw
        } else if looping {
            raw % items.len()
        } else if index + 1 < items.len() {
            items.len() - 1
        } else {
            break;
        };
    }
    plan
}

fn fit_slot(item: &MediaItem, top: u32, canvas_w: u32, canvas_h: u32) -> (u32, u32, u32, u32) {
    let (w, h) = resize_to_contain(canvas_w, canvas_h, item.width, item.height);
    let (ox, oy) = center_offset(w, h, canvas_w, canvas_h);
    (ox, top + oy, w, h)
}

pub fn resize_to_contain(canvas_w: u32, canvas_h: u32, src_w: u32, src_h: u32) -> (u32, u32) {
    let iw = src_w.max(1) as f32;
    let ih = src_h.max(1) as f32;
    let cw = canvas_w.max(1) as f32;
    let ch = canvas_h.max(1) as f32;
    let scale = (cw / iw).min(ch / ih).max(0.0);
    let scale = if scale.is_finite() { scale } else { 1.0 };
    let w = (iw * scale).round().clamp(1.0, cw);
    let h = (ih * scale).round().clamp(1.0, ch);
    (w as u32, h as u32)
}

pub fn center_offset(inner_w: u32, inner_h: u32, outer_w: u32, outer_h: u32) -> (u32, u32) {
    let ox = outer_w.saturating_sub(inner_w) / 2;
    let oy = outer_h.saturating_sub(inner_h) / 2;
    (ox, oy)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, width: u32, height: u32) -> MediaItem {
        MediaItem {
            id: id.into(),
            url: format!("http://frame.local/{id}.jpg"),
            width,
            height,
            original_filename: format!("{id}.jpg"),
            captured_at: None,
        }
    }

    #[test]
    fn last_item_never_pairs_with_first() {
        let items = vec![item("a", 1920, 1080), item("b", 1920, 1080)];
        let last = decide_at(&items, 1, DisplayMode::AutoSort).unwrap();
        assert_eq!(last.mode, LayoutMode::Single);
        assert_eq!(last.advance_by, 1);
        assert!(decide_at(&items, 2, DisplayMode::AutoSort).is_none());
    }

    #[test]
    fn split_slots_stack_top_and_bottom() {
        let decision = decide(
            &item("a", 1920, 1080),
            Some(&item("b", 1920, 1080)),
            DisplayMode::Split,
        );
        let slots = decision.slots(1080, 1920);
        assert_eq!(slots.len(), 2);
        let (_, top_y, top_w, top_h) = slots[0];
        let (_, bottom_y, _, _) = slots[1];
        assert_eq!(top_w, 1080);
        assert!(top_y + top_h <= 960);
        assert!(bottom_y >= 960);
    }

    #[test]
    fn plan_steps_past_pairs() {
        let items = vec![
            item("L1", 1920, 1080),
            item("L2", 1920, 1080),
            item("P1", 1080, 1920),
        ];
        let plan = plan_sequence(&items, DisplayMode::AutoSort, true, 4);
        let indices: Vec<usize> = plan.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 2, 0, 2]);
        assert!(plan[0].1.is_split());

        let once = plan_sequence(&items, DisplayMode::Fade, false, 10);
        assert_eq!(once.len(), 3);
        assert!(plan_sequence(&[], DisplayMode::Fade, true, 5).is_empty());
    }

    #[test]
    fn contain_keeps_aspect() {
        assert_eq!(resize_to_contain(1920, 1080, 4000, 2000), (1920, 960));
        assert_eq!(center_offset(1920, 960, 1920, 1080), (0, 60));
    }
}
