//! Host-owned UI surfaces handed to a player: the play/pause button and the canvas slots.
//!
//! Both are cheap clonable handles. The host keeps one clone to read state for drawing, the
//! player keeps another to write it.

use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

use crate::canvas::{Canvas, PixelCanvas};

pub const ATTR_DISABLED: &str = "disabled";
pub const ATTR_PRESSED: &str = "aria-pressed";
pub const ATTR_LABEL: &str = "aria-label";

pub const LABEL_PLAY: &str = "Play preview";
pub const LABEL_PAUSE: &str = "Pause preview";
pub const PREVIEW_UNAVAILABLE: &str = "Preview unavailable";

/// Play/pause control exposing its state through ARIA-style attributes
#[derive(Debug, Clone)]
pub struct PlayButton {
    attrs: Rc<RefCell<BTreeMap<String, String>>>,
}

impl PlayButton {
    /// A disabled, unpressed button, the state a card starts in before its asset is ready.
    pub fn new() -> Self {
        let button = PlayButton {
            attrs: Rc::new(RefCell::new(BTreeMap::new())),
        };
        button.set_attribute(ATTR_DISABLED, ATTR_DISABLED);
        button.set_pressed(false);
        button
    }

    pub fn set_attribute(&self, name: &str, value: &str) {
        self.attrs.borrow_mut().insert(name.to_string(), value.to_string());
    }

    pub fn remove_attribute(&self, name: &str) {
        self.attrs.borrow_mut().remove(name);
    }

    pub fn attribute(&self, name: &str) -> Option<String> {
        self.attrs.borrow().get(name).cloned()
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attrs.borrow().contains_key(name)
    }

    pub fn is_disabled(&self) -> bool {
        self.has_attribute(ATTR_DISABLED)
    }

    pub fn is_pressed(&self) -> bool {
        self.attribute(ATTR_PRESSED).as_deref() == Some("true")
    }

    pub fn label(&self) -> String {
        self.attribute(ATTR_LABEL).unwrap_or_default()
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        if enabled {
            self.remove_attribute(ATTR_DISABLED);
        } else {
            self.set_attribute(ATTR_DISABLED, ATTR_DISABLED);
        }
    }

    pub(crate) fn set_pressed(&self, on: bool) {
        self.set_attribute(ATTR_PRESSED, if on { "true" } else { "false" });
        self.set_attribute(ATTR_LABEL, if on { LABEL_PAUSE } else { LABEL_PLAY });
    }
}

impl Default for PlayButton {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub enum SlotContent {
    Canvas(PixelCanvas),
    /// The canvas was replaced by a caption
    Text(String),
}

/// A place in the host layout that holds a canvas until something replaces it with text
#[derive(Debug, Clone)]
pub struct CanvasSlot {
    content: Rc<RefCell<SlotContent>>,
}

impl CanvasSlot {
    pub fn new(width: u32, height: u32) -> Self {
        CanvasSlot {
            content: Rc::new(RefCell::new(SlotContent::Canvas(PixelCanvas::new(
                width, height,
            )))),
        }
    }

    pub fn is_canvas(&self) -> bool {
        matches!(*self.content.borrow(), SlotContent::Canvas(_))
    }

    pub fn text(&self) -> Option<String> {
        match &*self.content.borrow() {
            SlotContent::Text(t) => Some(t.clone()),
            SlotContent::Canvas(_) => None,
        }
    }

    /// Current canvas size, `None` once replaced by text.
    pub fn size(&self) -> Option<(u32, u32)> {
        self.with_canvas(|c| (c.width(), c.height()))
    }

    pub fn replace_with_text(&self, text: &str) {
        *self.content.borrow_mut() = SlotContent::Text(text.to_string());
    }

    /// Run `f` against the canvas; skipped when the slot holds text.
    pub fn with_canvas<R>(&self, f: impl FnOnce(&mut PixelCanvas) -> R) -> Option<R> {
        match &mut *self.content.borrow_mut() {
            SlotContent::Canvas(c) => Some(f(c)),
            SlotContent::Text(_) => None,
        }
    }

    pub fn snapshot(&self) -> SlotContent {
        self.content.borrow().clone()
    }
}
