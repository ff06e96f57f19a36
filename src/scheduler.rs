//! Per-frame callbacks, the terminal's stand-in for an animation-frame loop.

use std::{
    cell::{Cell, RefCell},
    collections::HashSet,
    rc::Rc,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CancelToken(u64);

pub trait Scheduler {
    /// Run `callback` once on the next frame.
    fn request_tick(&self, callback: Box<dyn FnOnce()>) -> CancelToken;
    /// Drop a pending callback. Unknown or already-run tokens are ignored.
    fn cancel(&self, token: CancelToken);
}

/// Frames advance when the host calls `run_frame`, once per draw.
#[derive(Default)]
pub struct FrameScheduler {
    next_token: Cell<u64>,
    frames: Cell<u64>,
    queue: RefCell<Vec<(CancelToken, Box<dyn FnOnce()>)>>,
    /// Tokens cancelled after their frame already started
    cancelled: RefCell<HashSet<CancelToken>>,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every callback queued before this frame started. Callbacks requested while the
    /// frame runs wait for the next one. Returns how many ran.
    pub fn run_frame(&self) -> usize {
        self.frames.set(self.frames.get() + 1);
        let due = std::mem::take(&mut *self.queue.borrow_mut());
        let mut ran = 0;
        for (token, callback) in due {
            // cancelled by an earlier callback in this same frame
            if self.cancelled.borrow_mut().remove(&token) {
                continue;
            }
            callback();
            ran += 1;
        }
        self.cancelled.borrow_mut().clear();
        ran
    }

    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn frame_count(&self) -> u64 {
        self.frames.get()
    }
}

impl Scheduler for FrameScheduler {
    fn request_tick(&self, callback: Box<dyn FnOnce()>) -> CancelToken {
        let token = CancelToken(self.next_token.get());
        self.next_token.set(token.0 + 1);
        self.queue.borrow_mut().push((token, callback));
        token
    }

    fn cancel(&self, token: CancelToken) {
        let mut queue = self.queue.borrow_mut();
        let before = queue.len();
        queue.retain(|(t, _)| *t != token);
        if queue.len() == before {
            drop(queue);
            self.cancelled.borrow_mut().insert(token);
        }
    }
}

/// Run `callback` after `frames` frames have passed.
pub fn after_frames(scheduler: Rc<dyn Scheduler>, frames: u32, callback: Box<dyn FnOnce()>) {
    if frames == 0 {
        scheduler.request_tick(callback);
        return;
    }
    let next = Rc::clone(&scheduler);
    scheduler.request_tick(Box::new(move || after_frames(next, frames - 1, callback)));
}
