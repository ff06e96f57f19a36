//! Global exclusivity: at most one player is audible at a time.

use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use tracing::debug;

pub type PlayerId = u64;

/// Something that can hold the bus
pub trait BusMember {
    fn bus_id(&self) -> PlayerId;

    /// Leave the playing state now, keeping the resume offset.
    fn yield_playback(&self);
}

#[derive(Default)]
pub struct PlaybackBus {
    current: RefCell<Option<(PlayerId, Weak<dyn BusMember>)>>,
}

impl PlaybackBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `member` the holder, stopping whoever held the bus before.
    pub fn claim(&self, member: &Rc<dyn BusMember>) {
        let id = member.bus_id();
        // take first so a yielding player's own release finds nothing to clear
        let previous = self.current.borrow_mut().take();
        if let Some((prev_id, prev)) = previous {
            if prev_id != id {
                if let Some(prev) = prev.upgrade() {
                    debug!(from = prev_id, to = id, "bus handover");
                    prev.yield_playback();
                }
            }
        }
        *self.current.borrow_mut() = Some((id, Rc::downgrade(member)));
    }

    /// Clear the holder if it is `id`; stale releases do nothing.
    pub fn release(&self, id: PlayerId) {
        let mut current = self.current.borrow_mut();
        if current.as_ref().is_some_and(|(held, _)| *held == id) {
            *current = None;
        }
    }

    /// Stop the holder and clear the bus.
    pub fn stop_all(&self) {
        let previous = self.current.borrow_mut().take();
        if let Some((id, member)) = previous {
            if let Some(member) = member.upgrade() {
                debug!(id, "stopping bus holder");
                member.yield_playback();
            }
        }
    }

    pub fn holder(&self) -> Option<PlayerId> {
        self.current.borrow().as_ref().map(|(id, _)| *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Fake {
        id: PlayerId,
        playing: Cell<bool>,
        bus: Rc<PlaybackBus>,
    }

    impl BusMember for Fake {
        fn bus_id(&self) -> PlayerId {
            self.id
        }

        fn yield_playback(&self) {
            self.playing.set(false);
            self.bus.release(self.id);
        }
    }

    fn fake(id: PlayerId, bus: &Rc<PlaybackBus>) -> Rc<Fake> {
        Rc::new(Fake {
            id,
            playing: Cell::new(false),
            bus: Rc::clone(bus),
        })
    }

    fn play(f: &Rc<Fake>) {
        let member: Rc<dyn BusMember> = f.clone();
        f.bus.claim(&member);
        f.playing.set(true);
    }

    #[test]
    fn claim_stops_previous_holder() {
        let bus = Rc::new(PlaybackBus::new());
        let a = fake(1, &bus);
        let b = fake(2, &bus);
        play(&a);
        play(&b);
        assert!(!a.playing.get());
        assert!(b.playing.get());
        assert_eq!(bus.holder(), Some(2));
    }

    #[test]
    fn stale_release_is_ignored() {
        let bus = Rc::new(PlaybackBus::new());
        let a = fake(1, &bus);
        let b = fake(2, &bus);
        play(&a);
        play(&b);
        bus.release(1);
        assert_eq!(bus.holder(), Some(2));
        bus.release(2);
        assert_eq!(bus.holder(), None);
    }

    #[test]
    fn reclaim_by_holder_keeps_it_playing() {
        let bus = Rc::new(PlaybackBus::new());
        let a = fake(1, &bus);
        play(&a);
        play(&a);
        assert!(a.playing.get());
    }

    #[test]
    fn stop_all_clears() {
        let bus = Rc::new(PlaybackBus::new());
        let a = fake(1, &bus);
        play(&a);
        bus.stop_all();
        assert!(!a.playing.get());
        assert_eq!(bus.holder(), None);
    }

    #[test]
    fn dropped_holder_is_skipped() {
        let bus = Rc::new(PlaybackBus::new());
        let a = fake(1, &bus);
        play(&a);
        drop(a);
        let b = fake(2, &bus);
        play(&b);
        assert_eq!(bus.holder(), Some(2));
    }
}
