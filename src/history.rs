// src/history.rs

//! Fixed-capacity ring history with a monotonically increasing position.
//!
//! Both counter histories (store snapshots and load snapshots) share this
//! type. The position only ever grows; the slot index is `pos % capacity`,
//! so only the most recent `capacity` entries remain retrievable. Reads are
//! addressed relative to the write position: `last == -1` is the newest
//! entry, `last == -2` the one before, down to `-(capacity - 1)`.

/// History depth kept for store and load snapshots.
pub const HISTORY_CAPACITY: usize = 30;

#[derive(Debug)]
pub(crate) struct History<T> {
    entries: Vec<T>,
    pos: u64,
}

impl<T: Clone + Default> History<T> {
    pub fn new() -> Self {
        Self {
            entries: vec![T::default(); HISTORY_CAPACITY],
            pos: 0,
        }
    }

    /// Number of entries ever pushed.
    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn push(&mut self, entry: T) {
        let idx = (self.pos % HISTORY_CAPACITY as u64) as usize;
        self.entries[idx] = entry;
        self.pos += 1;
    }

    /// Fetch the entry at `pos + last`. Valid for `-capacity < last < 0`
    /// with `-last < pos`; anything else returns `None` and the caller
    /// substitutes its sentinel.
    pub fn get(&self, last: i64) -> Option<&T> {
        if last >= 0 || last <= -(HISTORY_CAPACITY as i64) {
            return None;
        }
        let back = (-last) as u64;
        if back >= self.pos {
            return None;
        }
        let idx = ((self.pos - back) % HISTORY_CAPACITY as u64) as usize;
        Some(&self.entries[idx])
    }

    /// Entry `back` positions behind the newest one (0 = newest), without
    /// the public-accessor bound. Available as soon as enough entries exist.
    pub fn recent(&self, back: u64) -> Option<&T> {
        if back >= self.pos || back >= HISTORY_CAPACITY as u64 {
            return None;
        }
        let idx = ((self.pos - 1 - back) % HISTORY_CAPACITY as u64) as usize;
        Some(&self.entries[idx])
    }

    pub fn reset(&mut self) {
        self.entries.fill(T::default());
        self.pos = 0;
    }
}
