// crates/qrow-engine/src/extend.rs

//! Saved deepening extensions.
//!
//! A successful depth-first probe may leave behind the row sequence it
//! found, so later BFS expansions of the same node (and the next deepening
//! round) replay it instead of searching again. Slot layout:
//!
//! ```text
//! ext[0] = index of the last stored row (start_row + how_deep)
//! ext[1] = cursor: rows below it are already consumed/known
//! ext[2 + k] = row k of the probe's scratch stack (node prefix included)
//! ```
//!
//! Slot 0 means "no extension"; slot 1 is the marker "probe succeeded but
//! stored no rows". Real slots start at 2. Allocation and release are
//! serialised by one mutex (the only cross-thread traffic); contents are
//! only touched by the node's current owner.

use parking_lot::Mutex;
use qrow_core::Row;

/// Marker value: success without stored rows.
pub const EXT_BARE_SUCCESS: u32 = 1;

/// The extension-slot table.
pub struct Extensions {
    slots: Mutex<Vec<Option<Box<[u16]>>>>,
}

impl Extensions {
    /// Table with `capacity` slots (indices 0 and 1 are reserved markers).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::new();
        slots.resize_with(capacity.max(2), || None);
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Store `rows[0..=total]` in a free slot with the cursor at
    /// `cursor`. Returns the slot index, or `None` when the table is full
    /// (the caller aborts the search).
    #[must_use]
    pub fn save(&self, rows: &[Row], total: u16, cursor: u16) -> Option<u32> {
        let mut slots = self.slots.lock();
        let idx = (2..slots.len()).find(|&i| slots[i].is_none())?;
        let mut buf = vec![0u16; total as usize + 3];
        buf[0] = total;
        buf[1] = cursor;
        buf[2..].copy_from_slice(&rows[..=total as usize]);
        slots[idx] = Some(buf.into_boxed_slice());
        Some(idx as u32)
    }

    /// Remove and return a slot's contents.
    #[must_use]
    pub fn take(&self, idx: u32) -> Option<Box<[u16]>> {
        if idx < 2 {
            return None;
        }
        self.slots.lock()[idx as usize].take()
    }

    /// Drop a slot's contents.
    pub fn release(&self, idx: u32) {
        if idx >= 2 {
            self.slots.lock()[idx as usize] = None;
        }
    }

    /// Run `f` on the slot contents in place (BFS replay mutates the
    /// cursor). `None` is passed for marker indices and freed slots.
    pub fn with_slot<R>(&self, idx: u32, f: impl FnOnce(Option<&mut [u16]>) -> R) -> R {
        if idx < 2 {
            return f(None);
        }
        let mut slots = self.slots.lock();
        f(slots[idx as usize].as_deref_mut())
    }

    /// Snapshot a slot for checkpointing.
    #[must_use]
    pub fn snapshot(&self, idx: u32) -> Option<Vec<u16>> {
        if idx < 2 {
            return None;
        }
        self.slots.lock()[idx as usize]
            .as_ref()
            .map(|b| b.to_vec())
    }

    /// Install dumped contents into a specific slot (loader only).
    /// Returns false when the slot index is out of range.
    pub fn install(&self, idx: u32, contents: Vec<u16>) -> bool {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(idx as usize) else {
            return false;
        };
        *slot = Some(contents.into_boxed_slice());
        true
    }

    /// First free real slot index, for the loader's sequential fills.
    #[must_use]
    pub fn first_free(&self) -> Option<u32> {
        let slots = self.slots.lock();
        (2..slots.len()).find(|&i| slots[i].is_none()).map(|i| i as u32)
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut slots = self.slots.lock();
        for s in slots.iter_mut() {
            *s = None;
        }
    }

    /// Copy out every occupied slot (queue splitting).
    #[must_use]
    pub fn snapshot_all(&self) -> Vec<(u32, Vec<u16>)> {
        let slots = self.slots.lock();
        slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|b| (i as u32, b.to_vec())))
            .collect()
    }

    /// Replace the table's contents with a snapshot.
    pub fn restore_all(&self, snapshot: &[(u32, Vec<u16>)]) {
        let mut slots = self.slots.lock();
        for s in slots.iter_mut() {
            *s = None;
        }
        for (i, contents) in snapshot {
            slots[*i as usize] = Some(contents.clone().into_boxed_slice());
        }
    }
}
