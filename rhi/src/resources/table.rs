//! Dense handle tables.
//!
//! Objects live in a `Vec` and are addressed by their 1-based position.
//! Removing an object leaves a tombstone in its slot: the slot is never
//! reused, so a handle can never alias a newer object. Looking up a removed
//! handle reports [`RhiError::StaleHandle`].

use std::marker::PhantomData;

use crate::error::RhiError;
use crate::types::Handle;

enum Slot<T> {
    Live(T),
    Tombstone,
}

/// Arena of objects addressed by typed handles.
pub struct HandleTable<H: Handle, T> {
    slots: Vec<Slot<T>>,
    live: usize,
    _marker: PhantomData<fn() -> H>,
}

impl<H: Handle, T> HandleTable<H, T> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            live: 0,
            _marker: PhantomData,
        }
    }

    /// Insert an object and return its handle.
    pub fn insert(&mut self, value: T) -> Result<H, RhiError> {
        let raw = u32::try_from(self.slots.len() + 1).map_err(|_| {
            RhiError::InvalidOperation(format!("{} table is full", H::KIND))
        })?;
        self.slots.push(Slot::Live(value));
        self.live += 1;
        Ok(H::from_raw(raw))
    }

    fn index(&self, handle: H) -> Result<usize, RhiError> {
        let raw = handle.raw();
        if raw == 0 || raw as usize > self.slots.len() {
            return Err(RhiError::InvalidHandle {
                kind: H::KIND,
                handle: raw,
            });
        }
        Ok(raw as usize - 1)
    }

    /// Look up a live object.
    pub fn get(&self, handle: H) -> Result<&T, RhiError> {
        let index = self.index(handle)?;
        match &self.slots[index] {
            Slot::Live(value) => Ok(value),
            Slot::Tombstone => Err(stale::<H>(handle)),
        }
    }

    /// Look up a live object mutably.
    pub fn get_mut(&mut self, handle: H) -> Result<&mut T, RhiError> {
        let index = self.index(handle)?;
        match &mut self.slots[index] {
            Slot::Live(value) => Ok(value),
            Slot::Tombstone => Err(stale::<H>(handle)),
        }
    }

    /// Remove an object, leaving a tombstone, and return it.
    pub fn remove(&mut self, handle: H) -> Result<T, RhiError> {
        let index = self.index(handle)?;
        match std::mem::replace(&mut self.slots[index], Slot::Tombstone) {
            Slot::Live(value) => {
                self.live -= 1;
                Ok(value)
            }
            Slot::Tombstone => Err(stale::<H>(handle)),
        }
    }

    /// Returns true if the handle refers to a live object.
    pub fn contains(&self, handle: H) -> bool {
        self.get(handle).is_ok()
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns true if no object is live.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of handles ever issued, including tombstones.
    pub fn issued(&self) -> usize {
        self.slots.len()
    }

    /// Iterate over live objects.
    pub fn iter(&self) -> impl Iterator<Item = (H, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| match slot {
            Slot::Live(value) => Some((H::from_raw(i as u32 + 1), value)),
            Slot::Tombstone => None,
        })
    }

    /// Iterate mutably over live objects.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (H, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| match slot {
                Slot::Live(value) => Some((H::from_raw(i as u32 + 1), value)),
                Slot::Tombstone => None,
            })
    }

    /// Remove every live object, leaving tombstones behind.
    pub fn drain(&mut self) -> Vec<T> {
        let mut drained = Vec::with_capacity(self.live);
        for slot in &mut self.slots {
            if let Slot::Live(value) = std::mem::replace(slot, Slot::Tombstone) {
                drained.push(value);
            }
        }
        self.live = 0;
        drained
    }
}

impl<H: Handle, T> Default for HandleTable<H, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Handle, T> std::fmt::Debug for HandleTable<H, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleTable")
            .field("kind", &H::KIND)
            .field("live", &self.live)
            .field("issued", &self.slots.len())
            .finish()
    }
}

fn stale<H: Handle>(handle: H) -> RhiError {
    RhiError::StaleHandle {
        kind: H::KIND,
        handle: handle.raw(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BufferHandle;

    #[test]
    fn test_handles_are_one_based() {
        let mut table: HandleTable<BufferHandle, &str> = HandleTable::new();
        let a = table.insert("a").unwrap();
        let b = table.insert("b").unwrap();
        assert_eq!(a.raw(), 1);
        assert_eq!(b.raw(), 2);
        assert_eq!(*table.get(b).unwrap(), "b");
    }

    #[test]
    fn test_null_handle_rejected() {
        let table: HandleTable<BufferHandle, u32> = HandleTable::new();
        assert_eq!(
            table.get(BufferHandle::NULL).unwrap_err(),
            RhiError::InvalidHandle {
                kind: "buffer",
                handle: 0
            }
        );
        assert!(table.get(BufferHandle::from_raw(5)).is_err());
    }

    #[test]
    fn test_removed_handle_is_stale_and_never_reissued() {
        let mut table: HandleTable<BufferHandle, u32> = HandleTable::new();
        let first = table.insert(10).unwrap();
        assert_eq!(table.remove(first).unwrap(), 10);

        assert_eq!(
            table.get(first).unwrap_err(),
            RhiError::StaleHandle {
                kind: "buffer",
                handle: first.raw()
            }
        );
        assert!(table.remove(first).is_err());

        let second = table.insert(20).unwrap();
        assert_ne!(first, second);
        assert_eq!(table.len(), 1);
        assert_eq!(table.issued(), 2);
    }

    #[test]
    fn test_iter_skips_tombstones() {
        let mut table: HandleTable<BufferHandle, u32> = HandleTable::new();
        let handles: Vec<_> = (0..4).map(|i| table.insert(i).unwrap()).collect();
        table.remove(handles[1]).unwrap();
        let live: Vec<u32> = table.iter().map(|(_, v)| *v).collect();
        assert_eq!(live, vec![0, 2, 3]);

        for (_, value) in table.iter_mut() {
            *value += 100;
        }
        assert_eq!(*table.get(handles[3]).unwrap(), 103);
    }

    #[test]
    fn test_drain_tombstones_everything() {
        let mut table: HandleTable<BufferHandle, u32> = HandleTable::new();
        let h = table.insert(1).unwrap();
        table.insert(2).unwrap();
        assert_eq!(table.drain().len(), 2);
        assert!(table.is_empty());
        assert!(matches!(table.get(h), Err(RhiError::StaleHandle { .. })));
    }
}
