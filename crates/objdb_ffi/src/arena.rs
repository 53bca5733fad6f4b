//! Generation-checked handle arenas.
//!
//! A handle packs a slot index and the slot's generation into one `u64`:
//!
//! ```text
//! | generation: u32 | index + 1: u32 |
//! ```
//!
//! Freeing a slot bumps its generation, so stale handles are detected
//! instead of aliasing whatever reuses the slot. `0` is never a valid
//! handle.

use crate::error::FfiError;
use objdb_core::InstanceId;

/// Handle passed across the C ABI.
pub type ObjHandle = u64;

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slab of values addressed by [`ObjHandle`]s.
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    fn split(handle: ObjHandle) -> Option<(usize, u32)> {
        let index = (handle & 0xFFFF_FFFF) as u32;
        let generation = (handle >> 32) as u32;
        index.checked_sub(1).map(|i| (i as usize, generation))
    }

    fn join(index: u32, generation: u32) -> ObjHandle {
        (u64::from(generation) << 32) | u64::from(index + 1)
    }

    /// Stores `value` and returns its handle.
    pub fn insert(&mut self, value: T) -> ObjHandle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return Self::join(index, slot.generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        Self::join(index, 0)
    }

    /// The value behind `handle`.
    pub fn get(&self, handle: ObjHandle) -> Result<&T, FfiError> {
        let (index, generation) = Self::split(handle).ok_or(FfiError::InvalidHandle)?;
        self.slots
            .get(index)
            .filter(|slot| slot.generation == generation)
            .and_then(|slot| slot.value.as_ref())
            .ok_or(FfiError::InvalidHandle)
    }

    /// The value behind `handle`, mutably.
    pub fn get_mut(&mut self, handle: ObjHandle) -> Result<&mut T, FfiError> {
        let (index, generation) = Self::split(handle).ok_or(FfiError::InvalidHandle)?;
        self.slots
            .get_mut(index)
            .filter(|slot| slot.generation == generation)
            .and_then(|slot| slot.value.as_mut())
            .ok_or(FfiError::InvalidHandle)
    }

    /// Takes the value out and invalidates `handle`.
    pub fn remove(&mut self, handle: ObjHandle) -> Result<T, FfiError> {
        let (index, generation) = Self::split(handle).ok_or(FfiError::InvalidHandle)?;
        let slot = self
            .slots
            .get_mut(index)
            .filter(|slot| slot.generation == generation && slot.value.is_some())
            .ok_or(FfiError::InvalidHandle)?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index as u32);
        slot.value.take().ok_or(FfiError::InvalidHandle)
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Whether no value is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every value for which `keep` returns false.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.value.as_ref().is_some_and(|v| !keep(v)) {
                slot.value = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
            }
        }
    }
}

/// A value owned by one instance.
pub struct Bound<T> {
    /// Owning instance.
    pub instance_id: InstanceId,
    /// The value.
    pub value: T,
}

impl<T> Bound<T> {
    /// Binds `value` to `instance_id`.
    pub fn new(instance_id: InstanceId, value: T) -> Self {
        Self { instance_id, value }
    }

    /// The value, if it belongs to `instance_id`.
    pub fn check(&self, instance_id: InstanceId) -> Result<&T, FfiError> {
        if self.instance_id == instance_id {
            Ok(&self.value)
        } else {
            Err(FfiError::mismatch(instance_id, self.instance_id))
        }
    }

    /// The value mutably, if it belongs to `instance_id`.
    pub fn check_mut(&mut self, instance_id: InstanceId) -> Result<&mut T, FfiError> {
        if self.instance_id == instance_id {
            Ok(&mut self.value)
        } else {
            Err(FfiError::mismatch(instance_id, self.instance_id))
        }
    }
}

impl<T> Arena<Bound<T>> {
    /// Takes the value out if it belongs to `instance_id`.
    pub fn remove_checked(&mut self, handle: ObjHandle, instance_id: InstanceId) -> Result<T, FfiError> {
        self.get(handle)?.check(instance_id)?;
        self.remove(handle).map(|bound| bound.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_handles_are_rejected() {
        let mut arena = Arena::new();
        let first = arena.insert("a");
        assert_eq!(*arena.get(first).unwrap(), "a");
        assert_eq!(arena.remove(first).unwrap(), "a");
        assert!(arena.get(first).is_err());
        assert!(arena.remove(first).is_err());

        let second = arena.insert("b");
        assert_ne!(first, second);
        assert_eq!(first & 0xFFFF_FFFF, second & 0xFFFF_FFFF);
        assert!(arena.get(first).is_err());
        assert_eq!(*arena.get(second).unwrap(), "b");
    }

    #[test]
    fn zero_is_never_valid() {
        let mut arena = Arena::new();
        arena.insert(1);
        assert!(arena.get(0).is_err());
    }

    #[test]
    fn bound_values_check_their_instance() {
        let mut arena = Arena::new();
        let handle = arena.insert(Bound::new(1, "q"));
        assert!(arena.get(handle).unwrap().check(1).is_ok());
        assert!(matches!(
            arena.get(handle).unwrap().check(2),
            Err(FfiError::Core(objdb_core::CoreError::InstanceMismatch {
                expected: 2,
                actual: 1
            }))
        ));
        assert!(arena.remove_checked(handle, 2).is_err());
        assert_eq!(arena.remove_checked(handle, 1).unwrap(), "q");
        assert!(arena.is_empty());
    }

    #[test]
    fn retain_frees_slots() {
        let mut arena = Arena::new();
        let a = arena.insert(Bound::new(1, ()));
        let b = arena.insert(Bound::new(2, ()));
        arena.retain(|v| v.instance_id != 1);
        assert!(arena.get(a).is_err());
        assert!(arena.get(b).is_ok());
        assert_eq!(arena.len(), 1);
    }
}
