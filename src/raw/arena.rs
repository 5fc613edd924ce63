use alloc::vec::Vec;
use core::num::NonZero;

/// Number of an occupied arena slot.
///
/// The arena never hands out slot zero (it keeps that slot permanently
/// vacant), so slot numbers are nonzero and `Option<Handle>` is no bigger
/// than `Handle` itself. A handle indexes the slot vector directly; there is
/// no offset arithmetic to undo at access sites.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub(crate) struct Handle(NonZero<u32>);

impl Handle {
    fn new(slot: usize) -> Self {
        let slot = u32::try_from(slot).expect("`Handle::new()` - arena exceeded u32::MAX slots!");
        Self(NonZero::new(slot).expect("`Handle::new()` - slot zero is never allocated!"))
    }

    /// The slot number, also usable as a stable opaque node id.
    pub(crate) fn slot(self) -> usize {
        self.0.get() as usize
    }
}

/// A slot allocator with a vacancy list.
///
/// Handles are plain slot numbers. Freed slots are recycled in LIFO order, so
/// handles stay dense under the churn of split/merge cycles. A handle is only
/// valid between the `alloc` that produced it and the `take`/`free` that
/// retires it.
#[derive(Clone)]
pub(crate) struct Arena<T> {
    // Slot zero is the permanent vacancy backing the handle niche.
    slots: Vec<Option<T>>,
    vacant: Vec<Handle>,
}

impl<T> Arena<T> {
    pub(crate) const fn new() -> Self {
        Self { slots: Vec::new(), vacant: Vec::new() }
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity + 1);
        slots.push(None);
        Self { slots, vacant: Vec::new() }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.capacity().saturating_sub(1)
    }

    /// Number of live (allocated, not yet freed) slots.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.len().saturating_sub(self.vacant.len() + 1)
    }

    pub(crate) fn alloc(&mut self, element: T) -> Handle {
        if let Some(handle) = self.vacant.pop() {
            self.slots[handle.slot()] = Some(element);
            handle
        } else {
            if self.slots.is_empty() {
                self.slots.push(None);
            }
            self.slots.push(Some(element));
            Handle::new(self.slots.len() - 1)
        }
    }

    #[inline]
    pub(crate) fn get(&self, handle: Handle) -> &T {
        self.slots[handle.slot()].as_ref().expect("`Arena::get()` - `handle` is stale!")
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, handle: Handle) -> &mut T {
        self.slots[handle.slot()].as_mut().expect("`Arena::get_mut()` - `handle` is stale!")
    }

    /// Returns a reference to an element through a raw arena pointer.
    ///
    /// # Safety
    /// - `ptr` must point to a valid, allocated `Arena<T>`.
    #[inline]
    pub(crate) unsafe fn get_ptr<'a>(ptr: *const Self, handle: Handle) -> &'a T {
        // SAFETY: Caller guarantees `ptr` is valid; only the slots field is read.
        unsafe { (&(*ptr).slots)[handle.slot()].as_ref().expect("`Arena::get_ptr()` - `handle` is stale!") }
    }

    /// Removes and returns the element, recycling its slot.
    pub(crate) fn take(&mut self, handle: Handle) -> T {
        let element = self.slots[handle.slot()].take().expect("`Arena::take()` - `handle` is stale!");
        self.vacant.push(handle);
        element
    }

    pub(crate) fn free(&mut self, handle: Handle) {
        drop(self.take(handle));
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.vacant.clear();
    }
}
