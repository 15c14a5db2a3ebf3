// View registry
//
// Render-target views are allocated from a process-wide registry and
// referred to by small generational handles. The surface only ever holds
// handles; the registry owns whatever backs them.

use anyhow::Result;

use crate::device::PixelFormat;

/// Handle to a view allocated from a [`ViewRegistry`].
///
/// The generation changes every time a slot is reused, so a freed handle
/// never aliases the view that later takes its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewHandle {
    pub index: u32,
    pub generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewDimension {
    Texture2D,
}

/// How a back buffer is interpreted as a render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewDesc {
    pub format: PixelFormat,
    pub dimension: ViewDimension,
    pub mip_slice: u32,
    pub plane_slice: u32,
}

impl ViewDesc {
    /// Single-mip 2D render target view, the only kind a back buffer gets.
    pub fn render_target(format: PixelFormat) -> Self {
        Self {
            format,
            dimension: ViewDimension::Texture2D,
            mip_slice: 0,
            plane_slice: 0,
        }
    }
}

/// Shared allocator of views over buffers of type `B`.
///
/// Many owners share one registry, so both calls take `&self`;
/// implementations guard their tables internally.
pub trait ViewRegistry<B> {
    fn allocate_view(&self, buffer: &B, desc: &ViewDesc) -> Result<ViewHandle>;

    fn free_view(&self, view: ViewHandle);
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Generational slot storage backing a registry.
///
/// Freed indices are recycled LIFO, each reuse bumping the slot's
/// generation.
pub struct SlotTable<T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<u32>,
    len: usize,
}

impl<T> SlotTable<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            len: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> ViewHandle {
        self.len += 1;
        match self.free_list.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.generation = slot.generation.wrapping_add(1);
                slot.value = Some(value);
                ViewHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    value: Some(value),
                });
                ViewHandle {
                    index,
                    generation: 0,
                }
            }
        }
    }

    /// Take the value out of a live handle. Stale or unknown handles
    /// return `None` and leave the table untouched.
    pub fn remove(&mut self, handle: ViewHandle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        self.free_list.push(handle.index);
        self.len -= 1;
        Some(value)
    }

    pub fn get(&self, handle: ViewHandle) -> Option<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn contains(&self, handle: ViewHandle) -> bool {
        self.get(handle).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Remove every live value, e.g. to destroy them at shutdown.
    pub fn drain(&mut self) -> Vec<T> {
        let mut values = Vec::with_capacity(self.len);
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(value) = slot.value.take() {
                values.push(value);
                self.free_list.push(index as u32);
            }
        }
        self.len = 0;
        values
    }
}

impl<T> Default for SlotTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let mut table = SlotTable::new();
        let a = table.insert("a");
        let b = table.insert("b");
        assert_ne!(a, b);
        assert_eq!(table.get(a), Some(&"a"));
        assert_eq!(table.get(b), Some(&"b"));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn reused_slot_gets_new_generation() {
        let mut table = SlotTable::new();
        let a = table.insert(1);
        assert_eq!(table.remove(a), Some(1));

        let b = table.insert(2);
        assert_eq!(b.index, a.index);
        assert_ne!(b.generation, a.generation);

        // The stale handle must not reach the new value
        assert_eq!(table.get(a), None);
        assert_eq!(table.remove(a), None);
        assert_eq!(table.get(b), Some(&2));
    }

    #[test]
    fn double_remove_is_ignored() {
        let mut table = SlotTable::new();
        let a = table.insert(7);
        table.remove(a);
        assert_eq!(table.remove(a), None);
        assert!(table.is_empty());
    }

    #[test]
    fn drain_empties_the_table() {
        let mut table = SlotTable::new();
        let a = table.insert(1);
        table.insert(2);
        let mut values = table.drain();
        values.sort();
        assert_eq!(values, vec![1, 2]);
        assert!(table.is_empty());
        assert!(!table.contains(a));
    }

    #[test]
    fn render_target_desc_is_single_mip_2d() {
        let desc = ViewDesc::render_target(PixelFormat::Bgra8Unorm);
        assert_eq!(desc.dimension, ViewDimension::Texture2D);
        assert_eq!(desc.mip_slice, 0);
        assert_eq!(desc.plane_slice, 0);
    }
}
