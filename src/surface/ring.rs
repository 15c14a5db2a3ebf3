// Back-buffer ring
//
// Buffers and their views live side by side in one fixed-length slice.
// The whole ring is built and torn down as a unit, so the producer never
// sees a half-rebuilt set.

use anyhow::Result;

use crate::device::SwapChain;
use crate::registry::{ViewDesc, ViewHandle, ViewRegistry};

/// One slot of the ring: an image and the view the producer renders through.
pub struct BackBuffer<B> {
    pub buffer: B,
    pub view: ViewHandle,
}

pub struct BackBufferRing<B> {
    slots: Box<[BackBuffer<B>]>,
}

impl<B> BackBufferRing<B> {
    /// A ring with no slots, the state between teardown and rebuild.
    pub fn empty() -> Self {
        Self {
            slots: Vec::new().into_boxed_slice(),
        }
    }

    /// Fetch `count` images from the swap chain, then allocate one view
    /// per image, both in index order.
    ///
    /// On failure everything obtained so far is handed back before the
    /// error is returned.
    pub fn acquire<S, R>(
        swap_chain: &mut S,
        registry: &R,
        count: u32,
        desc: &ViewDesc,
    ) -> Result<Self>
    where
        S: SwapChain<Buffer = B>,
        R: ViewRegistry<B> + ?Sized,
    {
        let mut buffers = Vec::with_capacity(count as usize);
        for index in 0..count {
            match swap_chain.get_buffer(index) {
                Ok(buffer) => buffers.push(buffer),
                Err(e) => {
                    for buffer in buffers {
                        swap_chain.release_buffer(buffer);
                    }
                    return Err(e.context(format!("Failed to acquire back buffer {}", index)));
                }
            }
        }

        let mut views = Vec::with_capacity(buffers.len());
        let mut failure = None;
        for (index, buffer) in buffers.iter().enumerate() {
            match registry.allocate_view(buffer, desc) {
                Ok(view) => views.push(view),
                Err(e) => {
                    failure = Some(e.context(format!("Failed to create view for back buffer {}", index)));
                    break;
                }
            }
        }

        if let Some(e) = failure {
            for view in views {
                registry.free_view(view);
            }
            for buffer in buffers {
                swap_chain.release_buffer(buffer);
            }
            return Err(e);
        }

        let slots: Vec<_> = buffers
            .into_iter()
            .zip(views)
            .map(|(buffer, view)| BackBuffer { buffer, view })
            .collect();

        Ok(Self {
            slots: slots.into_boxed_slice(),
        })
    }

    /// Free each view and release its image, slot by slot in index order.
    ///
    /// Callers must have waited for the GPU to finish with every slot.
    pub fn release<S, R>(self, swap_chain: &mut S, registry: &R)
    where
        S: SwapChain<Buffer = B>,
        R: ViewRegistry<B> + ?Sized,
    {
        for slot in self.slots.into_vec() {
            registry.free_view(slot.view);
            swap_chain.release_buffer(slot.buffer);
        }
    }

    pub fn slot(&self, index: u32) -> &BackBuffer<B> {
        &self.slots[index as usize]
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn buffers(&self) -> impl Iterator<Item = &B> {
        self.slots.iter().map(|slot| &slot.buffer)
    }

    pub fn views(&self) -> impl Iterator<Item = ViewHandle> + '_ {
        self.slots.iter().map(|slot| slot.view)
    }
}
