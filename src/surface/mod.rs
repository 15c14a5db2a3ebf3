// Presentation surface
//
// Owns the swap chain bound to one window, the ring of back buffers and
// their render-target views, and the index of the buffer the producer
// draws into next.
//
// Three timelines meet here: the window (resizes and mode switches at any
// time), the GPU queue (lags behind the CPU by an unknown number of frames)
// and the presentation engine (recycles a fixed ring of images). The rule
// that holds it together: no buffer or view is released before the
// completion tracker has reached the last fence value submitted against it.
//
// Threading: one render thread owns the surface. Every mutating call takes
// `&mut self` and there is no internal lock.

mod ring;

#[cfg(test)]
pub(crate) mod mock;


use anyhow::{Context, Result};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use crate::device::{PixelFormat, PresentDevice, SwapChain, SwapChainDesc};
use crate::fence::CompletionTracker;
use crate::registry::{ViewDesc, ViewHandle, ViewRegistry};

pub use ring::{BackBuffer, BackBufferRing};

/// Ring size used when the caller has no preference.
pub const DEFAULT_BUFFER_COUNT: u32 = 3;
pub const MIN_BUFFER_COUNT: u32 = 2;
pub const MAX_BUFFER_COUNT: u32 = 16;

/// A window's presentable surface: swap chain, back buffers and views.
///
/// Lifecycle: [`PresentationSurface::create`] once, [`PresentationSurface::resize`]
/// any number of times, then [`PresentationSurface::destroy`] (or drop).
/// Both resize and destroy drain outstanding GPU work before touching the
/// ring; present and the accessors never block.
pub struct PresentationSurface<D, R>
where
    D: PresentDevice,
    R: ViewRegistry<D::Buffer>,
{
    // Field order matters for Drop: the swap chain goes first, the device
    // it was created from last.
    swap_chain: D::SwapChain,
    ring: BackBufferRing<D::Buffer>,
    surface: D::Surface,
    desc: SwapChainDesc,
    current_index: u32,
    last_used_fence_value: u64,
    should_present: bool,
    render_thread: ThreadId,
    registry: Arc<R>,
    device: Arc<D>,
}

impl<D, R> PresentationSurface<D, R>
where
    D: PresentDevice,
    R: ViewRegistry<D::Buffer>,
{
    /// Create the swap chain for `surface`, fetch its buffers and allocate
    /// one render-target view per buffer.
    ///
    /// The calling thread becomes the surface's render thread. A rejected
    /// swap chain or buffer is returned as an error; nothing is retried.
    pub fn create(
        device: Arc<D>,
        registry: Arc<R>,
        surface: D::Surface,
        desc: SwapChainDesc,
    ) -> Result<Self> {
        validate_extent(desc.width, desc.height)?;
        if !(MIN_BUFFER_COUNT..=MAX_BUFFER_COUNT).contains(&desc.buffer_count) {
            anyhow::bail!(
                "Invalid buffer count {} (expected {}..={})",
                desc.buffer_count,
                MIN_BUFFER_COUNT,
                MAX_BUFFER_COUNT
            );
        }

        log::info!(
            "Creating presentation surface: {}x{} {:?}, {} buffers ({})",
            desc.width,
            desc.height,
            desc.format,
            desc.buffer_count,
            if desc.full_screen { "fullscreen" } else { "windowed" }
        );

        let mut swap_chain = device
            .create_swap_chain(&surface, &desc)
            .context("Failed to create swap chain")?;

        let ring = BackBufferRing::acquire(
            &mut swap_chain,
            &*registry,
            desc.buffer_count,
            &ViewDesc::render_target(desc.format),
        )?;

        Ok(Self {
            swap_chain,
            ring,
            surface,
            desc,
            current_index: 0,
            last_used_fence_value: 0,
            should_present: true,
            render_thread: thread::current().id(),
            registry,
            device,
        })
    }

    /// Bring the surface to the given geometry, format and mode.
    ///
    /// Size or format changes rebuild the whole ring after draining the GPU
    /// and restart the rotation at buffer 0. A mode switch alone only
    /// toggles the swap chain's full-screen state. Identical parameters are
    /// a no-op.
    ///
    /// Returns `Ok(true)` when the ring was rebuilt, so every buffer and
    /// view handle the caller holds is stale.
    ///
    /// If the platform rejects any step the surface is left in an
    /// unspecified state and should be destroyed.
    pub fn resize(
        &mut self,
        width: u32,
        height: u32,
        full_screen: bool,
        format: PixelFormat,
    ) -> Result<bool> {
        let resize_buffers =
            width != self.desc.width || height != self.desc.height || format != self.desc.format;
        let switch_full_screen = full_screen != self.desc.full_screen;

        if !resize_buffers && !switch_full_screen {
            return Ok(false);
        }

        if resize_buffers {
            validate_extent(width, height)?;
        }

        log::debug!(
            "Resize {}x{} {:?} -> {}x{} {:?} (buffers: {}, fullscreen: {})",
            self.desc.width,
            self.desc.height,
            self.desc.format,
            width,
            height,
            format,
            resize_buffers,
            switch_full_screen
        );

        if resize_buffers {
            self.wait_for_completion()?;
            self.release_buffers();
        }

        self.desc.width = width;
        self.desc.height = height;
        self.desc.full_screen = full_screen;
        self.desc.format = format;

        if resize_buffers {
            self.swap_chain
                .resize_buffers(&self.desc)
                .context("Failed to resize swap chain buffers")?;
        }

        if switch_full_screen {
            self.swap_chain
                .set_full_screen_state(full_screen)
                .context("Failed to switch full-screen state")?;
        }

        if resize_buffers {
            self.acquire_buffers()?;
        }

        log::info!(
            "Surface resized: {}x{} {:?} ({})",
            width,
            height,
            format,
            if full_screen { "fullscreen" } else { "windowed" }
        );
        Ok(resize_buffers)
    }

    /// Tear the ring down and build it again with unchanged parameters.
    ///
    /// For swap chains the platform has invalidated while the window kept
    /// its geometry, where [`PresentationSurface::resize`] is a no-op. Same
    /// sequence as a size change: drain, release, resize the swap chain,
    /// re-acquire, rotation back at buffer 0.
    pub fn rebuild(&mut self) -> Result<()> {
        log::info!(
            "Rebuilding back buffers: {}x{} {:?}",
            self.desc.width,
            self.desc.height,
            self.desc.format
        );

        self.wait_for_completion()?;
        self.release_buffers();
        self.swap_chain
            .resize_buffers(&self.desc)
            .context("Failed to resize swap chain buffers")?;
        self.acquire_buffers()
    }

    /// Buffer the producer should render into this frame.
    pub fn current_buffer(&self) -> &D::Buffer {
        self.assert_render_thread();
        &self.ring.slot(self.current_index).buffer
    }

    /// Render-target view of [`PresentationSurface::current_buffer`].
    pub fn current_view(&self) -> ViewHandle {
        self.assert_render_thread();
        self.ring.slot(self.current_index).view
    }

    /// Hand the current buffer to the display and rotate the ring.
    ///
    /// Returns `Ok(false)` without touching the swap chain while
    /// presentation is disabled. Never waits on the GPU; pacing is left to
    /// the platform's present queue. A rejected present does not rotate.
    pub fn present(&mut self) -> Result<bool> {
        if !self.should_present {
            return Ok(false);
        }

        self.swap_chain
            .present(self.current_index)
            .with_context(|| format!("Failed to present back buffer {}", self.current_index))?;

        log::trace!("Presented back buffer {}", self.current_index);
        self.current_index = (self.current_index + 1) % self.desc.buffer_count;
        Ok(true)
    }

    /// Record that work submitted against the current buffer set completes
    /// at `fence_value`. Keeps the highest value seen.
    pub fn mark_used(&mut self, fence_value: u64) {
        self.last_used_fence_value = self.last_used_fence_value.max(fence_value);
    }

    /// Enable or disable presentation, e.g. while the window is minimized.
    pub fn set_should_present(&mut self, should_present: bool) {
        self.should_present = should_present;
    }

    pub fn should_present(&self) -> bool {
        self.should_present
    }

    pub fn current_index(&self) -> u32 {
        self.current_index
    }

    pub fn last_used_fence_value(&self) -> u64 {
        self.last_used_fence_value
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    pub fn format(&self) -> PixelFormat {
        self.desc.format
    }

    pub fn is_full_screen(&self) -> bool {
        self.desc.full_screen
    }

    pub fn buffer_count(&self) -> u32 {
        self.desc.buffer_count
    }

    pub fn desc(&self) -> &SwapChainDesc {
        &self.desc
    }

    pub fn surface_handle(&self) -> &D::Surface {
        &self.surface
    }

    /// Backend swap chain, for producer plumbing such as present semaphores.
    pub fn swap_chain(&self) -> &D::SwapChain {
        &self.swap_chain
    }

    pub fn buffers(&self) -> impl Iterator<Item = &D::Buffer> {
        self.ring.buffers()
    }

    /// Every view in ring order.
    pub fn views(&self) -> impl Iterator<Item = ViewHandle> + '_ {
        self.ring.views()
    }

    /// Drain the GPU, then free every view, release every buffer and
    /// finally the swap chain.
    pub fn destroy(mut self) -> Result<()> {
        self.release_ring()
        // The swap chain is released when `self` drops right after
    }

    fn release_ring(&mut self) -> Result<()> {
        // Taken before the wait: if the wait fails the ring is abandoned
        // rather than released under the GPU, and Drop finds nothing left.
        let ring = std::mem::replace(&mut self.ring, BackBufferRing::empty());
        self.wait_for_completion()?;
        let count = ring.len();
        ring.release(&mut self.swap_chain, &*self.registry);
        log::info!("Released {} back buffers", count);
        Ok(())
    }

    /// Caller must have waited for the GPU.
    fn release_buffers(&mut self) {
        let ring = std::mem::replace(&mut self.ring, BackBufferRing::empty());
        ring.release(&mut self.swap_chain, &*self.registry);
    }

    fn acquire_buffers(&mut self) -> Result<()> {
        self.ring = BackBufferRing::acquire(
            &mut self.swap_chain,
            &*self.registry,
            self.desc.buffer_count,
            &ViewDesc::render_target(self.desc.format),
        )?;
        self.current_index = 0;
        self.last_used_fence_value = 0;
        Ok(())
    }

    fn wait_for_completion(&self) -> Result<()> {
        let tracker = self.device.completion_tracker();
        log::debug!(
            "Waiting for fence value {} (completed: {})",
            self.last_used_fence_value,
            tracker.completed_value()
        );
        tracker
            .wait_for(self.last_used_fence_value)
            .with_context(|| format!("Failed to wait for fence value {}", self.last_used_fence_value))
    }

    fn assert_render_thread(&self) {
        debug_assert_eq!(
            thread::current().id(),
            self.render_thread,
            "presentation surface accessed off its render thread"
        );
    }
}

impl<D, R> Drop for PresentationSurface<D, R>
where
    D: PresentDevice,
    R: ViewRegistry<D::Buffer>,
{
    fn drop(&mut self) {
        if self.ring.is_empty() {
            return;
        }
        if let Err(e) = self.release_ring() {
            log::error!("Failed to release presentation surface: {:?}", e);
        }
    }
}

fn validate_extent(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        anyhow::bail!("Invalid surface extent {}x{}", width, height);
    }
    Ok(())
}
