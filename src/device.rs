// Device/queue layer seen from the presentation surface
//
// The surface never talks to a graphics API directly. Whatever creates
// devices and queues implements these traits and is injected at
// construction, which is also how the tests swap in a recording double.

use anyhow::Result;
use serde::Deserialize;

use crate::fence::CompletionTracker;
use crate::surface::DEFAULT_BUFFER_COUNT;

/// Color format of the back buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Bgra8Unorm,
    Bgra8Srgb,
    Rgba8Unorm,
    Rgba8Srgb,
    Rgb10A2Unorm,
    Rgba16Float,
}

/// How presentation is paced by the platform.
///
/// `Immediate` asks for no sync interval at all and leaves tearing control
/// to the platform. `Fifo` is the fallback every platform supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentMode {
    #[default]
    Immediate,
    Fifo,
}

/// Geometry and mode of a swap chain's buffer ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapChainDesc {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub full_screen: bool,
    pub buffer_count: u32,
    pub present_mode: PresentMode,
}

impl SwapChainDesc {
    /// Windowed, immediate-present ring with the default buffer count.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            full_screen: false,
            buffer_count: DEFAULT_BUFFER_COUNT,
            present_mode: PresentMode::Immediate,
        }
    }

    pub fn with_full_screen(mut self, full_screen: bool) -> Self {
        self.full_screen = full_screen;
        self
    }

    pub fn with_buffer_count(mut self, buffer_count: u32) -> Self {
        self.buffer_count = buffer_count;
        self
    }

    pub fn with_present_mode(mut self, present_mode: PresentMode) -> Self {
        self.present_mode = present_mode;
        self
    }
}

/// Platform swap chain: a fixed ring of presentable images.
pub trait SwapChain {
    type Buffer;

    /// Get the image at `index` in the ring.
    fn get_buffer(&mut self, index: u32) -> Result<Self::Buffer>;

    /// Give back an image obtained from [`SwapChain::get_buffer`].
    fn release_buffer(&mut self, buffer: Self::Buffer);

    /// Rebuild the ring with new geometry/format. Every buffer must have
    /// been released beforehand.
    fn resize_buffers(&mut self, desc: &SwapChainDesc) -> Result<()>;

    fn set_full_screen_state(&mut self, full_screen: bool) -> Result<()>;

    /// Queue the image at `index` for display. Fire-and-forget: returns
    /// once the request is issued, not once it is on screen.
    fn present(&mut self, index: u32) -> Result<()>;
}

/// Device and queue services a presentation surface depends on.
pub trait PresentDevice {
    /// Native window/surface the swap chain is bound to.
    type Surface;
    type Buffer;
    type SwapChain: SwapChain<Buffer = Self::Buffer>;
    type Tracker: CompletionTracker;

    fn create_swap_chain(
        &self,
        surface: &Self::Surface,
        desc: &SwapChainDesc,
    ) -> Result<Self::SwapChain>;

    /// Completion counter of the queue that renders into the swap chain.
    fn completion_tracker(&self) -> &Self::Tracker;
}
