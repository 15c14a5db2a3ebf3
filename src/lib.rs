// Viewport renderer - presentation surface management
//
// Design: the surface core only sees the device, completion tracker and
// view registry through traits, so any backend (or a test double) can be
// injected. The Vulkan backend lives in `backend`.

pub mod backend;
pub mod config;
pub mod device;
pub mod fence;
pub mod registry;
pub mod surface;

pub use device::{PixelFormat, PresentDevice, PresentMode, SwapChain, SwapChainDesc};
pub use fence::{CompletionTracker, FrameFence};
pub use registry::{SlotTable, ViewDesc, ViewDimension, ViewHandle, ViewRegistry};
pub use surface::{PresentationSurface, DEFAULT_BUFFER_COUNT};
