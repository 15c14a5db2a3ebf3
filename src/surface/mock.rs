// Recording device and registry for tests (no GPU required)
//
// Every device, swap chain, tracker and registry call is appended to a
// shared event log so tests can assert call counts and ordering. Buffer
// and view releases also record how far the fence had advanced at the
// time, which is how "no release before the wait" is checked.

use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::device::{PresentDevice, SwapChain, SwapChainDesc};
use crate::fence::{CompletionTracker, FrameFence};
use crate::registry::{SlotTable, ViewDesc, ViewHandle, ViewRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockBuffer {
    pub index: u32,
    /// Bumped every time the swap chain rebuilds its ring.
    pub epoch: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    CreateSwapChain(SwapChainDesc),
    GetBuffer(u32),
    ReleaseBuffer { buffer: MockBuffer, completed: u64 },
    ResizeBuffers(SwapChainDesc),
    SetFullScreen(bool),
    Present(u32),
    ReleaseSwapChain,
    Wait(u64),
    AllocateView(ViewHandle),
    FreeView { view: ViewHandle, completed: u64 },
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;

/// Failures the next matching call should report.
#[derive(Debug, Default)]
pub struct Failures {
    pub create: bool,
    pub get_buffer: Option<u32>,
    pub resize: bool,
    pub full_screen: bool,
    pub present: bool,
    pub wait: bool,
    pub allocate_view: bool,
}

pub struct MockTracker {
    fence: Arc<FrameFence>,
    log: EventLog,
    failures: Arc<Mutex<Failures>>,
}

impl CompletionTracker for MockTracker {
    fn completed_value(&self) -> u64 {
        self.fence.completed_value()
    }

    fn wait_for(&self, value: u64) -> Result<()> {
        self.log.lock().push(Event::Wait(value));
        if self.failures.lock().wait {
            anyhow::bail!("device lost");
        }
        self.fence.wait_for(value)
    }
}

pub struct MockDevice {
    pub log: EventLog,
    pub fence: Arc<FrameFence>,
    pub failures: Arc<Mutex<Failures>>,
    tracker: MockTracker,
}

impl MockDevice {
    pub fn new() -> Self {
        let log = EventLog::default();
        let fence = Arc::new(FrameFence::new());
        let failures = Arc::<Mutex<Failures>>::default();
        Self {
            tracker: MockTracker {
                fence: fence.clone(),
                log: log.clone(),
                failures: failures.clone(),
            },
            log,
            fence,
            failures,
        }
    }
}

impl PresentDevice for MockDevice {
    type Surface = u64;
    type Buffer = MockBuffer;
    type SwapChain = MockSwapChain;
    type Tracker = MockTracker;

    fn create_swap_chain(&self, _surface: &u64, desc: &SwapChainDesc) -> Result<MockSwapChain> {
        self.log.lock().push(Event::CreateSwapChain(*desc));
        if self.failures.lock().create {
            anyhow::bail!("swap chain creation rejected");
        }
        Ok(MockSwapChain {
            log: self.log.clone(),
            fence: self.fence.clone(),
            failures: self.failures.clone(),
            buffer_count: desc.buffer_count,
            epoch: 0,
            outstanding: 0,
        })
    }

    fn completion_tracker(&self) -> &MockTracker {
        &self.tracker
    }
}

pub struct MockSwapChain {
    log: EventLog,
    fence: Arc<FrameFence>,
    failures: Arc<Mutex<Failures>>,
    buffer_count: u32,
    epoch: u32,
    outstanding: u32,
}

impl SwapChain for MockSwapChain {
    type Buffer = MockBuffer;

    fn get_buffer(&mut self, index: u32) -> Result<MockBuffer> {
        self.log.lock().push(Event::GetBuffer(index));
        if self.failures.lock().get_buffer == Some(index) {
            anyhow::bail!("buffer {} rejected", index);
        }
        assert!(index < self.buffer_count, "buffer {} out of range", index);
        self.outstanding += 1;
        Ok(MockBuffer {
            index,
            epoch: self.epoch,
        })
    }

    fn release_buffer(&mut self, buffer: MockBuffer) {
        self.outstanding -= 1;
        self.log.lock().push(Event::ReleaseBuffer {
            buffer,
            completed: self.fence.completed_value(),
        });
    }

    fn resize_buffers(&mut self, desc: &SwapChainDesc) -> Result<()> {
        self.log.lock().push(Event::ResizeBuffers(*desc));
        assert_eq!(self.outstanding, 0, "resize with buffers still held");
        if self.failures.lock().resize {
            anyhow::bail!("resize rejected");
        }
        self.epoch += 1;
        Ok(())
    }

    fn set_full_screen_state(&mut self, full_screen: bool) -> Result<()> {
        self.log.lock().push(Event::SetFullScreen(full_screen));
        if self.failures.lock().full_screen {
            anyhow::bail!("mode switch rejected");
        }
        Ok(())
    }

    fn present(&mut self, index: u32) -> Result<()> {
        self.log.lock().push(Event::Present(index));
        if self.failures.lock().present {
            anyhow::bail!("present rejected");
        }
        Ok(())
    }
}

impl Drop for MockSwapChain {
    fn drop(&mut self) {
        self.log.lock().push(Event::ReleaseSwapChain);
    }
}

pub struct MockRegistry {
    pub log: EventLog,
    pub failures: Arc<Mutex<Failures>>,
    fence: Arc<FrameFence>,
    views: Mutex<SlotTable<(MockBuffer, ViewDesc)>>,
}

impl MockRegistry {
    /// Registry sharing the device's log, fence and failure switches.
    pub fn for_device(device: &MockDevice) -> Self {
        Self {
            log: device.log.clone(),
            failures: device.failures.clone(),
            fence: device.fence.clone(),
            views: Mutex::new(SlotTable::new()),
        }
    }

    pub fn live_views(&self) -> usize {
        self.views.lock().len()
    }

    pub fn view(&self, handle: ViewHandle) -> Option<(MockBuffer, ViewDesc)> {
        self.views.lock().get(handle).copied()
    }
}

impl ViewRegistry<MockBuffer> for MockRegistry {
    fn allocate_view(&self, buffer: &MockBuffer, desc: &ViewDesc) -> Result<ViewHandle> {
        if self.failures.lock().allocate_view {
            anyhow::bail!("view allocation rejected");
        }
        let handle = self.views.lock().insert((*buffer, *desc));
        self.log.lock().push(Event::AllocateView(handle));
        Ok(handle)
    }

    fn free_view(&self, view: ViewHandle) {
        let removed = self.views.lock().remove(view);
        assert!(removed.is_some(), "freeing unknown view {:?}", view);
        self.log.lock().push(Event::FreeView {
            view,
            completed: self.fence.completed_value(),
        });
    }
}
