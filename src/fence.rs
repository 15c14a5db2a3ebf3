// Frame completion tracking
//
// A monotonically increasing counter advanced by the GPU queue when it
// finishes submitted work. The surface waits on it before tearing down
// buffers; nothing on the present path ever blocks here.

use anyhow::Result;
use parking_lot::{Condvar, Mutex};

/// Query/wait pair over a GPU completion counter.
pub trait CompletionTracker {
    /// Highest value the queue has reported as completed.
    fn completed_value(&self) -> u64;

    /// Block the calling thread until `completed_value() >= value`.
    ///
    /// There is no timeout: a queue that never gets there is an
    /// unrecoverable fault of the environment, not something to retry.
    fn wait_for(&self, value: u64) -> Result<()>;
}

/// CPU-side completion counter, advanced explicitly with [`FrameFence::signal`].
///
/// Used by software queues and as the tracker behind the test doubles.
#[derive(Default)]
pub struct FrameFence {
    completed: Mutex<u64>,
    reached: Condvar,
}

impl FrameFence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report completion up to `value`. Values at or below the current one
    /// are ignored so the counter never goes backwards.
    pub fn signal(&self, value: u64) {
        let mut completed = self.completed.lock();
        if value > *completed {
            *completed = value;
            self.reached.notify_all();
        }
    }
}

impl CompletionTracker for FrameFence {
    fn completed_value(&self) -> u64 {
        *self.completed.lock()
    }

    fn wait_for(&self, value: u64) -> Result<()> {
        let mut completed = self.completed.lock();
        while *completed < value {
            self.reached.wait(&mut completed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn starts_at_zero_and_zero_wait_returns() {
        let fence = FrameFence::new();
        assert_eq!(fence.completed_value(), 0);
        fence.wait_for(0).unwrap();
    }

    #[test]
    fn signal_never_goes_backwards() {
        let fence = FrameFence::new();
        fence.signal(5);
        fence.signal(3);
        assert_eq!(fence.completed_value(), 5);
        fence.wait_for(4).unwrap();
    }

    #[test]
    fn wait_blocks_until_signalled_from_another_thread() {
        let fence = Arc::new(FrameFence::new());
        let gpu = {
            let fence = fence.clone();
            thread::spawn(move || {
                for value in 1..=3 {
                    thread::sleep(Duration::from_millis(10));
                    fence.signal(value);
                }
            })
        };

        fence.wait_for(3).unwrap();
        assert!(fence.completed_value() >= 3);
        gpu.join().unwrap();
    }
}
