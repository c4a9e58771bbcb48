use parking_lot::Mutex;

/// Consecutive write-failure count shared between the audio callback
/// (which increments and resets it) and the owning thread (which reads and
/// resets it between recording passes).
#[derive(Debug, Default)]
pub struct WriteFailureCounter {
    consecutive: Mutex<u32>,
}

impl WriteFailureCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one failed write and return the new streak length.
    pub fn record_failure(&self) -> u32 {
        let mut count = self.consecutive.lock();
        *count = count.saturating_add(1);
        *count
    }

    /// A successful write ends the streak.
    pub fn reset(&self) {
        *self.consecutive.lock() = 0;
    }

    pub fn count(&self) -> u32 {
        *self.consecutive.lock()
    }
}
