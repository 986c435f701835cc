use {std::time::Duration, tokio::time::Instant};

///
/// Monotonic time source used to measure how long an acquisition round took.
///
pub trait Clock: Send + Sync {
    ///
    /// Time elapsed since an arbitrary, fixed origin. Must never go backward.
    ///
    fn now(&self) -> Duration;
}

///
/// [`Clock`] backed by [`tokio::time::Instant`], so it follows paused time in tests.
///
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}
