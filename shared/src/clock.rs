use std::time::Instant;

/// Monotonic millisecond clock measured from its creation.
///
/// The server starts one at boot; its readings stamp every outgoing packet
/// and the `ConnectResponse` handed to new players. Clones share the origin.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    start: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Wraps after ~49 days, which is fine for timestamps compared pairwise.
    pub fn elapsed_ms(&self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_clock_advances() {
        let clock = Clock::new();
        let first = clock.elapsed_ms();
        std::thread::sleep(Duration::from_millis(5));
        assert!(clock.elapsed_ms() >= first + 4);
    }

    #[test]
    fn test_copies_share_origin() {
        let clock = Clock::new();
        std::thread::sleep(Duration::from_millis(3));
        let copy = clock;
        assert!(copy.elapsed_ms() >= 2);
    }
}
