//! Presentation timestamps for fixed-frame-size codecs.

/// Session-scoped frame counter that turns produced output units into
/// presentation timestamps.
///
/// `time_per_frame_us = 1_000_000 / sample_rate * samples_per_frame`, with
/// integer division performed first, so every unit advances the clock by
/// exactly the same amount.
#[derive(Debug, Clone)]
pub struct PresentationClock {
    sample_rate: u32,
    samples_per_frame: u32,
    frame_count: u64,
}

impl PresentationClock {
    pub fn new(sample_rate: u32, samples_per_frame: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            samples_per_frame,
            frame_count: 0,
        }
    }

    pub fn time_per_frame_us(&self) -> u64 {
        (1_000_000 / self.sample_rate as u64) * self.samples_per_frame as u64
    }

    /// Timestamp of the next unit to be produced.
    pub fn presentation_time_us(&self) -> u64 {
        self.frame_count * self.time_per_frame_us()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub(crate) fn advance(&mut self) {
        self.frame_count += 1;
    }

    pub(crate) fn reset(&mut self) {
        self.frame_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aac_44k1_step() {
        let mut clock = PresentationClock::new(44100, 1024);
        // 1_000_000 / 44100 = 22, truncated before scaling
        assert_eq!(clock.time_per_frame_us(), 22 * 1024);
        assert_eq!(clock.presentation_time_us(), 0);
        clock.advance();
        clock.advance();
        assert_eq!(clock.presentation_time_us(), 2 * 22 * 1024);
        clock.reset();
        assert_eq!(clock.frame_count(), 0);
    }
}
