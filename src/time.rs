use std::time::{Duration, Instant};

/// Frame clock measuring the time elapsed between consecutive frames.
pub struct FrameClock {
    last: Instant,
    pub delta: Duration,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(now: Instant) -> Self {
        Self { last: now, delta: Duration::ZERO }
    }

    pub fn tick(&mut self) {
        self.advance_to(Instant::now());
    }

    /// Instants earlier than the previous tick yield a zero delta.
    pub fn advance_to(&mut self, now: Instant) {
        self.delta = now.saturating_duration_since(self.last);
        if now > self.last {
            self.last = now;
        }
    }

    pub fn delta_seconds(&self) -> f32 {
        self.delta.as_secs_f32()
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_measures_time_between_ticks() {
        let start = Instant::now();
        let mut clock = FrameClock::starting_at(start);
        clock.advance_to(start + Duration::from_millis(16));
        assert!((clock.delta_seconds() - 0.016).abs() < 1e-6);
        clock.advance_to(start + Duration::from_millis(48));
        assert!((clock.delta_seconds() - 0.032).abs() < 1e-6);
        clock.advance_to(start);
        assert_eq!(clock.delta_seconds(), 0.0);
    }

    #[test]
    fn first_frame_has_zero_delta() {
        let clock = FrameClock::new();
        assert_eq!(clock.delta_seconds(), 0.0);
    }
}
