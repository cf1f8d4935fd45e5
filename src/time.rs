use instant::Instant;

/// Frame delta and frame counter driving post effects and cache aging.
#[derive(Debug, Clone)]
pub struct FrameClock {
    last: Instant,
    delta: f32,
    frame: u64,
}

impl FrameClock {
    /// Deltas above this are clamped so a stalled frame doesn't explode animations.
    pub const MAX_DELTA: f32 = 0.25;

    pub fn new() -> Self {
        Self {
            last: Instant::now(),
            delta: 0.0,
            frame: 0,
        }
    }

    /// Advances one frame and returns the clamped delta in seconds.
    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        self.delta = now
            .duration_since(self.last)
            .as_secs_f32()
            .min(Self::MAX_DELTA);
        self.last = now;
        self.frame += 1;
        self.delta
    }

    pub fn delta(&self) -> f32 {
        self.delta
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}
