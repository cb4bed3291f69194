/// Integral noise reduction. Steady-state gain is `1 / (1 - NOISE_REDUCTION)`.
pub const NOISE_REDUCTION: f32 = 0.77;
/// Frame rate the gravity constant was tuned at.
pub const GRAVITY_REFERENCE_FPS: f32 = 60.0;
/// Fall velocity added per falling frame.
pub const FALL_STEP: f32 = 0.028;

/// Per-bar IIR integral smoothing followed by gravity fall-off.
#[derive(Debug, Clone)]
pub struct BarSmoother {
    gravity_mod: f32,
    mem: Vec<f32>,
    peak: Vec<f32>,
    fall: Vec<f32>,
    prev_out: Vec<f32>,
}

impl BarSmoother {
    pub fn new(bar_count: usize, frame_rate: f32) -> Self {
        Self {
            gravity_mod: gravity_mod(frame_rate),
            mem: vec![0.0; bar_count],
            peak: vec![0.0; bar_count],
            fall: vec![0.0; bar_count],
            prev_out: vec![0.0; bar_count],
        }
    }

    /// Feeds one raw value for `bar` and returns the unclamped output.
    pub fn step(&mut self, bar: usize, raw: f32) -> f32 {
        // Memory keeps the unclamped sum; clamping here would strip the
        // inertia the sensitivity loop relies on.
        let mut mem = self.mem[bar] * NOISE_REDUCTION + raw;
        // Subnormals never decay to zero under the multiply; flush them so
        // silence settles at exactly 0.
        if mem < f32::MIN_POSITIVE {
            mem = 0.0;
        }
        self.mem[bar] = mem;

        let mut val = mem;
        if val >= self.prev_out[bar] {
            self.peak[bar] = val;
            self.fall[bar] = 0.0;
        } else {
            let fall = self.fall[bar];
            val = (self.peak[bar] * (1.0 - fall * fall * self.gravity_mod)).max(0.0);
            self.fall[bar] = fall + FALL_STEP;
        }
        self.prev_out[bar] = mem;
        val
    }

    /// Accumulated value of `bar` as of the last `step`.
    pub fn accumulated(&self, bar: usize) -> f32 {
        self.mem[bar]
    }

    #[cfg(test)]
    pub(crate) fn gravity(&self) -> f32 {
        self.gravity_mod
    }
}

/// Scales gravity so a bar takes the same wall-clock time to fall at any
/// frame rate. Never below 1.
fn gravity_mod(frame_rate: f32) -> f32 {
    let rate = frame_rate.max(1.0);
    ((GRAVITY_REFERENCE_FPS / rate).powf(2.5) / (1.0 - NOISE_REDUCTION)).max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrates_toward_steady_state_gain() {
        let mut s = BarSmoother::new(1, 60.0);
        let mut out = 0.0;
        for _ in 0..200 {
            out = s.step(0, 0.1);
        }
        let expected = 0.1 / (1.0 - NOISE_REDUCTION);
        assert!((out - expected).abs() < 1e-4, "{out} vs {expected}");
    }

    #[test]
    fn falls_with_acceleration_then_reaches_zero() {
        let mut s = BarSmoother::new(1, 60.0);
        for _ in 0..50 {
            s.step(0, 0.2);
        }
        let top = s.step(0, 0.2);

        // First falling frame holds the peak.
        assert_eq!(s.step(0, 0.0), top);

        let mut prev = top;
        let mut prev_drop = 0.0;
        let mut frames = 0;
        loop {
            let v = s.step(0, 0.0);
            frames += 1;
            assert!(v <= prev);
            let drop = prev - v;
            if v > 0.0 {
                assert!(drop >= prev_drop);
            }
            prev_drop = drop;
            prev = v;
            if v == 0.0 {
                break;
            }
            assert!(frames < 100, "never reached zero");
        }
    }

    #[test]
    fn gravity_is_normalized_to_frame_rate() {
        let at_60 = BarSmoother::new(1, 60.0).gravity();
        let at_30 = BarSmoother::new(1, 30.0).gravity();
        assert!((at_60 - 1.0 / (1.0 - NOISE_REDUCTION)).abs() < 1e-4);
        assert!((at_30 / at_60 - 2.0f32.powf(2.5)).abs() < 1e-3);
        assert_eq!(BarSmoother::new(1, 10_000.0).gravity(), 1.0);
    }

    #[test]
    fn rising_input_resets_fall() {
        let mut s = BarSmoother::new(2, 60.0);
        s.step(0, 1.0);
        s.step(0, 0.0);
        s.step(0, 0.0);
        let v = s.step(0, 5.0);
        assert!(v > 1.0);
        // Other bars are untouched.
        assert_eq!(s.step(1, 0.0), 0.0);
    }
}
