pub const SENS_INITIAL: f32 = 1.0;
pub const SENS_MIN: f32 = 0.01;
pub const SENS_MAX: f32 = 200.0;
/// Fast ramp stops once sensitivity climbs past this.
pub const SENS_INIT_CAP: f32 = 50.0;

const ATTACK: f32 = 0.98;
const RELEASE: f32 = 1.001;
const RAMP_BOOST: f32 = 1.1;

/// Peak input amplitude below which a frame counts as silence.
pub const SILENCE_THRESHOLD: f32 = 1e-4;

/// Global adaptive gain: drops quickly on overshoot, climbs slowly otherwise.
#[derive(Debug, Clone, Copy)]
pub struct AutoSensitivity {
    sens: f32,
    fast_ramp: bool,
}

impl Default for AutoSensitivity {
    fn default() -> Self {
        Self { sens: SENS_INITIAL, fast_ramp: true }
    }
}

impl AutoSensitivity {
    pub fn value(&self) -> f32 {
        self.sens
    }

    #[cfg(test)]
    pub fn is_ramping(&self) -> bool {
        self.fast_ramp
    }

    pub fn update(&mut self, overshoot: bool, silent: bool) {
        if overshoot {
            self.sens *= ATTACK;
            self.fast_ramp = false;
        } else if !silent {
            self.sens *= RELEASE;
            if self.fast_ramp {
                self.sens *= RAMP_BOOST;
                if self.sens > SENS_INIT_CAP {
                    self.fast_ramp = false;
                }
            }
        }
        self.sens = self.sens.clamp(SENS_MIN, SENS_MAX);
    }
}
