//! Sustained-verdict tracking.

/// Counts consecutive healthy verdicts.
///
/// Verification demands sustained health, not one lucky observation: the
/// window is satisfied only after `required` healthy verdicts in a row,
/// and any unhealthy verdict starts the count over.
#[derive(Debug)]
pub struct VerdictWindow {
    required: u32,
    streak: u32,
}

impl VerdictWindow {
    pub fn new(required: u32) -> Self {
        Self {
            // A zero requirement would declare success before the first
            // observation.
            required: required.max(1),
            streak: 0,
        }
    }

    /// Record one verdict. Returns true once the streak is satisfied.
    pub fn record(&mut self, healthy: bool) -> bool {
        if healthy {
            self.streak += 1;
        } else {
            self.streak = 0;
        }
        self.streak >= self.required
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }

    pub fn reset(&mut self) {
        self.streak = 0;
    }
}
