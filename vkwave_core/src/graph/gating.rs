/// Decides whether a group submits this frame. Kept as a pure function of
/// elapsed time so it can be unit-tested without a GPU.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GatingMode {
    Always,
    DisplayOnly,
    WallClock { hz: f64 },
}

impl Default for GatingMode {
    fn default() -> Self {
        GatingMode::Always
    }
}

impl GatingMode {
    /// `elapsed` and `last_run_time` are wall-clock seconds since the
    /// render graph started. `is_vsync` reflects the swapchain's present
    /// mode (FIFO / FIFO_RELAXED).
    pub fn should_submit(self, elapsed: f64, last_run_time: f64, is_vsync: bool) -> bool {
        match self {
            GatingMode::Always => true,
            GatingMode::DisplayOnly => is_vsync,
            GatingMode::WallClock { hz } => elapsed - last_run_time >= 1.0 / hz,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_always_submits() {
        assert!(GatingMode::Always.should_submit(0.0, 0.0, false));
        assert!(GatingMode::Always.should_submit(1000.0, 999.9, true));
    }

    #[test]
    fn display_only_tracks_vsync() {
        assert!(GatingMode::DisplayOnly.should_submit(1.0, 0.0, true));
        assert!(!GatingMode::DisplayOnly.should_submit(1.0, 0.0, false));
    }

    #[test]
    fn wall_clock_gates_by_interval() {
        let gate = GatingMode::WallClock { hz: 60.0 };
        assert!(!gate.should_submit(1.0 / 120.0, 0.0, false));
        assert!(gate.should_submit(1.0 / 60.0, 0.0, false));
        assert!(gate.should_submit(1.0, 1.0 - 1.0 / 60.0, false));
    }

    #[test]
    fn wall_clock_submission_count_bounds() {
        let gate = GatingMode::WallClock { hz: 60.0 };
        let total_seconds = 2.0;
        let frame_dt = 1.0 / 1000.0;

        let mut last_run = 0.0;
        let mut elapsed = 0.0;
        let mut submissions = 0u32;
        while elapsed < total_seconds {
            if gate.should_submit(elapsed, last_run, false) {
                last_run = elapsed;
                submissions += 1;
            }
            elapsed += frame_dt;
        }

        let expected = (total_seconds * 60.0) as u32;
        assert!(submissions >= expected.saturating_sub(1));
        assert!(submissions <= expected + 1);
    }
}
