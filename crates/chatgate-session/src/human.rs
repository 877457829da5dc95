//! Human-like slider drag trajectories.
//!
//! The slider checks reject instantaneous jumps: the server scores the
//! mouse-move trail. A drag is therefore split into ~20 sub-steps spread
//! over a randomized 400–900 ms window, each step perturbed by a small
//! coordinate offset.

use std::time::Duration;

use rand::Rng;

const MIN_STEPS: usize = 18;
const MAX_STEPS: usize = 24;
const MIN_TOTAL_MS: u64 = 400;
const MAX_TOTAL_MS: u64 = 900;
const JITTER_PX: f64 = 2.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragStep {
    pub x: f64,
    pub y: f64,
    pub pause: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DragPlan {
    pub from: (f64, f64),
    pub steps: Vec<DragStep>,
}

impl DragPlan {
    pub fn total_duration(&self) -> Duration {
        self.steps.iter().map(|step| step.pause).sum()
    }

    pub fn end(&self) -> (f64, f64) {
        self.steps
            .last()
            .map(|step| (step.x, step.y))
            .unwrap_or(self.from)
    }
}

pub fn plan_drag(from: (f64, f64), to: (f64, f64)) -> DragPlan {
    let mut rng = rand::rng();
    let steps = rng.random_range(MIN_STEPS..=MAX_STEPS);
    let total_ms = rng.random_range(MIN_TOTAL_MS..=MAX_TOTAL_MS);
    let step_ms = total_ms as f64 / steps as f64;

    let mut out = Vec::with_capacity(steps);
    for i in 1..=steps {
        let progress = ease(i as f64 / steps as f64);
        let jitter_x = rng.random_range(-JITTER_PX..=JITTER_PX);
        let jitter_y = rng.random_range(-JITTER_PX..=JITTER_PX);
        let last = i == steps;
        out.push(DragStep {
            // The release point must land exactly on the target.
            x: if last {
                to.0
            } else {
                from.0 + (to.0 - from.0) * progress + jitter_x
            },
            y: if last {
                to.1
            } else {
                from.1 + (to.1 - from.1) * progress + jitter_y
            },
            pause: Duration::from_millis((step_ms * pause_scale(&mut rng)) as u64),
        });
    }
    DragPlan { from, steps: out }
}

/// Slow start, fast middle, slow finish.
fn ease(t: f64) -> f64 {
    t * t * (3.0 - 2.0 * t)
}

fn pause_scale(rng: &mut impl Rng) -> f64 {
    rng.random_range(0.6..=1.4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_ends_exactly_on_target() {
        for _ in 0..50 {
            let plan = plan_drag((10.0, 100.0), (250.0, 102.0));
            assert_eq!(plan.end(), (250.0, 102.0));
        }
    }

    #[test]
    fn step_count_is_in_the_human_band() {
        for _ in 0..50 {
            let plan = plan_drag((0.0, 0.0), (200.0, 0.0));
            assert!((MIN_STEPS..=MAX_STEPS).contains(&plan.steps.len()));
        }
    }

    #[test]
    fn total_duration_stays_in_window() {
        for _ in 0..50 {
            let plan = plan_drag((0.0, 0.0), (200.0, 0.0));
            let ms = plan.total_duration().as_millis() as u64;
            // Per-step randomization widens the band slightly.
            assert!(ms >= MIN_TOTAL_MS / 2, "drag too fast: {ms}ms");
            assert!(ms <= MAX_TOTAL_MS * 3 / 2, "drag too slow: {ms}ms");
        }
    }

    #[test]
    fn trajectory_progresses_monotonically_within_jitter() {
        let plan = plan_drag((0.0, 0.0), (300.0, 0.0));
        let mut previous = 0.0;
        for step in &plan.steps {
            assert!(step.x >= previous - 2.0 * JITTER_PX);
            previous = step.x;
        }
    }
}
