//! Stand-ins for the QP backend and the gait event consumer.

use nalgebra::DVector;
use poise_balance::{
    GaitEvent, GaitEventListener, LimbId, QpProblem, QpSolver, SolveError, SolveStats,
};

// ---------------------------------------------------------------------------
// FailingSolver
// ---------------------------------------------------------------------------

/// A solver that never converges.
#[derive(Clone, Debug, Default)]
pub struct FailingSolver {
    pub calls: usize,
}

impl QpSolver for FailingSolver {
    fn solve(&mut self, _problem: &QpProblem, _x: &mut DVector<f64>) -> Result<SolveStats, SolveError> {
        self.calls += 1;
        Err(SolveError::NotConverged("iteration budget exhausted".into()))
    }
}

// ---------------------------------------------------------------------------
// RecordingListener
// ---------------------------------------------------------------------------

/// Keeps every gait event in arrival order.
#[derive(Clone, Debug, Default)]
pub struct RecordingListener {
    pub events: Vec<GaitEvent>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lift_offs(&self, limb: LimbId) -> Vec<f64> {
        self.events
            .iter()
            .filter_map(|e| match *e {
                GaitEvent::LiftOff { limb: l, time, .. } if l == limb => Some(time),
                _ => None,
            })
            .collect()
    }

    pub fn touch_downs(&self, limb: LimbId) -> Vec<f64> {
        self.events
            .iter()
            .filter_map(|e| match *e {
                GaitEvent::TouchDown { limb: l, time, .. } if l == limb => Some(time),
                _ => None,
            })
            .collect()
    }
}

impl GaitEventListener for RecordingListener {
    fn on_event(&mut self, event: GaitEvent) {
        self.events.push(event);
    }
}
