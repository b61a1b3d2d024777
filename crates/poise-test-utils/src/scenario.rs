//! Robot fixtures and a linear inverted pendulum plant for closed-loop tests.

use nalgebra::{Vector2, Vector3};
use poise_balance::{BalanceConfig, CaptureState, FootMeasurement, LimbId, LimbSide};

use crate::kinematics::PlanarLeg;

pub const LEG_LENGTH: f64 = 0.6;
pub const COM_HEIGHT: f64 = 0.8;

/// One planar leg under the CoM.
pub fn single_leg(mass: f64, lean: f64) -> (BalanceConfig, PlanarLeg) {
    let leg = PlanarLeg::new(LimbId(0), LimbSide::Left, Vector2::zeros(), LEG_LENGTH, lean);
    let config = BalanceConfig {
        mass,
        limbs: vec![leg.limb_config()],
        ..BalanceConfig::default()
    };
    (config, leg)
}

/// Two planar legs `stance_width` apart, left leg at +y.
pub fn biped(mass: f64, stance_width: f64) -> (BalanceConfig, [PlanarLeg; 2]) {
    let half = 0.5 * stance_width;
    let legs = [
        PlanarLeg::new(LimbId(0), LimbSide::Left, Vector2::new(0.0, half), LEG_LENGTH, 0.05),
        PlanarLeg::new(LimbId(1), LimbSide::Right, Vector2::new(0.0, -half), LEG_LENGTH, 0.05),
    ];
    let config = BalanceConfig {
        mass,
        limbs: legs.iter().map(PlanarLeg::limb_config).collect(),
        ..BalanceConfig::default()
    };
    (config, legs)
}

/// Foot measurements matching each leg's nominal foot.
pub fn feet_at_rest(legs: &[PlanarLeg]) -> Vec<FootMeasurement> {
    legs.iter()
        .map(|leg| FootMeasurement {
            limb: leg.limb,
            position: leg.foot,
            yaw: 0.0,
            contact_force: None,
        })
        .collect()
}

/// Tick `k` of a clock with period `dt`.
///
/// Multiplying instead of accumulating keeps tick times free of drift.
pub fn tick_time(k: usize, dt: f64) -> f64 {
    k as f64 * dt
}

/// Linear inverted pendulum: `ẍ = ω² (x − cmp)` at constant height.
#[derive(Clone, Debug, PartialEq)]
pub struct LipmPlant {
    pub com: Vector2<f64>,
    pub velocity: Vector2<f64>,
    pub height: f64,
    pub gravity: f64,
}

impl LipmPlant {
    pub fn new(com: Vector2<f64>, height: f64, gravity: f64) -> Self {
        Self {
            com,
            velocity: Vector2::zeros(),
            height,
            gravity,
        }
    }

    pub fn omega(&self) -> f64 {
        (self.gravity / self.height).sqrt()
    }

    pub fn capture(&self) -> CaptureState {
        CaptureState {
            com_position: Vector3::new(self.com.x, self.com.y, self.height),
            com_velocity: Vector3::new(self.velocity.x, self.velocity.y, 0.0),
            omega: self.omega(),
        }
    }

    pub fn icp(&self) -> Vector2<f64> {
        self.com + self.velocity / self.omega()
    }

    /// Semi-implicit Euler step under the commanded CMP.
    pub fn step(&mut self, cmp: &Vector2<f64>, dt: f64) {
        let w2 = self.gravity / self.height;
        self.velocity += (self.com - cmp) * (w2 * dt);
        self.com += self.velocity * dt;
    }

    pub fn push(&mut self, delta_velocity: &Vector2<f64>) {
        self.velocity += delta_velocity;
    }
}
