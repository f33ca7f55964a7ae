use serde::Serialize;

use crate::config::RewardConfig;

/// Weighted reward terms of one step, in logging order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct RewardBreakdown {
    pub torque: f64,
    #[serde(rename = "forwardVel_difference")]
    pub forward_vel_difference: f64,
    #[serde(rename = "GRF_entropy")]
    pub grf_entropy: f64,
}

impl RewardBreakdown {
    pub const NAMES: [&'static str; 3] = ["torque", "forwardVel_difference", "GRF_entropy"];

    pub fn sum(&self) -> f64 {
        self.torque + self.forward_vel_difference + self.grf_entropy
    }

    pub fn to_array(&self) -> [f64; 3] {
        [self.torque, self.forward_vel_difference, self.grf_entropy]
    }

    pub fn named(&self) -> [(&'static str, f64); 3] {
        let values = self.to_array();
        [
            (Self::NAMES[0], values[0]),
            (Self::NAMES[1], values[1]),
            (Self::NAMES[2], values[2]),
        ]
    }
}

/// Combines torque cost, forward-velocity tracking and foot-load entropy.
#[derive(Clone, Debug)]
pub struct RewardComposer {
    weights: RewardConfig,
    desired_velocity: f64,
    last: RewardBreakdown,
}

impl RewardComposer {
    pub fn new(weights: RewardConfig, desired_velocity: f64) -> Self {
        if weights.torque.coeff < 0.0 {
            log::warn!(
                "Torque coefficient {} is negative; the torque term already carries its sign, so effort will be rewarded",
                weights.torque.coeff
            );
        }
        Self {
            weights,
            desired_velocity,
            last: RewardBreakdown::default(),
        }
    }

    pub fn desired_velocity(&self) -> f64 {
        self.desired_velocity
    }

    /// Score one step. `torque_sq_norm` is `‖τ‖²`, `forward_vel` the body-frame
    /// x velocity, `entropy` the foot-load entropy.
    pub fn compose(&mut self, torque_sq_norm: f64, forward_vel: f64, entropy: f64) -> f64 {
        let velocity_tracking = (-(forward_vel - self.desired_velocity).abs()).exp();

        self.last = RewardBreakdown {
            torque: self.weights.torque.coeff * -torque_sq_norm,
            forward_vel_difference: self.weights.forward_vel_difference.coeff * velocity_tracking,
            grf_entropy: self.weights.grf_entropy.coeff * entropy,
        };
        self.last.sum()
    }

    pub fn breakdown(&self) -> RewardBreakdown {
        self.last
    }
}
