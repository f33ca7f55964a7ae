//! Per-foot ground reaction accounting.
//!
//! Each step the vertical contact impulse on every foot is accumulated, then
//! the 4-vector is normalized and its entropy taken as a measure of how evenly
//! load is spread across the feet, independent of its magnitude.

use std::f64::consts::LN_2;

use crate::mechanism::Contact;

pub const FOOT_COUNT: usize = 4;

/// Entropy of the uniform distribution over the feet, `ln 4`.
pub const MAX_ENTROPY: f64 = 2.0 * LN_2;

const ENTROPY_EPSILON: f64 = 1e-6;

#[derive(Clone, Debug)]
pub struct ContactImpulseAggregator {
    foot_bodies: [usize; FOOT_COUNT],
    impulse: [f64; FOOT_COUNT],
    entropy: f64,
}

impl ContactImpulseAggregator {
    pub fn new(foot_bodies: [usize; FOOT_COUNT]) -> Self {
        Self {
            foot_bodies,
            impulse: [0.0; FOOT_COUNT],
            entropy: MAX_ENTROPY,
        }
    }

    pub fn foot_bodies(&self) -> &[usize; FOOT_COUNT] {
        &self.foot_bodies
    }

    /// Vertical impulse per foot from the last [`update`](Self::update).
    pub fn impulse(&self) -> [f64; FOOT_COUNT] {
        self.impulse
    }

    pub fn entropy(&self) -> f64 {
        self.entropy
    }

    /// Accumulate the feet's vertical impulses, then compute entropy once.
    pub fn update(&mut self, contacts: &[Contact]) -> f64 {
        self.impulse = [0.0; FOOT_COUNT];

        for contact in contacts.iter().filter(|c| !c.skip) {
            let Some(foot) = self
                .foot_bodies
                .iter()
                .position(|&body| body == contact.local_body_index)
            else {
                continue;
            };
            // The ground only pushes; a negative vertical component is solver noise.
            self.impulse[foot] += contact.world_impulse().z.max(0.0);
        }

        self.entropy = grf_entropy(&self.impulse);
        self.entropy
    }
}

/// `-Σ p ln p` over `p = f / ‖f‖ + 1e-6`, or `ln 4` when no foot bears load.
pub fn grf_entropy(impulse: &[f64; FOOT_COUNT]) -> f64 {
    let norm = impulse.iter().map(|f| f * f).sum::<f64>().sqrt();
    if !norm.is_finite() || norm <= f64::EPSILON {
        return MAX_ENTROPY;
    }

    let entropy: f64 = impulse
        .iter()
        .map(|f| {
            let p = f.max(0.0) / norm + ENTROPY_EPSILON;
            -p * p.ln()
        })
        .sum();

    entropy.clamp(0.0, MAX_ENTROPY)
}
