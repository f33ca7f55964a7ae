//! Physics engine seam.
//!
//! The environment only ever talks to the simulated robot through
//! [`Mechanism`]. [`RapierMechanism`](crate::physics::RapierMechanism) is the
//! shipped backend; tests drive the environment with scripted mechanisms.

use nalgebra::{DVector, Matrix3, Vector3};

/// How the engine turns targets into joint torques.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlMode {
    /// PD tracking of position/velocity targets plus a feed-forward torque.
    PdPlusFeedforwardTorque,
}

/// One active contact as seen from one body of the mechanism.
#[derive(Clone, Debug, PartialEq)]
pub struct Contact {
    /// Index of the contacting body within the mechanism.
    pub local_body_index: usize,
    /// Rows are the contact axes in world coordinates; the third row is the
    /// contact normal pointing into the local body.
    pub frame: Matrix3<f64>,
    /// Impulse on the local body in contact-frame coordinates.
    pub impulse: Vector3<f64>,
    /// Set on the duplicate record of an internal (self) contact.
    pub skip: bool,
}

impl Contact {
    pub fn world_impulse(&self) -> Vector3<f64> {
        self.frame.transpose() * self.impulse
    }
}

/// Generalized coordinates and velocities of a floating-base mechanism.
///
/// `gc = [x, y, z, qw, qx, qy, qz, joints..]`,
/// `gv = [vx, vy, vz, wx, wy, wz, joint rates..]`, base velocities in world frame.
#[derive(Clone, Debug, PartialEq)]
pub struct GeneralizedState {
    pub gc: DVector<f64>,
    pub gv: DVector<f64>,
}

pub trait Mechanism {
    /// Length of the generalized coordinate (7 + joints).
    fn generalized_coordinate_dim(&self) -> usize;

    /// Degrees of freedom, the length of the generalized velocity (6 + joints).
    fn dof(&self) -> usize;

    fn set_control_mode(&mut self, mode: ControlMode);

    /// Gains over the generalized velocity space; base entries are ignored.
    fn set_pd_gains(&mut self, p_gains: &DVector<f64>, d_gains: &DVector<f64>);

    fn set_pd_target(&mut self, position: &DVector<f64>, velocity: &DVector<f64>);

    fn set_state(&mut self, gc: &DVector<f64>, gv: &DVector<f64>);

    fn state(&self) -> GeneralizedState;

    /// Actuation force applied during the last integration step.
    fn generalized_force(&self) -> DVector<f64>;

    /// Contacts active after the last integration step.
    fn contacts(&self) -> &[Contact];

    fn body_index(&self, name: &str) -> Option<usize>;

    /// Advance the simulation by one fine step.
    fn integrate(&mut self);
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_impulse_uses_frame_transpose() {
        // Contact normal along world +x: rows are (y, z, x).
        let frame = Matrix3::new(
            0.0, 1.0, 0.0, //
            0.0, 0.0, 1.0, //
            1.0, 0.0, 0.0,
        );
        let contact = Contact {
            local_body_index: 0,
            frame,
            impulse: Vector3::new(0.0, 0.0, 2.0),
            skip: false,
        };
        assert_eq!(contact.world_impulse(), Vector3::new(2.0, 0.0, 0.0));
    }
}
