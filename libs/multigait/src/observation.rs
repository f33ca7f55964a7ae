use nalgebra::{DVector, Matrix3, Quaternion, UnitQuaternion, Vector3};

use crate::contact::{ContactImpulseAggregator, FOOT_COUNT};
use crate::mechanism::{Contact, GeneralizedState, Mechanism};

/// Observation length for a floating base with `joints` actuated joints:
/// height (1), up vector in body axes (3), joint angles, body linear
/// velocity (3), body angular velocity (3), joint velocities.
pub const fn observation_dim(joints: usize) -> usize {
    1 + 3 + joints + 3 + 3 + joints
}

/// Rotation matrix of the base, renormalizing the quaternion.
///
/// A zero or non-finite quaternion has no orientation; identity is used and
/// a warning logged so NaN never reaches the observation.
pub fn base_rotation(gc: &DVector<f64>) -> Matrix3<f64> {
    let q = Quaternion::new(gc[3], gc[4], gc[5], gc[6]);
    let norm = q.norm();
    if !norm.is_finite() || norm < 1e-9 {
        log::warn!("Degenerate base quaternion {:?}, using identity", q.coords);
        return Matrix3::identity();
    }
    UnitQuaternion::from_quaternion(q)
        .to_rotation_matrix()
        .into_inner()
}

/// Builds the policy observation from post-step physical state and keeps the
/// per-foot contact accounting in sync with it.
#[derive(Clone, Debug)]
pub struct ObservationBuilder {
    joints: usize,
    buffer: DVector<f64>,
    body_linear_vel: Vector3<f64>,
    body_angular_vel: Vector3<f64>,
    contacts: ContactImpulseAggregator,
}

impl ObservationBuilder {
    pub fn new(joints: usize, foot_bodies: [usize; FOOT_COUNT]) -> Self {
        Self {
            joints,
            buffer: DVector::zeros(observation_dim(joints)),
            body_linear_vel: Vector3::zeros(),
            body_angular_vel: Vector3::zeros(),
            contacts: ContactImpulseAggregator::new(foot_bodies),
        }
    }

    pub fn dim(&self) -> usize {
        self.buffer.len()
    }

    pub fn observation(&self) -> &DVector<f64> {
        &self.buffer
    }

    pub fn body_linear_vel(&self) -> &Vector3<f64> {
        &self.body_linear_vel
    }

    pub fn body_angular_vel(&self) -> &Vector3<f64> {
        &self.body_angular_vel
    }

    pub fn contacts(&self) -> &ContactImpulseAggregator {
        &self.contacts
    }

    /// Read the mechanism, rebuild the observation and refresh foot impulses.
    /// Returns the state that was read.
    pub fn update<M: Mechanism>(&mut self, mechanism: &M) -> GeneralizedState {
        let state = mechanism.state();
        self.refresh(&state, mechanism.contacts());
        state
    }

    /// Rebuild from an already-read state and its contacts.
    pub fn refresh(&mut self, state: &GeneralizedState, contacts: &[Contact]) {
        self.fill(state);
        self.contacts.update(contacts);
    }

    fn fill(&mut self, state: &GeneralizedState) {
        let GeneralizedState { gc, gv } = state;
        let n = self.joints;

        let rot = base_rotation(gc);
        self.body_linear_vel = rot.transpose() * gv.fixed_rows::<3>(0);
        self.body_angular_vel = rot.transpose() * gv.fixed_rows::<3>(3);

        let ob = &mut self.buffer;
        ob[0] = gc[2];
        ob.fixed_rows_mut::<3>(1).copy_from(&rot.row(2).transpose());
        ob.rows_mut(4, n).copy_from(&gc.rows(gc.len() - n, n));
        ob.fixed_rows_mut::<3>(4 + n).copy_from(&self.body_linear_vel);
        ob.fixed_rows_mut::<3>(7 + n).copy_from(&self.body_angular_vel);
        ob.rows_mut(10 + n, n).copy_from(&gv.rows(gv.len() - n, n));
    }
}
