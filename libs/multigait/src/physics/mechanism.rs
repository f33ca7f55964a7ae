use std::collections::HashMap;
use std::f64::consts::PI;
use std::path::Path;

use nalgebra::{self as na, DVector, Matrix3, Vector3};
use rapier3d::prelude::*;

use super::{build_robot, PhysicsWorld, RobotHandles, RobotPose};
use crate::config::EnvConfig;
use crate::error::{EnvError, Result};
use crate::mechanism::{ControlMode, Contact, GeneralizedState, Mechanism};
use crate::urdf::UrdfModel;

/// Floating-base robot simulated as a rapier multibody.
///
/// Bodies are indexed in URDF link order and joints in the order of
/// [`UrdfModel::actuated_joints`]. Rapier does not hand out generalized
/// velocities for multibody links, so `gv` is the finite difference of two
/// consecutive poses.
pub struct RapierMechanism {
    model: UrdfModel,
    simulation_dt: f64,
    max_motor_force: f64,
    world: PhysicsWorld,
    robot: RobotHandles,
    body_lookup: HashMap<RigidBodyHandle, usize>,
    root: usize,
    p_gains: DVector<f64>,
    d_gains: DVector<f64>,
    position_target: DVector<f64>,
    velocity_target: DVector<f64>,
    gc: DVector<f64>,
    gv: DVector<f64>,
    force: DVector<f64>,
    contacts: Vec<Contact>,
}

impl RapierMechanism {
    pub fn new(urdf_content: &str, simulation_dt: f64, max_motor_force: f64) -> Result<Self> {
        let model = UrdfModel::parse(urdf_content)?;
        let root = model
            .root()
            .and_then(|name| model.link_index(name))
            .ok_or(EnvError::NoRootLink)?;
        let joints = model.actuated_joints().count();

        let mut gc = DVector::zeros(7 + joints);
        gc[3] = 1.0;
        let gv = DVector::zeros(6 + joints);

        let mut world = PhysicsWorld::new(simulation_dt as f32);
        let robot = build_robot(&mut world, &model, &pose_of(&gc, &gv))?;

        let mut mechanism = Self {
            model,
            simulation_dt,
            max_motor_force,
            world,
            body_lookup: HashMap::new(),
            robot,
            root,
            p_gains: DVector::zeros(6 + joints),
            d_gains: DVector::zeros(6 + joints),
            position_target: gc.clone(),
            velocity_target: gv.clone(),
            force: DVector::zeros(6 + joints),
            gc,
            gv,
            contacts: Vec::new(),
        };
        mechanism.index_bodies();
        mechanism.apply_motors();
        Ok(mechanism)
    }

    pub fn from_urdf_file(
        path: impl AsRef<Path>,
        simulation_dt: f64,
        max_motor_force: f64,
    ) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::new(&content, simulation_dt, max_motor_force)
    }

    pub fn from_config(urdf_content: &str, config: &EnvConfig) -> Result<Self> {
        Self::new(urdf_content, config.simulation_dt, config.max_motor_force)
    }

    pub fn model(&self) -> &UrdfModel {
        &self.model
    }

    fn joint_count(&self) -> usize {
        self.robot.joints.len()
    }

    fn index_bodies(&mut self) {
        self.body_lookup = self
            .robot
            .bodies
            .iter()
            .enumerate()
            .map(|(i, &handle)| (handle, i))
            .collect();
    }

    /// Clamped PD torque per joint for the current state and targets.
    fn pd_torque(&self) -> DVector<f64> {
        let mut force = DVector::zeros(6 + self.joint_count());
        for i in 0..self.joint_count() {
            let (q, dq) = (self.gc[7 + i], self.gv[6 + i]);
            let torque = self.p_gains[6 + i] * (self.position_target[7 + i] - q)
                + self.d_gains[6 + i] * (self.velocity_target[6 + i] - dq);
            force[6 + i] = torque.clamp(-self.max_motor_force, self.max_motor_force);
        }
        force
    }

    fn apply_motors(&mut self) {
        for (i, joint) in self.robot.joints.iter().enumerate() {
            let Some((multibody, link_id)) = self.world.multibody_joint_set.get_mut(joint.handle)
            else {
                continue;
            };
            let Some(link) = multibody.link_mut(link_id) else {
                continue;
            };
            link.joint.data.set_motor_model(JointAxis::AngX, MotorModel::ForceBased);
            link.joint.data.set_motor(
                JointAxis::AngX,
                joint.coordinate(self.position_target[7 + i] as f32),
                self.velocity_target[6 + i] as f32,
                self.p_gains[6 + i] as f32,
                self.d_gains[6 + i] as f32,
            );
            link.joint
                .data
                .set_motor_max_force(JointAxis::AngX, self.max_motor_force as f32);
        }
    }

    /// Pull the generalized state out of the rigid bodies after a step.
    fn sync_state(&mut self) {
        let previous = self.gc.clone();
        let bodies = &self.world.rigid_body_set;
        let Some(base) = bodies.get(self.robot.bodies[self.root]) else {
            return;
        };

        let position = base.translation();
        let rotation = base.rotation();
        for k in 0..3 {
            self.gc[k] = position[k] as f64;
        }
        self.gc[3] = rotation.w as f64;
        self.gc[4] = rotation.i as f64;
        self.gc[5] = rotation.j as f64;
        self.gc[6] = rotation.k as f64;
        for (i, joint) in self.robot.joints.iter().enumerate() {
            self.gc[7 + i] = joint.angle(bodies) as f64;
        }

        let dt = self.simulation_dt;
        for k in 0..3 {
            self.gv[k] = (self.gc[k] - previous[k]) / dt;
        }
        let angular = (rotation_of(&self.gc) * rotation_of(&previous).inverse()).scaled_axis() / dt;
        self.gv.rows_mut(3, 3).copy_from(&angular);
        for i in 0..self.joint_count() {
            self.gv[6 + i] = wrap_angle(self.gc[7 + i] - previous[7 + i]) / dt;
        }
    }

    fn collect_contacts(&mut self) {
        self.contacts.clear();
        let colliders = &self.world.collider_set;
        let body_of = |handle: ColliderHandle| {
            colliders
                .get(handle)
                .and_then(|c| c.parent())
                .and_then(|rb| self.body_lookup.get(&rb).copied())
        };

        for pair in self.world.narrow_phase.contact_pairs() {
            if !pair.has_any_active_contact {
                continue;
            }
            let body1 = body_of(pair.collider1);
            let body2 = body_of(pair.collider2);

            for manifold in &pair.manifolds {
                // Manifold normal points from collider1 into collider2
                let normal: Vector3<f64> = manifold.data.normal.cast();
                for point in &manifold.points {
                    if point.dist > 0.0 && point.data.impulse <= 0.0 {
                        continue;
                    }
                    let impulse = Vector3::new(0.0, 0.0, point.data.impulse as f64);
                    let mut skip = false;
                    if let Some(index) = body1 {
                        self.contacts.push(Contact {
                            local_body_index: index,
                            frame: contact_frame(&-normal),
                            impulse,
                            skip,
                        });
                        skip = true;
                    }
                    if let Some(index) = body2 {
                        self.contacts.push(Contact {
                            local_body_index: index,
                            frame: contact_frame(&normal),
                            impulse,
                            skip,
                        });
                    }
                }
            }
        }
    }
}

impl Mechanism for RapierMechanism {
    fn generalized_coordinate_dim(&self) -> usize {
        7 + self.joint_count()
    }

    fn dof(&self) -> usize {
        6 + self.joint_count()
    }

    fn set_control_mode(&mut self, mode: ControlMode) {
        match mode {
            ControlMode::PdPlusFeedforwardTorque => self.apply_motors(),
        }
    }

    fn set_pd_gains(&mut self, p_gains: &DVector<f64>, d_gains: &DVector<f64>) {
        let dof = self.dof();
        self.p_gains = DVector::from_fn(dof, |i, _| p_gains.get(i).copied().unwrap_or(0.0));
        self.d_gains = DVector::from_fn(dof, |i, _| d_gains.get(i).copied().unwrap_or(0.0));
        self.apply_motors();
    }

    fn set_pd_target(&mut self, position: &DVector<f64>, velocity: &DVector<f64>) {
        self.position_target.copy_from(position);
        self.velocity_target.copy_from(velocity);
        self.apply_motors();
    }

    fn set_state(&mut self, gc: &DVector<f64>, gv: &DVector<f64>) {
        let mut gc = gc.clone();
        let rotation = rotation_of(&gc);
        gc[3] = rotation.w;
        gc[4] = rotation.i;
        gc[5] = rotation.j;
        gc[6] = rotation.k;

        if gv.rows(6, self.joint_count()).iter().any(|&v| v != 0.0) {
            log::warn!("Joint rates are not restored by set_state; starting joints at rest");
        }

        // Rebuilding drops every warm-start cache, so a reset replays exactly
        let mut world = PhysicsWorld::new(self.simulation_dt as f32);
        match build_robot(&mut world, &self.model, &pose_of(&gc, gv)) {
            Ok(robot) => {
                self.world = world;
                self.robot = robot;
            }
            Err(err) => {
                log::error!("Failed to rebuild robot: {}", err);
                return;
            }
        }
        self.index_bodies();

        self.gc = gc;
        self.gv = gv.clone();
        self.gv.rows_mut(6, self.joint_count()).fill(0.0);
        self.position_target = self.gc.clone();
        self.velocity_target = DVector::zeros(self.dof());
        self.force = DVector::zeros(self.dof());
        self.contacts.clear();
        self.apply_motors();
    }

    fn state(&self) -> GeneralizedState {
        GeneralizedState {
            gc: self.gc.clone(),
            gv: self.gv.clone(),
        }
    }

    fn generalized_force(&self) -> DVector<f64> {
        self.force.clone()
    }

    fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    fn body_index(&self, name: &str) -> Option<usize> {
        self.model.link_index(name)
    }

    fn integrate(&mut self) {
        self.force = self.pd_torque();
        self.world.step();
        self.sync_state();
        self.collect_contacts();
    }
}

/// Base orientation of `gc`; a zero quaternion falls back to identity.
fn rotation_of(gc: &DVector<f64>) -> na::UnitQuaternion<f64> {
    let q = na::Quaternion::new(gc[3], gc[4], gc[5], gc[6]);
    if q.norm() < 1e-9 {
        log::warn!("Degenerate base quaternion, using identity");
        return na::UnitQuaternion::identity();
    }
    na::UnitQuaternion::from_quaternion(q)
}

fn pose_of(gc: &DVector<f64>, gv: &DVector<f64>) -> RobotPose {
    let rotation: na::UnitQuaternion<f32> = rotation_of(gc).cast();
    RobotPose {
        root: Isometry::from_parts(
            Translation::new(gc[0] as f32, gc[1] as f32, gc[2] as f32),
            rotation,
        ),
        root_linvel: vector![gv[0] as f32, gv[1] as f32, gv[2] as f32],
        root_angvel: vector![gv[3] as f32, gv[4] as f32, gv[5] as f32],
        joint_angles: gc.rows(7, gc.len() - 7).iter().map(|&q| q as f32).collect(),
    }
}

fn wrap_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped == -PI {
        PI
    } else {
        wrapped
    }
}

/// Contact frame whose rows are two tangents and `normal`, right-handed.
pub(crate) fn contact_frame(normal: &Vector3<f64>) -> Matrix3<f64> {
    let helper = if normal.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    let t1 = normal.cross(&helper).normalize();
    let t2 = normal.cross(&t1);
    Matrix3::from_rows(&[t1.transpose(), t2.transpose(), normal.transpose()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LaikagoConfig;
    use approx::assert_relative_eq;

    const LAIKAGO: &str = include_str!("../../assets/laikago.urdf");

    fn standing() -> RapierMechanism {
        let mut mechanism =
            RapierMechanism::new(LAIKAGO, LaikagoConfig::SIMULATION_DT, LaikagoConfig::MAX_MOTOR_FORCE)
                .unwrap();
        let gc = DVector::from_vec(LaikagoConfig::nominal_pose());
        let gv = DVector::zeros(14);
        let mut p = DVector::zeros(14);
        let mut d = DVector::zeros(14);
        p.rows_mut(6, 8).fill(LaikagoConfig::P_GAIN);
        d.rows_mut(6, 8).fill(LaikagoConfig::D_GAIN);
        mechanism.set_pd_gains(&p, &d);
        mechanism.set_state(&gc, &gv);
        mechanism.set_pd_target(&gc, &gv);
        mechanism
    }

    #[test]
    fn test_dimensions_and_bodies() {
        let mechanism = standing();
        assert_eq!(mechanism.generalized_coordinate_dim(), 15);
        assert_eq!(mechanism.dof(), 14);
        assert_eq!(mechanism.body_index("trunk"), Some(0));
        assert_eq!(mechanism.body_index("FL_calf"), Some(6));
        assert_eq!(mechanism.body_index("FL_foot"), None);
    }

    #[test]
    fn test_set_state_is_observed() {
        let mechanism = standing();
        let state = mechanism.state();
        let nominal = LaikagoConfig::nominal_pose();
        for (a, b) in state.gc.iter().zip(&nominal) {
            assert_relative_eq!(*a, *b, epsilon = 1e-6);
        }
        assert!(state.gv.iter().all(|&v| v == 0.0));
        assert!(mechanism.contacts().is_empty());
    }

    #[test]
    fn test_set_state_normalizes_quaternion() {
        let mut mechanism = standing();
        let mut gc = DVector::from_vec(LaikagoConfig::nominal_pose());
        gc[3] = 2.0;
        mechanism.set_state(&gc, &DVector::zeros(14));
        assert_relative_eq!(mechanism.state().gc[3], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_standing_keeps_feet_on_ground() {
        let mut mechanism = standing();
        for _ in 0..400 {
            mechanism.integrate();
        }
        let state = mechanism.state();
        assert!(state.gc.iter().chain(state.gv.iter()).all(|v| v.is_finite()));
        assert!(state.gc[2] > 0.2 && state.gc[2] < 0.6, "base at {}", state.gc[2]);

        let feet: Vec<usize> = LaikagoConfig::FOOT_BODIES
            .iter()
            .filter_map(|name| mechanism.body_index(name))
            .collect();
        assert!(!mechanism.contacts().is_empty());
        assert!(mechanism
            .contacts()
            .iter()
            .any(|c| feet.contains(&c.local_body_index) && c.world_impulse().z > 0.0));
    }

    #[test]
    fn test_force_is_clamped_pd_torque() {
        let mut mechanism = standing();
        let mut target = DVector::from_vec(LaikagoConfig::nominal_pose());
        target[7] += 10.0;
        mechanism.set_pd_target(&target, &DVector::zeros(14));
        mechanism.integrate();

        let force = mechanism.generalized_force();
        assert!(force.rows(0, 6).iter().all(|&f| f == 0.0));
        assert_relative_eq!(force[6], LaikagoConfig::MAX_MOTOR_FORCE);
    }

    #[test]
    fn test_first_step_keeps_set_pose() {
        let mut mechanism = standing();
        mechanism.integrate();

        let state = mechanism.state();
        let nominal = LaikagoConfig::nominal_pose();
        for i in 0..8 {
            assert_relative_eq!(state.gc[7 + i], nominal[7 + i], epsilon = 1e-2);
            assert!(state.gv[6 + i].abs() < 5.0, "joint {i} rate {}", state.gv[6 + i]);
        }
        assert_relative_eq!(state.gc[2], nominal[2], epsilon = 1e-2);
    }

    #[test]
    fn test_set_state_at_other_pose() {
        let mut mechanism = standing();
        let mut gc = DVector::from_vec(LaikagoConfig::nominal_pose());
        gc[7] = 1.2;
        gc[8] = -2.0;
        gc[2] = 0.6;
        mechanism.set_state(&gc, &DVector::zeros(14));
        mechanism.set_pd_target(&gc, &DVector::zeros(14));
        mechanism.integrate();

        let state = mechanism.state();
        assert_relative_eq!(state.gc[7], 1.2, epsilon = 1e-2);
        assert_relative_eq!(state.gc[8], -2.0, epsilon = 1e-2);
    }

    #[test]
    fn test_joint_limits_hold_against_saturated_targets() {
        let mut mechanism = standing();
        let mut target = DVector::from_vec(LaikagoConfig::nominal_pose());
        for i in 0..8 {
            target[7 + i] += if i % 2 == 0 { 20.0 } else { -20.0 };
        }
        mechanism.set_pd_target(&target, &DVector::zeros(14));
        for _ in 0..400 {
            mechanism.integrate();
        }

        let limits: Vec<[f32; 2]> = mechanism
            .model()
            .actuated_joints()
            .map(|j| j.limits.unwrap())
            .collect();
        let state = mechanism.state();
        for (i, [lower, upper]) in limits.iter().enumerate() {
            let angle = state.gc[7 + i];
            assert!(
                angle >= *lower as f64 - 0.1 && angle <= *upper as f64 + 0.1,
                "joint {i} at {angle} outside [{lower}, {upper}]"
            );
        }
    }

    #[test]
    fn test_contact_frame_rows() {
        let normal = Vector3::new(0.0, 0.0, 1.0);
        let frame = contact_frame(&normal);
        assert_relative_eq!(frame.row(2).transpose(), normal);
        assert_relative_eq!(frame * frame.transpose(), Matrix3::identity(), epsilon = 1e-12);
        assert_relative_eq!(frame.determinant(), 1.0, epsilon = 1e-12);

        let contact = Contact {
            local_body_index: 0,
            frame,
            impulse: Vector3::new(0.0, 0.0, 3.0),
            skip: false,
        };
        assert_relative_eq!(contact.world_impulse(), Vector3::new(0.0, 0.0, 3.0), epsilon = 1e-12);
    }

    #[test]
    fn test_wrap_angle() {
        assert_relative_eq!(wrap_angle(0.25), 0.25);
        assert_relative_eq!(wrap_angle(2.0 * PI + 0.1), 0.1, epsilon = 1e-12);
        assert_relative_eq!(wrap_angle(-PI), PI);
    }
}
