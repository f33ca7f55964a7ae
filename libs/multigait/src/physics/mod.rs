use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;

use nalgebra as na;
use rapier3d::prelude::*;

use crate::error::{EnvError, Result};
use crate::urdf::{Geometry, JointKind, UrdfModel};

mod mechanism;

pub use mechanism::RapierMechanism;

const SOLVER_ITERATIONS: NonZeroUsize = match NonZeroUsize::new(8) {
    Some(n) => n,
    None => unreachable!(),
};

// Robot = Group 2, ground = Group 1. Robot parts don't hit each other.
const GROUND_GROUP: Group = Group::GROUP_1;
const ROBOT_GROUP: Group = Group::GROUP_2;

/// Density used for links without an `<inertial>` mass [kg/m^3]
const DEFAULT_DENSITY: f32 = 1000.0;

/// Z-up rapier world with a flat ground whose surface is z = 0.
pub struct PhysicsWorld {
    pub rigid_body_set: RigidBodySet,
    pub collider_set: ColliderSet,
    pub impulse_joint_set: ImpulseJointSet,
    pub multibody_joint_set: MultibodyJointSet,
    pub gravity: Vector<f32>,
    pub integration_parameters: IntegrationParameters,
    pub physics_pipeline: PhysicsPipeline,
    pub island_manager: IslandManager,
    pub broad_phase: DefaultBroadPhase,
    pub narrow_phase: NarrowPhase,
    pub ccd_solver: CCDSolver,
    pub query_pipeline: QueryPipeline,
}

impl PhysicsWorld {
    pub fn new(dt: f32) -> Self {
        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = dt;
        integration_parameters.num_solver_iterations = SOLVER_ITERATIONS;

        let mut world = Self {
            rigid_body_set: RigidBodySet::new(),
            collider_set: ColliderSet::new(),
            impulse_joint_set: ImpulseJointSet::new(),
            multibody_joint_set: MultibodyJointSet::new(),
            gravity: vector![0.0, 0.0, -9.81],
            integration_parameters,
            physics_pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
        };

        let ground = ColliderBuilder::cuboid(50.0, 50.0, 0.1)
            .translation(vector![0.0, 0.0, -0.1])
            .friction(0.8)
            .collision_groups(InteractionGroups::new(GROUND_GROUP, Group::ALL))
            .build();
        world.collider_set.insert(ground);

        world
    }

    pub fn step(&mut self) {
        self.physics_pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &(),
            &(),
        );
    }
}

/// Actuated joint as inserted into the multibody.
#[derive(Clone, Debug)]
pub(crate) struct ActuatedJoint {
    pub handle: MultibodyJointHandle,
    pub parent: RigidBodyHandle,
    pub child: RigidBodyHandle,
    /// Joint frame on the parent; its x axis is the joint axis.
    pub frame1: Isometry<f32>,
    /// Joint frame on the child, coinciding with `frame1` at angle 0.
    pub frame2: Isometry<f32>,
    /// Angle at which the multibody joint coordinate is zero.
    pub offset: f32,
}

impl ActuatedJoint {
    fn world_frames(&self, bodies: &RigidBodySet) -> Option<(Isometry<f32>, Isometry<f32>)> {
        let parent = bodies.get(self.parent)?;
        let child = bodies.get(self.child)?;
        Some((parent.position() * self.frame1, child.position() * self.frame2))
    }

    /// Rotation of the child frame about the joint axis, in (-pi, pi].
    pub fn angle(&self, bodies: &RigidBodySet) -> f32 {
        self.world_frames(bodies)
            .map(|(f1, f2)| (f1.inverse() * f2).rotation.scaled_axis().x)
            .unwrap_or(0.0)
    }

    /// Multibody coordinate (motor target, limit) for a joint angle.
    pub fn coordinate(&self, angle: f32) -> f32 {
        angle - self.offset
    }
}

/// Link and joint handles of a robot inserted into a [`PhysicsWorld`].
pub(crate) struct RobotHandles {
    /// Indexed like [`UrdfModel::links`].
    pub bodies: Vec<RigidBodyHandle>,
    /// Indexed like [`UrdfModel::actuated_joints`].
    pub joints: Vec<ActuatedJoint>,
}

/// Initial pose and motor settings for [`build_robot`].
pub(crate) struct RobotPose {
    pub root: Isometry<f32>,
    pub root_linvel: Vector<f32>,
    pub root_angvel: Vector<f32>,
    /// One angle per actuated joint.
    pub joint_angles: Vec<f32>,
}

/// Rotation taking the x axis onto `axis`.
fn axis_alignment(axis: &Vector<f32>) -> na::UnitQuaternion<f32> {
    na::UnitQuaternion::rotation_between(&Vector::x(), axis).unwrap_or_else(|| {
        na::UnitQuaternion::from_axis_angle(&Vector::z_axis(), std::f32::consts::PI)
    })
}

pub(crate) fn build_robot(
    world: &mut PhysicsWorld,
    model: &UrdfModel,
    pose: &RobotPose,
) -> Result<RobotHandles> {
    let root = model.root().ok_or(EnvError::NoRootLink)?;

    let actuated_index: HashMap<&str, usize> = model
        .actuated_joints()
        .enumerate()
        .map(|(i, j)| (j.name.as_str(), i))
        .collect();

    // 1. Traversal to compute global poses
    let mut global_poses: HashMap<&str, Isometry<f32>> = HashMap::new();
    global_poses.insert(root, pose.root);

    let mut queue = VecDeque::new();
    queue.push_back(root);
    while let Some(parent_name) = queue.pop_front() {
        let Some(parent_pose) = global_poses.get(parent_name).copied() else {
            continue;
        };
        for joint in model.children_of(parent_name) {
            if global_poses.contains_key(joint.child.as_str()) {
                continue;
            }
            let mut rotation_offset = na::UnitQuaternion::identity();
            if let Some(&i) = actuated_index.get(joint.name.as_str()) {
                let angle = pose.joint_angles.get(i).copied().unwrap_or(0.0);
                rotation_offset =
                    na::UnitQuaternion::from_axis_angle(&UnitVector::new_normalize(joint.axis), angle);
            }
            let child_pose = parent_pose * joint.origin * rotation_offset;
            global_poses.insert(joint.child.as_str(), child_pose);
            queue.push_back(joint.child.as_str());
        }
    }

    // 2. Create RigidBodies & Colliders
    let root_origin = pose.root.translation.vector;
    let mut bodies = Vec::with_capacity(model.links.len());
    for link in &model.links {
        let link_pose = global_poses.get(link.name.as_str()).copied().unwrap_or_else(|| {
            log::warn!("Link '{}' is not connected to '{}'", link.name, root);
            pose.root
        });
        // Rigid motion of the whole robot with the base velocity
        let lever = link_pose.translation.vector - root_origin;
        let linvel = pose.root_linvel + pose.root_angvel.cross(&lever);

        let rb = RigidBodyBuilder::dynamic()
            .position(link_pose)
            .linvel(linvel)
            .angvel(pose.root_angvel)
            .can_sleep(false)
            .build();
        let handle = world.rigid_body_set.insert(rb);
        bodies.push(handle);

        let groups = InteractionGroups::new(ROBOT_GROUP, GROUND_GROUP);
        let part_mass = link.mass.map(|m| m / link.collisions.len().max(1) as f32);

        for collision in &link.collisions {
            let (shape, offset) = match collision.geometry {
                Geometry::Box { half_extents } => (
                    ColliderBuilder::cuboid(half_extents.x, half_extents.y, half_extents.z),
                    Isometry::identity(),
                ),
                Geometry::Sphere { radius } => (ColliderBuilder::ball(radius), Isometry::identity()),
                // Rapier cylinders run along y, URDF ones along z
                Geometry::Cylinder { radius, length } => (
                    ColliderBuilder::cylinder(length / 2.0, radius),
                    Isometry::rotation(vector![std::f32::consts::FRAC_PI_2, 0.0, 0.0]),
                ),
                Geometry::Mesh => (ColliderBuilder::ball(0.02), Isometry::identity()),
            };

            let builder = shape
                .position(collision.origin * offset)
                .friction(0.8)
                .collision_groups(groups);
            let builder = match part_mass {
                Some(mass) => builder.mass(mass),
                None => builder.density(DEFAULT_DENSITY),
            };
            world
                .collider_set
                .insert_with_parent(builder.build(), handle, &mut world.rigid_body_set);
        }

        if link.collisions.is_empty() {
            // Massless links destabilize the multibody; carry the inertial mass
            // on a collider that touches nothing.
            let collider = ColliderBuilder::ball(0.01)
                .mass(link.mass.unwrap_or(0.01))
                .collision_groups(InteractionGroups::new(Group::GROUP_3, Group::NONE))
                .build();
            world
                .collider_set
                .insert_with_parent(collider, handle, &mut world.rigid_body_set);
        }
    }

    // 3. Create Joints in Topological Order to ensure stable Multibody construction
    let mut joints: Vec<Option<ActuatedJoint>> = vec![None; actuated_index.len()];
    let mut queue = VecDeque::new();
    queue.push_back(root);
    let mut attached = std::collections::HashSet::new();

    while let Some(parent_name) = queue.pop_front() {
        for joint in model.children_of(parent_name) {
            if !attached.insert(joint.name.as_str()) {
                continue;
            }
            let (Some(p), Some(c)) = (
                model.link_index(&joint.parent),
                model.link_index(&joint.child),
            ) else {
                continue;
            };
            let (p_handle, c_handle) = (bodies[p], bodies[c]);

            match joint.kind {
                JointKind::Fixed => {
                    let generic = GenericJointBuilder::new(JointAxesMask::LOCKED_FIXED_AXES)
                        .local_frame1(joint.origin)
                        .local_frame2(Isometry::identity())
                        .build();
                    if world
                        .multibody_joint_set
                        .insert(p_handle, c_handle, generic, true)
                        .is_none()
                    {
                        return Err(EnvError::Joint(joint.name.clone()));
                    }
                }
                JointKind::Revolute => {
                    // Both frames put the joint axis on x. Rapier starts every
                    // multibody coordinate at zero, so the child frame is turned
                    // back by the initial angle to make zero mean "as posed".
                    let alignment = axis_alignment(&joint.axis);
                    let frame1 = Isometry::from_parts(
                        joint.origin.translation,
                        joint.origin.rotation * alignment,
                    );
                    let frame2 = Isometry::from_parts(Translation::identity(), alignment);

                    let i = actuated_index[joint.name.as_str()];
                    let offset = pose.joint_angles.get(i).copied().unwrap_or(0.0);
                    let posed_frame2 = frame2
                        * na::UnitQuaternion::from_axis_angle(&Vector::x_axis(), -offset);

                    let mut builder = GenericJointBuilder::new(JointAxesMask::LOCKED_REVOLUTE_AXES)
                        .local_frame1(frame1)
                        .local_frame2(posed_frame2);
                    if let Some([lower, upper]) = joint.limits {
                        builder = builder.limits(JointAxis::AngX, [lower - offset, upper - offset]);
                    }
                    let mut generic = builder.build();
                    // Hold the initial pose until gains and targets arrive
                    generic.set_motor(JointAxis::AngX, 0.0, 0.0, 0.0, 0.0);

                    let handle = world
                        .multibody_joint_set
                        .insert(p_handle, c_handle, generic, true)
                        .ok_or_else(|| EnvError::Joint(joint.name.clone()))?;
                    joints[i] = Some(ActuatedJoint {
                        handle,
                        parent: p_handle,
                        child: c_handle,
                        frame1,
                        frame2,
                        offset,
                    });
                }
            }
            queue.push_back(joint.child.as_str());
        }
    }

    let joints = joints
        .into_iter()
        .zip(model.actuated_joints())
        .map(|(joint, urdf)| joint.ok_or_else(|| EnvError::Joint(urdf.name.clone())))
        .collect::<Result<Vec<_>>>()?;

    Ok(RobotHandles { bodies, joints })
}
