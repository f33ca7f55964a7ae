use nalgebra as na;
use rapier3d::prelude::*;
use roxmltree::{Document, Node};

use crate::error::{EnvError, Result};

#[derive(Clone, Debug, PartialEq)]
pub enum Geometry {
    Box { half_extents: Vector<f32> },
    Sphere { radius: f32 },
    /// Axis along the link's z, as URDF defines it.
    Cylinder { radius: f32, length: f32 },
    /// Meshes are approximated by a small ball at the collision origin.
    Mesh,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Collision {
    pub origin: Isometry<f32>,
    pub geometry: Geometry,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UrdfLink {
    pub name: String,
    pub mass: Option<f32>,
    pub collisions: Vec<Collision>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JointKind {
    Fixed,
    Revolute,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UrdfJoint {
    pub name: String,
    pub kind: JointKind,
    pub parent: String,
    pub child: String,
    pub origin: Isometry<f32>,
    pub axis: Vector<f32>,
    /// `[lower, upper]` in radians; `None` for fixed and continuous joints.
    pub limits: Option<[f32; 2]>,
}

/// Kinematic tree of a URDF robot description.
///
/// Links keep document order, which is also the body index order. Revolute
/// joints in document order are the actuated joints, i.e. the tail of the
/// generalized coordinate.
#[derive(Clone, Debug, PartialEq)]
pub struct UrdfModel {
    pub links: Vec<UrdfLink>,
    pub joints: Vec<UrdfJoint>,
}

impl UrdfModel {
    pub fn parse(urdf_content: &str) -> Result<Self> {
        let doc = Document::parse(urdf_content)?;
        let robot = doc.root_element();

        let mut links = Vec::new();
        let mut joints = Vec::new();

        for node in robot.children().filter(|n| n.is_element()) {
            if node.has_tag_name("link") {
                if let Some(name) = node.attribute("name") {
                    links.push(parse_link(name, node));
                }
            } else if node.has_tag_name("joint") {
                if let Some(joint) = parse_joint(node) {
                    joints.push(joint);
                }
            }
        }

        let model = Self { links, joints };
        if model.root().is_none() {
            return Err(EnvError::NoRootLink);
        }
        log::info!(
            "URDF: {} links, {} joints ({} actuated), root '{}'",
            model.links.len(),
            model.joints.len(),
            model.actuated_joints().count(),
            model.root().unwrap_or_default()
        );
        Ok(model)
    }

    /// The first link that is nobody's child.
    pub fn root(&self) -> Option<&str> {
        self.links
            .iter()
            .map(|l| l.name.as_str())
            .find(|name| !self.joints.iter().any(|j| j.child == *name))
    }

    pub fn link_index(&self, name: &str) -> Option<usize> {
        self.links.iter().position(|l| l.name == name)
    }

    pub fn actuated_joints(&self) -> impl Iterator<Item = &UrdfJoint> {
        self.joints.iter().filter(|j| j.kind == JointKind::Revolute)
    }

    pub fn children_of<'a>(&'a self, link: &'a str) -> impl Iterator<Item = &'a UrdfJoint> + 'a {
        self.joints.iter().filter(move |j| j.parent == link)
    }
}

fn parse_link(name: &str, node: Node) -> UrdfLink {
    let mass = node
        .children()
        .find(|n| n.has_tag_name("inertial"))
        .and_then(|inertial| inertial.children().find(|n| n.has_tag_name("mass")))
        .and_then(|mass| mass.attribute("value"))
        .and_then(|v| v.parse::<f32>().ok());

    let mut collisions = Vec::new();
    for collision in node.children().filter(|n| n.has_tag_name("collision")) {
        let origin = parse_urdf_origin(collision.children().find(|n| n.has_tag_name("origin")));
        let Some(geometry) = collision.children().find(|n| n.has_tag_name("geometry")) else {
            continue;
        };

        let geometry = if let Some(box_geom) = geometry.children().find(|n| n.has_tag_name("box")) {
            box_geom
                .attribute("size")
                .and_then(parse_vec3)
                .map(|size| Geometry::Box { half_extents: size / 2.0 })
        } else if let Some(sphere) = geometry.children().find(|n| n.has_tag_name("sphere")) {
            sphere
                .attribute("radius")
                .and_then(|r| r.parse().ok())
                .map(|radius| Geometry::Sphere { radius })
        } else if let Some(cylinder) = geometry.children().find(|n| n.has_tag_name("cylinder")) {
            let radius = cylinder.attribute("radius").and_then(|r| r.parse().ok());
            let length = cylinder.attribute("length").and_then(|l| l.parse().ok());
            radius
                .zip(length)
                .map(|(radius, length)| Geometry::Cylinder { radius, length })
        } else if geometry.children().any(|n| n.has_tag_name("mesh")) {
            Some(Geometry::Mesh)
        } else {
            None
        };

        match geometry {
            Some(geometry) => collisions.push(Collision { origin, geometry }),
            None => log::warn!("Link '{}': unsupported or malformed collision geometry", name),
        }
    }

    UrdfLink {
        name: name.to_string(),
        mass,
        collisions,
    }
}

fn parse_joint(node: Node) -> Option<UrdfJoint> {
    let name = node.attribute("name")?;
    let type_ = node.attribute("type").unwrap_or("fixed");

    let parent = node
        .children()
        .find(|n| n.has_tag_name("parent"))
        .and_then(|n| n.attribute("link"))?;
    let child = node
        .children()
        .find(|n| n.has_tag_name("child"))
        .and_then(|n| n.attribute("link"))?;
    let origin = parse_urdf_origin(node.children().find(|n| n.has_tag_name("origin")));
    let axis = node
        .children()
        .find(|n| n.has_tag_name("axis"))
        .and_then(|n| n.attribute("xyz"))
        .and_then(parse_vec3)
        .unwrap_or_else(|| vector![1.0, 0.0, 0.0]);

    let limits = (type_ == "revolute")
        .then(|| node.children().find(|n| n.has_tag_name("limit")))
        .flatten()
        .and_then(|limit| {
            let lower = limit.attribute("lower")?.parse::<f32>().ok()?;
            let upper = limit.attribute("upper")?.parse::<f32>().ok()?;
            (lower <= upper).then_some([lower, upper])
        });

    let kind = match type_ {
        "revolute" | "continuous" => JointKind::Revolute,
        "fixed" => JointKind::Fixed,
        other => {
            log::warn!("Joint '{}': type '{}' not supported, treating as fixed", name, other);
            JointKind::Fixed
        }
    };

    Some(UrdfJoint {
        name: name.to_string(),
        kind,
        parent: parent.to_string(),
        child: child.to_string(),
        origin,
        axis,
        limits,
    })
}

fn parse_vec3(s: &str) -> Option<Vector<f32>> {
    let v: Vec<f32> = s.split_whitespace().filter_map(|s| s.parse().ok()).collect();
    (v.len() == 3).then(|| vector![v[0], v[1], v[2]])
}

fn parse_urdf_origin(node: Option<Node>) -> Isometry<f32> {
    let mut xyz = vector![0.0, 0.0, 0.0];
    let mut rpy = vector![0.0, 0.0, 0.0];

    if let Some(origin) = node {
        if let Some(v) = origin.attribute("xyz").and_then(parse_vec3) {
            xyz = v;
        }
        if let Some(v) = origin.attribute("rpy").and_then(parse_vec3) {
            rpy = v;
        }
    }

    Isometry::from_parts(
        Translation::from(xyz),
        na::UnitQuaternion::from_euler_angles(rpy.x, rpy.y, rpy.z),
    )
}
