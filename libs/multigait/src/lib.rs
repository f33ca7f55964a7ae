//! Quadruped locomotion environment on Rapier3D physics.
//!
//! [`Environment`] runs the control loop over any [`Mechanism`];
//! [`RapierMechanism`] simulates a URDF robot such as the bundled Laikago.

pub mod action;
pub mod config;
pub mod contact;
pub mod env;
pub mod error;
pub mod mechanism;
pub mod observation;
pub mod physics;
pub mod reward;
pub mod stepper;
pub mod telemetry;
pub mod termination;
pub mod urdf;

pub use config::{EnvConfig, LaikagoConfig, RewardConfig, RewardTermConfig};
pub use env::Environment;
pub use error::{ConfigError, EnvError, Result};
pub use mechanism::{ControlMode, Contact, GeneralizedState, Mechanism};
pub use physics::RapierMechanism;
pub use reward::RewardBreakdown;
pub use telemetry::VisualizationServer;
pub use termination::{EpisodeState, TerminalSignal};

/// The reference quadruped description.
pub const LAIKAGO_URDF: &str = include_str!("../assets/laikago.urdf");
