use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub struct LaikagoConfig;

impl LaikagoConfig {
    // Simulation Parameters
    pub const SIMULATION_DT: f64 = 0.0025;
    pub const CONTROL_DT: f64 = 0.01;

    // Joint PD gains (HAA joints are fixed, so these apply to hip/knee pitch only)
    pub const P_GAIN: f64 = 40.0;
    pub const D_GAIN: f64 = 1.0;
    pub const MAX_MOTOR_FORCE: f64 = 100.0;

    /// Per-joint action scale in radians
    pub const ACTION_STD: f64 = 0.3;
    pub const TERMINAL_REWARD: f64 = -10.0;

    pub const FOOT_BODIES: [&'static str; 4] = ["FR_calf", "FL_calf", "RR_calf", "RL_calf"];

    /// Standing pose: base at 0.46 m, identity orientation (w, x, y, z), then
    /// thigh/calf pairs for FR, FL, RR, RL.
    pub fn nominal_pose() -> Vec<f64> {
        vec![
            0.0, 0.0, 0.46, 1.0, 0.0, 0.0, 0.0, //
            0.5, -1.0, 0.5, -1.0, 0.5, -1.0, 0.5, -1.0,
        ]
    }
}

fn default_simulation_dt() -> f64 {
    LaikagoConfig::SIMULATION_DT
}
fn default_control_dt() -> f64 {
    LaikagoConfig::CONTROL_DT
}
fn default_terminal_reward() -> f64 {
    LaikagoConfig::TERMINAL_REWARD
}
fn default_action_std() -> f64 {
    LaikagoConfig::ACTION_STD
}
fn default_p_gain() -> f64 {
    LaikagoConfig::P_GAIN
}
fn default_d_gain() -> f64 {
    LaikagoConfig::D_GAIN
}
fn default_max_motor_force() -> f64 {
    LaikagoConfig::MAX_MOTOR_FORCE
}
fn default_foot_bodies() -> Vec<String> {
    LaikagoConfig::FOOT_BODIES.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardTermConfig {
    pub coeff: f64,
}

/// Reward weights, keyed the way the training config names them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardConfig {
    pub torque: RewardTermConfig,
    #[serde(rename = "forwardVel_difference")]
    pub forward_vel_difference: RewardTermConfig,
    #[serde(rename = "GRF_entropy")]
    pub grf_entropy: RewardTermConfig,
}

/// Environment configuration.
///
/// `velocity` and all three reward coefficients are required; everything else
/// falls back to the Laikago reference values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvConfig {
    #[serde(default = "default_simulation_dt")]
    pub simulation_dt: f64,
    #[serde(default = "default_control_dt")]
    pub control_dt: f64,

    /// Desired forward velocity in the body frame [m/s]
    pub velocity: f64,
    pub reward: RewardConfig,

    #[serde(default = "default_terminal_reward")]
    pub terminal_reward: f64,
    #[serde(default = "default_action_std")]
    pub action_std: f64,
    #[serde(default = "default_p_gain")]
    pub p_gain: f64,
    #[serde(default = "default_d_gain")]
    pub d_gain: f64,
    #[serde(default = "default_max_motor_force")]
    pub max_motor_force: f64,

    #[serde(default = "LaikagoConfig::nominal_pose")]
    pub nominal_pose: Vec<f64>,
    #[serde(default = "default_foot_bodies")]
    pub foot_bodies: Vec<String>,
}

impl EnvConfig {
    /// Config with the reference reward weights and the given desired velocity.
    pub fn with_velocity(velocity: f64) -> Self {
        Self {
            simulation_dt: default_simulation_dt(),
            control_dt: default_control_dt(),
            velocity,
            reward: RewardConfig {
                torque: RewardTermConfig { coeff: 4e-5 },
                forward_vel_difference: RewardTermConfig { coeff: 0.3 },
                grf_entropy: RewardTermConfig { coeff: 0.1 },
            },
            terminal_reward: default_terminal_reward(),
            action_std: default_action_std(),
            p_gain: default_p_gain(),
            d_gain: default_d_gain(),
            max_motor_force: default_max_motor_force(),
            nominal_pose: LaikagoConfig::nominal_pose(),
            foot_bodies: default_foot_bodies(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("simulation_dt", self.simulation_dt)?;
        positive("control_dt", self.control_dt)?;
        if self.control_dt < self.simulation_dt {
            return Err(invalid(
                "control_dt",
                format!(
                    "{} is shorter than simulation_dt {}",
                    self.control_dt, self.simulation_dt
                ),
            ));
        }

        finite("velocity", self.velocity)?;
        finite("reward.torque.coeff", self.reward.torque.coeff)?;
        finite(
            "reward.forwardVel_difference.coeff",
            self.reward.forward_vel_difference.coeff,
        )?;
        finite("reward.GRF_entropy.coeff", self.reward.grf_entropy.coeff)?;
        finite("terminal_reward", self.terminal_reward)?;
        finite("action_std", self.action_std)?;

        if !(self.p_gain >= 0.0 && self.p_gain.is_finite()) {
            return Err(invalid("p_gain", format!("{} is not a valid gain", self.p_gain)));
        }
        if !(self.d_gain >= 0.0 && self.d_gain.is_finite()) {
            return Err(invalid("d_gain", format!("{} is not a valid gain", self.d_gain)));
        }
        positive("max_motor_force", self.max_motor_force)?;

        if self.nominal_pose.len() < 7 {
            return Err(invalid(
                "nominal_pose",
                format!(
                    "needs at least 7 base coordinates, got {}",
                    self.nominal_pose.len()
                ),
            ));
        }
        if self.nominal_pose.iter().any(|v| !v.is_finite()) {
            return Err(invalid("nominal_pose", "contains a non-finite value".into()));
        }
        if self.foot_bodies.len() != 4 {
            return Err(invalid(
                "foot_bodies",
                format!("expected 4 foot bodies, got {}", self.foot_bodies.len()),
            ));
        }

        Ok(())
    }
}

fn invalid(key: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { key, reason }
}

fn finite(key: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(invalid(key, format!("{value} is not finite")))
    }
}

fn positive(key: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(key, format!("{value} must be positive")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRAINING_CONFIG: &str = r#"{
        "velocity": 1.0,
        "reward": {
            "torque": { "coeff": 4e-5 },
            "forwardVel_difference": { "coeff": 0.3 },
            "GRF_entropy": { "coeff": 0.1 }
        }
    }"#;

    #[test]
    fn test_parse_training_config() {
        let config = EnvConfig::from_json_str(TRAINING_CONFIG).unwrap();
        assert_eq!(config.velocity, 1.0);
        assert_eq!(config.reward.torque.coeff, 4e-5);
        assert_eq!(config.reward.forward_vel_difference.coeff, 0.3);
        assert_eq!(config.reward.grf_entropy.coeff, 0.1);
        assert_eq!(config.control_dt, LaikagoConfig::CONTROL_DT);
        assert_eq!(config.nominal_pose.len(), 15);
        assert_eq!(config.foot_bodies[0], "FR_calf");
    }

    #[test]
    fn test_missing_reward_key_fails() {
        let json = r#"{
            "velocity": 1.0,
            "reward": {
                "torque": { "coeff": 4e-5 },
                "GRF_entropy": { "coeff": 0.1 }
            }
        }"#;
        assert!(matches!(
            EnvConfig::from_json_str(json),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_velocity_fails() {
        let json = r#"{
            "reward": {
                "torque": { "coeff": 4e-5 },
                "forwardVel_difference": { "coeff": 0.3 },
                "GRF_entropy": { "coeff": 0.1 }
            }
        }"#;
        assert!(EnvConfig::from_json_str(json).is_err());
    }

    #[test]
    fn test_control_dt_shorter_than_simulation_dt() {
        let mut config = EnvConfig::with_velocity(1.0);
        config.control_dt = 0.001;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "control_dt", .. })
        ));
    }

    #[test]
    fn test_wrong_foot_count() {
        let mut config = EnvConfig::with_velocity(1.0);
        config.foot_bodies.pop();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "foot_bodies", .. })
        ));
    }
}
