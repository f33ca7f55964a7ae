use thiserror::Error;

/// Errors raised while loading or validating an [`EnvConfig`](crate::config::EnvConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config value `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Errors raised while building the environment or feeding it actions.
///
/// Everything here is a setup-time failure except [`EnvError::ActionLength`],
/// which rejects a malformed action before any state is touched, and
/// [`EnvError::Diverged`], after which the episode must be reset.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to parse URDF: {0}")]
    Urdf(#[from] roxmltree::Error),

    #[error("URDF has no root link")]
    NoRootLink,

    #[error("failed to read robot description: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to attach joint `{0}`")]
    Joint(String),

    #[error("unknown body `{0}`")]
    UnknownBody(String),

    #[error("{what} has length {actual}, expected {expected}")]
    Dimension {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("action has length {actual}, expected {expected}")]
    ActionLength { expected: usize, actual: usize },

    #[error("simulation diverged at step {step}")]
    Diverged { step: u64 },
}

pub type Result<T, E = EnvError> = std::result::Result<T, E>;
