//! Python bindings for the multigait quadruped environment.

use std::collections::HashMap;

use multigait::{EnvConfig, Environment, RapierMechanism, VisualizationServer};
use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;

fn to_py_err(err: multigait::EnvError) -> PyErr {
    match err {
        multigait::EnvError::Io(e) => PyIOError::new_err(e.to_string()),
        other => PyValueError::new_err(other.to_string()),
    }
}

/// Single Laikago environment driven by a Python training loop.
#[pyclass(unsendable)]
pub struct MultigaitEnv {
    inner: Environment<RapierMechanism>,
    visualizer: Option<VisualizationServer>,
}

#[pymethods]
impl MultigaitEnv {
    /// Build from a URDF file and a JSON config string.
    ///
    /// `visualize=True` streams telemetry to a spawned rerun viewer.
    #[new]
    #[pyo3(signature = (urdf_path, config_json, visualize=false))]
    pub fn new(urdf_path: &str, config_json: &str, visualize: bool) -> PyResult<Self> {
        let config = EnvConfig::from_json_str(config_json)
            .map_err(|e| PyValueError::new_err(e.to_string()))?;
        let mechanism = RapierMechanism::from_urdf_file(
            urdf_path,
            config.simulation_dt,
            config.max_motor_force,
        )
        .map_err(to_py_err)?;
        let mut inner = Environment::new(mechanism, config).map_err(to_py_err)?;

        let visualizer = if visualize {
            let server = VisualizationServer::launch("multigait")
                .map_err(|e| PyIOError::new_err(e.to_string()))?;
            inner = inner.with_visualizer(server.clone());
            Some(server)
        } else {
            None
        };

        log::info!("MultigaitEnv ready: ob_dim={}, action_dim={}", inner.ob_dim(), inner.action_dim());
        Ok(Self { inner, visualizer })
    }

    pub fn reset(&mut self) -> Vec<f32> {
        self.inner.reset();
        self.inner.observe()
    }

    /// Advance one control step and return the reward.
    pub fn step(&mut self, action: Vec<f64>) -> PyResult<f64> {
        self.inner.step(&action).map_err(to_py_err)
    }

    pub fn observe(&self) -> Vec<f32> {
        self.inner.observe()
    }

    /// `(terminated, terminal_reward)`
    pub fn is_terminal_state(&mut self) -> (bool, f64) {
        let signal = self.inner.is_terminal_state();
        (signal.terminated, signal.terminal_reward)
    }

    /// Per-term rewards of the last step, keyed like the config.
    pub fn reward_logging(&self) -> HashMap<&'static str, f64> {
        self.inner.reward_breakdown().named().into_iter().collect()
    }

    #[getter]
    pub fn ob_dim(&self) -> usize {
        self.inner.ob_dim()
    }

    #[getter]
    pub fn action_dim(&self) -> usize {
        self.inner.action_dim()
    }

    #[getter]
    pub fn visualizing(&self) -> bool {
        self.visualizer.is_some()
    }
}

#[pymodule]
fn multigait_gym(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<MultigaitEnv>()?;
    Ok(())
}
