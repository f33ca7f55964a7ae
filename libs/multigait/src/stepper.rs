use crate::action::PdTarget;
use crate::error::{ConfigError, Result};
use crate::mechanism::Mechanism;
use crate::telemetry::VisualizationServer;

/// Advances a mechanism by one control interval.
#[derive(Clone)]
pub struct SimulationStepper {
    sub_steps: usize,
    visualizer: Option<VisualizationServer>,
}

impl SimulationStepper {
    pub fn new(control_dt: f64, simulation_dt: f64) -> Result<Self> {
        let ratio = control_dt / simulation_dt;
        let sub_steps = (ratio + 1e-10) as usize;
        if sub_steps == 0 {
            return Err(ConfigError::Invalid {
                key: "control_dt",
                reason: format!("{control_dt} yields no integration steps of {simulation_dt}"),
            }
            .into());
        }
        if (ratio - sub_steps as f64).abs() > 1e-6 {
            log::warn!(
                "control_dt / simulation_dt = {:.4} is not an integer; stepping {} times",
                ratio,
                sub_steps
            );
        }

        Ok(Self {
            sub_steps,
            visualizer: None,
        })
    }

    pub fn with_visualizer(mut self, visualizer: VisualizationServer) -> Self {
        self.visualizer = Some(visualizer);
        self
    }

    pub fn sub_steps(&self) -> usize {
        self.sub_steps
    }

    pub fn visualizer(&self) -> Option<&VisualizationServer> {
        self.visualizer.as_ref()
    }

    /// Set the target once, then integrate `sub_steps` times, each under the
    /// visualizer lock when one is attached.
    pub fn step<M: Mechanism>(&self, mechanism: &mut M, target: &PdTarget) {
        mechanism.set_pd_target(&target.position, &target.velocity);

        for _ in 0..self.sub_steps {
            let _guard = self.visualizer.as_ref().map(VisualizationServer::lock);
            mechanism.integrate();
        }
    }
}
