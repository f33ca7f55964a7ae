//! Quadruped locomotion environment.
//!
//! [`Environment`] owns a [`Mechanism`] and runs the per-step loop:
//! scale the action into PD targets, integrate one control interval, rebuild
//! the observation and foot-load accounting, then score the step. Termination
//! is queried separately through [`Environment::is_terminal_state`].

use nalgebra::DVector;

use crate::action::ActionScaler;
use crate::config::EnvConfig;
use crate::contact::FOOT_COUNT;
use crate::error::{EnvError, Result};
use crate::mechanism::{ControlMode, Mechanism};
use crate::observation::ObservationBuilder;
use crate::reward::{RewardBreakdown, RewardComposer};
use crate::stepper::SimulationStepper;
use crate::telemetry::{Frame, VisualizationServer};
use crate::termination::{EpisodeState, TerminalSignal, TerminationChecker};

pub struct Environment<M: Mechanism> {
    mechanism: M,
    gc_init: DVector<f64>,
    gv_init: DVector<f64>,
    scaler: ActionScaler,
    stepper: SimulationStepper,
    observer: ObservationBuilder,
    reward: RewardComposer,
    termination: TerminationChecker,
    steps: u64,
}

impl<M: Mechanism> Environment<M> {
    pub fn new(mut mechanism: M, config: EnvConfig) -> Result<Self> {
        config.validate()?;

        let gc_dim = mechanism.generalized_coordinate_dim();
        let gv_dim = mechanism.dof();
        if gv_dim < 6 || gc_dim != gv_dim + 1 {
            return Err(EnvError::Dimension {
                what: "generalized coordinate",
                expected: gv_dim + 1,
                actual: gc_dim,
            });
        }
        let joints = gv_dim - 6;

        if config.nominal_pose.len() != gc_dim {
            return Err(EnvError::Dimension {
                what: "nominal pose",
                expected: gc_dim,
                actual: config.nominal_pose.len(),
            });
        }
        let gc_init = DVector::from_column_slice(&config.nominal_pose);
        let gv_init = DVector::zeros(gv_dim);

        let mut foot_bodies = [0; FOOT_COUNT];
        for (slot, name) in foot_bodies.iter_mut().zip(&config.foot_bodies) {
            *slot = mechanism
                .body_index(name)
                .ok_or_else(|| EnvError::UnknownBody(name.clone()))?;
        }

        mechanism.set_control_mode(ControlMode::PdPlusFeedforwardTorque);
        let mut p_gains = DVector::zeros(gv_dim);
        let mut d_gains = DVector::zeros(gv_dim);
        p_gains.rows_mut(6, joints).fill(config.p_gain);
        d_gains.rows_mut(6, joints).fill(config.d_gain);
        mechanism.set_pd_gains(&p_gains, &d_gains);

        let scaler = ActionScaler::new(
            gc_init.rows(7, joints).clone_owned(),
            DVector::from_element(joints, config.action_std),
            gc_dim,
            gv_dim,
        )?;
        let stepper = SimulationStepper::new(config.control_dt, config.simulation_dt)?;

        log::info!(
            "Environment: gc_dim={}, gv_dim={}, joints={}, ob_dim={}, sub_steps={}, feet={:?}",
            gc_dim,
            gv_dim,
            joints,
            crate::observation::observation_dim(joints),
            stepper.sub_steps(),
            foot_bodies
        );

        let mut env = Self {
            mechanism,
            gc_init,
            gv_init,
            scaler,
            stepper,
            observer: ObservationBuilder::new(joints, foot_bodies),
            reward: RewardComposer::new(config.reward, config.velocity),
            termination: TerminationChecker::new(foot_bodies, config.terminal_reward),
            steps: 0,
        };
        env.reset();
        Ok(env)
    }

    /// Hold `server`'s lock around every fine step and publish a frame per
    /// control step.
    pub fn with_visualizer(mut self, server: VisualizationServer) -> Self {
        self.stepper = self.stepper.with_visualizer(server);
        self
    }

    /// Restore the nominal pose at rest and start a new episode.
    pub fn reset(&mut self) {
        self.mechanism.set_state(&self.gc_init, &self.gv_init);
        self.termination.reset();
        self.steps = 0;
        self.observer.update(&self.mechanism);
    }

    pub fn step(&mut self, action: &[f64]) -> Result<f64> {
        let target = self.scaler.scale(action)?;
        self.stepper.step(&mut self.mechanism, &target);
        self.steps += 1;

        // A diverged state never reaches the observation
        let state = self.mechanism.state();
        if !state.gc.iter().chain(state.gv.iter()).all(|v| v.is_finite()) {
            log::error!("Non-finite state after step {}", self.steps);
            return Err(EnvError::Diverged { step: self.steps });
        }
        self.observer.refresh(&state, self.mechanism.contacts());

        let torque_sq_norm = self.mechanism.generalized_force().norm_squared();
        let reward = self.reward.compose(
            torque_sq_norm,
            self.observer.body_linear_vel().x,
            self.observer.contacts().entropy(),
        );
        log::debug!("step {}: reward={:.5} {:?}", self.steps, reward, self.reward.breakdown());

        if let Some(server) = self.stepper.visualizer() {
            server.publish(Frame::from_state(
                self.steps,
                &state,
                self.observer.contacts().impulse(),
            ));
        }

        Ok(reward)
    }

    /// Observation narrowed to `f32` for the policy.
    pub fn observe(&self) -> Vec<f32> {
        self.observer.observation().iter().map(|&v| v as f32).collect()
    }

    pub fn observation(&self) -> &DVector<f64> {
        self.observer.observation()
    }

    pub fn is_terminal_state(&mut self) -> TerminalSignal {
        self.termination.check(self.mechanism.contacts())
    }

    pub fn episode_state(&self) -> EpisodeState {
        self.termination.state()
    }

    pub fn reward_breakdown(&self) -> RewardBreakdown {
        self.reward.breakdown()
    }

    pub fn foot_impulse(&self) -> [f64; FOOT_COUNT] {
        self.observer.contacts().impulse()
    }

    pub fn ob_dim(&self) -> usize {
        self.observer.dim()
    }

    pub fn action_dim(&self) -> usize {
        self.scaler.action_dim()
    }

    /// Control steps since the last reset.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn mechanism(&self) -> &M {
        &self.mechanism
    }
}
