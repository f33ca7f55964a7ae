use std::collections::BTreeSet;

use crate::mechanism::Contact;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EpisodeState {
    Running,
    Terminated,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TerminalSignal {
    pub terminated: bool,
    pub terminal_reward: f64,
}

/// Ends the episode as soon as anything but a foot touches something.
///
/// `Terminated` is absorbing: only [`reset`](Self::reset) returns to `Running`.
#[derive(Clone, Debug)]
pub struct TerminationChecker {
    foot_bodies: BTreeSet<usize>,
    terminal_reward: f64,
    state: EpisodeState,
}

impl TerminationChecker {
    pub fn new(foot_bodies: impl IntoIterator<Item = usize>, terminal_reward: f64) -> Self {
        Self {
            foot_bodies: foot_bodies.into_iter().collect(),
            terminal_reward,
            state: EpisodeState::Running,
        }
    }

    pub fn state(&self) -> EpisodeState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = EpisodeState::Running;
    }

    pub fn check(&mut self, contacts: &[Contact]) -> TerminalSignal {
        if self.state == EpisodeState::Running
            && contacts
                .iter()
                .any(|c| !self.foot_bodies.contains(&c.local_body_index))
        {
            log::debug!("Non-foot contact, terminating episode");
            self.state = EpisodeState::Terminated;
        }

        match self.state {
            EpisodeState::Running => TerminalSignal {
                terminated: false,
                terminal_reward: 0.0,
            },
            EpisodeState::Terminated => TerminalSignal {
                terminated: true,
                terminal_reward: self.terminal_reward,
            },
        }
    }
}
