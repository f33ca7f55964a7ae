//! Visualization side channel.
//!
//! A [`VisualizationServer`] owns the mutex that separates physics integration
//! from an observer thread. The stepper holds it around every fine step, so an
//! observer calling [`VisualizationServer::latest_frame`] never sees a
//! half-integrated robot. With the `rerun` feature, published frames are also
//! streamed to a rerun viewer.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::mechanism::GeneralizedState;

/// Snapshot of the robot published after each control step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Frame {
    pub step: u64,
    pub base_position: [f64; 3],
    /// (w, x, y, z)
    pub base_orientation: [f64; 4],
    pub joint_angles: Vec<f64>,
    pub foot_impulse: [f64; 4],
}

impl Frame {
    pub fn from_state(step: u64, state: &GeneralizedState, foot_impulse: [f64; 4]) -> Self {
        let gc = &state.gc;
        Self {
            step,
            base_position: [gc[0], gc[1], gc[2]],
            base_orientation: [gc[3], gc[4], gc[5], gc[6]],
            joint_angles: gc.rows(7, gc.len() - 7).iter().copied().collect(),
            foot_impulse,
        }
    }
}

#[derive(Clone, Default)]
pub struct VisualizationServer {
    frame: Arc<Mutex<Frame>>,
    #[cfg(feature = "rerun")]
    recording: Option<rerun::RecordingStream>,
}

impl VisualizationServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a rerun viewer and stream published frames to it.
    #[cfg(feature = "rerun")]
    pub fn launch(app_id: &str) -> Result<Self, rerun::RecordingStreamError> {
        let recording = rerun::RecordingStreamBuilder::new(app_id).spawn()?;
        log::info!("Visualization server streaming to rerun as '{}'", app_id);
        Ok(Self {
            frame: Arc::default(),
            recording: Some(recording),
        })
    }

    /// Exclusive access for the duration of one fine integration step.
    pub fn lock(&self) -> MutexGuard<'_, Frame> {
        self.frame.lock()
    }

    pub fn latest_frame(&self) -> Frame {
        self.frame.lock().clone()
    }

    /// Non-blocking read for render loops; `None` while a step is integrating.
    pub fn try_latest_frame(&self) -> Option<Frame> {
        self.frame.try_lock().map(|frame| frame.clone())
    }

    pub fn publish(&self, frame: Frame) {
        #[cfg(feature = "rerun")]
        if let Some(rec) = &self.recording {
            stream_frame(rec, &frame);
        }
        *self.frame.lock() = frame;
    }
}

#[cfg(feature = "rerun")]
fn stream_frame(rec: &rerun::RecordingStream, frame: &Frame) {
    const FEET: [&str; 4] = ["FR", "FL", "RR", "RL"];

    rec.set_time_sequence("step", frame.step as i64);

    let [x, y, z] = frame.base_position.map(|v| v as f32);
    let [w, qx, qy, qz] = frame.base_orientation.map(|v| v as f32);
    let result = rec.log(
        "robot/base",
        &rerun::Transform3D::from_translation_rotation(
            [x, y, z],
            rerun::Quaternion::from_xyzw([qx, qy, qz, w]),
        ),
    );
    if let Err(e) = result {
        log::warn!("Failed to stream base pose: {}", e);
    }

    for (foot, impulse) in FEET.iter().zip(frame.foot_impulse) {
        if let Err(e) = rec.log(format!("grf/{foot}"), &rerun::Scalar::new(impulse)) {
            log::warn!("Failed to stream {} impulse: {}", foot, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    #[test]
    fn test_publish_then_read() {
        let server = VisualizationServer::new();
        let state = GeneralizedState {
            gc: DVector::from_vec(vec![1.0, 2.0, 0.4, 1.0, 0.0, 0.0, 0.0, 0.5, -1.0]),
            gv: DVector::zeros(8),
        };
        server.publish(Frame::from_state(3, &state, [1.0, 0.0, 0.0, 2.0]));

        let frame = server.latest_frame();
        assert_eq!(frame.step, 3);
        assert_eq!(frame.base_position, [1.0, 2.0, 0.4]);
        assert_eq!(frame.joint_angles, vec![0.5, -1.0]);
        assert_eq!(frame.foot_impulse[3], 2.0);
    }

    #[test]
    fn test_observer_blocked_while_locked() {
        let server = VisualizationServer::new();
        let observer = server.clone();

        let guard = server.lock();
        let handle = std::thread::spawn(move || observer.try_latest_frame().is_none());
        assert!(handle.join().unwrap());
        drop(guard);

        assert!(server.try_latest_frame().is_some());
    }
}
