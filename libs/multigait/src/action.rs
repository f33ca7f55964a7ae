use nalgebra::DVector;

use crate::error::{EnvError, Result};

/// Position and velocity targets handed to the PD controller.
#[derive(Clone, Debug, PartialEq)]
pub struct PdTarget {
    /// Over the generalized coordinate; zero on the floating base.
    pub position: DVector<f64>,
    /// Over the generalized velocity; always zero.
    pub velocity: DVector<f64>,
}

/// Maps normalized policy actions to joint position targets.
///
/// The actuated slice is `mean + action * std`. Actions are not clipped;
/// joint limits and motor force limits absorb anything out of range.
#[derive(Clone, Debug)]
pub struct ActionScaler {
    mean: DVector<f64>,
    std: DVector<f64>,
    gc_dim: usize,
    gv_dim: usize,
}

impl ActionScaler {
    pub fn new(
        mean: DVector<f64>,
        std: DVector<f64>,
        gc_dim: usize,
        gv_dim: usize,
    ) -> Result<Self> {
        let joints = gv_dim.saturating_sub(6);
        if mean.len() != joints {
            return Err(EnvError::Dimension {
                what: "action mean",
                expected: joints,
                actual: mean.len(),
            });
        }
        if std.len() != joints {
            return Err(EnvError::Dimension {
                what: "action std",
                expected: joints,
                actual: std.len(),
            });
        }
        if gc_dim != joints + 7 {
            return Err(EnvError::Dimension {
                what: "generalized coordinate",
                expected: joints + 7,
                actual: gc_dim,
            });
        }
        Ok(Self {
            mean,
            std,
            gc_dim,
            gv_dim,
        })
    }

    pub fn action_dim(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    pub fn scale(&self, action: &[f64]) -> Result<PdTarget> {
        if action.len() != self.action_dim() {
            return Err(EnvError::ActionLength {
                expected: self.action_dim(),
                actual: action.len(),
            });
        }

        let mut position = DVector::zeros(self.gc_dim);
        let joints = self.action_dim();
        for (i, a) in action.iter().enumerate() {
            position[self.gc_dim - joints + i] = self.mean[i] + a * self.std[i];
        }

        Ok(PdTarget {
            position,
            velocity: DVector::zeros(self.gv_dim),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scaler() -> ActionScaler {
        let mean = DVector::from_vec(vec![0.5, -1.0, 0.5, -1.0, 0.5, -1.0, 0.5, -1.0]);
        ActionScaler::new(mean, DVector::from_element(8, 0.3), 15, 14).unwrap()
    }

    #[test]
    fn test_scale_affine() {
        let scaler = scaler();
        let action = [1.0, -1.0, 0.0, 2.0, -3.0, 0.5, 0.25, 10.0];
        let target = scaler.scale(&action).unwrap();

        assert_eq!(target.position.len(), 15);
        assert_eq!(target.velocity.len(), 14);
        for i in 0..7 {
            assert_eq!(target.position[i], 0.0);
        }
        for (i, a) in action.iter().enumerate() {
            let expected = scaler.mean()[i] + a * 0.3;
            assert!((target.position[7 + i] - expected).abs() < 1e-12);
        }
        assert!(target.velocity.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_out_of_range_action_not_clipped() {
        let target = scaler().scale(&[100.0; 8]).unwrap();
        assert!((target.position[7] - (0.5 + 30.0)).abs() < 1e-12);
    }

    #[test]
    fn test_wrong_action_length() {
        assert!(matches!(
            scaler().scale(&[0.0; 7]),
            Err(EnvError::ActionLength { expected: 8, actual: 7 })
        ));
    }

    #[test]
    fn test_mismatched_std_rejected_at_construction() {
        let result = ActionScaler::new(DVector::zeros(8), DVector::zeros(7), 15, 14);
        assert!(matches!(
            result,
            Err(EnvError::Dimension { what: "action std", .. })
        ));
    }
}
