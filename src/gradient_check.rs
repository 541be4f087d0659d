//! Snapshot/restore and central-difference gradient checking
//!
//! The snapshot covers every dense cell in layer order (weights, bias, sum,
//! output, error), followed by each dense layer's transform outputs.
//! Convolution and pooling state is not saved: perturbing a cell parameter
//! never changes it.

use tracing::{info, warn};

use crate::error::{NetError, Result};
use crate::layers::{Layer, LayerOps};
use crate::network::Network;
use crate::utils::Loss;

/// Tolerances for [`Network::check_gradient_with`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientCheck {
    /// Perturbation applied in each direction.
    pub epsilon: f64,
    /// Below this magnitude both gradients count as zero.
    pub abs_floor: f64,
    /// Largest accepted `|a - n| / max(|a|, |n|)`.
    pub rel_tolerance: f64,
}

impl Default for GradientCheck {
    fn default() -> Self {
        Self {
            epsilon: 1e-5,
            abs_floor: 1e-8,
            rel_tolerance: 1e-4,
        }
    }
}

/// Outcome of a successful check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientReport {
    pub parameters_checked: usize,
    pub max_relative_error: f64,
}

impl Network {
    /// Save all cell parameters and caches.
    pub fn snapshot(&mut self) {
        let len: usize = self
            .layers
            .iter()
            .filter_map(Layer::as_dense)
            .map(|d| d.snapshot_len())
            .sum();
        if self.snapshot.len() != len {
            self.snapshot = vec![0.0; len];
        }

        let mut offset = 0;
        for dense in self.layers.iter().filter_map(Layer::as_dense) {
            offset += dense.save_into(&mut self.snapshot[offset..]);
        }
    }

    /// Put back what [`Network::snapshot`] saved.
    ///
    /// # Errors
    ///
    /// [`NetError::Unsupported`] when no snapshot has been taken.
    pub fn restore(&mut self) -> Result<()> {
        if self.snapshot.is_empty() {
            return Err(NetError::Unsupported(
                "restore called before any snapshot".to_string(),
            ));
        }

        let mut offset = 0;
        for dense in self.layers.iter_mut().filter_map(Layer::as_dense_mut) {
            offset += dense.restore_from(&self.snapshot[offset..]);
        }
        Ok(())
    }

    /// [`Network::check_gradient_with`] using the default tolerances.
    pub fn check_gradient(&mut self, targets: &[f64], loss: Loss) -> Result<GradientReport> {
        self.check_gradient_with(targets, loss, &GradientCheck::default())
    }

    /// Compare every cell weight and bias gradient against a central
    /// difference of the loss.
    ///
    /// Must follow a completed forward, loss and backward pass on the same
    /// input and targets. The network state is restored before returning,
    /// whatever the outcome.
    ///
    /// # Errors
    ///
    /// [`NetError::GradientMismatch`] for the first parameter outside the
    /// tolerance, or any error raised by the perturbed forward passes.
    pub fn check_gradient_with(
        &mut self,
        targets: &[f64],
        loss: Loss,
        check: &GradientCheck,
    ) -> Result<GradientReport> {
        self.snapshot();
        let result = self.compare_all(targets, loss, check);
        self.restore()?;

        match &result {
            Ok(report) => info!(
                parameters = report.parameters_checked,
                max_relative_error = report.max_relative_error,
                "gradient check passed"
            ),
            Err(e) => warn!(error = %e, "gradient check failed"),
        }
        result
    }

    fn compare_all(
        &mut self,
        targets: &[f64],
        loss: Loss,
        check: &GradientCheck,
    ) -> Result<GradientReport> {
        // Errors are seeded from the summed loss, the returned loss is the mean.
        let units = self.output_layer().map(|d| d.len()).unwrap_or(1) as f64;
        let mut report = GradientReport {
            parameters_checked: 0,
            max_relative_error: 0.0,
        };

        for layer in 0..self.layers.len() {
            let shape: Vec<usize> = match self.layers[layer].as_dense() {
                Some(dense) => dense.cells().iter().map(|c| c.nin()).collect(),
                None => continue,
            };

            for (cell, &nin) in shape.iter().enumerate() {
                for param in 0..=nin {
                    self.restore()?;
                    let analytic = self.analytic_gradient(layer, cell, param)?;

                    self.perturb(layer, cell, param, check.epsilon);
                    let plus = self.forward_with_loss(targets, loss)?;
                    self.restore()?;
                    self.perturb(layer, cell, param, -check.epsilon);
                    let minus = self.forward_with_loss(targets, loss)?;
                    let numeric = units * (plus - minus) / (2.0 * check.epsilon);

                    let a = analytic.abs();
                    let n = numeric.abs();
                    if a < check.abs_floor && n < check.abs_floor {
                        report.parameters_checked += 1;
                        continue;
                    }
                    let relative = (analytic - numeric).abs() / a.max(n);
                    if relative >= check.rel_tolerance {
                        let name = if param == nin {
                            "bias".to_string()
                        } else {
                            format!("weight[{}]", param)
                        };
                        return Err(NetError::GradientMismatch {
                            layer,
                            cell,
                            param: name,
                            analytic,
                            numeric,
                        });
                    }
                    report.parameters_checked += 1;
                    report.max_relative_error = report.max_relative_error.max(relative);
                }
            }
        }
        Ok(report)
    }

    fn analytic_gradient(&mut self, layer: usize, cell: usize, param: usize) -> Result<f64> {
        let (upstream, rest) = self.layers.split_at_mut(layer);
        match rest[0].as_dense_mut() {
            Some(dense) => dense.param_gradient(cell, param, &self.input, upstream),
            None => Err(NetError::Wiring(format!("layer {} holds no cells", layer))),
        }
    }

    fn perturb(&mut self, layer: usize, cell: usize, param: usize, delta: f64) {
        if let Some(dense) = self.layers[layer].as_dense_mut() {
            *dense.cells_mut()[cell].param_mut(param) += delta;
        }
    }

    /// Parameter count covered by the check: every cell weight and bias.
    pub fn cell_parameter_count(&self) -> usize {
        self.layers
            .iter()
            .filter_map(Layer::as_dense)
            .map(LayerOps::parameter_count)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{Cell, CellInput, DenseLayer};
    use crate::utils::Activation;

    fn small_net() -> Network {
        let hidden = Cell::new(2, Some(CellInput::Data), Some(&[0.4, -0.7]), 0.1, Some(Activation::Sigmoid))
            .unwrap();
        let out = Cell::new(1, Some(CellInput::all_cells(0, 1)), Some(&[1.3]), -0.2, Some(Activation::Sigmoid))
            .unwrap();
        Network::new(vec![
            DenseLayer::new(1, &hidden).unwrap().into(),
            DenseLayer::new(1, &out).unwrap().into(),
        ])
        .unwrap()
    }

    #[test]
    fn test_restore_before_snapshot_fails() {
        let mut net = small_net();
        assert!(matches!(net.restore(), Err(NetError::Unsupported(_))));
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let mut net = small_net();
        net.set_input(&[0.5, 0.25]);
        net.forward().unwrap();
        let before = net.outputs();
        net.snapshot();

        let dense = net.layer_mut(0).unwrap().as_dense_mut().unwrap();
        dense.cell_mut(0).unwrap().weights_mut()[0] = 5.0;
        net.set_input(&[3.0, -3.0]);
        net.forward().unwrap();
        net.restore().unwrap();

        assert_eq!(net.outputs(), before);
        let hidden = net.layer(0).unwrap().as_dense().unwrap().cell(0).unwrap();
        assert_eq!(hidden.weights(), &[0.4, -0.7]);
    }

    #[test]
    fn test_check_passes_and_restores() {
        let mut net = small_net();
        net.set_input(&[0.5, 0.25]);
        net.forward_with_loss(&[1.0], Loss::MeanSquaredError).unwrap();
        net.backward().unwrap();
        let outputs = net.outputs();

        let report = net.check_gradient(&[1.0], Loss::MeanSquaredError).unwrap();
        assert_eq!(report.parameters_checked, net.cell_parameter_count());
        assert_eq!(net.outputs(), outputs);
    }

    #[test]
    fn test_check_detects_stale_gradient() {
        let mut net = small_net();
        net.set_input(&[0.5, 0.25]);
        net.forward_with_loss(&[1.0], Loss::MeanSquaredError).unwrap();
        // no backward: hidden error stays zero while its true gradient is not
        let result = net.check_gradient(&[1.0], Loss::MeanSquaredError);
        assert!(matches!(result, Err(NetError::GradientMismatch { .. })));
    }
}
