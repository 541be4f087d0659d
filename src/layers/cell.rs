//! Single neuron ("cell")
//!
//! A cell computes `sum = Σ input_i * weight_i - bias` and
//! `output = activation(sum)`. It caches `sum`, `output` and the running error
//! accumulator so the network can backpropagate and update in separate steps.

use std::fmt;

use crate::error::{NetError, Result};
use crate::utils::{Activation, FuncMode, SimpleRng};

/// Where a cell reads its inputs from.
///
/// Layer numbers are positions in the owning network and must refer to a
/// layer that runs before the cell's own layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellInput {
    /// The network's external input buffer (an *input cell*).
    Data,
    /// Outputs of the listed cells of a dense layer (a *derived cell*).
    Cells { layer: usize, cells: Vec<usize> },
    /// Flattened feature maps of a convolution or pooling layer.
    Maps { layer: usize },
}

impl CellInput {
    /// Every cell `0..count` of dense layer `layer`, in order.
    pub fn all_cells(layer: usize, count: usize) -> Self {
        CellInput::Cells {
            layer,
            cells: (0..count).collect(),
        }
    }
}

/// A neuron with its weights, bias and forward/backward caches.
#[derive(Debug, Clone)]
pub struct Cell {
    nin: usize,
    input: Option<CellInput>,
    weights: Vec<f64>,
    bias: f64,
    activation: Option<Activation>,
    sum: f64,
    output: f64,
    error: f64,
}

impl Cell {
    /// Create a cell with `nin` inputs.
    ///
    /// `weights` defaults to zeros when `None`. A `None` activation means the
    /// cell is linear (`output == sum`), which is required when a layer-level
    /// transform such as softmax supplies the non-linearity.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Construction`] when `nin` is zero, the weight slice
    /// length differs from `nin`, or a `Cells` source lists a different number
    /// of upstream cells.
    pub fn new(
        nin: usize,
        input: Option<CellInput>,
        weights: Option<&[f64]>,
        bias: f64,
        activation: Option<Activation>,
    ) -> Result<Self> {
        if nin == 0 {
            return Err(NetError::Construction(
                "cell must have at least one input".to_string(),
            ));
        }

        let weights = match weights {
            Some(w) if w.len() != nin => {
                return Err(NetError::Construction(format!(
                    "cell has {} inputs but {} weights",
                    nin,
                    w.len()
                )))
            }
            Some(w) => w.to_vec(),
            None => vec![0.0; nin],
        };

        let mut cell = Self {
            nin,
            input: None,
            weights,
            bias,
            activation,
            sum: 0.0,
            output: 0.0,
            error: 0.0,
        };
        if let Some(source) = input {
            cell.set_input(source)?;
        }
        Ok(cell)
    }

    /// Attach (or replace) the input source.
    pub fn set_input(&mut self, input: CellInput) -> Result<()> {
        if let CellInput::Cells { cells, .. } = &input {
            if cells.len() != self.nin {
                return Err(NetError::Construction(format!(
                    "cell has {} inputs but is wired to {} upstream cells",
                    self.nin,
                    cells.len()
                )));
            }
        }
        self.input = Some(input);
        Ok(())
    }

    pub fn nin(&self) -> usize {
        self.nin
    }

    pub fn input(&self) -> Option<&CellInput> {
        self.input.as_ref()
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn weights_mut(&mut self) -> &mut [f64] {
        &mut self.weights
    }

    pub fn bias(&self) -> f64 {
        self.bias
    }

    pub fn set_bias(&mut self, bias: f64) {
        self.bias = bias;
    }

    pub fn activation(&self) -> Option<Activation> {
        self.activation
    }

    /// Pre-activation value from the last forward pass.
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Post-activation value from the last forward pass.
    pub fn output(&self) -> f64 {
        self.output
    }

    /// Error accumulator: dE/d(output) before [`Cell::compose_error`],
    /// dE/d(sum) after it.
    pub fn error(&self) -> f64 {
        self.error
    }

    pub fn set_error(&mut self, error: f64) {
        self.error = error;
    }

    pub fn add_error(&mut self, delta: f64) {
        self.error += delta;
    }

    /// Re-draw every weight and the bias uniformly from [-1, 1).
    pub fn randomize(&mut self, rng: &mut SimpleRng) {
        for w in &mut self.weights {
            *w = rng.between_one();
        }
        self.bias = rng.between_one();
    }

    /// Forward step over already-resolved inputs.
    ///
    /// Only the first `nin` values of `inputs` are read.
    pub fn forward(&mut self, inputs: &[f64]) -> Result<()> {
        if inputs.len() < self.nin {
            return Err(NetError::Wiring(format!(
                "cell expects {} inputs, source provides {}",
                self.nin,
                inputs.len()
            )));
        }

        let weighted: f64 = inputs
            .iter()
            .zip(&self.weights)
            .map(|(x, w)| x * w)
            .sum();
        self.sum = weighted - self.bias;
        self.output = match self.activation {
            Some(act) => act.eval(self.sum, 0.0, FuncMode::Normal),
            None => self.sum,
        };
        Ok(())
    }

    /// Turn dE/d(output) into dE/d(sum) and return it.
    pub fn compose_error(&mut self) -> f64 {
        if let Some(act) = self.activation {
            self.error *= act.eval(self.sum, self.output, FuncMode::Derivative);
        }
        self.error
    }

    /// dE/d(weight_i) = input_i * error, written into `grads`.
    pub fn weight_gradients(&self, inputs: &[f64], grads: &mut [f64]) {
        for (g, x) in grads.iter_mut().zip(inputs).take(self.nin) {
            *g = x * self.error;
        }
    }

    /// The bias enters the sum negated, so its gradient is `-error`.
    pub fn bias_gradient(&self) -> f64 {
        -self.error
    }

    /// Weight `index`, or the bias when `index == nin`.
    pub(crate) fn param_mut(&mut self, index: usize) -> &mut f64 {
        if index < self.nin {
            &mut self.weights[index]
        } else {
            &mut self.bias
        }
    }

    /// Scalars saved by a snapshot: weights, bias, sum, output, error.
    pub(crate) fn snapshot_len(&self) -> usize {
        self.nin + 4
    }

    pub(crate) fn save_into(&self, buf: &mut [f64]) {
        let n = self.nin;
        buf[..n].copy_from_slice(&self.weights);
        buf[n] = self.bias;
        buf[n + 1] = self.sum;
        buf[n + 2] = self.output;
        buf[n + 3] = self.error;
    }

    pub(crate) fn restore_from(&mut self, buf: &[f64]) {
        let n = self.nin;
        self.weights.copy_from_slice(&buf[..n]);
        self.bias = buf[n];
        self.sum = buf[n + 1];
        self.output = buf[n + 2];
        self.error = buf[n + 3];
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w=[")?;
        for (i, w) in self.weights.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:.6}", w)?;
        }
        write!(f, "] bias={:.6}", self.bias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_rejects_zero_inputs() {
        let result = Cell::new(0, Some(CellInput::Data), None, 0.0, None);
        assert!(matches!(result, Err(NetError::Construction(_))));
    }

    #[test]
    fn test_cell_rejects_weight_arity_mismatch() {
        let result = Cell::new(3, Some(CellInput::Data), Some(&[1.0, 2.0]), 0.0, None);
        assert!(matches!(result, Err(NetError::Construction(_))));
    }

    #[test]
    fn test_cell_rejects_upstream_arity_mismatch() {
        let result = Cell::new(3, Some(CellInput::all_cells(0, 2)), None, 0.0, None);
        assert!(matches!(result, Err(NetError::Construction(_))));
    }

    #[test]
    fn test_forward_linear() {
        let mut cell = Cell::new(2, Some(CellInput::Data), Some(&[0.5, -1.0]), 0.25, None).unwrap();
        cell.forward(&[2.0, 1.0]).unwrap();
        // 2*0.5 + 1*(-1) - 0.25
        assert!((cell.sum() + 0.25).abs() < 1e-12);
        assert_eq!(cell.sum(), cell.output());
    }

    #[test]
    fn test_forward_short_input_is_wiring_error() {
        let mut cell = Cell::new(3, Some(CellInput::Data), None, 0.0, None).unwrap();
        assert!(matches!(cell.forward(&[1.0]), Err(NetError::Wiring(_))));
    }

    #[test]
    fn test_compose_error_with_sigmoid() {
        let mut cell = Cell::new(
            1,
            Some(CellInput::Data),
            Some(&[1.0]),
            0.0,
            Some(Activation::Sigmoid),
        )
        .unwrap();
        cell.forward(&[0.0]).unwrap();
        cell.set_error(2.0);
        // sigmoid'(0) = 0.25
        assert!((cell.compose_error() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_gradients() {
        let mut cell = Cell::new(2, Some(CellInput::Data), None, 0.0, None).unwrap();
        cell.set_error(0.5);
        let mut grads = [0.0; 2];
        cell.weight_gradients(&[2.0, -4.0], &mut grads);
        assert_eq!(grads, [1.0, -2.0]);
        assert_eq!(cell.bias_gradient(), -0.5);
    }

    #[test]
    fn test_snapshot_round_trip_restores_caches() {
        let mut cell = Cell::new(2, Some(CellInput::Data), Some(&[0.1, 0.2]), 0.3, None).unwrap();
        cell.forward(&[1.0, 1.0]).unwrap();
        cell.set_error(0.7);
        let mut buf = vec![0.0; cell.snapshot_len()];
        cell.save_into(&mut buf);

        cell.weights_mut()[0] = 9.0;
        cell.set_bias(-1.0);
        cell.forward(&[5.0, 5.0]).unwrap();
        cell.set_error(0.0);

        cell.restore_from(&buf);
        assert_eq!(cell.weights(), &[0.1, 0.2]);
        assert_eq!(cell.bias(), 0.3);
        assert_eq!(cell.error(), 0.7);
        assert!((cell.output() - 0.0).abs() < 1e-12);
    }
}
