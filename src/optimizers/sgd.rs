//! Plain gradient descent: `parameter -= learning_rate * gradient`

use crate::optimizers::Optimizer;

/// Stateless gradient descent.
///
/// For a cell bias the gradient is `-error`, so the rule reads
/// `bias += rate * error`.
///
/// # Example
///
/// ```ignore
/// use cellnet::optimizers::{Optimizer, SGD};
///
/// let mut optimizer = SGD::new(0.1);
/// let mut weights = vec![1.0, 2.0];
/// optimizer.update(&mut weights, &[0.5, -1.0]);
/// // weights are now: [0.95, 2.1]
/// ```
#[derive(Debug, Clone)]
pub struct SGD {
    learning_rate: f64,
}

impl SGD {
    pub fn new(learning_rate: f64) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for SGD {
    fn update(&mut self, parameters: &mut [f64], gradients: &[f64]) {
        assert_eq!(
            parameters.len(),
            gradients.len(),
            "Parameters and gradients must have the same length"
        );

        for (param, grad) in parameters.iter_mut().zip(gradients) {
            *param -= self.learning_rate * grad;
        }
    }

    fn reset(&mut self) {}

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }
}
