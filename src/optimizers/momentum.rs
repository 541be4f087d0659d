//! Gradient descent with momentum
//!
//! Keeps one velocity slot per parameter:
//! `v = friction * v - learning_rate * grad; param += v`.
//! Slots are addressed by a cursor that [`Optimizer::begin_step`] rewinds, so
//! parameters must be presented in the same order on every step.

use crate::optimizers::Optimizer;

#[derive(Debug, Clone)]
pub struct Momentum {
    learning_rate: f64,
    friction: f64,
    velocity: Vec<f64>,
    cursor: usize,
}

impl Momentum {
    /// The velocity buffer stays empty until the first step sizes it.
    pub fn new(learning_rate: f64, friction: f64) -> Self {
        Self {
            learning_rate,
            friction,
            velocity: Vec::new(),
            cursor: 0,
        }
    }

    pub fn friction(&self) -> f64 {
        self.friction
    }

    pub fn set_friction(&mut self, friction: f64) {
        self.friction = friction;
    }

    pub fn velocity(&self) -> &[f64] {
        &self.velocity
    }
}

impl Optimizer for Momentum {
    fn update(&mut self, parameters: &mut [f64], gradients: &[f64]) {
        assert_eq!(
            parameters.len(),
            gradients.len(),
            "Parameters and gradients must have the same length"
        );

        let end = self.cursor + parameters.len();
        if end > self.velocity.len() {
            // Used without begin_step: grow to fit.
            self.velocity.resize(end, 0.0);
        }

        let slots = &mut self.velocity[self.cursor..end];
        for ((param, grad), v) in parameters.iter_mut().zip(gradients).zip(slots) {
            *v = self.friction * *v - self.learning_rate * grad;
            *param += *v;
        }
        self.cursor = end;
    }

    fn begin_step(&mut self, parameter_count: usize) {
        if self.velocity.len() != parameter_count {
            self.velocity = vec![0.0; parameter_count];
        }
        self.cursor = 0;
    }

    fn reset(&mut self) {
        self.velocity.fill(0.0);
        self.cursor = 0;
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }
}
