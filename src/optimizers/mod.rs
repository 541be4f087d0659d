//! Parameter update rules
//!
//! The network walks its layers in a fixed order and hands every trainable
//! slice (cell weights, a cell bias, convolution filters) to an [`Optimizer`]
//! together with the matching gradients.
//!
//! # Available Optimizers
//!
//! - [`SGD`]: `param -= rate * grad`
//! - [`Momentum`]: `v = friction * v - rate * grad; param += v`
//!
//! # Example
//!
//! ```ignore
//! use cellnet::optimizers::{Optimizer, SGD};
//!
//! let mut optimizer = SGD::new(0.05);
//! optimizer.update(&mut weights, &gradients);
//! ```

pub mod momentum;
pub mod sgd;

pub use momentum::Momentum;
pub use sgd::SGD;

/// Common interface of the update rules.
///
/// Stateful optimizers (momentum) keep one slot per parameter. They rely on
/// the caller presenting parameters in the same order on every step, which is
/// why [`Optimizer::begin_step`] is called once before a full sweep.
pub trait Optimizer {
    /// Update `parameters` in place from `gradients`.
    ///
    /// # Panics
    ///
    /// Implementations panic if the two slices differ in length.
    fn update(&mut self, parameters: &mut [f64], gradients: &[f64]);

    /// Announce a new sweep over `parameter_count` parameters.
    fn begin_step(&mut self, _parameter_count: usize) {}

    /// Clear any per-parameter state.
    fn reset(&mut self);

    fn learning_rate(&self) -> f64;

    fn set_learning_rate(&mut self, lr: f64);
}
