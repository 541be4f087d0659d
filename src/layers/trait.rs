//! Operations every layer kind provides.
//!
//! Dense, convolution and pooling layers all implement [`LayerOps`]; the
//! [`Layer`](crate::layers::Layer) enum dispatches to them with an exhaustive
//! match. Layers never own their inputs: `data` is the network input buffer
//! and `upstream` is the slice of layers that run before this one.

use crate::error::Result;
use crate::layers::Layer;
use crate::optimizers::Optimizer;
use crate::utils::SimpleRng;

/// Forward, backward and update steps of a single layer.
pub trait LayerOps {
    /// Forward propagation.
    ///
    /// Reads inputs from `data` or from `upstream` and overwrites the layer's
    /// cached sums, outputs or feature maps in place.
    ///
    /// # Errors
    ///
    /// Returns a wiring error when an input source cannot be resolved.
    fn forward(&mut self, data: &[f64], upstream: &[Layer]) -> Result<()>;

    /// Backward propagation.
    ///
    /// Expects this layer's error accumulators to already hold dE/d(output)
    /// and accumulates derivatives into the error accumulators of `upstream`.
    /// No parameter is modified.
    fn backward(&mut self, data: &[f64], upstream: &mut [Layer]) -> Result<()>;

    /// Zero the error accumulators before a backward sweep.
    fn reset_errors(&mut self);

    /// Zero accumulated parameter gradients. Only layers that keep a separate
    /// gradient buffer need this.
    fn clear_gradients(&mut self) {}

    /// Hand every trainable parameter and its gradient to `optimizer`, in the
    /// fixed order used by the network.
    fn apply_update(
        &mut self,
        data: &[f64],
        upstream: &[Layer],
        optimizer: &mut dyn Optimizer,
    ) -> Result<()>;

    /// Number of values this layer produces.
    fn output_size(&self) -> usize;

    /// Number of trainable parameters.
    fn parameter_count(&self) -> usize;

    /// Re-draw parameters uniformly from [-1, 1).
    fn randomize(&mut self, rng: &mut SimpleRng);
}
