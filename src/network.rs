//! Network orchestration
//!
//! A [`Network`] owns its layers in evaluation order, a copy of the current
//! input, the gradient-check snapshot and the persistent momentum buffer.
//! Layers refer to each other by position, and every layer may only read from
//! layers stored before it.
//!
//! Training is split into three explicit phases:
//!
//! 1. [`Network::forward`] / [`Network::forward_with_loss`]
//! 2. [`Network::backward`]
//! 3. [`Network::update`] or [`Network::momentum_update`]

use std::fmt;

use tracing::{debug, warn};

use crate::config::TrainingConfig;
use crate::error::{NetError, Result};
use crate::layers::{DenseLayer, Layer, LayerOps};
use crate::optimizers::{Momentum, Optimizer, SGD};
use crate::utils::{Loss, SimpleRng};

#[derive(Debug, Clone)]
pub struct Network {
    pub(crate) layers: Vec<Layer>,
    pub(crate) input: Vec<f64>,
    pub(crate) snapshot: Vec<f64>,
    momentum: Momentum,
}

impl Network {
    /// # Errors
    ///
    /// [`NetError::Construction`] for an empty layer list.
    pub fn new(layers: Vec<Layer>) -> Result<Self> {
        if layers.is_empty() {
            return Err(NetError::Construction(
                "network needs at least one layer".to_string(),
            ));
        }
        // Downstream cells read raw cell outputs, never a transformed buffer.
        let last = layers.len() - 1;
        if let Some(index) = layers[..last]
            .iter()
            .position(|l| l.as_dense().is_some_and(|d| d.transform().is_some()))
        {
            return Err(NetError::Unsupported(format!(
                "layer {}: a transform is only allowed on the output layer",
                index
            )));
        }

        let net = Self {
            layers,
            input: Vec::new(),
            snapshot: Vec::new(),
            momentum: Momentum::new(0.0, 0.0),
        };
        debug!(
            layers = net.layers.len(),
            parameters = net.parameter_count(),
            "network built"
        );
        Ok(net)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    pub fn layer_mut(&mut self, index: usize) -> Option<&mut Layer> {
        self.layers.get_mut(index)
    }

    /// The terminal layer, when it holds cells.
    pub fn output_layer(&self) -> Option<&DenseLayer> {
        self.layers.last().and_then(Layer::as_dense)
    }

    /// Outputs of the terminal layer (transformed when it has a transform).
    pub fn outputs(&self) -> Vec<f64> {
        self.output_layer()
            .map(DenseLayer::outputs)
            .unwrap_or_default()
    }

    /// Total trainable parameters, in update order.
    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(LayerOps::parameter_count).sum()
    }

    /// Length of the momentum buffer; zero until the first momentum step.
    pub fn momentum_len(&self) -> usize {
        self.momentum.velocity().len()
    }

    /// Draw every weight, bias and filter tap uniformly from [-1, 1).
    pub fn init_params(&mut self, rng: &mut SimpleRng) {
        for layer in &mut self.layers {
            layer.randomize(rng);
        }
        self.momentum.reset();
        debug!(parameters = self.parameter_count(), "parameters initialized");
    }

    /// Copy `data` into the network-owned input buffer.
    pub fn set_input(&mut self, data: &[f64]) {
        self.input.clear();
        self.input.extend_from_slice(data);
    }

    pub fn input(&self) -> &[f64] {
        &self.input
    }

    /// Run every layer in order on the current input.
    pub fn forward(&mut self) -> Result<()> {
        for index in 0..self.layers.len() {
            let (upstream, rest) = self.layers.split_at_mut(index);
            rest[0].forward(&self.input, upstream)?;
        }
        Ok(())
    }

    /// Forward pass followed by [`Network::seed_loss`].
    pub fn forward_with_loss(&mut self, targets: &[f64], loss: Loss) -> Result<f64> {
        self.forward()?;
        self.seed_loss(targets, loss)
    }

    /// Mean loss of the terminal layer against `targets`; seeds its errors
    /// with the loss derivative.
    ///
    /// # Errors
    ///
    /// - [`NetError::Unsupported`] when the terminal layer has no cells or the
    ///   loss/transform pairing is not supported
    /// - [`NetError::NonFiniteLoss`] when the loss is NaN or infinite
    pub fn seed_loss(&mut self, targets: &[f64], loss: Loss) -> Result<f64> {
        let last = self.layers.len() - 1;
        let kind = self.layers[last].kind();
        let output = self.layers[last].as_dense_mut().ok_or_else(|| {
            NetError::Unsupported(format!(
                "output layer must hold cells, found {}",
                kind
            ))
        })?;

        let mean = output.seed_loss(targets, loss)?;
        if !mean.is_finite() {
            warn!(loss = mean, "non-finite loss");
            return Err(NetError::NonFiniteLoss { loss: mean });
        }
        Ok(mean)
    }

    /// Propagate the seeded terminal errors back through every layer.
    ///
    /// Error accumulators of all non-terminal layers and every convolution
    /// gradient are zeroed first. No parameter changes.
    pub fn backward(&mut self) -> Result<()> {
        let last = self.layers.len() - 1;
        for layer in &mut self.layers[..last] {
            layer.reset_errors();
        }
        for layer in &mut self.layers {
            layer.clear_gradients();
        }

        for index in (0..self.layers.len()).rev() {
            let (upstream, rest) = self.layers.split_at_mut(index);
            rest[0].backward(&self.input, upstream)?;
        }
        Ok(())
    }

    /// Gradient descent step with the cached derivatives.
    pub fn update(&mut self, rate: f64) -> Result<()> {
        let mut sgd = SGD::new(rate);
        apply_optimizer(&mut self.layers, &self.input, &mut sgd)
    }

    /// Momentum step: `v = friction * v - rate * grad; param += v`.
    ///
    /// The velocity buffer persists across calls and is sized to the
    /// parameter count on first use.
    pub fn momentum_update(&mut self, rate: f64, friction: f64) -> Result<()> {
        let count = self.parameter_count();
        self.momentum.set_learning_rate(rate);
        self.momentum.set_friction(friction);
        self.momentum.begin_step(count);
        apply_optimizer(&mut self.layers, &self.input, &mut self.momentum)
    }

    /// Update with the rule selected by `config`.
    pub fn step(&mut self, config: &TrainingConfig) -> Result<()> {
        match config.momentum_friction {
            Some(friction) => self.momentum_update(config.learning_rate, friction),
            None => self.update(config.learning_rate),
        }
    }
}

fn apply_optimizer(
    layers: &mut [Layer],
    input: &[f64],
    optimizer: &mut dyn Optimizer,
) -> Result<()> {
    for index in 0..layers.len() {
        let (upstream, rest) = layers.split_at_mut(index);
        rest[0].apply_update(input, upstream, optimizer)?;
    }
    Ok(())
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, layer) in self.layers.iter().enumerate() {
            write!(f, "layer {}: {}", i, layer)?;
        }
        Ok(())
    }
}
