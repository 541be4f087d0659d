//! Activation and loss functions
//!
//! Every activation honours the calling contract
//! `(pre_activation, post_activation, mode) -> f64`, and every loss the
//! contract `(output, target, mode) -> f64`. With [`FuncMode::Normal`] the
//! function returns its value; with [`FuncMode::Derivative`] it returns the
//! derivative, computed from whichever argument the identity needs.
//!
//! - Sigmoid, tanh-sigmoid: derivative from the post-activation value
//! - ReLU, leaky ReLU, step: derivative from the pre-activation value
//! - Softmax: layer-level transform over a whole cell array

use serde::Deserialize;

/// Selects the plain value or the derivative of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncMode {
    Normal,
    Derivative,
}

/// Signature shared by all activation functions.
pub type ActivationFn = fn(f64, f64, FuncMode) -> f64;

/// Signature shared by all loss functions.
pub type LossFn = fn(f64, f64, FuncMode) -> f64;

const LEAKY_RELU_SLOPE: f64 = 0.01;

// Lower bound fed to ln() so a saturated softmax output cannot produce -inf.
const CROSS_ENTROPY_FLOOR: f64 = 1e-300;

/// Sigmoid: `1 / (1 + e^-u)`, derivative `o * (1 - o)` with `o` the output.
pub fn sigmoid(sum: f64, output: f64, mode: FuncMode) -> f64 {
    match mode {
        FuncMode::Normal => 1.0 / (1.0 + (-sum).exp()),
        FuncMode::Derivative => output * (1.0 - output),
    }
}

/// Tanh-sigmoid: `2 / (1 + e^-2u) - 1`, derivative `1 - o²`.
pub fn tan_sigmoid(sum: f64, output: f64, mode: FuncMode) -> f64 {
    match mode {
        FuncMode::Normal => 2.0 / (1.0 + (-2.0 * sum).exp()) - 1.0,
        FuncMode::Derivative => 1.0 - output * output,
    }
}

/// ReLU: `max(u, 0)`, derivative 1 for positive pre-activation, else 0.
pub fn relu(sum: f64, _output: f64, mode: FuncMode) -> f64 {
    match mode {
        FuncMode::Normal => sum.max(0.0),
        FuncMode::Derivative => {
            if sum > 0.0 {
                1.0
            } else {
                0.0
            }
        }
    }
}

/// Leaky ReLU with a fixed 0.01 negative slope.
pub fn leaky_relu(sum: f64, _output: f64, mode: FuncMode) -> f64 {
    let slope = if sum > 0.0 { 1.0 } else { LEAKY_RELU_SLOPE };
    match mode {
        FuncMode::Normal => sum * slope,
        FuncMode::Derivative => slope,
    }
}

/// Step function. Not differentiable: the derivative is reported as 0.
pub fn step(sum: f64, _output: f64, mode: FuncMode) -> f64 {
    match mode {
        FuncMode::Normal => {
            if sum >= 0.0 {
                1.0
            } else {
                0.0
            }
        }
        FuncMode::Derivative => 0.0,
    }
}

/// Squared error `½(o - t)²`, derivative `o - t`.
pub fn loss_mse(output: f64, target: f64, mode: FuncMode) -> f64 {
    let diff = output - target;
    match mode {
        FuncMode::Normal => 0.5 * diff * diff,
        FuncMode::Derivative => diff,
    }
}

/// Cross-entropy term `-t ln(o)`, derivative `-t / o`.
pub fn loss_cross_entropy(output: f64, target: f64, mode: FuncMode) -> f64 {
    let o = output.max(CROSS_ENTROPY_FLOOR);
    match mode {
        FuncMode::Normal => -target * o.ln(),
        FuncMode::Derivative => -target / o,
    }
}

/// Softmax over `sums`, written into `outputs`.
///
/// Uses the max-subtraction trick; mathematically identical to
/// `exp(u_i) / Σ exp(u_j)`.
pub fn softmax(sums: &[f64], outputs: &mut [f64]) {
    assert_eq!(sums.len(), outputs.len(), "softmax length mismatch");
    if sums.is_empty() {
        return;
    }

    let max_value = sums.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let mut total = 0.0;
    for (out, &u) in outputs.iter_mut().zip(sums) {
        *out = (u - max_value).exp();
        total += *out;
    }

    let inv_total = 1.0 / total;
    for out in outputs.iter_mut() {
        *out *= inv_total;
    }
}

/// Per-cell activation attached to a cell.
///
/// Named variants can be selected from JSON (`"sigmoid"`, `"tan_sigmoid"`,
/// `"relu"`, `"leaky_relu"`, `"step"`); `Custom` wraps any function with the
/// same contract.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Sigmoid,
    TanSigmoid,
    Relu,
    LeakyRelu,
    Step,
    #[serde(skip)]
    Custom(ActivationFn),
}

impl Activation {
    /// Evaluate the activation (or its derivative).
    pub fn eval(&self, sum: f64, output: f64, mode: FuncMode) -> f64 {
        let func: ActivationFn = match self {
            Activation::Sigmoid => sigmoid,
            Activation::TanSigmoid => tan_sigmoid,
            Activation::Relu => relu,
            Activation::LeakyRelu => leaky_relu,
            Activation::Step => step,
            Activation::Custom(f) => *f,
        };
        func(sum, output, mode)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Activation::Sigmoid => "sigmoid",
            Activation::TanSigmoid => "tan_sigmoid",
            Activation::Relu => "relu",
            Activation::LeakyRelu => "leaky_relu",
            Activation::Step => "step",
            Activation::Custom(_) => "custom",
        }
    }
}

/// Loss applied to the terminal layer.
///
/// The network averages the per-unit values over the unit count, so every
/// loss here is of "mean" type.
#[derive(Debug, Clone, Copy, Deserialize)]
pub enum Loss {
    #[serde(rename = "mse")]
    MeanSquaredError,
    #[serde(rename = "cross_entropy")]
    CrossEntropy,
    #[serde(skip)]
    Custom(LossFn),
}

impl Loss {
    /// Per-unit loss (or its derivative with respect to `output`).
    pub fn eval(&self, output: f64, target: f64, mode: FuncMode) -> f64 {
        let func: LossFn = match self {
            Loss::MeanSquaredError => loss_mse,
            Loss::CrossEntropy => loss_cross_entropy,
            Loss::Custom(f) => *f,
        };
        func(output, target, mode)
    }

    pub fn is_cross_entropy(&self) -> bool {
        matches!(self, Loss::CrossEntropy)
    }
}
