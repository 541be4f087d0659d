//! Shared utilities: activation/loss functions and the seeded RNG.

pub mod activations;
pub mod rng;

pub use activations::{Activation, ActivationFn, FuncMode, Loss, LossFn};
pub use rng::SimpleRng;
