//! Cell-level neural network engine
//!
//! Networks are built from individually addressable cells grouped into dense
//! layers, plus 3x3 convolution and 2x2 max-pool layers for small image
//! pipelines. Training is split into explicit forward, backward and update
//! steps, and a central-difference gradient checker verifies the analytic
//! derivatives.
//!
//! # Modules
//!
//! - `layers`: cells, dense/convolution/pooling layers and their dispatch
//! - `network`: layer orchestration and the three training phases
//! - `gradient_check`: snapshot/restore and numeric gradient checking
//! - `optimizers`: gradient descent and momentum update rules
//! - `training`: per-sample training loop
//! - `utils`: activation/loss functions and the seeded RNG
//! - `config`: training configuration
//! - `architecture`: JSON architecture description and network building
//! - `error`: the crate error type

pub mod architecture;
pub mod config;
pub mod error;
pub mod gradient_check;
pub mod layers;
pub mod network;
pub mod optimizers;
pub mod training;
pub mod utils;

pub use error::{NetError, Result};
pub use gradient_check::{GradientCheck, GradientReport};
pub use network::Network;
