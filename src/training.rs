//! Per-sample training loop
//!
//! Each sample runs forward with loss, backward and one update step, so the
//! parameters move after every sample. An epoch visits the samples in the
//! given order.

use tracing::info;

use crate::config::TrainingConfig;
use crate::error::Result;
use crate::network::Network;

/// One input/target pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub input: Vec<f64>,
    pub target: Vec<f64>,
}

impl Sample {
    pub fn new(input: impl Into<Vec<f64>>, target: impl Into<Vec<f64>>) -> Self {
        Self {
            input: input.into(),
            target: target.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingSummary {
    pub epochs: usize,
    /// Mean per-sample loss of the last epoch.
    pub mean_error: f64,
    pub converged: bool,
}

/// Mean loss over `samples` without touching the parameters.
pub fn evaluate(net: &mut Network, samples: &[Sample], config: &TrainingConfig) -> Result<f64> {
    if samples.is_empty() {
        return Ok(0.0);
    }
    let mut total = 0.0;
    for sample in samples {
        net.set_input(&sample.input);
        total += net.forward_with_loss(&sample.target, config.loss)?;
    }
    Ok(total / samples.len() as f64)
}

/// Train until the mean epoch error drops below `config.error_limit` or
/// `config.max_epochs` is reached.
///
/// # Errors
///
/// Stops at the first failing pass; a non-finite loss aborts training.
pub fn train(
    net: &mut Network,
    samples: &[Sample],
    config: &TrainingConfig,
) -> Result<TrainingSummary> {
    let mut summary = TrainingSummary {
        epochs: 0,
        mean_error: f64::INFINITY,
        converged: false,
    };
    if samples.is_empty() {
        return Ok(summary);
    }

    for epoch in 1..=config.max_epochs {
        let mut total = 0.0;
        for sample in samples {
            net.set_input(&sample.input);
            total += net.forward_with_loss(&sample.target, config.loss)?;
            net.backward()?;
            net.step(config)?;
        }

        summary.epochs = epoch;
        summary.mean_error = total / samples.len() as f64;

        if let Some(interval) = config.log_interval {
            if epoch % interval == 0 {
                info!(epoch, mean_error = summary.mean_error, "training progress");
            }
        }

        if summary.mean_error < config.error_limit {
            summary.converged = true;
            break;
        }
    }

    info!(
        epochs = summary.epochs,
        mean_error = summary.mean_error,
        converged = summary.converged,
        "training finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{Cell, CellInput, DenseLayer};

    fn single_cell() -> Network {
        let cell = Cell::new(1, Some(CellInput::Data), Some(&[0.0]), 0.0, None).unwrap();
        Network::new(vec![DenseLayer::new(1, &cell).unwrap().into()]).unwrap()
    }

    #[test]
    fn test_learns_linear_map() {
        let mut net = single_cell();
        let samples = vec![
            Sample::new(vec![1.0], vec![2.0]),
            Sample::new(vec![-1.0], vec![-2.0]),
        ];
        let mut cfg = TrainingConfig::new(0.1);
        cfg.error_limit = 1e-8;

        let summary = train(&mut net, &samples, &cfg).unwrap();
        assert!(summary.converged);
        assert!(evaluate(&mut net, &samples, &cfg).unwrap() < 1e-8);
    }

    #[test]
    fn test_respects_epoch_cap() {
        let mut net = single_cell();
        let samples = vec![Sample::new(vec![1.0], vec![5.0])];
        let mut cfg = TrainingConfig::new(1e-6);
        cfg.max_epochs = 3;

        let summary = train(&mut net, &samples, &cfg).unwrap();
        assert_eq!(summary.epochs, 3);
        assert!(!summary.converged);
    }

    #[test]
    fn test_empty_sample_set() {
        let mut net = single_cell();
        let summary = train(&mut net, &[], &TrainingConfig::new(0.1)).unwrap();
        assert_eq!(summary.epochs, 0);
    }
}
