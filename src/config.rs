//! Configuration structures for training
//!
//! Learning rate, momentum friction and the stopping rule travel as an
//! explicit [`TrainingConfig`] value instead of process-wide state. The same
//! structure can be loaded from a JSON file.

use serde::Deserialize;
use std::error::Error;
use std::fs;

use crate::utils::Loss;

/// Training hyper-parameters.
///
/// `momentum_friction` selects the update rule: absent means plain gradient
/// descent, present means the momentum rule with that friction.
///
/// # Example
///
/// ```json
/// {
///   "learning_rate": 0.05,
///   "momentum_friction": 0.9,
///   "loss": "mse",
///   "error_limit": 0.001,
///   "max_epochs": 20000,
///   "seed": 7
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct TrainingConfig {
    pub learning_rate: f64,

    #[serde(default)]
    pub momentum_friction: Option<f64>,

    /// "mse" or "cross_entropy"
    #[serde(default = "default_loss")]
    pub loss: Loss,

    /// Training stops once the mean epoch error falls below this value.
    #[serde(default = "default_error_limit")]
    pub error_limit: f64,

    #[serde(default = "default_max_epochs")]
    pub max_epochs: usize,

    /// Seed for parameter initialization; the clock is used when absent.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Log progress every this many epochs.
    #[serde(default)]
    pub log_interval: Option<usize>,
}

fn default_loss() -> Loss {
    Loss::MeanSquaredError
}

fn default_error_limit() -> f64 {
    1e-3
}

fn default_max_epochs() -> usize {
    10_000
}

impl TrainingConfig {
    /// Plain gradient descent on the MSE loss with default stopping rules.
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            momentum_friction: None,
            loss: default_loss(),
            error_limit: default_error_limit(),
            max_epochs: default_max_epochs(),
            seed: None,
            log_interval: None,
        }
    }

    pub fn with_momentum(mut self, friction: f64) -> Self {
        self.momentum_friction = Some(friction);
        self
    }

    pub fn with_loss(mut self, loss: Loss) -> Self {
        self.loss = loss;
        self
    }
}

/// Loads a training configuration from a JSON file.
///
/// # Examples
///
/// ```no_run
/// use cellnet::config::load_config;
///
/// let cfg = load_config("config/parity.json").unwrap();
/// assert!(cfg.learning_rate > 0.0);
/// ```
pub fn load_config(path: &str) -> Result<TrainingConfig, Box<dyn Error>> {
    let contents = fs::read_to_string(path)?;
    let config: TrainingConfig = serde_json::from_str(&contents)?;
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &TrainingConfig) -> Result<(), Box<dyn Error>> {
    if !(config.learning_rate.is_finite() && config.learning_rate > 0.0) {
        return Err(invalid("learning_rate must be positive"));
    }

    if let Some(friction) = config.momentum_friction {
        if !(0.0..1.0).contains(&friction) {
            return Err(invalid("momentum_friction must be in [0, 1)"));
        }
    }

    if !(config.error_limit.is_finite() && config.error_limit > 0.0) {
        return Err(invalid("error_limit must be positive"));
    }

    if config.max_epochs == 0 {
        return Err(invalid("max_epochs must be at least 1"));
    }

    if config.log_interval == Some(0) {
        return Err(invalid("log_interval must be at least 1"));
    }

    Ok(())
}

pub(crate) fn invalid(message: impl Into<String>) -> Box<dyn Error> {
    Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        message.into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let cfg: TrainingConfig = serde_json::from_str(r#"{"learning_rate": 0.1}"#).unwrap();
        assert_eq!(cfg.learning_rate, 0.1);
        assert!(cfg.momentum_friction.is_none());
        assert!(matches!(cfg.loss, Loss::MeanSquaredError));
        assert_eq!(cfg.error_limit, 1e-3);
        assert_eq!(cfg.max_epochs, 10_000);
        assert!(validate_config(&cfg).is_ok());
    }

    #[test]
    fn test_cross_entropy_name() {
        let cfg: TrainingConfig =
            serde_json::from_str(r#"{"learning_rate": 0.1, "loss": "cross_entropy"}"#).unwrap();
        assert!(cfg.loss.is_cross_entropy());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(validate_config(&TrainingConfig::new(0.0)).is_err());
        assert!(validate_config(&TrainingConfig::new(0.1).with_momentum(1.0)).is_err());
        assert!(validate_config(&TrainingConfig::new(0.1).with_momentum(-0.1)).is_err());

        let mut cfg = TrainingConfig::new(0.1);
        cfg.max_epochs = 0;
        assert!(validate_config(&cfg).is_err());
    }
}
