//! Error type shared by every engine operation.
//!
//! Construction, wiring and numerical failures are all reported through
//! [`NetError`] so callers can tell a badly built model apart from a
//! training run that diverged.

/// Errors produced while building, running or checking a network.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum NetError {
    /// Invalid dimensions or arity at construction time.
    #[error("construction error: {0}")]
    Construction(String),

    /// A cell or unit whose input source cannot be resolved when it runs.
    #[error("wiring error: {0}")]
    Wiring(String),

    /// The loss came back NaN or infinite. Training cannot continue.
    #[error("non-finite loss {loss}: learning rate too large or input not normalized?")]
    NonFiniteLoss { loss: f64 },

    /// Analytic and central-difference gradients disagree.
    #[error(
        "gradient mismatch at layer {layer}, cell {cell}, {param}: analytic {analytic:e}, numeric {numeric:e}"
    )]
    GradientMismatch {
        layer: usize,
        cell: usize,
        param: String,
        analytic: f64,
        numeric: f64,
    },

    /// A configuration the engine does not support (e.g. softmax without cross-entropy).
    #[error("unsupported configuration: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, NetError>;
