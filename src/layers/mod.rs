//! Layer kinds and dispatch
//!
//! A [`Layer`] holds exactly one of: a bank of cells, a 3x3 convolution unit or
//! a 2x2 max-pool unit. Every kind implements [`LayerOps`]; the enum forwards
//! each call with an exhaustive match.

mod r#trait;
pub mod cell;
pub mod conv2d;
pub mod dense;
pub mod maxpool;

use std::fmt;

pub use cell::{Cell, CellInput};
pub use conv2d::Conv3x3Layer;
pub use dense::{DenseLayer, LayerTransform};
pub use maxpool::MaxPool2x2Layer;
pub use r#trait::LayerOps;

use crate::error::{NetError, Result};
use crate::optimizers::Optimizer;
use crate::utils::SimpleRng;

/// Where a convolution or pooling unit reads its input maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapSource {
    /// The network's external input buffer.
    Data,
    /// Feature maps of an earlier convolution or pooling layer.
    Layer(usize),
}

/// One layer of a network.
#[derive(Debug, Clone)]
pub enum Layer {
    Dense(DenseLayer),
    Conv(Conv3x3Layer),
    Pool(MaxPool2x2Layer),
}

impl Layer {
    pub fn kind(&self) -> &'static str {
        match self {
            Layer::Dense(_) => "dense",
            Layer::Conv(_) => "conv3x3",
            Layer::Pool(_) => "maxpool2x2",
        }
    }

    pub fn as_dense(&self) -> Option<&DenseLayer> {
        match self {
            Layer::Dense(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_dense_mut(&mut self) -> Option<&mut DenseLayer> {
        match self {
            Layer::Dense(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_conv(&self) -> Option<&Conv3x3Layer> {
        match self {
            Layer::Conv(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_conv_mut(&mut self) -> Option<&mut Conv3x3Layer> {
        match self {
            Layer::Conv(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_pool(&self) -> Option<&MaxPool2x2Layer> {
        match self {
            Layer::Pool(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_pool_mut(&mut self) -> Option<&mut MaxPool2x2Layer> {
        match self {
            Layer::Pool(p) => Some(p),
            _ => None,
        }
    }

    /// Flattened output maps of a convolution or pooling layer.
    pub fn feature_maps(&self) -> Option<&[f64]> {
        match self {
            Layer::Dense(_) => None,
            Layer::Conv(c) => Some(c.outputs()),
            Layer::Pool(p) => Some(p.outputs()),
        }
    }

    /// Output maps together with the matching error maps.
    pub(crate) fn maps_and_errors_mut(&mut self) -> Option<(&[f64], &mut [f64])> {
        match self {
            Layer::Dense(_) => None,
            Layer::Conv(c) => Some(c.maps_and_errors_mut()),
            Layer::Pool(p) => Some(p.maps_and_errors_mut()),
        }
    }
}

impl From<DenseLayer> for Layer {
    fn from(layer: DenseLayer) -> Self {
        Layer::Dense(layer)
    }
}

impl From<Conv3x3Layer> for Layer {
    fn from(layer: Conv3x3Layer) -> Self {
        Layer::Conv(layer)
    }
}

impl From<MaxPool2x2Layer> for Layer {
    fn from(layer: MaxPool2x2Layer) -> Self {
        Layer::Pool(layer)
    }
}

impl LayerOps for Layer {
    fn forward(&mut self, data: &[f64], upstream: &[Layer]) -> Result<()> {
        match self {
            Layer::Dense(d) => d.forward(data, upstream),
            Layer::Conv(c) => c.forward(data, upstream),
            Layer::Pool(p) => p.forward(data, upstream),
        }
    }

    fn backward(&mut self, data: &[f64], upstream: &mut [Layer]) -> Result<()> {
        match self {
            Layer::Dense(d) => d.backward(data, upstream),
            Layer::Conv(c) => c.backward(data, upstream),
            Layer::Pool(p) => p.backward(data, upstream),
        }
    }

    fn reset_errors(&mut self) {
        match self {
            Layer::Dense(d) => d.reset_errors(),
            Layer::Conv(c) => c.reset_errors(),
            Layer::Pool(p) => p.reset_errors(),
        }
    }

    fn clear_gradients(&mut self) {
        match self {
            Layer::Dense(d) => d.clear_gradients(),
            Layer::Conv(c) => c.clear_gradients(),
            Layer::Pool(p) => p.clear_gradients(),
        }
    }

    fn apply_update(
        &mut self,
        data: &[f64],
        upstream: &[Layer],
        optimizer: &mut dyn Optimizer,
    ) -> Result<()> {
        match self {
            Layer::Dense(d) => d.apply_update(data, upstream, optimizer),
            Layer::Conv(c) => c.apply_update(data, upstream, optimizer),
            Layer::Pool(p) => p.apply_update(data, upstream, optimizer),
        }
    }

    fn output_size(&self) -> usize {
        match self {
            Layer::Dense(d) => d.output_size(),
            Layer::Conv(c) => c.output_size(),
            Layer::Pool(p) => p.output_size(),
        }
    }

    fn parameter_count(&self) -> usize {
        match self {
            Layer::Dense(d) => d.parameter_count(),
            Layer::Conv(c) => c.parameter_count(),
            Layer::Pool(p) => p.parameter_count(),
        }
    }

    fn randomize(&mut self, rng: &mut SimpleRng) {
        match self {
            Layer::Dense(d) => d.randomize(rng),
            Layer::Conv(c) => c.randomize(rng),
            Layer::Pool(p) => p.randomize(rng),
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::Dense(d) => fmt::Display::fmt(d, f),
            Layer::Conv(c) => fmt::Display::fmt(c, f),
            Layer::Pool(p) => fmt::Display::fmt(p, f),
        }
    }
}

/// Resolve the input maps of a convolution or pooling unit.
pub(crate) fn resolve_maps<'a>(
    source: MapSource,
    expected: usize,
    data: &'a [f64],
    upstream: &'a [Layer],
) -> Result<&'a [f64]> {
    match source {
        MapSource::Data => data.get(..expected).ok_or_else(|| {
            NetError::Wiring(format!(
                "input buffer holds {} values, unit expects {}",
                data.len(),
                expected
            ))
        }),
        MapSource::Layer(index) => {
            let layer = upstream.get(index).ok_or_else(|| not_upstream(index))?;
            let maps = layer.feature_maps().ok_or_else(|| {
                NetError::Wiring(format!(
                    "layer {} ({}) does not produce feature maps",
                    index,
                    layer.kind()
                ))
            })?;
            if maps.len() != expected {
                return Err(NetError::Wiring(format!(
                    "layer {} produces {} values, unit expects {}",
                    index,
                    maps.len(),
                    expected
                )));
            }
            Ok(maps)
        }
    }
}

/// Upstream output maps plus the error maps to back-propagate into.
pub(crate) fn upstream_maps_mut(
    index: usize,
    expected: usize,
    upstream: &mut [Layer],
) -> Result<(&[f64], &mut [f64])> {
    let layer = upstream.get_mut(index).ok_or_else(|| not_upstream(index))?;
    let kind = layer.kind();
    let (maps, errors) = layer.maps_and_errors_mut().ok_or_else(|| {
        NetError::Wiring(format!(
            "layer {} ({}) does not produce feature maps",
            index, kind
        ))
    })?;
    if maps.len() != expected {
        return Err(NetError::Wiring(format!(
            "layer {} produces {} values, unit expects {}",
            index,
            maps.len(),
            expected
        )));
    }
    Ok((maps, errors))
}

pub(crate) fn not_upstream(index: usize) -> NetError {
    NetError::Wiring(format!("layer {} is not upstream of the reading layer", index))
}
