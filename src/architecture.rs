//! Architecture configuration structures
//!
//! Describes a network as an ordered list of layers in JSON. Each layer reads
//! from the layer directly before it (the first layer reads the input
//! buffer), so only output sizes are given and input dimensions are inferred.
//!
//! # Example
//!
//! ```json
//! {
//!   "input_width": 6,
//!   "input_height": 6,
//!   "layers": [
//!     { "layer_type": "conv3x3", "filters": 2 },
//!     { "layer_type": "maxpool2x2" },
//!     { "layer_type": "dense", "cells": 4, "activation": "sigmoid" },
//!     { "layer_type": "dense", "cells": 3, "transform": "softmax" }
//!   ]
//! }
//! ```

use serde::Deserialize;
use std::error::Error;
use std::fs;

use crate::config::invalid;
use crate::layers::{
    Cell, CellInput, Conv3x3Layer, DenseLayer, Layer, LayerTransform, MapSource, MaxPool2x2Layer,
};
use crate::network::Network;
use crate::utils::{Activation, SimpleRng};

/// One layer of an [`ArchitectureConfig`].
///
/// - **dense**: requires `cells`; optional `activation` or `transform`
/// - **conv3x3**: requires `filters`; input must be a single map
/// - **maxpool2x2**: no fields, pools every incoming map
#[derive(Debug, Clone, Deserialize)]
pub struct LayerConfig {
    /// "dense", "conv3x3" or "maxpool2x2"
    pub layer_type: String,

    /// Cell count of a dense layer.
    #[serde(default)]
    pub cells: Option<usize>,

    /// Per-cell activation of a dense layer; linear when absent.
    #[serde(default)]
    pub activation: Option<Activation>,

    /// Layer-level transform of a dense layer.
    #[serde(default)]
    pub transform: Option<LayerTransform>,

    /// Filter count of a convolution layer.
    #[serde(default)]
    pub filters: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchitectureConfig {
    pub input_width: usize,

    /// Defaults to 1 for flat inputs.
    #[serde(default = "default_input_height")]
    pub input_height: usize,

    pub layers: Vec<LayerConfig>,
}

fn default_input_height() -> usize {
    1
}

/// What flows out of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// `maps` feature maps of `width x height`.
    Maps {
        maps: usize,
        width: usize,
        height: usize,
    },
    /// Outputs of a dense layer.
    Cells(usize),
}

impl Shape {
    pub fn size(&self) -> usize {
        match *self {
            Shape::Maps {
                maps,
                width,
                height,
            } => maps * width * height,
            Shape::Cells(n) => n,
        }
    }
}

/// Loads an architecture configuration from a JSON file.
///
/// # Examples
///
/// ```no_run
/// use cellnet::architecture::load_architecture;
///
/// let arch = load_architecture("config/architectures/parity.json").unwrap();
/// assert!(!arch.layers.is_empty());
/// ```
pub fn load_architecture(path: &str) -> Result<ArchitectureConfig, Box<dyn Error>> {
    let contents = fs::read_to_string(path)?;
    let config: ArchitectureConfig = serde_json::from_str(&contents)?;
    validate_architecture(&config)?;
    Ok(config)
}

/// Checks the layer list and that every layer fits the shape produced by the
/// layer before it.
pub fn validate_architecture(config: &ArchitectureConfig) -> Result<(), Box<dyn Error>> {
    infer_shapes(config).map(|_| ())
}

/// Output shape of every layer, in order.
pub fn infer_shapes(config: &ArchitectureConfig) -> Result<Vec<Shape>, Box<dyn Error>> {
    if config.layers.is_empty() {
        return Err(invalid("Architecture must have at least one layer"));
    }
    if config.input_width == 0 || config.input_height == 0 {
        return Err(invalid("input_width and input_height must be positive"));
    }

    let mut current = Shape::Maps {
        maps: 1,
        width: config.input_width,
        height: config.input_height,
    };
    let mut shapes = Vec::with_capacity(config.layers.len());
    let last = config.layers.len() - 1;
    for (i, layer) in config.layers.iter().enumerate() {
        if layer.transform.is_some() && i != last {
            return Err(invalid(format!(
                "Layer {}: a transform is only allowed on the output layer",
                i
            )));
        }
        current = next_shape(layer, current, i)?;
        shapes.push(current);
    }

    if !matches!(current, Shape::Cells(_)) {
        return Err(invalid("The last layer must be a dense layer"));
    }
    Ok(shapes)
}

fn next_shape(layer: &LayerConfig, input: Shape, index: usize) -> Result<Shape, Box<dyn Error>> {
    match layer.layer_type.to_lowercase().as_str() {
        "dense" => {
            let cells = layer.cells.unwrap_or(0);
            if cells == 0 {
                return Err(invalid(format!(
                    "Layer {}: dense layer needs a positive cell count",
                    index
                )));
            }
            if layer.transform.is_some() && layer.activation.is_some() {
                return Err(invalid(format!(
                    "Layer {}: a transform layer must not set an activation",
                    index
                )));
            }
            Ok(Shape::Cells(cells))
        }
        "conv3x3" => {
            let filters = layer.filters.unwrap_or(0);
            if filters == 0 {
                return Err(invalid(format!(
                    "Layer {}: conv3x3 needs a positive filter count",
                    index
                )));
            }
            match input {
                Shape::Maps {
                    maps: 1,
                    width,
                    height,
                } if width >= 3 && height >= 3 => Ok(Shape::Maps {
                    maps: filters,
                    width: width - 2,
                    height: height - 2,
                }),
                Shape::Maps { maps: 1, width, height } => Err(invalid(format!(
                    "Layer {}: conv3x3 input {}x{} is smaller than 3x3",
                    index, width, height
                ))),
                Shape::Maps { maps, .. } => Err(invalid(format!(
                    "Layer {}: conv3x3 reads a single map, got {}",
                    index, maps
                ))),
                Shape::Cells(_) => Err(invalid(format!(
                    "Layer {}: conv3x3 cannot follow a dense layer",
                    index
                ))),
            }
        }
        "maxpool2x2" => match input {
            Shape::Maps {
                maps,
                width,
                height,
            } if width >= 2 && height >= 2 => Ok(Shape::Maps {
                maps,
                width: width / 2,
                height: height / 2,
            }),
            Shape::Maps { width, height, .. } => Err(invalid(format!(
                "Layer {}: maxpool2x2 input {}x{} is smaller than 2x2",
                index, width, height
            ))),
            Shape::Cells(_) => Err(invalid(format!(
                "Layer {}: maxpool2x2 cannot follow a dense layer",
                index
            ))),
        },
        other => Err(invalid(format!(
            "Layer {}: unknown layer_type '{}'",
            index, other
        ))),
    }
}

/// Build a network from a validated configuration and draw its parameters
/// from `rng`.
pub fn build_network(
    config: &ArchitectureConfig,
    rng: &mut SimpleRng,
) -> Result<Network, Box<dyn Error>> {
    let shapes = infer_shapes(config)?;
    let mut layers: Vec<Layer> = Vec::with_capacity(config.layers.len());
    let mut input = Shape::Maps {
        maps: 1,
        width: config.input_width,
        height: config.input_height,
    };

    for (index, (layer, &shape)) in config.layers.iter().zip(&shapes).enumerate() {
        let source = if index == 0 {
            MapSource::Data
        } else {
            MapSource::Layer(index - 1)
        };

        let built: Layer = match shape {
            Shape::Cells(cells) => {
                let wiring = match (input, source) {
                    (Shape::Cells(n), MapSource::Layer(prev)) => CellInput::all_cells(prev, n),
                    (Shape::Maps { .. }, MapSource::Layer(prev)) => CellInput::Maps { layer: prev },
                    (_, MapSource::Data) => CellInput::Data,
                };
                let template = Cell::new(input.size(), Some(wiring), None, 0.0, layer.activation)?;
                let dense = DenseLayer::new(cells, &template)?;
                match layer.transform {
                    Some(t) => dense.with_transform(t)?.into(),
                    None => dense.into(),
                }
            }
            Shape::Maps { maps, .. } => match input {
                Shape::Maps {
                    maps: in_maps,
                    width,
                    height,
                } if layer.layer_type.eq_ignore_ascii_case("maxpool2x2") => {
                    MaxPool2x2Layer::new(in_maps, width, height, source)?.into()
                }
                Shape::Maps { width, height, .. } => {
                    Conv3x3Layer::new(maps, width, height, source)?.into()
                }
                Shape::Cells(_) => {
                    return Err(invalid(format!(
                        "Layer {}: feature maps cannot follow a dense layer",
                        index
                    )))
                }
            },
        };
        layers.push(built);
        input = shape;
    }

    let mut network = Network::new(layers)?;
    network.init_params(rng);
    Ok(network)
}
