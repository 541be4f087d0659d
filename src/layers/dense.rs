//! Dense layer: a bank of cells
//!
//! Cells are cloned from a template, so every cell shares the same wiring
//! pattern but owns its weights. An optional layer-level transform (softmax)
//! runs after the per-cell forward pass and writes into a separate
//! `layer outputs` buffer, leaving each cell's own `output` untouched.

use std::fmt;

use serde::Deserialize;

use crate::error::{NetError, Result};
use crate::layers::cell::{Cell, CellInput};
use crate::layers::{not_upstream, Layer, LayerOps};
use crate::optimizers::Optimizer;
use crate::utils::activations::{softmax, FuncMode, Loss};
use crate::utils::SimpleRng;

/// Transform applied across all cells of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerTransform {
    /// `exp(sum_i) / Σ_j exp(sum_j)`
    Softmax,
}

/// A homogeneous group of cells.
///
/// # Example
///
/// ```ignore
/// use cellnet::layers::{Cell, CellInput, DenseLayer};
/// use cellnet::utils::Activation;
///
/// let template = Cell::new(784, Some(CellInput::Data), None, 0.0, Some(Activation::Relu))?;
/// let layer = DenseLayer::new(20, &template)?;
/// assert_eq!(layer.len(), 20);
/// ```
#[derive(Debug, Clone)]
pub struct DenseLayer {
    cells: Vec<Cell>,
    transform: Option<LayerTransform>,
    layer_outputs: Vec<f64>,
    // Reused buffers: gathered upstream outputs, softmax inputs, weight gradients.
    scratch: Vec<f64>,
    transform_inputs: Vec<f64>,
    grads: Vec<f64>,
}

impl DenseLayer {
    /// Clone `template` `nc` times.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Construction`] when `nc` is zero.
    pub fn new(nc: usize, template: &Cell) -> Result<Self> {
        if nc == 0 {
            return Err(NetError::Construction(
                "dense layer needs at least one cell".to_string(),
            ));
        }
        Self::from_cells(vec![template.clone(); nc])
    }

    /// Build a layer from individually configured cells.
    pub fn from_cells(cells: Vec<Cell>) -> Result<Self> {
        if cells.is_empty() {
            return Err(NetError::Construction(
                "dense layer needs at least one cell".to_string(),
            ));
        }
        let nc = cells.len();
        let max_nin = cells.iter().map(Cell::nin).max().unwrap_or(0);
        Ok(Self {
            cells,
            transform: None,
            layer_outputs: Vec::new(),
            scratch: Vec::with_capacity(max_nin),
            transform_inputs: Vec::with_capacity(nc),
            grads: vec![0.0; max_nin],
        })
    }

    /// Attach a layer-level transform.
    ///
    /// # Errors
    ///
    /// Softmax carries the non-linearity itself, so every cell must be linear;
    /// a cell with an activation yields [`NetError::Construction`].
    pub fn with_transform(mut self, transform: LayerTransform) -> Result<Self> {
        if let Some(i) = self.cells.iter().position(|c| c.activation().is_some()) {
            return Err(NetError::Construction(format!(
                "{:?} transform requires linear cells, cell {} has an activation",
                transform, i
            )));
        }
        self.transform = Some(transform);
        self.layer_outputs = vec![0.0; self.cells.len()];
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cell(&self, index: usize) -> Option<&Cell> {
        self.cells.get(index)
    }

    pub fn cell_mut(&mut self, index: usize) -> Option<&mut Cell> {
        self.cells.get_mut(index)
    }

    pub fn transform(&self) -> Option<LayerTransform> {
        self.transform
    }

    /// Output `i` of the layer: the transformed value when a transform is
    /// attached, the cell's own output otherwise.
    pub fn output(&self, index: usize) -> Option<f64> {
        match self.transform {
            Some(_) => self.layer_outputs.get(index).copied(),
            None => self.cells.get(index).map(|c| c.output()),
        }
    }

    pub fn outputs(&self) -> Vec<f64> {
        match self.transform {
            Some(_) => self.layer_outputs.clone(),
            None => self.cells.iter().map(|c| c.output()).collect(),
        }
    }

    /// Buffer written by the layer transform (empty without one).
    pub fn layer_outputs(&self) -> &[f64] {
        &self.layer_outputs
    }

    /// Mean of the per-unit loss of the current outputs against `targets`.
    pub fn mean_loss(&self, targets: &[f64], loss: Loss) -> Result<f64> {
        if targets.len() != self.cells.len() {
            return Err(NetError::Unsupported(format!(
                "{} targets for an output layer of {} cells",
                targets.len(),
                self.cells.len()
            )));
        }
        let total: f64 = self
            .outputs()
            .iter()
            .zip(targets)
            .map(|(&o, &t)| loss.eval(o, t, FuncMode::Normal))
            .sum();
        Ok(total / self.cells.len() as f64)
    }

    /// Mean loss over the layer, seeding each cell's error with dLoss/d(output).
    ///
    /// Cross-entropy on a softmax layer takes the algebraic shortcut
    /// `error_i = layer_output_i - target_i`, which is already dE/d(sum).
    ///
    /// # Errors
    ///
    /// [`NetError::Unsupported`] for a target length mismatch, cross-entropy
    /// without softmax, or softmax with any other loss.
    pub fn seed_loss(&mut self, targets: &[f64], loss: Loss) -> Result<f64> {
        let mean = self.mean_loss(targets, loss)?;
        match (self.transform, loss.is_cross_entropy()) {
            (Some(LayerTransform::Softmax), true) => {
                for ((cell, &y), &t) in self.cells.iter_mut().zip(&self.layer_outputs).zip(targets)
                {
                    cell.set_error(y - t);
                }
            }
            (Some(LayerTransform::Softmax), false) => {
                return Err(NetError::Unsupported(
                    "softmax output layer requires the cross-entropy loss".to_string(),
                ))
            }
            (None, true) => {
                return Err(NetError::Unsupported(
                    "cross-entropy loss requires a softmax output layer".to_string(),
                ))
            }
            (None, false) => {
                for (cell, &t) in self.cells.iter_mut().zip(targets) {
                    let o = cell.output();
                    cell.set_error(loss.eval(o, t, FuncMode::Derivative));
                }
            }
        }
        Ok(mean)
    }

    /// dE/d(weight) (or dE/d(bias) when `param == nin`) of one cell, from the
    /// current caches.
    pub(crate) fn param_gradient(
        &mut self,
        index: usize,
        param: usize,
        data: &[f64],
        upstream: &[Layer],
    ) -> Result<f64> {
        let DenseLayer { cells, scratch, .. } = self;
        let cell = cells
            .get(index)
            .ok_or_else(|| NetError::Wiring(format!("no cell {}", index)))?;
        if param == cell.nin() {
            return Ok(cell.bias_gradient());
        }
        let inputs = resolve_inputs(cell.input(), cell.nin(), data, upstream, scratch)?;
        Ok(inputs[param] * cell.error())
    }

    pub(crate) fn cells_mut(&mut self) -> &mut [Cell] {
        &mut self.cells
    }

    pub(crate) fn snapshot_len(&self) -> usize {
        self.cells.iter().map(Cell::snapshot_len).sum::<usize>() + self.layer_outputs.len()
    }

    /// Write cells then layer outputs into `buf`; returns the count written.
    pub(crate) fn save_into(&self, buf: &mut [f64]) -> usize {
        let mut offset = 0;
        for cell in &self.cells {
            let n = cell.snapshot_len();
            cell.save_into(&mut buf[offset..offset + n]);
            offset += n;
        }
        let n = self.layer_outputs.len();
        buf[offset..offset + n].copy_from_slice(&self.layer_outputs);
        offset + n
    }

    /// Exact inverse of [`DenseLayer::save_into`].
    pub(crate) fn restore_from(&mut self, buf: &[f64]) -> usize {
        let mut offset = 0;
        for cell in &mut self.cells {
            let n = cell.snapshot_len();
            cell.restore_from(&buf[offset..offset + n]);
            offset += n;
        }
        let n = self.layer_outputs.len();
        self.layer_outputs.copy_from_slice(&buf[offset..offset + n]);
        offset + n
    }
}

impl LayerOps for DenseLayer {
    fn forward(&mut self, data: &[f64], upstream: &[Layer]) -> Result<()> {
        let DenseLayer {
            cells,
            transform,
            layer_outputs,
            scratch,
            transform_inputs,
            ..
        } = self;

        for cell in cells.iter_mut() {
            let inputs = resolve_inputs(cell.input(), cell.nin(), data, upstream, scratch)?;
            cell.forward(inputs)?;
        }

        if let Some(LayerTransform::Softmax) = transform {
            transform_inputs.clear();
            transform_inputs.extend(cells.iter().map(Cell::output));
            softmax(transform_inputs.as_slice(), layer_outputs.as_mut_slice());
        }
        Ok(())
    }

    fn backward(&mut self, _data: &[f64], upstream: &mut [Layer]) -> Result<()> {
        for cell in &mut self.cells {
            let delta = cell.compose_error();
            propagate_error(cell, delta, upstream)?;
        }
        Ok(())
    }

    fn reset_errors(&mut self) {
        for cell in &mut self.cells {
            cell.set_error(0.0);
        }
    }

    fn apply_update(
        &mut self,
        data: &[f64],
        upstream: &[Layer],
        optimizer: &mut dyn Optimizer,
    ) -> Result<()> {
        let DenseLayer {
            cells,
            scratch,
            grads,
            ..
        } = self;

        for cell in cells.iter_mut() {
            let nin = cell.nin();
            let inputs = resolve_inputs(cell.input(), nin, data, upstream, scratch)?;
            grads.resize(nin, 0.0);
            cell.weight_gradients(inputs, grads);
            optimizer.update(cell.weights_mut(), &grads[..nin]);

            let mut bias = [cell.bias()];
            optimizer.update(&mut bias, &[cell.bias_gradient()]);
            cell.set_bias(bias[0]);
        }
        Ok(())
    }

    fn output_size(&self) -> usize {
        self.cells.len()
    }

    fn parameter_count(&self) -> usize {
        self.cells.iter().map(|c| c.nin() + 1).sum()
    }

    fn randomize(&mut self, rng: &mut SimpleRng) {
        for cell in &mut self.cells {
            cell.randomize(rng);
        }
    }
}

impl fmt::Display for DenseLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dense: {} cells", self.cells.len())?;
        if let Some(t) = self.transform {
            write!(f, ", {:?}", t)?;
        }
        writeln!(f)?;
        for (i, cell) in self.cells.iter().enumerate() {
            writeln!(f, "  cell[{}]: {}", i, cell)?;
        }
        Ok(())
    }
}

/// Resolve the input values of one cell.
///
/// Data and feature-map sources are read in place; upstream cell outputs are
/// gathered into `scratch`.
fn resolve_inputs<'a>(
    input: Option<&CellInput>,
    nin: usize,
    data: &'a [f64],
    upstream: &'a [Layer],
    scratch: &'a mut Vec<f64>,
) -> Result<&'a [f64]> {
    match input {
        None => Err(NetError::Wiring(
            "cell has neither input data nor upstream cells".to_string(),
        )),
        Some(CellInput::Data) => data.get(..nin).ok_or_else(|| {
            NetError::Wiring(format!(
                "input buffer holds {} values, cell expects {}",
                data.len(),
                nin
            ))
        }),
        Some(CellInput::Cells { layer, cells }) => {
            let dense = upstream_dense(*layer, upstream)?;
            scratch.clear();
            for &index in cells {
                let cell = dense.cells.get(index).ok_or_else(|| {
                    NetError::Wiring(format!("layer {} has no cell {}", layer, index))
                })?;
                scratch.push(cell.output());
            }
            Ok(scratch.as_slice())
        }
        Some(CellInput::Maps { layer }) => {
            let source = upstream.get(*layer).ok_or_else(|| not_upstream(*layer))?;
            let maps = source.feature_maps().ok_or_else(|| {
                NetError::Wiring(format!("layer {} is dense, expected feature maps", layer))
            })?;
            if maps.len() != nin {
                return Err(NetError::Wiring(format!(
                    "layer {} produces {} values, cell expects {}",
                    layer,
                    maps.len(),
                    nin
                )));
            }
            Ok(maps)
        }
    }
}

fn upstream_dense(layer: usize, upstream: &[Layer]) -> Result<&DenseLayer> {
    let source = upstream.get(layer).ok_or_else(|| not_upstream(layer))?;
    source.as_dense().ok_or_else(|| {
        NetError::Wiring(format!(
            "layer {} ({}) holds no cells",
            layer,
            source.kind()
        ))
    })
}

/// Accumulate `weight_i * delta` into whatever produced input `i`.
fn propagate_error(cell: &Cell, delta: f64, upstream: &mut [Layer]) -> Result<()> {
    match cell.input() {
        None => Err(NetError::Wiring(
            "cell has neither input data nor upstream cells".to_string(),
        )),
        Some(CellInput::Data) => Ok(()),
        Some(CellInput::Cells { layer, cells }) => {
            let source = upstream.get_mut(*layer).ok_or_else(|| not_upstream(*layer))?;
            let kind = source.kind();
            let dense = source.as_dense_mut().ok_or_else(|| {
                NetError::Wiring(format!("layer {} ({}) holds no cells", layer, kind))
            })?;
            for (&index, &w) in cells.iter().zip(cell.weights()) {
                let upstream_cell = dense.cells.get_mut(index).ok_or_else(|| {
                    NetError::Wiring(format!("layer {} has no cell {}", layer, index))
                })?;
                upstream_cell.add_error(w * delta);
            }
            Ok(())
        }
        Some(CellInput::Maps { layer }) => {
            let (_, errors) = crate::layers::upstream_maps_mut(*layer, cell.nin(), upstream)?;
            for (e, &w) in errors.iter_mut().zip(cell.weights()) {
                *e += w * delta;
            }
            Ok(())
        }
    }
}
