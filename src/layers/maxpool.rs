//! 2x2 max pooling layer
//!
//! Reduces each of `nf` input maps by taking the maximum of every
//! non-overlapping 2x2 block. An odd trailing row or column is dropped.

use std::fmt;

use crate::error::{NetError, Result};
use crate::layers::{resolve_maps, upstream_maps_mut, Conv3x3Layer, Layer, LayerOps, MapSource};
use crate::optimizers::Optimizer;
use crate::utils::SimpleRng;

/// Non-parametric 2x2 max pooling unit.
#[derive(Debug, Clone)]
pub struct MaxPool2x2Layer {
    nf: usize,
    imw: usize,
    imh: usize,
    ow: usize,
    oh: usize,
    source: MapSource,
    outputs: Vec<f64>,
    errors: Vec<f64>,
}

impl MaxPool2x2Layer {
    /// # Errors
    ///
    /// [`NetError::Construction`] when `nf` is zero or either input dimension
    /// is below 2.
    pub fn new(nf: usize, imw: usize, imh: usize, source: MapSource) -> Result<Self> {
        if nf == 0 {
            return Err(NetError::Construction(
                "pooling needs at least one map".to_string(),
            ));
        }
        if imw < 2 || imh < 2 {
            return Err(NetError::Construction(format!(
                "pooling input {}x{} is smaller than the 2x2 window",
                imw, imh
            )));
        }

        let ow = imw / 2;
        let oh = imh / 2;
        Ok(Self {
            nf,
            imw,
            imh,
            ow,
            oh,
            source,
            outputs: vec![0.0; nf * ow * oh],
            errors: vec![0.0; nf * ow * oh],
        })
    }

    /// Pool the maps of the convolution stored at network position `layer`.
    pub fn after_conv(conv: &Conv3x3Layer, layer: usize) -> Result<Self> {
        Self::new(
            conv.filter_count(),
            conv.output_width(),
            conv.output_height(),
            MapSource::Layer(layer),
        )
    }

    pub fn map_count(&self) -> usize {
        self.nf
    }

    pub fn output_width(&self) -> usize {
        self.ow
    }

    pub fn output_height(&self) -> usize {
        self.oh
    }

    pub fn source(&self) -> MapSource {
        self.source
    }

    pub fn outputs(&self) -> &[f64] {
        &self.outputs
    }

    pub fn errors(&self) -> &[f64] {
        &self.errors
    }

    pub fn errors_mut(&mut self) -> &mut [f64] {
        &mut self.errors
    }

    pub(crate) fn maps_and_errors_mut(&mut self) -> (&[f64], &mut [f64]) {
        (&self.outputs, &mut self.errors)
    }

    fn input_len(&self) -> usize {
        self.nf * self.imw * self.imh
    }

    /// Copy each pooled pixel's error to every position of its block that
    /// holds the block maximum in `input`. Other positions are left as is.
    ///
    /// # Errors
    ///
    /// [`NetError::Wiring`] when either slice is shorter than the pooled maps.
    pub fn route_error(&self, input: &[f64], upstream_errors: &mut [f64]) -> Result<()> {
        let needed = self.input_len();
        if input.len() < needed || upstream_errors.len() < needed {
            return Err(NetError::Wiring(format!(
                "pooling routes {} values, got input {} and error map {}",
                needed,
                input.len(),
                upstream_errors.len()
            )));
        }
        let in_len = self.imw * self.imh;
        let out_len = self.ow * self.oh;
        for f in 0..self.nf {
            let base = f * in_len;
            for i in 0..self.oh {
                for j in 0..self.ow {
                    let out = f * out_len + i * self.ow + j;
                    let max = self.outputs[out];
                    let err = self.errors[out];
                    for di in 0..2 {
                        let row = base + (2 * i + di) * self.imw + 2 * j;
                        for dj in 0..2 {
                            if input[row + dj] == max {
                                upstream_errors[row + dj] = err;
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl LayerOps for MaxPool2x2Layer {
    fn forward(&mut self, data: &[f64], upstream: &[Layer]) -> Result<()> {
        let input = resolve_maps(self.source, self.input_len(), data, upstream)?;
        let in_len = self.imw * self.imh;
        let out_len = self.ow * self.oh;
        for f in 0..self.nf {
            let base = f * in_len;
            for i in 0..self.oh {
                for j in 0..self.ow {
                    let row = base + 2 * i * self.imw + 2 * j;
                    let below = row + self.imw;
                    self.outputs[f * out_len + i * self.ow + j] = input[row]
                        .max(input[row + 1])
                        .max(input[below])
                        .max(input[below + 1]);
                }
            }
        }
        Ok(())
    }

    fn backward(&mut self, _data: &[f64], upstream: &mut [Layer]) -> Result<()> {
        if let MapSource::Layer(index) = self.source {
            let (input, prederr) = upstream_maps_mut(index, self.input_len(), upstream)?;
            self.route_error(input, prederr)?;
        }
        Ok(())
    }

    fn reset_errors(&mut self) {
        self.errors.fill(0.0);
    }

    fn apply_update(
        &mut self,
        _data: &[f64],
        _upstream: &[Layer],
        _optimizer: &mut dyn Optimizer,
    ) -> Result<()> {
        Ok(())
    }

    fn output_size(&self) -> usize {
        self.outputs.len()
    }

    fn parameter_count(&self) -> usize {
        0
    }

    fn randomize(&mut self, _rng: &mut SimpleRng) {}
}

impl fmt::Display for MaxPool2x2Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "maxpool2x2: {} maps, {}x{} -> {}x{}",
            self.nf, self.imw, self.imh, self.ow, self.oh
        )
    }
}
