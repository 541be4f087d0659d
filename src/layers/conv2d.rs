//! 3x3 convolution layer
//!
//! A bank of `nf` 3x3 filters applied with stride 1 and no padding to a single
//! input map of `imw x imh` values. Every filter produces one
//! `(imw - 2) x (imh - 2)` feature map. Maps are stored flat and row-major,
//! filter after filter.

use std::fmt;

use crate::error::{NetError, Result};
use crate::layers::{resolve_maps, upstream_maps_mut, Layer, LayerOps, MapSource};
use crate::optimizers::Optimizer;
use crate::utils::SimpleRng;

const KERNEL: usize = 3;
const TAPS: usize = KERNEL * KERNEL;

/// 3x3 convolution unit with its forward and backward caches.
///
/// # Fields
///
/// * `filters` - `nf * 9` taps, filter after filter, row-major
/// * `dfp` - accumulated dE/d(tap), same layout as `filters`
/// * `outputs` - `nf` feature maps of `ow * oh` values
/// * `errors` - dE/d(output) per output pixel, same layout as `outputs`
///
/// # Example
///
/// ```ignore
/// use cellnet::layers::{Conv3x3Layer, MapSource};
///
/// let conv = Conv3x3Layer::new(4, 28, 28, MapSource::Data)?;
/// assert_eq!(conv.output_width(), 26);
/// assert_eq!(conv.output_size(), 4 * 26 * 26);
/// ```
#[derive(Debug, Clone)]
pub struct Conv3x3Layer {
    nf: usize,
    imw: usize,
    imh: usize,
    ow: usize,
    oh: usize,
    source: MapSource,
    filters: Vec<f64>,
    dfp: Vec<f64>,
    outputs: Vec<f64>,
    errors: Vec<f64>,
}

impl Conv3x3Layer {
    /// Create a convolution unit with zeroed filters.
    ///
    /// # Errors
    ///
    /// [`NetError::Construction`] when `nf` is zero or either input dimension
    /// is below 3.
    pub fn new(nf: usize, imw: usize, imh: usize, source: MapSource) -> Result<Self> {
        if nf == 0 {
            return Err(NetError::Construction(
                "convolution needs at least one filter".to_string(),
            ));
        }
        if imw < KERNEL || imh < KERNEL {
            return Err(NetError::Construction(format!(
                "convolution input {}x{} is smaller than the 3x3 kernel",
                imw, imh
            )));
        }

        let ow = imw - 2;
        let oh = imh - 2;
        Ok(Self {
            nf,
            imw,
            imh,
            ow,
            oh,
            source,
            filters: vec![0.0; nf * TAPS],
            dfp: vec![0.0; nf * TAPS],
            outputs: vec![0.0; nf * ow * oh],
            errors: vec![0.0; nf * ow * oh],
        })
    }

    pub fn filter_count(&self) -> usize {
        self.nf
    }

    pub fn input_width(&self) -> usize {
        self.imw
    }

    pub fn input_height(&self) -> usize {
        self.imh
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

    pub fn filters(&self) -> &[f64] {
        &self.filters
    }

    pub fn filters_mut(&mut self) -> &mut [f64] {
        &mut self.filters
    }

    /// Filter gradients accumulated since the last backward pass began.
    pub fn grads(&self) -> &[f64] {
        &self.dfp
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
        self.imw * self.imh
    }

    fn convolve(&mut self, input: &[f64]) {
        let map_len = self.ow * self.oh;
        for f in 0..self.nf {
            let filter = &self.filters[f * TAPS..(f + 1) * TAPS];
            let out = &mut self.outputs[f * map_len..(f + 1) * map_len];
            for i in 0..self.oh {
                for j in 0..self.ow {
                    let mut acc = 0.0;
                    for di in 0..KERNEL {
                        let row = (i + di) * self.imw + j;
                        for dj in 0..KERNEL {
                            acc += filter[di * KERNEL + dj] * input[row + dj];
                        }
                    }
                    out[i * self.ow + j] = acc;
                }
            }
        }
    }

    /// Accumulate `dfp` and, when given, the upstream error map.
    fn accumulate(&mut self, input: &[f64], mut prederr: Option<&mut [f64]>) {
        let map_len = self.ow * self.oh;
        for f in 0..self.nf {
            for i in 0..self.oh {
                for j in 0..self.ow {
                    let err = self.errors[f * map_len + i * self.ow + j];
                    for di in 0..KERNEL {
                        let row = (i + di) * self.imw + j;
                        for dj in 0..KERNEL {
                            let tap = f * TAPS + di * KERNEL + dj;
                            self.dfp[tap] += err * input[row + dj];
                            if let Some(pe) = prederr.as_deref_mut() {
                                pe[row + dj] += err * self.filters[tap];
                            }
                        }
                    }
                }
            }
        }
    }
}

impl LayerOps for Conv3x3Layer {
    fn forward(&mut self, data: &[f64], upstream: &[Layer]) -> Result<()> {
        let input = resolve_maps(self.source, self.input_len(), data, upstream)?;
        self.convolve(input);
        Ok(())
    }

    fn backward(&mut self, data: &[f64], upstream: &mut [Layer]) -> Result<()> {
        let expected = self.input_len();
        match self.source {
            MapSource::Data => {
                let input = resolve_maps(MapSource::Data, expected, data, &[])?;
                self.accumulate(input, None);
            }
            MapSource::Layer(index) => {
                let (input, prederr) = upstream_maps_mut(index, expected, upstream)?;
                self.accumulate(input, Some(prederr));
            }
        }
        Ok(())
    }

    fn reset_errors(&mut self) {
        self.errors.fill(0.0);
    }

    fn clear_gradients(&mut self) {
        self.dfp.fill(0.0);
    }

    fn apply_update(
        &mut self,
        _data: &[f64],
        _upstream: &[Layer],
        optimizer: &mut dyn Optimizer,
    ) -> Result<()> {
        optimizer.update(&mut self.filters, &self.dfp);
        Ok(())
    }

    fn output_size(&self) -> usize {
        self.outputs.len()
    }

    fn parameter_count(&self) -> usize {
        self.filters.len()
    }

    fn randomize(&mut self, rng: &mut SimpleRng) {
        for tap in &mut self.filters {
            *tap = rng.between_one();
        }
    }
}

impl fmt::Display for Conv3x3Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "conv3x3: {} filters, {}x{} -> {}x{}",
            self.nf, self.imw, self.imh, self.ow, self.oh
        )?;
        for (i, filter) in self.filters.chunks(TAPS).enumerate() {
            write!(f, "  filter[{}]:", i)?;
            for tap in filter {
                write!(f, " {:.6}", tap)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conv_output_dims() {
        let conv = Conv3x3Layer::new(3, 6, 5, MapSource::Data).unwrap();
        assert_eq!(conv.output_width(), 4);
        assert_eq!(conv.output_height(), 3);
        assert_eq!(conv.output_size(), 3 * 4 * 3);
        assert_eq!(conv.parameter_count(), 27);
    }

    #[test]
    fn test_conv_rejects_small_input_and_zero_filters() {
        assert!(matches!(
            Conv3x3Layer::new(1, 2, 5, MapSource::Data),
            Err(NetError::Construction(_))
        ));
        assert!(matches!(
            Conv3x3Layer::new(0, 5, 5, MapSource::Data),
            Err(NetError::Construction(_))
        ));
    }

    #[test]
    fn test_identity_center_tap() {
        let mut conv = Conv3x3Layer::new(1, 4, 4, MapSource::Data).unwrap();
        conv.filters_mut()[4] = 1.0;
        let input: Vec<f64> = (0..16).map(|v| v as f64).collect();
        conv.forward(&input, &[]).unwrap();
        // centre pixels of the 4x4 map: (1,1) (1,2) (2,1) (2,2)
        assert_eq!(conv.outputs(), &[5.0, 6.0, 9.0, 10.0]);
    }

    #[test]
    fn test_box_filter_sum() {
        let mut conv = Conv3x3Layer::new(1, 3, 3, MapSource::Data).unwrap();
        conv.filters_mut().fill(1.0);
        conv.forward(&[1.0; 9], &[]).unwrap();
        assert_eq!(conv.outputs(), &[9.0]);
    }

    #[test]
    fn test_gradients_accumulate_and_clear() {
        let mut conv = Conv3x3Layer::new(1, 3, 3, MapSource::Data).unwrap();
        let input: Vec<f64> = (1..=9).map(|v| v as f64).collect();
        conv.forward(&input, &[]).unwrap();
        conv.errors_mut()[0] = 2.0;

        conv.backward(&input, &mut []).unwrap();
        conv.backward(&input, &mut []).unwrap();
        assert_eq!(conv.grads()[0], 4.0);
        assert_eq!(conv.grads()[8], 36.0);

        conv.clear_gradients();
        assert!(conv.grads().iter().all(|&g| g == 0.0));
    }

    #[test]
    fn test_short_data_is_wiring_error() {
        let mut conv = Conv3x3Layer::new(1, 3, 3, MapSource::Data).unwrap();
        assert!(matches!(conv.forward(&[0.0; 4], &[]), Err(NetError::Wiring(_))));
    }
}
