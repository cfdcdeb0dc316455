//! # Sparse Weights Wrappers
//!
//! [`SparseWeights`] wraps a [`Linear`] layer, and [`SparseWeights2d`] wraps
//! a [`Conv2d`] layer. Each holds a fixed keep-mask over the wrapped weight;
//! masked weights are zeroed at init and by every call to `rezero_weights`.
//!
//! The optimizer is free to move masked weights between calls; the training
//! loop re-applies the mask from a post-batch hook.
//!
//! [`SparseWeightsKind`] selects how the mask is built:
//!
//! * [`SparseWeightsKind::SparseWeights`]: a random mask zeroing
//!   ``round(sparsity * fan_in)`` weights of every output unit.
//! * [`SparseWeightsKind::PrunableSparseWeights`]: an all-keep mask, to be
//!   replaced by an external pruner with `with_off_mask`.

use crate::errors::ConfigError;
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Linear, LinearConfig};
use burn::prelude::{Backend, Bool, Tensor};
use burn::tensor::TensorData;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Sparse weights wrapper variant.
///
/// Deserializes from the symbolic names ``SparseWeights``,
/// ``SparseWeights2d``, ``PrunableSparseWeights`` and
/// ``PrunableSparseWeights2d``; the linear and 2d names select the same
/// variant, the wrapped layer decides the rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SparseWeightsKind {
    /// Random fixed mask.
    #[default]
    #[serde(alias = "SparseWeights2d")]
    SparseWeights,

    /// Externally pruned mask.
    #[serde(alias = "PrunableSparseWeights2d")]
    PrunableSparseWeights,
}

impl FromStr for SparseWeightsKind {
    type Err = ConfigError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "SparseWeights" | "SparseWeights2d" => Ok(Self::SparseWeights),
            "PrunableSparseWeights" | "PrunableSparseWeights2d" => Ok(Self::PrunableSparseWeights),
            _ => Err(ConfigError::UnknownSparseWeightsType(name.to_string())),
        }
    }
}

/// [`SparseWeights`] / [`SparseWeights2d`] Config.
#[derive(Config, Debug)]
pub struct SparseWeightsConfig {
    /// Fraction of the weights of each output unit forced to zero.
    pub sparsity: f64,

    /// Mask variant.
    #[config(default = "SparseWeightsKind::SparseWeights")]
    pub kind: SparseWeightsKind,

    /// Mask RNG seed; ``None`` seeds from the OS.
    #[config(default = "None")]
    pub seed: Option<u64>,
}

impl SparseWeightsConfig {
    /// The number of weights zeroed in each output unit.
    pub fn zeros_per_unit(
        &self,
        fan_in: usize,
    ) -> usize {
        match self.kind {
            SparseWeightsKind::SparseWeights => {
                ((self.sparsity * fan_in as f64).round() as usize).min(fan_in)
            }
            SparseWeightsKind::PrunableSparseWeights => 0,
        }
    }

    /// Build a ``[units, fan_in]`` keep-mask.
    fn keep_mask<B: Backend>(
        &self,
        units: usize,
        fan_in: usize,
        device: &B::Device,
    ) -> Tensor<B, 2> {
        let mut values = vec![1.0f32; units * fan_in];

        let num_zeros = self.zeros_per_unit(fan_in);
        if num_zeros > 0 {
            let mut rng = match self.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_os_rng(),
            };
            let mut positions: Vec<usize> = (0..fan_in).collect();
            for unit in values.chunks_mut(fan_in) {
                positions.shuffle(&mut rng);
                for &idx in &positions[..num_zeros] {
                    unit[idx] = 0.0;
                }
            }
        }

        Tensor::from_data(TensorData::new(values, [units, fan_in]), device)
    }

    /// Initialize a [`SparseWeights`] around a new [`Linear`].
    pub fn init_linear<B: Backend>(
        &self,
        linear: &LinearConfig,
        device: &B::Device,
    ) -> SparseWeights<B> {
        // Linear weights are ``[d_input, d_output]``; output units are columns.
        let keep_mask = self
            .keep_mask(linear.d_output, linear.d_input, device)
            .transpose();

        SparseWeights {
            module: linear.init(device),
            keep_mask,
            sparsity: self.sparsity,
        }
        .rezero_weights()
    }

    /// Initialize a [`SparseWeights2d`] around a new [`Conv2d`].
    pub fn init_conv<B: Backend>(
        &self,
        conv: &Conv2dConfig,
        device: &B::Device,
    ) -> SparseWeights2d<B> {
        let [in_channels, out_channels] = conv.channels;
        let [kernel_height, kernel_width] = conv.kernel_size;
        let channels_per_group = in_channels / conv.groups;
        let fan_in = channels_per_group * kernel_height * kernel_width;

        let keep_mask = self.keep_mask(out_channels, fan_in, device).reshape([
            out_channels,
            channels_per_group,
            kernel_height,
            kernel_width,
        ]);

        SparseWeights2d {
            module: conv.init(device),
            keep_mask,
            sparsity: self.sparsity,
        }
        .rezero_weights()
    }
}

/// Zero the masked weights, keeping the weight a (re-)tracked leaf.
fn mask_weights<B: Backend, const D: usize>(
    weight: Tensor<B, D>,
    keep_mask: Tensor<B, D>,
) -> Tensor<B, D> {
    let require_grad = weight.is_require_grad();
    (weight * keep_mask).detach().set_require_grad(require_grad)
}

/// Fraction of exactly-zero entries.
fn zero_fraction<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> f64 {
    let data = tensor.to_data();
    let total = data.num_elements().max(1);
    let zeros = data.iter::<f32>().filter(|v| *v == 0.0).count();
    zeros as f64 / total as f64
}

/// Masked-weight [`Linear`] wrapper.
///
/// The mask is not applied in [`SparseWeights::forward`]; forward uses the
/// weight as stored. Sparsity holds only while the weight is re-masked with
/// [`SparseWeights::rezero_weights`] after every update, e.g. by installing
/// [`rezero_after_step`](crate::training::session::rezero_after_step) as the
/// post-batch hook.
#[derive(Module, Debug)]
pub struct SparseWeights<B: Backend> {
    /// The wrapped layer.
    pub module: Linear<B>,

    /// ``[d_input, d_output]`` mask; ``1.0`` keeps a weight.
    pub keep_mask: Tensor<B, 2>,

    /// Configured sparsity.
    pub sparsity: f64,
}

impl<B: Backend> SparseWeights<B> {
    /// Forward pass with the stored, possibly unmasked, weight.
    pub fn forward<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        self.module.forward(input)
    }

    /// Re-apply the mask to the wrapped weight.
    pub fn rezero_weights(mut self) -> Self {
        let keep_mask = self.keep_mask.clone();
        self.module.weight = self.module.weight.map(|w| mask_weights(w, keep_mask));
        self
    }

    /// Replace the mask; `off_mask` marks the weights to zero.
    pub fn with_off_mask(
        self,
        off_mask: Tensor<B, 2, Bool>,
    ) -> Self {
        Self {
            keep_mask: off_mask.bool_not().float(),
            ..self
        }
        .rezero_weights()
    }

    /// Measured fraction of zero weights.
    pub fn weight_sparsity(&self) -> f64 {
        zero_fraction(self.module.weight.val())
    }
}

/// Masked-weight [`Conv2d`] wrapper.
///
/// As with [`SparseWeights`], forward does not apply the mask; call
/// [`SparseWeights2d::rezero_weights`] after every weight update.
#[derive(Module, Debug)]
pub struct SparseWeights2d<B: Backend> {
    /// The wrapped layer.
    pub module: Conv2d<B>,

    /// ``[out_channels, in_channels/groups, kernel_height, kernel_width]`` mask;
    /// ``1.0`` keeps a weight.
    pub keep_mask: Tensor<B, 4>,

    /// Configured sparsity.
    pub sparsity: f64,
}

impl<B: Backend> SparseWeights2d<B> {
    /// Forward pass with the stored, possibly unmasked, weight.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        self.module.forward(input)
    }

    /// Re-apply the mask to the wrapped weight.
    pub fn rezero_weights(mut self) -> Self {
        let keep_mask = self.keep_mask.clone();
        self.module.weight = self.module.weight.map(|w| mask_weights(w, keep_mask));
        self
    }

    /// Replace the mask; `off_mask` marks the weights to zero.
    pub fn with_off_mask(
        self,
        off_mask: Tensor<B, 4, Bool>,
    ) -> Self {
        Self {
            keep_mask: off_mask.bool_not().float(),
            ..self
        }
        .rezero_weights()
    }

    /// Measured fraction of zero weights.
    pub fn weight_sparsity(&self) -> f64 {
        zero_fraction(self.module.weight.val())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::nn::PaddingConfig2d;
    use hamcrest::prelude::*;

    type B = NdArray<f32>;

    fn zeros_per_chunk(
        values: &[f32],
        chunk: usize,
    ) -> Vec<usize> {
        values
            .chunks(chunk)
            .map(|c| c.iter().filter(|v| **v == 0.0).count())
            .collect()
    }

    #[test]
    fn test_kind_from_name() {
        assert_eq!(
            "SparseWeights".parse::<SparseWeightsKind>(),
            Ok(SparseWeightsKind::SparseWeights)
        );
        assert_eq!(
            "SparseWeights2d".parse::<SparseWeightsKind>(),
            Ok(SparseWeightsKind::SparseWeights)
        );
        assert_eq!(
            "PrunableSparseWeights2d".parse::<SparseWeightsKind>(),
            Ok(SparseWeightsKind::PrunableSparseWeights)
        );
        assert_eq!(
            "DenseWeights".parse::<SparseWeightsKind>(),
            Err(ConfigError::UnknownSparseWeightsType(
                "DenseWeights".to_string()
            ))
        );

        let kind: SparseWeightsKind = serde_json::from_str("\"SparseWeights2d\"").unwrap();
        assert_eq!(kind, SparseWeightsKind::SparseWeights);
    }

    #[test]
    fn test_linear_mask_per_output_unit() {
        let device = Default::default();
        let layer: SparseWeights<B> = SparseWeightsConfig::new(0.3)
            .with_seed(Some(7))
            .init_linear(&LinearConfig::new(10, 6), &device);

        assert_eq!(layer.keep_mask.dims(), [10, 6]);

        // Transpose to ``[d_output, d_input]`` so units are rows.
        let weights = layer
            .module
            .weight
            .val()
            .transpose()
            .to_data()
            .to_vec::<f32>()
            .unwrap();
        assert_eq!(zeros_per_chunk(&weights, 10), vec![3; 6]);
        assert_that!(layer.weight_sparsity(), close_to(0.3, 1e-9));

        let input = Tensor::<B, 2>::ones([2, 10], &device);
        assert_eq!(layer.forward(input).dims(), [2, 6]);
    }

    #[test]
    fn test_conv_mask_per_output_channel() {
        let device = Default::default();
        let conv = Conv2dConfig::new([4, 8], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false);
        let layer: SparseWeights2d<B> = SparseWeightsConfig::new(0.5)
            .with_seed(Some(11))
            .init_conv(&conv, &device);

        let weights = layer.module.weight.val().to_data().to_vec::<f32>().unwrap();
        assert_eq!(zeros_per_chunk(&weights, 36), vec![18; 8]);

        let input = Tensor::<B, 4>::ones([1, 4, 5, 5], &device);
        assert_eq!(layer.forward(input).dims(), [1, 8, 5, 5]);
    }

    #[test]
    fn test_seeded_masks_are_reproducible() {
        let device = Default::default();
        let config = SparseWeightsConfig::new(0.5).with_seed(Some(3));
        let conv = Conv2dConfig::new([2, 4], [3, 3]);

        let a: SparseWeights2d<B> = config.init_conv(&conv, &device);
        let b: SparseWeights2d<B> = config.init_conv(&conv, &device);
        a.keep_mask
            .to_data()
            .assert_eq(&b.keep_mask.to_data(), true);
    }

    #[test]
    fn test_rezero_weights_after_update() {
        let device = Default::default();
        let mut layer: SparseWeights2d<B> = SparseWeightsConfig::new(0.25)
            .with_seed(Some(5))
            .init_conv(&Conv2dConfig::new([2, 4], [2, 2]), &device);

        // Simulate an optimizer step that moved every weight.
        layer.module.weight = layer.module.weight.map(|w| w.ones_like());
        assert_eq!(layer.weight_sparsity(), 0.0);

        let layer = layer.rezero_weights();
        assert_that!(layer.weight_sparsity(), close_to(0.25, 1e-9));
    }

    #[test]
    fn test_forward_uses_stored_weight() {
        let device = Default::default();
        let mut layer: SparseWeights<B> = SparseWeightsConfig::new(0.5)
            .with_seed(Some(3))
            .init_linear(&LinearConfig::new(4, 2).with_bias(false), &device);
        let input = Tensor::<B, 2>::ones([1, 4], &device);

        layer.module.weight = layer.module.weight.map(|w| w.ones_like());
        layer
            .forward(input.clone())
            .to_data()
            .assert_eq(&TensorData::from([[4.0f32, 4.0]]), false);

        // Two of four weights per output unit are masked.
        layer
            .rezero_weights()
            .forward(input)
            .to_data()
            .assert_eq(&TensorData::from([[2.0f32, 2.0]]), false);
    }

    #[test]
    fn test_prunable_starts_dense() {
        let device = Default::default();
        let layer: SparseWeights<B> = SparseWeightsConfig::new(0.5)
            .with_kind(SparseWeightsKind::PrunableSparseWeights)
            .init_linear(&LinearConfig::new(4, 2), &device);
        assert_eq!(layer.weight_sparsity(), 0.0);

        let off_mask = Tensor::<B, 2, Bool>::from_data(
            [
                [true, false],
                [true, false],
                [false, false],
                [false, false],
            ],
            &device,
        );
        let layer = layer.with_off_mask(off_mask);
        assert_that!(layer.weight_sparsity(), close_to(0.25, 1e-9));
    }
}
