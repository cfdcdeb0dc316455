//! # K-Winners Activation
//!
//! [`KWinners2d`] keeps the `k` largest responses and zeroes the rest.
//!
//! * [`KWinnersKind::Global`] ranks all ``channels * height * width`` units
//!   of each sample together.
//! * [`KWinnersKind::Local`] ranks the channels at each spatial location.
//!
//! `k` is ``round(percent_on * units)`` on autodiff (training) backends, and
//! ``k * k_inference_factor`` otherwise; both are clamped to ``[1, units]``.
//! Ties at the `k`-th value are kept.

use bimm_contracts::unpack_shape_contract;
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};
use serde::{Deserialize, Serialize};

/// K-winners variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KWinnersKind {
    /// Top-k over every unit of a sample.
    #[default]
    Global,

    /// Top-k over the channels at each spatial location.
    Local,
}

/// [`KWinners2d`] Meta trait.
pub trait KWinners2dMeta {
    /// Number of input channels.
    fn channels(&self) -> usize;

    /// Fraction of units kept active during training.
    fn percent_on(&self) -> f64;

    /// Inference `k` multiplier.
    fn k_inference_factor(&self) -> f64;

    /// Ranking scope.
    fn kind(&self) -> KWinnersKind;

    /// The number of ranked units for a given spatial resolution.
    fn units(
        &self,
        resolution: [usize; 2],
    ) -> usize {
        match self.kind() {
            KWinnersKind::Global => self.channels() * resolution[0] * resolution[1],
            KWinnersKind::Local => self.channels(),
        }
    }

    /// Training-time `k`.
    fn k(
        &self,
        units: usize,
    ) -> usize {
        ((self.percent_on() * units as f64).round() as usize).clamp(1, units.max(1))
    }

    /// Inference-time `k`.
    fn k_inference(
        &self,
        units: usize,
    ) -> usize {
        ((self.k(units) as f64 * self.k_inference_factor()) as usize).clamp(1, units.max(1))
    }
}

/// [`KWinners2d`] Config.
#[derive(Config, Debug)]
pub struct KWinners2dConfig {
    /// Number of input channels.
    pub channels: usize,

    /// Fraction of units kept active during training.
    pub percent_on: f64,

    /// Inference `k` multiplier.
    #[config(default = "1.5")]
    pub k_inference_factor: f64,

    /// Ranking scope.
    #[config(default = "KWinnersKind::Global")]
    pub kind: KWinnersKind,
}

impl KWinners2dMeta for KWinners2dConfig {
    fn channels(&self) -> usize {
        self.channels
    }

    fn percent_on(&self) -> f64 {
        self.percent_on
    }

    fn k_inference_factor(&self) -> f64 {
        self.k_inference_factor
    }

    fn kind(&self) -> KWinnersKind {
        self.kind
    }
}

impl KWinners2dConfig {
    /// Initialize a [`KWinners2d`].
    pub fn init(&self) -> KWinners2d {
        KWinners2d {
            channels: self.channels,
            percent_on: self.percent_on,
            k_inference_factor: self.k_inference_factor,
            local: self.kind == KWinnersKind::Local,
        }
    }
}

/// K-winners activation for ``[batch, channels, height, width]`` inputs.
#[derive(Module, Clone, Debug)]
pub struct KWinners2d {
    /// Number of input channels.
    pub channels: usize,

    /// Fraction of units kept active during training.
    pub percent_on: f64,

    /// Inference `k` multiplier.
    pub k_inference_factor: f64,

    /// Rank per location, rather than per sample.
    pub local: bool,
}

impl KWinners2dMeta for KWinners2d {
    fn channels(&self) -> usize {
        self.channels
    }

    fn percent_on(&self) -> f64 {
        self.percent_on
    }

    fn k_inference_factor(&self) -> f64 {
        self.k_inference_factor
    }

    fn kind(&self) -> KWinnersKind {
        if self.local {
            KWinnersKind::Local
        } else {
            KWinnersKind::Global
        }
    }
}

impl KWinners2d {
    /// Build a [`KWinners2dConfig`] for this module.
    pub fn to_config(&self) -> KWinners2dConfig {
        KWinners2dConfig::new(self.channels, self.percent_on)
            .with_k_inference_factor(self.k_inference_factor)
            .with_kind(self.kind())
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, channels, height, width]``.
    ///
    /// # Returns
    ///
    /// A tensor of the same shape, with the losing units zeroed.
    pub fn forward<B: Backend>(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, height, width] = unpack_shape_contract!(
            ["batch", "channels", "height", "width"],
            &input,
            &["batch", "height", "width"],
            &[("channels", self.channels)],
        );

        let units = self.units([height, width]);
        let k = if B::ad_enabled() {
            self.k(units)
        } else {
            self.k_inference(units)
        };

        match self.kind() {
            KWinnersKind::Global => {
                let flat: Tensor<B, 2> = input.flatten(1, 3);
                let threshold = flat
                    .clone()
                    .topk(k, 1)
                    .narrow(1, k - 1, 1)
                    .expand([batch, units]);
                let losers = flat.clone().lower(threshold);

                flat.mask_fill(losers, 0.0)
                    .reshape([batch, self.channels, height, width])
            }
            KWinnersKind::Local => {
                let threshold = input
                    .clone()
                    .topk(k, 1)
                    .narrow(1, k - 1, 1)
                    .expand([batch, self.channels, height, width]);
                let losers = input.clone().lower(threshold);

                input.mask_fill(losers, 0.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::TensorData;

    fn count_nonzero<B: Backend>(tensor: Tensor<B, 4>) -> usize {
        tensor
            .to_data()
            .to_vec::<f32>()
            .unwrap()
            .into_iter()
            .filter(|v| *v != 0.0)
            .count()
    }

    #[test]
    fn test_config() {
        let config = KWinners2dConfig::new(8, 0.25);
        assert_eq!(config.kind, KWinnersKind::Global);
        assert_eq!(config.k_inference_factor, 1.5);

        assert_eq!(config.units([2, 2]), 32);
        assert_eq!(config.k(32), 8);
        assert_eq!(config.k_inference(32), 12);

        let local = config.clone().with_kind(KWinnersKind::Local);
        assert_eq!(local.units([2, 2]), 8);
        assert_eq!(local.k(8), 2);
        assert_eq!(local.k_inference(8), 3);

        // Always at least one winner, never more than all.
        assert_eq!(KWinners2dConfig::new(8, 0.01).k(8), 1);
        assert_eq!(
            KWinners2dConfig::new(8, 1.0)
                .with_k_inference_factor(2.0)
                .k_inference(8),
            8
        );

        let layer = config.init();
        assert_eq!(layer.kind(), KWinnersKind::Global);
        assert_eq!(layer.to_config().percent_on, 0.25);
        assert_eq!(local.init().to_config().kind, KWinnersKind::Local);
    }

    #[test]
    fn test_global_training_keeps_top_k() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        // 2 channels x 2 x 2 = 8 units; percent_on=0.25 => k=2.
        let input: Tensor<B, 4> = Tensor::from_data(
            [
                [[[1.0, 8.0], [3.0, 4.0]], [[5.0, 6.0], [7.0, 2.0]]],
                [[[-1.0, -2.0], [-3.0, -4.0]], [[-5.0, -6.0], [-7.0, -8.0]]],
            ],
            &device,
        );

        let layer = KWinners2dConfig::new(2, 0.25).init();
        let output = layer.forward(input);

        output.to_data().assert_eq(
            &TensorData::from([
                [[[0.0f32, 8.0], [0.0, 0.0]], [[0.0, 0.0], [7.0, 0.0]]],
                [[[-1.0, -2.0], [0.0, 0.0]], [[0.0, 0.0], [0.0, 0.0]]],
            ]),
            true,
        );
    }

    #[test]
    fn test_global_inference_uses_inference_factor() {
        type B = NdArray<f32>;
        let device = Default::default();

        let input: Tensor<B, 4> = Tensor::from_data(
            [[[[1.0, 8.0], [3.0, 4.0]], [[5.0, 6.0], [7.0, 2.0]]]],
            &device,
        );

        // k=2, k_inference=int(2 * 2.0)=4.
        let layer = KWinners2dConfig::new(2, 0.25)
            .with_k_inference_factor(2.0)
            .init();
        let output = layer.forward(input);

        assert_eq!(count_nonzero(output.clone()), 4);
        output.to_data().assert_eq(
            &TensorData::from([[[[0.0f32, 8.0], [0.0, 0.0]], [[5.0, 6.0], [7.0, 0.0]]]]),
            true,
        );
    }

    #[test]
    fn test_local_keeps_top_k_per_location() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        // 4 channels at 1x2 locations; percent_on=0.5 => k=2 per location.
        let input: Tensor<B, 4> = Tensor::from_data(
            [[[[1.0, 40.0]], [[2.0, 30.0]], [[3.0, 20.0]], [[4.0, 10.0]]]],
            &device,
        );

        let layer = KWinners2dConfig::new(4, 0.5)
            .with_kind(KWinnersKind::Local)
            .init();
        let output = layer.forward(input);

        output.to_data().assert_eq(
            &TensorData::from([[[[0.0f32, 40.0]], [[0.0, 30.0]], [[3.0, 0.0]], [[4.0, 0.0]]]]),
            true,
        );
    }
}
