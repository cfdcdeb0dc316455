//! # `ConvNorm` Module
//!
//! A [`ConvNorm`] module is a (possibly sparse) [`ConvLayer`] followed by a
//! [`BatchNorm`] layer.

use crate::layers::factory::{ConvLayer, ConvLayerConfig};
use crate::models::resnet::util::stride_output_resolution;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::{BatchNorm, BatchNormConfig};
use burn::prelude::{Backend, Tensor};

/// [`ConvNorm`] Meta.
pub trait ConvNormMeta {
    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Number of output channels.
    fn out_channels(&self) -> usize;

    /// Square stride.
    fn stride(&self) -> usize;

    /// Is the conv weight-sparse?
    fn is_sparse(&self) -> bool;

    /// Get the output resolution for a given input resolution.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        stride_output_resolution(input_resolution, self.stride())
    }
}

/// [`ConvNorm`] Config.
#[derive(Config, Debug)]
pub struct ConvNormConfig {
    /// The conv layer config.
    pub conv: ConvLayerConfig,
}

impl ConvNormMeta for ConvNormConfig {
    fn in_channels(&self) -> usize {
        self.conv.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.conv.out_channels()
    }

    fn stride(&self) -> usize {
        self.conv.stride()
    }

    fn is_sparse(&self) -> bool {
        self.conv.is_sparse()
    }
}

impl From<ConvLayerConfig> for ConvNormConfig {
    fn from(conv: ConvLayerConfig) -> Self {
        Self { conv }
    }
}

impl ConvNormConfig {
    /// Initialize a [`ConvNorm`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ConvNorm<B> {
        ConvNorm {
            conv: self.conv.init(device),
            norm: BatchNormConfig::new(self.out_channels()).init(device),
        }
    }
}

/// [`ConvLayer`] and [`BatchNorm`] layer.
#[derive(Module, Debug)]
pub struct ConvNorm<B: Backend> {
    /// Internal conv layer.
    pub conv: ConvLayer<B>,

    /// Internal norm layer.
    pub norm: BatchNorm<B, 2>,
}

impl<B: Backend> ConvNormMeta for ConvNorm<B> {
    fn in_channels(&self) -> usize {
        let conv = self.conv.conv();
        conv.weight.dims()[1] * conv.groups
    }

    fn out_channels(&self) -> usize {
        self.conv.conv().weight.dims()[0]
    }

    fn stride(&self) -> usize {
        self.conv.conv().stride[0]
    }

    fn is_sparse(&self) -> bool {
        matches!(self.conv, ConvLayer::Sparse(_))
    }
}

impl<B: Backend> ConvNorm<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_channels, ceil(in_height/stride), ceil(in_width/stride)]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, in_height, in_width] = unpack_shape_contract!(
            ["batch", "in_channels", "in_height", "in_width"],
            &input,
            &["batch", "in_height", "in_width"],
            &[("in_channels", self.in_channels())],
        );
        let [out_height, out_width] = self.output_resolution([in_height, in_width]);

        let x = self.conv.forward(input);
        let x = self.norm.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        x
    }

    /// Re-apply the conv's sparse mask, if any.
    pub fn rezero_weights(self) -> Self {
        Self {
            conv: self.conv.rezero_weights(),
            ..self
        }
    }
}
