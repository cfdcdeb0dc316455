//! # Bottleneck Block for `ResNet`
//!
//! [`Bottleneck`] is the residual unit of the deep (50/101/152) networks:
//! a 1x1 reduction, a (strided) 3x3 conv, and a 1x1 expansion to
//! ``planes * 4`` channels.
//!
//! [`BottleneckConfig::build`] resolves every layer through a
//! [`BottleneckParams`].

use crate::errors::ConfigError;
use crate::layers::activation::{ActivationLayer, ActivationLayerConfig, BaseActivation};
use crate::layers::conv_norm::{ConvNorm, ConvNormConfig, ConvNormMeta};
use crate::layers::factory::{ConvType, activation_layer, conv_layer};
use crate::layers::sparse_weights::SparseWeightsKind;
use crate::models::resnet::sparse_params::{BottleneckParams, as_layer_params};
use crate::models::resnet::util::stride_output_resolution;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`Bottleneck`] Meta trait.
pub trait BottleneckMeta {
    /// The size of the in channels dimension.
    fn in_planes(&self) -> usize;

    /// The size of the inner (reduced) channels dimension.
    fn planes(&self) -> usize;

    /// The size of the out channels dimension.
    fn out_planes(&self) -> usize;

    /// The stride of the 3x3 conv, and of the shortcut.
    fn stride(&self) -> usize;

    /// Does the block project its shortcut?
    fn has_projection(&self) -> bool;

    /// Get the output resolution for a given input resolution.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        stride_output_resolution(input_resolution, self.stride())
    }
}

/// [`Bottleneck`] Config.
#[derive(Config, Debug)]
pub struct BottleneckConfig {
    /// 1x1 reduction conv/norm.
    pub conv1: ConvNormConfig,

    /// Activation after `conv1`.
    pub act1: ActivationLayerConfig,

    /// 3x3 conv/norm.
    pub conv2: ConvNormConfig,

    /// Activation after `conv2`.
    pub act2: ActivationLayerConfig,

    /// 1x1 expansion conv/norm.
    pub conv3: ConvNormConfig,

    /// Projection shortcut; ``None`` for identity.
    #[config(default = "None")]
    pub shortcut: Option<ConvNormConfig>,

    /// Activation after the residual sum.
    pub post_activation: ActivationLayerConfig,
}

impl BottleneckMeta for BottleneckConfig {
    fn in_planes(&self) -> usize {
        self.conv1.in_channels()
    }

    fn planes(&self) -> usize {
        self.conv1.out_channels()
    }

    fn out_planes(&self) -> usize {
        self.conv3.out_channels()
    }

    fn stride(&self) -> usize {
        self.conv2.stride()
    }

    fn has_projection(&self) -> bool {
        self.shortcut.is_some()
    }
}

impl BottleneckConfig {
    /// Expansion of `planes` to output planes.
    pub const EXPANSION: usize = 4;

    /// Resolve a [`BottleneckConfig`].
    ///
    /// The output has ``planes * 4`` channels.
    pub fn build(
        in_planes: usize,
        planes: usize,
        stride: usize,
        params: &BottleneckParams,
        sparse_weights_type: SparseWeightsKind,
        base_activation: BaseActivation,
    ) -> Result<Self, ConfigError> {
        let out_planes = planes * Self::EXPANSION;

        let conv1x1_1 = as_layer_params(&params.conv1x1_1);
        let conv3x3_2 = as_layer_params(&params.conv3x3_2);
        let conv1x1_3 = as_layer_params(&params.conv1x1_3);
        let shortcut = as_layer_params(&params.shortcut);

        let conv1 = conv_layer(
            ConvType::Conv1x1,
            in_planes,
            planes,
            conv1x1_1,
            sparse_weights_type,
            1,
        )?;
        let act1 = activation_layer(planes, conv1x1_1, 1, base_activation)?;

        let conv2 = conv_layer(
            ConvType::Conv3x3,
            planes,
            planes,
            conv3x3_2,
            sparse_weights_type,
            stride,
        )?;
        let act2 = activation_layer(planes, conv3x3_2, 3, base_activation)?;

        let conv3 = conv_layer(
            ConvType::Conv1x1,
            planes,
            out_planes,
            conv1x1_3,
            sparse_weights_type,
            1,
        )?;

        let projection = if stride != 1 || in_planes != out_planes {
            Some(
                conv_layer(
                    ConvType::Conv1x1,
                    in_planes,
                    out_planes,
                    shortcut,
                    sparse_weights_type,
                    stride,
                )?
                .into(),
            )
        } else {
            None
        };

        let post_activation = activation_layer(out_planes, shortcut, 1, base_activation)?;

        Ok(Self::new(
            conv1.into(),
            act1,
            conv2.into(),
            act2,
            conv3.into(),
            post_activation,
        )
        .with_shortcut(projection))
    }

    /// Initialize a [`Bottleneck`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Bottleneck<B> {
        Bottleneck {
            conv1: self.conv1.init(device),
            act1: self.act1.init(),
            conv2: self.conv2.init(device),
            act2: self.act2.init(),
            conv3: self.conv3.init(device),
            shortcut: self.shortcut.as_ref().map(|config| config.init(device)),
            post_activation: self.post_activation.init(),
        }
    }
}

/// Bottleneck Block for `ResNet`.
#[derive(Module, Debug)]
pub struct Bottleneck<B: Backend> {
    /// 1x1 reduction conv/norm.
    pub conv1: ConvNorm<B>,

    /// Activation after `conv1`.
    pub act1: ActivationLayer,

    /// 3x3 conv/norm.
    pub conv2: ConvNorm<B>,

    /// Activation after `conv2`.
    pub act2: ActivationLayer,

    /// 1x1 expansion conv/norm.
    pub conv3: ConvNorm<B>,

    /// Optional projection; for the residual connection.
    pub shortcut: Option<ConvNorm<B>>,

    /// Activation after the residual sum.
    pub post_activation: ActivationLayer,
}

impl<B: Backend> BottleneckMeta for Bottleneck<B> {
    fn in_planes(&self) -> usize {
        self.conv1.in_channels()
    }

    fn planes(&self) -> usize {
        self.conv1.out_channels()
    }

    fn out_planes(&self) -> usize {
        self.conv3.out_channels()
    }

    fn stride(&self) -> usize {
        self.conv2.stride()
    }

    fn has_projection(&self) -> bool {
        self.shortcut.is_some()
    }
}

impl<B: Backend> Bottleneck<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes, ceil(in_height/stride), ceil(in_width/stride)]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, in_height, in_width] = unpack_shape_contract!(
            ["batch", "in_planes", "in_height", "in_width"],
            &input,
            &["batch", "in_height", "in_width"],
            &[("in_planes", self.in_planes())],
        );
        let [out_height, out_width] = self.output_resolution([in_height, in_width]);

        let identity = match &self.shortcut {
            Some(shortcut) => shortcut.forward(input.clone()),
            None => input.clone(),
        };

        let x = self.act1.forward(self.conv1.forward(input));

        let x = self.act2.forward(self.conv2.forward(x));
        assert_shape_contract_periodically!(
            ["batch", "planes", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("planes", self.planes()),
                ("out_height", out_height),
                ("out_width", out_width),
            ]
        );

        let x = self.conv3.forward(x);

        self.post_activation.forward(x + identity)
    }

    /// Re-apply every sparse mask of the block.
    pub fn rezero_weights(self) -> Self {
        Self {
            conv1: self.conv1.rezero_weights(),
            conv2: self.conv2.rezero_weights(),
            conv3: self.conv3.rezero_weights(),
            shortcut: self.shortcut.map(ConvNorm::rezero_weights),
            ..self
        }
    }
}
