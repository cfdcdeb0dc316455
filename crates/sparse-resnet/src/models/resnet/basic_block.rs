//! # Basic Block for `ResNet`
//!
//! [`BasicBlock`] is the residual unit of the shallow (18/34) networks.
//!
//! [`BasicBlockMeta`] defines a common meta API for [`BasicBlock`]
//! and [`BasicBlockConfig`].
//!
//! [`BasicBlockConfig::build`] resolves every layer of the block through a
//! [`BasicBlockParams`]; [`BasicBlockConfig::init`] then initializes a
//! [`BasicBlock`], which provides [`BasicBlock::forward`].
//!
//! The block's activations resolve with an unspecified (``0``) kernel size.

use crate::errors::ConfigError;
use crate::layers::activation::{ActivationLayer, ActivationLayerConfig, BaseActivation};
use crate::layers::conv_norm::{ConvNorm, ConvNormConfig, ConvNormMeta};
use crate::layers::factory::{ConvType, activation_layer, conv_layer};
use crate::layers::sparse_weights::SparseWeightsKind;
use crate::models::resnet::sparse_params::{BasicBlockParams, as_layer_params};
use crate::models::resnet::util::stride_output_resolution;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`BasicBlock`] Meta trait.
pub trait BasicBlockMeta {
    /// The size of the in channels dimension.
    fn in_planes(&self) -> usize;

    /// The size of the out channels dimension.
    fn out_planes(&self) -> usize;

    /// The stride of the first conv, and of the shortcut.
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

/// [`BasicBlock`] Config.
///
/// Implements [`BasicBlockMeta`].
#[derive(Config, Debug)]
pub struct BasicBlockConfig {
    /// First 3x3 conv/norm.
    pub conv1: ConvNormConfig,

    /// Activation after `conv1`.
    pub act1: ActivationLayerConfig,

    /// Second 3x3 conv/norm.
    pub conv2: ConvNormConfig,

    /// Projection shortcut; ``None`` for identity.
    #[config(default = "None")]
    pub shortcut: Option<ConvNormConfig>,

    /// Activation after the residual sum.
    pub post_activation: ActivationLayerConfig,
}

impl BasicBlockMeta for BasicBlockConfig {
    fn in_planes(&self) -> usize {
        self.conv1.in_channels()
    }

    fn out_planes(&self) -> usize {
        self.conv2.out_channels()
    }

    fn stride(&self) -> usize {
        self.conv1.stride()
    }

    fn has_projection(&self) -> bool {
        self.shortcut.is_some()
    }
}

impl BasicBlockConfig {
    /// Expansion of `planes` to output planes.
    pub const EXPANSION: usize = 1;

    /// Resolve a [`BasicBlockConfig`].
    ///
    /// # Arguments
    ///
    /// - `in_planes`: input channels.
    /// - `planes`: output channels.
    /// - `stride`: stride of the first conv, and of the shortcut.
    /// - `params`: per-role resolvers.
    /// - `sparse_weights_type`: conv sparse wrapper.
    /// - `base_activation`: dense activation.
    pub fn build(
        in_planes: usize,
        planes: usize,
        stride: usize,
        params: &BasicBlockParams,
        sparse_weights_type: SparseWeightsKind,
        base_activation: BaseActivation,
    ) -> Result<Self, ConfigError> {
        let conv3x3_1 = as_layer_params(&params.conv3x3_1);
        let conv3x3_2 = as_layer_params(&params.conv3x3_2);
        let shortcut = as_layer_params(&params.shortcut);

        let conv1 = conv_layer(
            ConvType::Conv3x3,
            in_planes,
            planes,
            conv3x3_1,
            sparse_weights_type,
            stride,
        )?;
        let act1 = activation_layer(planes, conv3x3_1, 0, base_activation)?;
        let conv2 = conv_layer(
            ConvType::Conv3x3,
            planes,
            planes,
            conv3x3_2,
            sparse_weights_type,
            1,
        )?;

        let projection = if stride != 1 || in_planes != planes * Self::EXPANSION {
            Some(
                conv_layer(
                    ConvType::Conv1x1,
                    in_planes,
                    planes * Self::EXPANSION,
                    shortcut,
                    sparse_weights_type,
                    stride,
                )?
                .into(),
            )
        } else {
            None
        };

        let post_activation = activation_layer(planes, shortcut, 0, base_activation)?;

        Ok(Self::new(conv1.into(), act1, conv2.into(), post_activation).with_shortcut(projection))
    }

    /// Initialize a [`BasicBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> BasicBlock<B> {
        BasicBlock {
            conv1: self.conv1.init(device),
            act1: self.act1.init(),
            conv2: self.conv2.init(device),
            shortcut: self.shortcut.as_ref().map(|config| config.init(device)),
            post_activation: self.post_activation.init(),
        }
    }
}

/// Basic Block for `ResNet`.
///
/// Implements [`BasicBlockMeta`].
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    /// First 3x3 conv/norm.
    pub conv1: ConvNorm<B>,

    /// Activation after `conv1`.
    pub act1: ActivationLayer,

    /// Second 3x3 conv/norm.
    pub conv2: ConvNorm<B>,

    /// Optional projection; for the residual connection.
    pub shortcut: Option<ConvNorm<B>>,

    /// Activation after the residual sum.
    pub post_activation: ActivationLayer,
}

impl<B: Backend> BasicBlockMeta for BasicBlock<B> {
    fn in_planes(&self) -> usize {
        self.conv1.in_channels()
    }

    fn out_planes(&self) -> usize {
        self.conv2.out_channels()
    }

    fn stride(&self) -> usize {
        self.conv1.stride()
    }

    fn has_projection(&self) -> bool {
        self.shortcut.is_some()
    }
}

impl<B: Backend> BasicBlock<B> {
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

        let x = self.conv1.forward(input);
        let x = self.act1.forward(x);
        let x = self.conv2.forward(x);

        let x = self.post_activation.forward(x + identity);

        assert_shape_contract_periodically!(
            ["batch", "out_planes", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_planes", self.out_planes()),
                ("out_height", out_height),
                ("out_width", out_width),
            ]
        );

        x
    }

    /// Re-apply every sparse mask of the block.
    pub fn rezero_weights(self) -> Self {
        Self {
            conv1: self.conv1.rezero_weights(),
            conv2: self.conv2.rezero_weights(),
            shortcut: self.shortcut.map(ConvNorm::rezero_weights),
            ..self
        }
    }
}
