//! # Sparse `ResNet` Core Model
//!
//! [`ResNet`] is the core sparse `ResNet` module.
//!
//! [`ResNetConfig`] implements [`Config`], and provides a high-level
//! configuration interface. It provides [`ResNetConfig::to_structure`] and
//! [`ResNetConfig::to_structure_with_params`] to resolve every layer into a
//! [`ResNetStructureConfig`].
//!
//! [`ResNetStructureConfig`] implements [`Config`], and provides
//! [`ResNetStructureConfig::init`] to initialize a [`ResNet`].
//!
//! [`ResNet`] implements [`Module`], and provides [`ResNet::forward`].

use crate::errors::ConfigError;
use crate::layers::activation::{ActivationLayer, ActivationLayerConfig, BaseActivation};
use crate::layers::conv_norm::{ConvNorm, ConvNormConfig, ConvNormMeta};
use crate::layers::factory::{
    ConvType, LinearLayer, LinearLayerConfig, activation_layer, conv_layer, linear_layer,
};
use crate::layers::params::{
    LayerParamsConfig, LayerParamsSpec, auto_sparse_activation_params, auto_sparse_conv_params,
};
use crate::layers::sparse_weights::SparseWeightsKind;
use crate::models::resnet::BlockKind;
use crate::models::resnet::layer_block::{LayerBlock, LayerBlockConfig, LayerBlockMeta};
use crate::models::resnet::sparse_params::{SparseParams, as_layer_params, default_resnet_params};
use bimm_contracts::unpack_shape_contract;
use burn::module::Module;
use burn::nn::PaddingConfig2d;
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::prelude::{Backend, Config, Tensor};

/// ResNet-18 block depths.
pub const RESNET18_BLOCKS: [usize; 4] = [2, 2, 2, 2];
/// ResNet-34 block depths.
pub const RESNET34_BLOCKS: [usize; 4] = [3, 4, 6, 3];
/// ResNet-50 block depths.
pub const RESNET50_BLOCKS: [usize; 4] = [3, 4, 6, 3];
/// ResNet-101 block depths.
pub const RESNET101_BLOCKS: [usize; 4] = [3, 4, 23, 3];
/// ResNet-152 block depths.
pub const RESNET152_BLOCKS: [usize; 4] = [3, 8, 36, 3];

/// Stem output channels.
pub const STEM_PLANES: usize = 64;

/// Group widths, in network order.
pub const GROUP_PLANES: [usize; 4] = [64, 128, 256, 512];

/// First-block stride of each group.
pub const GROUP_STRIDES: [usize; 4] = [1, 2, 2, 2];

/// Resolve a depth code to its block variant and per-group block counts.
pub fn resnet_blocks(depth: usize) -> Result<(BlockKind, [usize; 4]), ConfigError> {
    match depth {
        18 => Ok((BlockKind::Basic, RESNET18_BLOCKS)),
        34 => Ok((BlockKind::Basic, RESNET34_BLOCKS)),
        50 => Ok((BlockKind::Bottleneck, RESNET50_BLOCKS)),
        101 => Ok((BlockKind::Bottleneck, RESNET101_BLOCKS)),
        152 => Ok((BlockKind::Bottleneck, RESNET152_BLOCKS)),
        _ => Err(ConfigError::UnsupportedDepth(depth)),
    }
}

/// High-level sparse `ResNet` model configuration.
///
/// The non-serializable half of the configuration (custom resolver type and
/// resolver closures) is passed separately as a [`LayerParamsSpec`].
#[derive(Config, Debug)]
pub struct ResNetConfig {
    /// Depth code; one of 18, 34, 50, 101, 152.
    #[config(default = 50)]
    pub depth: usize,

    /// Number of classification classes.
    #[config(default = 1000)]
    pub num_classes: usize,

    /// Dense activation used throughout the network.
    #[config(default = "BaseActivation::Relu")]
    pub base_activation: BaseActivation,

    /// Sparse wrapper for the classifier.
    #[config(default = "SparseWeightsKind::SparseWeights")]
    pub linear_sparse_weights_type: SparseWeightsKind,

    /// Sparse wrapper for every conv.
    #[config(default = "SparseWeightsKind::SparseWeights")]
    pub conv_sparse_weights_type: SparseWeightsKind,

    /// Fill missing conv and activation resolvers with the automatic policies.
    #[config(default = false)]
    pub defaults_sparse: bool,

    /// Keyword params for every resolver.
    #[config(default = "LayerParamsConfig::new()")]
    pub layer_params_kwargs: LayerParamsConfig,
}

impl ResNetConfig {
    /// A ResNet-18 config.
    pub fn resnet18() -> Self {
        Self::new().with_depth(18)
    }

    /// A ResNet-34 config.
    pub fn resnet34() -> Self {
        Self::new().with_depth(34)
    }

    /// A ResNet-50 config.
    pub fn resnet50() -> Self {
        Self::new().with_depth(50)
    }

    /// A ResNet-101 config.
    pub fn resnet101() -> Self {
        Self::new().with_depth(101)
    }

    /// A ResNet-152 config.
    pub fn resnet152() -> Self {
        Self::new().with_depth(152)
    }

    /// The block variant and per-group block counts.
    pub fn block_layout(&self) -> Result<(BlockKind, [usize; 4]), ConfigError> {
        resnet_blocks(self.depth)
    }

    /// Apply `defaults_sparse` to a resolver spec.
    pub fn effective_spec(
        &self,
        spec: &LayerParamsSpec,
    ) -> LayerParamsSpec {
        let mut spec = spec.clone();
        if self.defaults_sparse {
            if spec.functions.conv_params_func.is_none() {
                spec.functions = spec
                    .functions
                    .with_conv_params_func(auto_sparse_conv_params);
            }
            if spec.functions.activation_params_func.is_none() {
                spec.functions = spec
                    .functions
                    .with_activation_params_func(auto_sparse_activation_params);
            }
        }
        spec
    }

    /// Build the default parameter tree for this config.
    pub fn default_sparse_params(
        &self,
        spec: &LayerParamsSpec,
    ) -> Result<SparseParams, ConfigError> {
        let (kind, num_blocks) = self.block_layout()?;
        Ok(default_resnet_params(
            kind,
            num_blocks,
            &self.effective_spec(spec),
            &self.layer_params_kwargs,
        ))
    }

    /// Resolve the network structure, using the default parameter tree.
    pub fn to_structure(
        &self,
        spec: &LayerParamsSpec,
    ) -> Result<ResNetStructureConfig, ConfigError> {
        let params = self.default_sparse_params(spec)?;
        self.to_structure_with_params(&params)
    }

    /// Resolve the network structure from a supplied parameter tree.
    ///
    /// `defaults_sparse` and `layer_params_kwargs` are not consulted; the tree
    /// is taken as-is.
    #[tracing::instrument(level = "debug", skip_all, fields(depth = self.depth))]
    pub fn to_structure_with_params(
        &self,
        params: &SparseParams,
    ) -> Result<ResNetStructureConfig, ConfigError> {
        let (kind, num_blocks) = self.block_layout()?;
        let stem_params = as_layer_params(&params.stem);

        let stem = conv_layer(
            ConvType::Conv7x7,
            3,
            STEM_PLANES,
            stem_params,
            self.conv_sparse_weights_type,
            2,
        )?;
        let stem_act = activation_layer(
            STEM_PLANES,
            stem_params,
            ConvType::Conv7x7.kernel_size(),
            self.base_activation,
        )?;

        let mut in_planes = STEM_PLANES;
        let mut layers = Vec::with_capacity(4);
        for (idx, (group, group_params)) in params.groups().into_iter().enumerate() {
            let layer = LayerBlockConfig::build(
                group,
                kind,
                num_blocks[idx],
                in_planes,
                GROUP_PLANES[idx],
                GROUP_STRIDES[idx],
                group_params,
                self.conv_sparse_weights_type,
                self.base_activation,
            )?;
            tracing::debug!(
                group,
                blocks = layer.len(),
                in_planes,
                out_planes = layer.out_planes(),
                stride = layer.stride(),
                "resolved group"
            );
            in_planes = layer.out_planes();
            layers.push(layer);
        }

        let classifier = linear_layer(
            in_planes,
            self.num_classes,
            as_layer_params(&params.linear),
            self.linear_sparse_weights_type,
        )?;

        tracing::info!(
            depth = self.depth,
            %kind,
            ?num_blocks,
            num_classes = self.num_classes,
            sparse_classifier = classifier.is_sparse(),
            "resolved ResNet structure"
        );

        Ok(ResNetStructureConfig::new(
            stem.into(),
            stem_act,
            layers,
            classifier,
        ))
    }

    /// Resolve and initialize a [`ResNet`], with the default (dense unless
    /// `defaults_sparse` or `layer_params_kwargs` say otherwise) resolvers.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<ResNet<B>, ConfigError> {
        self.init_with_spec(&LayerParamsSpec::default(), device)
    }

    /// Resolve and initialize a [`ResNet`] with the given resolver spec.
    pub fn init_with_spec<B: Backend>(
        &self,
        spec: &LayerParamsSpec,
        device: &B::Device,
    ) -> Result<ResNet<B>, ConfigError> {
        Ok(self.to_structure(spec)?.init(device))
    }
}

/// Build a [`ResNet`] of the given depth.
///
/// `config.depth` is overridden by `depth`.
pub fn build_resnet<B: Backend>(
    depth: usize,
    config: ResNetConfig,
    spec: &LayerParamsSpec,
    device: &B::Device,
) -> Result<ResNet<B>, ConfigError> {
    config.with_depth(depth).init_with_spec(spec, device)
}

/// [`ResNet`] Structure Config.
///
/// This config defines the fully-resolved structure of a network; every
/// sparse decision has been made. It does not re-check internal sizes.
#[derive(Config, Debug)]
pub struct ResNetStructureConfig {
    /// Stem 7x7 conv/norm.
    pub stem: ConvNormConfig,

    /// Stem activation.
    pub stem_act: ActivationLayerConfig,

    /// The four groups.
    pub layers: Vec<LayerBlockConfig>,

    /// Classifier.
    pub classifier: LinearLayerConfig,
}

impl ResNetStructureConfig {
    /// Number of classification classes.
    pub fn num_classes(&self) -> usize {
        self.classifier.linear.d_output
    }

    /// Initialize a [`ResNet`] model.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResNet<B> {
        ResNet {
            stem: self.stem.init(device),
            stem_act: self.stem_act.init(),
            stem_pool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),

            layers: self.layers.iter().map(|c| c.init(device)).collect(),

            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            classifier: self.classifier.init(device),
        }
    }
}

/// Sparse `ResNet` model.
#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    /// Stem conv/norm.
    pub stem: ConvNorm<B>,
    /// Stem activation.
    pub stem_act: ActivationLayer,
    /// Stem pool.
    pub stem_pool: MaxPool2d,

    /// Groups.
    pub layers: Vec<LayerBlock<B>>,

    /// Head pooling.
    pub avgpool: AdaptiveAvgPool2d,
    /// Head classifier.
    pub classifier: LinearLayer<B>,
}

impl<B: Backend> ResNet<B> {
    /// Number of classification classes.
    pub fn num_classes(&self) -> usize {
        self.classifier.linear().weight.dims()[1]
    }

    /// `ResNet` forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, 3, height, width]`` images.
    ///
    /// # Returns
    ///
    /// ``[batch, num_classes]`` logits.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let [batch] = unpack_shape_contract!(
            ["batch", "channels", "height", "width"],
            &input,
            &["batch"],
            &[("channels", self.stem.in_channels())],
        );

        // Stem
        let x = self.stem.forward(input);
        let x = self.stem_act.forward(x);
        let x = self.stem_pool.forward(x);

        // Residual groups
        let x = self.layers.iter().fold(x, |x, layer| layer.forward(x));

        // Head
        let x = self.avgpool.forward(x);
        // Reshape [B, C, 1, 1] -> [B, C]
        let x: Tensor<B, 2> = x.flatten(1, 3);
        let x = self.classifier.forward(x);

        debug_assert_eq!(x.dims(), [batch, self.num_classes()]);
        x
    }

    /// Re-apply every sparse weight mask in the network.
    ///
    /// Call after each optimizer step; the optimizer moves masked weights.
    pub fn rezero_weights(self) -> Self {
        Self {
            stem: self.stem.rezero_weights(),
            layers: self
                .layers
                .into_iter()
                .map(LayerBlock::rezero_weights)
                .collect(),
            classifier: self.classifier.rezero_weights(),
            ..self
        }
    }
}
