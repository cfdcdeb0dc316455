//! # Layer Factories
//!
//! Each factory builds the config for one numeric layer, asking a
//! [`LayerParams`] resolver whether to wrap it in a sparse variant:
//!
//! * [`linear_layer`] - a biased [`Linear`], optionally [`SparseWeights`].
//! * [`conv_layer`] - an unbiased [`Conv2d`] from the [`ConvType`] table,
//!   optionally [`SparseWeights2d`].
//! * [`activation_layer`] - a [`BaseActivation`], optionally followed by
//!   k-winners.
//!
//! A missing resolver, or a resolver returning `None`, yields the plain dense
//! layer. Resolved params are range-checked here, before any module exists.

use crate::errors::ConfigError;
use crate::layers::activation::{ActivationLayerConfig, BaseActivation};
use crate::layers::kwinners::KWinners2dConfig;
use crate::layers::params::LayerParams;
use crate::layers::sparse_weights::{
    SparseWeights, SparseWeights2d, SparseWeightsConfig, SparseWeightsKind,
};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::{Backend, Tensor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Conv size tag; fixes the kernel size and ("same") padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvType {
    /// ``1x1`` kernel, no padding.
    #[serde(rename = "1x1")]
    Conv1x1,

    /// ``3x3`` kernel, padding 1.
    #[serde(rename = "3x3")]
    Conv3x3,

    /// ``5x5`` kernel, padding 2.
    #[serde(rename = "5x5")]
    Conv5x5,

    /// ``7x7`` kernel, padding 3.
    #[serde(rename = "7x7")]
    Conv7x7,
}

impl ConvType {
    /// Square kernel size.
    pub fn kernel_size(self) -> usize {
        match self {
            Self::Conv1x1 => 1,
            Self::Conv3x3 => 3,
            Self::Conv5x5 => 5,
            Self::Conv7x7 => 7,
        }
    }

    /// Symmetric padding.
    pub fn padding(self) -> usize {
        self.kernel_size() / 2
    }
}

impl fmt::Display for ConvType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let k = self.kernel_size();
        write!(f, "{k}x{k}")
    }
}

impl FromStr for ConvType {
    type Err = ConfigError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag {
            "1x1" => Ok(Self::Conv1x1),
            "3x3" => Ok(Self::Conv3x3),
            "5x5" => Ok(Self::Conv5x5),
            "7x7" => Ok(Self::Conv7x7),
            _ => Err(ConfigError::UnknownConvType(tag.to_string())),
        }
    }
}

/// [`LinearLayer`] Config.
#[derive(Config, Debug)]
pub struct LinearLayerConfig {
    /// The dense layer.
    pub linear: LinearConfig,

    /// Sparse wrapper; ``None`` for dense.
    #[config(default = "None")]
    pub sparse: Option<SparseWeightsConfig>,
}

impl LinearLayerConfig {
    /// Is this layer wrapped?
    pub fn is_sparse(&self) -> bool {
        self.sparse.is_some()
    }

    /// Initialize a [`LinearLayer`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> LinearLayer<B> {
        match &self.sparse {
            Some(sparse) => LinearLayer::Sparse(sparse.init_linear(&self.linear, device)),
            None => LinearLayer::Dense(self.linear.init(device)),
        }
    }
}

/// Dense or sparse linear layer.
#[derive(Module, Debug)]
pub enum LinearLayer<B: Backend> {
    /// Plain [`Linear`].
    Dense(Linear<B>),

    /// Masked [`Linear`].
    Sparse(SparseWeights<B>),
}

impl<B: Backend> LinearLayer<B> {
    /// Forward pass.
    pub fn forward<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        match self {
            Self::Dense(layer) => layer.forward(input),
            Self::Sparse(layer) => layer.forward(input),
        }
    }

    /// Re-apply the sparse mask, if any.
    pub fn rezero_weights(self) -> Self {
        match self {
            Self::Sparse(layer) => Self::Sparse(layer.rezero_weights()),
            dense => dense,
        }
    }

    /// The underlying [`Linear`].
    pub fn linear(&self) -> &Linear<B> {
        match self {
            Self::Dense(layer) => layer,
            Self::Sparse(layer) => &layer.module,
        }
    }
}

/// [`ConvLayer`] Config.
#[derive(Config, Debug)]
pub struct ConvLayerConfig {
    /// The dense layer.
    pub conv: Conv2dConfig,

    /// Sparse wrapper; ``None`` for dense.
    #[config(default = "None")]
    pub sparse: Option<SparseWeightsConfig>,
}

impl ConvLayerConfig {
    /// Is this layer wrapped?
    pub fn is_sparse(&self) -> bool {
        self.sparse.is_some()
    }

    /// Number of input channels.
    pub fn in_channels(&self) -> usize {
        self.conv.channels[0]
    }

    /// Number of output channels.
    pub fn out_channels(&self) -> usize {
        self.conv.channels[1]
    }

    /// Square stride.
    pub fn stride(&self) -> usize {
        self.conv.stride[0]
    }

    /// Initialize a [`ConvLayer`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ConvLayer<B> {
        match &self.sparse {
            Some(sparse) => ConvLayer::Sparse(sparse.init_conv(&self.conv, device)),
            None => ConvLayer::Dense(self.conv.init(device)),
        }
    }
}

/// Dense or sparse conv layer.
#[derive(Module, Debug)]
pub enum ConvLayer<B: Backend> {
    /// Plain [`Conv2d`].
    Dense(Conv2d<B>),

    /// Masked [`Conv2d`].
    Sparse(SparseWeights2d<B>),
}

impl<B: Backend> ConvLayer<B> {
    /// Forward pass.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        match self {
            Self::Dense(layer) => layer.forward(input),
            Self::Sparse(layer) => layer.forward(input),
        }
    }

    /// Re-apply the sparse mask, if any.
    pub fn rezero_weights(self) -> Self {
        match self {
            Self::Sparse(layer) => Self::Sparse(layer.rezero_weights()),
            dense => dense,
        }
    }

    /// The underlying [`Conv2d`].
    pub fn conv(&self) -> &Conv2d<B> {
        match self {
            Self::Dense(layer) => layer,
            Self::Sparse(layer) => &layer.module,
        }
    }
}

/// Build a linear layer config.
///
/// # Arguments
///
/// - `input_size`: input features.
/// - `output_size`: output features.
/// - `layer_params`: resolver; ``None`` for dense.
/// - `sparse_weights_type`: wrapper used when the resolver returns params.
pub fn linear_layer(
    input_size: usize,
    output_size: usize,
    layer_params: Option<&dyn LayerParams>,
    sparse_weights_type: SparseWeightsKind,
) -> Result<LinearLayerConfig, ConfigError> {
    let sparse = layer_params
        .and_then(|params| params.get_linear_params(input_size, output_size))
        .map(|params| params.validate())
        .transpose()?
        .map(|params| SparseWeightsConfig::new(params.sparsity).with_kind(sparse_weights_type));

    Ok(LinearLayerConfig::new(LinearConfig::new(input_size, output_size)).with_sparse(sparse))
}

/// Build a conv layer config.
///
/// The layer has no bias; kernel and padding come from `conv_type`.
pub fn conv_layer(
    conv_type: ConvType,
    in_channels: usize,
    out_channels: usize,
    layer_params: Option<&dyn LayerParams>,
    sparse_weights_type: SparseWeightsKind,
    stride: usize,
) -> Result<ConvLayerConfig, ConfigError> {
    let kernel_size = conv_type.kernel_size();
    let padding = conv_type.padding();

    let sparse = layer_params
        .and_then(|params| params.get_conv_params(in_channels, out_channels, kernel_size))
        .map(|params| params.validate())
        .transpose()?
        .map(|params| SparseWeightsConfig::new(params.sparsity).with_kind(sparse_weights_type));

    let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_bias(false);

    Ok(ConvLayerConfig::new(conv).with_sparse(sparse))
}

/// Build an activation layer config.
///
/// The resolver is asked for ``(0, out_channels, kernel_size)``, where
/// `kernel_size` is the kernel of the preceding conv (``0`` if unspecified).
pub fn activation_layer(
    out_channels: usize,
    layer_params: Option<&dyn LayerParams>,
    kernel_size: usize,
    base_activation: BaseActivation,
) -> Result<ActivationLayerConfig, ConfigError> {
    let kwinners = layer_params
        .and_then(|params| params.get_activation_params(0, out_channels, kernel_size))
        .map(|params| params.validate())
        .transpose()?
        .map(|params| {
            KWinners2dConfig::new(out_channels, params.percent_on)
                .with_k_inference_factor(params.k_inference_factor)
                .with_kind(params.kwinners.unwrap_or_default())
        });

    Ok(ActivationLayerConfig::new()
        .with_base(base_activation)
        .with_kwinners(kwinners))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::kwinners::KWinnersKind;
    use crate::layers::params::{
        ActivationParams, DefaultLayerParams, LayerParamsConfig, ResolverFunctions,
        SparseWeightsParams,
    };
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    fn keyword_params(
        weights_sparsity: Option<f64>,
        percent_on: Option<f64>,
    ) -> DefaultLayerParams {
        DefaultLayerParams::new(
            ResolverFunctions::default(),
            LayerParamsConfig::new()
                .with_weights_sparsity(weights_sparsity)
                .with_percent_on(percent_on),
        )
    }

    #[test]
    fn test_conv_type_table() {
        let table: Vec<(usize, usize)> = ["1x1", "3x3", "5x5", "7x7"]
            .iter()
            .map(|tag| {
                let conv_type: ConvType = tag.parse().unwrap();
                assert_eq!(&conv_type.to_string(), tag);
                (conv_type.kernel_size(), conv_type.padding())
            })
            .collect();
        assert_eq!(table, vec![(1, 0), (3, 1), (5, 2), (7, 3)]);

        assert_eq!(
            "2x2".parse::<ConvType>(),
            Err(ConfigError::UnknownConvType("2x2".to_string()))
        );
    }

    #[test]
    fn test_dense_when_unresolved() {
        let device = Default::default();

        let config = linear_layer(8, 4, None, SparseWeightsKind::SparseWeights).unwrap();
        assert!(!config.is_sparse());
        assert!(matches!(config.init::<B>(&device), LinearLayer::Dense(_)));

        let dense = keyword_params(None, None);
        let config = conv_layer(
            ConvType::Conv3x3,
            4,
            8,
            Some(&dense),
            SparseWeightsKind::SparseWeights,
            1,
        )
        .unwrap();
        assert!(!config.is_sparse());
        assert!(!config.conv.bias);
        assert!(matches!(config.init::<B>(&device), ConvLayer::Dense(_)));

        let config = activation_layer(8, Some(&dense), 3, BaseActivation::Relu).unwrap();
        assert!(!config.is_sparse());
    }

    #[test]
    fn test_sparse_when_resolved() {
        let device = Default::default();
        let params = keyword_params(Some(0.5), Some(0.25));

        let config = linear_layer(
            8,
            4,
            Some(&params),
            SparseWeightsKind::PrunableSparseWeights,
        )
        .unwrap();
        let sparse = config.sparse.as_ref().unwrap();
        assert_eq!(sparse.sparsity, 0.5);
        assert_eq!(sparse.kind, SparseWeightsKind::PrunableSparseWeights);
        let layer: LinearLayer<B> = config.init(&device);
        assert!(matches!(layer, LinearLayer::Sparse(_)));
        assert_eq!(layer.linear().weight.dims(), [8, 4]);

        let config = conv_layer(
            ConvType::Conv7x7,
            3,
            16,
            Some(&params),
            SparseWeightsKind::SparseWeights,
            2,
        )
        .unwrap();
        assert_eq!(config.conv.kernel_size, [7, 7]);
        assert_eq!(config.stride(), 2);
        let layer: ConvLayer<B> = config.init(&device);
        assert!(matches!(layer, ConvLayer::Sparse(_)));

        let input = Tensor::<B, 4>::ones([1, 3, 9, 9], &device);
        let output = layer.forward(input);
        assert_shape_contract!(
            ["batch", "channels", "height", "width"],
            &output,
            &[("batch", 1), ("channels", 16), ("height", 5), ("width", 5)]
        );

        let config = activation_layer(16, Some(&params), 7, BaseActivation::Relu).unwrap();
        let kwinners = config.kwinners.as_ref().unwrap();
        assert_eq!(kwinners.channels, 16);
        assert_eq!(kwinners.percent_on, 0.25);
        assert_eq!(kwinners.kind, KWinnersKind::Global);
    }

    #[test]
    fn test_activation_resolves_with_kernel_size() {
        let functions = ResolverFunctions::default().with_activation_params_func(
            |in_channels, _, kernel_size| {
                assert_eq!(in_channels, 0);
                (kernel_size != 1).then(|| {
                    ActivationParams::new(0.5)
                        .with_k_inference_factor(1.25)
                        .with_kwinners(KWinnersKind::Local)
                })
            },
        );
        let params = DefaultLayerParams::new(functions, LayerParamsConfig::new());

        let config = activation_layer(4, Some(&params), 1, BaseActivation::Gelu).unwrap();
        assert!(!config.is_sparse());
        assert_eq!(config.base, BaseActivation::Gelu);

        let config = activation_layer(4, Some(&params), 0, BaseActivation::Relu).unwrap();
        let kwinners = config.kwinners.as_ref().unwrap();
        assert_eq!(kwinners.kind, KWinnersKind::Local);
        assert_eq!(kwinners.k_inference_factor, 1.25);

        // Base activation first, then k-winners.
        let device = Default::default();
        let layer = config.init();
        let input: Tensor<B, 4> = Tensor::from_data(
            [[[[-1.0]], [[-2.0]], [[3.0]], [[1.0]]]],
            &device,
        );
        let output = layer.forward(input);
        output.to_data().assert_eq(
            &Tensor::<B, 4>::from_data([[[[0.0]], [[0.0]], [[3.0]], [[1.0]]]], &device).to_data(),
            true,
        );
    }

    #[test]
    fn test_invalid_params_are_rejected() {
        let params = keyword_params(Some(1.5), Some(0.0));

        assert_eq!(
            linear_layer(8, 4, Some(&params), SparseWeightsKind::SparseWeights).unwrap_err(),
            ConfigError::InvalidSparsity(1.5)
        );
        assert_eq!(
            activation_layer(8, Some(&params), 3, BaseActivation::Relu).unwrap_err(),
            ConfigError::InvalidPercentOn(0.0)
        );

        let functions = ResolverFunctions::default()
            .with_conv_params_func(|_, _, _| Some(SparseWeightsParams::new(-0.1)));
        let params = DefaultLayerParams::new(functions, LayerParamsConfig::new());
        assert_eq!(
            conv_layer(
                ConvType::Conv1x1,
                8,
                8,
                Some(&params),
                SparseWeightsKind::SparseWeights,
                1
            )
            .unwrap_err(),
            ConfigError::InvalidSparsity(-0.1)
        );
    }
}
