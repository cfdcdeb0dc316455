//! # Layer Parameter Resolver
//!
//! A [`LayerParams`] decides, for one layer position and shape, whether the
//! layer is sparsified, and with which parameters:
//!
//! * [`LayerParams::get_linear_params`] and [`LayerParams::get_conv_params`]
//!   resolve [`SparseWeightsParams`] for the weight-masking wrappers.
//! * [`LayerParams::get_activation_params`] resolves [`ActivationParams`]
//!   for a k-winners activation.
//!
//! `None` always means "dense; no wrapper".
//!
//! [`DefaultLayerParams`] is built from optional resolver closures
//! ([`ResolverFunctions`]) and static keyword params ([`LayerParamsConfig`]);
//! a closure, when present, takes precedence over the keyword params.
//!
//! Resolvers must be pure: the same shape must always produce the same decision.

use crate::errors::ConfigError;
use crate::layers::kwinners::KWinnersKind;
use burn::config::Config;
use std::fmt;
use std::sync::Arc;

/// Params for a sparse-weights wrapper.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SparseWeightsParams {
    /// Fraction of the weights of each output unit forced to zero.
    pub sparsity: f64,
}

impl SparseWeightsParams {
    /// Create a new [`SparseWeightsParams`].
    pub fn new(sparsity: f64) -> Self {
        Self { sparsity }
    }

    /// Check that ``0 <= sparsity < 1``.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if (0.0..1.0).contains(&self.sparsity) {
            Ok(self)
        } else {
            Err(ConfigError::InvalidSparsity(self.sparsity))
        }
    }
}

/// Params for a k-winners activation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivationParams {
    /// Fraction of units kept active during training.
    pub percent_on: f64,

    /// Multiplier applied to `k` at inference time.
    pub k_inference_factor: f64,

    /// Overrides the k-winners variant; ``None`` selects [`KWinnersKind::Global`].
    pub kwinners: Option<KWinnersKind>,
}

impl ActivationParams {
    /// Create a new [`ActivationParams`].
    pub fn new(percent_on: f64) -> Self {
        Self {
            percent_on,
            k_inference_factor: 1.0,
            kwinners: None,
        }
    }

    /// Set the inference `k` multiplier.
    pub fn with_k_inference_factor(
        self,
        k_inference_factor: f64,
    ) -> Self {
        Self {
            k_inference_factor,
            ..self
        }
    }

    /// Override the k-winners variant.
    pub fn with_kwinners(
        self,
        kwinners: KWinnersKind,
    ) -> Self {
        Self {
            kwinners: Some(kwinners),
            ..self
        }
    }

    /// Check that ``0 < percent_on <= 1``.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.percent_on > 0.0 && self.percent_on <= 1.0 {
            Ok(self)
        } else {
            Err(ConfigError::InvalidPercentOn(self.percent_on))
        }
    }
}

/// ``(input_size, output_size) -> params`` for linear layers.
pub type LinearParamsFn = Arc<dyn Fn(usize, usize) -> Option<SparseWeightsParams> + Send + Sync>;

/// ``(in_channels, out_channels, kernel_size) -> params`` for conv layers.
pub type ConvParamsFn = Arc<dyn Fn(usize, usize, usize) -> Option<SparseWeightsParams> + Send + Sync>;

/// ``(in_channels, out_channels, kernel_size) -> params`` for activations.
pub type ActivationParamsFn =
    Arc<dyn Fn(usize, usize, usize) -> Option<ActivationParams> + Send + Sync>;

/// Layer parameter resolver.
pub trait LayerParams: fmt::Debug + Send + Sync {
    /// Resolve sparse-weights params for a linear layer.
    fn get_linear_params(
        &self,
        input_size: usize,
        output_size: usize,
    ) -> Option<SparseWeightsParams>;

    /// Resolve sparse-weights params for a conv layer.
    fn get_conv_params(
        &self,
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
    ) -> Option<SparseWeightsParams>;

    /// Resolve k-winners params for an activation.
    ///
    /// `kernel_size` is the kernel of the preceding conv; ``0`` when unspecified.
    fn get_activation_params(
        &self,
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
    ) -> Option<ActivationParams>;
}

/// Shared handle to a resolver.
pub type LayerParamsRef = Arc<dyn LayerParams>;

/// Static keyword params for [`DefaultLayerParams`].
#[derive(Config, Debug)]
pub struct LayerParamsConfig {
    /// Weight sparsity applied to every linear and conv layer.
    #[config(default = "None")]
    pub weights_sparsity: Option<f64>,

    /// k-winners density applied to every activation.
    #[config(default = "None")]
    pub percent_on: Option<f64>,

    /// Inference `k` multiplier for keyword-derived activations.
    #[config(default = "1.0")]
    pub k_inference_factor: f64,
}

impl LayerParamsConfig {
    /// The same params, with activation sparsity removed.
    pub fn without_activation(&self) -> Self {
        Self {
            percent_on: None,
            ..self.clone()
        }
    }
}

/// Optional per-role resolver closures.
#[derive(Clone, Default)]
pub struct ResolverFunctions {
    /// Linear layer resolver.
    pub linear_params_func: Option<LinearParamsFn>,

    /// Conv layer resolver.
    pub conv_params_func: Option<ConvParamsFn>,

    /// Activation resolver.
    pub activation_params_func: Option<ActivationParamsFn>,
}

impl fmt::Debug for ResolverFunctions {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ResolverFunctions")
            .field("linear_params_func", &self.linear_params_func.is_some())
            .field("conv_params_func", &self.conv_params_func.is_some())
            .field(
                "activation_params_func",
                &self.activation_params_func.is_some(),
            )
            .finish()
    }
}

impl ResolverFunctions {
    /// Set the linear resolver.
    pub fn with_linear_params_func<F>(
        self,
        func: F,
    ) -> Self
    where
        F: Fn(usize, usize) -> Option<SparseWeightsParams> + Send + Sync + 'static,
    {
        Self {
            linear_params_func: Some(Arc::new(func)),
            ..self
        }
    }

    /// Set the conv resolver.
    pub fn with_conv_params_func<F>(
        self,
        func: F,
    ) -> Self
    where
        F: Fn(usize, usize, usize) -> Option<SparseWeightsParams> + Send + Sync + 'static,
    {
        Self {
            conv_params_func: Some(Arc::new(func)),
            ..self
        }
    }

    /// Set the activation resolver.
    pub fn with_activation_params_func<F>(
        self,
        func: F,
    ) -> Self
    where
        F: Fn(usize, usize, usize) -> Option<ActivationParams> + Send + Sync + 'static,
    {
        Self {
            activation_params_func: Some(Arc::new(func)),
            ..self
        }
    }

    /// The same resolvers, with the activation resolver removed.
    pub fn without_activation(&self) -> Self {
        Self {
            activation_params_func: None,
            ..self.clone()
        }
    }
}

/// The stock [`LayerParams`] implementation.
#[derive(Debug, Clone)]
pub struct DefaultLayerParams {
    functions: ResolverFunctions,
    config: LayerParamsConfig,
}

impl DefaultLayerParams {
    /// Create a new resolver.
    pub fn new(
        functions: ResolverFunctions,
        config: LayerParamsConfig,
    ) -> Self {
        Self { functions, config }
    }
}

impl LayerParams for DefaultLayerParams {
    fn get_linear_params(
        &self,
        input_size: usize,
        output_size: usize,
    ) -> Option<SparseWeightsParams> {
        match &self.functions.linear_params_func {
            Some(func) => func(input_size, output_size),
            None => self.config.weights_sparsity.map(SparseWeightsParams::new),
        }
    }

    fn get_conv_params(
        &self,
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
    ) -> Option<SparseWeightsParams> {
        match &self.functions.conv_params_func {
            Some(func) => func(in_channels, out_channels, kernel_size),
            None => self.config.weights_sparsity.map(SparseWeightsParams::new),
        }
    }

    fn get_activation_params(
        &self,
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
    ) -> Option<ActivationParams> {
        match &self.functions.activation_params_func {
            Some(func) => func(in_channels, out_channels, kernel_size),
            None => self.config.percent_on.map(|percent_on| {
                ActivationParams::new(percent_on)
                    .with_k_inference_factor(self.config.k_inference_factor)
            }),
        }
    }
}

/// Builds a resolver from resolver closures and keyword params.
///
/// This is the hook for custom [`LayerParams`] implementations.
pub type LayerParamsFactory =
    Arc<dyn Fn(ResolverFunctions, LayerParamsConfig) -> LayerParamsRef + Send + Sync>;

/// The non-serializable half of a model's sparsity configuration.
#[derive(Clone, Default)]
pub struct LayerParamsSpec {
    /// Custom resolver factory; ``None`` selects [`DefaultLayerParams`].
    pub layer_params_type: Option<LayerParamsFactory>,

    /// Resolver closures handed to the factory.
    pub functions: ResolverFunctions,
}

impl fmt::Debug for LayerParamsSpec {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("LayerParamsSpec")
            .field("layer_params_type", &self.layer_params_type.is_some())
            .field("functions", &self.functions)
            .finish()
    }
}

impl From<ResolverFunctions> for LayerParamsSpec {
    fn from(functions: ResolverFunctions) -> Self {
        Self {
            layer_params_type: None,
            functions,
        }
    }
}

impl LayerParamsSpec {
    /// Set a custom resolver factory.
    pub fn with_layer_params_type<F, P>(
        self,
        factory: F,
    ) -> Self
    where
        F: Fn(ResolverFunctions, LayerParamsConfig) -> P + Send + Sync + 'static,
        P: LayerParams + 'static,
    {
        Self {
            layer_params_type: Some(Arc::new(move |functions, config| {
                Arc::new(factory(functions, config)) as LayerParamsRef
            })),
            ..self
        }
    }

    /// Build a resolver.
    pub fn build(
        &self,
        functions: ResolverFunctions,
        config: LayerParamsConfig,
    ) -> LayerParamsRef {
        match &self.layer_params_type {
            Some(factory) => factory(functions, config),
            None => Arc::new(DefaultLayerParams::new(functions, config)),
        }
    }
}

/// Heuristic weight sparsity for a conv layer, from its fan-in.
pub fn auto_sparse_conv_params(
    in_channels: usize,
    _out_channels: usize,
    kernel_size: usize,
) -> Option<SparseWeightsParams> {
    let weights_per_channel = kernel_size * kernel_size * in_channels;
    let density = match weights_per_channel {
        n if n < 100 => 0.7,
        n if n < 200 => 0.5,
        n if n < 500 => 0.4,
        n if n < 1000 => 0.3,
        n if n < 4000 => 0.2,
        _ => 0.15,
    };
    Some(SparseWeightsParams::new(1.0 - density))
}

/// Heuristic k-winners params; 1x1 convs stay dense.
pub fn auto_sparse_activation_params(
    _in_channels: usize,
    _out_channels: usize,
    kernel_size: usize,
) -> Option<ActivationParams> {
    if kernel_size == 1 {
        return None;
    }
    Some(
        ActivationParams::new(0.3)
            .with_k_inference_factor(1.0)
            .with_kwinners(KWinnersKind::Local),
    )
}
