//! # Activation Layers
//!
//! An [`ActivationLayer`] applies a parameter-free [`BaseActivation`] and
//! then, when the layer resolved k-winners params, a [`KWinners2d`] over the
//! result. With no k-winners the layer is just the base nonlinearity.
//!
//! The base carries no weights, so it is held as an [`Ignored`] module field
//! and contributes nothing to the record.

use crate::errors::ConfigError;
use crate::layers::kwinners::{KWinners2d, KWinners2dConfig};
use burn::config::Config;
use burn::module::{Ignored, Module};
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Slope used by `"leaky_relu"` when parsed by name.
pub const DEFAULT_NEGATIVE_SLOPE: f64 = 0.01;

/// The dense nonlinearity every activation layer starts with.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum BaseActivation {
    /// ``max(x, 0)``.
    #[default]
    Relu,

    /// Gaussian error linear unit.
    Gelu,

    /// ``x * sigmoid(x)``.
    Silu,

    /// ``x`` for positive inputs, ``negative_slope * x`` otherwise.
    LeakyRelu {
        /// Slope applied to negative inputs.
        negative_slope: f64,
    },

    /// Logistic sigmoid.
    Sigmoid,

    /// Hyperbolic tangent.
    Tanh,
}

impl BaseActivation {
    /// Apply the nonlinearity.
    pub fn apply<B: Backend, const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        match *self {
            Self::Relu => activation::relu(input),
            Self::Gelu => activation::gelu(input),
            Self::Silu => activation::silu(input),
            Self::LeakyRelu { negative_slope } => activation::leaky_relu(input, negative_slope),
            Self::Sigmoid => activation::sigmoid(input),
            Self::Tanh => activation::tanh(input),
        }
    }
}

impl fmt::Display for BaseActivation {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::Relu => f.write_str("relu"),
            Self::Gelu => f.write_str("gelu"),
            Self::Silu => f.write_str("silu"),
            Self::LeakyRelu { negative_slope } => write!(f, "leaky_relu({negative_slope})"),
            Self::Sigmoid => f.write_str("sigmoid"),
            Self::Tanh => f.write_str("tanh"),
        }
    }
}

impl FromStr for BaseActivation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "relu" => Ok(Self::Relu),
            "gelu" => Ok(Self::Gelu),
            "silu" | "swish" => Ok(Self::Silu),
            "leaky_relu" | "leakyrelu" => Ok(Self::LeakyRelu {
                negative_slope: DEFAULT_NEGATIVE_SLOPE,
            }),
            "sigmoid" => Ok(Self::Sigmoid),
            "tanh" => Ok(Self::Tanh),
            _ => Err(ConfigError::UnknownActivation(s.to_string())),
        }
    }
}

/// [`ActivationLayer`] Config.
#[derive(Config, Debug)]
pub struct ActivationLayerConfig {
    /// Always-applied base nonlinearity.
    #[config(default = "BaseActivation::Relu")]
    pub base: BaseActivation,

    /// K-winners applied after the base activation; ``None`` for dense.
    #[config(default = "None")]
    pub kwinners: Option<KWinners2dConfig>,
}

impl ActivationLayerConfig {
    /// Is this activation sparse?
    pub fn is_sparse(&self) -> bool {
        self.kwinners.is_some()
    }

    /// Initialize an [`ActivationLayer`].
    pub fn init(&self) -> ActivationLayer {
        ActivationLayer {
            base: Ignored(self.base),
            kwinners: self.kwinners.as_ref().map(KWinners2dConfig::init),
        }
    }
}

/// Base activation, optionally followed by k-winners.
#[derive(Module, Clone, Debug)]
pub struct ActivationLayer {
    /// Base nonlinearity.
    pub base: Ignored<BaseActivation>,

    /// Optional k-winners.
    pub kwinners: Option<KWinners2d>,
}

impl ActivationLayer {
    /// The base nonlinearity.
    pub fn base(&self) -> BaseActivation {
        *self.base
    }

    /// Does the layer end in k-winners?
    pub fn is_sparse(&self) -> bool {
        self.kwinners.is_some()
    }

    /// Build an [`ActivationLayerConfig`] for this module.
    pub fn to_config(&self) -> ActivationLayerConfig {
        ActivationLayerConfig::new()
            .with_base(self.base())
            .with_kwinners(self.kwinners.as_ref().map(KWinners2d::to_config))
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, channels, height, width]``.
    ///
    /// # Returns
    ///
    /// A tensor of the same shape.
    pub fn forward<B: Backend>(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let x = self.base.apply(input);
        match &self.kwinners {
            Some(kwinners) => kwinners.forward(x),
            None => x,
        }
    }
}
