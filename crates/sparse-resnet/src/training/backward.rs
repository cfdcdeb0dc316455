//! # Backward Pass Selection
//!
//! [`BackwardPass`] is chosen once, at session setup: plain back-propagation,
//! or back-propagation through a caller-supplied [`LossScaler`].

use crate::errors::TrainingError;
use burn::module::AutodiffModule;
use burn::optim::GradientsParams;
use burn::prelude::Tensor;
use burn::tensor::backend::AutodiffBackend;
use std::fmt;

/// Mixed-precision loss scaling.
///
/// Implementations scale the loss before back-propagation and return
/// gradients that have already been unscaled.
pub trait LossScaler<B: AutodiffBackend> {
    /// Scale `loss`, back-propagate, and return the unscaled gradients.
    fn scaled_backward(
        &mut self,
        loss: Tensor<B, 1>,
    ) -> B::Gradients;
}

/// The backward pass of a training session.
pub enum BackwardPass<B: AutodiffBackend> {
    /// Back-propagate the loss directly.
    Standard,

    /// Back-propagate through a [`LossScaler`].
    ScaledMixedPrecision(Box<dyn LossScaler<B>>),
}

impl<B: AutodiffBackend> fmt::Debug for BackwardPass<B> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl<B: AutodiffBackend> BackwardPass<B> {
    /// Select the backward pass.
    ///
    /// A scaler supplied without `mixed_precision` is ignored.
    ///
    /// # Errors
    ///
    /// [`TrainingError::MissingLossScaler`] when `mixed_precision` is set and
    /// no scaler is available.
    pub fn select(
        mixed_precision: bool,
        loss_scaler: Option<Box<dyn LossScaler<B>>>,
    ) -> Result<Self, TrainingError> {
        match (mixed_precision, loss_scaler) {
            (true, Some(scaler)) => Ok(Self::ScaledMixedPrecision(scaler)),
            (true, None) => Err(TrainingError::MissingLossScaler),
            (false, scaler) => {
                if scaler.is_some() {
                    tracing::debug!("mixed precision disabled; ignoring loss scaler");
                }
                Ok(Self::Standard)
            }
        }
    }

    /// Variant name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Standard => "Standard",
            Self::ScaledMixedPrecision(_) => "ScaledMixedPrecision",
        }
    }

    /// Back-propagate `loss`, collecting the gradients of `model`.
    pub fn backward<M: AutodiffModule<B>>(
        &mut self,
        loss: Tensor<B, 1>,
        model: &M,
    ) -> GradientsParams {
        let grads = match self {
            Self::Standard => loss.backward(),
            Self::ScaledMixedPrecision(scaler) => scaler.scaled_backward(loss),
        };
        GradientsParams::from_grads(grads, model)
    }
}
