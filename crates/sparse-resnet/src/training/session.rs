//! # Training Session
//!
//! A [`TrainingSession`] holds everything one epoch of training touches: the
//! model, optimizer, loss function, loader, device, backward pass and the
//! optional pre/post-batch hooks.
//!
//! The session owns no training logic; a
//! [`TrainingStrategy`](crate::training::strategy::TrainingStrategy) drives it.

use crate::errors::TrainingError;
use crate::training::ImageClassifier;
use crate::training::backward::{BackwardPass, LossScaler};
use crate::training::data::{ClassificationLoader, LossFunction};
use burn::config::Config;
use burn::module::AutodiffModule;
use burn::optim::Optimizer;
use burn::prelude::{Backend, Tensor};
use burn::tensor::ElementConversion;
use burn::tensor::backend::AutodiffBackend;
use std::fmt;
use std::time::Duration;

/// [`TrainingSession`] Config.
#[derive(Config, Debug)]
pub struct TrainingSessionConfig {
    /// Batch budget per epoch; an epoch stops early once it is spent.
    #[config(default = "usize::MAX")]
    pub batches_in_epoch: usize,

    /// Optimizer learning rate.
    #[config(default = 0.1)]
    pub learning_rate: f64,

    /// Back-propagate through a [`LossScaler`].
    #[config(default = false)]
    pub mixed_precision: bool,

    /// Stage batches in pinned host memory.
    ///
    /// burn device transfers take no asynchronous hint, so the flag is
    /// recorded on the epoch span only.
    #[config(default = false)]
    pub pin_memory: bool,
}

/// Wall-clock breakdown of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchTiming {
    /// Batch fetch and device transfer.
    pub data: Duration,

    /// Forward pass and loss.
    pub forward: Duration,

    /// Backward pass.
    pub backward: Duration,

    /// Optimizer step.
    pub weight_update: Duration,
}

impl BatchTiming {
    /// Sum of the four durations.
    pub fn total(&self) -> Duration {
        self.data + self.forward + self.backward + self.weight_update
    }
}

impl fmt::Display for BatchTiming {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "Data: {:.3}s, forward: {:.3}s, backward: {:.3}s, weight update: {:.3}s",
            self.data.as_secs_f64(),
            self.forward.as_secs_f64(),
            self.backward.as_secs_f64(),
            self.weight_update.as_secs_f64(),
        )
    }
}

/// What the post-batch hook sees.
#[derive(Debug, Clone)]
pub struct BatchReport<B: Backend> {
    /// The detached batch loss.
    pub loss: Tensor<B, 1>,

    /// Zero-based batch index within the epoch.
    pub batch_idx: usize,

    /// The number of images in the batch.
    pub num_images: usize,

    /// Timing breakdown.
    pub timing: BatchTiming,
}

impl<B: Backend> BatchReport<B> {
    /// The loss as a host scalar.
    ///
    /// Reading the value synchronizes with the device.
    pub fn loss_value(&self) -> f64 {
        self.loss.clone().into_scalar().elem()
    }
}

/// Aggregate of one epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EpochSummary {
    /// Batches trained.
    pub batches: usize,

    /// Images trained.
    pub images: usize,

    /// Sum of the batch losses, read from the device once the epoch ends.
    pub total_loss: f64,

    /// Sum of the batch timings.
    pub timing: BatchTiming,
}

impl EpochSummary {
    /// Fold a batch into the summary.
    ///
    /// The loss is not touched; it is summed on the device and set once per
    /// epoch, see [`EpochSummary::with_total_loss`].
    pub fn record(
        &mut self,
        num_images: usize,
        timing: &BatchTiming,
    ) {
        self.batches += 1;
        self.images += num_images;
        self.timing.data += timing.data;
        self.timing.forward += timing.forward;
        self.timing.backward += timing.backward;
        self.timing.weight_update += timing.weight_update;
    }

    /// Set the summed epoch loss.
    pub fn with_total_loss(
        self,
        total_loss: f64,
    ) -> Self {
        Self { total_loss, ..self }
    }

    /// Mean batch loss; ``None`` for an empty epoch.
    pub fn mean_loss(&self) -> Option<f64> {
        (self.batches > 0).then(|| self.total_loss / self.batches as f64)
    }
}

/// ``(model, batch_idx)``, called before each batch.
pub type PreBatchHook<M> = Box<dyn FnMut(&M, usize)>;

/// ``(model, report) -> model``, called after each optimizer step.
pub type PostBatchHook<B, M> = Box<dyn FnMut(M, &BatchReport<B>) -> M>;

/// Post-batch hook re-applying every sparse weight mask.
pub fn rezero_after_step<B: Backend, M: ImageClassifier<B>>(
    model: M,
    _report: &BatchReport<B>,
) -> M {
    model.rezero_weights()
}

/// Training session state.
pub struct TrainingSession<B, M, O>
where
    B: AutodiffBackend,
    M: ImageClassifier<B> + AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    /// Session config.
    pub config: TrainingSessionConfig,

    /// The model; replaced after every optimizer step.
    pub model: M,

    /// The optimizer.
    pub optimizer: O,

    /// The loss function.
    pub loss_function: LossFunction<B>,

    /// The batch source.
    pub loader: ClassificationLoader<B>,

    /// The training device.
    pub device: B::Device,

    /// The backward pass.
    pub backward_pass: BackwardPass<B>,

    /// Optional pre-batch hook.
    pub pre_batch: Option<PreBatchHook<M>>,

    /// Optional post-batch hook.
    pub post_batch: Option<PostBatchHook<B, M>>,
}

impl<B, M, O> TrainingSession<B, M, O>
where
    B: AutodiffBackend,
    M: ImageClassifier<B> + AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    /// Set up a session.
    ///
    /// # Errors
    ///
    /// [`TrainingError::MissingLossScaler`] when `config.mixed_precision` is
    /// set and `loss_scaler` is ``None``.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: TrainingSessionConfig,
        model: M,
        optimizer: O,
        loss_function: LossFunction<B>,
        loader: ClassificationLoader<B>,
        device: B::Device,
        loss_scaler: Option<Box<dyn LossScaler<B>>>,
    ) -> Result<Self, TrainingError> {
        let backward_pass = BackwardPass::select(config.mixed_precision, loss_scaler)?;
        tracing::debug!(
            batches_in_epoch = config.batches_in_epoch,
            learning_rate = config.learning_rate,
            items = loader.num_items(),
            backward_pass = backward_pass.name(),
            "training session ready"
        );

        Ok(Self {
            config,
            model,
            optimizer,
            loss_function,
            loader,
            device,
            backward_pass,
            pre_batch: None,
            post_batch: None,
        })
    }

    /// Set the pre-batch hook.
    pub fn with_pre_batch<F>(
        self,
        hook: F,
    ) -> Self
    where
        F: FnMut(&M, usize) + 'static,
    {
        Self {
            pre_batch: Some(Box::new(hook)),
            ..self
        }
    }

    /// Set the post-batch hook.
    pub fn with_post_batch<F>(
        self,
        hook: F,
    ) -> Self
    where
        F: FnMut(M, &BatchReport<B>) -> M + 'static,
    {
        Self {
            post_batch: Some(Box::new(hook)),
            ..self
        }
    }

    /// Take the trained model.
    pub fn into_model(self) -> M {
        self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hamcrest::prelude::*;

    #[test]
    fn test_batch_timing_display() {
        let timing = BatchTiming {
            data: Duration::from_millis(1500),
            forward: Duration::from_millis(250),
            backward: Duration::from_micros(2200),
            weight_update: Duration::ZERO,
        };
        assert_eq!(
            timing.to_string(),
            "Data: 1.500s, forward: 0.250s, backward: 0.002s, weight update: 0.000s"
        );
        assert_eq!(timing.total(), Duration::from_micros(1_752_200));
    }

    #[test]
    fn test_epoch_summary() {
        let mut summary = EpochSummary::default();
        assert_eq!(summary.mean_loss(), None);

        let timing = BatchTiming {
            forward: Duration::from_millis(10),
            ..Default::default()
        };
        summary.record(4, &timing);
        summary.record(2, &timing);
        let summary = summary.with_total_loss(3.0);

        assert_eq!(summary.batches, 2);
        assert_eq!(summary.images, 6);
        assert_that!(summary.mean_loss().unwrap(), close_to(1.5, 1e-12));
        assert_eq!(summary.timing.forward, Duration::from_millis(20));
    }

    #[test]
    fn test_session_config_defaults() {
        let config = TrainingSessionConfig::new();
        assert_eq!(config.batches_in_epoch, usize::MAX);
        assert!(!config.mixed_precision);
        assert!(!config.pin_memory);

        let config = config.with_batches_in_epoch(10).with_mixed_precision(true);
        assert_eq!(config.batches_in_epoch, 10);
        assert!(config.mixed_precision);
    }
}
