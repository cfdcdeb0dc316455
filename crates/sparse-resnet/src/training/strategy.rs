//! # Training Strategies
//!
//! A [`TrainingStrategy`] runs one epoch over a [`TrainingSession`].
//! [`ManualTrainingLoop`] is the batch loop: budgeted iteration, device
//! transfer, hooks, timing, and a swappable [`BatchLoss`].
//!
//! [`Trainer`] drives a strategy across epochs.

use crate::training::ImageClassifier;
use crate::training::data::{ClassificationBatch, LossFunction};
use crate::training::session::{BatchReport, BatchTiming, EpochSummary, TrainingSession};
use burn::module::AutodiffModule;
use burn::optim::Optimizer;
use burn::prelude::{Int, Tensor};
use burn::tensor::ElementConversion;
use burn::tensor::backend::AutodiffBackend;
use std::collections::BTreeMap;
use std::time::Instant;

/// Computes ``(loss, output)`` for one batch.
pub trait BatchLoss<B: AutodiffBackend, M: ImageClassifier<B>> {
    /// Name used in [`ExecutionOrder`].
    fn name(&self) -> &'static str;

    /// Forward `images` and score the output against `targets`.
    fn batch_loss(
        &self,
        model: &M,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
        loss_function: &LossFunction<B>,
        device: &B::Device,
    ) -> (Tensor<B, 1>, Tensor<B, 2>);
}

/// Forward pass, move targets to the device, apply the loss function.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBatchLoss;

impl<B: AutodiffBackend, M: ImageClassifier<B>> BatchLoss<B, M> for DefaultBatchLoss {
    fn name(&self) -> &'static str {
        "DefaultBatchLoss"
    }

    fn batch_loss(
        &self,
        model: &M,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
        loss_function: &LossFunction<B>,
        device: &B::Device,
    ) -> (Tensor<B, 1>, Tensor<B, 2>) {
        let output = model.classify(images);
        let targets = targets.to_device(device);
        let loss = loss_function(output.clone(), targets);
        (loss, output)
    }
}

/// Stage name to the ordered implementations run at that stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOrder {
    stages: BTreeMap<String, Vec<String>>,
}

impl ExecutionOrder {
    /// An empty order.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the implementations of a stage.
    pub fn with_stage<I, S>(
        mut self,
        stage: &str,
        implementations: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stages.insert(
            stage.to_string(),
            implementations.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Append an implementation to a stage.
    pub fn push(
        &mut self,
        stage: &str,
        implementation: impl Into<String>,
    ) {
        self.stages
            .entry(stage.to_string())
            .or_default()
            .push(implementation.into());
    }

    /// The implementations of a stage.
    pub fn stage(
        &self,
        stage: &str,
    ) -> Option<&[String]> {
        self.stages.get(stage).map(Vec::as_slice)
    }

    /// Stage names, sorted.
    pub fn stages(&self) -> impl Iterator<Item = &str> {
        self.stages.keys().map(String::as_str)
    }
}

/// Runs one training epoch.
pub trait TrainingStrategy<B, M, O>
where
    B: AutodiffBackend,
    M: ImageClassifier<B> + AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    /// Strategy name.
    fn name(&self) -> &'static str;

    /// The stages this strategy implements.
    fn execution_order(&self) -> ExecutionOrder;

    /// Train for one epoch.
    fn run_epoch(
        &self,
        session: &mut TrainingSession<B, M, O>,
    ) -> EpochSummary;
}

/// The manual batch loop.
#[derive(Debug, Clone, Default)]
pub struct ManualTrainingLoop<L = DefaultBatchLoss> {
    /// Batch loss sub-strategy.
    pub batch_loss: L,
}

impl ManualTrainingLoop {
    /// A loop with [`DefaultBatchLoss`].
    pub fn new() -> Self {
        Self::default()
    }
}

impl<L> ManualTrainingLoop<L> {
    /// Swap the batch loss sub-strategy.
    pub fn with_batch_loss<L2>(
        self,
        batch_loss: L2,
    ) -> ManualTrainingLoop<L2> {
        ManualTrainingLoop { batch_loss }
    }
}

impl<B, M, O, L> TrainingStrategy<B, M, O> for ManualTrainingLoop<L>
where
    B: AutodiffBackend,
    M: ImageClassifier<B> + AutodiffModule<B>,
    O: Optimizer<M, B>,
    L: BatchLoss<B, M>,
{
    fn name(&self) -> &'static str {
        "ManualTrainingLoop"
    }

    fn execution_order(&self) -> ExecutionOrder {
        let name = <Self as TrainingStrategy<B, M, O>>::name(self);
        ExecutionOrder::new()
            .with_stage("train_epoch", [format!("{name}.run_epoch")])
            .with_stage(
                "batch_loss",
                [format!("{}.batch_loss", self.batch_loss.name())],
            )
    }

    fn run_epoch(
        &self,
        session: &mut TrainingSession<B, M, O>,
    ) -> EpochSummary {
        let budget = session.config.batches_in_epoch;
        let pin_memory = session.config.pin_memory;
        let span = tracing::info_span!(
            "run_epoch",
            budget,
            pin_memory,
            backward_pass = session.backward_pass.name()
        );
        let _enter = span.enter();

        let mut summary = EpochSummary::default();
        // Summed on the device; read back once, after the last batch.
        let mut epoch_loss: Option<Tensor<B, 1>> = None;

        let loader = session.loader.clone();
        let mut t0 = Instant::now();
        for (batch_idx, batch) in loader.iter().take(budget).enumerate() {
            let num_images = batch.num_images();
            let ClassificationBatch { images, targets } = batch;
            let images = images.to_device(&session.device);
            let t1 = Instant::now();

            if let Some(hook) = session.pre_batch.as_mut() {
                hook(&session.model, batch_idx);
            }

            // Gradients live in the backward result; there is nothing to zero.
            let (loss, _output) = self.batch_loss.batch_loss(
                &session.model,
                images,
                targets,
                &session.loss_function,
                &session.device,
            );
            let t2 = Instant::now();

            let grads = session
                .backward_pass
                .backward(loss.clone(), &session.model);
            let t3 = Instant::now();

            session.model = session.optimizer.step(
                session.config.learning_rate,
                session.model.clone(),
                grads,
            );
            let t4 = Instant::now();

            let loss = loss.detach();
            epoch_loss = Some(match epoch_loss {
                Some(total) => total + loss.clone(),
                None => loss.clone(),
            });

            let report = BatchReport {
                loss,
                batch_idx,
                num_images,
                timing: BatchTiming {
                    data: t1 - t0,
                    forward: t2 - t1,
                    backward: t3 - t2,
                    weight_update: t4 - t3,
                },
            };
            if tracing::enabled!(tracing::Level::DEBUG) {
                tracing::debug!(
                    batch_idx,
                    num_images,
                    loss = report.loss_value(),
                    timing = %report.timing,
                    "batch"
                );
            }
            summary.record(num_images, &report.timing);

            if let Some(hook) = session.post_batch.as_mut() {
                session.model = hook(session.model.clone(), &report);
            }

            t0 = Instant::now();
        }

        if let Some(total) = epoch_loss {
            summary = summary.with_total_loss(total.into_scalar().elem());
        }

        tracing::info!(
            batches = summary.batches,
            images = summary.images,
            mean_loss = summary.mean_loss(),
            seconds = summary.timing.total().as_secs_f64(),
            "epoch complete"
        );
        summary
    }
}

/// Drives a [`TrainingStrategy`] across epochs.
#[derive(Debug, Clone, Default)]
pub struct Trainer<S> {
    strategy: S,
}

impl<S> Trainer<S> {
    /// Create a new trainer.
    pub fn new(strategy: S) -> Self {
        Self { strategy }
    }

    /// The strategy.
    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Train for one epoch.
    pub fn train_epoch<B, M, O>(
        &self,
        session: &mut TrainingSession<B, M, O>,
    ) -> EpochSummary
    where
        B: AutodiffBackend,
        M: ImageClassifier<B> + AutodiffModule<B>,
        O: Optimizer<M, B>,
        S: TrainingStrategy<B, M, O>,
    {
        self.strategy.run_epoch(session)
    }

    /// Train for `epochs` epochs.
    pub fn fit<B, M, O>(
        &self,
        session: &mut TrainingSession<B, M, O>,
        epochs: usize,
    ) -> Vec<EpochSummary>
    where
        B: AutodiffBackend,
        M: ImageClassifier<B> + AutodiffModule<B>,
        O: Optimizer<M, B>,
        S: TrainingStrategy<B, M, O>,
    {
        (0..epochs)
            .map(|epoch| {
                let summary = self.train_epoch(session);
                tracing::info!(
                    epoch,
                    strategy = self.strategy.name(),
                    mean_loss = summary.mean_loss(),
                    "trained epoch"
                );
                summary
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TrainingError;
    use crate::training::backward::LossScaler;
    use crate::training::data::cross_entropy_loss;
    use crate::training::session::{TrainingSessionConfig, rezero_after_step};
    use crate::training::testing::{TinyClassifier, random_loader};
    use burn::backend::{Autodiff, NdArray};
    use burn::optim::SgdConfig;
    use hamcrest::prelude::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type B = Autodiff<NdArray<f32>>;

    fn session(
        config: TrainingSessionConfig,
        model: TinyClassifier<B>,
        num_batches: usize,
        loss_scaler: Option<Box<dyn LossScaler<B>>>,
    ) -> Result<
        TrainingSession<B, TinyClassifier<B>, impl Optimizer<TinyClassifier<B>, B>>,
        TrainingError,
    > {
        let device = Default::default();
        TrainingSession::new(
            config,
            model,
            SgdConfig::new().init(),
            cross_entropy_loss(&device),
            random_loader(num_batches, &device),
            device,
            loss_scaler,
        )
    }

    #[test]
    fn test_batch_budget() {
        let device = Default::default();
        let budget = 4;

        let pre_seen = Rc::new(RefCell::new(Vec::new()));
        let post_seen = Rc::new(RefCell::new(Vec::new()));

        let pre = pre_seen.clone();
        let post = post_seen.clone();
        let mut session = session(
            TrainingSessionConfig::new().with_batches_in_epoch(budget),
            TinyClassifier::new(None, &device),
            budget + 3,
            None,
        )
        .unwrap()
        .with_pre_batch(move |_model, batch_idx| pre.borrow_mut().push(batch_idx))
        .with_post_batch(move |model, report| {
            post.borrow_mut().push((report.batch_idx, report.num_images));
            model
        });

        let summary = ManualTrainingLoop::new().run_epoch(&mut session);

        assert_eq!(summary.batches, budget);
        assert_eq!(summary.images, budget * 2);
        assert!(summary.mean_loss().unwrap().is_finite());
        assert_eq!(*pre_seen.borrow(), vec![0, 1, 2, 3]);
        assert_eq!(
            *post_seen.borrow(),
            vec![(0, 2), (1, 2), (2, 2), (3, 2)]
        );

        // A short loader ends the epoch early.
        let mut session = self::session(
            TrainingSessionConfig::new(),
            TinyClassifier::new(None, &device),
            2,
            None,
        )
        .unwrap();
        assert_eq!(ManualTrainingLoop::new().run_epoch(&mut session).batches, 2);
    }

    #[test]
    fn test_epoch_loss_is_sum_of_batch_losses() {
        let device = Default::default();
        let losses = Rc::new(RefCell::new(Vec::new()));

        let seen = losses.clone();
        let mut session = session(
            TrainingSessionConfig::new(),
            TinyClassifier::new(None, &device),
            3,
            None,
        )
        .unwrap()
        .with_post_batch(move |model, report| {
            seen.borrow_mut().push(report.loss_value());
            model
        });
        let summary = ManualTrainingLoop::new().run_epoch(&mut session);

        let losses = losses.borrow();
        assert_eq!(losses.len(), 3);
        let total: f64 = losses.iter().sum();
        assert_that!(summary.total_loss, close_to(total, 1e-5));
        assert_that!(summary.mean_loss().unwrap(), close_to(total / 3.0, 1e-5));

        // An empty epoch reads nothing back.
        let mut session = self::session(
            TrainingSessionConfig::new().with_batches_in_epoch(0),
            TinyClassifier::new(None, &device),
            2,
            None,
        )
        .unwrap();
        let summary = ManualTrainingLoop::new().run_epoch(&mut session);
        assert_eq!(summary.batches, 0);
        assert_eq!(summary.total_loss, 0.0);
        assert_eq!(summary.mean_loss(), None);
    }

    #[test]
    fn test_timing_string() {
        let device = Default::default();
        let timings = Rc::new(RefCell::new(Vec::new()));

        let seen = timings.clone();
        let mut session = session(
            TrainingSessionConfig::new(),
            TinyClassifier::new(None, &device),
            2,
            None,
        )
        .unwrap()
        .with_post_batch(move |model, report| {
            seen.borrow_mut().push(report.timing.to_string());
            model
        });
        ManualTrainingLoop::new().run_epoch(&mut session);

        let timings = timings.borrow();
        assert_eq!(timings.len(), 2);
        for timing in timings.iter() {
            let fields: Vec<&str> = timing.split(", ").collect();
            assert_eq!(fields.len(), 4);
            for (field, label) in fields
                .iter()
                .zip(["Data", "forward", "backward", "weight update"])
            {
                let value = field
                    .strip_prefix(&format!("{label}: "))
                    .and_then(|v| v.strip_suffix('s'))
                    .unwrap();
                assert_eq!(value.split('.').nth(1).unwrap().len(), 3);
                assert!(value.parse::<f64>().unwrap() >= 0.0);
            }
        }
    }

    #[test]
    fn test_training_updates_model() {
        let device = Default::default();
        let model = TinyClassifier::<B>::new(None, &device);
        let before = model.classifier.linear().weight.val().into_data();

        let mut session = session(
            TrainingSessionConfig::new().with_learning_rate(0.5),
            model,
            3,
            None,
        )
        .unwrap();
        let summaries = Trainer::new(ManualTrainingLoop::new()).fit(&mut session, 2);
        assert_eq!(summaries.len(), 2);
        assert!(summaries.iter().all(|s| s.batches == 3));

        let after = session
            .into_model()
            .classifier
            .linear()
            .weight
            .val()
            .into_data();
        assert_ne!(before, after);
    }

    #[test]
    fn test_rezero_after_step() {
        let device = Default::default();

        let mut session_ = session(
            TrainingSessionConfig::new().with_learning_rate(0.5),
            TinyClassifier::new(Some(0.5), &device),
            3,
            None,
        )
        .unwrap()
        .with_post_batch(rezero_after_step);
        ManualTrainingLoop::new().run_epoch(&mut session_);
        assert_eq!(session_.into_model().weight_sparsity(), 0.5);

        // Without rezeroing, the optimizer fills the masked weights.
        let mut session_ = session(
            TrainingSessionConfig::new().with_learning_rate(0.5),
            TinyClassifier::new(Some(0.5), &device),
            3,
            None,
        )
        .unwrap();
        ManualTrainingLoop::new().run_epoch(&mut session_);
        assert!(session_.into_model().weight_sparsity() < 0.5);
    }

    #[test]
    fn test_missing_loss_scaler() {
        let device = Default::default();
        let result = session(
            TrainingSessionConfig::new().with_mixed_precision(true),
            TinyClassifier::new(None, &device),
            1,
            None,
        );
        assert!(matches!(result, Err(TrainingError::MissingLossScaler)));
    }

    struct CountingScaler {
        calls: Arc<AtomicUsize>,
    }

    impl LossScaler<B> for CountingScaler {
        fn scaled_backward(
            &mut self,
            loss: Tensor<B, 1>,
        ) -> <B as AutodiffBackend>::Gradients {
            self.calls.fetch_add(1, Ordering::SeqCst);
            loss.backward()
        }
    }

    #[test]
    fn test_mixed_precision_uses_scaler() {
        let device = Default::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut session = session(
            TrainingSessionConfig::new().with_mixed_precision(true),
            TinyClassifier::new(None, &device),
            3,
            Some(Box::new(CountingScaler {
                calls: calls.clone(),
            })),
        )
        .unwrap();
        assert_eq!(session.backward_pass.name(), "ScaledMixedPrecision");

        ManualTrainingLoop::new().run_epoch(&mut session);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    struct CountingBatchLoss {
        calls: Rc<RefCell<usize>>,
    }

    impl BatchLoss<B, TinyClassifier<B>> for CountingBatchLoss {
        fn name(&self) -> &'static str {
            "CountingBatchLoss"
        }

        fn batch_loss(
            &self,
            model: &TinyClassifier<B>,
            images: Tensor<B, 4>,
            targets: Tensor<B, 1, Int>,
            loss_function: &LossFunction<B>,
            device: &<B as burn::prelude::Backend>::Device,
        ) -> (Tensor<B, 1>, Tensor<B, 2>) {
            *self.calls.borrow_mut() += 1;
            <DefaultBatchLoss as BatchLoss<B, TinyClassifier<B>>>::batch_loss(
                &DefaultBatchLoss,
                model,
                images,
                targets,
                loss_function,
                device,
            )
        }
    }

    fn execution_order_of<S, O>(
        strategy: &S,
        _session: &TrainingSession<B, TinyClassifier<B>, O>,
    ) -> ExecutionOrder
    where
        O: Optimizer<TinyClassifier<B>, B>,
        S: TrainingStrategy<B, TinyClassifier<B>, O>,
    {
        strategy.execution_order()
    }

    #[test]
    fn test_custom_batch_loss() {
        let device = Default::default();
        let calls = Rc::new(RefCell::new(0));

        let strategy = ManualTrainingLoop::new().with_batch_loss(CountingBatchLoss {
            calls: calls.clone(),
        });
        let trainer = Trainer::new(strategy);

        let mut session = session(
            TrainingSessionConfig::new().with_batches_in_epoch(2),
            TinyClassifier::new(None, &device),
            5,
            None,
        )
        .unwrap();
        let summary = trainer.train_epoch(&mut session);
        assert_eq!(summary.batches, 2);
        assert_eq!(*calls.borrow(), 2);

        let order = execution_order_of(trainer.strategy(), &session);
        assert_eq!(
            order.stage("batch_loss").unwrap(),
            &["CountingBatchLoss.batch_loss".to_string()]
        );
    }

    #[test]
    fn test_execution_order() {
        let mut order = ExecutionOrder::new()
            .with_stage("train_epoch", ["ManualTrainingLoop.run_epoch"])
            .with_stage("batch_loss", ["DefaultBatchLoss.batch_loss"]);
        order.push("post_batch", "Logging.post_batch");
        order.push("post_batch", "Rezero.post_batch");

        assert_eq!(
            order.stages().collect::<Vec<_>>(),
            vec!["batch_loss", "post_batch", "train_epoch"]
        );
        assert_eq!(
            order.stage("post_batch").unwrap(),
            &[
                "Logging.post_batch".to_string(),
                "Rezero.post_batch".to_string()
            ]
        );
        assert_eq!(order.stage("pre_batch"), None);

        let replaced = order.with_stage("post_batch", Vec::<String>::new());
        assert_eq!(replaced.stage("post_batch").unwrap().len(), 0);
    }
}
