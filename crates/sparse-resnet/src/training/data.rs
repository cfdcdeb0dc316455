//! # Training Data and Loss Functions
//!
//! A dataset yields [`ClassificationItem`]s; [`ClassificationBatcher`] stacks
//! them into [`ClassificationBatch`]es, and [`ClassificationLoaderConfig`]
//! builds the burn data loader a training session iterates.

use burn::config::Config;
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataloader::{DataLoader, DataLoaderBuilder, Dataset};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::prelude::{Backend, Int, Tensor, TensorData};
use std::sync::Arc;

/// One labelled image.
#[derive(Debug, Clone)]
pub struct ClassificationItem {
    /// ``[channels, height, width]`` pixels.
    pub image: TensorData,

    /// Class index.
    pub label: usize,
}

impl ClassificationItem {
    /// Create a new item.
    pub fn new(
        image: impl Into<TensorData>,
        label: usize,
    ) -> Self {
        Self {
            image: image.into(),
            label,
        }
    }
}

/// One batch of labelled images.
#[derive(Debug, Clone)]
pub struct ClassificationBatch<B: Backend> {
    /// ``[batch, channels, height, width]`` images.
    pub images: Tensor<B, 4>,

    /// ``[batch]`` class indices.
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> ClassificationBatch<B> {
    /// Create a new batch.
    pub fn new(
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> Self {
        Self { images, targets }
    }

    /// The number of images in the batch.
    pub fn num_images(&self) -> usize {
        self.targets.dims()[0]
    }
}

/// Stacks [`ClassificationItem`]s into a [`ClassificationBatch`].
///
/// Every item in a batch must share one image shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassificationBatcher;

impl<B: Backend> Batcher<B, ClassificationItem, ClassificationBatch<B>> for ClassificationBatcher {
    fn batch(
        &self,
        items: Vec<ClassificationItem>,
        device: &B::Device,
    ) -> ClassificationBatch<B> {
        let targets: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let images: Vec<Tensor<B, 3>> = items
            .into_iter()
            .map(|item| Tensor::from_data(item.image, device))
            .collect();

        ClassificationBatch::new(
            Tensor::stack(images, 0),
            Tensor::from_data(targets.as_slice(), device),
        )
    }
}

/// The loader a training session draws batches from.
pub type ClassificationLoader<B> = Arc<dyn DataLoader<B, ClassificationBatch<B>>>;

/// [`ClassificationLoader`] Config.
#[derive(Config, Debug)]
pub struct ClassificationLoaderConfig {
    /// Items per batch.
    #[config(default = 32)]
    pub batch_size: usize,

    /// Reshuffle the dataset every epoch with this seed.
    #[config(default = "None")]
    pub shuffle_seed: Option<u64>,

    /// Worker threads; ``None`` batches on the calling thread.
    #[config(default = "None")]
    pub num_workers: Option<usize>,
}

impl ClassificationLoaderConfig {
    /// Build a loader over `dataset`, batching onto `device`.
    pub fn build<B, D>(
        &self,
        dataset: D,
        device: &B::Device,
    ) -> ClassificationLoader<B>
    where
        B: Backend,
        D: Dataset<ClassificationItem> + 'static,
    {
        let mut builder =
            DataLoaderBuilder::<B, ClassificationItem, ClassificationBatch<B>>::new(
                ClassificationBatcher,
            )
            .batch_size(self.batch_size)
            .set_device(device.clone());
        if let Some(seed) = self.shuffle_seed {
            builder = builder.shuffle(seed);
        }
        if let Some(num_workers) = self.num_workers {
            builder = builder.num_workers(num_workers);
        }
        builder.build(dataset)
    }
}

/// ``(logits, targets) -> scalar loss``.
pub type LossFunction<B> = Box<dyn Fn(Tensor<B, 2>, Tensor<B, 1, Int>) -> Tensor<B, 1>>;

/// Cross-entropy over logits; the usual classification loss.
pub fn cross_entropy_loss<B: Backend>(device: &B::Device) -> LossFunction<B> {
    let loss = CrossEntropyLossConfig::new().init(device);
    Box::new(move |logits, targets| loss.forward(logits, targets))
}
