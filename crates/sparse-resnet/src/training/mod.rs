//! # Manual Training Loop
//!
//! * [`data`] - batches, loaders, and loss functions.
//! * [`backward`] - standard or loss-scaled back-propagation.
//! * [`session`] - per-epoch training state, hooks, and timing reports.
//! * [`strategy`] - [`strategy::ManualTrainingLoop`] and the [`strategy::Trainer`].
//!
//! Models plug in through [`ImageClassifier`].

pub mod backward;
pub mod data;
pub mod session;
pub mod strategy;

use crate::models::resnet::resnet_model::ResNet;
use burn::prelude::{Backend, Tensor};

/// A model mapping images to class logits.
pub trait ImageClassifier<B: Backend> {
    /// ``[batch, channels, height, width]`` images to ``[batch, classes]`` logits.
    fn classify(
        &self,
        images: Tensor<B, 4>,
    ) -> Tensor<B, 2>;

    /// Re-apply any sparse weight masks; a no-op for dense models.
    fn rezero_weights(self) -> Self
    where
        Self: Sized,
    {
        self
    }
}

impl<B: Backend> ImageClassifier<B> for ResNet<B> {
    fn classify(
        &self,
        images: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        self.forward(images)
    }

    fn rezero_weights(self) -> Self {
        ResNet::rezero_weights(self)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::ImageClassifier;
    use crate::layers::factory::{LinearLayer, LinearLayerConfig};
    use crate::layers::sparse_weights::SparseWeightsConfig;
    use crate::training::data::{
        ClassificationItem, ClassificationLoader, ClassificationLoaderConfig,
    };
    use burn::data::dataset::InMemDataset;
    use burn::module::Module;
    use burn::nn::LinearConfig;
    use burn::prelude::{Backend, Tensor, TensorData};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// ``[batch, 1, 2, 2]`` images into 3 classes.
    #[derive(Module, Debug)]
    pub struct TinyClassifier<B: Backend> {
        pub classifier: LinearLayer<B>,
    }

    impl<B: Backend> TinyClassifier<B> {
        pub fn new(
            sparsity: Option<f64>,
            device: &B::Device,
        ) -> Self {
            let sparse = sparsity.map(|s| SparseWeightsConfig::new(s).with_seed(Some(7)));
            Self {
                classifier: LinearLayerConfig::new(LinearConfig::new(4, 3))
                    .with_sparse(sparse)
                    .init(device),
            }
        }

        pub fn weight_sparsity(&self) -> f64 {
            match &self.classifier {
                LinearLayer::Sparse(layer) => layer.weight_sparsity(),
                LinearLayer::Dense(_) => 0.0,
            }
        }
    }

    impl<B: Backend> ImageClassifier<B> for TinyClassifier<B> {
        fn classify(
            &self,
            images: Tensor<B, 4>,
        ) -> Tensor<B, 2> {
            self.classifier.forward(images.flatten(1, 3))
        }

        fn rezero_weights(self) -> Self {
            Self {
                classifier: self.classifier.rezero_weights(),
            }
        }
    }

    /// `count` seeded random images of `shape`, labelled round-robin over
    /// `classes`.
    pub fn random_items(
        count: usize,
        shape: [usize; 3],
        classes: usize,
    ) -> Vec<ClassificationItem> {
        let numel: usize = shape.iter().product();
        (0..count)
            .map(|idx| {
                let mut rng = StdRng::seed_from_u64(idx as u64);
                let pixels: Vec<f32> = (0..numel).map(|_| rng.random_range(-1.0..1.0)).collect();
                ClassificationItem::new(TensorData::new(pixels, shape), idx % classes)
            })
            .collect()
    }

    /// A loader over `num_batches` batches of two ``[1, 2, 2]`` images.
    pub fn random_loader<B: Backend>(
        num_batches: usize,
        device: &B::Device,
    ) -> ClassificationLoader<B> {
        ClassificationLoaderConfig::new()
            .with_batch_size(2)
            .build(
                InMemDataset::new(random_items(num_batches * 2, [1, 2, 2], 3)),
                device,
            )
    }
}
