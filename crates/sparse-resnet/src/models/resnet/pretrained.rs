//! # Pretrained `ResNet` Metadata
//!
//! Dense torchvision checkpoints for each depth. The URLs are listed for
//! reference only; nothing here downloads or loads weights.

use crate::errors::ConfigError;
use crate::models::resnet::resnet_model::resnet_blocks;

/// Static pretrained weights descriptor.
#[derive(Debug)]
pub struct StaticPretrainedWeightsDescriptor<'a> {
    /// Depth code of the network.
    pub depth: usize,

    /// Name of the weights.
    pub name: &'a str,

    /// Description of the weights.
    pub description: &'a str,

    /// License.
    pub license: Option<&'a str>,

    /// Source URL.
    pub origin: Option<&'a str>,

    /// Checkpoint URL.
    pub url: &'a str,
}

/// Pretrained weights for every supported depth.
pub static PRETRAINED_RESNET_WEIGHTS: &[StaticPretrainedWeightsDescriptor<'static>] = &[
    StaticPretrainedWeightsDescriptor {
        depth: 18,
        name: "resnet18",
        description: "ResNet-18 [2, 2, 2, 2] BasicBlocks, ImageNet",
        license: Some("bsd-3-clause"),
        origin: Some("https://github.com/pytorch/vision"),
        url: "https://download.pytorch.org/models/resnet18-5c106cde.pth",
    },
    StaticPretrainedWeightsDescriptor {
        depth: 34,
        name: "resnet34",
        description: "ResNet-34 [3, 4, 6, 3] BasicBlocks, ImageNet",
        license: Some("bsd-3-clause"),
        origin: Some("https://github.com/pytorch/vision"),
        url: "https://download.pytorch.org/models/resnet34-333f7ec4.pth",
    },
    StaticPretrainedWeightsDescriptor {
        depth: 50,
        name: "resnet50",
        description: "ResNet-50 [3, 4, 6, 3] Bottlenecks, ImageNet",
        license: Some("bsd-3-clause"),
        origin: Some("https://github.com/pytorch/vision"),
        url: "https://download.pytorch.org/models/resnet50-19c8e357.pth",
    },
    StaticPretrainedWeightsDescriptor {
        depth: 101,
        name: "resnet101",
        description: "ResNet-101 [3, 4, 23, 3] Bottlenecks, ImageNet",
        license: Some("bsd-3-clause"),
        origin: Some("https://github.com/pytorch/vision"),
        url: "https://download.pytorch.org/models/resnet101-5d3b4d8f.pth",
    },
    StaticPretrainedWeightsDescriptor {
        depth: 152,
        name: "resnet152",
        description: "ResNet-152 [3, 8, 36, 3] Bottlenecks, ImageNet",
        license: Some("bsd-3-clause"),
        origin: Some("https://github.com/pytorch/vision"),
        url: "https://download.pytorch.org/models/resnet152-b121ed2d.pth",
    },
];

/// Look up the pretrained weights descriptor for a depth code.
pub fn pretrained_weights(
    depth: usize,
) -> Result<&'static StaticPretrainedWeightsDescriptor<'static>, ConfigError> {
    resnet_blocks(depth)?;
    PRETRAINED_RESNET_WEIGHTS
        .iter()
        .find(|descriptor| descriptor.depth == depth)
        .ok_or(ConfigError::UnsupportedDepth(depth))
}
