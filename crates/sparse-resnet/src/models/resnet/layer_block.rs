//! # `ResNet` Layer Block
//!
//! A [`LayerBlock`] is a group: a sequence of [`ResidualBlock`]s sharing a
//! width. Only the first block of a group strides or changes channels.
//!
//! [`LayerBlockMeta`] defines a common meta API for [`LayerBlock`]
//! and [`LayerBlockConfig`].

use crate::errors::ConfigError;
use crate::layers::activation::BaseActivation;
use crate::layers::sparse_weights::SparseWeightsKind;
use crate::models::resnet::BlockKind;
use crate::models::resnet::residual_block::{
    ResidualBlock, ResidualBlockConfig, ResidualBlockMeta,
};
use crate::models::resnet::sparse_params::GroupParams;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::prelude::{Backend, Module, Tensor};

/// [`LayerBlock`] Meta API.
pub trait LayerBlockMeta {
    /// The number of blocks.
    fn len(&self) -> usize;

    /// Check if the layer block is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The number of output feature planes.
    fn out_planes(&self) -> usize;

    /// Get the effective stride of the layers.
    fn stride(&self) -> usize;

    /// Get the output resolution for a given input resolution.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2];
}

/// [`LayerBlock`] Configuration.
#[derive(Config, Debug)]
pub struct LayerBlockConfig {
    /// The component blocks.
    pub blocks: Vec<ResidualBlockConfig>,
}

impl From<Vec<ResidualBlockConfig>> for LayerBlockConfig {
    fn from(blocks: Vec<ResidualBlockConfig>) -> Self {
        Self { blocks }
    }
}

impl LayerBlockMeta for LayerBlockConfig {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks[0].in_planes()
    }

    fn out_planes(&self) -> usize {
        self.blocks[self.blocks.len() - 1].out_planes()
    }

    fn stride(&self) -> usize {
        self.blocks
            .iter()
            .fold(1, |acc, block| acc * block.stride())
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        self.blocks.iter().fold(input_resolution, |resolution, block| {
            block.output_resolution(resolution)
        })
    }
}

impl LayerBlockConfig {
    /// Resolve a group.
    ///
    /// # Arguments
    ///
    /// - `group`: the group name, for errors.
    /// - `kind`: the network's block variant.
    /// - `num_blocks`: the number of blocks.
    /// - `in_planes`: input channels of the first block.
    /// - `planes`: the group width; blocks output ``planes * expansion``.
    /// - `stride`: stride of the first block.
    /// - `params`: per-block resolvers.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        group: &'static str,
        kind: BlockKind,
        num_blocks: usize,
        in_planes: usize,
        planes: usize,
        stride: usize,
        params: &GroupParams,
        sparse_weights_type: SparseWeightsKind,
        base_activation: BaseActivation,
    ) -> Result<Self, ConfigError> {
        let out_planes = planes * kind.expansion();

        let blocks = params
            .per_block(group, num_blocks, kind)?
            .iter()
            .enumerate()
            .map(|(idx, block_params)| {
                let (in_planes, stride) = if idx == 0 {
                    (in_planes, stride)
                } else {
                    (out_planes, 1)
                };
                ResidualBlockConfig::build(
                    in_planes,
                    planes,
                    stride,
                    block_params,
                    sparse_weights_type,
                    base_activation,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { blocks })
    }

    /// Check if the config is valid.
    ///
    /// # Returns
    ///
    /// A `Result<(), String>`
    pub fn try_validate(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("blocks is empty".to_string());
        }

        for idx in 1..self.blocks.len() {
            let prev = &self.blocks[idx - 1];
            let curr = &self.blocks[idx];
            if prev.out_planes() != curr.in_planes() {
                return Err(format!(
                    "block[{}].out_planes({}) != block[{}].in_planes({})",
                    idx - 1,
                    prev.out_planes(),
                    idx,
                    curr.in_planes(),
                ));
            }
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }
    }

    /// Initialize a new [`LayerBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> LayerBlock<B> {
        self.expect_valid();

        LayerBlock {
            blocks: self.blocks.iter().map(|block| block.init(device)).collect(),
        }
    }
}

/// Layer block.
#[derive(Module, Debug)]
pub struct LayerBlock<B: Backend> {
    /// Internal blocks.
    pub blocks: Vec<ResidualBlock<B>>,
}

impl<B: Backend> LayerBlockMeta for LayerBlock<B> {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks[0].in_planes()
    }

    fn out_planes(&self) -> usize {
        self.blocks[self.blocks.len() - 1].out_planes()
    }

    fn stride(&self) -> usize {
        self.blocks
            .iter()
            .fold(1, |acc, block| acc * block.stride())
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        self.blocks.iter().fold(input_resolution, |resolution, block| {
            block.output_resolution(resolution)
        })
    }
}

impl<B: Backend> LayerBlock<B> {
    /// Apply the layer block.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, in_height, in_width] = unpack_shape_contract!(
            ["batch", "in_planes", "in_height", "in_width"],
            &input,
            &["batch", "in_height", "in_width"],
            &[("in_planes", self.in_planes())],
        );
        let [out_height, out_width] = self.output_resolution([in_height, in_width]);

        let x = self.blocks.iter().fold(input, |x, block| block.forward(x));

        assert_shape_contract_periodically!(
            ["batch", "out_planes", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_planes", self.out_planes()),
                ("out_height", out_height),
                ("out_width", out_width)
            ],
        );

        x
    }

    /// Re-apply every sparse mask of the group.
    pub fn rezero_weights(self) -> Self {
        Self {
            blocks: self
                .blocks
                .into_iter()
                .map(ResidualBlock::rezero_weights)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::resnet::sparse_params::BlockParams;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;

    fn build(
        kind: BlockKind,
        num_blocks: usize,
        params: &GroupParams,
    ) -> Result<LayerBlockConfig, ConfigError> {
        LayerBlockConfig::build(
            "filters128",
            kind,
            num_blocks,
            16,
            8,
            2,
            params,
            SparseWeightsKind::SparseWeights,
            BaseActivation::Relu,
        )
    }

    #[test]
    fn test_layer_block_config_build() {
        let params = GroupParams::Uniform(BlockParams::uniform(BlockKind::Basic, None));
        let config = build(BlockKind::Basic, 3, &params).unwrap();
        config.expect_valid();

        assert_eq!(config.len(), 3);
        assert_eq!(config.in_planes(), 16);
        assert_eq!(config.out_planes(), 8);
        assert_eq!(config.stride(), 2);
        assert_eq!(config.output_resolution([12, 13]), [6, 7]);

        let strides: Vec<usize> = config.blocks.iter().map(|b| b.stride()).collect();
        assert_eq!(strides, vec![2, 1, 1]);
        let in_planes: Vec<usize> = config.blocks.iter().map(|b| b.in_planes()).collect();
        assert_eq!(in_planes, vec![16, 8, 8]);
    }

    #[test]
    fn test_layer_block_params_errors() {
        let params = GroupParams::PerBlock(vec![BlockParams::uniform(BlockKind::Basic, None); 2]);
        assert_eq!(
            build(BlockKind::Basic, 3, &params).unwrap_err(),
            ConfigError::BlockParamsLength {
                group: "filters128",
                expected: 3,
                found: 2,
            }
        );
        assert!(matches!(
            build(BlockKind::Bottleneck, 2, &params).unwrap_err(),
            ConfigError::BlockParamsKind { .. }
        ));
    }

    #[test]
    fn test_layer_block_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let params = GroupParams::Uniform(BlockParams::uniform(BlockKind::Bottleneck, None));
        let config = build(BlockKind::Bottleneck, 2, &params).unwrap();
        let block: LayerBlock<B> = config.init(&device);

        assert_eq!(block.len(), 2);
        assert_eq!(block.in_planes(), 16);
        assert_eq!(block.out_planes(), 32);
        assert_eq!(block.stride(), 2);

        let input = Tensor::ones([2, 16, 7, 7], &device);
        let output = block.forward(input.clone());
        assert_shape_contract!(
            ["batch", "out_planes", "out_height", "out_width"],
            &output,
            &[
                ("batch", 2),
                ("out_planes", 32),
                ("out_height", 4),
                ("out_width", 4)
            ],
        );

        let mut expected = input;
        for block in block.blocks.iter() {
            expected = block.forward(expected);
        }
        output.to_data().assert_eq(&expected.to_data(), true);
    }
}
