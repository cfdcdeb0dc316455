//! # Sparse Parameter Tree
//!
//! [`SparseParams`] assigns a [`LayerParams`] resolver to every layer role of
//! a `ResNet`:
//!
//! * `stem` and `linear` take a single resolver.
//! * Each of the four groups takes a [`GroupParams`], either one
//!   [`BlockParams`] broadcast to all blocks, or one per block.
//!
//! A [`GroupParams::Uniform`] entry shares its resolvers (by `Arc`) across
//! every block of the group; a stateful custom resolver sees all of them.

use crate::errors::ConfigError;
use crate::layers::params::{LayerParams, LayerParamsConfig, LayerParamsRef, LayerParamsSpec};
use crate::models::resnet::BlockKind;

/// Resolvers for the roles of a [`crate::models::resnet::basic_block::BasicBlock`].
#[derive(Debug, Clone, Default)]
pub struct BasicBlockParams {
    /// First 3x3 conv, and the activation after it.
    pub conv3x3_1: Option<LayerParamsRef>,

    /// Second 3x3 conv.
    pub conv3x3_2: Option<LayerParamsRef>,

    /// Projection shortcut conv, and the post-activation.
    pub shortcut: Option<LayerParamsRef>,
}

/// Resolvers for the roles of a [`crate::models::resnet::bottleneck::Bottleneck`].
#[derive(Debug, Clone, Default)]
pub struct BottleneckParams {
    /// First 1x1 conv, and the activation after it.
    pub conv1x1_1: Option<LayerParamsRef>,

    /// 3x3 conv, and the activation after it.
    pub conv3x3_2: Option<LayerParamsRef>,

    /// Last 1x1 conv.
    pub conv1x1_3: Option<LayerParamsRef>,

    /// Projection shortcut conv, and the post-activation.
    pub shortcut: Option<LayerParamsRef>,
}

/// Per-block resolvers.
#[derive(Debug, Clone)]
pub enum BlockParams {
    /// Params for a basic block.
    Basic(BasicBlockParams),

    /// Params for a bottleneck block.
    Bottleneck(BottleneckParams),
}

impl From<BasicBlockParams> for BlockParams {
    fn from(params: BasicBlockParams) -> Self {
        Self::Basic(params)
    }
}

impl From<BottleneckParams> for BlockParams {
    fn from(params: BottleneckParams) -> Self {
        Self::Bottleneck(params)
    }
}

impl BlockParams {
    /// The block variant these params were written for.
    pub fn kind(&self) -> BlockKind {
        match self {
            Self::Basic(_) => BlockKind::Basic,
            Self::Bottleneck(_) => BlockKind::Bottleneck,
        }
    }

    /// Params with every role set to `layer_params`, for the given block variant.
    pub fn uniform(
        kind: BlockKind,
        layer_params: Option<LayerParamsRef>,
    ) -> Self {
        match kind {
            BlockKind::Basic => BasicBlockParams {
                conv3x3_1: layer_params.clone(),
                conv3x3_2: layer_params.clone(),
                shortcut: layer_params,
            }
            .into(),
            BlockKind::Bottleneck => BottleneckParams {
                conv1x1_1: layer_params.clone(),
                conv3x3_2: layer_params.clone(),
                conv1x1_3: layer_params.clone(),
                shortcut: layer_params,
            }
            .into(),
        }
    }
}

/// Resolvers for one group of blocks.
#[derive(Debug, Clone)]
pub enum GroupParams {
    /// One entry, broadcast to every block.
    Uniform(BlockParams),

    /// One entry per block; the length must match the group's block count.
    PerBlock(Vec<BlockParams>),
}

impl From<BlockParams> for GroupParams {
    fn from(params: BlockParams) -> Self {
        Self::Uniform(params)
    }
}

impl From<Vec<BlockParams>> for GroupParams {
    fn from(params: Vec<BlockParams>) -> Self {
        Self::PerBlock(params)
    }
}

impl GroupParams {
    /// Expand to one [`BlockParams`] per block.
    ///
    /// # Arguments
    ///
    /// - `group`: the group name, for errors.
    /// - `num_blocks`: the group's block count.
    /// - `kind`: the network's block variant.
    ///
    /// # Returns
    ///
    /// ``num_blocks`` params, or an error when the length or variant does not match.
    pub fn per_block(
        &self,
        group: &'static str,
        num_blocks: usize,
        kind: BlockKind,
    ) -> Result<Vec<BlockParams>, ConfigError> {
        let params = match self {
            Self::Uniform(params) => vec![params.clone(); num_blocks],
            Self::PerBlock(params) => {
                if params.len() != num_blocks {
                    return Err(ConfigError::BlockParamsLength {
                        group,
                        expected: num_blocks,
                        found: params.len(),
                    });
                }
                params.clone()
            }
        };

        if let Some(mismatch) = params.iter().find(|p| p.kind() != kind) {
            return Err(ConfigError::BlockParamsKind {
                group,
                expected: kind,
                found: mismatch.kind(),
            });
        }

        Ok(params)
    }
}

/// Group names, in network order.
pub const GROUP_NAMES: [&str; 4] = ["filters64", "filters128", "filters256", "filters512"];

/// Resolvers for every layer role of a `ResNet`.
#[derive(Debug, Clone)]
pub struct SparseParams {
    /// Stem conv and its activation.
    pub stem: Option<LayerParamsRef>,

    /// Group 1 (64 planes).
    pub filters64: GroupParams,

    /// Group 2 (128 planes).
    pub filters128: GroupParams,

    /// Group 3 (256 planes).
    pub filters256: GroupParams,

    /// Group 4 (512 planes).
    pub filters512: GroupParams,

    /// Classifier.
    pub linear: Option<LayerParamsRef>,
}

impl SparseParams {
    /// Every layer role takes the same resolver.
    pub fn uniform(
        kind: BlockKind,
        layer_params: Option<LayerParamsRef>,
    ) -> Self {
        let group = GroupParams::Uniform(BlockParams::uniform(kind, layer_params.clone()));
        Self {
            stem: layer_params.clone(),
            filters64: group.clone(),
            filters128: group.clone(),
            filters256: group.clone(),
            filters512: group,
            linear: layer_params,
        }
    }

    /// The four groups, named, in network order.
    pub fn groups(&self) -> [(&'static str, &GroupParams); 4] {
        [
            (GROUP_NAMES[0], &self.filters64),
            (GROUP_NAMES[1], &self.filters128),
            (GROUP_NAMES[2], &self.filters256),
            (GROUP_NAMES[3], &self.filters512),
        ]
    }
}

/// Build the default parameter tree.
///
/// Two resolvers are built from `spec` and `layer_params_kwargs`:
/// `layer_params` (with activation sparsity) and `noact_layer_params`
/// (without the activation function and without `percent_on`).
///
/// * `stem` uses `layer_params`; `linear` uses `noact_layer_params`.
/// * Basic blocks use `layer_params` for `conv3x3_1` and `shortcut`, and
///   `noact_layer_params` for `conv3x3_2`.
/// * Bottleneck blocks use `layer_params` for every role.
/// * Every group is a per-block list of identical entries.
pub fn default_resnet_params(
    kind: BlockKind,
    num_blocks: [usize; 4],
    spec: &LayerParamsSpec,
    layer_params_kwargs: &LayerParamsConfig,
) -> SparseParams {
    let layer_params = spec.build(spec.functions.clone(), layer_params_kwargs.clone());
    let noact_layer_params = spec.build(
        spec.functions.without_activation(),
        layer_params_kwargs.without_activation(),
    );

    let block = match kind {
        BlockKind::Basic => BasicBlockParams {
            conv3x3_1: Some(layer_params.clone()),
            conv3x3_2: Some(noact_layer_params.clone()),
            shortcut: Some(layer_params.clone()),
        }
        .into(),
        BlockKind::Bottleneck => BlockParams::uniform(kind, Some(layer_params.clone())),
    };
    let group = |count: usize| GroupParams::PerBlock(vec![block.clone(); count]);

    SparseParams {
        stem: Some(layer_params),
        filters64: group(num_blocks[0]),
        filters128: group(num_blocks[1]),
        filters256: group(num_blocks[2]),
        filters512: group(num_blocks[3]),
        linear: Some(noact_layer_params),
    }
}

/// Borrow an optional shared resolver as a trait object.
pub fn as_layer_params(params: &Option<LayerParamsRef>) -> Option<&dyn LayerParams> {
    params.as_deref()
}
