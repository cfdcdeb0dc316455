//! # Sparse `ResNet`
//!
//! A `ResNet` family whose every conv, activation, and classifier layer can be
//! swapped for a sparse variant by a [`crate::layers::params::LayerParams`]
//! resolver.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod basic_block;
pub mod bottleneck;
pub mod layer_block;
pub mod pretrained;
pub mod residual_block;
pub mod resnet_model;
pub mod sparse_params;
pub mod util;

/// Residual block variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    /// Two 3x3 convs; used by networks with fewer than 50 layers.
    Basic,

    /// 1x1, 3x3, 1x1 convs; used by networks with 50 or more layers.
    Bottleneck,
}

impl BlockKind {
    /// Output planes per configured plane.
    pub fn expansion(self) -> usize {
        match self {
            Self::Basic => 1,
            Self::Bottleneck => 4,
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::Basic => write!(f, "BasicBlock"),
            Self::Bottleneck => write!(f, "Bottleneck"),
        }
    }
}
