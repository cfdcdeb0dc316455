//! # Errors
//!
//! [`ConfigError`] covers everything that can go wrong while turning a
//! configuration into a network; it is always returned before any module
//! is initialized.
//!
//! [`TrainingError`] covers training session setup.

use crate::models::resnet::BlockKind;
use thiserror::Error;

/// Model-build configuration errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// The depth code is not in the `ResNet` depth table.
    #[error("unsupported ResNet depth {0}; expected one of 18, 34, 50, 101, 152")]
    UnsupportedDepth(usize),

    /// A per-block parameter list does not match the group's block count.
    #[error("group `{group}` has {found} per-block params, but contains {expected} blocks")]
    BlockParamsLength {
        /// The group name.
        group: &'static str,
        /// The number of blocks in the group.
        expected: usize,
        /// The number of per-block params supplied.
        found: usize,
    },

    /// Per-block parameters were written for the wrong block variant.
    #[error("group `{group}` has {found} block params, but the network uses {expected} blocks")]
    BlockParamsKind {
        /// The group name.
        group: &'static str,
        /// The block variant of the network.
        expected: BlockKind,
        /// The block variant the params were written for.
        found: BlockKind,
    },

    /// A resolved weight sparsity is outside ``[0, 1)``.
    #[error("weight sparsity {0} is outside [0, 1)")]
    InvalidSparsity(f64),

    /// A resolved activation density is outside ``(0, 1]``.
    #[error("k-winners percent_on {0} is outside (0, 1]")]
    InvalidPercentOn(f64),

    /// A symbolic sparse weights type name did not resolve.
    #[error("unknown sparse weights type `{0}`")]
    UnknownSparseWeightsType(String),

    /// A symbolic activation name did not resolve.
    #[error("unknown base activation `{0}`")]
    UnknownActivation(String),

    /// A symbolic conv size tag did not resolve.
    #[error("unknown conv type `{0}`; expected one of 1x1, 3x3, 5x5, 7x7")]
    UnknownConvType(String),
}

/// Training session errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrainingError {
    /// Mixed precision was requested, but no loss scaler is available.
    #[error(
        "mixed precision training requires a loss scaler; \
         supply a `LossScaler` to the session or disable `mixed_precision`"
    )]
    MissingLossScaler,
}
