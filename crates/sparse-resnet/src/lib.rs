#![warn(missing_docs)]
//!# sparse-resnet - Sparse `ResNet` Models for Burn
//!
//! ## Notable Components
//!
//! * [`errors`] - configuration and training errors.
//! * [`layers`] - reusable neural network modules.
//!   * [`layers::params`] - the layer parameter resolver.
//!   * [`layers::sparse_weights`] - masked-weight ``Linear`` / ``Conv2d`` wrappers.
//!   * [`layers::kwinners`] - k-winners sparse activation.
//!   * [`layers::activation`] - base nonlinearity plus optional k-winners.
//!   * [`layers::factory`] - ``linear_layer``, ``conv_layer``, ``activation_layer``.
//!   * [`layers::conv_norm`] - ``Conv2d + BatchNorm2d`` block.
//! * [`models`] - complete model families.
//!   * [`models::resnet`] - `ResNet`, with per-layer sparsity parameterization.
//! * [`training`] - the manual batch-loop training strategy.

/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

pub mod errors;
pub mod layers;
pub mod models;
pub mod training;
