//! Model architectures.
pub mod resnet;
