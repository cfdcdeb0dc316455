//! Common low-level modules for adding sparse layers and operations in Burn.
pub mod activation;
pub mod conv_norm;
pub mod factory;
pub mod kwinners;
pub mod params;
pub mod sparse_weights;
