//! # `ResNet` Utilities

/// Get the output resolution of a "same"-padded layer.
///
/// Every strided layer of the network (the stem conv, the stem pool, and the
/// block convs) pads by ``kernel_size / 2``, so odd inputs round up.
///
/// # Arguments
///
/// - `input_resolution`: ``[height_in, width_in]``.
/// - `stride`: the layer stride.
///
/// # Returns
///
/// ``[ceil(height_in / stride), ceil(width_in / stride)]``
#[inline(always)]
pub fn stride_output_resolution(
    input_resolution: [usize; 2],
    stride: usize,
) -> [usize; 2] {
    input_resolution.map(|size| size.div_ceil(stride))
}
