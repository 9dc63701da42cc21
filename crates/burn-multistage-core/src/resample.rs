//! Spatial grid alignment and bilinear resampling

use burn::prelude::*;

use crate::error::StageError;

/// Spatial stride downstream encoders require
pub const SPATIAL_GRID: usize = 8;

/// Round a spatial extent down to the grid, with a floor of one grid cell
pub fn grid_align(extent: usize) -> usize {
    (extent / SPATIAL_GRID * SPATIAL_GRID).max(SPATIAL_GRID)
}

/// Bilinear resize of a `[B, C, H, W]` tensor without corner alignment
///
/// Sample positions use half-pixel centers: output pixel `o` reads from
/// `(o + 0.5) * in / out - 0.5`, clamped to the input. Runs on host memory;
/// the result is placed back on the input's device.
///
/// `burn::tensor::module::interpolate` with `InterpolateMode::Bilinear`
/// samples at `o * (in - 1) / (out - 1)`, which pins the corners, so it is
/// not used here.
pub fn resize_bilinear<B: Backend>(
    tensor: Tensor<B, 4>,
    out_height: usize,
    out_width: usize,
) -> Result<Tensor<B, 4>, StageError> {
    let [b, c, h, w] = tensor.dims();
    if h == out_height && w == out_width {
        return Ok(tensor);
    }
    if h == 0 || w == 0 || out_height == 0 || out_width == 0 {
        return Err(StageError::InvalidLatent(format!(
            "cannot resize [{}, {}] to [{}, {}]",
            h, w, out_height, out_width
        )));
    }

    let device = tensor.device();
    let input: Vec<f32> = tensor
        .into_data()
        .convert::<f32>()
        .to_vec()
        .map_err(|e| StageError::InvalidLatent(format!("unreadable tensor data: {:?}", e)))?;

    let rows = axis_weights(h, out_height);
    let cols = axis_weights(w, out_width);

    let mut output = Vec::with_capacity(b * c * out_height * out_width);
    for plane in input.chunks_exact(h * w) {
        for &(y0, y1, fy) in &rows {
            for &(x0, x1, fx) in &cols {
                let top = plane[y0 * w + x0] * (1.0 - fx) + plane[y0 * w + x1] * fx;
                let bottom = plane[y1 * w + x0] * (1.0 - fx) + plane[y1 * w + x1] * fx;
                output.push(top * (1.0 - fy) + bottom * fy);
            }
        }
    }

    Ok(Tensor::from_data(
        TensorData::new(output, [b, c, out_height, out_width]),
        &device,
    ))
}

/// Source indices and interpolation weight for every output position
fn axis_weights(input: usize, output: usize) -> Vec<(usize, usize, f32)> {
    let scale = input as f32 / output as f32;
    (0..output)
        .map(|o| {
            let src = ((o as f32 + 0.5) * scale - 0.5).max(0.0);
            let i0 = (src.floor() as usize).min(input - 1);
            let i1 = (i0 + 1).min(input - 1);
            (i0, i1, src - i0 as f32)
        })
        .collect()
}
