//! Tensor diagnostics used at stage boundaries

use burn::prelude::*;

use crate::error::StageError;

/// Debug flags for stage diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugConfig {
    /// Log latent statistics before and after each stage
    pub stats: bool,
    /// Fail a stage whose output contains NaN/Inf values
    pub nan: bool,
}

fn host_values<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> Vec<f32> {
    tensor
        .clone()
        .into_data()
        .convert::<f32>()
        .to_vec()
        .unwrap_or_default()
}

/// Summary statistics of a tensor for logging
pub fn tensor_stats<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> String {
    let floats = host_values(tensor);

    if floats.is_empty() {
        return "empty".to_string();
    }

    let nan_count = floats.iter().filter(|x| x.is_nan()).count();
    let inf_count = floats.iter().filter(|x| x.is_infinite()).count();
    let min = floats.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = floats.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let sum: f32 = floats.iter().sum();
    let mean = sum / floats.len() as f32;
    let var: f32 = floats.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / floats.len() as f32;
    let std = var.sqrt();

    if nan_count > 0 || inf_count > 0 {
        format!(
            "min={:.4}, max={:.4}, mean={:.4}, std={:.4} [NaN={}, Inf={}]",
            min, max, mean, std, nan_count, inf_count
        )
    } else {
        format!(
            "min={:.4}, max={:.4}, mean={:.4}, std={:.4}",
            min, max, mean, std
        )
    }
}

/// Fail with [`StageError::NonFinite`] if the tensor holds NaN or Inf
pub fn ensure_finite<B: Backend, const D: usize>(
    tensor: &Tensor<B, D>,
    name: &str,
) -> Result<(), StageError> {
    let floats = host_values(tensor);
    if floats.iter().all(|x| x.is_finite()) {
        return Ok(());
    }
    Err(StageError::NonFinite {
        name: name.to_string(),
        stats: tensor_stats(tensor),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_stats_of_constant() {
        let t = Tensor::<TestBackend, 2>::ones([2, 2], &Default::default());
        assert_eq!(
            tensor_stats(&t),
            "min=1.0000, max=1.0000, mean=1.0000, std=0.0000"
        );
    }

    #[test]
    fn test_nan_is_reported() {
        let t = Tensor::<TestBackend, 1>::from_data(
            TensorData::new(vec![0.0f32, f32::NAN], [2]),
            &Default::default(),
        );
        let err = ensure_finite(&t, "stage_0_output").unwrap_err();
        assert!(err.to_string().contains("stage_0_output"));
        assert!(err.to_string().contains("NaN=1"));
    }
}
