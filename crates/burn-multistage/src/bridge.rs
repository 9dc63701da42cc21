//! Cross-model latent bridging
//!
//! When consecutive stages use different models, the latent produced under
//! the first model's decoder is decoded to pixels, repaired into a layout the
//! second model's encoder accepts, and re-encoded:
//!
//! ```text
//! latent --decode(A)--> pixels [B,H,W,C] | [H,W,C] | [B,F,H,W,C]
//!        --flatten frames / add batch--> [N,H,W,C]
//!        --channel-last to channel-first--> [N,C,H,W]
//!        --round H,W down to the 8-pixel grid (bilinear if changed)--> [N,C,H',W']
//!        --back to channel-last--> [N,H',W',C]
//!        --encode(B)--> latent'
//! ```

use burn::prelude::*;
use burn_multistage_core::{AnyTensor, StageError, grid_align, resize_bilinear};
use thiserror::Error;
use tracing::debug;

use crate::model::{CodecRef, LatentCodec, same_handle};

/// Decoded pixels that cannot be brought into encoder layout
#[derive(Error, Debug)]
pub enum PixelLayoutError {
    #[error("unsupported pixel tensor rank {rank} (shape {shape:?})")]
    UnsupportedRank { rank: usize, shape: Vec<usize> },

    #[error("pixel tensor has an empty spatial extent (shape {0:?})")]
    EmptyExtent(Vec<usize>),

    #[error("resampling failed: {0}")]
    Resample(#[from] StageError),
}

/// Result of a bridging attempt
#[derive(Debug)]
pub enum Bridged<B: Backend> {
    /// No bridging was needed; the latent is unchanged
    Skipped(Tensor<B, 4>),
    /// The latent was re-encoded into the target codec's space
    Converted {
        latent: AnyTensor<B>,
        /// Shape of the pixel tensor handed to the encoder
        pixel_shape: Vec<usize>,
    },
}

impl<B: Backend> Bridged<B> {
    pub fn is_converted(&self) -> bool {
        matches!(self, Bridged::Converted { .. })
    }

    pub fn into_latent(self) -> AnyTensor<B> {
        match self {
            Bridged::Skipped(latent) => latent.into(),
            Bridged::Converted { latent, .. } => latent,
        }
    }
}

/// Bridge between two optional codecs
///
/// Skipped when either codec is absent or both handles are the same object.
pub fn bridge<B: Backend>(
    latent: Tensor<B, 4>,
    from: Option<&CodecRef<B>>,
    to: Option<&CodecRef<B>>,
) -> Result<Bridged<B>, StageError> {
    match (from, to) {
        (Some(from), Some(to)) if !same_handle(from, to) => {
            bridge_latent(latent, &**from, &**to)
        }
        _ => Ok(Bridged::Skipped(latent)),
    }
}

/// Decode with `from`, repair the pixel layout and encode with `to`
pub fn bridge_latent<B: Backend>(
    latent: Tensor<B, 4>,
    from: &dyn LatentCodec<B>,
    to: &dyn LatentCodec<B>,
) -> Result<Bridged<B>, StageError> {
    let latent_shape = latent.dims().to_vec();

    let pixels = from.decode(latent).ok_or_else(|| StageError::BridgeDecode {
        latent_shape: latent_shape.clone(),
        reason: "decoder returned no pixels".to_string(),
    })?;
    debug!(?latent_shape, decoded = ?pixels.dims(), "decoded latent for bridging");

    let pixels = prepare_pixels(pixels).map_err(|e| StageError::BridgeDecode {
        latent_shape,
        reason: e.to_string(),
    })?;

    let pixel_shape = pixels.dims().to_vec();
    let latent = to.encode(pixels).map_err(|source| StageError::BridgeEncode {
        pixel_shape: pixel_shape.clone(),
        source,
    })?;
    debug!(?pixel_shape, encoded = ?latent.dims(), "re-encoded latent");

    Ok(Bridged::Converted {
        latent,
        pixel_shape,
    })
}

/// Bring decoded pixels into `[N, H, W, C]` with grid-aligned H and W
pub fn prepare_pixels<B: Backend>(pixels: AnyTensor<B>) -> Result<Tensor<B, 4>, PixelLayoutError> {
    // Rank: merge video frames into the batch, give bare images a batch axis
    let pixels: Tensor<B, 4> = match pixels {
        AnyTensor::Rank5(t) => {
            let [b, f, h, w, c] = t.dims();
            t.reshape([b * f, h, w, c])
        }
        AnyTensor::Rank4(t) => t,
        AnyTensor::Rank3(t) => t.unsqueeze::<4>(),
        other => {
            return Err(PixelLayoutError::UnsupportedRank {
                rank: other.rank(),
                shape: other.dims(),
            });
        }
    };

    // Channel position: trailing 1 or 3 means channel-last
    let pixels = if matches!(pixels.dims()[3], 1 | 3) {
        pixels.permute([0, 3, 1, 2])
    } else {
        pixels
    };

    let [_, _, h, w] = pixels.dims();
    if h == 0 || w == 0 {
        return Err(PixelLayoutError::EmptyExtent(pixels.dims().to_vec()));
    }

    let (aligned_h, aligned_w) = (grid_align(h), grid_align(w));
    let pixels = if (aligned_h, aligned_w) != (h, w) {
        debug!(
            from = ?[h, w],
            to = ?[aligned_h, aligned_w],
            "resampling pixels onto encoder grid"
        );
        resize_bilinear(pixels, aligned_h, aligned_w)?
    } else {
        pixels
    };

    Ok(pixels.permute([0, 2, 3, 1]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_multistage_core::CodecError;
    use burn_ndarray::NdArray;
    use std::sync::Arc;

    type TestBackend = NdArray<f32>;

    fn ramp<const D: usize>(shape: [usize; D]) -> Tensor<TestBackend, D> {
        let n: usize = shape.iter().product();
        let values: Vec<f32> = (0..n).map(|i| i as f32 * 0.01).collect();
        Tensor::from_data(TensorData::new(values, shape), &Default::default())
    }

    /// Decodes `[B, C, H, W]` to `[B, 8H, 8W, 3]`, encodes to zeros at 1/8 size
    struct Upscale8 {
        channels: usize,
    }

    impl LatentCodec<TestBackend> for Upscale8 {
        fn decode(&self, latent: Tensor<TestBackend, 4>) -> Option<AnyTensor<TestBackend>> {
            let [b, _, h, w] = latent.dims();
            Some(Tensor::<TestBackend, 4>::ones([b, h * 8, w * 8, 3], &latent.device()).into())
        }

        fn encode(
            &self,
            pixels: Tensor<TestBackend, 4>,
        ) -> Result<AnyTensor<TestBackend>, CodecError> {
            let [b, h, w, _] = pixels.dims();
            Ok(Tensor::<TestBackend, 4>::zeros([b, self.channels, h / 8, w / 8], &pixels.device())
                .into())
        }
    }

    struct Broken;

    impl LatentCodec<TestBackend> for Broken {
        fn decode(&self, _latent: Tensor<TestBackend, 4>) -> Option<AnyTensor<TestBackend>> {
            None
        }

        fn encode(
            &self,
            _pixels: Tensor<TestBackend, 4>,
        ) -> Result<AnyTensor<TestBackend>, CodecError> {
            Err(CodecError::new("encoder exploded"))
        }
    }

    #[test]
    fn test_aligned_pixels_are_not_resampled() {
        let pixels = ramp([1, 64, 48, 3]);
        let before = pixels.clone().into_data().to_vec::<f32>().unwrap();
        let out = prepare_pixels(pixels.into()).unwrap();
        assert_eq!(out.dims(), [1, 64, 48, 3]);
        assert_eq!(out.into_data().to_vec::<f32>().unwrap(), before);
    }

    #[test]
    fn test_unaligned_pixels_round_down() {
        let out = prepare_pixels(ramp([2, 70, 45, 3]).into()).unwrap();
        assert_eq!(out.dims(), [2, 64, 40, 3]);
    }

    #[test]
    fn test_tiny_pixels_floor_to_grid() {
        let out = prepare_pixels(ramp([1, 5, 3, 1]).into()).unwrap();
        assert_eq!(out.dims(), [1, 8, 8, 1]);
    }

    #[test]
    fn test_video_frames_merge_into_batch() {
        let out = prepare_pixels(ramp([2, 5, 16, 16, 3]).into()).unwrap();
        assert_eq!(out.dims(), [10, 16, 16, 3]);
    }

    #[test]
    fn test_single_image_gets_batch_axis() {
        let out = prepare_pixels(ramp([24, 32, 3]).into()).unwrap();
        assert_eq!(out.dims(), [1, 24, 32, 3]);
    }

    #[test]
    fn test_channel_first_pixels_end_channel_last() {
        // trailing axis is not 1 or 3, so treated as [B, C, H, W]
        let out = prepare_pixels(ramp([1, 3, 16, 24]).into()).unwrap();
        assert_eq!(out.dims(), [1, 16, 24, 3]);
    }

    #[test]
    fn test_rank2_pixels_rejected() {
        let err = prepare_pixels::<TestBackend>(ramp([8, 8]).into()).unwrap_err();
        assert!(matches!(err, PixelLayoutError::UnsupportedRank { rank: 2, .. }));
    }

    #[test]
    fn test_bridge_skipped_without_codecs() {
        let codec: CodecRef<TestBackend> = Arc::new(Upscale8 { channels: 16 });
        let latent = ramp([1, 4, 8, 8]);
        assert!(!bridge(latent.clone(), None, Some(&codec)).unwrap().is_converted());
        assert!(!bridge(latent.clone(), Some(&codec), None).unwrap().is_converted());
        assert!(!bridge(latent, Some(&codec), Some(&codec.clone())).unwrap().is_converted());
    }

    #[test]
    fn test_bridge_converts_between_codecs() {
        let a: CodecRef<TestBackend> = Arc::new(Upscale8 { channels: 4 });
        let b: CodecRef<TestBackend> = Arc::new(Upscale8 { channels: 16 });
        match bridge(ramp([1, 4, 8, 8]), Some(&a), Some(&b)).unwrap() {
            Bridged::Converted {
                latent,
                pixel_shape,
            } => {
                assert_eq!(pixel_shape, vec![1, 64, 64, 3]);
                assert_eq!(latent.dims(), vec![1, 16, 8, 8]);
            }
            Bridged::Skipped(_) => panic!("expected conversion"),
        }
    }

    #[test]
    fn test_decode_failure_is_fatal() {
        let a: CodecRef<TestBackend> = Arc::new(Broken);
        let b: CodecRef<TestBackend> = Arc::new(Upscale8 { channels: 4 });
        let err = bridge(ramp([1, 4, 8, 8]), Some(&a), Some(&b)).unwrap_err();
        match err {
            StageError::BridgeDecode { latent_shape, .. } => {
                assert_eq!(latent_shape, vec![1, 4, 8, 8])
            }
            other => panic!("expected BridgeDecode, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_failure_reports_pixel_shape() {
        let a: CodecRef<TestBackend> = Arc::new(Upscale8 { channels: 4 });
        let b: CodecRef<TestBackend> = Arc::new(Broken);
        let err = bridge(ramp([1, 4, 8, 8]), Some(&a), Some(&b)).unwrap_err();
        match err {
            StageError::BridgeEncode { pixel_shape, .. } => {
                assert_eq!(pixel_shape, vec![1, 64, 64, 3])
            }
            other => panic!("expected BridgeEncode, got {:?}", other),
        }
    }
}
