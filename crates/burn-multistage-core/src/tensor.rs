//! Rank-erased float tensors
//!
//! Codecs and callers hand over tensors whose rank is only known at run time
//! (image decoders return `[B, H, W, C]`, video decoders `[B, F, H, W, C]`,
//! some callers pass bare `[C, H, W]` latents). [`AnyTensor`] carries any of
//! them until the code that needs a fixed rank normalizes it.

use burn::prelude::*;

use crate::error::StageError;

/// Float tensor of rank 1 to 5
#[derive(Debug, Clone)]
pub enum AnyTensor<B: Backend> {
    Rank1(Tensor<B, 1>),
    Rank2(Tensor<B, 2>),
    Rank3(Tensor<B, 3>),
    Rank4(Tensor<B, 4>),
    Rank5(Tensor<B, 5>),
}

impl<B: Backend> AnyTensor<B> {
    /// Number of dimensions
    pub fn rank(&self) -> usize {
        match self {
            Self::Rank1(_) => 1,
            Self::Rank2(_) => 2,
            Self::Rank3(_) => 3,
            Self::Rank4(_) => 4,
            Self::Rank5(_) => 5,
        }
    }

    /// Shape as a vector
    pub fn dims(&self) -> Vec<usize> {
        match self {
            Self::Rank1(t) => t.dims().to_vec(),
            Self::Rank2(t) => t.dims().to_vec(),
            Self::Rank3(t) => t.dims().to_vec(),
            Self::Rank4(t) => t.dims().to_vec(),
            Self::Rank5(t) => t.dims().to_vec(),
        }
    }

    pub fn device(&self) -> B::Device {
        match self {
            Self::Rank1(t) => t.device(),
            Self::Rank2(t) => t.device(),
            Self::Rank3(t) => t.device(),
            Self::Rank4(t) => t.device(),
            Self::Rank5(t) => t.device(),
        }
    }

    /// True if any dimension has size zero
    pub fn is_empty(&self) -> bool {
        self.dims().iter().any(|&d| d == 0)
    }

    /// Normalize to batch-channel-height-width rank
    ///
    /// Tensors of rank < 4 get leading singleton dimensions; `[C, H, W]`
    /// becomes `[1, C, H, W]`. Rank-5 tensors are rejected: a video latent must
    /// be flattened by the caller (or the bridge) before sampling.
    pub fn into_bchw(self) -> Result<Tensor<B, 4>, StageError> {
        if self.is_empty() {
            return Err(StageError::invalid_latent(format!(
                "latent has an empty dimension (shape {:?})",
                self.dims()
            )));
        }
        match self {
            Self::Rank1(t) => Ok(t.unsqueeze::<4>()),
            Self::Rank2(t) => Ok(t.unsqueeze::<4>()),
            Self::Rank3(t) => Ok(t.unsqueeze::<4>()),
            Self::Rank4(t) => Ok(t),
            Self::Rank5(t) => Err(StageError::invalid_latent(format!(
                "expected at most 4 dimensions, got shape {:?}",
                t.dims()
            ))),
        }
    }
}

macro_rules! impl_from_tensor {
    ($($rank:literal => $variant:ident),*) => {
        $(
            impl<B: Backend> From<Tensor<B, $rank>> for AnyTensor<B> {
                fn from(tensor: Tensor<B, $rank>) -> Self {
                    AnyTensor::$variant(tensor)
                }
            }
        )*
    };
}

impl_from_tensor!(1 => Rank1, 2 => Rank2, 3 => Rank3, 4 => Rank4, 5 => Rank5);
