//! Latent channel-count discovery and repair
//!
//! Models advertise their latent width in different places: some expose it
//! directly, some only through their encoder, some only in a generic config.
//! [`expected_channels`] walks an ordered chain of probes over the
//! [`ChannelHints`] accessor and takes the first positive answer.
//!
//! [`reconcile_channels`] is a best-effort repair: it zero-pads or truncates
//! the channel axis and never touches spatial dimensions. A mismatch that
//! survives until sampling is a hard error raised by the stage executor.

use burn::prelude::*;
use tracing::warn;

use crate::error::StageError;
use crate::tensor::AnyTensor;

/// Read-only channel-count metadata exposed by a model
///
/// Every hint is optional. Values are signed because hosts report whatever
/// their config holds; only positive values are trusted.
pub trait ChannelHints {
    /// Latent channel count advertised by the model itself
    fn latent_channels(&self) -> Option<i64> {
        None
    }

    /// Input channel count of the model's encoder
    fn in_channels(&self) -> Option<i64> {
        None
    }

    /// Nested first-stage (encoder/decoder) object, if the model wraps one
    fn first_stage(&self) -> Option<&dyn ChannelHints> {
        None
    }

    /// Integer field of the model's generic configuration object
    fn config_field(&self, _key: &str) -> Option<i64> {
        None
    }
}

/// One step of the discovery chain
pub type ChannelProbe = fn(&dyn ChannelHints) -> Option<i64>;

fn probe_latent_channels(model: &dyn ChannelHints) -> Option<i64> {
    model.latent_channels()
}

fn probe_in_channels(model: &dyn ChannelHints) -> Option<i64> {
    model.in_channels()
}

fn probe_first_stage_latent(model: &dyn ChannelHints) -> Option<i64> {
    model.first_stage().and_then(|stage| stage.latent_channels())
}

fn probe_first_stage_in(model: &dyn ChannelHints) -> Option<i64> {
    model.first_stage().and_then(|stage| stage.in_channels())
}

fn probe_config_latent(model: &dyn ChannelHints) -> Option<i64> {
    model.config_field("latent_channels")
}

fn probe_config_in(model: &dyn ChannelHints) -> Option<i64> {
    model.config_field("in_channels")
}

/// Probes in order of preference
pub const CHANNEL_PROBES: &[(&str, ChannelProbe)] = &[
    ("latent_channels", probe_latent_channels),
    ("in_channels", probe_in_channels),
    ("first_stage.latent_channels", probe_first_stage_latent),
    ("first_stage.in_channels", probe_first_stage_in),
    ("config.latent_channels", probe_config_latent),
    ("config.in_channels", probe_config_in),
];

/// Channel count the model expects, or `None` if no probe yields one
pub fn expected_channels(model: &dyn ChannelHints) -> Option<usize> {
    CHANNEL_PROBES
        .iter()
        .filter_map(|(_, probe)| probe(model))
        .find(|&channels| channels > 0)
        .map(|channels| channels as usize)
}

/// Zero-pad or truncate the channel axis of a `[B, C, H, W]` latent
///
/// The overlapping channel range `0..min(C, expected)` is kept unchanged.
pub fn reconcile_channels<B: Backend>(latent: Tensor<B, 4>, expected: usize) -> Tensor<B, 4> {
    let [b, c, h, w] = latent.dims();
    if c == expected || expected == 0 {
        return latent;
    }

    warn!(
        actual = c,
        expected, "latent channel count does not match model, repairing"
    );

    if c < expected {
        let padding = Tensor::zeros([b, expected - c, h, w], &latent.device());
        Tensor::cat(vec![latent, padding], 1)
    } else {
        latent.slice([0..b, 0..expected, 0..h, 0..w])
    }
}

/// Normalize a latent to `[B, C, H, W]` and repair it against a model
///
/// A model with no discoverable channel count leaves the latent untouched.
pub fn reconcile<B: Backend>(
    latent: AnyTensor<B>,
    model: &dyn ChannelHints,
) -> Result<Tensor<B, 4>, StageError> {
    let latent = latent.into_bchw()?;
    Ok(match expected_channels(model) {
        Some(expected) => reconcile_channels(latent, expected),
        None => latent,
    })
}

/// Fail if a `[B, C, H, W]` latent does not have the expected channel count
pub fn ensure_channels<B: Backend>(
    latent: &Tensor<B, 4>,
    expected: Option<usize>,
) -> Result<(), StageError> {
    let dims = latent.dims();
    match expected {
        Some(expected) if dims[1] != expected => Err(StageError::ChannelMismatch {
            expected,
            actual: dims[1],
            shape: dims.to_vec(),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use std::collections::HashMap;

    type TestBackend = NdArray<f32>;

    #[derive(Default)]
    struct Hints {
        latent: Option<i64>,
        input: Option<i64>,
        stage: Option<Box<Hints>>,
        config: HashMap<&'static str, i64>,
    }

    impl ChannelHints for Hints {
        fn latent_channels(&self) -> Option<i64> {
            self.latent
        }
        fn in_channels(&self) -> Option<i64> {
            self.input
        }
        fn first_stage(&self) -> Option<&dyn ChannelHints> {
            self.stage.as_deref().map(|s| s as &dyn ChannelHints)
        }
        fn config_field(&self, key: &str) -> Option<i64> {
            self.config.get(key).copied()
        }
    }

    fn ramp(shape: [usize; 4]) -> Tensor<TestBackend, 4> {
        let n: usize = shape.iter().product();
        let values: Vec<f32> = (0..n).map(|i| i as f32).collect();
        Tensor::from_data(TensorData::new(values, shape), &Default::default())
    }

    #[test]
    fn test_direct_hint_wins() {
        let hints = Hints {
            latent: Some(16),
            input: Some(4),
            ..Default::default()
        };
        assert_eq!(expected_channels(&hints), Some(16));
    }

    #[test]
    fn test_non_positive_hints_are_skipped() {
        let hints = Hints {
            latent: Some(0),
            input: Some(-1),
            stage: Some(Box::new(Hints {
                latent: Some(4),
                ..Default::default()
            })),
            ..Default::default()
        };
        assert_eq!(expected_channels(&hints), Some(4));
    }

    #[test]
    fn test_config_field_is_last_resort() {
        let mut hints = Hints::default();
        hints.config.insert("in_channels", 12);
        assert_eq!(expected_channels(&hints), Some(12));
    }

    #[test]
    fn test_unknown_width() {
        assert_eq!(expected_channels(&Hints::default()), None);
    }

    #[test]
    fn test_same_width_is_noop() {
        let latent = ramp([1, 4, 2, 2]);
        let before = latent.clone().into_data().to_vec::<f32>().unwrap();
        let out = reconcile_channels(latent, 4);
        assert_eq!(out.into_data().to_vec::<f32>().unwrap(), before);
    }

    #[test]
    fn test_widen_pads_with_zeros() {
        let out = reconcile_channels(ramp([1, 2, 2, 2]), 3);
        assert_eq!(out.dims(), [1, 3, 2, 2]);
        let values = out.into_data().to_vec::<f32>().unwrap();
        assert_eq!(&values[..8], &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert!(values[8..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_widen_then_truncate_recovers_original() {
        let latent = ramp([2, 4, 3, 3]);
        let before = latent.clone().into_data().to_vec::<f32>().unwrap();
        let widened = reconcile_channels(latent, 7);
        assert_eq!(widened.dims(), [2, 7, 3, 3]);
        let back = reconcile_channels(widened, 4);
        assert_eq!(back.dims(), [2, 4, 3, 3]);
        assert_eq!(back.into_data().to_vec::<f32>().unwrap(), before);
    }

    #[test]
    fn test_reconcile_inserts_batch_axis() {
        let hints = Hints {
            latent: Some(16),
            ..Default::default()
        };
        let latent: AnyTensor<TestBackend> =
            Tensor::<TestBackend, 3>::zeros([4, 8, 8], &Default::default()).into();
        let out = reconcile(latent, &hints).unwrap();
        assert_eq!(out.dims(), [1, 16, 8, 8]);
    }

    #[test]
    fn test_ensure_channels_reports_mismatch() {
        let latent = Tensor::<TestBackend, 4>::zeros([1, 4, 8, 8], &Default::default());
        assert!(ensure_channels(&latent, None).is_ok());
        assert!(ensure_channels(&latent, Some(4)).is_ok());
        match ensure_channels(&latent, Some(16)) {
            Err(StageError::ChannelMismatch {
                expected,
                actual,
                shape,
            }) => {
                assert_eq!(expected, 16);
                assert_eq!(actual, 4);
                assert_eq!(shape, vec![1, 4, 8, 8]);
            }
            other => panic!("expected ChannelMismatch, got {:?}", other),
        }
    }
}
