//! Sampler and scheduler selection
//!
//! The orchestrator never interprets these; they are forwarded to the
//! denoising engine. Names follow the identifiers hosts use for them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Sampler algorithm selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum SamplerType {
    /// Euler - Balanced speed/quality (default)
    #[default]
    Euler,
    /// Euler Ancestral - Euler with noise injection
    EulerA,
    /// Heun - High quality, 2x NFE
    Heun,
    /// LMS - Linear multi-step
    Lms,
    /// DPM++ 2S Ancestral
    Dpm2sA,
    /// DPM++ 2M
    DpmPlusPlus,
    /// DPM++ 2M SDE - More detail, stochastic
    DpmPlusPlusSde,
    /// DPM++ 3M SDE
    Dpm3mSde,
    /// DDPM - Original stochastic sampler
    Ddpm,
    /// LCM - Fast (4-8 steps)
    Lcm,
    /// DEIS - Exponential integrator
    Deis,
    /// UniPC - Predictor-corrector
    UniPc,
    /// DDIM - Deterministic, fast
    Ddim,
}

impl SamplerType {
    pub const ALL: [SamplerType; 13] = [
        Self::Euler,
        Self::EulerA,
        Self::Heun,
        Self::Lms,
        Self::Dpm2sA,
        Self::DpmPlusPlus,
        Self::DpmPlusPlusSde,
        Self::Dpm3mSde,
        Self::Ddpm,
        Self::Lcm,
        Self::Deis,
        Self::UniPc,
        Self::Ddim,
    ];

    /// Host identifier
    pub fn name(&self) -> &'static str {
        match self {
            Self::Euler => "euler",
            Self::EulerA => "euler_ancestral",
            Self::Heun => "heun",
            Self::Lms => "lms",
            Self::Dpm2sA => "dpmpp_2s_ancestral",
            Self::DpmPlusPlus => "dpmpp_2m",
            Self::DpmPlusPlusSde => "dpmpp_2m_sde",
            Self::Dpm3mSde => "dpmpp_3m_sde",
            Self::Ddpm => "ddpm",
            Self::Lcm => "lcm",
            Self::Deis => "deis",
            Self::UniPc => "uni_pc",
            Self::Ddim => "ddim",
        }
    }
}

/// Noise schedule type (sigma spacing)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum ScheduleType {
    /// Uniform spacing in timestep space (default)
    #[default]
    Normal,
    /// Karras sigma schedule
    Karras,
    /// Exponential spacing between sigma_max and sigma_min
    Exponential,
    /// SGM Uniform - uniform spacing in sigma space
    SgmUniform,
    /// Beta distribution spacing (more steps at high noise)
    Beta,
    /// Linear-Quadratic blend
    LinearQuadratic,
}

impl ScheduleType {
    pub const ALL: [ScheduleType; 6] = [
        Self::Normal,
        Self::Karras,
        Self::Exponential,
        Self::SgmUniform,
        Self::Beta,
        Self::LinearQuadratic,
    ];

    /// Host identifier
    pub fn name(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Karras => "karras",
            Self::Exponential => "exponential",
            Self::SgmUniform => "sgm_uniform",
            Self::Beta => "beta",
            Self::LinearQuadratic => "linear_quadratic",
        }
    }
}

/// Unrecognized sampler or scheduler name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{name}'")]
pub struct UnknownName {
    pub kind: &'static str,
    pub name: String,
}

macro_rules! impl_named {
    ($ty:ident, $kind:literal) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl FromStr for $ty {
            type Err = UnknownName;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.name() == s)
                    .ok_or_else(|| UnknownName {
                        kind: $kind,
                        name: s.to_string(),
                    })
            }
        }

        impl TryFrom<String> for $ty {
            type Error = UnknownName;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                s.parse()
            }
        }

        impl From<$ty> for &'static str {
            fn from(value: $ty) -> Self {
                value.name()
            }
        }
    };
}

impl_named!(SamplerType, "sampler");
impl_named!(ScheduleType, "scheduler");
