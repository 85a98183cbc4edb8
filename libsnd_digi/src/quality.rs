use serde::{Deserialize, Serialize};

use super::constants::*;

/// Cuts applied to every calibrated hit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityCuts {
    pub chi2_max: f64,
    pub saturation_limit: f64,
}

impl Default for QualityCuts {
    fn default() -> Self {
        Self {
            chi2_max: DEFAULT_CHI2_MAX,
            saturation_limit: DEFAULT_SATURATION_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityFlag {
    Good,
    /// Calibration fit too poor; charge is sign-encoded negative
    Chi2Rejected,
    /// Charge range saturated; charge is packed as clamp + saturation/1000
    Saturated,
    /// Charge overflowed to +inf; packed like a saturated hit
    Overflow,
    /// Charge is NaN; packed like a saturated hit
    NotANumber,
}

/// Outcome of classifying one hit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub charge: f64,
    pub valid: bool,
    pub flag: QualityFlag,
    /// Legacy diagnostic literal reported for inf/NaN charges
    pub diagnostic: Option<f64>,
}

/// Pack a clamped magnitude and a saturation fraction into a single value: A + B
pub fn pack_saturated(magnitude: f64, saturation: f64) -> f64 {
    let a = magnitude.min(CHARGE_CLAMP).floor();
    let b = saturation.min(SATURATION_CLAMP) / 1000.0;
    a + b
}

/// Decide validity and re-encode the charge of a calibrated hit.
///
/// The branches are checked in order: chi2, then saturation/inf/NaN, otherwise valid.
pub fn classify(charge: f64, chi2: f64, saturation: f64, cuts: &QualityCuts) -> Classification {
    if chi2 > cuts.chi2_max {
        let mut charge = charge;
        let mut diagnostic = None;
        if charge == f64::INFINITY {
            charge = CHI2_INF_SENTINEL;
            diagnostic = Some(CHI2_INF_SENTINEL);
        } else if charge.is_nan() {
            charge = CHI2_NAN_SENTINEL;
            diagnostic = Some(CHI2_NAN_SENTINEL);
        }
        if charge > 0.0 {
            charge = -charge;
        }
        Classification {
            charge,
            valid: false,
            flag: QualityFlag::Chi2Rejected,
            diagnostic,
        }
    } else if saturation > cuts.saturation_limit || charge == f64::INFINITY || charge.is_nan() {
        let (magnitude, flag, diagnostic) = if charge == f64::INFINITY {
            (CHARGE_CLAMP, QualityFlag::Overflow, Some(SATURATED_INF_SENTINEL))
        } else if charge.is_nan() {
            (
                SATURATED_NAN_SENTINEL,
                QualityFlag::NotANumber,
                Some(SATURATED_NAN_SENTINEL),
            )
        } else {
            (charge, QualityFlag::Saturated, None)
        };
        Classification {
            charge: pack_saturated(magnitude, saturation),
            valid: false,
            flag,
            diagnostic,
        }
    } else {
        Classification {
            charge,
            valid: true,
            flag: QualityFlag::Good,
            diagnostic: None,
        }
    }
}
