use serde::{Deserialize, Serialize};

use crate::common::error::{WmError, WmResult};

/// Ratios whose magnitude falls below this are treated as "no ratio".
pub const ASPECT_RATIO_EPSILON: f64 = 0.001;

/// Integer rects satisfy a ratio when `|width - height * ratio|` is at most
/// this many pixels.
pub const ASPECT_RATIO_TOLERANCE: f64 = 1.0;

/// Inclusive size bounds for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WindowLimits {
    #[serde(default = "default_min")]
    pub min_width: i32,
    #[serde(default = "default_min")]
    pub min_height: i32,
    #[serde(default = "default_max")]
    pub max_width: i32,
    #[serde(default = "default_max")]
    pub max_height: i32,
}

fn default_min() -> i32 { 1 }
fn default_max() -> i32 { 16384 }

impl Default for WindowLimits {
    fn default() -> Self {
        WindowLimits {
            min_width: default_min(),
            min_height: default_min(),
            max_width: default_max(),
            max_height: default_max(),
        }
    }
}

impl WindowLimits {
    pub const fn new(min_width: i32, min_height: i32, max_width: i32, max_height: i32) -> Self {
        WindowLimits {
            min_width,
            min_height,
            max_width,
            max_height,
        }
    }

    pub fn validate(&self) -> WmResult<()> {
        if self.min_width <= 0 || self.min_height <= 0 {
            return Err(WmError::invalid_parameter(format!(
                "minimum size must be positive, got {}x{}",
                self.min_width, self.min_height
            )));
        }
        if self.min_width > self.max_width {
            return Err(WmError::invalid_parameter(format!(
                "min_width {} exceeds max_width {}",
                self.min_width, self.max_width
            )));
        }
        if self.min_height > self.max_height {
            return Err(WmError::invalid_parameter(format!(
                "min_height {} exceeds max_height {}",
                self.min_height, self.max_height
            )));
        }
        Ok(())
    }

    pub fn clamp_width(&self, w: i32) -> i32 { w.clamp(self.min_width, self.max_width) }

    pub fn clamp_height(&self, h: i32) -> i32 { h.clamp(self.min_height, self.max_height) }

    pub fn contains_size(&self, width: i32, height: i32) -> bool {
        (self.min_width..=self.max_width).contains(&width)
            && (self.min_height..=self.max_height).contains(&height)
    }

    /// Heights for which a width within the limits can honour `ratio`.
    /// Returns `None` when no such height exists.
    pub fn heights_for_ratio(&self, ratio: f64) -> Option<(i32, i32)> {
        let lo = ((f64::from(self.min_width) - ASPECT_RATIO_TOLERANCE) / ratio).ceil();
        let hi = ((f64::from(self.max_width) + ASPECT_RATIO_TOLERANCE) / ratio).floor();
        let lo = lo.max(f64::from(self.min_height));
        let hi = hi.min(f64::from(self.max_height));
        if lo > hi {
            return None;
        }
        Some((lo as i32, hi as i32))
    }
}

/// Checks a ratio a client wants to apply. Ratios near zero disable the
/// constraint and come back as `0.0`.
pub fn validate_aspect_ratio(ratio: f64, limits: &WindowLimits) -> WmResult<f64> {
    if !ratio.is_finite() || ratio < 0.0 {
        return Err(WmError::invalid_parameter(format!("aspect ratio {ratio} is not valid")));
    }
    if ratio < ASPECT_RATIO_EPSILON {
        return Ok(0.0);
    }
    limits.validate()?;
    if limits.heights_for_ratio(ratio).is_none() {
        return Err(WmError::invalid_parameter(format!(
            "no size within {}x{}..={}x{} has aspect ratio {ratio}",
            limits.min_width, limits.min_height, limits.max_width, limits.max_height
        )));
    }
    Ok(ratio)
}

pub fn is_ratio_enabled(ratio: f64) -> bool { ratio >= ASPECT_RATIO_EPSILON }

pub fn satisfies_ratio(width: i32, height: i32, ratio: f64) -> bool {
    !is_ratio_enabled(ratio)
        || (f64::from(width) - f64::from(height) * ratio).abs() <= ASPECT_RATIO_TOLERANCE + 1e-9
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inconsistent_limits_are_rejected() {
        assert!(WindowLimits::new(500, 10, 400, 100).validate().is_err());
        assert!(WindowLimits::new(10, 500, 100, 400).validate().is_err());
        assert!(WindowLimits::new(0, 10, 100, 100).validate().is_err());
        assert!(WindowLimits::new(100, 100, 100, 100).validate().is_ok());
    }

    #[test]
    fn unsatisfiable_ratio_is_invalid_parameter() {
        let limits = WindowLimits::new(2000, 2000, 3000, 3000);
        assert!(matches!(
            validate_aspect_ratio(0.1, &limits),
            Err(WmError::InvalidParameter(_))
        ));
        assert_eq!(validate_aspect_ratio(1.2, &limits), Ok(1.2));
    }

    #[test]
    fn near_zero_ratio_disables_constraint() {
        let limits = WindowLimits::new(2000, 2000, 3000, 3000);
        assert_eq!(validate_aspect_ratio(0.0005, &limits), Ok(0.0));
        assert!(satisfies_ratio(123, 4567, 0.0));
    }

    #[test]
    fn negative_or_nan_ratio_is_rejected() {
        let limits = WindowLimits::default();
        assert!(validate_aspect_ratio(-1.0, &limits).is_err());
        assert!(validate_aspect_ratio(f64::NAN, &limits).is_err());
    }

    #[test]
    fn feasible_heights_respect_both_dimensions() {
        let limits = WindowLimits::new(100, 100, 400, 1000);
        // width = 2 * height, width <= 400 (+1 tolerance)
        assert_eq!(limits.heights_for_ratio(2.0), Some((100, 200)));
    }
}
