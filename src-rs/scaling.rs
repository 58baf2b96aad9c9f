//! Mapping between the remote desktop's framebuffer space and the smaller
//! space the planner perceives.
//!
//! A single uniform factor is computed once per session. Coordinates are never
//! tagged with their space; call sites decide which conversion applies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ScaleBounds;
use crate::error::{PilotError, PilotResult};

/// Largest per-axis drift tolerated after a model -> desktop -> model round trip.
pub const ROUND_TRIP_TOLERANCE: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn aspect(&self) -> f64 {
        self.width as f64 / self.height as f64
    }

    pub fn center(&self) -> Point {
        Point::new((self.width / 2) as i32, (self.height / 2) as i32)
    }

    pub fn corners(&self) -> [Point; 4] {
        let right = self.width.saturating_sub(1) as i32;
        let bottom = self.height.saturating_sub(1) as i32;
        [
            Point::new(0, 0),
            Point::new(right, 0),
            Point::new(0, bottom),
            Point::new(right, bottom),
        ]
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = PilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| PilotError::Configuration(format!("expected WIDTHxHEIGHT, got {s:?}")))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .map_err(|err| PilotError::Configuration(format!("invalid dimension {v:?}: {err}")))
        };
        Ok(Resolution::new(parse(w)?, parse(h)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl From<(i32, i32)> for Point {
    fn from((x, y): (i32, i32)) -> Self {
        Point::new(x, y)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalePolicy {
    /// Original already inside the bounds.
    Identity,
    /// Shrunk toward the maximum bound.
    Downscale,
    /// Smaller than the minimum bound; passed through unscaled.
    BelowMinimum,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundTripSample {
    pub point: Point,
    pub model: Point,
    pub back: Point,
    pub error: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScaleReport {
    pub original: Resolution,
    pub scaled: Resolution,
    pub factor: f64,
    pub policy: ScalePolicy,
    pub samples: Vec<RoundTripSample>,
    pub max_error: i64,
    pub within_tolerance: bool,
}

#[derive(Debug, Clone)]
pub struct Scaler {
    original: Resolution,
    scaled: Resolution,
    factor: f64,
    policy: ScalePolicy,
    report: ScaleReport,
}

impl Scaler {
    pub fn new(original: Resolution, bounds: &ScaleBounds) -> PilotResult<Self> {
        bounds.validate()?;
        if original.width == 0 || original.height == 0 {
            return Err(PilotError::Configuration(format!(
                "desktop resolution {original} has a zero dimension"
            )));
        }
        if i32::try_from(original.width).is_err() || i32::try_from(original.height).is_err() {
            return Err(PilotError::Configuration(format!(
                "desktop resolution {original} exceeds the coordinate range"
            )));
        }

        let (scaled, factor, policy) = if bounds.contains(original) {
            (original, 1.0, ScalePolicy::Identity)
        } else if original.width <= bounds.max.width && original.height <= bounds.max.height {
            warn!(
                original = %original,
                min = %bounds.min,
                "desktop resolution is below the minimum bound; passing through unscaled"
            );
            (original, 1.0, ScalePolicy::BelowMinimum)
        } else {
            let width_factor = bounds.max.width as f64 / original.width as f64;
            let height_factor = bounds.max.height as f64 / original.height as f64;
            let factor = width_factor.min(height_factor);
            if !factor.is_finite() || factor <= 0.0 {
                return Err(PilotError::Configuration(format!(
                    "bounds {} produce an unusable scale factor {factor} for {original}",
                    bounds.max
                )));
            }
            let scaled = Resolution::new(
                ((original.width as f64 * factor).round() as u32).max(1),
                ((original.height as f64 * factor).round() as u32).max(1),
            );
            (scaled, factor, ScalePolicy::Downscale)
        };

        let mut scaler = Self {
            original,
            scaled,
            factor,
            policy,
            report: ScaleReport {
                original,
                scaled,
                factor,
                policy,
                samples: Vec::new(),
                max_error: 0,
                within_tolerance: true,
            },
        };
        scaler.report = scaler.self_check();
        debug!(
            original = %original,
            scaled = %scaled,
            factor,
            "scaler ready"
        );
        Ok(scaler)
    }

    pub fn original(&self) -> Resolution {
        self.original
    }

    pub fn scaled(&self) -> Resolution {
        self.scaled
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn policy(&self) -> ScalePolicy {
        self.policy
    }

    pub fn report(&self) -> &ScaleReport {
        &self.report
    }

    pub fn is_identity(&self) -> bool {
        self.original == self.scaled
    }

    /// Model space -> desktop space.
    pub fn scale_to_original_space(&self, point: Point) -> Point {
        Point::new(
            (point.x as f64 / self.factor).round() as i32,
            (point.y as f64 / self.factor).round() as i32,
        )
    }

    /// Desktop space -> model space.
    pub fn scale_to_model_space(&self, point: Point) -> Point {
        Point::new(
            (point.x as f64 * self.factor).round() as i32,
            (point.y as f64 * self.factor).round() as i32,
        )
    }

    /// Converts a model-space point and keeps the result on the framebuffer.
    pub fn to_desktop(&self, point: Point) -> Point {
        let raw = self.scale_to_original_space(point);
        let clamped = Point::new(
            raw.x.clamp(0, self.original.width.saturating_sub(1) as i32),
            raw.y.clamp(0, self.original.height.saturating_sub(1) as i32),
        );
        if clamped != raw {
            debug!(model = %point, desktop = %raw, clamped = %clamped, "clamped desktop coordinate");
        }
        clamped
    }

    fn self_check(&self) -> ScaleReport {
        let mut points = self.original.corners().to_vec();
        points.push(self.original.center());

        let samples: Vec<RoundTripSample> = points
            .into_iter()
            .map(|point| {
                let model = self.scale_to_model_space(point);
                let back = self.scale_to_original_space(model);
                let error = ((back.x - point.x) as i64)
                    .abs()
                    .max(((back.y - point.y) as i64).abs());
                RoundTripSample {
                    point,
                    model,
                    back,
                    error,
                }
            })
            .collect();

        let max_error = samples.iter().map(|s| s.error).max().unwrap_or(0);
        let within_tolerance = max_error <= ROUND_TRIP_TOLERANCE;
        if !within_tolerance {
            for sample in samples.iter().filter(|s| s.error > ROUND_TRIP_TOLERANCE) {
                warn!(
                    original = %self.original,
                    scaled = %self.scaled,
                    point = %sample.point,
                    back = %sample.back,
                    error = sample.error,
                    "coordinate round trip exceeds tolerance"
                );
            }
        }

        ScaleReport {
            original: self.original,
            scaled: self.scaled,
            factor: self.factor,
            policy: self.policy,
            samples,
            max_error,
            within_tolerance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scaler(w: u32, h: u32) -> Scaler {
        Scaler::new(Resolution::new(w, h), &ScaleBounds::default()).unwrap()
    }

    #[test]
    fn max_bound_is_identity() {
        let s = scaler(1920, 1080);
        assert_eq!(s.factor(), 1.0);
        assert_eq!(s.scaled(), Resolution::new(1920, 1080));
        assert_eq!(s.policy(), ScalePolicy::Identity);
        assert!(s.is_identity());
    }

    #[test]
    fn uhd_downscales_preserving_aspect() {
        let s = scaler(3840, 2160);
        let scaled = s.scaled();
        assert!(scaled.width <= 1920);
        assert!(scaled.height <= 1080);
        assert_eq!(scaled, Resolution::new(1920, 1080));
        let drift = (scaled.aspect() - s.original().aspect()).abs();
        assert!(drift < 0.01, "aspect drift {drift}");
        assert_eq!(s.policy(), ScalePolicy::Downscale);
    }

    #[test]
    fn narrow_axis_limits_the_factor() {
        let s = scaler(2560, 1600);
        assert!((s.factor() - 0.675).abs() < 1e-9);
        assert_eq!(s.scaled(), Resolution::new(1728, 1080));
    }

    #[test]
    fn round_trip_within_one_pixel_inside_bounds() {
        for (w, h) in [(800, 600), (1024, 768), (1280, 800), (1366, 768), (1920, 1080)] {
            let s = scaler(w, h);
            let mut points = s.original().corners().to_vec();
            points.push(s.original().center());
            for p in points {
                let back = s.scale_to_original_space(s.scale_to_model_space(p));
                assert!((back.x - p.x).abs() <= 1, "{w}x{h} {p} -> {back}");
                assert!((back.y - p.y).abs() <= 1, "{w}x{h} {p} -> {back}");
            }
            assert!(s.report().within_tolerance);
        }
    }

    #[test]
    fn downscaled_self_check_covers_corners_and_center() {
        let s = scaler(3840, 2160);
        let report = s.report();
        assert_eq!(report.samples.len(), 5);
        assert!(report.within_tolerance);
        assert!(report.max_error <= ROUND_TRIP_TOLERANCE);
    }

    #[test]
    fn model_coordinates_map_back_to_desktop() {
        let s = scaler(3840, 2160);
        assert_eq!(
            s.scale_to_original_space(Point::new(960, 540)),
            Point::new(1920, 1080)
        );
        assert_eq!(
            s.scale_to_model_space(Point::new(1920, 1080)),
            Point::new(960, 540)
        );
    }

    #[test]
    fn to_desktop_clamps_onto_framebuffer() {
        let s = scaler(3840, 2160);
        assert_eq!(s.to_desktop(Point::new(1920, 1080)), Point::new(3839, 2159));
        assert_eq!(s.to_desktop(Point::new(-4, 10)), Point::new(0, 20));
    }

    #[test]
    fn below_minimum_passes_through() {
        let s = scaler(640, 480);
        assert_eq!(s.scaled(), Resolution::new(640, 480));
        assert_eq!(s.factor(), 1.0);
        assert_eq!(s.policy(), ScalePolicy::BelowMinimum);
    }

    #[test]
    fn zero_resolution_is_a_configuration_error() {
        let err = Scaler::new(Resolution::new(0, 1080), &ScaleBounds::default()).unwrap_err();
        assert!(matches!(err, PilotError::Configuration(_)));
    }

    #[test]
    fn coarse_bounds_fail_the_round_trip_check() {
        let bounds = ScaleBounds {
            min: Resolution::new(1, 1),
            max: Resolution::new(3, 3),
        };
        let s = Scaler::new(Resolution::new(10000, 10000), &bounds).unwrap();
        let report = s.report();
        assert_eq!(s.scaled(), Resolution::new(3, 3));
        assert!(!report.within_tolerance);
        assert!(report.max_error > ROUND_TRIP_TOLERANCE);
        let center = report
            .samples
            .iter()
            .find(|sample| sample.point == Point::new(5000, 5000))
            .unwrap();
        assert!(center.error > ROUND_TRIP_TOLERANCE);
    }

    #[test]
    fn oversized_resolution_is_a_configuration_error() {
        let huge = i32::MAX as u32 + 1;
        let err = Scaler::new(Resolution::new(huge, 1080), &ScaleBounds::default()).unwrap_err();
        assert!(matches!(err, PilotError::Configuration(_)));
        let err = Scaler::new(Resolution::new(1920, huge), &ScaleBounds::default()).unwrap_err();
        assert!(matches!(err, PilotError::Configuration(_)));
    }

    #[test]
    fn resolution_parses_from_cli_form() {
        assert_eq!(
            "2560x1440".parse::<Resolution>().unwrap(),
            Resolution::new(2560, 1440)
        );
        assert!("2560".parse::<Resolution>().is_err());
        assert!("axb".parse::<Resolution>().is_err());
    }
}
