//! Utility module
//!
//! Spline position arithmetic and unit conversions shared by the codec and the
//! gap engine.

/// Normalizes a raw spline position plus track offset into `[0, 1)`
pub fn normalize_spline(raw: f64, offset: f64) -> f64 {
    let wrapped = (raw + offset).rem_euclid(1.0);
    // rem_euclid can round up to exactly 1.0 for tiny negative inputs
    if wrapped >= 1.0 {
        0.0
    } else {
        wrapped
    }
}

/// Wraps a relative spline offset into `[-0.5, 0.5]`
///
/// Positive values mean the car is ahead on track, negative values behind.
pub fn wrap_relative(mut relative: f64) -> f64 {
    while relative > 0.5 {
        relative -= 1.0;
    }
    while relative < -0.5 {
        relative += 1.0;
    }
    relative
}

/// Relative spline position of `this` with respect to `other`
pub fn relative_spline_position(this: f64, other: f64) -> f64 {
    wrap_relative(this - other)
}

/// Converts wire milliseconds to seconds
pub fn ms_to_secs(ms: impl Into<f64>) -> f64 {
    ms.into() / 1000.0
}
