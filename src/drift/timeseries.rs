//! Time-series helpers: least-squares trend and autocorrelation.
//!
//! Pure functions over plain slices, independent of drift record shapes.

use statrs::distribution::{ContinuousCDF, StudentsT};

/// Ordinary least-squares fit of `y = slope * x + intercept`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearTrend {
    /// Change in y per unit x.
    pub slope: f64,
    /// y at x = 0.
    pub intercept: f64,
    /// Pearson correlation coefficient.
    pub r: f64,
    /// Two-sided p-value for a non-zero slope.
    pub p_value: f64,
}

/// Arithmetic mean, 0.0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Fit a trend line through paired points.
///
/// Returns `None` with fewer than two points, mismatched lengths, or when
/// every x is identical.
pub fn linear_trend(xs: &[f64], ys: &[f64]) -> Option<LinearTrend> {
    let n = xs.len();
    if n < 2 || n != ys.len() {
        return None;
    }

    let mean_x = mean(xs);
    let mean_y = mean(ys);
    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    if sxx <= 0.0 {
        return None;
    }

    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    let r = if syy > 0.0 {
        (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0)
    } else {
        0.0
    };

    Some(LinearTrend {
        slope,
        intercept,
        r,
        p_value: slope_p_value(r, n),
    })
}

fn slope_p_value(r: f64, n: usize) -> f64 {
    if n < 3 {
        return 1.0;
    }
    let r2 = r * r;
    if r2 >= 1.0 {
        return 0.0;
    }

    let df = (n - 2) as f64;
    let t = r * (df / (1.0 - r2)).sqrt();
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}

/// Normalised autocorrelation for lags `0..n`.
///
/// Coefficient k is the lag-k autocovariance divided by the variance, so the
/// first entry is 1.0. A constant or empty series yields an empty vector.
pub fn autocorrelation(series: &[f64]) -> Vec<f64> {
    let n = series.len();
    let m = mean(series);
    let centred: Vec<f64> = series.iter().map(|v| v - m).collect();
    let variance: f64 = centred.iter().map(|v| v * v).sum();
    if n == 0 || variance <= 0.0 {
        return Vec::new();
    }

    (0..n)
        .map(|lag| {
            centred[..n - lag]
                .iter()
                .zip(&centred[lag..])
                .map(|(a, b)| a * b)
                .sum::<f64>()
                / variance
        })
        .collect()
}

/// Lag of the first local maximum above `threshold`, ignoring lag 0.
pub fn first_cycle(coefficients: &[f64], threshold: f64) -> Option<usize> {
    (1..coefficients.len().saturating_sub(1)).find(|&lag| {
        let c = coefficients[lag];
        c > threshold && c > coefficients[lag - 1] && c > coefficients[lag + 1]
    })
}
