//! Pure focus-score algorithms over a captured image buffer.

use crate::config::FocusScoreMethod;
use crate::types::CapturedImage;
use ndarray::Array2;
use num_complex::Complex64;
use rustfft::FftPlanner;

/// Compute the configured focus score for one image.
pub fn compute_focus_score(image: &CapturedImage, method: FocusScoreMethod) -> f64 {
    match method {
        FocusScoreMethod::LaplacianVariance => laplacian_variance(image.samples()),
        FocusScoreMethod::NormalizedVariance => normalized_variance(image.samples()),
        FocusScoreMethod::GradientMagnitude => gradient_magnitude(image.samples()),
        FocusScoreMethod::FftHighFreq => fft_high_freq(image.samples()),
    }
}

fn mean(a: &Array2<f64>) -> f64 {
    a.sum() / (a.len() as f64)
}

fn variance(a: &Array2<f64>, mean_val: f64) -> f64 {
    let n = a.len() as f64;
    a.iter().map(|v| (v - mean_val).powi(2)).sum::<f64>() / n
}

/// Variance of the discrete Laplacian (second-derivative response); a
/// standard sharpness metric. Higher is sharper.
pub fn laplacian_variance(image: &Array2<f64>) -> f64 {
    let (h, w) = image.dim();
    if h < 3 || w < 3 {
        return 0.0;
    }
    let mut laplacian = Array2::<f64>::zeros((h - 2, w - 2));
    for i in 1..h - 1 {
        for j in 1..w - 1 {
            let center = image[[i, j]];
            let lap = image[[i - 1, j]] + image[[i + 1, j]] + image[[i, j - 1]] + image[[i, j + 1]]
                - 4.0 * center;
            laplacian[[i - 1, j - 1]] = lap;
        }
    }
    let m = mean(&laplacian);
    variance(&laplacian, m)
}

/// Image variance divided by its mean; zero when the mean is zero.
pub fn normalized_variance(image: &Array2<f64>) -> f64 {
    let m = mean(image);
    if m == 0.0 {
        return 0.0;
    }
    variance(image, m) / m
}

/// Mean of `sqrt(gx^2 + gy^2)` using first-order Sobel derivatives.
pub fn gradient_magnitude(image: &Array2<f64>) -> f64 {
    let (h, w) = image.dim();
    if h < 3 || w < 3 {
        return 0.0;
    }
    let sobel_x = [[-1.0, 0.0, 1.0], [-2.0, 0.0, 2.0], [-1.0, 0.0, 1.0]];
    let sobel_y = [[-1.0, -2.0, -1.0], [0.0, 0.0, 0.0], [1.0, 2.0, 1.0]];
    let mut total = 0.0;
    let mut count = 0usize;
    for i in 1..h - 1 {
        for j in 1..w - 1 {
            let mut gx = 0.0;
            let mut gy = 0.0;
            for di in 0..3 {
                for dj in 0..3 {
                    let sample = image[[i + di - 1, j + dj - 1]];
                    gx += sobel_x[di][dj] * sample;
                    gy += sobel_y[di][dj] * sample;
                }
            }
            total += (gx * gx + gy * gy).sqrt();
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        total / (count as f64)
    }
}

/// Mean magnitude of the 2D FFT after zeroing a centered low-frequency
/// square of side `min(h, w) / 8`.
pub fn fft_high_freq(image: &Array2<f64>) -> f64 {
    let (h, w) = image.dim();
    if h == 0 || w == 0 {
        return 0.0;
    }

    let mut planner = FftPlanner::<f64>::new();

    // FFT each row, then each column, for a 2D transform.
    let mut rows: Vec<Complex64> = image.iter().map(|&v| Complex64::new(v, 0.0)).collect();
    let row_fft = planner.plan_fft_forward(w);
    for chunk in rows.chunks_mut(w) {
        row_fft.process(chunk);
    }

    let col_fft = planner.plan_fft_forward(h);
    let mut columns = vec![Complex64::new(0.0, 0.0); h];
    for j in 0..w {
        for (i, slot) in columns.iter_mut().enumerate() {
            *slot = rows[i * w + j];
        }
        col_fft.process(&mut columns);
        for (i, &value) in columns.iter().enumerate() {
            rows[i * w + j] = value;
        }
    }

    let low_side = (h.min(w) / 8).max(1);
    let center_h = h / 2;
    let center_w = w / 2;
    let lo_h = center_h.saturating_sub(low_side / 2);
    let hi_h = (center_h + low_side / 2).min(h);
    let lo_w = center_w.saturating_sub(low_side / 2);
    let hi_w = (center_w + low_side / 2).min(w);

    let mut total = 0.0;
    let mut count = 0usize;
    for i in 0..h {
        for j in 0..w {
            // fftshift-equivalent check: treat the unshifted low-frequency
            // corners as the center region by wrapping indices.
            let shifted_i = (i + h / 2) % h;
            let shifted_j = (j + w / 2) % w;
            let is_low_freq =
                shifted_i >= lo_h && shifted_i < hi_h && shifted_j >= lo_w && shifted_j < hi_w;
            if !is_low_freq {
                total += rows[i * w + j].norm();
                count += 1;
            }
        }
    }
    if count == 0 {
        0.0
    } else {
        total / (count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_image_has_zero_laplacian_variance() {
        let img = Array2::from_elem((10, 10), 5.0);
        assert_eq!(laplacian_variance(&img), 0.0);
    }

    #[test]
    fn normalized_variance_zero_mean_is_zero() {
        let img = Array2::from_elem((4, 4), 0.0);
        assert_eq!(normalized_variance(&img), 0.0);
    }

    #[test]
    fn checkerboard_has_nonzero_gradient_magnitude() {
        let mut img = Array2::<f64>::zeros((6, 6));
        for i in 0..6 {
            for j in 0..6 {
                img[[i, j]] = if (i + j) % 2 == 0 { 0.0 } else { 255.0 };
            }
        }
        assert!(gradient_magnitude(&img) > 0.0);
    }

    #[test]
    fn fft_high_freq_uniform_image_is_zero() {
        let img = Array2::from_elem((16, 16), 42.0);
        let score = fft_high_freq(&img);
        assert!(score.abs() < 1e-6, "expected near-zero, got {score}");
    }

    #[test]
    fn fft_high_freq_noisy_image_is_positive() {
        let mut img = Array2::<f64>::zeros((16, 16));
        for i in 0..16 {
            for j in 0..16 {
                img[[i, j]] = if (i * 7 + j * 13) % 5 == 0 { 200.0 } else { 10.0 };
            }
        }
        assert!(fft_high_freq(&img) > 0.0);
    }
}
