//! Numeric kernels shared by the cube, the S+C finder and the noise-scaling
//! stage: NaN-safe sums, dispersion statistics and the boxcar/Gaussian
//! smoothing filters.
//!
//! Everything here is generic over `num_traits::Float` so the `f32` and
//! `f64` instantiations come from one body instead of two hand-kept copies.

use num_traits::Float;

/// Which side of `v` contributes to a dispersion statistic.
///
/// `Negative`/`Positive` are used to estimate noise from one wing of the flux
/// distribution only, on the assumption that real emission is one-sided and
/// the opposite wing is therefore a cleaner noise sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FluxRange {
    Negative,
    Full,
    Positive,
}

/// Sum of the non-NaN values in `data`. Returns NaN if every value is NaN.
pub fn sum_nan_safe<T: Float>(data: &[T]) -> T {
    let mut acc = T::zero();
    let mut any = false;
    for &x in data {
        if !x.is_nan() {
            acc = acc + x;
            any = true;
        }
    }
    if any {
        acc
    } else {
        T::nan()
    }
}

/// Standard deviation of `{data[i*cadence]}` about `v`, restricted to the
/// finite values selected by `range`. NaN if no value qualifies.
pub fn stddev_about<T: Float>(data: &[T], v: T, cadence: usize, range: FluxRange) -> T {
    let cadence = cadence.max(1);
    let mut sum_sq = T::zero();
    let mut n: usize = 0;

    let mut i = 0;
    while i < data.len() {
        let x = data[i];
        if x.is_finite() {
            let include = match range {
                FluxRange::Full => true,
                FluxRange::Negative => x <= v,
                FluxRange::Positive => x >= v,
            };
            if include {
                let d = x - v;
                sum_sq = sum_sq + d * d;
                n += 1;
            }
        }
        i += cadence;
    }

    if n == 0 {
        T::nan()
    } else {
        (sum_sq / T::from(n).unwrap()).sqrt()
    }
}

/// Median absolute deviation of `data` about `v`.
///
/// Destructive: partitions and partially sorts `data` in place via
/// selection. Callers that need to keep the original values must copy first.
pub fn mad_about<T: Float>(data: &mut [T], v: T) -> T {
    let mut n = 0usize;
    for i in 0..data.len() {
        let x = data[i];
        if x.is_finite() {
            data[n] = (x - v).abs();
            n += 1;
        }
    }

    if n == 0 {
        return T::nan();
    }

    median_inplace(&mut data[..n])
}

fn median_inplace<T: Float>(s: &mut [T]) -> T {
    let mid = s.len() / 2;
    let (lo, hi_val, _) = s.select_nth_unstable_by(mid, |a, b| a.partial_cmp(b).unwrap());

    if s.len() % 2 == 1 {
        *hi_val
    } else {
        let lo_max = lo.iter().cloned().fold(T::neg_infinity(), T::max);
        (lo_max + *hi_val) / (T::one() + T::one())
    }
}

/// Symmetric boxcar (moving average) of half-width `k` over `input`, written
/// into `output`. `pad` is caller-owned scratch of length `input.len() +
/// 2*k`, holding the zero-padded, NaN-scrubbed copy the sliding window reads
/// from.
///
/// `k == 0` copies `input` into `output` unchanged.
///
/// A NaN-free `input` is filtered exactly as given: the zero-substitution
/// path only triggers when a NaN is actually present, so the two paths
/// produce bit-identical results for NaN-free data.
pub fn boxcar_1d<T: Float>(input: &[T], output: &mut [T], pad: &mut [T], k: usize) {
    let n = input.len();
    assert_eq!(output.len(), n);
    assert_eq!(pad.len(), n + 2 * k);

    if k == 0 {
        output.copy_from_slice(input);
        return;
    }

    let has_nan = input.iter().any(|x| x.is_nan());

    for (i, slot) in pad.iter_mut().enumerate() {
        *slot = if i < k || i >= k + n {
            T::zero()
        } else {
            let v = input[i - k];
            if has_nan && v.is_nan() {
                T::zero()
            } else {
                v
            }
        };
    }

    let width = 2 * k + 1;
    let inv_width = T::one() / T::from(width).unwrap();

    let mut window_sum = T::zero();
    for &x in &pad[0..width] {
        window_sum = window_sum + x;
    }
    output[0] = window_sum * inv_width;

    for i in 1..n {
        window_sum = window_sum - pad[i - 1] + pad[i - 1 + width];
        output[i] = window_sum * inv_width;
    }
}

const MIN_GAUSSIAN_SIGMA: f64 = 1.5;

/// Chooses the boxcar half-width `r` and pass count `n` that approximate a
/// Gaussian of standard deviation `sigma`, via the usual box-blur identity
/// `n * ((2r+1)^2 - 1) / 12 ≈ sigma^2`. Fixes `n = 3`, the standard
/// three-pass box-blur approximation, and solves for the odd window width
/// nearest the ideal.
fn gaussian_boxcar_params(sigma: f64) -> (usize, usize) {
    let sigma = sigma.max(MIN_GAUSSIAN_SIGMA);
    let n: usize = 3;

    let ideal_w = (12.0 * sigma * sigma / n as f64 + 1.0).sqrt();
    let mut w = ideal_w.floor() as i64;
    if w % 2 == 0 {
        w -= 1;
    }
    if w < 1 {
        w = 1;
    }

    let r = ((w - 1) / 2) as usize;
    (r, n)
}

/// Separable 2-D Gaussian blur of an `nx * ny` plane (x fastest-varying, as
/// in the cube's own index convention), approximated by repeated boxcars:
/// rows (along x) then columns (along y), `n` times.
///
/// NaNs are zeroed once up front if any are present in the plane, so the
/// repeated boxcar passes never need to re-detect them.
pub fn gaussian_plane<T: Float>(plane: &mut [T], nx: usize, ny: usize, sigma: f64) {
    assert_eq!(plane.len(), nx * ny);

    let (r, n) = gaussian_boxcar_params(sigma);
    if r == 0 {
        return;
    }

    if plane.iter().any(|x| x.is_nan()) {
        for v in plane.iter_mut() {
            if v.is_nan() {
                *v = T::zero();
            }
        }
    }

    let mut row_out = vec![T::zero(); nx];
    let mut row_pad = vec![T::zero(); nx + 2 * r];
    let mut col_in = vec![T::zero(); ny];
    let mut col_out = vec![T::zero(); ny];
    let mut col_pad = vec![T::zero(); ny + 2 * r];

    for _ in 0..n {
        for y in 0..ny {
            let row = &plane[y * nx..(y + 1) * nx];
            boxcar_1d(row, &mut row_out, &mut row_pad, r);
            plane[y * nx..(y + 1) * nx].copy_from_slice(&row_out);
        }

        for x in 0..nx {
            for y in 0..ny {
                col_in[y] = plane[y * nx + x];
            }
            boxcar_1d(&col_in, &mut col_out, &mut col_pad, r);
            for y in 0..ny {
                plane[y * nx + x] = col_out[y];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_nan_safe_skips_nans() {
        let data = [1.0f64, f64::NAN, 2.0, 3.0];
        assert_eq!(sum_nan_safe(&data), 6.0);
    }

    #[test]
    fn sum_nan_safe_all_nan() {
        let data = [f64::NAN, f64::NAN];
        assert!(sum_nan_safe(&data).is_nan());
    }

    #[test]
    fn stddev_about_zero_full_range() {
        let data = [1.0f64, -1.0, 1.0, -1.0];
        let s = stddev_about(&data, 0.0, 1, FluxRange::Full);
        assert!((s - 1.0).abs() < 1e-12);
    }

    #[test]
    fn stddev_about_negative_range_excludes_positive() {
        let data = [1.0f64, -2.0, 3.0, -4.0];
        let s = stddev_about(&data, 0.0, 1, FluxRange::Negative);
        // Only -2 and -4 qualify (<=0).
        let expected = ((4.0f64 + 16.0) / 2.0).sqrt();
        assert!((s - expected).abs() < 1e-12);
    }

    #[test]
    fn stddev_about_excludes_nan() {
        let data = [1.0f64, f64::NAN, -1.0];
        let s = stddev_about(&data, 0.0, 1, FluxRange::Full);
        assert!((s - 1.0).abs() < 1e-12);
    }

    #[test]
    fn mad_about_basic() {
        let mut data = [1.0f64, 2.0, 3.0, 4.0, 5.0];
        let m = mad_about(&mut data, 3.0);
        assert!((m - 1.0).abs() < 1e-12);
    }

    #[test]
    fn mad_about_ignores_nonfinite() {
        let mut data = [1.0f64, f64::NAN, 5.0];
        let m = mad_about(&mut data, 3.0);
        assert!((m - 2.0).abs() < 1e-12);
    }

    #[test]
    fn boxcar_1d_zero_radius_is_identity() {
        let input = [1.0f64, 2.0, 3.0];
        let mut output = [0.0f64; 3];
        let mut pad = [0.0f64; 3];
        boxcar_1d(&input, &mut output, &mut pad, 0);
        assert_eq!(output, input);
    }

    #[test]
    fn boxcar_1d_matches_with_and_without_nans() {
        let clean = [1.0f64, 2.0, 3.0, 4.0, 5.0];
        let mut out_clean = [0.0f64; 5];
        let mut pad = [0.0f64; 7];
        boxcar_1d(&clean, &mut out_clean, &mut pad, 1);

        // A NaN-free input must be unaffected by the NaN path existing at all.
        let mut out_again = [0.0f64; 5];
        boxcar_1d(&clean, &mut out_again, &mut pad, 1);
        assert_eq!(out_clean, out_again);
    }

    #[test]
    fn boxcar_1d_zero_pads_edges() {
        let input = [0.0f64, 0.0, 10.0, 0.0, 0.0];
        let mut output = [0.0f64; 5];
        let mut pad = [0.0f64; 7];
        boxcar_1d(&input, &mut output, &mut pad, 1);
        // Window at index 0 sees [0(pad), 0, 0] -> 0; index 2 sees [0,10,0] -> 10/3
        assert_eq!(output[0], 0.0);
        assert!((output[2] - 10.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn boxcar_1d_is_linear() {
        let a = [1.0f64, 2.0, 3.0, 4.0];
        let b = [4.0f64, 1.0, 0.0, 2.0];
        let alpha = 2.0f64;
        let beta = -3.0f64;
        let combo: Vec<f64> = a.iter().zip(&b).map(|(x, y)| alpha * x + beta * y).collect();

        let mut pad = [0.0f64; 6];
        let mut out_a = [0.0f64; 4];
        let mut out_b = [0.0f64; 4];
        let mut out_combo = [0.0f64; 4];
        boxcar_1d(&a, &mut out_a, &mut pad, 1);
        boxcar_1d(&b, &mut out_b, &mut pad, 1);
        boxcar_1d(&combo, &mut out_combo, &mut pad, 1);

        for i in 0..4 {
            let expected = alpha * out_a[i] + beta * out_b[i];
            assert!((out_combo[i] - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn gaussian_plane_smooths_impulse() {
        let nx = 9;
        let ny = 9;
        let mut plane = vec![0.0f64; nx * ny];
        plane[4 * nx + 4] = 100.0;
        gaussian_plane(&mut plane, nx, ny, 2.0);
        // Energy should have spread: center value drops, neighbours rise.
        assert!(plane[4 * nx + 4] < 100.0);
        assert!(plane[4 * nx + 5] > 0.0);
    }
}
