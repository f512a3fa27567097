//! The `scaleNoise` stage: dividing a cube by a global or spatially/
//! spectrally varying noise estimate so that a single S+C threshold
//! multiplier is meaningful everywhere in the cube.

use ndarray::Array3;
use tracing::debug;

use crate::cube::DataCube;
use crate::error::{Error, Result};
use crate::kernels::{self, FluxRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Statistic {
    Std,
    Mad,
    Gauss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseMode {
    Global,
    Local,
}

/// Parameters for a single `scaleNoise` invocation (component K, `spec.md`
/// §6's `scaleNoise.*` options).
#[derive(Debug, Clone, serde::Deserialize)]
pub struct NoiseScaleParams {
    pub mode: NoiseMode,
    pub statistic: Statistic,
    pub flux_range: FluxRange,
    pub window_spatial: usize,
    pub window_spectral: usize,
    pub grid_spatial: usize,
    pub grid_spectral: usize,
    pub interpolate: bool,
}

/// Samples the noise statistic over every finite value of `data` (already
/// gathered into a flat scratch buffer), honouring `flux_range`. Shared by
/// the global and local modes and by the S+C finder's own noise estimation
/// (the statistic choice is orthogonal to the stride/windowing scheme around
/// it).
pub(crate) fn estimate_statistic(values: &mut [f64], statistic: Statistic, flux_range: FluxRange) -> f64 {
    match statistic {
        Statistic::Std => kernels::stddev_about(values, 0.0, 1, flux_range),
        Statistic::Mad => {
            let mut filtered: Vec<f64> = match flux_range {
                FluxRange::Full => values.iter().copied().filter(|v| v.is_finite()).collect(),
                FluxRange::Negative => values.iter().copied().filter(|v| v.is_finite() && *v <= 0.0).collect(),
                FluxRange::Positive => values.iter().copied().filter(|v| v.is_finite() && *v >= 0.0).collect(),
            };
            // MAD is a robust scale estimate; the conventional 1.4826 factor
            // makes it consistent with the standard deviation of a Gaussian.
            kernels::mad_about(&mut filtered, 0.0) * 1.4826
        }
        Statistic::Gauss => gaussian_fit_sigma(values, flux_range),
    }
}

/// Noise estimate via a crude Gaussian fit to the value histogram: the
/// robust MAD estimate seeded from the same flux range, refined by one pass
/// of trimmed standard deviation within `3*sigma_mad` of zero. Approximates
/// a proper histogram fit without pulling in a nonlinear least-squares
/// dependency for one noise statistic among three.
fn gaussian_fit_sigma(values: &mut [f64], flux_range: FluxRange) -> f64 {
    let mut seed: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let sigma_mad = kernels::mad_about(&mut seed, 0.0) * 1.4826;
    if !sigma_mad.is_finite() || sigma_mad <= 0.0 {
        return sigma_mad;
    }
    let clip = 3.0 * sigma_mad;
    let trimmed: Vec<f64> = values
        .iter()
        .copied()
        .filter(|v| v.is_finite() && v.abs() <= clip)
        .collect();
    if trimmed.is_empty() {
        return sigma_mad;
    }
    kernels::stddev_about(&trimmed, 0.0, 1, flux_range)
}

/// Divides `cube` by a single noise value estimated over the whole cube.
fn scale_global(cube: &mut DataCube, statistic: Statistic, flux_range: FluxRange) -> Result<()> {
    let stride = sampling_stride(cube.axis_size());
    let mut sample = sample_strided(cube, stride)?;
    let sigma = estimate_statistic(&mut sample, statistic, flux_range);
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(Error::user_input("global noise estimate is zero or non-finite"));
    }
    debug!(sigma, "scaleNoise: global");
    divide_in_place(cube, |_, _, _| sigma)
}

pub(crate) fn sampling_stride(axis_size: [i64; 4]) -> usize {
    let voxels = (axis_size[0] * axis_size[1] * axis_size[2]) as f64;
    (voxels / 1_000_000.0).cbrt().floor().max(1.0) as usize
}

fn sample_strided(cube: &DataCube, stride: usize) -> Result<Vec<f64>> {
    gather_strided(cube, stride)
}

/// Gathers every `stride`-th voxel of `cube` (in flat x-fastest order) into a
/// flat sample buffer. Shared by the noise-scaling stage's own global sample
/// and the S+C finder's per-kernel noise re-estimate, which sample the same
/// way at a different cadence.
pub(crate) fn gather_strided(cube: &DataCube, stride: usize) -> Result<Vec<f64>> {
    let [nx, ny, nz, _] = cube.axis_size();
    let mut out = Vec::new();
    let mut i = 0i64;
    let total = nx * ny * nz;
    while i < total {
        let x = i % nx;
        let y = (i / nx) % ny;
        let z = i / (nx * ny);
        out.push(cube.get_flt(x, y, z)?);
        i += stride as i64;
    }
    Ok(out)
}

fn divide_in_place(cube: &mut DataCube, sigma_at: impl Fn(i64, i64, i64) -> f64) -> Result<()> {
    let [nx, ny, nz, _] = cube.axis_size();
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                let v = cube.get_flt(x, y, z)?;
                if v.is_finite() {
                    let sigma = sigma_at(x, y, z);
                    cube.set_flt(x, y, z, v / sigma)?;
                }
            }
        }
    }
    Ok(())
}

/// Axis positions (in voxel coordinates) of the coarse noise-sampling grid
/// along one axis: spaced `step` pixels apart, always including the final
/// voxel so the grid spans the full extent.
fn grid_positions(extent: i64, step: usize) -> Vec<i64> {
    let step = step.max(1) as i64;
    let mut pos: Vec<i64> = (0..extent).step_by(step as usize).collect();
    if *pos.last().unwrap_or(&-1) != extent - 1 {
        pos.push(extent - 1);
    }
    pos
}

fn scale_local(
    cube: &mut DataCube,
    statistic: Statistic,
    flux_range: FluxRange,
    window_spatial: usize,
    window_spectral: usize,
    grid_spatial: usize,
    grid_spectral: usize,
    interpolate: bool,
) -> Result<()> {
    let [nx, ny, nz, _] = cube.axis_size();
    let gx = grid_positions(nx, grid_spatial);
    let gy = grid_positions(ny, grid_spatial);
    let gz = grid_positions(nz, grid_spectral);

    let half_xy = (window_spatial / 2) as i64;
    let half_z = (window_spectral / 2) as i64;

    let mut grid = Array3::<f64>::from_elem((gx.len(), gy.len(), gz.len()), f64::NAN);
    for (iz, &cz) in gz.iter().enumerate() {
        for (iy, &cy) in gy.iter().enumerate() {
            for (ix, &cx) in gx.iter().enumerate() {
                let xlo = (cx - half_xy).max(0);
                let xhi = (cx + half_xy).min(nx - 1);
                let ylo = (cy - half_xy).max(0);
                let yhi = (cy + half_xy).min(ny - 1);
                let zlo = (cz - half_z).max(0);
                let zhi = (cz + half_z).min(nz - 1);

                let mut sample = Vec::new();
                for z in zlo..=zhi {
                    for y in ylo..=yhi {
                        for x in xlo..=xhi {
                            sample.push(cube.get_flt(x, y, z)?);
                        }
                    }
                }
                let sigma = estimate_statistic(&mut sample, statistic, flux_range);
                grid[[ix, iy, iz]] = if sigma.is_finite() && sigma > 0.0 { sigma } else { f64::NAN };
            }
        }
    }

    fill_degenerate_boxes(&mut grid)?;
    debug!(grid_shape = ?grid.dim(), "scaleNoise: local grid computed");

    if interpolate {
        let full = trilinear_resample(&grid, &gx, &gy, &gz, nx, ny, nz);
        divide_in_place(cube, |x, y, z| full[[x as usize, y as usize, z as usize]])
    } else {
        divide_in_place(cube, |x, y, z| {
            let ix = nearest_index(&gx, x);
            let iy = nearest_index(&gy, y);
            let iz = nearest_index(&gz, z);
            grid[[ix, iy, iz]]
        })
    }
}

/// Replaces any `NaN` grid box with the value of the nearest non-`NaN` box
/// (Chebyshev distance over grid indices). Errors if every box is
/// degenerate.
fn fill_degenerate_boxes(grid: &mut Array3<f64>) -> Result<()> {
    let (nx, ny, nz) = grid.dim();
    if grid.iter().all(|v| !v.is_finite()) {
        return Err(Error::user_input("every local noise-scaling box is degenerate"));
    }

    let good: Vec<(usize, usize, usize, f64)> = grid
        .indexed_iter()
        .filter(|(_, v)| v.is_finite())
        .map(|((x, y, z), v)| (x, y, z, *v))
        .collect();

    for ix in 0..nx {
        for iy in 0..ny {
            for iz in 0..nz {
                if grid[[ix, iy, iz]].is_finite() {
                    continue;
                }
                let nearest = good
                    .iter()
                    .min_by_key(|(gx, gy, gz, _)| {
                        (*gx as i64 - ix as i64).abs() + (*gy as i64 - iy as i64).abs() + (*gz as i64 - iz as i64).abs()
                    })
                    .expect("at least one finite box exists");
                grid[[ix, iy, iz]] = nearest.3;
            }
        }
    }
    Ok(())
}

fn nearest_index(positions: &[i64], query: i64) -> usize {
    positions
        .iter()
        .enumerate()
        .min_by_key(|(_, &p)| (p - query).abs())
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Linear interpolation of `values` (sampled at ascending `positions`) at
/// `query`, clamped to the grid's own range at the edges.
fn lerp_1d(positions: &[i64], values: &[f64], query: i64) -> f64 {
    if positions.len() == 1 {
        return values[0];
    }
    if query <= positions[0] {
        return values[0];
    }
    if query >= *positions.last().unwrap() {
        return values[values.len() - 1];
    }
    let hi = positions.iter().position(|&p| p >= query).unwrap();
    let lo = hi - 1;
    if positions[hi] == positions[lo] {
        return values[lo];
    }
    let t = (query - positions[lo]) as f64 / (positions[hi] - positions[lo]) as f64;
    values[lo] * (1.0 - t) + values[hi] * t
}

/// Resamples `grid` (defined at the cross-product of `gx`/`gy`/`gz`) to
/// every voxel of an `nx * ny * nz` cube via three chained linear passes —
/// trilinear interpolation is exactly that composition.
fn trilinear_resample(
    grid: &Array3<f64>,
    gx: &[i64],
    gy: &[i64],
    gz: &[i64],
    nx: i64,
    ny: i64,
    nz: i64,
) -> Array3<f64> {
    // Pass 1: interpolate along z, keep grid resolution in x/y.
    let mut stage1 = Array3::<f64>::zeros((gx.len(), gy.len(), nz as usize));
    for ix in 0..gx.len() {
        for iy in 0..gy.len() {
            let column: Vec<f64> = (0..gz.len()).map(|iz| grid[[ix, iy, iz]]).collect();
            for z in 0..nz {
                stage1[[ix, iy, z as usize]] = lerp_1d(gz, &column, z);
            }
        }
    }

    // Pass 2: interpolate along y, keep grid resolution in x.
    let mut stage2 = Array3::<f64>::zeros((gx.len(), ny as usize, nz as usize));
    for ix in 0..gx.len() {
        for z in 0..nz as usize {
            let column: Vec<f64> = (0..gy.len()).map(|iy| stage1[[ix, iy, z]]).collect();
            for y in 0..ny {
                stage2[[ix, y as usize, z]] = lerp_1d(gy, &column, y);
            }
        }
    }

    // Pass 3: interpolate along x, reaching full resolution.
    let mut full = Array3::<f64>::zeros((nx as usize, ny as usize, nz as usize));
    for y in 0..ny as usize {
        for z in 0..nz as usize {
            let column: Vec<f64> = (0..gx.len()).map(|ix| stage2[[ix, y, z]]).collect();
            for x in 0..nx {
                full[[x as usize, y, z]] = lerp_1d(gx, &column, x);
            }
        }
    }
    full
}

/// Runs the `scaleNoise` stage over `cube` in place (component K). When
/// `params` is `None`, the cube passes through unchanged (the §4.E input
/// `C` referred to in the S+C finder).
pub fn scale_noise(cube: &mut DataCube, params: Option<&NoiseScaleParams>) -> Result<()> {
    let Some(params) = params else {
        return Ok(());
    };
    match params.mode {
        NoiseMode::Global => scale_global(cube, params.statistic, params.flux_range),
        NoiseMode::Local => scale_local(
            cube,
            params.statistic,
            params.flux_range,
            params.window_spatial,
            params.window_spectral,
            params.grid_spatial,
            params.grid_spectral,
            params.interpolate,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_cube(nx: i64, ny: i64, nz: i64, value: f64) -> DataCube {
        let mut c = DataCube::zeros(-64, nx, ny, nz).unwrap();
        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    c.set_flt(x, y, z, value).unwrap();
                }
            }
        }
        c
    }

    #[test]
    fn global_scale_normalizes_constant_cube() {
        // A perfectly flat cube has zero dispersion; seed a tiny bit of
        // spread so the noise estimate is well-defined.
        let mut cube = DataCube::zeros(-64, 4, 4, 4).unwrap();
        let mut i = 0i64;
        for z in 0..4 {
            for y in 0..4 {
                for x in 0..4 {
                    let v = if i % 2 == 0 { -2.0 } else { 2.0 };
                    cube.set_flt(x, y, z, v).unwrap();
                    i += 1;
                }
            }
        }
        let params = NoiseScaleParams {
            mode: NoiseMode::Global,
            statistic: Statistic::Std,
            flux_range: FluxRange::Negative,
            window_spatial: 0,
            window_spectral: 0,
            grid_spatial: 0,
            grid_spectral: 0,
            interpolate: false,
        };
        scale_noise(&mut cube, Some(&params)).unwrap();
        assert!((cube.get_flt(0, 0, 0).unwrap().abs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn global_scale_rejects_degenerate_noise() {
        let mut cube = flat_cube(3, 3, 3, 5.0);
        let params = NoiseScaleParams {
            mode: NoiseMode::Global,
            statistic: Statistic::Std,
            flux_range: FluxRange::Negative,
            window_spatial: 0,
            window_spectral: 0,
            grid_spatial: 0,
            grid_spectral: 0,
            interpolate: false,
        };
        assert!(scale_noise(&mut cube, Some(&params)).is_err());
    }

    #[test]
    fn grid_positions_always_covers_last_index() {
        let pos = grid_positions(10, 3);
        assert_eq!(*pos.last().unwrap(), 9);
        assert_eq!(pos[0], 0);
    }

    #[test]
    fn lerp_1d_interpolates_between_two_points() {
        let positions = [0i64, 10];
        let values = [0.0, 100.0];
        assert!((lerp_1d(&positions, &values, 5) - 50.0).abs() < 1e-9);
        assert_eq!(lerp_1d(&positions, &values, -5), 0.0);
        assert_eq!(lerp_1d(&positions, &values, 50), 100.0);
    }

    #[test]
    fn no_params_passes_through_unchanged() {
        let mut cube = flat_cube(2, 2, 2, 7.0);
        scale_noise(&mut cube, None).unwrap();
        assert_eq!(cube.get_flt(0, 0, 0).unwrap(), 7.0);
    }
}
