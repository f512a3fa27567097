//! Configuration (component J): a `serde`-deserialisable mirror of `spec.md`
//! §6's enumerated pipeline options, with a `validate()` pass that turns
//! malformed values into `ERR_USER_INPUT` before the pipeline ever touches a
//! cube.
//!
//! The region bound and S+C kernel grids are carried as the same
//! comma-separated value-list text the parameter file itself uses (per
//! `spec.md` §4.G's Region/Array value container), and parsed through
//! [`crate::region::ValueList`] rather than typed JSON arrays — the same
//! parser serves both a six-integer region spec and a kernel-width list, as
//! specified.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::kernels::FluxRange;
use crate::linker::LinkerParams;
use crate::noise::{NoiseScaleParams, Statistic};
use crate::region::{Region, ValueList};
use crate::scfind::ScfindParams;

/// The S+C finder's configuration as carried in the parameter file: kernel
/// grids as comma-separated value-list text, parsed via [`ValueList`] into
/// [`ScfindParams`] by [`ScfindConfig::parse`].
#[derive(Debug, Clone, Deserialize)]
pub struct ScfindConfig {
    pub kernels_xy: String,
    pub kernels_z: String,
    pub threshold: f64,
    pub replacement: f64,
    pub statistic: Statistic,
    pub flux_range: FluxRange,
}

impl ScfindConfig {
    pub fn parse(&self) -> Result<ScfindParams> {
        let kernels_xy = ValueList::parse(&self.kernels_xy)?;
        let kernels_z = ValueList::parse(&self.kernels_z)?;
        Ok(ScfindParams {
            kernels_xy: (0..kernels_xy.size()).map(|i| kernels_xy.get_flt(i)).collect::<Result<Vec<_>>>()?,
            kernels_z: (0..kernels_z.size()).map(|i| kernels_z.get_int(i)).collect::<Result<Vec<_>>>()?,
            threshold: self.threshold,
            replacement: self.replacement,
            statistic: self.statistic,
            flux_range: self.flux_range,
        })
    }
}

/// Top-level configuration for one pipeline run. Deserialized directly from
/// the operator's JSON parameter file by the CLI binary; the file format
/// itself is external, per the Non-goals on parameter-file loading.
#[derive(Debug, Clone, Deserialize)]
pub struct Params {
    pub input_path: String,
    pub weights_path: Option<String>,
    pub output_path: String,
    #[serde(default)]
    pub overwrite: bool,
    /// `"xmin,xmax,ymin,ymax,zmin,zmax"`, inclusive. Loads the whole cube
    /// when absent.
    pub region: Option<String>,
    pub noise: Option<NoiseScaleParams>,
    pub scfind: ScfindConfig,
    #[serde(default)]
    pub linker: LinkerParams,
}

impl Params {
    /// Parses `self.region` into a [`Region`], if present.
    pub fn region(&self) -> Result<Option<Region>> {
        match &self.region {
            Some(s) => {
                let list = ValueList::parse(s)?;
                Ok(Some(Region::from_value_list(&list)?))
            }
            None => Ok(None),
        }
    }

    /// Rejects configurations that would otherwise surface as a confusing
    /// mid-pipeline panic or silent no-op: negative radii/thresholds,
    /// even-or-zero `Kz` widths (the boxcar half-width `k_z / 2` only has a
    /// well-defined centre pixel for an odd width), and an empty kernel grid.
    pub fn validate(&self) -> Result<()> {
        self.region()?;
        let scfind = self.scfind.parse()?;

        if scfind.threshold <= 0.0 {
            return Err(Error::user_input("scfind.threshold must be positive"));
        }
        if scfind.kernels_xy.is_empty() || scfind.kernels_z.is_empty() {
            return Err(Error::user_input("scfind kernel grid must not be empty"));
        }
        if scfind.kernels_xy.iter().any(|&k| k < 0.0) {
            return Err(Error::user_input("scfind.kernels_xy entries must be non-negative"));
        }
        for &k_z in &scfind.kernels_z {
            if k_z < 0 {
                return Err(Error::user_input("scfind.kernels_z entries must be non-negative"));
            }
            if k_z != 0 && k_z % 2 == 0 {
                return Err(Error::user_input("scfind.kernels_z entries must be 0 or odd"));
            }
        }

        if self.linker.radius_x < 0 || self.linker.radius_y < 0 || self.linker.radius_z < 0 {
            return Err(Error::user_input("linker radii must be non-negative"));
        }
        if self.linker.min_size_x < 1 || self.linker.min_size_y < 1 || self.linker.min_size_z < 1 {
            return Err(Error::user_input("linker minimum sizes must be at least 1"));
        }

        if let Some(noise) = &self.noise {
            if matches!(noise.mode, crate::noise::NoiseMode::Local)
                && (noise.window_spatial == 0 || noise.window_spectral == 0 || noise.grid_spatial == 0 || noise.grid_spectral == 0)
            {
                return Err(Error::user_input("local noise scaling requires non-zero window/grid sizes"));
            }
        }

        Ok(())
    }
}
