//! Wires the core components together: load, optional weights division,
//! optional noise scaling, Smooth + Clip, then linking — the dataflow line
//! from `spec.md` §2.

use tracing::info;

use crate::cube::DataCube;
use crate::error::Result;
use crate::linker;
use crate::linkerpar::LinkerPar;
use crate::noise;
use crate::params::Params;
use crate::scfind;

/// One surviving, size-filtered source after linking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Source {
    pub label: u32,
    pub bbox: [u16; 6],
    pub n_pixels: u32,
}

/// The full set of surviving sources from one pipeline run, in ascending
/// label order.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub sources: Vec<Source>,
}

impl Catalog {
    fn from_table(table: &LinkerPar) -> Result<Catalog> {
        let mut sources = Vec::new();
        for label in 1..table.len() as u32 {
            sources.push(Source {
                label,
                bbox: table.get_bbox(label)?,
                n_pixels: table.get_n(label)?,
            });
        }
        Ok(Catalog { sources })
    }
}

/// Runs the full pipeline described by `params`, returning the labelled mask
/// cube and the catalog of surviving sources.
pub fn run(params: &Params) -> Result<(DataCube, Catalog)> {
    params.validate()?;

    let region = params.region()?;
    let mut cube = DataCube::load(&params.input_path, region)?;
    info!(path = %params.input_path, axis_size = ?cube.axis_size(), "pipeline: cube loaded");

    if let Some(weights_path) = &params.weights_path {
        let weights = DataCube::load(weights_path, params.region()?)?;
        cube = cube.divide_by_weights(&weights)?;
        info!(path = %weights_path, "pipeline: divided by weights");
    }

    noise::scale_noise(&mut cube, params.noise.as_ref())?;
    if params.noise.is_some() {
        info!("pipeline: noise scaling applied");
    }

    let scfind_params = params.scfind.parse()?;
    let mut mask = scfind::run_scfind(&cube, &scfind_params)?;
    info!("pipeline: smooth+clip detection complete");

    let table = linker::run_linker(&mut mask, &params.linker)?;
    let catalog = Catalog::from_table(&table)?;
    info!(sources = catalog.sources.len(), "pipeline: linking complete");

    Ok((mask, catalog))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::FluxRange;
    use crate::linker::LinkerParams;
    use crate::noise::Statistic;
    use crate::params::ScfindConfig;

    fn write_test_cube(path: &str) {
        let mut cube = DataCube::zeros(-32, 8, 8, 8).unwrap();
        for z in 0..8 {
            for y in 0..8 {
                for x in 0..8 {
                    let v = if (x, y, z) == (4, 4, 4) { 50.0 } else { ((x * 3 + y * 5 + z) % 4) as f64 - 1.5 };
                    cube.set_flt(x, y, z, v).unwrap();
                }
            }
        }
        cube.save(path, true).unwrap();
    }

    #[test]
    fn end_to_end_single_blob_is_recovered() {
        let path = std::env::temp_dir()
            .join(format!("cubefind-pipeline-test-{}.fits", std::process::id()))
            .to_string_lossy()
            .into_owned();
        write_test_cube(&path);

        let params = Params {
            input_path: path.clone(),
            weights_path: None,
            output_path: format!("{path}.out"),
            overwrite: true,
            region: None,
            noise: None,
            scfind: ScfindConfig {
                kernels_xy: "0.0".into(),
                kernels_z: "0".into(),
                threshold: 3.0,
                replacement: 0.0,
                statistic: Statistic::Mad,
                flux_range: FluxRange::Negative,
            },
            linker: LinkerParams::default(),
        };

        let (mask, catalog) = run(&params).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(mask.get_int(4, 4, 4).unwrap(), 1);
        assert_eq!(catalog.sources.len(), 1);
        assert_eq!(catalog.sources[0].bbox, [4, 4, 4, 4, 4, 4]);
    }
}
