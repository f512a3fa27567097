//! The `DataCube`: a typed n-dimensional numeric array with header metadata,
//! region sub-loading, endian-aware binary I/O and uniform floating-point
//! access over the six supported on-disk numeric widths.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use num_traits::Float;

use crate::error::{Error, Result};
use crate::header::{Header, BLOCK_LEN, RECORD_LEN};
use crate::kernels;
use crate::region::Region;

/// The cube's payload, tagged by on-disk numeric type. Reads widen to
/// `f64`/narrow from it via plain `as` casts (C-style truncate/round),
/// matching the reference's dynamic `BITPIX` dispatch without giving up
/// static typing for the hot filter loops.
#[derive(Debug, Clone)]
pub enum Payload {
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl Payload {
    fn bitpix(&self) -> i64 {
        match self {
            Payload::I8(_) => 8,
            Payload::I16(_) => 16,
            Payload::I32(_) => 32,
            Payload::I64(_) => 64,
            Payload::F32(_) => -32,
            Payload::F64(_) => -64,
        }
    }

    fn word_size(&self) -> usize {
        (self.bitpix().unsigned_abs() / 8) as usize
    }

    fn len(&self) -> usize {
        match self {
            Payload::I8(v) => v.len(),
            Payload::I16(v) => v.len(),
            Payload::I32(v) => v.len(),
            Payload::I64(v) => v.len(),
            Payload::F32(v) => v.len(),
            Payload::F64(v) => v.len(),
        }
    }

    fn get_flt(&self, i: usize) -> f64 {
        match self {
            Payload::I8(v) => v[i] as f64,
            Payload::I16(v) => v[i] as f64,
            Payload::I32(v) => v[i] as f64,
            Payload::I64(v) => v[i] as f64,
            Payload::F32(v) => v[i] as f64,
            Payload::F64(v) => v[i],
        }
    }

    fn get_int(&self, i: usize) -> i64 {
        match self {
            Payload::I8(v) => v[i] as i64,
            Payload::I16(v) => v[i] as i64,
            Payload::I32(v) => v[i] as i64,
            Payload::I64(v) => v[i],
            Payload::F32(v) => v[i] as i64,
            Payload::F64(v) => v[i] as i64,
        }
    }

    fn set_flt(&mut self, i: usize, value: f64) {
        match self {
            Payload::I8(v) => v[i] = value as i8,
            Payload::I16(v) => v[i] = value as i16,
            Payload::I32(v) => v[i] = value as i32,
            Payload::I64(v) => v[i] = value as i64,
            Payload::F32(v) => v[i] = value as f32,
            Payload::F64(v) => v[i] = value,
        }
    }

    fn set_int(&mut self, i: usize, value: i64) {
        match self {
            Payload::I8(v) => v[i] = value as i8,
            Payload::I16(v) => v[i] = value as i16,
            Payload::I32(v) => v[i] = value as i32,
            Payload::I64(v) => v[i] = value,
            Payload::F32(v) => v[i] = value as f32,
            Payload::F64(v) => v[i] = value as f64,
        }
    }

    fn from_be_bytes(bitpix: i64, bytes: &[u8]) -> Result<Payload> {
        Ok(match bitpix {
            8 => Payload::I8(bytes.iter().map(|&b| b as i8).collect()),
            16 => Payload::I16(
                bytes
                    .chunks_exact(2)
                    .map(|c| i16::from_be_bytes([c[0], c[1]]))
                    .collect(),
            ),
            32 => Payload::I32(
                bytes
                    .chunks_exact(4)
                    .map(|c| i32::from_be_bytes(c.try_into().unwrap()))
                    .collect(),
            ),
            64 => Payload::I64(
                bytes
                    .chunks_exact(8)
                    .map(|c| i64::from_be_bytes(c.try_into().unwrap()))
                    .collect(),
            ),
            -32 => Payload::F32(
                bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_be_bytes(c.try_into().unwrap()))
                    .collect(),
            ),
            -64 => Payload::F64(
                bytes
                    .chunks_exact(8)
                    .map(|c| f64::from_be_bytes(c.try_into().unwrap()))
                    .collect(),
            ),
            _ => return Err(Error::format(format!("unsupported BITPIX {bitpix}"))),
        })
    }

    fn to_be_bytes(&self) -> Vec<u8> {
        match self {
            Payload::I8(v) => v.iter().map(|&x| x as u8).collect(),
            Payload::I16(v) => v.iter().flat_map(|x| x.to_be_bytes()).collect(),
            Payload::I32(v) => v.iter().flat_map(|x| x.to_be_bytes()).collect(),
            Payload::I64(v) => v.iter().flat_map(|x| x.to_be_bytes()).collect(),
            Payload::F32(v) => v.iter().flat_map(|x| x.to_be_bytes()).collect(),
            Payload::F64(v) => v.iter().flat_map(|x| x.to_be_bytes()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DataCube {
    header: Header,
    payload: Payload,
    dimension: u8,
    axis_size: [i64; 4],
}

const WCS_KEYWORDS_COPIED: &[&str] = &[
    "CTYPE1", "CTYPE2", "CTYPE3", "CRVAL1", "CRVAL2", "CRVAL3", "CRPIX1", "CRPIX2", "CRPIX3",
    "CDELT1", "CDELT2", "CDELT3", "EPOCH",
];

fn dimension_for(nx: i64, ny: i64, nz: i64) -> u8 {
    if nz > 1 {
        3
    } else if ny > 1 {
        2
    } else {
        1
    }
}

impl DataCube {
    /// A fresh all-zero cube of the given on-disk numeric type.
    pub fn zeros(bitpix: i64, nx: i64, ny: i64, nz: i64) -> Result<DataCube> {
        if nx < 1 || ny < 1 || nz < 1 {
            return Err(Error::user_input("axis sizes must be positive"));
        }
        let dimension = dimension_for(nx, ny, nz);
        let axis_sizes: Vec<i64> = match dimension {
            1 => vec![nx],
            2 => vec![nx, ny],
            _ => vec![nx, ny, nz],
        };
        let header = Header::new_minimal(bitpix, &axis_sizes)?;
        let count = (nx * ny * nz) as usize;
        let payload = match bitpix {
            8 => Payload::I8(vec![0; count]),
            16 => Payload::I16(vec![0; count]),
            32 => Payload::I32(vec![0; count]),
            64 => Payload::I64(vec![0; count]),
            -32 => Payload::F32(vec![0.0; count]),
            -64 => Payload::F64(vec![0.0; count]),
            _ => return Err(Error::user_input(format!("unsupported BITPIX {bitpix}"))),
        };
        Ok(DataCube { header, payload, dimension, axis_size: [nx, ny, nz, 1] })
    }

    pub fn dimension(&self) -> u8 {
        self.dimension
    }

    pub fn axis_size(&self) -> [i64; 4] {
        self.axis_size
    }

    pub fn word_size(&self) -> usize {
        self.payload.word_size()
    }

    pub fn copy(&self) -> DataCube {
        self.clone()
    }

    fn nx(&self) -> usize {
        self.axis_size[0] as usize
    }
    fn ny(&self) -> usize {
        self.axis_size[1] as usize
    }
    fn nz(&self) -> usize {
        self.axis_size[2] as usize
    }

    fn check_bounds(&self, x: i64, y: i64, z: i64) -> Result<()> {
        if x < 0 || x >= self.axis_size[0] || y < 0 || y >= self.axis_size[1] || z < 0 || z >= self.axis_size[2] {
            return Err(Error::index_range(format!(
                "coordinate ({x},{y},{z}) out of bounds for cube {:?}",
                &self.axis_size[0..3]
            )));
        }
        Ok(())
    }

    fn idx(&self, x: i64, y: i64, z: i64) -> Result<usize> {
        self.check_bounds(x, y, z)?;
        Ok((x + self.axis_size[0] * (y + self.axis_size[1] * z)) as usize)
    }

    pub fn get_flt(&self, x: i64, y: i64, z: i64) -> Result<f64> {
        Ok(self.payload.get_flt(self.idx(x, y, z)?))
    }

    pub fn get_int(&self, x: i64, y: i64, z: i64) -> Result<i64> {
        Ok(self.payload.get_int(self.idx(x, y, z)?))
    }

    pub fn set_flt(&mut self, x: i64, y: i64, z: i64, value: f64) -> Result<()> {
        let i = self.idx(x, y, z)?;
        self.payload.set_flt(i, value);
        Ok(())
    }

    pub fn set_int(&mut self, x: i64, y: i64, z: i64, value: i64) -> Result<()> {
        let i = self.idx(x, y, z)?;
        self.payload.set_int(i, value);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.len() == 0
    }

    pub fn as_f32(&self) -> Result<&[f32]> {
        match &self.payload {
            Payload::F32(v) => Ok(v),
            _ => Err(Error::user_input("cube is not f32")),
        }
    }

    pub fn as_f32_mut(&mut self) -> Result<&mut [f32]> {
        match &mut self.payload {
            Payload::F32(v) => Ok(v),
            _ => Err(Error::user_input("cube is not f32")),
        }
    }

    pub fn as_f64(&self) -> Result<&[f64]> {
        match &self.payload {
            Payload::F64(v) => Ok(v),
            _ => Err(Error::user_input("cube is not f64")),
        }
    }

    pub fn as_f64_mut(&mut self) -> Result<&mut [f64]> {
        match &mut self.payload {
            Payload::F64(v) => Ok(v),
            _ => Err(Error::user_input("cube is not f64")),
        }
    }

    pub fn as_i32(&self) -> Result<&[i32]> {
        match &self.payload {
            Payload::I32(v) => Ok(v),
            _ => Err(Error::user_input("cube is not a 32-bit integer mask")),
        }
    }

    pub fn as_i32_mut(&mut self) -> Result<&mut [i32]> {
        match &mut self.payload {
            Payload::I32(v) => Ok(v),
            _ => Err(Error::user_input("cube is not a 32-bit integer mask")),
        }
    }

    // -- Header delegates (component B) --------------------------------

    pub fn check(&self, key: &str) -> usize {
        self.header.check(key)
    }
    pub fn get_int_hdr(&self, key: &str) -> i64 {
        self.header.get_int(key)
    }
    pub fn get_flt_hdr(&self, key: &str) -> f64 {
        self.header.get_flt(key)
    }
    pub fn get_bool_hdr(&self, key: &str) -> bool {
        self.header.get_bool(key)
    }
    pub fn get_str_hdr(&self, key: &str) -> Result<String> {
        self.header.get_str(key)
    }
    pub fn put_int_hdr(&mut self, key: &str, value: i64) -> Result<bool> {
        self.header.put_int(key, value)
    }
    pub fn put_flt_hdr(&mut self, key: &str, value: f64) -> Result<bool> {
        self.header.put_flt(key, value)
    }
    pub fn put_bool_hdr(&mut self, key: &str, value: bool) -> Result<bool> {
        self.header.put_bool(key, value)
    }
    pub fn put_str_hdr(&mut self, key: &str, value: &str) -> Result<bool> {
        self.header.put_str(key, value)
    }
    pub fn del_hdr(&mut self, key: &str) {
        self.header.del(key)
    }

    /// Copies the WCS-ish keywords the S+C finder's output mask inherits
    /// from its input cube.
    pub fn copy_wcs_headers_from(&mut self, src: &DataCube) -> Result<()> {
        for key in WCS_KEYWORDS_COPIED {
            if src.check(key) != 0 {
                if key.starts_with("CTYPE") {
                    let v = src.get_str_hdr(key)?;
                    self.put_str_hdr(key, &v)?;
                } else {
                    let v = src.get_flt_hdr(key);
                    self.put_flt_hdr(key, v)?;
                }
            }
        }
        Ok(())
    }

    // -- Filters (component A, applied over component C's payload) -----

    pub fn boxcar(&mut self, radius: usize) -> Result<()> {
        if radius == 0 {
            return Ok(());
        }
        let (nx, ny, nz) = (self.nx(), self.ny(), self.nz());
        match &mut self.payload {
            Payload::F32(v) => boxcar_along_z(v, nx, ny, nz, radius),
            Payload::F64(v) => boxcar_along_z(v, nx, ny, nz, radius),
            _ => return Err(Error::user_input("boxcar filter requires a floating-point cube")),
        }
        Ok(())
    }

    pub fn gaussian(&mut self, sigma: f64) -> Result<()> {
        if sigma <= 0.0 {
            return Ok(());
        }
        let (nx, ny, nz) = (self.nx(), self.ny(), self.nz());
        match &mut self.payload {
            Payload::F32(v) => gaussian_along_planes(v, nx, ny, nz, sigma),
            Payload::F64(v) => gaussian_along_planes(v, nx, ny, nz, sigma),
            _ => return Err(Error::user_input("gaussian filter requires a floating-point cube")),
        }
        Ok(())
    }

    /// `mask[i] = 1` whenever `|self[i]| > threshold`. Never clears an
    /// already-set bit, so repeated calls at decreasing thresholds
    /// accumulate an OR, and a single call is idempotent.
    pub fn mask(&self, mask_cube: &mut DataCube, threshold: f64) -> Result<()> {
        if mask_cube.axis_size != self.axis_size {
            return Err(Error::user_input("mask cube axis size does not match source cube"));
        }
        let mask_data = mask_cube.as_i32_mut()?;
        match &self.payload {
            Payload::F32(v) => {
                for (i, &x) in v.iter().enumerate() {
                    if (x as f64).abs() > threshold {
                        mask_data[i] = 1;
                    }
                }
            }
            Payload::F64(v) => {
                for (i, &x) in v.iter().enumerate() {
                    if x.abs() > threshold {
                        mask_data[i] = 1;
                    }
                }
            }
            _ => return Err(Error::user_input("mask source cube must be floating-point")),
        }
        Ok(())
    }

    /// `self[i] = copysign(value, self[i])` wherever `mask[i] != 0`.
    pub fn set_masked(&mut self, mask_cube: &DataCube, value: f64) -> Result<()> {
        if mask_cube.axis_size != self.axis_size {
            return Err(Error::user_input("mask cube axis size does not match source cube"));
        }
        let mask_data = mask_cube.as_i32()?;
        match &mut self.payload {
            Payload::F32(v) => {
                for (i, x) in v.iter_mut().enumerate() {
                    if mask_data[i] != 0 {
                        *x = (value as f32).copysign(*x);
                    }
                }
            }
            Payload::F64(v) => {
                for (i, x) in v.iter_mut().enumerate() {
                    if mask_data[i] != 0 {
                        *x = value.copysign(*x);
                    }
                }
            }
            _ => return Err(Error::user_input("set_masked requires a floating-point cube")),
        }
        Ok(())
    }

    /// A fresh cube with every finite-weight voxel divided by its weight;
    /// zero-or-negative-weight voxels become NaN rather than silently
    /// reading as zero flux.
    pub fn divide_by_weights(&self, weights: &DataCube) -> Result<DataCube> {
        if weights.axis_size != self.axis_size {
            return Err(Error::user_input("weights cube axis size does not match data cube"));
        }
        let mut out = self.clone();
        match (&mut out.payload, &weights.payload) {
            (Payload::F32(d), Payload::F32(w)) => {
                for i in 0..d.len() {
                    d[i] = if w[i] > 0.0 { d[i] / w[i] } else { f32::NAN };
                }
            }
            (Payload::F64(d), Payload::F64(w)) => {
                for i in 0..d.len() {
                    d[i] = if w[i] > 0.0 { d[i] / w[i] } else { f64::NAN };
                }
            }
            (Payload::F32(d), Payload::F64(w)) => {
                for i in 0..d.len() {
                    let wv = w[i];
                    d[i] = if wv > 0.0 { d[i] / (wv as f32) } else { f32::NAN };
                }
            }
            (Payload::F64(d), Payload::F32(w)) => {
                for i in 0..d.len() {
                    let wv = w[i] as f64;
                    d[i] = if wv > 0.0 { d[i] / wv } else { f64::NAN };
                }
            }
            _ => return Err(Error::user_input("weights division requires floating-point cubes")),
        }
        Ok(out)
    }

    // -- I/O --------------------------------------------------------------

    pub fn load(path: &str, region: Option<Region>) -> Result<DataCube> {
        let mut file = File::open(path).map_err(|e| Error::file_access(path, e))?;
        let header = read_header_blocks(&mut file, path)?;

        let bitpix = header.get_int("BITPIX");
        if !matches!(bitpix, 8 | 16 | 32 | 64 | -32 | -64) {
            return Err(Error::format(format!("unsupported BITPIX {bitpix}")));
        }

        let naxis = header.get_int("NAXIS");
        if !(1..=4).contains(&naxis) {
            return Err(Error::format(format!("unsupported NAXIS {naxis}")));
        }

        let mut full_axis = [1i64; 4];
        for (n, slot) in full_axis.iter_mut().enumerate().take(naxis as usize) {
            *slot = header.get_int(&format!("NAXIS{}", n + 1));
        }
        if naxis >= 4 && full_axis[3] > 1 {
            return Err(Error::format("NAXIS4 > 1 is not supported"));
        }

        if header.check("BSCALE") != 0 && (header.get_flt("BSCALE") - 1.0).abs() > 1e-12 {
            return Err(Error::format("non-trivial BSCALE is not supported"));
        }
        if header.check("BZERO") != 0 && header.get_flt("BZERO").abs() > 1e-12 {
            return Err(Error::format("non-trivial BZERO is not supported"));
        }

        let word_size = (bitpix.unsigned_abs() / 8) as usize;
        let dimension = dimension_for(full_axis[0], full_axis[1], full_axis[2]);
        let data_start = file.stream_position().map_err(|e| Error::file_access(path, e))?;

        let (axis_size, header, payload) = match region {
            Some(region) => {
                let region = region.clip([full_axis[0], full_axis[1], full_axis[2]]);
                let (nx, ny, nz) = (region.nx(), region.ny(), region.nz());
                let row_len = nx as usize * word_size;
                let mut raw = Vec::with_capacity((nx * ny * nz) as usize * word_size);

                for z in region.zmin..=region.zmax {
                    for y in region.ymin..=region.ymax {
                        let row_start_voxel = region.xmin + full_axis[0] * (y + full_axis[1] * z);
                        let byte_offset = data_start + row_start_voxel as u64 * word_size as u64;
                        file.seek(SeekFrom::Start(byte_offset)).map_err(|e| Error::file_access(path, e))?;
                        let mut row = vec![0u8; row_len];
                        file.read_exact(&mut row).map_err(|e| Error::file_access(path, e))?;
                        raw.extend_from_slice(&row);
                    }
                }

                let mut header = header;
                header.put_int("NAXIS1", nx)?;
                if dimension >= 2 {
                    header.put_int("NAXIS2", ny)?;
                }
                if dimension >= 3 {
                    header.put_int("NAXIS3", nz)?;
                }
                for (n, min) in [(1, region.xmin), (2, region.ymin), (3, region.zmin)] {
                    let key = format!("CRPIX{n}");
                    if header.check(&key) != 0 {
                        let old = header.get_flt(&key);
                        header.put_flt(&key, old - min as f64)?;
                    }
                }

                let payload = Payload::from_be_bytes(bitpix, &raw)?;
                ([nx, ny, nz, 1], header, payload)
            }
            None => {
                let total = (full_axis[0] * full_axis[1] * full_axis[2]) as usize;
                let mut raw = vec![0u8; total * word_size];
                file.read_exact(&mut raw).map_err(|e| Error::file_access(path, e))?;
                let payload = Payload::from_be_bytes(bitpix, &raw)?;
                (full_axis, header, payload)
            }
        };

        Ok(DataCube { header, payload, dimension, axis_size })
    }

    pub fn save(&self, path: &str, overwrite: bool) -> Result<()> {
        if !overwrite && std::path::Path::new(path).exists() {
            return Err(Error::file_access(
                path,
                std::io::Error::new(std::io::ErrorKind::AlreadyExists, "refusing to overwrite existing file"),
            ));
        }

        let mut file = File::create(path).map_err(|e| Error::file_access(path, e))?;
        file.write_all(self.header.as_bytes()).map_err(|e| Error::file_access(path, e))?;

        let raw = self.payload.to_be_bytes();
        file.write_all(&raw).map_err(|e| Error::file_access(path, e))?;

        let pad = (BLOCK_LEN - (raw.len() % BLOCK_LEN)) % BLOCK_LEN;
        if pad > 0 {
            file.write_all(&vec![0u8; pad]).map_err(|e| Error::file_access(path, e))?;
        }
        Ok(())
    }
}

fn read_header_blocks(file: &mut File, path: &str) -> Result<Header> {
    const MAX_BLOCKS: usize = 4096;
    let mut buf = Vec::with_capacity(BLOCK_LEN);
    let mut blocks = 0;

    loop {
        let mut block = vec![0u8; BLOCK_LEN];
        file.read_exact(&mut block).map_err(|e| Error::file_access(path, e))?;
        let has_end = block.chunks_exact(RECORD_LEN).any(|r| &r[..3] == b"END");
        buf.extend_from_slice(&block);
        blocks += 1;
        if has_end {
            break;
        }
        if blocks > MAX_BLOCKS {
            return Err(Error::format("header has no END record within a reasonable size"));
        }
    }

    Header::from_bytes(buf)
}

fn boxcar_along_z<T: Float>(data: &mut [T], nx: usize, ny: usize, nz: usize, radius: usize) {
    let mut spectrum = vec![T::zero(); nz];
    let mut filtered = vec![T::zero(); nz];
    let mut pad = vec![T::zero(); nz + 2 * radius];

    for y in 0..ny {
        for x in 0..nx {
            for (z, slot) in spectrum.iter_mut().enumerate() {
                *slot = data[x + nx * (y + ny * z)];
            }
            kernels::boxcar_1d(&spectrum, &mut filtered, &mut pad, radius);
            for (z, &v) in filtered.iter().enumerate() {
                data[x + nx * (y + ny * z)] = v;
            }
        }
    }
}

fn gaussian_along_planes<T: Float>(data: &mut [T], nx: usize, ny: usize, nz: usize, sigma: f64) {
    let plane_len = nx * ny;
    for z in 0..nz {
        let plane = &mut data[z * plane_len..(z + 1) * plane_len];
        kernels::gaussian_plane(plane, nx, ny, sigma);
    }
}
