//! The linker's append-only parameter table: one row per provisional label,
//! tracking pixel count, bounding box and the eventual remapped final label.

use crate::error::{Error, Result};

const INITIAL_CAPACITY: usize = 1024;

/// Per-label accumulator. Indices 0 and 1 are reserved sentinel rows
/// (background and "candidate pixel" respectively, mirroring the mask
/// values they correspond to); real provisional labels start at 2.
#[derive(Debug, Clone)]
pub struct LinkerPar {
    n: Vec<u32>,
    bbox: Vec<[u16; 6]>,
    label: Vec<u32>,
}

impl Default for LinkerPar {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkerPar {
    pub fn new() -> Self {
        let mut n = Vec::with_capacity(INITIAL_CAPACITY);
        let mut bbox = Vec::with_capacity(INITIAL_CAPACITY);
        let mut label = Vec::with_capacity(INITIAL_CAPACITY);
        // Sentinel rows for labels 0 (background) and 1 (candidate).
        n.extend([0, 0]);
        bbox.extend([[0u16; 6], [0u16; 6]]);
        label.extend([0, 0]);
        LinkerPar { n, bbox, label }
    }

    /// Appends a new row for a freshly-assigned provisional label, returning
    /// that label.
    pub fn push(&mut self, x: u16, y: u16, z: u16) -> u32 {
        self.n.push(1);
        self.bbox.push([x, x, y, y, z, z]);
        self.label.push(0);
        (self.n.len() - 1) as u32
    }

    /// Records another pixel visit for an existing provisional label.
    pub fn update(&mut self, label: u32, x: u16, y: u16, z: u16) -> Result<()> {
        let idx = self.row(label)?;
        self.n[idx] += 1;
        let b = &mut self.bbox[idx];
        b[0] = b[0].min(x);
        b[1] = b[1].max(x);
        b[2] = b[2].min(y);
        b[3] = b[3].max(y);
        b[4] = b[4].min(z);
        b[5] = b[5].max(z);
        Ok(())
    }

    fn row(&self, label: u32) -> Result<usize> {
        let idx = label as usize;
        if idx >= self.n.len() {
            return Err(Error::index_range(format!("linker label {label} out of range")));
        }
        Ok(idx)
    }

    pub fn get_n(&self, label: u32) -> Result<u32> {
        Ok(self.n[self.row(label)?])
    }

    pub fn get_bbox(&self, label: u32) -> Result<[u16; 6]> {
        Ok(self.bbox[self.row(label)?])
    }

    /// `axis`: 0 = x, 1 = y, 2 = z.
    pub fn get_size(&self, label: u32, axis: usize) -> Result<u32> {
        let idx = self.row(label)?;
        let b = &self.bbox[idx];
        match axis {
            0 => Ok((b[1] - b[0]) as u32 + 1),
            1 => Ok((b[3] - b[2]) as u32 + 1),
            2 => Ok((b[5] - b[4]) as u32 + 1),
            _ => Err(Error::user_input(format!("invalid axis index {axis}"))),
        }
    }

    pub fn set_label(&mut self, label: u32, value: u32) -> Result<()> {
        let idx = self.row(label)?;
        self.label[idx] = value;
        Ok(())
    }

    pub fn get_label(&self, label: u32) -> Result<u32> {
        Ok(self.label[self.row(label)?])
    }

    /// Number of rows, including the two sentinels.
    pub fn len(&self) -> usize {
        self.n.len()
    }

    pub fn is_empty(&self) -> bool {
        self.n.len() <= 2
    }

    /// Discards every row whose final label is still 0 and reorders the
    /// survivors into ascending final-label order. After this call, row
    /// index == final label for every surviving source (index 0 stays a
    /// background sentinel).
    pub fn reduce(&mut self) {
        let mut rows: Vec<(u32, u32, [u16; 6])> = Vec::new();
        for idx in 2..self.n.len() {
            let final_label = self.label[idx];
            if final_label != 0 {
                rows.push((final_label, self.n[idx], self.bbox[idx]));
            }
        }
        rows.sort_by_key(|r| r.0);

        let mut n = vec![0u32];
        let mut bbox = vec![[0u16; 6]];
        let mut label = vec![0u32];
        for (final_label, count, bb) in rows {
            n.push(count);
            bbox.push(bb);
            label.push(final_label);
        }
        self.n = n;
        self.bbox = bbox;
        self.label = label;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_update_widens_bbox() {
        let mut t = LinkerPar::new();
        let l = t.push(5, 5, 5);
        assert_eq!(l, 2);
        t.update(l, 6, 4, 7).unwrap();
        assert_eq!(t.get_bbox(l).unwrap(), [5, 6, 4, 5, 5, 7]);
        assert_eq!(t.get_n(l).unwrap(), 2);
    }

    #[test]
    fn get_size_matches_bbox_extent() {
        let mut t = LinkerPar::new();
        let l = t.push(1, 1, 1);
        t.update(l, 4, 1, 1).unwrap();
        assert_eq!(t.get_size(l, 0).unwrap(), 4);
        assert_eq!(t.get_size(l, 1).unwrap(), 1);
    }

    #[test]
    fn reduce_drops_unlabeled_and_reorders() {
        let mut t = LinkerPar::new();
        let a = t.push(0, 0, 0);
        let b = t.push(1, 1, 1);
        let c = t.push(2, 2, 2);
        t.set_label(a, 0).unwrap(); // filtered out
        t.set_label(b, 2).unwrap();
        t.set_label(c, 1).unwrap();
        t.reduce();

        assert_eq!(t.get_label(1).unwrap(), 1);
        assert_eq!(t.get_bbox(1).unwrap(), [2, 2, 2, 2, 2, 2]);
        assert_eq!(t.get_label(2).unwrap(), 2);
        assert_eq!(t.get_bbox(2).unwrap(), [1, 1, 1, 1, 1, 1]);
    }

    #[test]
    fn out_of_range_label_errors() {
        let t = LinkerPar::new();
        assert!(t.get_n(99).is_err());
    }
}
