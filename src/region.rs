//! The `Region` sub-cube bound type and the generic comma-separated value
//! list used both for region specs and for the S+C kernel grids.

use crate::error::{Error, Result};

/// Axis-aligned sub-cube bounds, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub xmin: i64,
    pub xmax: i64,
    pub ymin: i64,
    pub ymax: i64,
    pub zmin: i64,
    pub zmax: i64,
}

impl Region {
    pub fn new(xmin: i64, xmax: i64, ymin: i64, ymax: i64, zmin: i64, zmax: i64) -> Result<Self> {
        if xmin > xmax || ymin > ymax || zmin > zmax {
            return Err(Error::user_input("region bounds must have min <= max on every axis"));
        }
        Ok(Region { xmin, xmax, ymin, ymax, zmin, zmax })
    }

    pub fn from_value_list(list: &ValueList) -> Result<Self> {
        if list.size() != 6 {
            return Err(Error::user_input("region spec must have exactly 6 integers"));
        }
        Region::new(
            list.get_int(0)?,
            list.get_int(1)?,
            list.get_int(2)?,
            list.get_int(3)?,
            list.get_int(4)?,
            list.get_int(5)?,
        )
    }

    /// Clips the region to `[0, axis_size-1]` on every axis.
    pub fn clip(&self, axis_size: [i64; 3]) -> Region {
        Region {
            xmin: self.xmin.clamp(0, axis_size[0] - 1),
            xmax: self.xmax.clamp(0, axis_size[0] - 1),
            ymin: self.ymin.clamp(0, axis_size[1] - 1),
            ymax: self.ymax.clamp(0, axis_size[1] - 1),
            zmin: self.zmin.clamp(0, axis_size[2] - 1),
            zmax: self.zmax.clamp(0, axis_size[2] - 1),
        }
    }

    pub fn nx(&self) -> i64 {
        self.xmax - self.xmin + 1
    }
    pub fn ny(&self) -> i64 {
        self.ymax - self.ymin + 1
    }
    pub fn nz(&self) -> i64 {
        self.zmax - self.zmin + 1
    }
}

/// A single element of a [`ValueList`]: either an integer or a float,
/// parsed from one comma-separated token.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int(i64),
    Flt(f64),
}

/// A fixed-size, typed list parsed from a comma-separated string. Used for
/// sub-cube region specs (six integers) and S+C kernel lists (a mix of
/// float FWHMs and integer boxcar widths across different lists).
#[derive(Debug, Clone)]
pub struct ValueList {
    items: Vec<Scalar>,
}

impl ValueList {
    pub fn parse(s: &str) -> Result<Self> {
        let items = s
            .split(',')
            .map(|tok| {
                let t = tok.trim();
                if let Ok(i) = t.parse::<i64>() {
                    Ok(Scalar::Int(i))
                } else if let Ok(f) = t.parse::<f64>() {
                    Ok(Scalar::Flt(f))
                } else {
                    Err(Error::user_input(format!("cannot parse value list token '{t}'")))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ValueList { items })
    }

    pub fn from_ints(values: impl IntoIterator<Item = i64>) -> Self {
        ValueList { items: values.into_iter().map(Scalar::Int).collect() }
    }

    pub fn from_flts(values: impl IntoIterator<Item = f64>) -> Self {
        ValueList { items: values.into_iter().map(Scalar::Flt).collect() }
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn get_int(&self, i: usize) -> Result<i64> {
        match self.items.get(i) {
            Some(Scalar::Int(v)) => Ok(*v),
            Some(Scalar::Flt(v)) => Ok(*v as i64),
            None => Err(Error::index_range(format!("value list index {i} out of range"))),
        }
    }

    pub fn get_flt(&self, i: usize) -> Result<f64> {
        match self.items.get(i) {
            Some(Scalar::Int(v)) => Ok(*v as f64),
            Some(Scalar::Flt(v)) => Ok(*v),
            None => Err(Error::index_range(format!("value list index {i} out of range"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_new_rejects_inverted_bounds() {
        assert!(Region::new(5, 1, 0, 1, 0, 1).is_err());
    }

    #[test]
    fn region_clip_clamps_to_axis_size() {
        let r = Region::new(-5, 100, 2, 3, 0, 0).unwrap();
        let clipped = r.clip([10, 10, 10]);
        assert_eq!(clipped.xmin, 0);
        assert_eq!(clipped.xmax, 9);
        assert_eq!(clipped.ymin, 2);
        assert_eq!(clipped.ymax, 3);
    }

    #[test]
    fn value_list_parses_mixed_tokens() {
        let list = ValueList::parse("1, 2.5, -3").unwrap();
        assert_eq!(list.size(), 3);
        assert_eq!(list.get_int(0).unwrap(), 1);
        assert!((list.get_flt(1).unwrap() - 2.5).abs() < 1e-12);
        assert_eq!(list.get_int(2).unwrap(), -3);
    }

    #[test]
    fn value_list_region_round_trip() {
        let list = ValueList::parse("5,9,0,4,0,4").unwrap();
        let region = Region::from_value_list(&list).unwrap();
        assert_eq!(region.nx(), 5);
        assert_eq!(region.ny(), 5);
        assert_eq!(region.nz(), 5);
    }

    #[test]
    fn value_list_out_of_range_errors() {
        let list = ValueList::parse("1,2").unwrap();
        assert!(list.get_int(5).is_err());
    }
}
