use std::{
    f64::consts::PI,
    fs,
    path::Path,
};

use anyhow::{
    ensure,
    Context,
};
use log::info;
use regex::Regex;

use crate::types::{
    Mat33,
    Result,
};


/// The two quantities band plots need from OUTCAR, both taken from their last occurrence.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Outcar {
    pub efermi             : Option<f64>,
    /// Reciprocal lattice vectors as rows, 2π included.
    pub reciprocal_lattice : Option<Mat33<f64>>,
}


impl Outcar {
    pub fn from_file(path: &(impl AsRef<Path> + ?Sized)) -> Result<Self> {
        let path = path.as_ref();
        info!("Reading {:?}", path);
        let txt = fs::read_to_string(path)
            .context(format!("Failed to read {:?}", path))?;
        Self::from_txt(&txt)
            .context(format!("Parse file {:?} failed.", path))
    }


    pub fn from_txt(txt: &str) -> Result<Self> {
        Ok(Self {
            efermi: Self::parse_efermi(txt)?,
            reciprocal_lattice: Self::parse_reciprocal_lattice(txt)?,
        })
    }


    fn parse_efermi(txt: &str) -> Result<Option<f64>> {
        Regex::new(r"E-fermi\s*:\s*([-+]?[0-9]+\.?[0-9]*(?:[eE][-+]?[0-9]+)?)")?
            .captures_iter(txt)
            .last()
            .map(|c| c[1].parse::<f64>().context(format!("Invalid E-fermi {:?}", &c[1])))
            .transpose()
    }


    /// The block reads `direct lattice vectors | reciprocal lattice vectors`, three rows of
    /// six columns, the reciprocal part is in units of 1/Å without the 2π.
    fn parse_reciprocal_lattice(txt: &str) -> Result<Option<Mat33<f64>>> {
        let Some(m) = Regex::new(r"reciprocal lattice vectors")?.find_iter(txt).last() else {
            return Ok(None);
        };

        let mut ret = [[0.0f64; 3]; 3];
        let rows = txt[m.end() ..].lines().skip(1).take(3).collect::<Vec<&str>>();
        ensure!(rows.len() == 3, "Lattice vector block is truncated.");
        for (row, line) in ret.iter_mut().zip(rows) {
            let v = line.split_whitespace()
                .map(|x| x.parse::<f64>())
                .collect::<std::result::Result<Vec<f64>, _>>()
                .context(format!("Invalid lattice vector line {:?}", line))?;
            ensure!(v.len() == 6, "Expect 6 columns in lattice vector line {:?}", line);
            for i in 0 .. 3 {
                row[i] = v[3 + i] * 2.0 * PI;
            }
        }
        Ok(Some(ret))
    }
}
