use std::{
    fs,
    path::Path,
};

use anyhow::{
    bail,
    ensure,
    Context,
};
use log::info;

use crate::{
    kpath::KPath,
    types::Result,
};


/// Line-mode KPOINTS, the input of a band structure run.
///
/// ```text
/// k-path for GaAs
/// 40
/// Line-mode
/// reciprocal
/// 0.0 0.0 0.0 ! G
/// 0.5 0.0 0.5 ! X
///
/// 0.5 0.0 0.5 ! X
/// ...
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Kpoints {
    pub comment         : String,
    pub ngrid           : usize,
    pub special_kpoints : Vec<[[f64; 3]; 2]>,
    pub knames          : Vec<[String; 2]>,
}


fn normalize_label(label: &str) -> String {
    match label.trim() {
        "G" | "g" | "Gamma" | "GAMMA" | "gamma" | "\\Gamma" | "GM" => "Γ".to_string(),
        s => s.to_string(),
    }
}


impl Kpoints {
    pub fn from_file(path: &(impl AsRef<Path> + ?Sized)) -> Result<Self> {
        let path = path.as_ref();
        info!("Reading {:?}", path);
        let txt = fs::read_to_string(path)
            .context(format!("Failed to read {:?}", path))?;
        Self::from_txt(&txt)
            .context(format!("Parse file {:?} failed.", path))
    }


    pub fn from_txt(txt: &str) -> Result<Self> {
        let mut lines = txt.lines();
        let comment = lines.next().context("Empty KPOINTS")?.trim().to_string();
        let ngrid = lines.next()
            .context("KPOINTS ends before the number of k-points")?
            .split_whitespace()
            .next()
            .context("Missing number of k-points")?
            .parse::<usize>()
            .context("Invalid number of k-points")?;
        ensure!(ngrid >= 2, "Line-mode KPOINTS needs at least 2 points per segment, got {}.", ngrid);

        let mode = lines.next().context("KPOINTS ends before the mode line")?;
        if !mode.trim_start().to_ascii_lowercase().starts_with('l') {
            bail!("Only line-mode KPOINTS is supported, found mode {:?}.", mode.trim());
        }
        let coord = lines.next().context("KPOINTS ends before the coordinate line")?;
        if matches!(coord.trim_start().chars().next(), Some('c' | 'C' | 'k' | 'K')) {
            bail!("Cartesian line-mode KPOINTS is not supported, use reciprocal coordinates.");
        }

        let mut points: Vec<([f64; 3], String)> = vec![];
        for line in lines.filter(|l| !l.trim().is_empty()) {
            let (coords, label) = match line.split_once('!') {
                Some((c, l)) => (c, normalize_label(l)),
                None         => (line, String::new()),
            };
            let v = coords.split_whitespace()
                .take(3)
                .map(|x| x.parse::<f64>())
                .collect::<std::result::Result<Vec<f64>, _>>()
                .context(format!("Invalid k-point line {:?}", line))?;
            ensure!(v.len() == 3, "Invalid k-point line {:?}", line);
            points.push(([v[0], v[1], v[2]], label));
        }

        ensure!(!points.is_empty() && points.len() % 2 == 0,
            "Line-mode KPOINTS needs pairs of end points, found {} points.", points.len());

        let (special_kpoints, knames) = points.chunks(2)
            .map(|p| ([p[0].0, p[1].0], [p[0].1.clone(), p[1].1.clone()]))
            .unzip();

        Ok(Self { comment, ngrid, special_kpoints, knames })
    }


    pub fn to_kpath(&self, has_time_reversal: bool) -> Result<KPath> {
        Ok(KPath::new(
            self.special_kpoints.clone(),
            vec![self.ngrid; self.special_kpoints.len()],
            self.knames.clone(),
            has_time_reversal,
        )?)
    }
}
