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
    structure::Structure,
    types::{
        Mat33,
        MatX3,
        Result,
        mat33_det,
        mat33_inv,
        vec_dot_mat33,
    },
};


/// POSCAR/CONTCAR in VASP 5 format, species names are required.
#[derive(Clone, Debug, PartialEq)]
pub struct Poscar {
    pub comment       : String,
    pub scale         : f64,
    pub cell          : Mat33<f64>,
    pub ion_types     : Vec<String>,
    pub ions_per_type : Vec<usize>,
    pub pos_frac      : MatX3<f64>,
    pub constraints   : Option<MatX3<bool>>,
}


fn parse_row(line: &str, what: &str) -> Result<[f64; 3]> {
    let v = line.split_whitespace()
        .take(3)
        .map(|x| x.parse::<f64>())
        .collect::<std::result::Result<Vec<f64>, _>>()
        .context(format!("Invalid {} line: {:?}", what, line))?;
    ensure!(v.len() == 3, "Invalid {} line: {:?}", what, line);
    Ok([v[0], v[1], v[2]])
}


impl Poscar {
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
        let mut next = |what: &str| lines.next()
            .with_context(|| format!("POSCAR ends before {}", what));

        let comment = next("comment")?.trim().to_string();
        let scale = next("scaling factor")?
            .split_whitespace()
            .next()
            .context("Empty scaling factor line")?
            .parse::<f64>()
            .context("Invalid scaling factor")?;

        let mut cell = [[0.0f64; 3]; 3];
        for row in cell.iter_mut() {
            *row = parse_row(next("lattice vectors")?, "lattice vector")?;
        }
        let det = mat33_det(&cell);
        ensure!(det.abs() > 1E-8, "Lattice vectors are linearly dependent.");
        let factor = if scale < 0.0 {
            (-scale / det.abs()).cbrt()
        } else {
            scale
        };
        cell.iter_mut().flatten().for_each(|x| *x *= factor);

        let ion_types = next("species names")?
            .split_whitespace()
            .map(|s| s.to_string())
            .collect::<Vec<String>>();
        if ion_types.first().map(|s| s.parse::<usize>().is_ok()).unwrap_or(true) {
            bail!("Species names line is missing, only VASP 5 format POSCAR is supported.");
        }
        let ions_per_type = next("ion counts")?
            .split_whitespace()
            .map(|s| s.parse::<usize>())
            .collect::<std::result::Result<Vec<usize>, _>>()
            .context("Invalid ion counts line")?;
        ensure!(ion_types.len() == ions_per_type.len(),
            "{} species but {} ion counts.", ion_types.len(), ions_per_type.len());
        let nions: usize = ions_per_type.iter().sum();

        let mut mode = next("coordinate mode")?.trim().to_string();
        let selective = mode.to_ascii_lowercase().starts_with('s');
        if selective {
            mode = next("coordinate mode")?.trim().to_string();
        }
        let is_cartesian = matches!(mode.chars().next(), Some('c' | 'C' | 'k' | 'K'));

        let inv = mat33_inv(&cell).context("Singular lattice")?;
        let mut pos_frac = Vec::with_capacity(nions);
        let mut constraints = Vec::with_capacity(nions);
        for i in 0 .. nions {
            let line = next("positions")
                .with_context(|| format!("Expect {} positions, found {}", nions, i))?;
            let p = parse_row(line, "position")?;
            let p = if is_cartesian {
                vec_dot_mat33(&p.map(|x| x * factor), &inv)
            } else {
                p
            };
            pos_frac.push(p);

            if selective {
                let flags = line.split_whitespace()
                    .skip(3)
                    .take(3)
                    .map(|s| s.starts_with(['T', 't']))
                    .collect::<Vec<bool>>();
                ensure!(flags.len() == 3, "Missing selective dynamics flags: {:?}", line);
                constraints.push([flags[0], flags[1], flags[2]]);
            }
        }

        Ok(Self {
            comment,
            scale,
            cell,
            ion_types,
            ions_per_type,
            pos_frac,
            constraints: selective.then_some(constraints),
        })
    }


    pub fn to_structure(&self) -> Result<Structure> {
        Structure::new(self.cell, self.ion_types.clone(), self.ions_per_type.clone(), self.pos_frac.clone())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    const POSCAR_GAAS: &str = "GaAs supercell
1.0
   4.0 0.0 0.0
   0.0 2.0 0.0
   0.0 0.0 2.0
Ga As
2 2
Direct
0.00 0.00 0.00
0.50 0.00 0.00
0.25 0.50 0.50
0.75 0.50 0.50
";

    #[test]
    fn test_read_poscar() {
        let pos = Poscar::from_txt(POSCAR_GAAS).unwrap();
        assert_eq!(pos.comment, "GaAs supercell");
        assert_eq!(pos.cell[0], [4.0, 0.0, 0.0]);
        assert_eq!(pos.ion_types, vec!["Ga", "As"]);
        assert_eq!(pos.ions_per_type, vec![2, 2]);
        assert_eq!(pos.pos_frac[3], [0.75, 0.5, 0.5]);
        assert!(pos.constraints.is_none());

        let s = pos.to_structure().unwrap();
        assert_eq!(s.atoms_of_species("As"), vec![2, 3]);
    }

    #[test]
    fn test_cartesian_selective_volume() {
        let txt = "cubic
-8.0
   1.0 0.0 0.0
   0.0 1.0 0.0
   0.0 0.0 1.0
H
1
Selective dynamics
Cartesian
0.5 0.25 0.0 T F T
";
        let pos = Poscar::from_txt(txt).unwrap();
        assert!((pos.cell[0][0] - 2.0).abs() < 1E-12);
        assert!((pos.pos_frac[0][0] - 0.5).abs() < 1E-12);
        assert!((pos.pos_frac[0][1] - 0.25).abs() < 1E-12);
        assert_eq!(pos.constraints.unwrap()[0], [true, false, true]);
    }

    #[test]
    fn test_read_failed() {
        // VASP 4 style, no species line
        let txt = "old\n1.0\n1 0 0\n0 1 0\n0 0 1\n1\nDirect\n0 0 0\n";
        assert!(Poscar::from_txt(txt).is_err());
        assert!(Poscar::from_txt(&POSCAR_GAAS.replace("0.75 0.50 0.50\n", "")).is_err());
        assert!(Poscar::from_txt("").is_err());
    }
}
