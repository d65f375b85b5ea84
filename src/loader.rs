//! Turn VASP output files into one band structure.
//!
//! Resolution order: an explicit Fermi level wins over OUTCAR, otherwise 0.0 is used. An
//! explicit reciprocal lattice wins over OUTCAR, which wins over the POSCAR lattice.

use std::path::PathBuf;

use anyhow::{
    anyhow,
    Context,
};
use log::{
    info,
    warn,
};
use ndarray as na;

use crate::{
    ebs::Ebs,
    structure::Structure,
    types::{
        Mat33,
        Result,
        mat33_max_abs_diff,
    },
    vasp_parsers::{
        Kpoints,
        Outcar,
        Poscar,
        Procar,
    },
};


/// Reciprocal lattices from OUTCAR and POSCAR differing more than this are reported.
const LATTICE_TOLERANCE: f64 = 1E-4;


#[derive(Clone, Debug)]
pub struct LoaderInput {
    pub procar               : PathBuf,
    pub outcar               : Option<PathBuf>,
    pub poscar               : Option<PathBuf>,
    pub kpoints              : Option<PathBuf>,
    pub fermi                : Option<f64>,
    pub reciprocal_lattice   : Option<Mat33<f64>>,
    pub interpolation_factor : usize,
}


impl LoaderInput {
    pub fn new(procar: impl Into<PathBuf>) -> Self {
        Self {
            procar: procar.into(),
            outcar: None,
            poscar: None,
            kpoints: None,
            fermi: None,
            reciprocal_lattice: None,
            interpolation_factor: 1,
        }
    }
}


#[derive(Clone, Debug)]
pub struct Loaded {
    pub ebs                : Ebs,
    pub structure          : Option<Structure>,
    pub reciprocal_lattice : Option<Mat33<f64>>,
}


pub fn resolve_fermi(explicit: Option<f64>, outcar: Option<&Outcar>) -> f64 {
    if let Some(f) = explicit {
        return f;
    }
    match outcar.and_then(|o| o.efermi) {
        Some(f) => f,
        None => {
            warn!("Fermi level not available, energies are not shifted. Provide an OUTCAR or set `fermi` explicitly.");
            0.0
        },
    }
}


pub fn resolve_reciprocal_lattice(explicit: Option<Mat33<f64>>,
                                  outcar: Option<&Outcar>,
                                  structure: Option<&Structure>) -> Option<Mat33<f64>> {
    if explicit.is_some() {
        return explicit;
    }

    let from_outcar = outcar.and_then(|o| o.reciprocal_lattice);
    let from_poscar = structure.and_then(|s| s.reciprocal_lattice());

    match (from_outcar, from_poscar) {
        (Some(a), Some(b)) => {
            let diff = mat33_max_abs_diff(&a, &b);
            if diff > LATTICE_TOLERANCE {
                warn!("Reciprocal lattices from OUTCAR and POSCAR differ by {:.3e}, the OUTCAR one is used.", diff);
            }
            Some(a)
        },
        (a, b) => a.or(b),
    }
}


/// Read PROCAR and its companion files, build the band structure and interpolate it.
pub fn parse(input: &LoaderInput) -> Result<Loaded> {
    let mut procar: Result<Procar> = Err(anyhow!("PROCAR not read"));
    let mut outcar: Option<Result<Outcar>> = None;
    let mut poscar: Option<Result<Poscar>> = None;
    let mut kpoints: Option<Result<Kpoints>> = None;

    rayon::scope(|s| {
        s.spawn(|_| procar = Procar::from_file(&input.procar));
        s.spawn(|_| outcar = input.outcar.as_ref().map(Outcar::from_file));
        s.spawn(|_| poscar = input.poscar.as_ref().map(Poscar::from_file));
        s.spawn(|_| kpoints = input.kpoints.as_ref().map(Kpoints::from_file));
    });

    let procar = procar?;
    let outcar = outcar.transpose()?;
    let structure = poscar.transpose()?
        .map(|p| p.to_structure())
        .transpose()?;
    let kpath = kpoints.transpose()?
        .map(|k| k.to_kpath(true))
        .transpose()?;

    if let Some(s) = structure.as_ref() {
        if s.nions() != procar.nions {
            warn!("POSCAR has {} ions but PROCAR has {}.", s.nions(), procar.nions);
        }
    }

    let fermi = resolve_fermi(input.fermi, outcar.as_ref());
    let reciprocal_lattice = resolve_reciprocal_lattice(input.reciprocal_lattice, outcar.as_ref(), structure.as_ref());
    let recip = reciprocal_lattice.unwrap_or_else(|| {
        warn!("No reciprocal lattice available, k-distances are measured in direct coordinates.");
        [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]
    });

    info!("Building band structure: {} k-points, {} bands, {} ions, {} orbitals{}.",
          procar.nkpoints, procar.nbands, procar.nions, procar.orbital_names.len(),
          if procar.lsorbit { ", non-collinear" } else { "" });

    let mut ebs = Ebs::new(procar.kpoints, procar.eigvals, procar.projections, recip)?
        .with_kpoint_weights(procar.kweights)?
        .with_orbital_names(procar.orbital_names)?
        .with_fermi(fermi);
    if let Some(phases) = procar.phases {
        ebs = ebs.with_phases(phases.insert_axis(na::Axis(4)))?;
    }
    if let Some(kpath) = kpath {
        ebs = ebs.with_kpath(kpath)
            .context("K-path from KPOINTS does not match the k-points in PROCAR")?;
    }

    if input.interpolation_factor > 1 {
        ebs.interpolate(input.interpolation_factor)?;
    }

    Ok(Loaded { ebs, structure, reciprocal_lattice })
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;
    use crate::vasp_parsers::outcar::tests::OUTCAR_TAIL;

    fn cubic(a: f64) -> Structure {
        Structure::new([[a, 0.0, 0.0], [0.0, a, 0.0], [0.0, 0.0, a]],
                       vec!["H".into()], vec![1], vec![[0.0; 3]]).unwrap()
    }

    #[test]
    fn test_resolve_fermi() {
        let outcar = Outcar::from_txt(OUTCAR_TAIL).unwrap();
        assert_eq!(resolve_fermi(Some(1.0), Some(&outcar)), 1.0);
        assert_eq!(resolve_fermi(None, Some(&outcar)), 2.9331);
        assert_eq!(resolve_fermi(None, None), 0.0);
        assert_eq!(resolve_fermi(None, Some(&Outcar::default())), 0.0);
    }

    #[test]
    fn test_resolve_reciprocal_lattice() {
        let explicit = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        let outcar = Outcar {
            efermi: None,
            reciprocal_lattice: Some([[PI, 0.0, 0.0], [0.0, PI, 0.0], [0.0, 0.0, PI]]),
        };
        let s = cubic(4.0);

        assert_eq!(resolve_reciprocal_lattice(Some(explicit), Some(&outcar), Some(&s)), Some(explicit));
        assert_eq!(resolve_reciprocal_lattice(None, Some(&outcar), Some(&s)), outcar.reciprocal_lattice);
        assert_eq!(resolve_reciprocal_lattice(None, None, Some(&s)), s.reciprocal_lattice());
        assert_eq!(resolve_reciprocal_lattice(None, None, None), None);
    }
}
