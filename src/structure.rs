use std::f64::consts::PI;

use anyhow::{
    bail,
    ensure,
};

use crate::types::{
    Result,
    Mat33,
    MatX3,
    mat33_inv,
    mat33_transpose,
    mat33_det,
    vec_dot_mat33,
};


/// Atomic geometry of the calculation cell.
///
/// Lattice vectors are stored as rows. Once built by a loader the structure is only
/// read, both the band structure and the renderer borrow it.
#[derive(Clone, Debug, PartialEq)]
pub struct Structure {
    pub cell          : Mat33<f64>,
    pub ion_types     : Vec<String>,
    pub ions_per_type : Vec<usize>,
    pub atoms         : Vec<String>,
    pub frac_pos      : MatX3<f64>,
}


impl Structure {
    pub fn new(cell: Mat33<f64>, ion_types: Vec<String>, ions_per_type: Vec<usize>, frac_pos: MatX3<f64>) -> Result<Self> {
        ensure!(ion_types.len() == ions_per_type.len(),
            "Number of ion types ({}) and ion counts ({}) differ.", ion_types.len(), ions_per_type.len());

        let atoms = ion_types.iter()
            .zip(ions_per_type.iter())
            .flat_map(|(t, &n)| std::iter::repeat(t.clone()).take(n))
            .collect::<Vec<String>>();

        Self::check(cell, ion_types, ions_per_type, atoms, frac_pos)
    }


    /// Build from one species label per site, species are listed in order of first appearance.
    pub fn from_atoms(cell: Mat33<f64>, atoms: Vec<String>, frac_pos: MatX3<f64>) -> Result<Self> {
        let mut ion_types: Vec<String> = vec![];
        let mut ions_per_type: Vec<usize> = vec![];
        for a in atoms.iter() {
            if let Some(i) = ion_types.iter().position(|t| t == a) {
                ions_per_type[i] += 1;
            } else {
                ion_types.push(a.clone());
                ions_per_type.push(1);
            }
        }

        Self::check(cell, ion_types, ions_per_type, atoms, frac_pos)
    }


    fn check(cell: Mat33<f64>, ion_types: Vec<String>, ions_per_type: Vec<usize>,
             atoms: Vec<String>, frac_pos: MatX3<f64>) -> Result<Self> {
        if atoms.len() != frac_pos.len() {
            bail!("Structure has {} atom labels but {} positions.", atoms.len(), frac_pos.len());
        }
        if let Some(t) = ion_types.iter().find(|t| !atoms.contains(t)) {
            bail!("Species {:?} has no atom in the structure.", t);
        }
        if mat33_det(&cell).abs() < 1E-8 {
            bail!("Lattice vectors are linearly dependent: {:?}", cell);
        }

        Ok(Self { cell, ion_types, ions_per_type, atoms, frac_pos })
    }


    pub fn nions(&self) -> usize {
        self.atoms.len()
    }


    /// Distinct species labels in order of appearance.
    pub fn species(&self) -> &[String] {
        &self.ion_types
    }


    /// `2π·(lattice⁻¹)ᵗ`, reciprocal vectors as rows. `None` for a singular lattice.
    pub fn reciprocal_lattice(&self) -> Option<Mat33<f64>> {
        let mut ret = mat33_transpose(&mat33_inv(&self.cell)?);
        ret.iter_mut().flatten().for_each(|x| *x *= 2.0 * PI);
        Some(ret)
    }


    /// Indices of the atoms labelled with `species`, empty when the species is absent.
    pub fn atoms_of_species(&self, species: &str) -> Vec<usize> {
        self.atoms.iter()
            .enumerate()
            .filter(|(_, a)| a.as_str() == species)
            .map(|(i, _)| i)
            .collect()
    }


    pub fn car_pos(&self) -> MatX3<f64> {
        self.frac_pos.iter()
            .map(|p| vec_dot_mat33(p, &self.cell))
            .collect()
    }


    pub fn volume(&self) -> f64 {
        mat33_det(&self.cell).abs()
    }
}
