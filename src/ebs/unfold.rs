//! Band unfolding of a supercell calculation onto the primitive Brillouin zone.
//!
//! The supercell lattice is `A_sc = T · A_prim` (lattice vectors as rows). A supercell
//! state that belongs to the primitive wave vector k picks up the Bloch phase
//! `exp(2πi k·r)` under every primitive translation `r`. Its spectral weight is
//!
//! ```text
//! W(k, n) = 1/N Σ_i Re[ exp(-2πi k·r_i) Σ_b c_b* c_{T(r_i) b} ] / Σ_b |c_b|²
//! ```
//!
//! where the `N = |det T|` translations `r_i` are the primitive lattice points inside the
//! supercell, and `T(r_i)` maps each (atom, orbital) basis function to the same orbital on
//! the atom displaced by `r_i`. Both `k` and `r_i` are in supercell fractional coordinates.

use std::f64::consts::PI;

use ndarray as na;
use rayon::prelude::*;
use log::{
    info,
    warn,
};

use super::Ebs;
use crate::{
    error::{
        EbsError,
        EbsResult,
    },
    structure::Structure,
    types::{
        c64,
        Cube,
        Mat33,
        mat33_det,
        mat33_inv,
        vec_dot_mat33,
    },
};


const INTEGER_TOLERANCE: f64 = 1E-6;
const POSITION_TOLERANCE: f64 = 1E-2;


/// Wrap a fractional coordinate into [0, 1).
fn wrap(x: f64) -> f64 {
    let w = x - x.floor();
    if w > 1.0 - INTEGER_TOLERANCE { 0.0 } else { w }
}


fn check_transformation(t: &Mat33<f64>) -> EbsResult<Mat33<f64>> {
    if let Some(x) = t.iter().flatten().find(|x| (*x - x.round()).abs() > INTEGER_TOLERANCE) {
        return Err(EbsError::InvalidTransform(format!("element {} is not an integer", x)));
    }
    if mat33_det(t).abs() < 0.5 {
        return Err(EbsError::InvalidTransform(format!("matrix {:?} is singular", t)));
    }
    mat33_inv(t).ok_or_else(|| EbsError::InvalidTransform(format!("matrix {:?} is singular", t)))
}


/// Primitive lattice points inside the supercell, in supercell fractional coordinates.
pub fn primitive_translations(t: &Mat33<f64>) -> EbsResult<Vec<[f64; 3]>> {
    let tinv = check_transformation(t)?;
    let ncells = mat33_det(t).abs().round() as usize;

    // r = n · T⁻¹ with r in [0, 1)³ means n = r · T, bounded by the column sums of |T|
    let bounds = (0 .. 3)
        .map(|j| (0 .. 3).map(|i| t[i][j].abs()).sum::<f64>().round() as i64)
        .collect::<Vec<i64>>();

    let mut ret: Vec<[f64; 3]> = Vec::with_capacity(ncells);
    for n0 in -bounds[0] ..= bounds[0] {
        for n1 in -bounds[1] ..= bounds[1] {
            for n2 in -bounds[2] ..= bounds[2] {
                let r = vec_dot_mat33(&[n0 as f64, n1 as f64, n2 as f64], &tinv);
                let r = [wrap(r[0]), wrap(r[1]), wrap(r[2])];
                let exists = ret.iter().any(|x| {
                    x.iter().zip(r.iter()).all(|(a, b)| (a - b).abs() < INTEGER_TOLERANCE)
                });
                if !exists {
                    ret.push(r);
                }
            }
        }
    }

    if ret.len() != ncells {
        return Err(EbsError::InvalidTransform(format!(
            "found {} primitive translations, expected {}", ret.len(), ncells)));
    }
    ret.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Ok(ret)
}


/// For each translation, the atom each atom is moved onto.
fn translation_maps(structure: &Structure, translations: &[[f64; 3]]) -> EbsResult<Vec<Vec<usize>>> {
    let pos = &structure.frac_pos;
    translations.iter()
        .map(|r| {
            (0 .. pos.len())
                .map(|ia| {
                    let target = [pos[ia][0] + r[0], pos[ia][1] + r[1], pos[ia][2] + r[2]];
                    (0 .. pos.len())
                        .filter(|&ib| structure.atoms[ib] == structure.atoms[ia])
                        .find(|&ib| {
                            (0 .. 3).all(|x| {
                                let d = pos[ib][x] - target[x];
                                (d - d.round()).abs() < POSITION_TOLERANCE
                            })
                        })
                        .ok_or_else(|| EbsError::IncommensurateStructure(format!(
                            "atom {} ({}) translated by {:?} lands on no atom of the same species",
                            ia + 1, structure.atoms[ia], r)))
                })
                .collect::<EbsResult<Vec<usize>>>()
        })
        .collect()
}


impl Ebs {
    /// Replace `weights` by the unfolded spectral weights, `[nk, nb, nspins]`.
    ///
    /// Without phases the square roots of the projections stand in for the amplitudes, the
    /// result is then only a rough estimate and a warning is logged.
    pub fn unfold(&mut self, transformation_matrix: &Mat33<f64>, structure: &Structure) -> EbsResult<()> {
        if self.state.unfolded {
            return Err(EbsError::TransformAlreadyApplied("unfold"));
        }
        if structure.nions() != self.natoms() {
            return Err(EbsError::ShapeMismatch(format!(
                "structure has {} atoms, projections have {}", structure.nions(), self.natoms())));
        }

        let translations = primitive_translations(transformation_matrix)?;
        let maps = translation_maps(structure, &translations)?;
        info!("Unfolding with {} primitive translations.", translations.len());

        let amplitudes: na::Array6<c64> = match self.phases.as_ref() {
            Some(p) => p.clone(),
            None => {
                warn!("No phase data in projections, unfolded weights are not meaningful. \
For VASP, rerun with LORBIT = 12 to get phases in PROCAR.");
                self.projections.mapv(|x| c64::new(x.max(0.0).sqrt(), 0.0))
            },
        };

        let kpoints = self.kpoints_direct()?;
        let nk = self.nkpoints();
        let nb = self.nbands();
        let ns = self.nspins();
        let ncells = translations.len() as f64;

        let rows = (0 .. nk).into_par_iter()
            .map(|ik| {
                let k = [kpoints[[ik, 0]], kpoints[[ik, 1]], kpoints[[ik, 2]]];
                let bloch = translations.iter()
                    .map(|r| {
                        let phase = -2.0 * PI * (k[0] * r[0] + k[1] * r[1] + k[2] * r[2]);
                        c64::new(phase.cos(), phase.sin())
                    })
                    .collect::<Vec<c64>>();

                let mut row = vec![0.0f64; nb * ns];
                for ib in 0 .. nb {
                    for is in 0 .. ns {
                        let c = amplitudes.slice(na::s![ik, ib, is, .., .., ..]);
                        let norm: f64 = c.iter().map(|x| x.norm_sqr()).sum();
                        if norm < 1E-12 {
                            continue;
                        }

                        let mut w = 0.0;
                        for (map, b) in maps.iter().zip(bloch.iter()) {
                            let mut overlap = c64::new(0.0, 0.0);
                            for (ia, &ja) in map.iter().enumerate() {
                                let from = c.index_axis(na::Axis(0), ia);
                                let to   = c.index_axis(na::Axis(0), ja);
                                overlap += from.iter().zip(to.iter())
                                    .map(|(x, y)| x.conj() * y)
                                    .sum::<c64>();
                            }
                            w += (*b * overlap).re;
                        }
                        row[ib * ns + is] = (w / ncells / norm).clamp(0.0, 1.0);
                    }
                }
                row
            })
            .collect::<Vec<Vec<f64>>>();

        let weights = Cube::<f64>::from_shape_vec((nk, nb, ns), rows.into_iter().flatten().collect())
            .map_err(|e| EbsError::ShapeMismatch(e.to_string()))?;

        self.weights = Some(weights);
        self.state.unfolded = true;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use crate::{
        ebs::tests::CUBIC,
        types::Matrix,
    };

    const DOUBLE_X: Mat33<f64> = [[2.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

    #[test]
    fn test_primitive_translations() {
        let t = primitive_translations(&DOUBLE_X).unwrap();
        assert_eq!(t, vec![[0.0, 0.0, 0.0], [0.5, 0.0, 0.0]]);

        let t = primitive_translations(&[[1.0, 1.0, 0.0], [-1.0, 1.0, 0.0], [0.0, 0.0, 1.0]]).unwrap();
        assert_eq!(t.len(), 2);

        let t = primitive_translations(&[[2.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 2.0]]).unwrap();
        assert_eq!(t.len(), 8);
    }

    #[test]
    fn test_invalid_transformation() {
        let singular = [[1.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
        assert!(matches!(primitive_translations(&singular), Err(EbsError::InvalidTransform(_))));
        let fractional = [[1.5, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        assert!(matches!(primitive_translations(&fractional), Err(EbsError::InvalidTransform(_))));
    }

    fn dimer_chain() -> Structure {
        Structure::new(
            [[2.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            vec!["H".into()],
            vec![2],
            vec![[0.0, 0.0, 0.0], [0.5, 0.0, 0.0]],
        ).unwrap()
    }

    /// A 2-atom supercell of a 1-atom chain, one s orbital.
    ///
    /// Band 0 is the bonding state (same sign on both atoms, primitive k = 0), band 1 the
    /// antibonding one (opposite signs, primitive k = 1/2, folded onto Γ of the supercell).
    fn folded_chain(with_phases: bool) -> Ebs {
        let kpoints = Matrix::<f64>::zeros((1, 3));
        let bands = na::arr3(&[[[-1.0], [1.0]]]);
        let projections = na::Array5::<f64>::from_elem((1, 2, 1, 2, 1), 0.5);
        let ebs = Ebs::new(kpoints, bands, projections, CUBIC).unwrap();
        if !with_phases {
            return ebs;
        }
        let s = 0.5f64.sqrt();
        let mut phases = na::Array6::<c64>::zeros((1, 2, 1, 2, 1, 1));
        phases[[0, 0, 0, 0, 0, 0]] = c64::new(s, 0.0);
        phases[[0, 0, 0, 1, 0, 0]] = c64::new(s, 0.0);
        phases[[0, 1, 0, 0, 0, 0]] = c64::new(s, 0.0);
        phases[[0, 1, 0, 1, 0, 0]] = c64::new(-s, 0.0);
        ebs.with_phases(phases).unwrap()
    }

    #[test]
    fn test_unfold_weights() {
        let mut ebs = folded_chain(true);
        ebs.unfold(&DOUBLE_X, &dimer_chain()).unwrap();
        let w = ebs.weights().unwrap();
        assert_eq!(w.dim(), (1, 2, 1));
        assert_abs_diff_eq!(w[[0, 0, 0]], 1.0, epsilon = 1E-10);
        assert_abs_diff_eq!(w[[0, 1, 0]], 0.0, epsilon = 1E-10);
        assert!(ebs.state().unfolded);
    }

    #[test]
    fn test_unfold_identity_keeps_everything() {
        let mut ebs = folded_chain(true);
        let id = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        ebs.unfold(&id, &dimer_chain()).unwrap();
        assert!(ebs.weights().unwrap().iter().all(|&w| (w - 1.0).abs() < 1E-10));
    }

    #[test]
    fn test_unfold_without_phases_still_runs() {
        let mut ebs = folded_chain(false);
        ebs.unfold(&DOUBLE_X, &dimer_chain()).unwrap();
        assert!(ebs.weights().unwrap().iter().all(|&w| (0.0 ..= 1.0).contains(&w)));
    }

    #[test]
    fn test_unfold_errors() {
        let mut ebs = folded_chain(true);
        let singular = [[0.0; 3]; 3];
        assert!(matches!(ebs.unfold(&singular, &dimer_chain()), Err(EbsError::InvalidTransform(_))));
        assert!(!ebs.state().unfolded);

        let odd = Structure::new(
            [[2.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            vec!["H".into(), "He".into()],
            vec![1, 1],
            vec![[0.0, 0.0, 0.0], [0.5, 0.0, 0.0]],
        ).unwrap();
        assert!(matches!(ebs.unfold(&DOUBLE_X, &odd), Err(EbsError::IncommensurateStructure(_))));

        ebs.unfold(&DOUBLE_X, &dimer_chain()).unwrap();
        assert_eq!(ebs.unfold(&DOUBLE_X, &dimer_chain()).unwrap_err(),
                   EbsError::TransformAlreadyApplied("unfold"));
    }
}
