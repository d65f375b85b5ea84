//! Electronic band structure: energies and orbital projections over k-points.
//!
//! Array layouts, `nk` k-points, `nb` bands, `ns` spin channels:
//!
//! - `kpoints`:     `[nk, 3]`, direct or cartesian according to `kdirect`;
//! - `bands`:       `[nk, nb, ns]` in eV, not shifted by the Fermi level;
//! - `projections`: `[nk, nb, nch, natoms, nprincipals, norbitals]`, `nch == ns` except
//!                  for non-collinear runs, where `ns == 1` and `nch == 4` (tot, mx, my, mz);
//! - `phases`:      complex projections, same layout as `projections`;
//! - `weights`:     unfolded spectral weights, `[nk, nb, ns]`, only after `unfold`.
//!
//! The core arrays are fixed at construction. `reorder` and `unfold` are state
//! transitions that may each happen once, `state()` tells which ones already did.

mod interpolate;
mod reorder;
mod unfold;

use ndarray as na;
use log::debug;

use crate::{
    error::{
        EbsError,
        EbsResult,
    },
    kpath::KPath,
    types::{
        c64,
        Cube,
        Mat33,
        Matrix,
        Vector,
        mat33_inv,
        vec_dot_mat33,
    },
};

pub use interpolate::natural_cubic_spline;
pub use unfold::primitive_translations;


/// Marker meaning "sum over every principal quantum number channel".
pub const ALL_PRINCIPALS: i32 = -1;


/// Which one-shot transformations have been applied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EbsState {
    pub interpolated : bool,
    pub reordered    : bool,
    pub unfolded     : bool,
}


#[derive(Clone, Debug)]
pub struct Ebs {
    kpoints            : Matrix<f64>,
    kdirect            : bool,
    bands              : Cube<f64>,
    projections        : na::Array6<f64>,
    phases             : Option<na::Array6<c64>>,
    kpoint_weights     : Vector<f64>,
    weights            : Option<Cube<f64>>,
    fermi              : Option<f64>,
    reciprocal_lattice : Mat33<f64>,
    kpath              : Option<KPath>,
    is_non_collinear   : bool,
    orbital_names      : Vec<String>,
    state              : EbsState,
}


impl Ebs {
    /// Build from projections without a principal quantum number axis, `[nk, nb, nch, natoms, norbitals]`.
    pub fn new(kpoints: Matrix<f64>,
               bands: Cube<f64>,
               projections: na::Array5<f64>,
               reciprocal_lattice: Mat33<f64>) -> EbsResult<Self> {
        let projections = projections.insert_axis(na::Axis(4));
        Self::with_principal_projections(kpoints, bands, projections, reciprocal_lattice)
    }


    pub fn with_principal_projections(kpoints: Matrix<f64>,
                                      bands: Cube<f64>,
                                      projections: na::Array6<f64>,
                                      reciprocal_lattice: Mat33<f64>) -> EbsResult<Self> {
        let nk = kpoints.nrows();
        if kpoints.ncols() != 3 {
            return Err(EbsError::ShapeMismatch(format!("k-points must have 3 columns, got {}", kpoints.ncols())));
        }

        let (bnk, nb, ns) = bands.dim();
        let pshape = projections.shape().to_owned();
        if bnk != nk || pshape[0] != nk {
            return Err(EbsError::ShapeMismatch(format!(
                "k-point counts differ: kpoints {}, bands {}, projections {}", nk, bnk, pshape[0])));
        }
        if pshape[1] != nb {
            return Err(EbsError::ShapeMismatch(format!(
                "band counts differ: bands {}, projections {}", nb, pshape[1])));
        }

        let is_non_collinear = match (ns, pshape[2]) {
            (a, b) if a == b => false,
            (1, 4)           => true,
            (a, b) => return Err(EbsError::ShapeMismatch(format!(
                "bands have {} spin channels but projections have {}", a, b))),
        };

        if let Some(&n) = [pshape[3], pshape[4], pshape[5]].iter().find(|&&n| n == 0) {
            return Err(EbsError::ShapeMismatch(format!("projection axis of length {}", n)));
        }

        if projections.iter().any(|&x| x < 0.0 || !x.is_finite()) {
            debug!("Negative or non-finite projections found, they are kept as they are.");
        }

        let norbitals = pshape[5];
        let orbital_names = crate::orbitals::LM_NAMES.iter()
            .take(norbitals)
            .map(|s| s.to_string())
            .chain((16 .. norbitals).map(|i| format!("orb{}", i)))
            .collect();

        Ok(Self {
            kpoints,
            kdirect: true,
            bands,
            projections,
            phases: None,
            kpoint_weights: Vector::<f64>::from_elem(nk, 1.0 / nk as f64),
            weights: None,
            fermi: None,
            reciprocal_lattice,
            kpath: None,
            is_non_collinear,
            orbital_names,
            state: EbsState::default(),
        })
    }


    /// Attach complex projections; they must match the projection layout.
    pub fn with_phases(mut self, phases: na::Array6<c64>) -> EbsResult<Self> {
        if phases.shape() != self.projections.shape() {
            return Err(EbsError::ShapeMismatch(format!(
                "phases have shape {:?}, projections {:?}", phases.shape(), self.projections.shape())));
        }
        self.phases = Some(phases);
        Ok(self)
    }


    pub fn with_kpoint_weights(mut self, kpoint_weights: Vector<f64>) -> EbsResult<Self> {
        if kpoint_weights.len() != self.nkpoints() {
            return Err(EbsError::ShapeMismatch(format!(
                "{} k-point weights for {} k-points", kpoint_weights.len(), self.nkpoints())));
        }
        self.kpoint_weights = kpoint_weights;
        Ok(self)
    }


    pub fn with_kpath(mut self, kpath: KPath) -> EbsResult<Self> {
        if kpath.nkpoints() != self.nkpoints() {
            return Err(EbsError::ShapeMismatch(format!(
                "k-path samples {} k-points but the band structure has {}", kpath.nkpoints(), self.nkpoints())));
        }
        self.kpath = Some(kpath);
        Ok(self)
    }


    pub fn with_fermi(mut self, fermi: f64) -> Self {
        self.fermi = Some(fermi);
        self
    }


    pub fn with_kdirect(mut self, kdirect: bool) -> Self {
        self.kdirect = kdirect;
        self
    }


    pub fn with_orbital_names(mut self, names: Vec<String>) -> EbsResult<Self> {
        if names.len() != self.norbitals() {
            return Err(EbsError::ShapeMismatch(format!(
                "{} orbital names for {} orbitals", names.len(), self.norbitals())));
        }
        self.orbital_names = names;
        Ok(self)
    }


    pub fn nkpoints(&self) -> usize { self.bands.shape()[0] }
    pub fn nbands(&self) -> usize { self.bands.shape()[1] }
    /// Spin channels of the energies, 1 for non-collinear runs.
    pub fn nspins(&self) -> usize { self.bands.shape()[2] }
    /// Spin channels of the projections, 4 for non-collinear runs.
    pub fn nspin_channels(&self) -> usize { self.projections.shape()[2] }
    pub fn natoms(&self) -> usize { self.projections.shape()[3] }
    pub fn nprincipals(&self) -> usize { self.projections.shape()[4] }
    pub fn norbitals(&self) -> usize { self.projections.shape()[5] }

    pub fn is_non_collinear(&self) -> bool { self.is_non_collinear }
    pub fn kdirect(&self) -> bool { self.kdirect }
    pub fn kpoints(&self) -> &Matrix<f64> { &self.kpoints }
    pub fn bands(&self) -> &Cube<f64> { &self.bands }
    pub fn projections(&self) -> &na::Array6<f64> { &self.projections }
    pub fn phases(&self) -> Option<&na::Array6<c64>> { self.phases.as_ref() }
    pub fn kpoint_weights(&self) -> &Vector<f64> { &self.kpoint_weights }
    pub fn weights(&self) -> Option<&Cube<f64>> { self.weights.as_ref() }
    pub fn fermi(&self) -> Option<f64> { self.fermi }
    pub fn reciprocal_lattice(&self) -> &Mat33<f64> { &self.reciprocal_lattice }
    pub fn kpath(&self) -> Option<&KPath> { self.kpath.as_ref() }
    pub fn orbital_names(&self) -> &[String] { &self.orbital_names }
    pub fn state(&self) -> EbsState { self.state }


    /// Left-multiply every special point of the attached k-path by `m`.
    pub fn transform_kpath(&mut self, m: &Mat33<f64>) -> EbsResult<()> {
        self.kpath.as_mut()
            .ok_or(EbsError::MissingKPath)?
            .transform(m);
        Ok(())
    }


    /// Default spin selection: every channel for collinear runs, the total for non-collinear ones.
    pub fn default_spins(&self) -> Vec<usize> {
        if self.is_non_collinear {
            vec![0]
        } else {
            (0 .. self.nspin_channels()).collect()
        }
    }


    /// Sum the projections over the selected atoms, principal channels and orbitals.
    ///
    /// `None` selects everything on that axis, `principal_q_numbers` containing
    /// [`ALL_PRINCIPALS`] sums every principal channel. The result is `[nk, nb, nsel]` with
    /// one column per selected spin for collinear runs, and `[nk, nb, 1]` for non-collinear
    /// runs where the selected channels are summed together.
    ///
    /// An empty atom or orbital selection gives zeros, an out-of-range index is an error.
    pub fn ebs_sum(&self,
                   atoms: Option<&[usize]>,
                   principal_q_numbers: &[i32],
                   orbitals: Option<&[usize]>,
                   spins: Option<&[usize]>) -> EbsResult<Cube<f64>> {
        let atoms    = select_axis("atom", atoms, self.natoms())?;
        let orbitals = select_axis("orbital", orbitals, self.norbitals())?;
        let spins = match spins {
            Some(s) => select_axis("spin", Some(s), self.nspin_channels())?,
            None    => self.default_spins(),
        };
        let principals = self.select_principals(principal_q_numbers)?;

        let nk = self.nkpoints();
        let nb = self.nbands();
        let ncol = if self.is_non_collinear { 1 } else { spins.len() };
        let mut ret = Cube::<f64>::zeros((nk, nb, ncol));

        for ik in 0 .. nk {
            for ib in 0 .. nb {
                for (icol, &is) in spins.iter().enumerate() {
                    let mut acc = 0.0;
                    for &ia in atoms.iter() {
                        for &ip in principals.iter() {
                            for &io in orbitals.iter() {
                                acc += self.projections[[ik, ib, is, ia, ip, io]];
                            }
                        }
                    }
                    let icol = if self.is_non_collinear { 0 } else { icol };
                    ret[[ik, ib, icol]] += acc;
                }
            }
        }

        Ok(ret)
    }


    fn select_principals(&self, principal_q_numbers: &[i32]) -> EbsResult<Vec<usize>> {
        let np = self.nprincipals();
        if principal_q_numbers.contains(&ALL_PRINCIPALS) {
            return Ok((0 .. np).collect());
        }
        principal_q_numbers.iter()
            .map(|&p| {
                if p < 0 || p as usize >= np {
                    Err(EbsError::IndexOutOfRange { axis: "principal quantum number", index: p.unsigned_abs() as usize, len: np })
                } else {
                    Ok(p as usize)
                }
            })
            .collect()
    }


    /// Energies relative to the Fermi level (unshifted when it is unknown).
    pub fn bands_shifted(&self) -> Cube<f64> {
        &self.bands - self.fermi.unwrap_or(0.0)
    }


    /// K-points in cartesian coordinates (1/Å, 2π included).
    pub fn kpoints_cartesian(&self) -> Matrix<f64> {
        if !self.kdirect {
            return self.kpoints.clone();
        }
        let mut ret = Matrix::<f64>::zeros(self.kpoints.dim());
        for (k, mut row) in self.kpoints.rows().into_iter().zip(ret.rows_mut()) {
            let c = vec_dot_mat33(&[k[0], k[1], k[2]], &self.reciprocal_lattice);
            row.assign(&na::arr1(&c));
        }
        ret
    }


    /// K-points in fractional coordinates of the reciprocal lattice.
    pub fn kpoints_direct(&self) -> EbsResult<Matrix<f64>> {
        if self.kdirect {
            return Ok(self.kpoints.clone());
        }
        let inv = mat33_inv(&self.reciprocal_lattice)
            .ok_or_else(|| EbsError::InvalidTransform("reciprocal lattice is singular".into()))?;
        let mut ret = Matrix::<f64>::zeros(self.kpoints.dim());
        for (k, mut row) in self.kpoints.rows().into_iter().zip(ret.rows_mut()) {
            let d = vec_dot_mat33(&[k[0], k[1], k[2]], &inv);
            row.assign(&na::arr1(&d));
        }
        Ok(ret)
    }


    /// Cumulative path length along the k-points, used as the x axis of band plots.
    ///
    /// With a k-path attached, the step between two segments counts as zero.
    pub fn kdistances(&self) -> Vector<f64> {
        let kcart = self.kpoints_cartesian();
        let nk = self.nkpoints();
        let boundaries = self.kpath.as_ref()
            .map(|p| p.segment_ranges().into_iter().map(|r| r.start).collect::<Vec<_>>())
            .unwrap_or_default();

        let mut ret = Vector::<f64>::zeros(nk);
        for ik in 1 .. nk {
            let step = if boundaries.contains(&ik) {
                0.0
            } else {
                let d = &kcart.row(ik) - &kcart.row(ik - 1);
                d.dot(&d).sqrt()
            };
            ret[ik] = ret[ik - 1] + step;
        }
        ret
    }


    /// Tick positions on the `kdistances` axis with their labels.
    pub fn ticks(&self) -> Option<(Vec<f64>, Vec<String>)> {
        let kpath = self.kpath.as_ref()?;
        let kd = self.kdistances();
        Some((kpath.tick_positions(kd.as_slice()?), kpath.tick_names()))
    }
}


/// Validate an optional index selection against the axis length.
fn select_axis(axis: &'static str, sel: Option<&[usize]>, len: usize) -> EbsResult<Vec<usize>> {
    match sel {
        None => Ok((0 .. len).collect()),
        Some(v) => {
            if let Some(&index) = v.iter().find(|&&i| i >= len) {
                return Err(EbsError::IndexOutOfRange { axis, index, len });
            }
            Ok(v.to_vec())
        },
    }
}


#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    pub(crate) const CUBIC: Mat33<f64> = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

    /// Projections filled with a value depending on every index, so sums are checkable.
    pub(crate) fn synthetic(nk: usize, nb: usize, ns: usize, na_: usize, no: usize) -> Ebs {
        let kpoints = Matrix::<f64>::from_shape_fn((nk, 3), |(i, j)| if j == 0 { i as f64 * 0.1 } else { 0.0 });
        let bands = Cube::<f64>::from_shape_fn((nk, nb, ns), |(k, b, s)| b as f64 + 0.01 * k as f64 + 0.5 * s as f64);
        let projections = na::Array5::<f64>::from_shape_fn((nk, nb, ns, na_, no),
            |(k, b, s, a, o)| 0.001 * k as f64 + 0.01 * b as f64 + 0.1 * s as f64 + a as f64 + 0.3 * o as f64);
        Ebs::new(kpoints, bands, projections, CUBIC).unwrap()
    }

    #[test]
    fn test_shape_validation() {
        let kpoints = Matrix::<f64>::zeros((3, 3));
        let bands = Cube::<f64>::zeros((3, 2, 1));
        assert!(Ebs::new(kpoints.clone(), bands.clone(), na::Array5::zeros((2, 2, 1, 1, 1)), CUBIC).is_err());
        assert!(Ebs::new(kpoints.clone(), bands.clone(), na::Array5::zeros((3, 3, 1, 1, 1)), CUBIC).is_err());
        assert!(Ebs::new(kpoints.clone(), bands.clone(), na::Array5::zeros((3, 2, 2, 1, 1)), CUBIC).is_err());
        let ebs = Ebs::new(kpoints, bands, na::Array5::zeros((3, 2, 4, 1, 1)), CUBIC).unwrap();
        assert!(ebs.is_non_collinear());
        assert_eq!(ebs.nspins(), 1);
        assert_eq!(ebs.nspin_channels(), 4);
    }

    #[test]
    fn test_ebs_sum_single_cell() {
        let kpoints = Matrix::<f64>::zeros((3, 3));
        let bands = Cube::<f64>::zeros((3, 2, 1));
        let projections = na::Array5::<f64>::ones((3, 2, 1, 2, 1));
        let ebs = Ebs::new(kpoints, bands, projections, CUBIC).unwrap();

        let w = ebs.ebs_sum(Some(&[0]), &[ALL_PRINCIPALS], Some(&[0]), Some(&[0])).unwrap();
        assert_eq!(w.dim(), (3, 2, 1));
        assert!(w.iter().all(|&x| x == 1.0));
    }

    #[test]
    fn test_ebs_sum_full_reduction() {
        let ebs = synthetic(4, 3, 2, 3, 9);
        let w = ebs.ebs_sum(None, &[ALL_PRINCIPALS], None, None).unwrap();
        assert_eq!(w.dim(), (4, 3, 2));

        let expected = ebs.projections().sum_axis(na::Axis(5)).sum_axis(na::Axis(4)).sum_axis(na::Axis(3));
        for (a, b) in w.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1E-10);
        }
    }

    #[test]
    fn test_ebs_sum_empty_selection() {
        let ebs = synthetic(4, 3, 2, 3, 9);
        let w = ebs.ebs_sum(Some(&[]), &[ALL_PRINCIPALS], None, None).unwrap();
        assert_eq!(w.dim(), (4, 3, 2));
        assert!(w.iter().all(|&x| x == 0.0));

        let w = ebs.ebs_sum(None, &[ALL_PRINCIPALS], Some(&[]), Some(&[1])).unwrap();
        assert_eq!(w.dim(), (4, 3, 1));
        assert!(w.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_ebs_sum_out_of_range() {
        let ebs = synthetic(2, 2, 1, 2, 4);
        assert_eq!(ebs.ebs_sum(Some(&[2]), &[ALL_PRINCIPALS], None, None).unwrap_err(),
                   EbsError::IndexOutOfRange { axis: "atom", index: 2, len: 2 });
        assert!(ebs.ebs_sum(None, &[ALL_PRINCIPALS], Some(&[4]), None).is_err());
        assert!(ebs.ebs_sum(None, &[ALL_PRINCIPALS], None, Some(&[1])).is_err());
        assert!(ebs.ebs_sum(None, &[1], None, None).is_err());
        assert!(ebs.ebs_sum(None, &[0], None, None).is_ok());
    }

    #[test]
    fn test_ebs_sum_non_collinear_sums_spins() {
        let kpoints = Matrix::<f64>::zeros((2, 3));
        let bands = Cube::<f64>::zeros((2, 1, 1));
        let projections = na::Array5::<f64>::from_shape_fn((2, 1, 4, 1, 1), |(_, _, s, _, _)| s as f64 + 1.0);
        let ebs = Ebs::new(kpoints, bands, projections, CUBIC).unwrap();

        let w = ebs.ebs_sum(None, &[ALL_PRINCIPALS], None, None).unwrap();
        assert_eq!(w.dim(), (2, 1, 1));
        assert_eq!(w[[0, 0, 0]], 1.0);

        let w = ebs.ebs_sum(None, &[ALL_PRINCIPALS], None, Some(&[1, 3])).unwrap();
        assert_eq!(w[[1, 0, 0]], 6.0);
    }

    #[test]
    fn test_kdistances_with_kpath() {
        let ebs = synthetic(4, 1, 1, 1, 1);
        let kd = ebs.kdistances();
        assert_abs_diff_eq!(kd[3], 0.3, epsilon = 1E-12);

        let kpath = KPath::new(
            vec![[[0.0; 3], [0.1, 0.0, 0.0]], [[0.2, 0.0, 0.0], [0.3, 0.0, 0.0]]],
            vec![2, 2],
            vec![["G".into(), "X".into()], ["Y".into(), "M".into()]],
            true,
        ).unwrap();
        let ebs = ebs.with_kpath(kpath).unwrap();
        let kd = ebs.kdistances();
        assert_abs_diff_eq!(kd[1], 0.1, epsilon = 1E-12);
        assert_abs_diff_eq!(kd[2], 0.1, epsilon = 1E-12);
        assert_abs_diff_eq!(kd[3], 0.2, epsilon = 1E-12);

        let (pos, names) = ebs.ticks().unwrap();
        assert_eq!(names, vec!["G", "X|Y", "M"]);
        assert_abs_diff_eq!(pos[2], 0.2, epsilon = 1E-12);
    }

    #[test]
    fn test_with_kpath_mismatch() {
        let ebs = synthetic(5, 1, 1, 1, 1);
        let kpath = KPath::new(vec![[[0.0; 3], [0.5, 0.0, 0.0]]], vec![4], vec![["G".into(), "X".into()]], true).unwrap();
        assert!(ebs.with_kpath(kpath).is_err());
    }

    #[test]
    fn test_direct_cartesian() {
        let b = [[2.0, 0.0, 0.0], [0.0, 4.0, 0.0], [0.0, 0.0, 1.0]];
        let kpoints = na::arr2(&[[0.5, 0.25, 0.0]]);
        let ebs = Ebs::new(kpoints, Cube::zeros((1, 1, 1)), na::Array5::zeros((1, 1, 1, 1, 1)), b).unwrap();
        let c = ebs.kpoints_cartesian();
        assert_eq!(c.row(0).to_vec(), vec![1.0, 1.0, 0.0]);
        let ebs = ebs.with_fermi(1.0);
        assert_eq!(ebs.bands_shifted()[[0, 0, 0]], -1.0);
    }
}
