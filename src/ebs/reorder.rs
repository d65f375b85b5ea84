//! Band reordering across k-points.
//!
//! Energies at consecutive k-points are sorted, so two bands crossing each other swap
//! indices. Bands are tracked by the similarity of their orbital character instead: at
//! each step k -> k+1 a cost matrix
//!
//! ```text
//! C[i,j] = |p_i(k) - p_j(k+1)| + ENERGY_WEIGHT * |E_i(k) - E_j(k+1)|
//! ```
//!
//! is built from the flattened projection vectors `p`, and bands at k+1 are permuted by
//! the assignment of lowest total cost.

use ndarray as na;
use log::{
    debug,
    info,
};

use super::Ebs;
use crate::error::{
    EbsError,
    EbsResult,
};


/// Weight of the energy difference (per eV) relative to the projection distance.
const ENERGY_WEIGHT: f64 = 0.1;


/// Greedy assignment: pick the cheapest (i, j) pairs first.
///
/// Returns `perm` with `perm[i] = j`, meaning band `j` at the next k-point continues band `i`.
pub fn find_assignment(cost: &na::Array2<f64>) -> Vec<usize> {
    let (n, m) = cost.dim();
    let mut candidates: Vec<(f64, usize, usize)> = Vec::with_capacity(n * m);
    for ((i, j), &c) in cost.indexed_iter() {
        candidates.push((c, i, j));
    }
    candidates.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut assignment: Vec<Option<usize>> = vec![None; n];
    let mut used = vec![false; m];
    for (_, i, j) in candidates {
        if assignment[i].is_none() && !used[j] {
            assignment[i] = Some(j);
            used[j] = true;
        }
    }

    // Rows left over (n > m) keep their own index when free, never happens for square costs.
    let mut free = (0 .. m).filter(|&j| !used[j]);
    assignment.into_iter()
        .enumerate()
        .map(|(i, a)| a.or_else(|| free.next()).unwrap_or(i))
        .collect()
}


impl Ebs {
    /// Permute the band axis at every k-point so that bands stay continuous.
    pub fn reorder(&mut self) -> EbsResult<()> {
        if self.state.reordered {
            return Err(EbsError::TransformAlreadyApplied("reorder"));
        }

        let nk = self.nkpoints();
        let nb = self.nbands();
        let mut nswaps = 0usize;

        for is in 0 .. self.nspins() {
            // projection channels that move with this energy channel
            let channels: Vec<usize> = if self.is_non_collinear {
                (0 .. self.nspin_channels()).collect()
            } else {
                vec![is]
            };
            let ich = channels[0];

            for ik in 0 .. nk.saturating_sub(1) {
                let prev = self.projections.slice(na::s![ik, .., ich, .., .., ..])
                    .to_shape((nb, self.natoms() * self.nprincipals() * self.norbitals()))
                    .map_err(|e| EbsError::ShapeMismatch(e.to_string()))?
                    .to_owned();
                let next = self.projections.slice(na::s![ik + 1, .., ich, .., .., ..])
                    .to_shape((nb, self.natoms() * self.nprincipals() * self.norbitals()))
                    .map_err(|e| EbsError::ShapeMismatch(e.to_string()))?
                    .to_owned();

                let cost = na::Array2::<f64>::from_shape_fn((nb, nb), |(i, j)| {
                    let d = &prev.row(i) - &next.row(j);
                    d.dot(&d).sqrt()
                        + ENERGY_WEIGHT * (self.bands[[ik, i, is]] - self.bands[[ik + 1, j, is]]).abs()
                });

                let perm = find_assignment(&cost);
                if perm.iter().enumerate().all(|(i, &j)| i == j) {
                    continue;
                }
                nswaps += 1;
                debug!("Reordering bands at k-point {} of spin {}: {:?}", ik + 1, is, perm);
                self.permute_bands(ik + 1, is, &channels, &perm);
            }
        }

        info!("Bands reordered at {} k-point steps.", nswaps);
        self.state.reordered = true;
        Ok(())
    }


    /// New band `i` at `ik` takes the data of old band `perm[i]`.
    fn permute_bands(&mut self, ik: usize, is: usize, channels: &[usize], perm: &[usize]) {
        let old_bands = self.bands.slice(na::s![ik, .., is]).to_owned();
        for (i, &j) in perm.iter().enumerate() {
            self.bands[[ik, i, is]] = old_bands[j];
        }

        if let Some(w) = self.weights.as_mut() {
            let old = w.slice(na::s![ik, .., is]).to_owned();
            for (i, &j) in perm.iter().enumerate() {
                w[[ik, i, is]] = old[j];
            }
        }

        for &ich in channels {
            let old = self.projections.slice(na::s![ik, .., ich, .., .., ..]).to_owned();
            for (i, &j) in perm.iter().enumerate() {
                self.projections.slice_mut(na::s![ik, i, ich, .., .., ..])
                    .assign(&old.index_axis(na::Axis(0), j));
            }

            if let Some(phases) = self.phases.as_mut() {
                let old = phases.slice(na::s![ik, .., ich, .., .., ..]).to_owned();
                for (i, &j) in perm.iter().enumerate() {
                    phases.slice_mut(na::s![ik, i, ich, .., .., ..])
                        .assign(&old.index_axis(na::Axis(0), j));
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ebs::tests::CUBIC,
        types::{
            Cube,
            Matrix,
        },
    };

    #[test]
    fn test_find_assignment() {
        let cost = na::arr2(&[[0.9, 0.1], [0.2, 0.8]]);
        assert_eq!(find_assignment(&cost), vec![1, 0]);

        let cost = na::arr2(&[[0.0, 1.0, 1.0], [1.0, 0.0, 1.0], [1.0, 1.0, 0.0]]);
        assert_eq!(find_assignment(&cost), vec![0, 1, 2]);
    }

    /// Two bands crossing between k1 and k2: energies are sorted, characters swap.
    fn crossing() -> Ebs {
        let kpoints = Matrix::<f64>::zeros((3, 3));
        let bands = na::Array3::from_shape_vec((3, 2, 1), vec![
            0.0, 1.0,
            0.3, 0.7,
            0.4, 0.6,
        ]).unwrap();
        let mut projections = na::Array5::<f64>::zeros((3, 2, 1, 1, 2));
        projections[[0, 0, 0, 0, 0]] = 1.0;
        projections[[0, 1, 0, 0, 1]] = 1.0;
        projections[[1, 0, 0, 0, 0]] = 1.0;
        projections[[1, 1, 0, 0, 1]] = 1.0;
        projections[[2, 0, 0, 0, 1]] = 1.0;
        projections[[2, 1, 0, 0, 0]] = 1.0;
        Ebs::new(kpoints, bands, projections, CUBIC).unwrap()
    }

    #[test]
    fn test_reorder_follows_character() {
        let mut ebs = crossing();
        ebs.reorder().unwrap();

        let b: &Cube<f64> = ebs.bands();
        assert_eq!(b[[2, 0, 0]], 0.6);
        assert_eq!(b[[2, 1, 0]], 0.4);
        assert_eq!(ebs.projections()[[2, 0, 0, 0, 0, 0]], 1.0);
        assert_eq!(ebs.projections()[[2, 1, 0, 0, 0, 1]], 1.0);
        assert_eq!(b[[1, 0, 0]], 0.3);
        assert!(ebs.state().reordered);
    }

    #[test]
    fn test_reorder_twice_fails() {
        let mut ebs = crossing();
        ebs.reorder().unwrap();
        assert_eq!(ebs.reorder().unwrap_err(), EbsError::TransformAlreadyApplied("reorder"));
    }
}
