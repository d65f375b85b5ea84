//! High-symmetry k-path: segments between special points in reciprocal (direct) coordinates.
//!
//! Each segment is sampled by `ngrids[i]` k-points, both endpoints included, and the
//! k-points of consecutive segments follow each other in the band structure.

use std::ops::Range;

use crate::{
    error::{
        EbsError,
        EbsResult,
    },
    types::{
        Mat33,
        mat33_dot_vec,
        vec_dot_mat33,
    },
};


const KPOINT_TOLERANCE: f64 = 1E-6;


#[derive(Clone, Debug, PartialEq)]
pub struct KPath {
    pub special_kpoints   : Vec<[[f64; 3]; 2]>,
    pub ngrids            : Vec<usize>,
    pub knames            : Vec<[String; 2]>,
    pub has_time_reversal : bool,
}


impl KPath {
    pub fn new(special_kpoints: Vec<[[f64; 3]; 2]>,
               ngrids: Vec<usize>,
               knames: Vec<[String; 2]>,
               has_time_reversal: bool) -> EbsResult<Self> {
        if special_kpoints.is_empty() {
            return Err(EbsError::ShapeMismatch("k-path needs at least one segment".into()));
        }
        if special_kpoints.len() != ngrids.len() || special_kpoints.len() != knames.len() {
            return Err(EbsError::ShapeMismatch(format!(
                "k-path has {} segments, {} grid counts and {} label pairs",
                special_kpoints.len(), ngrids.len(), knames.len())));
        }
        if let Some(n) = ngrids.iter().find(|&&n| n < 2) {
            return Err(EbsError::ShapeMismatch(format!(
                "each k-path segment needs at least 2 points, got {}", n)));
        }

        Ok(Self { special_kpoints, ngrids, knames, has_time_reversal })
    }


    pub fn nsegments(&self) -> usize {
        self.special_kpoints.len()
    }


    /// Total number of k-points sampled along the path.
    pub fn nkpoints(&self) -> usize {
        self.ngrids.iter().sum()
    }


    /// Index ranges of the k-points belonging to each segment.
    pub fn segment_ranges(&self) -> Vec<Range<usize>> {
        let mut start = 0usize;
        self.ngrids.iter()
            .map(|&n| {
                let r = start .. start + n;
                start += n;
                r
            })
            .collect()
    }


    /// Left-multiply every special point by `m`, exactly once per segment endpoint.
    pub fn transform(&mut self, m: &Mat33<f64>) {
        for seg in self.special_kpoints.iter_mut() {
            for k in seg.iter_mut() {
                *k = mat33_dot_vec(m, k);
            }
        }
    }


    /// Whether segment `iseg` ends where segment `iseg + 1` starts.
    pub fn is_continuous(&self, iseg: usize) -> bool {
        if iseg + 1 >= self.nsegments() {
            return true;
        }
        let end   = self.special_kpoints[iseg][1];
        let start = self.special_kpoints[iseg + 1][0];
        end.iter().zip(start.iter()).all(|(a, b)| (a - b).abs() < KPOINT_TOLERANCE)
    }


    /// K-point indices where ticks are placed: the start of every segment and the end of the last one.
    pub fn tick_indices(&self) -> Vec<usize> {
        let ranges = self.segment_ranges();
        let mut ret = ranges.iter().map(|r| r.start).collect::<Vec<_>>();
        if let Some(last) = ranges.last() {
            ret.push(last.end - 1);
        }
        ret
    }


    /// Labels matching `tick_indices`, a discontinuous boundary is labelled `A|B`.
    pub fn tick_names(&self) -> Vec<String> {
        let nseg = self.nsegments();
        let mut ret = Vec::with_capacity(nseg + 1);
        ret.push(self.knames[0][0].clone());

        for iseg in 1 .. nseg {
            let prev_end = &self.knames[iseg - 1][1];
            let start    = &self.knames[iseg][0];
            if self.is_continuous(iseg - 1) || prev_end == start {
                ret.push(start.clone());
            } else {
                ret.push(format!("{}|{}", prev_end, start));
            }
        }

        ret.push(self.knames[nseg - 1][1].clone());
        ret
    }


    /// Tick positions picked out of the cumulative path length of the sampled k-points.
    pub fn tick_positions(&self, kdistances: &[f64]) -> Vec<f64> {
        self.tick_indices()
            .into_iter()
            .filter_map(|i| kdistances.get(i).copied())
            .collect()
    }


    /// Cartesian length of every segment.
    pub fn segment_lengths(&self, reciprocal_lattice: &Mat33<f64>) -> Vec<f64> {
        self.special_kpoints.iter()
            .map(|[a, b]| {
                let d = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
                let c = vec_dot_mat33(&d, reciprocal_lattice);
                (c[0] * c[0] + c[1] * c[1] + c[2] * c[2]).sqrt()
            })
            .collect()
    }


    /// Grid counts after resampling every segment `factor` times denser.
    pub fn interpolated_ngrids(&self, factor: usize) -> Vec<usize> {
        self.ngrids.iter()
            .map(|&n| (n - 1) * factor + 1)
            .collect()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn gxmg() -> KPath {
        KPath::new(
            vec![
                [[0.0, 0.0, 0.0], [0.5, 0.0, 0.0]],
                [[0.5, 0.0, 0.0], [0.5, 0.5, 0.0]],
                [[0.0, 0.0, 0.0], [0.5, 0.5, 0.5]],
            ],
            vec![3, 4, 2],
            vec![
                ["G".into(), "X".into()],
                ["X".into(), "M".into()],
                ["G".into(), "R".into()],
            ],
            true,
        ).unwrap()
    }

    #[test]
    fn test_new_rejects_inconsistent() {
        assert!(KPath::new(vec![], vec![], vec![], true).is_err());
        assert!(KPath::new(vec![[[0.0; 3]; 2]], vec![3, 3], vec![["G".into(), "X".into()]], true).is_err());
        assert!(KPath::new(vec![[[0.0; 3]; 2]], vec![1], vec![["G".into(), "X".into()]], true).is_err());
    }

    #[test]
    fn test_segment_ranges_and_ticks() {
        let kpath = gxmg();
        assert_eq!(kpath.nsegments(), 3);
        assert_eq!(kpath.nkpoints(), 9);
        assert_eq!(kpath.segment_ranges(), vec![0 .. 3, 3 .. 7, 7 .. 9]);
        assert_eq!(kpath.tick_indices(), vec![0, 3, 7, 8]);
        assert_eq!(kpath.tick_names(), vec!["G", "X", "M|G", "R"]);
    }

    #[test]
    fn test_transform_identity() {
        let mut kpath = gxmg();
        let orig = kpath.clone();
        kpath.transform(&[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);
        assert_eq!(kpath, orig);
    }

    #[test]
    fn test_transform_once_per_endpoint() {
        let mut kpath = gxmg();
        kpath.transform(&[[2.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);
        assert_eq!(kpath.special_kpoints[0][1], [1.0, 0.0, 0.0]);
        assert_eq!(kpath.special_kpoints[1][0], [1.0, 0.0, 0.0]);
        assert_eq!(kpath.special_kpoints[1][1], [1.0, 0.5, 0.0]);
        assert_eq!(kpath.special_kpoints[2][1], [1.0, 0.5, 0.5]);
    }

    #[test]
    fn test_tick_positions_and_lengths() {
        let kpath = gxmg();
        let kd = (0 .. 9).map(|i| i as f64 * 0.5).collect::<Vec<_>>();
        assert_eq!(kpath.tick_positions(&kd), vec![0.0, 1.5, 3.5, 4.0]);

        let b = [[2.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 2.0]];
        let lengths = kpath.segment_lengths(&b);
        assert!((lengths[0] - 1.0).abs() < 1E-12);
        assert!((lengths[1] - 1.0).abs() < 1E-12);
        assert!((lengths[2] - 3f64.sqrt()).abs() < 1E-12);
    }

    #[test]
    fn test_interpolated_ngrids() {
        assert_eq!(gxmg().interpolated_ngrids(3), vec![7, 10, 4]);
    }
}
