use ndarray as na;
use log::info;

use super::Ebs;
use crate::{
    error::{
        EbsError,
        EbsResult,
    },
    types::{
        Cube,
        Matrix,
        Vector,
    },
};


/// Natural cubic spline through `ys` sampled at `0, 1, .., n-1`, evaluated at `ts`.
///
/// Two samples degrade to linear interpolation, a single sample is constant.
pub fn natural_cubic_spline(ys: &[f64], ts: &[f64]) -> Vec<f64> {
    let n = ys.len();
    match n {
        0 => return vec![0.0; ts.len()],
        1 => return vec![ys[0]; ts.len()],
        _ => (),
    }

    // second derivatives, M[0] = M[n-1] = 0, unit spacing:
    // M[i-1] + 4 M[i] + M[i+1] = 6 (y[i+1] - 2 y[i] + y[i-1])
    let mut m = vec![0.0f64; n];
    if n > 2 {
        let nin = n - 2;
        let mut cp = vec![0.0f64; nin];
        let mut dp = vec![0.0f64; nin];
        for i in 0 .. nin {
            let rhs = 6.0 * (ys[i + 2] - 2.0 * ys[i + 1] + ys[i]);
            let denom = 4.0 - if i > 0 { cp[i - 1] } else { 0.0 };
            cp[i] = 1.0 / denom;
            dp[i] = (rhs - if i > 0 { dp[i - 1] } else { 0.0 }) / denom;
        }
        for i in (0 .. nin).rev() {
            let next = if i + 1 < nin { m[i + 2] } else { 0.0 };
            m[i + 1] = dp[i] - cp[i] * next;
        }
    }

    ts.iter()
        .map(|&t| {
            let i = (t.floor().max(0.0) as usize).min(n - 2);
            let u = t - i as f64;
            let v = 1.0 - u;
            v * ys[i] + u * ys[i + 1]
                + ((v * v * v - v) * m[i] + (u * u * u - u) * m[i + 1]) / 6.0
        })
        .collect()
}


impl Ebs {
    /// Resample every k-path segment `factor` times denser.
    ///
    /// K-points are interpolated linearly, energies and projections with a natural cubic
    /// spline along each segment. Phases cannot be interpolated and are dropped.
    pub fn interpolate(&mut self, factor: usize) -> EbsResult<()> {
        if factor <= 1 {
            return Ok(());
        }
        if self.state.interpolated {
            return Err(EbsError::TransformAlreadyApplied("interpolate"));
        }
        if self.state.reordered || self.state.unfolded {
            return Err(EbsError::TransformAlreadyApplied(
                if self.state.unfolded { "unfold" } else { "reorder" }));
        }
        let kpath = self.kpath.as_ref().ok_or(EbsError::MissingKPath)?;

        let ranges = kpath.segment_ranges();
        let new_ngrids = kpath.interpolated_ngrids(factor);
        let new_nk: usize = new_ngrids.iter().sum();
        info!("Interpolating {} k-points into {} with factor {}.", self.nkpoints(), new_nk, factor);

        let nb = self.nbands();
        let ns = self.nspins();
        let pshape = self.projections.shape().to_owned();

        let mut kpoints = Matrix::<f64>::zeros((new_nk, 3));
        let mut bands = Cube::<f64>::zeros((new_nk, nb, ns));
        let mut projections = na::Array6::<f64>::zeros((new_nk, pshape[1], pshape[2], pshape[3], pshape[4], pshape[5]));
        let mut kpoint_weights = Vector::<f64>::zeros(new_nk);

        let mut offset = 0usize;
        for (range, &nnew) in ranges.iter().zip(new_ngrids.iter()) {
            let ts = (0 .. nnew).map(|j| j as f64 / factor as f64).collect::<Vec<f64>>();
            let dst = offset .. offset + nnew;

            let first = self.kpoints.row(range.start);
            let last  = self.kpoints.row(range.end - 1);
            let span  = (range.end - range.start - 1) as f64;
            for (j, &t) in ts.iter().enumerate() {
                let frac = t / span;
                let k = &first + &((&last - &first) * frac);
                kpoints.row_mut(offset + j).assign(&k);
                kpoint_weights[offset + j] = self.kpoint_weights[range.start];
            }

            for ib in 0 .. nb {
                for is in 0 .. ns {
                    let ys = self.bands.slice(na::s![range.clone(), ib, is]).to_vec();
                    let new = natural_cubic_spline(&ys, &ts);
                    bands.slice_mut(na::s![dst.clone(), ib, is]).assign(&na::Array1::from(new));
                }
            }

            for ib in 0 .. pshape[1] {
                for is in 0 .. pshape[2] {
                    for ia in 0 .. pshape[3] {
                        for ip in 0 .. pshape[4] {
                            for io in 0 .. pshape[5] {
                                let ys = self.projections.slice(na::s![range.clone(), ib, is, ia, ip, io]).to_vec();
                                let new = natural_cubic_spline(&ys, &ts)
                                    .into_iter()
                                    .map(|x| x.max(0.0))
                                    .collect::<na::Array1<f64>>();
                                projections.slice_mut(na::s![dst.clone(), ib, is, ia, ip, io]).assign(&new);
                            }
                        }
                    }
                }
            }

            offset += nnew;
        }

        self.kpoints = kpoints;
        self.bands = bands;
        self.projections = projections;
        self.kpoint_weights = kpoint_weights;
        self.phases = None;
        if let Some(kpath) = self.kpath.as_mut() {
            kpath.ngrids = new_ngrids;
        }
        self.state.interpolated = true;
        Ok(())
    }
}
