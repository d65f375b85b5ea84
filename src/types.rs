use anyhow::{
    bail,
    Context,
};
use ndarray::{
    Array1,
    Array2,
    Array3,
};
use num::complex::Complex;

pub type Result<T> = anyhow::Result<T>;

pub type Vector<T> = Array1<T>;  // Define this type to use broadcast operations.
pub type Matrix<T> = Array2<T>;
pub type Cube<T>   = Array3<T>;
pub type MatX3<T> = Vec<[T;3]>;  // Nx3 matrix
pub type Mat33<T> = [[T;3];3];   // 3x3 matrix

#[allow(non_camel_case_types)]
pub type c64 = Complex<f64>;


/// Parse a 1-based index range like `3`, `1..8` or `-3..-1` into the listed integers.
pub fn range_parse(input: &str) -> Result<Vec<i32>> {
    let input = input.trim();
    if let Some((l, r)) = input.split_once("..") {
        let l = l.parse::<i32>()
            .with_context(|| format!("Invalid range start {:?} in {:?}", l, input))?;
        let r = r.parse::<i32>()
            .with_context(|| format!("Invalid range end {:?} in {:?}", r, input))?;
        if l > r {
            bail!("Invalid range {:?}: start is larger than end.", input);
        }
        Ok((l ..= r).collect())
    } else {
        let i = input.parse::<i32>()
            .with_context(|| format!("Invalid index {:?}", input))?;
        Ok(vec![i])
    }
}


pub fn index_transform(v: Vec<i32>, len: usize) -> Vec<usize> {
    if v.contains(&0) {
        (1 ..= len).collect()
    } else {
        v.into_iter()
         .map(|i| {
            if i < 0 {
                i.rem_euclid(len as i32) as usize + 1
            } else {
                i as usize
            }
         })
        .collect()
    }
}


pub fn mat33_det(m: &Mat33<f64>) -> f64 {
    // |00 01 02|
    // |10 11 12|
    // |20 21 22|
    m[0][0] * (m[1][1] * m[2][2] - m[2][1] * m[1][2]) -
        m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0]) +
        m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}


/// Inverse of a 3x3 matrix, `None` when it is singular.
pub fn mat33_inv(m: &Mat33<f64>) -> Option<Mat33<f64>> {
    let det = mat33_det(m);
    if det.abs() < 1E-10 {
        return None;
    }

    let mut ret = [[0.0f64; 3]; 3];
    for i in 0 .. 3 {
        for j in 0 .. 3 {
            // cofactor of m[j][i], transposed in place
            let (r0, r1) = ((j + 1) % 3, (j + 2) % 3);
            let (c0, c1) = ((i + 1) % 3, (i + 2) % 3);
            ret[i][j] = (m[r0][c0] * m[r1][c1] - m[r0][c1] * m[r1][c0]) / det;
        }
    }
    Some(ret)
}


pub fn mat33_transpose(m: &Mat33<f64>) -> Mat33<f64> {
    let mut ret = [[0.0f64; 3]; 3];
    for i in 0 .. 3 {
        for j in 0 .. 3 {
            ret[i][j] = m[j][i];
        }
    }
    ret
}


pub fn mat33_mul(a: &Mat33<f64>, b: &Mat33<f64>) -> Mat33<f64> {
    let mut ret = [[0.0f64; 3]; 3];
    for i in 0 .. 3 {
        for j in 0 .. 3 {
            ret[i][j] = (0 .. 3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    ret
}


/// `m · v` with `v` treated as a column vector.
pub fn mat33_dot_vec(m: &Mat33<f64>, v: &[f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}


/// `v · m` with `v` treated as a row vector.
pub fn vec_dot_mat33(v: &[f64; 3], m: &Mat33<f64>) -> [f64; 3] {
    [
        v[0] * m[0][0] + v[1] * m[1][0] + v[2] * m[2][0],
        v[0] * m[0][1] + v[1] * m[1][1] + v[2] * m[2][1],
        v[0] * m[0][2] + v[1] * m[1][2] + v[2] * m[2][2],
    ]
}


pub fn mat33_max_abs_diff(a: &Mat33<f64>, b: &Mat33<f64>) -> f64 {
    a.iter().flatten()
        .zip(b.iter().flatten())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}
