use std::path::PathBuf;

use anyhow::{
    ensure,
    Context,
};
use clap::Args;
use colored::Colorize;
use log::{
    info,
    warn,
};

use crate::{
    OptProcess,
    kpath::KPath,
    loader::resolve_reciprocal_lattice,
    types::{
        Mat33,
        Result,
        mat33_inv,
    },
    vasp_parsers::{
        Kpoints,
        Outcar,
        Poscar,
    },
};


#[derive(Debug, Args)]
/// Print the k-path of a line-mode KPOINTS: segments, lengths and tick positions.
///
/// With `--transformation-matrix` the special points are also mapped onto the primitive cell,
/// as done before plotting unfolded bands.
pub struct Kpath {
    #[arg(default_value = "./KPOINTS")]
    /// Line-mode KPOINTS file path.
    kpoints: PathBuf,

    #[arg(long, default_value = "./OUTCAR")]
    /// OUTCAR file path, the reciprocal lattice is read from it if present.
    outcar: PathBuf,

    #[arg(long, default_value = "./POSCAR")]
    /// POSCAR file path, the fallback of the reciprocal lattice.
    poscar: PathBuf,

    #[arg(short = 't', long, num_args(9), allow_negative_numbers = true)]
    /// Supercell lattice in units of the primitive one, row by row.
    ///
    /// Example: -t 2 0 0 0 2 0 0 0 1
    transformation_matrix: Vec<f64>,
}


/// Cumulative path length at every tick, boundaries between segments add nothing.
pub fn tick_distances(lengths: &[f64]) -> Vec<f64> {
    let mut ret = Vec::with_capacity(lengths.len() + 1);
    let mut acc = 0.0;
    ret.push(acc);
    for l in lengths {
        acc += l;
        ret.push(acc);
    }
    ret
}


fn format_kpoint(k: &[f64; 3]) -> String {
    format!("({:7.4},{:7.4},{:7.4})", k[0], k[1], k[2])
}


/// Render the k-path as a table, `primitive` holds the mapped copy of `kpath` if any.
pub fn kpath_table(kpath: &KPath, primitive: Option<&KPath>, reciprocal_lattice: &Mat33<f64>) -> String {
    let lengths = kpath.segment_lengths(reciprocal_lattice);

    let mut output = String::with_capacity(128 * (kpath.nsegments() + 4));
    output.push_str("--------------------------------------------------------------------------------\n");
    output.push_str(&format!(" {:>3}  {:^8} {:^24}  {:^8} {:^24} {:>5} {:>8}\n",
                             "#", "From", "", "To", "", "N", "Length"));
    for iseg in 0 .. kpath.nsegments() {
        let [a, b] = &kpath.special_kpoints[iseg];
        let [na, nb] = &kpath.knames[iseg];
        output.push_str(&format!(" {:>3}  {:^8} {}  {:^8} {} {:>5} {:>8}\n",
                                 iseg + 1,
                                 na.bright_green(), format_kpoint(a),
                                 nb.bright_green(), format_kpoint(b),
                                 kpath.ngrids[iseg],
                                 format!("{:8.4}", lengths[iseg]).bright_cyan()));
        if let Some(p) = primitive {
            let [pa, pb] = &p.special_kpoints[iseg];
            output.push_str(&format!("      {:^8} {}  {:^8} {}\n",
                                     "", format_kpoint(pa).bright_yellow(),
                                     "", format_kpoint(pb).bright_yellow()));
        }
        if !kpath.is_continuous(iseg) {
            output.push_str(&format!("      {}\n", "discontinuous".bright_red()));
        }
    }

    output.push_str("--------------------------------------------------------------------------------\n");
    output.push_str(" Ticks:");
    for (name, pos) in kpath.tick_names().iter().zip(tick_distances(&lengths)) {
        output.push_str(&format!("  {} @ {:.4}", name.bright_green(), pos));
    }
    output.push('\n');
    output.push_str("--------------------------------------------------------------------------------");
    output
}


impl Kpath {
    fn reciprocal_lattice(&self) -> Mat33<f64> {
        let outcar = if self.outcar.is_file() {
            Outcar::from_file(&self.outcar)
                .map_err(|e| warn!("OUTCAR skipped: {:?}", e))
                .ok()
        } else {
            None
        };
        let structure = if self.poscar.is_file() {
            Poscar::from_file(&self.poscar)
                .and_then(|p| p.to_structure())
                .map_err(|e| warn!("POSCAR skipped: {:?}", e))
                .ok()
        } else {
            None
        };

        resolve_reciprocal_lattice(None, outcar.as_ref(), structure.as_ref())
            .unwrap_or_else(|| {
                warn!("No reciprocal lattice available, lengths are measured in direct coordinates.");
                [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]
            })
    }


    fn transformation_matrix(&self) -> Result<Option<Mat33<f64>>> {
        if self.transformation_matrix.is_empty() {
            return Ok(None);
        }
        ensure!(self.transformation_matrix.len() == 9, "Transformation matrix needs 9 numbers.");
        let t = &self.transformation_matrix;
        Ok(Some([[t[0], t[1], t[2]], [t[3], t[4], t[5]], [t[6], t[7], t[8]]]))
    }
}


impl OptProcess for Kpath {
    fn process(&self) -> Result<()> {
        let kpath = Kpoints::from_file(&self.kpoints)?.to_kpath(true)?;
        let recip = self.reciprocal_lattice();

        let primitive = match self.transformation_matrix()? {
            Some(t) => {
                let inv = mat33_inv(&t).context("Transformation matrix is singular.")?;
                let mut p = kpath.clone();
                p.transform(&inv);
                info!("Special points mapped onto the primitive cell are shown below the originals.");
                Some(p)
            },
            None => None,
        };

        println!("{}", kpath_table(&kpath, primitive.as_ref(), &recip));
        Ok(())
    }
}
