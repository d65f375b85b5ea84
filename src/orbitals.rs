//! Canonical orbital ordering of the projection axis, and name to index resolution.

use anyhow::bail;

use crate::types::Result;


/// lm-decomposed orbitals in the order VASP writes them to PROCAR.
pub const LM_NAMES: [&str; 16] = [
    "s",
    "py", "pz", "px",
    "dxy", "dyz", "dz2", "dxz", "x2-y2",
    "fy3x2", "fxyz", "fyz2", "fz3", "fxz2", "fzx2", "fx3",
];


/// Orbital groups and the channel indices they comprise.
pub const ORBITAL_GROUPS: [(&str, &[usize]); 4] = [
    ("s", &[0]),
    ("p", &[1, 2, 3]),
    ("d", &[4, 5, 6, 7, 8]),
    ("f", &[9, 10, 11, 12, 13, 14, 15]),
];


pub fn orbital_group(name: &str) -> Option<&'static [usize]> {
    ORBITAL_GROUPS.iter()
        .find(|(n, _)| *n == name)
        .map(|(_, v)| *v)
}


/// Names of the orbital groups whose channels all fit in a basis of `norbitals`.
pub fn available_groups(norbitals: usize) -> Vec<&'static str> {
    ORBITAL_GROUPS.iter()
        .filter(|(_, g)| g.iter().all(|&i| i < norbitals))
        .map(|(n, _)| *n)
        .collect()
}


/// Resolve group names (`s`, `p`, `d`, `f`) or single lm names (`px`, `dxy`, ...) into
/// sorted, deduplicated channel indices.
pub fn resolve_orbital_names<S: AsRef<str>>(names: &[S], norbitals: usize) -> Result<Vec<usize>> {
    let mut ret = vec![];
    for name in names.iter().map(|n| n.as_ref().trim()) {
        let group = if let Some(g) = orbital_group(name) {
            g.to_vec()
        } else if let Some(i) = LM_NAMES.iter().position(|n| *n == name || (name == "dx2" && *n == "x2-y2")) {
            vec![i]
        } else {
            bail!("Unknown orbital {:?}, available orbitals: s p d f {:?}", name, &LM_NAMES[.. norbitals.min(16)]);
        };

        if let Some(&i) = group.iter().find(|&&i| i >= norbitals) {
            bail!("Orbital {:?} (channel {}) is not available, this basis has only {} orbitals.", name, i, norbitals);
        }
        ret.extend(group);
    }

    ret.sort();
    ret.dedup();
    Ok(ret)
}
