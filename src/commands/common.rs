use serde::{
    Serialize,
    Deserialize,
};
use log::warn;
use anyhow::{
    bail,
    ensure,
    Context,
};
use plotly::common::ColorScalePalette;
use regex::Regex;

use crate::{
    error::EbsError,
    orbitals::{
        orbital_group,
        resolve_orbital_names,
    },
    structure::Structure,
    types::{
        Result,
        range_parse,
        index_transform,
    },
};


/// CSS color names accepted besides hex codes and `rgb()`/`rgba()`.
const NAMED_COLORS: &[&str] = &[
    "black",     "white",     "gray",      "grey",      "lightgray", "lightgrey", "darkgray",  "darkgrey",
    "red",       "darkred",   "crimson",   "tomato",    "coral",     "salmon",    "orange",    "darkorange",
    "gold",      "yellow",    "olive",     "green",     "darkgreen", "lime",      "teal",      "cyan",
    "blue",      "darkblue",  "navy",      "royalblue", "steelblue", "lightblue", "purple",    "indigo",
    "violet",    "magenta",   "pink",      "brown",     "maroon",    "transparent",
];


const PALETTES: &[(&str, ColorScalePalette)] = &[
    ("blackbody", ColorScalePalette::Blackbody),
    ("bluered",   ColorScalePalette::Bluered),
    ("blues",     ColorScalePalette::Blues),
    ("cividis",   ColorScalePalette::Cividis),
    ("earth",     ColorScalePalette::Earth),
    ("electric",  ColorScalePalette::Electric),
    ("greens",    ColorScalePalette::Greens),
    ("greys",     ColorScalePalette::Greys),
    ("hot",       ColorScalePalette::Hot),
    ("jet",       ColorScalePalette::Jet),
    ("picnic",    ColorScalePalette::Picnic),
    ("portland",  ColorScalePalette::Portland),
    ("rainbow",   ColorScalePalette::Rainbow),
    ("rdbu",      ColorScalePalette::RdBu),
    ("reds",      ColorScalePalette::Reds),
    ("viridis",   ColorScalePalette::Viridis),
    ("ylgnbu",    ColorScalePalette::YlGnBu),
    ("ylorrd",    ColorScalePalette::YlOrRd),
];


const ISPIN2_CHANNELS: &[(&str, usize)] = &[("up", 0), ("u", 0), ("down", 1), ("dn", 1), ("d", 1)];
const NCL_CHANNELS: &[(&str, usize)] = &[("tot", 0), ("t", 0), ("x", 1), ("y", 2), ("z", 3)];


/// Spin, atom and orbital selections as written in the configuration file.
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct RawSelection {
    pub spins:      Option<String>,
    pub atoms:      Option<String>,
    pub orbitals:   Option<String>,
}


impl RawSelection {
    /// Spin channels named in `input`, sorted and deduplicated, all of them if left blank.
    ///
    /// ISPIN = 2 runs take `up` and `down` (`u`, `d`, `dn`), non-collinear runs take `tot`, `x`,
    /// `y` and `z`, with the total as default. Runs without spin polarization have a single
    /// channel, picked whatever the input.
    pub fn parse_ispins(input: Option<&str>, nspin: usize, is_ncl: bool) -> Result<Vec<usize>> {
        let (channels, default) = match (is_ncl, nspin) {
            (true, _)  => (NCL_CHANNELS, vec![0]),
            (false, 2) => (ISPIN2_CHANNELS, vec![0, 1]),
            _ => {
                if input.is_some() {
                    warn!("[BAND]: Only one spin channel in this run, the spin selection is ignored.");
                }
                return Ok(vec![0]);
            },
        };

        let Some(input) = input else {
            return Ok(default);
        };
        ensure!(!input.trim().is_empty(), "[BAND]: No spin channel selected.");

        let mut ret = input.split_whitespace()
            .map(|token| channels.iter()
                 .find(|(name, _)| name.eq_ignore_ascii_case(token))
                 .map(|(_, i)| *i)
                 .with_context(|| format!("[BAND]: Invalid spin channel {:?}, available: {}", token,
                     channels.iter().map(|(name, _)| *name).collect::<Vec<_>>().join(" "))))
            .collect::<Result<Vec<usize>>>()?;
        ret.sort();
        ret.dedup();
        Ok(ret)
    }


    /// Parse the atom selection, each token is either an index range counting from 1 or a
    /// species label.
    ///
    /// Negative indices are allowed to index from tail, indices beyond either end are an
    /// error. Species labels need the structure.
    /// All the indices are sorted and deduplicated.
    pub fn parse_iatoms(input: Option<&str>, nions: usize, structure: Option<&Structure>) -> Result<Vec<usize>> {
        if let Some(atoms) = input {
            let mut ret = vec![];
            for token in atoms.split_whitespace() {
                let starts_like_index = token.starts_with(|c: char| c.is_ascii_digit() || c == '-');
                if starts_like_index {
                    let v = range_parse(token)?;
                    if let Some(&i) = v.iter().find(|i| i.unsigned_abs() as usize > nions) {
                        return Err(EbsError::IndexOutOfRange {
                            axis: "atoms",
                            index: i.unsigned_abs() as usize - 1,
                            len: nions,
                        }.into());
                    }
                    ret.extend(index_transform(v, nions).into_iter().map(|x| x - 1));
                } else {
                    let structure = structure.with_context(||
                        format!("[BAND]: Atom label {:?} needs a POSCAR to be resolved.", token))?;
                    let found = structure.atoms_of_species(token);
                    if found.is_empty() {
                        bail!("[BAND]: Species {:?} not found, available species: {:?}", token, structure.species());
                    }
                    ret.extend(found);
                }
            }

            if ret.is_empty() {
                bail!("[BAND]: No atoms selected.");
            }

            ret.sort();
            ret.dedup();
            Ok(ret)
        } else {  // All atoms selected if left blank
            Ok((0 .. nions).collect::<Vec<usize>>())
        }
    }


    /// Parse the orbitals' names and convert to orbital indices.
    ///
    /// Group names (`s`, `p`, `d`, `f`) and the names in the PROCAR header are accepted.
    /// Indices are sorted and deduplicated.
    pub fn parse_iorbits(input: Option<&str>, nlm: &[String]) -> Result<Vec<usize>> {
        if let Some(orbits) = input {
            if orbits.trim().is_empty() {
                bail!("[BAND]: No orbitals selected.");
            }

            let mut ret = vec![];
            for x in orbits.split_whitespace() {
                if let Some(i) = nlm.iter().position(|x2| x2 == x) {
                    ret.push(i);
                } else if orbital_group(x).is_some() || nlm.len() >= 4 {
                    ret.extend(resolve_orbital_names(&[x], nlm.len())
                        .context(format!("Selected orbital {:?} not available in {:?}", x, &nlm))?);
                } else {
                    bail!("Selected orbital {:?} not available in {:?}", x, &nlm);
                }
            }

            ret.sort();
            ret.dedup();

            Ok(ret)
        } else {
            Ok((0 .. nlm.len()).collect::<Vec<usize>>())
        }
    }


    /// Check a curve color: a hex code, `rgb(r, g, b)`, `rgba(r, g, b, a)` or one of a few CSS names.
    pub fn parse_color(input: &str) -> Result<String> {
        let code = Regex::new(r"^(?:#(?:[0-9a-fA-F]{3}|[0-9a-fA-F]{6}|[0-9a-fA-F]{8})|rgba?\(\s*\d+\s*,\s*\d+\s*,\s*\d+\s*(?:,\s*[0-9.]+\s*)?\))$")?;
        ensure!(code.is_match(input) || NAMED_COLORS.contains(&input.to_ascii_lowercase().as_str()),
            "Invalid color {:?}, use a hex code, rgb(r, g, b) or one of {:?}", input, NAMED_COLORS);
        Ok(input.to_owned())
    }


    pub fn parse_colormap(input: &str) -> Result<ColorScalePalette> {
        PALETTES.iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(input.trim()))
            .map(|(_, palette)| palette.clone())
            .with_context(|| format!("Invalid colormap {:?}, available colormaps: {}", input,
                PALETTES.iter().map(|(name, _)| *name).collect::<Vec<_>>().join(" ")))
    }
}
