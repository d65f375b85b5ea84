//! Display modes and the weight arrays they draw with.
//!
//! A mode string from the configuration is parsed once into [`PlotMode`] and
//! [`UnfoldMode`]; everything downstream matches on the enums. Atom and orbital
//! selections reaching this module are already integer indices.

use std::str::FromStr;

use log::warn;
use ndarray::{
    s,
    Array3,
};

use crate::{
    ebs::{
        Ebs,
        ALL_PRINCIPALS,
    },
    error::{
        EbsError,
        EbsResult,
    },
    orbitals::{
        available_groups,
        orbital_group,
        resolve_orbital_names,
    },
    structure::Structure,
    types::{
        Cube,
        Mat33,
        Result,
        mat33_inv,
    },
};


#[derive(Clone, Debug, PartialEq)]
pub enum OrbitalSpec {
    Names(Vec<String>),
    Indices(Vec<usize>),
}


/// One overlay series: the atoms of `species`, restricted to some orbitals.
#[derive(Clone, Debug, PartialEq)]
pub struct OverlayItem {
    pub species  : String,
    pub orbitals : OrbitalSpec,
}


impl OverlayItem {
    /// `Fe-dp` for names, `Fe-4_5_6` for indices.
    pub fn label(&self) -> String {
        match &self.orbitals {
            OrbitalSpec::Names(n)   => format!("{}-{}", self.species, n.join("")),
            OrbitalSpec::Indices(i) => format!("{}-{}", self.species,
                i.iter().map(|x| x.to_string()).collect::<Vec<_>>().join("_")),
        }
    }
}


#[derive(Clone, Debug, PartialEq)]
pub enum OverlayKind {
    Species,
    Orbitals,
    Items(Vec<OverlayItem>),
}


#[derive(Clone, Debug, PartialEq)]
pub enum PlotMode {
    Plain,
    Order { reorder: bool },
    Overlay(OverlayKind),
    Parametric,
    Scatter,
}


const PLOT_MODES: &str = "plain, order, overlay, overlay_species, overlay_orbitals, parametric, scatter";


impl PlotMode {
    /// Parse a mode name, `items` are only used by the `overlay` mode.
    pub fn parse(mode: &str, reorder: bool, items: Vec<OverlayItem>) -> EbsResult<Self> {
        Ok(match mode.trim().to_ascii_lowercase().as_str() {
            "plain"             => Self::Plain,
            "order"             => Self::Order { reorder },
            "overlay"           => Self::Overlay(OverlayKind::Items(items)),
            "overlay_species"   => Self::Overlay(OverlayKind::Species),
            "overlay_orbitals"  => Self::Overlay(OverlayKind::Orbitals),
            "parametric"        => Self::Parametric,
            "scatter"           => Self::Scatter,
            _ => return Err(EbsError::UnsupportedMode(mode.to_string(), PLOT_MODES)),
        })
    }


    /// Parametric and scatter plots draw with composed color/width weights.
    pub fn is_weighted(&self) -> bool {
        matches!(self, Self::Parametric | Self::Scatter)
    }
}


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnfoldMode {
    /// Only map the k-path onto the primitive cell, keep the weights.
    KPath,
    /// Unfolded weights drive the line width.
    Thickness,
    /// Unfolded weights drive the color.
    Color,
    /// Unfolded weights replace whichever of color/width is already weighted.
    Both,
}


impl FromStr for UnfoldMode {
    type Err = EbsError;

    fn from_str(s: &str) -> EbsResult<Self> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "kpath"     => Self::KPath,
            "thickness" => Self::Thickness,
            "color"     => Self::Color,
            "both"      => Self::Both,
            _ => return Err(EbsError::UnsupportedMode(s.to_string(), "kpath, thickness, color, both")),
        })
    }
}


/// Unfold the band structure, then map its k-path back onto the primitive cell.
///
/// The k-path is only transformed after a successful unfolding, `KPath` mode skips the
/// unfolding itself.
pub fn apply_unfolding(ebs: &mut Ebs,
                       mode: UnfoldMode,
                       transformation_matrix: &Mat33<f64>,
                       structure: Option<&Structure>) -> Result<()> {
    if mode != UnfoldMode::KPath {
        let structure = structure.ok_or_else(|| anyhow::anyhow!(
            "Unfolding needs the supercell structure, please provide a POSCAR."))?;
        ebs.unfold(transformation_matrix, structure)?;
    }

    let inv = mat33_inv(transformation_matrix)
        .ok_or_else(|| EbsError::InvalidTransform(format!("matrix {:?} is singular", transformation_matrix)))?;

    if ebs.kpath().is_some() {
        ebs.transform_kpath(&inv)?;
    } else {
        warn!("No k-path available, skip mapping special k-points onto the primitive cell.");
    }
    Ok(())
}


/// Index selection handed to the aggregator.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Selection {
    pub atoms    : Option<Vec<usize>>,
    pub orbitals : Option<Vec<usize>>,
    pub spins    : Option<Vec<usize>>,
}


impl Selection {
    /// Summed projections laid out like the energies, `[nk, nb, nspins]`.
    ///
    /// Spin channels left out of the selection stay zero. Non-collinear runs give the
    /// selected magnetization channels summed into the single energy channel.
    pub fn sum(&self, ebs: &Ebs) -> EbsResult<Cube<f64>> {
        self.sum_over(ebs, self.atoms.as_deref(), self.orbitals.as_deref())
    }


    fn sum_over(&self, ebs: &Ebs, atoms: Option<&[usize]>, orbitals: Option<&[usize]>) -> EbsResult<Cube<f64>> {
        let w = ebs.ebs_sum(atoms, &[ALL_PRINCIPALS], orbitals, self.spins.as_deref())?;
        if ebs.is_non_collinear() {
            return Ok(w);
        }

        let spins = self.spins.clone().unwrap_or_else(|| ebs.default_spins());
        if spins.iter().copied().eq(0 .. ebs.nspins()) {
            return Ok(w);
        }
        let mut ret = Cube::<f64>::zeros((ebs.nkpoints(), ebs.nbands(), ebs.nspins()));
        for (icol, &is) in spins.iter().enumerate() {
            ret.slice_mut(s![.., .., is]).assign(&w.slice(s![.., .., icol]));
        }
        Ok(ret)
    }


    /// Energy spin channels to draw.
    pub fn plotted_spins(&self, ebs: &Ebs) -> Vec<usize> {
        if ebs.is_non_collinear() {
            vec![0]
        } else {
            self.spins.clone().unwrap_or_else(|| ebs.default_spins())
        }
    }
}


/// Which weights the caller wants to draw with, and the mask thresholds.
#[derive(Clone, Debug, PartialEq)]
pub struct WeightRequest {
    pub weighted_color  : bool,
    pub weighted_width  : bool,
    pub projection_mask : Option<f64>,
    pub unfold_mask     : Option<f64>,
}


impl Default for WeightRequest {
    fn default() -> Self {
        Self {
            weighted_color  : true,
            weighted_width  : false,
            projection_mask : None,
            unfold_mask     : None,
        }
    }
}


/// Composed weights, `None` meaning uniform.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WeightPlan {
    pub color_weights : Option<Cube<f64>>,
    pub width_weights : Option<Cube<f64>>,
    pub color_mask    : Option<Array3<bool>>,
    pub width_mask    : Option<Array3<bool>>,
}


fn threshold_mask(weights: Option<&Cube<f64>>, threshold: Option<f64>) -> Option<Array3<bool>> {
    match (weights, threshold) {
        (Some(w), Some(t)) => Some(w.mapv(|x| x >= t)),
        _ => None,
    }
}


/// Decide the color and width weights for parametric and scatter plots.
///
/// Projection weights go to each axis the caller asked for. Unfolded weights then take
/// over: `Thickness` and `Color` force their axis, `Both` only replaces axes that were
/// already weighted. `KPath` never unfolds, so the projection weights are kept as they are.
pub fn compose_weights(ebs: &Ebs,
                       selection: &Selection,
                       request: &WeightRequest,
                       unfold_mode: Option<UnfoldMode>) -> EbsResult<WeightPlan> {
    let projected = selection.sum(ebs)?;

    let mut color_weights = request.weighted_color.then(|| projected.clone());
    let mut width_weights = request.weighted_width.then(|| projected.clone());
    let mut color_mask = threshold_mask(color_weights.as_ref(), request.projection_mask);
    let mut width_mask = threshold_mask(width_weights.as_ref(), request.projection_mask);

    let unfolded = ebs.weights();
    let unfold_mask = threshold_mask(unfolded, request.unfold_mask);

    match (unfold_mode, unfolded) {
        (None, _) | (Some(UnfoldMode::KPath), _) => (),
        (Some(mode), None) => {
            warn!("Unfolding mode {:?} requested but the band structure is not unfolded.", mode);
        },
        (Some(UnfoldMode::Thickness), Some(w)) => {
            width_weights = Some(w.clone());
            width_mask = unfold_mask;
        },
        (Some(UnfoldMode::Color), Some(w)) => {
            color_weights = Some(w.clone());
            color_mask = unfold_mask;
        },
        (Some(UnfoldMode::Both), Some(w)) => {
            if request.weighted_width {
                width_weights = Some(w.clone());
                width_mask = unfold_mask.clone();
            }
            if request.weighted_color {
                color_weights = Some(w.clone());
                color_mask = unfold_mask;
            }
        },
    }

    Ok(WeightPlan { color_weights, width_weights, color_mask, width_mask })
}


/// One labelled weight array per overlay series.
pub fn overlay_weights(ebs: &Ebs,
                       kind: &OverlayKind,
                       structure: Option<&Structure>,
                       selection: &Selection) -> Result<Vec<(String, Cube<f64>)>> {
    let need_structure = || structure.ok_or_else(|| anyhow::anyhow!(
        "Overlay by species needs the structure, please provide a POSCAR."));

    let mut ret = vec![];
    match kind {
        OverlayKind::Species => {
            let structure = need_structure()?;
            for species in structure.species() {
                let atoms = structure.atoms_of_species(species);
                let w = selection.sum_over(ebs, Some(&atoms), selection.orbitals.as_deref())?;
                ret.push((species.clone(), w));
            }
        },
        OverlayKind::Orbitals => {
            for group in available_groups(ebs.norbitals()) {
                let orbitals = orbital_group(group).unwrap_or(&[]);
                let w = selection.sum_over(ebs, selection.atoms.as_deref(), Some(orbitals))?;
                ret.push((group.to_string(), w));
            }
        },
        OverlayKind::Items(items) => {
            let structure = need_structure()?;
            for item in items {
                let atoms = structure.atoms_of_species(&item.species);
                if atoms.is_empty() {
                    warn!("Species {:?} not found in the structure, its series is all zero.", item.species);
                }
                let orbitals = match &item.orbitals {
                    OrbitalSpec::Names(n)   => resolve_orbital_names(n, ebs.norbitals())?,
                    OrbitalSpec::Indices(i) => i.clone(),
                };
                let w = selection.sum_over(ebs, Some(&atoms), Some(&orbitals))?;
                ret.push((item.label(), w));
            }
        },
    }

    Ok(ret)
}
