use std::{
    fs,
    io::{
        BufWriter,
        Write,
    },
    path::{
        Path,
        PathBuf,
    },
};

use anyhow::{
    ensure,
    Context,
};
use clap::Args;
use figment::{
    Figment,
    providers::{
        Format,
        Serialized,
        Toml,
    },
};
use indexmap::IndexMap;
use itertools::iproduct;
use log::{
    error,
    info,
    warn,
};
use ndarray::s;
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    OptProcess,
    commands::{
        common::RawSelection,
        render::{
            BandRenderer,
            PlotlyRenderer,
            Style,
        },
    },
    ebs::Ebs,
    error::{
        EbsError,
        EbsResult,
    },
    loader::{
        self,
        Loaded,
        LoaderInput,
    },
    structure::Structure,
    types::{
        Cube,
        Mat33,
        Result,
        Vector,
    },
    weights::{
        OrbitalSpec,
        OverlayItem,
        PlotMode,
        Selection,
        UnfoldMode,
        WeightRequest,
        apply_unfolding,
        compose_weights,
        overlay_weights,
    },
};


const TEMPLATE_FNAME: &str = "band_template.toml";

const TEMPLATE_HEADER: &str = "\
# Configuration of `rsbands band`, every field below is at its default.
#
# mode: plain, order, overlay, overlay_species, overlay_orbitals, parametric or scatter.
# unfold_mode: kpath, thickness, color or both, needs `transformation_matrix` and a POSCAR.
# selection.atoms: 1-based ranges like \"1..4 -1\" or species labels like \"Ga As\".
# selection.orbitals: PROCAR orbital names or groups s, p, d and f.
# selection.spins: \"up down\" for ISPIN = 2, \"x y z tot\" for non-collinear runs.
# items: species = [orbitals] pairs of the `overlay` mode, e.g. Ga = [\"s\", \"p\"].
# kticks, knames: tick k-point indices (from 0) and labels, e.g. kticks = [0, 49] and knames = [\"G\", \"X\"].
# legend: true or false to force the legend, otherwise it follows the number of series.

";


/// Everything the band command needs, read from a TOML file on top of the defaults.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BandConfig {
    pub procar                : PathBuf,
    pub outcar                : Option<PathBuf>,
    pub poscar                : Option<PathBuf>,
    pub kpoints               : Option<PathBuf>,

    /// Overrides the Fermi level found in OUTCAR.
    pub fermi                 : Option<f64>,
    /// Overrides the reciprocal lattice from OUTCAR and POSCAR, rows in 1/Å with 2π.
    pub reciprocal_lattice    : Option<Mat33<f64>>,
    pub interpolation_factor  : usize,

    /// plain, order, overlay, overlay_species, overlay_orbitals, parametric or scatter.
    pub mode                  : String,
    /// Only used by the `order` mode.
    pub reorder               : bool,

    /// kpath, thickness, color or both.
    pub unfold_mode           : Option<String>,
    /// Supercell lattice in units of the primitive one.
    pub transformation_matrix : Option<Mat33<f64>>,

    pub weighted_color        : bool,
    pub weighted_width        : bool,
    pub projection_mask       : Option<f64>,
    pub unfold_mask           : Option<f64>,

    /// K-distance window, the whole path if left blank.
    pub klimit                : Option<[f64; 2]>,
    /// Tick positions as k-point indices (from 0), replacing the ticks of the k-path.
    pub kticks                : Option<Vec<usize>>,
    /// Tick labels, one per tick.
    pub knames                : Option<Vec<String>>,
    /// Force the legend on or off, shown only for several series if left blank.
    pub legend                : Option<bool>,

    pub selection             : RawSelection,

    /// Series of the `overlay` mode: species label to orbital names or indices (from 0).
    pub items                 : IndexMap<String, Vec<String>>,

    pub style                 : Style,
}


impl Default for BandConfig {
    fn default() -> Self {
        Self {
            procar: PathBuf::from("PROCAR"),
            outcar: Some(PathBuf::from("OUTCAR")),
            poscar: Some(PathBuf::from("POSCAR")),
            kpoints: Some(PathBuf::from("KPOINTS")),
            fermi: None,
            reciprocal_lattice: None,
            interpolation_factor: 1,
            mode: "plain".to_string(),
            reorder: false,
            unfold_mode: None,
            transformation_matrix: None,
            weighted_color: true,
            weighted_width: false,
            projection_mask: None,
            unfold_mask: None,
            klimit: None,
            kticks: None,
            knames: None,
            legend: None,
            selection: RawSelection::default(),
            items: IndexMap::new(),
            style: Style::default(),
        }
    }
}


impl BandConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        ensure!(path.is_file(), "Configuration file {:?} not found.", path);
        info!("Reading configuration from {:?}", path);
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .extract()
            .context(format!("Invalid configuration in {:?}", path))
    }


    pub fn from_toml_str(txt: &str) -> Result<Self> {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::string(txt))
            .extract()
            .context("Invalid configuration")
    }


    pub fn template() -> Result<String> {
        Ok(format!("{}{}", TEMPLATE_HEADER, toml::to_string_pretty(&Self::default())?))
    }


    pub fn loader_input(&self) -> LoaderInput {
        LoaderInput {
            procar: self.procar.clone(),
            outcar: existing(self.outcar.as_ref(), "OUTCAR"),
            poscar: existing(self.poscar.as_ref(), "POSCAR"),
            kpoints: existing(self.kpoints.as_ref(), "KPOINTS"),
            fermi: self.fermi,
            reciprocal_lattice: self.reciprocal_lattice,
            interpolation_factor: self.interpolation_factor,
        }
    }


    fn overlay_items(&self) -> Vec<OverlayItem> {
        self.items.iter()
            .map(|(species, orbitals)| {
                let indices = orbitals.iter()
                    .map(|x| x.trim().parse::<usize>())
                    .collect::<std::result::Result<Vec<usize>, _>>();
                let orbitals = match indices {
                    Ok(i) if !i.is_empty() => OrbitalSpec::Indices(i),
                    _ => OrbitalSpec::Names(orbitals.clone()),
                };
                OverlayItem { species: species.clone(), orbitals }
            })
            .collect()
    }


    fn weight_request(&self) -> WeightRequest {
        WeightRequest {
            weighted_color: self.weighted_color,
            weighted_width: self.weighted_width,
            projection_mask: self.projection_mask,
            unfold_mask: self.unfold_mask,
        }
    }
}


/// Companion files are optional, missing ones are skipped with a warning.
fn existing(path: Option<&PathBuf>, what: &str) -> Option<PathBuf> {
    let path = path?;
    if path.is_file() {
        Some(path.clone())
    } else {
        warn!("{} file {:?} not found, skipped.", what, path);
        None
    }
}


fn parse_selection(raw: &RawSelection, ebs: &Ebs, structure: Option<&Structure>) -> Result<Selection> {
    Ok(Selection {
        spins: raw.spins.as_deref()
            .map(|s| RawSelection::parse_ispins(Some(s), ebs.nspins(), ebs.is_non_collinear()))
            .transpose()?,
        atoms: raw.atoms.as_deref()
            .map(|s| RawSelection::parse_iatoms(Some(s), ebs.natoms(), structure))
            .transpose()?,
        orbitals: raw.orbitals.as_deref()
            .map(|s| RawSelection::parse_iorbits(Some(s), ebs.orbital_names()))
            .transpose()?,
    })
}


/// Energy window of the plotted spins when none is configured.
fn energy_range(bands: &Cube<f64>, spins: &[usize]) -> [f64; 2] {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for &is in spins {
        for &e in bands.slice(s![.., .., is]).iter() {
            lo = lo.min(e);
            hi = hi.max(e);
        }
    }
    if lo.is_finite() && hi.is_finite() { [lo, hi] } else { [-1.0, 1.0] }
}


/// One row per k-point: the k-distance, then the energy of every plotted (spin, band).
fn write_bands_txt(path: &Path, kdist: &Vector<f64>, bands: &Cube<f64>, spins: &[usize]) -> Result<()> {
    let nbands = bands.shape()[1];
    let header = iproduct!(spins.iter().copied(), 1 ..= nbands)
        .map(|(is, ib)| format!("s{}b{}", is, ib))
        .collect::<Vec<String>>()
        .join(" ");

    info!("Writing raw band data to {:?}", path);
    let mut f = BufWriter::new(fs::File::create(path)
        .context(format!("Failed to create {:?}", path))?);
    writeln!(f, "# kdist(1/A) E-Ef(eV): {}", header)?;
    for (ik, k) in kdist.iter().enumerate() {
        write!(f, "  {:15.6}", k)?;
        for (is, ib) in iproduct!(spins.iter().copied(), 0 .. nbands) {
            write!(f, "  {:15.6}", bands[[ik, ib, is]])?;
        }
        writeln!(f)?;
    }
    f.flush()?;
    Ok(())
}


/// Ticks of the k-path, or of `kticks`, labelled by `knames` when given.
fn resolve_ticks(cfg: &BandConfig, ebs: &Ebs, kdist: &[f64]) -> Result<Option<(Vec<f64>, Vec<String>)>> {
    let ticks = match cfg.kticks.as_ref() {
        Some(kticks) => {
            let positions = kticks.iter()
                .map(|&i| kdist.get(i).copied()
                     .ok_or(EbsError::IndexOutOfRange { axis: "kpoints", index: i, len: kdist.len() }))
                .collect::<EbsResult<Vec<f64>>>()?;
            let labels = kticks.iter().map(|i| i.to_string()).collect();
            Some((positions, labels))
        },
        None => ebs.ticks(),
    };

    let Some((positions, mut labels)) = ticks else {
        if cfg.knames.is_some() {
            warn!("`knames` given without `kticks` or a k-path, ignored.");
        }
        return Ok(None);
    };

    if let Some(knames) = cfg.knames.as_ref() {
        ensure!(knames.len() == positions.len(),
            "Got {} `knames` for {} ticks.", knames.len(), positions.len());
        labels = knames.clone();
    }
    Ok(Some((positions, labels)))
}


/// Unfold, pick the weights of the plot mode and drive the renderer.
///
/// An unknown plot mode is reported and leaves an empty figure with its axes set.
pub fn draw(cfg: &BandConfig,
            loaded: &mut Loaded,
            renderer: &mut dyn BandRenderer,
            htmlout: &Path,
            txtout: Option<&Path>,
            show: bool) -> Result<()> {
    let unfold_mode = cfg.unfold_mode.as_deref()
        .map(str::parse::<UnfoldMode>)
        .transpose()?;

    let Loaded { ebs, structure, .. } = loaded;
    let structure = structure.as_ref();

    if let Some(mode) = unfold_mode {
        let t = cfg.transformation_matrix
            .context("Unfolding needs `transformation_matrix` in the configuration.")?;
        apply_unfolding(ebs, mode, &t, structure)?;
    }

    let mode = match PlotMode::parse(&cfg.mode, cfg.reorder, cfg.overlay_items()) {
        Ok(m) => Some(m),
        Err(e) => {
            error!("{}", e);
            None
        },
    };

    if let Some(PlotMode::Order { reorder: true }) = mode {
        ebs.reorder()?;
    }

    let selection = parse_selection(&cfg.selection, ebs, structure)?;
    let spins = selection.plotted_spins(ebs);
    let bands = ebs.bands_shifted();
    let kdist = ebs.kdistances();
    let kd = kdist.to_vec();

    match mode.as_ref() {
        Some(PlotMode::Plain) => renderer.plot_bands(&kd, &bands, &spins),
        Some(PlotMode::Order { .. }) => renderer.plot_order(&kd, &bands, &spins),
        Some(PlotMode::Overlay(kind)) => {
            let series = overlay_weights(ebs, kind, structure, &selection)?;
            renderer.plot_overlay(&kd, &bands, &spins, &series);
        },
        Some(PlotMode::Parametric) => {
            let plan = compose_weights(ebs, &selection, &cfg.weight_request(), unfold_mode)?;
            renderer.plot_parametric(&kd, &bands, &spins, &plan);
        },
        Some(PlotMode::Scatter) => {
            let plan = compose_weights(ebs, &selection, &cfg.weight_request(), unfold_mode)?;
            renderer.plot_scatter(&kd, &bands, &spins, &plan);
        },
        None => (),
    }

    if let Some((positions, labels)) = resolve_ticks(cfg, ebs, &kd)? {
        renderer.set_xticks(&positions, &labels);
    }

    let [klo, khi] = cfg.klimit.unwrap_or([
        kd.first().copied().unwrap_or(0.0),
        kd.last().copied().unwrap_or(1.0),
    ]);
    renderer.set_xlim(klo, khi);

    let [elo, ehi] = cfg.style.elimit.unwrap_or_else(|| energy_range(&bands, &spins));
    renderer.set_ylim(elo, ehi);
    renderer.draw_fermi(0.0);
    renderer.set_ylabel(&cfg.style.ylabel);
    let several_series = spins.len() > 1 || matches!(mode, Some(PlotMode::Overlay(_)));
    if cfg.legend.unwrap_or(several_series) {
        renderer.legend();
    }
    renderer.save(htmlout)?;

    if let Some(path) = txtout {
        write_bands_txt(path, &kdist, &bands, &spins)?;
    }

    if show {
        renderer.show();
    }

    Ok(())
}


#[derive(Debug, Args)]
/// Plot band structures from PROCAR, with projections, overlays and supercell unfolding.
///
/// Most settings live in a TOML configuration file, run with `--gen-template` to get one
/// with every field at its default. The file paths given on the command line override the
/// ones in the configuration.
pub struct Band {
    #[arg(short, long)]
    /// Configuration file of the band plot.
    config: Option<PathBuf>,

    #[arg(long)]
    /// Write a configuration template to "band_template.toml" and exit.
    gen_template: bool,

    #[arg(long)]
    /// PROCAR file path, "./PROCAR" if not set in the configuration.
    procar: Option<PathBuf>,

    #[arg(long)]
    /// OUTCAR file path. The Fermi level and reciprocal lattice are read from it.
    outcar: Option<PathBuf>,

    #[arg(long)]
    /// POSCAR file path. Needed by unfolding and species selections.
    poscar: Option<PathBuf>,

    #[arg(long)]
    /// Line-mode KPOINTS file path. Gives the k-path and the tick labels.
    kpoints: Option<PathBuf>,

    #[arg(short, long)]
    /// Plot mode, overrides the one in the configuration.
    mode: Option<String>,

    #[arg(long, short = 'o', default_value = "./band.html")]
    /// Write the plot to html and view it in the web browser.
    htmlout: PathBuf,

    #[arg(long, default_value = "band_raw.txt")]
    /// Write the raw plot data as txt file in order to replot it with more advanced tools.
    txtout: PathBuf,

    #[arg(long)]
    /// Open default browser to see the plot immediately.
    show: bool,
}


impl Band {
    fn collect_config(&self) -> Result<BandConfig> {
        let mut cfg = match self.config.as_ref() {
            Some(path) => BandConfig::from_file(path)?,
            None => {
                info!("No configuration given, defaults are used.");
                BandConfig::default()
            },
        };

        if let Some(p) = self.procar.as_ref()  { cfg.procar  = p.clone(); }
        if let Some(p) = self.outcar.as_ref()  { cfg.outcar  = Some(p.clone()); }
        if let Some(p) = self.poscar.as_ref()  { cfg.poscar  = Some(p.clone()); }
        if let Some(p) = self.kpoints.as_ref() { cfg.kpoints = Some(p.clone()); }
        if let Some(m) = self.mode.as_ref()    { cfg.mode    = m.clone(); }

        Ok(cfg)
    }
}


impl OptProcess for Band {
    fn process(&self) -> Result<()> {
        if self.gen_template {
            info!("Writing configuration template to {:?}", TEMPLATE_FNAME);
            fs::write(TEMPLATE_FNAME, BandConfig::template()?)?;
            return Ok(());
        }

        let cfg = self.collect_config()?;
        let mut renderer = PlotlyRenderer::new(cfg.style.clone())?;
        let mut loaded = loader::parse(&cfg.loader_input())?;

        draw(&cfg, &mut loaded, &mut renderer, &self.htmlout, Some(&self.txtout), self.show)
    }
}
