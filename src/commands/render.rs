//! Drawing of band structures, kept behind [`BandRenderer`] so the band command only
//! decides what to draw and in which order.

use std::{
    fs,
    path::Path,
};

use anyhow::Context;
use log::info;
use ndarray::s;
use plotly::{
    common::{
        ColorScale,
        ColorScalePalette,
        DashType,
        Line,
        Marker,
        Mode,
        Title,
    },
    layout::{
        Axis,
        Layout,
    },
    Plot,
    Scatter,
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    commands::common::RawSelection,
    types::{
        Cube,
        Result,
    },
    weights::WeightPlan,
};


/// Everything about looks, read from the `[style]` table of the configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Style {
    pub title          : Option<String>,
    /// Line colors of spin up and spin down (or the only spin).
    pub spin_colors    : Vec<String>,
    /// Colors cycled through by `order` and `overlay` plots.
    pub cycle_colors   : Vec<String>,
    pub colormap       : String,
    /// Colorbar limits of weighted plots, from 0 to the largest weight if left blank.
    pub vmin           : Option<f64>,
    pub vmax           : Option<f64>,
    pub plot_color_bar : bool,
    /// Grid lines on both axes, the x grid at the ticks is always drawn.
    pub grid           : bool,
    pub linewidth      : f64,
    pub marker_size    : f64,
    pub opacity        : f64,
    pub fermi_color    : String,
    /// Energy window relative to the Fermi level.
    pub elimit         : Option<[f64; 2]>,
    pub ylabel         : String,
}


impl Default for Style {
    fn default() -> Self {
        Self {
            title: None,
            spin_colors: vec!["blue".into(), "red".into()],
            cycle_colors: vec![
                "#1f77b4".into(), "#ff7f0e".into(), "#2ca02c".into(), "#d62728".into(), "#9467bd".into(),
                "#8c564b".into(), "#e377c2".into(), "#7f7f7f".into(), "#bcbd22".into(), "#17becf".into(),
            ],
            colormap: "jet".into(),
            vmin: None,
            vmax: None,
            plot_color_bar: true,
            grid: false,
            linewidth: 1.5,
            marker_size: 8.0,
            opacity: 0.6,
            fermi_color: "gray".into(),
            elimit: Some([-2.0, 2.0]),
            ylabel: "E-E<sub>f</sub> (eV)".into(),
        }
    }
}


impl Style {
    /// Check every color and the colormap before anything is drawn.
    pub fn validate(&self) -> Result<()> {
        for c in self.spin_colors.iter().chain(self.cycle_colors.iter()).chain([&self.fermi_color]) {
            RawSelection::parse_color(c)?;
        }
        RawSelection::parse_colormap(&self.colormap)?;
        anyhow::ensure!(!self.spin_colors.is_empty() && !self.cycle_colors.is_empty(),
            "Style needs at least one spin color and one cycle color.");
        if let (Some(lo), Some(hi)) = (self.vmin, self.vmax) {
            anyhow::ensure!(lo < hi, "Colorbar limits vmin = {} and vmax = {} are not increasing.", lo, hi);
        }
        Ok(())
    }


    fn spin_color(&self, ispin: usize) -> String {
        self.spin_colors[ispin.min(self.spin_colors.len() - 1)].clone()
    }


    fn cycle_color(&self, i: usize) -> String {
        self.cycle_colors[i % self.cycle_colors.len()].clone()
    }
}


/// Drawing backend of band plots. The band command calls the `plot_*` method of its mode,
/// then ticks, limits, Fermi line, y label, legend, save and show in this order.
pub trait BandRenderer {
    fn plot_bands(&mut self, kdist: &[f64], bands: &Cube<f64>, spins: &[usize]);
    fn plot_order(&mut self, kdist: &[f64], bands: &Cube<f64>, spins: &[usize]);
    fn plot_parametric(&mut self, kdist: &[f64], bands: &Cube<f64>, spins: &[usize], plan: &WeightPlan);
    fn plot_scatter(&mut self, kdist: &[f64], bands: &Cube<f64>, spins: &[usize], plan: &WeightPlan);
    fn plot_overlay(&mut self, kdist: &[f64], bands: &Cube<f64>, spins: &[usize], series: &[(String, Cube<f64>)]);
    fn set_xticks(&mut self, positions: &[f64], labels: &[String]);
    fn set_xlim(&mut self, lo: f64, hi: f64);
    fn set_ylim(&mut self, lo: f64, hi: f64);
    fn draw_fermi(&mut self, energy: f64);
    fn set_ylabel(&mut self, label: &str);
    fn legend(&mut self);
    fn save(&mut self, path: &Path) -> Result<()>;
    fn show(&mut self);
}


pub struct PlotlyRenderer {
    style       : Style,
    palette     : ColorScalePalette,
    plot        : Plot,
    xticks      : Option<(Vec<f64>, Vec<String>)>,
    xlim        : Option<[f64; 2]>,
    ylim        : Option<[f64; 2]>,
    ylabel      : Option<String>,
    show_legend : bool,
}


const SPIN_NAMES: [&str; 4] = ["up", "down", "", ""];


impl PlotlyRenderer {
    pub fn new(style: Style) -> Result<Self> {
        style.validate()?;
        let palette = RawSelection::parse_colormap(&style.colormap)?;
        Ok(Self {
            style,
            palette,
            plot: Plot::new(),
            xticks: None,
            xlim: None,
            ylim: None,
            ylabel: None,
            show_legend: false,
        })
    }


    fn band_name(nspins: usize, ispin: usize) -> String {
        if nspins > 1 {
            format!("spin {}", SPIN_NAMES[ispin.min(3)])
        } else {
            "bands".to_string()
        }
    }


    fn band_lines(&mut self, kdist: &[f64], bands: &Cube<f64>, spins: &[usize], color: Option<&str>) {
        let nspins = bands.shape()[2];
        for &is in spins {
            let name = Self::band_name(nspins, is);
            let color = color.map(|c| c.to_string()).unwrap_or_else(|| self.style.spin_color(is));
            for ib in 0 .. bands.shape()[1] {
                let trace = Scatter::new(kdist.to_vec(), bands.slice(s![.., ib, is]).to_vec())
                    .mode(Mode::Lines)
                    .line(Line::new().color(color.clone()).width(self.style.linewidth))
                    .name(&name)
                    .legend_group(&name)
                    .show_legend(ib == 0);
                self.plot.add_trace(trace);
            }
        }
    }


    fn weighted_markers(&mut self, kdist: &[f64], bands: &Cube<f64>, spins: &[usize], plan: &WeightPlan, mode: Mode) {
        let nspins = bands.shape()[2];
        let cmin = self.style.vmin.unwrap_or(0.0);
        let cmax = self.style.vmax.unwrap_or_else(|| plan.color_weights.as_ref()
            .map(|w| w.iter().copied().fold(0.0f64, f64::max))
            .filter(|&m| m > cmin)
            .unwrap_or(cmin + 1.0));
        let wmax = plan.width_weights.as_ref()
            .map(|w| w.iter().copied().fold(0.0f64, f64::max))
            .filter(|&m| m > 0.0)
            .unwrap_or(1.0);

        let mut first = true;
        for &is in spins {
            let name = Self::band_name(nspins, is);
            for ib in 0 .. bands.shape()[1] {
                let y = (0 .. kdist.len())
                    .map(|ik| {
                        let keep = [plan.color_mask.as_ref(), plan.width_mask.as_ref()].iter()
                            .all(|m| m.map(|m| m[[ik, ib, is]]).unwrap_or(true));
                        if keep { bands[[ik, ib, is]] } else { f64::NAN }
                    })
                    .collect::<Vec<f64>>();

                let mut marker = Marker::new().opacity(self.style.opacity);
                marker = match plan.color_weights.as_ref() {
                    Some(w) => marker
                        .color_array(w.slice(s![.., ib, is]).to_vec())
                        .color_scale(ColorScale::Palette(self.palette.clone()))
                        .cmin(cmin)
                        .cmax(cmax)
                        .show_scale(first && self.style.plot_color_bar),
                    None => marker.color(self.style.spin_color(is)),
                };
                marker = match plan.width_weights.as_ref() {
                    Some(w) => marker.size_array(w.slice(s![.., ib, is]).iter()
                        .map(|&x| (x.max(0.0) / wmax * self.style.marker_size).round() as usize)
                        .collect()),
                    None => marker.size(self.style.marker_size.round() as usize),
                };

                let mut trace = Scatter::new(kdist.to_vec(), y)
                    .mode(mode.clone())
                    .marker(marker)
                    .name(&name)
                    .legend_group(&name)
                    .show_legend(false);
                if matches!(mode, Mode::LinesMarkers) {
                    trace = trace.line(Line::new().color(self.style.spin_color(is)).width(self.style.linewidth * 0.5));
                }
                self.plot.add_trace(trace);
                first = false;
            }
        }
    }


    fn build_layout(&self) -> Layout {
        let mut xaxis = Axis::new()
            .zero_line(false)
            .show_grid(self.style.grid || self.xticks.is_some());
        if let Some((pos, labels)) = self.xticks.as_ref() {
            xaxis = xaxis
                .tick_values(pos.clone())
                .tick_text(labels.clone());
        }
        if let Some(lim) = self.xlim {
            xaxis = xaxis.range(lim.to_vec());
        }

        let mut yaxis = Axis::new()
            .zero_line(false)
            .show_grid(self.style.grid);
        if let Some(lim) = self.ylim {
            yaxis = yaxis.range(lim.to_vec());
        }
        if let Some(label) = self.ylabel.as_ref() {
            yaxis = yaxis.title(Title::with_text(label));
        }

        let mut layout = Layout::new()
            .x_axis(xaxis)
            .y_axis(yaxis)
            .show_legend(self.show_legend);
        if let Some(title) = self.style.title.as_ref() {
            layout = layout.title(Title::with_text(title));
        }
        layout
    }
}


impl BandRenderer for PlotlyRenderer {
    fn plot_bands(&mut self, kdist: &[f64], bands: &Cube<f64>, spins: &[usize]) {
        self.band_lines(kdist, bands, spins, None);
    }


    fn plot_order(&mut self, kdist: &[f64], bands: &Cube<f64>, spins: &[usize]) {
        let nspins = bands.shape()[2];
        for &is in spins {
            for ib in 0 .. bands.shape()[1] {
                let name = format!("{} {}", Self::band_name(nspins, is), ib + 1);
                let trace = Scatter::new(kdist.to_vec(), bands.slice(s![.., ib, is]).to_vec())
                    .mode(Mode::Lines)
                    .line(Line::new().color(self.style.cycle_color(ib)).width(self.style.linewidth))
                    .name(&name)
                    .show_legend(false);
                self.plot.add_trace(trace);
            }
        }
    }


    fn plot_parametric(&mut self, kdist: &[f64], bands: &Cube<f64>, spins: &[usize], plan: &WeightPlan) {
        self.weighted_markers(kdist, bands, spins, plan, Mode::LinesMarkers);
    }


    fn plot_scatter(&mut self, kdist: &[f64], bands: &Cube<f64>, spins: &[usize], plan: &WeightPlan) {
        self.weighted_markers(kdist, bands, spins, plan, Mode::Markers);
    }


    fn plot_overlay(&mut self, kdist: &[f64], bands: &Cube<f64>, spins: &[usize], series: &[(String, Cube<f64>)]) {
        self.band_lines(kdist, bands, spins, Some("lightgray"));

        let wmax = series.iter()
            .flat_map(|(_, w)| w.iter().copied())
            .fold(0.0f64, f64::max);
        let wmax = if wmax > 0.0 { wmax } else { 1.0 };

        for (iseries, (label, w)) in series.iter().enumerate() {
            let color = self.style.cycle_color(iseries);
            let mut first = true;
            for &is in spins {
                for ib in 0 .. bands.shape()[1] {
                    let sizes = w.slice(s![.., ib, is]).iter()
                        .map(|&x| (x.max(0.0) / wmax * self.style.marker_size * 2.0).round() as usize)
                        .collect::<Vec<usize>>();
                    let trace = Scatter::new(kdist.to_vec(), bands.slice(s![.., ib, is]).to_vec())
                        .mode(Mode::Markers)
                        .marker(Marker::new()
                                .color(color.clone())
                                .opacity(self.style.opacity)
                                .size_array(sizes))
                        .name(label)
                        .legend_group(label)
                        .show_legend(first);
                    self.plot.add_trace(trace);
                    first = false;
                }
            }
        }
    }


    fn set_xticks(&mut self, positions: &[f64], labels: &[String]) {
        self.xticks = Some((positions.to_vec(), labels.to_vec()));
    }


    fn set_xlim(&mut self, lo: f64, hi: f64) {
        self.xlim = Some([lo, hi]);
    }


    fn set_ylim(&mut self, lo: f64, hi: f64) {
        self.ylim = Some([lo, hi]);
    }


    fn draw_fermi(&mut self, energy: f64) {
        let (lo, hi) = self.xlim.map(|l| (l[0], l[1])).unwrap_or((0.0, 1.0));
        let trace = Scatter::new(vec![lo, hi], vec![energy, energy])
            .mode(Mode::Lines)
            .line(Line::new().color(self.style.fermi_color.clone()).dash(DashType::Dash))
            .name("E<sub>f</sub>")
            .show_legend(false);
        self.plot.add_trace(trace);
    }


    fn set_ylabel(&mut self, label: &str) {
        self.ylabel = Some(label.to_string());
    }


    fn legend(&mut self) {
        self.show_legend = true;
    }


    fn save(&mut self, path: &Path) -> Result<()> {
        let layout = self.build_layout();
        self.plot.set_layout(layout);
        info!("Writing band structure plot to {:?}", path);
        fs::write(path, self.plot.to_html())
            .context(format!("Failed to write {:?}", path))
    }


    fn show(&mut self) {
        let layout = self.build_layout();
        self.plot.set_layout(layout);
        self.plot.show();
    }
}
