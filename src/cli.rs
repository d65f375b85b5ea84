use clap::{
    Parser,
    builder::styling::{
        AnsiColor,
        Effects,
        Styles,
    },
};
use enum_dispatch::enum_dispatch;

use crate::{
    types::Result,
    commands::{
        band::Band,
        kpath::Kpath,
    },
};


/// Help text colors, matching the report printed by `kpath`.
fn help_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::BrightGreen.on_default() | Effects::BOLD | Effects::UNDERLINE)
        .usage(AnsiColor::BrightGreen.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightCyan.on_default())
        .placeholder(AnsiColor::Cyan.on_default())
        .error(AnsiColor::BrightRed.on_default() | Effects::BOLD)
}


#[enum_dispatch]
pub trait OptProcess {
    fn process(&self) -> Result<()>;
}


#[enum_dispatch(OptProcess)]
#[derive(Debug, Parser)]
#[command(name = "rsbands",
            about = r"Plot band structures from VASP PROCAR, with projections, overlays and supercell unfolding.",
            version,
            styles = help_styles()
            )]
enum Opt {
    Band,

    Kpath,
}


pub fn run() -> Result<()> {
    Opt::parse().process()
}
