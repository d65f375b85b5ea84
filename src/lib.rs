pub mod types;
pub mod error;
pub mod structure;
pub mod kpath;
pub mod orbitals;
pub mod ebs;
pub mod weights;
pub mod loader;
pub mod vasp_parsers;
pub mod commands;
pub mod cli;

pub use cli::OptProcess;
pub use types::Result;
pub use error::{
    EbsError,
    EbsResult,
};
pub use ebs::Ebs;
pub use kpath::KPath;
pub use structure::Structure;
pub use vasp_parsers::{
    Kpoints,
    Outcar,
    Poscar,
    Procar,
};
