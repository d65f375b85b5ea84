pub mod procar;
pub mod poscar;
pub mod outcar;
pub mod kpoints;

pub use procar::Procar;
pub use poscar::Poscar;
pub use outcar::Outcar;
pub use kpoints::Kpoints;
