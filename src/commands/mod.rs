pub mod common;
pub mod render;
pub mod band;
pub mod kpath;
