use std::{
    f64::consts::PI,
    fs,
    path::{
        Path,
        PathBuf,
    },
};

use approx::assert_abs_diff_eq;
use tempdir::TempDir;

use rsbands::{
    Result,
    commands::{
        band::{
            BandConfig,
            draw,
        },
        render::PlotlyRenderer,
    },
    loader::{
        self,
        LoaderInput,
    },
    weights::{
        Selection,
        UnfoldMode,
        WeightRequest,
        apply_unfolding,
        compose_weights,
    },
};


const POSCAR: &str = "H chain, doubled along x
1.0
   4.0 0.0 0.0
   0.0 2.0 0.0
   0.0 0.0 2.0
H
2
Direct
0.0 0.0 0.0
0.5 0.0 0.0
";

const KPOINTS: &str = "G-X-M
3
Line-mode
reciprocal
0.0 0.0 0.0 ! G
0.5 0.0 0.0 ! X

0.5 0.0 0.0 ! X
0.5 0.5 0.0 ! M
";

const OUTCAR: &str = "
 E-fermi :   0.5000     XC(G=0): -10.9193     alpha+bet :-12.8045

      direct lattice vectors                 reciprocal lattice vectors
     4.000000000  0.000000000  0.000000000     0.250000000  0.000000000  0.000000000
     0.000000000  2.000000000  0.000000000     0.000000000  0.500000000  0.000000000
     0.000000000  0.000000000  2.000000000     0.000000000  0.000000000  0.500000000
";

const KPTS: [[f64; 3]; 6] = [
    [0.0, 0.0, 0.0], [0.25, 0.0, 0.0], [0.5, 0.0, 0.0],
    [0.5, 0.0, 0.0], [0.5, 0.25, 0.0], [0.5, 0.5, 0.0],
];


/// Two bands of the doubled chain: an s band and a px band, shared evenly by both ions.
fn procar_txt() -> String {
    let mut txt = String::from("PROCAR lm decomposed\n");
    txt.push_str(&format!("# of k-points:  {:3}         # of bands:  {:3}         # of ions:  {:3}\n\n", KPTS.len(), 2, 2));

    for (ik, k) in KPTS.iter().enumerate() {
        txt.push_str(&format!(" k-point {:4} :    {:.8} {:.8} {:.8}     weight = {:.8}\n\n",
                              ik + 1, k[0], k[1], k[2], 1.0 / KPTS.len() as f64));
        for ib in 0 .. 2 {
            let energy = if ib == 0 { -1.0 + 0.1 * ik as f64 } else { 1.0 - 0.1 * ik as f64 };
            let proj = if ib == 0 { [0.25, 0.0, 0.0, 0.0] } else { [0.0, 0.0, 0.0, 0.3] };
            let tot: f64 = proj.iter().sum();

            txt.push_str(&format!("band {:4} # energy {:12.8} # occ.  {:.8}\n\n", ib + 1, energy, 1.0 - ib as f64));
            txt.push_str("ion      s     py     pz     px    tot\n");
            for ion in 1 ..= 2 {
                txt.push_str(&format!("{:5}  {:.3}  {:.3}  {:.3}  {:.3}  {:.3}\n",
                                      ion, proj[0], proj[1], proj[2], proj[3], tot));
            }
            txt.push_str(&format!("tot    {:.3}  {:.3}  {:.3}  {:.3}  {:.3}\n\n",
                                  2.0 * proj[0], 2.0 * proj[1], 2.0 * proj[2], 2.0 * proj[3], 2.0 * tot));
        }
    }
    txt
}


struct Fixture {
    dir     : TempDir,
    procar  : PathBuf,
    outcar  : PathBuf,
    poscar  : PathBuf,
    kpoints : PathBuf,
}


fn write_fixture() -> Result<Fixture> {
    let dir = TempDir::new("rsbands_pipeline")?;
    let write = |name: &str, content: &str| -> Result<PathBuf> {
        let path = dir.path().join(name);
        fs::write(&path, content)?;
        Ok(path)
    };

    let procar  = write("PROCAR", &procar_txt())?;
    let outcar  = write("OUTCAR", OUTCAR)?;
    let poscar  = write("POSCAR", POSCAR)?;
    let kpoints = write("KPOINTS", KPOINTS)?;
    Ok(Fixture { dir, procar, outcar, poscar, kpoints })
}


fn full_input(f: &Fixture) -> LoaderInput {
    LoaderInput {
        outcar: Some(f.outcar.clone()),
        poscar: Some(f.poscar.clone()),
        kpoints: Some(f.kpoints.clone()),
        ..LoaderInput::new(&f.procar)
    }
}


#[test]
fn test_load_all_files() -> Result<()> {
    let f = write_fixture()?;
    let loaded = loader::parse(&full_input(&f))?;
    let ebs = &loaded.ebs;

    assert_eq!((ebs.nkpoints(), ebs.nbands(), ebs.nspins(), ebs.natoms(), ebs.norbitals()), (6, 2, 1, 2, 4));
    assert_eq!(ebs.fermi(), Some(0.5));
    assert_eq!(loaded.structure.as_ref().map(|s| s.nions()), Some(2));

    let recip = loaded.reciprocal_lattice.unwrap();
    assert_abs_diff_eq!(recip[0][0], 0.5 * PI, epsilon = 1E-8);
    assert_abs_diff_eq!(recip[1][1], PI, epsilon = 1E-8);

    let (positions, labels) = ebs.ticks().unwrap();
    assert_eq!(labels, vec!["Γ", "X", "M"]);
    assert_abs_diff_eq!(positions[1], 0.25 * PI, epsilon = 1E-8);
    assert_abs_diff_eq!(positions[2], 0.75 * PI, epsilon = 1E-8);

    let shifted = ebs.bands_shifted();
    assert_abs_diff_eq!(shifted[[0, 0, 0]], -1.5, epsilon = 1E-10);
    Ok(())
}


#[test]
fn test_load_procar_only() -> Result<()> {
    let f = write_fixture()?;
    let loaded = loader::parse(&LoaderInput::new(&f.procar))?;

    assert_eq!(loaded.ebs.fermi(), Some(0.0));
    assert!(loaded.ebs.kpath().is_none());
    assert!(loaded.structure.is_none());
    assert!(loaded.reciprocal_lattice.is_none());
    Ok(())
}


#[test]
fn test_load_interpolated() -> Result<()> {
    let f = write_fixture()?;
    let input = LoaderInput { interpolation_factor: 2, ..full_input(&f) };
    let loaded = loader::parse(&input)?;

    assert_eq!(loaded.ebs.nkpoints(), 10);
    assert_eq!(loaded.ebs.kpath().unwrap().ngrids, vec![5, 5]);
    assert_abs_diff_eq!(loaded.ebs.bands()[[0, 0, 0]], -1.0, epsilon = 1E-10);
    Ok(())
}


#[test]
fn test_unfold_and_compose() -> Result<()> {
    let f = write_fixture()?;
    let mut loaded = loader::parse(&full_input(&f))?;
    let t = [[2.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

    apply_unfolding(&mut loaded.ebs, UnfoldMode::Thickness, &t, loaded.structure.as_ref())?;

    let ebs = &loaded.ebs;
    let weights = ebs.weights().unwrap();
    assert_eq!(weights.dim(), (6, 2, 1));
    assert!(weights.iter().all(|&w| (0.0 ..= 1.0).contains(&w)));
    assert_abs_diff_eq!(weights[[0, 0, 0]], 1.0, epsilon = 1E-6);

    let kpath = ebs.kpath().unwrap();
    assert_eq!(kpath.special_kpoints[0][1], [0.25, 0.0, 0.0]);
    assert_eq!(kpath.special_kpoints[1][0], [0.25, 0.0, 0.0]);

    let selection = Selection { orbitals: Some(vec![0]), ..Default::default() };
    let plan = compose_weights(ebs, &selection, &WeightRequest::default(), Some(UnfoldMode::Thickness))?;
    assert_eq!(plan.width_weights.as_ref(), Some(weights));

    let color = plan.color_weights.unwrap();
    assert_abs_diff_eq!(color[[0, 0, 0]], 0.5, epsilon = 1E-10);
    assert_abs_diff_eq!(color[[0, 1, 0]], 0.0, epsilon = 1E-10);
    Ok(())
}


#[test]
fn test_band_command_output() -> Result<()> {
    let f = write_fixture()?;
    let cfg = BandConfig::from_toml_str(&format!(r#"
procar = {:?}
outcar = {:?}
poscar = {:?}
kpoints = {:?}
mode = "parametric"
unfold_mode = "both"
weighted_width = true
transformation_matrix = [[2, 0, 0], [0, 1, 0], [0, 0, 1]]

[selection]
orbitals = "s"
"#, f.procar, f.outcar, f.poscar, f.kpoints))?;

    let htmlout = f.dir.path().join("band.html");
    let txtout  = f.dir.path().join("band_raw.txt");

    let mut loaded = loader::parse(&cfg.loader_input())?;
    let mut renderer = PlotlyRenderer::new(cfg.style.clone())?;
    draw(&cfg, &mut loaded, &mut renderer, &htmlout, Some(Path::new(&txtout)), false)?;

    assert!(loaded.ebs.state().unfolded);
    assert!(fs::read_to_string(&htmlout)?.contains("plotly"));
    assert_eq!(fs::read_to_string(&txtout)?.lines().count(), 7);
    Ok(())
}
