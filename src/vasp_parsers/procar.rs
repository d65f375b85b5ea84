use std::{
    fs,
    path::Path,
};

use anyhow::{
    bail,
    ensure,
    Context,
};
use log::{
    debug,
    info,
};
use ndarray::Array5;
use regex::Regex;

use crate::types::{
    c64,
    Cube,
    Matrix,
    Result,
    Vector,
};


/// Orbital projections written by VASP with `LORBIT = 11` or `12`.
///
/// ISPIN = 2 files hold two complete k-point blocks, one per spin. Non-collinear files
/// hold four projection blocks per band (tot, mx, my, mz). With `LORBIT = 12` a phase
/// block follows, it is attached to the first channel.
#[derive(Clone, Debug)]
pub struct Procar {
    pub nkpoints      : usize,
    pub nbands        : usize,
    pub nions         : usize,
    pub nspin         : usize,
    pub lsorbit       : bool,
    pub orbital_names : Vec<String>,
    pub kpoints       : Matrix<f64>,          // [nk, 3], direct coordinates
    pub kweights      : Vector<f64>,          // [nk]
    pub eigvals       : Cube<f64>,            // [nk, nb, nspin]
    pub occupations   : Cube<f64>,            // [nk, nb, nspin]
    pub projections   : Array5<f64>,          // [nk, nb, nch, nions, norb]
    pub phases        : Option<Array5<c64>>,  // same layout as projections
}


/// Data of one band at one k-point.
#[derive(Default)]
struct BandBlock {
    energy     : f64,
    occupation : f64,
    channels   : Vec<Vec<Vec<f64>>>,  // [ich][iion][iorb]
    phase      : Vec<Vec<c64>>,       // [iion][iorb]
}


fn parse_floats(tokens: &[&str], line: &str) -> Result<Vec<f64>> {
    tokens.iter()
        .map(|x| x.parse::<f64>().context(format!("Invalid number {:?} in line {:?}", x, line)))
        .collect()
}


impl Procar {
    pub fn from_file(path: &(impl AsRef<Path> + ?Sized)) -> Result<Self> {
        let path = path.as_ref();
        info!("Reading {:?}", path);
        let txt = fs::read_to_string(path)
            .context(format!("Failed to read {:?}", path))?;
        Self::from_txt(&txt)
            .context(format!("Parse file {:?} failed.", path))
    }


    pub fn from_txt(txt: &str) -> Result<Self> {
        let header_re = Regex::new(r"# of k-points:\s*(\d+)\s+# of bands:\s*(\d+)\s+# of ions:\s*(\d+)")?;
        let headers = header_re.captures_iter(txt)
            .map(|c| -> Result<(usize, usize, usize, usize)> {
                let start = c.get(0).map(|m| m.start()).unwrap_or(0);
                let n = (1 ..= 3)
                    .map(|i| c[i].parse::<usize>())
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok((start, n[0], n[1], n[2]))
            })
            .collect::<Result<Vec<_>>>()?;

        ensure!(!headers.is_empty(), "No \"# of k-points\" header found, is this a PROCAR?");
        ensure!(headers.len() <= 2, "Found {} spin blocks, at most 2 expected.", headers.len());
        let (_, nkpoints, nbands, nions) = headers[0];
        ensure!(nkpoints > 0 && nbands > 0 && nions > 0, "Empty PROCAR: {:?}", (nkpoints, nbands, nions));
        ensure!(headers.iter().all(|h| (h.1, h.2, h.3) == (nkpoints, nbands, nions)),
            "Spin blocks have inconsistent dimensions.");
        let nspin = headers.len();
        let has_phase = txt.lines().next().map(|l| l.contains("phase")).unwrap_or(false);

        let mut blocks: Vec<Vec<Vec<BandBlock>>> = vec![];   // [ispin][ik][ib]
        let mut kpoints = Matrix::<f64>::zeros((nkpoints, 3));
        let mut kweights = Vector::<f64>::zeros(nkpoints);
        let mut orbital_names: Vec<String> = vec![];

        for (ispin, h) in headers.iter().enumerate() {
            let end = headers.get(ispin + 1).map(|x| x.0).unwrap_or(txt.len());
            let spin_txt = &txt[h.0 .. end];
            let (kblocks, kpts, kw) = Self::parse_spin_block(spin_txt, nkpoints, nbands, nions, &mut orbital_names)
                .context(format!("Failed to parse spin block {}", ispin + 1))?;
            if ispin == 0 {
                kpoints = kpts;
                kweights = kw;
            }
            blocks.push(kblocks);
        }

        let norb = orbital_names.len();
        let nch_found = blocks[0][0][0].channels.len();
        let lsorbit = match nch_found {
            1 => false,
            4 => true,
            n => bail!("Found {} projection blocks per band, expect 1 or 4.", n),
        };
        ensure!(!(lsorbit && nspin == 2), "Non-collinear PROCAR with two spin blocks is not valid.");
        let nch = if lsorbit { 4 } else { nspin };
        debug!("PROCAR: nk = {}, nb = {}, nions = {}, norb = {}, nspin = {}, lsorbit = {}, phase = {}",
               nkpoints, nbands, nions, norb, nspin, lsorbit, has_phase);

        let mut eigvals = Cube::<f64>::zeros((nkpoints, nbands, nspin));
        let mut occupations = Cube::<f64>::zeros((nkpoints, nbands, nspin));
        let mut projections = Array5::<f64>::zeros((nkpoints, nbands, nch, nions, norb));
        let mut phases = has_phase.then(|| Array5::<c64>::zeros((nkpoints, nbands, nch, nions, norb)));

        for (ispin, kblocks) in blocks.iter().enumerate() {
            for (ik, bblocks) in kblocks.iter().enumerate() {
                for (ib, band) in bblocks.iter().enumerate() {
                    eigvals[[ik, ib, ispin]] = band.energy;
                    occupations[[ik, ib, ispin]] = band.occupation;

                    ensure!(band.channels.len() == nch_found,
                        "Band {} at k-point {} has {} projection blocks, expect {}.",
                        ib + 1, ik + 1, band.channels.len(), nch_found);
                    for (ich, ions) in band.channels.iter().enumerate() {
                        let ich = if lsorbit { ich } else { ispin };
                        for (iion, orbs) in ions.iter().enumerate() {
                            for (iorb, &v) in orbs.iter().enumerate() {
                                projections[[ik, ib, ich, iion, iorb]] = v;
                            }
                        }
                    }

                    if let Some(phases) = phases.as_mut() {
                        for (iion, orbs) in band.phase.iter().enumerate() {
                            for (iorb, &v) in orbs.iter().enumerate() {
                                phases[[ik, ib, ispin, iion, iorb]] = v;
                            }
                        }
                    }
                }
            }
        }

        Ok(Self {
            nkpoints,
            nbands,
            nions,
            nspin,
            lsorbit,
            orbital_names,
            kpoints,
            kweights,
            eigvals,
            occupations,
            projections,
            phases,
        })
    }


    fn parse_spin_block(txt: &str, nkpoints: usize, nbands: usize, nions: usize,
                        orbital_names: &mut Vec<String>)
        -> Result<(Vec<Vec<BandBlock>>, Matrix<f64>, Vector<f64>)> {
        let kpoint_re = Regex::new(r"(?m)^\s*k-point\s+(\d+)\s*:(.*?)weight\s*=\s*(\S+)")?;
        let float_re  = Regex::new(r"[-+]?\d*\.\d+(?:[eE][-+]?\d+)?")?;
        // F14.8 energies below -1000 eV leave no blank after `energy`
        let band_re   = Regex::new(r"(?m)^\s*band\s+(\d+)\s*#\s*energy\s*([^\s#]+)\s*#\s*occ\.\s*([^\s#]+)")?;

        let kstarts = kpoint_re.captures_iter(txt).collect::<Vec<_>>();
        ensure!(kstarts.len() == nkpoints, "Found {} k-points, expect {}.", kstarts.len(), nkpoints);

        let mut kpoints = Matrix::<f64>::zeros((nkpoints, 3));
        let mut kweights = Vector::<f64>::zeros(nkpoints);
        let mut ret = Vec::with_capacity(nkpoints);

        for (ik, cap) in kstarts.iter().enumerate() {
            let coords = float_re.find_iter(&cap[2])
                .map(|m| m.as_str().parse::<f64>())
                .collect::<std::result::Result<Vec<f64>, _>>()?;
            ensure!(coords.len() == 3, "Invalid k-point line: {:?}", &cap[0]);
            kpoints.row_mut(ik).assign(&ndarray::arr1(&coords));
            kweights[ik] = cap[3].parse::<f64>()
                .context(format!("Invalid k-point weight {:?}", &cap[3]))?;

            let start = cap.get(0).map(|m| m.end()).unwrap_or(0);
            let end = kstarts.get(ik + 1)
                .and_then(|c| c.get(0))
                .map(|m| m.start())
                .unwrap_or(txt.len());
            let bands = Self::parse_kpoint_block(&txt[start .. end], &band_re, nbands, nions, orbital_names)
                .context(format!("Failed to parse k-point {}", ik + 1))?;
            ret.push(bands);
        }

        Ok((ret, kpoints, kweights))
    }


    fn parse_kpoint_block(txt: &str, band_re: &Regex, nbands: usize, nions: usize,
                          orbital_names: &mut Vec<String>) -> Result<Vec<BandBlock>> {
        let bstarts = band_re.captures_iter(txt).collect::<Vec<_>>();
        ensure!(bstarts.len() == nbands, "Found {} bands, expect {}.", bstarts.len(), nbands);

        let mut ret = Vec::with_capacity(nbands);
        for (ib, cap) in bstarts.iter().enumerate() {
            let start = cap.get(0).map(|m| m.end()).unwrap_or(0);
            let end = bstarts.get(ib + 1)
                .and_then(|c| c.get(0))
                .map(|m| m.start())
                .unwrap_or(txt.len());

            let mut band = Self::parse_band_block(&txt[start .. end], nions, orbital_names)
                .context(format!("Failed to parse band {}", ib + 1))?;
            band.energy = cap[2].parse::<f64>()
                .context(format!("Invalid band energy {:?}", &cap[2]))?;
            band.occupation = cap[3].parse::<f64>()
                .context(format!("Invalid occupation {:?}", &cap[3]))?;
            ret.push(band);
        }
        Ok(ret)
    }


    fn parse_band_block(txt: &str, nions: usize, orbital_names: &mut Vec<String>) -> Result<BandBlock> {
        let mut band = BandBlock::default();
        let mut nheaders = 0usize;
        let mut ntot = 0usize;
        let mut imag_pending = vec![false; nions];

        for line in txt.lines() {
            let tokens = line.split_whitespace().collect::<Vec<&str>>();
            let Some(&first) = tokens.first() else { continue };

            match first {
                "ion" => {
                    nheaders += 1;
                    let names = tokens[1..].iter()
                        .filter(|&&x| x != "tot")
                        .map(|x| x.to_string())
                        .collect::<Vec<String>>();
                    if orbital_names.is_empty() {
                        *orbital_names = names;
                    } else if nheaders == 1 && *orbital_names != names {
                        bail!("Orbital header changed: {:?} vs {:?}", names, orbital_names);
                    }
                    if nheaders == 2 {
                        band.phase = vec![vec![c64::new(0.0, 0.0); orbital_names.len()]; nions];
                    }
                },
                "tot" => {
                    if nheaders == 1 {
                        ntot += 1;
                    }
                },
                "charge" => (),
                _ => {
                    let Ok(iion) = first.parse::<usize>() else {
                        bail!("Unexpected line: {:?}", line);
                    };
                    ensure!(iion >= 1 && iion <= nions, "Ion index {} out of range 1..={}", iion, nions);
                    let iion = iion - 1;
                    let norb = orbital_names.len();
                    ensure!(nheaders > 0, "Projection line before orbital header: {:?}", line);

                    if nheaders == 1 {
                        ensure!(tokens.len() > norb, "Too few columns in line {:?}", line);
                        let values = parse_floats(&tokens[1 ..= norb], line)?;
                        while band.channels.len() <= ntot {
                            band.channels.push(vec![vec![0.0; norb]; nions]);
                        }
                        band.channels[ntot][iion] = values;
                    } else if tokens.len() > 2 * norb {
                        // one line per ion, (re, im) pairs
                        let values = parse_floats(&tokens[1 ..= 2 * norb], line)?;
                        for iorb in 0 .. norb {
                            band.phase[iion][iorb] = c64::new(values[2 * iorb], values[2 * iorb + 1]);
                        }
                    } else {
                        // two lines per ion, real part then imaginary part
                        ensure!(tokens.len() > norb, "Too few columns in line {:?}", line);
                        let values = parse_floats(&tokens[1 ..= norb], line)?;
                        for (iorb, v) in values.into_iter().enumerate() {
                            if imag_pending[iion] {
                                band.phase[iion][iorb].im = v;
                            } else {
                                band.phase[iion][iorb].re = v;
                            }
                        }
                        imag_pending[iion] = !imag_pending[iion];
                    }
                },
            }
        }

        ensure!(!band.channels.is_empty(), "No projection data found.");
        Ok(band)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    /// Two k-points, two bands, two ions, s/py/pz/px, LORBIT = 12 with (re, im) pairs.
    const PROCAR_PHASE: &str = "PROCAR lm decomposed + phase
# of k-points:    2         # of bands:    2         # of ions:    2

 k-point    1 :    0.00000000 0.00000000 0.00000000     weight = 0.50000000

band    1 # energy   -1.00000000 # occ.  1.00000000

ion      s     py     pz     px    tot
    1  0.100  0.000  0.000  0.000  0.100
    2  0.200  0.000  0.000  0.000  0.200
tot    0.300  0.000  0.000  0.000  0.300
ion          s             py             pz             px
    1  0.300  0.100  0.000  0.000  0.000  0.000  0.000  0.000
    2  0.400 -0.200  0.000  0.000  0.000  0.000  0.000  0.000
charge 0.300  0.000  0.000  0.000  0.300

band    2 # energy    1.00000000 # occ.  0.00000000

ion      s     py     pz     px    tot
    1  0.000  0.300  0.000  0.000  0.300
    2  0.000  0.000  0.400  0.000  0.400
tot    0.000  0.300  0.400  0.000  0.700
ion          s             py             pz             px
    1  0.000  0.000  0.500  0.000  0.000  0.000  0.000  0.000
    2  0.000  0.000  0.000  0.000  0.600  0.000  0.000  0.000
charge 0.000  0.300  0.400  0.000  0.700

 k-point    2 :    0.50000000-0.50000000 0.00000000     weight = 0.50000000

band    1 # energy   -0.50000000 # occ.  1.00000000

ion      s     py     pz     px    tot
    1  0.150  0.000  0.000  0.000  0.150
    2  0.250  0.000  0.000  0.000  0.250
tot    0.400  0.000  0.000  0.000  0.400
ion          s             py             pz             px
    1  0.380  0.000  0.000  0.000  0.000  0.000  0.000  0.000
    2  0.500  0.000  0.000  0.000  0.000  0.000  0.000  0.000
charge 0.400  0.000  0.000  0.000  0.400

band    2 # energy    1.50000000 # occ.  0.00000000

ion      s     py     pz     px    tot
    1  0.000  0.000  0.000  0.100  0.100
    2  0.000  0.000  0.000  0.900  0.900
tot    0.000  0.000  0.000  1.000  1.000
ion          s             py             pz             px
    1  0.000  0.000  0.000  0.000  0.000  0.000  0.300  0.000
    2  0.000  0.000  0.000  0.000  0.000  0.000  0.900  0.000
charge 0.000  0.000  0.000  1.000  1.000
";

    const PROCAR_ISPIN2: &str = "PROCAR lm decomposed
# of k-points:    1         # of bands:    1         # of ions:    1

 k-point    1 :    0.00000000 0.00000000 0.00000000     weight = 1.00000000

band    1 # energy   -2.00000000 # occ.  1.00000000

ion      s     py     pz     px    dxy    dyz    dz2    dxz  x2-y2    tot
    1  0.500  0.000  0.000  0.000  0.000  0.000  0.000  0.000  0.000  0.500

# of k-points:    1         # of bands:    1         # of ions:    1

 k-point    1 :    0.00000000 0.00000000 0.00000000     weight = 1.00000000

band    1 # energy   -1.50000000 # occ.  0.00000000

ion      s     py     pz     px    dxy    dyz    dz2    dxz  x2-y2    tot
    1  0.000  0.000  0.000  0.000  0.700  0.000  0.000  0.000  0.000  0.700
";

    const PROCAR_NCL: &str = "PROCAR lm decomposed
# of k-points:    1         # of bands:    1         # of ions:    1

 k-point    1 :    0.00000000 0.00000000 0.00000000     weight = 1.00000000

band    1 # energy   -3.00000000 # occ.  1.00000000

ion      s     py     pz     px    tot
    1  0.800  0.000  0.000  0.000  0.800
tot    0.800  0.000  0.000  0.000  0.800
    1  0.000  0.000  0.000  0.000  0.000
tot    0.000  0.000  0.000  0.000  0.000
    1  0.000  0.000  0.000  0.000  0.000
tot    0.000  0.000  0.000  0.000  0.000
    1  0.600  0.000  0.000  0.000  0.600
tot    0.600  0.000  0.000  0.000  0.600
";

    #[test]
    fn test_procar_with_phase() {
        let procar = Procar::from_txt(PROCAR_PHASE).unwrap();
        assert_eq!((procar.nkpoints, procar.nbands, procar.nions, procar.nspin), (2, 2, 2, 1));
        assert!(!procar.lsorbit);
        assert_eq!(procar.orbital_names, vec!["s", "py", "pz", "px"]);
        assert_eq!(procar.kpoints[[1, 0]], 0.5);
        assert_eq!(procar.kpoints[[1, 1]], -0.5);
        assert_eq!(procar.kweights[1], 0.5);
        assert_eq!(procar.eigvals[[0, 1, 0]], 1.0);
        assert_eq!(procar.occupations[[0, 0, 0]], 1.0);
        assert_eq!(procar.projections.dim(), (2, 2, 1, 2, 4));
        assert_eq!(procar.projections[[0, 0, 0, 1, 0]], 0.2);
        assert_eq!(procar.projections[[1, 1, 0, 1, 3]], 0.9);

        let phases = procar.phases.unwrap();
        assert_eq!(phases[[0, 0, 0, 0, 0]], c64::new(0.3, 0.1));
        assert_eq!(phases[[0, 0, 0, 1, 0]], c64::new(0.4, -0.2));
        assert_eq!(phases[[0, 1, 0, 1, 2]], c64::new(0.6, 0.0));
    }

    #[test]
    fn test_procar_ispin2() {
        let procar = Procar::from_txt(PROCAR_ISPIN2).unwrap();
        assert_eq!(procar.nspin, 2);
        assert!(procar.phases.is_none());
        assert_eq!(procar.orbital_names.len(), 9);
        assert_eq!(procar.eigvals[[0, 0, 0]], -2.0);
        assert_eq!(procar.eigvals[[0, 0, 1]], -1.5);
        assert_eq!(procar.projections.dim(), (1, 1, 2, 1, 9));
        assert_eq!(procar.projections[[0, 0, 0, 0, 0]], 0.5);
        assert_eq!(procar.projections[[0, 0, 1, 0, 4]], 0.7);
    }

    #[test]
    fn test_procar_ncl() {
        let procar = Procar::from_txt(PROCAR_NCL).unwrap();
        assert!(procar.lsorbit);
        assert_eq!(procar.nspin, 1);
        assert_eq!(procar.projections.dim(), (1, 1, 4, 1, 4));
        assert_eq!(procar.projections[[0, 0, 0, 0, 0]], 0.8);
        assert_eq!(procar.projections[[0, 0, 3, 0, 0]], 0.6);
    }

    #[test]
    fn test_procar_deep_energy() {
        let txt = PROCAR_ISPIN2.replace("band    1 # energy   -2.00000000", "band    1 # energy-1234.56789012");
        let procar = Procar::from_txt(&txt).unwrap();
        assert_eq!(procar.eigvals[[0, 0, 0]], -1234.56789012);
        assert_eq!(procar.eigvals[[0, 0, 1]], -1.5);
    }

    #[test]
    fn test_procar_invalid() {
        assert!(Procar::from_txt("").is_err());
        assert!(Procar::from_txt("not a procar\n").is_err());
        let truncated = PROCAR_ISPIN2.replace("band    1 # energy   -1.50000000", "");
        assert!(Procar::from_txt(&truncated).is_err());
    }
}
