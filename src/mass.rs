use serde::{Deserialize, Serialize};

pub const H2O: f32 = 18.010565;
pub const PROTON: f32 = 1.007_276_4;
pub const NH3: f32 = 17.026548;
pub const HYDROGEN: f32 = 1.007_825_0;

/// Mass window around a theoretical value, in parts-per-million or Daltons
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tolerance {
    Ppm(f32),
    Da(f32),
}

impl Tolerance {
    /// Compute the (`lower`, `upper`) window (in Da) for a monoisotopic
    /// mass and a given tolerance
    pub fn bounds(&self, center: f32) -> (f32, f32) {
        match self {
            Tolerance::Ppm(ppm) => {
                let delta = center * ppm / 1_000_000.0;
                (center - delta, center + delta)
            }
            Tolerance::Da(da) => (center - da, center + da),
        }
    }

    /// Does `measured` fall inside the window centered on `theoretical`?
    pub fn within(&self, measured: f32, theoretical: f32) -> bool {
        let (lo, hi) = self.bounds(theoretical);
        measured >= lo && measured <= hi
    }

    /// Width of the window at `center`, in Da
    pub fn width(&self, center: f32) -> f32 {
        let (lo, hi) = self.bounds(center);
        hi - lo
    }
}

pub trait Mass {
    fn monoisotopic(&self) -> f32;
}

pub const VALID_AA: [char; 20] = [
    'A', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'K', 'L', 'M', 'N', 'P', 'Q', 'R', 'S', 'T', 'V', 'W',
    'Y',
];

impl Mass for char {
    fn monoisotopic(&self) -> f32 {
        match self {
            'A' => 71.037_12,
            'R' => 156.101_1,
            'N' => 114.042_93,
            'D' => 115.026_94,
            'C' => 103.009_186,
            'E' => 129.042_59,
            'Q' => 128.058_58,
            'G' => 57.021_465,
            'H' => 137.058_91,
            'I' => 113.084_06,
            'L' => 113.084_06,
            'K' => 128.094_96,
            'M' => 131.040_48,
            'F' => 147.068_42,
            'P' => 97.052_765,
            'S' => 87.032_03,
            'T' => 101.047_676,
            'W' => 186.079_32,
            'Y' => 163.063_32,
            'V' => 99.068_41,
            _ => unreachable!("BUG: invalid amino acid"),
        }
    }
}

/// Monoisotopic mass of an unmodified peptide sequence, or `None` if the
/// sequence contains a non-standard residue (selenocysteine, ambiguity
/// codes, etc. are rejected at peptide construction)
pub fn monoisotopic_mass(sequence: &str) -> Option<f32> {
    let mut mass = H2O;
    for ch in sequence.chars() {
        if !VALID_AA.contains(&ch) {
            return None;
        }
        mass += ch.monoisotopic();
    }
    Some(mass)
}
