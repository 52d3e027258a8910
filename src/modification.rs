use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::peptide::Protein;

/// Where on a protein or peptide a modification is allowed to sit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocationRestriction {
    Anywhere,
    NTerminal,
    CTerminal,
    PeptideNTerminal,
    PeptideCTerminal,
}

/// Short sequence pattern around a modifiable residue.
///
/// The single uppercase letter is the anchor; lowercase letters are flanking
/// context; `X`/`x` matches any residue. `"T"` anchors on threonine,
/// `"Nxs"` anchors on asparagine two residues before a serine.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Motif {
    pattern: String,
    anchor: usize,
}

impl Motif {
    pub fn new(pattern: &str) -> Result<Self, EngineError> {
        let uppercase = pattern.chars().filter(|c| c.is_ascii_uppercase()).count();
        if uppercase != 1 || !pattern.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(EngineError::InvalidMotif(pattern.to_string()));
        }
        let anchor = pattern
            .chars()
            .position(|c| c.is_ascii_uppercase())
            .expect("uppercase count checked above");
        Ok(Motif {
            pattern: pattern.to_string(),
            anchor,
        })
    }

    /// Index of the uppercase anchor within the pattern
    pub fn anchor(&self) -> usize {
        self.anchor
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl TryFrom<String> for Motif {
    type Error = EngineError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Motif::new(&s)
    }
}

impl From<Motif> for String {
    fn from(m: Motif) -> String {
        m.pattern
    }
}

/// A known modification: a mass shift tied to a motif and a location rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Modification {
    pub id: String,
    pub motif: Motif,
    pub monoisotopic_mass: f32,
    pub location_restriction: LocationRestriction,
    /// Invalid entries are carried through parsing but never placed
    pub valid: bool,
}

impl Modification {
    pub fn new(
        id: &str,
        motif: Motif,
        monoisotopic_mass: f32,
        location_restriction: LocationRestriction,
    ) -> Self {
        Modification {
            id: id.to_string(),
            motif,
            monoisotopic_mass,
            location_restriction,
            valid: true,
        }
    }
}

/// Can `modification` sit on the residue at `protein_position` (1-based)?
///
/// The motif is aligned so its anchor covers the candidate residue, every
/// motif character is checked against the protein sequence (`X` matches
/// anything, comparisons are case-insensitive), and then the location
/// restriction is applied. `peptide_position` is 1-based within the peptide.
pub fn mod_fits(
    modification: &Modification,
    protein: &Protein,
    peptide_position: usize,
    peptide_length: usize,
    protein_position: usize,
) -> bool {
    let motif = &modification.motif;
    let offset = protein_position as isize - motif.anchor() as isize - 1;
    let sequence = protein.base_sequence.as_bytes();

    for (j, c) in motif.pattern().chars().enumerate() {
        let p = j as isize + offset;
        if p < 0 || p >= sequence.len() as isize {
            return false;
        }
        let c = c.to_ascii_uppercase();
        if c != 'X' && c != sequence[p as usize].to_ascii_uppercase() as char {
            return false;
        }
    }

    match modification.location_restriction {
        LocationRestriction::Anywhere => true,
        LocationRestriction::NTerminal => protein_position <= 2,
        LocationRestriction::PeptideNTerminal => peptide_position == 1,
        LocationRestriction::PeptideCTerminal => peptide_position == peptide_length,
        LocationRestriction::CTerminal => protein_position == protein.base_sequence.len(),
    }
}
