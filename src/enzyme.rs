use serde::{Deserialize, Serialize};

/// Site-specific cleavage rule: cut after any residue in `cleave_after`,
/// unless the next residue is in `block_before`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protease {
    pub name: String,
    cleave_after: Vec<char>,
    block_before: Vec<char>,
}

impl Protease {
    pub fn new(name: &str, cleave_after: &[char], block_before: &[char]) -> Self {
        Protease {
            name: name.to_string(),
            cleave_after: cleave_after.to_vec(),
            block_before: block_before.to_vec(),
        }
    }

    pub fn trypsin() -> Self {
        Protease::new("trypsin", &['K', 'R'], &['P'])
    }

    pub fn lys_c() -> Self {
        Protease::new("lys-c", &['K'], &[])
    }

    pub fn arg_c() -> Self {
        Protease::new("arg-c", &['R'], &[])
    }

    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "trypsin" => Some(Protease::trypsin()),
            "lys-c" => Some(Protease::lys_c()),
            "arg-c" => Some(Protease::arg_c()),
            _ => None,
        }
    }

    /// 0-based indices of residues after which this protease cuts
    pub fn cleavage_sites(&self, sequence: &str) -> Vec<usize> {
        let residues = sequence.as_bytes();
        (0..residues.len())
            .filter(|&i| {
                self.cleave_after.contains(&(residues[i] as char))
                    && residues
                        .get(i + 1)
                        .map_or(true, |&next| !self.block_before.contains(&(next as char)))
            })
            .collect()
    }

    /// Half-open `[start, end)` spans of every peptide this protease
    /// produces from `sequence`, allowing up to `missed_cleavages` internal
    /// sites and honoring the length bounds
    pub fn spans(
        &self,
        sequence: &str,
        missed_cleavages: usize,
        min_len: usize,
        max_len: usize,
    ) -> Vec<(usize, usize)> {
        if sequence.is_empty() {
            return Vec::new();
        }
        let mut boundaries = vec![0];
        boundaries.extend(self.cleavage_sites(sequence).iter().map(|i| i + 1));
        if *boundaries.last().expect("non-empty") != sequence.len() {
            boundaries.push(sequence.len());
        }

        let mut spans = Vec::new();
        for i in 0..boundaries.len() - 1 {
            for skip in 0..=missed_cleavages {
                let Some(&end) = boundaries.get(i + 1 + skip) else {
                    break;
                };
                let len = end - boundaries[i];
                if len >= min_len && len <= max_len {
                    spans.push((boundaries[i], end));
                }
            }
        }
        spans
    }
}

/// How proteins are digested for one search.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DigestionParams {
    pub protease: Protease,
    pub max_missed_cleavages: usize,
    pub min_peptide_length: usize,
    pub max_peptide_length: usize,
    pub max_variable_mods_per_peptide: usize,
}

impl Default for DigestionParams {
    fn default() -> Self {
        DigestionParams {
            protease: Protease::trypsin(),
            max_missed_cleavages: 2,
            min_peptide_length: 5,
            max_peptide_length: 60,
            max_variable_mods_per_peptide: 2,
        }
    }
}
