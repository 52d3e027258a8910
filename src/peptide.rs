use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use fnv::FnvHasher;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::enzyme::DigestionParams;
use crate::error::EngineError;
use crate::mass::{monoisotopic_mass, VALID_AA};
use crate::modification::{mod_fits, LocationRestriction, Modification, Motif};

/// Reverse decoys more similar to their target than this are rescrambled.
pub const DECOY_SIMILARITY_THRESHOLD: f64 = 0.3;

/// Accession prefix marking generated decoy sequences.
pub const DECOY_PREFIX: &str = "rev_";

const MAX_SCRAMBLE_ATTEMPTS: usize = 10;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Protein {
    pub accession: String,
    /// Upper-case amino-acid sequence
    pub base_sequence: String,
    pub is_decoy: bool,
    /// For variant proteins, the accession of the protein this one was
    /// derived from; used only for accession lookup
    pub base_protein_accession: Option<String>,
}

impl Protein {
    pub fn new(accession: &str, sequence: &str) -> Self {
        Protein {
            accession: accession.to_string(),
            base_sequence: sequence.to_ascii_uppercase(),
            is_decoy: false,
            base_protein_accession: None,
        }
    }

    pub fn len(&self) -> usize {
        self.base_sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.base_sequence.is_empty()
    }

    /// Accession to report results under: the base protein's for variants
    pub fn effective_accession(&self) -> &str {
        self.base_protein_accession
            .as_deref()
            .unwrap_or(&self.accession)
    }
}

/// Metabolic label substituting the mass of one amino acid.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SilacLabel {
    pub id: String,
    pub amino_acid: char,
    pub mass_delta: f32,
    modification: Modification,
}

impl SilacLabel {
    pub fn new(id: &str, amino_acid: char, mass_delta: f32) -> Result<Self, EngineError> {
        if !VALID_AA.contains(&amino_acid) {
            return Err(EngineError::InvalidConfiguration(format!(
                "silac label `{id}` targets unknown residue `{amino_acid}`"
            )));
        }
        let motif = Motif::new(&amino_acid.to_string())?;
        Ok(SilacLabel {
            id: id.to_string(),
            amino_acid,
            mass_delta,
            modification: Modification::new(id, motif, mass_delta, LocationRestriction::Anywhere),
        })
    }

    pub fn as_modification(&self) -> &Modification {
        &self.modification
    }
}

/// A digested peptide with a concrete assignment of modifications.
///
/// Modification positions use the augmented frame: position 1 is the peptide
/// N-terminus, residue *i* (1-based) is position *i*+1, and the C-terminus
/// is `length + 2`.
#[derive(Clone, Debug)]
pub struct PeptideWithSetModifications {
    pub protein: Arc<Protein>,
    pub one_based_start: usize,
    pub base_sequence: String,
    pub modifications: BTreeMap<usize, Modification>,
    pub monoisotopic_mass: f32,
}

impl PeptideWithSetModifications {
    /// `None` if the sequence contains a residue without a defined mass
    pub fn new(
        protein: Arc<Protein>,
        one_based_start: usize,
        base_sequence: &str,
        modifications: BTreeMap<usize, Modification>,
    ) -> Option<Self> {
        let mut mass = monoisotopic_mass(base_sequence)?;
        for m in modifications.values() {
            mass += m.monoisotopic_mass;
        }
        Some(PeptideWithSetModifications {
            protein,
            one_based_start,
            base_sequence: base_sequence.to_string(),
            modifications,
            monoisotopic_mass: mass,
        })
    }

    pub fn len(&self) -> usize {
        self.base_sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.base_sequence.is_empty()
    }

    pub fn is_decoy(&self) -> bool {
        self.protein.is_decoy
    }

    /// Modification sitting on the 0-based residue `index`, if any
    pub fn modification_on_residue(&self, index: usize) -> Option<&Modification> {
        self.modifications.get(&(index + 2))
    }

    /// Sequence with mass annotations, e.g. `PEPT(+15.9949)IDEK`
    pub fn full_sequence(&self) -> String {
        let mut out = String::with_capacity(self.base_sequence.len());
        if let Some(m) = self.modifications.get(&1) {
            out.push_str(&format!("({:+.4})-", m.monoisotopic_mass));
        }
        for (i, ch) in self.base_sequence.chars().enumerate() {
            out.push(ch);
            if let Some(m) = self.modifications.get(&(i + 2)) {
                out.push_str(&format!("({:+.4})", m.monoisotopic_mass));
            }
        }
        if let Some(m) = self.modifications.get(&(self.len() + 2)) {
            out.push_str(&format!("-({:+.4})", m.monoisotopic_mass));
        }
        out
    }

    /// Reverse decoy: every residue but the C-terminal one is reversed, and
    /// modifications travel with their residues.
    pub fn reverse_decoy(&self) -> PeptideWithSetModifications {
        let len = self.len();
        let residues: Vec<char> = self.base_sequence.chars().collect();
        let mut decoy_seq = String::with_capacity(len);
        for i in 0..len {
            if i + 1 == len {
                decoy_seq.push(residues[i]);
            } else {
                decoy_seq.push(residues[len - 2 - i]);
            }
        }
        let order: Vec<usize> = (0..len)
            .map(|i| if i + 1 == len { i } else { len - 2 - i })
            .collect();
        self.decoy_with_order(decoy_seq, &order)
    }

    /// Scrambled decoy: a deterministic shuffle of the non C-terminal
    /// residues, retried while the result stays too close to the target.
    pub fn scrambled_decoy(&self) -> PeptideWithSetModifications {
        let len = self.len();
        if len < 2 {
            return self.reverse_decoy();
        }
        let mut hasher = FnvHasher::default();
        self.base_sequence.hash(&mut hasher);
        let mut rng = StdRng::seed_from_u64(hasher.finish());

        let residues: Vec<char> = self.base_sequence.chars().collect();
        let mut order: Vec<usize> = (0..len).collect();
        let mut candidate = self.reverse_decoy();
        for _ in 0..MAX_SCRAMBLE_ATTEMPTS {
            order[..len - 1].shuffle(&mut rng);
            let decoy_seq: String = order.iter().map(|&i| residues[i]).collect();
            candidate = self.decoy_with_order(decoy_seq, &order);
            if sequence_similarity(self, &candidate) <= DECOY_SIMILARITY_THRESHOLD {
                break;
            }
        }
        candidate
    }

    /// Build the decoy peptide whose residue at position `i` came from
    /// target position `order[i]`.
    fn decoy_with_order(
        &self,
        decoy_seq: String,
        order: &[usize],
    ) -> PeptideWithSetModifications {
        let len = self.len();
        let mut new_position = vec![0usize; len];
        for (new_idx, &old_idx) in order.iter().enumerate() {
            new_position[old_idx] = new_idx;
        }

        let mut mods = BTreeMap::new();
        for (&key, m) in &self.modifications {
            let new_key = if key == 1 || key == len + 2 {
                key
            } else {
                new_position[key - 2] + 2
            };
            mods.insert(new_key, m.clone());
        }

        let protein = Arc::new(Protein {
            accession: format!("{}{}", DECOY_PREFIX, self.protein.accession),
            base_sequence: decoy_seq.clone(),
            is_decoy: true,
            base_protein_accession: None,
        });
        PeptideWithSetModifications::new(protein, 1, &decoy_seq, mods)
            .expect("decoy is a permutation of a valid sequence")
    }
}

/// Fraction of aligned positions at which `decoy` still looks like
/// `target`: residues must agree, and the target must either carry no
/// modification there or both carry the same one.
pub fn sequence_similarity(
    target: &PeptideWithSetModifications,
    decoy: &PeptideWithSetModifications,
) -> f64 {
    debug_assert_eq!(target.len(), decoy.len());
    let mut matches = 0usize;
    for (i, (t, d)) in target
        .base_sequence
        .chars()
        .zip(decoy.base_sequence.chars())
        .enumerate()
    {
        if t != d {
            continue;
        }
        match target.modification_on_residue(i) {
            None => matches += 1,
            Some(tm) => {
                if decoy.modification_on_residue(i).map(|dm| &dm.id) == Some(&tm.id) {
                    matches += 1;
                }
            }
        }
    }
    matches as f64 / target.len() as f64
}

/// Augmented-frame key for a modification with the given restriction on the
/// 0-based residue `index` of a peptide of length `len`.
fn augmented_position(restriction: LocationRestriction, index: usize, len: usize) -> usize {
    match restriction {
        LocationRestriction::Anywhere => index + 2,
        LocationRestriction::NTerminal | LocationRestriction::PeptideNTerminal => 1,
        LocationRestriction::CTerminal | LocationRestriction::PeptideCTerminal => len + 2,
    }
}

/// Digest a protein into peptides carrying fixed modifications, every
/// combination of variable modifications up to the configured maximum, and
/// SILAC label masses.
pub fn digest(
    protein: &Arc<Protein>,
    params: &DigestionParams,
    fixed_mods: &[Modification],
    variable_mods: &[Modification],
    silac_labels: &[SilacLabel],
) -> Vec<PeptideWithSetModifications> {
    let mut fixed: Vec<Modification> = fixed_mods.to_vec();
    fixed.extend(silac_labels.iter().map(|l| l.as_modification().clone()));

    let spans = params.protease.spans(
        &protein.base_sequence,
        params.max_missed_cleavages,
        params.min_peptide_length,
        params.max_peptide_length,
    );

    let mut peptides = Vec::new();
    for (start, end) in spans {
        let sequence = &protein.base_sequence[start..end];
        let len = end - start;

        let mut base_mods: BTreeMap<usize, Modification> = BTreeMap::new();
        for m in fixed.iter().filter(|m| m.valid) {
            for i in 0..len {
                if mod_fits(m, protein, i + 1, len, start + i + 1) {
                    let key = augmented_position(m.location_restriction, i, len);
                    base_mods.entry(key).or_insert_with(|| m.clone());
                }
            }
        }

        let mut candidates: Vec<(usize, Modification)> = Vec::new();
        for m in variable_mods.iter().filter(|m| m.valid) {
            for i in 0..len {
                if mod_fits(m, protein, i + 1, len, start + i + 1) {
                    let key = augmented_position(m.location_restriction, i, len);
                    if !base_mods.contains_key(&key) {
                        candidates.push((key, m.clone()));
                    }
                }
            }
        }

        for combo in
            variable_mod_combinations(&candidates, params.max_variable_mods_per_peptide)
        {
            let mut mods = base_mods.clone();
            mods.extend(combo);
            if let Some(peptide) = PeptideWithSetModifications::new(
                Arc::clone(protein),
                start + 1,
                sequence,
                mods,
            ) {
                peptides.push(peptide);
            }
        }
    }
    peptides
}

/// Every subset of `candidates` of size `0..=max` with pairwise distinct
/// positions, in a deterministic order (the empty set first).
fn variable_mod_combinations(
    candidates: &[(usize, Modification)],
    max: usize,
) -> Vec<BTreeMap<usize, Modification>> {
    let mut out = vec![BTreeMap::new()];
    let mut current = BTreeMap::new();
    extend_combinations(candidates, 0, max, &mut current, &mut out);
    out
}

fn extend_combinations(
    candidates: &[(usize, Modification)],
    from: usize,
    remaining: usize,
    current: &mut BTreeMap<usize, Modification>,
    out: &mut Vec<BTreeMap<usize, Modification>>,
) {
    if remaining == 0 {
        return;
    }
    for idx in from..candidates.len() {
        let (key, m) = &candidates[idx];
        if current.contains_key(key) {
            continue;
        }
        current.insert(*key, m.clone());
        out.push(current.clone());
        extend_combinations(candidates, idx + 1, remaining - 1, current, out);
        current.remove(key);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn anywhere(id: &str, motif: &str, mass: f32) -> Modification {
        Modification::new(id, Motif::new(motif).unwrap(), mass, LocationRestriction::Anywhere)
    }

    fn bare_peptide(seq: &str) -> PeptideWithSetModifications {
        let protein = Arc::new(Protein::new("P1", seq));
        PeptideWithSetModifications::new(protein, 1, seq, BTreeMap::new()).unwrap()
    }

    #[test]
    fn tryptic_digest() {
        let protein = Arc::new(Protein::new("P1", "PEPTIDEKMAGICR"));
        let params = DigestionParams::default();
        let peptides = digest(&protein, &params, &[], &[], &[]);
        let sequences: Vec<&str> =
            peptides.iter().map(|p| p.base_sequence.as_str()).collect();
        assert!(sequences.contains(&"PEPTIDEK"));
        assert!(sequences.contains(&"MAGICR"));
        assert!(sequences.contains(&"PEPTIDEKMAGICR"));

        let peptide = peptides.iter().find(|p| p.base_sequence == "MAGICR").unwrap();
        assert_eq!(peptide.one_based_start, 9);
    }

    #[test]
    fn fixed_mods_apply_everywhere() {
        let protein = Arc::new(Protein::new("P1", "PEPTIDEKMAGICR"));
        let carbamidomethyl = anywhere("carbamidomethyl", "C", 57.02146);
        let params = DigestionParams::default();
        let peptides = digest(&protein, &params, &[carbamidomethyl], &[], &[]);
        let magic = peptides.iter().find(|p| p.base_sequence == "MAGICR").unwrap();
        // C is 0-based residue 4 of MAGICR
        assert_eq!(
            magic.modification_on_residue(4).map(|m| m.id.as_str()),
            Some("carbamidomethyl")
        );
        let bare = crate::mass::monoisotopic_mass("MAGICR").unwrap();
        assert!((magic.monoisotopic_mass - bare - 57.02146).abs() < 1e-3);
    }

    #[test]
    fn variable_mod_combinations_are_bounded() {
        let protein = Arc::new(Protein::new("P1", "MAMAMR"));
        let oxidation = anywhere("oxidation", "M", 15.9949);
        let mut params = DigestionParams::default();
        params.max_variable_mods_per_peptide = 2;
        let peptides = digest(&protein, &params, &[], &[oxidation.clone()], &[]);
        // MAMAMR with three M sites: 1 bare + 3 singles + 3 pairs
        let forms: Vec<&PeptideWithSetModifications> =
            peptides.iter().filter(|p| p.base_sequence == "MAMAMR").collect();
        assert_eq!(forms.len(), 7);

        params.max_variable_mods_per_peptide = 3;
        let peptides = digest(&protein, &params, &[], &[oxidation], &[]);
        let forms = peptides.iter().filter(|p| p.base_sequence == "MAMAMR").count();
        assert_eq!(forms, 8);
    }

    #[test]
    fn silac_labels_shift_mass() {
        let protein = Arc::new(Protein::new("P1", "PEPTIDEK"));
        let label = SilacLabel::new("heavy-K", 'K', 8.0142).unwrap();
        let params = DigestionParams::default();
        let peptides = digest(&protein, &params, &[], &[], &[label]);
        let bare = crate::mass::monoisotopic_mass("PEPTIDEK").unwrap();
        assert!((peptides[0].monoisotopic_mass - bare - 8.0142).abs() < 1e-3);

        assert!(SilacLabel::new("bad", 'B', 1.0).is_err());
    }

    #[test]
    fn reverse_decoy_keeps_cterm_and_remaps_mods() {
        let protein = Arc::new(Protein::new("P1", "PEPTIDEK"));
        let mut mods = BTreeMap::new();
        mods.insert(2, anywhere("label", "P", 10.0));
        let peptide =
            PeptideWithSetModifications::new(protein, 1, "PEPTIDEK", mods).unwrap();

        let decoy = peptide.reverse_decoy();
        assert_eq!(decoy.base_sequence, "EDITPEPK");
        assert!(decoy.is_decoy());
        assert!(decoy.protein.accession.starts_with(DECOY_PREFIX));
        // the P that sat at residue 1 is now residue 7 (augmented key 8)
        assert_eq!(decoy.modification_on_residue(6).map(|m| m.id.as_str()), Some("label"));
        assert!((decoy.monoisotopic_mass - peptide.monoisotopic_mass).abs() < 1e-4);
    }

    #[test]
    fn similarity_counts_matching_positions() {
        let target = bare_peptide("PEPTIDEK");
        assert_eq!(sequence_similarity(&target, &target), 1.0);

        let decoy = target.reverse_decoy();
        // EDITPEPK agrees with PEPTIDEK at T and the fixed C-terminal K
        assert!((sequence_similarity(&target, &decoy) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn similarity_requires_matching_modifications() {
        let protein = Arc::new(Protein::new("P1", "AAAA"));
        let target = PeptideWithSetModifications::new(
            Arc::clone(&protein),
            1,
            "AAAA",
            BTreeMap::from([(2, anywhere("x", "A", 1.0))]),
        )
        .unwrap();
        let same = PeptideWithSetModifications::new(
            Arc::clone(&protein),
            1,
            "AAAA",
            BTreeMap::from([(2, anywhere("x", "A", 1.0))]),
        )
        .unwrap();
        let different = PeptideWithSetModifications::new(
            protein,
            1,
            "AAAA",
            BTreeMap::from([(2, anywhere("y", "A", 2.0))]),
        )
        .unwrap();
        assert_eq!(sequence_similarity(&target, &same), 1.0);
        // residue 0 carries a different mod, the other three are unmodified
        assert_eq!(sequence_similarity(&target, &different), 0.75);
    }

    #[test]
    fn scrambled_decoy_is_deterministic() {
        let peptide = bare_peptide("MAGICPEPTIDEK");
        let a = peptide.scrambled_decoy();
        let b = peptide.scrambled_decoy();
        assert_eq!(a.base_sequence, b.base_sequence);
        assert_eq!(a.base_sequence.len(), peptide.len());
        assert!(a.base_sequence.ends_with('K'));
        assert!(a.is_decoy());
    }

    #[test]
    fn full_sequence_annotations() {
        let protein = Arc::new(Protein::new("P1", "PEPTIDEK"));
        let mut mods = BTreeMap::new();
        mods.insert(5, anywhere("ox", "T", 15.9949));
        let peptide =
            PeptideWithSetModifications::new(protein, 1, "PEPTIDEK", mods).unwrap();
        assert_eq!(peptide.full_sequence(), "PEPT(+15.9949)IDEK");
    }
}
