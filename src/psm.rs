use std::sync::{Mutex, PoisonError};

use crate::peptide::PeptideWithSetModifications;
use crate::scoring::MatchedFragmentIon;
use crate::spectrum::Ms2Scan;

/// Scores closer than this are treated as tied.
pub const SCORE_TOLERANCE: f64 = 1e-3;

/// One peptide tied for the best score on a scan.
#[derive(Clone, Debug)]
pub struct BestMatch {
    pub notch: usize,
    pub peptide: PeptideWithSetModifications,
    pub matched_ions: Vec<MatchedFragmentIon>,
}

/// FDR bookkeeping, filled in by the FDR analysis engine after search.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FdrInfo {
    pub cumulative_target: f64,
    pub cumulative_decoy: f64,
    pub q_value: f64,
    pub cumulative_target_notch: f64,
    pub cumulative_decoy_notch: f64,
    pub q_value_notch: f64,
    pub pep: f64,
    pub pep_q_value: f64,
}

/// The best peptide candidates observed for one scan, with the tie set
/// retained for ambiguity reporting.
#[derive(Clone, Debug)]
pub struct PeptideSpectralMatch {
    pub scan_index: usize,
    pub scan_number: u32,
    pub precursor_mass: f32,
    pub full_file_path: String,
    /// Name of the protease that produced the candidates; FDR analysis
    /// groups by enzymatic context
    pub protease: String,
    pub best_score: f64,
    pub runner_up_score: f64,
    best: Vec<BestMatch>,
    pub fdr_info: Option<FdrInfo>,

    // resolved by `resolve_all_ambiguities`; `None` while candidates
    // disagree
    pub full_sequence: Option<String>,
    pub base_sequence: Option<String>,
    pub peptide_monoisotopic_mass: Option<f32>,
    pub notch: Option<usize>,
}

impl PeptideSpectralMatch {
    pub fn new(
        scan: &Ms2Scan,
        notch: usize,
        score: f64,
        peptide: PeptideWithSetModifications,
        matched_ions: Vec<MatchedFragmentIon>,
        full_file_path: &str,
        protease: &str,
    ) -> Self {
        PeptideSpectralMatch {
            scan_index: scan.scan_index,
            scan_number: scan.scan_number,
            precursor_mass: scan.precursor_mass,
            full_file_path: full_file_path.to_string(),
            protease: protease.to_string(),
            best_score: score,
            runner_up_score: 0.0,
            best: vec![BestMatch {
                notch,
                peptide,
                matched_ions,
            }],
            fdr_info: None,
            full_sequence: None,
            base_sequence: None,
            peptide_monoisotopic_mass: None,
            notch: None,
        }
    }

    pub fn best_matches(&self) -> &[BestMatch] {
        &self.best
    }

    /// Fold a new candidate into this match under the tie policy.
    pub fn add_or_replace(
        &mut self,
        peptide: PeptideWithSetModifications,
        score: f64,
        notch: usize,
        report_ambiguity: bool,
        matched_ions: Vec<MatchedFragmentIon>,
    ) {
        if score > self.best_score + SCORE_TOLERANCE {
            self.runner_up_score = self.best_score;
            self.best_score = score;
            self.best.clear();
            self.best.push(BestMatch {
                notch,
                peptide,
                matched_ions,
            });
        } else if score - self.best_score > -SCORE_TOLERANCE && report_ambiguity {
            self.best.push(BestMatch {
                notch,
                peptide,
                matched_ions,
            });
        } else if score > self.runner_up_score {
            self.runner_up_score = score;
        }
    }

    /// A match is a decoy only when every tied candidate is a decoy.
    pub fn is_decoy(&self) -> bool {
        self.best.iter().all(|b| b.peptide.is_decoy())
    }

    /// True when at least one tied candidate is a decoy; such matches are
    /// credited to the decoy side of FDR estimation, fractionally when the
    /// tie also contains targets.
    pub fn contains_decoy_candidate(&self) -> bool {
        self.best.iter().any(|b| b.peptide.is_decoy())
    }

    pub fn delta_score(&self) -> f64 {
        self.best_score - self.runner_up_score
    }

    /// Fraction of distinct best-matching full sequences that are decoys;
    /// an ambiguous target/decoy match contributes fractionally to the
    /// decoy count during FDR estimation.
    pub fn decoy_fraction(&self) -> f64 {
        let mut sequences: Vec<(String, bool)> = Vec::with_capacity(self.best.len());
        for b in &self.best {
            let full = b.peptide.full_sequence();
            if !sequences.iter().any(|(seq, _)| *seq == full) {
                sequences.push((full, b.peptide.is_decoy()));
            }
        }
        let decoy_hits = sequences.iter().filter(|(_, decoy)| *decoy).count();
        decoy_hits as f64 / sequences.len() as f64
    }

    /// Order the tie set canonically and fill the resolved fields with the
    /// values the candidates agree on (`None` where they disagree).
    pub fn resolve_all_ambiguities(&mut self) {
        self.best.sort_by_cached_key(|b| {
            (b.peptide.full_sequence(), b.peptide.protein.accession.clone())
        });

        let first = &self.best[0];
        let full = first.peptide.full_sequence();
        let base = first.peptide.base_sequence.clone();
        let mass = first.peptide.monoisotopic_mass;
        let notch = first.notch;

        self.full_sequence = self
            .best
            .iter()
            .all(|b| b.peptide.full_sequence() == full)
            .then_some(full);
        self.base_sequence = self
            .best
            .iter()
            .all(|b| b.peptide.base_sequence == base)
            .then_some(base);
        self.peptide_monoisotopic_mass = self
            .best
            .iter()
            .all(|b| (b.peptide.monoisotopic_mass - mass).abs() < 1e-4)
            .then_some(mass);
        self.notch = self.best.iter().all(|b| b.notch == notch).then_some(notch);
    }
}

/// One lockable slot per scan; slot `i` only ever holds a match with
/// `scan_index == i`.
pub type PsmSlab = Vec<Mutex<Option<PeptideSpectralMatch>>>;

pub fn empty_psm_slab(len: usize) -> PsmSlab {
    (0..len).map(|_| Mutex::new(None)).collect()
}

/// Drain a slab into the non-empty matches, in scan-index order.
pub fn collect_psms(slab: PsmSlab) -> Vec<PeptideSpectralMatch> {
    slab.into_iter()
        .filter_map(|slot| slot.into_inner().unwrap_or_else(PoisonError::into_inner))
        .collect()
}
