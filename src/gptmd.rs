use std::sync::atomic::{AtomicBool, Ordering};

use fnv::{FnvHashMap, FnvHashSet};
use log::info;

use crate::error::EngineError;
use crate::mass::Tolerance;
use crate::modification::{mod_fits, Modification};
use crate::peptide::PeptideWithSetModifications;
use crate::progress::ProgressSink;
use crate::psm::PeptideSpectralMatch;

/// Matches above this notch q-value are not trusted enough to mine for
/// modifications.
const GPTMD_Q_VALUE_CUTOFF: f64 = 0.05;

#[derive(Clone, Debug, Default)]
pub struct GptmdResults {
    /// Candidate sites per protein accession: 1-based position in the
    /// protein and the modification to annotate there
    pub mods: FnvHashMap<String, Vec<(usize, Modification)>>,
    pub mods_added: usize,
    pub incomplete: bool,
}

/// Global PTM discovery: explain the leftover precursor mass difference of
/// confident matches with known modifications (or an allowed pair of
/// them), and collect every protein position the explanation fits.
pub struct GptmdEngine<'a> {
    /// FDR-analyzed matches from a completed search
    pub psms: &'a [PeptideSpectralMatch],
    pub gptmd_modifications: &'a [Modification],
    /// Pairs of modification masses whose sum may explain a mass
    /// difference jointly
    pub combos: &'a [(f32, f32)],
    /// Precursor tolerance per spectrum file
    pub file_tolerances: &'a FnvHashMap<String, Tolerance>,
    pub progress: &'a dyn ProgressSink,
    pub stop_loops: &'a AtomicBool,
}

impl GptmdEngine<'_> {
    pub fn run(&self) -> Result<GptmdResults, EngineError> {
        let mut results = GptmdResults::default();
        let mut seen: FnvHashMap<String, FnvHashSet<(usize, String)>> = FnvHashMap::default();

        let candidates: Vec<&PeptideSpectralMatch> = self
            .psms
            .iter()
            .filter(|psm| {
                !psm.is_decoy()
                    && psm
                        .fdr_info
                        .as_ref()
                        .map_or(false, |info| info.q_value_notch <= GPTMD_Q_VALUE_CUTOFF)
            })
            .collect();

        let mut old_percent = 0;
        for (done, psm) in candidates.iter().enumerate() {
            if self.stop_loops.load(Ordering::Relaxed) {
                results.incomplete = true;
                return Ok(results);
            }
            let tolerance = self
                .file_tolerances
                .get(&psm.full_file_path)
                .copied()
                .ok_or_else(|| EngineError::MissingFileTolerance(psm.full_file_path.clone()))?;

            for best in psm.best_matches() {
                let peptide = &best.peptide;
                for candidate in possible_mods(
                    psm.precursor_mass,
                    self.gptmd_modifications,
                    self.combos,
                    tolerance,
                    peptide,
                ) {
                    for i in 0..peptide.len() {
                        let protein_position = peptide.one_based_start + i;
                        if mod_fits(
                            &candidate,
                            &peptide.protein,
                            i + 1,
                            peptide.len(),
                            protein_position,
                        ) {
                            let accession = peptide.protein.effective_accession();
                            let new = seen
                                .entry(accession.to_string())
                                .or_default()
                                .insert((protein_position, candidate.id.clone()));
                            if new {
                                results
                                    .mods
                                    .entry(accession.to_string())
                                    .or_default()
                                    .push((protein_position, candidate.clone()));
                                results.mods_added += 1;
                            }
                        }
                    }
                }
            }

            let percent = (done + 1) * 100 / candidates.len();
            if percent > old_percent {
                old_percent = percent;
                self.progress
                    .report(percent, &format!("{percent}% of candidate matches mined"));
            }
        }

        info!(
            "gptmd: {} candidate sites on {} proteins from {} confident matches",
            results.mods_added,
            results.mods.len(),
            candidates.len()
        );
        Ok(results)
    }
}

/// Modifications (alone, relocated, or as half of an allowed pair) whose
/// mass explains the difference between the observed precursor and the
/// peptide's theoretical mass.
///
/// The same modification can be yielded through several combo paths;
/// callers deduplicate on insertion.
pub fn possible_mods(
    precursor_mass: f32,
    all_mods: &[Modification],
    combos: &[(f32, f32)],
    tolerance: Tolerance,
    peptide: &PeptideWithSetModifications,
) -> Vec<Modification> {
    let mut out = Vec::new();
    for m in all_mods.iter().filter(|m| m.valid) {
        if tolerance.within(
            precursor_mass,
            peptide.monoisotopic_mass + m.monoisotopic_mass,
        ) {
            out.push(m.clone());
        }
        // swapping an existing modification of the same motif for this one
        for existing in peptide.modifications.values() {
            if existing.motif == m.motif
                && tolerance.within(
                    precursor_mass,
                    peptide.monoisotopic_mass + m.monoisotopic_mass
                        - existing.monoisotopic_mass,
                )
            {
                out.push(m.clone());
            }
        }
    }
    for &(m1, m2) in combos {
        if tolerance.within(precursor_mass, peptide.monoisotopic_mass + m1 + m2) {
            // each half of the pair, found by subtracting the other
            out.extend(possible_mods(
                precursor_mass - m2,
                all_mods,
                &[],
                tolerance,
                peptide,
            ));
            out.extend(possible_mods(
                precursor_mass - m1,
                all_mods,
                &[],
                tolerance,
                peptide,
            ));
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::modification::{LocationRestriction, Motif};
    use crate::peptide::Protein;
    use crate::progress::NullProgress;
    use crate::psm::FdrInfo;
    use crate::spectrum::Ms2Scan;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn modification(id: &str, motif: &str, mass: f32) -> Modification {
        Modification::new(
            id,
            Motif::new(motif).unwrap(),
            mass,
            LocationRestriction::Anywhere,
        )
    }

    fn confident_psm(sequence: &str, precursor_mass: f32) -> PeptideSpectralMatch {
        let protein = Arc::new(Protein::new("P1", sequence));
        let peptide =
            PeptideWithSetModifications::new(protein, 1, sequence, BTreeMap::new()).unwrap();
        let scan = Ms2Scan::new(1, precursor_mass, None, vec![]);
        let mut psm =
            PeptideSpectralMatch::new(&scan, 0, 10.0, peptide, vec![], "a.mzML", "trypsin");
        psm.resolve_all_ambiguities();
        psm.fdr_info = Some(FdrInfo::default());
        psm
    }

    fn tolerances() -> FnvHashMap<String, Tolerance> {
        FnvHashMap::from_iter([("a.mzML".to_string(), Tolerance::Ppm(10.0))])
    }

    #[test]
    fn single_mass_difference_is_localized() {
        let oxidation = modification("oxidation", "T", 15.9949);
        let peptide_mass = crate::mass::monoisotopic_mass("PEPTIDEK").unwrap();
        let psm = confident_psm("PEPTIDEK", peptide_mass + 15.9949);
        let psms = vec![psm];
        let stop = std::sync::atomic::AtomicBool::new(false);
        let tolerances = tolerances();
        let engine = GptmdEngine {
            psms: &psms,
            gptmd_modifications: std::slice::from_ref(&oxidation),
            combos: &[],
            file_tolerances: &tolerances,
            progress: &NullProgress,
            stop_loops: &stop,
        };
        let results = engine.run().unwrap();
        assert_eq!(results.mods_added, 1);
        let sites = results.mods.get("P1").unwrap();
        // T is protein position 4
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].0, 4);
        assert_eq!(sites[0].1.id, "oxidation");
    }

    #[test]
    fn combos_yield_both_halves() {
        let methyl = modification("methyl", "K", 14.01565);
        let acetyl = modification("acetyl", "K", 42.01057);
        let mods = vec![methyl, acetyl];
        let peptide_mass = crate::mass::monoisotopic_mass("PEPTIDEK").unwrap();
        let psm = confident_psm("PEPTIDEK", peptide_mass + 14.01565 + 42.01057);
        let combos = vec![(14.01565, 42.01057)];

        let protein = Arc::new(Protein::new("P1", "PEPTIDEK"));
        let peptide =
            PeptideWithSetModifications::new(protein, 1, "PEPTIDEK", BTreeMap::new()).unwrap();
        let found = possible_mods(
            psm.precursor_mass,
            &mods,
            &combos,
            Tolerance::Ppm(10.0),
            &peptide,
        );
        let ids: Vec<&str> = found.iter().map(|m| m.id.as_str()).collect();
        assert!(ids.contains(&"methyl"));
        assert!(ids.contains(&"acetyl"));

        let psms = vec![psm];
        let stop = std::sync::atomic::AtomicBool::new(false);
        let tolerances = tolerances();
        let engine = GptmdEngine {
            psms: &psms,
            gptmd_modifications: &mods,
            combos: &combos,
            file_tolerances: &tolerances,
            progress: &NullProgress,
            stop_loops: &stop,
        };
        let results = engine.run().unwrap();
        // both mods placed on the only K, protein position 8
        assert_eq!(results.mods_added, 2);
        let sites = results.mods.get("P1").unwrap();
        assert!(sites.iter().all(|(pos, _)| *pos == 8));
    }

    #[test]
    fn relocation_subtracts_the_existing_modification() {
        let protein = Arc::new(Protein::new("P1", "MAMK"));
        let oxidation = modification("oxidation", "M", 15.9949);
        // peptide already oxidized on the first M
        let peptide = PeptideWithSetModifications::new(
            protein,
            1,
            "MAMK",
            BTreeMap::from([(2, oxidation.clone())]),
        )
        .unwrap();
        // observed precursor equals the peptide as-is: the mod could sit on
        // either M, so swapping it is a valid explanation
        let found = possible_mods(
            peptide.monoisotopic_mass,
            std::slice::from_ref(&oxidation),
            &[],
            Tolerance::Ppm(10.0),
            &peptide,
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "oxidation");
    }

    #[test]
    fn filters_decoys_and_unconfident_matches() {
        let oxidation = modification("oxidation", "T", 15.9949);
        let peptide_mass = crate::mass::monoisotopic_mass("PEPTIDEK").unwrap();

        let mut unconfident = confident_psm("PEPTIDEK", peptide_mass + 15.9949);
        unconfident.fdr_info.as_mut().unwrap().q_value_notch = 0.2;

        let mut no_info = confident_psm("PEPTIDEK", peptide_mass + 15.9949);
        no_info.fdr_info = None;

        let psms = vec![unconfident, no_info];
        let stop = std::sync::atomic::AtomicBool::new(false);
        let tolerances = tolerances();
        let engine = GptmdEngine {
            psms: &psms,
            gptmd_modifications: std::slice::from_ref(&oxidation),
            combos: &[],
            file_tolerances: &tolerances,
            progress: &NullProgress,
            stop_loops: &stop,
        };
        let results = engine.run().unwrap();
        assert_eq!(results.mods_added, 0);
        assert!(results.mods.is_empty());
    }

    #[test]
    fn empty_input_yields_empty_results() {
        let stop = std::sync::atomic::AtomicBool::new(false);
        let tolerances = tolerances();
        let engine = GptmdEngine {
            psms: &[],
            gptmd_modifications: &[],
            combos: &[],
            file_tolerances: &tolerances,
            progress: &NullProgress,
            stop_loops: &stop,
        };
        let results = engine.run().unwrap();
        assert_eq!(results.mods_added, 0);
        assert!(results.mods.is_empty());
        assert!(!results.incomplete);
    }

    #[test]
    fn unknown_file_is_a_domain_error() {
        let oxidation = modification("oxidation", "T", 15.9949);
        let peptide_mass = crate::mass::monoisotopic_mass("PEPTIDEK").unwrap();
        let psm = confident_psm("PEPTIDEK", peptide_mass + 15.9949);
        let psms = vec![psm];
        let stop = std::sync::atomic::AtomicBool::new(false);
        let empty = FnvHashMap::default();
        let engine = GptmdEngine {
            psms: &psms,
            gptmd_modifications: std::slice::from_ref(&oxidation),
            combos: &[],
            file_tolerances: &empty,
            progress: &NullProgress,
            stop_loops: &stop,
        };
        assert!(matches!(
            engine.run(),
            Err(EngineError::MissingFileTolerance(_))
        ));
    }

    #[test]
    fn every_site_satisfies_the_placement_rules() {
        let mods = vec![
            modification("oxidation", "T", 15.9949),
            modification("oxidation-M", "M", 15.9949),
        ];
        let peptide_mass = crate::mass::monoisotopic_mass("TMTMK").unwrap();
        let psm = confident_psm("TMTMK", peptide_mass + 15.9949);
        let psms = vec![psm];
        let stop = std::sync::atomic::AtomicBool::new(false);
        let tolerances = tolerances();
        let engine = GptmdEngine {
            psms: &psms,
            gptmd_modifications: &mods,
            combos: &[],
            file_tolerances: &tolerances,
            progress: &NullProgress,
            stop_loops: &stop,
        };
        let results = engine.run().unwrap();
        // two T sites and two M sites
        assert_eq!(results.mods_added, 4);
        let protein = Protein::new("P1", "TMTMK");
        for (pos, m) in results.mods.get("P1").unwrap() {
            assert!(mod_fits(m, &protein, *pos, 5, *pos));
        }
    }
}
