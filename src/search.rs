use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Instant;

use fnv::{FnvHashMap, FnvHashSet};
use log::{debug, error, info};
use rayon::prelude::*;
use serde::Serialize;

use crate::error::EngineError;
use crate::ion_series::{fragment, TheoreticalProduct};
use crate::mass_diff::MassDiffAcceptor;
use crate::modification::Modification;
use crate::params::CommonParameters;
use crate::peptide::{
    digest, sequence_similarity, PeptideWithSetModifications, Protein, SilacLabel,
    DECOY_SIMILARITY_THRESHOLD,
};
use crate::progress::ProgressSink;
use crate::psm::{PeptideSpectralMatch, PsmSlab, SCORE_TOLERANCE};
use crate::scoring::{calculate_peptide_score, match_fragment_ions, MatchedFragmentIon};
use crate::spectrum::{DissociationType, Ms2Scan, ScanCollection};

/// A library of previously observed spectra. The search engine only needs
/// to know one is present (targets get a paired reverse decoy for later
/// library scoring); lookups belong to the library-scoring layer.
pub trait SpectralLibrary: Send + Sync {
    fn contains_spectrum(&self, full_sequence: &str) -> bool;
}

/// Summary returned by [`ClassicSearchEngine::run`].
#[derive(Clone, Debug, Serialize)]
pub struct EngineResults {
    pub proteins_searched: usize,
    pub scans_with_psms: usize,
    /// Set when the search was cancelled or a worker died; partial output
    /// should be discarded
    pub incomplete: bool,
    pub search_time: f32,
}

/// Protein-parallel digest/fragment/score loop with decoy generation on
/// the fly.
///
/// Workers stripe over the protein list: worker `w` of `T` handles
/// proteins `w, w+T, w+2T, …`. Results land in the caller-provided
/// [`PsmSlab`], one lockable slot per scan.
pub struct ClassicSearchEngine<'a> {
    pub proteins: &'a [Arc<Protein>],
    pub scans: &'a ScanCollection,
    pub psms: &'a PsmSlab,
    pub fixed_mods: &'a [Modification],
    pub variable_mods: &'a [Modification],
    pub silac_labels: &'a [SilacLabel],
    pub acceptor: &'a dyn MassDiffAcceptor,
    pub params: &'a CommonParameters,
    pub spectral_library: Option<&'a dyn SpectralLibrary>,
    pub decoy_on_the_fly: bool,
    pub full_file_path: &'a str,
    pub progress: &'a dyn ProgressSink,
    pub stop_loops: &'a AtomicBool,
}

impl<'a> ClassicSearchEngine<'a> {
    pub fn run(&self) -> Result<EngineResults, EngineError> {
        self.params.validate()?;
        if self.psms.len() != self.scans.len() {
            return Err(EngineError::SlabLengthMismatch {
                got: self.psms.len(),
                expected: self.scans.len(),
            });
        }

        let start = Instant::now();
        let threads = self
            .params
            .max_threads_per_file
            .min(self.proteins.len().max(1));
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| EngineError::WorkerPool(e.to_string()))?;

        info!(
            "searching {} proteins against {} scans on {} threads",
            self.proteins.len(),
            self.scans.len(),
            threads
        );

        let proteins_searched = AtomicUsize::new(0);
        let old_percent = AtomicUsize::new(0);

        pool.install(|| {
            (0..threads).into_par_iter().for_each(|worker| {
                let result = catch_unwind(AssertUnwindSafe(|| {
                    self.search_stripe(worker, threads, &proteins_searched, &old_percent)
                }));
                if result.is_err() {
                    error!("search worker {worker} panicked; cancelling the pool");
                    self.stop_loops.store(true, Ordering::Relaxed);
                }
            });
        });

        let mut scans_with_psms = 0;
        for slot in self.psms.iter() {
            let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(psm) = guard.as_mut() {
                psm.resolve_all_ambiguities();
                scans_with_psms += 1;
            }
        }

        let incomplete = self.stop_loops.load(Ordering::Relaxed);
        let results = EngineResults {
            proteins_searched: proteins_searched.load(Ordering::Relaxed),
            scans_with_psms,
            incomplete,
            search_time: start.elapsed().as_secs_f32(),
        };
        info!(
            "searched {} proteins, {} scans matched in {:.2}s",
            results.proteins_searched, results.scans_with_psms, results.search_time
        );
        Ok(results)
    }

    fn search_stripe(
        &self,
        worker: usize,
        stride: usize,
        proteins_searched: &AtomicUsize,
        old_percent: &AtomicUsize,
    ) {
        // one scratch vector per dissociation type, reused across peptides
        let scratch_types: Vec<DissociationType> =
            if self.params.dissociation_type == DissociationType::Autodetect {
                DissociationType::SUPPORTED.to_vec()
            } else {
                vec![self.params.dissociation_type]
            };
        let mut target_products: FnvHashMap<DissociationType, Vec<TheoreticalProduct>> =
            scratch_types.iter().map(|&t| (t, Vec::new())).collect();
        let mut decoy_products: FnvHashMap<DissociationType, Vec<TheoreticalProduct>> =
            scratch_types.iter().map(|&t| (t, Vec::new())).collect();
        let mut filled_target: FnvHashSet<DissociationType> = FnvHashSet::default();
        let mut filled_decoy: FnvHashSet<DissociationType> = FnvHashSet::default();

        let mut index = worker;
        while index < self.proteins.len() {
            if self.stop_loops.load(Ordering::Relaxed) {
                return;
            }
            let protein = &self.proteins[index];

            for peptide in digest(
                protein,
                &self.params.digestion,
                self.fixed_mods,
                self.variable_mods,
                self.silac_labels,
            ) {
                let decoy = if self.decoy_on_the_fly {
                    let reverse = peptide.reverse_decoy();
                    if sequence_similarity(&peptide, &reverse) > DECOY_SIMILARITY_THRESHOLD {
                        Some(peptide.scrambled_decoy())
                    } else {
                        Some(reverse)
                    }
                } else if self.spectral_library.is_some() {
                    Some(peptide.reverse_decoy())
                } else {
                    None
                };

                for products in target_products.values_mut() {
                    products.clear();
                }
                for products in decoy_products.values_mut() {
                    products.clear();
                }
                filled_target.clear();
                filled_decoy.clear();

                for (interval, notch) in
                    self.acceptor.allowed_intervals(peptide.monoisotopic_mass)
                {
                    for scan in self.scans.scans_in_window(interval.min, interval.max) {
                        let Some(dissociation) = self.resolve_dissociation(scan) else {
                            debug!(
                                "scan {} carries no dissociation type; skipped",
                                scan.scan_number
                            );
                            continue;
                        };
                        let Some(products) = target_products.get_mut(&dissociation) else {
                            debug!(
                                "scan {} uses {dissociation:?}, which has no scratch slot; skipped",
                                scan.scan_number
                            );
                            continue;
                        };
                        if !filled_target.contains(&dissociation) {
                            fragment(&peptide, dissociation, products);
                            filled_target.insert(dissociation);
                        }
                        let matched = match_fragment_ions(
                            scan,
                            products,
                            self.params.product_mass_tolerance,
                            self.params.match_all_charges,
                            self.params.max_fragment_charge,
                        );
                        let target_score =
                            calculate_peptide_score(scan, &matched, self.params.match_all_charges);

                        match &decoy {
                            Some(decoy_peptide) if self.decoy_on_the_fly => {
                                let (decoy_score, decoy_matched) = self.score_decoy(
                                    scan,
                                    decoy_peptide,
                                    dissociation,
                                    &mut decoy_products,
                                    &mut filled_decoy,
                                );
                                if decoy_score > target_score + SCORE_TOLERANCE {
                                    self.add_psm(scan, notch, decoy_score, decoy_peptide, decoy_matched);
                                } else if (decoy_score - target_score).abs() <= SCORE_TOLERANCE {
                                    // tie retained for downstream ambiguity
                                    // handling: both candidates go in
                                    self.add_psm(scan, notch, target_score, &peptide, matched);
                                    self.add_psm(scan, notch, decoy_score, decoy_peptide, decoy_matched);
                                } else {
                                    self.add_psm(scan, notch, target_score, &peptide, matched);
                                }
                            }
                            Some(decoy_peptide) => {
                                // paired reverse decoy for spectral-library
                                // scoring downstream
                                self.add_psm(scan, notch, target_score, &peptide, matched);
                                let (decoy_score, decoy_matched) = self.score_decoy(
                                    scan,
                                    decoy_peptide,
                                    dissociation,
                                    &mut decoy_products,
                                    &mut filled_decoy,
                                );
                                self.add_psm(scan, notch, decoy_score, decoy_peptide, decoy_matched);
                            }
                            None => {
                                self.add_psm(scan, notch, target_score, &peptide, matched);
                            }
                        }
                    }
                }
            }

            let done = proteins_searched.fetch_add(1, Ordering::Relaxed) + 1;
            let percent = done * 100 / self.proteins.len();
            let previous = old_percent.fetch_max(percent, Ordering::Relaxed);
            if percent > previous {
                self.progress
                    .report(percent, &format!("{percent}% of proteins searched"));
            }

            index += stride;
        }
    }

    fn resolve_dissociation(&self, scan: &Ms2Scan) -> Option<DissociationType> {
        match self.params.dissociation_type {
            DissociationType::Autodetect => scan
                .dissociation_type
                .filter(|t| *t != DissociationType::Autodetect),
            configured => Some(configured),
        }
    }

    fn score_decoy(
        &self,
        scan: &Ms2Scan,
        decoy: &PeptideWithSetModifications,
        dissociation: DissociationType,
        decoy_products: &mut FnvHashMap<DissociationType, Vec<TheoreticalProduct>>,
        filled_decoy: &mut FnvHashSet<DissociationType>,
    ) -> (f64, Vec<MatchedFragmentIon>) {
        let products = decoy_products
            .get_mut(&dissociation)
            .expect("decoy scratch mirrors target scratch");
        if !filled_decoy.contains(&dissociation) {
            fragment(decoy, dissociation, products);
            filled_decoy.insert(dissociation);
        }
        let matched = match_fragment_ions(
            scan,
            products,
            self.params.product_mass_tolerance,
            self.params.match_all_charges,
            self.params.max_fragment_charge,
        );
        let score = calculate_peptide_score(scan, &matched, self.params.match_all_charges);
        (score, matched)
    }

    fn add_psm(
        &self,
        scan: &Ms2Scan,
        notch: usize,
        score: f64,
        peptide: &PeptideWithSetModifications,
        matched_ions: Vec<MatchedFragmentIon>,
    ) {
        if score < self.params.score_cutoff {
            return;
        }
        let mut guard = self.psms[scan.scan_index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match guard.as_mut() {
            None => {
                *guard = Some(PeptideSpectralMatch::new(
                    scan,
                    notch,
                    score,
                    peptide.clone(),
                    matched_ions,
                    self.full_file_path,
                    &self.params.digestion.protease.name,
                ));
            }
            Some(existing) => {
                if score - existing.runner_up_score > -SCORE_TOLERANCE {
                    existing.add_or_replace(
                        peptide.clone(),
                        score,
                        notch,
                        self.params.report_all_ambiguity,
                        matched_ions,
                    );
                }
            }
        }
    }
}
