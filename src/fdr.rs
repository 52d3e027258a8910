use std::sync::atomic::{AtomicBool, Ordering};

use fnv::{FnvHashMap, FnvHashSet};
use log::info;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::progress::ProgressSink;
use crate::psm::{FdrInfo, PeptideSpectralMatch};

/// What kind of matches are being analyzed; crosslink analysis shares the
/// PSM path but is tagged differently for the PEP estimator.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FdrAnalysisType {
    Psm,
    Peptide,
    Crosslink,
}

/// Minimum number of matches before posterior error probabilities are
/// worth estimating.
const PEP_MINIMUM_PSMS: usize = 100;

/// Opaque posterior-error-probability regressor.
///
/// Implementations write `fdr_info.pep` on every match carrying FDR info
/// and return a one-line summary of the fit. `search_type` is one of
/// `"standard"`, `"top-down"`, or `"crosslink"`.
pub trait PepEstimator: Send + Sync {
    fn compute_pep(&self, psms: &mut [PeptideSpectralMatch], search_type: &str) -> String;
}

/// Baseline estimator: the local decoy density in a sliding window over
/// the score ranking, doubled to account for unseen false targets.
#[derive(Clone, Copy, Debug)]
pub struct DecoyDensityPepEstimator {
    pub window: usize,
}

impl Default for DecoyDensityPepEstimator {
    fn default() -> Self {
        DecoyDensityPepEstimator { window: 101 }
    }
}

impl PepEstimator for DecoyDensityPepEstimator {
    fn compute_pep(&self, psms: &mut [PeptideSpectralMatch], search_type: &str) -> String {
        let window = self.window.max(1);
        let mut order: Vec<usize> = (0..psms.len())
            .filter(|&i| psms[i].fdr_info.is_some())
            .collect();
        order.sort_by(|&a, &b| {
            psms[b]
                .best_score
                .total_cmp(&psms[a].best_score)
                .then(a.cmp(&b))
        });

        let decoy: Vec<bool> = order.iter().map(|&i| psms[i].contains_decoy_candidate()).collect();
        for (rank, &i) in order.iter().enumerate() {
            let lo = rank.saturating_sub(window / 2);
            let hi = (rank + window / 2 + 1).min(order.len());
            let decoys = decoy[lo..hi].iter().filter(|&&d| d).count();
            let pep = (2.0 * decoys as f64 / (hi - lo) as f64).min(1.0);
            if let Some(info) = psms[i].fdr_info.as_mut() {
                info.pep = pep;
            }
        }
        format!(
            "decoy-density pep over {} matches ({search_type}, window {window})",
            order.len()
        )
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct FdrAnalysisResults {
    pub psm_count: usize,
    pub psms_within_1_percent_fdr: usize,
    /// The scoring metric adopted for each enzymatic group when delta-score
    /// selection ran (`true` = delta score)
    pub delta_score_used_by_protease: Vec<(String, bool)>,
    /// Dataset-wide confident identifications per full sequence
    pub sequence_counts: FnvHashMap<String, usize>,
    /// Per-file confident identifications per full sequence
    pub file_sequence_counts: FnvHashMap<String, FnvHashMap<String, usize>>,
    pub pep_summary: Option<String>,
    pub incomplete: bool,
}

/// Target/decoy FDR analysis: q-value assignment per notch, monotonization,
/// and PEP-based q-values.
///
/// Matches are partitioned by protease so targets and decoys always come
/// from the same enzymatic context, then sorted under a total ordering with
/// explicit tiebreakers, making the results deterministic for a fixed
/// input set.
pub struct FdrAnalysisEngine<'a> {
    pub psms: &'a mut [PeptideSpectralMatch],
    /// Notch count of the mass-diff acceptor used in the search; matches
    /// with an unresolved notch fall into an extra overflow bucket
    pub num_notches: usize,
    pub use_delta_score: bool,
    pub analysis_type: FdrAnalysisType,
    /// Tags the PEP estimation as `"top-down"` instead of `"standard"`
    pub top_down: bool,
    pub pep_estimator: Option<&'a dyn PepEstimator>,
    pub progress: &'a dyn ProgressSink,
    pub stop_loops: &'a AtomicBool,
}

impl<'a> FdrAnalysisEngine<'a> {
    pub fn run(&mut self) -> Result<FdrAnalysisResults, EngineError> {
        let mut results = FdrAnalysisResults {
            psm_count: self.psms.len(),
            ..Default::default()
        };

        // partition by enzymatic context, preserving first-seen order
        let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
        for (i, psm) in self.psms.iter().enumerate() {
            match groups.iter_mut().find(|(name, _)| *name == psm.protease) {
                Some((_, indices)) => indices.push(i),
                None => groups.push((psm.protease.clone(), vec![i])),
            }
        }

        let group_count = groups.len();
        for (done, (protease, indices)) in groups.into_iter().enumerate() {
            if self.stop_loops.load(Ordering::Relaxed) {
                results.incomplete = true;
                return Ok(results);
            }
            let (order, used_delta) = self.choose_ordering(&indices);
            self.assign_fdr(&order);
            results
                .delta_score_used_by_protease
                .push((protease, used_delta));
            self.progress.report(
                (done + 1) * 100 / group_count,
                "q-values assigned",
            );
        }

        if self.stop_loops.load(Ordering::Relaxed) {
            results.incomplete = true;
            return Ok(results);
        }

        if matches!(
            self.analysis_type,
            FdrAnalysisType::Psm | FdrAnalysisType::Crosslink
        ) && self.psms.len() > PEP_MINIMUM_PSMS
        {
            if let Some(estimator) = self.pep_estimator {
                let tag = match self.analysis_type {
                    FdrAnalysisType::Crosslink => "crosslink",
                    _ if self.top_down => "top-down",
                    _ => "standard",
                };
                let summary = estimator.compute_pep(self.psms, tag);
                info!("{summary}");
                results.pep_summary = Some(summary);
                self.assign_pep_q_values();
            }
        }

        for psm in self.psms.iter() {
            let Some(info) = psm.fdr_info.as_ref() else {
                continue;
            };
            if info.q_value <= 0.01 {
                results.psms_within_1_percent_fdr += 1;
            }
            if info.q_value <= 0.01 && info.q_value_notch <= 0.01 {
                if let Some(full) = &psm.full_sequence {
                    *results.sequence_counts.entry(full.clone()).or_insert(0) += 1;
                    *results
                        .file_sequence_counts
                        .entry(psm.full_file_path.clone())
                        .or_default()
                        .entry(full.clone())
                        .or_insert(0) += 1;
                }
            }
        }

        info!(
            "{} of {} matches at 1% FDR",
            results.psms_within_1_percent_fdr, results.psm_count
        );
        Ok(results)
    }

    /// Pick the scoring metric for one enzymatic group: with delta-score
    /// selection on, whichever ordering passes more matches at 1% FDR wins,
    /// the plain score ordering on a tie.
    fn choose_ordering(&self, indices: &[usize]) -> (Vec<usize>, bool) {
        if !self.use_delta_score {
            return (self.ordering(indices, false), false);
        }

        let score_order = self.deduplicate(self.ordering(indices, false));
        let delta_order = self.deduplicate(self.ordering(indices, true));
        let score_passing = self.count_passing(&score_order);
        let delta_passing = self.count_passing(&delta_order);
        if delta_passing > score_passing {
            (delta_order, true)
        } else {
            (score_order, false)
        }
    }

    /// Total ordering: metric descending, then absolute precursor mass
    /// error ascending, then input position.
    fn ordering(&self, indices: &[usize], by_delta: bool) -> Vec<usize> {
        let mass_error = |psm: &PeptideSpectralMatch| -> f64 {
            psm.peptide_monoisotopic_mass
                .map(|m| (psm.precursor_mass - m).abs() as f64)
                .unwrap_or(f64::MAX)
        };
        let mut order = indices.to_vec();
        order.sort_by(|&a, &b| {
            let pa = &self.psms[a];
            let pb = &self.psms[b];
            let ka = if by_delta { pa.delta_score() } else { pa.best_score };
            let kb = if by_delta { pb.delta_score() } else { pb.best_score };
            kb.total_cmp(&ka)
                .then_with(|| mass_error(pa).total_cmp(&mass_error(pb)))
                .then(a.cmp(&b))
        });
        order
    }

    /// Keep the first match per (file, scan, peptide mass).
    fn deduplicate(&self, order: Vec<usize>) -> Vec<usize> {
        let mut seen: FnvHashSet<(String, u32, Option<u32>)> = FnvHashSet::default();
        order
            .into_iter()
            .filter(|&i| {
                let psm = &self.psms[i];
                seen.insert((
                    psm.full_file_path.clone(),
                    psm.scan_number,
                    psm.peptide_monoisotopic_mass.map(f32::to_bits),
                ))
            })
            .collect()
    }

    fn count_passing(&self, order: &[usize]) -> usize {
        self.simulated_q_values(order)
            .iter()
            .filter(|&&q| q <= 0.01)
            .count()
    }

    /// Monotonized q-values the matches in `order` would receive, without
    /// writing anything.
    fn simulated_q_values(&self, order: &[usize]) -> Vec<f64> {
        let mut q = Vec::with_capacity(order.len());
        let (mut target, mut decoy) = (0.0f64, 0.0f64);
        for &i in order {
            let psm = &self.psms[i];
            if psm.contains_decoy_candidate() {
                decoy += psm.decoy_fraction();
            } else {
                target += 1.0;
            }
            q.push(if target == 0.0 { 1.0 } else { (decoy / target).min(1.0) });
        }
        let mut min = 1.0f64;
        for value in q.iter_mut().rev() {
            min = min.min(*value);
            *value = min;
        }
        q
    }

    /// Cumulative target/decoy counting and q-value assignment over one
    /// ordered group, followed by worst-to-best monotonization.
    fn assign_fdr(&mut self, order: &[usize]) {
        let overflow = self.num_notches;
        let (mut target, mut decoy) = (0.0f64, 0.0f64);
        let mut target_notch = vec![0.0f64; self.num_notches + 1];
        let mut decoy_notch = vec![0.0f64; self.num_notches + 1];

        for &i in order {
            let psm = &mut self.psms[i];
            let notch = psm.notch.map(|n| n.min(overflow)).unwrap_or(overflow);
            if psm.contains_decoy_candidate() {
                let fraction = psm.decoy_fraction();
                decoy += fraction;
                decoy_notch[notch] += fraction;
            } else {
                target += 1.0;
                target_notch[notch] += 1.0;
            }
            // a notch with decoys but no targets yet has an undefined
            // ratio; clamp to 1.0
            let q_value = if target == 0.0 {
                1.0
            } else {
                (decoy / target).min(1.0)
            };
            let q_value_notch = if target_notch[notch] == 0.0 {
                1.0
            } else {
                (decoy_notch[notch] / target_notch[notch]).min(1.0)
            };
            psm.fdr_info = Some(FdrInfo {
                cumulative_target: target,
                cumulative_decoy: decoy,
                q_value,
                cumulative_target_notch: target_notch[notch],
                cumulative_decoy_notch: decoy_notch[notch],
                q_value_notch,
                pep: 0.0,
                pep_q_value: 0.0,
            });
        }

        self.monotonize(order);
    }

    /// Walk from the worst-scoring match to the best, clamping both q-value
    /// series to the running minimum.
    fn monotonize(&mut self, order: &[usize]) {
        let (mut min_q, mut min_q_notch) = (1.0f64, 1.0f64);
        for &i in order.iter().rev() {
            let info = self.psms[i]
                .fdr_info
                .as_mut()
                .expect("assigned in the pass above");
            min_q = min_q.min(info.q_value);
            info.q_value = min_q;
            min_q_notch = min_q_notch.min(info.q_value_notch);
            info.q_value_notch = min_q_notch;
        }
    }

    /// PEP-based q-value: sort by pep ascending, the running mean of pep at
    /// each rank is the q-value, rounded to six decimals.
    fn assign_pep_q_values(&mut self) {
        let mut order: Vec<usize> = (0..self.psms.len())
            .filter(|&i| self.psms[i].fdr_info.is_some())
            .collect();
        order.sort_by(|&a, &b| {
            let pa = self.psms[a].fdr_info.as_ref().expect("filtered").pep;
            let pb = self.psms[b].fdr_info.as_ref().expect("filtered").pep;
            pa.total_cmp(&pb).then(a.cmp(&b))
        });

        let mut running = 0.0f64;
        for (rank, &i) in order.iter().enumerate() {
            let info = self.psms[i].fdr_info.as_mut().expect("filtered");
            running += info.pep;
            info.pep_q_value = (running / (rank + 1) as f64 * 1e6).round() / 1e6;
        }
    }
}
