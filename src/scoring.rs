use fnv::FnvHashMap;

use crate::ion_series::{Kind, TheoreticalProduct};
use crate::mass::{Tolerance, PROTON};
use crate::spectrum::Ms2Scan;

/// Highest charge state tried when matching every plausible charge.
const MAX_PLAUSIBLE_CHARGE: u8 = 30;

/// An observed peak explained by a theoretical product ion.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchedFragmentIon {
    pub product: TheoreticalProduct,
    pub mz: f32,
    pub intensity: f32,
    pub charge: u8,
}

/// Match theoretical product ions against the peaks of one scan.
///
/// Each product is looked up at charges `1..=max_charge`, or at every
/// plausible charge state when `match_all_charges` is set (used when
/// building spectral libraries). Among the peaks inside the tolerance
/// window the most intense one wins.
pub fn match_fragment_ions(
    scan: &Ms2Scan,
    products: &[TheoreticalProduct],
    tolerance: Tolerance,
    match_all_charges: bool,
    max_charge: u8,
) -> Vec<MatchedFragmentIon> {
    let mut matches = Vec::new();
    let Some(min_mz) = scan.min_mz() else {
        return matches;
    };

    for product in products {
        let top_charge = if match_all_charges {
            // the highest charge that still lands at or above the lowest
            // observed peak
            let cap = (product.neutral_mass / (min_mz - PROTON).max(f32::EPSILON)) as u8;
            cap.clamp(1, MAX_PLAUSIBLE_CHARGE)
        } else {
            max_charge.max(1)
        };

        for charge in 1..=top_charge {
            let mz = product.neutral_mass / charge as f32 + PROTON;
            let (lo, hi) = tolerance.bounds(mz);
            let window = scan.peaks_in_window(lo, hi);
            let best = scan.peaks[window]
                .iter()
                .max_by(|a, b| a.1.total_cmp(&b.1));
            if let Some(&(observed_mz, intensity)) = best {
                matches.push(MatchedFragmentIon {
                    product: *product,
                    mz: observed_mz,
                    intensity,
                    charge,
                });
            }
        }
    }
    matches
}

/// Score = matched ion count + (matched intensity / total intensity).
///
/// With `fragments_can_have_different_charges` every matched charge state
/// counts once; otherwise a product matched at several charges is counted
/// a single time, keeping its highest-charge match.
pub fn calculate_peptide_score(
    scan: &Ms2Scan,
    matched_ions: &[MatchedFragmentIon],
    fragments_can_have_different_charges: bool,
) -> f64 {
    let (count, summed_intensity) = if fragments_can_have_different_charges {
        let sum: f32 = matched_ions.iter().map(|m| m.intensity).sum();
        (matched_ions.len(), sum)
    } else {
        let mut best: FnvHashMap<(Kind, usize), &MatchedFragmentIon> = FnvHashMap::default();
        for ion in matched_ions {
            let key = (ion.product.kind, ion.product.fragment_number);
            match best.get(&key) {
                Some(existing) if existing.charge >= ion.charge => {}
                _ => {
                    best.insert(key, ion);
                }
            }
        }
        let sum: f32 = best.values().map(|m| m.intensity).sum();
        (best.len(), sum)
    };

    let mut score = count as f64;
    if scan.total_ion_current > 0.0 {
        score += summed_intensity as f64 / scan.total_ion_current as f64;
    }
    score
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ion_series::fragment;
    use crate::peptide::{PeptideWithSetModifications, Protein};
    use crate::spectrum::DissociationType;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn products(seq: &str) -> Vec<TheoreticalProduct> {
        let protein = Arc::new(Protein::new("P1", seq));
        let peptide =
            PeptideWithSetModifications::new(protein, 1, seq, BTreeMap::new()).unwrap();
        let mut out = Vec::new();
        fragment(&peptide, DissociationType::Hcd, &mut out);
        out
    }

    fn scan_from(products: &[TheoreticalProduct]) -> Ms2Scan {
        let peaks = products
            .iter()
            .map(|p| (p.neutral_mass + PROTON, 10.0))
            .collect();
        Ms2Scan::new(1, 1000.0, Some(DissociationType::Hcd), peaks)
    }

    #[test]
    fn perfect_match_scores_count_plus_one() {
        let products = products("PEPTIDEK");
        let scan = scan_from(&products);
        let matched = match_fragment_ions(&scan, &products, Tolerance::Ppm(10.0), false, 1);
        assert_eq!(matched.len(), products.len());

        let score = calculate_peptide_score(&scan, &matched, false);
        assert!((score - (products.len() as f64 + 1.0)).abs() < 1e-9);
    }

    #[test]
    fn most_intense_peak_wins_within_tolerance() {
        let products = vec![TheoreticalProduct {
            kind: Kind::B,
            fragment_number: 1,
            neutral_mass: 500.0,
        }];
        let mz = 500.0 + PROTON;
        let scan = Ms2Scan::new(
            1,
            1000.0,
            None,
            vec![(mz - 0.001, 5.0), (mz + 0.002, 50.0), (mz + 0.5, 100.0)],
        );
        let matched = match_fragment_ions(&scan, &products, Tolerance::Da(0.01), false, 1);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].intensity, 50.0);
    }

    #[test]
    fn missing_ions_do_not_match() {
        let products = products("PEPTIDEK");
        // spectrum containing only the first three peaks
        let scan = scan_from(&products[..3]);
        let matched = match_fragment_ions(&scan, &products, Tolerance::Ppm(10.0), false, 1);
        assert_eq!(matched.len(), 3);
        let score = calculate_peptide_score(&scan, &matched, false);
        assert!((score - 4.0).abs() < 1e-9);
    }

    #[test]
    fn charge_states_collapse_unless_requested() {
        let product = TheoreticalProduct {
            kind: Kind::Y,
            fragment_number: 2,
            neutral_mass: 600.0,
        };
        // peaks at both the 1+ and 2+ positions
        let scan = Ms2Scan::new(
            1,
            1000.0,
            None,
            vec![(600.0 + PROTON, 10.0), (300.0 + PROTON, 20.0)],
        );
        let matched = match_fragment_ions(&scan, &[product], Tolerance::Da(0.01), false, 2);
        assert_eq!(matched.len(), 2);

        let collapsed = calculate_peptide_score(&scan, &matched, false);
        // one ion counted, highest charge (2+, intensity 20) kept
        assert!((collapsed - (1.0 + 20.0 / 30.0)).abs() < 1e-6);

        let split = calculate_peptide_score(&scan, &matched, true);
        assert!((split - 3.0).abs() < 1e-6);
    }

    #[test]
    fn empty_scan_matches_nothing() {
        let products = products("PEPTIDEK");
        let scan = Ms2Scan::new(1, 1000.0, None, vec![]);
        assert!(match_fragment_ions(&scan, &products, Tolerance::Ppm(10.0), false, 2).is_empty());
        assert_eq!(calculate_peptide_score(&scan, &[], false), 0.0);
    }
}
