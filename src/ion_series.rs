use serde::Serialize;

use crate::mass::{Mass, H2O, HYDROGEN, NH3};
use crate::peptide::PeptideWithSetModifications;
use crate::spectrum::DissociationType;

/// Product ion series
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Kind {
    B,
    Y,
    C,
    /// z-dot (z + 1) radical ion, the ETD counterpart of y
    Z,
}

/// One theoretical product ion of a fragmented peptide.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TheoreticalProduct {
    pub kind: Kind,
    /// 1-based ion number within its series (b2 is the second b ion)
    pub fragment_number: usize,
    pub neutral_mass: f32,
}

fn series(dissociation_type: DissociationType) -> &'static [Kind] {
    match dissociation_type {
        DissociationType::Hcd | DissociationType::Cid => &[Kind::B, Kind::Y],
        DissociationType::Etd => &[Kind::C, Kind::Z],
        DissociationType::EThcd => &[Kind::B, Kind::Y, Kind::C, Kind::Z],
        // resolved to a concrete type before fragmentation
        DissociationType::Autodetect => &[],
    }
}

/// Append the theoretical products of `peptide` under `dissociation_type`
/// to `products`. The vector is handed in so callers can reuse scratch
/// capacity across peptides.
pub fn fragment(
    peptide: &PeptideWithSetModifications,
    dissociation_type: DissociationType,
    products: &mut Vec<TheoreticalProduct>,
) {
    debug_assert!(
        dissociation_type != DissociationType::Autodetect,
        "BUG: fragmenting with unresolved dissociation type"
    );
    let len = peptide.len();
    if len < 2 {
        return;
    }

    let mut residue_masses: Vec<f32> = peptide
        .base_sequence
        .chars()
        .map(|c| c.monoisotopic())
        .collect();
    for (&key, m) in &peptide.modifications {
        if (2..=len + 1).contains(&key) {
            residue_masses[key - 2] += m.monoisotopic_mass;
        }
    }
    let nterm = peptide
        .modifications
        .get(&1)
        .map_or(0.0, |m| m.monoisotopic_mass);
    let cterm = peptide
        .modifications
        .get(&(len + 2))
        .map_or(0.0, |m| m.monoisotopic_mass);

    // prefix[i] = mass of residues 0..=i with their modifications
    let mut prefix = residue_masses;
    for i in 1..len {
        prefix[i] += prefix[i - 1];
    }
    let total = prefix[len - 1];

    for &kind in series(dissociation_type) {
        for n in 1..len {
            let neutral_mass = match kind {
                Kind::B => nterm + prefix[n - 1],
                Kind::Y => cterm + total - prefix[len - 1 - n] + H2O,
                Kind::C => nterm + prefix[n - 1] + NH3,
                Kind::Z => cterm + total - prefix[len - 1 - n] + H2O - NH3 + HYDROGEN,
            };
            products.push(TheoreticalProduct {
                kind,
                fragment_number: n,
                neutral_mass,
            });
        }
    }
}
