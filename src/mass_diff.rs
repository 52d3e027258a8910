use serde::{Deserialize, Serialize};

use crate::mass::Tolerance;

/// Closed interval of allowed scan precursor masses.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MassInterval {
    pub min: f32,
    pub max: f32,
}

/// Maps a theoretical peptide mass to the precursor-mass windows in which a
/// scan may match it, each tagged with a notch.
///
/// The notch is a small integer stratifying matches by mass window (0 = the
/// exact-mass window, 1 = the next offset, …); FDR is later controlled per
/// notch as well as globally.
pub trait MassDiffAcceptor: Send + Sync {
    /// Number of distinct notches this acceptor can emit; notch values are
    /// always in `0..num_notches`
    fn num_notches(&self) -> usize;

    fn allowed_intervals(&self, theoretical_mass: f32) -> Vec<(MassInterval, usize)>;
}

/// Accepts precursors within a single tolerance window of the theoretical
/// mass; every match is notch 0.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SingleWindowAcceptor {
    pub tolerance: Tolerance,
}

impl MassDiffAcceptor for SingleWindowAcceptor {
    fn num_notches(&self) -> usize {
        1
    }

    fn allowed_intervals(&self, theoretical_mass: f32) -> Vec<(MassInterval, usize)> {
        let (min, max) = self.tolerance.bounds(theoretical_mass);
        vec![(MassInterval { min, max }, 0)]
    }
}

/// Accepts precursors near a fixed set of offsets from the theoretical
/// mass (e.g. `[0.0, 1.00336]` for a monoisotopic mis-assignment search);
/// the notch is the index of the matching offset.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DotNotchAcceptor {
    pub tolerance: Tolerance,
    pub offsets: Vec<f32>,
}

impl MassDiffAcceptor for DotNotchAcceptor {
    fn num_notches(&self) -> usize {
        self.offsets.len()
    }

    fn allowed_intervals(&self, theoretical_mass: f32) -> Vec<(MassInterval, usize)> {
        self.offsets
            .iter()
            .enumerate()
            .map(|(notch, offset)| {
                let (min, max) = self.tolerance.bounds(theoretical_mass + offset);
                (MassInterval { min, max }, notch)
            })
            .collect()
    }
}
