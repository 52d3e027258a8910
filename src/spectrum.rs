use serde::{Deserialize, Serialize};

/// Fragmentation method used to generate an MS2 spectrum.
///
/// `Autodetect` is a configuration sentinel: it is never the effective type
/// of a scan, it instructs the search to take the type from each scan header.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DissociationType {
    Hcd,
    Cid,
    Etd,
    EThcd,
    Autodetect,
}

impl DissociationType {
    /// The concrete types a scan header can carry.
    pub const SUPPORTED: [DissociationType; 4] = [
        DissociationType::Hcd,
        DissociationType::Cid,
        DissociationType::Etd,
        DissociationType::EThcd,
    ];
}

/// One MS2 spectrum, immutable for the duration of a search.
///
/// `scan_index` is dense (position in the precursor-mass-sorted
/// [`ScanCollection`]); `scan_number` is the sparse instrument identifier.
#[derive(Clone, Debug)]
pub struct Ms2Scan {
    pub scan_index: usize,
    pub scan_number: u32,
    /// Neutral monoisotopic precursor mass
    pub precursor_mass: f32,
    /// Dissociation type from the scan header, if the header carried one
    pub dissociation_type: Option<DissociationType>,
    /// (m/z, intensity) pairs, sorted ascending by m/z
    pub peaks: Vec<(f32, f32)>,
    pub total_ion_current: f32,
}

impl Ms2Scan {
    pub fn new(
        scan_number: u32,
        precursor_mass: f32,
        dissociation_type: Option<DissociationType>,
        mut peaks: Vec<(f32, f32)>,
    ) -> Self {
        peaks.sort_by(|a, b| a.0.total_cmp(&b.0));
        let total_ion_current = peaks.iter().map(|(_, int)| int).sum();
        Ms2Scan {
            scan_index: 0,
            scan_number,
            precursor_mass,
            dissociation_type,
            peaks,
            total_ion_current,
        }
    }

    /// Indices of the peaks with m/z in `[lo, hi]`
    pub fn peaks_in_window(&self, lo: f32, hi: f32) -> std::ops::Range<usize> {
        let left = self.peaks.partition_point(|(mz, _)| mz.total_cmp(&lo).is_lt());
        let right = self.peaks.partition_point(|(mz, _)| mz.total_cmp(&hi).is_le());
        left..right
    }

    pub fn min_mz(&self) -> Option<f32> {
        self.peaks.first().map(|(mz, _)| *mz)
    }
}

/// All MS2 scans of one file, sorted ascending by precursor mass.
///
/// The precursor masses are kept in a parallel primitive array so that mass
/// windows can be answered with a single binary search; after construction
/// `scans[i].scan_index == i` for all `i`.
#[derive(Clone, Debug, Default)]
pub struct ScanCollection {
    scans: Vec<Ms2Scan>,
    precursor_masses: Vec<f32>,
}

impl ScanCollection {
    pub fn new(mut scans: Vec<Ms2Scan>) -> Self {
        scans.sort_by(|a, b| a.precursor_mass.total_cmp(&b.precursor_mass));
        for (idx, scan) in scans.iter_mut().enumerate() {
            scan.scan_index = idx;
        }
        let precursor_masses = scans.iter().map(|s| s.precursor_mass).collect();
        ScanCollection {
            scans,
            precursor_masses,
        }
    }

    pub fn len(&self) -> usize {
        self.scans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scans.is_empty()
    }

    pub fn scans(&self) -> &[Ms2Scan] {
        &self.scans
    }

    /// Index of the first scan with `precursor_mass >= minimum`; the
    /// insertion position (`len`) when every scan is lighter
    pub fn first_scan_with_mass_over_or_equal(&self, minimum: f32) -> usize {
        self.precursor_masses
            .partition_point(|m| m.total_cmp(&minimum).is_lt())
    }

    /// Scans with precursor mass in `[min, max]`, in ascending mass order
    pub fn scans_in_window(&self, min: f32, max: f32) -> &[Ms2Scan] {
        let lo = self.first_scan_with_mass_over_or_equal(min);
        let hi = self
            .precursor_masses
            .partition_point(|m| m.total_cmp(&max).is_le());
        &self.scans[lo..hi]
    }
}
