use serde::{Deserialize, Serialize};

use crate::enzyme::{DigestionParams, Protease};
use crate::error::EngineError;
use crate::mass::Tolerance;
use crate::modification::Modification;
use crate::spectrum::DissociationType;

/// Search parameters shared by every engine.
///
/// Construct through [`CommonParametersBuilder`] so that defaults are
/// applied and invalid combinations are rejected up front.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommonParameters {
    pub max_threads_per_file: usize,
    /// Candidates scoring below this are never recorded
    pub score_cutoff: f64,
    pub product_mass_tolerance: Tolerance,
    pub precursor_mass_tolerance: Tolerance,
    pub dissociation_type: DissociationType,
    /// Highest fragment charge tried during ion matching
    pub max_fragment_charge: u8,
    /// Keep the full set of score-tied peptides on each match
    pub report_all_ambiguity: bool,
    /// Match fragments at every plausible charge state (spectral library
    /// construction); also makes charge states score independently
    pub match_all_charges: bool,
    pub digestion: DigestionParams,
}

/// Input parameters with defaults not yet applied.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CommonParametersBuilder {
    pub max_threads_per_file: Option<usize>,
    pub score_cutoff: Option<f64>,
    pub product_mass_tolerance: Option<Tolerance>,
    pub precursor_mass_tolerance: Option<Tolerance>,
    pub dissociation_type: Option<DissociationType>,
    pub max_fragment_charge: Option<u8>,
    pub report_all_ambiguity: Option<bool>,
    pub match_all_charges: Option<bool>,
    pub digestion: Option<DigestionParams>,
}

impl CommonParametersBuilder {
    pub fn build(self) -> Result<CommonParameters, EngineError> {
        let params = CommonParameters {
            max_threads_per_file: self.max_threads_per_file.unwrap_or_else(num_cpus::get),
            score_cutoff: self.score_cutoff.unwrap_or(5.0),
            product_mass_tolerance: self.product_mass_tolerance.unwrap_or(Tolerance::Ppm(20.0)),
            precursor_mass_tolerance: self
                .precursor_mass_tolerance
                .unwrap_or(Tolerance::Ppm(5.0)),
            dissociation_type: self.dissociation_type.unwrap_or(DissociationType::Hcd),
            max_fragment_charge: self.max_fragment_charge.unwrap_or(3),
            report_all_ambiguity: self.report_all_ambiguity.unwrap_or(true),
            match_all_charges: self.match_all_charges.unwrap_or(false),
            digestion: self.digestion.unwrap_or_default(),
        };
        params.validate()?;
        Ok(params)
    }
}

impl CommonParameters {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_threads_per_file == 0 {
            return Err(EngineError::InvalidConfiguration(
                "max_threads_per_file must be at least 1".into(),
            ));
        }
        if !self.score_cutoff.is_finite() || self.score_cutoff < 0.0 {
            return Err(EngineError::InvalidConfiguration(format!(
                "score_cutoff must be finite and non-negative, got {}",
                self.score_cutoff
            )));
        }
        if self.max_fragment_charge == 0 {
            return Err(EngineError::InvalidConfiguration(
                "max_fragment_charge must be at least 1".into(),
            ));
        }
        if self.digestion.min_peptide_length > self.digestion.max_peptide_length {
            return Err(EngineError::InvalidConfiguration(format!(
                "min_peptide_length {} exceeds max_peptide_length {}",
                self.digestion.min_peptide_length, self.digestion.max_peptide_length
            )));
        }
        if self.digestion.protease.name.is_empty() {
            return Err(EngineError::InvalidConfiguration(
                "digestion protease has no name".into(),
            ));
        }
        Ok(())
    }

    /// Overlay per-file settings, resolving names against the known sets;
    /// unknown names fail the invocation rather than being dropped.
    pub fn resolve_file_specific(
        &self,
        overrides: &FileSpecificOverrides,
        known_modifications: &[Modification],
    ) -> Result<CommonParameters, EngineError> {
        let mut params = self.clone();
        if let Some(tol) = overrides.precursor_mass_tolerance {
            params.precursor_mass_tolerance = tol;
        }
        if let Some(tol) = overrides.product_mass_tolerance {
            params.product_mass_tolerance = tol;
        }
        if let Some(name) = &overrides.protease {
            params.digestion.protease = Protease::by_name(name)
                .ok_or_else(|| EngineError::UnknownProtease(name.clone()))?;
        }
        if let Some(ids) = &overrides.modification_ids {
            for id in ids {
                if !known_modifications.iter().any(|m| &m.id == id) {
                    return Err(EngineError::UnknownModification(id.clone()));
                }
            }
        }
        params.validate()?;
        Ok(params)
    }
}

/// Per-file parameter overlay, resolved against the loaded modification
/// and protease sets before a file is searched.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileSpecificOverrides {
    pub precursor_mass_tolerance: Option<Tolerance>,
    pub product_mass_tolerance: Option<Tolerance>,
    pub protease: Option<String>,
    pub modification_ids: Option<Vec<String>>,
}
