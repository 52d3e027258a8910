//! Engines for assigning peptide sequences to tandem mass spectra.
//!
//! The crate is built around three engines that share one data model:
//!
//! * [`search::ClassicSearchEngine`] digests proteins, fragments the
//!   resulting peptides, and scores them against MS2 scans in parallel,
//!   generating decoys on the fly.
//! * [`fdr::FdrAnalysisEngine`] assigns q-values (global and per mass-notch)
//!   to the resulting peptide-spectral matches and estimates posterior error
//!   probabilities.
//! * [`gptmd::GptmdEngine`] explains leftover precursor mass differences on
//!   confident matches with known modifications and annotates the protein
//!   database with candidate PTM sites.
//!
//! File parsing, task orchestration, and result writing live outside this
//! crate; everything here operates on in-memory scans and proteins.

pub mod enzyme;
pub mod error;
pub mod fdr;
pub mod gptmd;
pub mod ion_series;
pub mod mass;
pub mod mass_diff;
pub mod modification;
pub mod params;
pub mod peptide;
pub mod progress;
pub mod psm;
pub mod scoring;
pub mod search;
pub mod spectrum;
