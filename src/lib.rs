//! CSV import validation and repair for a vehicle-rental back office.

pub mod analyzer;
pub mod db;
pub mod error;
pub mod importer;
pub mod models;
pub mod repair;
pub mod settings;

pub use analyzer::{analyze_csv, Analysis, AnalyzedRow, Analyzer};
pub use error::{FleetError, Result};
pub use models::{AnalysisReport, ImportSchema, ImportType};
