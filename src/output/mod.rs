//! Rendering of plans, reports, violations and drift findings.
//!
//! - [`terminal`] - coloured text
//! - [`csv`] - quoted, aligned CSV like the cache exports
//! - [`json`] - pretty JSON

mod csv;
mod json;
mod terminal;

use crate::drift::DriftViolation;
use crate::error::ReconcileError;
use crate::plan::{ReconciliationPlan, ReconciliationReport};
use crate::validate::Violation;

pub use csv::{drift_csv, plan_csv, report_csv, violations_csv};
pub use json::to_json;
pub use terminal::{drift_text, format_field, plan_text, report_text, violations_text};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Csv,
    Json,
}

pub fn render_violations(violations: &[Violation], format: OutputFormat) -> Result<String, ReconcileError> {
    match format {
        OutputFormat::Text => Ok(violations_text(violations)),
        OutputFormat::Csv => Ok(violations_csv(violations)),
        OutputFormat::Json => to_json(violations),
    }
}

pub fn render_plan(plan: &ReconciliationPlan, format: OutputFormat) -> Result<String, ReconcileError> {
    match format {
        OutputFormat::Text => Ok(plan_text(plan)),
        OutputFormat::Csv => Ok(plan_csv(plan)),
        OutputFormat::Json => to_json(plan),
    }
}

pub fn render_report(report: &ReconciliationReport, format: OutputFormat) -> Result<String, ReconcileError> {
    match format {
        OutputFormat::Text => Ok(report_text(report)),
        OutputFormat::Csv => Ok(report_csv(report)),
        OutputFormat::Json => to_json(report),
    }
}

pub fn render_drift(drift: &[DriftViolation], format: OutputFormat) -> Result<String, ReconcileError> {
    match format {
        OutputFormat::Text => Ok(drift_text(drift)),
        OutputFormat::Csv => Ok(drift_csv(drift)),
        OutputFormat::Json => to_json(drift),
    }
}
