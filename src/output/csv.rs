//! CSV rendering of operation logs and violations.

use super::terminal::format_field;
use crate::drift::DriftViolation;
use crate::plan::{Operation, OperationRecord, ReconciliationPlan, ReconciliationReport};
use crate::validate::Violation;

const REPORT_HEADER: &str = r#"  "id",   "outcome",   "kind",                           "entity",           "reason", "destructive", "attempts", "elapsed_ms", "error""#;
const PLAN_HEADER: &str = r#"  "id",   "kind",                           "entity",           "reason", "destructive", "depends_on", "changes""#;
const VIOLATION_HEADER: &str = r#""severity",                 "rule", "entities", "message""#;
const DRIFT_HEADER: &str = r#"                          "entity", "kind", "message""#;

fn record_row(r: &OperationRecord) -> String {
    format!(
        "{id},{outcome},{kind},{entity},{reason},{destructive},{attempts},{elapsed},{error}",
        id = format_field(r.id, 6),
        outcome = format_field(r.outcome, 11),
        kind = format_field(r.kind, 8),
        entity = format_field(&r.entity, 34),
        reason = format_field(r.reason, 18),
        destructive = format_field(r.destructive, 13),
        attempts = format_field(r.attempts, 10),
        elapsed = format_field(r.elapsed_ms, 12),
        error = format_field(r.error.as_deref().unwrap_or(""), 0),
    )
}

fn operation_row(op: &Operation) -> String {
    let depends_on: Vec<String> = op.depends_on.iter().map(|d| d.to_string()).collect();
    format!(
        "{id},{kind},{entity},{reason},{destructive},{deps},{changes}",
        id = format_field(op.id, 6),
        kind = format_field(op.kind, 8),
        entity = format_field(&op.entity, 34),
        reason = format_field(op.reason, 18),
        destructive = format_field(op.destructive, 13),
        deps = format_field(depends_on.join(" "), 12),
        changes = format_field(op.changes.join(" "), 0),
    )
}

fn violation_row(v: &Violation) -> String {
    let entities: Vec<String> = v.entities.iter().map(|k| k.to_string()).collect();
    format!(
        "{severity},{rule},{entities},{message}",
        severity = format_field(v.severity, 10),
        rule = format_field(v.rule, 22),
        entities = format_field(entities.join(" "), 10),
        message = format_field(&v.message, 0),
    )
}

pub fn report_csv(report: &ReconciliationReport) -> String {
    let mut lines = vec![REPORT_HEADER.to_string()];
    lines.extend(report.operations.iter().map(record_row));
    lines.join("\n") + "\n"
}

pub fn plan_csv(plan: &ReconciliationPlan) -> String {
    let mut lines = vec![PLAN_HEADER.to_string()];
    lines.extend(plan.operations.iter().map(operation_row));
    lines.join("\n") + "\n"
}

pub fn violations_csv(violations: &[Violation]) -> String {
    let mut lines = vec![VIOLATION_HEADER.to_string()];
    lines.extend(violations.iter().map(violation_row));
    lines.join("\n") + "\n"
}

pub fn drift_csv(drift: &[DriftViolation]) -> String {
    let mut lines = vec![DRIFT_HEADER.to_string()];
    lines.extend(drift.iter().map(|d| {
        let kind = match &d.kind {
            crate::drift::DriftKind::Missing => "missing",
            crate::drift::DriftKind::Modified { .. } => "modified",
        };
        format!(
            "{},{},{}",
            format_field(&d.entity, 34),
            format_field(kind, 6),
            format_field(&d.message, 0)
        )
    }));
    lines.join("\n") + "\n"
}
