//! Coloured text rendering for the terminal.

use crate::drift::DriftViolation;
use crate::plan::{Operation, OperationKind, Outcome, PlanStatus, ReconciliationPlan, ReconciliationReport};
use crate::validate::{Severity, Violation};
use colored::{ColoredString, Colorize};
use std::fmt::Write;

/// Format a value as a quoted, right-aligned field. Inner quotes are doubled.
pub fn format_field<T: ToString>(value: T, width: usize) -> String {
    let value_str = value.to_string().replace('"', "\"\"");
    let quoted = format!("\"{value_str}\"");
    let quoted_len = quoted.len();

    if quoted_len >= width {
        quoted
    } else {
        format!("{quoted:>width$}")
    }
}

fn status_colour(status: PlanStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        PlanStatus::Completed | PlanStatus::Validated => text.green(),
        PlanStatus::CompletedPartial => text.yellow(),
        PlanStatus::Failed | PlanStatus::Rejected => text.red(),
        _ => text.normal(),
    }
}

fn outcome_colour(outcome: Outcome) -> ColoredString {
    let text = format!("{:<9}", outcome.to_string());
    match outcome {
        Outcome::Succeeded => text.green(),
        Outcome::Failed => text.red(),
        Outcome::Skipped => text.yellow(),
    }
}

fn severity_colour(severity: Severity) -> ColoredString {
    let text = format!("{:<7}", severity.to_string());
    match severity {
        Severity::Error => text.on_red(),
        Severity::Warning => text.yellow(),
    }
}

pub fn violations_text(violations: &[Violation]) -> String {
    let mut out = String::new();
    if violations.is_empty() {
        let _ = writeln!(out, "{}", "No invariant violations".green());
    }
    for v in violations {
        let entities = v
            .entities
            .iter()
            .map(|k| k.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(
            out,
            "{} {:<22} {} [{entities}]",
            severity_colour(v.severity),
            v.rule.to_string(),
            v.message
        );
    }
    out
}

fn operation_line(op: &Operation) -> String {
    let kind = match op.kind {
        OperationKind::Create => "+ create".green(),
        OperationKind::Update if op.destructive => "! update".red(),
        OperationKind::Update => "~ update".yellow(),
        OperationKind::Delete => "- delete".red(),
    };
    let deps = if op.depends_on.is_empty() {
        String::new()
    } else {
        let ids: Vec<String> = op.depends_on.iter().map(|d| format!("#{d}")).collect();
        format!(" after {}", ids.join(","))
    };
    let changes = if op.changes.is_empty() {
        String::new()
    } else {
        format!(" ({})", op.changes.join(", "))
    };
    format!(
        "#{:<3} {kind} {}{changes} [{}]{deps}",
        op.id, op.entity, op.reason
    )
}

pub fn plan_text(plan: &ReconciliationPlan) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Plan '{}' {}: {} operation(s)",
        plan.topology_id,
        status_colour(plan.status),
        plan.len()
    );
    for op in &plan.operations {
        let _ = writeln!(out, "  {}", operation_line(op));
    }
    if !plan.warnings.is_empty() {
        out.push_str(&violations_text(&plan.warnings));
    }
    out
}

pub fn drift_text(drift: &[DriftViolation]) -> String {
    let mut out = String::new();
    if drift.is_empty() {
        let _ = writeln!(out, "{}", "No drift detected".green());
    }
    for d in drift {
        let _ = writeln!(out, "{} {}", "DRIFT".on_red(), d.message);
    }
    out
}

pub fn report_text(report: &ReconciliationReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Reconciliation of '{}' {} at {}",
        report.topology_id,
        status_colour(report.status),
        report.generated_at.format("%Y-%m-%d %H:%M:%S")
    );
    for r in &report.operations {
        let _ = write!(
            out,
            "  #{:<3} {} {:<6} {} attempts={} {}ms",
            r.id,
            outcome_colour(r.outcome),
            r.kind.to_string(),
            r.entity,
            r.attempts,
            r.elapsed_ms
        );
        if let Some(error) = &r.error {
            let _ = write!(out, " {}", error.red());
        }
        out.push('\n');
    }
    if !report.violations.is_empty() {
        out.push_str(&violations_text(&report.violations));
    }
    if !report.drift.is_empty() {
        out.push_str(&drift_text(&report.drift));
    }
    let unresolved = report.unresolved();
    if !unresolved.is_empty() {
        let keys: Vec<String> = unresolved.iter().map(|k| k.to_string()).collect();
        let _ = writeln!(out, "#{}# unresolved: {}", "NOTE".on_red(), keys.join(", "));
    }
    let _ = writeln!(
        out,
        "{} succeeded, {} failed, {} skipped",
        report.count(Outcome::Succeeded),
        report.count(Outcome::Failed),
        report.count(Outcome::Skipped)
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceKey;
    use crate::plan::OperationRecord;
    use crate::validate::Rule;

    #[test]
    fn test_format_field_short() {
        assert_eq!(format_field("test", 10), "    \"test\"");
    }

    #[test]
    fn test_format_field_exact() {
        assert_eq!(format_field("test", 6), "\"test\"");
    }

    #[test]
    fn test_format_field_long() {
        assert_eq!(format_field("long_value", 5), "\"long_value\"");
    }

    #[test]
    fn test_format_field_number() {
        assert_eq!(format_field(42, 6), "  \"42\"");
    }

    #[test]
    fn test_format_field_escapes_quotes() {
        assert_eq!(format_field("say \"hi\"", 0), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_violations_text_lists_entities() {
        let text = violations_text(&[Violation::error(
            Rule::Cidr,
            vec![ResourceKey::segment("hub"), ResourceKey::segment("spoke-lab")],
            "address spaces overlap",
        )]);
        assert!(text.contains("address spaces overlap"));
        assert!(text.contains("[segment:hub, segment:spoke-lab]"));
    }

    #[test]
    fn test_report_text_names_unresolved() {
        let mut plan = ReconciliationPlan::new(
            "lab",
            vec![
                Operation::delete(1, ResourceKey::segment("old")),
                Operation::delete(2, ResourceKey::segment("older")),
            ],
            vec![],
        )
        .unwrap();
        plan.transition(PlanStatus::Validating).unwrap();
        plan.transition(PlanStatus::Validated).unwrap();
        plan.transition(PlanStatus::Executing).unwrap();
        plan.transition(PlanStatus::CompletedPartial).unwrap();
        let records = vec![
            OperationRecord::new(&plan.operations[0], Outcome::Succeeded, 1),
            OperationRecord::new(&plan.operations[1], Outcome::Failed, 5).with_error("throttled"),
        ];
        let report = ReconciliationReport::new(&plan, records, vec![]);
        let text = report_text(&report);
        assert!(text.contains("throttled"));
        assert!(text.contains("unresolved: segment:older"));
        assert!(text.contains("1 succeeded, 1 failed, 0 skipped"));
    }
}
