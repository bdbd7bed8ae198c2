//! Plain-text diagnostics report
//!
//! The layout is fixed: header, status, then one section each for invalid
//! constraints, conflicts, redundant constraints and suggestions. Every
//! section is always present so a report renders the same way in any state.

use std::fmt::Write;

use super::DiagnosticsResult;

pub(crate) fn render(name: &str, result: &DiagnosticsResult) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail
    let _ = write_report(&mut out, name, result);
    out
}

fn write_report(out: &mut String, name: &str, result: &DiagnosticsResult) -> std::fmt::Result {
    let title = format!("Sketch diagnostics: {}", name);
    writeln!(out, "{}", title)?;
    writeln!(out, "{}", "=".repeat(title.chars().count()))?;
    writeln!(out, "Status: {}", result.status)?;
    writeln!(
        out,
        "DOF: {} ({} variables, {} weighted equations from {} active constraints)",
        result.dof, result.n_vars, result.n_weighted_constraints, result.n_constraints
    )?;
    match &result.solve {
        Some(solve) => writeln!(
            out,
            "Solve: {} (aggregate error {:.3e}, max error {:.3e}, {} iterations)",
            solve.message, solve.aggregate_error, solve.max_error, solve.iterations
        )?,
        None => writeln!(out, "Solve: not attempted")?,
    }
    if !result.purged.is_empty() {
        let purged: Vec<String> = result.purged.iter().map(|id| id.to_string()).collect();
        writeln!(out, "Purged dangling constraints: {}", purged.join(", "))?;
    }

    section(out, "Invalid constraints", result.invalid.len())?;
    for (id, reason) in &result.invalid {
        writeln!(out, "  {}: {}", result.label(*id), reason)?;
    }

    section(out, "Conflicts", result.conflicts.len())?;
    for conflict in &result.conflicts {
        let members: Vec<String> = conflict
            .constraints
            .iter()
            .map(|id| result.label(*id))
            .collect();
        writeln!(
            out,
            "  [{}] {}: {}",
            conflict.severity,
            conflict.category,
            members.join(", ")
        )?;
        writeln!(out, "    {}", conflict.explanation)?;
        let fix = if conflict.auto_fixable { " (auto-fixable)" } else { "" };
        writeln!(out, "    Resolution: {}{}", conflict.resolution, fix)?;
    }

    section(out, "Redundant constraints", result.redundant.len())?;
    for id in &result.redundant {
        let reason = result
            .constraint_info(*id)
            .and_then(|c| c.redundancy_reason.as_deref())
            .unwrap_or("implied by the remaining constraints");
        writeln!(out, "  {}: {}", result.label(*id), reason)?;
    }

    section(out, "Suggestions", result.suggestions.len())?;
    for suggestion in &result.suggestions {
        let add = if suggestion.auto_addable { " (auto-addable)" } else { "" };
        writeln!(
            out,
            "  [{}] {}: {}{}",
            suggestion.priority,
            suggestion.proposed.name(),
            suggestion.description,
            add
        )?;
    }
    Ok(())
}

fn section(out: &mut String, title: &str, count: usize) -> std::fmt::Result {
    writeln!(out)?;
    writeln!(out, "{} ({})", title, count)?;
    if count == 0 {
        writeln!(out, "  none")?;
    }
    Ok(())
}
