use std::fmt::Write;

use crate::breakdown::{self, BreakdownRow, BreakdownSpec, ChartShape};
use crate::config::BundleRule;
use crate::models::{FinalizedData, EMAIL, PLATFORM, TYPOLOGY};
use crate::select::latest_attempts;

fn write_rows(output: &mut String, rows: &[BreakdownRow], unit: &str, empty: &str) {
    if rows.is_empty() {
        let _ = writeln!(output, "{empty}");
        return;
    }
    for row in rows {
        let _ = writeln!(
            output,
            "- {}: {} {} ({:.2}%)",
            row.keys.join(" / "),
            row.count,
            unit,
            row.percentage
        );
    }
}

/// Renders the headline metrics and the main breakdowns as markdown.
/// `scope` describes the filters the tables were narrowed by. Typology
/// counts use each learner's latest attempt per test.
pub fn build_report(scope: &str, data: &FinalizedData, bundles: &[BundleRule]) -> String {
    let learners = breakdown::learner_counts(&data.reconciled, EMAIL);
    let users = breakdown::user_counts(&data.activity_capture);
    let platforms = breakdown::breakdown(
        &data.reconciled,
        &BreakdownSpec::distinct(&[PLATFORM], &[EMAIL], ChartShape::Bar),
    );
    let per_bundle = breakdown::bundle_learners(&data.reconciled, bundles);
    let typology = breakdown::breakdown(
        &latest_attempts(&data.reconciled),
        &BreakdownSpec::distinct(&[TYPOLOGY], &[EMAIL], ChartShape::Pie),
    );

    let mut output = String::new();
    let _ = writeln!(output, "# Learner Dashboard Report");
    let _ = writeln!(output, "Generated for {scope}");
    let _ = writeln!(output);

    let _ = writeln!(output, "## Headline");
    let _ = writeln!(
        output,
        "- Active learners: {} ({} internal, {} external)",
        learners.overall, learners.internal, learners.external
    );
    let _ = writeln!(
        output,
        "- Registered users: {} ({} active, {} passive)",
        users.overall, users.active, users.passive
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Platform Split");
    write_rows(&mut output, &platforms, "learners", "No learner activity in this window.");

    let _ = writeln!(output);
    let _ = writeln!(output, "## Learners per Bundle");
    if bundles.is_empty() {
        let _ = writeln!(output, "No bundles configured.");
    } else {
        write_rows(&mut output, &per_bundle, "learners", "No bundle activity in this window.");
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Typology Mix");
    write_rows(&mut output, &typology, "learners", "No typology results in this window.");

    output
}
