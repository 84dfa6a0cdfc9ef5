use std::fmt::Write;

use crate::drilldown::{DrillDownPayload, DrillDownSummary};
use crate::insights::AiSummary;
use crate::models::Metric;
use crate::view::format_value;

const CLIENT_LIST_LIMIT: usize = 25;

pub fn build_drilldown_report(payload: &DrillDownPayload) -> String {
    let summary = payload.summarize();
    let mut output = String::new();

    let _ = writeln!(output, "# {} ({})", payload.title(), payload.kind());
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    write_summary_lines(&mut output, &summary);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Clients");

    let clients = payload.clients();
    if clients.is_empty() {
        let _ = writeln!(output, "No data available.");
        return output;
    }

    for client in clients.iter().take(CLIENT_LIST_LIMIT) {
        let _ = writeln!(
            output,
            "- {} ({}) first visit {} at {}: {} / {}, LTV {}",
            client.display_name(),
            client.is_new.as_deref().unwrap_or("Unknown"),
            client.first_visit_date.as_deref().unwrap_or("unknown date"),
            client.first_visit_location.as_deref().unwrap_or("unknown location"),
            client
                .conversion_status
                .as_deref()
                .filter(|s| !s.is_empty())
                .unwrap_or("Not converted"),
            client
                .retention_status
                .as_deref()
                .filter(|s| !s.is_empty())
                .unwrap_or("Not retained"),
            format_value(Metric::TotalLtv, client.ltv.unwrap_or(0.0))
        );
    }
    if clients.len() > CLIENT_LIST_LIMIT {
        let _ = writeln!(output, "- ...and {} more", clients.len() - CLIENT_LIST_LIMIT);
    }

    output
}

fn write_summary_lines(output: &mut String, summary: &DrillDownSummary) {
    let _ = writeln!(output, "- Total clients: {}", summary.total);
    let _ = writeln!(output, "- New members: {}", summary.new_members);
    let _ = writeln!(
        output,
        "- Converted: {} new ({} of new members), {} marked overall",
        summary.converted,
        format_value(Metric::ConversionRate, summary.conversion_rate),
        summary.marked_converted
    );
    let _ = writeln!(
        output,
        "- Retained: {} new ({} of new members), {} marked overall",
        summary.retained,
        format_value(Metric::RetentionRate, summary.retention_rate),
        summary.marked_retained
    );
    let _ = writeln!(
        output,
        "- LTV: {} total, {} average",
        format_value(Metric::TotalLtv, summary.total_ltv),
        format_value(Metric::AvgLtv, summary.avg_ltv)
    );
    let _ = writeln!(
        output,
        "- Average conversion time: {}",
        format_value(Metric::AvgConversionDays, summary.avg_conversion_days)
    );
}

pub fn build_summary_report(
    context: &str,
    location_id: &str,
    summary: &AiSummary,
    cached: bool,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# AI Summary: {context}");
    let _ = writeln!(
        output,
        "Generated for {}{}",
        location_id,
        if cached { " (cached)" } else { "" }
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "{}", summary.summary);

    let sections = [
        ("Key Insights", &summary.key_insights),
        ("Trends", &summary.trends),
        ("Recommendations", &summary.recommendations),
    ];
    for (heading, items) in sections {
        let _ = writeln!(output);
        let _ = writeln!(output, "## {heading}");
        if items.is_empty() {
            let _ = writeln!(output, "None reported.");
        }
        for item in items {
            let _ = writeln!(output, "- {item}");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "## Data Quality ({:.0}/100)",
        summary.data_quality.score
    );
    if summary.data_quality.issues.is_empty() {
        let _ = writeln!(output, "No issues reported.");
    }
    for issue in &summary.data_quality.issues {
        let _ = writeln!(output, "- {issue}");
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drilldown::DrillDownKind;
    use crate::insights::DataQuality;
    use crate::models::ClientRecord;

    #[test]
    fn drilldown_report_lists_summary_and_clients() {
        let payload = DrillDownPayload::Raw {
            kind: DrillDownKind::Ranking,
            clients: vec![
                ClientRecord {
                    first_name: Some("Ria".to_string()),
                    is_new: Some("New".to_string()),
                    conversion_status: Some("Converted".to_string()),
                    ltv: Some(4500.0),
                    ..Default::default()
                },
                ClientRecord {
                    first_name: Some("Dev".to_string()),
                    is_new: Some("Existing".to_string()),
                    conversion_status: Some("Converted".to_string()),
                    ..Default::default()
                },
            ],
        };
        let report = build_drilldown_report(&payload);
        assert!(report.starts_with("# Clients (ranking)\n"));
        assert!(report.contains("- Converted: 1 new (100.0% of new members), 2 marked overall"));
        assert!(report.contains("- Retained: 0 new (0.0% of new members), 0 marked overall"));
        assert!(report.contains("- Ria (New) first visit unknown date"));
        assert!(report.contains("Converted / Not retained, LTV ₹4,500"));
    }

    #[test]
    fn empty_drilldown_says_so() {
        let payload = DrillDownPayload::Raw {
            kind: DrillDownKind::Month,
            clients: Vec::new(),
        };
        assert!(build_drilldown_report(&payload).ends_with("No data available.\n"));
    }

    #[test]
    fn summary_report_renders_every_section() {
        let summary = AiSummary {
            summary: "March conversions held steady.".to_string(),
            key_insights: vec!["Trials up 12%".to_string()],
            trends: Vec::new(),
            recommendations: vec!["Follow up lapsed trials".to_string()],
            data_quality: DataQuality {
                score: 91.0,
                issues: Vec::new(),
            },
        };
        let report = build_summary_report("client-retention", "kwality-house", &summary, true);
        assert!(report.contains("Generated for kwality-house (cached)"));
        assert!(report.contains("## Key Insights\n- Trials up 12%"));
        assert!(report.contains("## Trends\nNone reported."));
        assert!(report.contains("## Data Quality (91/100)\nNo issues reported."));
    }
}
