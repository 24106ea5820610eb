//! Results reporting and formatting.

use crate::metrics::SimResults;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};

/// Formats simulation results for output.
pub struct ResultsReport;

impl ResultsReport {
    /// Format results as a console table.
    pub fn format_table(results: &SimResults) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![format!("Cache Simulation: {}", results.scenario_name)]);

        let cache = &results.cache;
        table.add_row(vec!["Duration:", &format!("{:.2}s", results.duration_secs)]);
        table.add_row(vec!["Requests:", &format!("{}", results.total_requests)]);
        table.add_row(vec![
            "Complete / with errors / rejected:",
            &format!(
                "{} / {} / {}",
                results.complete_requests, results.requests_with_errors, results.rejected_requests
            ),
        ]);
        table.add_row(vec![
            "Requests/sec:",
            &format!("{:.1}", results.requests_per_second),
        ]);

        table.add_row(vec!["", ""]);
        table.add_row(vec!["Latency (ms)", "p50 / p90 / p99 / max"]);
        table.add_row(vec![
            "",
            &format!(
                "{:.2} / {:.2} / {:.2} / {:.2}",
                results.latency_p50, results.latency_p90, results.latency_p99, results.latency_max
            ),
        ]);

        table.add_row(vec!["", ""]);
        table.add_row(vec!["Hit Ratio:", &format!("{:.1}%", cache.hit_ratio * 100.0)]);
        table.add_row(vec![
            "Filling Degree:",
            &format!(
                "{:.1}% ({} / {})",
                cache.filling_degree * 100.0,
                cache.data_size,
                cache.config.max_cache_data_size
            ),
        ]);
        table.add_row(vec![
            "Blocks (live / pooled):",
            &format!("{} / {}", cache.blocks, cache.pooled_blocks),
        ]);
        table.add_row(vec![
            "Provider Fetches:",
            &format!("{} ({} points)", cache.provider_fetches, cache.provider_points),
        ]);
        table.add_row(vec!["Evictions:", &format!("{}", cache.evictions)]);
        table.add_row(vec![
            "Merges (ok / failed):",
            &format!("{} / {}", cache.merges, cache.failed_merges),
        ]);

        table.to_string()
    }

    /// Format results as JSON.
    pub fn format_json(results: &SimResults) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(results)?)
    }

    /// Format results as CSV row.
    pub fn format_csv(results: &SimResults) -> String {
        format!(
            "{},{},{},{:.1},{:.2},{:.2},{:.2},{:.4},{:.4},{},{}",
            results.timestamp,
            results.scenario_name,
            results.total_requests,
            results.requests_per_second,
            results.latency_p50,
            results.latency_p90,
            results.latency_p99,
            results.cache.hit_ratio,
            results.cache.filling_degree,
            results.cache.provider_fetches,
            results.cache.evictions
        )
    }

    /// CSV header row.
    pub fn csv_header() -> &'static str {
        "timestamp,scenario,requests,rps,p50,p90,p99,hit_ratio,filling_degree,provider_fetches,evictions"
    }
}
