use crate::models::{EvaluatorSummary, OutputItem};
use crate::runner::WorkflowReport;
use crate::workflow::CollectOutcome;
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Output format options
#[derive(Debug, Clone, Copy, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    Plain,
    Json,
}

/// Artifact name for a run's output items
pub fn results_file_name(timestamp: &str) -> String {
    format!("eval_results_{timestamp}.json")
}

/// Write output items as pretty JSON under `dir`, returning the file path
pub fn write_results(dir: &Path, timestamp: &str, items: &[OutputItem]) -> Result<PathBuf> {
    let json_content =
        serde_json::to_string_pretty(items).context("Failed to serialize results to JSON")?;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    let path = dir.join(results_file_name(timestamp));
    std::fs::write(&path, json_content)
        .with_context(|| format!("Failed to write results to: {}", path.display()))?;

    Ok(path)
}

/// Aggregate scores per evaluator, in order of first appearance
pub fn summarize(items: &[OutputItem]) -> Vec<EvaluatorSummary> {
    let mut order: Vec<&str> = Vec::new();
    let mut scores: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    let mut verdicts: BTreeMap<&str, (usize, usize)> = BTreeMap::new();

    for result in items.iter().flat_map(|item| &item.results) {
        let name = result.name.as_str();
        if !order.contains(&name) {
            order.push(name);
        }
        if let Some(score) = result.score {
            scores.entry(name).or_default().push(score);
        }
        if let Some(passed) = result.passed {
            let entry = verdicts.entry(name).or_default();
            entry.1 += 1;
            if passed {
                entry.0 += 1;
            }
        }
    }

    order
        .into_iter()
        .map(|name| {
            let values = scores.get(name).map(Vec::as_slice).unwrap_or_default();
            EvaluatorSummary {
                name: name.to_string(),
                scored: values.len(),
                mean: calculate_mean(values),
                median: calculate_median(values),
                pass_rate: verdicts
                    .get(name)
                    .map(|(passed, total)| *passed as f64 / *total as f64),
            }
        })
        .collect()
}

fn calculate_mean(scores: &[f64]) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    let sum: f64 = scores.iter().sum();
    Some(sum / scores.len() as f64)
}

fn calculate_median(scores: &[f64]) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    let mut sorted_scores = scores.to_vec();
    sorted_scores.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mid = sorted_scores.len() / 2;
    if sorted_scores.len() % 2 == 0 {
        Some((sorted_scores[mid - 1] + sorted_scores[mid]) / 2.0)
    } else {
        Some(sorted_scores[mid])
    }
}

/// Print the workflow report in the specified format
pub fn print_report(report: &WorkflowReport, format: OutputFormat) {
    match format {
        OutputFormat::Plain => print_plain(report),
        OutputFormat::Json => print_json(report),
    }
}

fn print_plain(report: &WorkflowReport) {
    println!("{}", "-".repeat(48));
    println!("Evaluation Run Finished!");
    println!("Evaluation: {}", report.eval_id);
    println!("Run: {}", report.run.id);
    println!("Status: {}", report.run.status);
    if let Some(url) = &report.run.report_url {
        println!("Report URL: {}", url);
    }
    println!("{}", "-".repeat(48));

    match &report.collection {
        CollectOutcome::Saved { path, items } => {
            println!("Saved {} output items to {}", items, path.display());
        }
        CollectOutcome::Skipped { status } => {
            println!("Run ended {}; no results collected.", status);
        }
        CollectOutcome::FetchFailed { message } => {
            println!("Failed to retrieve results: {}", message);
        }
    }

    if !report.summary.is_empty() {
        println!();
        print_summary_plain(&report.summary);
    }
}

fn print_summary_plain(summary: &[EvaluatorSummary]) {
    println!(
        "{:<15} {:<8} {:<8} {:<8} {:<8}",
        "Evaluator", "Scored", "Mean", "Median", "Pass"
    );
    println!("{}", "-".repeat(51));

    for entry in summary {
        println!(
            "{:<15} {:<8} {:<8} {:<8} {:<8}",
            entry.name,
            entry.scored,
            format_metric(entry.mean),
            format_metric(entry.median),
            entry
                .pass_rate
                .map(|rate| format!("{:.0}%", rate * 100.0))
                .unwrap_or_else(|| "-".to_string()),
        );
    }
}

fn format_metric(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.3}", v))
        .unwrap_or_else(|| "-".to_string())
}

fn print_json(report: &WorkflowReport) {
    match serde_json::to_string_pretty(report) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing report to JSON: {}", e),
    }
}
