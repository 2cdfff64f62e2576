//! Portfolio batch audit pipeline.
//!
//! Takes a table of companies with arbitrary column sets, aligns each row
//! onto the feature schema (unknown columns carried through untouched,
//! missing features filled with the fitted means), scores the whole matrix in
//! one vectorized pass, and aggregates portfolio summary statistics.
//!
//! Output formats: JSON (full report), CSV (one row per company), summary
//! (text table).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use eyre::{Result, WrapErr};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::artifact::ModelContext;
use crate::error::ScoreError;
use crate::model::RiskStatus;

/// One input row: column name → cell value. Cells in schema-matched columns
/// must be numeric; everything else is passthrough.
pub type TableRow = BTreeMap<String, Value>;

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Scored outcome for one input row.
#[derive(Debug, Clone, Serialize)]
pub struct RowResult {
    pub row_index: usize,
    pub probability: f64,
    pub status: RiskStatus,
    /// The original row as supplied, including columns the model ignored.
    pub data: TableRow,
}

/// Portfolio-level aggregate.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub high_risk: usize,
    pub stable: usize,
    /// Mean probability over all rows; `None` for an empty table (explicit
    /// no-data case, never NaN).
    pub average_risk: Option<f64>,
}

/// Full batch outcome, rows in input order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub rows: Vec<RowResult>,
    pub summary: BatchSummary,
}

// ---------------------------------------------------------------------------
// Alignment and scoring
// ---------------------------------------------------------------------------

/// Score a batch of rows against the loaded context.
///
/// Alignment: a default-filled `rows × features` matrix seeded from the
/// fitted means, with every schema-matched cell overwriting its position.
/// Row order is preserved. A non-numeric cell in a schema-matched column is
/// a [`ScoreError::MalformedBatchInput`] that aborts this batch only.
pub fn score_rows(ctx: &ModelContext, rows: &[TableRow]) -> Result<BatchResult, ScoreError> {
    if rows.is_empty() {
        return Ok(BatchResult {
            rows: Vec::new(),
            summary: BatchSummary {
                total: 0,
                high_risk: 0,
                stable: 0,
                average_risk: None,
            },
        });
    }

    let mut matrix: Vec<Vec<f64>> = rows.iter().map(|_| ctx.scaler.mean.clone()).collect();
    for (row_index, row) in rows.iter().enumerate() {
        for (column, cell) in row {
            let Some(position) = ctx.schema.position(column) else {
                continue; // passthrough column, carried in `data`
            };
            let value = numeric_cell(cell).ok_or_else(|| {
                ScoreError::MalformedBatchInput(format!(
                    "row {row_index}, column `{column}`: expected a number, got {cell}"
                ))
            })?;
            matrix[row_index][position] = value;
        }
    }

    ctx.scaler.normalize_matrix(&mut matrix)?;
    let probabilities = ctx.model.predict_proba(&matrix);

    let mut high_risk = 0usize;
    let scored: Vec<RowResult> = probabilities
        .iter()
        .enumerate()
        .map(|(row_index, &probability)| {
            let status = RiskStatus::from_probability(probability);
            if status.is_high_risk() {
                high_risk += 1;
            }
            RowResult {
                row_index,
                probability,
                status,
                data: rows[row_index].clone(),
            }
        })
        .collect();

    let total = scored.len();
    let average_risk = Some(probabilities.iter().sum::<f64>() / total as f64);
    debug!(total, high_risk, "batch scored");

    Ok(BatchResult {
        rows: scored,
        summary: BatchSummary {
            total,
            high_risk,
            stable: total - high_risk,
            average_risk,
        },
    })
}

/// Numeric view of a JSON cell: numbers directly, numeric strings parsed
/// (the CSV reader yields strings for every cell).
fn numeric_cell(cell: &Value) -> Option<f64> {
    match cell {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// CSV ingestion
// ---------------------------------------------------------------------------

/// Read a CSV table into rows, all cells as strings. Numeric interpretation
/// of schema-matched columns happens in [`score_rows`].
pub fn read_csv_rows<R: std::io::Read>(reader: R) -> Result<Vec<TableRow>, ScoreError> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let headers: Vec<String> = csv_reader
        .headers()
        .map_err(|e| ScoreError::MalformedBatchInput(format!("unreadable header: {e}")))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for (i, record) in csv_reader.records().enumerate() {
        let record =
            record.map_err(|e| ScoreError::MalformedBatchInput(format!("row {i}: {e}")))?;
        let row: TableRow = headers
            .iter()
            .zip(record.iter())
            .map(|(h, cell)| (h.clone(), Value::String(cell.to_string())))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Report pipeline (CLI)
// ---------------------------------------------------------------------------

/// Configuration for a batch audit run.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Input CSV path.
    pub input: PathBuf,
    /// Output format: "json", "csv", or "summary".
    pub format: String,
    /// Output file path (None = stdout).
    pub output: Option<PathBuf>,
}

/// Serialized report wrapper for the JSON format.
#[derive(Debug, Serialize)]
struct BatchReport<'a> {
    artifact_fingerprint: &'a str,
    duration_secs: f64,
    summary: &'a BatchSummary,
    results: &'a [RowResult],
}

/// Run the batch audit pipeline: read CSV, score, format, write.
pub fn run_batch(ctx: &ModelContext, config: &BatchConfig) -> Result<()> {
    let start = Instant::now();

    let file = std::fs::File::open(&config.input)
        .wrap_err_with(|| format!("Failed to open input table {:?}", config.input))?;
    let rows = read_csv_rows(file)?;
    info!(rows = rows.len(), "table read");

    let result = score_rows(ctx, &rows)?;

    let output_text = match config.format.as_str() {
        "json" => {
            let report = BatchReport {
                artifact_fingerprint: &ctx.fingerprint,
                duration_secs: start.elapsed().as_secs_f64(),
                summary: &result.summary,
                results: &result.rows,
            };
            serde_json::to_string_pretty(&report)? + "\n"
        }
        "csv" => format_csv(&result),
        _ => format_summary(ctx, &result),
    };

    if let Some(path) = &config.output {
        std::fs::write(path, &output_text)
            .wrap_err_with(|| format!("Failed to write report to {:?}", path))?;
        info!(path = %path.display(), "report written");
    } else {
        print!("{}", output_text);
    }

    Ok(())
}

fn format_csv(result: &BatchResult) -> String {
    let mut out = String::from("row,status,probability,extra\n");
    for r in &result.rows {
        let extra = if r.data.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&r.data).unwrap_or_default()
        };
        out.push_str(&format!(
            "{},{},{:.6},{}\n",
            r.row_index,
            r.status.as_str(),
            r.probability,
            escape_csv(&extra),
        ));
    }
    out
}

fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn format_summary(ctx: &ModelContext, result: &BatchResult) -> String {
    let s = &result.summary;
    let mut out = String::new();
    out.push_str("Portfolio Audit\n");
    out.push_str("===============\n");
    out.push_str(&format!("Companies scored : {}\n", s.total));
    out.push_str(&format!("High risk        : {}\n", s.high_risk));
    out.push_str(&format!("Stable           : {}\n", s.stable));
    match s.average_risk {
        Some(avg) => out.push_str(&format!("Average risk     : {:.1}%\n", avg * 100.0)),
        None => out.push_str("Average risk     : n/a (no data)\n"),
    }
    out.push_str(&format!("Artifact         : {}\n", ctx.fingerprint));
    out
}
