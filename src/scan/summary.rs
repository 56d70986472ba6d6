// src/scan/summary.rs

//! Gate report summary
//!
//! The scanner's JSON gate output is keyed by image, each holding a table:
//!
//! ```json
//! { "<image>": { "result": {
//!     "header": ["Image_Id", "Repo_Tag", "Gate", "Trigger", "Check_Output", "Gate_Action"],
//!     "rows": [["abc", "alpine:3", "DOCKERFILECHECK", "NOFROM", "...", "warn"], ...]
//! } } }
//! ```
//!
//! Rows are tallied per image by their `Gate_Action`. A row whose `Gate` is
//! `FINAL` carries the image's overall action and is not counted.

use serde::Serialize;
use serde_json::Value;
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, EnumIter};
use tracing::{debug, warn};

const REPO_TAG_COLUMN: &str = "Repo_Tag";
const GATE_ACTION_COLUMN: &str = "Gate_Action";
const GATE_COLUMN: &str = "Gate";
const FINAL_GATE: &str = "FINAL";

/// Columns of the summary table, in display order
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, AsRefStr)]
pub enum SummaryColumn {
    #[strum(serialize = "Repo_Tag")]
    RepoTag,
    #[strum(serialize = "Stop_Actions")]
    StopActions,
    #[strum(serialize = "Warn_Actions")]
    WarnActions,
    #[strum(serialize = "Go_Actions")]
    GoActions,
    #[strum(serialize = "Final_Action")]
    FinalAction,
}

/// DataTables column descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnHeader {
    pub data: String,
    pub title: String,
}

/// Per-image tally
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageSummary {
    #[serde(rename = "Repo_Tag")]
    pub repo_tag: String,
    #[serde(rename = "Stop_Actions")]
    pub stop: u32,
    #[serde(rename = "Warn_Actions")]
    pub warn: u32,
    #[serde(rename = "Go_Actions")]
    pub go: u32,
    #[serde(rename = "Final_Action")]
    pub final_action: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActionTotals {
    pub stop: u32,
    pub warn: u32,
    pub go: u32,
}

/// Summary of one gate report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateSummary {
    pub header: Vec<ColumnHeader>,
    pub rows: Vec<ImageSummary>,
    pub totals: ActionTotals,
}

impl GateSummary {
    /// Summarise captured gate output
    pub fn from_gate_output(output: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(output)?;
        Ok(Self::from_value(&value))
    }

    fn from_value(value: &Value) -> Self {
        let mut summary = Self {
            header: header(),
            rows: Vec::new(),
            totals: ActionTotals::default(),
        };

        let Some(images) = value.as_object() else {
            warn!("Gate output is not a JSON object, no summary produced");
            return summary;
        };

        for (image_key, image) in images {
            let Some(table) = image.get("result") else {
                debug!("No result table for {} in gate output", image_key);
                continue;
            };
            let row = summarize_image(image_key, table);
            summary.totals.stop += row.stop;
            summary.totals.warn += row.warn;
            summary.totals.go += row.go;
            summary.rows.push(row);
        }

        summary
    }
}

fn header() -> Vec<ColumnHeader> {
    SummaryColumn::iter()
        .map(|column| ColumnHeader {
            data: column.as_ref().to_string(),
            title: column.as_ref().replace('_', " "),
        })
        .collect()
}

fn summarize_image(image_key: &str, table: &Value) -> ImageSummary {
    let columns: Vec<&str> = table
        .get("header")
        .and_then(Value::as_array)
        .map(|h| h.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let index_of = |name: &str| columns.iter().position(|c| *c == name);
    let tag_idx = index_of(REPO_TAG_COLUMN);
    let action_idx = index_of(GATE_ACTION_COLUMN);
    let gate_idx = index_of(GATE_COLUMN);

    let mut repo_tag: Option<String> = None;
    let mut final_action: Option<String> = None;
    let (mut stop, mut warn, mut go) = (0u32, 0u32, 0u32);

    let rows = table.get("rows").and_then(Value::as_array);
    for row in rows.into_iter().flatten() {
        let Some(cells) = row.as_array() else {
            continue;
        };
        let cell = |idx: Option<usize>| idx.and_then(|i| cells.get(i)).and_then(Value::as_str);

        if repo_tag.is_none()
            && let Some(tag) = cell(tag_idx).filter(|t| !t.is_empty())
        {
            repo_tag = Some(tag.to_string());
        }

        let Some(action) = cell(action_idx) else {
            continue;
        };
        if cell(gate_idx) == Some(FINAL_GATE) {
            final_action = Some(action.to_uppercase());
            continue;
        }
        match action.to_lowercase().as_str() {
            "stop" => stop += 1,
            "warn" => warn += 1,
            "go" => go += 1,
            _ => {}
        }
    }

    let repo_tag = repo_tag.unwrap_or_else(|| {
        warn!(
            "{} element not found in gate output, using {}",
            REPO_TAG_COLUMN, image_key
        );
        image_key.to_string()
    });

    let final_action = final_action.unwrap_or_else(|| {
        let action = if stop > 0 {
            "STOP"
        } else if warn > 0 {
            "WARN"
        } else {
            "GO"
        };
        action.to_string()
    });

    debug!(
        "Gate summary for {} - stop: {}, warn: {}, go: {}, final: {}",
        repo_tag, stop, warn, go, final_action
    );

    ImageSummary {
        repo_tag,
        stop,
        warn,
        go,
        final_action,
    }
}
