//! CSV task source.
//!
//! Header names are matched after trimming and lower-casing. Rows without a
//! usable URL are dropped before they reach the core.

use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::types::{RunMode, Task, parse_switch};

pub const REQUIRED_COLUMNS: [&str; 3] = ["url", "userid", "password"];
const STATE_COLUMNS: [&str; 3] = ["state", "desired_state", "toggle"];
const EMPTY_MARKERS: [&str; 3] = ["", "nan", "none"];

#[derive(Debug, Error)]
pub enum TaskSourceError {
    #[error("failed to open task file {path}: {source}")]
    Open { path: PathBuf, source: csv::Error },

    #[error("failed to read tasks: {0}")]
    Csv(#[from] csv::Error),

    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
}

pub fn load_tasks(path: &Path, mode: RunMode) -> Result<Vec<Task>, TaskSourceError> {
    info!("Loading task file: {}", path.display());
    let reader = builder().from_path(path).map_err(|source| TaskSourceError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let tasks = collect(reader, mode)?;
    info!("Loaded {} tasks", tasks.len());
    Ok(tasks)
}

pub fn read_tasks<R: Read>(input: R, mode: RunMode) -> Result<Vec<Task>, TaskSourceError> {
    collect(builder().from_reader(input), mode)
}

fn builder() -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder.trim(csv::Trim::All).flexible(true);
    builder
}

fn collect<R: Read>(mut reader: csv::Reader<R>, mode: RunMode) -> Result<Vec<Task>, TaskSourceError> {
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();
    let column = |name: &str| headers.iter().position(|h| h == name);

    let (Some(url_col), Some(user_col), Some(pass_col)) =
        (column("url"), column("userid"), column("password"))
    else {
        let missing = REQUIRED_COLUMNS
            .iter()
            .filter(|name| column(name).is_none())
            .map(|name| name.to_string())
            .collect();
        return Err(TaskSourceError::MissingColumns(missing));
    };
    let state_col = STATE_COLUMNS.iter().find_map(|name| column(name));

    let mut tasks = Vec::new();
    for row in reader.records() {
        let row = row?;
        let field = |idx: usize| row.get(idx).unwrap_or("").trim();

        let url = field(url_col);
        if EMPTY_MARKERS.contains(&url.to_lowercase().as_str()) {
            continue;
        }

        let mut task = Task::new(url, field(user_col), field(pass_col))
            .with_desired_state(mode.desired_state());

        if let (RunMode::Enforce { .. }, Some(idx)) = (mode, state_col) {
            let raw = field(idx);
            if !raw.is_empty() {
                match parse_switch(raw) {
                    Some(desired) => task = task.with_desired_state(Some(desired)),
                    None => {
                        task = task.skipped(format!(
                            "Invalid toggle value: {}. Expected ON or OFF.",
                            raw
                        ))
                    }
                }
            }
        }

        tasks.push(task);
    }
    Ok(tasks)
}
