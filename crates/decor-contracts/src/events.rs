use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

pub type EventPayload = Map<String, Value>;

/// Milestones of one design run, in the order a successful run emits them.
/// `Failed` replaces everything after the stage that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DesignEvent {
    ModelSelected,
    Started,
    ImageGenerated,
    FurnitureExtracted,
    Failed,
    Finished,
}

impl DesignEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ModelSelected => "model_selected",
            Self::Started => "design_started",
            Self::ImageGenerated => "image_generated",
            Self::FurnitureExtracted => "furniture_extracted",
            Self::Failed => "design_failed",
            Self::Finished => "design_finished",
        }
    }
}

impl fmt::Display for DesignEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Appends one compact JSON object per line to a run's `events.jsonl`.
///
/// Every record carries `type`, `run_id` and `ts`. Payload keys are merged
/// after them and win on collision.
#[derive(Debug, Clone)]
pub struct EventWriter {
    log: Arc<RunLog>,
}

#[derive(Debug)]
struct RunLog {
    path: PathBuf,
    run_id: String,
    append: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            log: Arc::new(RunLog {
                path: path.into(),
                run_id: run_id.into(),
                append: Mutex::new(()),
            }),
        }
    }

    pub fn for_new_run(path: impl Into<PathBuf>) -> Self {
        Self::new(path, new_run_id())
    }

    pub fn path(&self) -> &Path {
        &self.log.path
    }

    pub fn run_id(&self) -> &str {
        &self.log.run_id
    }

    pub fn emit(&self, event: DesignEvent, payload: EventPayload) -> anyhow::Result<Value> {
        let mut record = Map::new();
        record.insert("type".to_string(), Value::from(event.as_str()));
        record.insert("run_id".to_string(), Value::from(self.run_id()));
        record.insert("ts".to_string(), Value::from(timestamp()));
        record.extend(payload);

        let line = serde_json::to_string(&record)?;
        if let Some(dir) = self.log.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let _guard = self
            .log
            .append
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log.path)?;
        writeln!(file, "{line}")?;
        Ok(Value::Object(record))
    }
}

pub fn new_run_id() -> String {
    Uuid::new_v4().to_string()
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
