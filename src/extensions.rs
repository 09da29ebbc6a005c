//! Compiled-in metric providers chosen by name in the config file.
//!
//! Each started extension is one more independently fallible probe: its
//! reading lands under `extensions.<name>` in the snapshot, its failure is
//! tagged the same way.

use crate::collectors::{log_failure, sysfs, ProbeError};
use crate::snapshot::FieldFailure;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use sysinfo::{System, SystemExt};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub const BUILTIN_NAMES: [&str; 2] = ["loadavg", "processes"];

#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("extension {name} failed to initialize: {source}")]
    Init { name: String, source: ProbeError },
    #[error("extension {name} failed to start: {source}")]
    Start { name: String, source: ProbeError },
    #[error("extension {name} failed to stop: {source}")]
    Stop { name: String, source: ProbeError },
    #[error("unknown extension {0}")]
    UnknownName(String),
    #[error("extension {0} is already registered")]
    Duplicate(String),
}

pub trait Extension: Send + Sync {
    fn name(&self) -> &str;
    fn init(&mut self) -> Result<(), ProbeError>;
    fn start(&mut self) -> Result<(), ProbeError> {
        Ok(())
    }
    fn stop(&mut self) -> Result<(), ProbeError> {
        Ok(())
    }
    fn collect(&self) -> Result<Value, ProbeError>;
}

struct Registered {
    extension: Box<dyn Extension>,
    running: bool,
}

#[derive(Default)]
pub struct ExtensionRegistry {
    entries: RwLock<Vec<Registered>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `init` and keeps the extension only if it succeeds.
    pub async fn register(&self, mut extension: Box<dyn Extension>) -> Result<(), ExtensionError> {
        let name = extension.name().to_string();
        let mut entries = self.entries.write().await;
        if entries.iter().any(|e| e.extension.name() == name) {
            return Err(ExtensionError::Duplicate(name));
        }
        extension
            .init()
            .map_err(|source| ExtensionError::Init {
                name: name.clone(),
                source,
            })?;
        entries.push(Registered {
            extension,
            running: false,
        });
        info!(extension = %name, "extension registered");
        Ok(())
    }

    /// Starts every registered extension; one failing does not keep the others down.
    pub async fn start_all(&self) -> Result<(), ExtensionError> {
        let mut first_error = None;
        for entry in self.entries.write().await.iter_mut() {
            if entry.running {
                continue;
            }
            let name = entry.extension.name().to_string();
            match entry.extension.start() {
                Ok(()) => {
                    entry.running = true;
                    info!(extension = %name, "extension started");
                }
                Err(source) => {
                    let err = ExtensionError::Start { name, source };
                    warn!(error = %err, "extension start failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub async fn stop_all(&self) -> Result<(), ExtensionError> {
        let mut first_error = None;
        for entry in self.entries.write().await.iter_mut() {
            if !entry.running {
                continue;
            }
            entry.running = false;
            let name = entry.extension.name().to_string();
            match entry.extension.stop() {
                Ok(()) => info!(extension = %name, "extension stopped"),
                Err(source) => {
                    let err = ExtensionError::Stop { name, source };
                    warn!(error = %err, "extension stop failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Readings of every running extension, keyed by name.
    pub async fn collect(&self) -> (BTreeMap<String, Value>, Vec<FieldFailure>) {
        let mut readings = BTreeMap::new();
        let mut failures = Vec::new();
        for entry in self.entries.read().await.iter().filter(|e| e.running) {
            let name = entry.extension.name();
            match entry.extension.collect() {
                Ok(value) => {
                    readings.insert(name.to_string(), value);
                }
                Err(err) => {
                    let tag = format!("extensions.{name}");
                    log_failure(&[tag.as_str()], &err);
                    failures.push(FieldFailure::new([tag], err.to_string()));
                }
            }
        }
        (readings, failures)
    }

    pub async fn running(&self) -> Vec<String> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.running)
            .map(|e| e.extension.name().to_string())
            .collect()
    }
}

pub fn builtin(name: &str) -> Result<Box<dyn Extension>, ExtensionError> {
    match name {
        "loadavg" => Ok(Box::new(LoadAverageExtension)),
        "processes" => Ok(Box::new(ProcessCountExtension::default())),
        other => Err(ExtensionError::UnknownName(other.to_string())),
    }
}

/// 1, 5 and 15 minute run-queue averages from `/proc/loadavg`.
pub struct LoadAverageExtension;

impl Extension for LoadAverageExtension {
    fn name(&self) -> &str {
        "loadavg"
    }

    fn init(&mut self) -> Result<(), ProbeError> {
        sysfs::read_loadavg().map(|_| ())
    }

    fn collect(&self) -> Result<Value, ProbeError> {
        let load = sysfs::read_loadavg()?;
        Ok(json!({
            "one": load.one,
            "five": load.five,
            "fifteen": load.fifteen,
        }))
    }
}

#[derive(Default)]
pub struct ProcessCountExtension {
    system: Mutex<System>,
}

impl Extension for ProcessCountExtension {
    fn name(&self) -> &str {
        "processes"
    }

    fn init(&mut self) -> Result<(), ProbeError> {
        self.collect().map(|_| ())
    }

    fn collect(&self) -> Result<Value, ProbeError> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes();
        match system.processes().len() {
            0 => Err(ProbeError::unavailable("process table")),
            count => Ok(json!({ "count": count })),
        }
    }
}
