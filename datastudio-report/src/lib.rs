//!
//! # Datastudio Report
//!
//! Report-writing listener for the datastudio research engine: when a
//! research finishes, its nested result is walked depth-first and every
//! leaf frame is written to a CSV file on a background thread, so report
//! persistence never blocks the research request path.
//!
//! File names come from a per-research template with `{research}`,
//! `{date}` and level-name placeholders, each level name bound to the
//! group key at that depth of the research tree.
extern crate serde;
#[macro_use]
extern crate serde_derive;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use chrono::Local;
use polars::prelude::*;
use regex::Regex;
use tracing::{debug, error, warn};

use datastudio_core::error::Error;
use datastudio_core::research::{Attrs, ResearchNode};
use datastudio_core::studio::{ResearchListener, Studio};

/// Granularity of the mutual exclusion around report writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum WriterLock {
    /// One shared critical section across all report files.
    Global,
    /// One critical section per target file path.
    PerFile,
}

/// How a single research is written out.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfiguration {
    /// Master switch; a research with `save: false` is ignored.
    #[serde(default = "default_save")]
    pub save: bool,
    /// Filename template with `{research}`, `{date}` and level-name
    /// placeholders.
    pub file: String,
    /// Column subset of each leaf frame. Missing columns are warnings.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    /// Placeholder name per nesting level, 1-based from the stored root.
    #[serde(default)]
    pub levels: HashMap<usize, String>,
    /// Regex per level; group keys not matching are skipped entirely.
    #[serde(default, rename = "level filters")]
    pub level_filters: HashMap<usize, String>,
}

fn default_save() -> bool {
    true
}

impl ReportConfiguration {
    pub fn new(file: impl Into<String>) -> Self {
        ReportConfiguration {
            save: true,
            file: file.into(),
            columns: None,
            levels: HashMap::new(),
            level_filters: HashMap::new(),
        }
    }

    pub fn with_save(mut self, save: bool) -> Self {
        self.save = save;
        self
    }

    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = Some(columns);
        self
    }

    pub fn with_level(mut self, level: usize, name: impl Into<String>) -> Self {
        self.levels.insert(level, name.into());
        self
    }

    pub fn with_level_filter(mut self, level: usize, pattern: impl Into<String>) -> Self {
        self.level_filters.insert(level, pattern.into());
        self
    }

    fn level_name(&self, level: usize) -> String {
        self.levels
            .get(&level)
            .cloned()
            .unwrap_or_else(|| format!("level{}", level))
    }
}

struct WriterLocks {
    global: Mutex<()>,
    per_file: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl WriterLocks {
    fn new() -> Self {
        WriterLocks {
            global: Mutex::new(()),
            per_file: Mutex::new(HashMap::new()),
        }
    }

    fn file_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        self.per_file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(path.to_path_buf())
            .or_default()
            .clone()
    }
}

/// Listener writing finished researches to CSV files in the background.
pub struct CsvReportEditor {
    directory: PathBuf,
    configurations: HashMap<String, ReportConfiguration>,
    lock_mode: WriterLock,
    locks: Arc<WriterLocks>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl CsvReportEditor {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        CsvReportEditor {
            directory: directory.into(),
            configurations: HashMap::new(),
            lock_mode: WriterLock::Global,
            locks: Arc::new(WriterLocks::new()),
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn with_configuration(
        mut self,
        research_name: impl Into<String>,
        configuration: ReportConfiguration,
    ) -> Self {
        self.configurations
            .insert(research_name.into(), configuration);
        self
    }

    pub fn with_writer_lock(mut self, lock_mode: WriterLock) -> Self {
        self.lock_mode = lock_mode;
        self
    }

    /// Joins all outstanding save threads. Call before shutdown, or in
    /// tests, to make sure every report reached the disk.
    pub fn wait(&self) {
        let handles: Vec<JoinHandle<()>> = self
            .threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            if handle.join().is_err() {
                error!("report save thread panicked");
            }
        }
    }
}

impl ResearchListener for CsvReportEditor {
    fn research_finished(&self, studio: &Studio, name: &str, _attrs: &Attrs) -> Result<(), Error> {
        let configuration = match self.configurations.get(name) {
            Some(configuration) if configuration.save => configuration.clone(),
            Some(_) => {
                debug!(research = %name, "report disabled by configuration");
                return Ok(());
            }
            None => {
                debug!(research = %name, "no report configuration");
                return Ok(());
            }
        };
        let research = match studio.knowledge(name) {
            Some(research) => research,
            None => {
                warn!(research = %name, "research missing from studio knowledge, report skipped");
                return Ok(());
            }
        };
        let job = SaveJob {
            directory: self.directory.clone(),
            research_name: name.to_string(),
            configuration,
            research,
            lock_mode: self.lock_mode,
            locks: self.locks.clone(),
        };
        let handle = std::thread::spawn(move || {
            if let Err(e) = job.run() {
                error!(research = %job.research_name, "report save failed: {}", e);
            }
        });
        self.threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
        Ok(())
    }
}

struct SaveJob {
    directory: PathBuf,
    research_name: String,
    configuration: ReportConfiguration,
    research: ResearchNode,
    lock_mode: WriterLock,
    locks: Arc<WriterLocks>,
}

impl SaveJob {
    fn run(&self) -> Result<(), Error> {
        let mut filters: HashMap<usize, Regex> = HashMap::new();
        for (level, pattern) in &self.configuration.level_filters {
            let regex = Regex::new(pattern).map_err(|e| {
                Error::general_error(format!("Invalid level filter '{}': {}", pattern, e))
            })?;
            filters.insert(*level, regex);
        }
        let mut bindings = vec![
            ("research".to_string(), self.research_name.clone()),
            ("date".to_string(), Local::now().format("%d_%m_%Y").to_string()),
        ];
        self.walk(&self.research, 1, &filters, &mut bindings)
    }

    fn walk(
        &self,
        node: &ResearchNode,
        level: usize,
        filters: &HashMap<usize, Regex>,
        bindings: &mut Vec<(String, String)>,
    ) -> Result<(), Error> {
        match node {
            ResearchNode::Frame(frame) => self.write_frame(frame, bindings),
            ResearchNode::Group(entries) => {
                for (key, child) in entries {
                    if let Some(filter) = filters.get(&level) {
                        if !filter.is_match(key) {
                            debug!(key = %key, level = level, "key skipped by level filter");
                            continue;
                        }
                    }
                    bindings.push((self.configuration.level_name(level), key.clone()));
                    self.walk(child, level + 1, filters, bindings)?;
                    bindings.pop();
                }
                Ok(())
            }
        }
    }

    fn write_frame(&self, frame: &DataFrame, bindings: &[(String, String)]) -> Result<(), Error> {
        if frame.height() == 0 {
            debug!(research = %self.research_name, "empty frame, report skipped");
            return Ok(());
        }
        let mut frame = frame.clone();
        if let Some(columns) = &self.configuration.columns {
            let mut existing = Vec::with_capacity(columns.len());
            for column in columns {
                if frame
                    .get_column_names()
                    .iter()
                    .any(|name| name.as_str() == column.as_str())
                {
                    existing.push(column.clone());
                } else {
                    warn!(
                        research = %self.research_name,
                        column = %column,
                        "configured report column not in research"
                    );
                }
            }
            if !existing.is_empty() {
                frame = frame
                    .select(existing)
                    .map_err(|e| Error::general_error(format!("Column subset failed: {}", e)))?;
            }
        }
        let file_name = format_template(&self.configuration.file, bindings);
        let path = self.directory.join(file_name);
        match self.lock_mode {
            WriterLock::Global => {
                let _guard = self
                    .locks
                    .global
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                write_csv(&path, &mut frame)
            }
            WriterLock::PerFile => {
                let lock = self.locks.file_lock(&path);
                let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
                write_csv(&path, &mut frame)
            }
        }
    }
}

fn write_csv(path: &Path, frame: &mut DataFrame) -> Result<(), Error> {
    let file = std::fs::File::create(path).map_err(|e| Error::report_write(path, e))?;
    CsvWriter::new(file)
        .finish(frame)
        .map_err(|e| Error::report_write(path, e))?;
    debug!(path = %path.display(), rows = frame.height(), "report written");
    Ok(())
}

/// Substitutes `{key}` placeholders; unknown placeholders stay verbatim.
fn format_template(template: &str, bindings: &[(String, String)]) -> String {
    let mut result = template.to_string();
    for (key, value) in bindings {
        result = result.replace(&format!("{{{}}}", key), value);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_template() {
        let bindings = vec![
            ("research".to_string(), "summary".to_string()),
            ("goal".to_string(), "g1".to_string()),
        ];
        assert_eq!(
            format_template("{research}_{goal}.csv", &bindings),
            "summary_g1.csv"
        );
        assert_eq!(
            format_template("{research}_{unknown}.csv", &bindings),
            "summary_{unknown}.csv"
        );
    }

    #[test]
    fn test_level_name_defaults() {
        let configuration = ReportConfiguration::new("{research}.csv").with_level(1, "goal");
        assert_eq!(configuration.level_name(1), "goal");
        assert_eq!(configuration.level_name(2), "level2");
    }
}
