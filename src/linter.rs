//! Schema linting - static analysis of schema source files.
//!
//! Validates source files for:
//! - JSON syntax and source shape errors
//! - Schema defects (unknown references, cycles, unreachable variants, ...)
//! - Suspicious but legal declarations (unused properties, empty enums, ...)

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::loader::load_source;
use crate::registry::{Channel, FieldRegistry, SchemaSource};
use crate::types::{FieldKind, OPERATION_FIELD, RESOURCE_FIELD};

/// Severity level for diagnostics, least severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// Diagnostic codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum LintCode {
    /// File cannot be read or is not a schema source.
    E001,
    /// Source is well-formed but the registry rejects it.
    E002,
    /// Property belongs to no operation.
    W001,
    /// Enum with neither options nor loadOptions.
    W002,
    /// Required field that also declares a default.
    W003,
    /// Path field the operation URL never uses.
    W004,
}

impl LintCode {
    pub fn severity(self) -> Severity {
        match self {
            Self::E001 | Self::E002 => Severity::Error,
            Self::W001 | Self::W002 | Self::W003 | Self::W004 => Severity::Warning,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001 => "E001",
            Self::E002 => "E002",
            Self::W001 => "W001",
            Self::W002 => "W002",
            Self::W003 => "W003",
            Self::W004 => "W004",
        }
    }
}

impl fmt::Display for LintCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single diagnostic message from linting.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: LintCode,
    pub file: PathBuf,
    /// JSON pointer into the source (e.g., "/properties/4")
    pub path: String,
    /// `resource/operation` the problem is specific to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    pub message: String,
}

/// Result of linting a single file.
#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub file: PathBuf,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

impl FileResult {
    /// Whether this file fails the run. Strict runs fail on warnings too.
    pub fn fails(&self, strict: bool) -> bool {
        match self.status {
            FileStatus::Ok => false,
            FileStatus::Warning => strict,
            FileStatus::Error => true,
        }
    }
}

/// Status of a linted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Ok,
    Error,
    Warning,
}

/// Result of linting a directory or set of files.
#[derive(Debug, Clone, Serialize)]
pub struct LintResult {
    pub path: PathBuf,
    pub strict: bool,
    pub files_checked: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub warnings: usize,
    /// Number of diagnostics per code, across all files.
    pub counts: BTreeMap<LintCode, usize>,
    pub results: Vec<FileResult>,
}

impl LintResult {
    /// True when no file failed at this run's strictness.
    pub fn is_ok(&self) -> bool {
        self.failed == 0
    }
}

/// Lint a file or directory.
///
/// Directories are searched for `.json` files, skipping hidden directories.
/// With `strict`, files with warnings fail as well.
pub fn lint(path: &Path, strict: bool) -> LintResult {
    let results: Vec<FileResult> = collect_source_files(path)
        .iter()
        .map(|file| lint_file(file, path))
        .collect();

    let mut counts: BTreeMap<LintCode, usize> = BTreeMap::new();
    for diagnostic in results.iter().flat_map(|r| &r.diagnostics) {
        *counts.entry(diagnostic.code).or_insert(0) += 1;
    }
    let total = |severity: Severity| -> usize {
        counts
            .iter()
            .filter(|(code, _)| code.severity() == severity)
            .map(|(_, n)| n)
            .sum()
    };
    let errors = total(Severity::Error);
    let warnings = total(Severity::Warning);
    let failed = results.iter().filter(|r| r.fails(strict)).count();

    LintResult {
        path: path.to_path_buf(),
        strict,
        files_checked: results.len(),
        passed: results.len() - failed,
        failed,
        errors,
        warnings,
        counts,
        results,
    }
}

/// Diagnostics collected for one file.
struct Findings<'a> {
    file: &'a Path,
    diagnostics: Vec<Diagnostic>,
}

impl Findings<'_> {
    fn report(
        &mut self,
        code: LintCode,
        path: String,
        operation: Option<String>,
        message: String,
    ) {
        self.diagnostics.push(Diagnostic {
            severity: code.severity(),
            code,
            file: self.file.to_path_buf(),
            path,
            operation,
            message,
        });
    }
}

/// Lint a single schema source file.
pub fn lint_file(file: &Path, base_path: &Path) -> FileResult {
    let mut findings = Findings {
        file,
        diagnostics: Vec::new(),
    };

    match load_source(file) {
        Err(e) => findings.report(LintCode::E001, "/".into(), None, format!("load error: {}", e)),
        Ok(source) => {
            check_properties(&source, &mut findings);
            match FieldRegistry::from_source(&source) {
                Ok(registry) => check_usage(&source, &registry, &mut findings),
                Err(e) => findings.report(
                    LintCode::E002,
                    "/".into(),
                    None,
                    format!("schema error: {}", e),
                ),
            }
        }
    }

    let status = match findings.diagnostics.iter().map(|d| d.severity).max() {
        Some(Severity::Error) => FileStatus::Error,
        Some(Severity::Warning) => FileStatus::Warning,
        None => FileStatus::Ok,
    };

    FileResult {
        file: file.strip_prefix(base_path).unwrap_or(file).to_path_buf(),
        status,
        diagnostics: findings.diagnostics,
    }
}

/// Per-property checks that need no registry.
fn check_properties(source: &SchemaSource, findings: &mut Findings<'_>) {
    for (i, property) in source.properties.iter().enumerate() {
        let path = format!("/properties/{}", i);

        if property.kind == FieldKind::Enum
            && property.options.is_empty()
            && property.type_options.load_options.is_none()
        {
            findings.report(
                LintCode::W002,
                path.clone(),
                None,
                format!("enum '{}' has neither options nor loadOptions", property.name),
            );
        }

        if property.required && property.default.is_some() {
            findings.report(
                LintCode::W003,
                path,
                None,
                format!("required field '{}' also declares a default", property.name),
            );
        }
    }
}

/// Checks against the built registry.
fn check_usage(source: &SchemaSource, registry: &FieldRegistry, findings: &mut Findings<'_>) {
    let used: BTreeSet<&str> = registry
        .operations()
        .flat_map(|op| op.fields.iter().map(|f| f.id.as_str()))
        .collect();

    for (i, property) in source.properties.iter().enumerate() {
        if property.name == RESOURCE_FIELD || property.name == OPERATION_FIELD {
            continue;
        }
        if !used.contains(property.name.as_str()) {
            findings.report(
                LintCode::W001,
                format!("/properties/{}", i),
                None,
                format!("property '{}' is not part of any operation", property.name),
            );
        }
    }

    for operation in registry.operations() {
        let placeholders: BTreeSet<&str> = operation.url.placeholders().collect();
        let unused = operation
            .fields
            .iter()
            .filter(|f| f.channel == Channel::Path && !placeholders.contains(f.id.as_str()));
        for field in unused {
            let index = source
                .properties
                .iter()
                .position(|p| p.name == field.id)
                .unwrap_or(0);
            findings.report(
                LintCode::W004,
                format!("/properties/{}", index),
                Some(operation.qualified_name()),
                format!("path field '{}' is not used in the URL", field.id),
            );
        }
    }
}

/// All `.json` files at `path`, sorted.
fn collect_source_files(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        return if is_json(path) {
            vec![path.to_path_buf()]
        } else {
            Vec::new()
        };
    }

    let mut files = Vec::new();
    let mut pending = vec![path.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let entry_path = entry.path();
            if entry_path.is_dir() {
                if !is_hidden(&entry_path) {
                    pending.push(entry_path);
                }
            } else if is_json(&entry_path) {
                files.push(entry_path);
            }
        }
    }
    files.sort();
    files
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "json")
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}
