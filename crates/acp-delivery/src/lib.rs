// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! acp-delivery
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the raw-job snapshot written into every job directory.
pub const JOB_SNAPSHOT_FILE: &str = "JOB_SNAPSHOT.json";
/// File name of the intake artifact on the needs-info path.
pub const INTAKE_FILE: &str = "INTAKE_REQUEST.md";
/// File name of the report artifact on the delivered path.
pub const REPORT_FILE: &str = "REPORT.md";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Filesystem failures while producing deliverable artifacts.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// A directory could not be created.
    #[error("failed to create directory {path}")]
    CreateDir {
        /// Directory that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An artifact could not be written.
    #[error("failed to write artifact {path}")]
    WriteFile {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A value could not be serialized to JSON.
    #[error("failed to serialize artifact {name}")]
    Serialize {
        /// Artifact file name.
        name: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

// ---------------------------------------------------------------------------
// Delivery root
// ---------------------------------------------------------------------------

/// Resolved delivery root and per-job directory, both absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDirs {
    /// Root directory for all deliverables.
    pub delivery_root: PathBuf,
    /// `<delivery_root>/<job id>`.
    pub job_dir: PathBuf,
}

/// Resolve the delivery root from the environment and current directory.
///
/// `ACP_DELIVERY_ROOT` wins when set; otherwise see
/// [`default_delivery_root`].
#[must_use]
pub fn resolve_delivery_root() -> PathBuf {
    if let Some(root) = std::env::var("ACP_DELIVERY_ROOT")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
    {
        return PathBuf::from(root);
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    default_delivery_root(&cwd)
}

/// The workspace-aware default delivery root for a given working directory.
///
/// When the process runs from a `skills/<name>` layout the root is
/// `<workspace>/deliverables/acp-delivery`, where `<workspace>` is the
/// directory containing `skills/`. Otherwise it is
/// `<repo root>/deliverables/acp-delivery`, repo root being the nearest
/// ancestor holding a `.git` entry (falling back to the working directory).
#[must_use]
pub fn default_delivery_root(cwd: &Path) -> PathBuf {
    for ancestor in cwd.ancestors() {
        if let Some(parent) = ancestor.parent() {
            if parent.file_name().is_some_and(|n| n == "skills") {
                if let Some(workspace) = parent.parent() {
                    return workspace.join("deliverables").join("acp-delivery");
                }
            }
        }
    }
    for ancestor in cwd.ancestors() {
        if ancestor.join(".git").exists() {
            return ancestor.join("deliverables").join("acp-delivery");
        }
    }
    cwd.join("deliverables").join("acp-delivery")
}

/// Create (recursively) and return the delivery root and job directory for a
/// job id.
pub fn ensure_job_dir(delivery_root: &Path, job_id: u64) -> Result<JobDirs, DeliveryError> {
    let job_dir = delivery_root.join(job_id.to_string());
    fs::create_dir_all(&job_dir).map_err(|source| DeliveryError::CreateDir {
        path: job_dir.clone(),
        source,
    })?;
    let delivery_root = absolutize(delivery_root);
    let job_dir = absolutize(&job_dir);
    Ok(JobDirs {
        delivery_root,
        job_dir,
    })
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        match path.canonicalize() {
            Ok(p) => p,
            Err(_) => std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf()),
        }
    }
}

// ---------------------------------------------------------------------------
// Artifact writers
// ---------------------------------------------------------------------------

/// Write a text artifact with an enforced trailing newline.
///
/// The write is atomic: content lands in a sibling temp file which is then
/// renamed over the target. Returns the absolute artifact path.
pub fn write_text_file(dir: &Path, name: &str, content: &str) -> Result<PathBuf, DeliveryError> {
    let mut body = content.to_string();
    if !body.ends_with('\n') {
        body.push('\n');
    }
    write_atomic(dir, name, body.as_bytes())
}

/// Write a pretty-printed JSON artifact. Returns the absolute artifact path.
pub fn write_json_file<T: Serialize>(
    dir: &Path,
    name: &str,
    value: &T,
) -> Result<PathBuf, DeliveryError> {
    let mut body =
        serde_json::to_string_pretty(value).map_err(|source| DeliveryError::Serialize {
            name: name.to_string(),
            source,
        })?;
    body.push('\n');
    write_atomic(dir, name, body.as_bytes())
}

/// Write the raw-job snapshot (`JOB_SNAPSHOT.json`) for a job directory.
pub fn write_job_snapshot(dir: &Path, job: &Value) -> Result<PathBuf, DeliveryError> {
    write_json_file(dir, JOB_SNAPSHOT_FILE, job)
}

fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf, DeliveryError> {
    let target = dir.join(name);
    let tmp = dir.join(format!(".{name}.tmp"));
    let write = fs::write(&tmp, bytes).and_then(|()| fs::rename(&tmp, &target));
    match write {
        Ok(()) => Ok(absolutize(&target)),
        Err(source) => {
            let _ = fs::remove_file(&tmp);
            Err(DeliveryError::WriteFile {
                path: target,
                source,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Requirement checks
// ---------------------------------------------------------------------------

/// The subset of `keys` that is missing from `req`.
///
/// A key counts as missing when it is absent, `null`, or a whitespace-only
/// string.
#[must_use]
pub fn missing_required_fields(req: &Map<String, Value>, keys: &[&str]) -> Vec<String> {
    keys.iter()
        .filter(|key| match req.get(**key) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        })
        .map(|k| (*k).to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// Structured deliverable values
// ---------------------------------------------------------------------------

/// A reference to a written artifact, carried inside deliverable values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FileRef {
    /// Bare file name.
    pub filename: String,
    /// Absolute path on the seller host.
    pub path: String,
    /// `file://`-scheme URL for the path.
    pub uri: String,
}

/// Build a [`FileRef`] for a written artifact path.
#[must_use]
pub fn file_ref(path: &Path) -> FileRef {
    let path = absolutize(path);
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let path_str = path.to_string_lossy().into_owned();
    FileRef {
        filename,
        uri: format!("file://{path_str}"),
        path: path_str,
    }
}

/// Build the structured needs-info deliverable value.
///
/// Signals that the buyer must supply `missing_fields` before execution can
/// proceed; `intake` points at the on-disk intake artifact.
#[must_use]
pub fn needs_info_value(
    job_id: u64,
    offering: &str,
    dirs: &JobDirs,
    missing_fields: &[String],
    intake: &FileRef,
    files: &[FileRef],
) -> Value {
    json!({
        "status": "needs_info",
        "jobId": job_id,
        "offering": offering,
        "localPath": dirs.job_dir.to_string_lossy(),
        "missingFields": missing_fields,
        "filesWritten": files.iter().map(|f| f.filename.clone()).collect::<Vec<_>>(),
        "fileRefs": files,
        "intakeFile": intake.filename,
        "intakePath": intake.path,
        "intakeUri": intake.uri,
    })
}

/// Build the structured written deliverable value.
///
/// `report` points at the primary on-disk report artifact.
#[must_use]
pub fn written_value(
    job_id: u64,
    offering: &str,
    dirs: &JobDirs,
    report: &FileRef,
    files: &[FileRef],
) -> Value {
    json!({
        "status": "written",
        "jobId": job_id,
        "offering": offering,
        "localPath": dirs.job_dir.to_string_lossy(),
        "filesWritten": files.iter().map(|f| f.filename.clone()).collect::<Vec<_>>(),
        "fileRefs": files,
        "reportFile": report.filename,
        "reportPath": report.path,
        "reportUri": report.uri,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ensure_job_dir_creates_nested_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("deep/delivery");
        let dirs = ensure_job_dir(&root, 42).unwrap();
        assert!(dirs.job_dir.is_dir());
        assert!(dirs.job_dir.ends_with("42"));
        assert!(dirs.delivery_root.is_absolute());
        assert!(dirs.job_dir.is_absolute());
        // Second call is idempotent.
        assert_eq!(ensure_job_dir(&root, 42).unwrap(), dirs);
    }

    #[test]
    fn text_files_gain_trailing_newline() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_text_file(tmp.path(), "REPORT.md", "# Report").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "# Report\n");
        // Already-terminated content is untouched.
        let path = write_text_file(tmp.path(), "NOTE.md", "done\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "done\n");
    }

    #[test]
    fn json_files_are_pretty_with_newline() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_json_file(tmp.path(), "data.json", &json!({"a": 1})).unwrap();
        let body = fs::read_to_string(&path).unwrap();
        assert!(body.ends_with('\n'));
        assert!(body.contains("\n  \"a\": 1\n"));
        let parsed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed, json!({"a": 1}));
    }

    #[test]
    fn snapshot_uses_fixed_name() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_job_snapshot(tmp.path(), &json!({"id": 7})).unwrap();
        assert!(path.ends_with(JOB_SNAPSHOT_FILE));
    }

    #[test]
    fn atomic_writes_leave_no_temp_files() {
        let tmp = tempfile::tempdir().unwrap();
        write_text_file(tmp.path(), "a.md", "x").unwrap();
        let names: Vec<String> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.md"]);
    }

    #[test]
    fn missing_fields_detection() {
        let req = json!({
            "present": "value",
            "blank": "   ",
            "null": null,
            "zero": 0,
        });
        let req = req.as_object().unwrap();
        let missing = missing_required_fields(req, &["present", "blank", "null", "zero", "absent"]);
        assert_eq!(missing, vec!["blank", "null", "absent"]);
    }

    #[test]
    fn file_refs_carry_file_uris() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_text_file(tmp.path(), "REPORT.md", "r").unwrap();
        let r = file_ref(&path);
        assert_eq!(r.filename, "REPORT.md");
        assert!(r.uri.starts_with("file:///"));
        assert!(r.uri.ends_with("/REPORT.md"));
        assert_eq!(r.uri, format!("file://{}", r.path));
    }

    #[test]
    fn needs_info_value_shape() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = ensure_job_dir(tmp.path(), 9).unwrap();
        let intake_path = write_text_file(&dirs.job_dir, INTAKE_FILE, "please fill in").unwrap();
        let intake = file_ref(&intake_path);
        let v = needs_info_value(9, "svc", &dirs, &["apiDescription".into()], &intake, &[intake.clone()]);
        assert_eq!(v["status"], "needs_info");
        assert_eq!(v["jobId"], 9);
        assert_eq!(v["offering"], "svc");
        assert_eq!(v["missingFields"], json!(["apiDescription"]));
        assert_eq!(v["filesWritten"], json!([INTAKE_FILE]));
        assert_eq!(v["intakeFile"], INTAKE_FILE);
        assert!(v["intakeUri"].as_str().unwrap().starts_with("file://"));
        assert_eq!(v["fileRefs"][0]["filename"], INTAKE_FILE);
    }

    #[test]
    fn written_value_shape() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = ensure_job_dir(tmp.path(), 10).unwrap();
        let report_path = write_text_file(&dirs.job_dir, REPORT_FILE, "# done").unwrap();
        let report = file_ref(&report_path);
        let v = written_value(10, "svc", &dirs, &report, &[report.clone()]);
        assert_eq!(v["status"], "written");
        assert_eq!(v["reportFile"], REPORT_FILE);
        assert!(v["reportUri"].as_str().unwrap().ends_with("REPORT.md"));
        assert_eq!(v["localPath"], dirs.job_dir.to_string_lossy().to_string());
    }

    #[test]
    fn default_root_prefers_skills_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        let skill_dir = tmp.path().join("skills/report-writer/src");
        fs::create_dir_all(&skill_dir).unwrap();
        let root = default_delivery_root(&skill_dir);
        assert_eq!(root, tmp.path().join("deliverables/acp-delivery"));
    }

    #[test]
    fn default_root_falls_back_to_repo_root() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("src/bin");
        fs::create_dir_all(&nested).unwrap();
        fs::create_dir_all(tmp.path().join(".git")).unwrap();
        let root = default_delivery_root(&nested);
        assert_eq!(root, tmp.path().join("deliverables/acp-delivery"));
    }

    #[test]
    fn default_root_last_resort_is_cwd() {
        let tmp = tempfile::tempdir().unwrap();
        let root = default_delivery_root(tmp.path());
        assert_eq!(root, tmp.path().join("deliverables/acp-delivery"));
    }

    #[test]
    #[serial_test::serial]
    #[allow(unsafe_code)]
    fn env_override_wins() {
        // Env mutation is unsafe in edition 2024; serialized and restored.
        unsafe {
            std::env::set_var("ACP_DELIVERY_ROOT", "/tmp/acp-root-override");
        }
        assert_eq!(resolve_delivery_root(), PathBuf::from("/tmp/acp-root-override"));
        unsafe {
            std::env::remove_var("ACP_DELIVERY_ROOT");
        }
    }
}
