//! Where rendered artifacts go, and what they are called.

use std::io;
use std::path::Path;

use async_trait::async_trait;
use log::debug;
use quire_source::Record;
use serde_json::Value;

/// Persists finished artifacts.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn persist(&self, bytes: &[u8], path: &Path) -> io::Result<()>;
}

/// Writes artifacts to the local filesystem, creating parent directories.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSink;

#[async_trait]
impl ArtifactSink for FsSink {
    async fn persist(&self, bytes: &[u8], path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await?;
        debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Expands an output file name pattern for one record.
///
/// `{index}` becomes the record index and `{field}` the value of a top-level
/// scalar field. Substituted values cannot introduce directories: path
/// separators in them become `_`. `.pdf` is appended when the result has no
/// extension.
pub fn output_file_name(pattern: &str, index: usize, record: &Record) -> String {
    let mut name = pattern.replace("{index}", &index.to_string());
    if let Value::Object(fields) = record {
        for (key, value) in fields {
            let placeholder = format!("{{{key}}}");
            if !name.contains(&placeholder) {
                continue;
            }
            if let Some(text) = scalar_text(value) {
                name = name.replace(&placeholder, &text.replace(['/', '\\'], "_"));
            }
        }
    }
    if Path::new(&name).extension().is_none() {
        name.push_str(".pdf");
    }
    name
}

/// File name of the combined document in single mode: `<input stem>.pdf`.
pub fn single_file_name(input: &Path) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    format!("{stem}.pdf")
}
