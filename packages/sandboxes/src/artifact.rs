// ABOUTME: Workspace artifact model and extension-based classification
// ABOUTME: Turns workspace files into code/file artifacts for downstream presentation

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Extensions treated as source or configuration
const CODE_EXTENSIONS: &[&str] = &[
    "ts", "tsx", "js", "jsx", "mjs", "cjs", "py", "rb", "go", "rs", "java", "kt", "swift", "c",
    "h", "cc", "cpp", "hpp", "cs", "php", "scala", "sh", "bash", "zsh", "sql", "html", "css",
    "scss", "vue", "svelte", "json", "yaml", "yml", "toml", "xml", "ini",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Code,
    File,
}

/// A file read from a session workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceFile {
    /// Path relative to the workspace root, `/`-separated
    pub path: String,
    /// Exact file bytes; base64 on the wire
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
}

/// A classified workspace file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: String,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    pub kind: ArtifactKind,
}

impl Artifact {
    /// Content as text, when it is valid UTF-8
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }
}

impl From<WorkspaceFile> for Artifact {
    fn from(file: WorkspaceFile) -> Self {
        let kind = classify_path(&file.path);
        Self {
            path: file.path,
            content: file.content,
            kind,
        }
    }
}

/// Classify a path by its extension alone
pub fn classify_path(path: &str) -> ArtifactKind {
    let extension = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension {
        Some(ext) if CODE_EXTENSIONS.contains(&ext.as_str()) => ArtifactKind::Code,
        _ => ArtifactKind::File,
    }
}

pub fn classify_files(files: Vec<WorkspaceFile>) -> Vec<Artifact> {
    files.into_iter().map(Artifact::from).collect()
}

mod base64_bytes {
    use base64::{engine::general_purpose, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}
