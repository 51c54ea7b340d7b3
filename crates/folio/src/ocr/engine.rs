//! OCR engine contract and the subprocess-backed implementation.
//!
//! Engines are opaque external processes: folio hands them an input path, an
//! optional page range and a private output directory, and reads back a text
//! artifact. Any engine-specific compatibility handling lives in the external
//! tool, never here.

use crate::core::config::EngineConfig;
use crate::error::{FolioError, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::env;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;

static CONFIDENCE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*confidence\s*[=:]\s*([0-9]*\.?[0-9]+)\s*%?\s*$")
        .expect("Confidence line regex pattern is valid and should compile")
});

const ARTIFACT_SEARCH_DEPTH: usize = 3;

/// One engine invocation.
#[derive(Debug, Clone)]
pub struct OcrRequest {
    pub input_path: PathBuf,
    /// 0-based half-open page range; `None` processes the whole document.
    pub pages: Option<Range<usize>>,
    /// Directory the engine writes its artifacts into. Owned by the caller.
    pub output_dir: PathBuf,
}

impl OcrRequest {
    pub fn new(input_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            pages: None,
            output_dir: output_dir.into(),
        }
    }

    pub fn with_pages(mut self, pages: Range<usize>) -> Self {
        self.pages = Some(pages);
        self
    }

    /// The same request writing into a subdirectory named after `engine`.
    ///
    /// Engines share no artifact directory, so a fallback engine never reads
    /// files left behind by an earlier attempt.
    pub fn for_engine(&self, engine: &str) -> Self {
        let dir_name: String = engine
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let dir_name = if dir_name.is_empty() { "engine".to_string() } else { dir_name };

        Self {
            input_path: self.input_path.clone(),
            pages: self.pages.clone(),
            output_dir: self.output_dir.join(format!("engine-{}", dir_name)),
        }
    }
}

/// Raw engine output before quality assessment.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOutput {
    pub text: String,
    pub confidence: f64,
}

/// An OCR engine callable by the coordinator.
///
/// # Thread Safety
///
/// Engines are shared across batch workers and must be `Send + Sync`.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Stable engine identifier.
    fn name(&self) -> &str;

    /// Probe whether the engine can run. Called once when the coordinator is built.
    async fn is_available(&self) -> bool;

    /// Run the engine on a request.
    ///
    /// A failure here is scoped to this engine; the coordinator moves on to the next one.
    async fn invoke(&self, request: &OcrRequest) -> Result<EngineOutput>;
}

/// Engine backed by an external executable.
///
/// The child is spawned with `kill_on_drop`, so a caller that drops the
/// invocation future on timeout also kills the process.
pub struct SubprocessEngine {
    config: EngineConfig,
}

impl SubprocessEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Override variable checked before the configured executable, e.g. `FOLIO_MARKER_PATH`.
    fn env_override(&self) -> String {
        let normalized: String = self
            .config
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("FOLIO_{}_PATH", normalized)
    }

    fn candidates(&self) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        let mut push_candidate = |path: PathBuf| {
            if seen.insert(path.clone()) {
                candidates.push(path);
            }
        };

        if let Some(value) = env::var_os(self.env_override()).filter(|v| !v.is_empty()) {
            push_candidate(PathBuf::from(value));
        }

        let executable = Path::new(&self.config.executable);
        if executable.components().count() > 1 || executable.is_absolute() {
            push_candidate(executable.to_path_buf());
            return candidates;
        }

        if let Some(path_env) = env::var_os("PATH") {
            for dir in env::split_paths(&path_env) {
                push_candidate(dir.join(executable));
                if cfg!(target_os = "windows") {
                    push_candidate(dir.join(format!("{}.exe", self.config.executable)));
                }
            }
        }

        candidates
    }

    fn locate_executable(&self) -> Result<PathBuf> {
        for candidate in self.candidates() {
            if let Ok(metadata) = std::fs::metadata(&candidate)
                && metadata.is_file()
            {
                return Ok(candidate);
            }
        }

        Err(FolioError::engine_unavailable(
            &self.config.name,
            format!(
                "executable '{}' not found on PATH; set {} to its location",
                self.config.executable,
                self.env_override()
            ),
        ))
    }

    fn render_args(&self, request: &OcrRequest) -> Vec<String> {
        let input = request.input_path.to_string_lossy();
        let output_dir = request.output_dir.to_string_lossy();

        self.config
            .args
            .iter()
            .filter_map(|arg| {
                let rendered = arg.replace("{input}", &input).replace("{output_dir}", &output_dir);
                match &request.pages {
                    Some(pages) => {
                        let last = pages.end.saturating_sub(1).max(pages.start);
                        Some(
                            rendered
                                .replace("{first_page}", &pages.start.to_string())
                                .replace("{last_page}", &last.to_string())
                                .replace("{end_page}", &pages.end.to_string())
                                .replace("{page_range}", &format!("{}-{}", pages.start, last)),
                        )
                    }
                    None if references_pages(&rendered) => None,
                    None => Some(rendered),
                }
            })
            .collect()
    }

    async fn read_artifact(&self, output_dir: &Path) -> Result<Option<String>> {
        if let Some(name) = &self.config.output_file {
            let path = output_dir.join(name);
            return match fs::read(&path).await {
                Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            };
        }

        match find_text_artifact(output_dir).await? {
            Some(path) => {
                let bytes = fs::read(&path).await?;
                Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
            }
            None => Ok(None),
        }
    }
}

fn references_pages(arg: &str) -> bool {
    ["{first_page}", "{last_page}", "{end_page}", "{page_range}"]
        .iter()
        .any(|p| arg.contains(p))
}

/// Breadth-first search for the first `.md` or `.txt` file, in sorted order.
async fn find_text_artifact(root: &Path) -> Result<Option<PathBuf>> {
    let mut level = vec![root.to_path_buf()];

    for _ in 0..ARTIFACT_SEARCH_DEPTH {
        let mut files = Vec::new();
        let mut dirs = Vec::new();

        for dir in &level {
            let mut entries = match fs::read_dir(dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    dirs.push(path);
                } else if matches!(path.extension().and_then(|e| e.to_str()), Some("md") | Some("txt")) {
                    files.push(path);
                }
            }
        }

        files.sort();
        if let Some(first) = files.into_iter().next() {
            return Ok(Some(first));
        }

        dirs.sort();
        if dirs.is_empty() {
            break;
        }
        level = dirs;
    }

    Ok(None)
}

/// Parse a `confidence=<value>` line. Values above 1 are read as percentages.
pub fn parse_confidence(stdout: &str) -> Option<f64> {
    let captures = CONFIDENCE_LINE.captures_iter(stdout).last()?;
    let value: f64 = captures.get(1)?.as_str().parse().ok()?;
    let value = if value > 1.0 { value / 100.0 } else { value };
    Some(value.clamp(0.0, 1.0))
}

#[async_trait]
impl OcrEngine for SubprocessEngine {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn is_available(&self) -> bool {
        match self.locate_executable() {
            Ok(path) => {
                tracing::debug!(engine = %self.config.name, path = %path.display(), "OCR engine available");
                true
            }
            Err(e) => {
                tracing::info!(engine = %self.config.name, error = %e, "OCR engine unavailable");
                false
            }
        }
    }

    async fn invoke(&self, request: &OcrRequest) -> Result<EngineOutput> {
        let executable = self.locate_executable()?;
        fs::create_dir_all(&request.output_dir).await?;

        let args = self.render_args(request);
        tracing::debug!(engine = %self.config.name, ?args, "Invoking OCR engine");

        let child = Command::new(&executable)
            .args(&args)
            .envs(&self.config.env)
            .current_dir(&request.output_dir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    FolioError::engine_unavailable(&self.config.name, e.to_string())
                } else {
                    FolioError::ocr_with_source(
                        format!("Failed to execute '{}'", executable.display()),
                        e,
                    )
                }
            })?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| FolioError::ocr_with_source(format!("Failed to wait for '{}'", self.config.name), e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FolioError::ocr(format!(
                "Engine '{}' exited with code {}: {}",
                self.config.name,
                output.status.code().unwrap_or(-1),
                if !stderr.trim().is_empty() { stderr.trim() } else { stdout.trim() }
            )));
        }

        let text = match self.read_artifact(&request.output_dir).await? {
            Some(text) => text,
            None if self.config.read_stdout => stdout.to_string(),
            None => {
                return Err(FolioError::ocr(format!(
                    "Engine '{}' produced no text artifact in {}",
                    self.config.name,
                    request.output_dir.display()
                )));
            }
        };

        let confidence = parse_confidence(&stdout).unwrap_or(self.config.default_confidence);

        Ok(EngineOutput { text, confidence })
    }
}
