use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use super::LoadError;

/// External text converters, tried in preference order. LibreOffice handles
/// the widest range of inputs; antiword and catdoc cover legacy Word
/// binaries; unrtf is appended for RTF fallback only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Converter {
    Soffice,
    Antiword,
    Catdoc,
    Unrtf,
}

impl Converter {
    #[must_use]
    pub fn binary_name(&self) -> &'static str {
        match self {
            Self::Soffice => "soffice",
            Self::Antiword => "antiword",
            Self::Catdoc => "catdoc",
            Self::Unrtf => "unrtf",
        }
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        which::which(self.binary_name()).is_ok()
    }

    async fn convert(&self, input: &Path) -> Result<String, LoadError> {
        match self {
            Self::Soffice => convert_with_soffice(input).await,
            Self::Antiword => capture_stdout("antiword", &[], input).await,
            Self::Catdoc => capture_stdout("catdoc", &[], input).await,
            Self::Unrtf => capture_stdout("unrtf", &["--text"], input).await,
        }
    }
}

/// The converter chain for legacy Word binaries.
pub const DOC_CONVERTERS: &[Converter] = &[Converter::Soffice, Converter::Antiword, Converter::Catdoc];

/// The fallback chain for RTF files whose control codes could not be
/// stripped directly.
pub const RTF_CONVERTERS: &[Converter] = &[Converter::Soffice, Converter::Unrtf];

/// Try each converter in order, returning the first non-empty output.
/// Fails only when every converter is unavailable or errors.
pub async fn run_chain(input: &Path, chain: &[Converter]) -> Result<String, LoadError> {
    let mut last_error = None;

    for converter in chain {
        if !converter.is_available() {
            tracing::debug!(converter = converter.binary_name(), "converter not installed");
            continue;
        }

        match converter.convert(input).await {
            Ok(text) if !text.trim().is_empty() => {
                tracing::debug!(converter = converter.binary_name(), "conversion succeeded");
                return Ok(text);
            }
            Ok(_) => {
                tracing::warn!(
                    converter = converter.binary_name(),
                    "converter produced empty output"
                );
            }
            Err(e) => {
                tracing::warn!(converter = converter.binary_name(), error = %e, "converter failed");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        LoadError::ExtractionFailed(format!(
            "no usable converter among: {}",
            chain
                .iter()
                .map(|c| c.binary_name())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }))
}

async fn capture_stdout(
    program: &str,
    args: &[&str],
    input: &Path,
) -> Result<String, LoadError> {
    let output = Command::new(program)
        .args(args)
        .arg(input)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LoadError::ExtractionFailed(format!("{program} not found"))
            } else {
                LoadError::Io(e)
            }
        })?;

    if !output.status.success() {
        return Err(LoadError::ExtractionFailed(format!(
            "{program} exited with {:?}: {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// LibreOffice converts into an output directory, naming the result after the
/// input stem. The directory is temporary and removed on every path.
async fn convert_with_soffice(input: &Path) -> Result<String, LoadError> {
    let temp_dir = tempfile::tempdir()?;

    let output = Command::new("soffice")
        .args(["--headless", "--convert-to", "txt:Text"])
        .arg(input)
        .arg("--outdir")
        .arg(temp_dir.path())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LoadError::ExtractionFailed("soffice not found".into())
            } else {
                LoadError::Io(e)
            }
        })?;

    if !output.status.success() {
        return Err(LoadError::ExtractionFailed(format!(
            "soffice exited with {:?}: {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let stem = input
        .file_stem()
        .ok_or_else(|| LoadError::ExtractionFailed("input file has no stem".into()))?;
    let converted = temp_dir.path().join(stem).with_extension("txt");

    if !converted.exists() {
        return Err(LoadError::ExtractionFailed(format!(
            "soffice produced no output for {}",
            input.display()
        )));
    }

    let text = tokio::fs::read_to_string(&converted).await?;
    Ok(text)
}
