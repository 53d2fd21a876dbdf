use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::host::{ClipboardError, ClipboardHost};

/// Clipboard helpers in preference order, with the arguments that make them
/// read the new contents from stdin.
const CANDIDATES: &[(&str, &[&str])] = &[
    ("wl-copy", &[]),
    ("xclip", &["-selection", "clipboard"]),
    ("xsel", &["--clipboard", "--input"]),
    ("pbcopy", &[]),
    ("clip", &[]),
];

/// Clipboard backed by the platform's command-line copy tool.
#[derive(Debug, Clone)]
pub struct CommandClipboard {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandClipboard {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// First helper found on PATH, if any.
    pub fn discover() -> Option<Self> {
        for (name, args) in CANDIDATES {
            if let Ok(path) = which::which(name) {
                info!("clipboard helper: {}", path.display());
                return Some(Self::new(path, args.iter().map(|a| a.to_string()).collect()));
            }
        }
        debug!("no clipboard helper on PATH");
        None
    }
}

#[async_trait]
impl ClipboardHost for CommandClipboard {
    async fn write(&self, text: &str) -> Result<bool, ClipboardError> {
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let Some(mut stdin) = child.stdin.take() else {
            return Err(ClipboardError::Unsupported("helper has no stdin".into()));
        };
        stdin.write_all(text.as_bytes()).await?;
        drop(stdin);

        let status = child.wait().await?;
        Ok(status.success())
    }
}

/// Clipboard used when no helper is installed: every write fails as unsupported.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoClipboard;

#[async_trait]
impl ClipboardHost for NoClipboard {
    async fn write(&self, _text: &str) -> Result<bool, ClipboardError> {
        Err(ClipboardError::Unsupported(
            "no clipboard helper installed (wl-copy, xclip, xsel, pbcopy or clip)".into(),
        ))
    }
}
