//! Bridge to the external text-to-speech executable used by the desktop shell.
//!
//! The text is handed over as its own argv entry, never through a shell. The
//! rendered command line (logging, `--dry-run`) escapes double quotes so it
//! stays copy-pasteable.

use std::process::Stdio;

use crate::command::CommandSpec;

pub const DEFAULT_ENGINE: &str = "tts_engine.exe";
pub const DEFAULT_VOICE: &str = "justin1";

#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    #[error("text is empty")]
    EmptyText,

    #[error("launch {program}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with code {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
}

#[derive(Debug, Clone)]
pub struct SpeechEngine {
    program: String,
    voice: String,
}

impl SpeechEngine {
    pub fn new(program: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            voice: voice.into(),
        }
    }

    pub fn command(&self, text: &str) -> CommandSpec {
        CommandSpec::new(
            self.program.clone(),
            ["--voice", self.voice.as_str(), "--text", text],
        )
    }

    pub fn command_line(&self, text: &str) -> String {
        format!(
            "{} --voice {} --text \"{}\"",
            self.program,
            self.voice,
            escape_quotes(text)
        )
    }

    /// Runs the engine and returns whatever it printed on stdout.
    pub async fn speak(&self, text: &str) -> Result<String, SpeechError> {
        if text.trim().is_empty() {
            return Err(SpeechError::EmptyText);
        }
        tracing::debug!(command = %self.command_line(text), "tts speak");

        let out = self
            .command(text)
            .tokio_command(None)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| SpeechError::Launch {
                program: self.program.clone(),
                source,
            })?;

        if !out.status.success() {
            return Err(SpeechError::Failed {
                program: self.program.clone(),
                code: out.status.code(),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }
}

impl Default for SpeechEngine {
    fn default() -> Self {
        Self::new(DEFAULT_ENGINE, DEFAULT_VOICE)
    }
}

pub fn escape_quotes(text: &str) -> String {
    text.replace('"', "\\\"")
}
