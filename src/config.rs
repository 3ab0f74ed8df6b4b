use crate::grading::UnknownLetterPolicy;
use anyhow::Context;
use serde::Deserialize;
use std::path::Path;

pub const CONFIG_FILE: &str = "gradebookd.toml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CumulativeScope {
    #[default]
    All,
    Official,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GradingConfig {
    pub unknown_letter: UnknownLetterPolicy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TranscriptConfig {
    pub cumulative_scope: CumulativeScope,
    pub verification_code_len: usize,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            cumulative_scope: CumulativeScope::All,
            verification_code_len: 12,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkspaceConfig {
    pub grading: GradingConfig,
    pub transcripts: TranscriptConfig,
}

impl WorkspaceConfig {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let cfg: WorkspaceConfig = toml::from_str(text).context("invalid gradebookd.toml")?;
        // Codes are cut from a 32-char uuid hex string.
        if !(6..=32).contains(&cfg.transcripts.verification_code_len) {
            anyhow::bail!(
                "transcripts.verification_code_len must be between 6 and 32, got {}",
                cfg.transcripts.verification_code_len
            );
        }
        Ok(cfg)
    }

    /// Missing file means defaults.
    pub fn load(workspace: &Path) -> anyhow::Result<Self> {
        let path = workspace.join(CONFIG_FILE);
        if !path.is_file() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
        Self::parse(&text)
    }
}
