//! Prompt composition and generation option validation.
//!
//! Prompt-fragment nodes publish a single comma-joined string built from a
//! free-text entry and the fragments of their selected options. Generator
//! nodes join every connected fragment the same way.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Delimiter placed between prompt fragments.
pub const FRAGMENT_DELIMITER: &str = ", ";

/// Maximum length for a composed prompt in characters.
pub const MAX_PROMPT_LENGTH: usize = 10_000;

/// Valid aspect ratios accepted by the generation service.
pub const VALID_ASPECT_RATIOS: &[&str] = &["1:1", "3:4", "4:3", "9:16", "16:9"];

/// Valid output resolutions accepted by the generation service.
pub const VALID_RESOLUTIONS: &[&str] = &["1K", "2K", "4K"];

// ---------------------------------------------------------------------------
// Selections
// ---------------------------------------------------------------------------

/// One selected option in a prompt-fragment node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptSelection {
    pub category: String,
    pub option: String,
    /// Text contributed to the composed prompt when selected.
    pub fragment: String,
}

/// Join non-empty, trimmed fragments with [`FRAGMENT_DELIMITER`].
pub fn join_fragments<I, S>(fragments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    fragments
        .into_iter()
        .filter_map(|f| {
            let trimmed = f.as_ref().trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .collect::<Vec<_>>()
        .join(FRAGMENT_DELIMITER)
}

/// Compose a prompt-fragment node's output: free text first, then every
/// selected fragment in selection order.
pub fn compose_prompt(free_text: &str, selections: &[PromptSelection]) -> String {
    join_fragments(
        std::iter::once(free_text).chain(selections.iter().map(|s| s.fragment.as_str())),
    )
}

/// Render reference qualifiers as a prompt hint, or `None` when empty.
pub fn qualifier_hint(qualifiers: &[String]) -> Option<String> {
    let joined = join_fragments(qualifiers);
    (!joined.is_empty()).then(|| format!("reference: {joined}"))
}

// ---------------------------------------------------------------------------
// Generation options
// ---------------------------------------------------------------------------

/// Optional knobs forwarded to the generation service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

impl GenerationOptions {
    /// Validate both options against the accepted value lists.
    pub fn validate(&self) -> Result<(), CoreError> {
        if let Some(ratio) = &self.aspect_ratio {
            if !VALID_ASPECT_RATIOS.contains(&ratio.as_str()) {
                return Err(CoreError::Validation(format!(
                    "Invalid aspect ratio '{ratio}'. Must be one of: {}",
                    VALID_ASPECT_RATIOS.join(", ")
                )));
            }
        }
        if let Some(resolution) = &self.resolution {
            if !VALID_RESOLUTIONS.contains(&resolution.as_str()) {
                return Err(CoreError::Validation(format!(
                    "Invalid resolution '{resolution}'. Must be one of: {}",
                    VALID_RESOLUTIONS.join(", ")
                )));
            }
        }
        Ok(())
    }
}

/// Validate a composed prompt: non-empty and within length limit.
pub fn validate_prompt(text: &str) -> Result<(), CoreError> {
    if text.trim().is_empty() {
        return Err(CoreError::Validation("Prompt must not be empty".to_string()));
    }
    let length = text.chars().count();
    if length > MAX_PROMPT_LENGTH {
        return Err(CoreError::Validation(format!(
            "Prompt exceeds maximum length of {MAX_PROMPT_LENGTH} characters (got {length})"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
