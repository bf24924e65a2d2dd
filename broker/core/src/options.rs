//! Request Options
//!
//! The validated request shapes that arrive at the core, and the pre-built
//! prompt that accompanies them.
//!
//! Requests come in three UI levels of increasing feature exposure. Each
//! carries the parameter values the user selected; only the Ample level
//! may also carry backend tuning settings.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::GenerationParams;

/// A fully assembled prompt
///
/// The core never inspects its structure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Prompt(String);

impl Prompt {
    /// Wrap pre-built prompt text
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// The prompt text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Prompt {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl From<&str> for Prompt {
    fn from(text: &str) -> Self {
        Self(text.to_string())
    }
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Selected parameter values, keyed by parameter name
pub type Selections = BTreeMap<String, serde_json::Value>;

/// Options for the Standard and Modular levels
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BasicOptions {
    /// Selected parameter values
    #[serde(flatten)]
    pub selections: Selections,
}

/// Options for the Ample level
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmpleOptions {
    /// Backend tuning settings, forwarded verbatim to the adapter
    #[serde(default)]
    pub llm_settings: GenerationParams,
    /// Selected parameter values
    #[serde(flatten)]
    pub selections: Selections,
}

/// A validated generation request, tagged by UI level
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "uiLevel")]
pub enum GenerationOptions {
    /// Simplest UI level
    Standard(BasicOptions),
    /// Intermediate UI level
    Modular(BasicOptions),
    /// Full UI level, with backend tuning
    Ample(AmpleOptions),
}

impl GenerationOptions {
    /// Name of the active UI level
    #[must_use]
    pub fn ui_level(&self) -> &'static str {
        match self {
            Self::Standard(_) => "Standard",
            Self::Modular(_) => "Modular",
            Self::Ample(_) => "Ample",
        }
    }

    /// Selected parameter values
    #[must_use]
    pub fn selections(&self) -> &Selections {
        match self {
            Self::Standard(options) | Self::Modular(options) => &options.selections,
            Self::Ample(options) => &options.selections,
        }
    }

    /// Backend settings for this request
    ///
    /// Only the Ample level carries settings; every other level gets the
    /// adapter defaults.
    #[must_use]
    pub fn generation_params(&self) -> GenerationParams {
        match self {
            Self::Ample(options) => options.llm_settings.clone(),
            Self::Standard(_) | Self::Modular(_) => GenerationParams::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_standard_options_deserialize() {
        let options: GenerationOptions = serde_json::from_str(
            r#"{"uiLevel": "Standard", "topic": "photosynthesis", "bloom": 2}"#,
        )
        .unwrap();

        assert_eq!(options.ui_level(), "Standard");
        assert_eq!(
            options.selections().get("topic"),
            Some(&serde_json::json!("photosynthesis"))
        );
        assert_eq!(options.selections().get("bloom"), Some(&serde_json::json!(2)));
        assert!(!options.selections().contains_key("uiLevel"));
        assert_eq!(options.generation_params(), GenerationParams::default());
    }

    #[test]
    fn test_ample_options_carry_settings() {
        let options: GenerationOptions = serde_json::from_str(
            r#"{"uiLevel": "Ample", "topic": "tides",
                "llmSettings": {"maxTokens": 500, "temperature": 0.3}}"#,
        )
        .unwrap();

        let params = options.generation_params();
        assert_eq!(options.ui_level(), "Ample");
        assert_eq!(params.max_output_units, Some(500));
        assert_eq!(params.temperature, Some(0.3));
        assert_eq!(options.selections().len(), 1);
    }

    #[test]
    fn test_ample_without_settings_uses_defaults() {
        let options: GenerationOptions =
            serde_json::from_str(r#"{"uiLevel": "Ample", "topic": "tides"}"#).unwrap();

        assert_eq!(options.generation_params(), GenerationParams::default());
    }

    #[test]
    fn test_settings_on_other_levels_are_ignored() {
        let options: GenerationOptions = serde_json::from_str(
            r#"{"uiLevel": "Modular", "llmSettings": {"maxTokens": 5}}"#,
        )
        .unwrap();

        assert_eq!(options.ui_level(), "Modular");
        assert_eq!(options.generation_params(), GenerationParams::default());
    }

    #[test]
    fn test_unknown_level_is_rejected() {
        let result: Result<GenerationOptions, _> =
            serde_json::from_str(r#"{"uiLevel": "Expert"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_prompt_is_transparent() {
        let prompt: Prompt = serde_json::from_str(r#""Write three outcomes""#).unwrap();
        assert_eq!(prompt.as_str(), "Write three outcomes");
        assert_eq!(Prompt::from("x"), Prompt::new("x"));
    }
}
