//! Image classification boundary.
//!
//! The vision model is an external collaborator: it receives image bytes
//! plus a fixed instruction and answers with free text. This module owns
//! the trait at that seam and the normalization of the answer into a
//! `Classification`.

mod backend;
mod gemini;
mod stub;

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::actuator::SortCommand;

pub use backend::{ClassificationError, Classifier, ImageData};
pub use gemini::{ClassifierConfig, GeminiClassifier, DEFAULT_ENDPOINT, DEFAULT_MODEL};
pub use stub::{StubClassifier, StubReply};

/// Instruction sent with every image.
pub const CLASSIFY_INSTRUCTION: &str =
    "Respond with exactly one label from {biodegradable, non-biodegradable} for the item in this image.";

const NEGATIVE_LABEL: &str = "non-biodegradable";
const POSITIVE_LABEL: &str = "biodegradable";

/// Build the classifier named by `config`.
///
/// `stub://<label>` answers `<label>` for every image; anything else is
/// treated as a Gemini REST endpoint.
pub fn build(config: &ClassifierConfig) -> Result<Arc<dyn Classifier>> {
    if let Some(label) = config.endpoint.strip_prefix("stub://") {
        log::warn!("using stub classifier answering {:?}", label);
        return Ok(Arc::new(StubClassifier::fixed(label)));
    }
    Ok(Arc::new(GeminiClassifier::new(config)?))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Classification {
    Biodegradable,
    NonBiodegradable,
    Unrecognized,
}

impl Classification {
    /// Normalize raw collaborator text.
    ///
    /// The negative label contains the positive one, so it must be tested
    /// first.
    pub fn from_label(raw: &str) -> Self {
        let label = raw.trim().to_lowercase();
        if label.contains(NEGATIVE_LABEL) {
            Classification::NonBiodegradable
        } else if label.contains(POSITIVE_LABEL) {
            Classification::Biodegradable
        } else {
            Classification::Unrecognized
        }
    }

    /// Actuator command for this result, if any.
    pub fn command(self) -> Option<SortCommand> {
        match self {
            Classification::Biodegradable => Some(SortCommand::Biodegradable),
            Classification::NonBiodegradable => Some(SortCommand::NonBiodegradable),
            Classification::Unrecognized => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Biodegradable => "biodegradable",
            Classification::NonBiodegradable => "non-biodegradable",
            Classification::Unrecognized => "unrecognized",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_ignores_case_and_whitespace() {
        for raw in [" Biodegradable \n", "BIODEGRADABLE", "biodegradable"] {
            assert_eq!(Classification::from_label(raw), Classification::Biodegradable);
        }
    }

    #[test]
    fn negative_label_wins_over_contained_positive() {
        assert_eq!(
            Classification::from_label("this is non-biodegradable"),
            Classification::NonBiodegradable
        );
        assert_eq!(
            Classification::from_label("Non-Biodegradable."),
            Classification::NonBiodegradable
        );
    }

    #[test]
    fn labels_inside_prose_are_matched() {
        assert_eq!(
            Classification::from_label("I think it is biodegradable."),
            Classification::Biodegradable
        );
        assert_eq!(
            Classification::from_label("Answer: Non-Biodegradable (plastic)"),
            Classification::NonBiodegradable
        );
    }

    #[test]
    fn unknown_text_is_unrecognized() {
        assert_eq!(Classification::from_label(""), Classification::Unrecognized);
        assert_eq!(
            Classification::from_label("recyclable plastic"),
            Classification::Unrecognized
        );
        // Hyphenation is part of the label; a spaced form is not matched.
        assert_eq!(
            Classification::from_label("bio degradable"),
            Classification::Unrecognized
        );
    }

    #[test]
    fn results_map_to_commands() {
        assert_eq!(
            Classification::Biodegradable.command(),
            Some(SortCommand::Biodegradable)
        );
        assert_eq!(
            Classification::NonBiodegradable.command(),
            Some(SortCommand::NonBiodegradable)
        );
        assert_eq!(Classification::Unrecognized.command(), None);
    }

    #[test]
    fn stub_endpoint_builds_fixed_classifier() {
        let config = ClassifierConfig {
            endpoint: "stub://biodegradable".to_string(),
            ..ClassifierConfig::default()
        };
        let classifier = build(&config).unwrap();
        assert_eq!(classifier.name(), "stub");
        let image = ImageData::new(Vec::new(), "image/png");
        assert_eq!(
            classifier.classify(&image, CLASSIFY_INSTRUCTION).unwrap(),
            "biodegradable"
        );
    }
}
