//! Caption configuration forwarded to the captioning pipeline.
//!
//! The service never renders captions itself; it only validates the options a
//! client picked, stores them with the job and hands them to the pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CaptionOptionsError {
    #[error("{field} must be a #rrggbb colour, got '{value}'")]
    InvalidColour { field: &'static str, value: String },
    #[error("max_words_per_line must be between 1 and 10, got {0}")]
    InvalidWordsPerLine(u32),
    #[error("font_size must be between 8 and 128, got {0}")]
    InvalidFontSize(u32),
    #[error("font_family must not be empty")]
    EmptyFontFamily,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CaptionStyle {
    Classic,
    Karaoke,
    #[default]
    Highlight,
    Underline,
    WordByWord,
}

/// Caption settings chosen at submission time.
///
/// Every field has a default so clients may send a partial object (or none).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CaptionOptions {
    pub language: String,
    pub line_color: String,
    pub word_color: String,
    pub outline_color: String,
    pub all_caps: bool,
    pub max_words_per_line: u32,
    pub position: String,
    pub alignment: String,
    pub font_family: String,
    pub font_size: u32,
    pub bold: bool,
    pub italic: bool,
    pub strikeout: bool,
    pub style: CaptionStyle,
    pub output_type: String,
    pub save_as_default: bool,
}

impl Default for CaptionOptions {
    fn default() -> Self {
        Self {
            language: "auto".to_string(),
            line_color: "#ffffff".to_string(),
            word_color: "#ffffff".to_string(),
            outline_color: "#000000".to_string(),
            all_caps: false,
            max_words_per_line: 3,
            position: "center".to_string(),
            alignment: "center".to_string(),
            font_family: "Arial".to_string(),
            font_size: 24,
            bold: false,
            italic: false,
            strikeout: false,
            style: CaptionStyle::Highlight,
            output_type: "burned-in".to_string(),
            save_as_default: false,
        }
    }
}

impl CaptionOptions {
    pub fn validate(&self) -> Result<(), CaptionOptionsError> {
        for (field, value) in [
            ("line_color", &self.line_color),
            ("word_color", &self.word_color),
            ("outline_color", &self.outline_color),
        ] {
            if !is_hex_colour(value) {
                return Err(CaptionOptionsError::InvalidColour {
                    field,
                    value: value.clone(),
                });
            }
        }

        if !(1..=10).contains(&self.max_words_per_line) {
            return Err(CaptionOptionsError::InvalidWordsPerLine(
                self.max_words_per_line,
            ));
        }

        if !(8..=128).contains(&self.font_size) {
            return Err(CaptionOptionsError::InvalidFontSize(self.font_size));
        }

        if self.font_family.trim().is_empty() {
            return Err(CaptionOptionsError::EmptyFontFamily);
        }

        Ok(())
    }
}

fn is_hex_colour(value: &str) -> bool {
    value
        .strip_prefix('#')
        .is_some_and(|hex| hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_payload_fills_defaults() {
        let options: CaptionOptions =
            serde_json::from_str(r#"{"style": "karaoke", "fontSize": 32}"#).unwrap();

        assert_eq!(options.style, CaptionStyle::Karaoke);
        assert_eq!(options.font_size, 32);
        assert_eq!(options.language, "auto");
        assert_eq!(options.max_words_per_line, 3);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_word_by_word_style_uses_snake_case() {
        let options: CaptionOptions =
            serde_json::from_str(r#"{"style": "word_by_word"}"#).unwrap();
        assert_eq!(options.style, CaptionStyle::WordByWord);
    }

    #[test]
    fn test_rejects_bad_colour() {
        let options = CaptionOptions {
            outline_color: "black".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            options.validate(),
            Err(CaptionOptionsError::InvalidColour { field: "outline_color", .. })
        ));
    }

    #[test]
    fn test_rejects_out_of_range_layout() {
        let options = CaptionOptions {
            max_words_per_line: 0,
            ..Default::default()
        };
        assert_eq!(
            options.validate(),
            Err(CaptionOptionsError::InvalidWordsPerLine(0))
        );

        let options = CaptionOptions {
            font_size: 400,
            ..Default::default()
        };
        assert_eq!(
            options.validate(),
            Err(CaptionOptionsError::InvalidFontSize(400))
        );
    }
}
