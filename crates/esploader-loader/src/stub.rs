//! Flasher stub images
//!
//! The stub binaries themselves are build artifacts of the separate
//! stub firmware project; this module only loads their RON description
//! files at runtime.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for stub image loading
#[derive(Debug, Error)]
pub enum StubImageError {
    /// I/O error reading the file
    #[error("I/O error reading stub image: {0}")]
    Io(#[from] std::io::Error),
    /// RON parsing error
    #[error("stub image parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),
    /// The image is structurally unusable
    #[error("invalid stub image: {0}")]
    Validation(String),
}

/// A compiled flasher stub ready for RAM upload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StubImage {
    /// Entry point address
    pub entry: u32,
    /// Load address of the text segment
    pub text_start: u32,
    /// Text segment contents
    pub text: Vec<u8>,
    /// Load address of the data segment
    pub data_start: u32,
    /// Data segment contents (may be empty)
    pub data: Vec<u8>,
}

impl StubImage {
    /// Load a stub image from a RON description file
    pub fn from_ron_file<P: AsRef<Path>>(path: P) -> Result<StubImage, StubImageError> {
        let text = fs::read_to_string(path.as_ref())?;
        let image: StubImage = ron::from_str(&text)?;
        image.validate()?;
        Ok(image)
    }

    fn validate(&self) -> Result<(), StubImageError> {
        if self.text.is_empty() {
            return Err(StubImageError::Validation(
                "text segment is empty".to_string(),
            ));
        }
        if self.entry == 0 {
            return Err(StubImageError::Validation(
                "entry point is zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_ron_image() {
        let ron_text = r#"(
            entry: 0x40380000,
            text_start: 0x40380000,
            text: [0x73, 0x00, 0x10, 0x00],
            data_start: 0x3FC80000,
            data: [1, 2, 3],
        )"#;
        let image: StubImage = ron::from_str(ron_text).unwrap();
        assert_eq!(image.entry, 0x4038_0000);
        assert_eq!(image.text.len(), 4);
        assert_eq!(image.data, vec![1, 2, 3]);
        image.validate().unwrap();
    }

    #[test]
    fn rejects_images_without_code() {
        let image = StubImage {
            entry: 0x4038_0000,
            ..Default::default()
        };
        assert!(matches!(
            image.validate(),
            Err(StubImageError::Validation(_))
        ));
    }

    #[test]
    fn rejects_a_zero_entry_point() {
        let image = StubImage {
            entry: 0,
            text: vec![0x01],
            ..Default::default()
        };
        assert!(image.validate().is_err());
    }
}
