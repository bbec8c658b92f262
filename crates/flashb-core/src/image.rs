//! Firmware sections and the bottom/top image pair.
//!
//! The device holds two firmware halves. Whichever half is not running is
//! the one it asks for, so every release is built twice: once linked at the
//! bottom address and once at the top.

use std::fmt;

use crate::error::FlashError;
use crate::protocol::VECTORS_LEN;

/// A contiguous block of bytes destined for `start_address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub start_address: u16,
    pub data: Vec<u8>,
}

impl Section {
    pub fn new(name: impl Into<String>, start_address: u16, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            start_address,
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// One past the last address, widened so sections ending at 0xFFFF fit.
    pub fn end_address(&self) -> u32 {
        self.start_address as u32 + self.data.len() as u32
    }

    /// Whether `address` falls inside this section.
    pub fn contains(&self, address: u16) -> bool {
        address >= self.start_address && (address as u32) < self.end_address()
    }
}

/// One firmware half: its program text and its vector table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub text: Section,
    pub vectors: Section,
}

impl Image {
    pub fn new(text: Section, vectors: Section) -> Self {
        Self { text, vectors }
    }

    /// Firmware version embedded in the first two bytes of `.text`.
    pub fn embedded_version(&self) -> Option<u16> {
        match self.text.data.as_slice() {
            [lo, hi, ..] => Some(u16::from_le_bytes([*lo, *hi])),
            _ => None,
        }
    }

    /// The vector table must be exactly [`VECTORS_LEN`] bytes.
    pub fn check_vectors(&self) -> Result<(), FlashError> {
        if self.vectors.len() != VECTORS_LEN {
            return Err(FlashError::VectorsLength {
                len: self.vectors.len(),
                expected: VECTORS_LEN,
            });
        }
        Ok(())
    }
}

/// Which firmware half an image occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Half {
    Bottom,
    Top,
}

impl Half {
    pub fn label(&self) -> &'static str {
        match self {
            Half::Bottom => "bottom",
            Half::Top => "top",
        }
    }
}

impl fmt::Display for Half {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Validated bottom/top images sharing one firmware version.
#[derive(Debug, Clone)]
pub struct ImagePair {
    bottom: Image,
    top: Image,
    version: u16,
}

impl ImagePair {
    /// Order two images by text address and check them against the
    /// addresses the board expects.
    pub fn new(a: Image, b: Image, bottom_address: u16, top_address: u16) -> Result<Self, FlashError> {
        let (bottom, top) = if a.text.start_address > b.text.start_address {
            (b, a)
        } else {
            (a, b)
        };

        for (half, image, expected) in [
            (Half::Bottom, &bottom, bottom_address),
            (Half::Top, &top, top_address),
        ] {
            if image.text.start_address != expected {
                return Err(FlashError::ImageAddress {
                    label: half.label(),
                    expected,
                    actual: image.text.start_address,
                });
            }
        }

        let version_of = |half: Half, image: &Image| {
            image.embedded_version().ok_or(FlashError::MissingVersion {
                label: half.label(),
                len: image.text.len(),
            })
        };
        let bottom_version = version_of(Half::Bottom, &bottom)?;
        let top_version = version_of(Half::Top, &top)?;
        if bottom_version != top_version {
            return Err(FlashError::ImageMismatch {
                bottom: bottom_version,
                top: top_version,
            });
        }

        Ok(Self {
            bottom,
            top,
            version: bottom_version,
        })
    }

    pub fn bottom(&self) -> &Image {
        &self.bottom
    }

    pub fn top(&self) -> &Image {
        &self.top
    }

    pub fn get(&self, half: Half) -> &Image {
        match half {
            Half::Bottom => &self.bottom,
            Half::Top => &self.top,
        }
    }

    /// Version both halves carry.
    pub fn version(&self) -> u16 {
        self.version
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn image(start: u16, version: u16, text_len: usize) -> Image {
        let mut text: Vec<u8> = (0..text_len).map(|i| i as u8).collect();
        if text_len >= 2 {
            text[..2].copy_from_slice(&version.to_le_bytes());
        }
        Image::new(
            Section::new(".text", start, text),
            Section::new(".vectors", 0xFFE0, vec![0xEE; VECTORS_LEN]),
        )
    }

    #[test]
    fn test_orders_by_text_address() {
        let low = image(0x1000, 7, 40);
        let high = image(0x2000, 7, 40);

        let pair = ImagePair::new(low.clone(), high.clone(), 0x1000, 0x2000).unwrap();
        assert_eq!(pair.bottom().text.start_address, 0x1000);
        assert_eq!(pair.top().text.start_address, 0x2000);

        let swapped = ImagePair::new(high, low, 0x1000, 0x2000).unwrap();
        assert_eq!(swapped.bottom().text.start_address, 0x1000);
        assert_eq!(swapped.top().text.start_address, 0x2000);
        assert_eq!(swapped.get(Half::Top).text.start_address, 0x2000);
    }

    #[test]
    fn test_address_mismatch() {
        let err = ImagePair::new(image(0x1000, 7, 40), image(0x2000, 7, 40), 0x1000, 0x3000)
            .unwrap_err();
        assert!(matches!(
            err,
            FlashError::ImageAddress {
                label: "top",
                expected: 0x3000,
                actual: 0x2000
            }
        ));
    }

    #[test]
    fn test_version_mismatch() {
        let err = ImagePair::new(image(0x1000, 7, 40), image(0x2000, 8, 40), 0x1000, 0x2000)
            .unwrap_err();
        assert!(matches!(err, FlashError::ImageMismatch { bottom: 7, top: 8 }));
    }

    #[test]
    fn test_text_too_short_for_version() {
        let err = ImagePair::new(image(0x1000, 7, 40), image(0x2000, 7, 1), 0x1000, 0x2000)
            .unwrap_err();
        assert!(matches!(
            err,
            FlashError::MissingVersion { label: "top", len: 1 }
        ));
        assert_eq!(err.to_string(), "top image .text is 1 bytes, too short to hold a version");
    }

    #[test]
    fn test_embedded_version() {
        assert_eq!(image(0x1000, 0x0203, 40).embedded_version(), Some(0x0203));
        assert_eq!(image(0x1000, 0, 1).embedded_version(), None);
    }

    #[test]
    fn test_check_vectors() {
        let mut img = image(0x1000, 1, 40);
        assert!(img.check_vectors().is_ok());
        img.vectors.data.truncate(30);
        assert!(matches!(
            img.check_vectors(),
            Err(FlashError::VectorsLength { len: 30, expected: 32 })
        ));
    }

    #[test]
    fn test_section_bounds() {
        let s = Section::new(".text", 0xFFF0, vec![0; 16]);
        assert_eq!(s.end_address(), 0x10000);
        assert!(s.contains(0xFFFF));
        assert!(!s.contains(0xFFEF));
    }
}
