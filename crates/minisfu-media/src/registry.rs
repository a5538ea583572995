//! Codec registry
//!
//! An ordered, append-only list of codec descriptors. One registry is built
//! per connection and is read-only once negotiation has produced it.

use webrtc::api::media_engine::MediaEngine;

use crate::codec::{
    CodecDescriptor, CodecKind, DEFAULT_PAYLOAD_TYPE_G722, DEFAULT_PAYLOAD_TYPE_H264,
    DEFAULT_PAYLOAD_TYPE_OPUS, DEFAULT_PAYLOAD_TYPE_VP8, DEFAULT_PAYLOAD_TYPE_VP9,
};
use crate::error::{MediaError, Result};

#[derive(Debug, Clone, Default)]
pub struct CodecRegistry {
    codecs: Vec<CodecDescriptor>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the codecs this relay supports at their default numbering
    pub fn with_default_codecs() -> Self {
        let mut registry = Self::new();
        registry.register(CodecDescriptor::opus(DEFAULT_PAYLOAD_TYPE_OPUS, 48000));
        registry.register(CodecDescriptor::g722(DEFAULT_PAYLOAD_TYPE_G722, 8000));
        registry.register(CodecDescriptor::vp8(DEFAULT_PAYLOAD_TYPE_VP8, 90000));
        registry.register(CodecDescriptor::h264(DEFAULT_PAYLOAD_TYPE_H264, 90000));
        registry.register(CodecDescriptor::vp9(DEFAULT_PAYLOAD_TYPE_VP9, 90000));
        registry
    }

    /// Append a codec and return its payload type.
    ///
    /// Nothing is deduplicated; callers register each codec once.
    pub fn register(&mut self, codec: CodecDescriptor) -> u8 {
        let payload_type = codec.payload_type;
        self.codecs.push(codec);
        payload_type
    }

    /// All codecs of a kind, in registration order
    pub fn by_kind(&self, kind: CodecKind) -> Vec<&CodecDescriptor> {
        self.codecs.iter().filter(|c| c.kind == kind).collect()
    }

    /// All codecs with a canonical name, in registration order
    pub fn by_name(&self, name: &str) -> Vec<&CodecDescriptor> {
        self.codecs
            .iter()
            .filter(|c| c.name.eq_ignore_ascii_case(name))
            .collect()
    }

    pub fn by_payload_type(&self, payload_type: u8) -> Result<&CodecDescriptor> {
        self.codecs
            .iter()
            .find(|c| c.payload_type == payload_type)
            .ok_or(MediaError::PayloadTypeNotFound(payload_type))
    }

    /// First codec of `kind` named `name`. Earlier registrations win, which
    /// for a resolved offer means the advertiser's own preference order.
    pub fn first_of(&self, name: &str, kind: CodecKind) -> Result<&CodecDescriptor> {
        let of_kind = self.by_kind(kind);
        if of_kind.is_empty() {
            return Err(MediaError::CodecNotFound(format!("no {} codecs found", kind)));
        }

        of_kind
            .into_iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| MediaError::CodecNotFound(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &CodecDescriptor> {
        self.codecs.iter()
    }

    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    /// Install every codec into a transport media engine, keeping the
    /// negotiated payload type numbers.
    pub fn register_with(&self, media_engine: &mut MediaEngine) -> Result<()> {
        for codec in &self.codecs {
            media_engine.register_codec(codec.parameters(), codec.kind.into())?;
            tracing::debug!("Registered {} codec {}", codec.kind, codec);
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a CodecRegistry {
    type Item = &'a CodecDescriptor;
    type IntoIter = std::slice::Iter<'a, CodecDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.codecs.iter()
    }
}
