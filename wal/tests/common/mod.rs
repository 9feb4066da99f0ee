//! Shared test fixture: a payload type whose codec is length-prefixed and
//! self-delimiting, matching the framing examples used throughout the
//! coordinator's scenarios.

use std::any::Any;
use std::io::Read;
use wal_core::{EntryPayload, PayloadCodec, Registry, Result};

pub const TEXT_TYPE_TAG: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextPayload(pub String);

impl TextPayload {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl EntryPayload for TextPayload {
    fn type_tag(&self) -> u8 {
        TEXT_TYPE_TAG
    }

    fn encode(&self) -> Vec<u8> {
        let bytes = self.0.as_bytes();
        let mut out = Vec::with_capacity(4 + bytes.len());
        out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(bytes);
        out
    }
}

pub struct TextCodec;

impl PayloadCodec for TextCodec {
    fn type_tag(&self) -> u8 {
        TEXT_TYPE_TAG
    }

    fn read(&self, reader: &mut dyn Read) -> std::io::Result<Vec<u8>> {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf)?;
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body)?;
        let mut out = Vec::with_capacity(4 + len);
        out.extend_from_slice(&len_buf);
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn decode(&self, raw: &[u8]) -> Result<Box<dyn Any + Send + Sync>> {
        let len = u32::from_be_bytes(raw[0..4].try_into().unwrap()) as usize;
        let text = String::from_utf8_lossy(&raw[4..4 + len]).into_owned();
        Ok(Box::new(text))
    }
}

pub fn registry() -> Registry {
    let mut registry = Registry::new();
    registry.register(TextCodec);
    registry
}
