//! Binary record codec.
//!
//! Records and change events travel as MessagePack. Field names are kept
//! (`to_vec_named`) so payloads stay self-describing, and every scalar kind
//! survives the round trip.

use crate::dispatch::ChangeEvent;
use crate::error::Result;
use crate::value::Document;
use std::sync::Arc;

/// Encode a record.
pub fn encode_document(document: &Document) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(document)?)
}

/// Decode a record.
pub fn decode_document(bytes: &[u8]) -> Result<Document> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Encode a change event once; the result is shared by every subscriber.
pub fn encode_event(event: &ChangeEvent) -> Result<Arc<[u8]>> {
    Ok(Arc::from(rmp_serde::to_vec_named(event)?))
}

/// Decode a change event received by a subscriber.
pub fn decode_event(bytes: &[u8]) -> Result<ChangeEvent> {
    Ok(rmp_serde::from_slice(bytes)?)
}
