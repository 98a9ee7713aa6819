//! Configuration hashes used for change detection.
//!
//! A hash is the hex MD5 of the canonical JSON form of a value. JSON objects
//! are serialized with sorted keys, so two values that compare equal always
//! hash the same way regardless of map iteration order.

use std::collections::BTreeMap;

use md5::{Digest, Md5};
use serde::Serialize;

use crate::resources::common::MD5_ANNOTATION;

/// Hex MD5 of the canonical JSON form of `value`.
pub fn generate_md5_for_spec<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
    // Going through Value sorts object keys.
    let canonical = serde_json::to_vec(&serde_json::to_value(value)?)?;
    Ok(hex::encode(Md5::digest(&canonical)))
}

/// Whether the stored hash annotation matches `hash`.
pub fn is_up_to_date(annotations: Option<&BTreeMap<String, String>>, hash: &str) -> bool {
    annotations
        .and_then(|a| a.get(MD5_ANNOTATION))
        .is_some_and(|stored| stored == hash)
}
