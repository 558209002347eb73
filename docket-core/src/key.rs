//! Content-addressed analysis keys.
//!
//! An [`AnalysisKey`] identifies one combination of case, inputs and
//! configuration for a computation. The same case with an identical document
//! set, identical model/prompt configuration and no intervening case activity
//! always yields the same key. Different cases never share a key;
//! any new case activity changes the key, which invalidates the cache without
//! an explicit delete.
//!
//! # Encoding
//!
//! The digest input is a versioned, line-oriented encoding in which every
//! variable-length component is length-prefixed, so no input can forge a
//! delimiter:
//!
//! ```text
//! docket-key-v2
//! c:<case uuid, hyphenated lowercase>
//! h:<count>
//! <len>:<hash>          (one line per distinct hash, sorted bytewise)
//! m:<len>:<model_version>
//! p:<len>:<prompt_signature>
//! t:<RFC 3339 UTC timestamp, millisecond precision>
//! ```
//!
//! The key is the lowercase hex SHA-256 of that encoding (64 chars). A missing
//! activity timestamp is encoded as the Unix epoch.

use crate::{AnalysisType, CaseId, Timestamp, ValidationError};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

/// Version tag of the key encoding. Bump when the encoding changes.
const KEY_ENCODING_TAG: &str = "docket-key-v2";

/// Prefix of lock names in the shared key-value store.
pub const LOCK_KEY_PREFIX: &str = "lock:";

/// Length of a rendered key in hex characters.
pub const ANALYSIS_KEY_LEN: usize = 64;

/// Content-addressed digest identifying one computation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalysisKey(String);

impl AnalysisKey {
    /// Parse a previously rendered key.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let well_formed = s.len() == ANALYSIS_KEY_LEN
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !well_formed {
            return Err(ValidationError::InvalidValue {
                field: "analysis_key".to_string(),
                reason: format!("expected {} lowercase hex chars", ANALYSIS_KEY_LEN),
            });
        }
        Ok(Self(s.to_string()))
    }

    /// The hex representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the mutual-exclusion lock guarding this key.
    pub fn lock_key(&self) -> String {
        format!("{}{}", LOCK_KEY_PREFIX, self.0)
    }
}

impl fmt::Display for AnalysisKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AnalysisKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Prompt signature for an analysis type and prompt template version.
pub fn prompt_signature(analysis_type: AnalysisType, template_version: &str) -> String {
    format!("{}@{}", analysis_type.as_db_str(), template_version)
}

/// Derive the analysis key for a case's document hashes and configuration.
///
/// Order-independent and duplicate-insensitive over `document_hashes`.
/// `last_activity = None` means no case activity has ever been recorded.
pub fn derive_key<I, S>(
    case_id: CaseId,
    document_hashes: I,
    model_version: &str,
    prompt_signature: &str,
    last_activity: Option<Timestamp>,
) -> AnalysisKey
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let hashes: BTreeSet<String> = document_hashes
        .into_iter()
        .map(|h| h.as_ref().to_string())
        .collect();

    let mut encoded = String::with_capacity(128 + hashes.len() * 72);
    encoded.push_str(KEY_ENCODING_TAG);
    encoded.push('\n');
    encoded.push_str(&format!("c:{}\n", case_id));
    encoded.push_str(&format!("h:{}\n", hashes.len()));
    for hash in &hashes {
        push_component(&mut encoded, None, hash);
    }
    push_component(&mut encoded, Some('m'), model_version);
    push_component(&mut encoded, Some('p'), prompt_signature);
    encoded.push_str("t:");
    encoded.push_str(&activity_stamp(last_activity));
    encoded.push('\n');

    let digest = Sha256::digest(encoded.as_bytes());
    AnalysisKey(hex::encode(digest))
}

/// Render an activity timestamp the way the key encoding does.
pub fn activity_stamp(last_activity: Option<Timestamp>) -> String {
    last_activity
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn push_component(out: &mut String, tag: Option<char>, value: &str) {
    if let Some(tag) = tag {
        out.push(tag);
        out.push(':');
    }
    out.push_str(&value.len().to_string());
    out.push(':');
    out.push_str(value);
    out.push('\n');
}
