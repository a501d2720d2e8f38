//! Signing policy.
//!
//! Every value has a default, so an empty JSON object is a valid
//! configuration file.

use std::num::NonZeroUsize;
use std::path::Path;

use chrono::{DateTime, FixedOffset, Utc};
use serde::Deserialize;

use crate::byte_range::MIN_CONTENTS_SENTINEL_WIDTH;
use crate::{Error, Result};

/// Hex digits reserved for `/Contents` by default. Fits an RSA-4096
/// signature with signed attributes and a certificate chain of a few
/// certificates.
pub const DEFAULT_CONTENTS_HEX_WIDTH: usize = 16384;

/// Smaller reservations can not hold even a bare PKCS #7 structure.
pub const MIN_CONTENTS_HEX_WIDTH: usize = 64;

const _: () = assert!(MIN_CONTENTS_HEX_WIDTH >= MIN_CONTENTS_SENTINEL_WIDTH);

/// Upper bound for the `/Contents` reservation (1 MiB of signature).
pub const MAX_CONTENTS_HEX_WIDTH: usize = 2 * 1024 * 1024;

/// "The document was verified and digitally signed successfully!"
pub const DEFAULT_REASON: &str = "Tài liệu đã được kiểm định và kí số thành công!";

pub const DEFAULT_FIELD_NAME: &str = "test signature";

/// UTC+07:00, the time zone the invoices are issued in.
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 7 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SignerConfig {
    /// Width, in hex digits, of the `/Contents` placeholder. Decided before
    /// the document is serialized and never changed afterwards.
    pub contents_hex_width: usize,

    /// The `/Reason` of the signature dictionary.
    pub reason: String,

    /// The `/T` name of the signature field.
    pub field_name: String,

    /// Offset from UTC used for the `/M` signing time.
    pub utc_offset_minutes: i32,

    /// Size of the batch signing pool. Defaults to the number of CPUs.
    pub worker_threads: Option<usize>,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            contents_hex_width: DEFAULT_CONTENTS_HEX_WIDTH,
            reason: DEFAULT_REASON.to_string(),
            field_name: DEFAULT_FIELD_NAME.to_string(),
            utc_offset_minutes: DEFAULT_UTC_OFFSET_MINUTES,
            worker_threads: None,
        }
    }
}

impl SignerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        let width = self.contents_hex_width;
        if !(MIN_CONTENTS_HEX_WIDTH..=MAX_CONTENTS_HEX_WIDTH).contains(&width) {
            return Err(Error::InvalidConfig(format!(
                "contents_hex_width must be between {MIN_CONTENTS_HEX_WIDTH} and {MAX_CONTENTS_HEX_WIDTH}, got {width}"
            )));
        }

        if self.field_name.is_empty() {
            return Err(Error::InvalidConfig("field_name must not be empty".into()));
        }
        if self.worker_threads == Some(0) {
            return Err(Error::InvalidConfig(
                "worker_threads must be at least 1".into(),
            ));
        }
        self.utc_offset()?;
        Ok(())
    }

    pub fn utc_offset(&self) -> Result<FixedOffset> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "utc_offset_minutes out of range: {}",
                    self.utc_offset_minutes
                ))
            })
    }

    /// Current time in the configured offset.
    pub fn signing_time(&self) -> Result<DateTime<FixedOffset>> {
        Ok(Utc::now().with_timezone(&self.utc_offset()?))
    }

    pub fn effective_worker_threads(&self) -> usize {
        self.worker_threads.unwrap_or_else(|| {
            std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
        })
    }
}
