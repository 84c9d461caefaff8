//! Pre-flight size classification of packaged snapshots.
//!
//! Snapshots travel as base64 text, so ceilings are compared against the
//! encoded length. Classification never touches the network.

const MIB: u64 = 1024 * 1024;

/// Largest encoded payload the API accepts.
pub const API_LIMIT_BYTES: u64 = 40 * MIB;

/// Largest encoded payload the web interface renders.
pub const WEB_LIMIT_BYTES: u64 = 20 * MIB;

/// Raw size above which the user is warned.
pub const LARGE_WARNING_BYTES: u64 = 10 * MIB;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeLimit {
    Api,
    Web,
}

impl SizeLimit {
    pub fn bytes(&self) -> u64 {
        match self {
            SizeLimit::Api => API_LIMIT_BYTES,
            SizeLimit::Web => WEB_LIMIT_BYTES,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            SizeLimit::Api => "API upload limit",
            SizeLimit::Web => "web interface limit",
        }
    }
}

/// Ordered severity, useful for comparing classifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Ok,
    Large,
    ExceedsWeb,
    ExceedsApi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeClass {
    pub raw_size: u64,
    pub upload_encoded_size: u64,
    pub within_api_limit: bool,
    pub is_large_warning: bool,
    pub exceeds_web_limit: bool,
    pub exceeds_api_limit: bool,
}

impl SizeClass {
    pub fn severity(&self) -> Severity {
        if self.exceeds_api_limit {
            Severity::ExceedsApi
        } else if self.exceeds_web_limit {
            Severity::ExceedsWeb
        } else if self.is_large_warning {
            Severity::Large
        } else {
            Severity::Ok
        }
    }
}

/// Base64 length of `raw` bytes with padding.
pub fn encoded_len(raw: u64) -> u64 {
    raw.div_ceil(3) * 4
}

pub fn classify(byte_length: u64, already_encoded: bool) -> SizeClass {
    let upload_encoded_size = if already_encoded {
        byte_length
    } else {
        encoded_len(byte_length)
    };
    let exceeds_api_limit = upload_encoded_size > API_LIMIT_BYTES;

    SizeClass {
        raw_size: byte_length,
        upload_encoded_size,
        within_api_limit: !exceeds_api_limit,
        is_large_warning: byte_length > LARGE_WARNING_BYTES,
        exceeds_web_limit: upload_encoded_size > WEB_LIMIT_BYTES,
        exceeds_api_limit,
    }
}
