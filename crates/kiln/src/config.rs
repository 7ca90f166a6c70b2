use std::ffi::OsString;

use anyhow::{Context, Result};

use crate::scratch::SCRATCH_SLOT_CAPACITY;

pub const ENV_SCRATCH_BYTES: &str = "KILN_SCRATCH_BYTES";
pub const ENV_LOG_BYTES: &str = "KILN_LOG_BYTES";
pub const ENV_CC: &str = "KILN_CC";

pub const DEFAULT_LOG_BYTES: usize = 8 * 1024;
pub const DEFAULT_CC: &str = "cc";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub scratch_bytes: usize,
    pub log_bytes: usize,
    pub cc: OsString,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            scratch_bytes: SCRATCH_SLOT_CAPACITY,
            log_bytes: DEFAULT_LOG_BYTES,
            cc: OsString::from(DEFAULT_CC),
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var_os(name))
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<OsString>) -> Result<Self> {
        let mut cfg = RuntimeConfig::default();
        if let Some(v) = lookup(ENV_SCRATCH_BYTES) {
            cfg.scratch_bytes = parse_size(ENV_SCRATCH_BYTES, &v)?;
        }
        if let Some(v) = lookup(ENV_LOG_BYTES) {
            cfg.log_bytes = parse_size(ENV_LOG_BYTES, &v)?;
        }
        if let Some(v) = lookup(ENV_CC) {
            if !v.is_empty() {
                cfg.cc = v;
            }
        }
        Ok(cfg)
    }
}

/// Per-thread scratch slot size; an unparsable override falls back to the
/// default rather than failing the first scratch request.
pub(crate) fn scratch_slot_capacity() -> usize {
    std::env::var_os(ENV_SCRATCH_BYTES)
        .and_then(|v| parse_size(ENV_SCRATCH_BYTES, &v).ok())
        .unwrap_or(SCRATCH_SLOT_CAPACITY)
}

/// Accepts a plain byte count or one suffixed with `K`, `M` or `G` (binary).
pub fn parse_size(name: &str, value: &OsString) -> Result<usize> {
    let s = value
        .to_str()
        .with_context(|| format!("{name} is not valid UTF-8"))?
        .trim();
    let (digits, shift) = match s.as_bytes().last() {
        Some(b'k' | b'K') => (&s[..s.len() - 1], 10),
        Some(b'm' | b'M') => (&s[..s.len() - 1], 20),
        Some(b'g' | b'G') => (&s[..s.len() - 1], 30),
        _ => (s, 0),
    };
    let n: usize = digits
        .trim()
        .parse()
        .with_context(|| format!("{name}={s:?} is not a byte size"))?;
    let bytes = n
        .checked_mul(1usize << shift)
        .with_context(|| format!("{name}={s:?} overflows"))?;
    if bytes == 0 {
        anyhow::bail!("{name} must be greater than zero");
    }
    Ok(bytes)
}
