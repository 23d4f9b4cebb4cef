//! Resolves a browser URL to the stored entry that should answer it.
//!
//! Priority, best first:
//! 1. a key equal to the full query string,
//! 2. a key equal to the hostname,
//! 3. a key that is a label-aligned suffix of the hostname
//!    (`example.com` answers `mail.example.com`, `ample.com` does not).
//!
//! Within the best level the entry added last wins.

use tracing::debug;
use url::Url;

use crate::entry::Entry;
use crate::error::{PastorError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    raw: String,
    host: String,
}

impl Query {
    /// Accepts a full URL or a bare hostname; a missing scheme is read as
    /// `http://`.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(PastorError::invalid("query URL is empty"));
        }
        let parsed = if raw.contains("://") {
            Url::parse(raw)
        } else {
            Url::parse(&format!("http://{raw}"))
        }
        .map_err(|e| PastorError::invalid(format!("cannot parse {raw}: {e}")))?;

        let host = parsed
            .host_str()
            .map(|h| h.trim_end_matches('.').to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .ok_or_else(|| PastorError::invalid(format!("no hostname in {raw}")))?;

        Ok(Self {
            raw: raw.to_string(),
            host,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchLevel {
    ExactUrl,
    ExactHost,
    DomainSuffix,
}

pub fn match_level(entry: &Entry, query: &Query) -> Option<MatchLevel> {
    if entry.key.trim() == query.raw() {
        return Some(MatchLevel::ExactUrl);
    }
    let key = entry.normalized_key();
    if key.is_empty() {
        return None;
    }
    let host = query.host();
    if key.eq_ignore_ascii_case(host) {
        return Some(MatchLevel::ExactHost);
    }
    if host.len() > key.len() {
        let (head, tail) = host.split_at(host.len() - key.len());
        if head.ends_with('.') && tail.eq_ignore_ascii_case(key) {
            return Some(MatchLevel::DomainSuffix);
        }
    }
    None
}

/// Picks the best entry for `query`; ties go to the later entry.
pub fn find<'a>(entries: &'a [Entry], query: &Query) -> Result<&'a Entry> {
    let best = entries
        .iter()
        .enumerate()
        .rev()
        .filter_map(|(index, entry)| match_level(entry, query).map(|level| (index, level, entry)))
        .min_by_key(|(_, level, _)| *level);

    match best {
        Some((index, level, entry)) => {
            debug!(index, ?level, "entry matched");
            Ok(entry)
        }
        None => Err(PastorError::NotFound {
            host: query.host().to_string(),
        }),
    }
}
