//! Free-text filter tokens.
//!
//! Numeric suffix rules are tried before the bare workload rule, so `4part`
//! is always a partition count and never a workload called "4part".

use crate::record::ExperimentRecord;

/// One classified filter token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterToken {
    /// `<N>tps`
    Rate(u64),
    /// `<N>part` or `<N>partitions`
    Partitions(u64),
    /// `<N>keys`
    Keys(u64),
    /// Anything else, lowercased.
    Workload(String),
}

const RATE_SUFFIXES: &[&str] = &["tps"];
const PARTITION_SUFFIXES: &[&str] = &["partitions", "part"];
const KEY_SUFFIXES: &[&str] = &["keys"];

impl FilterToken {
    /// Classify a raw token. Returns `None` for blank input.
    pub fn parse(raw: &str) -> Option<Self> {
        let token = raw.trim().to_lowercase();
        if token.is_empty() {
            return None;
        }
        if let Some(value) = numeric_with_suffix(&token, RATE_SUFFIXES) {
            return Some(FilterToken::Rate(value));
        }
        if let Some(value) = numeric_with_suffix(&token, PARTITION_SUFFIXES) {
            return Some(FilterToken::Partitions(value));
        }
        if let Some(value) = numeric_with_suffix(&token, KEY_SUFFIXES) {
            return Some(FilterToken::Keys(value));
        }
        Some(FilterToken::Workload(token))
    }

    pub fn matches(&self, record: &ExperimentRecord) -> bool {
        match self {
            FilterToken::Rate(rate) => record.messages_per_second == *rate,
            FilterToken::Partitions(count) => record.n_partitions == *count,
            FilterToken::Keys(count) => record.n_keys == *count,
            FilterToken::Workload(name) => record.workload.to_lowercase() == *name,
        }
    }
}

impl std::fmt::Display for FilterToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterToken::Rate(rate) => write!(f, "{rate}tps"),
            FilterToken::Partitions(count) => write!(f, "{count}part"),
            FilterToken::Keys(count) => write!(f, "{count}keys"),
            FilterToken::Workload(name) => write!(f, "{name}"),
        }
    }
}

fn numeric_with_suffix(token: &str, suffixes: &[&str]) -> Option<u64> {
    suffixes.iter().find_map(|suffix| {
        let prefix = token.strip_suffix(suffix)?;
        if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        prefix.parse().ok()
    })
}

/// Classify every raw token, dropping blanks.
pub fn parse_tokens<S: AsRef<str>>(raw: &[S]) -> Vec<FilterToken> {
    raw.iter()
        .filter_map(|token| FilterToken::parse(token.as_ref()))
        .collect()
}

/// Keep the records that satisfy every token, preserving input order.
pub fn filter<'a>(
    records: &'a [ExperimentRecord],
    tokens: &[FilterToken],
) -> Vec<&'a ExperimentRecord> {
    records
        .iter()
        .filter(|record| tokens.iter().all(|token| token.matches(record)))
        .collect()
}
