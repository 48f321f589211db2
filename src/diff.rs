//! Unified diffs between canonical forms, with optional token redaction.
//!
//! Both sides are canonicalized, redaction is applied to both canonical
//! strings, and only then is the line diff computed. A value that differs
//! between hosts but is masked on both sides therefore does not show up as
//! drift, while structural changes around it stay visible.

use regex::Regex;
use similar::{DiffTag, TextDiff};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::canonical::canonicalize;
use crate::models::ContentType;

/// Replacement written in place of every redacted token.
pub const REDACTION_PLACEHOLDER: &str = "[REDACTED]";

/// Default number of context lines around each hunk.
pub const DEFAULT_CONTEXT_LINES: usize = 3;

#[derive(Debug, Error)]
pub enum DiffError {
    #[error("unknown content type '{0}' (expected 'text' or 'xml')")]
    UnknownContentType(String),
    #[error("invalid redaction token set: {0}")]
    InvalidTokens(#[from] regex::Error),
}

/// Something that can mask sensitive spans in canonical text.
///
/// Implementations keep running per-token occurrence counts until
/// [`reset`](Redactor::reset) is called.
pub trait Redactor {
    fn redact(&mut self, text: &str) -> String;
    fn redactions(&self) -> BTreeMap<String, usize>;
    fn reset(&mut self);
}

/// Literal-token redactor. When tokens overlap, the longest one wins.
#[derive(Debug, Clone)]
pub struct RedactionFilter {
    pattern: Option<Regex>,
    counts: BTreeMap<String, usize>,
}

impl RedactionFilter {
    pub fn new<I, S>(tokens: I) -> Result<Self, DiffError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tokens: Vec<String> = tokens
            .into_iter()
            .map(|t| t.as_ref().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        tokens.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        tokens.dedup();

        // Alternation is leftmost-first, so longer tokens must come first.
        let pattern = if tokens.is_empty() {
            None
        } else {
            let alternation = tokens
                .iter()
                .map(|t| regex::escape(t))
                .collect::<Vec<_>>()
                .join("|");
            Some(Regex::new(&alternation)?)
        };

        Ok(Self {
            pattern,
            counts: BTreeMap::new(),
        })
    }
}

impl Redactor for RedactionFilter {
    fn redact(&mut self, text: &str) -> String {
        let Some(pattern) = &self.pattern else {
            return text.to_string();
        };
        let counts = &mut self.counts;
        pattern
            .replace_all(text, |caps: &regex::Captures<'_>| {
                *counts.entry(caps[0].to_string()).or_insert(0) += 1;
                REDACTION_PLACEHOLDER
            })
            .into_owned()
    }

    fn redactions(&self) -> BTreeMap<String, usize> {
        self.counts.clone()
    }

    fn reset(&mut self) {
        self.counts.clear();
    }
}

/// How (and whether) to redact before diffing.
#[derive(Default)]
pub enum Redaction<'a> {
    #[default]
    None,
    /// Fixed tokens; counts cover this call only.
    Tokens(Vec<String>),
    /// Caller-owned filter; counts accumulate until the caller resets it.
    Filter(&'a mut dyn Redactor),
}

pub struct DiffOptions<'a> {
    pub redaction: Redaction<'a>,
    pub from_label: String,
    pub to_label: String,
    pub context_lines: usize,
}

impl Default for DiffOptions<'_> {
    fn default() -> Self {
        Self {
            redaction: Redaction::None,
            from_label: "baseline".to_string(),
            to_label: "target".to_string(),
            context_lines: DEFAULT_CONTEXT_LINES,
        }
    }
}

impl<'a> DiffOptions<'a> {
    pub fn labels(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.from_label = from.into();
        self.to_label = to.into();
        self
    }

    pub fn context_lines(mut self, n: usize) -> Self {
        self.context_lines = n;
        self
    }

    pub fn redaction(mut self, redaction: Redaction<'a>) -> Self {
        self.redaction = redaction;
        self
    }
}

/// Line-change statistics for one diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineStats {
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
}

impl LineStats {
    pub fn total(&self) -> usize {
        self.added + self.removed + self.changed
    }
}

#[derive(Debug, Clone)]
pub struct DiffResult {
    pub before: String,
    pub after: String,
    pub diff: String,
    pub stats: LineStats,
    /// Redacted tokens and their occurrence counts, when redaction was requested.
    pub redactions: Option<BTreeMap<String, usize>>,
}

impl DiffResult {
    pub fn has_changes(&self) -> bool {
        self.stats.total() > 0
    }
}

/// Diff `before` against `after` after canonicalizing both as `content_type`.
pub fn diff(
    before: &str,
    after: &str,
    content_type: &str,
    options: DiffOptions<'_>,
) -> Result<DiffResult, DiffError> {
    let content_type: ContentType = content_type
        .parse()
        .map_err(DiffError::UnknownContentType)?;

    let mut before = canonicalize(before, content_type);
    let mut after = canonicalize(after, content_type);

    let redactions = match options.redaction {
        Redaction::None => None,
        Redaction::Tokens(tokens) => {
            let mut filter = RedactionFilter::new(tokens)?;
            before = filter.redact(&before);
            after = filter.redact(&after);
            Some(filter.redactions())
        }
        Redaction::Filter(filter) => {
            before = filter.redact(&before);
            after = filter.redact(&after);
            Some(filter.redactions())
        }
    };

    let (stats, diff) = {
        let text_diff = TextDiff::from_lines(&before, &after);
        let stats = line_stats(&text_diff);
        let diff = if stats.total() == 0 {
            String::new()
        } else {
            text_diff
                .unified_diff()
                .context_radius(options.context_lines)
                .header(&options.from_label, &options.to_label)
                .to_string()
        };
        (stats, diff)
    };

    Ok(DiffResult {
        before,
        after,
        diff,
        stats,
        redactions,
    })
}

fn line_stats(text_diff: &TextDiff<'_, '_, '_, str>) -> LineStats {
    let mut stats = LineStats::default();
    for op in text_diff.ops() {
        let old_len = op.old_range().len();
        let new_len = op.new_range().len();
        match op.tag() {
            DiffTag::Equal => {}
            DiffTag::Insert => stats.added += new_len,
            DiffTag::Delete => stats.removed += old_len,
            DiffTag::Replace => {
                let paired = old_len.min(new_len);
                stats.changed += paired;
                stats.added += new_len - paired;
                stats.removed += old_len - paired;
            }
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_input_has_no_changes() {
        let r = diff("a\nb\n", "a\nb\n", "text", DiffOptions::default()).unwrap();
        assert!(!r.has_changes());
        assert!(r.diff.is_empty());
        assert!(r.redactions.is_none());
    }

    #[test]
    fn unknown_content_type_is_rejected() {
        let err = diff("a", "b", "yaml", DiffOptions::default()).unwrap_err();
        assert!(matches!(err, DiffError::UnknownContentType(t) if t == "yaml"));
    }

    #[test]
    fn counts_added_removed_and_changed() {
        let before = "keep\nold\ngone\n";
        let after = "keep\nnew\nextra-1\n";
        let r = diff(before, after, "text", DiffOptions::default()).unwrap();
        assert_eq!(r.stats, LineStats { added: 0, removed: 0, changed: 2 });

        let r = diff("a\n", "a\nb\nc\n", "text", DiffOptions::default()).unwrap();
        assert_eq!(r.stats, LineStats { added: 2, removed: 0, changed: 0 });

        let r = diff("a\nb\n", "a\n", "text", DiffOptions::default()).unwrap();
        assert_eq!(r.stats, LineStats { added: 0, removed: 1, changed: 0 });
    }

    #[test]
    fn unified_diff_carries_labels() {
        let opts = DiffOptions::default().labels("server01", "server03");
        let r = diff("x=1\n", "x=2\n", "text", opts).unwrap();
        assert!(r.diff.contains("--- server01"));
        assert!(r.diff.contains("+++ server03"));
        assert!(r.diff.contains("-x=1"));
        assert!(r.diff.contains("+x=2"));
    }

    #[test]
    fn formatting_only_changes_are_not_drift() {
        let r = diff("a = 1   \r\nb\r\n", "a = 1\nb\n", "text", DiffOptions::default()).unwrap();
        assert!(!r.has_changes());
    }

    #[test]
    fn masking_the_key_still_reports_value_change() {
        let opts = DiffOptions::default().redaction(Redaction::Tokens(vec!["secret".into()]));
        let r = diff("secret=alice\n", "secret=bob\n", "text", opts).unwrap();
        assert_eq!(r.stats.changed, 1);
        assert!(r.before.starts_with("[REDACTED]=alice"));
        assert_eq!(r.redactions.unwrap().get("secret"), Some(&2));
    }

    #[test]
    fn masking_both_values_removes_the_difference() {
        let opts =
            DiffOptions::default().redaction(Redaction::Tokens(vec!["alice".into(), "bob".into()]));
        let r = diff("x=1\nsecret=alice\n", "x=1\nsecret=bob\n", "text", opts).unwrap();
        assert_eq!(r.stats.added, 0);
        assert_eq!(r.stats.removed, 0);
        assert_eq!(r.stats.changed, 0);
        assert_eq!(r.after, "x=1\nsecret=[REDACTED]\n");
    }

    #[test]
    fn longest_token_wins() {
        let mut filter = RedactionFilter::new(["pass", "password"]).unwrap();
        assert_eq!(filter.redact("password=1"), "[REDACTED]=1");
        let counts = filter.redactions();
        assert_eq!(counts.get("password"), Some(&1));
        assert!(!counts.contains_key("pass"));
    }

    #[test]
    fn caller_filter_accumulates_until_reset() {
        let mut filter = RedactionFilter::new(["token"]).unwrap();
        for _ in 0..2 {
            let opts = DiffOptions::default().redaction(Redaction::Filter(&mut filter));
            diff("token\n", "token\n", "text", opts).unwrap();
        }
        assert_eq!(filter.redactions().get("token"), Some(&4));
        filter.reset();
        assert!(filter.redactions().is_empty());
    }

    #[test]
    fn xml_diff_ignores_indentation() {
        let a = "<r>\n    <a x=\"1\"/>\n</r>";
        let b = "<r><a x=\"1\"/></r>";
        let r = diff(a, b, "xml", DiffOptions::default()).unwrap();
        assert!(!r.has_changes());
    }
}
