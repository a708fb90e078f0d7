//! PII sanitization for outgoing fault records.
//!
//! Sanitization runs at enqueue time, not at flush time, so nothing
//! personally identifiable ever sits in the delivery queue. Email-like
//! substrings, credit-card-like digit runs, and social-security-like digit
//! runs are replaced with fixed placeholder tokens, and stack traces are
//! truncated to the first few frames.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

/// Replacement token for email-like substrings.
pub const EMAIL_PLACEHOLDER: &str = "[email-redacted]";
/// Replacement token for credit-card-like digit runs.
pub const CARD_PLACEHOLDER: &str = "[number-redacted]";
/// Replacement token for social-security-like digit runs.
pub const SSN_PLACEHOLDER: &str = "[ssn-redacted]";

/// Stack frames kept per message.
pub const MAX_STACK_FRAMES: usize = 5;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("invalid email pattern")
});

// 13-16 digits, optionally separated by single spaces or dashes.
static CARD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d(?:[ \-]?\d){12,15}\b").expect("invalid card pattern")
});

// 3-2-4 digit groups with optional single space/dash separators, which
// also covers undelimited nine-digit runs.
static SSN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{3}[ \-]?\d{2}[ \-]?\d{4}\b").expect("invalid ssn pattern")
});

/// Redacts PII patterns and truncates stack traces.
///
/// Additional host-specific patterns can be layered on top of the built-in
/// set; custom patterns redact to [`CARD_PLACEHOLDER`]'s generic token.
#[derive(Debug, Clone, Default)]
pub struct Sanitizer {
    custom_patterns: Vec<Regex>,
}

impl Sanitizer {
    /// Creates a sanitizer with the built-in patterns.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a custom redaction pattern.
    ///
    /// # Panics
    ///
    /// Panics if the pattern is not a valid regex.
    #[must_use]
    pub fn with_pattern(mut self, pattern: &str) -> Self {
        self.custom_patterns
            .push(Regex::new(pattern).expect("invalid custom pattern"));
        self
    }

    /// Redacts PII from a single string value.
    #[must_use]
    pub fn redact<'a>(&self, input: &'a str) -> Cow<'a, str> {
        let mut result = Cow::Borrowed(input);

        // SSN before card: both are digit runs, the narrower shape wins.
        for (pattern, placeholder) in [
            (&*SSN_PATTERN, SSN_PLACEHOLDER),
            (&*CARD_PATTERN, CARD_PLACEHOLDER),
            (&*EMAIL_PATTERN, EMAIL_PLACEHOLDER),
        ] {
            if pattern.is_match(&result) {
                result = Cow::Owned(pattern.replace_all(&result, placeholder).into_owned());
            }
        }

        for pattern in &self.custom_patterns {
            if pattern.is_match(&result) {
                result = Cow::Owned(pattern.replace_all(&result, CARD_PLACEHOLDER).into_owned());
            }
        }

        result
    }

    /// Sanitizes a full fault message: redacts PII and truncates the stack
    /// trace to the first [`MAX_STACK_FRAMES`] frames after the headline.
    #[must_use]
    pub fn sanitize_message(&self, raw_message: &str) -> String {
        let redacted = self.redact(raw_message);
        truncate_stack(&redacted, MAX_STACK_FRAMES)
    }
}

/// Keeps the headline plus at most `max_frames` following lines.
#[must_use]
pub fn truncate_stack(message: &str, max_frames: usize) -> String {
    let mut lines = message.lines();
    let Some(headline) = lines.next() else {
        return String::new();
    };

    let mut out = headline.to_string();
    let mut kept = 0usize;
    let mut truncated = false;
    for frame in lines {
        if kept >= max_frames {
            truncated = true;
            break;
        }
        out.push('\n');
        out.push_str(frame);
        kept += 1;
    }
    if truncated {
        out.push_str("\n  ...");
    }
    out
}
