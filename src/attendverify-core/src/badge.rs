//! Badge input handling: capture, source classification, format checks
//! and strength scoring.
//!
//! Everything here is pure so it can be tested without a live key stream.
//! The manual-badge strategy feeds [`BadgeCapture`] from its listener task.

use std::sync::LazyLock;

use attendverify_sensors::{Key, KeyEvent};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Where a badge identifier came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputSource {
    /// Keyboard-wedge scanner (fast, regular keystrokes).
    Scanner,
    /// Typed by hand.
    Keyboard,
    /// Assigned programmatically.
    Manual,
}

impl InputSource {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scanner => "scanner",
            Self::Keyboard => "keyboard",
            Self::Manual => "manual",
        }
    }
}

/// A committed badge identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeInputEvent {
    /// The identifier, trimmed.
    pub id: String,
    /// Classified source.
    pub source: InputSource,
    /// When it was committed.
    pub captured_at: DateTime<Utc>,
}

impl BadgeInputEvent {
    /// Input assigned directly rather than captured from keys.
    pub fn manual(id: &str) -> Self {
        Self {
            id: id.trim().to_string(),
            source: InputSource::Manual,
            captured_at: Utc::now(),
        }
    }
}

/// Classify a keystroke sequence by its timing.
///
/// `Scanner` only if there are at least two keystrokes and every gap
/// stayed strictly below `threshold_ms`.
pub fn classify_input(stamps: &[u64], threshold_ms: u64) -> InputSource {
    if stamps.len() < 2 {
        return InputSource::Keyboard;
    }
    let all_fast = stamps
        .windows(2)
        .all(|w| w[1].saturating_sub(w[0]) < threshold_ms);
    if all_fast {
        InputSource::Scanner
    } else {
        InputSource::Keyboard
    }
}

/// Keystroke accumulator.
///
/// Commits on `Enter` or when the buffer reaches `max_len`; the owner
/// calls [`BadgeCapture::flush`] after the debounce period of inactivity.
#[derive(Debug, Clone)]
pub struct BadgeCapture {
    buffer: String,
    stamps: Vec<u64>,
    max_len: usize,
    threshold_ms: u64,
}

impl BadgeCapture {
    /// New empty capture.
    pub fn new(max_len: usize, threshold_ms: u64) -> Self {
        Self {
            buffer: String::new(),
            stamps: Vec::new(),
            max_len,
            threshold_ms,
        }
    }

    /// Nothing buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Feed one key event; returns the committed input, if any.
    pub fn push(&mut self, event: KeyEvent) -> Option<BadgeInputEvent> {
        match event.key {
            Key::Char(c) if !c.is_control() => {
                self.buffer.push(c);
                self.stamps.push(event.at_ms);
                if self.buffer.chars().count() >= self.max_len {
                    return self.flush();
                }
                None
            },
            Key::Backspace => {
                self.buffer.pop();
                self.stamps.pop();
                None
            },
            Key::Enter => self.flush(),
            _ => None,
        }
    }

    /// Commit whatever is buffered. `None` if the buffer is blank.
    pub fn flush(&mut self) -> Option<BadgeInputEvent> {
        let source = classify_input(&self.stamps, self.threshold_ms);
        let id = self.buffer.trim().to_string();
        self.buffer.clear();
        self.stamps.clear();
        if id.is_empty() {
            return None;
        }
        Some(BadgeInputEvent {
            id,
            source,
            captured_at: Utc::now(),
        })
    }
}

/// Accepted badge shapes, checked in order.
static FORMATS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("employee", r"^EMP-\d{4,10}$"),
        ("badge", r"^BADGE-[A-Z0-9]{4,12}$"),
        ("numeric", r"^\d{4,16}$"),
        ("alphanumeric", r"^[A-Za-z0-9]{4,20}$"),
        ("hex", r"^[0-9A-Fa-f]{6,32}$"),
        ("generic", r"^[A-Za-z0-9][A-Za-z0-9_-]{2,30}[A-Za-z0-9]$"),
    ]
    .into_iter()
    .map(|(name, pattern)| (name, Regex::new(pattern).expect("static badge pattern")))
    .collect()
});

/// Literals that are trivially guessable.
const WEAK_LITERALS: &[&str] = &[
    "0000", "1111", "1234", "12345", "123456", "12345678", "abcd", "abc123", "test", "admin",
    "badge", "password", "qwerty",
];

/// Check `id` against the accepted shapes.
///
/// Returns the name of the first matching shape, or a descriptive reason.
pub fn validate_format(id: &str, min_len: usize, max_len: usize) -> Result<&'static str, String> {
    let len = id.chars().count();
    if len < min_len {
        return Err(format!(
            "Badge ID too short: {len} characters, minimum is {min_len}"
        ));
    }
    if len > max_len {
        return Err(format!(
            "Badge ID too long: {len} characters, maximum is {max_len}"
        ));
    }
    FORMATS
        .iter()
        .find(|(_, re)| re.is_match(id))
        .map(|(name, _)| *name)
        .ok_or_else(|| format!("Unrecognized badge format: {id}"))
}

/// Badge strength level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrengthLevel {
    /// Score below 40.
    Weak,
    /// Score below 70.
    Medium,
    /// Score 70 and above.
    Strong,
}

/// Result of [`score_badge`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeStrength {
    /// 0–100.
    pub score: u8,
    /// Level derived from the score.
    pub level: StrengthLevel,
    /// Weaknesses found (`repeated_chars`, `sequential_chars`, `weak_pattern`).
    pub flags: Vec<String>,
}

impl BadgeStrength {
    /// Warning text for weak and medium levels.
    pub fn warning(&self) -> Option<String> {
        match self.level {
            StrengthLevel::Strong => None,
            StrengthLevel::Medium => Some("Badge ID has medium strength".to_string()),
            StrengthLevel::Weak if self.flags.is_empty() => {
                Some("Weak badge ID".to_string())
            },
            StrengthLevel::Weak => Some(format!("Weak badge ID: {}", self.flags.join(", "))),
        }
    }
}

fn longest_run(chars: &[char], step: impl Fn(char, char) -> bool) -> usize {
    let mut best = usize::from(!chars.is_empty());
    let mut run = best;
    for w in chars.windows(2) {
        run = if step(w[0], w[1]) { run + 1 } else { 1 };
        best = best.max(run);
    }
    best
}

/// Score a badge identifier for guessability.
pub fn score_badge(id: &str) -> BadgeStrength {
    let chars: Vec<char> = id.chars().collect();
    let mut score: i32 = 50;
    let mut flags = Vec::new();

    if longest_run(&chars, |a, b| a == b) >= 3 {
        score -= 30;
        flags.push("repeated_chars".to_string());
    }
    let ascending = |a: char, b: char| {
        a.is_ascii_alphanumeric()
            && b.is_ascii_alphanumeric()
            && (b as u32) == (a as u32) + 1
    };
    if longest_run(&chars, ascending) >= 3 {
        score -= 20;
        flags.push("sequential_chars".to_string());
    }
    let lower = id.to_ascii_lowercase();
    if WEAK_LITERALS.contains(&lower.as_str()) {
        score -= 40;
        flags.push("weak_pattern".to_string());
    }

    if chars.len() >= 8 {
        score += 20;
    }
    let has_alpha = chars.iter().any(char::is_ascii_alphabetic);
    let has_digit = chars.iter().any(char::is_ascii_digit);
    if has_alpha && has_digit {
        score += 20;
    }
    if chars.len() >= 12 {
        score += 10;
    }

    let score = u8::try_from(score.clamp(0, 100)).unwrap_or(0);
    let level = match score {
        s if s < 40 => StrengthLevel::Weak,
        s if s < 70 => StrengthLevel::Medium,
        _ => StrengthLevel::Strong,
    };
    BadgeStrength {
        score,
        level,
        flags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typed(text: &str, gap_ms: u64) -> Vec<KeyEvent> {
        text.chars()
            .enumerate()
            .map(|(i, c)| KeyEvent::new(Key::Char(c), i as u64 * gap_ms))
            .collect()
    }

    #[test]
    fn test_classify_by_timing() {
        assert_eq!(classify_input(&[0, 20, 40, 60], 100), InputSource::Scanner);
        assert_eq!(classify_input(&[0, 20, 300, 320], 100), InputSource::Keyboard);
        assert_eq!(classify_input(&[0], 100), InputSource::Keyboard);
        assert_eq!(classify_input(&[0, 100], 100), InputSource::Keyboard);
    }

    #[test]
    fn test_capture_commits_on_enter() {
        let mut capture = BadgeCapture::new(32, 100);
        for event in typed("EMP-1234", 15) {
            assert!(capture.push(event).is_none());
        }
        let input = capture.push(KeyEvent::new(Key::Enter, 200)).unwrap();
        assert_eq!(input.id, "EMP-1234");
        assert_eq!(input.source, InputSource::Scanner);
        assert!(capture.is_empty());
    }

    #[test]
    fn test_capture_commits_at_max_len() {
        let mut capture = BadgeCapture::new(4, 100);
        let events = typed("ABCDE", 400);
        let committed: Vec<_> = events.into_iter().filter_map(|e| capture.push(e)).collect();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].id, "ABCD");
        assert_eq!(committed[0].source, InputSource::Keyboard);
        assert!(!capture.is_empty());
    }

    #[test]
    fn test_capture_backspace_and_blank_flush() {
        let mut capture = BadgeCapture::new(32, 100);
        capture.push(KeyEvent::new(Key::Char('X'), 0));
        capture.push(KeyEvent::new(Key::Backspace, 10));
        assert!(capture.push(KeyEvent::new(Key::Enter, 20)).is_none());
    }

    #[test]
    fn test_formats() {
        assert_eq!(validate_format("EMP-004512", 4, 32), Ok("employee"));
        assert_eq!(validate_format("BADGE-A1B2", 4, 32), Ok("badge"));
        assert_eq!(validate_format("00451234", 4, 32), Ok("numeric"));
        assert_eq!(validate_format("AB12CD34", 4, 32), Ok("alphanumeric"));
        assert_eq!(validate_format("store_7-x", 4, 32), Ok("generic"));
        assert!(validate_format("a b c d", 4, 32).is_err());
        assert!(validate_format("-abc", 4, 32).is_err());
    }

    #[test]
    fn test_short_input_has_reason() {
        let err = validate_format("A1", 4, 32).unwrap_err();
        assert!(err.contains("too short"));
    }

    #[test]
    fn test_repeated_is_weak() {
        let s = score_badge("1111");
        assert_eq!(s.level, StrengthLevel::Weak);
        assert!(s.flags.contains(&"repeated_chars".to_string()));
        assert!(s.warning().is_some());
    }

    #[test]
    fn test_mixed_eight_is_at_least_medium() {
        let s = score_badge("AB12CD34");
        assert!(s.level >= StrengthLevel::Medium);
        assert!(s.flags.is_empty());
    }

    #[test]
    fn test_sequential_penalized() {
        let s = score_badge("9ABC5521");
        assert!(s.flags.contains(&"sequential_chars".to_string()));
        assert_eq!(s.score, 70);
    }
}
