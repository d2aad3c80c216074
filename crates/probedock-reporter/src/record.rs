//! Test result records, in their wire form.

use serde::{Deserialize, Serialize};

/// Failure messages are cut to this many UTF-8 bytes.
pub const MESSAGE_MAX_BYTES: usize = 65535;

pub const NO_FLAGS: u32 = 0;
/// The test is inactive (skipped, or tied to an invalid ticket).
pub const INACTIVE_TEST_FLAG: u32 = 1;

pub const INCOMPLETE_MESSAGE: &str = "This test is marked as incomplete.";

/// One executed test.
///
/// Serialized with the single-letter keys the server expects. Empty lists,
/// absent options, `active == true` and `flags == 0` are left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRecord {
    #[serde(rename = "k")]
    pub key: String,

    #[serde(rename = "n", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(rename = "c", default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(rename = "g", default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(rename = "t", default, skip_serializing_if = "Vec::is_empty")]
    pub tickets: Vec<String>,

    #[serde(rename = "p")]
    pub passed: bool,

    #[serde(rename = "m", default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(rename = "d")]
    pub duration_ms: u64,

    #[serde(rename = "v", default = "default_active", skip_serializing_if = "is_active")]
    pub active: bool,

    #[serde(rename = "f", default, skip_serializing_if = "is_no_flags")]
    pub flags: u32,
}

fn default_active() -> bool {
    true
}

fn is_active(active: &bool) -> bool {
    *active
}

fn is_no_flags(flags: &u32) -> bool {
    *flags == NO_FLAGS
}

impl TestRecord {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: Some(name.into()),
            category: None,
            tags: Vec::new(),
            tickets: Vec::new(),
            passed: true,
            message: None,
            duration_ms: 0,
            active: true,
            flags: NO_FLAGS,
        }
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.passed = false;
        self.message = Some(message.into());
    }

    pub fn mark_inactive(&mut self) {
        self.flags |= INACTIVE_TEST_FLAG;
    }

    pub fn is_inactive(&self) -> bool {
        self.flags & INACTIVE_TEST_FLAG != 0
    }

    /// Drop the descriptive fields the server already knows.
    pub fn strip_metadata(&mut self) {
        self.name = None;
        self.category = None;
        self.tags.clear();
        self.tickets.clear();
    }

    /// Cut the message to [`MESSAGE_MAX_BYTES`]. Returns whether it was cut.
    pub fn truncate_message(&mut self) -> bool {
        match self.message.as_mut() {
            Some(message) => truncate_to_bytes(message, MESSAGE_MAX_BYTES),
            None => false,
        }
    }
}

/// Truncate to at most `max` bytes without splitting a character.
pub fn truncate_to_bytes(text: &mut String, max: usize) -> bool {
    if text.len() <= max {
        return false;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    true
}

/// Union of two lists, sorted, without duplicates.
pub fn merge_sorted(base: &[String], extra: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = base.iter().chain(extra).cloned().collect();
    merged.sort();
    merged.dedup();
    merged
}

/// Turn a test method name into a sentence.
///
/// `testAddsItemToCart` becomes `Test adds item to cart`. A word boundary is
/// placed before every capital followed by a lower-case letter, and before an
/// acronym (`testParseXMLFile` gives `Test parse xml file`).
pub fn humanize_method_name(method: &str) -> String {
    let chars: Vec<char> = method.chars().collect();
    let mut spaced = String::with_capacity(method.len() + 8);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if !c.is_ascii_uppercase() {
            spaced.push(c);
            i += 1;
            continue;
        }

        let run_end = chars[i..]
            .iter()
            .position(|c| !c.is_ascii_uppercase())
            .map_or(chars.len(), |offset| i + offset);
        let followed_by_lower = chars.get(run_end).is_some_and(|c| c.is_ascii_lowercase());

        // Acronym: all capitals of the run but the last, which starts the next word.
        if i > 0 && run_end - i >= 3 && followed_by_lower {
            spaced.push(' ');
            spaced.extend(&chars[i..run_end - 1]);
            i = run_end - 1;
            continue;
        }

        if chars.get(i + 1).is_some_and(|c| c.is_ascii_lowercase()) {
            spaced.push(' ');
            spaced.push(c);
            spaced.push(chars[i + 1]);
            i += 2;
            continue;
        }

        spaced.push(c);
        i += 1;
    }

    let lowered = spaced.trim_start().to_lowercase();
    let mut out = lowered.chars();
    match out.next() {
        Some(first) => first.to_uppercase().chain(out).collect(),
        None => String::new(),
    }
}
