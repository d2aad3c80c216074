use sha2::{Digest, Sha256};

/// Separates the fingerprint fields (ASCII record separator).
const FIELD_SEPARATOR: &str = "\u{1e}";
/// Separates items of the tag and ticket lists (ASCII unit separator).
const ITEM_SEPARATOR: &str = "\u{1f}";

pub fn sha256_hex(s: &str) -> String {
    let mut h = Sha256::new();
    h.update(s.as_bytes());
    hex::encode(h.finalize())
}

/// Computes the fingerprint of a test's descriptive metadata.
///
/// The server already knows a test whose fingerprint did not change since the
/// last delivered run, so its descriptive fields can be left out of the
/// payload. Tags and tickets are sorted here so the hash does not depend on
/// the order they were declared in.
pub fn compute(name: &str, category: Option<&str>, tags: &[String], tickets: &[String]) -> String {
    let mut tags = tags.to_vec();
    tags.sort();
    let mut tickets = tickets.to_vec();
    tickets.sort();

    let parts = [
        format!("name={name}"),
        format!("category={}", category.unwrap_or_default()),
        format!("tags={}", tags.join(ITEM_SEPARATOR)),
        format!("tickets={}", tickets.join(ITEM_SEPARATOR)),
    ];

    sha256_hex(&parts.join(FIELD_SEPARATOR))
}
