//! Scrubbing of internal identifiers from error strings that leave the node.

use std::sync::LazyLock;

use regex::Regex;

static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9a-f]{8})\b-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-\b[0-9a-f]{12}")
        .expect("uuid pattern compiles")
});

/// Keep the first group of every UUID and mask the rest.
pub fn redact(msg: &str) -> String {
    UUID_RE.replace_all(msg, "$1-***").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_uuids() {
        let msg = "failed to mount 4b1b1a9e-0c2f-4b8e-9f7d-3a2b1c0d9e8f on /mnt";
        assert_eq!(redact(msg), "failed to mount 4b1b1a9e-*** on /mnt");
    }

    #[test]
    fn masks_every_occurrence() {
        let msg = "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee and 11111111-2222-3333-4444-555555555555";
        assert_eq!(redact(msg), "aaaaaaaa-*** and 11111111-***");
    }

    #[test]
    fn leaves_other_text_alone() {
        assert_eq!(redact("disk full"), "disk full");
        assert_eq!(redact("1-2-name"), "1-2-name");
    }
}
