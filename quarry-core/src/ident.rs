//! Identifier helpers for physical table, column and index names

use sha2::{Digest, Sha256};

/// Length of the hash infix used when shortening names.
const HASH_INFIX_LEN: usize = 20;

/// Convert a camelCase identifier to lower snake case.
///
/// An underscore is inserted before an upper-case letter only when the
/// preceding character was not upper-case, so `userID` becomes `user_id`.
pub fn to_lower_case_identifier(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    let mut prior_is_lower = false;
    for ch in s.chars() {
        if ch.is_ascii_uppercase() {
            if prior_is_lower {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            prior_is_lower = false;
        } else {
            prior_is_lower = true;
            out.push(ch);
        }
    }
    out
}

/// Upper-case the first character.
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// Shorten `s` to at most `max_len` characters while keeping it unique.
///
/// The head and tail of the original are kept and the middle is replaced by
/// a hex digest of the full string.
pub fn unique_shorter(s: &str, max_len: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= max_len || max_len <= HASH_INFIX_LEN {
        return s.to_string();
    }
    let digest = hex::encode(Sha256::digest(s.as_bytes()));
    let infix = &digest[..HASH_INFIX_LEN];
    let keep = max_len - HASH_INFIX_LEN;
    let head = keep / 2;
    let tail = keep - head;
    let mut out = String::with_capacity(max_len);
    out.extend(&chars[..head]);
    out.push_str(infix);
    out.extend(&chars[chars.len() - tail..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lower_case_identifier() {
        assert_eq!(to_lower_case_identifier("AuthUser"), "auth_user");
        assert_eq!(to_lower_case_identifier("touchedDate"), "touched_date");
        assert_eq!(to_lower_case_identifier("userID"), "user_id");
        assert_eq!(to_lower_case_identifier("already_snake"), "already_snake");
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("authUser"), "AuthUser");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn test_unique_shorter_leaves_short_names() {
        assert_eq!(unique_shorter("idx_user_name", 60), "idx_user_name");
    }

    #[test]
    fn test_unique_shorter_bounds_length_and_keeps_ends() {
        let long = format!("idx_{}_tail", "x".repeat(100));
        let short = unique_shorter(&long, 60);
        assert_eq!(short.chars().count(), 60);
        assert!(short.starts_with("idx_"));
        assert!(short.ends_with("_tail"));
    }

    #[test]
    fn test_unique_shorter_distinguishes_inputs() {
        let a = format!("idx_{}_a_end", "y".repeat(80));
        let b = format!("idx_{}_b_end", "y".repeat(80));
        assert_ne!(unique_shorter(&a, 60), unique_shorter(&b, 60));
    }
}
