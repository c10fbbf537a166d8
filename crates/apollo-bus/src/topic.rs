//! Topic pattern matching.
//!
//! Binding patterns use the usual topic-exchange rules over `.`-separated
//! words: `*` matches exactly one word, `#` matches zero or more.

/// Returns `true` if `routing_key` matches `pattern`.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    words_match(&pattern, &key)
}

fn words_match(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| words_match(rest, &key[skip..])),
        Some((&"*", rest)) => !key.is_empty() && words_match(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && words_match(rest, &key[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(topic_matches("ex.user.1", "ex.user.1"));
        assert!(!topic_matches("ex.user.1", "ex.user.12"));
        assert!(!topic_matches("ex.user", "ex.user.1"));
    }

    #[test]
    fn test_star_matches_exactly_one_word() {
        assert!(topic_matches("ex.user.*", "ex.user.1"));
        assert!(!topic_matches("ex.user.*", "ex.user"));
        assert!(!topic_matches("ex.*", "ex.user.1"));
        assert!(topic_matches("ex.*", "ex.global"));
    }

    #[test]
    fn test_hash_matches_zero_or_more_words() {
        assert!(topic_matches("inter.#", "inter.user.1"));
        assert!(topic_matches("inter.#", "inter.global"));
        assert!(topic_matches("inter.#", "inter"));
        assert!(!topic_matches("inter.#", "ex.user.1"));
        assert!(topic_matches("#", "anything.at.all"));
        assert!(topic_matches("ex.#.1", "ex.user.1"));
    }
}
