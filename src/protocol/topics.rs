//! Topic matching and validation for subscription patterns
//!
//! A subscription pattern may carry one MQTT wildcard token. `#` matches the
//! remainder of a topic across any number of levels, `+` matches exactly one
//! level. Only the first wildcard in a pattern is honoured: `a/+/c/#` is not
//! matched with full MQTT semantics, see [`wildcard_count`] for detecting such
//! patterns up front.

use thiserror::Error;

/// Multi-level wildcard token
pub const MULTI_LEVEL_WILDCARD: char = '#';
/// Single-level wildcard token
pub const SINGLE_LEVEL_WILDCARD: char = '+';
/// Topic level separator
pub const LEVEL_SEPARATOR: char = '/';

/// Match a concrete message topic against a subscription pattern.
///
/// - `prefix#suffix`: the topic starts with `prefix` and ends with `suffix`
///   (either may be empty). A separator directly in front of `#` is not part
///   of the prefix, so `sensors/#` matches `sensors` as well as `sensors/a/b`,
///   but the prefix must still end on a level boundary: `sensorsX` does not
///   match.
/// - `prefix+suffix`: same containment rule, and the text between prefix and
///   suffix holds no `/`.
/// - no wildcard: byte-for-byte equality.
///
/// Pure and allocation free, safe to call from any thread.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    if let Some(index) = pattern.find(MULTI_LEVEL_WILDCARD) {
        let (prefix, stripped) = strip_trailing_separator(&pattern[..index]);
        let suffix = &pattern[index + 1..];

        if !contains_prefix_and_suffix(topic, prefix, suffix) {
            return false;
        }
        !stripped
            || topic.len() == prefix.len()
            || topic[prefix.len()..].starts_with(LEVEL_SEPARATOR)
    } else if let Some(index) = pattern.find(SINGLE_LEVEL_WILDCARD) {
        let prefix = &pattern[..index];
        let suffix = &pattern[index + 1..];

        if !contains_prefix_and_suffix(topic, prefix, suffix) {
            return false;
        }
        // prefix and suffix must not overlap inside the topic
        if topic.len() < prefix.len() + suffix.len() {
            return false;
        }

        !topic[prefix.len()..topic.len() - suffix.len()].contains(LEVEL_SEPARATOR)
    } else {
        pattern == topic
    }
}

fn contains_prefix_and_suffix(topic: &str, prefix: &str, suffix: &str) -> bool {
    (prefix.is_empty() || topic.starts_with(prefix))
        && (suffix.is_empty() || topic.ends_with(suffix))
}

// "/#" keeps its leading separator so it still only matches rooted topics
fn strip_trailing_separator(prefix: &str) -> (&str, bool) {
    if prefix.len() > 1 {
        if let Some(stripped) = prefix.strip_suffix(LEVEL_SEPARATOR) {
            return (stripped, true);
        }
    }
    (prefix, false)
}

/// Number of wildcard tokens (`#` or `+`) in a pattern
pub fn wildcard_count(pattern: &str) -> usize {
    pattern
        .chars()
        .filter(|&c| c == MULTI_LEVEL_WILDCARD || c == SINGLE_LEVEL_WILDCARD)
        .count()
}

/// True when the pattern contains at least one wildcard token
pub fn has_wildcard(pattern: &str) -> bool {
    wildcard_count(pattern) > 0
}

/// Validate a concrete topic name used for publishing
pub fn validate_topic_name(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if let Some(ch) = topic
        .chars()
        .find(|&c| c == MULTI_LEVEL_WILDCARD || c == SINGLE_LEVEL_WILDCARD)
    {
        return Err(TopicError::WildcardInTopicName(ch));
    }
    Ok(())
}

/// Validate a subscription pattern
pub fn validate_topic_filter(pattern: &str) -> Result<(), TopicError> {
    if pattern.is_empty() {
        return Err(TopicError::Empty);
    }
    Ok(())
}

/// Topic validation errors
#[derive(Debug, Error, PartialEq)]
pub enum TopicError {
    #[error("Topic cannot be empty")]
    Empty,
    #[error("Topic name contains wildcard character: '{0}'")]
    WildcardInTopicName(char),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SEGMENT: &str = "[a-z0-9]{1,6}";
    const SEGMENT_PATH: &str = "[a-z0-9]{1,6}(/[a-z0-9]{1,6}){0,4}";

    proptest! {
        #[test]
        fn exact_patterns_match_only_themselves(pattern in SEGMENT_PATH, topic in SEGMENT_PATH) {
            prop_assert_eq!(topic_matches(&pattern, &topic), pattern == topic);
            prop_assert!(topic_matches(&pattern, &pattern));
        }

        #[test]
        fn multi_level_wildcard_spans_any_interior(
            prefix in SEGMENT_PATH,
            interior in "[a-z0-9/]{0,20}",
            suffix in SEGMENT_PATH,
        ) {
            let pattern = format!("{prefix}#{suffix}");
            let topic = format!("{prefix}{interior}{suffix}");
            prop_assert!(topic_matches(&pattern, &topic), "{} should match {}", pattern, topic);
        }

        #[test]
        fn trailing_multi_level_wildcard_matches_descendants(
            root in SEGMENT_PATH,
            rest in "(/[a-z0-9]{1,6}){0,5}",
        ) {
            let pattern = format!("{root}/#");
            let topic = format!("{root}{rest}");
            prop_assert!(topic_matches(&pattern, &topic));
        }

        #[test]
        fn trailing_multi_level_wildcard_rejects_siblings(
            root in SEGMENT_PATH,
            extension in "[a-z0-9_]{1,6}",
            rest in "(/[a-z0-9]{1,6}){0,3}",
        ) {
            let pattern = format!("{root}/#");
            let topic = format!("{root}{extension}{rest}");
            prop_assert!(!topic_matches(&pattern, &topic), "{} should not match {}", pattern, topic);
        }

        #[test]
        fn single_level_wildcard_matches_one_segment(
            prefix in "[a-z0-9]{1,6}/",
            segment in SEGMENT,
            suffix in "/[a-z0-9]{1,6}",
        ) {
            let pattern = format!("{prefix}+{suffix}");
            let topic = format!("{prefix}{segment}{suffix}");
            prop_assert!(topic_matches(&pattern, &topic));
        }

        #[test]
        fn single_level_wildcard_rejects_multiple_segments(
            prefix in "[a-z0-9]{1,6}/",
            first in SEGMENT,
            second in SEGMENT,
            suffix in "/[a-z0-9]{1,6}",
        ) {
            let pattern = format!("{prefix}+{suffix}");
            let topic = format!("{prefix}{first}/{second}{suffix}");
            prop_assert!(!topic_matches(&pattern, &topic));
        }

        #[test]
        fn matcher_never_panics(pattern in "[a-z/#+]{0,12}", topic in "[a-z/]{0,12}") {
            let _ = topic_matches(&pattern, &topic);
        }
    }

    #[test]
    fn test_single_level_scenarios() {
        assert!(topic_matches("sensors/+/temp", "sensors/room1/temp"));
        assert!(!topic_matches("sensors/+/temp", "sensors/room1/hall/temp"));
        assert!(!topic_matches("sensors/+/temp", "sensors/room1/humidity"));
        assert!(topic_matches("sensors/+", "sensors/room1"));
        assert!(!topic_matches("sensors/+", "sensors/room1/temp"));
        assert!(topic_matches("+/temp", "room/temp"));
    }

    #[test]
    fn test_multi_level_scenarios() {
        assert!(topic_matches("sensors/#", "sensors"));
        assert!(topic_matches("sensors/#", "sensors/a"));
        assert!(topic_matches("sensors/#", "sensors/a/b"));
        assert!(!topic_matches("sensors/#", "actuators/a"));
        assert!(!topic_matches("sensors/#", "sensorsX"));
        assert!(!topic_matches("sensors/#", "sensors_backup/a"));
        assert!(!topic_matches("bar/#", "barn"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(topic_matches("bar/#", "bar/baz"));
        assert!(!topic_matches("bar/#", "foo"));
    }

    #[test]
    fn test_rooted_multi_level_wildcard() {
        assert!(topic_matches("/#", "/a/b"));
        assert!(!topic_matches("/#", "a/b"));
    }

    #[test]
    fn test_exact_match_is_byte_for_byte() {
        assert!(topic_matches("foo", "foo"));
        assert!(!topic_matches("foo", "foo/"));
        assert!(!topic_matches("foo", "Foo"));
        assert!(!topic_matches("a/b", "a/+"));
    }

    #[test]
    fn test_overlapping_prefix_and_suffix_does_not_match() {
        assert!(!topic_matches("a/+/a", "a/a"));
    }

    #[test]
    fn test_only_first_wildcard_is_honoured() {
        // the `#` branch wins and treats "+/c" as a literal prefix part
        assert!(!topic_matches("a/+/c/#", "a/b/c/d"));
        assert_eq!(wildcard_count("a/+/c/#"), 2);
    }

    #[test]
    fn test_wildcard_detection() {
        assert_eq!(wildcard_count("a/b"), 0);
        assert_eq!(wildcard_count("a/+"), 1);
        assert!(has_wildcard("#"));
        assert!(!has_wildcard("plain/topic"));
    }

    #[test]
    fn test_topic_validation() {
        assert_eq!(validate_topic_name(""), Err(TopicError::Empty));
        assert_eq!(
            validate_topic_name("a/#"),
            Err(TopicError::WildcardInTopicName('#'))
        );
        assert_eq!(
            validate_topic_name("a/+/b"),
            Err(TopicError::WildcardInTopicName('+'))
        );
        assert!(validate_topic_name("lwt").is_ok());

        assert_eq!(validate_topic_filter(""), Err(TopicError::Empty));
        assert!(validate_topic_filter("a/+/b").is_ok());
    }
}
