/// Text processing utilities
pub mod text {
    /// Wrap width for html2text; lines are rejoined afterwards.
    const TEXT_WIDTH: usize = 1_000;

    /// Plain text from an HTML fragment: tags dropped, entities decoded,
    /// whitespace collapsed into single spaces.
    pub fn strip_html(html: &str) -> String {
        let text = html2text::from_read(html.as_bytes(), TEXT_WIDTH).unwrap_or_else(|_| html.to_string());
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// First `max_chars` characters, never splitting a code point.
    pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
        match text.char_indices().nth(max_chars) {
            Some((idx, _)) => &text[..idx],
            None => text,
        }
    }

    /// Trimmed, lowercased, deduplicated labels in first-seen order.
    pub fn normalize_labels<I, S>(labels: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = Vec::new();
        for label in labels {
            let label = label.as_ref().trim().to_lowercase();
            if !label.is_empty() && !out.contains(&label) {
                out.push(label);
            }
        }
        out
    }
}

/// Time utilities
pub mod time {
    use chrono::Duration;

    /// Format duration in human-readable form
    pub fn format_duration(duration: Duration) -> String {
        let total_seconds = duration.num_seconds();

        if total_seconds < 60 {
            format!("{}s", total_seconds)
        } else if total_seconds < 3600 {
            format!("{}m", total_seconds / 60)
        } else if total_seconds < 86400 {
            format!("{}h {}m", total_seconds / 3600, (total_seconds % 3600) / 60)
        } else {
            format!("{}d {}h", total_seconds / 86400, (total_seconds % 86400) / 3600)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::text::*;
    use super::time::format_duration;

    #[test]
    fn strips_tags_and_collapses_whitespace() {
        assert_eq!(strip_html("<p>Hello <span>world</span></p>\n\n<p>again</p>"), "Hello world again");
        assert_eq!(strip_html("line<br/>break"), "line break");
        assert_eq!(strip_html("plain text"), "plain text");
    }

    #[test]
    fn decodes_entities() {
        assert_eq!(strip_html("<p>Tom &amp; Jerry&#8217;s&nbsp;show</p>"), "Tom & Jerry\u{2019}s show");
        assert_eq!(strip_html("a &lt;b&gt; c"), "a <b> c");
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 50), "short");
        assert_eq!(truncate_chars("🚀🚀🚀", 1), "🚀");
    }

    #[test]
    fn normalizes_labels() {
        let labels = normalize_labels(["AI", " ai ", "Security", "", "security"]);
        assert_eq!(labels, vec!["ai", "security"]);
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(chrono::Duration::seconds(42)), "42s");
        assert_eq!(format_duration(chrono::Duration::minutes(90)), "1h 30m");
        assert_eq!(format_duration(chrono::Duration::hours(49)), "2d 1h");
    }
}
