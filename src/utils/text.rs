pub fn strip_code_blocks(text: &str) -> String {
    let text = text.trim();
    if text.starts_with("```") {
        let lines: Vec<&str> = text.lines().collect();
        if lines.len() >= 2 && lines[lines.len() - 1].trim().starts_with("```") {
            return lines[1..lines.len() - 1].join("\n");
        }
    }
    text.to_string()
}

fn is_banner(line: &str) -> bool {
    let line = line.trim();
    line.len() > 6 && line.starts_with("=== ") && line.ends_with(" ===")
}

/// Drops leading and trailing `=== ... ===` banner lines.
pub fn strip_banners(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut start = 0;
    let mut end = lines.len();
    while start < end && (lines[start].trim().is_empty() || is_banner(lines[start])) {
        start += 1;
    }
    while end > start && (lines[end - 1].trim().is_empty() || is_banner(lines[end - 1])) {
        end -= 1;
    }
    lines[start..end].join("\n")
}

/// First `max_chars` characters, never splitting a code point.
pub fn excerpt(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Last `max_chars` characters, never splitting a code point.
pub fn tail(text: &str, max_chars: usize) -> &str {
    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }
    match text.char_indices().nth(total - max_chars) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

pub fn word_count(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_blocks() {
        assert_eq!(strip_code_blocks("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_blocks("[1]"), "[1]");
    }

    #[test]
    fn test_strip_banners() {
        let text = "=== NOVEL OUTLINE - REFINED ===\n\nChapter 1\nChapter 2\n\n=== END OUTLINE ===\n";
        assert_eq!(strip_banners(text), "Chapter 1\nChapter 2");
        assert_eq!(strip_banners("plain"), "plain");
        assert_eq!(strip_banners("=== ONLY ==="), "");
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("héllo", 2), "hé");
        assert_eq!(excerpt("short", 100), "short");
        assert_eq!(tail("héllo", 4), "éllo");
        assert_eq!(tail("short", 100), "short");
    }

    #[test]
    fn test_word_count() {
        assert_eq!(word_count("  one two\nthree\t four "), 4);
        assert_eq!(word_count(""), 0);
    }
}
