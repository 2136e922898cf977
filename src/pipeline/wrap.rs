//! Greedy character-granularity caption wrapping.
//!
//! Captions are mostly CJK text with no spaces between words, so lines are
//! broken between any two characters rather than at word boundaries: keep
//! appending characters while the line fits, and when the next character would
//! overflow a non-empty line, start a new line with it.

/// Measures the rendered width of a string in pixels.
pub trait TextMeasure {
    fn measure(&self, text: &str) -> f32;
}

/// Wrap `text` to `max_width` pixels.
///
/// Always returns at least one line; an empty caption yields `[""]`. A
/// character wider than `max_width` still gets a line of its own.
pub fn wrap_caption(text: &str, max_width: f32, measure: &dyn TextMeasure) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        let mut candidate = current.clone();
        candidate.push(ch);
        if measure.measure(&candidate) > max_width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
            current.push(ch);
        } else {
            current = candidate;
        }
    }
    lines.push(current);
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every character is `advance` pixels wide, except `W` which is `wide`.
    struct FixedAdvance {
        advance: f32,
        wide: f32,
    }

    impl TextMeasure for FixedAdvance {
        fn measure(&self, text: &str) -> f32 {
            text.chars()
                .map(|c| if c == 'W' { self.wide } else { self.advance })
                .sum()
        }
    }

    const M: FixedAdvance = FixedAdvance {
        advance: 10.0,
        wide: 150.0,
    };

    #[test]
    fn empty_caption_is_one_empty_line() {
        assert_eq!(wrap_caption("", 100.0, &M), vec![String::new()]);
    }

    #[test]
    fn short_caption_fits_on_one_line() {
        assert_eq!(wrap_caption("abc", 100.0, &M), vec!["abc"]);
    }

    #[test]
    fn exact_fit_does_not_break() {
        // 10 chars × 10px == 100px: not greater than the width.
        assert_eq!(wrap_caption("0123456789", 100.0, &M), vec!["0123456789"]);
    }

    #[test]
    fn breaks_at_predicted_points() {
        let text = "一二三四五六七八九十甲乙丙丁戊己庚辛壬癸子丑寅";
        let lines = wrap_caption(text, 100.0, &M);
        assert_eq!(lines, vec!["一二三四五六七八九十", "甲乙丙丁戊己庚辛壬癸", "子丑寅"]);
    }

    #[test]
    fn single_over_wide_character_keeps_its_own_line() {
        assert_eq!(wrap_caption("W", 100.0, &M), vec!["W"]);
    }

    #[test]
    fn over_wide_character_mid_caption() {
        assert_eq!(wrap_caption("abWcd", 100.0, &M), vec!["ab", "W", "cd"]);
    }

    #[test]
    fn no_characters_are_dropped() {
        let text = "abcdefghijklmnopqrstuvwxyzW0123";
        let lines = wrap_caption(text, 55.0, &M);
        assert_eq!(lines.concat(), text);
        assert!(lines.iter().all(|l| !l.is_empty()));
    }
}
