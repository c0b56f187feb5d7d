use crate::widgets::{WIDGET_PREFIX, WIDGET_SUFFIX};

/// Byte ranges of rendered widget tokens in `text`. An unterminated token
/// runs to the end.
fn widget_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut from = 0;
    while let Some(offset) = text[from..].find(WIDGET_PREFIX) {
        let start = from + offset;
        let end = text[start..]
            .find(WIDGET_SUFFIX)
            .map_or(text.len(), |i| start + i + WIDGET_SUFFIX.len());
        spans.push((start, end));
        from = end;
    }
    spans
}

/// Split outgoing text into words for paced delivery. Each piece keeps its
/// trailing space, so the pieces concatenate back to `text`. Widget tokens
/// are never split.
pub fn split_words(text: &str) -> Vec<&str> {
    let spans = widget_spans(text);
    let inside_widget = |i: usize| spans.iter().any(|&(start, end)| i >= start && i < end);

    let mut words = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if c == ' ' && !inside_widget(i) {
            words.push(&text[start..=i]);
            start = i + 1;
        }
    }
    if start < text.len() {
        words.push(&text[start..]);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_words_keep_their_spaces() {
        assert_eq!(split_words("Hello there, friend."), vec!["Hello ", "there, ", "friend."]);
        assert_eq!(split_words("trailing "), vec!["trailing "]);
        assert!(split_words("").is_empty());
    }

    #[test]
    fn test_widget_tokens_stay_whole() {
        let token = format!("{}{{\"content\":{{\"name\":\"Big Tea\"}},\"type\":\"timer\"}}{}", WIDGET_PREFIX, WIDGET_SUFFIX);
        let text = format!("Timer set: {} Enjoy it", token);
        let with_space = format!("{} ", token);
        assert_eq!(split_words(&text), vec!["Timer ", "set: ", with_space.as_str(), "Enjoy ", "it"]);
    }

    proptest! {
        #[test]
        fn prop_words_concatenate_back(text in "[a-z <!>{}:\"]{0,40}") {
            let words = split_words(&text);
            prop_assert_eq!(words.concat(), text.clone());
            prop_assert!(words.iter().all(|w| !w.is_empty()));
        }
    }
}
