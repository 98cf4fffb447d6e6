//! Fixed-size overlapping character windows.

use searchai_core::{Error, Result};

/// Number of windows [`chunk_text`] yields for a text of `len` characters.
pub fn chunk_count(len: usize, size: usize, overlap: usize) -> usize {
    if len == 0 || size == 0 || overlap >= size {
        return 0;
    }
    if len <= overlap {
        return 1;
    }
    (len - overlap).div_ceil(size - overlap)
}

/// Split `text` into windows of `size` characters, each sharing `overlap` characters with its
/// predecessor. The last window may be shorter. Stops once a window reaches the end of the text.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Result<Vec<String>> {
    if size == 0 {
        return Err(Error::InvalidConfig("chunk size must be >= 1".to_string()));
    }
    if overlap >= size {
        return Err(Error::InvalidConfig(format!(
            "chunk overlap ({overlap}) must be smaller than chunk size ({size})"
        )));
    }
    let chars: Vec<char> = text.chars().collect();
    let step = size - overlap;
    let mut out = Vec::with_capacity(chunk_count(chars.len(), size, overlap));
    let mut start = 0usize;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        out.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn short_and_empty_text() {
        assert!(chunk_text("", 10, 2).unwrap().is_empty());
        assert_eq!(chunk_text("ab", 10, 2).unwrap(), vec!["ab".to_string()]);
    }

    #[test]
    fn windows_overlap_by_configured_amount() {
        let got = chunk_text("abcdefghij", 4, 1).unwrap();
        assert_eq!(got, vec!["abcd", "defg", "ghij"]);
    }

    #[test]
    fn multibyte_text_is_split_on_characters() {
        let got = chunk_text("ééééé", 3, 1).unwrap();
        assert_eq!(got, vec!["ééé", "ééé"]);
    }

    #[test]
    fn overlap_must_leave_progress() {
        assert!(chunk_text("abc", 3, 3).is_err());
        assert!(chunk_text("abc", 0, 0).is_err());
    }

    #[test]
    fn default_sizes_on_a_long_text() {
        let text = "x".repeat(2500);
        let chunks = chunk_text(&text, 1000, 100).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.len(), chunk_count(2500, 1000, 100));
        assert_eq!(chunks[2].chars().count(), 700);
    }

    proptest! {
        #[test]
        fn count_and_reconstruction(
            text in "[a-zé ]{0,300}",
            size in 1usize..40,
            overlap_frac in 0usize..100,
        ) {
            let overlap = (size - 1) * overlap_frac / 100;
            let chunks = chunk_text(&text, size, overlap).unwrap();
            let len = text.chars().count();
            prop_assert_eq!(chunks.len(), chunk_count(len, size, overlap));

            let mut rebuilt = String::new();
            for (i, c) in chunks.iter().enumerate() {
                prop_assert!(c.chars().count() <= size);
                if i == 0 {
                    rebuilt.push_str(c);
                } else {
                    rebuilt.extend(c.chars().skip(overlap));
                }
            }
            prop_assert_eq!(rebuilt, text);
        }
    }
}
