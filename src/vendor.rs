/// Maximum number of tokens kept in a vendor pattern.
const MAX_TOKENS: usize = 3;
/// Tokens shorter than this are dropped.
const MIN_TOKEN_LEN: usize = 2;

/// Normalize a bank description into a short lowercase vendor key, e.g.
/// `"POS SCREWFIX IRELAND 1234"` becomes `"pos screwfix ireland"`.
///
/// Only ASCII letters, digits and whitespace survive; everything else
/// (punctuation, accented letters) is removed before splitting.
pub fn extract_vendor_pattern(description: &str) -> String {
    let cleaned: String = description
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace())
        .collect();

    cleaned
        .split_whitespace()
        .filter(|token| token.len() >= MIN_TOKEN_LEN)
        .take(MAX_TOKENS)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_description() {
        assert_eq!(extract_vendor_pattern(""), "");
        assert_eq!(extract_vendor_pattern("   "), "");
    }

    #[test]
    fn test_short_tokens_skipped() {
        assert_eq!(extract_vendor_pattern("A B CD Big Company"), "cd big company");
        assert_eq!(extract_vendor_pattern("a b c"), "");
    }

    #[test]
    fn test_keeps_first_three_tokens() {
        assert_eq!(
            extract_vendor_pattern("POS SCREWFIX IRELAND 1234 DUBLIN"),
            "pos screwfix ireland"
        );
    }

    #[test]
    fn test_strips_punctuation_and_non_ascii() {
        assert_eq!(extract_vendor_pattern("Café*Nero, Ltd."), "cafnero ltd");
        assert_eq!(extract_vendor_pattern("AMZN Mktp IE*2K4"), "amzn mktp ie2k4");
    }

    #[test]
    fn test_pattern_shape_holds_for_varied_inputs() {
        let inputs = [
            "VDP-TESCO STORES 3245",
            "x",
            "!!!",
            "Ünïcödé ßtraße 12",
            "  multiple   spaces\tand\nnewlines here too ",
            "1 2 3 45 678",
        ];
        for input in inputs {
            let pattern = extract_vendor_pattern(input);
            let tokens: Vec<&str> = pattern.split(' ').filter(|t| !t.is_empty()).collect();
            assert!(tokens.len() <= MAX_TOKENS, "{input:?} -> {pattern:?}");
            for token in tokens {
                assert!(token.len() >= MIN_TOKEN_LEN, "{input:?} -> {pattern:?}");
                assert!(token
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
            }
            assert_eq!(pattern, pattern.trim());
        }
    }
}
