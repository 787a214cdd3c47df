//! Lexical tokenization for BM25.
//!
//! [`MixedScriptTokenizer`] handles text that mixes CJK and alphabetic
//! scripts without a dictionary: Latin-like alphanumeric runs become
//! lower-cased words, and runs of Han, Kana or Hangul characters become
//! unigrams plus adjacent bigrams. Everything else is a separator.

/// A lexical tokenizer. The same tokenizer must be used at build and query
/// time; its name is persisted alongside the index.
pub trait Tokenizer: Send + Sync {
    fn name(&self) -> &str;

    fn tokenize(&self, text: &str) -> Vec<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MixedScriptTokenizer;

impl MixedScriptTokenizer {
    pub const NAME: &'static str = "mixed-script-v1";

    pub fn new() -> Self {
        Self
    }
}

impl Tokenizer for MixedScriptTokenizer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn tokenize(&self, text: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut word = String::new();
        let mut cjk_run: Vec<char> = Vec::new();

        for ch in text.chars() {
            if is_cjk(ch) {
                flush_word(&mut word, &mut tokens);
                cjk_run.push(ch);
            } else if ch.is_alphanumeric() {
                flush_cjk(&mut cjk_run, &mut tokens);
                word.extend(ch.to_lowercase());
            } else {
                flush_word(&mut word, &mut tokens);
                flush_cjk(&mut cjk_run, &mut tokens);
            }
        }
        flush_word(&mut word, &mut tokens);
        flush_cjk(&mut cjk_run, &mut tokens);
        tokens
    }
}

fn flush_word(word: &mut String, tokens: &mut Vec<String>) {
    if !word.is_empty() {
        tokens.push(std::mem::take(word));
    }
}

fn flush_cjk(run: &mut Vec<char>, tokens: &mut Vec<String>) {
    for (idx, &ch) in run.iter().enumerate() {
        tokens.push(ch.to_string());
        if let Some(&next) = run.get(idx + 1) {
            tokens.push([ch, next].iter().collect());
        }
    }
    run.clear();
}

fn is_cjk(ch: char) -> bool {
    matches!(ch,
        '\u{3040}'..='\u{309F}'     // Hiragana
        | '\u{30A0}'..='\u{30FF}'   // Katakana
        | '\u{3400}'..='\u{4DBF}'   // CJK Extension A
        | '\u{4E00}'..='\u{9FFF}'   // CJK Unified Ideographs
        | '\u{AC00}'..='\u{D7AF}'   // Hangul Syllables
        | '\u{F900}'..='\u{FAFF}'   // CJK Compatibility Ideographs
        | '\u{20000}'..='\u{2A6DF}' // CJK Extension B
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latin_words_lowercased() {
        let tokens = MixedScriptTokenizer.tokenize("Hybrid-Search, BM25 and FAISS!");
        assert_eq!(tokens, vec!["hybrid", "search", "bm25", "and", "faiss"]);
    }

    #[test]
    fn test_cjk_unigrams_and_bigrams() {
        let tokens = MixedScriptTokenizer.tokenize("算力网");
        assert_eq!(tokens, vec!["算", "算力", "力", "力网", "网"]);
    }

    #[test]
    fn test_mixed_script() {
        let tokens = MixedScriptTokenizer.tokenize("5G专网，部署在edge节点。");
        assert_eq!(
            tokens,
            vec!["5g", "专", "专网", "网", "部", "部署", "署", "署在", "在", "edge", "节", "节点", "点"]
        );
    }

    #[test]
    fn test_punctuation_only() {
        assert!(MixedScriptTokenizer.tokenize("，。!? ...").is_empty());
        assert!(MixedScriptTokenizer.tokenize("").is_empty());
    }

    #[test]
    fn test_name() {
        assert_eq!(MixedScriptTokenizer::new().name(), "mixed-script-v1");
    }
}
