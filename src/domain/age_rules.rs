//! 分龄文本规则
//!
//! 纯函数，无 I/O：`validate` 报告问题，`clamp` 把文本收敛到年龄段允许的范围

use serde::{Deserialize, Serialize};

use super::book::AgeBand;

/// 年龄段对应的文本限制
#[derive(Debug, Clone, Copy)]
struct BandLimits {
    max_words_per_sentence: usize,
    max_words_per_page: usize,
    screen_words: bool,
}

fn limits(band: AgeBand) -> BandLimits {
    match band {
        AgeBand::Toddler => BandLimits {
            max_words_per_sentence: 8,
            max_words_per_page: 20,
            screen_words: true,
        },
        AgeBand::Early => BandLimits {
            max_words_per_sentence: 12,
            max_words_per_page: 45,
            screen_words: true,
        },
        AgeBand::Middle => BandLimits {
            max_words_per_sentence: 18,
            max_words_per_page: 90,
            screen_words: true,
        },
        AgeBand::Older => BandLimits {
            max_words_per_sentence: 25,
            max_words_per_page: 160,
            screen_words: false,
        },
    }
}

const SCREENED_WORDS: &[&str] = &["kill", "killed", "blood", "bloody", "gun", "guns", "dead", "hate"];

/// 校验结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub ok: bool,
    pub issues: Vec<String>,
}

#[inline]
fn is_sentence_end(ch: char) -> bool {
    matches!(ch, '。' | '？' | '！' | '.' | '?' | '!')
}

/// 按句末标点切句，保留标点
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        current.push(ch);
        if is_sentence_end(ch) {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    sentences
}

fn normalize_word(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

fn is_screened(word: &str) -> bool {
    let normalized = normalize_word(word);
    SCREENED_WORDS.contains(&normalized.as_str())
}

/// 校验文本是否符合年龄段规则
pub fn validate(text: &str, band: AgeBand) -> ValidationReport {
    let limits = limits(band);
    let mut issues = Vec::new();

    let total_words = text.split_whitespace().count();
    if total_words > limits.max_words_per_page {
        issues.push(format!(
            "page has {} words, limit for {} is {}",
            total_words,
            band.as_str(),
            limits.max_words_per_page
        ));
    }

    for (index, sentence) in split_sentences(text).iter().enumerate() {
        let words = sentence.split_whitespace().count();
        if words > limits.max_words_per_sentence {
            issues.push(format!(
                "sentence {} has {} words, limit is {}",
                index + 1,
                words,
                limits.max_words_per_sentence
            ));
        }
    }

    if limits.screen_words {
        for word in text.split_whitespace().filter(|w| is_screened(w)) {
            issues.push(format!("word not suitable for {}: {}", band.as_str(), normalize_word(word)));
        }
    }

    ValidationReport {
        ok: issues.is_empty(),
        issues,
    }
}

/// 将文本收敛到年龄段限制内
///
/// - 移除不适宜词汇
/// - 按整句截断到单页词数上限（首句过长时按词截断）
pub fn clamp(text: &str, band: AgeBand) -> String {
    let limits = limits(band);
    let mut kept: Vec<String> = Vec::new();
    let mut budget = limits.max_words_per_page;

    for sentence in split_sentences(text) {
        let words: Vec<&str> = sentence
            .split_whitespace()
            .filter(|w| !(limits.screen_words && is_screened(w)))
            .collect();
        if words.is_empty() {
            continue;
        }
        if words.len() > budget {
            if kept.is_empty() {
                kept.push(words[..budget].join(" "));
            }
            break;
        }
        budget -= words.len();
        kept.push(words.join(" "));
    }

    kept.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_ok() {
        let report = validate("Lina sees the moon. She smiles!", AgeBand::Toddler);
        assert!(report.ok);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_long_sentence_reported() {
        let text = "Lina and her very small and very curious cat walked all the way to the quiet blue sea.";
        let report = validate(text, AgeBand::Toddler);
        assert!(!report.ok);
        assert!(report.issues[0].contains("sentence 1"));
        assert!(validate(text, AgeBand::Older).ok);
    }

    #[test]
    fn test_screened_words() {
        let report = validate("The dragon wanted to kill time.", AgeBand::Early);
        assert!(!report.ok);
        assert_eq!(clamp("The dragon wanted to kill time.", AgeBand::Early), "The dragon wanted to time.");
        assert_eq!(clamp("The dragon wanted to kill time.", AgeBand::Older), "The dragon wanted to kill time.");
    }

    #[test]
    fn test_clamp_truncates_by_sentence() {
        let sentence = "One two three four five six seven.";
        let text = vec![sentence; 5].join(" ");
        let clamped = clamp(&text, AgeBand::Toddler);
        assert_eq!(clamped.split_whitespace().count(), 14);
        assert!(validate(&clamped, AgeBand::Toddler).ok);
    }

    #[test]
    fn test_clamp_cuts_oversized_first_sentence() {
        let text = (0..30).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        let clamped = clamp(&text, AgeBand::Toddler);
        assert_eq!(clamped.split_whitespace().count(), 20);
    }
}
