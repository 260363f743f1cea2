//! Question preparation, reading prompt assembly and reply cleanup.

use crate::aggregate::Aggregation;
use crate::config::PromptsConfig;
use ollama::Message;
use regex::Regex;
use thiserror::Error;

lazy_static::lazy_static! {
    /// Pictographs plus the joiners, selectors and modifiers that glue
    /// multi-codepoint emoji together.
    static ref EMOJI: Regex = Regex::new(
        r"[\p{Extended_Pictographic}\p{Emoji_Modifier}\x{1F1E6}-\x{1F1FF}\x{200D}\x{FE0E}\x{FE0F}\x{20E3}\x{E0020}-\x{E007F}]"
    )
    .expect("emoji pattern is valid");

    /// Punctuation run following a sentence mark; only the mark is kept.
    static ref REDUNDANT_PUNCTUATION: Regex =
        Regex::new(r"([？?！!。.，,])[，,。.！!？?…、]+").expect("punctuation pattern is valid");

    static ref SENTENCE_BREAK: Regex = Regex::new(r"[\n。]").expect("sentence pattern is valid");
}

const TRAILING_MARKS: &[char] = &['。', ',', '，', '.'];
const LEADING_MARKS: &[char] = &['？', '?', '!', '！'];

/// Problems with the user's question, caught before any external call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuestionError {
    #[error("Question is empty")]
    Empty,

    #[error("Question is {length} characters long, the limit is {max}")]
    TooLong { length: usize, max: usize },
}

/// Remove every emoji from the text.
pub fn strip_emojis(text: &str) -> String {
    EMOJI.replace_all(text, "").into_owned()
}

/// Strip emoji and enforce the length limits on a raw question.
pub fn prepare_question(raw: &str, max_length: usize) -> Result<String, QuestionError> {
    let question = strip_emojis(raw);
    let length = question.chars().count();

    if question.trim().is_empty() {
        return Err(QuestionError::Empty);
    }
    if length > max_length {
        return Err(QuestionError::TooLong {
            length,
            max: max_length,
        });
    }

    Ok(question.trim().to_string())
}

/// The five-turn request that produces the reading.
pub fn reading_messages(
    prompts: &PromptsConfig,
    question: &str,
    astrology: bool,
    aggregation: &Aggregation,
) -> Vec<Message> {
    vec![
        Message::system(prompts.master(astrology)),
        Message::user(format!("{}{question}", prompts.question_preamble)),
        Message::assistant(aggregation.astrology.clone()),
        Message::assistant(aggregation.context.clone()),
        Message::user(format!("{}{question}", prompts.reading_preamble)),
    ]
}

/// Collapse a punctuation run after a sentence mark down to the mark.
pub fn collapse_punctuation(text: &str) -> String {
    REDUNDANT_PUNCTUATION.replace_all(text, "$1").into_owned()
}

/// Turn a raw reply into the ordered sentences shown to the user.
pub fn clean_reply(raw: &str, filler_phrases: &[String]) -> Vec<String> {
    // Removing one filler can form another; repeat until stable.
    let mut text = raw.trim().to_string();
    loop {
        let before = text.len();
        for filler in filler_phrases.iter().filter(|f| !f.is_empty()) {
            text = text.replace(filler.as_str(), "");
        }
        text = collapse_punctuation(&text);
        if text.len() == before {
            break;
        }
    }

    SENTENCE_BREAK
        .split(&text)
        .filter(|candidate| !candidate.trim().is_empty())
        .map(clean_sentence)
        .filter(|sentence| !sentence.is_empty())
        .collect()
}

fn clean_sentence(candidate: &str) -> String {
    candidate
        .trim_end_matches(|c: char| c.is_whitespace() || TRAILING_MARKS.contains(&c))
        .trim_start_matches(|c: char| c.is_whitespace() || LEADING_MARKS.contains(&c))
        .to_string()
}
