//! Optional translation of the missing language channel.
//!
//! Collects every rich-text field whose source channel has text and whose
//! other channel is empty (headings, paragraphs, list items, quotes,
//! captions, section titles, the abstract) and fills the other channel in
//! batches. A failed batch leaves its fields empty; only cancellation stops
//! the pass.

use crate::cancel::CancellationToken;
use crate::config::ParseConfig;
use crate::detect::inline;
use crate::error::PhaseError;
use crate::model::{Document, Language, RichText};
use crate::pipeline::llm::{complete_with_retry, CompletionRequest, RetryPolicy, TextCompletion};
use crate::pipeline::postprocess::extract_json;
use crate::prompts;
use serde_json::Value;
use tracing::{info, warn};

/// Items per completion.
const ITEMS_PER_REQUEST: usize = 20;

/// Outcome of one translation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranslateStats {
    pub translated: usize,
    pub failed_batches: usize,
}

fn target_name(lang: Language) -> &'static str {
    match lang {
        Language::En => "English",
        Language::Zh => "Simplified Chinese",
    }
}

fn needs(rich: &RichText, source: Language) -> bool {
    !rich.channel(source).is_empty() && rich.channel(source.other()).is_empty()
}

/// Source texts in document order: block fields, then section titles, then
/// the abstract.
pub fn collect(document: &mut Document) -> Vec<String> {
    let source = document.language;
    let mut items = Vec::new();
    document.for_each_block_mut(&mut |block| {
        for rich in block.kind.rich_texts_mut() {
            if needs(rich, source) {
                items.push(crate::model::plain_text(rich.channel(source)));
            }
        }
    });
    for section in &mut document.sections {
        section.for_each_section_mut(&mut |s| {
            let (from, to) = title_channels(&s.title, source);
            if !from.trim().is_empty() && to.trim().is_empty() {
                items.push(from.to_string());
            }
        });
    }
    if needs(&document.abstract_text, source) {
        items.push(document.abstract_text.plain_text());
    }
    items
}

fn title_channels(title: &crate::model::LocalizedText, source: Language) -> (&str, &str) {
    match source {
        Language::En => (&title.en, &title.zh),
        Language::Zh => (&title.zh, &title.en),
    }
}

/// Write `translations` back in the order [`collect`] produced them.
/// `None` entries are skipped but still consume their slot.
pub fn apply(document: &mut Document, translations: &[Option<String>]) -> usize {
    let source = document.language;
    let target = source.other();
    let mut slots = translations.iter();
    let mut filled = 0;

    document.for_each_block_mut(&mut |block| {
        for rich in block.kind.rich_texts_mut() {
            if needs(rich, source) {
                if let Some(Some(text)) = slots.next() {
                    *rich.channel_mut(target) = inline::tokenize(text);
                    filled += 1;
                }
            }
        }
    });
    for section in &mut document.sections {
        section.for_each_section_mut(&mut |s| {
            let (from, to) = title_channels(&s.title, source);
            if from.trim().is_empty() || !to.trim().is_empty() {
                return;
            }
            if let Some(Some(text)) = slots.next() {
                match target {
                    Language::En => s.title.en = text.clone(),
                    Language::Zh => s.title.zh = text.clone(),
                }
                filled += 1;
            }
        });
    }
    if needs(&document.abstract_text, source) {
        if let Some(Some(text)) = slots.next() {
            *document.abstract_text.channel_mut(target) = inline::tokenize(text);
            filled += 1;
        }
    }
    filled
}

fn parse_batch(raw: &str, expected: usize) -> Option<Vec<String>> {
    let items = match extract_json(raw)? {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("translations") {
            Some(Value::Array(items)) => items,
            _ => return None,
        },
        _ => return None,
    };
    if items.len() != expected {
        return None;
    }
    items
        .into_iter()
        .map(|v| match v {
            Value::String(s) => Some(s.trim().to_string()),
            _ => None,
        })
        .collect()
}

/// Translate the missing channel of `document` in place.
pub async fn translate_document(
    completion: &dyn TextCompletion,
    document: &mut Document,
    config: &ParseConfig,
    cancel: &CancellationToken,
) -> Result<TranslateStats, PhaseError> {
    let items = collect(document);
    if items.is_empty() {
        return Ok(TranslateStats::default());
    }
    let target = target_name(document.language.other());
    let policy = RetryPolicy::from(config);
    let mut translations: Vec<Option<String>> = Vec::with_capacity(items.len());
    let mut stats = TranslateStats::default();

    for (b, batch) in items.chunks(ITEMS_PER_REQUEST).enumerate() {
        let request = CompletionRequest::new(
            prompts::TRANSLATE_SYSTEM_PROMPT,
            prompts::translate_prompt(target, batch),
            config,
        );
        let parsed = match complete_with_retry(completion, &request, &policy, cancel, "translate").await {
            Ok(raw) => parse_batch(&raw, batch.len()),
            Err(e @ PhaseError::Cancelled { .. }) => return Err(e),
            Err(e) => {
                warn!("translate: batch {} failed: {}", b + 1, e);
                None
            }
        };
        match parsed {
            Some(texts) => translations.extend(texts.into_iter().map(Some)),
            None => {
                stats.failed_batches += 1;
                translations.extend(std::iter::repeat(None).take(batch.len()));
            }
        }
    }

    stats.translated = apply(document, &translations);
    info!(
        "translate: {} of {} fields filled ({} batches failed)",
        stats.translated,
        items.len(),
        stats.failed_batches
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompletionError;
    use crate::model::{Block, BlockKind, InlineNode, LocalizedText, Section};
    use futures::future::BoxFuture;

    struct Echo;

    impl TextCompletion for Echo {
        fn complete<'a>(&'a self, r: &'a CompletionRequest) -> BoxFuture<'a, Result<String, CompletionError>> {
            Box::pin(async move {
                let json = r.user.split_once("Items: ").map(|(_, j)| j).unwrap_or("[]");
                let items: Vec<String> = serde_json::from_str(json).unwrap();
                let out: Vec<String> = items.iter().map(|i| format!("译:{i}")).collect();
                Ok(serde_json::to_string(&out).unwrap())
            })
        }
    }

    struct Down;

    impl TextCompletion for Down {
        fn complete<'a>(&'a self, _r: &'a CompletionRequest) -> BoxFuture<'a, Result<String, CompletionError>> {
            Box::pin(async { Err(CompletionError::Transport("503".into())) })
        }
    }

    fn doc() -> Document {
        Document {
            language: Language::En,
            abstract_text: RichText::in_language(Language::En, vec![InlineNode::text("We study.")]),
            sections: vec![Section {
                id: "sec-1".into(),
                title: LocalizedText {
                    en: "Intro".into(),
                    zh: String::new(),
                },
                content: vec![Block::new(
                    "para-1",
                    BlockKind::Paragraph {
                        content: RichText::in_language(Language::En, vec![InlineNode::text("Hello $x$.")]),
                        align: None,
                    },
                )],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn config() -> ParseConfig {
        ParseConfig::builder().max_retries(0).retry_backoff_ms(1).build().unwrap()
    }

    #[test]
    fn collect_order_is_blocks_titles_abstract() {
        assert_eq!(collect(&mut doc()), vec!["Hello $x$.", "Intro", "We study."]);
    }

    #[tokio::test]
    async fn fills_every_missing_channel() {
        let mut d = doc();
        let stats = translate_document(&Echo, &mut d, &config(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(stats.translated, 3);
        assert_eq!(d.sections[0].title.zh, "译:Intro");
        assert_eq!(d.abstract_text.plain_text(), "We study.");
        assert!(!d.abstract_text.zh.is_empty());
        assert!(collect(&mut d).is_empty());
    }

    #[tokio::test]
    async fn failure_leaves_channel_empty() {
        let mut d = doc();
        let stats = translate_document(&Down, &mut d, &config(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(stats, TranslateStats { translated: 0, failed_batches: 1 });
        assert!(d.sections[0].title.zh.is_empty());
    }

    #[test]
    fn wrong_length_batch_rejected() {
        assert!(parse_batch(r#"["a"]"#, 2).is_none());
        assert_eq!(parse_batch(r#"{"translations": ["a", "b"]}"#, 2).unwrap(), vec!["a", "b"]);
    }
}
