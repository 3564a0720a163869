//! Decides whether a turn needs document context, assembles the context
//! block, and injects it into the latest user message before the turn is
//! handed to the [`LLMChat`](crate::interfaces::LLMChat) implementation.
//! [`build_prompt`] is the composed entry point; the pieces it chains are
//! also exported individually since callers occasionally need them alone
//! (e.g. a console preview of the context block without a full turn).

use crate::config::RouterConfig;
use crate::interfaces::{LLMChat, Message, Role};
use crate::models::{DocRecord, DocStatus, RetrievalHit};

const CONTEXT_PREAMBLE: &str = "\
DOCUMENT CONTEXT (excerpts):
Use excerpts for factual claims. If missing, say \"Not found in the document context.\"
When citing, mention: [DocName §ChunkNumber].";

const NO_HITS_NOTICE: &str =
    "No relevant excerpts were found for this question. Answer only: \"I cannot find this information in the uploaded documents.\"";

const MAX_WINDOW_MESSAGES: usize = 10;
const SHRINK_WINDOW_MESSAGES: usize = 6;
const SHRINK_WINDOW_CHAR_BUDGET: usize = 18_000;
const MIN_TRUNCATION_PREFIX_CHARS: usize = 80;

/// Tracks which document (if any) the conversation is currently "locked" to,
/// so follow-up questions like "what about section 3?" keep retrieving
/// against the same file without a fresh keyword match.
#[derive(Debug, Default, Clone)]
pub struct RouterState {
    locked_doc_id: Option<String>,
}

impl RouterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn locked_doc_id(&self) -> Option<&str> {
        self.locked_doc_id.as_deref()
    }

    /// Decide whether this turn should retrieve document context, and
    /// against which document (if locked). Updates the lock according to
    /// `best_score` and whether the query matched a configured keyword.
    pub fn decide(&mut self, query: &str, best_score: f64, config: &RouterConfig, doc_id_hint: Option<&str>) -> RouterDecision {
        let keyword_hit = matches_keyword(query, &config.keywords);

        if best_score >= config.inject_score_threshold || keyword_hit {
            if let Some(id) = doc_id_hint {
                self.locked_doc_id = Some(id.to_string());
            }
            return RouterDecision::Inject { locked_doc_id: self.locked_doc_id.clone() };
        }

        if self.locked_doc_id.is_some() {
            if best_score < config.release_score_threshold && !keyword_hit {
                self.locked_doc_id = None;
                return RouterDecision::Skip;
            }
            return RouterDecision::Inject { locked_doc_id: self.locked_doc_id.clone() };
        }

        RouterDecision::Skip
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterDecision {
    Inject { locked_doc_id: Option<String> },
    Skip,
}

fn matches_keyword(query: &str, keywords: &[String]) -> bool {
    let lower = query.to_lowercase();
    keywords.iter().any(|k| lower.contains(&k.to_lowercase()))
}

/// When the user's text suggests document intent but no document is READY,
/// return a user-visible explanation instead of letting the turn reach the
/// model. Returns `None` when retrieval should proceed normally (either the
/// query doesn't reference documents, or at least one READY doc exists).
pub fn explain_if_no_usable_document(query: &str, docs: &[DocRecord], keywords: &[String]) -> Option<String> {
    if !matches_keyword(query, keywords) {
        return None;
    }
    if docs.iter().any(|d| d.status == DocStatus::Ready) {
        return None;
    }
    Some(if docs.iter().any(|d| d.status == DocStatus::Indexing) {
        "Your document is still being indexed. Please try again in a moment.".to_string()
    } else if docs.iter().any(|d| d.status == DocStatus::Failed) {
        "Indexing failed for your document, so I can't search it yet.".to_string()
    } else {
        "No documents have been indexed yet.".to_string()
    })
}

/// Build a citation-tagged context block from retrieval hits, grouped under
/// a `### <DocName>` header per document, capped at `per_doc_cap` excerpts
/// per document, truncated to fit `max_chars` total. Returns `None` if there
/// are no hits or none fit the budget.
pub fn build_context_block(hits: &[RetrievalHit], max_chars: usize, per_doc_cap: usize) -> Option<String> {
    if hits.is_empty() {
        return None;
    }

    let mut by_doc: Vec<(String, Vec<&RetrievalHit>)> = Vec::new();
    for hit in hits {
        match by_doc.iter_mut().find(|(name, _)| name == &hit.doc_name) {
            Some((_, v)) => v.push(hit),
            None => by_doc.push((hit.doc_name.clone(), vec![hit])),
        }
    }

    let mut out = String::new();
    out.push_str(CONTEXT_PREAMBLE);
    out.push('\n');
    let body_start = out.len();

    'docs: for (doc_name, doc_hits) in by_doc {
        let header = format!("\n### {}\n\n", doc_name);
        if out.len() + header.len() > max_chars {
            break;
        }
        out.push_str(&header);

        for hit in doc_hits.into_iter().take(per_doc_cap) {
            let tag = format!("[{} §{}]", doc_name, hit.chunk_index + 1);
            let piece = format!("{} {}\n\n", tag, hit.text.trim());
            if out.len() + piece.len() > max_chars {
                let remaining = max_chars.saturating_sub(out.len());
                if remaining > tag.len() + MIN_TRUNCATION_PREFIX_CHARS {
                    let budget = remaining - tag.len() - 1;
                    let truncated = truncate_at_char_boundary(hit.text.trim(), budget);
                    out.push_str(&tag);
                    out.push(' ');
                    out.push_str(&truncated);
                    out.push_str("...\n\n");
                }
                break 'docs;
            }
            out.push_str(&piece);
        }
    }

    if out.len() == body_start {
        return None;
    }

    Some(out.trim_end().to_string())
}

fn truncate_at_char_boundary(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Replace the latest user message with the full document-answering prompt:
/// the context block, the original question restated, and the fixed answer
/// rules. If there is no user message, appends one.
pub fn inject_context(messages: &mut Vec<Message>, context_block: &str, original_query: &str) {
    let content = format!(
        "{}\n\nBased ONLY on the document excerpts above, please answer this question:\n{}\n\n\
RULES:\n\
1. Use ONLY the information from the excerpts above.\n\
2. If the answer is not in the excerpts, say \"I cannot find this in the uploaded documents.\"\n\
3. Do NOT repeat the excerpts word-for-word.\n\
4. Be concise and direct.",
        context_block, original_query
    );
    if let Some(last_user) = messages.iter_mut().rev().find(|m| m.role == Role::User) {
        last_user.content = content;
    } else {
        messages.push(Message { role: Role::User, content });
    }
}

/// Compose the full C10 pipeline for one turn: decide whether this query
/// needs document context, build and inject the context block (substituting
/// [`NO_HITS_NOTICE`] when the router decided to inject but no hits survived
/// retrieval), window the conversation, and hand the result to `llm`'s
/// template. Callers that want the keyword-intent-but-no-READY-doc message
/// instead of a model turn should check [`explain_if_no_usable_document`]
/// before calling this.
#[allow(clippy::too_many_arguments)]
pub fn build_prompt(
    state: &mut RouterState,
    config: &RouterConfig,
    hits: &[RetrievalHit],
    best_score: f64,
    doc_id_hint: Option<&str>,
    max_context_chars: usize,
    per_doc_cap: usize,
    messages: &[Message],
    user_query: &str,
    llm: &dyn LLMChat,
) -> String {
    let decision = state.decide(user_query, best_score, config, doc_id_hint);

    let mut turn: Vec<Message> = messages.to_vec();
    turn.push(Message { role: Role::User, content: user_query.to_string() });

    if matches!(decision, RouterDecision::Inject { .. }) {
        let context_block = build_context_block(hits, max_context_chars, per_doc_cap)
            .unwrap_or_else(|| format!("{}\n\n{}", CONTEXT_PREAMBLE, NO_HITS_NOTICE));
        inject_context(&mut turn, &context_block, user_query);
    }

    let windowed = window_messages(&turn);
    llm.template(&windowed)
}

/// Window the conversation to the leading system message (if any) plus the
/// last [`MAX_WINDOW_MESSAGES`] non-system messages, shrinking to
/// [`SHRINK_WINDOW_MESSAGES`] when the window would exceed
/// [`SHRINK_WINDOW_CHAR_BUDGET`] characters.
pub fn window_messages(messages: &[Message]) -> Vec<Message> {
    let system: Vec<Message> = messages.iter().take_while(|m| m.role == Role::System).cloned().collect();
    let rest: Vec<&Message> = messages.iter().filter(|m| m.role != Role::System).collect();

    let mut window: Vec<Message> = rest
        .iter()
        .rev()
        .take(MAX_WINDOW_MESSAGES)
        .rev()
        .map(|m| (*m).clone())
        .collect();

    let total_chars: usize = system.iter().chain(window.iter()).map(|m| m.content.len()).sum();
    if total_chars > SHRINK_WINDOW_CHAR_BUDGET && window.len() > SHRINK_WINDOW_MESSAGES {
        let skip = window.len() - SHRINK_WINDOW_MESSAGES;
        window = window.into_iter().skip(skip).collect();
    }

    let mut out = system;
    out.extend(window);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(doc: &str, idx: usize, text: &str) -> RetrievalHit {
        RetrievalHit {
            doc_id: doc.to_string(),
            doc_name: doc.to_string(),
            chunk_id: format!("{}-{}", doc, idx),
            chunk_index: idx,
            text: text.to_string(),
            score: 0.9,
            doc_created_at_ms: 0,
        }
    }

    #[test]
    fn inject_above_threshold_without_keyword() {
        let mut state = RouterState::new();
        let config = RouterConfig {
            inject_score_threshold: 0.35,
            release_score_threshold: 0.25,
            keywords: vec!["document".to_string()],
        };
        let decision = state.decide("tell me more", 0.5, &config, Some("doc-1"));
        assert_eq!(decision, RouterDecision::Inject { locked_doc_id: Some("doc-1".to_string()) });
    }

    #[test]
    fn keyword_match_injects_even_below_threshold() {
        let mut state = RouterState::new();
        let config = RouterConfig {
            inject_score_threshold: 0.35,
            release_score_threshold: 0.25,
            keywords: vec!["resume".to_string()],
        };
        let decision = state.decide("what's in my resume?", 0.1, &config, Some("doc-2"));
        assert_eq!(decision, RouterDecision::Inject { locked_doc_id: Some("doc-2".to_string()) });
    }

    #[test]
    fn lock_released_when_score_drops_and_no_keyword() {
        let mut state = RouterState::new();
        let config = RouterConfig {
            inject_score_threshold: 0.35,
            release_score_threshold: 0.25,
            keywords: vec!["document".to_string()],
        };
        state.decide("about the document", 0.5, &config, Some("doc-3"));
        assert!(state.locked_doc_id().is_some());

        let decision = state.decide("what's the weather", 0.1, &config, None);
        assert_eq!(decision, RouterDecision::Skip);
        assert!(state.locked_doc_id().is_none());
    }

    #[test]
    fn lock_persists_in_the_middle_band() {
        let mut state = RouterState::new();
        let config = RouterConfig {
            inject_score_threshold: 0.35,
            release_score_threshold: 0.25,
            keywords: vec!["document".to_string()],
        };
        state.decide("about the document", 0.5, &config, Some("doc-4"));
        let decision = state.decide("and then?", 0.3, &config, None);
        assert_eq!(decision, RouterDecision::Inject { locked_doc_id: Some("doc-4".to_string()) });
    }

    #[test]
    fn context_block_groups_by_document_and_caps_per_doc() {
        let hits = vec![
            hit("a.pdf", 0, "first"),
            hit("a.pdf", 1, "second"),
            hit("a.pdf", 2, "third"),
            hit("b.pdf", 0, "other"),
        ];
        let block = build_context_block(&hits, 10_000, 2).unwrap();
        assert!(block.starts_with("DOCUMENT CONTEXT (excerpts):"));
        assert!(block.contains("### a.pdf"));
        assert!(block.contains("### b.pdf"));
        assert!(block.contains("[a.pdf §1]"));
        assert!(block.contains("[a.pdf §2]"));
        assert!(!block.contains("[a.pdf §3]"));
        assert!(block.contains("[b.pdf §1]"));
        // a.pdf's header and excerpts must precede b.pdf's
        assert!(block.find("### a.pdf").unwrap() < block.find("### b.pdf").unwrap());
    }

    #[test]
    fn context_block_none_for_no_hits() {
        assert!(build_context_block(&[], 1000, 6).is_none());
    }

    #[test]
    fn context_block_respects_max_chars_budget() {
        let long_text = "x".repeat(5000);
        let hits = vec![hit("a.pdf", 0, &long_text)];
        let block = build_context_block(&hits, 500, 6).unwrap();
        assert!(block.len() <= 600);
    }

    #[test]
    fn inject_context_produces_the_required_template() {
        let mut messages = vec![Message { role: Role::User, content: "what does it say?".to_string() }];
        let context = format!("{}\n\n### a.pdf\n\n[a.pdf §1] some excerpt", CONTEXT_PREAMBLE);
        inject_context(&mut messages, &context, "what does it say?");
        let content = &messages[0].content;
        assert!(content.contains("some excerpt"));
        assert!(content.contains("Based ONLY on the document excerpts above, please answer this question:\nwhat does it say?"));
        assert!(content.contains("I cannot find this in the uploaded documents."));
        assert!(content.ends_with("4. Be concise and direct."));
    }

    #[test]
    fn inject_context_appends_a_user_message_when_none_exists() {
        let mut messages = vec![Message { role: Role::System, content: "sys".to_string() }];
        inject_context(&mut messages, CONTEXT_PREAMBLE, "anything in there?");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::User);
        assert!(messages[1].content.contains("anything in there?"));
    }

    #[test]
    fn window_messages_keeps_leading_system_and_caps_rest() {
        let mut messages = vec![Message { role: Role::System, content: "sys".to_string() }];
        for i in 0..20 {
            messages.push(Message { role: Role::User, content: format!("msg {}", i) });
        }
        let windowed = window_messages(&messages);
        assert_eq!(windowed[0].role, Role::System);
        assert_eq!(windowed.len(), 1 + MAX_WINDOW_MESSAGES);
        assert_eq!(windowed.last().unwrap().content, "msg 19");
    }

    fn doc(status: DocStatus) -> DocRecord {
        DocRecord {
            doc_id: "d1".into(),
            uri: "d1".into(),
            name: "d1.pdf".into(),
            mime: "application/pdf".into(),
            size_bytes: 10,
            created_at_ms: 0,
            status,
            error: None,
            dim: None,
        }
    }

    #[test]
    fn explain_none_when_query_has_no_keyword() {
        let docs = vec![doc(DocStatus::Indexing)];
        assert!(explain_if_no_usable_document("hello", &docs, &["document".to_string()]).is_none());
    }

    #[test]
    fn explain_none_when_a_ready_doc_exists() {
        let docs = vec![doc(DocStatus::Ready)];
        assert!(explain_if_no_usable_document("about my document", &docs, &["document".to_string()]).is_none());
    }

    #[test]
    fn explain_indexing_in_progress() {
        let docs = vec![doc(DocStatus::Indexing)];
        let msg = explain_if_no_usable_document("about my document", &docs, &["document".to_string()]).unwrap();
        assert!(msg.contains("indexed") || msg.contains("indexing"));
    }

    #[test]
    fn explain_indexing_failed() {
        let docs = vec![doc(DocStatus::Failed)];
        let msg = explain_if_no_usable_document("about my document", &docs, &["document".to_string()]).unwrap();
        assert!(msg.contains("failed"));
    }

    #[test]
    fn explain_no_documents_indexed() {
        let msg = explain_if_no_usable_document("about my document", &[], &["document".to_string()]).unwrap();
        assert!(msg.contains("No documents"));
    }

    #[test]
    fn window_messages_shrinks_when_over_char_budget() {
        let mut messages = vec![Message { role: Role::System, content: "sys".to_string() }];
        for i in 0..10 {
            messages.push(Message { role: Role::User, content: "y".repeat(2000) + &i.to_string() });
        }
        let windowed = window_messages(&messages);
        assert_eq!(windowed.len(), 1 + SHRINK_WINDOW_MESSAGES);
    }

    fn test_config() -> RouterConfig {
        RouterConfig {
            inject_score_threshold: 0.35,
            release_score_threshold: 0.25,
            keywords: vec!["document".to_string()],
        }
    }

    /// Testable property: with no hits and a query that doesn't clear the
    /// inject threshold or match a keyword, `build_prompt` skips retrieval
    /// entirely and its output equals `template(messages + [user])`
    /// byte-for-byte.
    #[test]
    fn build_prompt_passes_through_untouched_when_router_skips() {
        use crate::interfaces::NullLLMChat;

        let mut state = RouterState::new();
        let config = test_config();
        let messages = vec![Message { role: Role::System, content: "You are a helpful assistant.".to_string() }];
        let llm = NullLLMChat;

        let actual = build_prompt(&mut state, &config, &[], 0.0, None, 2_400, 6, &messages, "what's the weather", &llm);

        let mut expected_messages = messages.clone();
        expected_messages.push(Message { role: Role::User, content: "what's the weather".to_string() });
        let expected = llm.template(&expected_messages);

        assert_eq!(actual, expected);
    }

    #[test]
    fn build_prompt_injects_templated_context_when_router_decides_inject() {
        use crate::interfaces::NullLLMChat;

        let mut state = RouterState::new();
        let config = test_config();
        let messages = Vec::new();
        let hits = vec![hit("resume.pdf", 0, "five years of Rust experience")];
        let llm = NullLLMChat;

        let prompt = build_prompt(&mut state, &config, &hits, 0.6, Some("doc-1"), 2_400, 6, &messages, "what's in my resume?", &llm);

        assert!(prompt.contains("DOCUMENT CONTEXT (excerpts):"));
        assert!(prompt.contains("### resume.pdf"));
        assert!(prompt.contains("[resume.pdf §1] five years of Rust experience"));
        assert!(prompt.contains("Based ONLY on the document excerpts above, please answer this question:\nwhat's in my resume?"));
        assert_eq!(state.locked_doc_id(), Some("doc-1"));
    }

    #[test]
    fn build_prompt_substitutes_no_hits_notice_when_inject_decided_but_nothing_retrieved() {
        use crate::interfaces::NullLLMChat;

        let mut state = RouterState::new();
        let config = test_config();
        let messages = Vec::new();
        let llm = NullLLMChat;

        let prompt = build_prompt(&mut state, &config, &[], 0.9, Some("doc-1"), 2_400, 6, &messages, "about the document", &llm);

        assert!(prompt.contains("I cannot find this information in the uploaded documents."));
    }
}
