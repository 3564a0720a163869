//! End-to-end tests driving the public API the way a host application
//! would: construct a repository, attach a fake embedder (a real model
//! backend needs pre-provisioned ONNX assets this environment doesn't have),
//! ingest synthetic documents, and retrieve.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rag_core::config::Config;
use rag_core::error::{RagError, Result};
use rag_core::interfaces::{DocumentSource, Embedder, LLMChat, Message, NullLLMChat, Role};
use rag_core::repository::PromptOutcome;
use rag_core::router::RouterState;
use rag_core::RagRepository;

/// Minimal valid PDF containing a known phrase, built with correct xref
/// offsets so `pdf-extract` can parse it.
fn minimal_pdf_with_phrase(phrase: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    out.extend_from_slice(format!("4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n", content.len(), content).as_bytes());
    let o5 = out.len();
    out.extend_from_slice(b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n");
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o1).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o2).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o3).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o4).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o5).as_bytes());
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

/// Minimal docx (ZIP) containing `word/document.xml` with a `<w:t>` run.
fn minimal_docx_with_text(phrase: &str) -> Vec<u8> {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default()).unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            phrase
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

struct BytesSource {
    bytes: Vec<u8>,
    name: String,
    mime: String,
}

impl DocumentSource for BytesSource {
    fn open(&self) -> Result<Box<dyn std::io::Read + Send>> {
        Ok(Box::new(std::io::Cursor::new(self.bytes.clone())))
    }
    fn display_name(&self) -> &str {
        &self.name
    }
    fn mime_hint(&self) -> &str {
        &self.mime
    }
    fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// A deterministic fake embedder: maps the presence of marker words to
/// distinct unit vectors in a small fixed dimension, so retrieval tests can
/// assert on which synthetic document wins without a real model.
struct MarkerEmbedder {
    dims: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl Embedder for MarkerEmbedder {
    fn dim(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let lower = text.to_lowercase();
        let mut v = vec![0.0f32; self.dims];
        if lower.contains("astronomy") {
            v[0] = 1.0;
        }
        if lower.contains("cooking") {
            v[1] = 1.0;
        }
        if v.iter().all(|x| *x == 0.0) {
            v[2] = 1.0;
        }
        Ok(v)
    }
}

async fn wait_until_ready(repo: &RagRepository, doc_id: &str) {
    for _ in 0..100 {
        if let Ok(docs) = repo.snapshot_docs() {
            if let Some(doc) = docs.iter().find(|d| d.doc_id == doc_id) {
                if doc.status != rag_core::models::DocStatus::Indexing {
                    return;
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("document {} never left INDEXING", doc_id);
}

fn long_text_about(topic: &str) -> String {
    (0..60)
        .map(|i| format!("This paragraph number {} discusses {} in some unique detail each time around.", i, topic))
        .collect::<Vec<_>>()
        .join(" ")
}

#[tokio::test]
async fn ingest_pdf_and_retrieve_by_topic() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.store.root = tmp.path().to_path_buf();
    config.chunking.target_chars = 300;
    config.chunking.overlap_chars = 80;
    let repo = RagRepository::new(&config).unwrap();
    repo.attach_embedder(Arc::new(MarkerEmbedder { dims: 3, calls: AtomicUsize::new(0) })).await;

    let pdf_bytes = minimal_pdf_with_phrase(&long_text_about("astronomy"));
    let docx_bytes = minimal_docx_with_text(&long_text_about("cooking"));

    let sources: Vec<Box<dyn DocumentSource>> = vec![
        Box::new(BytesSource { bytes: pdf_bytes, name: "stars.pdf".into(), mime: rag_core::extract::MIME_PDF.into() }),
        Box::new(BytesSource { bytes: docx_bytes, name: "recipes.docx".into(), mime: rag_core::extract::MIME_DOCX.into() }),
    ];
    let ids = repo.add_documents(sources).await;
    assert_eq!(ids.len(), 2);
    for id in &ids {
        wait_until_ready(&repo, id).await;
    }

    let hits = repo.retrieve("tell me about astronomy", 5, 0.5, None).await.unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().any(|h| h.doc_name == "stars.pdf"));
    assert!(hits.iter().all(|h| h.doc_name != "recipes.docx"));
}

#[tokio::test]
async fn delete_document_removes_it_from_retrieval() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.store.root = tmp.path().to_path_buf();
    let repo = RagRepository::new(&config).unwrap();
    repo.attach_embedder(Arc::new(MarkerEmbedder { dims: 3, calls: AtomicUsize::new(0) })).await;

    let source: Box<dyn DocumentSource> = Box::new(BytesSource {
        bytes: long_text_about("astronomy").into_bytes(),
        name: "notes.txt".into(),
        mime: rag_core::extract::MIME_TXT.into(),
    });
    let ids = repo.add_documents(vec![source]).await;
    wait_until_ready(&repo, &ids[0]).await;

    let before = repo.retrieve("astronomy", 5, 0.5, None).await.unwrap();
    assert!(!before.is_empty());

    repo.remove_document(&ids[0]).await.unwrap();
    let after = repo.retrieve("astronomy", 5, 0.5, None).await.unwrap();
    assert!(after.is_empty());
}

#[tokio::test]
async fn corrupt_source_marks_document_failed_without_blocking_others() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.store.root = tmp.path().to_path_buf();
    let repo = RagRepository::new(&config).unwrap();
    repo.attach_embedder(Arc::new(MarkerEmbedder { dims: 3, calls: AtomicUsize::new(0) })).await;

    let bad: Box<dyn DocumentSource> = Box::new(BytesSource {
        bytes: b"not a pdf".to_vec(),
        name: "broken.pdf".into(),
        mime: rag_core::extract::MIME_PDF.into(),
    });
    let good: Box<dyn DocumentSource> = Box::new(BytesSource {
        bytes: long_text_about("cooking").into_bytes(),
        name: "good.txt".into(),
        mime: rag_core::extract::MIME_TXT.into(),
    });
    let ids = repo.add_documents(vec![bad, good]).await;
    wait_until_ready(&repo, &ids[0]).await;
    wait_until_ready(&repo, &ids[1]).await;

    let docs = repo.snapshot_docs().unwrap();
    let broken = docs.iter().find(|d| d.doc_id == ids[0]).unwrap();
    assert_eq!(broken.status, rag_core::models::DocStatus::Failed);
    let good_doc = docs.iter().find(|d| d.doc_id == ids[1]).unwrap();
    assert_eq!(good_doc.status, rag_core::models::DocStatus::Ready);
}

#[tokio::test]
async fn retrieval_excludes_document_with_mismatched_persisted_dimension() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.store.root = tmp.path().to_path_buf();
    let repo = RagRepository::new(&config).unwrap();
    repo.attach_embedder(Arc::new(MarkerEmbedder { dims: 3, calls: AtomicUsize::new(0) })).await;

    let source: Box<dyn DocumentSource> = Box::new(BytesSource {
        bytes: long_text_about("astronomy").into_bytes(),
        name: "notes.txt".into(),
        mime: rag_core::extract::MIME_TXT.into(),
    });
    let ids = repo.add_documents(vec![source]).await;
    wait_until_ready(&repo, &ids[0]).await;

    // Simulate a model swap: persisted dim (3) no longer matches what a
    // differently-dimensioned embedder would report.
    repo.attach_embedder(Arc::new(MarkerEmbedder { dims: 5, calls: AtomicUsize::new(0) })).await;

    let hits = repo.retrieve("astronomy", 5, -1.0, None).await;
    assert!(hits.unwrap().is_empty());
}

#[test]
fn rag_error_messages_are_stable_for_common_cases() {
    let err = RagError::ExtractionTooShort { chars: 10, min: 350 };
    assert!(err.to_string().contains("350"));
}

/// Drives `RagRepository::build_prompt` end to end against a real store and
/// a `NullLLMChat`: a query that doesn't match any router keyword and scores
/// below threshold must pass the conversation through untouched, while a
/// query that does surface a READY document must come back with the
/// templated document-answering prompt.
#[tokio::test]
async fn build_prompt_skips_and_injects_across_a_real_document() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.store.root = tmp.path().to_path_buf();
    let repo = RagRepository::new(&config).unwrap();
    repo.attach_embedder(Arc::new(MarkerEmbedder { dims: 3, calls: AtomicUsize::new(0) })).await;

    let source: Box<dyn DocumentSource> = Box::new(BytesSource {
        bytes: long_text_about("astronomy").into_bytes(),
        name: "notes.txt".into(),
        mime: rag_core::extract::MIME_TXT.into(),
    });
    let ids = repo.add_documents(vec![source]).await;
    wait_until_ready(&repo, &ids[0]).await;

    let llm = NullLLMChat;
    let mut state = RouterState::new();
    let history = vec![Message { role: Role::System, content: "You are a helpful assistant.".into() }];

    // Nothing in this query matches a router keyword or an indexed document,
    // so the turn must reach the model untouched (Property #10).
    let small_talk = repo.build_prompt(&mut state, &history, "how is the weather today", &llm).await.unwrap();
    let PromptOutcome::Ready(small_talk_prompt) = small_talk else {
        panic!("expected a Ready outcome for small talk");
    };
    let mut expected_turn = history.clone();
    expected_turn.push(Message { role: Role::User, content: "how is the weather today".into() });
    assert_eq!(small_talk_prompt, llm.template(&expected_turn));

    // This query both matches the "document" keyword and retrieves the
    // astronomy document, so the router must inject the templated context.
    let doc_query = "what does the uploaded document say about astronomy?";
    let injected = repo.build_prompt(&mut state, &history, doc_query, &llm).await.unwrap();
    let PromptOutcome::Ready(injected_prompt) = injected else {
        panic!("expected a Ready outcome for the document query");
    };
    assert!(injected_prompt.contains("DOCUMENT CONTEXT (excerpts):"));
    assert!(injected_prompt.contains("### notes.txt"));
    assert!(injected_prompt.contains("Based ONLY on the document excerpts above, please answer this question:"));
    assert!(injected_prompt.contains(doc_query));
    assert!(injected_prompt.contains("I cannot find this in the uploaded documents."));
}

/// A keyword that suggests document intent, with no document ever indexed,
/// must short-circuit to an `Explain` outcome instead of reaching the model.
#[tokio::test]
async fn build_prompt_explains_instead_of_calling_the_model_when_no_document_exists() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.store.root = tmp.path().to_path_buf();
    let repo = RagRepository::new(&config).unwrap();
    repo.attach_embedder(Arc::new(MarkerEmbedder { dims: 3, calls: AtomicUsize::new(0) })).await;

    let llm = NullLLMChat;
    let mut state = RouterState::new();
    let outcome = repo
        .build_prompt(&mut state, &[], "what does the uploaded document say?", &llm)
        .await
        .unwrap();

    match outcome {
        PromptOutcome::Explain(msg) => assert!(msg.contains("No documents have been indexed")),
        PromptOutcome::Ready(_) => panic!("expected Explain when no document has ever been indexed"),
    }
}
