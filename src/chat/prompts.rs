//! Prompt templates for the retrieval modes.

use crate::rag::ChunkSearchResult;
use crate::transcript::{Role, TranscriptEntry};

const QA_CHAIN_TEMPLATE: &str = "使用以下上下文来回答最后的问题。如果你不知道答案，就说你不知道，不要试图编造答案。最多使用三句话。尽量使答案简明扼要。总是在回答的最后说“谢谢你的提问！”。
{context}
问题: {question}
";

const CONDENSE_QUESTION_TEMPLATE: &str = "Given the following conversation and a follow up question, rephrase the follow up question to be a standalone question, in its original language.

Chat History:
{chat_history}
Follow Up Input: {question}
Standalone question:";

const CONTEXT_QA_TEMPLATE: &str = "Use the following pieces of context to answer the question at the end. If you don't know the answer, just say that you don't know, don't try to make up an answer.

{context}

Question: {question}
Helpful Answer:";

const DOCUMENT_SEPARATOR: &str = "\n\n";

/// Retrieved chunk texts, best first, separated by blank lines.
pub fn join_context(results: &[ChunkSearchResult]) -> String {
    results
        .iter()
        .map(|r| r.chunk.content.as_str())
        .collect::<Vec<_>>()
        .join(DOCUMENT_SEPARATOR)
}

/// `Human:` / `Assistant:` lines for the condense prompt.
pub fn format_history(entries: &[TranscriptEntry]) -> String {
    entries
        .iter()
        .map(|entry| {
            let speaker = match entry.role {
                Role::User => "Human",
                Role::Assistant => "Assistant",
            };
            format!("{}: {}", speaker, entry.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn qa_chain_prompt(context: &str, question: &str) -> String {
    fill(QA_CHAIN_TEMPLATE, &[("context", context), ("question", question)])
}

pub fn condense_question_prompt(chat_history: &str, question: &str) -> String {
    fill(
        CONDENSE_QUESTION_TEMPLATE,
        &[("chat_history", chat_history), ("question", question)],
    )
}

pub fn context_qa_prompt(context: &str, question: &str) -> String {
    fill(CONTEXT_QA_TEMPLATE, &[("context", context), ("question", question)])
}

// Single pass so placeholder-looking text inside values is left alone.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replacement = after.find('}').and_then(|close| {
            let name = &after[..close];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, close))
        });
        match replacement {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::StoredChunk;

    fn hit(content: &str) -> ChunkSearchResult {
        ChunkSearchResult {
            chunk: StoredChunk {
                chunk_id: content.to_string(),
                content: content.to_string(),
                source: "doc.md".to_string(),
                chunk_index: 0,
                metadata: None,
            },
            score: 0.5,
        }
    }

    #[test]
    fn qa_chain_prompt_embeds_context_and_question() {
        let context = join_context(&[hit("第一段"), hit("第二段")]);
        let prompt = qa_chain_prompt(&context, "什么是 RAG？");

        assert!(prompt.starts_with("使用以下上下文来回答最后的问题。"));
        assert!(prompt.contains("第一段\n\n第二段\n问题: 什么是 RAG？\n"));
        assert!(prompt.contains("谢谢你的提问！"));
    }

    #[test]
    fn condense_prompt_renders_history_lines() {
        let history = format_history(&[
            TranscriptEntry::user("什么是 LLM？", None),
            TranscriptEntry::assistant("大语言模型。", None),
        ]);
        let prompt = condense_question_prompt(&history, "它能做什么？");

        assert!(prompt.contains(
            "Chat History:\nHuman: 什么是 LLM？\nAssistant: 大语言模型。\nFollow Up Input: 它能做什么？\nStandalone question:"
        ));
    }

    #[test]
    fn braces_inside_values_are_not_expanded() {
        let prompt = context_qa_prompt("fn main() { {question} }", "q");
        assert!(prompt.contains("fn main() { {question} }"));
        assert!(prompt.ends_with("Question: q\nHelpful Answer:"));
    }
}
