use crate::error::ProviderError;
use crate::models::{ChatMessage, PromptType, Role};
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub type PromptVars = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Var(String),
}

/// A template with `{name}` placeholders; `{{` and `}}` produce literal braces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    segments: Vec<Segment>,
}

impl PromptTemplate {
    pub fn new(template: &str) -> Result<Self, ProviderError> {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut chars = template.chars().peekable();

        while let Some(ch) = chars.next() {
            match ch {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    text.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    text.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(inner) => name.push(inner),
                            None => {
                                return Err(ProviderError::Prompt(format!(
                                    "unclosed placeholder '{{{name}' in template"
                                )))
                            }
                        }
                    }
                    let name = name.trim().to_string();
                    if name.is_empty() {
                        return Err(ProviderError::Prompt("empty placeholder in template".into()));
                    }
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    segments.push(Segment::Var(name));
                }
                '}' => {
                    return Err(ProviderError::Prompt(
                        "single '}' in template; use '}}' for a literal brace".into(),
                    ))
                }
                other => text.push(other),
            }
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }
        Ok(Self { segments })
    }

    pub fn variables(&self) -> BTreeSet<String> {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Var(name) => Some(name.clone()),
                Segment::Text(_) => None,
            })
            .collect()
    }

    pub fn format(&self, vars: &PromptVars) -> Result<String, ProviderError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Var(name) => {
                    let value = vars.get(name).ok_or_else(|| {
                        ProviderError::Prompt(format!("missing prompt variable '{name}'"))
                    })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

/// System template, optional prior conversation, then the human turn.
#[derive(Debug, Clone)]
pub struct ChatPromptTemplate {
    system: Option<PromptTemplate>,
    with_history: bool,
    human: PromptTemplate,
}

impl ChatPromptTemplate {
    pub fn new(
        system: Option<&str>,
        with_history: bool,
        human: &str,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            system: system.map(PromptTemplate::new).transpose()?,
            with_history,
            human: PromptTemplate::new(human)?,
        })
    }

    pub fn variables(&self) -> BTreeSet<String> {
        let mut vars = self.human.variables();
        if let Some(system) = &self.system {
            vars.extend(system.variables());
        }
        vars
    }

    pub fn format_messages(
        &self,
        vars: &PromptVars,
        history: &[ChatMessage],
    ) -> Result<Vec<ChatMessage>, ProviderError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        if let Some(system) = &self.system {
            messages.push(ChatMessage::system(system.format(vars)?));
        }
        if self.with_history {
            messages.extend(history.iter().cloned());
        }
        messages.push(ChatMessage::user(self.human.format(vars)?));
        Ok(messages)
    }
}

/// Flattens messages into `Role: content` lines.
pub fn messages_to_text(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|message| {
            let role = match message.role {
                Role::System => "System",
                Role::User => "Human",
                Role::Assistant => "AI",
            };
            format!("{role}: {}", message.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

const DOCUMENT_ANALYSIS_SYSTEM: &str = "You are a highly capable assistant trained to analyze and summarize documents.
Return ONLY valid JSON matching the exact schema below.

{format_instructions}";

const DOCUMENT_ANALYSIS_HUMAN: &str = "Analyze this document:
{document_text}";

const DOCUMENT_COMPARISON_HUMAN: &str = "You will be provided with content from two PDFs. Your tasks are as follows:

1. Compare the content in the two PDFs.
2. Identify the differences and note down the page number.
3. The output you provide must be a page-wise comparison.
4. If a page has no change, mention 'NO CHANGE'.

Input documents:

{combined_docs}

Your response should follow this format:

{format_instruction}";

const CONTEXTUALIZE_SYSTEM: &str = "Given a conversation history and the most recent user query, rewrite the query as a standalone question that makes sense without relying on the previous context. Do not provide an answer; only reformulate the question if necessary, otherwise return it unchanged.";

const CONTEXT_QA_SYSTEM: &str = "You are an assistant designed to answer questions using the provided context. Rely only on the retrieved information to form your response. If the answer is not found in the context, respond with \"I don't know.\" Keep your answer concise and no longer than three sentences.

{context}";

#[derive(Debug, Clone)]
pub struct PromptRegistry {
    prompts: HashMap<PromptType, ChatPromptTemplate>,
}

impl PromptRegistry {
    pub fn builtin() -> Result<Self, ProviderError> {
        let prompts = [
            (
                PromptType::DocumentAnalysis,
                ChatPromptTemplate::new(Some(DOCUMENT_ANALYSIS_SYSTEM), false, DOCUMENT_ANALYSIS_HUMAN)?,
            ),
            (
                PromptType::DocumentComparison,
                ChatPromptTemplate::new(None, false, DOCUMENT_COMPARISON_HUMAN)?,
            ),
            (
                PromptType::ContextualizeQuestion,
                ChatPromptTemplate::new(Some(CONTEXTUALIZE_SYSTEM), true, "{input}")?,
            ),
            (
                PromptType::ContextQa,
                ChatPromptTemplate::new(Some(CONTEXT_QA_SYSTEM), true, "{input}")?,
            ),
        ]
        .into_iter()
        .collect();
        Ok(Self { prompts })
    }

    pub fn get(&self, kind: PromptType) -> Result<&ChatPromptTemplate, ProviderError> {
        self.prompts
            .get(&kind)
            .ok_or_else(|| ProviderError::Prompt(format!("no prompt registered for {}", kind.as_str())))
    }
}

pub fn vars<const N: usize>(pairs: [(&str, &str); N]) -> PromptVars {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}
