use crate::config::OutputParsingConfig;
use crate::error::ProviderError;
use crate::llm::ChatModel;
use crate::models::ChatMessage;
use crate::prompts::{messages_to_text, vars, ChatPromptTemplate, PromptTemplate, PromptVars};
use regex::Regex;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

pub const DEFAULT_FORMAT_KEY: &str = "format_instructions";

const FIX_PROMPT: &str = "Instructions:
--------------
{instructions}
--------------
Completion:
--------------
{completion}
--------------

Above, the Completion did not satisfy the constraints given in the Instructions.
Error:
--------------
{error}
--------------

Please try again. Please only respond with an answer that satisfies the constraints laid out in the Instructions:";

const RETRY_PROMPT: &str = "Prompt:
{prompt}
Completion:
{completion}

Above, the Completion did not satisfy the constraints given in the Prompt.
Please try again:";

/// Types an LLM can be asked to emit as JSON.
pub trait StructuredOutput: DeserializeOwned + Send + Sync {
    /// Human-readable description of the expected JSON, inserted into prompts.
    fn format_instructions() -> String;
}

fn fence_pattern() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```[a-zA-Z]*\s*(.*?)```").ok())
        .as_ref()
}

/// Outermost JSON object or array in `text`, after unwrapping a Markdown fence.
pub fn extract_json(text: &str) -> &str {
    let body = fence_pattern()
        .and_then(|fence| fence.captures(text))
        .and_then(|captures| captures.get(1))
        .map(|inner| inner.as_str())
        .unwrap_or(text)
        .trim();

    let start = body.find(['{', '[']);
    let Some(start) = start else {
        return body;
    };
    let closing = if body[start..].starts_with('{') { '}' } else { ']' };
    match body.rfind(closing) {
        Some(end) if end > start => &body[start..=end],
        _ => &body[start..],
    }
}

#[derive(Debug, Clone, Copy)]
pub struct JsonOutputParser<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> Default for JsonOutputParser<T> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T: StructuredOutput> JsonOutputParser<T> {
    pub fn parse(&self, completion: &str) -> Result<T, ProviderError> {
        serde_json::from_str(extract_json(completion)).map_err(|error| {
            ProviderError::OutputParse(format!(
                "failed to parse {} from completion: {error}",
                short_type_name::<T>()
            ))
        })
    }

    pub fn format_instructions(&self) -> String {
        T::format_instructions()
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

/// Prompt, model and parser, with optional repair and retry rounds when the model's JSON is unusable.
pub struct StructuredChain<T> {
    prompt: ChatPromptTemplate,
    llm: Arc<dyn ChatModel>,
    parser: JsonOutputParser<T>,
    settings: OutputParsingConfig,
    format_key: String,
    fix_prompt: PromptTemplate,
    retry_prompt: PromptTemplate,
}

pub fn build_structured_chain<T: StructuredOutput>(
    prompt: ChatPromptTemplate,
    llm: Arc<dyn ChatModel>,
    settings: OutputParsingConfig,
    format_key: &str,
) -> Result<StructuredChain<T>, ProviderError> {
    Ok(StructuredChain {
        prompt,
        llm,
        parser: JsonOutputParser::default(),
        settings,
        format_key: format_key.to_string(),
        fix_prompt: PromptTemplate::new(FIX_PROMPT)?,
        retry_prompt: PromptTemplate::new(RETRY_PROMPT)?,
    })
}

impl<T: StructuredOutput> StructuredChain<T> {
    pub fn llm(&self) -> &Arc<dyn ChatModel> {
        &self.llm
    }

    pub async fn invoke(&self, mut inputs: PromptVars) -> Result<T, ProviderError> {
        inputs
            .entry(self.format_key.clone())
            .or_insert_with(T::format_instructions);
        let messages = self.prompt.format_messages(&inputs, &[])?;

        let completion = self.llm.complete(&messages).await?;
        let mut last_error = match self.parser.parse(&completion) {
            Ok(parsed) => return Ok(parsed),
            Err(error) => error,
        };

        if self.settings.enable_fix {
            debug!(error = %last_error, "asking model to repair output");
            match self.fix(&completion, &last_error).await {
                Ok(parsed) => return Ok(parsed),
                Err(error) => last_error = error,
            }
        }

        if !self.settings.enable_retry {
            return Err(last_error);
        }

        let prompt_text = messages_to_text(&messages);
        for attempt in 1..=self.settings.retry_max_attempts.max(1) {
            warn!(attempt, error = %last_error, "structured output invalid, retrying");
            match self.retry_once(&messages, &prompt_text).await {
                Ok(parsed) => return Ok(parsed),
                Err(error) => last_error = error,
            }
        }
        Err(last_error)
    }

    async fn fix(&self, completion: &str, error: &ProviderError) -> Result<T, ProviderError> {
        let request = self.fix_prompt.format(&vars([
            ("instructions", &self.parser.format_instructions()),
            ("completion", completion),
            ("error", &error.to_string()),
        ]))?;
        let repaired = self.llm.complete(&[ChatMessage::user(request)]).await?;
        self.parser.parse(&repaired)
    }

    async fn retry_once(
        &self,
        messages: &[ChatMessage],
        prompt_text: &str,
    ) -> Result<T, ProviderError> {
        let completion = self.llm.complete(messages).await?;
        if let Ok(parsed) = self.parser.parse(&completion) {
            return Ok(parsed);
        }
        let request = self
            .retry_prompt
            .format(&vars([("prompt", prompt_text), ("completion", &completion)]))?;
        let answer = self.llm.complete(&[ChatMessage::user(request)]).await?;
        self.parser.parse(&answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedChat;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        ok: bool,
    }

    impl StructuredOutput for Verdict {
        fn format_instructions() -> String {
            "Respond with {\"ok\": <bool>}".into()
        }
    }

    fn prompt() -> ChatPromptTemplate {
        ChatPromptTemplate::new(Some("{format_instructions}"), false, "judge: {text}")
            .expect("valid template")
    }

    fn settings(enable_fix: bool, enable_retry: bool, attempts: usize) -> OutputParsingConfig {
        OutputParsingConfig {
            enable_fix,
            enable_retry,
            retry_max_attempts: attempts,
        }
    }

    fn chain(
        llm: &Arc<ScriptedChat>,
        settings: OutputParsingConfig,
    ) -> Result<StructuredChain<Verdict>, ProviderError> {
        build_structured_chain(prompt(), llm.clone(), settings, DEFAULT_FORMAT_KEY)
    }

    #[test]
    fn extracts_json_from_fences_and_chatter() {
        assert_eq!(extract_json("```json\n{\"ok\": true}\n```"), "{\"ok\": true}");
        assert_eq!(extract_json("Sure! [1, 2] done"), "[1, 2]");
        assert_eq!(extract_json("x {\"a\": {\"b\": 1}} y"), "{\"a\": {\"b\": 1}}");
        assert_eq!(extract_json("  nothing  "), "nothing");
    }

    #[tokio::test]
    async fn valid_output_needs_one_call() -> Result<(), ProviderError> {
        let llm = Arc::new(ScriptedChat::new(&["{\"ok\": true}"]));
        let verdict = chain(&llm, settings(true, true, 1))?
            .invoke(vars([("text", "fine")]))
            .await?;
        assert_eq!(verdict, Verdict { ok: true });
        assert_eq!(llm.calls(), 1);
        let system = &llm.prompt(0)[0].content;
        assert!(system.contains("Respond with"));
        Ok(())
    }

    #[tokio::test]
    async fn caller_supplied_instructions_win() -> Result<(), ProviderError> {
        let llm = Arc::new(ScriptedChat::new(&["{\"ok\": false}"]));
        chain(&llm, settings(false, false, 1))?
            .invoke(vars([("text", "x"), ("format_instructions", "CUSTOM")]))
            .await?;
        assert_eq!(llm.prompt(0)[0].content, "CUSTOM");
        Ok(())
    }

    #[tokio::test]
    async fn fixer_repairs_bad_output() -> Result<(), ProviderError> {
        let llm = Arc::new(ScriptedChat::new(&["ok: yes", "{\"ok\": true}"]));
        let verdict = chain(&llm, settings(true, false, 1))?
            .invoke(vars([("text", "x")]))
            .await?;
        assert!(verdict.ok);
        assert_eq!(llm.calls(), 2);
        let fix_request = &llm.prompt(1)[0].content;
        assert!(fix_request.contains("Completion:\n--------------\nok: yes"));
        assert!(fix_request.contains("failed to parse Verdict"));
        Ok(())
    }

    #[tokio::test]
    async fn retry_reinvokes_then_uses_retry_prompt() -> Result<(), ProviderError> {
        let llm = Arc::new(ScriptedChat::new(&["bad", "still bad", "{\"ok\": true}"]));
        let verdict = chain(&llm, settings(false, true, 1))?
            .invoke(vars([("text", "x")]))
            .await?;
        assert!(verdict.ok);
        assert_eq!(llm.calls(), 3);
        let retry_request = &llm.prompt(2)[0].content;
        assert!(retry_request.starts_with("Prompt:\nSystem: Respond with"));
        assert!(retry_request.contains("Completion:\nstill bad"));
        Ok(())
    }

    #[tokio::test]
    async fn exhausted_attempts_return_last_error() -> Result<(), ProviderError> {
        let llm = Arc::new(ScriptedChat::new(&["a", "b", "c", "d", "e", "f"]));
        let result = chain(&llm, settings(true, true, 2))?
            .invoke(vars([("text", "x")]))
            .await;
        assert!(matches!(result, Err(ProviderError::OutputParse(_))));
        assert_eq!(llm.calls(), 6);
        Ok(())
    }

    #[tokio::test]
    async fn no_fix_no_retry_fails_fast() -> Result<(), ProviderError> {
        let llm = Arc::new(ScriptedChat::new(&["nope"]));
        let result = chain(&llm, settings(false, false, 3))?
            .invoke(vars([("text", "x")]))
            .await;
        assert!(result.is_err());
        assert_eq!(llm.calls(), 1);
        Ok(())
    }
}
