use std::sync::{Mutex, OnceLock};
use tiktoken_rs::CoreBPE;

/// BPE vocabularies used by OpenAI models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAiEncoding {
    O200kBase,
    Cl100kBase,
}

/// gpt-4o, gpt-4.1 and o1 models use `o200k_base`; everything else (GPT-3.5/4, text-embedding-3) `cl100k_base`.
pub fn openai_encoding_for_model(model: &str) -> OpenAiEncoding {
    let name = model.to_lowercase();
    if name.contains("gpt-4o") || name.contains("gpt-4.1") || name.contains("o1") {
        OpenAiEncoding::O200kBase
    } else {
        OpenAiEncoding::Cl100kBase
    }
}

fn encoder(encoding: OpenAiEncoding) -> Option<&'static Mutex<CoreBPE>> {
    static O200K: OnceLock<Option<Mutex<CoreBPE>>> = OnceLock::new();
    static CL100K: OnceLock<Option<Mutex<CoreBPE>>> = OnceLock::new();
    match encoding {
        OpenAiEncoding::O200kBase => O200K
            .get_or_init(|| tiktoken_rs::o200k_base().ok().map(Mutex::new))
            .as_ref(),
        OpenAiEncoding::Cl100kBase => CL100K
            .get_or_init(|| tiktoken_rs::cl100k_base().ok().map(Mutex::new))
            .as_ref(),
    }
}

fn count_bpe_tokens(model: &str, text: &str) -> Option<usize> {
    let bpe = encoder(openai_encoding_for_model(model))?.lock().ok()?;
    Some(bpe.encode_ordinary(text).len())
}

/// One token per four characters, at least one for non-empty text.
pub fn heuristic_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    (text.chars().count() / 4).max(1)
}

/// Tokens in `text` for the given provider and model.
///
/// OpenAI and Azure OpenAI models are counted with their tiktoken vocabulary;
/// other providers, or a vocabulary that fails to load, use [`heuristic_tokens`].
pub fn count_tokens(provider: &str, model: &str, text: &str) -> usize {
    let provider = provider.to_lowercase();
    if matches!(provider.as_str(), "openai" | "azure-openai" | "azure") {
        if let Some(tokens) = count_bpe_tokens(model, text) {
            return tokens;
        }
    }
    heuristic_tokens(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_has_no_tokens() {
        assert_eq!(count_tokens("openai", "gpt-4o-mini", ""), 0);
        assert_eq!(count_tokens("groq", "llama", ""), 0);
    }

    #[test]
    fn short_text_counts_as_one() {
        assert_eq!(count_tokens("groq", "llama", "hi"), 1);
    }

    #[test]
    fn heuristic_counts_characters_not_bytes() {
        assert_eq!(count_tokens("google", "gemini", "abcdefgh"), 2);
        assert_eq!(count_tokens("google", "gemini", "éééééééé"), 2);
    }

    #[test]
    fn encoding_follows_model_family() {
        assert_eq!(openai_encoding_for_model("gpt-4o-mini"), OpenAiEncoding::O200kBase);
        assert_eq!(openai_encoding_for_model("GPT-4.1"), OpenAiEncoding::O200kBase);
        assert_eq!(openai_encoding_for_model("o1-preview"), OpenAiEncoding::O200kBase);
        assert_eq!(openai_encoding_for_model("gpt-3.5-turbo"), OpenAiEncoding::Cl100kBase);
        assert_eq!(
            openai_encoding_for_model("text-embedding-3-small"),
            OpenAiEncoding::Cl100kBase
        );
    }

    #[test]
    fn openai_providers_use_bpe_counts() {
        // "Hello" "," " world" "!" in both vocabularies; the heuristic gives 3.
        let text = "Hello, world!";
        assert_eq!(heuristic_tokens(text), 3);
        assert_eq!(count_tokens("openai", "gpt-4o-mini", text), 4);
        assert_eq!(count_tokens("azure-openai", "gpt-35-turbo", text), 4);
        assert_eq!(count_tokens("groq", "llama-3.1-8b-instant", text), 3);
    }
}
