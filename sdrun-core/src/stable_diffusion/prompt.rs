use anyhow::{Context, Error, Result};
use tokenizers::Tokenizer;
use tracing::warn;

pub(crate) const END_OF_TEXT: &str = "<|endoftext|>";

/// Looks up the id used to pad prompts up to the text encoder's context length.
pub(crate) fn pad_token_id(tokenizer: &Tokenizer, pad_with: Option<&str>) -> Result<u32> {
    let pad = pad_with.unwrap_or(END_OF_TEXT);
    tokenizer
        .get_vocab(true)
        .get(pad)
        .copied()
        .with_context(|| format!("tokenizer has no `{pad}` token to pad prompts with"))
}

/// Tokenizes `prompt` into exactly `max_len` ids.
pub(crate) fn encode(
    tokenizer: &Tokenizer,
    prompt: &str,
    max_len: usize,
    pad_id: u32,
) -> Result<Vec<u32>> {
    let tokens = tokenizer
        .encode(prompt, true)
        .map_err(Error::msg)?
        .get_ids()
        .to_vec();
    Ok(fit_to_context(tokens, max_len, pad_id))
}

/// Pads short prompts with `pad_id`. Long prompts are cut to `max_len`,
/// keeping the final end-of-text token in the last slot.
pub(crate) fn fit_to_context(mut tokens: Vec<u32>, max_len: usize, pad_id: u32) -> Vec<u32> {
    if tokens.len() > max_len && max_len > 0 {
        warn!(
            "Prompt is {} tokens long, truncating to {max_len}",
            tokens.len()
        );
        let last = tokens[tokens.len() - 1];
        tokens.truncate(max_len - 1);
        tokens.push(last);
    }
    tokens.resize(max_len, pad_id);
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_prompts_are_padded() {
        assert_eq!(fit_to_context(vec![1, 5, 2], 6, 0), vec![1, 5, 2, 0, 0, 0]);
    }

    #[test]
    fn exact_length_is_untouched() {
        assert_eq!(fit_to_context(vec![1, 5, 6, 2], 4, 0), vec![1, 5, 6, 2]);
    }

    #[test]
    fn long_prompts_keep_end_token() {
        let tokens = vec![49406, 10, 11, 12, 13, 14, 49407];
        assert_eq!(fit_to_context(tokens, 4, 49407), vec![49406, 10, 11, 49407]);
    }

    #[test]
    fn empty_prompt_is_all_padding() {
        assert_eq!(fit_to_context(Vec::new(), 3, 7), vec![7, 7, 7]);
    }
}
