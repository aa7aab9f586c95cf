//! Prompt text for the three vision tasks.
//!
//! Kept apart from [`crate::pipeline::vision`] so prompt wording can change
//! without touching retry or dispatch logic, and so tests can inspect it.

/// Instructions for turning raw extracted page text into speakable prose.
///
/// The page image is attached to the same request as ground truth.
pub const CLEANUP_INSTRUCTIONS: &str = r#"The text below was extracted from one page of a book. The page image is attached.

Rewrite the text so that it can be read aloud by a text-to-speech engine:

1. FIDELITY
   - Keep every sentence of the original passage, in order
   - Fix only errors introduced by text extraction (broken words, stray characters)
   - Do NOT summarise, comment, or add content of your own

2. LAYOUT
   - Ignore figures and images; they are described separately
   - Drop running chapter titles at the top of the page when they interrupt the text

3. SPEAKABILITY
   - The engine reads English words and numbers only
   - Spell out mathematical symbols, brackets and special characters
   - Announce tables and equations before reading them ("The following table shows ...")
   - If something cannot be clarified, leave it as it is

4. OUTPUT
   - Output ONLY the rewritten text, no markdown, no preamble"#;

/// Build the OCR-cleanup prompt for a page.
pub fn cleanup_prompt(raw_text: &str) -> String {
    format!("{CLEANUP_INSTRUCTIONS}\n\nText:\n\"\"\"{raw_text}\"\"\"")
}

/// Build the prompt asking for a description of one figure.
pub fn figure_description_prompt(figure: &str, page_text: &str) -> String {
    format!(
        "Describe the illustration labelled Figure {figure} on the attached page, \
in detail, and explain how it relates to the passage below and why it matters to it. \
Write the description as it would appear in a book for listeners who cannot see the \
page: say \"the figure shows\" rather than \"the image you shared\".\n\n\
Passage:\n\"\"\"{page_text}\"\"\""
    )
}

/// Build the yes/no prompt confirming a figure is actually on the page.
pub fn figure_presence_prompt(figure: &str) -> String {
    format!(
        "Look at the attached page. Does it contain an illustration labelled Figure {figure}? \
Answer with exactly one word: True or False."
    )
}

/// Interpret the answer to [`figure_presence_prompt`].
///
/// Only the first word counts, so "False. True would require ..." is `false`.
pub fn parse_presence(answer: &str) -> bool {
    let first = answer
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| !w.is_empty())
        .unwrap_or("");
    matches!(first.to_ascii_lowercase().as_str(), "true" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompts_embed_their_inputs() {
        assert!(cleanup_prompt("raw page").contains("\"\"\"raw page\"\"\""));
        let p = figure_description_prompt("2.3", "The curve rises.");
        assert!(p.contains("Figure 2.3"));
        assert!(p.contains("The curve rises."));
        assert!(figure_presence_prompt("1.1").contains("Figure 1.1"));
    }

    #[test]
    fn presence_answers() {
        assert!(parse_presence("True"));
        assert!(parse_presence("  true."));
        assert!(parse_presence("**True**"));
        assert!(parse_presence("Yes, it does."));
        assert!(!parse_presence("False"));
        assert!(!parse_presence("False. It would be True if ..."));
        assert!(!parse_presence(""));
    }
}
