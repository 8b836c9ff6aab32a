//! Prompt templates
//!
//! A template is plain text with two placeholders:
//!
//! - `{context}`: the record's context field (the code sample by default)
//! - `{original}`: the text being enhanced
//!
//! Substitution is single-pass, so placeholder-like text inside a record is
//! left alone.

use crate::error::{PipelineError, Result};
use std::path::Path;

pub const CONTEXT_PLACEHOLDER: &str = "{context}";
pub const ORIGINAL_PLACEHOLDER: &str = "{original}";

const DEFAULT_TEMPLATE: &str = r#"You are a cybersecurity expert. Improve the following vulnerability explanation by:
1. Fixing grammar and sentence structure
2. Making the description more clear and descriptive
3. Ensuring proper technical explanations while keeping the same structure
4. Maintaining all technical details (CWE numbers, line numbers, function names)
5. Not deviating from the original description
6. Provide only the description no fluff or other things like intro

The vulnerability relates to this code:
```c/cpp
{context}
```

Original vulnerability description:
{original}

Enhanced description:"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    text: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            text: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplate {
    /// Template from text; it must reference `{original}`
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        if !text.contains(ORIGINAL_PLACEHOLDER) {
            return Err(PipelineError::configuration(format!(
                "prompt template must contain the {} placeholder",
                ORIGINAL_PLACEHOLDER
            )));
        }
        Ok(Self { text })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::configuration(format!(
                "cannot read prompt template {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::new(text)
    }

    pub fn render(&self, context: &str, original: &str) -> String {
        let mut out = String::with_capacity(self.text.len() + context.len() + original.len());
        let mut rest = self.text.as_str();

        while let Some(pos) = rest.find('{') {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];
            if tail.starts_with(CONTEXT_PLACEHOLDER) {
                out.push_str(context);
                rest = &tail[CONTEXT_PLACEHOLDER.len()..];
            } else if tail.starts_with(ORIGINAL_PLACEHOLDER) {
                out.push_str(original);
                rest = &tail[ORIGINAL_PLACEHOLDER.len()..];
            } else {
                out.push('{');
                rest = &tail[1..];
            }
        }
        out.push_str(rest);
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_template_substitutes_both_fields() {
        let prompt = PromptTemplate::default().render("gets(buf);", "buffer overflow in gets");

        assert!(prompt.starts_with("You are a cybersecurity expert."));
        assert!(prompt.contains("```c/cpp\ngets(buf);\n```"));
        assert!(prompt.contains("Original vulnerability description:\nbuffer overflow in gets"));
        assert!(prompt.ends_with("Enhanced description:"));
    }

    #[test]
    fn test_record_text_is_not_reexpanded() {
        let template = PromptTemplate::new("{context} | {original}").unwrap();
        let prompt = template.render("uses {original}", "{context} braces");

        assert_eq!(prompt, "uses {original} | {context} braces");
    }

    #[test]
    fn test_other_braces_are_kept() {
        let template = PromptTemplate::new("struct {x} -> {original}").unwrap();
        assert_eq!(template.render("", "y"), "struct {x} -> y");
    }

    #[test]
    fn test_template_without_original_is_rejected() {
        let err = PromptTemplate::new("Rewrite {context}").unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("prompt.txt");
        std::fs::write(&path, "Improve: {original}").unwrap();

        let template = PromptTemplate::from_file(&path).unwrap();
        assert_eq!(template.render("", "text"), "Improve: text");
    }
}
