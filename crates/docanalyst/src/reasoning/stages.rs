use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::pipeline::{CancellationFlag, Stage, StageError, StageInput, StageOutput};

static RE_VERDICT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*\**\s*VERDICT\s*:\s*\**\s*(PASS|FAIL)\b").unwrap());

const VERIFY_SYSTEM: &str = "You are a rigorous financial compliance expert. You confirm whether a \
document is a genuine financial report (balance sheet, income statement, earnings report, annual or \
quarterly filing) and never approve non-financial documents.";

const ANALYZE_SYSTEM: &str = "You are an experienced financial analyst. You answer strictly from the \
document's data, distinguish document facts from general context, and note data limitations.";

/// Limits the document text sent to the reasoning service.
fn clip(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => (&text[..idx], true),
        None => (text, false),
    }
}

fn document_block(text: &str, max_chars: usize) -> String {
    let (clipped, truncated) = clip(text, max_chars);
    let mut block = format!("<document>\n{}\n</document>", clipped);
    if truncated {
        block.push_str("\n(The document was truncated.)");
    }
    block
}

pub fn verify_prompt(input: &StageInput<'_>, max_chars: usize) -> String {
    format!(
        "The user wants to ask: {}\n\n\
         Decide whether the following document is a financial document with enough \
         content to answer financial questions. Explain your reasoning briefly, then \
         end with a line of exactly `VERDICT: PASS` or `VERDICT: FAIL`.\n\n{}",
        input.query,
        document_block(input.text, max_chars)
    )
}

pub fn analyze_prompt(input: &StageInput<'_>, max_chars: usize) -> String {
    format!(
        "Analyze the following financial document to answer the user's query: {}\n\n\
         Include an executive summary addressing the query, the key metrics and ratios \
         found in the document, trends where the data allows, strengths and weaknesses, \
         and clear conclusions with data limitations noted.\n\n{}",
        input.query,
        document_block(input.text, max_chars)
    )
}

/// Parses a verify completion. The last `VERDICT:` line wins; everything
/// else is kept as reasoning.
pub fn parse_verdict(completion: &str) -> Result<StageOutput, StageError> {
    let captures = RE_VERDICT.captures_iter(completion).last().ok_or_else(|| {
        StageError::MalformedResponse("verify response has no VERDICT line".to_string())
    })?;
    let passed = captures[1].eq_ignore_ascii_case("PASS");

    let reasoning = RE_VERDICT.replace_all(completion, "").trim().to_string();
    let reasoning = if reasoning.is_empty() {
        format!("Verifier answered {}", &captures[1].to_ascii_uppercase())
    } else {
        reasoning
    };

    Ok(StageOutput::Verdict { passed, reasoning })
}

/// Gate stage: asks whether the document is a financial document.
pub struct VerifyStage {
    client: Arc<dyn super::CompletionClient>,
    max_document_chars: usize,
}

impl VerifyStage {
    pub fn new(client: Arc<dyn super::CompletionClient>, max_document_chars: usize) -> Self {
        Self {
            client,
            max_document_chars,
        }
    }
}

impl Stage for VerifyStage {
    fn run(
        &self,
        input: &StageInput<'_>,
        cancel: &CancellationFlag,
    ) -> Result<StageOutput, StageError> {
        if cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }
        let completion = self
            .client
            .complete(VERIFY_SYSTEM, &verify_prompt(input, self.max_document_chars))?;
        parse_verdict(&completion)
    }
}

/// Produces the final report for the user's query.
pub struct AnalyzeStage {
    client: Arc<dyn super::CompletionClient>,
    max_document_chars: usize,
}

impl AnalyzeStage {
    pub fn new(client: Arc<dyn super::CompletionClient>, max_document_chars: usize) -> Self {
        Self {
            client,
            max_document_chars,
        }
    }
}

impl Stage for AnalyzeStage {
    fn run(
        &self,
        input: &StageInput<'_>,
        cancel: &CancellationFlag,
    ) -> Result<StageOutput, StageError> {
        if cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }
        let completion = self
            .client
            .complete(ANALYZE_SYSTEM, &analyze_prompt(input, self.max_document_chars))?;
        Ok(StageOutput::Report(completion.trim().to_string()))
    }
}
