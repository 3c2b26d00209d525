//! Turns an edit request into a validated single-file unified diff.
//!
//! Deterministic paths come first: an edit whose content is already present
//! yields a context-only diff, and a new file with known content yields an
//! add-file diff. Only the remaining edits ask the developer model, and its
//! output is repaired and validated before anyone applies it.

use tracing::{debug, instrument, warn};

use crate::core::diff;
use crate::core::types::ModelRole;
use crate::error::AgentError;
use crate::io::model::{ModelClient, ModelRequest};
use crate::io::prompt::{DeveloperPrompt, PromptBuilder};

#[derive(Debug, Clone)]
pub struct EditRequest<'a> {
    pub path: &'a str,
    pub original: &'a str,
    pub goal: &'a str,
    pub reason: &'a str,
    /// Text the file must contain afterwards, when the plan states it.
    pub content: Option<&'a str>,
    pub file_exists: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedDiff {
    pub text: String,
    /// Context-only: applying it would change nothing.
    pub noop: bool,
}

pub struct DiffGenerator<'a> {
    model: &'a dyn ModelClient,
    prompts: &'a PromptBuilder,
    max_lines: usize,
}

impl<'a> DiffGenerator<'a> {
    pub fn new(model: &'a dyn ModelClient, prompts: &'a PromptBuilder, max_lines: usize) -> Self {
        Self {
            model,
            prompts,
            max_lines,
        }
    }

    #[instrument(skip_all, fields(path = request.path, file_exists = request.file_exists))]
    pub fn generate(&self, request: &EditRequest<'_>) -> Result<GeneratedDiff, AgentError> {
        if let Some(content) = request.content {
            if request.file_exists && diff::already_present(request.original, content) {
                debug!("requested content already present");
                return Ok(GeneratedDiff {
                    text: diff::noop_diff(request.path, request.original),
                    noop: true,
                });
            }
            if !request.file_exists {
                return self.finish(request, diff::add_file_diff(request.path, content));
            }
        }

        let raw = match self.ask_model(request) {
            Ok(raw) => raw,
            Err(reason) => match request.content {
                Some(content) => {
                    warn!(reason = %reason, "developer model unavailable, appending content");
                    content.to_string()
                }
                None => {
                    return Err(AgentError::Execution(format!(
                        "no diff for {}: {reason}",
                        request.path
                    )));
                }
            },
        };

        let stripped = diff::strip_fences(&raw);
        let text = if diff::has_hunk_marker(&stripped) {
            diff::ensure_headers(request.path, &stripped, request.file_exists)
        } else {
            debug!("synthesizing hunk for raw output");
            diff::synthesize_hunk(
                request.path,
                request.original,
                &stripped,
                request.file_exists,
            )
        };
        self.finish(request, text)
    }

    fn ask_model(&self, request: &EditRequest<'_>) -> Result<String, String> {
        let prompt = self
            .prompts
            .developer(&DeveloperPrompt {
                path: request.path,
                original: request.original,
                goal: request.goal,
                reason: request.reason,
                content: request.content,
                file_exists: request.file_exists,
            })
            .map_err(|err| format!("{err:#}"))?;
        let reply = self
            .model
            .query(&ModelRequest::text(ModelRole::Developer, &prompt))
            .map_err(|err| format!("{err:#}"))?;
        if reply.trim().is_empty() {
            return Err("developer model returned nothing".to_string());
        }
        Ok(reply)
    }

    fn finish(&self, request: &EditRequest<'_>, text: String) -> Result<GeneratedDiff, AgentError> {
        let patch = diff::validate(request.path, &text, self.max_lines)?;
        Ok(GeneratedDiff {
            noop: patch.stats().is_noop(),
            text,
        })
    }
}
