//! Parsing an LLM-authored story script.
//!
//! The text model is asked for JSON with `story_text` and `image_prompt` per
//! page. Models answer either with a bare array or with an object wrapping it
//! in `pages`; both are accepted. The text should already have passed through
//! [`crate::pipeline::normalize::extract_text`], which strips code fences.

use crate::error::StorybookError;
use crate::prompts::authored_image_prompt;
use crate::story::PagePlan;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct AuthoredPage {
    story_text: String,
    image_prompt: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AuthoredScript {
    Pages(Vec<AuthoredPage>),
    Wrapped { pages: Vec<AuthoredPage> },
}

/// Parse authored JSON into page plans. Every page includes the avatar.
pub fn parse_authored_script(text: &str) -> Result<Vec<PagePlan>, StorybookError> {
    let script: AuthoredScript =
        serde_json::from_str(text).map_err(|e| StorybookError::InvalidScript {
            detail: format!("unexpected JSON structure: {e}"),
        })?;

    let pages = match script {
        AuthoredScript::Pages(p) | AuthoredScript::Wrapped { pages: p } => p,
    };
    if pages.is_empty() {
        return Err(StorybookError::InvalidScript {
            detail: "the script has no pages".into(),
        });
    }
    if let Some(idx) = pages.iter().position(|p| p.image_prompt.trim().is_empty()) {
        return Err(StorybookError::InvalidScript {
            detail: format!("page {} has an empty image prompt", idx + 1),
        });
    }

    Ok(pages
        .into_iter()
        .map(|p| PagePlan::generated(p.story_text.trim(), authored_image_prompt(p.image_prompt.trim()), true))
        .collect())
}
