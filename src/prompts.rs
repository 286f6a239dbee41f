//! Stage instructions for the workflow.
//!
//! Instructions are embedded in the binary using include_str! and can be
//! overridden per project with a YAML file of the same shape.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::orchestrator::Stage;
use crate::tools::ToolKind;

/// Bundled default stage instructions
pub const DEFAULT_STAGE_PROMPTS: &str = include_str!("../prompts/stages.yaml");

/// Project-local override location, relative to the base directory
pub const PROJECT_PROMPTS_PATH: &str = ".ops-pilot/prompts.yaml";

/// Where the stage instructions came from
#[derive(Debug, Clone, PartialEq)]
pub enum PromptSource {
    /// Loaded from a file path
    File(PathBuf),
    /// Bundled default
    Bundled(&'static str),
}

impl PromptSource {
    /// Get the raw YAML content
    pub fn content(&self) -> std::io::Result<String> {
        match self {
            PromptSource::File(path) => std::fs::read_to_string(path),
            PromptSource::Bundled(content) => Ok(content.to_string()),
        }
    }
}

/// Resolve the prompt file, falling back to the bundled default.
///
/// Resolution priority:
/// 1. Explicit path if it exists
/// 2. Project-local `.ops-pilot/prompts.yaml`
/// 3. Bundled default
pub fn resolve_prompts(explicit: Option<&Path>, base_dir: &Path) -> PromptSource {
    if let Some(path) = explicit {
        let explicit_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        };

        if explicit_path.exists() {
            debug!("Using stage prompts from explicit path: {:?}", explicit_path);
            return PromptSource::File(explicit_path);
        }
        tracing::warn!(
            "Configured prompt file {:?} not found, falling back",
            explicit_path
        );
    }

    let project_path = base_dir.join(PROJECT_PROMPTS_PATH);
    if project_path.exists() {
        debug!("Using stage prompts from .ops-pilot: {:?}", project_path);
        return PromptSource::File(project_path);
    }

    debug!("Using bundled stage prompts");
    PromptSource::Bundled(DEFAULT_STAGE_PROMPTS)
}

/// Rendered instruction for each generation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagePrompts {
    pub retrieval_planning: String,
    pub diagnosis: String,
    pub operator_planning: String,
    pub final_response: String,
}

impl StagePrompts {
    /// Parse and render a prompt file for the given retrieval namespaces.
    pub fn load(source: &PromptSource, namespaces: &[String]) -> Result<Self> {
        let content = source
            .content()
            .with_context(|| format!("Failed to read stage prompts from {:?}", source))?;
        Self::from_yaml(&content, namespaces)
    }

    /// Bundled instructions, rendered for the default namespaces.
    pub fn bundled(namespaces: &[String]) -> Result<Self> {
        Self::from_yaml(DEFAULT_STAGE_PROMPTS, namespaces)
    }

    pub fn from_yaml(content: &str, namespaces: &[String]) -> Result<Self> {
        let templates: StagePrompts =
            serde_yaml::from_str(content).context("Failed to parse stage prompts")?;

        let env = Environment::new();
        let ctx = context! {
            retrieval_tool => ToolKind::Retrieval.name(),
            action_tool => ToolKind::Action.name(),
            namespaces => namespaces,
        };
        let render = |name: &str, template: &str| -> Result<String> {
            env.render_str(template, &ctx)
                .with_context(|| format!("Failed to render {name} prompt"))
        };

        Ok(Self {
            retrieval_planning: render("retrieval_planning", &templates.retrieval_planning)?,
            diagnosis: render("diagnosis", &templates.diagnosis)?,
            operator_planning: render("operator_planning", &templates.operator_planning)?,
            final_response: render("final_response", &templates.final_response)?,
        })
    }

    /// Instruction for a generation stage; execution stages have none.
    pub fn instruction(&self, stage: Stage) -> Option<&str> {
        match stage {
            Stage::RetrievalPlanning => Some(&self.retrieval_planning),
            Stage::Diagnosis => Some(&self.diagnosis),
            Stage::OperatorPlanning => Some(&self.operator_planning),
            Stage::FinalResponse => Some(&self.final_response),
            Stage::RetrievalExecution | Stage::ActionExecution => None,
        }
    }
}
