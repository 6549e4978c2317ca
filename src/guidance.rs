//! Guidance prompt composition.
//!
//! Tracks which template is active and composes the generation prompt from
//! its body plus eval-criteria metadata. Caller-customized text survives
//! template switches until `reset` is called, matching the draft-editing
//! behavior of the run-configuration form this tool replaces.

use crate::model::{EvalCriterion, GuidanceTemplate};
use anyhow::{bail, Result};

const TASK_PLACEHOLDER: &str = "{task}";
const CRITERIA_PLACEHOLDER: &str = "{criteria}";

pub struct GuidanceSelector {
    templates: Vec<GuidanceTemplate>,
    criteria: Vec<EvalCriterion>,
    active: usize,
    custom: Option<String>,
    last_task: Option<String>,
}

impl GuidanceSelector {
    /// The first template in the catalog starts out active.
    pub fn new(templates: Vec<GuidanceTemplate>, criteria: Vec<EvalCriterion>) -> Result<Self> {
        if templates.is_empty() {
            bail!("guidance template catalog is empty");
        }
        Ok(Self {
            templates,
            criteria,
            active: 0,
            custom: None,
            last_task: None,
        })
    }

    pub fn active(&self) -> &GuidanceTemplate {
        &self.templates[self.active]
    }

    /// Switch the active template. Customized text is left untouched so a
    /// selection change never clobbers the caller's edits.
    pub fn select(&mut self, id: &str) -> Result<()> {
        match self.templates.iter().position(|t| t.id == id) {
            Some(idx) => {
                self.active = idx;
                Ok(())
            }
            None => bail!("unknown guidance template: {id}"),
        }
    }

    /// Override the composed text entirely.
    pub fn set_custom(&mut self, text: impl Into<String>) {
        self.custom = Some(text.into());
    }

    /// Drop any customization; subsequent composition follows the active
    /// template again.
    pub fn reset(&mut self) {
        self.custom = None;
    }

    pub fn is_customized(&self) -> bool {
        self.custom.is_some()
    }

    /// Compose the prompt for a task description: customized text wins,
    /// otherwise the active template's body with placeholders substituted.
    /// The task is remembered so `current_text` can re-render it.
    pub fn compose_for(&mut self, task: &str) -> String {
        self.last_task = Some(task.to_string());
        if let Some(custom) = &self.custom {
            return custom.clone();
        }
        self.render(task)
    }

    /// The text as it currently stands: customized text if any, otherwise
    /// the active template rendered with the most recent task.
    pub fn current_text(&self) -> String {
        if let Some(custom) = &self.custom {
            return custom.clone();
        }
        self.render(self.last_task.as_deref().unwrap_or_default())
    }

    fn render(&self, task: &str) -> String {
        let body = &self.active().body;
        let mut out = body.replace(TASK_PLACEHOLDER, task);
        if out.contains(CRITERIA_PLACEHOLDER) {
            out = out.replace(CRITERIA_PLACEHOLDER, &self.criteria_block());
        }
        out
    }

    fn criteria_block(&self) -> String {
        self.criteria
            .iter()
            .map(|c| format!("- {}: {}", c.name, c.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
