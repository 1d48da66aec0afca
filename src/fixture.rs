//! Offline scenarios: a scripted page plus scripted model replies.

use std::path::Path;
use std::sync::Arc;

use action_primitives::{PageScript, ScriptedPage};
use agent_core::decision::{ChatModel, DecisionAdapter, ScriptedChatModel};
use agent_core::{DecisionError, JobSession, JobSpec, WorkflowConfig};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Fixture {
    pub job_id: String,
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub upload_path: Option<String>,
    pub script: PageScript,
    /// Fallback chain, tried in order
    pub models: Vec<ScriptedModel>,
    /// Replaces the configured workflow section for this run
    #[serde(default)]
    pub workflow: Option<WorkflowConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScriptedModel {
    pub name: String,
    #[serde(default)]
    pub replies: Vec<ScriptedReply>,
}

/// Either raw reply text or a simulated failure class.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptedReply {
    Text(String),
    Failure { error: String },
}

impl ScriptedReply {
    fn into_result(self) -> Result<String, DecisionError> {
        match self {
            ScriptedReply::Text(text) => Ok(text),
            ScriptedReply::Failure { error } => Err(match error.as_str() {
                "rate_limited" => DecisionError::rate_limited("scripted rate limit"),
                "capability_mismatch" => DecisionError::capability("scripted capability mismatch"),
                other => DecisionError::other(format!("scripted failure: {other}")),
            }),
        }
    }
}

impl Fixture {
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read fixture {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid fixture {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let fixture: Fixture = serde_yaml::from_str(content)?;
        if fixture.models.is_empty() {
            bail!("fixture needs at least one scripted model");
        }
        Ok(fixture)
    }

    pub fn spec(&self) -> JobSpec {
        let spec = JobSpec::new(self.job_id.as_str(), self.profile.clone());
        match &self.upload_path {
            Some(path) => spec.with_upload(path.clone()),
            None => spec,
        }
    }

    /// Fresh page and session; the page handle stays available for inspection.
    pub fn session(&self) -> (Arc<ScriptedPage>, JobSession) {
        let page = Arc::new(ScriptedPage::from_script(self.script.clone()));
        let session = JobSession::from_page(page.clone());
        (page, session)
    }

    pub fn adapter(&self) -> Result<DecisionAdapter> {
        let models: Vec<Arc<dyn ChatModel>> = self
            .models
            .iter()
            .map(|model| {
                let replies = model.replies.iter().cloned().map(ScriptedReply::into_result);
                Arc::new(ScriptedChatModel::new(model.name.clone(), replies)) as Arc<dyn ChatModel>
            })
            .collect();
        Ok(DecisionAdapter::new(models)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"
job_id: demo-1
profile: "Name: Ada Lovelace"
script:
  page:
    url: https://careers.example.com/apply
    title: Apply
    visible_text: Platform Engineer
    version: 1
    nodes:
      - node_key: submit
        role: button
        name: Submit application
  on_click:
    - node: submit
      then:
        - title: Application Submitted
          visible_text: Thank you for applying
          nodes: []
models:
  - name: primary
    replies:
      - error: rate_limited
  - name: secondary
    replies:
      - '{"status":"continue","actions":[{"action":"submit"}]}'
"#;

    #[test]
    fn parses_models_and_failures() {
        let fixture = Fixture::parse(FIXTURE).unwrap();
        assert_eq!(fixture.models.len(), 2);
        assert!(matches!(
            fixture.models[0].replies[0],
            ScriptedReply::Failure { ref error } if error == "rate_limited"
        ));
        assert!(matches!(fixture.models[1].replies[0], ScriptedReply::Text(_)));
        // Nodes in fixtures are visible unless stated otherwise.
        assert!(fixture.script.page.nodes[0].visible);
        assert_eq!(fixture.spec().job_id.0, "demo-1");
        assert_eq!(fixture.adapter().unwrap().model_names(), vec!["primary", "secondary"]);
    }

    #[test]
    fn fixture_without_models_is_rejected() {
        let err = Fixture::parse("job_id: x\nscript:\n  page:\n    url: u\nmodels: []\n")
            .unwrap_err();
        assert!(err.to_string().contains("scripted model"));
    }
}
