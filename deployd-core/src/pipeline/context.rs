use crate::deployment::{DeploymentId, RepoCoordinates};
use deployd_sdk::objects::DeploymentRequest;
use handlebars::{Handlebars, RenderError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Everything a stage may read about the deployment it is part of.
///
/// Stages run sequentially, but the context is shared by reference, so
/// outputs live behind a mutex.
pub struct StageContext {
    deployment_id: DeploymentId,
    workspace: PathBuf,
    request: Arc<DeploymentRequest>,
    outputs: Mutex<BTreeMap<String, String>>,
    handlebars: Handlebars<'static>,
}

impl StageContext {
    pub fn new(
        deployment_id: DeploymentId,
        workspace: PathBuf,
        request: Arc<DeploymentRequest>,
    ) -> Self {
        let mut renderer = Handlebars::new();
        // Values land in argv, env and socket addresses, never in HTML.
        renderer.register_escape_fn(handlebars::no_escape);
        renderer.set_strict_mode(false);
        Self {
            deployment_id,
            workspace,
            request,
            outputs: Mutex::new(BTreeMap::new()),
            handlebars: renderer,
        }
    }

    pub fn deployment_id(&self) -> &DeploymentId {
        &self.deployment_id
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn request(&self) -> &DeploymentRequest {
        &self.request
    }

    /// Record a value for later stages.
    pub fn set_output(&self, name: impl Into<String>, value: impl Into<String>) {
        self.outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), value.into());
    }

    pub fn output(&self, name: &str) -> Option<String> {
        self.outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Render `template` with Handlebars (`{{name}}` placeholders).
    ///
    /// Outputs of earlier stages take precedence over the built-in
    /// variables. Unknown variables render as empty strings. The GitHub
    /// token is never part of the template data.
    pub fn expand(&self, template: &str) -> Result<String, RenderError> {
        self.handlebars.render_template(template, &self.template_data())
    }

    fn template_data(&self) -> BTreeMap<String, String> {
        let mut data = BTreeMap::new();
        data.insert("deployment_id".to_owned(), self.deployment_id.as_str().to_owned());
        data.insert(
            "workspace".to_owned(),
            self.workspace.display().to_string(),
        );
        data.insert("username".to_owned(), self.request.username.clone());
        data.insert("repo_url".to_owned(), self.request.repo_url.clone());
        if let Some(repo) = RepoCoordinates::parse(&self.request.repo_url) {
            data.insert("repo_owner".to_owned(), repo.owner);
            data.insert("repo_name".to_owned(), repo.name);
        }

        let outputs = self.outputs.lock().unwrap_or_else(PoisonError::into_inner);
        data.extend(outputs.iter().map(|(k, v)| (k.clone(), v.clone())));
        data
    }
}
