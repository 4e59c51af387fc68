//! `InitHandler` (§4.7): the entry tier every connection starts in.
//! Accepts only `ping` and `set_scope`; every other request type is a
//! protocol error at this tier.

use std::sync::Arc;

use super::app::AppState;
use super::space::SpaceHandler;
use crate::error::KansasError;

const LOG_TARGET: &str = "session::init";

pub struct InitHandler {
    app: Arc<AppState>,
}

impl InitHandler {
    pub fn new(app: Arc<AppState>) -> Self {
        Self { app }
    }

    pub fn ping(&self) -> serde_json::Value {
        serde_json::json!("pong")
    }

    /// Validates `datasource` against the plugin registry, then returns
    /// the (possibly newly-created) `SpaceHandler` for `(scope,
    /// datasource)`. An unknown datasource is reported as a redirect
    /// error rather than a plain protocol error, per §7.
    pub fn set_scope(&self, scope: &str, datasource: &str) -> Result<Arc<SpaceHandler>, KansasError> {
        if !self.app.search.is_valid(datasource) {
            tracing::warn!(target: LOG_TARGET, scope, datasource, "rejecting unknown datasource");
            return Err(KansasError::redirect(
                format!("unknown datasource {datasource}"),
                "/".to_string(),
            ));
        }
        Ok(self.app.get_or_create_space(scope, datasource))
    }
}
