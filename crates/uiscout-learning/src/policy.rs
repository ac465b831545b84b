//! Action policy: which interaction flow a generated test should run per element.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uiscout_crawler::{ElementDescriptor, ElementKind, Inventory};

use crate::features::{encode_element, encode_record, ErrorHistory};
use crate::model::{ActionModel, TrainingParams, TrainingReport};
use crate::outcome::OutcomeRecord;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Click,
    Validate,
    Fill,
    Hover,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::Validate => "validate",
            Self::Fill => "fill",
            Self::Hover => "hover",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a recommended flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionStep {
    pub action_type: ActionType,
    pub target_selector: String,
}

impl ActionStep {
    pub fn new(action_type: ActionType, selector: &str) -> Self {
        Self {
            action_type,
            target_selector: selector.to_string(),
        }
    }
}

/// Steps in execution order for a single test case.
pub type ActionRecommendation = Vec<ActionStep>;

/// Recommendation for one inventory element, as handed to the test generator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementRecommendation {
    pub element_id: String,
    pub selector: String,
    pub kind: ElementKind,
    pub actions: ActionRecommendation,
}

/// Observable model availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStatus {
    Unloaded,
    Loading,
    Ready,
}

enum ModelState {
    Unloaded,
    Loading,
    Ready(Arc<ActionModel>),
}

/// Recommends action flows, using a trained model when one is available.
///
/// `recommend` never waits: loading and training run in background tasks and
/// swap the model in when they finish. Until then, and whenever loading or
/// training fails, the fixed default flow is returned.
#[derive(Clone)]
pub struct ActionPolicy {
    state: Arc<RwLock<ModelState>>,
    errors: Arc<RwLock<ErrorHistory>>,
    threshold: f32,
}

impl ActionPolicy {
    pub fn new(threshold: f32) -> Self {
        Self {
            state: Arc::new(RwLock::new(ModelState::Unloaded)),
            errors: Arc::new(RwLock::new(ErrorHistory::default())),
            threshold,
        }
    }

    pub fn with_model(model: ActionModel, threshold: f32) -> Self {
        let policy = Self::new(threshold);
        policy.install(model);
        policy
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn status(&self) -> ModelStatus {
        match &*self.state.read() {
            ModelState::Unloaded => ModelStatus::Unloaded,
            ModelState::Loading => ModelStatus::Loading,
            ModelState::Ready(_) => ModelStatus::Ready,
        }
    }

    pub fn install(&self, model: ActionModel) {
        *self.state.write() = ModelState::Ready(Arc::new(model));
    }

    /// Replace the error history used to encode elements.
    pub fn set_history(&self, records: &[OutcomeRecord]) {
        *self.errors.write() = ErrorHistory::from_records(records);
    }

    fn current_model(&self) -> Option<Arc<ActionModel>> {
        match &*self.state.read() {
            ModelState::Ready(model) => Some(Arc::clone(model)),
            _ => None,
        }
    }

    /// Recommended flow for one element.
    pub fn recommend(&self, element: &ElementDescriptor) -> ActionRecommendation {
        let selector = element.selector.as_str();
        let Some(model) = self.current_model() else {
            return default_flow(selector);
        };

        let primary = primary_action(element.kind);
        let features = encode_element(element, primary.as_str(), &self.errors.read());
        let likelihood = model.success_likelihood(&features);
        debug!("{} success likelihood {:.3}", element, likelihood);

        if likelihood >= self.threshold {
            vec![
                ActionStep::new(primary, selector),
                ActionStep::new(ActionType::Validate, selector),
            ]
        } else {
            vec![ActionStep::new(ActionType::Validate, selector)]
        }
    }

    /// Recommendations for every element of an inventory, keyed by page URL.
    pub fn recommend_all(
        &self,
        inventory: &Inventory,
    ) -> BTreeMap<String, Vec<ElementRecommendation>> {
        inventory
            .iter()
            .map(|(url, elements)| {
                let recommendations = elements
                    .iter()
                    .map(|element| ElementRecommendation {
                        element_id: element.id.clone(),
                        selector: element.selector.clone(),
                        kind: element.kind,
                        actions: self.recommend(element),
                    })
                    .collect();
                (url.clone(), recommendations)
            })
            .collect()
    }

    /// Load a persisted model without blocking callers.
    ///
    /// A missing or invalid file leaves the policy on the default flow.
    pub fn load_in_background(&self, path: PathBuf) -> JoinHandle<()> {
        {
            let mut state = self.state.write();
            if matches!(*state, ModelState::Unloaded) {
                *state = ModelState::Loading;
            }
        }

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let loaded = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                ActionModel::load(&path).await.map(Some)
            } else {
                Ok(None)
            };

            let mut state = state.write();
            if !matches!(*state, ModelState::Loading) {
                // A freshly trained model already took over.
                return;
            }
            match loaded {
                Ok(Some(model)) => {
                    info!("Loaded action model from {:?}", path);
                    *state = ModelState::Ready(Arc::new(model));
                }
                Ok(None) => {
                    debug!("No action model at {:?}, using default flow", path);
                    *state = ModelState::Unloaded;
                }
                Err(e) => {
                    warn!("Could not load action model from {:?}: {}", path, e);
                    *state = ModelState::Unloaded;
                }
            }
        })
    }

    /// Train on the full outcome history in the background.
    ///
    /// Training continues from the current model when there is one. On
    /// success the model is saved to `save_to` (when given) and swapped in;
    /// on failure the current state is kept.
    pub fn train_in_background(
        &self,
        history: Vec<OutcomeRecord>,
        params: TrainingParams,
        save_to: Option<PathBuf>,
    ) -> JoinHandle<Result<TrainingReport>> {
        self.set_history(&history);
        let mut model = self
            .current_model()
            .map(|m| (*m).clone())
            .unwrap_or_else(|| ActionModel::new(params.seed));
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            let trained = tokio::task::spawn_blocking(move || {
                let samples: Vec<_> = history
                    .iter()
                    .map(|r| (encode_record(r), r.success))
                    .collect();
                model.train(&samples, &params).map(|report| (model, report))
            })
            .await
            .map_err(|e| Error::Training(e.to_string()))?;

            let (model, report) = match trained {
                Ok(trained) => trained,
                Err(e) => {
                    warn!("Model training failed: {}", e);
                    return Err(e);
                }
            };

            if let Some(path) = save_to {
                if let Err(e) = model.save(&path).await {
                    warn!("Could not save action model to {:?}: {}", path, e);
                }
            }
            *state.write() = ModelState::Ready(Arc::new(model));
            Ok(report)
        })
    }
}

fn default_flow(selector: &str) -> ActionRecommendation {
    vec![
        ActionStep::new(ActionType::Click, selector),
        ActionStep::new(ActionType::Validate, selector),
    ]
}

/// The interaction a passing flow starts with.
fn primary_action(kind: ElementKind) -> ActionType {
    match kind {
        ElementKind::Input | ElementKind::Textarea => ActionType::Fill,
        ElementKind::Button | ElementKind::Link | ElementKind::Select => ActionType::Click,
    }
}
