//! Catalog bricks and the brick instances of an app

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::apps::arduino_app::ArduinoApp;
use crate::apps::descriptor::{AppDescriptor, BrickInstance};
use crate::apps::id::{AppIdResolver, Namespace};
use crate::apps::manager::find_app_dirs;
use crate::catalog::bricks::Brick;
use crate::catalog::models::AiModel;
use crate::catalog::{Catalog, CatalogHandle};
use crate::errors::{OrchestratorError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct BrickListItem {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub models: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrickVariableInfo {
    pub default_value: String,
    pub description: String,
    pub required: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppReference {
    pub id: String,
    pub name: String,
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrickDetails {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub variables: BTreeMap<String, BrickVariableInfo>,
    pub readme: String,
    pub used_by_apps: Vec<AppReference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrickInstanceInfo {
    pub id: String,
    pub name: String,
    pub category: String,
    pub model: Option<String>,
    pub variables: BTreeMap<String, String>,
}

/// Body of a create or update. On update, listed variables are merged over
/// the instance's current ones; `Some("")` as model clears the selection.
#[derive(Debug, Clone, Default)]
pub struct BrickRequest {
    pub model: Option<String>,
    pub variables: BTreeMap<String, String>,
}

pub struct BrickService {
    catalog: Arc<CatalogHandle>,
    resolver: Arc<AppIdResolver>,
}

impl BrickService {
    pub fn new(catalog: Arc<CatalogHandle>, resolver: Arc<AppIdResolver>) -> Self {
        Self { catalog, resolver }
    }

    pub fn list(&self) -> Vec<BrickListItem> {
        let catalog = self.catalog.current();
        catalog
            .bricks()
            .bricks()
            .iter()
            .map(|brick| BrickListItem {
                id: brick.id.clone(),
                name: brick.name.clone(),
                description: brick.description.clone(),
                category: brick.category.clone(),
                models: catalog
                    .get_models_by_brick(&brick.id)
                    .into_iter()
                    .map(|m| m.id.clone())
                    .collect(),
            })
            .collect()
    }

    pub async fn details(&self, id: &str) -> Result<BrickDetails> {
        let catalog = self.catalog.current();
        let brick = find_brick(&catalog, id)?;

        let variables = brick
            .variables
            .iter()
            .map(|v| {
                let info = BrickVariableInfo {
                    default_value: v.default_value.clone(),
                    description: v.description.clone(),
                    required: v.is_required(),
                };
                (v.name.clone(), info)
            })
            .collect();
        let readme = catalog.store().brick_readme(&brick.id).await?.unwrap_or_default();

        Ok(BrickDetails {
            id: brick.id.clone(),
            name: brick.name.clone(),
            description: brick.description.clone(),
            category: brick.category.clone(),
            variables,
            readme,
            used_by_apps: self.used_by_apps(&brick.id).await?,
        })
    }

    /// Apps under either root that use the brick; broken apps are skipped
    async fn used_by_apps(&self, brick_id: &str) -> Result<Vec<AppReference>> {
        let mut used = Vec::new();
        for namespace in [Namespace::Examples, Namespace::User] {
            for path in find_app_dirs(self.resolver.root(namespace)).await? {
                let app = match ArduinoApp::load(&path).await {
                    Ok(app) => app,
                    Err(e) => {
                        warn!(path = %path.display(), "skipping broken app: {}", e);
                        continue;
                    }
                };
                if app.descriptor.brick(brick_id).is_none() {
                    continue;
                }
                used.push(AppReference {
                    id: self.resolver.from_path(&app.full_path)?.to_string(),
                    name: app.descriptor.name.clone(),
                    icon: app.descriptor.icon.clone(),
                });
            }
        }
        Ok(used)
    }

    /// The app's brick instances as written in its descriptor
    pub fn app_brick_instances(&self, app: &ArduinoApp) -> Result<Vec<BrickInstanceInfo>> {
        let catalog = self.catalog.current();
        app.descriptor
            .bricks
            .iter()
            .map(|instance| {
                let brick = find_brick(&catalog, &instance.id)?;
                Ok(BrickInstanceInfo {
                    id: brick.id.clone(),
                    name: brick.name.clone(),
                    category: brick.category.clone(),
                    model: instance.model.clone(),
                    variables: instance.variables.clone(),
                })
            })
            .collect()
    }

    /// One brick instance with catalog defaults filled in and the brick's
    /// default model when none is selected
    pub fn app_brick_instance_details(&self, app: &ArduinoApp, brick_id: &str) -> Result<BrickInstanceInfo> {
        let catalog = self.catalog.current();
        let brick = find_brick(&catalog, brick_id)?;
        let instance = app
            .descriptor
            .brick(brick_id)
            .ok_or_else(|| OrchestratorError::BrickNotFound(brick_id.to_string()))?;

        let mut variables: BTreeMap<String, String> = brick
            .variables
            .iter()
            .map(|v| (v.name.clone(), v.default_value.clone()))
            .collect();
        variables.extend(instance.variables.clone());

        let model = instance
            .model
            .clone()
            .or_else(|| Some(brick.model_name.clone()).filter(|m| !m.is_empty()));

        Ok(BrickInstanceInfo {
            id: brick.id.clone(),
            name: brick.name.clone(),
            category: brick.category.clone(),
            model,
            variables,
        })
    }

    /// Add the brick to the app, or replace the instance already there
    pub async fn create(&self, app: &mut ArduinoApp, brick_id: &str, req: BrickRequest) -> Result<()> {
        let catalog = self.catalog.current();
        let brick = find_brick(&catalog, brick_id)?;
        validate_variables(brick, &req.variables)?;

        let model = match req.model.filter(|m| !m.is_empty()) {
            Some(model) => Some(find_model(&catalog, brick_id, &model)?.id.clone()),
            None => None,
        };
        let instance = BrickInstance {
            id: brick_id.to_string(),
            model,
            variables: req.variables,
        };

        let mut descriptor = app.descriptor.clone();
        match descriptor.bricks.iter_mut().find(|b| b.id == brick_id) {
            Some(existing) => *existing = instance,
            None => descriptor.bricks.push(instance),
        }
        self.commit(app, descriptor).await?;
        info!(app = %app.full_path.display(), brick = brick_id, "brick added");
        Ok(())
    }

    /// Change the model or variables of a brick instance
    pub async fn update(&self, app: &mut ArduinoApp, brick_id: &str, req: BrickRequest) -> Result<()> {
        let mut descriptor = app.descriptor.clone();
        let instance = descriptor
            .bricks
            .iter_mut()
            .find(|b| b.id == brick_id)
            .ok_or_else(|| OrchestratorError::BrickNotFound(brick_id.to_string()))?;

        let catalog = self.catalog.current();
        let brick = find_brick(&catalog, brick_id)?;

        match req.model {
            Some(model) if model.is_empty() => instance.model = None,
            Some(model) if instance.model.as_deref() != Some(model.as_str()) => {
                instance.model = Some(find_model(&catalog, brick_id, &model)?.id.clone());
            }
            _ => {}
        }

        let mut variables = instance.variables.clone();
        variables.extend(req.variables);
        validate_variables(brick, &variables)?;
        instance.variables = variables;

        self.commit(app, descriptor).await?;
        info!(app = %app.full_path.display(), brick = brick_id, "brick updated");
        Ok(())
    }

    /// Remove a brick instance from the app
    pub async fn delete(&self, app: &mut ArduinoApp, brick_id: &str) -> Result<()> {
        let catalog = self.catalog.current();
        find_brick(&catalog, brick_id)?;
        if app.descriptor.brick(brick_id).is_none() {
            return Err(OrchestratorError::BrickNotFound(brick_id.to_string()));
        }

        let mut descriptor = app.descriptor.clone();
        descriptor.bricks.retain(|b| b.id != brick_id);
        self.commit(app, descriptor).await?;
        info!(app = %app.full_path.display(), brick = brick_id, "brick removed");
        Ok(())
    }

    /// Write the new descriptor, then adopt it; on failure the app keeps the
    /// previous one
    async fn commit(&self, app: &mut ArduinoApp, descriptor: AppDescriptor) -> Result<()> {
        let previous = std::mem::replace(&mut app.descriptor, descriptor);
        if let Err(e) = app.save().await {
            app.descriptor = previous;
            return Err(e);
        }
        Ok(())
    }

    pub fn models(&self) -> Vec<AiModel> {
        self.catalog.current().models().models().to_vec()
    }

    pub fn models_by_brick(&self, brick_id: &str) -> Vec<AiModel> {
        self.catalog
            .current()
            .get_models_by_brick(brick_id)
            .into_iter()
            .cloned()
            .collect()
    }
}

fn find_brick<'a>(catalog: &'a Catalog, id: &str) -> Result<&'a Brick> {
    catalog
        .find_brick_by_id(id)
        .ok_or_else(|| OrchestratorError::BrickNotFound(id.to_string()))
}

fn find_model<'a>(catalog: &'a Catalog, brick_id: &str, model_id: &str) -> Result<&'a AiModel> {
    catalog
        .get_models_by_brick(brick_id)
        .into_iter()
        .find(|m| m.id == model_id)
        .ok_or_else(|| OrchestratorError::ModelNotFound(model_id.to_string()))
}

/// Every supplied variable exists on the brick, and every required one is
/// supplied with a value
pub fn validate_variables(brick: &Brick, variables: &BTreeMap<String, String>) -> Result<()> {
    for (name, value) in variables {
        let Some(variable) = brick.variable(name) else {
            return Err(OrchestratorError::VariableValidation(format!(
                "variable {:?} does not exist on brick {:?}",
                name, brick.id
            )));
        };
        if variable.is_required() && value.is_empty() {
            return Err(OrchestratorError::VariableValidation(format!(
                "variable {:?} cannot be empty",
                name
            )));
        }
    }

    if let Some(missing) = brick
        .variables
        .iter()
        .find(|v| v.is_required() && !variables.contains_key(&v.name))
    {
        return Err(OrchestratorError::VariableValidation(format!(
            "required variable {:?} is mandatory",
            missing.name
        )));
    }
    Ok(())
}
