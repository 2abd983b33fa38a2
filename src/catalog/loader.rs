//! Catalog loading from disk.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::catalog::model::{Monitor, MonitorDefinition, Project, Route, RouteDefinition};
use crate::catalog::CatalogError;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CatalogFile {
    projects: Vec<Project>,
    routes: Vec<RouteDefinition>,
    monitors: Vec<MonitorDefinition>,
}

/// A validated catalog.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub projects: HashMap<String, Project>,
    pub routes: Vec<Route>,
    pub monitors: Vec<Monitor>,
}

/// Parse and validate a catalog from TOML text.
pub fn parse_catalog(content: &str) -> Result<Catalog, CatalogError> {
    let file: CatalogFile = toml::from_str(content)?;

    let mut projects = HashMap::new();
    for project in file.projects {
        let mut names = HashSet::new();
        for secret in &project.secrets {
            if !names.insert(secret.name.as_str()) {
                return Err(CatalogError::DuplicateSecret {
                    project: project.id.clone(),
                    name: secret.name.clone(),
                });
            }
        }
        if projects.contains_key(&project.id) {
            return Err(CatalogError::DuplicateId(project.id));
        }
        projects.insert(project.id.clone(), project);
    }

    let mut seen = HashSet::new();
    let mut routes = Vec::with_capacity(file.routes.len());
    for def in file.routes {
        if !projects.contains_key(&def.project_id) {
            return Err(CatalogError::UnknownProject {
                owner: def.id,
                project: def.project_id,
            });
        }
        if !seen.insert(def.id.clone()) {
            return Err(CatalogError::DuplicateId(def.id));
        }
        routes.push(Route::from_definition(def)?);
    }

    let mut monitors = Vec::with_capacity(file.monitors.len());
    for def in file.monitors {
        if !projects.contains_key(&def.project_id) {
            return Err(CatalogError::UnknownProject {
                owner: def.id,
                project: def.project_id,
            });
        }
        if !seen.insert(def.id.clone()) {
            return Err(CatalogError::DuplicateId(def.id));
        }
        monitors.push(Monitor::from_definition(def)?);
    }

    Ok(Catalog {
        projects,
        routes,
        monitors,
    })
}

/// Load and validate a catalog from a TOML file.
pub fn load_catalog(path: &Path) -> Result<Catalog, CatalogError> {
    let content = fs::read_to_string(path)?;
    parse_catalog(&content)
}
