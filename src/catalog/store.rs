//! Route persistence contract and the in-process implementation.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;

use crate::catalog::loader::Catalog;
use crate::catalog::model::{ApiMethod, Monitor, Project, Route, RouteStats, Secret};
use crate::catalog::CatalogError;
use crate::proxy::stats::moving_average;

/// A route together with the secrets of its owning project.
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    pub route: Arc<Route>,
    pub secrets: Vec<Secret>,
}

/// Admin-facing view of a route.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSummary {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub method: ApiMethod,
    pub api_url: String,
    pub forward_request_data: bool,
    pub restriction: &'static str,
    pub rate_limiting: bool,
    pub caching: bool,
    pub partial_query: bool,
    pub image_transformation: bool,
    #[serde(flatten)]
    pub stats: RouteStats,
}

impl RouteSummary {
    fn new(route: &Route, stats: RouteStats) -> Self {
        Self {
            id: route.id.clone(),
            project_id: route.project_id.clone(),
            name: route.name.clone(),
            method: route.method,
            api_url: route.api_url.clone(),
            forward_request_data: route.forward_request_data,
            restriction: route.restriction.kind(),
            rate_limiting: route.rate_limiting.enabled,
            caching: route.caching.enabled,
            partial_query: route.partial_query.enabled,
            image_transformation: route.image_transformation.enabled,
            stats,
        }
    }
}

/// Read/write contract the engine needs from persistent storage.
#[async_trait]
pub trait RouteStore: Send + Sync {
    /// Fetch a route and its project's secrets in one read.
    async fn find_by_id(&self, id: &str) -> Result<Option<ResolvedRoute>, CatalogError>;

    /// Count a successful origin call and fold `elapsed_ms` into the average.
    async fn record_success(&self, id: &str, elapsed_ms: u64) -> Result<(), CatalogError>;

    /// Count a failed origin call.
    async fn record_fail(&self, id: &str) -> Result<(), CatalogError>;

    async fn summary(&self, id: &str) -> Result<Option<RouteSummary>, CatalogError>;

    async fn list(&self) -> Result<Vec<RouteSummary>, CatalogError>;

    /// Clone a route's configuration under a new id with zeroed counters.
    async fn duplicate(&self, id: &str) -> Result<Option<String>, CatalogError>;

    async fn delete(&self, id: &str) -> Result<bool, CatalogError>;

    async fn find_monitor(&self, id: &str) -> Result<Option<(Monitor, Vec<Secret>)>, CatalogError>;

    async fn monitors(&self) -> Result<Vec<Monitor>, CatalogError>;
}

struct RouteEntry {
    route: Arc<Route>,
    stats: RouteStats,
}

/// A thread-safe, in-memory route store seeded from the catalog file.
#[derive(Clone, Default)]
pub struct MemoryRouteStore {
    routes: Arc<DashMap<String, RouteEntry>>,
    projects: Arc<DashMap<String, Project>>,
    monitors: Arc<DashMap<String, Monitor>>,
}

impl MemoryRouteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_catalog(catalog: Catalog) -> Self {
        let store = Self::new();
        store.replace_catalog(catalog);
        store
    }

    /// Swap in a freshly loaded catalog.
    ///
    /// Counters of routes whose ids survive the reload are kept. New entries
    /// are written over the old ones before stale ids are dropped, so a
    /// concurrent lookup of a surviving route always sees its project.
    /// Routes added or removed through the admin API are not written back to
    /// the file and are superseded by the next reload.
    pub fn replace_catalog(&self, catalog: Catalog) {
        let project_ids: HashSet<String> = catalog.projects.keys().cloned().collect();
        let route_ids: HashSet<String> = catalog.routes.iter().map(|r| r.id.clone()).collect();
        let monitor_ids: HashSet<String> = catalog.monitors.iter().map(|m| m.id.clone()).collect();

        for (id, project) in catalog.projects {
            self.projects.insert(id, project);
        }
        for route in catalog.routes {
            let id = route.id.clone();
            let route = Arc::new(route);
            self.routes
                .entry(id)
                .and_modify(|entry| entry.route = route.clone())
                .or_insert_with(|| RouteEntry {
                    route: route.clone(),
                    stats: RouteStats::default(),
                });
        }
        for monitor in catalog.monitors {
            self.monitors.insert(monitor.id.clone(), monitor);
        }

        self.routes.retain(|id, _| route_ids.contains(id));
        self.projects.retain(|id, _| project_ids.contains(id));
        self.monitors.retain(|id, _| monitor_ids.contains(id));

        tracing::info!(
            routes = self.routes.len(),
            projects = self.projects.len(),
            monitors = self.monitors.len(),
            "Catalog installed"
        );
    }

    /// Insert or replace a single route (counters reset).
    pub fn insert_route(&self, route: Route) {
        self.routes.insert(
            route.id.clone(),
            RouteEntry {
                route: Arc::new(route),
                stats: RouteStats::default(),
            },
        );
    }

    pub fn insert_project(&self, project: Project) {
        self.projects.insert(project.id.clone(), project);
    }

    pub fn stats(&self, id: &str) -> Option<RouteStats> {
        self.routes.get(id).map(|entry| entry.stats)
    }

    fn project_secrets(&self, project_id: &str) -> Vec<Secret> {
        self.projects
            .get(project_id)
            .map(|p| p.secrets.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RouteStore for MemoryRouteStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<ResolvedRoute>, CatalogError> {
        let route = match self.routes.get(id) {
            Some(entry) => entry.route.clone(),
            None => return Ok(None),
        };
        let secrets = self.project_secrets(&route.project_id);
        Ok(Some(ResolvedRoute { route, secrets }))
    }

    async fn record_success(&self, id: &str, elapsed_ms: u64) -> Result<(), CatalogError> {
        // get_mut holds the shard write lock for the whole update
        if let Some(mut entry) = self.routes.get_mut(id) {
            let stats = &mut entry.stats;
            stats.average_latency_ms =
                moving_average(stats.average_latency_ms, stats.success_count, elapsed_ms);
            stats.success_count += 1;
        }
        Ok(())
    }

    async fn record_fail(&self, id: &str) -> Result<(), CatalogError> {
        if let Some(mut entry) = self.routes.get_mut(id) {
            entry.stats.fail_count += 1;
        }
        Ok(())
    }

    async fn summary(&self, id: &str) -> Result<Option<RouteSummary>, CatalogError> {
        Ok(self
            .routes
            .get(id)
            .map(|entry| RouteSummary::new(&entry.route, entry.stats)))
    }

    async fn list(&self) -> Result<Vec<RouteSummary>, CatalogError> {
        let mut summaries: Vec<_> = self
            .routes
            .iter()
            .map(|entry| RouteSummary::new(&entry.route, entry.stats))
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(summaries)
    }

    async fn duplicate(&self, id: &str) -> Result<Option<String>, CatalogError> {
        let source = match self.routes.get(id) {
            Some(entry) => entry.route.clone(),
            None => return Ok(None),
        };
        let mut copy = (*source).clone();
        copy.id = uuid::Uuid::new_v4().simple().to_string();
        if !copy.name.is_empty() {
            copy.name = format!("{} (copy)", copy.name);
        }
        let new_id = copy.id.clone();
        self.insert_route(copy);
        tracing::info!(source = %id, route = %new_id, "Route duplicated");
        Ok(Some(new_id))
    }

    async fn delete(&self, id: &str) -> Result<bool, CatalogError> {
        let removed = self.routes.remove(id).is_some();
        if removed {
            tracing::info!(route = %id, "Route deleted");
        }
        Ok(removed)
    }

    async fn find_monitor(&self, id: &str) -> Result<Option<(Monitor, Vec<Secret>)>, CatalogError> {
        let monitor = match self.monitors.get(id) {
            Some(m) => m.clone(),
            None => return Ok(None),
        };
        let secrets = self.project_secrets(&monitor.project_id);
        Ok(Some((monitor, secrets)))
    }

    async fn monitors(&self) -> Result<Vec<Monitor>, CatalogError> {
        Ok(self.monitors.iter().map(|m| m.clone()).collect())
    }
}
