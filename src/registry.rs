use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::context::SnapshotContext;
use crate::error::{Result, SnapshotError};
use crate::plan::SnapshotPlan;
use crate::storage;
use crate::utils::format::format_bytes;

/// Heading used when listing the local cache. No plan may take it.
pub const RESERVED_PLAN_NAME: &str = "cached";

/// Every configured plan, holding the archived snapshots it owns.
pub struct LoadedPlans {
    /// Configuration order.
    pub plans: Vec<SnapshotPlan>,
    /// Archived files no plan's template accepted.
    pub unaccepted_files: Vec<String>,
}

impl LoadedPlans {
    pub fn get(&self, name: &str) -> Option<&SnapshotPlan> {
        self.plans.iter().find(|p| p.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut SnapshotPlan> {
        self.plans.iter_mut().find(|p| p.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.plans.iter().map(|p| p.name.as_str()).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CachedFile {
    pub file_name: String,
    pub size: u64,
    pub formatted_size: String,
}

pub struct PlanRegistry {
    ctx: Arc<SnapshotContext>,
}

impl PlanRegistry {
    pub fn new(ctx: Arc<SnapshotContext>) -> Self {
        Self { ctx }
    }

    /// Construct every configured plan without touching the archive.
    pub fn build_plans(&self) -> Result<Vec<SnapshotPlan>> {
        let configs = &self.ctx.config.plans;
        if configs.is_empty() {
            return Err(SnapshotError::config("no snapshot plans are configured"));
        }

        let mut seen = BTreeSet::new();
        let mut plans = Vec::with_capacity(configs.len());
        for config in configs {
            let plan = SnapshotPlan::new(config, self.ctx.clone())?;
            if plan.name == RESERVED_PLAN_NAME {
                return Err(SnapshotError::config(format!(
                    "'{}' is reserved and cannot be used as a plan name",
                    RESERVED_PLAN_NAME
                )));
            }
            if !seen.insert(plan.name.clone()) {
                return Err(SnapshotError::config(format!("plan '{}' is configured more than once", plan.name)));
            }
            plans.push(plan);
        }
        Ok(plans)
    }

    /// Build all plans and hand each archived file to the most specific plan
    /// that accepts it.
    pub fn load_all(&self) -> Result<LoadedPlans> {
        let mut plans = self.build_plans()?;
        let files = self.ctx.archive.list(self.ctx.archive_path())?;
        let unaccepted_files = reconcile(&mut plans, self.ctx.archive_path(), &files);

        info!(
            plans = plans.len(),
            files = files.len(),
            unaccepted = unaccepted_files.len(),
            "archive reconciled"
        );
        Ok(LoadedPlans { plans, unaccepted_files })
    }

    /// Files in the local tier, newest name last.
    pub fn cached_files(&self) -> Result<Vec<CachedFile>> {
        let local = self.ctx.local.as_ref();
        let mut out = Vec::new();
        for path in local.list(self.ctx.local_path())? {
            let Some(file_name) = storage::file_name_under(self.ctx.local_path(), &path) else {
                continue;
            };
            let size = local.size(&path)?;
            out.push(CachedFile { file_name: file_name.to_string(), size, formatted_size: format_bytes(size) });
        }
        Ok(out)
    }

    /// Delete every cached file except `except`. Returns the deleted names.
    pub fn clear_all_cached(&self, except: Option<&str>) -> Result<Vec<String>> {
        let mut cleared = Vec::new();
        for cached in self.cached_files()? {
            if except == Some(cached.file_name.as_str()) {
                continue;
            }
            self.ctx.local.delete(&self.ctx.local_file(&cached.file_name))?;
            cleared.push(cached.file_name);
        }
        debug!(cleared = cleared.len(), "local cache cleared");
        Ok(cleared)
    }
}

/// Assign each file under `dir` to the first plan, by descending template
/// specificity, that accepts it. Returns the files nobody took.
fn reconcile(plans: &mut [SnapshotPlan], dir: &str, files: &[String]) -> Vec<String> {
    let mut order: Vec<usize> = (0..plans.len()).collect();
    // stable, so equal specificity keeps configuration order
    order.sort_by_key(|&i| std::cmp::Reverse(plans[i].template().specificity()));

    let mut unaccepted = Vec::new();
    for path in files {
        let Some(file_name) = storage::file_name_under(dir, path) else {
            continue;
        };
        match order.iter().find(|&&i| plans[i].accept(file_name)) {
            Some(&i) => debug!(file = file_name, plan = %plans[i].name, "file accepted"),
            None => {
                debug!(file = file_name, "no plan accepted file");
                unaccepted.push(file_name.to_string());
            }
        }
    }

    for plan in plans.iter_mut() {
        plan.sort_snapshots();
    }
    unaccepted
}
