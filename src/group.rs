use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use tracing::info;

use crate::config::PlanGroupConfig;
use crate::context::SnapshotContext;
use crate::error::{Result, SnapshotError};
use crate::plan::{LoadOptions, LoadReport, PostLoadResult, SnapshotPlan, StatementScope};
use crate::registry::LoadedPlans;
use crate::snapshot::Snapshot;

/// Named batch of plans. Members are resolved by name at use time.
pub struct PlanGroup {
    pub name: String,
    pub plan_names: Vec<String>,
    pub post_load_sqls: Vec<String>,
    ctx: Arc<SnapshotContext>,
}

#[derive(Clone, Debug)]
pub struct GroupLoadReport {
    pub loads: Vec<LoadReport>,
    /// Group statements, run after every member finished loading.
    pub post_load: Vec<PostLoadResult>,
}

impl PlanGroup {
    /// `Ok(None)` when no group with that name is configured.
    pub fn find(ctx: &Arc<SnapshotContext>, name: &str) -> Result<Option<Self>> {
        if name.trim().is_empty() {
            return Err(SnapshotError::config("Plan group name cannot be empty"));
        }
        match ctx.config.plan_groups.iter().find(|g| g.name == name) {
            Some(config) => Self::from_config(ctx, config).map(Some),
            None => Ok(None),
        }
    }

    pub fn all(ctx: &Arc<SnapshotContext>) -> Result<Vec<Self>> {
        ctx.config.plan_groups.iter().map(|g| Self::from_config(ctx, g)).collect()
    }

    fn from_config(ctx: &Arc<SnapshotContext>, config: &PlanGroupConfig) -> Result<Self> {
        if config.plans.is_empty() {
            return Err(SnapshotError::config(format!("plan group '{}' has no plans", config.name)));
        }
        for member in &config.plans {
            if !ctx.config.plans.iter().any(|p| p.name.trim() == member) {
                return Err(SnapshotError::config(format!(
                    "plan group '{}' references unknown plan '{}'",
                    config.name, member
                )));
            }
        }
        Ok(Self {
            name: config.name.clone(),
            plan_names: config.plans.clone(),
            post_load_sqls: config.post_load_sqls.clone(),
            ctx: ctx.clone(),
        })
    }

    /// Member plans in declared order.
    pub fn plans<'a>(&self, loaded: &'a LoadedPlans) -> Result<Vec<&'a SnapshotPlan>> {
        self.plan_names.iter().map(|name| member(loaded, name)).collect()
    }

    pub fn create_all(&self, loaded: &mut LoadedPlans) -> Result<Vec<Snapshot>> {
        self.create_all_at(loaded, Local::now().naive_local())
    }

    /// Stops at the first member that fails.
    pub fn create_all_at(&self, loaded: &mut LoadedPlans, now: NaiveDateTime) -> Result<Vec<Snapshot>> {
        let mut created = Vec::with_capacity(self.plan_names.len());
        for name in &self.plan_names {
            let plan = loaded
                .get_mut(name)
                .ok_or_else(|| SnapshotError::config(format!("plan '{}' is not loaded", name)))?;
            self.ctx.message(&format!("Creating snapshot for plan: {}", name));
            created.push(plan.create_at(now)?);
        }
        info!(group = %self.name, created = created.len(), "group snapshots created");
        Ok(created)
    }

    pub fn cleanup_all(&self, loaded: &mut LoadedPlans) -> Result<usize> {
        let mut removed = 0;
        for name in &self.plan_names {
            let plan = loaded
                .get_mut(name)
                .ok_or_else(|| SnapshotError::config(format!("plan '{}' is not loaded", name)))?;
            removed += plan.cleanup();
        }
        Ok(removed)
    }

    /// Load the newest snapshot of every member, then run the group's own
    /// statements unless skipped.
    pub fn load_all(&self, loaded: &LoadedPlans, options: &LoadOptions) -> Result<GroupLoadReport> {
        let mut loads = Vec::with_capacity(self.plan_names.len());
        for plan in self.plans(loaded)? {
            let snapshot = plan.snapshots().first().ok_or_else(|| {
                SnapshotError::execution(format!("no snapshots exist for plan '{}'", plan.name))
            })?;
            self.ctx.message(&format!("Loading plan: {}", plan.name));
            loads.push(plan.load(snapshot, options)?);
        }

        let post_load = if options.skip_post_commands {
            Vec::new()
        } else {
            self.execute_post_load_commands(loaded)?
        };
        Ok(GroupLoadReport { loads, post_load })
    }

    /// Runs on the connection of the first member plan.
    pub fn execute_post_load_commands(&self, loaded: &LoadedPlans) -> Result<Vec<PostLoadResult>> {
        if self.post_load_sqls.is_empty() {
            return Ok(Vec::new());
        }
        let first = self
            .plan_names
            .first()
            .ok_or_else(|| SnapshotError::config(format!("plan group '{}' has no plans", self.name)))?;
        let plan = member(loaded, first)?;
        Ok(self
            .post_load_sqls
            .iter()
            .map(|sql| plan.execute_statement(sql, StatementScope::Group))
            .collect())
    }
}

fn member<'a>(loaded: &'a LoadedPlans, name: &str) -> Result<&'a SnapshotPlan> {
    loaded
        .get(name)
        .ok_or_else(|| SnapshotError::config(format!("plan '{}' is not loaded", name)))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::config::{PlanConfig, SnapshotsConfig};
    use crate::context::testing::{Fixture, base_config, daily_plan, fixture_with};
    use crate::registry::PlanRegistry;

    fn group_config(environment: &str) -> (SnapshotsConfig, String) {
        let mut users = daily_plan();
        users.name = "users".into();
        users.file_template = "users-{date:%Y%m%d}".into();
        users.post_load_sqls = vec!["UPDATE users SET password = ''".into()];
        let orders = PlanConfig {
            name: "orders".into(),
            connection: Some("pgsql".into()),
            file_template: "orders-{date:%Y%m%d}".into(),
            ..Default::default()
        };

        let mut config = base_config(vec![users, orders]);
        config.plan_groups = vec![PlanGroupConfig {
            name: "nightly".into(),
            plans: vec!["users".into(), "orders".into()],
            post_load_sqls: vec!["ANALYZE".into()],
        }];
        (config, environment.to_string())
    }

    fn setup(environment: &str) -> Fixture {
        let (config, env) = group_config(environment);
        fixture_with(config, &env)
    }

    #[test]
    fn test_find() {
        let fx = setup("production");
        assert!(PlanGroup::find(&fx.ctx, "").err().unwrap().is_configuration());
        assert!(PlanGroup::find(&fx.ctx, "weekly").unwrap().is_none());

        let group = PlanGroup::find(&fx.ctx, "nightly").unwrap().unwrap();
        assert_eq!(group.plan_names, vec!["users", "orders"]);
        assert_eq!(PlanGroup::all(&fx.ctx).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_member_is_rejected() {
        let (mut config, env) = group_config("production");
        config.plan_groups[0].plans.push("ghost".into());
        let fx = fixture_with(config, &env);
        let err = PlanGroup::find(&fx.ctx, "nightly").err().unwrap();
        assert!(err.to_string().contains("unknown plan 'ghost'"));
    }

    #[test]
    fn test_create_all_in_declared_order() {
        let fx = setup("production");
        let mut loaded = PlanRegistry::new(fx.ctx.clone()).load_all().unwrap();
        let group = PlanGroup::find(&fx.ctx, "nightly").unwrap().unwrap();
        let now = NaiveDate::from_ymd_opt(2024, 9, 13).unwrap().and_hms_opt(3, 0, 0).unwrap();

        let created = group.create_all_at(&mut loaded, now).unwrap();
        let names: Vec<&str> = created.iter().map(|s| s.file_name.as_str()).collect();
        assert_eq!(names, vec!["users-20240913.sql.gz", "orders-20240913.sql.gz"]);
        assert_eq!(fx.executor.programs(), vec!["mysqldump", "gzip", "pg_dump", "gzip"]);
        assert!(fx.reporter.saw("Creating snapshot for plan: orders"));
        assert_eq!(group.cleanup_all(&mut loaded).unwrap(), 0);
    }

    #[test]
    fn test_cleanup_all_applies_each_members_retention() {
        let fx = setup("production");
        let mut loaded = PlanRegistry::new(fx.ctx.clone()).load_all().unwrap();
        let group = PlanGroup::find(&fx.ctx, "nightly").unwrap().unwrap();
        for day in 11..=13 {
            let now = NaiveDate::from_ymd_opt(2024, 9, day).unwrap().and_hms_opt(3, 0, 0).unwrap();
            group.create_all_at(&mut loaded, now).unwrap();
        }

        // users keeps 2, orders keeps 1
        assert_eq!(group.cleanup_all(&mut loaded).unwrap(), 3);
        assert_eq!(loaded.get("users").unwrap().snapshots()[0].file_name, "users-20240913.sql.gz");
        assert_eq!(
            fx.ctx.archive.list("cloud-snapshots").unwrap(),
            vec![
                "cloud-snapshots/orders-20240913.sql.gz",
                "cloud-snapshots/users-20240912.sql.gz",
                "cloud-snapshots/users-20240913.sql.gz",
            ]
        );
    }

    #[test]
    fn test_load_all_runs_group_statements_last() {
        let fx = setup("local");
        fx.ctx.archive.put("cloud-snapshots/users-20240913.sql.gz", b"-- users").unwrap();
        fx.ctx.archive.put("cloud-snapshots/orders-20240913.sql.gz", b"-- orders").unwrap();
        let loaded = PlanRegistry::new(fx.ctx.clone()).load_all().unwrap();
        let group = PlanGroup::find(&fx.ctx, "nightly").unwrap().unwrap();

        let report = group.load_all(&loaded, &LoadOptions::default()).unwrap();
        assert_eq!(report.loads.len(), 2);
        assert_eq!(report.loads[0].post_load.len(), 1);
        assert_eq!(report.post_load.len(), 1);
        assert_eq!(report.post_load[0].scope, StatementScope::Group);

        // group statement goes to the first member's mysql connection, after everything else
        let last = fx.executor.commands().pop().unwrap();
        assert_eq!(last.program, "mysql");
        assert!(last.has_arg("ANALYZE"));
        let messages = fx.reporter.messages();
        let loading_orders = messages.iter().position(|m| m == "Loading plan: orders").unwrap();
        let analyze = messages.iter().position(|m| m == "Running SQL: ANALYZE").unwrap();
        assert!(loading_orders < analyze);
    }

    #[test]
    fn test_load_all_skips_statements_when_asked() {
        let fx = setup("local");
        fx.ctx.archive.put("cloud-snapshots/users-20240913.sql.gz", b"-- users").unwrap();
        fx.ctx.archive.put("cloud-snapshots/orders-20240913.sql.gz", b"-- orders").unwrap();
        let loaded = PlanRegistry::new(fx.ctx.clone()).load_all().unwrap();
        let group = PlanGroup::find(&fx.ctx, "nightly").unwrap().unwrap();

        let options = LoadOptions { skip_post_commands: true, ..Default::default() };
        let report = group.load_all(&loaded, &options).unwrap();
        assert!(report.post_load.is_empty());
        assert!(!fx.reporter.saw("Running SQL"));
    }

    #[test]
    fn test_load_all_without_snapshots_fails() {
        let fx = setup("local");
        let loaded = PlanRegistry::new(fx.ctx.clone()).load_all().unwrap();
        let group = PlanGroup::find(&fx.ctx, "nightly").unwrap().unwrap();
        let err = group.load_all(&loaded, &LoadOptions::default()).unwrap_err();
        assert!(err.to_string().contains("no snapshots exist for plan 'users'"));
    }
}
