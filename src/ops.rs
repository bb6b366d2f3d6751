use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use colored::*;
use comfy_table::{Attribute, Cell, ContentArrangement, Table, presets::UTF8_FULL};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use crate::config::{load_config, resolve_environment};
use crate::context::SnapshotContext;
use crate::group::PlanGroup;
use crate::plan::{LoadOptions, PostLoadResult, SnapshotPlan};
use crate::registry::{LoadedPlans, PlanRegistry, RESERVED_PLAN_NAME};
use crate::snapshot::Snapshot;
use crate::report::Reporter;

/// Prints reporter messages and drives a download progress bar.
struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    fn new() -> Self {
        Self { bar: Mutex::new(None) }
    }
}

impl Reporter for CliReporter {
    fn message(&self, message: &str) {
        println!("{} {}", "›".cyan().bold(), message.dimmed());
    }

    fn progress(&self, transferred: u64, total: u64) {
        let Ok(mut slot) = self.bar.lock() else { return };
        let bar = slot.get_or_insert_with(|| download_bar(total));
        bar.set_position(transferred);
        if transferred >= total {
            bar.finish_and_clear();
            *slot = None;
        }
    }
}

fn download_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::with_template("{bar:40.cyan/blue} {bytes}/{total_bytes} {eta}") {
        bar.set_style(style.progress_chars("=> "));
    }
    bar
}

fn create_progress_bar(prefix: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        bar.set_style(style.tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ "));
    }
    bar.set_message(prefix.to_string());
    bar.enable_steady_tick(std::time::Duration::from_millis(80));
    bar
}

/// Load configuration and build the per-invocation context. Storage roots
/// are relative to the configuration file's directory.
pub fn open_context(config_path: &Path, env: Option<&str>) -> Result<Arc<SnapshotContext>> {
    let config = load_config(config_path)?;
    let environment = resolve_environment(env, &config);
    let base = match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    debug!(config = %config_path.display(), environment = %environment, "context opened");

    let ctx = SnapshotContext::new(config, environment, &base).with_reporter(Arc::new(CliReporter::new()));
    Ok(Arc::new(ctx))
}

fn load_plans(ctx: &Arc<SnapshotContext>) -> Result<LoadedPlans> {
    let loaded = PlanRegistry::new(ctx.clone()).load_all()?;
    for file in &loaded.unaccepted_files {
        debug!(file = %file, "archived file not claimed by any plan");
    }
    Ok(loaded)
}

/// Warn about utilities that do not resolve on PATH.
fn preflight(plans: &[&SnapshotPlan]) {
    let mut checked: Vec<String> = Vec::new();
    for plan in plans {
        for utility in plan.required_utilities() {
            if checked.contains(&utility) {
                continue;
            }
            if which::which(&utility).is_err() {
                eprintln!(
                    "{} {}",
                    "!".yellow().bold(),
                    format!("'{}' was not found; plan '{}' needs it", utility, plan.name).yellow()
                );
            }
            checked.push(utility);
        }
    }
}

enum Target {
    Plans(Vec<String>),
    Group(PlanGroup),
}

/// A plan name, else a group name. `None` means every plan.
fn resolve_target(ctx: &Arc<SnapshotContext>, loaded: &LoadedPlans, name: Option<&str>) -> Result<Target> {
    let Some(name) = name else {
        return Ok(Target::Plans(loaded.names().into_iter().map(str::to_string).collect()));
    };
    if loaded.get(name).is_some() {
        return Ok(Target::Plans(vec![name.to_string()]));
    }
    match PlanGroup::find(ctx, name)? {
        Some(group) => Ok(Target::Group(group)),
        None => Err(anyhow!("no plan or plan group named '{}'", name)),
    }
}

fn find_plan<'a>(loaded: &'a LoadedPlans, name: &str) -> Result<&'a SnapshotPlan> {
    loaded.get(name).ok_or_else(|| anyhow!("plan '{}' not found", name))
}

fn ensure_can_create(ctx: &SnapshotContext, plan: &SnapshotPlan) -> Result<()> {
    if plan.can_create() {
        return Ok(());
    }
    Err(anyhow!(
        "plan '{}' may only create snapshots in the '{}' environment (current: '{}')",
        plan.name,
        plan.environment_locks.create,
        ctx.environment
    ))
}

fn ensure_can_load(ctx: &SnapshotContext, plan: &SnapshotPlan) -> Result<()> {
    if plan.can_load() {
        return Ok(());
    }
    Err(anyhow!(
        "plan '{}' may only load snapshots in the '{}' environment (current: '{}')",
        plan.name,
        plan.environment_locks.load,
        ctx.environment
    ))
}

pub fn do_list(ctx: &Arc<SnapshotContext>, only: Option<&str>) -> Result<()> {
    let loaded = load_plans(ctx)?;
    if let Some(name) = only {
        find_plan(&loaded, name)?;
    }

    for plan in loaded.plans.iter().filter(|p| only.is_none_or(|n| n == p.name)) {
        println!("{} {}", "●".green().bold(), plan.name.bold());
        if plan.snapshots().is_empty() {
            println!("{} {}", "i".yellow().bold(), "No snapshots found".yellow());
            continue;
        }

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("#").add_attribute(Attribute::Bold),
                Cell::new("File").add_attribute(Attribute::Bold),
                Cell::new("Date").add_attribute(Attribute::Bold),
                Cell::new("Size").add_attribute(Attribute::Bold),
                Cell::new("Cached").add_attribute(Attribute::Bold),
            ]);
        for (i, s) in plan.snapshots().iter().enumerate() {
            let size = s.formatted_size().unwrap_or_else(|_| "?".to_string());
            table.add_row(vec![
                Cell::new(i + 1),
                Cell::new(&s.file_name),
                Cell::new(s.date.format("%Y-%m-%d %H:%M").to_string()),
                Cell::new(size),
                Cell::new(if s.exists_locally() { "yes" } else { "no" }),
            ]);
        }
        println!("{}", table);
    }

    if only.is_none() {
        let cached = PlanRegistry::new(ctx.clone()).cached_files()?;
        if !cached.is_empty() {
            println!("{} {}", "●".cyan().bold(), RESERVED_PLAN_NAME.bold());
            let mut table = Table::new();
            table.load_preset(UTF8_FULL).set_header(vec!["File", "Size"]);
            for c in &cached {
                table.add_row(vec![c.file_name.as_str(), c.formatted_size.as_str()]);
            }
            println!("{}", table);
        }
    }
    Ok(())
}

pub fn do_create(ctx: &Arc<SnapshotContext>, target: Option<&str>, cleanup: bool) -> Result<()> {
    let mut loaded = load_plans(ctx)?;
    let target = resolve_target(ctx, &loaded, target)?;
    let names = match &target {
        Target::Plans(names) => names.clone(),
        Target::Group(group) => group.plan_names.clone(),
    };

    let members = names.iter().map(|n| find_plan(&loaded, n)).collect::<Result<Vec<_>>>()?;
    for member in &members {
        ensure_can_create(ctx, member)?;
    }
    preflight(&members);

    match target {
        Target::Plans(names) => {
            for name in &names {
                let plan = loaded.get_mut(name).ok_or_else(|| anyhow!("plan '{}' not found", name))?;
                let bar = create_progress_bar("Creating snapshot");
                bar.set_message(format!("Creating snapshot for plan: {}", name));
                let created = plan.create();
                bar.finish_and_clear();
                print_created(&created?)?;

                if cleanup {
                    print_removed(plan.cleanup());
                }
            }
        }
        Target::Group(group) => {
            for snapshot in &group.create_all(&mut loaded)? {
                print_created(snapshot)?;
            }
            if cleanup {
                print_removed(group.cleanup_all(&mut loaded)?);
            }
        }
    }
    Ok(())
}

fn print_created(snapshot: &Snapshot) -> Result<()> {
    println!(
        "{} {}",
        "✔".green().bold(),
        format!("Created {} ({})", snapshot.file_name, snapshot.formatted_size()?).green()
    );
    Ok(())
}

fn print_removed(removed: usize) {
    if removed > 0 {
        println!("{} {}", "✔".green().bold(), format!("Removed {} old snapshot(s)", removed).green());
    }
}

pub fn do_load(
    ctx: &Arc<SnapshotContext>,
    target: Option<&str>,
    file: Option<&str>,
    options: &LoadOptions,
) -> Result<()> {
    let loaded = load_plans(ctx)?;
    let target = match target {
        Some(name) => resolve_target(ctx, &loaded, Some(name))?,
        None if loaded.plans.len() == 1 => Target::Plans(vec![loaded.plans[0].name.clone()]),
        None => return Err(anyhow!("more than one plan is configured; name the plan or group to load")),
    };

    match target {
        Target::Plans(names) => {
            let plan = find_plan(&loaded, &names[0])?;
            ensure_can_load(ctx, plan)?;
            preflight(&[plan]);

            let snapshot = match file {
                Some(key) => plan
                    .lookup(key)
                    .ok_or_else(|| anyhow!("snapshot '{}' not found in plan '{}'", key, plan.name))?,
                None => plan
                    .snapshots()
                    .first()
                    .ok_or_else(|| anyhow!("no snapshots exist for plan '{}'", plan.name))?,
            };
            let report = plan.load(snapshot, options)?;
            print_post_load(&report.post_load);
            println!("{} {}", "✔".green().bold(), format!("Loaded {}", report.file_name).green());
        }
        Target::Group(group) => {
            if file.is_some() {
                return Err(anyhow!("a file cannot be chosen when loading plan group '{}'", group.name));
            }
            let members = group.plans(&loaded)?;
            for member in &members {
                ensure_can_load(ctx, member)?;
            }
            preflight(&members);

            let report = group.load_all(&loaded, options)?;
            for load in &report.loads {
                print_post_load(&load.post_load);
                println!("{} {}", "✔".green().bold(), format!("Loaded {} ({})", load.file_name, load.plan).green());
            }
            print_post_load(&report.post_load);
        }
    }
    Ok(())
}

fn print_post_load(results: &[PostLoadResult]) {
    for r in results {
        match &r.error {
            None => println!("{} {}", "✔".green().bold(), r.statement.green()),
            Some(err) => eprintln!("{} {} {}", "✗".red().bold(), r.statement.red(), err.red()),
        }
    }
}

pub fn do_delete(ctx: &Arc<SnapshotContext>, plan_name: &str, key: &str, yes: bool) -> Result<()> {
    let loaded = load_plans(ctx)?;
    let plan = find_plan(&loaded, plan_name)?;
    let snapshot = plan
        .lookup(key)
        .cloned()
        .ok_or_else(|| anyhow!("snapshot '{}' not found in plan '{}'", key, plan_name))?;

    if !yes && !prompt_confirm(&format!("Delete snapshot '{}'? [y/N] ", snapshot.file_name))? {
        println!("Aborted.");
        return Ok(());
    }

    if !snapshot.remove() {
        return Err(anyhow!("failed to delete '{}' from the archive", snapshot.file_name));
    }
    println!("{} {}", "✔".green().bold(), format!("Deleted snapshot '{}'", snapshot.file_name).green());
    Ok(())
}

pub fn do_cleanup(ctx: &Arc<SnapshotContext>, target: Option<&str>, dry_run: bool) -> Result<()> {
    let mut loaded = load_plans(ctx)?;
    let names = match resolve_target(ctx, &loaded, target)? {
        Target::Group(group) if !dry_run => {
            let removed = group.cleanup_all(&mut loaded)?;
            println!("{} {}", "✔".green().bold(), format!("{}: removed {} snapshot(s)", group.name, removed).green());
            return Ok(());
        }
        Target::Group(group) => group.plan_names,
        Target::Plans(names) => names,
    };

    for name in &names {
        let plan = loaded.get_mut(name).ok_or_else(|| anyhow!("plan '{}' not found", name))?;
        if dry_run {
            let count = plan.cleanup_count();
            for s in plan.snapshots().iter().skip(plan.keep_last) {
                println!("{} would remove {}", "i".yellow().bold(), s.file_name);
            }
            println!("{} {}", "i".yellow().bold(), format!("{}: {} snapshot(s) to remove", plan.name, count).yellow());
        } else {
            let removed = plan.cleanup();
            println!("{} {}", "✔".green().bold(), format!("{}: removed {} snapshot(s)", plan.name, removed).green());
        }
    }
    Ok(())
}

pub fn do_clear_cache(ctx: &Arc<SnapshotContext>, plan: Option<&str>, except: Option<&str>) -> Result<()> {
    let registry = PlanRegistry::new(ctx.clone());
    let cleared = match plan {
        Some(name) => {
            let plans = registry.build_plans()?;
            let plan = plans
                .iter()
                .find(|p| p.name == name)
                .ok_or_else(|| anyhow!("plan '{}' not found", name))?;
            plan.clear_cached(except)?
        }
        None => registry.clear_all_cached(except)?,
    };

    if cleared.is_empty() {
        println!("{} {}", "i".yellow().bold(), "Nothing to remove from the local cache".yellow());
        return Ok(());
    }
    for name in &cleared {
        println!("{} {}", "✔".green().bold(), format!("Removed {}", name).green());
    }
    Ok(())
}

pub fn do_plans(ctx: &Arc<SnapshotContext>) -> Result<()> {
    let plans = PlanRegistry::new(ctx.clone()).build_plans()?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Plan", "Connection", "Template", "Keep", "Create in", "Load in"]);
    for p in &plans {
        let s = p.settings();
        table.add_row(vec![
            Cell::new(&s.name),
            Cell::new(&s.connection),
            Cell::new(&s.file_template),
            Cell::new(s.keep_last),
            Cell::new(&s.environment_locks.create),
            Cell::new(&s.environment_locks.load),
        ]);
    }
    println!("{}", table);

    let groups = PlanGroup::all(ctx)?;
    if !groups.is_empty() {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL).set_header(vec!["Group", "Plans", "Post-load statements"]);
        for g in &groups {
            table.add_row(vec![g.name.clone(), g.plan_names.join(", "), g.post_load_sqls.len().to_string()]);
        }
        println!("{}", table);
    }
    println!("{} {}", "i".yellow().bold(), format!("environment: {}", ctx.environment).yellow());
    Ok(())
}

fn prompt_confirm(message: &str) -> Result<bool> {
    use std::io::{self, Write};
    print!("{} {}", "?".cyan().bold(), message.cyan());
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let ans = input.trim().to_lowercase();
    Ok(ans == "y" || ans == "yes")
}
