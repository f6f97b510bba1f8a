//! The continuous supervisory loop.
//!
//! Two timescales drive everything: a full cycle (default 300 s) that
//! starts slow background checks for every ChangeSpec, and a fast cycle
//! (default 10 s) that polls pending checks, hook and workflow
//! completion, zombie detection, and the suffix transforms. Both cycles
//! are idempotent — running them against an unchanged world produces no
//! writes.

pub mod checks;
pub mod hook_checks;
pub mod hooks_runner;
pub mod transforms;
pub mod workflows;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::changespec::{parse_project_file, ChangeSpec};
use crate::config::Config;
use crate::vcs::{ReviewTool, Summarizer, Vcs};

use checks::CheckTracker;

/// Shared context threaded through the loop's phases.
pub struct Ctx<'a> {
    pub config: &'a Config,
    pub vcs: &'a dyn Vcs,
    pub review: &'a dyn ReviewTool,
    pub summarizer: &'a dyn Summarizer,
}

/// The supervisor owns the trait objects, the debounce cache, and the
/// pending-check set; nothing here is global.
pub struct Supervisor {
    config: Config,
    vcs: Box<dyn Vcs>,
    review: Box<dyn ReviewTool>,
    summarizer: Box<dyn Summarizer>,
    checks: CheckTracker,
    shutdown: Arc<AtomicBool>,
}

/// Recursively collect `*.gp` project files under the projects root.
pub fn find_project_files(projects_dir: &Path) -> Vec<PathBuf> {
    fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
        let Ok(entries) = std::fs::read_dir(dir) else { return };
        let mut entries: Vec<_> = entries.flatten().collect();
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let path = entry.path();
            if path.is_dir() {
                walk(&path, out);
            } else if path.extension().is_some_and(|ext| ext == "gp") {
                out.push(path);
            }
        }
    }

    let mut files = Vec::new();
    walk(projects_dir, &mut files);
    files
}

/// Parse every ChangeSpec across every project file. Unreadable files
/// are logged and skipped; the next cycle retries.
pub fn find_all_changespecs(projects_dir: &Path) -> Vec<ChangeSpec> {
    let mut all = Vec::new();
    for path in find_project_files(projects_dir) {
        match parse_project_file(&path) {
            Ok(specs) => all.extend(specs),
            Err(e) => log::warn!("skipping unreadable project file: {e}"),
        }
    }
    all
}

/// Whether a ChangeSpec is a leaf CL: no parent, or its parent is
/// Submitted. Leaves bypass the debounce on the first cycle.
pub fn is_leaf_cl(changespec: &ChangeSpec, all: &[ChangeSpec]) -> bool {
    let Some(parent_name) = &changespec.parent else {
        return true;
    };
    match all.iter().find(|cs| &cs.name == parent_name) {
        Some(parent) => parent.base_status() == "Submitted",
        // Parent not found: it may have been deleted; treat as leaf.
        None => true,
    }
}

impl Supervisor {
    pub fn new(
        config: Config,
        vcs: Box<dyn Vcs>,
        review: Box<dyn ReviewTool>,
        summarizer: Box<dyn Summarizer>,
    ) -> Self {
        let checks = CheckTracker::new(Duration::from_secs(config.check_debounce_seconds));
        Supervisor {
            config,
            vcs,
            review,
            summarizer,
            checks,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag flipped by the signal handler to stop the loop cleanly.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn ctx(&self) -> Ctx<'_> {
        Ctx {
            config: &self.config,
            vcs: self.vcs.as_ref(),
            review: self.review.as_ref(),
            summarizer: self.summarizer.as_ref(),
        }
    }

    /// One full cycle: start background checks for every ChangeSpec.
    pub fn run_check_cycle(&mut self, first_cycle: bool) -> usize {
        let all = find_all_changespecs(&self.config.projects_dir());
        let ctx = Ctx {
            config: &self.config,
            vcs: self.vcs.as_ref(),
            review: self.review.as_ref(),
            summarizer: self.summarizer.as_ref(),
        };

        let mut update_count = 0;
        for changespec in &all {
            let bypass_cache = first_cycle && is_leaf_cl(changespec, &all);
            let updates = self.checks.start_pending_checks(&ctx, changespec, &all, bypass_cache);
            for update in updates {
                log::info!("* {}: {update}", changespec.name);
                update_count += 1;
            }
        }

        if update_count > 0 {
            log::info!("Full cycle complete: {update_count} update(s)");
        }
        update_count
    }

    /// One fast cycle: poll everything that may have finished and apply
    /// the derived-state transforms.
    pub fn run_hooks_cycle(&mut self) -> usize {
        let all = find_all_changespecs(&self.config.projects_dir());
        let mut update_count = 0;

        for changespec in &all {
            let mut updates: Vec<String> = Vec::new();

            {
                let ctx = Ctx {
                    config: &self.config,
                    vcs: self.vcs.as_ref(),
                    review: self.review.as_ref(),
                    summarizer: self.summarizer.as_ref(),
                };
                updates.extend(self.checks.poll_pending_checks(&ctx, changespec, &all));
            }
            let ctx = self.ctx();

            if !changespec.hooks.is_empty() {
                updates.extend(hook_checks::check_hooks(&ctx, changespec));
            }

            updates.extend(transforms::check_comment_zombies(
                changespec,
                self.config.zombie_timeout_seconds,
            ));

            updates.extend(workflows::check_and_complete_workflows(&ctx, changespec));
            updates.extend(workflows::start_stale_workflows(&ctx, changespec));

            updates.extend(transforms::transform_old_proposal_suffixes(changespec));
            updates.extend(transforms::acknowledge_terminal_status_markers(changespec));
            updates.extend(transforms::check_ready_to_mail(changespec, &all));

            for update in &updates {
                log::info!("* {}: {update}", changespec.name);
            }
            update_count += updates.len();
        }

        self.checks.prune(&all);
        update_count
    }

    /// Sleep in small steps so a SIGINT is noticed promptly.
    fn sleep_interruptible(&self, seconds: u64) {
        let deadline = std::time::Instant::now() + Duration::from_secs(seconds);
        while std::time::Instant::now() < deadline {
            if self.shutdown.load(Ordering::Relaxed) {
                return;
            }
            std::thread::sleep(Duration::from_millis(250));
        }
    }

    /// Run until the shutdown flag is raised.
    pub fn run(&mut self) -> anyhow::Result<()> {
        let initial = find_all_changespecs(&self.config.projects_dir());
        let project_count = {
            let mut projects: Vec<String> = initial.iter().map(|cs| cs.project_name()).collect();
            projects.sort();
            projects.dedup();
            projects.len()
        };
        log::info!(
            "Loop started - full checks every {}s, hook checks every {}s",
            self.config.interval_seconds,
            self.config.hook_interval_seconds
        );
        log::info!(
            "Looping through {} ChangeSpecs across {project_count} project(s)",
            initial.len()
        );

        let mut first_cycle = true;
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return Ok(());
            }

            self.run_check_cycle(first_cycle);
            first_cycle = false;

            // Between full cycles, run the frequent hook checks.
            let mut elapsed = 0;
            while elapsed < self.config.interval_seconds {
                self.sleep_interruptible(self.config.hook_interval_seconds);
                if self.shutdown.load(Ordering::Relaxed) {
                    log::info!("Loop stopped by user");
                    return Ok(());
                }
                elapsed += self.config.hook_interval_seconds;
                if elapsed >= self.config.interval_seconds {
                    break;
                }
                self.run_hooks_cycle();
            }
        }
    }
}
