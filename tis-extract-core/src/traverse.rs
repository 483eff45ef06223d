//! Breadth-first traversal of the remote tree.
//!
//! A [`Traversal`] is one run: `Idle -> Running -> {Completed, Failed, Aborted}`.
//! The run drives the tree one level at a time:
//!
//! - Every node of the current level is expanded in its own task, at most
//!   `workers` of them at once. Each expansion fetches one node's children
//!   through the run's [`TreeClient`].
//! - Folder children are classified before anything is fetched for them.
//!   Pruned folders are dropped and kept folders go into the next level's
//!   frontier, unless the response already says they are empty.
//! - Artifact children are filtered, extracted, validated and filed into the
//!   shared [`ResultModel`] straight away.
//! - The next level starts only after every task of the current one has
//!   finished, so no level N+1 node is requested before all of level N.
//!   A task that panics becomes a [`BranchFailure`] of its node and never
//!   stalls the level.
//!
//! A node whose fetch fails (after the client's retries) becomes a
//! [`BranchFailure`] and the run carries on with its siblings. The run only
//! fails when the configured [`FailurePolicy`] says so; a failed root fetch is
//! always fatal.
//!
//! Cancellation through [`TraversalHandle::cancel`] is cooperative. No new
//! expansion starts once it is seen and requests not yet issued are dropped.
//! The run returns what it has collected with state [`RunState::Aborted`].
//! Only the first [`TraversalOutcome::levels_completed`] levels are complete
//! in that result; the level that was running when the cancel arrived is
//! partial. [`TraversalOutcome::checkpoint`] records which projects were
//! nevertheless finished, and [`Traversal::resume_from`] picks up from there.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::aggregate::{InsertOutcome, PverAmbiguity, ResultModel, ResultSnapshot};
use crate::checkpoint::Checkpoint;
use crate::client::{RetryPolicy, TreeClient};
use crate::config::{ExtractorConfig, FailurePolicy};
use crate::contract::TreeApi;
use crate::error::{ErrorKind, FetchError, PatternError, TraversalError};
use crate::extract::Extractor;
use crate::filter::{Decision, FilterEngine, PROJECT_LEVEL, SOFTWARE_LINE_LEVEL};
use crate::model::{NodeKind, TreeNode};
use crate::registry::ComponentRegistry;
use crate::stats::{RunStats, StatsSnapshot};
use crate::validate::Validator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Failed,
    Aborted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed | RunState::Aborted)
    }
}

/// A node whose children could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchFailure {
    pub node_id: String,
    pub node_name: String,
    pub level: usize,
    pub path: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Everything a finished run hands back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalOutcome {
    pub run_id: Uuid,
    pub state: RunState,
    pub result: ResultSnapshot,
    pub failures: Vec<BranchFailure>,
    pub ambiguities: Vec<PverAmbiguity>,
    pub stats: StatsSnapshot,
    /// Levels whose expansion finished completely.
    pub levels_completed: usize,
    /// Why the run failed, when it did.
    pub fatal: Option<String>,
    /// Ids of the projects whose whole subtree was expanded without a failure.
    #[serde(default)]
    pub completed_projects: BTreeSet<String>,
}

impl TraversalOutcome {
    /// Turns a failed run into an error. Completed and aborted runs pass.
    pub fn check(&self) -> Result<(), TraversalError> {
        match (&self.state, &self.fatal) {
            (RunState::Failed, Some(reason)) => Err(TraversalError::Fatal(reason.clone())),
            (RunState::Failed, None) => Err(TraversalError::Fatal("unknown failure".into())),
            _ => Ok(()),
        }
    }

    /// What a later run needs to skip the projects this one finished.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            result: self.result.clone(),
            completed_projects: self.completed_projects.clone(),
        }
    }
}

/// Worker count and failure policy of a run.
#[derive(Debug, Clone)]
pub struct TraversalSettings {
    pub workers: usize,
    pub failure_policy: FailurePolicy,
    pub retry: RetryPolicy,
}

impl Default for TraversalSettings {
    fn default() -> Self {
        TraversalSettings {
            workers: 4,
            failure_policy: FailurePolicy::RootOnly,
            retry: RetryPolicy::default(),
        }
    }
}

/// Observes and cancels a run from outside.
#[derive(Debug, Clone)]
pub struct TraversalHandle {
    cancel: CancellationToken,
    state: watch::Receiver<RunState>,
}

impl TraversalHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Waits until the run reaches a terminal state.
    pub async fn finished(&mut self) -> RunState {
        let reached = self
            .state
            .wait_for(RunState::is_terminal)
            .await
            .map(|state| *state);
        reached.unwrap_or_else(|_| *self.state.borrow())
    }
}

pub struct Traversal<A: TreeApi + ?Sized + 'static> {
    api: Arc<A>,
    root_id: String,
    settings: TraversalSettings,
    filter: Arc<FilterEngine>,
    registry: Arc<ComponentRegistry>,
    extractor: Arc<Extractor>,
    validator: Arc<Validator>,
    cancel: CancellationToken,
    state: watch::Sender<RunState>,
    run_id: Uuid,
    resume: Option<Arc<Checkpoint>>,
}

impl<A: TreeApi + ?Sized + 'static> Traversal<A> {
    /// Builds a run from configuration. The filter's reference time for
    /// deletion checks is taken now.
    pub fn from_config(api: Arc<A>, config: &ExtractorConfig) -> Result<Self, PatternError> {
        let (filter, registry) = compile_config(config)?;
        let settings = TraversalSettings {
            workers: config.traversal.workers,
            failure_policy: config.traversal.failure_policy,
            retry: RetryPolicy::from(&config.retry),
        };
        Ok(Traversal::new(
            api,
            config.api.root_id.clone(),
            settings,
            filter,
            registry,
            config.api.link_template.clone(),
        ))
    }

    pub fn new(
        api: Arc<A>,
        root_id: impl Into<String>,
        settings: TraversalSettings,
        filter: FilterEngine,
        registry: ComponentRegistry,
        link_template: Option<String>,
    ) -> Self {
        let registry = Arc::new(registry);
        let (state, _) = watch::channel(RunState::Idle);
        Traversal {
            api,
            root_id: root_id.into(),
            settings,
            filter: Arc::new(filter),
            extractor: Arc::new(Extractor::new(registry.clone(), link_template)),
            validator: Arc::new(Validator::new(registry.clone())),
            registry,
            cancel: CancellationToken::new(),
            state,
            run_id: Uuid::new_v4(),
            resume: None,
        }
    }

    /// Continues the work recorded in `checkpoint`. Its completed projects are
    /// copied into this run's result and nothing below them is requested.
    pub fn resume_from(mut self, checkpoint: Checkpoint) -> Self {
        info!(
            run_id = %self.run_id,
            completed_projects = checkpoint.completed_projects.len(),
            "Resuming from checkpoint"
        );
        self.resume = Some(Arc::new(checkpoint));
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn handle(&self) -> TraversalHandle {
        TraversalHandle {
            cancel: self.cancel.clone(),
            state: self.state.subscribe(),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Runs the traversal to completion, failure or cancellation.
    pub async fn run(&self) -> Result<TraversalOutcome, TraversalError> {
        if self.state() != RunState::Idle {
            return Err(TraversalError::AlreadyStarted);
        }
        self.state.send_replace(RunState::Running);
        let span = info_span!("traversal", run_id = %self.run_id);
        let outcome = self.execute().instrument(span).await;
        self.state.send_replace(outcome.state);
        Ok(outcome)
    }

    async fn execute(&self) -> TraversalOutcome {
        let workers = self.settings.workers.max(1);
        info!(root_id = %self.root_id, workers, resumed = self.resume.is_some(), "Traversal started");

        let stats = Arc::new(RunStats::default());
        let halt = self.cancel.child_token();
        let ctx = Arc::new(RunContext {
            client: TreeClient::new(
                self.api.clone(),
                self.settings.retry.clone(),
                stats.clone(),
                halt.clone(),
            ),
            stats: stats.clone(),
            model: ResultModel::new(),
            filter: self.filter.clone(),
            extractor: self.extractor.clone(),
            validator: self.validator.clone(),
            policy: self.settings.failure_policy,
            resume: self.resume.clone(),
            halt,
            next: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            fatal: Mutex::new(None),
            incomplete: Mutex::new(HashSet::new()),
        });

        let mut frontier = vec![Expansion::root(&self.root_id)];
        let mut levels_completed = 0;
        while !frontier.is_empty() {
            let dropped = expand_level(&ctx, frontier, workers).await;
            frontier = std::mem::take(&mut *ctx.next.lock().await);
            if ctx.halt.is_cancelled() {
                info!(
                    level = levels_completed,
                    dropped = dropped.len() + frontier.len(),
                    "Traversal halted, frontier dropped"
                );
                ctx.abandon(dropped).await;
                ctx.abandon(std::mem::take(&mut frontier)).await;
                break;
            }
            info!(
                completed_level = levels_completed,
                next_frontier = frontier.len(),
                artifacts = ctx.model.artifact_count(),
                "Level complete"
            );
            levels_completed += 1;
        }

        let failures = std::mem::take(&mut *ctx.failures.lock().await);
        let fatal = ctx.fatal.lock().await.clone();
        let incomplete = std::mem::take(&mut *ctx.incomplete.lock().await);
        let result = match Arc::try_unwrap(ctx) {
            Ok(ctx) => ctx.model.finalize(),
            Err(ctx) => ctx.model.snapshot(),
        };

        let state = if fatal.is_some() {
            RunState::Failed
        } else if self.cancel.is_cancelled() {
            RunState::Aborted
        } else {
            RunState::Completed
        };
        let ambiguities = result.pver_ambiguities(&self.registry);
        let completed_projects: BTreeSet<String> = result
            .projects
            .values()
            .map(|project| project.project_rid.clone())
            .filter(|rid| !rid.is_empty() && !incomplete.contains(rid))
            .collect();
        let stats = stats.snapshot();

        match state {
            RunState::Failed => error!(
                reason = fatal.as_deref().unwrap_or_default(),
                failures = failures.len(),
                "Traversal failed"
            ),
            _ => info!(
                ?state,
                projects = result.projects.len(),
                artifacts = result.artifact_count(),
                failures = failures.len(),
                ambiguities = ambiguities.len(),
                api_calls = stats.api_calls,
                cache_hits = stats.cache_hits,
                pruned = stats.branches_pruned,
                completed_projects = completed_projects.len(),
                "Traversal finished"
            ),
        }

        TraversalOutcome {
            run_id: self.run_id,
            state,
            result,
            failures,
            ambiguities,
            stats,
            levels_completed,
            fatal,
            completed_projects,
        }
    }
}

/// Compiles the filter and component registry of `config` without starting a run.
pub fn compile_config(
    config: &ExtractorConfig,
) -> Result<(FilterEngine, ComponentRegistry), PatternError> {
    let filter = FilterEngine::new(&config.artifact_filters, &config.branch_pruning, Utc::now())?;
    let registry =
        ComponentRegistry::from_config(&config.naming_convention, &config.path_convention)?;
    Ok((filter, registry))
}

/// Ancestry of a frontier entry: its project, software line and folder path.
#[derive(Debug, Clone, Default)]
struct Lineage {
    project_rid: Option<String>,
    project: Option<String>,
    software_line: Option<String>,
    path: Vec<String>,
}

impl Lineage {
    fn descend(&self, child: &TreeNode) -> Lineage {
        let mut path = self.path.clone();
        path.push(child.name.clone());
        let in_project = child.level == PROJECT_LEVEL;
        Lineage {
            project_rid: if in_project {
                Some(child.id.clone())
            } else {
                self.project_rid.clone()
            },
            project: if in_project {
                Some(child.name.clone())
            } else {
                self.project.clone()
            },
            software_line: if child.level == SOFTWARE_LINE_LEVEL {
                Some(child.name.clone())
            } else {
                self.software_line.clone()
            },
            path,
        }
    }
}

struct Expansion {
    node: TreeNode,
    lineage: Lineage,
}

impl Expansion {
    fn root(root_id: &str) -> Self {
        Expansion {
            node: TreeNode::root(root_id),
            lineage: Lineage::default(),
        }
    }
}

struct RunContext<A: TreeApi + ?Sized> {
    client: TreeClient<A>,
    stats: Arc<RunStats>,
    model: ResultModel,
    filter: Arc<FilterEngine>,
    extractor: Arc<Extractor>,
    validator: Arc<Validator>,
    policy: FailurePolicy,
    resume: Option<Arc<Checkpoint>>,
    /// Cancelled by the caller's token or by a fatal failure.
    halt: CancellationToken,
    next: Mutex<Vec<Expansion>>,
    failures: Mutex<Vec<BranchFailure>>,
    fatal: Mutex<Option<String>>,
    /// Projects with a dropped or failed expansion somewhere below them.
    incomplete: Mutex<HashSet<String>>,
}

/// Expands one level with at most `workers` tasks in flight and waits for
/// all of them. Returns the entries never started because the run halted.
async fn expand_level<A: TreeApi + ?Sized + 'static>(
    ctx: &Arc<RunContext<A>>,
    frontier: Vec<Expansion>,
    workers: usize,
) -> Vec<Expansion> {
    let mut pending = frontier.into_iter();
    let mut started = stream::iter(std::iter::from_fn(|| {
        if ctx.halt.is_cancelled() {
            None
        } else {
            pending.next()
        }
    }))
    .map(|expansion| {
        let ctx = ctx.clone();
        async move {
            let node = expansion.node.clone();
            let lineage = expansion.lineage.clone();
            let task = ctx.clone();
            let joined = tokio::spawn(
                async move { task.expand(expansion).await }.in_current_span(),
            )
            .await;
            if let Err(e) = joined {
                ctx.expansion_lost(&node, &lineage, e).await;
            }
        }
    })
    .buffer_unordered(workers);
    while started.next().await.is_some() {}
    drop(started);
    pending.collect()
}

impl<A: TreeApi + ?Sized> RunContext<A> {
    async fn expand(&self, expansion: Expansion) {
        let Expansion { node, lineage } = expansion;
        self.stats.record_expanded();
        let children = match self.client.fetch_children(&node).await {
            Ok(children) => children,
            Err(FetchError::Cancelled) => {
                debug!(node_id = %node.id, "Expansion skipped, run halted");
                self.mark_incomplete(&lineage).await;
                return;
            }
            Err(e) => {
                self.record_failure(&node, &lineage, e.kind(), e.to_string())
                    .await;
                return;
            }
        };
        debug!(node_id = %node.id, level = node.level, children = children.len(), "Expanded node");

        let mut enqueue = Vec::new();
        for child in children {
            if child.kind == NodeKind::Artifact {
                self.file_artifact(&lineage, &child);
                continue;
            }
            match self.filter.classify(&child) {
                Decision::PruneSubtree | Decision::Skip => {
                    self.stats.record_pruned();
                    debug!(node_id = %child.id, name = %child.name, level = child.level, "Branch pruned");
                }
                Decision::Keep => {
                    if child.level == PROJECT_LEVEL && self.restore_project(&child) {
                        continue;
                    }
                    let child_lineage = lineage.descend(&child);
                    if child.level == PROJECT_LEVEL {
                        self.model.register_project(&child.id, &child.name);
                    } else if child.level == SOFTWARE_LINE_LEVEL {
                        if let Some(project) = &child_lineage.project {
                            self.model
                                .register_software_line(project, &child.id, &child.name);
                        }
                    }
                    if child.child_count_hint == Some(0) {
                        debug!(node_id = %child.id, name = %child.name, "Listed as empty, not expanded");
                        continue;
                    }
                    enqueue.push(Expansion {
                        node: child,
                        lineage: child_lineage,
                    });
                }
            }
        }
        if !enqueue.is_empty() {
            self.next.lock().await.extend(enqueue);
        }
    }

    /// Files a project the resumed run already finished. Returns false when
    /// the project has to be traversed.
    fn restore_project(&self, project: &TreeNode) -> bool {
        let Some(done) = self
            .resume
            .as_ref()
            .and_then(|checkpoint| checkpoint.completed_project(&project.id))
        else {
            return false;
        };
        let restored = self.model.restore_project(done);
        self.stats.record_resumed();
        info!(project = %project.name, project_rid = %project.id, restored, "Project taken from checkpoint");
        true
    }

    fn file_artifact(&self, lineage: &Lineage, node: &TreeNode) {
        if self.filter.classify(node) != Decision::Keep {
            self.stats.record_skipped();
            return;
        }
        let (Some(project), Some(line)) = (&lineage.project, &lineage.software_line) else {
            warn!(artifact_rid = %node.id, name = %node.name, "Artifact outside a software line ignored");
            self.stats.record_skipped();
            return;
        };

        let record = self.extractor.record(node, lineage.path.clone());
        let deviation = self.validator.validate(&record);
        let record = record.with_deviation(deviation);

        match self.model.insert(project, line, record) {
            InsertOutcome::Inserted { became_latest } => {
                self.stats.record_kept();
                debug!(artifact_rid = %node.id, project = %project, software_line = %line, became_latest, "Artifact filed");
            }
            InsertOutcome::Duplicate | InsertOutcome::OwnedElsewhere { .. } => {
                debug!(artifact_rid = %node.id, "Artifact already filed");
            }
        }
    }

    async fn mark_incomplete(&self, lineage: &Lineage) {
        if let Some(rid) = &lineage.project_rid {
            self.incomplete.lock().await.insert(rid.clone());
        }
    }

    async fn abandon(&self, dropped: Vec<Expansion>) {
        let mut incomplete = self.incomplete.lock().await;
        incomplete.extend(dropped.into_iter().filter_map(|e| e.lineage.project_rid));
    }

    async fn expansion_lost(&self, node: &TreeNode, lineage: &Lineage, error: JoinError) {
        let message = if error.is_panic() {
            format!("expansion panicked: {error}")
        } else {
            format!("expansion stopped: {error}")
        };
        error!(node_id = %node.id, level = node.level, %message, "Expansion task died");
        self.record_failure(node, lineage, ErrorKind::Internal, message)
            .await;
    }

    async fn record_failure(&self, node: &TreeNode, lineage: &Lineage, kind: ErrorKind, message: String) {
        self.stats.record_failure();
        self.mark_incomplete(lineage).await;
        let failure = BranchFailure {
            node_id: node.id.clone(),
            node_name: node.name.clone(),
            level: node.level,
            path: lineage.path.join("/"),
            kind,
            message,
        };
        warn!(
            node_id = %failure.node_id,
            level = failure.level,
            kind = ?failure.kind,
            error = %failure.message,
            "Branch expansion failed, continuing with siblings"
        );

        let mut failures = self.failures.lock().await;
        let reason = if node.level == 0 {
            Some(format!("root node {} could not be fetched: {}", node.id, failure.message))
        } else {
            match self.policy {
                FailurePolicy::RootOnly => None,
                FailurePolicy::FailFast => {
                    Some(format!("branch {} failed: {}", node.id, failure.message))
                }
                FailurePolicy::Threshold(max) if failures.len() + 1 > max => Some(format!(
                    "{} branch failures exceed the threshold of {max}",
                    failures.len() + 1
                )),
                FailurePolicy::Threshold(_) => None,
            }
        };
        failures.push(failure);
        drop(failures);

        if let Some(reason) = reason {
            self.fail(reason).await;
        }
    }

    async fn fail(&self, reason: String) {
        error!(reason = %reason, "Fatal failure policy triggered");
        let mut fatal = self.fatal.lock().await;
        if fatal.is_none() {
            *fatal = Some(reason);
        }
        self.halt.cancel();
    }
}
