//! Graph construction and recurring evaluation
//!
//! The graph validates its topology up front: unknown or duplicate node
//! names and dependency cycles are rejected at build time, and the
//! evaluation order (connected components, topologically sorted inside
//! each) is computed once. The scheduler then drives recurring ticks: a
//! node evaluates when its declared interval has elapsed, never
//! concurrently with itself, and a failing node does not abort its
//! siblings.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::error::GraphError;
use crate::stats::{ErrorKind, SharedReporter};
use crate::store::{WindowRegistry, WindowStore};

use super::node::{AnalysisNode, NodeOutcome};

// ============================================================================
// Graph
// ============================================================================

/// Directed graph of analysis nodes
#[derive(Default)]
pub struct AnalysisGraph {
    nodes: Vec<Arc<dyn AnalysisNode>>,
    index: HashMap<String, usize>,
    /// dependencies[i] lists the node indices node i depends on
    dependencies: Vec<Vec<usize>>,
}

impl AnalysisGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node
    ///
    /// # Errors
    ///
    /// Returns `DuplicateNode` if a node with the same name exists.
    pub fn add_node(&mut self, node: Arc<dyn AnalysisNode>) -> Result<(), GraphError> {
        let name = node.name().to_string();
        if self.index.contains_key(&name) {
            return Err(GraphError::DuplicateNode(name));
        }
        self.index.insert(name, self.nodes.len());
        self.nodes.push(node);
        self.dependencies.push(Vec::new());
        Ok(())
    }

    /// Declare that `node` consumes the output of `dependency`
    ///
    /// # Errors
    ///
    /// Returns `UnknownNode` if either name is not registered.
    pub fn add_dependency(&mut self, node: &str, dependency: &str) -> Result<(), GraphError> {
        let node_idx = self.index_of(node)?;
        let dep_idx = self.index_of(dependency)?;
        if !self.dependencies[node_idx].contains(&dep_idx) {
            self.dependencies[node_idx].push(dep_idx);
        }
        Ok(())
    }

    /// Number of registered nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn index_of(&self, name: &str) -> Result<usize, GraphError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::UnknownNode(name.to_string()))
    }

    /// Independent subgraphs with no cross-component ordering constraints
    ///
    /// Computed over the undirected view of the dependency edges; each
    /// component lists node indices in registration order.
    fn connected_components(&self) -> Vec<Vec<usize>> {
        let n = self.nodes.len();
        let mut neighbors: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (node, deps) in self.dependencies.iter().enumerate() {
            for &dep in deps {
                neighbors[node].push(dep);
                neighbors[dep].push(node);
            }
        }

        let mut component_of = vec![usize::MAX; n];
        let mut components: Vec<Vec<usize>> = Vec::new();
        for start in 0..n {
            if component_of[start] != usize::MAX {
                continue;
            }
            let id = components.len();
            let mut members = Vec::new();
            let mut queue = vec![start];
            component_of[start] = id;
            while let Some(node) = queue.pop() {
                members.push(node);
                for &next in &neighbors[node] {
                    if component_of[next] == usize::MAX {
                        component_of[next] = id;
                        queue.push(next);
                    }
                }
            }
            members.sort_unstable();
            components.push(members);
        }
        components
    }

    /// Per-component evaluation order following the dependency edges
    ///
    /// # Errors
    ///
    /// Returns `Cycle` naming a node on the cycle if the edges are not
    /// acyclic.
    pub fn evaluation_order(&self) -> Result<Vec<Vec<usize>>, GraphError> {
        let mut visited = vec![false; self.nodes.len()];
        let mut in_progress = vec![false; self.nodes.len()];
        let mut sorted = Vec::new();
        for node in 0..self.nodes.len() {
            self.visit_for_sort(node, &mut visited, &mut in_progress, &mut sorted)?;
        }

        // Project the global topological order onto each component.
        let rank: HashMap<usize, usize> =
            sorted.iter().enumerate().map(|(r, &n)| (n, r)).collect();
        let mut components = self.connected_components();
        for component in &mut components {
            component.sort_by_key(|node| rank[node]);
        }
        Ok(components)
    }

    /// Depth-first post-order with temp marks for cycle detection
    fn visit_for_sort(
        &self,
        node: usize,
        visited: &mut [bool],
        in_progress: &mut [bool],
        sorted: &mut Vec<usize>,
    ) -> Result<(), GraphError> {
        if in_progress[node] {
            return Err(GraphError::Cycle(self.nodes[node].name().to_string()));
        }
        if visited[node] {
            return Ok(());
        }
        in_progress[node] = true;
        for &dep in &self.dependencies[node] {
            self.visit_for_sort(dep, visited, in_progress, sorted)?;
        }
        in_progress[node] = false;
        visited[node] = true;
        sorted.push(node);
        Ok(())
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Configuration for the recurring scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between scheduler ticks
    pub tick: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(5),
        }
    }
}

/// Evaluation state of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Idle,
    Evaluating,
}

/// Per-node bookkeeping behind the scheduler lock
struct NodeSlot {
    state: NodeState,
    last_run: Option<Instant>,
    interval_override: Option<Duration>,
    outcome: Option<NodeOutcome>,
}

impl NodeSlot {
    fn new() -> Self {
        Self {
            state: NodeState::Idle,
            last_run: None,
            interval_override: None,
            outcome: None,
        }
    }
}

/// Report of one node evaluation within a tick
#[derive(Debug)]
pub struct NodeReport {
    /// Node name
    pub node: String,
    /// The evaluation result
    pub result: Result<NodeOutcome, GraphError>,
}

/// Source of the current window for scheduler ticks
///
/// Windows rotate and old ones are deleted independently, so the scheduler
/// attaches to a window only for the duration of one tick.
#[async_trait::async_trait]
pub trait WindowSource: Send + Sync {
    /// Open a read handle on the current window, if one exists
    async fn current(&self) -> Option<WindowStore>;
}

/// Default window source: the most recent committed window on disk
pub struct RegistrySource {
    registry: Arc<WindowRegistry>,
}

impl RegistrySource {
    /// Create a source over the given registry
    pub fn new(registry: Arc<WindowRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait::async_trait]
impl WindowSource for RegistrySource {
    async fn current(&self) -> Option<WindowStore> {
        self.registry.open_latest()
    }
}

/// Recurring evaluator over a validated analysis graph
///
/// Components are independent; within one, nodes run in dependency order,
/// so a node's inputs were evaluated in the same or an earlier tick. A
/// failing node is logged and counted without aborting its siblings.
pub struct GraphScheduler {
    config: SchedulerConfig,
    graph: AnalysisGraph,
    order: Vec<Vec<usize>>,
    slots: RwLock<Vec<NodeSlot>>,
    reporter: SharedReporter,
}

impl GraphScheduler {
    /// Build a scheduler, validating the graph topology
    ///
    /// # Errors
    ///
    /// Returns `Cycle` if the dependency edges are cyclic.
    pub fn new(
        graph: AnalysisGraph,
        config: SchedulerConfig,
        reporter: SharedReporter,
    ) -> Result<Self, GraphError> {
        let order = graph.evaluation_order()?;
        let slots = RwLock::new((0..graph.len()).map(|_| NodeSlot::new()).collect());
        Ok(Self {
            config,
            graph,
            order,
            slots,
            reporter,
        })
    }

    /// Override a node's evaluation interval without altering topology
    ///
    /// Intended for tests and debugging.
    pub fn override_interval(&self, node: &str, interval: Duration) -> Result<(), GraphError> {
        let idx = self.graph.index_of(node)?;
        self.slots.write()[idx].interval_override = Some(interval);
        Ok(())
    }

    /// Remove a node's interval override
    pub fn clear_interval_override(&self, node: &str) -> Result<(), GraphError> {
        let idx = self.graph.index_of(node)?;
        self.slots.write()[idx].interval_override = None;
        Ok(())
    }

    /// The cached outcome of a node's most recent successful evaluation
    pub fn outcome(&self, node: &str) -> Option<NodeOutcome> {
        let idx = self.graph.index_of(node).ok()?;
        self.slots.read()[idx].outcome.clone()
    }

    /// Cached outcomes for all nodes that have evaluated at least once
    pub fn outcomes(&self) -> HashMap<String, NodeOutcome> {
        let slots = self.slots.read();
        self.graph
            .nodes
            .iter()
            .zip(slots.iter())
            .filter_map(|(node, slot)| {
                slot.outcome
                    .clone()
                    .map(|outcome| (node.name().to_string(), outcome))
            })
            .collect()
    }

    /// Evaluate all due nodes against the given window
    ///
    /// Returns a report per node that ran this tick.
    pub fn tick(&self, window: &WindowStore) -> Vec<NodeReport> {
        let mut reports = Vec::new();
        for component in &self.order {
            for &idx in component {
                if let Some(report) = self.evaluate_due(idx, window) {
                    reports.push(report);
                }
            }
        }
        reports
    }

    fn evaluate_due(&self, idx: usize, window: &WindowStore) -> Option<NodeReport> {
        let node = &self.graph.nodes[idx];
        let now = Instant::now();

        // Claim the slot; skip nodes that are not due or already running.
        {
            let mut slots = self.slots.write();
            let slot = &mut slots[idx];
            if slot.state == NodeState::Evaluating {
                return None;
            }
            let interval = slot.interval_override.unwrap_or_else(|| node.interval());
            let due = slot
                .last_run
                .map(|last| now.duration_since(last) >= interval)
                .unwrap_or(true);
            if !due {
                return None;
            }
            slot.state = NodeState::Evaluating;
        }

        let result = node.evaluate(window);

        let mut slots = self.slots.write();
        let slot = &mut slots[idx];
        slot.state = NodeState::Idle;
        slot.last_run = Some(now);

        let result = match result {
            Ok(outcome) => {
                slot.outcome = Some(outcome.clone());
                Ok(outcome)
            }
            Err(source) => {
                self.reporter.record_error(ErrorKind::GraphEvaluation);
                tracing::warn!(node = node.name(), error = %source, "node evaluation failed");
                Err(GraphError::Evaluation {
                    node: node.name().to_string(),
                    source,
                })
            }
        };

        Some(NodeReport {
            node: node.name().to_string(),
            result,
        })
    }

    /// Drive recurring ticks until the shutdown signal fires
    ///
    /// Each tick attaches to the window provided by `source`, evaluates due
    /// nodes, and releases the window again.
    pub async fn run<S: WindowSource>(&self, source: S, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.tick);
        tracing::info!(tick = ?self.config.tick, nodes = self.graph.len(), "analysis scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match source.current().await {
                        Some(window) => {
                            let reports = self.tick(&window);
                            tracing::debug!(
                                window = window.window_start(),
                                evaluated = reports.len(),
                                "tick complete"
                            );
                            if let Err(e) = window.close() {
                                tracing::warn!(error = %e, "failed to close tick window");
                            }
                        }
                        None => {
                            tracing::debug!("no committed window available; skipping tick");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("analysis scheduler stopped");
                    break;
                }
            }
        }
    }
}
