//! Dependency graph for prerequisite relationships between tasks.
//!
//! Design:
//! - Forward edges: task -> tasks it depends on (its prerequisites)
//! - Reverse edges: task -> tasks that depend on it
//! - Invariant: edges and reverse_edges must be kept in sync
//! - Invariant: the graph is acyclic. Insertions that would close a cycle are
//!   rejected before anything is written.
//!
//! The graph is a derived index. `Task::prerequisites` in the store is the
//! source of truth and `DependencyGraph::from_tasks` rebuilds it on restart.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::domain::{Result, SchedulerError, Task, TaskId, TaskStatus};

/// Dependency graph for tracking task prerequisites.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    /// Forward edges: task -> prerequisites
    edges: HashMap<TaskId, HashSet<TaskId>>,

    /// Reverse edges: prerequisite -> dependents
    /// Enables O(1) lookup: "who is waiting for this task?"
    reverse_edges: HashMap<TaskId, HashSet<TaskId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from task records.
    ///
    /// Fails with `CycleDetected` if the stored prerequisite lists contain a
    /// cycle (which `add_edge` never lets in, so this means the store was
    /// edited behind our back).
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Result<Self> {
        let mut graph = Self::new();
        for task in tasks {
            for &prerequisite in &task.prerequisites {
                graph.add_edge(task.id, prerequisite)?;
            }
        }
        Ok(graph)
    }

    /// Add a dependency: `task` depends on `prerequisite`.
    ///
    /// Before inserting, walk depth-first from `prerequisite` along existing
    /// prerequisite edges. Reaching `task` means the new edge would close a
    /// cycle, and the graph is left untouched.
    pub fn add_edge(&mut self, task: TaskId, prerequisite: TaskId) -> Result<()> {
        if task == prerequisite || self.reaches(prerequisite, task) {
            return Err(SchedulerError::CycleDetected { task, prerequisite });
        }
        self.insert_edge(task, prerequisite);
        Ok(())
    }

    /// Add several prerequisites of one task, all or nothing.
    pub fn add_edges(&mut self, task: TaskId, prerequisites: &[TaskId]) -> Result<()> {
        let mut added = Vec::new();
        for &prerequisite in prerequisites {
            if self.contains_edge(task, prerequisite) {
                continue;
            }
            if let Err(err) = self.add_edge(task, prerequisite) {
                for p in added {
                    self.remove_edge(task, p);
                }
                return Err(err);
            }
            added.push(prerequisite);
        }
        Ok(())
    }

    /// Remove a single dependency, keeping both edge maps in sync.
    pub fn remove_edge(&mut self, task: TaskId, prerequisite: TaskId) {
        if let Entry::Occupied(mut e) = self.edges.entry(task) {
            e.get_mut().remove(&prerequisite);
            if e.get().is_empty() {
                e.remove_entry();
            }
        }
        if let Entry::Occupied(mut e) = self.reverse_edges.entry(prerequisite) {
            e.get_mut().remove(&task);
            if e.get().is_empty() {
                e.remove_entry();
            }
        }
    }

    /// Remove a task and every edge touching it.
    pub fn remove_task(&mut self, task: TaskId) {
        self.detach(task);
        if let Some(dependents) = self.reverse_edges.remove(&task) {
            for dependent in dependents {
                if let Entry::Occupied(mut e) = self.edges.entry(dependent) {
                    e.get_mut().remove(&task);
                    if e.get().is_empty() {
                        e.remove_entry();
                    }
                }
            }
        }
    }

    /// Drop only the outgoing edges of `task`.
    ///
    /// Used when a task reaches a terminal state: it no longer waits on
    /// anything, but its dependents still point at it.
    pub fn detach(&mut self, task: TaskId) {
        for prerequisite in self.prerequisites(task) {
            self.remove_edge(task, prerequisite);
        }
    }

    /// True iff every prerequisite of `task` resolves to `Completed`.
    ///
    /// Prerequisites the resolver does not know are treated as unmet.
    pub fn is_ready<F>(&self, task: TaskId, resolver: F) -> bool
    where
        F: Fn(TaskId) -> Option<TaskStatus>,
    {
        self.edges.get(&task).is_none_or(|prerequisites| {
            prerequisites
                .iter()
                .all(|p| resolver(*p) == Some(TaskStatus::Completed))
        })
    }

    pub fn has_prerequisites(&self, task: TaskId) -> bool {
        self.edges.get(&task).is_some_and(|deps| !deps.is_empty())
    }

    pub fn prerequisites(&self, task: TaskId) -> Vec<TaskId> {
        self.edges
            .get(&task)
            .map(|deps| deps.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Tasks waiting on `task`.
    pub fn dependents(&self, task: TaskId) -> Vec<TaskId> {
        self.reverse_edges
            .get(&task)
            .map(|waiting| waiting.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn contains_edge(&self, task: TaskId, prerequisite: TaskId) -> bool {
        self.edges
            .get(&task)
            .is_some_and(|deps| deps.contains(&prerequisite))
    }

    /// All `(task, prerequisite)` pairs, ordered. Used to compare graphs.
    pub fn edges(&self) -> BTreeSet<(TaskId, TaskId)> {
        self.edges
            .iter()
            .flat_map(|(task, deps)| deps.iter().map(move |p| (*task, *p)))
            .collect()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Can `target` be reached from `from` by following prerequisite edges?
    fn reaches(&self, from: TaskId, target: TaskId) -> bool {
        let mut stack = vec![from];
        let mut visited = HashSet::new();
        while let Some(node) = stack.pop() {
            if node == target {
                return true;
            }
            if !visited.insert(node) {
                continue;
            }
            if let Some(deps) = self.edges.get(&node) {
                stack.extend(deps.iter().copied().filter(|d| !visited.contains(d)));
            }
        }
        false
    }

    fn insert_edge(&mut self, task: TaskId, prerequisite: TaskId) {
        self.edges.entry(task).or_default().insert(prerequisite);
        self.reverse_edges
            .entry(prerequisite)
            .or_default()
            .insert(task);
    }
}

/// Shared handle: one writer at a time, concurrent readers.
///
/// Cycle detection needs a consistent snapshot, so every mutation holds the
/// write lock for its whole check-then-insert.
#[derive(Debug, Clone, Default)]
pub struct SharedGraph {
    inner: Arc<RwLock<DependencyGraph>>,
}

impl SharedGraph {
    pub fn new(graph: DependencyGraph) -> Self {
        Self {
            inner: Arc::new(RwLock::new(graph)),
        }
    }

    /// Swap in a freshly rebuilt graph.
    pub async fn replace(&self, graph: DependencyGraph) {
        *self.inner.write().await = graph;
    }

    pub async fn add_edge(&self, task: TaskId, prerequisite: TaskId) -> Result<()> {
        self.inner.write().await.add_edge(task, prerequisite)
    }

    pub async fn add_edges(&self, task: TaskId, prerequisites: &[TaskId]) -> Result<()> {
        self.inner.write().await.add_edges(task, prerequisites)
    }

    pub async fn remove_edge(&self, task: TaskId, prerequisite: TaskId) {
        self.inner.write().await.remove_edge(task, prerequisite);
    }

    pub async fn remove_task(&self, task: TaskId) {
        self.inner.write().await.remove_task(task);
    }

    pub async fn detach(&self, task: TaskId) {
        self.inner.write().await.detach(task);
    }

    pub async fn is_ready<F>(&self, task: TaskId, resolver: F) -> bool
    where
        F: Fn(TaskId) -> Option<TaskStatus>,
    {
        self.inner.read().await.is_ready(task, resolver)
    }

    pub async fn prerequisites(&self, task: TaskId) -> Vec<TaskId> {
        self.inner.read().await.prerequisites(task)
    }

    pub async fn dependents(&self, task: TaskId) -> Vec<TaskId> {
        self.inner.read().await.dependents(task)
    }

    pub async fn edges(&self) -> BTreeSet<(TaskId, TaskId)> {
        self.inner.read().await.edges()
    }

    /// Clone of the current graph.
    pub async fn snapshot(&self) -> DependencyGraph {
        self.inner.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ErrorKind, NewTask};
    use chrono::Utc;

    fn ids<const N: usize>() -> [TaskId; N] {
        std::array::from_fn(|i| TaskId::new(i as u128 + 1))
    }

    #[test]
    fn new_graph_is_empty() {
        let graph = DependencyGraph::new();
        assert!(graph.is_empty());
        assert!(!graph.has_prerequisites(TaskId::new(1)));
    }

    #[test]
    fn add_edge_creates_forward_and_reverse_edges() {
        let mut graph = DependencyGraph::new();
        let [a, b] = ids();

        graph.add_edge(b, a).unwrap(); // B depends on A

        assert!(graph.has_prerequisites(b));
        assert!(!graph.has_prerequisites(a));
        assert_eq!(graph.prerequisites(b), vec![a]);
        assert_eq!(graph.dependents(a), vec![b]);
    }

    #[test]
    fn remove_edge_removes_both_edges() {
        let mut graph = DependencyGraph::new();
        let [a, b] = ids();

        graph.add_edge(b, a).unwrap();
        graph.remove_edge(b, a);

        assert!(!graph.has_prerequisites(b));
        assert!(graph.dependents(a).is_empty());
        assert!(graph.is_empty());
    }

    #[test]
    fn two_node_cycle_is_rejected_and_graph_unchanged() {
        let mut graph = DependencyGraph::new();
        let [a, b] = ids();

        graph.add_edge(a, b).unwrap(); // A depends on B
        let before = graph.clone();

        let err = graph.add_edge(b, a).unwrap_err(); // B depends on A
        assert_eq!(err.kind(), ErrorKind::CycleDetected);
        assert_eq!(graph, before);
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let mut graph = DependencyGraph::new();
        let [a] = ids();

        assert!(matches!(
            graph.add_edge(a, a),
            Err(SchedulerError::CycleDetected { .. })
        ));
        assert!(graph.is_empty());
    }

    #[test]
    fn longer_cycle_is_rejected() {
        let mut graph = DependencyGraph::new();
        let [a, b, c, d] = ids();

        // B -> A, C -> B, D -> C; closing D <- B would make B -> ... -> D -> B
        graph.add_edge(b, a).unwrap();
        graph.add_edge(c, b).unwrap();
        graph.add_edge(d, c).unwrap();

        assert!(graph.add_edge(b, d).is_err());
        assert_eq!(graph.edge_count(), 3);
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let mut graph = DependencyGraph::new();
        let [a, b, c, d] = ids();

        //   A
        //  / \
        // B   C
        //  \ /
        //   D
        graph.add_edge(b, a).unwrap();
        graph.add_edge(c, a).unwrap();
        graph.add_edge(d, b).unwrap();
        graph.add_edge(d, c).unwrap();
        graph.add_edge(d, a).unwrap(); // shortcut edge

        assert_eq!(graph.edge_count(), 5);
    }

    #[test]
    fn add_edges_is_all_or_nothing() {
        let mut graph = DependencyGraph::new();
        let [a, b, c] = ids();

        graph.add_edge(a, c).unwrap(); // A depends on C

        // C depending on B is fine, C depending on A closes a cycle
        assert!(graph.add_edges(c, &[b, a]).is_err());
        assert_eq!(graph.prerequisites(c), Vec::<TaskId>::new());
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn is_ready_requires_every_prerequisite_completed() {
        let mut graph = DependencyGraph::new();
        let [p1, p2, t] = ids();
        graph.add_edge(t, p1).unwrap();
        graph.add_edge(t, p2).unwrap();

        let mut statuses = HashMap::from([
            (p1, TaskStatus::Completed),
            (p2, TaskStatus::Pending),
        ]);
        assert!(!graph.is_ready(t, |id| statuses.get(&id).copied()));

        statuses.insert(p2, TaskStatus::Completed);
        assert!(graph.is_ready(t, |id| statuses.get(&id).copied()));
    }

    #[test]
    fn unknown_prerequisite_is_unmet_and_no_prerequisites_is_ready() {
        let mut graph = DependencyGraph::new();
        let [p, t, free] = ids();
        graph.add_edge(t, p).unwrap();

        assert!(!graph.is_ready(t, |_| None));
        assert!(graph.is_ready(free, |_| None));
    }

    #[test]
    fn detach_keeps_incoming_edges_remove_task_drops_all() {
        let mut graph = DependencyGraph::new();
        let [a, b, c] = ids();
        graph.add_edge(b, a).unwrap(); // B depends on A
        graph.add_edge(c, b).unwrap(); // C depends on B

        graph.detach(b);
        assert!(!graph.has_prerequisites(b));
        assert_eq!(graph.dependents(b), vec![c]);

        graph.remove_task(b);
        assert!(graph.is_empty());
        assert!(graph.dependents(b).is_empty());
    }

    #[test]
    fn rebuild_from_tasks_matches_edge_set() {
        let now = Utc::now();
        let [a, b, c] = ids();
        let tasks = vec![
            Task::from_new(a, NewTask::once("a", now), now),
            Task::from_new(b, NewTask::once("b", now).with_prerequisite(a), now),
            Task::from_new(
                c,
                NewTask::once("c", now).with_prerequisite(a).with_prerequisite(b),
                now,
            ),
        ];

        let graph = DependencyGraph::from_tasks(&tasks).unwrap();
        let expected: BTreeSet<_> = [(b, a), (c, a), (c, b)].into_iter().collect();
        assert_eq!(graph.edges(), expected);
    }

    #[test]
    fn rebuild_rejects_cyclic_records() {
        let now = Utc::now();
        let [a, b] = ids();
        let tasks = vec![
            Task::from_new(a, NewTask::once("a", now).with_prerequisite(b), now),
            Task::from_new(b, NewTask::once("b", now).with_prerequisite(a), now),
        ];
        assert!(DependencyGraph::from_tasks(&tasks).is_err());
    }

    #[tokio::test]
    async fn shared_graph_serializes_writers() {
        let shared = SharedGraph::default();
        let [a, b] = ids();

        let (r1, r2) = tokio::join!(shared.add_edge(a, b), shared.add_edge(b, a));

        // exactly one of the two opposite edges wins
        assert!(r1.is_ok() ^ r2.is_ok());
        assert_eq!(shared.edges().await.len(), 1);
    }
}
