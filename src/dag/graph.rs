// src/dag/graph.rs

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use petgraph::Direction::{Incoming, Outgoing};
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};

use crate::dag::task::{MetaTask, Task, TaskId, TaskRef};
use crate::errors::GraphError;
use crate::lock::LockSet;
use crate::types::TaskGuard;

/// A node of the graph: the task plus what was captured when it was added.
#[derive(Debug, Clone)]
pub(crate) struct TaskNode {
    pub id: TaskId,
    pub task: TaskRef,
    pub name: String,
    /// Lock set read from the task once, at insertion.
    pub locks: LockSet,
    pub guard: TaskGuard,
    /// Meta task whose expansion produced this node.
    pub producer: Option<TaskId>,
}

/// Directed acyclic graph of tasks.
///
/// An edge `a -> b` means `b` runs only after `a` is terminal (and `b`'s
/// [`TaskGuard`] decides whether `b` runs or is skipped). Acyclicity is kept
/// as a construction invariant: [`TaskGraph::add_dependency`] refuses any edge
/// that would close a cycle.
#[derive(Clone, Default)]
pub struct TaskGraph {
    graph: StableDiGraph<TaskNode, ()>,
    index: HashMap<TaskId, NodeIndex>,
    /// Task object address -> node, for duplicate detection by identity.
    identities: HashMap<usize, TaskId>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an isolated node with the default guard.
    ///
    /// Fails if the same task object (by identity) is already present.
    pub fn add(&mut self, task: TaskRef) -> Result<TaskId, GraphError> {
        self.insert_node(task, TaskGuard::default(), None)
    }

    /// Insert a freshly built [`Task`] as an isolated node.
    pub fn add_task(&mut self, task: impl Task) -> TaskId {
        self.add_fresh(TaskRef::task(task))
    }

    /// Insert a freshly built [`MetaTask`] as an isolated node.
    pub fn add_meta_task(&mut self, task: impl MetaTask) -> TaskId {
        self.add_fresh(TaskRef::meta(task))
    }

    fn add_fresh(&mut self, task: TaskRef) -> TaskId {
        let id = TaskId::next();
        let node = TaskNode {
            id,
            name: task.name(),
            locks: task.lock_objects(),
            guard: TaskGuard::default(),
            producer: None,
            task,
        };
        self.identities.insert(node.task.identity(), id);
        let idx = self.graph.add_node(node);
        self.index.insert(id, idx);
        id
    }

    /// Insert a node that runs after every task in `predecessors`.
    pub fn add_task_after(
        &mut self,
        task: TaskRef,
        guard: TaskGuard,
        predecessors: &[TaskId],
    ) -> Result<TaskId, GraphError> {
        for pred in predecessors {
            self.node_index(*pred)?;
        }

        let id = self.insert_node(task, guard, None)?;
        for pred in predecessors {
            self.add_dependency(*pred, id)?;
        }
        Ok(id)
    }

    /// Insert the edge `before -> after`.
    ///
    /// Fails with [`GraphError::Cycle`] if `before` is reachable from `after`
    /// (or they are the same node). Adding an existing edge is a no-op.
    pub fn add_dependency(&mut self, before: TaskId, after: TaskId) -> Result<(), GraphError> {
        let b = self.node_index(before)?;
        let a = self.node_index(after)?;

        if b == a || has_path_connecting(&self.graph, a, b, None) {
            return Err(GraphError::Cycle { before, after });
        }

        self.graph.update_edge(b, a, ());
        Ok(())
    }

    /// Change the guard of an existing node.
    pub fn set_guard(&mut self, id: TaskId, guard: TaskGuard) -> Result<(), GraphError> {
        let idx = self.node_index(id)?;
        self.graph[idx].guard = guard;
        Ok(())
    }

    /// Add `task` after every current sink.
    pub fn append_task(&mut self, task: TaskRef) -> Result<TaskId, GraphError> {
        let sinks = self.sinks();
        self.add_task_after(task, TaskGuard::default(), &sinks)
    }

    /// Sequential composition: every current sink of `self` gets an edge to
    /// every source of `other`, then all of `other` is merged in.
    pub fn append_graph(&mut self, other: TaskGraph) -> Result<(), GraphError> {
        if other.is_empty() {
            return Ok(());
        }

        let sinks = self.sinks();
        let sources = other.sources();
        self.absorb(other, None)?;

        for sink in &sinks {
            for source in &sources {
                self.add_dependency(*sink, *source)?;
            }
        }
        Ok(())
    }

    /// Parallel composition: merge all of `other` without adding edges.
    pub fn merge_graph(&mut self, other: TaskGraph) -> Result<(), GraphError> {
        self.absorb(other, None).map(|_| ())
    }

    /// Splice `other` right after `predecessor`.
    ///
    /// `predecessor -> source` for each source of `other`, and
    /// `sink -> s` for each sink of `other` and each successor `s` that
    /// `predecessor` had before the call. Existing edges are kept. Inserted
    /// nodes record `predecessor` as their producer. Returns the inserted ids.
    pub fn insert_graph_after(
        &mut self,
        other: TaskGraph,
        predecessor: TaskId,
    ) -> Result<Vec<TaskId>, GraphError> {
        self.node_index(predecessor)?;
        if other.is_empty() {
            return Ok(Vec::new());
        }

        let successors_before = self.successors(predecessor);
        let sources = other.sources();
        let sinks = other.sinks();
        let inserted = self.absorb(other, Some(predecessor))?;

        for source in &sources {
            self.add_dependency(predecessor, *source)?;
        }
        for sink in &sinks {
            for succ in &successors_before {
                self.add_dependency(*sink, *succ)?;
            }
        }

        Ok(inserted)
    }

    /// Tasks whose predecessors are all in `completed`, excluding tasks that
    /// are themselves completed or already dispatched.
    pub fn ready_tasks(
        &self,
        completed: &HashSet<TaskId>,
        dispatched: &HashSet<TaskId>,
    ) -> Vec<TaskId> {
        self.graph
            .node_indices()
            .filter_map(|idx| {
                let id = self.graph[idx].id;
                if completed.contains(&id) || dispatched.contains(&id) {
                    return None;
                }
                let all_done = self
                    .graph
                    .neighbors_directed(idx, Incoming)
                    .all(|p| completed.contains(&self.graph[p].id));
                all_done.then_some(id)
            })
            .collect()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// All task ids in insertion order.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.graph.node_indices().map(|i| self.graph[i].id).collect()
    }

    pub fn name_of(&self, id: TaskId) -> Option<&str> {
        self.node(id).map(|n| n.name.as_str())
    }

    /// First task (in insertion order) with the given name.
    pub fn find_by_name(&self, name: &str) -> Option<TaskId> {
        self.graph
            .node_indices()
            .map(|i| &self.graph[i])
            .find(|n| n.name == name)
            .map(|n| n.id)
    }

    pub fn task(&self, id: TaskId) -> Option<&TaskRef> {
        self.node(id).map(|n| &n.task)
    }

    pub fn guard(&self, id: TaskId) -> Option<TaskGuard> {
        self.node(id).map(|n| n.guard)
    }

    pub fn lock_objects(&self, id: TaskId) -> Option<&LockSet> {
        self.node(id).map(|n| &n.locks)
    }

    pub fn producer(&self, id: TaskId) -> Option<TaskId> {
        self.node(id).and_then(|n| n.producer)
    }

    pub fn predecessors(&self, id: TaskId) -> Vec<TaskId> {
        self.neighbors(id, Incoming)
    }

    pub fn successors(&self, id: TaskId) -> Vec<TaskId> {
        self.neighbors(id, Outgoing)
    }

    /// Every task `id` transitively depends on, nearest first.
    pub fn ancestors(&self, id: TaskId) -> Vec<TaskId> {
        self.walk(id, Incoming)
    }

    /// Every task that transitively depends on `id`, nearest first.
    pub fn descendants(&self, id: TaskId) -> Vec<TaskId> {
        self.walk(id, Outgoing)
    }

    /// Nodes without incoming edges.
    pub fn sources(&self) -> Vec<TaskId> {
        self.boundary(Incoming)
    }

    /// Nodes without outgoing edges.
    pub fn sinks(&self) -> Vec<TaskId> {
        self.boundary(Outgoing)
    }

    /// A topological order of all tasks.
    pub fn topological_order(&self) -> Vec<TaskId> {
        match toposort(&self.graph, None) {
            Ok(order) => order.into_iter().map(|i| self.graph[i].id).collect(),
            // Unreachable while the acyclic invariant holds.
            Err(_) => self.task_ids(),
        }
    }

    pub(crate) fn node(&self, id: TaskId) -> Option<&TaskNode> {
        self.index.get(&id).map(|idx| &self.graph[*idx])
    }

    fn node_index(&self, id: TaskId) -> Result<NodeIndex, GraphError> {
        self.index.get(&id).copied().ok_or(GraphError::UnknownTask(id))
    }

    fn insert_node(
        &mut self,
        task: TaskRef,
        guard: TaskGuard,
        producer: Option<TaskId>,
    ) -> Result<TaskId, GraphError> {
        if let Some(existing) = self.identities.get(&task.identity()) {
            return Err(GraphError::DuplicateTask {
                name: task.name(),
                existing: *existing,
            });
        }

        let id = TaskId::next();
        let node = TaskNode {
            id,
            name: task.name(),
            locks: task.lock_objects(),
            guard,
            producer,
            task,
        };
        self.identities.insert(node.task.identity(), id);
        let idx = self.graph.add_node(node);
        self.index.insert(id, idx);
        Ok(id)
    }

    /// Move every node and edge of `other` into `self`, keeping task ids.
    ///
    /// Checks for duplicates before touching `self`, so a failed call leaves
    /// the graph unchanged.
    fn absorb(
        &mut self,
        other: TaskGraph,
        producer: Option<TaskId>,
    ) -> Result<Vec<TaskId>, GraphError> {
        for node in other.graph.node_weights() {
            if let Some(existing) = self.identities.get(&node.task.identity()) {
                return Err(GraphError::DuplicateTask {
                    name: node.name.clone(),
                    existing: *existing,
                });
            }
            if let Some(idx) = self.index.get(&node.id) {
                return Err(GraphError::DuplicateTask {
                    name: node.name.clone(),
                    existing: self.graph[*idx].id,
                });
            }
        }

        let edges: Vec<(TaskId, TaskId)> = other
            .graph
            .edge_indices()
            .filter_map(|e| other.graph.edge_endpoints(e))
            .map(|(a, b)| (other.graph[a].id, other.graph[b].id))
            .collect();

        let mut inserted = Vec::with_capacity(other.graph.node_count());
        for idx in other.graph.node_indices() {
            let mut node = other.graph[idx].clone();
            if node.producer.is_none() {
                node.producer = producer;
            }
            let id = node.id;
            self.identities.insert(node.task.identity(), id);
            let idx = self.graph.add_node(node);
            self.index.insert(id, idx);
            inserted.push(id);
        }

        for (a, b) in edges {
            let ai = self.node_index(a)?;
            let bi = self.node_index(b)?;
            self.graph.update_edge(ai, bi, ());
        }

        Ok(inserted)
    }

    fn neighbors(&self, id: TaskId, dir: petgraph::Direction) -> Vec<TaskId> {
        match self.index.get(&id) {
            Some(idx) => self
                .graph
                .neighbors_directed(*idx, dir)
                .map(|n| self.graph[n].id)
                .collect(),
            None => Vec::new(),
        }
    }

    fn walk(&self, id: TaskId, dir: petgraph::Direction) -> Vec<TaskId> {
        let Some(start) = self.index.get(&id) else {
            return Vec::new();
        };

        let mut seen: HashSet<NodeIndex> = HashSet::new();
        let mut queue: VecDeque<NodeIndex> = self.graph.neighbors_directed(*start, dir).collect();
        let mut out = Vec::new();

        while let Some(idx) = queue.pop_front() {
            if !seen.insert(idx) {
                continue;
            }
            out.push(self.graph[idx].id);
            queue.extend(self.graph.neighbors_directed(idx, dir));
        }

        out
    }

    fn boundary(&self, dir: petgraph::Direction) -> Vec<TaskId> {
        self.graph
            .node_indices()
            .filter(|idx| self.graph.neighbors_directed(*idx, dir).next().is_none())
            .map(|idx| self.graph[idx].id)
            .collect()
    }
}

impl fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for TaskGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "TaskGraph [")?;
        for id in self.topological_order() {
            if let Some(node) = self.node(id) {
                let succ: Vec<String> = self
                    .successors(id)
                    .iter()
                    .filter_map(|s| self.name_of(*s).map(str::to_string))
                    .collect();
                writeln!(
                    f,
                    "  {} '{}' guard={:?} -> {:?}",
                    node.id, node.name, node.guard, succ
                )?;
            }
        }
        write!(f, "]")
    }
}
