#![allow(dead_code)]

//! Task implementations for tests.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use jobgraph::dag::{MetaTask, Schedulable, Task, TaskContext, TaskGraph};
use jobgraph::errors::TaskError;
use jobgraph::lock::{LockObjectReference, LockSet};

/// When one run of a task started and ended.
#[derive(Debug, Clone)]
pub struct Interval {
    pub name: String,
    pub start: Instant,
    pub end: Instant,
}

#[derive(Debug, Default)]
struct RecorderInner {
    started: Vec<String>,
    intervals: Vec<Interval>,
}

/// Shared log of task runs.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    inner: Arc<Mutex<RecorderInner>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn start(&self, name: &str) -> Instant {
        self.inner.lock().unwrap().started.push(name.to_string());
        Instant::now()
    }

    fn end(&self, name: &str, start: Instant) {
        self.inner.lock().unwrap().intervals.push(Interval {
            name: name.to_string(),
            start,
            end: Instant::now(),
        });
    }

    /// Task names in the order their bodies started.
    pub fn started(&self) -> Vec<String> {
        self.inner.lock().unwrap().started.clone()
    }

    pub fn intervals(&self) -> Vec<Interval> {
        self.inner.lock().unwrap().intervals.clone()
    }

    /// How many times `name` ran.
    pub fn runs(&self, name: &str) -> usize {
        self.started().iter().filter(|n| *n == name).count()
    }

    pub fn interval(&self, name: &str) -> Option<Interval> {
        self.intervals().into_iter().find(|i| i.name == name)
    }

    /// True if the two named runs overlapped in time.
    pub fn overlapped(&self, a: &str, b: &str) -> bool {
        match (self.interval(a), self.interval(b)) {
            (Some(a), Some(b)) => a.start < b.end && b.start < a.end,
            _ => false,
        }
    }

    /// Largest number of bodies that were running at the same instant.
    pub fn max_concurrency(&self) -> usize {
        let mut edges: Vec<(Instant, i32)> = Vec::new();
        for i in self.intervals() {
            edges.push((i.start, 1));
            edges.push((i.end, -1));
        }
        // Ends sort before starts at the same instant.
        edges.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut current = 0i32;
        let mut max = 0i32;
        for (_, delta) in edges {
            current += delta;
            max = max.max(current);
        }
        max as usize
    }
}

/// A task that records its run, optionally sleeps, then passes or fails.
#[derive(Debug, Clone)]
pub struct RecordingTask {
    name: String,
    recorder: Recorder,
    locks: LockSet,
    sleep: Duration,
    fail: Option<String>,
}

impl RecordingTask {
    pub fn new(name: &str, recorder: &Recorder) -> Self {
        Self {
            name: name.to_string(),
            recorder: recorder.clone(),
            locks: LockSet::new(),
            sleep: Duration::ZERO,
            fail: None,
        }
    }

    pub fn lock(mut self, kind: &str, id: i64) -> Self {
        self.locks.insert(LockObjectReference::new(kind, id));
        self
    }

    pub fn sleep_ms(mut self, ms: u64) -> Self {
        self.sleep = Duration::from_millis(ms);
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.fail = Some(message.to_string());
        self
    }
}

impl Schedulable for RecordingTask {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn lock_objects(&self) -> LockSet {
        self.locks.clone()
    }
}

impl Task for RecordingTask {
    fn execute(&self, ctx: &TaskContext) -> Result<(), TaskError> {
        let start = self.recorder.start(&self.name);

        let deadline = start + self.sleep;
        let mut aborted = false;
        while Instant::now() < deadline {
            if ctx.is_aborted() {
                aborted = true;
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }

        self.recorder.end(&self.name, start);

        if aborted {
            return Err(TaskError::Aborted);
        }
        match &self.fail {
            Some(msg) => Err(TaskError::execution(msg.clone())),
            None => Ok(()),
        }
    }
}

type ExpandFn = dyn Fn(&TaskContext) -> Result<TaskGraph, TaskError> + Send + Sync;

/// A meta task whose expansion is produced by a closure.
pub struct ExpandingTask {
    name: String,
    recorder: Recorder,
    locks: LockSet,
    expand: Arc<ExpandFn>,
}

impl fmt::Debug for ExpandingTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpandingTask")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ExpandingTask {
    pub fn new<F>(name: &str, recorder: &Recorder, expand: F) -> Self
    where
        F: Fn(&TaskContext) -> Result<TaskGraph, TaskError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            recorder: recorder.clone(),
            locks: LockSet::new(),
            expand: Arc::new(expand),
        }
    }

    pub fn lock(mut self, kind: &str, id: i64) -> Self {
        self.locks.insert(LockObjectReference::new(kind, id));
        self
    }
}

impl Schedulable for ExpandingTask {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn lock_objects(&self) -> LockSet {
        self.locks.clone()
    }
}

impl MetaTask for ExpandingTask {
    fn execute(&self, ctx: &TaskContext) -> Result<TaskGraph, TaskError> {
        let start = self.recorder.start(&self.name);
        let result = (self.expand)(ctx);
        self.recorder.end(&self.name, start);
        result
    }
}
