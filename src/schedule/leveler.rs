use std::fmt;

use log::debug;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use super::sync::{remove_independent_barriers, remove_single_stream_barriers};
use crate::graph::DependencyGraph;
use crate::ir::{call_list, ExprId, Function};

/// One slot of a stream: a kernel launch or a wait on a level barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEntry {
    Kernel(ExprId),
    /// Barrier guarding level `n`.
    Sync(usize),
}

impl StreamEntry {
    pub fn kernel(&self) -> Option<ExprId> {
        match self {
            StreamEntry::Kernel(id) => Some(*id),
            StreamEntry::Sync(_) => None,
        }
    }

    pub fn is_sync(&self) -> bool {
        matches!(self, StreamEntry::Sync(_))
    }

    /// `sync_<n>` for barriers, the call label otherwise.
    pub fn label(&self, func: &Function) -> String {
        match self {
            StreamEntry::Kernel(id) => func.label(*id),
            StreamEntry::Sync(level) => format!("sync_{}", level),
        }
    }
}

/// Levels of ready calls and the per-stream launch sequences derived from
/// them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSchedule {
    pub levels: Vec<Vec<ExprId>>,
    pub streams: Vec<Vec<StreamEntry>>,
}

impl StreamSchedule {
    /// Every call on a single stream in topological order, without barriers.
    pub fn serial(func: &Function) -> Self {
        let calls = call_list(func);
        Self {
            levels: calls.iter().map(|&c| vec![c]).collect(),
            streams: vec![calls.into_iter().map(StreamEntry::Kernel).collect()],
        }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn num_streams(&self) -> usize {
        self.streams.len()
    }

    /// Barrier waits left across all streams.
    pub fn sync_count(&self) -> usize {
        self.streams
            .iter()
            .flat_map(|s| s.iter())
            .filter(|e| e.is_sync())
            .count()
    }

    /// Kernels in stream order, stream by stream.
    pub fn kernels(&self) -> Vec<ExprId> {
        self.streams
            .iter()
            .flat_map(|s| s.iter().filter_map(StreamEntry::kernel))
            .collect()
    }

    pub fn labels(&self, func: &Function) -> Vec<Vec<String>> {
        self.streams
            .iter()
            .map(|s| s.iter().map(|e| e.label(func)).collect())
            .collect()
    }

    /// Renders one line per stream, e.g. `stream 0: a sync_1 c`.
    pub fn display<'a>(&'a self, func: &'a Function) -> impl fmt::Display + 'a {
        DisplaySchedule {
            schedule: self,
            func,
        }
    }
}

struct DisplaySchedule<'a> {
    schedule: &'a StreamSchedule,
    func: &'a Function,
}

impl fmt::Display for DisplaySchedule<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, labels) in self.schedule.labels(self.func).iter().enumerate() {
            writeln!(f, "stream {}: {}", i, labels.join(" "))?;
        }
        Ok(())
    }
}

/// Splits calls into levels by repeated extraction of ready calls.
#[derive(Debug, Clone)]
pub struct StreamLeveler {
    eliminate_barriers: bool,
}

impl StreamLeveler {
    pub fn new() -> Self {
        Self {
            eliminate_barriers: true,
        }
    }

    /// Keep every barrier.
    pub fn without_barrier_elimination(mut self) -> Self {
        self.eliminate_barriers = false;
        self
    }

    /// Call positions per level. A call lands in the first level after all of
    /// its producers; within a level calls keep topological order.
    pub fn levels(&self, deps: &DependencyGraph) -> Vec<Vec<usize>> {
        let mut remaining: FxHashSet<usize> = (0..deps.len()).collect();
        let mut levels = Vec::new();
        while !remaining.is_empty() {
            let ready: Vec<usize> = (0..deps.len())
                .filter(|i| remaining.contains(i))
                .filter(|&i| deps.inputs(i).iter().all(|p| !remaining.contains(p)))
                .collect();
            assert!(!ready.is_empty(), "call graph has a cycle");
            for i in &ready {
                remaining.remove(i);
            }
            levels.push(ready);
        }
        levels
    }

    pub fn schedule(&self, func: &Function) -> StreamSchedule {
        let deps = DependencyGraph::new(func);
        let levels: Vec<Vec<ExprId>> = self
            .levels(&deps)
            .into_iter()
            .map(|level| level.into_iter().map(|i| deps.calls()[i]).collect())
            .collect();

        let width = levels.iter().map(Vec::len).max().unwrap_or(1).max(1);
        let mut streams: Vec<Vec<StreamEntry>> = (0..width)
            .map(|i| {
                let mut stream = Vec::new();
                for (step, level) in levels.iter().enumerate() {
                    if step != 0 {
                        stream.push(StreamEntry::Sync(step));
                    }
                    if let Some(&call) = level.get(i) {
                        stream.push(StreamEntry::Kernel(call));
                    }
                }
                stream
            })
            .collect();

        if self.eliminate_barriers {
            let independent = remove_independent_barriers(&mut streams, &deps, levels.len());
            let single = remove_single_stream_barriers(&mut streams, levels.len());
            debug!(
                "removed {} independent and {} single-stream barriers",
                independent, single
            );
        }
        debug!(
            "`{}`: {} levels on {} streams",
            func.name,
            levels.len(),
            streams.len()
        );
        StreamSchedule { levels, streams }
    }
}

impl Default for StreamLeveler {
    fn default() -> Self {
        Self::new()
    }
}
