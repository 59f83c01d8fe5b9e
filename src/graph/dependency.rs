//! Call-level dependency graph with transitive closures.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ir::{call_inputs, call_list, ExprId, Function};

/// Direct and transitive dependencies between the calls of a function.
///
/// Calls are numbered by their position in [`call_list`], which is a
/// topological order. A call's direct inputs are the calls producing its
/// arguments, looking through tuple projections.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    calls: Vec<ExprId>,
    position: FxHashMap<ExprId, usize>,
    inputs: Vec<Vec<usize>>,
    outputs: Vec<Vec<usize>>,
    ancestors: Vec<FxHashSet<usize>>,
    descendants: Vec<FxHashSet<usize>>,
}

impl DependencyGraph {
    pub fn new(func: &Function) -> Self {
        let calls = call_list(func);
        let position: FxHashMap<ExprId, usize> =
            calls.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        let n = calls.len();
        let mut inputs = vec![Vec::new(); n];
        let mut outputs = vec![Vec::new(); n];
        for (i, &call) in calls.iter().enumerate() {
            for producer in call_inputs(func, call) {
                let p = position[&producer];
                inputs[i].push(p);
                outputs[p].push(i);
            }
        }

        // Closures are filled in topological order for ancestors and reverse
        // order for descendants, so each set is built once from its
        // neighbours' finished sets.
        let mut ancestors: Vec<FxHashSet<usize>> = vec![FxHashSet::default(); n];
        for i in 0..n {
            let mut set = FxHashSet::default();
            for &p in &inputs[i] {
                set.insert(p);
                set.extend(ancestors[p].iter().copied());
            }
            ancestors[i] = set;
        }
        let mut descendants: Vec<FxHashSet<usize>> = vec![FxHashSet::default(); n];
        for i in (0..n).rev() {
            let mut set = FxHashSet::default();
            for &c in &outputs[i] {
                set.insert(c);
                set.extend(descendants[c].iter().copied());
            }
            descendants[i] = set;
        }

        Self {
            calls,
            position,
            inputs,
            outputs,
            ancestors,
            descendants,
        }
    }

    /// Calls in topological order.
    pub fn calls(&self) -> &[ExprId] {
        &self.calls
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn position(&self, call: ExprId) -> Option<usize> {
        self.position.get(&call).copied()
    }

    pub fn inputs(&self, index: usize) -> &[usize] {
        &self.inputs[index]
    }

    pub fn outputs(&self, index: usize) -> &[usize] {
        &self.outputs[index]
    }

    pub fn ancestors(&self, index: usize) -> &FxHashSet<usize> {
        &self.ancestors[index]
    }

    pub fn descendants(&self, index: usize) -> &FxHashSet<usize> {
        &self.descendants[index]
    }

    /// `a` directly consumes the result of `b`.
    pub fn is_direct_input(&self, a: usize, b: usize) -> bool {
        self.inputs[a].contains(&b)
    }

    /// A dependency path exists between the two calls, in either direction.
    pub fn connected(&self, a: usize, b: usize) -> bool {
        self.ancestors[a].contains(&b) || self.descendants[a].contains(&b)
    }

    /// Whether contracting calls by `group_of` (a group id below `len()` per
    /// call position) leaves the call graph acyclic.
    pub fn contracted_is_acyclic(&self, group_of: &[usize]) -> bool {
        let n = self.len();
        assert_eq!(group_of.len(), n, "one group id per call expected");
        let mut indegree = vec![0usize; n];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
        for consumer in 0..n {
            for &producer in &self.inputs[consumer] {
                let (from, to) = (group_of[producer], group_of[consumer]);
                if from != to {
                    successors[from].push(to);
                    indegree[to] += 1;
                }
            }
        }
        let groups: FxHashSet<usize> = group_of.iter().copied().collect();
        let mut ready: Vec<usize> = groups.iter().copied().filter(|&g| indegree[g] == 0).collect();
        let mut visited = 0;
        while let Some(group) = ready.pop() {
            visited += 1;
            for &next in &successors[group] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    ready.push(next);
                }
            }
        }
        visited == groups.len()
    }

    /// Whether fusing the two calls is forbidden: they are the same call, or
    /// a dependency path between them passes through a third call.
    pub fn is_excluded(&self, a: usize, b: usize) -> bool {
        a == b || self.skips_over(a, b) || self.skips_over(b, a)
    }

    /// A path of at least two edges leads from `from` to `to`.
    fn skips_over(&self, from: usize, to: usize) -> bool {
        self.descendants[from].contains(&to)
            && self.outputs[from]
                .iter()
                .any(|&mid| self.descendants[mid].contains(&to))
    }
}
