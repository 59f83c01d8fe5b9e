//! Barrier elimination.

use crate::graph::DependencyGraph;
use crate::ir::ExprId;

use super::leveler::StreamEntry;

/// Drop every barrier across which no kernel directly consumes a kernel of
/// another stream.
///
/// For barrier `k`, the kernels right after it in one stream are checked
/// against the kernels right before it in every other stream holding it, up
/// to the neighbouring barrier. Barriers are visited in level order and
/// removal widens the windows seen by later ones. Returns the number of
/// barriers removed.
pub fn remove_independent_barriers(
    streams: &mut [Vec<StreamEntry>],
    deps: &DependencyGraph,
    num_levels: usize,
) -> usize {
    let mut removed = 0;
    for level in 1..num_levels {
        let barrier = StreamEntry::Sync(level);
        let holders: Vec<usize> = (0..streams.len())
            .filter(|&s| streams[s].contains(&barrier))
            .collect();
        let needed = holders.iter().any(|&mine| {
            let after = kernels_after(&streams[mine], barrier);
            holders
                .iter()
                .filter(|&&other| other != mine)
                .any(|&other| consumes_any(deps, &after, &kernels_before(&streams[other], barrier)))
        });
        if !needed {
            for stream in streams.iter_mut() {
                stream.retain(|e| *e != barrier);
            }
            removed += 1;
        }
    }
    removed
}

/// Drop every barrier that only one stream still waits on.
pub fn remove_single_stream_barriers(streams: &mut [Vec<StreamEntry>], num_levels: usize) -> usize {
    let mut removed = 0;
    for level in 0..num_levels {
        let barrier = StreamEntry::Sync(level);
        let count = streams
            .iter()
            .flat_map(|s| s.iter())
            .filter(|&&e| e == barrier)
            .count();
        if count == 1 {
            for stream in streams.iter_mut() {
                stream.retain(|e| *e != barrier);
            }
            removed += 1;
        }
    }
    removed
}

fn kernels_after(stream: &[StreamEntry], barrier: StreamEntry) -> Vec<ExprId> {
    let Some(at) = stream.iter().position(|&e| e == barrier) else {
        return Vec::new();
    };
    stream[at + 1..].iter().map_while(StreamEntry::kernel).collect()
}

fn kernels_before(stream: &[StreamEntry], barrier: StreamEntry) -> Vec<ExprId> {
    let Some(at) = stream.iter().position(|&e| e == barrier) else {
        return Vec::new();
    };
    stream[..at].iter().rev().map_while(StreamEntry::kernel).collect()
}

/// Some kernel of `consumers` reads the result of some kernel of `producers`.
fn consumes_any(deps: &DependencyGraph, consumers: &[ExprId], producers: &[ExprId]) -> bool {
    consumers.iter().any(|&c| {
        producers.iter().any(|&p| match (deps.position(c), deps.position(p)) {
            (Some(c), Some(p)) => deps.is_direct_input(c, p),
            _ => false,
        })
    })
}
