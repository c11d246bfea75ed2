use std::collections::{BTreeMap, BTreeSet};

use toy_cfg::{BlockId, Function};

/// Marks every instruction reachable through use-def chains from a terminator, then sweeps the
/// rest. Returns the number of instructions removed.
pub(crate) fn eliminate(func: &mut Function) -> usize {
    let live = {
        let mut sites: BTreeMap<&str, Vec<(BlockId, usize)>> = BTreeMap::new();
        for (b, block) in func.iter() {
            for (i, inst) in block.insts.iter().enumerate() {
                sites.entry(inst.def()).or_default().push((b, i));
            }
        }
        let mut work: Vec<&str> = func.iter().flat_map(|(_, block)| block.term.uses()).collect();
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut live: BTreeSet<(BlockId, usize)> = BTreeSet::new();
        while let Some(name) = work.pop() {
            if !seen.insert(name) {
                continue;
            }
            for (b, i) in sites.get(name).into_iter().flatten().copied() {
                live.insert((b, i));
                work.extend(func.blocks[b].insts[i].uses());
            }
        }
        live
    };
    let mut removed = 0usize;
    for b in func.layout.clone() {
        let block = &mut func.blocks[b];
        let before = block.insts.len();
        let mut i = 0usize;
        block.insts.retain(|inst| {
            let keep = live.contains(&(b, i));
            if !keep {
                tracing::trace!(def = inst.def(), block = %block.name, "dead");
            }
            i += 1;
            keep
        });
        removed += before - block.insts.len();
    }
    tracing::debug!(function = %func.name, removed, "dead code elimination done");
    removed
}

/// Removes every instruction whose result never reaches a terminator. Returns whether anything
/// was removed.
pub fn dce(func: &mut Function) -> bool {
    eliminate(func) > 0
}
