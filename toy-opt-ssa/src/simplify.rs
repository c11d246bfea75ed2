//! CFG simplification.
//!
//! Four local rewrites, each reporting whether it changed anything, iterated by
//! [`simplify_cfg`] until none applies:
//! - [`fold_constant_branches`]: a branch on a literal becomes a jump
//! - [`remove_unreachable_blocks`]: blocks the entry cannot reach are dropped
//! - [`merge_trivial_block`]: a block with a single jump into a single-predecessor block absorbs it
//! - [`cleanup_phis`]: phis lose incomings from departed predecessors and collapse when trivial
use std::collections::BTreeSet;
use std::mem::take;

use anyhow::bail;
use toy_cfg::{BlockId, Function, Inst, Term, Value};
use toy_common::IrError;

pub fn fold_constant_branches(func: &mut Function) -> bool {
    let mut folded = 0usize;
    for b in func.layout.clone() {
        let Term::Branch {
            cond: Value::Const(c),
            if_true,
            if_false,
        } = func.blocks[b].term
        else {
            continue;
        };
        let (taken, dropped) = if c != 0 {
            (if_true, if_false)
        } else {
            (if_false, if_true)
        };
        func.blocks[b].term = Term::Jump(taken);
        func.remove_edge(b, dropped);
        tracing::trace!(block = %func.blocks[b].name, taken = %func.blocks[taken].name, "folded branch");
        folded += 1;
    }
    folded > 0
}

pub fn remove_unreachable_blocks(func: &mut Function) -> bool {
    let reachable = func.reachable();
    let dead: Vec<BlockId> = func
        .layout
        .iter()
        .copied()
        .filter(|b| !reachable.contains(b))
        .collect();
    for b in dead.iter().copied() {
        for succ in func.blocks[b].succs.clone() {
            func.blocks[succ].preds.retain(|p| *p != b);
        }
        tracing::trace!(block = %func.blocks[b].name, "removed unreachable block");
        func.remove_block(b);
    }
    !dead.is_empty()
}

/// Merges at most one block: the first `A` in layout order that ends in `jump B`, where `B` has
/// `A` as its only predecessor, carries no phi, and is neither `A` nor the entry.
pub fn merge_trivial_block(func: &mut Function) -> bool {
    let candidate = func.iter().find_map(|(a, block)| {
        let Term::Jump(b) = block.term else {
            return None;
        };
        let target = &func.blocks[b];
        let mergeable = b != a
            && b != func.entry
            && block.succs == [b]
            && target.preds == [a]
            && !target.has_phi();
        mergeable.then_some((a, b))
    });
    let Some((a, b)) = candidate else {
        return false;
    };
    let absorbed = &mut func.blocks[b];
    let insts = take(&mut absorbed.insts);
    let term = take(&mut absorbed.term);
    let succs = take(&mut absorbed.succs);
    for succ in succs.iter().copied() {
        let block = &mut func.blocks[succ];
        for pred in block.preds.iter_mut().filter(|p| **p == b) {
            *pred = a;
        }
        for inst in block.insts.iter_mut() {
            if let Inst::Phi { incomings, .. } = inst {
                if let Some(value) = incomings.remove(&b) {
                    incomings.insert(a, value);
                }
            }
        }
    }
    tracing::trace!(into = %func.blocks[a].name, from = %func.blocks[b].name, "merged blocks");
    let block = &mut func.blocks[a];
    block.insts.extend(insts);
    block.term = term;
    block.succs = succs;
    func.remove_block(b);
    true
}

pub fn cleanup_phis(func: &mut Function) -> bool {
    let mut changed = false;
    for b in func.layout.clone() {
        let block = &mut func.blocks[b];
        if !block.has_phi() {
            continue;
        }
        let preds: BTreeSet<BlockId> = block.preds.iter().copied().collect();
        for inst in block.insts.iter_mut() {
            let Inst::Phi { dst, incomings } = inst else {
                continue;
            };
            let before = incomings.len();
            incomings.retain(|pred, _| preds.contains(pred));
            changed |= incomings.len() != before;
            let mut values = incomings.values();
            let single = match values.next() {
                Some(first) if values.all(|v| v == first) => Some(first.clone()),
                _ => None,
            };
            if let Some(value) = single {
                let dst = take(dst);
                tracing::trace!(dst = %dst, value = %value, "collapsed phi");
                *inst = Inst::Assign { lhs: dst, rhs: value };
                changed = true;
            }
        }
        block.insts.sort_by_key(|inst| !inst.is_phi());
    }
    changed
}

/// Checks that every live block's successor list matches its terminator.
fn check_edges(func: &Function) -> anyhow::Result<()> {
    for (_, block) in func.iter() {
        if block.succs != block.term.successors() {
            bail!(IrError::InvariantViolation(format!(
                "edges of block `{}` disagree with its terminator",
                block.name
            )));
        }
    }
    Ok(())
}

/// Runs the four rewrites in order until a full round changes nothing. Returns whether any round
/// did.
///
/// The edge lists must be current on entry (see [`Function::build_cfg`]); they are kept in sync
/// with every rewrite and checked again on exit.
pub fn simplify_cfg(func: &mut Function) -> anyhow::Result<bool> {
    let mut rounds = 0usize;
    loop {
        let mut changed = fold_constant_branches(func);
        changed |= remove_unreachable_blocks(func);
        changed |= merge_trivial_block(func);
        changed |= cleanup_phis(func);
        if !changed {
            break;
        }
        rounds += 1;
    }
    check_edges(func)?;
    tracing::debug!(function = %func.name, rounds, blocks = func.layout.len(), "cfg simplified");
    Ok(rounds > 0)
}
