//! Dominator sets, immediate dominators, the dominator tree and dominance frontiers.
//!
//! Every artifact here is derived from the CFG edges of a [`Function`] and is invalidated by
//! any later edit to its terminators.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;
use std::iter::once;

use anyhow::bail;
use toy_cfg::{BlockId, Function};
use toy_common::IrError;

/// Every block that dominates the key, including the key itself.
pub type DomSets = BTreeMap<BlockId, BTreeSet<BlockId>>;
/// `None` for the entry and for blocks unreachable from it.
pub type Idoms = BTreeMap<BlockId, Option<BlockId>>;
/// Children of each block, in layout order.
pub type DomTree = BTreeMap<BlockId, Vec<BlockId>>;
pub type Frontiers = BTreeMap<BlockId, BTreeSet<BlockId>>;

/// Iterative data-flow fixed point:
/// `dom(b) = {b} ∪ ⋂ dom(p)` over the predecessors `p` of `b`.
///
/// Only predecessors reachable from the entry take part in the intersection; a block that is
/// itself unreachable gets `{b}`.
pub fn compute_dominator_sets(func: &Function) -> DomSets {
    let reachable = func.reachable();
    let all: BTreeSet<BlockId> = func.layout.iter().copied().collect();
    let mut dom: DomSets = func
        .layout
        .iter()
        .map(|b| {
            if *b == func.entry {
                (*b, once(*b).collect())
            } else {
                (*b, all.clone())
            }
        })
        .collect();
    let mut changed = true;
    let mut rounds = 0usize;
    while changed {
        changed = false;
        rounds += 1;
        for (b, block) in func.iter() {
            if b == func.entry {
                continue;
            }
            let mut preds = block
                .preds
                .iter()
                .filter(|p| reachable.contains(&b) && reachable.contains(*p))
                .filter_map(|p| dom.get(p));
            let new = match preds.next() {
                None => once(b).collect(),
                Some(first) => {
                    let mut acc = first.clone();
                    for p in preds {
                        acc.retain(|d| p.contains(d));
                    }
                    acc.insert(b);
                    acc
                }
            };
            if dom.get(&b) != Some(&new) {
                dom.insert(b, new);
                changed = true;
            }
        }
    }
    tracing::trace!(function = %func.name, rounds, "dominator sets converged");
    dom
}

/// For each reachable non-entry block, the strict dominator that dominates no other strict
/// dominator of that block.
pub fn compute_idom(func: &Function, dom: &DomSets) -> anyhow::Result<Idoms> {
    let reachable = func.reachable();
    let mut idom = Idoms::new();
    for (b, block) in func.iter() {
        if b == func.entry || !reachable.contains(&b) {
            idom.insert(b, None);
            continue;
        }
        let candidates: Vec<BlockId> = dom
            .get(&b)
            .into_iter()
            .flatten()
            .copied()
            .filter(|d| *d != b)
            .collect();
        let mut closest = candidates.iter().copied().filter(|d| {
            candidates
                .iter()
                .all(|other| other == d || !dom.get(other).is_some_and(|s| s.contains(d)))
        });
        let (Some(found), None) = (closest.next(), closest.next()) else {
            bail!(IrError::InvariantViolation(format!(
                "block `{}` has no unique immediate dominator among {} candidates",
                block.name,
                candidates.len()
            )));
        };
        idom.insert(b, Some(found));
    }
    Ok(idom)
}

/// Groups blocks under their immediate dominator. The entry is the implicit root.
pub fn build_dominator_tree(func: &Function, idom: &Idoms) -> DomTree {
    let mut tree: DomTree = func.layout.iter().map(|b| (*b, vec![])).collect();
    for (b, _) in func.iter() {
        if let Some(Some(parent)) = idom.get(&b) {
            tree.entry(*parent).or_default().push(b);
        }
    }
    tree
}

/// Cytron's runner walk: for every edge `p → b`, every block on the dominator-tree path from
/// `p` up to (excluding) `idom(b)` has `b` in its frontier.
pub fn build_dominance_frontier(func: &Function, idom: &Idoms) -> Frontiers {
    let reachable = func.reachable();
    let mut df: Frontiers = func.layout.iter().map(|b| (*b, BTreeSet::new())).collect();
    for (b, block) in func.iter() {
        if !reachable.contains(&b) {
            continue;
        }
        let stop = idom.get(&b).copied().flatten();
        for p in block.preds.iter().copied() {
            if !reachable.contains(&p) {
                continue;
            }
            let mut runner = p;
            while Some(runner) != stop {
                df.entry(runner).or_default().insert(b);
                match idom.get(&runner).copied().flatten() {
                    Some(next) => runner = next,
                    None => break,
                }
            }
        }
    }
    df
}

/// All four dominator artifacts for one CFG snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dominance {
    pub entry: BlockId,
    pub dom: DomSets,
    pub idom: Idoms,
    pub tree: DomTree,
    pub df: Frontiers,
}
impl Dominance {
    pub fn compute(func: &Function) -> anyhow::Result<Self> {
        let dom = compute_dominator_sets(func);
        let idom = compute_idom(func, &dom)?;
        let tree = build_dominator_tree(func, &idom);
        let df = build_dominance_frontier(func, &idom);
        Ok(Self {
            entry: func.entry,
            dom,
            idom,
            tree,
            df,
        })
    }
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.dom.get(&b).is_some_and(|s| s.contains(&a))
    }
    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }
    pub fn idom(&self, b: BlockId) -> Option<BlockId> {
        self.idom.get(&b).copied().flatten()
    }
    pub fn children(&self, b: BlockId) -> &[BlockId] {
        self.tree.get(&b).map(Vec::as_slice).unwrap_or(&[])
    }
    pub fn frontier(&self, b: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.df.get(&b).into_iter().flatten().copied()
    }
    /// Debug listing of every artifact, one line per block, with sorted block names.
    pub fn dump(&self, func: &Function) -> String {
        let mut out = String::new();
        for (b, block) in func.iter() {
            let _ = writeln!(
                out,
                "{}: dom={:?} idom={} children={:?} df={:?}",
                block.name,
                sorted_names(func, self.dom.get(&b).into_iter().flatten().copied()),
                self.idom(b).map(|d| func.name_of(d)).unwrap_or("-"),
                sorted_names(func, self.children(b).iter().copied()),
                sorted_names(func, self.frontier(b)),
            );
        }
        out
    }
}

fn sorted_names(func: &Function, blocks: impl Iterator<Item = BlockId>) -> Vec<&str> {
    let mut names: Vec<&str> = blocks.map(|b| func.name_of(b)).collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use toy_cfg::{Builder, Term};

    /// entry → header ⇄ body, header → exit
    fn looped() -> anyhow::Result<(Function, [BlockId; 4])> {
        let mut func = Function::new("loop", "entry");
        let entry = func.entry;
        let header = func.new_block("header")?;
        let body = func.new_block("body")?;
        let exit = func.new_block("exit")?;
        let mut b = Builder::new(&mut func);
        b.assign("i", 0);
        b.jump(header);
        b.set_block(header);
        b.branch("i", body, exit);
        b.set_block(body);
        b.assign("i", 1);
        b.jump(header);
        b.set_block(exit);
        b.ret(Some("i".into()));
        func.build_cfg()?;
        Ok((func, [entry, header, body, exit]))
    }

    fn set<const N: usize>(blocks: [BlockId; N]) -> BTreeSet<BlockId> {
        blocks.into_iter().collect()
    }

    #[test]
    fn loop_dominators() -> anyhow::Result<()> {
        let (func, [entry, header, body, exit]) = looped()?;
        let d = Dominance::compute(&func)?;
        assert_eq!(d.dom[&body], set([entry, header, body]));
        assert_eq!(d.dom[&exit], set([entry, header, exit]));
        assert_eq!(d.idom(header), Some(entry));
        assert_eq!(d.idom(body), Some(header));
        assert_eq!(d.idom(exit), Some(header));
        assert_eq!(d.idom(entry), None);
        assert_eq!(d.children(header), &[body, exit]);
        assert_eq!(d.df[&body], set([header]));
        assert_eq!(d.df[&header], set([header]));
        assert!(d.df[&entry].is_empty());
        Ok(())
    }

    #[test]
    fn dominator_sets_are_consistent_with_idoms() -> anyhow::Result<()> {
        let (func, _) = looped()?;
        let d = Dominance::compute(&func)?;
        for (b, _) in func.iter() {
            assert!(d.dominates(func.entry, b));
            assert!(d.dominates(b, b));
            if let Some(parent) = d.idom(b) {
                let mut expected = d.dom[&parent].clone();
                expected.insert(b);
                assert_eq!(d.dom[&b], expected);
            }
        }
        Ok(())
    }

    #[test]
    fn unreachable_blocks_have_no_idom() -> anyhow::Result<()> {
        let mut func = Function::new("f", "entry");
        let exit = func.new_block("exit")?;
        let orphan = func.new_block("orphan")?;
        let mut b = Builder::new(&mut func);
        b.jump(exit);
        b.set_block(orphan);
        b.jump(exit);
        b.set_block(exit);
        b.terminate(Term::Return(None));
        func.build_cfg()?;
        let d = Dominance::compute(&func)?;
        assert_eq!(d.dom[&orphan], set([orphan]));
        assert_eq!(d.idom(orphan), None);
        assert_eq!(d.idom(exit), Some(func.entry));
        assert!(d.df[&orphan].is_empty());
        assert!(d.df.values().all(|f| !f.contains(&exit)));
        Ok(())
    }

    #[test]
    fn corrupted_sets_are_an_invariant_violation() -> anyhow::Result<()> {
        let (func, [entry, header, body, _]) = looped()?;
        let mut dom = compute_dominator_sets(&func);
        // header loses its dominators; it is reachable but has no candidate left
        dom.insert(header, set([header]));
        dom.insert(body, set([entry, header, body]));
        let err = compute_idom(&func, &dom).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IrError>(),
            Some(IrError::InvariantViolation(_))
        ));
        Ok(())
    }

    #[test]
    fn dump_names_blocks() -> anyhow::Result<()> {
        let (func, _) = looped()?;
        let d = Dominance::compute(&func)?;
        let dump = d.dump(&func);
        assert!(dump.contains("body: dom=[\"body\", \"entry\", \"header\"] idom=header"));
        Ok(())
    }
}
