use std::collections::{BTreeMap, BTreeSet};

use toy_cfg::{BlockId, Function, Inst, Value};

use crate::dom::Frontiers;

/// Places phi nodes on the iterated dominance frontier of every variable's definition sites.
///
/// Each new phi has one incoming slot per current predecessor, all still bound to the
/// un-renamed variable. Returns the number of phis inserted.
pub fn insert_phi(func: &mut Function, df: &Frontiers) -> usize {
    let mut def_sites: BTreeMap<String, BTreeSet<BlockId>> = BTreeMap::new();
    let mut has_phi: BTreeMap<String, BTreeSet<BlockId>> = BTreeMap::new();
    for (b, block) in func.iter() {
        for inst in block.insts.iter() {
            def_sites.entry(inst.def().to_owned()).or_default().insert(b);
            if inst.is_phi() {
                has_phi.entry(inst.def().to_owned()).or_default().insert(b);
            }
        }
    }
    let mut inserted = 0usize;
    for (var, mut defs) in def_sites {
        let mut placed = has_phi.remove(&var).unwrap_or_default();
        let mut work: Vec<BlockId> = defs.iter().copied().collect();
        while let Some(b) = work.pop() {
            for y in df.get(&b).into_iter().flatten().copied() {
                if !placed.insert(y) {
                    continue;
                }
                let block = &mut func.blocks[y];
                let incomings = block
                    .preds
                    .iter()
                    .map(|p| (*p, Value::Var(var.clone())))
                    .collect();
                block.insts.insert(
                    0,
                    Inst::Phi {
                        dst: var.clone(),
                        incomings,
                    },
                );
                inserted += 1;
                tracing::trace!(var = %var, block = %block.name, "placed phi");
                if defs.insert(y) {
                    work.push(y);
                }
            }
        }
    }
    tracing::debug!(function = %func.name, inserted, "phi insertion done");
    inserted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Dominance;
    use pretty_assertions::assert_eq;
    use toy_cfg::Builder;

    #[test]
    fn loop_variable_gets_a_header_phi() -> anyhow::Result<()> {
        let mut func = Function::new("count", "entry");
        let header = func.new_block("header")?;
        let body = func.new_block("body")?;
        let exit = func.new_block("exit")?;
        let mut b = Builder::new(&mut func);
        b.assign("i", 0);
        b.assign("n", 10);
        b.jump(header);
        b.set_block(header);
        b.branch("i", body, exit);
        b.set_block(body);
        b.binary(toy_cfg::BinOp::Add, "i", "i", 1);
        b.jump(header);
        b.set_block(exit);
        b.ret(Some("i".into()));
        func.build_cfg()?;
        let d = Dominance::compute(&func)?;
        assert_eq!(insert_phi(&mut func, &d.df), 1);
        let entry = func.entry;
        assert_eq!(
            func.blocks[header].insts,
            vec![Inst::Phi {
                dst: "i".to_owned(),
                incomings: [(entry, Value::var("i")), (body, Value::var("i"))]
                    .into_iter()
                    .collect(),
            }]
        );
        assert!(!func.blocks[exit].has_phi());
        Ok(())
    }

    #[test]
    fn existing_phis_are_not_duplicated() -> anyhow::Result<()> {
        let mut func = Function::new("join", "entry");
        let left = func.new_block("left")?;
        let join = func.new_block("join")?;
        let mut b = Builder::new(&mut func);
        b.assign("x", 0);
        b.branch("x", left, join);
        b.set_block(left);
        b.assign("x", 1);
        b.jump(join);
        b.set_block(join);
        b.ret(Some("x".into()));
        func.build_cfg()?;
        let d = Dominance::compute(&func)?;
        assert_eq!(insert_phi(&mut func, &d.df), 1);
        assert_eq!(insert_phi(&mut func, &d.df), 0);
        assert_eq!(func.blocks[join].phis().count(), 1);
        Ok(())
    }
}
