use std::collections::BTreeMap;

use anyhow::bail;
use toy_cfg::{BlockId, Function, Inst};
use toy_common::IrError;

use crate::dom::Dominance;

/// Where a name is defined: block, and index within the block's instructions.
type DefSite = (BlockId, usize);

/// Checks the SSA invariant over the blocks reachable from the entry:
/// - every name is defined once,
/// - phis lead their block,
/// - every non-phi use is dominated by its definition,
/// - every phi incoming is defined in a block dominating that predecessor.
///
/// Names with no definition are treated as external inputs.
pub fn verify_ssa(func: &Function, dom: &Dominance) -> anyhow::Result<()> {
    let reachable = func.reachable();
    let live = || func.iter().filter(|(b, _)| reachable.contains(b));
    let mut defs: BTreeMap<&str, DefSite> = BTreeMap::new();
    for (b, block) in live() {
        let mut seen_non_phi = false;
        for (i, inst) in block.insts.iter().enumerate() {
            if defs.insert(inst.def(), (b, i)).is_some() {
                bail!(IrError::NotSsa(format!(
                    "`{}` is defined more than once",
                    inst.def()
                )));
            }
            if inst.is_phi() && seen_non_phi {
                bail!(IrError::NotSsa(format!(
                    "phi `{}` follows a non-phi in block `{}`",
                    inst.def(),
                    block.name
                )));
            }
            seen_non_phi |= !inst.is_phi();
        }
    }
    let available = |name: &str, b: BlockId, at: usize| match defs.get(name) {
        None => true,
        Some((def_block, idx)) if *def_block == b => *idx < at,
        Some((def_block, _)) => dom.strictly_dominates(*def_block, b),
    };
    for (b, block) in live() {
        for (i, inst) in block.insts.iter().enumerate() {
            if let Inst::Phi { incomings, .. } = inst {
                for (pred, value) in incomings {
                    let Some(name) = value.as_var() else {
                        continue;
                    };
                    if let Some((def_block, _)) = defs.get(name) {
                        if !dom.dominates(*def_block, *pred) {
                            bail!(IrError::NotSsa(format!(
                                "`{name}` flows into `{}` from `{}` without dominating it",
                                inst.def(),
                                func.name_of(*pred)
                            )));
                        }
                    }
                }
                continue;
            }
            for name in inst.uses() {
                if !available(name, b, i) {
                    bail!(IrError::NotSsa(format!(
                        "use of `{name}` in `{}` is not dominated by its definition",
                        inst.def()
                    )));
                }
            }
        }
        for name in block.term.uses() {
            if !available(name, b, block.insts.len()) {
                bail!(IrError::NotSsa(format!(
                    "terminator of `{}` uses `{name}` before its definition",
                    block.name
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::into_ssa;
    use toy_cfg::{BinOp, Builder};

    #[test]
    fn non_ssa_input_is_rejected() -> anyhow::Result<()> {
        let mut func = Function::new("f", "entry");
        let mut b = Builder::new(&mut func);
        b.assign("x", 1);
        b.assign("x", 2);
        b.ret(Some("x".into()));
        func.build_cfg()?;
        let d = Dominance::compute(&func)?;
        let err = verify_ssa(&func, &d).unwrap_err();
        assert!(matches!(err.downcast_ref::<IrError>(), Some(IrError::NotSsa(_))));
        Ok(())
    }

    #[test]
    fn use_before_def_in_block_is_rejected() -> anyhow::Result<()> {
        let mut func = Function::new("f", "entry");
        let mut b = Builder::new(&mut func);
        b.binary(BinOp::Add, "y", "x", 1);
        b.assign("x", 2);
        b.ret(Some("y".into()));
        func.build_cfg()?;
        let d = Dominance::compute(&func)?;
        assert!(verify_ssa(&func, &d).is_err());
        Ok(())
    }

    #[test]
    fn into_ssa_output_verifies() -> anyhow::Result<()> {
        let mut func = Function::new("f", "entry");
        let left = func.new_block("left")?;
        let join = func.new_block("join")?;
        let mut b = Builder::new(&mut func);
        b.assign("x", "arg");
        b.branch("x", left, join);
        b.set_block(left);
        b.binary(BinOp::Mul, "x", "x", 2);
        b.jump(join);
        b.set_block(join);
        b.ret(Some("x".into()));
        let d = into_ssa(&mut func)?;
        verify_ssa(&func, &d)?;
        Ok(())
    }
}
