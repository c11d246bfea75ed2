use std::collections::BTreeMap;
use std::mem::take;

use anyhow::Context;
use toy_cfg::{Function, Inst, Value};

/// Names proven to hold a single integer on every execution.
pub type ConstEnv = BTreeMap<String, i64>;

fn lookup(env: &ConstEnv, value: &Value) -> Option<i64> {
    match value {
        Value::Const(c) => Some(*c),
        Value::Var(name) => env.get(name).copied(),
    }
}

fn evaluate(env: &ConstEnv, inst: &Inst) -> anyhow::Result<Option<i64>> {
    Ok(match inst {
        Inst::Assign { rhs, .. } => lookup(env, rhs),
        Inst::Binary { op, lhs, rhs, .. } => match (lookup(env, lhs), lookup(env, rhs)) {
            (Some(a), Some(b)) => Some(
                op.eval(a, b)
                    .with_context(|| format!("in folding `{}`", inst.def()))?,
            ),
            _ => None,
        },
        Inst::Phi { incomings, .. } => {
            let mut values = incomings.values().map(|v| lookup(env, v));
            match values.next() {
                Some(Some(first)) if values.all(|v| v == Some(first)) => Some(first),
                _ => None,
            }
        }
    })
}

/// Forward constant propagation over the blocks reachable from the entry.
///
/// Each pass walks the blocks in layout order. Passes repeat until nothing new is learned, so a
/// phi whose inputs are defined further down the layout still resolves. Nothing is ever assumed
/// around a cycle: a value carried by a loop back edge stays unknown. A name defined more than
/// once is never constant.
pub fn constant_propagation(func: &Function) -> anyhow::Result<ConstEnv> {
    let reachable = func.reachable();
    let mut defs: BTreeMap<&str, usize> = BTreeMap::new();
    for (_, block) in func.iter().filter(|(b, _)| reachable.contains(b)) {
        for inst in block.insts.iter() {
            *defs.entry(inst.def()).or_default() += 1;
        }
    }
    let mut env = ConstEnv::new();
    let mut passes = 0usize;
    loop {
        passes += 1;
        let mut learned = false;
        for (_, block) in func.iter().filter(|(b, _)| reachable.contains(b)) {
            for inst in block.insts.iter().filter(|inst| defs.get(inst.def()) == Some(&1)) {
                let Some(c) = evaluate(&env, inst)? else {
                    continue;
                };
                if env.insert(inst.def().to_owned(), c) != Some(c) {
                    tracing::trace!(name = inst.def(), value = c, "learned constant");
                    learned = true;
                }
            }
        }
        if !learned {
            break;
        }
    }
    tracing::debug!(function = %func.name, constants = env.len(), passes, "constant propagation done");
    Ok(env)
}

/// Substitutes known constants and folds literal binaries, returning the number of edits.
pub(crate) fn rewrite(func: &mut Function, env: &ConstEnv) -> anyhow::Result<usize> {
    fn substitute<'a>(operands: impl Iterator<Item = &'a mut Value>, env: &ConstEnv) -> usize {
        let mut edits = 0;
        for operand in operands {
            if let Some(c) = operand.as_var().and_then(|name| env.get(name)) {
                *operand = Value::Const(*c);
                edits += 1;
            }
        }
        edits
    }
    let mut edits = 0usize;
    for b in func.layout.clone() {
        let block = &mut func.blocks[b];
        for inst in block.insts.iter_mut() {
            edits += substitute(inst.operands_mut(), env);
            let folded = match inst {
                Inst::Binary {
                    op,
                    dst,
                    lhs: Value::Const(a),
                    rhs: Value::Const(c),
                } => {
                    let value = op
                        .eval(*a, *c)
                        .with_context(|| format!("in folding `{dst}`"))?;
                    Some(Inst::assign(take(dst), value))
                }
                _ => None,
            };
            if let Some(folded) = folded {
                tracing::trace!(inst = ?folded, "folded binary");
                *inst = folded;
                edits += 1;
            }
        }
        edits += substitute(block.term.operands_mut(), env);
    }
    Ok(edits)
}

/// Rewrites every use of a name in `env` to its literal and turns binaries over two literals
/// into assignments. Returns whether anything changed.
pub fn rewrite_constants(func: &mut Function, env: &ConstEnv) -> anyhow::Result<bool> {
    Ok(rewrite(func, env)? > 0)
}
