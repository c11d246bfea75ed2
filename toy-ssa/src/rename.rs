use std::collections::{BTreeMap, BTreeSet};
use std::mem::take;

use anyhow::bail;
use toy_cfg::{BlockId, Function, Inst, Value};
use toy_common::IrError;

use crate::dom::DomTree;

/// Renaming state for one function: per-variable stacks of live SSA names, per-variable version
/// counters (never reused within a run), the original variable behind every renamed phi, and
/// every name already spoken for, so a fresh version never captures a source name.
#[derive(Default, Debug)]
#[non_exhaustive]
pub struct Renamer {
    pub stacks: BTreeMap<String, Vec<String>>,
    pub counters: BTreeMap<String, usize>,
    pub origins: BTreeMap<String, String>,
    pub taken: BTreeSet<String>,
}

enum Visit {
    Enter(BlockId),
    /// Original variables whose stacks the block pushed, in push order.
    Exit(Vec<String>),
}

impl Renamer {
    /// Allocates the next `"{var}.{n}"` not yet taken and pushes it on `var`'s stack.
    fn fresh(&mut self, var: &str) -> String {
        let counter = self.counters.entry(var.to_owned()).or_default();
        let mut name = format!("{var}.{counter}");
        while self.taken.contains(&name) {
            *counter += 1;
            name = format!("{var}.{counter}");
        }
        *counter += 1;
        self.taken.insert(name.clone());
        self.stacks
            .entry(var.to_owned())
            .or_default()
            .push(name.clone());
        name
    }
    fn top(&self, var: &str) -> Option<&str> {
        self.stacks
            .get(var)
            .and_then(|stack| stack.last())
            .map(String::as_str)
    }
    /// The variable a phi stood for before renaming. A phi not renamed yet still carries it.
    fn origin<'a>(&'a self, dst: &'a str) -> &'a str {
        self.origins.get(dst).map(String::as_str).unwrap_or(dst)
    }
    /// Rewrites variable operands to the current top of their stacks. Variables with an empty
    /// stack are external inputs and keep their name.
    fn rewrite_uses<'v>(&self, operands: impl Iterator<Item = &'v mut Value>) {
        for operand in operands {
            if let Value::Var(name) = operand {
                if let Some(top) = self.top(name) {
                    *name = top.to_owned();
                }
            }
        }
    }
    /// Depth-first walk of the dominator tree from the entry, using an explicit work stack.
    pub fn go(&mut self, func: &mut Function, tree: &DomTree) -> anyhow::Result<()> {
        for (_, block) in func.iter() {
            for inst in block.insts.iter() {
                self.taken.insert(inst.def().to_owned());
                self.taken.extend(inst.uses().map(str::to_owned));
            }
            self.taken.extend(block.term.uses().map(str::to_owned));
        }
        let mut work = vec![Visit::Enter(func.entry)];
        while let Some(visit) = work.pop() {
            match visit {
                Visit::Enter(block) => {
                    if !func.contains(block) {
                        bail!(IrError::InvariantViolation(format!(
                            "dominator tree names block #{} which is not in `{}`",
                            block.index(),
                            func.name
                        )));
                    }
                    let pushed = self.block(func, block);
                    work.push(Visit::Exit(pushed));
                    for child in tree.get(&block).into_iter().flatten().rev() {
                        work.push(Visit::Enter(*child));
                    }
                }
                Visit::Exit(pushed) => {
                    for var in pushed.iter().rev() {
                        if let Some(stack) = self.stacks.get_mut(var) {
                            stack.pop();
                        }
                    }
                }
            }
        }
        Ok(())
    }
    fn block(&mut self, func: &mut Function, b: BlockId) -> Vec<String> {
        let mut pushed = vec![];
        let mut insts = take(&mut func.blocks[b].insts);
        for inst in insts.iter_mut() {
            if let Inst::Phi { dst, .. } = inst {
                let var = take(dst);
                let name = self.fresh(&var);
                self.origins.insert(name.clone(), var.clone());
                *dst = name;
                pushed.push(var);
            }
        }
        for inst in insts.iter_mut().filter(|inst| !inst.is_phi()) {
            self.rewrite_uses(inst.operands_mut());
            let var = inst.def().to_owned();
            let name = self.fresh(&var);
            inst.rename_def(&var, &name);
            pushed.push(var);
        }
        let block = &mut func.blocks[b];
        block.insts = insts;
        self.rewrite_uses(block.term.operands_mut());
        for succ in block.succs.clone() {
            for inst in func.blocks[succ].insts.iter_mut() {
                let Inst::Phi { dst, incomings } = inst else {
                    continue;
                };
                let var = self.origin(dst);
                let value = Value::Var(self.top(var).unwrap_or(var).to_owned());
                if let Some(slot) = incomings.get_mut(&b) {
                    *slot = value;
                }
            }
        }
        tracing::trace!(block = %func.blocks[b].name, defs = pushed.len(), "renamed block");
        pushed
    }
}

/// Rewrites `func` into SSA form. Phi nodes must already be in place.
///
/// Destructive and not re-entrant: run it once, on a function fresh from phi insertion.
/// Blocks unreachable from the entry are not part of the dominator tree and keep their names.
pub fn rename_ssa(func: &mut Function, tree: &DomTree) -> anyhow::Result<()> {
    let mut renamer = Renamer::default();
    renamer.go(func, tree)?;
    tracing::debug!(
        function = %func.name,
        variables = renamer.counters.len(),
        versions = renamer.counters.values().sum::<usize>(),
        "renamed to ssa"
    );
    Ok(())
}
