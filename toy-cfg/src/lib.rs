//! Non-SSA intermediate representation and CFG construction.
//!
//! A [`Function`] owns its blocks in an [`id_arena::Arena`]; every relation between blocks
//! (terminator targets, successor and predecessor lists, phi incoming keys) is stored as a
//! [`BlockId`]. Terminators are the single source of truth for control flow: the edge lists are
//! derived from them by [`Function::build_cfg`] and may be recomputed at any time.
//!
//! # Modules
//!
//! - [`builder`]: the cursor-style construction API used by front-ends and tests
//! - [`display`]: a human-readable dump for debugging
use std::collections::{BTreeMap, BTreeSet};
use std::iter::{empty, once};

use anyhow::Context;
use id_arena::{Arena, Id};
pub use toy_common::{BinOp, IrError, Value};
pub mod builder;
pub mod display;
pub use builder::Builder;

pub type BlockId = Id<Block>;

/// A non-terminator instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inst {
    Assign {
        lhs: String,
        rhs: Value,
    },
    Binary {
        op: BinOp,
        dst: String,
        lhs: Value,
        rhs: Value,
    },
    /// Selects a value per incoming edge, keyed by predecessor block.
    ///
    /// Only legal among the leading instructions of a block.
    Phi {
        dst: String,
        incomings: BTreeMap<BlockId, Value>,
    },
}
impl Inst {
    pub fn assign(lhs: impl Into<String>, rhs: impl Into<Value>) -> Self {
        Inst::Assign {
            lhs: lhs.into(),
            rhs: rhs.into(),
        }
    }
    pub fn binary(
        op: BinOp,
        dst: impl Into<String>,
        lhs: impl Into<Value>,
        rhs: impl Into<Value>,
    ) -> Self {
        Inst::Binary {
            op,
            dst: dst.into(),
            lhs: lhs.into(),
            rhs: rhs.into(),
        }
    }
    pub fn is_phi(&self) -> bool {
        matches!(self, Inst::Phi { .. })
    }
    /// The name this instruction defines. Every variant defines exactly one.
    pub fn def(&self) -> &str {
        match self {
            Inst::Assign { lhs, .. } => lhs,
            Inst::Binary { dst, .. } | Inst::Phi { dst, .. } => dst,
        }
    }
    pub fn defs(&self) -> impl Iterator<Item = &str> + '_ {
        once(self.def())
    }
    pub fn operands<'a>(&'a self) -> Box<dyn Iterator<Item = &'a Value> + 'a> {
        match self {
            Inst::Assign { rhs, .. } => Box::new(once(rhs)),
            Inst::Binary { lhs, rhs, .. } => Box::new([lhs, rhs].into_iter()),
            Inst::Phi { incomings, .. } => Box::new(incomings.values()),
        }
    }
    pub fn operands_mut<'a>(&'a mut self) -> Box<dyn Iterator<Item = &'a mut Value> + 'a> {
        match self {
            Inst::Assign { rhs, .. } => Box::new(once(rhs)),
            Inst::Binary { lhs, rhs, .. } => Box::new([lhs, rhs].into_iter()),
            Inst::Phi { incomings, .. } => Box::new(incomings.values_mut()),
        }
    }
    /// Variable operands. Literals are never uses.
    pub fn uses<'a>(&'a self) -> Box<dyn Iterator<Item = &'a str> + 'a> {
        Box::new(self.operands().filter_map(Value::as_var))
    }
    pub fn rename_use(&mut self, old: &str, new: &str) -> bool {
        let mut changed = false;
        for operand in self.operands_mut() {
            changed |= operand.rename(old, new);
        }
        changed
    }
    pub fn rename_def(&mut self, old: &str, new: &str) -> bool {
        let dst = match self {
            Inst::Assign { lhs, .. } => lhs,
            Inst::Binary { dst, .. } | Inst::Phi { dst, .. } => dst,
        };
        if *dst == *old {
            *dst = new.to_owned();
            return true;
        }
        false
    }
}

/// Block terminator.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum Term {
    /// `cond` is nonzero → `if_true`, otherwise `if_false`.
    Branch {
        cond: Value,
        if_true: BlockId,
        if_false: BlockId,
    },
    Jump(BlockId),
    Return(Option<Value>),
    /// Not terminated yet; only valid while a block is under construction.
    #[default]
    Unset,
}
impl Term {
    pub fn branch(cond: impl Into<Value>, if_true: BlockId, if_false: BlockId) -> Self {
        Term::Branch {
            cond: cond.into(),
            if_true,
            if_false,
        }
    }
    pub fn is_set(&self) -> bool {
        !matches!(self, Term::Unset)
    }
    /// Successor targets in `[true, false]` order for branches.
    pub fn targets<'a>(&'a self) -> Box<dyn Iterator<Item = &'a BlockId> + 'a> {
        match self {
            Term::Branch {
                if_true, if_false, ..
            } => Box::new([if_true, if_false].into_iter()),
            Term::Jump(target) => Box::new(once(target)),
            Term::Return(_) | Term::Unset => Box::new(empty()),
        }
    }
    pub fn targets_mut<'a>(&'a mut self) -> Box<dyn Iterator<Item = &'a mut BlockId> + 'a> {
        match self {
            Term::Branch {
                if_true, if_false, ..
            } => Box::new([if_true, if_false].into_iter()),
            Term::Jump(target) => Box::new(once(target)),
            Term::Return(_) | Term::Unset => Box::new(empty()),
        }
    }
    pub fn successors(&self) -> Vec<BlockId> {
        self.targets().copied().collect()
    }
    pub fn operands_mut<'a>(&'a mut self) -> Box<dyn Iterator<Item = &'a mut Value> + 'a> {
        match self {
            Term::Branch { cond, .. } => Box::new(once(cond)),
            Term::Return(value) => Box::new(value.iter_mut()),
            Term::Jump(_) | Term::Unset => Box::new(empty()),
        }
    }
    pub fn uses<'a>(&'a self) -> Box<dyn Iterator<Item = &'a str> + 'a> {
        match self {
            Term::Branch { cond, .. } => Box::new(cond.as_var().into_iter()),
            Term::Return(value) => Box::new(value.iter().filter_map(Value::as_var)),
            Term::Jump(_) | Term::Unset => Box::new(empty()),
        }
    }
    pub fn rename_use(&mut self, old: &str, new: &str) -> bool {
        let mut changed = false;
        for operand in self.operands_mut() {
            changed |= operand.rename(old, new);
        }
        changed
    }
}

#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub name: String,
    pub insts: Vec<Inst>,
    pub term: Term,
    /// Derived from terminators; see [`Function::build_cfg`].
    pub succs: Vec<BlockId>,
    pub preds: Vec<BlockId>,
}
impl Block {
    pub fn phis(&self) -> impl Iterator<Item = &Inst> + '_ {
        self.insts.iter().take_while(|inst| inst.is_phi())
    }
    pub fn has_phi(&self) -> bool {
        self.insts.iter().any(Inst::is_phi)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub blocks: Arena<Block>,
    /// Live blocks in declaration order.
    pub layout: Vec<BlockId>,
    pub entry: BlockId,
}
impl Function {
    /// Creates a function whose first block, `entry_name`, is the entry.
    pub fn new(name: impl Into<String>, entry_name: impl Into<String>) -> Self {
        let mut blocks = Arena::new();
        let entry = blocks.alloc(Block {
            name: entry_name.into(),
            ..Default::default()
        });
        Self {
            name: name.into(),
            blocks,
            layout: vec![entry],
            entry,
        }
    }
    pub fn new_block(&mut self, name: impl Into<String>) -> anyhow::Result<BlockId> {
        let name = name.into();
        if self.block_named(&name).is_some() {
            return Err(IrError::DuplicateBlock(name).into());
        }
        let id = self.blocks.alloc(Block {
            name,
            ..Default::default()
        });
        self.layout.push(id);
        Ok(id)
    }
    pub fn block_named(&self, name: &str) -> Option<BlockId> {
        self.layout
            .iter()
            .copied()
            .find(|id| self.blocks[*id].name == name)
    }
    pub fn set_entry(&mut self, entry: BlockId) {
        self.entry = entry;
    }
    pub fn contains(&self, block: BlockId) -> bool {
        self.layout.contains(&block)
    }
    /// Live blocks in layout order.
    pub fn iter(&self) -> impl Iterator<Item = (BlockId, &Block)> + '_ {
        self.layout.iter().map(|id| (*id, &self.blocks[*id]))
    }
    pub fn name_of(&self, block: BlockId) -> &str {
        &self.blocks[block].name
    }
    /// Every name defined anywhere in the function.
    pub fn variables(&self) -> BTreeSet<String> {
        self.iter()
            .flat_map(|(_, block)| block.insts.iter().map(|inst| inst.def().to_owned()))
            .collect()
    }
    /// Recomputes every successor and predecessor list from the terminators.
    ///
    /// Fails with [`IrError::MalformedIr`] if a block has no terminator or targets a block that
    /// is not part of the function.
    pub fn build_cfg(&mut self) -> anyhow::Result<()> {
        for id in self.layout.iter() {
            let block = &mut self.blocks[*id];
            block.succs.clear();
            block.preds.clear();
        }
        for id in self.layout.clone() {
            let block = &self.blocks[id];
            if !block.term.is_set() {
                return Err(IrError::MalformedIr {
                    block: block.name.clone(),
                    reason: "block has no terminator".to_owned(),
                })
                .context("in building the cfg");
            }
            for succ in block.term.successors() {
                if !self.contains(succ) {
                    return Err(IrError::MalformedIr {
                        block: self.blocks[id].name.clone(),
                        reason: "terminator targets a removed block".to_owned(),
                    })
                    .context("in building the cfg");
                }
                self.add_edge(id, succ);
            }
        }
        tracing::trace!(function = %self.name, blocks = self.layout.len(), "built cfg");
        Ok(())
    }
    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from].succs.push(to);
        self.blocks[to].preds.push(from);
    }
    /// Removes one occurrence of the edge `from → to` from both edge lists.
    pub fn remove_edge(&mut self, from: BlockId, to: BlockId) {
        let succs = &mut self.blocks[from].succs;
        if let Some(pos) = succs.iter().position(|s| *s == to) {
            succs.remove(pos);
        }
        let preds = &mut self.blocks[to].preds;
        if let Some(pos) = preds.iter().position(|p| *p == from) {
            preds.remove(pos);
        }
    }
    /// Drops `block` from the layout and leaves an empty tombstone in the arena.
    ///
    /// Neighbouring edge lists are not touched.
    pub fn remove_block(&mut self, block: BlockId) {
        self.layout.retain(|id| *id != block);
        let dead = &mut self.blocks[block];
        dead.insts.clear();
        dead.term = Term::Unset;
        dead.succs.clear();
        dead.preds.clear();
    }
    /// Blocks reachable from the entry through successor edges.
    pub fn reachable(&self) -> BTreeSet<BlockId> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![self.entry];
        while let Some(block) = stack.pop() {
            if !seen.insert(block) {
                continue;
            }
            stack.extend(self.blocks[block].succs.iter().copied());
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn diamond() -> anyhow::Result<(Function, [BlockId; 4])> {
        let mut func = Function::new("diamond", "entry");
        let entry = func.entry;
        let left = func.new_block("left")?;
        let right = func.new_block("right")?;
        let join = func.new_block("join")?;
        let mut b = Builder::new(&mut func);
        b.emit(Inst::assign("c", 1));
        b.terminate(Term::branch("c", left, right));
        b.set_block(left);
        b.terminate(Term::Jump(join));
        b.set_block(right);
        b.terminate(Term::Jump(join));
        b.set_block(join);
        b.terminate(Term::Return(None));
        func.build_cfg()?;
        Ok((func, [entry, left, right, join]))
    }

    #[test]
    fn edges_follow_terminators() -> anyhow::Result<()> {
        let (func, [entry, left, right, join]) = diamond()?;
        assert_eq!(func.blocks[entry].succs, vec![left, right]);
        assert_eq!(func.blocks[join].preds, vec![left, right]);
        assert_eq!(func.blocks[left].preds, vec![entry]);
        assert!(func.blocks[join].succs.is_empty());
        Ok(())
    }

    #[test]
    fn build_cfg_is_idempotent() -> anyhow::Result<()> {
        let (mut func, _) = diamond()?;
        let before = func.clone();
        func.build_cfg()?;
        func.build_cfg()?;
        assert_eq!(func, before);
        Ok(())
    }

    #[test]
    fn missing_terminator_is_malformed() -> anyhow::Result<()> {
        let mut func = Function::new("f", "entry");
        let next = func.new_block("next")?;
        Builder::new(&mut func).terminate(Term::Jump(next));
        let err = func.build_cfg().unwrap_err();
        assert_eq!(
            err.downcast_ref::<IrError>(),
            Some(&IrError::MalformedIr {
                block: "next".to_owned(),
                reason: "block has no terminator".to_owned(),
            })
        );
        Ok(())
    }

    #[test]
    fn duplicate_block_names_are_rejected() {
        let mut func = Function::new("f", "entry");
        let err = func.new_block("entry").unwrap_err();
        assert_eq!(
            err.downcast_ref::<IrError>(),
            Some(&IrError::DuplicateBlock("entry".to_owned()))
        );
    }

    #[test]
    fn defs_and_uses_skip_literals() {
        let inst = Inst::binary(BinOp::Add, "y", "x", 1);
        assert_eq!(inst.defs().collect::<Vec<_>>(), vec!["y"]);
        assert_eq!(inst.uses().collect::<Vec<_>>(), vec!["x"]);
        let ret = Term::Return(Some(Value::Const(3)));
        assert_eq!(ret.uses().count(), 0);
    }

    #[test]
    fn rename_touches_only_the_requested_side() {
        let mut inst = Inst::binary(BinOp::Mul, "x", "x", "x");
        assert!(inst.rename_use("x", "x.0"));
        assert_eq!(inst, Inst::binary(BinOp::Mul, "x", "x.0", "x.0"));
        assert!(inst.rename_def("x", "x.1"));
        assert!(!inst.rename_def("x", "x.2"));
        assert_eq!(inst.def(), "x.1");
    }

    #[test]
    fn removed_blocks_leave_the_layout() -> anyhow::Result<()> {
        let (mut func, [entry, left, right, join]) = diamond()?;
        func.remove_edge(entry, right);
        func.remove_edge(right, join);
        func.remove_block(right);
        assert_eq!(func.layout, vec![entry, left, join]);
        assert_eq!(func.blocks[join].preds, vec![left]);
        assert!(func.block_named("right").is_none());
        Ok(())
    }
}
