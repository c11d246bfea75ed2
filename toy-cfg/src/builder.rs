use crate::*;

/// Cursor over a [`Function`]: instructions are appended to the selected block, and a block is
/// closed by attaching its terminator.
pub struct Builder<'a> {
    func: &'a mut Function,
    cur: BlockId,
}
impl<'a> Builder<'a> {
    /// Starts at the function's entry block.
    pub fn new(func: &'a mut Function) -> Self {
        let cur = func.entry;
        Self { func, cur }
    }
    pub fn set_block(&mut self, block: BlockId) {
        self.cur = block;
    }
    pub fn block(&self) -> BlockId {
        self.cur
    }
    pub fn emit(&mut self, inst: Inst) {
        self.func.blocks[self.cur].insts.push(inst);
    }
    pub fn assign(&mut self, lhs: impl Into<String>, rhs: impl Into<Value>) {
        self.emit(Inst::assign(lhs, rhs));
    }
    pub fn binary(
        &mut self,
        op: BinOp,
        dst: impl Into<String>,
        lhs: impl Into<Value>,
        rhs: impl Into<Value>,
    ) {
        self.emit(Inst::binary(op, dst, lhs, rhs));
    }
    /// Closes the current block. A second call replaces the previous terminator.
    pub fn terminate(&mut self, term: Term) {
        self.func.blocks[self.cur].term = term;
    }
    pub fn jump(&mut self, target: BlockId) {
        self.terminate(Term::Jump(target));
    }
    pub fn branch(&mut self, cond: impl Into<Value>, if_true: BlockId, if_false: BlockId) {
        self.terminate(Term::branch(cond, if_true, if_false));
    }
    pub fn ret(&mut self, value: Option<Value>) {
        self.terminate(Term::Return(value));
    }
}
