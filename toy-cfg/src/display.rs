//! Debug rendering of a [`Function`]. Not a stable format.
use std::fmt;

use crate::*;

struct InstDisplay<'a> {
    func: &'a Function,
    inst: &'a Inst,
}
impl fmt::Display for InstDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inst {
            Inst::Assign { lhs, rhs } => write!(f, "{lhs} = {rhs}"),
            Inst::Binary { op, dst, lhs, rhs } => write!(f, "{dst} = {lhs} {op} {rhs}"),
            Inst::Phi { dst, incomings } => {
                write!(f, "{dst} = phi [")?;
                for (i, (pred, value)) in incomings.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {value}", self.func.name_of(*pred))?;
                }
                write!(f, "]")
            }
        }
    }
}

struct TermDisplay<'a> {
    func: &'a Function,
    term: &'a Term,
}
impl fmt::Display for TermDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.term {
            Term::Branch {
                cond,
                if_true,
                if_false,
            } => write!(
                f,
                "br {cond}, {}, {}",
                self.func.name_of(*if_true),
                self.func.name_of(*if_false)
            ),
            Term::Jump(target) => write!(f, "jump {}", self.func.name_of(*target)),
            Term::Return(Some(value)) => write!(f, "return {value}"),
            Term::Return(None) => write!(f, "return"),
            Term::Unset => write!(f, "<unterminated>"),
        }
    }
}

impl Function {
    pub fn display_inst<'a>(&'a self, inst: &'a Inst) -> impl fmt::Display + 'a {
        InstDisplay { func: self, inst }
    }
    fn names(&self, blocks: &[BlockId]) -> Vec<&str> {
        blocks.iter().map(|b| self.name_of(*b)).collect()
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Function {}:", self.name)?;
        for (_, block) in self.iter() {
            writeln!(f, "  Block {}:", block.name)?;
            for inst in &block.insts {
                writeln!(f, "    {}", self.display_inst(inst))?;
            }
            writeln!(
                f,
                "    {}",
                TermDisplay {
                    func: self,
                    term: &block.term
                }
            )?;
            writeln!(f, "    succs: {:?}", self.names(&block.succs))?;
            writeln!(f, "    preds: {:?}", self.names(&block.preds))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_blocks_and_edges() -> anyhow::Result<()> {
        let mut func = Function::new("f", "entry");
        let exit = func.new_block("exit")?;
        let mut b = Builder::new(&mut func);
        b.binary(BinOp::Add, "y", "x", 1);
        b.jump(exit);
        b.set_block(exit);
        b.ret(Some(Value::var("y")));
        func.build_cfg()?;
        assert_eq!(
            func.to_string(),
            "Function f:\n  Block entry:\n    y = x add 1\n    jump exit\n    succs: [\"exit\"]\n    preds: []\n  Block exit:\n    return y\n    succs: []\n    preds: [\"entry\"]\n"
        );
        Ok(())
    }
}
