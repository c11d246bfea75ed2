//! SSA optimizations: sparse constant propagation and folding, dead-code elimination, and CFG
//! simplification, driven to a fixed point by [`optimize`].
//!
//! Every pass mutates the [`Function`] in place and expects its edge lists to be current.
use anyhow::Context;
use bitflags::bitflags;
use toy_cfg::Function;

pub mod consts;
pub mod dce;
pub mod simplify;

pub use consts::{ConstEnv, constant_propagation, rewrite_constants};
pub use dce::dce;
pub use simplify::{
    cleanup_phis, fold_constant_branches, merge_trivial_block, remove_unreachable_blocks,
    simplify_cfg,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct Passes: u8 {
        const CONST_PROP = 0x1;
        const DCE = 0x2;
        const SIMPLIFY_CFG = 0x4;
        const ALL = Self::CONST_PROP.bits() | Self::DCE.bits() | Self::SIMPLIFY_CFG.bits();
    }
}
impl Default for Passes {
    fn default() -> Self {
        Passes::ALL
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct OptConfig {
    pub passes: Passes,
    /// Upper bound on pipeline rounds; reaching it is logged, not an error.
    pub max_rounds: usize,
}
impl Default for OptConfig {
    fn default() -> Self {
        Self {
            passes: Passes::ALL,
            max_rounds: 64,
        }
    }
}
impl OptConfig {
    pub fn with_passes(mut self, passes: Passes) -> Self {
        self.passes = passes;
        self
    }
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }
}

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct OptStats {
    pub rounds: usize,
    /// Operands replaced by literals plus binaries folded into assignments.
    pub folded: usize,
    /// Instructions removed by DCE.
    pub removed: usize,
    /// Rounds in which CFG simplification changed something.
    pub simplified: usize,
}

/// Runs constant propagation and rewriting, DCE, then CFG simplification, each as enabled in
/// `config.passes`, until a round changes nothing or `config.max_rounds` rounds have run.
pub fn optimize(func: &mut Function, config: &OptConfig) -> anyhow::Result<OptStats> {
    let mut stats = OptStats::default();
    while stats.rounds < config.max_rounds {
        stats.rounds += 1;
        let mut changed = false;
        if config.passes.contains(Passes::CONST_PROP) {
            let env = constant_propagation(func).context("in constant propagation")?;
            let folded = consts::rewrite(func, &env).context("in constant rewriting")?;
            stats.folded += folded;
            changed |= folded > 0;
        }
        if config.passes.contains(Passes::DCE) {
            let removed = dce::eliminate(func);
            stats.removed += removed;
            changed |= removed > 0;
        }
        if config.passes.contains(Passes::SIMPLIFY_CFG)
            && simplify_cfg(func).context("in cfg simplification")?
        {
            stats.simplified += 1;
            changed = true;
        }
        if !changed {
            tracing::debug!(function = %func.name, ?stats, "optimization reached a fixed point");
            return Ok(stats);
        }
    }
    tracing::warn!(
        function = %func.name,
        max_rounds = config.max_rounds,
        "optimization stopped before reaching a fixed point"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use toy_cfg::{BinOp, Builder, Inst, Term};

    fn sample() -> anyhow::Result<Function> {
        let mut func = Function::new("f", "entry");
        let mut b = Builder::new(&mut func);
        b.assign("a", 2);
        b.binary(BinOp::Mul, "b", "a", 3);
        b.binary(BinOp::Add, "c", "b", "arg");
        b.ret(Some("c".into()));
        func.build_cfg()?;
        Ok(func)
    }

    #[test]
    fn default_config_runs_everything() {
        let config = OptConfig::default();
        assert_eq!(config.passes, Passes::ALL);
        assert_eq!(config.max_rounds, 64);
        assert!(Passes::ALL.contains(Passes::CONST_PROP | Passes::DCE | Passes::SIMPLIFY_CFG));
    }

    #[test]
    fn full_pipeline_reaches_a_fixed_point() -> anyhow::Result<()> {
        let mut func = sample()?;
        let stats = optimize(&mut func, &OptConfig::default())?;
        assert_eq!(
            func.blocks[func.entry].insts,
            vec![Inst::binary(BinOp::Add, "c", 6, "arg")]
        );
        assert_eq!(stats.rounds, 2);
        assert_eq!(stats.removed, 2);
        Ok(())
    }

    #[test]
    fn disabled_passes_do_not_run() -> anyhow::Result<()> {
        let mut func = sample()?;
        let config = OptConfig::default().with_passes(Passes::CONST_PROP);
        optimize(&mut func, &config)?;
        assert_eq!(func.blocks[func.entry].insts.len(), 3);
        assert_eq!(func.blocks[func.entry].insts[1], Inst::assign("b", 6));
        Ok(())
    }

    #[test]
    fn round_limit_stops_early() -> anyhow::Result<()> {
        let mut func = sample()?;
        let stats = optimize(&mut func, &OptConfig::default().with_max_rounds(1))?;
        assert_eq!(stats.rounds, 1);
        assert_eq!(func.blocks[func.entry].term, Term::Return(Some("c".into())));
        Ok(())
    }
}
