//! Dominance analysis and SSA construction over a [`toy_cfg::Function`].
//!
//! [`into_ssa`] runs the whole pipeline: CFG edges, dominator artifacts, phi placement on
//! iterated dominance frontiers, and renaming along the dominator tree.
use anyhow::Context;
use toy_cfg::Function;

pub mod dom;
pub mod phi;
pub mod rename;
pub mod verify;

pub use dom::{DomSets, DomTree, Dominance, Frontiers, Idoms};
pub use phi::insert_phi;
pub use rename::{Renamer, rename_ssa};
pub use verify::verify_ssa;

/// Converts `func` to SSA form in place and returns the dominance information it was built
/// from. Those artifacts stay valid until the next edit to the function's terminators.
pub fn into_ssa(func: &mut Function) -> anyhow::Result<Dominance> {
    func.build_cfg().context("in converting to ssa")?;
    let dominance = Dominance::compute(func).context("in converting to ssa")?;
    let phis = insert_phi(func, &dominance.df);
    rename_ssa(func, &dominance.tree)?;
    tracing::debug!(function = %func.name, phis, "converted to ssa");
    Ok(dominance)
}
