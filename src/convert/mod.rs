//! Lowering between the stack IR and the ref IR.
//!
//! Both directions make a single pass over the source body. References that may
//! point forward (branch targets, try/catch boundaries, local ranges) are recorded
//! as `Cell`s keyed by a source position and patched once the output is laid out.

pub mod to_ref;
pub mod to_stack;

use crate::error::IrError;
use std::collections::HashMap;
use std::hash::Hash;

/// Settings shared by both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Lower `x := x + k` to a single increment instruction.
    pub increments: bool,
    /// Carry local-variable debug ranges across.
    pub local_variables: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options { increments: true, local_variables: true }
    }
}

/// Which end of a source unit a cell resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    /// The first output element produced for the unit (or the next one produced).
    First,
    /// The last output element produced for the unit (or the last one before it).
    Last,
}

/// Where a resolved cell is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Site {
    /// Branch operand `index` of an output statement or instruction, by its arena index.
    Target { at: usize, index: usize },
    TryStart(usize),
    TryEnd(usize),
    Handler(usize),
    VarStart(usize),
    VarEnd(usize),
}

impl Site {
    /// Branch operands must resolve; range ends may fall away with their range.
    pub fn is_required(self) -> bool {
        matches!(self, Site::Target { .. } | Site::Handler(_))
    }
}

#[derive(Debug, Clone)]
pub struct Cell<K> {
    pub key: K,
    pub bound: Bound,
    pub site: Site,
}

/// Per-conversion state: the source-to-output local mapping and the pending cells.
#[derive(Debug)]
pub struct ConversionContext<K, S, D> {
    locals: HashMap<S, D>,
    cells: Vec<Cell<K>>,
}

impl<K, S, D> ConversionContext<K, S, D>
where
    K: Copy + std::fmt::Debug,
    S: Copy + Eq + Hash,
    D: Copy,
{
    pub fn new() -> Self {
        ConversionContext { locals: HashMap::new(), cells: Vec::new() }
    }

    /// The output local for `src`, created on first use.
    pub fn map_local<F: FnOnce() -> D>(&mut self, src: S, create: F) -> D {
        *self.locals.entry(src).or_insert_with(create)
    }

    pub fn mapped(&self, src: S) -> Option<D> {
        self.locals.get(&src).copied()
    }

    pub fn register(&mut self, key: K, bound: Bound, site: Site) {
        self.cells.push(Cell { key, bound, site });
    }

    /// Resolves every pending cell through `lookup`, consuming them.
    ///
    /// Returns each site with its output position. A required site whose key has no
    /// output position fails with `UnresolvedTarget`; an optional one maps to `None`.
    pub fn resolve<F>(&mut self, lookup: F) -> Result<Vec<(Site, Option<usize>)>, IrError>
    where
        F: Fn(K, Bound) -> Option<usize>,
    {
        let mut resolved = Vec::with_capacity(self.cells.len());
        for cell in self.cells.drain(..) {
            let pos = lookup(cell.key, cell.bound);
            if pos.is_none() && cell.site.is_required() {
                fail!(UnresolvedTarget, "nothing was produced at or after {:?}", cell.key);
            }
            resolved.push((cell.site, pos));
        }
        Ok(resolved)
    }
}

impl<K, S, D> Default for ConversionContext<K, S, D>
where
    K: Copy + std::fmt::Debug,
    S: Copy + Eq + Hash,
    D: Copy,
{
    fn default() -> Self {
        ConversionContext::new()
    }
}

/// Output ranges per source unit, `starts[k]..ends[k]` in output positions.
#[derive(Debug, Clone, Default)]
pub(crate) struct UnitTable {
    pub starts: Vec<usize>,
    pub ends: Vec<usize>,
    pub len: usize,
}

impl UnitTable {
    /// Cell lookup: `First` is the first output at or after the unit's start, `Last`
    /// the last output before the unit's end.
    pub fn lookup(&self, key: usize, bound: Bound) -> Option<usize> {
        match bound {
            Bound::First => self.starts.get(key).copied().filter(|&p| p < self.len),
            Bound::Last => self.ends.get(key).copied().filter(|&p| p > 0).map(|p| p - 1),
        }
    }
}

/// Pairs resolved range ends into inclusive ranges, dropping empty ones.
pub(crate) fn collect_ranges(
    count: usize,
    resolved: &[(Site, Option<usize>)],
    start_of: fn(Site) -> Option<usize>,
    end_of: fn(Site) -> Option<usize>,
) -> Vec<Option<(usize, usize)>> {
    let mut starts = vec![None; count];
    let mut ends = vec![None; count];
    for &(site, pos) in resolved {
        if let Some(i) = start_of(site) {
            starts[i] = pos;
        }
        if let Some(i) = end_of(site) {
            ends[i] = pos;
        }
    }
    starts
        .into_iter()
        .zip(ends)
        .map(|(s, e)| match (s, e) {
            (Some(s), Some(e)) if s <= e => Some((s, e)),
            _ => None,
        })
        .collect()
}
