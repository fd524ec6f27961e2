//! Control-flow graph over the statements of a `RefBody`.

use crate::error::IrError;
use crate::ir::{RefBody, StmtId};
use log::{debug, trace};
use std::collections::VecDeque;

/// A maximal straight-line run of statements, `start..end` in code positions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Block {
    pub start: usize,
    pub end: usize,
    /// Blocks reached by falling through or branching.
    pub succs: Vec<usize>,
    pub preds: Vec<usize>,
    /// Handler blocks guarding this block.
    pub handlers: Vec<usize>,
    /// Blocks this block is the handler of.
    pub exc_preds: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct Cfg {
    blocks: Vec<Block>,
    block_of: Vec<usize>,
    reachable: Vec<bool>,
    live: Vec<bool>,
}

impl Cfg {
    pub fn build(body: &RefBody) -> Result<Cfg, IrError> {
        let len = body.len();
        if len == 0 {
            fail!(Malformed, "ref body has no statements");
        }
        let positions = body.positions();
        let pos_of = |id: StmtId| -> Result<usize, IrError> {
            match positions.get(id.index()).copied().flatten() {
                Some(pos) => Ok(pos),
                None => fail!(UnresolvedTarget, "{} is not in the code", id),
            }
        };

        let mut cfg = Cfg {
            blocks: Vec::new(),
            block_of: vec![0; len],
            reachable: Vec::new(),
            live: vec![false; body.try_catches.len()],
        };

        // Straight-line runs, cut after every branch or non-continuing statement.
        let mut start = 0;
        for (pos, &id) in body.code().iter().enumerate() {
            let stmt = body.stmt(id);
            if !stmt.can_continue() || !stmt.targets().is_empty() || pos + 1 == len {
                cfg.push_block(start, pos + 1);
                start = pos + 1;
            }
        }

        // Targets and try boundaries that land mid-run split it.
        let mut tries = Vec::with_capacity(body.try_catches.len());
        for tc in &body.try_catches {
            let (s, e, h) = (pos_of(tc.start)?, pos_of(tc.end)?, pos_of(tc.handler)?);
            if s > e {
                fail!(Malformed, "try range {}..{} is reversed", tc.start, tc.end);
            }
            cfg.split(s);
            cfg.split(e + 1);
            cfg.split(h);
            tries.push((s, e, h));
        }
        for &id in body.code() {
            for target in body.stmt(id).targets() {
                cfg.split(pos_of(target)?);
            }
        }

        for b in 0..cfg.blocks.len() {
            let last = cfg.blocks[b].end - 1;
            let stmt = body.stmt(body.code()[last]);
            let mut succs = Vec::new();
            if stmt.can_continue() && last + 1 < len {
                succs.push(cfg.block_of[last + 1]);
            }
            for target in stmt.targets() {
                let t = cfg.block_of[pos_of(target)?];
                if !succs.contains(&t) {
                    succs.push(t);
                }
            }
            for &s in &succs {
                if !cfg.blocks[s].preds.contains(&b) {
                    cfg.blocks[s].preds.push(b);
                }
            }
            cfg.blocks[b].succs = succs;
        }
        for &(s, e, h) in &tries {
            let hb = cfg.block_of[h];
            for b in 0..cfg.blocks.len() {
                let block = &cfg.blocks[b];
                if block.start >= s && block.end <= e + 1 && !block.handlers.contains(&hb) {
                    cfg.blocks[b].handlers.push(hb);
                    cfg.blocks[hb].exc_preds.push(b);
                }
            }
        }

        cfg.compute_reachability();
        for (i, &(s, e, _)) in tries.iter().enumerate() {
            cfg.live[i] = (s..=e).any(|p| cfg.is_reachable(p));
        }
        debug!(
            "cfg: {} blocks over {} statements, {} reachable",
            cfg.blocks.len(),
            len,
            cfg.reachable.iter().filter(|&&r| r).count()
        );
        Ok(cfg)
    }

    fn push_block(&mut self, start: usize, end: usize) {
        let index = self.blocks.len();
        for p in start..end {
            self.block_of[p] = index;
        }
        self.blocks.push(Block { start, end, ..Block::default() });
    }

    /// Makes `pos` the first statement of a block.
    fn split(&mut self, pos: usize) {
        if pos >= self.block_of.len() {
            return;
        }
        let b = self.block_of[pos];
        if self.blocks[b].start == pos {
            return;
        }
        let end = self.blocks[b].end;
        trace!("cfg: splitting block {}..{} at {}", self.blocks[b].start, end, pos);
        self.blocks[b].end = pos;
        self.push_block(pos, end);
    }

    fn compute_reachability(&mut self) {
        self.reachable = vec![false; self.blocks.len()];
        let mut worklist = VecDeque::new();
        let entry = self.block_of[0];
        self.reachable[entry] = true;
        worklist.push_back(entry);
        while let Some(b) = worklist.pop_front() {
            let block = &self.blocks[b];
            for &next in block.succs.iter().chain(block.handlers.iter()) {
                if !self.reachable[next] {
                    self.reachable[next] = true;
                    worklist.push_back(next);
                }
            }
        }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Index of the block holding code position `pos`.
    pub fn block_of(&self, pos: usize) -> usize {
        self.block_of[pos]
    }

    pub fn is_reachable(&self, pos: usize) -> bool {
        self.block_of.get(pos).map_or(false, |&b| self.reachable[b])
    }

    /// Whether `pos` can be entered other than through an exception: it is the entry,
    /// it follows a statement of its own block, or a reachable block falls or jumps to it.
    pub fn has_normal_entry(&self, pos: usize) -> bool {
        if pos == 0 {
            return true;
        }
        let block = &self.blocks[self.block_of[pos]];
        block.start != pos || block.preds.iter().any(|&p| self.reachable[p])
    }

    pub fn is_live(&self, index: usize) -> bool {
        self.live.get(index).copied().unwrap_or(false)
    }

    /// Indices of the try/catch blocks guarding reachable code, in declaration order.
    pub fn live_try_catches(&self) -> impl Iterator<Item = usize> + '_ {
        self.live.iter().enumerate().filter(|(_, &l)| l).map(|(i, _)| i)
    }
}
