//! Maximum-weight matching in general graphs.
//!
//! Primal-dual blossom algorithm after Edmonds, in the formulation of
//! Galil, "Efficient Algorithms for Finding Maximum Matching in Graphs"
//! (ACM Computing Surveys, 1986). Runs in O(V³).
//!
//! Vertices are numbered `0..n`, non-trivial blossoms `n..2n`. Both live in
//! one arena of [`Record`]s so that a vertex is simply a trivial blossom.
//! Edge `k` has endpoints `2k` and `2k + 1`; `p ^ 1` is the endpoint
//! opposite `p`. Vertex duals are stored doubled so that slack and delta
//! computations avoid halving wherever possible.

use std::time::Instant;

use tracing::trace;

use crate::error::{invariant, MatchError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Free,
    /// S: outer vertex or blossom, at even distance from a tree root.
    Outer,
    /// T: inner vertex or blossom, at odd distance from a tree root.
    Inner,
}

#[derive(Debug, Clone)]
struct Record {
    label: Label,
    crumb: bool,
    /// Remote endpoint of the edge through which the record got its label.
    label_end: Option<usize>,
    parent: Option<usize>,
    /// Sub-blossoms, starting with the base and going round the blossom.
    children: Vec<usize>,
    /// `endps[i]` is the local endpoint of `children[i]` on the edge that
    /// connects it to `children[i + 1]`.
    endps: Vec<usize>,
    /// Base vertex; `None` for an unused blossom slot.
    base: Option<usize>,
    /// Least-slack edge towards an S-blossom (see `scan_queue`).
    best_edge: Option<usize>,
    /// Least-slack edges to neighbouring S-blossoms of a top-level
    /// S-blossom, if computed.
    best_edges: Option<Vec<usize>>,
    /// `2 * u(v)` for vertices, `z(b)` for blossoms.
    dual: f64,
}

impl Record {
    fn new(base: Option<usize>, dual: f64) -> Self {
        Record {
            label: Label::Free,
            crumb: false,
            label_end: None,
            parent: None,
            children: Vec::new(),
            endps: Vec::new(),
            base,
            best_edge: None,
            best_edges: None,
            dual,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Delta {
    /// Some vertex dual reaches zero; the optimum is reached.
    Vertex,
    /// An S-to-free edge becomes tight.
    Grow(usize),
    /// An S-to-S edge becomes tight.
    Join(usize),
    /// A T-blossom's dual reaches zero and must be expanded.
    Expand(usize),
}

#[derive(Debug)]
pub(crate) struct Solved {
    pub(crate) mate: Vec<Option<usize>>,
    /// Edges with zero reduced slack under the optimal duals. An edge that
    /// is not tight lies in no optimal matching.
    pub(crate) tight: Vec<bool>,
}

pub(crate) struct WeightedBlossom {
    n: usize,
    edges: Vec<(usize, usize, f64)>,
    max_cardinality: bool,
    tolerance: f64,
    endpoint: Vec<usize>,
    neighbend: Vec<Vec<usize>>,
    /// Remote endpoint of each vertex's matched edge.
    mate: Vec<Option<usize>>,
    in_blossom: Vec<usize>,
    records: Vec<Record>,
    unused: Vec<usize>,
    allow_edge: Vec<bool>,
    queue: Vec<usize>,
}

impl WeightedBlossom {
    /// `edges` must not contain self-loops or parallel edges; every endpoint
    /// must be below `n`.
    pub(crate) fn new(n: usize, edges: Vec<(usize, usize, f64)>, max_cardinality: bool) -> Self {
        let max_weight = edges.iter().fold(0.0_f64, |m, &(_, _, w)| m.max(w));

        let mut endpoint = Vec::with_capacity(2 * edges.len());
        let mut neighbend = vec![Vec::new(); n];
        for (k, &(i, j, _)) in edges.iter().enumerate() {
            endpoint.push(i);
            endpoint.push(j);
            neighbend[i].push(2 * k + 1);
            neighbend[j].push(2 * k);
        }

        let mut records: Vec<Record> = (0..n).map(|v| Record::new(Some(v), max_weight)).collect();
        records.extend((0..n).map(|_| Record::new(None, 0.0)));

        WeightedBlossom {
            n,
            max_cardinality,
            tolerance: 1e-9 * max_weight.max(1.0),
            endpoint,
            neighbend,
            mate: vec![None; n],
            in_blossom: (0..n).collect(),
            records,
            unused: (n..2 * n).collect(),
            allow_edge: vec![false; edges.len()],
            queue: Vec::new(),
            edges,
        }
    }

    pub(crate) fn solve(mut self, deadline: Option<Instant>) -> Result<Solved> {
        if self.edges.is_empty() {
            return Ok(Solved {
                mate: vec![None; self.n],
                tight: Vec::new(),
            });
        }

        for stage in 0..self.n {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(MatchError::DeadlineExceeded { stages: stage });
            }
            if !self.run_stage()? {
                trace!(event = "weighted_done", stages = stage);
                break;
            }
        }

        self.verify_optimum()?;

        let partners: Vec<Option<usize>> = self
            .mate
            .iter()
            .map(|m| m.map(|p| self.endpoint[p]))
            .collect();
        for (v, partner) in partners.iter().enumerate() {
            if let Some(w) = *partner {
                invariant(partners[w] == Some(v), "mate relation is not symmetric")?;
            }
        }
        let tight = (0..self.edges.len())
            .map(|k| self.reduced_slack(k).abs() <= self.tolerance)
            .collect();
        Ok(Solved {
            mate: partners,
            tight,
        })
    }

    /// One stage: grow alternating trees until an augmenting path is found
    /// (returns `true`) or the duals prove optimality (returns `false`).
    fn run_stage(&mut self) -> Result<bool> {
        for record in &mut self.records {
            record.label = Label::Free;
            record.crumb = false;
            record.best_edge = None;
        }
        for record in &mut self.records[self.n..] {
            record.best_edges = None;
        }
        self.allow_edge.iter_mut().for_each(|a| *a = false);
        self.queue.clear();

        for v in 0..self.n {
            if self.mate[v].is_none() && self.records[self.in_blossom[v]].label == Label::Free {
                self.assign_label(v, Label::Outer, None)?;
            }
        }

        loop {
            if self.scan_queue()? {
                break;
            }

            let (kind, delta) = self.compute_delta()?;
            self.apply_delta(delta);
            trace!(event = "dual_update", ?kind, delta);

            match kind {
                Delta::Vertex => return Ok(false),
                Delta::Grow(k) => {
                    self.allow_edge[k] = true;
                    let (i, j, _) = self.edges[k];
                    let i = if self.records[self.in_blossom[i]].label == Label::Free {
                        j
                    } else {
                        i
                    };
                    invariant(
                        self.records[self.in_blossom[i]].label == Label::Outer,
                        "grow edge has no S endpoint",
                    )?;
                    self.queue.push(i);
                }
                Delta::Join(k) => {
                    self.allow_edge[k] = true;
                    let (i, _, _) = self.edges[k];
                    invariant(
                        self.records[self.in_blossom[i]].label == Label::Outer,
                        "join edge has no S endpoint",
                    )?;
                    self.queue.push(i);
                }
                Delta::Expand(b) => self.expand_blossom(b, false)?,
            }
        }

        // End of stage: expand S-blossoms whose dual dropped to zero.
        for b in self.n..2 * self.n {
            let r = &self.records[b];
            if r.parent.is_none() && r.base.is_some() && r.label == Label::Outer && r.dual == 0.0 {
                self.expand_blossom(b, true)?;
            }
        }
        Ok(true)
    }

    /// Labels everything reachable over tight edges. Returns `true` once the
    /// matching has been augmented.
    fn scan_queue(&mut self) -> Result<bool> {
        while let Some(v) = self.queue.pop() {
            invariant(
                self.records[self.in_blossom[v]].label == Label::Outer,
                "queued vertex is not an S-vertex",
            )?;

            for idx in 0..self.neighbend[v].len() {
                let p = self.neighbend[v][idx];
                let k = p / 2;
                let w = self.endpoint[p];
                if self.in_blossom[v] == self.in_blossom[w] {
                    continue;
                }

                let mut kslack = 0.0;
                if !self.allow_edge[k] {
                    kslack = self.slack(k);
                    if kslack <= 0.0 {
                        self.allow_edge[k] = true;
                    }
                }

                let bw = self.in_blossom[w];
                let w_top = self.records[bw].label;
                if self.allow_edge[k] {
                    match w_top {
                        Label::Free => {
                            // w is free: label it T and its mate S.
                            self.assign_label(w, Label::Inner, Some(p ^ 1))?;
                        }
                        Label::Outer => match self.scan_blossom(v, w)? {
                            Some(base) => self.add_blossom(base, k)?,
                            None => {
                                self.augment_matching(k)?;
                                return Ok(true);
                            }
                        },
                        Label::Inner => {
                            if self.records[w].label == Label::Free {
                                // w sits inside a T-blossom and is reached
                                // from outside for the first time.
                                self.records[w].label = Label::Inner;
                                self.records[w].label_end = Some(p ^ 1);
                            }
                        }
                    }
                } else if w_top == Label::Outer {
                    let b = self.in_blossom[v];
                    if self.records[b]
                        .best_edge
                        .map_or(true, |be| kslack < self.slack(be))
                    {
                        self.records[b].best_edge = Some(k);
                    }
                } else if self.records[w].label == Label::Free
                    && self.records[w]
                        .best_edge
                        .map_or(true, |be| kslack < self.slack(be))
                {
                    self.records[w].best_edge = Some(k);
                }
            }
        }
        Ok(false)
    }

    fn compute_delta(&self) -> Result<(Delta, f64)> {
        let mut best: Option<(Delta, f64)> = None;
        let mut consider = |kind: Delta, d: f64| {
            if best.map_or(true, |(_, cur)| d < cur) {
                best = Some((kind, d));
            }
        };

        let min_vertex_dual = self.records[..self.n]
            .iter()
            .map(|r| r.dual)
            .fold(f64::INFINITY, f64::min);
        if !self.max_cardinality {
            consider(Delta::Vertex, min_vertex_dual);
        }

        // Least slack on an edge between an S-vertex and a free vertex.
        for v in 0..self.n {
            if self.records[self.in_blossom[v]].label == Label::Free {
                if let Some(k) = self.records[v].best_edge {
                    consider(Delta::Grow(k), self.slack(k));
                }
            }
        }

        // Half the least slack on an edge between two S-blossoms.
        for b in 0..2 * self.n {
            let r = &self.records[b];
            if r.parent.is_none() && r.label == Label::Outer {
                if let Some(k) = r.best_edge {
                    consider(Delta::Join(k), self.slack(k) / 2.0);
                }
            }
        }

        // Least dual of a T-blossom.
        for b in self.n..2 * self.n {
            let r = &self.records[b];
            if r.base.is_some() && r.parent.is_none() && r.label == Label::Inner {
                consider(Delta::Expand(b), r.dual);
            }
        }

        match best {
            Some(found) => Ok(found),
            None => {
                // Nothing left to grow; maximum cardinality reached. A final
                // vertex update keeps the optimum verifiable.
                invariant(self.max_cardinality, "no delta candidate in weight mode")?;
                Ok((Delta::Vertex, min_vertex_dual.max(0.0)))
            }
        }
    }

    fn apply_delta(&mut self, delta: f64) {
        for v in 0..self.n {
            let label = self.records[self.in_blossom[v]].label;
            match label {
                Label::Outer => self.records[v].dual -= delta,
                Label::Inner => self.records[v].dual += delta,
                Label::Free => {}
            }
        }
        for b in self.n..2 * self.n {
            let r = &mut self.records[b];
            if r.base.is_some() && r.parent.is_none() {
                match r.label {
                    Label::Outer => r.dual += delta,
                    Label::Inner => r.dual -= delta,
                    Label::Free => {}
                }
            }
        }
    }

    /// Twice the slack of edge `k`; not meaningful inside a blossom.
    fn slack(&self, k: usize) -> f64 {
        let (i, j, w) = self.edges[k];
        self.records[i].dual + self.records[j].dual - 2.0 * w
    }

    fn leaves(&self, b: usize) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect_leaves(b, &mut out);
        out
    }

    fn collect_leaves(&self, b: usize, out: &mut Vec<usize>) {
        if b < self.n {
            out.push(b);
        } else {
            for &child in &self.records[b].children {
                self.collect_leaves(child, out);
            }
        }
    }

    fn child_at(&self, b: usize, j: isize) -> usize {
        let children = &self.records[b].children;
        children[j.rem_euclid(children.len() as isize) as usize]
    }

    fn endp_at(&self, b: usize, j: isize) -> usize {
        let endps = &self.records[b].endps;
        endps[j.rem_euclid(endps.len() as isize) as usize]
    }

    fn base_of(&self, b: usize) -> Result<usize> {
        self.records[b]
            .base
            .ok_or_else(|| MatchError::SolverInvariant(format!("blossom {b} has no base")))
    }

    /// Labels the top-level blossom containing `w` with `label`, reached
    /// through the edge whose remote endpoint is `p`.
    fn assign_label(&mut self, w: usize, label: Label, p: Option<usize>) -> Result<()> {
        let b = self.in_blossom[w];
        invariant(
            self.records[w].label == Label::Free && self.records[b].label == Label::Free,
            "labelling an already labelled blossom",
        )?;

        for r in [w, b] {
            self.records[r].label = label;
            self.records[r].label_end = p;
            self.records[r].best_edge = None;
        }

        match label {
            Label::Outer => {
                let leaves = self.leaves(b);
                self.queue.extend(leaves);
            }
            Label::Inner => {
                // Only the base of a T-blossom has an external mate; it
                // becomes S.
                let base = self.base_of(b)?;
                let mate = self.mate[base].ok_or_else(|| {
                    MatchError::SolverInvariant(format!("T-blossom base {base} is unmatched"))
                })?;
                self.assign_label(self.endpoint[mate], Label::Outer, Some(mate ^ 1))?;
            }
            Label::Free => {}
        }
        Ok(())
    }

    /// Traces back from `v` and `w` towards their roots. Returns the base of
    /// a new blossom, or `None` if the roots differ (an augmenting path).
    fn scan_blossom(&mut self, v: usize, w: usize) -> Result<Option<usize>> {
        let mut path = Vec::new();
        let mut base = None;
        let mut v = Some(v);
        let mut w = Some(w);

        while let Some(cur) = v {
            let b = self.in_blossom[cur];
            if self.records[b].crumb {
                base = self.records[b].base;
                break;
            }
            invariant(self.records[b].label == Label::Outer, "trace left the S-tree")?;
            path.push(b);
            self.records[b].crumb = true;

            let b_base = self.base_of(b)?;
            invariant(
                self.records[b].label_end == self.mate[b_base],
                "S-blossom label does not come from its base mate",
            )?;
            v = match self.records[b].label_end {
                // Root of the tree.
                None => None,
                Some(le) => {
                    let t = self.in_blossom[self.endpoint[le]];
                    invariant(self.records[t].label == Label::Inner, "expected T-blossom")?;
                    let le = self.records[t]
                        .label_end
                        .ok_or_else(|| MatchError::SolverInvariant("T-blossom without label end".into()))?;
                    Some(self.endpoint[le])
                }
            };

            if w.is_some() {
                std::mem::swap(&mut v, &mut w);
            }
        }

        for b in path {
            self.records[b].crumb = false;
        }
        Ok(base)
    }

    /// Contracts the odd cycle closed by edge `k` into a new S-blossom with
    /// the given base.
    fn add_blossom(&mut self, base: usize, k: usize) -> Result<()> {
        let (v, w, _) = self.edges[k];
        let bb = self.in_blossom[base];
        let mut bv = self.in_blossom[v];
        let mut bw = self.in_blossom[w];

        let b = self
            .unused
            .pop()
            .ok_or_else(|| MatchError::SolverInvariant("ran out of blossom slots".into()))?;
        self.records[b].base = Some(base);
        self.records[b].parent = None;
        self.records[bb].parent = Some(b);

        let mut children = Vec::new();
        let mut endps = Vec::new();

        // Trace back from v to the base.
        while bv != bb {
            self.records[bv].parent = Some(b);
            children.push(bv);
            let le = self.tree_edge(bv)?;
            endps.push(le);
            bv = self.in_blossom[self.endpoint[le]];
        }
        children.push(bb);
        children.reverse();
        endps.reverse();
        endps.push(2 * k);

        // Trace back from w to the base.
        while bw != bb {
            self.records[bw].parent = Some(b);
            children.push(bw);
            let le = self.tree_edge(bw)?;
            endps.push(le ^ 1);
            bw = self.in_blossom[self.endpoint[le]];
        }

        invariant(self.records[bb].label == Label::Outer, "blossom base is not S")?;
        self.records[b].label = Label::Outer;
        self.records[b].label_end = self.records[bb].label_end;
        self.records[b].dual = 0.0;
        self.records[b].children = children.clone();
        self.records[b].endps = endps;

        for leaf in self.leaves(b) {
            if self.records[self.in_blossom[leaf]].label == Label::Inner {
                // Former T-vertices become S as part of the new blossom.
                self.queue.push(leaf);
            }
            self.in_blossom[leaf] = b;
        }

        // Least-slack edges from the new blossom to other S-blossoms.
        let mut best_to: Vec<Option<usize>> = vec![None; 2 * self.n];
        for &child in &children {
            let lists: Vec<Vec<usize>> = match self.records[child].best_edges.take() {
                Some(list) => vec![list],
                None => self
                    .leaves(child)
                    .into_iter()
                    .map(|leaf| self.neighbend[leaf].iter().map(|p| p / 2).collect())
                    .collect(),
            };
            for k in lists.into_iter().flatten() {
                let (i, j, _) = self.edges[k];
                let j = if self.in_blossom[j] == b { i } else { j };
                let bj = self.in_blossom[j];
                if bj != b
                    && self.records[bj].label == Label::Outer
                    && best_to[bj].map_or(true, |cur| self.slack(k) < self.slack(cur))
                {
                    best_to[bj] = Some(k);
                }
            }
            self.records[child].best_edge = None;
        }

        let best_edges: Vec<usize> = best_to.into_iter().flatten().collect();
        let mut best_edge = None;
        for &k in &best_edges {
            if best_edge.map_or(true, |cur| self.slack(k) < self.slack(cur)) {
                best_edge = Some(k);
            }
        }
        self.records[b].best_edges = Some(best_edges);
        self.records[b].best_edge = best_edge;
        trace!(event = "blossom_added", blossom = b, base, size = children.len());
        Ok(())
    }

    /// The label end of a sub-blossom being absorbed into a new blossom,
    /// checking that it is a tree edge.
    fn tree_edge(&self, bv: usize) -> Result<usize> {
        let r = &self.records[bv];
        let base = self.base_of(bv)?;
        invariant(
            r.label == Label::Inner || (r.label == Label::Outer && r.label_end == self.mate[base]),
            "cycle member is not on the alternating tree",
        )?;
        r.label_end
            .ok_or_else(|| MatchError::SolverInvariant("cycle member has no label end".into()))
    }

    /// Dissolves top-level blossom `b`. Outside of a stage end, a T-blossom's
    /// children are relabelled so the tree stays consistent.
    fn expand_blossom(&mut self, b: usize, end_stage: bool) -> Result<()> {
        for s in self.records[b].children.clone() {
            self.records[s].parent = None;
            if s < self.n {
                self.in_blossom[s] = s;
            } else if end_stage && self.records[s].dual == 0.0 {
                self.expand_blossom(s, end_stage)?;
            } else {
                for leaf in self.leaves(s) {
                    self.in_blossom[leaf] = s;
                }
            }
        }

        if !end_stage && self.records[b].label == Label::Inner {
            self.relabel_expanded(b)?;
        }

        let dual = self.records[b].dual;
        self.records[b] = Record::new(None, dual);
        self.unused.push(b);
        trace!(event = "blossom_expanded", blossom = b, end_stage);
        Ok(())
    }

    fn relabel_expanded(&mut self, b: usize) -> Result<()> {
        let label_end = self.records[b]
            .label_end
            .ok_or_else(|| MatchError::SolverInvariant("T-blossom without label end".into()))?;
        let entry = self.in_blossom[self.endpoint[label_end ^ 1]];
        let len = self.records[b].children.len() as isize;
        let mut j = self.records[b]
            .children
            .iter()
            .position(|&c| c == entry)
            .ok_or_else(|| MatchError::SolverInvariant("entry child not in blossom".into()))?
            as isize;

        // Walk towards the base along the even-length side.
        let (step, trick) = if j & 1 != 0 {
            j -= len;
            (1, 0)
        } else {
            (-1, 1)
        };

        let mut p = label_end;
        while j != 0 {
            // Relabel the T-sub-blossom.
            let q = self.endp_at(b, j - trick as isize) ^ trick ^ 1;
            self.records[self.endpoint[p ^ 1]].label = Label::Free;
            self.records[self.endpoint[q]].label = Label::Free;
            self.assign_label(self.endpoint[p ^ 1], Label::Inner, Some(p))?;

            // Step to the next S-sub-blossom and note its forward endpoint.
            let e = self.endp_at(b, j - trick as isize) / 2;
            self.allow_edge[e] = true;
            j += step;
            p = self.endp_at(b, j - trick as isize) ^ trick;

            // Step to the next T-sub-blossom.
            self.allow_edge[p / 2] = true;
            j += step;
        }

        // The base sub-blossom becomes T without passing through its mate.
        let bv = self.child_at(b, j);
        let ep = self.endpoint[p ^ 1];
        self.records[ep].label = Label::Inner;
        self.records[bv].label = Label::Inner;
        self.records[ep].label_end = Some(p);
        self.records[bv].label_end = Some(p);
        self.records[bv].best_edge = None;

        // The rest of the cycle keeps a label only if reachable from outside.
        j += step;
        while self.child_at(b, j) != entry {
            let bv = self.child_at(b, j);
            if self.records[bv].label == Label::Outer {
                j += step;
                continue;
            }
            if let Some(v) = self
                .leaves(bv)
                .into_iter()
                .find(|&v| self.records[v].label != Label::Free)
            {
                invariant(self.records[v].label == Label::Inner, "reached leaf is not T")?;
                invariant(self.in_blossom[v] == bv, "reached leaf outside its blossom")?;
                self.records[v].label = Label::Free;
                let base = self.base_of(bv)?;
                let mate = self.mate[base].ok_or_else(|| {
                    MatchError::SolverInvariant(format!("sub-blossom base {base} is unmatched"))
                })?;
                self.records[self.endpoint[mate]].label = Label::Free;
                let label_end = self.records[v].label_end;
                self.assign_label(v, Label::Inner, label_end)?;
            }
            j += step;
        }
        Ok(())
    }

    /// Flips matched and unmatched edges along the even path from vertex `v`
    /// to the base of blossom `b`, then rotates `b` so `v` is its new base.
    fn augment_blossom(&mut self, b: usize, v: usize) -> Result<()> {
        let mut t = v;
        while self.records[t].parent != Some(b) {
            t = self.records[t]
                .parent
                .ok_or_else(|| MatchError::SolverInvariant(format!("{v} is not inside blossom {b}")))?;
        }
        if t >= self.n {
            self.augment_blossom(t, v)?;
        }

        let i = self.records[b]
            .children
            .iter()
            .position(|&c| c == t)
            .ok_or_else(|| MatchError::SolverInvariant("sub-blossom missing from parent".into()))?;
        let len = self.records[b].children.len() as isize;
        let mut j = i as isize;
        let (step, trick) = if i & 1 != 0 {
            j -= len;
            (1, 0)
        } else {
            (-1, 1)
        };

        while j != 0 {
            j += step;
            let t = self.child_at(b, j);
            let p = self.endp_at(b, j - trick as isize) ^ trick;
            if t >= self.n {
                self.augment_blossom(t, self.endpoint[p])?;
            }
            j += step;
            let t = self.child_at(b, j);
            if t >= self.n {
                self.augment_blossom(t, self.endpoint[p ^ 1])?;
            }
            self.mate[self.endpoint[p]] = Some(p ^ 1);
            self.mate[self.endpoint[p ^ 1]] = Some(p);
        }

        let record = &mut self.records[b];
        record.children.rotate_left(i);
        record.endps.rotate_left(i);
        let first = record.children[0];
        self.records[b].base = self.records[first].base;
        invariant(self.records[b].base == Some(v), "rotated blossom has the wrong base")
    }

    fn augment_matching(&mut self, k: usize) -> Result<()> {
        let (v, w, _) = self.edges[k];
        for (start, remote) in [(v, 2 * k + 1), (w, 2 * k)] {
            let mut s = start;
            let mut p = remote;
            loop {
                let bs = self.in_blossom[s];
                invariant(self.records[bs].label == Label::Outer, "path vertex is not S")?;
                let bs_base = self.base_of(bs)?;
                invariant(
                    self.records[bs].label_end == self.mate[bs_base],
                    "S-blossom label does not come from its base mate",
                )?;
                if bs >= self.n {
                    self.augment_blossom(bs, s)?;
                }
                self.mate[s] = Some(p);

                let Some(le) = self.records[bs].label_end else {
                    // Reached a tree root.
                    break;
                };
                let t = self.endpoint[le];
                let bt = self.in_blossom[t];
                invariant(self.records[bt].label == Label::Inner, "expected T-blossom on path")?;
                let le_t = self.records[bt]
                    .label_end
                    .ok_or_else(|| MatchError::SolverInvariant("T-blossom without label end".into()))?;
                s = self.endpoint[le_t];
                let j = self.endpoint[le_t ^ 1];
                invariant(self.records[bt].base == Some(t), "T-blossom entered off its base")?;
                if bt >= self.n {
                    self.augment_blossom(bt, j)?;
                }
                self.mate[j] = Some(le_t);
                p = le_t ^ 1;
            }
        }
        trace!(event = "augmented", edge = k);
        Ok(())
    }

    /// Checks the complementary slackness conditions of the final duals.
    fn verify_optimum(&self) -> Result<()> {
        let eps = self.tolerance;
        let min_vertex = self.records[..self.n]
            .iter()
            .map(|r| r.dual)
            .fold(f64::INFINITY, f64::min);
        let offset = if self.max_cardinality {
            (-min_vertex).max(0.0)
        } else {
            0.0
        };

        invariant(min_vertex + offset >= -eps, "negative vertex dual")?;
        invariant(
            self.records[self.n..].iter().all(|r| r.dual >= -eps),
            "negative blossom dual",
        )?;

        for (k, &(i, j, _)) in self.edges.iter().enumerate() {
            let s = self.reduced_slack(k);
            invariant(s >= -eps, "edge with negative slack")?;

            let matched_i = self.mate[i].is_some_and(|p| p / 2 == k);
            let matched_j = self.mate[j].is_some_and(|p| p / 2 == k);
            if matched_i || matched_j {
                invariant(matched_i && matched_j, "half-matched edge")?;
                invariant(s.abs() <= eps, "matched edge is not tight")?;
            }
        }

        for v in 0..self.n {
            invariant(
                self.mate[v].is_some() || (self.records[v].dual + offset).abs() <= eps,
                "single vertex with non-zero dual",
            )?;
        }

        for r in &self.records[self.n..] {
            if r.base.is_some() && r.dual > eps {
                invariant(r.endps.len() % 2 == 1, "blossom of even length")?;
                for &p in r.endps.iter().skip(1).step_by(2) {
                    invariant(
                        self.mate[self.endpoint[p]] == Some(p ^ 1)
                            && self.mate[self.endpoint[p ^ 1]] == Some(p),
                        "blossom with positive dual is not full",
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Twice the slack of edge `k` including the duals of every blossom
    /// that holds both endpoints.
    fn reduced_slack(&self, k: usize) -> f64 {
        let (i, j, _) = self.edges[k];
        let mut s = self.slack(k);
        let up_i = self.ancestry(i);
        let up_j = self.ancestry(j);
        for (bi, bj) in up_i.iter().rev().zip(up_j.iter().rev()) {
            if bi != bj {
                break;
            }
            s += 2.0 * self.records[*bi].dual;
        }
        s
    }

    /// `v` followed by its enclosing blossoms, innermost first.
    fn ancestry(&self, v: usize) -> Vec<usize> {
        let mut chain = vec![v];
        let mut cur = v;
        while let Some(parent) = self.records[cur].parent {
            chain.push(parent);
            cur = parent;
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solve(edges: &[(usize, usize, f64)], max_cardinality: bool) -> Vec<Option<usize>> {
        let n = edges.iter().map(|&(i, j, _)| i.max(j) + 1).max().unwrap_or(0);
        WeightedBlossom::new(n, edges.to_vec(), max_cardinality)
            .solve(None)
            .unwrap()
            .mate
    }

    fn mates(raw: &[i64]) -> Vec<Option<usize>> {
        raw.iter()
            .map(|&m| if m < 0 { None } else { Some(m as usize) })
            .collect()
    }

    #[test]
    fn empty_and_single_edge() {
        assert!(solve(&[], false).is_empty());
        assert_eq!(solve(&[(0, 1, 1.0)], false), mates(&[1, 0]));
    }

    #[test]
    fn prefers_heavier_edge() {
        assert_eq!(
            solve(&[(1, 2, 10.0), (2, 3, 11.0)], false),
            mates(&[-1, -1, 3, 2])
        );
    }

    #[test]
    fn weight_versus_cardinality() {
        let edges = [(1, 2, 5.0), (2, 3, 11.0), (3, 4, 5.0)];
        assert_eq!(solve(&edges, false), mates(&[-1, -1, 3, 2, -1]));
        assert_eq!(solve(&edges, true), mates(&[-1, 2, 1, 4, 3]));
    }

    #[test]
    fn negative_weights() {
        let edges = [
            (1, 2, 2.0),
            (1, 3, -2.0),
            (2, 3, 1.0),
            (2, 4, -1.0),
            (3, 4, -6.0),
        ];
        assert_eq!(solve(&edges, false), mates(&[-1, 2, 1, -1, -1]));
        assert_eq!(solve(&edges, true), mates(&[-1, 3, 4, 1, 2]));
    }

    #[test]
    fn s_blossom_augmentation() {
        assert_eq!(
            solve(&[(1, 2, 8.0), (1, 3, 9.0), (2, 3, 10.0), (3, 4, 7.0)], false),
            mates(&[-1, 2, 1, 4, 3])
        );
        assert_eq!(
            solve(
                &[
                    (1, 2, 8.0),
                    (1, 3, 9.0),
                    (2, 3, 10.0),
                    (3, 4, 7.0),
                    (1, 6, 5.0),
                    (4, 5, 6.0)
                ],
                false
            ),
            mates(&[-1, 6, 3, 2, 5, 4, 1])
        );
    }

    #[test]
    fn s_blossom_relabelled_as_t() {
        assert_eq!(
            solve(
                &[
                    (1, 2, 9.0),
                    (1, 3, 8.0),
                    (2, 3, 10.0),
                    (1, 4, 5.0),
                    (4, 5, 4.0),
                    (1, 6, 3.0)
                ],
                false
            ),
            mates(&[-1, 6, 3, 2, 5, 4, 1])
        );
        assert_eq!(
            solve(
                &[
                    (1, 2, 9.0),
                    (1, 3, 8.0),
                    (2, 3, 10.0),
                    (1, 4, 5.0),
                    (4, 5, 3.0),
                    (3, 6, 4.0)
                ],
                false
            ),
            mates(&[-1, 2, 1, 6, 5, 4, 3])
        );
    }

    #[test]
    fn nested_s_blossom_expanded_recursively() {
        assert_eq!(
            solve(
                &[
                    (1, 2, 8.0),
                    (1, 3, 8.0),
                    (2, 3, 10.0),
                    (2, 4, 12.0),
                    (3, 5, 12.0),
                    (4, 5, 14.0),
                    (4, 6, 12.0),
                    (5, 7, 12.0),
                    (6, 7, 14.0),
                    (7, 8, 12.0)
                ],
                false
            ),
            mates(&[-1, 2, 1, 5, 6, 3, 4, 8, 7])
        );
    }

    #[test]
    fn t_blossom_expanded() {
        assert_eq!(
            solve(
                &[
                    (1, 2, 23.0),
                    (1, 5, 22.0),
                    (1, 6, 15.0),
                    (2, 3, 25.0),
                    (3, 4, 22.0),
                    (4, 5, 25.0),
                    (4, 8, 14.0),
                    (5, 7, 13.0)
                ],
                false
            ),
            mates(&[-1, 6, 3, 2, 8, 7, 1, 5, 4])
        );
    }

    #[test]
    fn nested_blossom_on_augmenting_path_after_expansion() {
        assert_eq!(
            solve(
                &[
                    (1, 2, 45.0),
                    (1, 7, 45.0),
                    (2, 3, 50.0),
                    (3, 4, 45.0),
                    (4, 5, 95.0),
                    (4, 6, 94.0),
                    (5, 6, 94.0),
                    (6, 7, 50.0),
                    (1, 8, 30.0),
                    (3, 11, 35.0),
                    (5, 9, 36.0),
                    (7, 10, 26.0),
                    (11, 12, 5.0)
                ],
                false
            ),
            mates(&[-1, 8, 3, 2, 6, 9, 4, 10, 1, 5, 7, 12, 11])
        );
    }

    #[test]
    fn fractional_weights() {
        let edges = [(0, 1, 0.1), (1, 2, 0.3), (2, 3, 0.1)];
        assert_eq!(solve(&edges, false), mates(&[-1, 2, 1, -1]));
        assert_eq!(solve(&edges, true), mates(&[1, 0, 3, 2]));
    }

    #[test]
    fn loose_edges_are_not_tight() {
        // A star: unmatched leaves keep a zero dual, so the centre's dual
        // covers the second heaviest spoke and every lighter spoke has slack.
        let edges: Vec<_> = (1..=6).map(|leaf| (0, leaf, leaf as f64)).collect();
        let solved = WeightedBlossom::new(7, edges, false).solve(None).unwrap();
        assert_eq!(solved.mate[0], Some(6));
        assert!(solved.tight[5]);
        assert!(solved.tight[..4].iter().all(|t| !t));
    }

    #[test]
    fn deadline_in_the_past_stops_the_solve() {
        let past = Instant::now();
        let err = WeightedBlossom::new(2, vec![(0, 1, 1.0)], false)
            .solve(Some(past))
            .unwrap_err();
        assert!(matches!(err, MatchError::DeadlineExceeded { stages: 0 }));
    }
}
