//! Network adjustment of navigation offsets from ties and global ties.
//!
//! The solve runs in stages on every call: a rigid offset per survey
//! block, an average pull from fixed files and global ties, then a
//! per-point relaxation whose working field is densified by the
//! interpolator after every pass. All offsets inside the solver are local
//! meters (east, north, down).

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::core::{CrossingStatus, FileStatus, InversionState, MetricScale, NavRef};
use crate::project::{ProjectControls, ProjectStore};
use crate::utils::config::SolverConfig;
use crate::utils::progress::ProgressSink;
use crate::validation::{NavAdjustError, PreconditionChecker, Result};

use super::interpolation::{Interpolator, TrackLayout};
use super::weights::{AxisGroup, Split, SplitTable};

/// Largest block update (m) treated as converged
const BLOCK_TOLERANCE_M: f64 = 1e-6;

/// Outcome of an inversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InversionReport {
    pub iterations: usize,
    pub converged: bool,
    /// Nav points solved directly
    pub unknowns: usize,
    /// Sigma-normalized RMS residual before and after relaxation
    pub initial_misfit: f64,
    pub final_misfit: f64,
    pub block_offsets: Vec<Vector3<f64>>,
    pub warnings: Vec<String>,
}

/// Residual and update size after one relaxation pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassStats {
    pub update_norm: f64,
    pub misfit: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Endpoints {
    Pair { first: usize, second: usize },
    Global { point: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Source {
    Tie { crossing: usize, tie: usize },
    Global { index: usize },
}

/// One observed axis of a constraint
#[derive(Debug, Clone, Copy, PartialEq)]
struct AxisRow {
    axis: Vector3<f64>,
    /// Squared row weight
    weight: f64,
    sigma: f64,
    group: AxisGroup,
}

#[derive(Debug, Clone, PartialEq)]
struct Constraint {
    source: Source,
    endpoints: Endpoints,
    observed_m: Vector3<f64>,
    rows: Vec<AxisRow>,
    /// Endpoint shares for the horizontal and vertical groups
    shares: [Split; 2],
}

impl Constraint {
    fn model(&self, offsets: &[Vector3<f64>]) -> Vector3<f64> {
        match self.endpoints {
            Endpoints::Pair { first, second } => offsets[second] - offsets[first],
            Endpoints::Global { point } => offsets[point],
        }
    }

    fn share(&self, group: AxisGroup) -> Split {
        match group {
            AxisGroup::Horizontal => self.shares[0],
            AxisGroup::Vertical => self.shares[1],
        }
    }

    fn observes(&self, group: AxisGroup) -> bool {
        self.rows.iter().any(|r| r.group == group)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct FirstLink {
    a: usize,
    b: usize,
    weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct SecondLink {
    a: usize,
    b: usize,
    c: usize,
    /// Time fraction of `b` between `a` and `c`
    fraction: f64,
    weight: f64,
}

/// Accumulated normal system of one unknown
#[derive(Debug, Clone, Copy)]
struct Normal {
    matrix: Matrix3<f64>,
    rhs: Vector3<f64>,
}

impl Normal {
    fn zero() -> Self {
        Self {
            matrix: Matrix3::zeros(),
            rhs: Vector3::zeros(),
        }
    }

    fn add_row(&mut self, axis: &Vector3<f64>, weight: f64, target: f64) {
        self.matrix += axis * axis.transpose() * weight;
        self.rhs += axis * (weight * target);
    }

    fn add_isotropic(&mut self, weight: f64, target: &Vector3<f64>) {
        self.matrix += Matrix3::identity() * weight;
        self.rhs += target * weight;
    }

    /// Minimum-norm solution; unobserved directions stay put
    fn solve(&self) -> Vector3<f64> {
        let svd = self.matrix.svd(true, true);
        let largest = svd.singular_values.max();
        if largest <= 0.0 {
            return Vector3::zeros();
        }
        svd.solve(&self.rhs, largest * 1e-9)
            .unwrap_or_else(|_| Vector3::zeros())
    }
}

/// Zero the components a file status holds fixed
fn mask(v: Vector3<f64>, status: FileStatus) -> Vector3<f64> {
    let mut out = v;
    if status.fixed_xy() {
        out.x = 0.0;
        out.y = 0.0;
    }
    if status.fixed_z() {
        out.z = 0.0;
    }
    out
}

fn block_status(statuses: &[FileStatus]) -> FileStatus {
    let xy = statuses.iter().any(|s| s.fixed_xy());
    let z = statuses.iter().any(|s| s.fixed_z());
    match (xy, z) {
        (true, true) => FileStatus::Fixed,
        (true, false) => FileStatus::FixedXy,
        (false, true) => FileStatus::FixedZ,
        _ if !statuses.is_empty() && statuses.iter().all(|s| *s == FileStatus::Poor) => FileStatus::Poor,
        _ => FileStatus::Good,
    }
}

/// Tie network of a project in solver form
#[derive(Debug, Clone)]
pub struct Network {
    layout: TrackLayout,
    status: Vec<FileStatus>,
    file_of: Vec<usize>,
    scales: Vec<MetricScale>,
    file_status: Vec<FileStatus>,
    file_block: Vec<usize>,
    num_blocks: usize,
    constraints: Vec<Constraint>,
    unknowns: Vec<usize>,
    first_links: Vec<FirstLink>,
    second_links: Vec<SecondLink>,
    crossing_scales: Vec<(usize, MetricScale)>,
    warnings: Vec<String>,
}

impl Network {
    fn build(store: &ProjectStore, splits: &SplitTable) -> Result<Self> {
        let layout = TrackLayout::from_store(store);
        let controls: ProjectControls = store.controls;

        let mut status = Vec::new();
        let mut file_of = Vec::new();
        let mut scales = Vec::new();
        status.try_reserve_exact(layout.len())?;
        file_of.try_reserve_exact(layout.len())?;
        scales.try_reserve_exact(layout.len())?;
        for (ifile, file) in store.files().iter().enumerate() {
            for section in &file.sections {
                let scale = MetricScale::at_latitude(section.mid_latitude());
                for _ in &section.nav_points {
                    status.push(file.status);
                    file_of.push(ifile);
                    scales.push(scale);
                }
            }
        }

        let index_of = |nav: NavRef| layout.index_of(nav).ok_or(NavAdjustError::UnknownNavPoint(nav));
        let mut constraints = Vec::new();
        let mut crossing_scales = Vec::new();

        for (icrossing, crossing) in store.crossings().iter().enumerate() {
            if crossing.status != CrossingStatus::Set || crossing.ties.is_empty() {
                continue;
            }
            crossing_scales.push((icrossing, store.crossing_scale(icrossing)?));
            for (itie, tie) in crossing.ties.iter().enumerate() {
                let first = index_of(NavRef::new(crossing.side_1.file, crossing.side_1.section, tie.snav_1))?;
                let second = index_of(NavRef::new(crossing.side_2.file, crossing.side_2.section, tie.snav_2))?;
                let rows = axis_rows(&tie.ellipsoid, tie.mode, &controls);
                let shares = [
                    splits.split(status[first], status[second], AxisGroup::Horizontal),
                    splits.split(status[first], status[second], AxisGroup::Vertical),
                ];
                constraints.push(Constraint {
                    source: Source::Tie { crossing: icrossing, tie: itie },
                    endpoints: Endpoints::Pair { first, second },
                    observed_m: tie.offset_m,
                    rows,
                    shares,
                });
            }
        }
        for (iglobal, global) in store.global_ties().iter().enumerate() {
            let point = index_of(global.nav)?;
            let share = |group| splits.global_share(status[point], group);
            constraints.push(Constraint {
                source: Source::Global { index: iglobal },
                endpoints: Endpoints::Global { point },
                observed_m: global.offset_m,
                rows: axis_rows(&global.ellipsoid, global.mode, &controls),
                shares: [
                    Split { side_1: 0.0, side_2: share(AxisGroup::Horizontal) },
                    Split { side_1: 0.0, side_2: share(AxisGroup::Vertical) },
                ],
            });
        }

        let mut is_unknown = vec![false; layout.len()];
        for c in &constraints {
            match c.endpoints {
                Endpoints::Pair { first, second } => {
                    is_unknown[first] = true;
                    is_unknown[second] = true;
                }
                Endpoints::Global { point } => is_unknown[point] = true,
            }
        }
        let unknowns: Vec<usize> = (0..layout.len()).filter(|&i| is_unknown[i]).collect();

        let mut network = Self {
            file_status: store.files().iter().map(|f| f.status).collect(),
            file_block: store.files().iter().map(|f| f.block).collect(),
            num_blocks: store.num_blocks(),
            layout,
            status,
            file_of,
            scales,
            constraints,
            unknowns,
            first_links: Vec::new(),
            second_links: Vec::new(),
            crossing_scales,
            warnings: Vec::new(),
        };
        network.build_smoothing(&is_unknown, controls.smoothing_weight);
        Ok(network)
    }

    fn build_smoothing(&mut self, is_unknown: &[bool], smoothing: f64) {
        if smoothing <= 0.0 {
            return;
        }
        for track in self.layout.tracks() {
            let on_track: Vec<usize> = track.iter().copied().filter(|&i| is_unknown[i]).collect();
            for w in on_track.windows(2) {
                let dt = self.layout.time(w[1]) - self.layout.time(w[0]);
                if dt <= 0.0 {
                    let message = format!(
                        "Zero time difference between {:?} and {:?}; smoothing skipped",
                        self.layout.nav_ref(w[0]),
                        self.layout.nav_ref(w[1])
                    );
                    log::warn!("{}", message);
                    self.warnings.push(message);
                    continue;
                }
                self.first_links.push(FirstLink {
                    a: w[0],
                    b: w[1],
                    weight: smoothing / dt,
                });
            }
            for w in on_track.windows(3) {
                let span = self.layout.time(w[2]) - self.layout.time(w[0]);
                if span <= 0.0 {
                    continue;
                }
                let half = 0.5 * span;
                self.second_links.push(SecondLink {
                    a: w[0],
                    b: w[1],
                    c: w[2],
                    fraction: (self.layout.time(w[1]) - self.layout.time(w[0])) / span,
                    weight: smoothing / (half * half),
                });
            }
        }
    }

    pub fn num_unknowns(&self) -> usize {
        self.unknowns.len()
    }

    pub fn layout(&self) -> &TrackLayout {
        &self.layout
    }

    /// Sigma-normalized RMS residual of every constraint under `offsets`
    pub fn misfit(&self, offsets: &[Vector3<f64>]) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;
        for c in &self.constraints {
            let residual = c.observed_m - c.model(offsets);
            for row in &c.rows {
                let r = row.axis.dot(&residual) / row.sigma;
                sum += r * r;
                count += 1;
            }
        }
        if count == 0 {
            0.0
        } else {
            (sum / count as f64).sqrt()
        }
    }

    /// Rigid offset per block from ties joining different blocks
    fn estimate_blocks(&self, splits: &SplitTable, max_iterations: usize) -> Vec<Vector3<f64>> {
        let mut offsets = vec![Vector3::zeros(); self.num_blocks];
        if self.num_blocks <= 1 {
            return offsets;
        }
        let statuses: Vec<FileStatus> = (0..self.num_blocks)
            .map(|b| {
                let members: Vec<FileStatus> = self
                    .file_block
                    .iter()
                    .zip(&self.file_status)
                    .filter(|(block, _)| **block == b)
                    .map(|(_, s)| *s)
                    .collect();
                block_status(&members)
            })
            .collect();

        let block_of = |i: usize| self.file_block[self.file_of[i]];
        for iteration in 0..max_iterations {
            let mut normals = vec![Normal::zero(); self.num_blocks];
            for c in &self.constraints {
                let Endpoints::Pair { first, second } = c.endpoints else {
                    continue;
                };
                let (b1, b2) = (block_of(first), block_of(second));
                if b1 == b2 {
                    continue;
                }
                let residual = c.observed_m - (offsets[b2] - offsets[b1]);
                for row in &c.rows {
                    let split = splits.split(statuses[b1], statuses[b2], row.group);
                    let projected = row.axis.dot(&residual);
                    if split.side_2 > 0.0 {
                        normals[b2].add_row(&row.axis, row.weight, split.side_2 * projected);
                    }
                    if split.side_1 > 0.0 {
                        normals[b1].add_row(&row.axis, row.weight, -split.side_1 * projected);
                    }
                }
            }
            let mut largest = 0.0f64;
            for (b, normal) in normals.iter().enumerate() {
                let delta = mask(normal.solve(), statuses[b]);
                largest = largest.max(delta.norm());
                offsets[b] += delta;
            }
            log::trace!("Block iteration {}: largest update {:.3e} m", iteration + 1, largest);
            if largest < BLOCK_TOLERANCE_M {
                log::debug!("Block estimate converged after {} iterations", iteration + 1);
                break;
            }
        }
        offsets
    }

    /// Per-file average correction pulled from fixed references, each seed
    /// weighted by 1/hop² over the file tie graph
    fn fixed_pull(&self, block_offsets: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
        let num_files = self.file_status.len();
        let mut pull = vec![Vector3::zeros(); num_files];
        let any_fixed = self.file_status.iter().any(|s| s.is_fixed());
        let any_global = self
            .constraints
            .iter()
            .any(|c| matches!(c.endpoints, Endpoints::Global { .. }));
        if !any_fixed && !any_global {
            return pull;
        }

        let baseline = |i: usize| block_offsets[self.file_block[self.file_of[i]]];
        for group in [AxisGroup::Horizontal, AxisGroup::Vertical] {
            let free = |f: usize| !group.is_fixed(self.file_status[f]);
            let mut seeds: Vec<(usize, Vector3<f64>)> = Vec::new();
            let mut edges: Vec<(usize, usize)> = Vec::new();

            for c in self.constraints.iter().filter(|c| c.observes(group)) {
                match c.endpoints {
                    Endpoints::Pair { first, second } => {
                        let (f1, f2) = (self.file_of[first], self.file_of[second]);
                        match (free(f1), free(f2)) {
                            (true, true) if f1 != f2 => edges.push((f1, f2)),
                            (false, true) => seeds.push((f2, c.observed_m - baseline(second))),
                            (true, false) => seeds.push((f1, -c.observed_m - baseline(first))),
                            _ => {}
                        }
                    }
                    Endpoints::Global { point } => {
                        let f = self.file_of[point];
                        if free(f) {
                            seeds.push((f, c.observed_m - baseline(point)));
                        }
                    }
                }
            }
            if seeds.is_empty() {
                continue;
            }

            let mut weighted = vec![Vector3::zeros(); num_files];
            let mut weights = vec![0.0; num_files];
            for (seed_file, value) in &seeds {
                let hops = hop_counts(num_files, &edges, *seed_file);
                for f in 0..num_files {
                    if let Some(h) = hops[f] {
                        let w = 1.0 / (h * h) as f64;
                        weighted[f] += value * w;
                        weights[f] += w;
                    }
                }
            }
            for f in 0..num_files {
                if weights[f] > 0.0 && free(f) {
                    let average = weighted[f] / weights[f];
                    match group {
                        AxisGroup::Horizontal => {
                            pull[f].x = average.x;
                            pull[f].y = average.y;
                        }
                        AxisGroup::Vertical => pull[f].z = average.z,
                    }
                }
            }
        }
        pull
    }
}

/// Hop count from `seed` (counted as 1) over an undirected edge list,
/// relaxed by forward and backward sweeps until nothing changes
fn hop_counts(num_files: usize, edges: &[(usize, usize)], seed: usize) -> Vec<Option<usize>> {
    let mut hops: Vec<Option<usize>> = vec![None; num_files];
    hops[seed] = Some(1);
    let relax = |hops: &mut Vec<Option<usize>>, from: usize, to: usize| -> bool {
        match hops[from] {
            Some(h) if hops[to].map_or(true, |t| h + 1 < t) => {
                hops[to] = Some(h + 1);
                true
            }
            _ => false,
        }
    };
    loop {
        let mut changed = false;
        for &(a, b) in edges {
            changed |= relax(&mut hops, a, b);
        }
        for &(a, b) in edges.iter().rev() {
            changed |= relax(&mut hops, b, a);
        }
        if !changed {
            return hops;
        }
    }
}

fn axis_rows(
    ellipsoid: &crate::core::Ellipsoid,
    mode: crate::core::TieMode,
    controls: &ProjectControls,
) -> Vec<AxisRow> {
    let vertical = ellipsoid.vertical_axis();
    ellipsoid
        .enabled_axes(mode)
        .into_iter()
        .map(|k| {
            let sigma = ellipsoid.sigma[k];
            let mut weight = controls.offset_weight / sigma;
            let group = if k == vertical {
                weight *= controls.z_weight_factor * controls.z_weight_factor;
                AxisGroup::Vertical
            } else {
                AxisGroup::Horizontal
            };
            AxisRow {
                axis: ellipsoid.axes[k],
                weight,
                sigma,
                group,
            }
        })
        .collect()
}

/// Iterative per-point solve over a prepared network
#[derive(Debug, Clone)]
pub struct Relaxation<'n> {
    network: &'n Network,
    baseline: Vec<Vector3<f64>>,
    block_offsets: Vec<Vector3<f64>>,
    perturbation: Vec<Option<Vector3<f64>>>,
    working: Vec<Vector3<f64>>,
    normals: Vec<Normal>,
    iterations: usize,
}

impl<'n> Relaxation<'n> {
    fn new(network: &'n Network, block_offsets: Vec<Vector3<f64>>, pull: &[Vector3<f64>]) -> Self {
        let len = network.layout.len();
        let baseline: Vec<Vector3<f64>> = (0..len)
            .map(|i| {
                let file = network.file_of[i];
                let block = network.file_block[file];
                mask(block_offsets[block] + pull[file], network.status[i])
            })
            .collect();
        let mut perturbation = vec![None; len];
        for &u in &network.unknowns {
            perturbation[u] = Some(Vector3::zeros());
        }
        Self {
            network,
            working: baseline.clone(),
            baseline,
            block_offsets,
            perturbation,
            normals: vec![Normal::zero(); len],
            iterations: 0,
        }
    }

    /// One Jacobi pass: accumulate every constraint and smoothing term,
    /// solve each unknown, then densify the perturbation into the working field
    pub fn pass(&mut self) -> PassStats {
        let network = self.network;
        for &u in &network.unknowns {
            self.normals[u] = Normal::zero();
        }

        for c in &network.constraints {
            let residual = c.observed_m - c.model(&self.working);
            for row in &c.rows {
                let projected = row.axis.dot(&residual);
                let split = c.share(row.group);
                match c.endpoints {
                    Endpoints::Pair { first, second } => {
                        if split.side_2 > 0.0 {
                            self.normals[second].add_row(&row.axis, row.weight, split.side_2 * projected);
                        }
                        if split.side_1 > 0.0 {
                            self.normals[first].add_row(&row.axis, row.weight, -split.side_1 * projected);
                        }
                    }
                    Endpoints::Global { point } => {
                        if split.side_2 > 0.0 {
                            self.normals[point].add_row(&row.axis, row.weight, split.side_2 * projected);
                        }
                    }
                }
            }
        }

        for link in &network.first_links {
            let diff = self.working[link.b] - self.working[link.a];
            self.normals[link.a].add_isotropic(link.weight, &diff);
            self.normals[link.b].add_isotropic(link.weight, &(-diff));
        }
        for link in &network.second_links {
            let (xa, xb, xc) = (self.working[link.a], self.working[link.b], self.working[link.c]);
            let target = xa + (xc - xa) * link.fraction - xb;
            self.normals[link.b].add_isotropic(link.weight, &target);
        }

        let mut update_sq = 0.0;
        for &u in &network.unknowns {
            let delta = mask(self.normals[u].solve(), network.status[u]);
            update_sq += delta.norm_squared();
            let current = self.perturbation[u].unwrap_or_else(Vector3::zeros);
            self.perturbation[u] = Some(current + delta);
        }

        let dense = Interpolator::new(&network.layout).interpolate(&self.perturbation);
        for (i, d) in dense.iter().enumerate() {
            self.working[i] = mask(self.baseline[i] + d, network.status[i]);
        }
        self.iterations += 1;

        PassStats {
            update_norm: update_sq.sqrt(),
            misfit: network.misfit(&self.working),
        }
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Solved perturbation of a directly tied nav point (meters)
    pub fn perturbation(&self, nav: NavRef) -> Option<Vector3<f64>> {
        let index = self.network.layout.index_of(nav)?;
        self.perturbation[index]
    }

    /// Current working offset of any nav point (meters)
    pub fn offset_m(&self, nav: NavRef) -> Option<Vector3<f64>> {
        let index = self.network.layout.index_of(nav)?;
        Some(self.working[index])
    }

    pub fn misfit(&self) -> f64 {
        self.network.misfit(&self.working)
    }

    pub fn block_offsets(&self) -> &[Vector3<f64>] {
        &self.block_offsets
    }
}

/// Staged inversion solver
#[derive(Debug, Clone, Default)]
pub struct InversionSolver {
    config: SolverConfig,
    splits: SplitTable,
}

impl InversionSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self {
            config,
            splits: SplitTable::new(),
        }
    }

    /// Validate preconditions and build the tie network without touching the store
    pub fn network(&self, store: &ProjectStore) -> Result<Network> {
        PreconditionChecker::new(self.config.min_analyzed_crossings).check(store)?;
        let network = Network::build(store, &self.splits)?;
        log::debug!(
            "Inversion network: {} constraints, {} unknowns of {} nav points",
            network.constraints.len(),
            network.unknowns.len(),
            network.layout.len()
        );
        Ok(network)
    }

    /// Run the block and fixed-pull stages and return the relaxation
    /// seeded with their baseline
    pub fn relaxation<'n>(&self, network: &'n Network) -> Relaxation<'n> {
        let blocks = network.estimate_blocks(&self.splits, self.config.block_max_iterations);
        let pull = network.fixed_pull(&blocks);
        Relaxation::new(network, blocks, &pull)
    }

    /// Solve the whole project and commit the offsets.
    ///
    /// Nothing is written to the store unless the solve runs to the end.
    pub fn invert(&self, store: &mut ProjectStore, progress: &mut dyn ProgressSink) -> Result<InversionReport> {
        let network = self.network(store)?;
        let mut relaxation = self.relaxation(&network);
        let mut warnings = network.warnings.clone();

        let initial_misfit = relaxation.misfit();
        let mut final_misfit = initial_misfit;
        let mut converged = initial_misfit <= f64::EPSILON;
        progress.report(&format!(
            "Inversion started: {} unknowns, initial misfit {:.4}",
            network.num_unknowns(),
            initial_misfit
        ));

        while !converged && relaxation.iterations() < self.config.max_iterations {
            if progress.is_cancelled() {
                return Err(NavAdjustError::Cancelled("inversion"));
            }
            let stats = relaxation.pass();
            final_misfit = stats.misfit;
            let ratio = stats.update_norm / initial_misfit;
            converged = ratio < self.config.convergence_epsilon;

            let iteration = relaxation.iterations();
            log::debug!(
                "Inversion iteration {}: misfit {:.6}, update {:.3e} m, ratio {:.3e}",
                iteration,
                stats.misfit,
                stats.update_norm,
                ratio
            );
            if iteration % self.config.progress_interval.max(1) == 0 || converged {
                progress.report(&format!(
                    "Inversion iteration {}: misfit {:.4}, convergence {:.3e}",
                    iteration, stats.misfit, ratio
                ));
            }
        }

        if !converged {
            let message = format!(
                "Inversion not fully converged after {} iterations",
                relaxation.iterations()
            );
            log::warn!("{}", message);
            warnings.push(message);
        }

        self.commit(store, &network, &relaxation)?;

        let report = InversionReport {
            iterations: relaxation.iterations(),
            converged,
            unknowns: network.num_unknowns(),
            initial_misfit,
            final_misfit,
            block_offsets: relaxation.block_offsets().to_vec(),
            warnings,
        };
        log::info!(
            "Inversion finished: {} iterations, converged {}, misfit {:.4} -> {:.4}",
            report.iterations,
            report.converged,
            report.initial_misfit,
            report.final_misfit
        );
        Ok(report)
    }

    fn commit(&self, store: &mut ProjectStore, network: &Network, relaxation: &Relaxation) -> Result<()> {
        let working = &relaxation.working;
        for (i, offset_m) in working.iter().enumerate() {
            let nav = network.layout.nav_ref(i);
            store.nav_point_mut(nav)?.offset = network.scales[i].to_degrees(offset_m);
        }

        for c in &network.constraints {
            let model_m = c.model(working);
            match c.source {
                Source::Tie { crossing, tie } => {
                    let scale = network
                        .crossing_scales
                        .iter()
                        .find(|(index, _)| *index == crossing)
                        .map(|(_, s)| *s)
                        .ok_or(NavAdjustError::UnknownCrossing(crossing))?;
                    let entry = store
                        .crossing_mut(crossing)?
                        .ties
                        .get_mut(tie)
                        .ok_or(NavAdjustError::UnknownTie { crossing, tie })?;
                    entry.inversion_status = InversionState::Current;
                    entry.inversion_offset_m = model_m;
                    entry.inversion_offset = scale.to_degrees(&model_m);
                }
                Source::Global { index } => {
                    let Endpoints::Global { point } = c.endpoints else {
                        continue;
                    };
                    let scale = network.scales[point];
                    if let Some(entry) = store.global_ties.get_mut(index) {
                        entry.inversion_status = InversionState::Current;
                        entry.inversion_offset_m = model_m;
                        entry.inversion_offset = scale.to_degrees(&model_m);
                    }
                }
            }
        }
        store.inversion = InversionState::Current;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Ellipsoid, SectionRef, TieMode};
    use crate::testutil::{global_tie_at, push_crossing, store_with_tracks, tie_between, RecordingProgress};
    use crate::utils::progress::NullProgress;

    fn solver() -> InversionSolver {
        InversionSolver::new(SolverConfig {
            min_analyzed_crossings: 1,
            ..SolverConfig::default()
        })
    }

    /// Two crossing tracks in separate blocks joined by one tie
    fn tied_pair(offset_m: Vector3<f64>, sigma: f64) -> ProjectStore {
        let mut store = store_with_tracks(&[
            ((0.0, 0.0), (0.02, 0.0), 5, false),
            ((0.01, -0.01), (0.01, 0.01), 5, false),
        ]);
        store.controls.smoothing_weight = 0.0;
        push_crossing(&mut store, SectionRef::new(0, 0), SectionRef::new(1, 0), true);
        tie_between(&mut store, 0, 2, 2, Ellipsoid::isotropic(sigma));
        store.crossings[0].ties[0].offset_m = offset_m;
        store
    }

    fn assert_close(a: Vector3<f64>, b: Vector3<f64>) {
        assert!((a - b).norm() < 1e-9, "{:?} != {:?}", a, b);
    }

    #[test]
    fn test_even_split_between_good_endpoints() {
        let t = Vector3::new(4.0, -2.0, 0.6);
        let mut store = tied_pair(t, 1.0);
        // join the files into one block so only the relaxation acts
        store.files[1].block = 0;
        store.num_blocks = 1;
        let solver = solver();
        let network = solver.network(&store).unwrap();
        let mut relaxation = solver.relaxation(&network);
        relaxation.pass();
        assert_close(relaxation.perturbation(NavRef::new(0, 0, 2)).unwrap(), -t * 0.5);
        assert_close(relaxation.perturbation(NavRef::new(1, 0, 2)).unwrap(), t * 0.5);
    }

    #[test]
    fn test_fixed_endpoint_takes_nothing() {
        let t = Vector3::new(4.0, -2.0, 0.6);
        let mut store = tied_pair(t, 1.0);
        store.files[0].status = FileStatus::Fixed;
        store.files[1].block = 0;
        store.num_blocks = 1;
        let solver = solver();
        let network = solver.network(&store).unwrap();
        let mut relaxation = Relaxation::new(&network, vec![Vector3::zeros()], &[Vector3::zeros(); 2]);
        relaxation.pass();
        assert_close(relaxation.perturbation(NavRef::new(0, 0, 2)).unwrap(), Vector3::zeros());
        assert_close(relaxation.perturbation(NavRef::new(1, 0, 2)).unwrap(), t);

        let report = solver.invert(&mut store, &mut NullProgress).unwrap();
        assert!(report.converged);
        let fixed = store.nav_point(NavRef::new(0, 0, 2)).unwrap();
        assert_eq!(fixed.offset, Vector3::zeros());
        let scale = MetricScale::at_latitude(0.0);
        let moved = scale.to_meters(&store.nav_point(NavRef::new(1, 0, 2)).unwrap().offset);
        assert_close(moved, t);
    }

    #[test]
    fn test_fixed_pull_seeds_free_file() {
        let t = Vector3::new(3.0, 1.0, -0.4);
        let mut store = tied_pair(t, 1.0);
        store.files[0].status = FileStatus::Fixed;
        let solver = solver();
        let network = solver.network(&store).unwrap();
        let blocks = network.estimate_blocks(&solver.splits, 50);
        assert_close(blocks[0], Vector3::zeros());
        assert_close(blocks[1], t);
        let pull = network.fixed_pull(&blocks);
        assert_close(pull[1], Vector3::zeros());

        // without blocks the pull carries the whole correction
        let pull = network.fixed_pull(&[Vector3::zeros(); 2]);
        assert_close(pull[1], t);
        assert_close(pull[0], Vector3::zeros());
    }

    #[test]
    fn test_hop_weighting() {
        let edges = vec![(0, 1), (1, 2), (2, 3)];
        let hops = hop_counts(5, &edges, 3);
        assert_eq!(hops, vec![Some(4), Some(3), Some(2), Some(1), None]);
    }

    #[test]
    fn test_block_stage_splits_between_blocks() {
        let t = Vector3::new(6.0, 2.0, 1.0);
        let store = tied_pair(t, 1.0);
        let solver = solver();
        let network = solver.network(&store).unwrap();
        let blocks = network.estimate_blocks(&solver.splits, 50);
        assert_close(blocks[1] - blocks[0], t);
        assert_close(blocks[0], -t * 0.5);
    }

    #[test]
    fn test_converges_when_pass_update_vanishes() {
        let mut store = tied_pair(Vector3::new(4.0, -2.0, 0.6), 1.0);
        store.files[1].block = 0;
        store.num_blocks = 1;
        // the first pass solves the pair exactly so the second update is zero
        let report = solver().invert(&mut store, &mut NullProgress).unwrap();
        assert!(report.converged);
        assert_eq!(report.iterations, 2);
        assert!(report.initial_misfit > 0.0);
        assert!(report.final_misfit < 1e-9);
    }

    #[test]
    fn test_iteration_cap_returns_unconverged() {
        let mut store = store_with_tracks(&[
            ((0.0, 0.0), (0.02, 0.0), 5, false),
            ((0.01, -0.01), (0.01, 0.01), 5, true),
            ((0.0, 0.005), (0.02, 0.005), 5, true),
        ]);
        store.controls.smoothing_weight = 10.0;
        push_crossing(&mut store, SectionRef::new(0, 0), SectionRef::new(1, 0), true);
        push_crossing(&mut store, SectionRef::new(1, 0), SectionRef::new(2, 0), true);
        tie_between(&mut store, 0, 2, 1, Ellipsoid::isotropic(1.0));
        tie_between(&mut store, 1, 3, 2, Ellipsoid::isotropic(1.0));
        store.crossings[0].ties[0].offset_m = Vector3::new(5.0, 0.0, 0.0);
        store.crossings[1].ties[0].offset_m = Vector3::new(-5.0, 1.0, 0.0);

        let solver = InversionSolver::new(SolverConfig {
            max_iterations: 3,
            convergence_epsilon: 1e-12,
            min_analyzed_crossings: 1,
            ..SolverConfig::default()
        });
        let report = solver.invert(&mut store, &mut NullProgress).unwrap();
        assert_eq!(report.iterations, 3);
        assert!(!report.converged);
        assert!(report.warnings.iter().any(|w| w.contains("not fully converged")));
        assert_eq!(store.inversion(), InversionState::Current);
    }

    #[test]
    fn test_xy_tie_leaves_z_untouched() {
        let t = Vector3::new(2.0, 2.0, 5.0);
        let mut store = tied_pair(t, 1.0);
        store.files[1].block = 0;
        store.num_blocks = 1;
        store.crossings[0].ties[0].mode = TieMode::Xy;
        let solver = solver();
        let network = solver.network(&store).unwrap();
        let mut relaxation = solver.relaxation(&network);
        relaxation.pass();
        let moved = relaxation.perturbation(NavRef::new(1, 0, 2)).unwrap();
        assert_close(moved, Vector3::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn test_cancel_leaves_store_untouched() {
        let mut store = tied_pair(Vector3::new(1.0, 0.0, 0.0), 1.0);
        store.files[1].block = 0;
        store.num_blocks = 1;
        let before = store.clone();
        let mut progress = RecordingProgress::cancelled();
        let err = solver().invert(&mut store, &mut progress).unwrap_err();
        assert_eq!(err, NavAdjustError::Cancelled("inversion"));
        assert_eq!(store, before);
    }

    #[test]
    fn test_zero_time_step_warns() {
        let mut store = tied_pair(Vector3::new(1.0, 0.0, 0.0), 1.0);
        store.controls.smoothing_weight = 1.0;
        push_crossing(&mut store, SectionRef::new(0, 0), SectionRef::new(1, 0), true);
        tie_between(&mut store, 1, 3, 3, Ellipsoid::isotropic(1.0));
        store.files[0].sections[0].nav_points[3].time_d = store.files[0].sections[0].nav_points[2].time_d;
        let network = solver().network(&store).unwrap();
        assert_eq!(network.warnings.len(), 1);
        assert!(network.warnings[0].contains("Zero time difference"));
    }

    #[test]
    fn test_commit_snapshots_model_offsets() {
        let t = Vector3::new(8.0, -4.0, 0.5);
        let mut store = tied_pair(t, 2.0);
        let report = solver().invert(&mut store, &mut NullProgress).unwrap();
        assert!(report.converged);
        assert!(report.final_misfit < 1e-6);
        let tie = &store.crossings()[0].ties[0];
        assert_eq!(tie.inversion_status, InversionState::Current);
        assert_close(tie.inversion_offset_m, t);
        assert!(tie.residual_m().norm() < 1e-9);
    }

    #[test]
    fn test_global_tie_moves_free_point_to_target() {
        let g = Vector3::new(4.0, -1.0, 0.3);
        let solver = solver();

        // relaxation alone moves a lone tied point onto the external target
        let mut single = store_with_tracks(&[((0.0, 0.0), (0.02, 0.0), 5, false)]);
        single.controls.smoothing_weight = 0.0;
        global_tie_at(&mut single, NavRef::new(0, 0, 2), g, TieMode::Xyz);
        let network = solver.network(&single).unwrap();
        let mut relaxation = Relaxation::new(&network, vec![Vector3::zeros()], &[Vector3::zeros()]);
        relaxation.pass();
        assert_close(relaxation.perturbation(NavRef::new(0, 0, 2)).unwrap(), g);
        assert!(relaxation.misfit() < 1e-9);

        let mut store = tied_pair(Vector3::zeros(), 1.0);
        global_tie_at(&mut store, NavRef::new(0, 0, 2), g, TieMode::Xyz);
        let network = solver.network(&store).unwrap();

        // the global tie seeds its file and pulls the tied neighbour one hop away
        let blocks = network.estimate_blocks(&solver.splits, 50);
        assert_close(blocks[0], Vector3::zeros());
        assert_close(blocks[1], Vector3::zeros());
        let pull = network.fixed_pull(&blocks);
        assert_close(pull[0], g);
        assert_close(pull[1], g);

        let report = solver.invert(&mut store, &mut NullProgress).unwrap();
        assert!(report.converged);
        assert!(report.final_misfit < 1e-9);
        let scale = MetricScale::at_latitude(0.0);
        for nav in [NavRef::new(0, 0, 2), NavRef::new(0, 0, 0), NavRef::new(1, 0, 2)] {
            assert_close(scale.to_meters(&store.nav_point(nav).unwrap().offset), g);
        }
        let global = &store.global_ties()[0];
        assert_eq!(global.inversion_status, InversionState::Current);
        assert_close(global.inversion_offset_m, g);
    }

    #[test]
    fn test_global_tie_on_fixed_xy_file_moves_only_z() {
        let g = Vector3::new(3.0, -2.0, 0.7);
        let mut store = store_with_tracks(&[((0.0, 0.0), (0.02, 0.0), 5, false)]);
        store.controls.smoothing_weight = 0.0;
        store.files[0].status = FileStatus::FixedXy;
        global_tie_at(&mut store, NavRef::new(0, 0, 2), g, TieMode::Xyz);
        let solver = solver();
        let network = solver.network(&store).unwrap();

        let pull = network.fixed_pull(&[Vector3::zeros()]);
        assert_close(pull[0], Vector3::new(0.0, 0.0, 0.7));

        let mut relaxation = Relaxation::new(&network, vec![Vector3::zeros()], &[Vector3::zeros()]);
        relaxation.pass();
        assert_close(relaxation.perturbation(NavRef::new(0, 0, 2)).unwrap(), Vector3::new(0.0, 0.0, 0.7));

        solver.invert(&mut store, &mut NullProgress).unwrap();
        let offset = store.nav_point(NavRef::new(0, 0, 2)).unwrap().offset;
        assert_eq!((offset.x, offset.y), (0.0, 0.0));
        assert!((offset.z - 0.7).abs() < 1e-9);
    }
}
