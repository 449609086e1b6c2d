//! Tie and global tie editing with consistent counters

use nalgebra::Vector3;

use crate::core::{CrossingStatus, Ellipsoid, InversionState, MetricScale, NavRef, TieMode};
use crate::project::{GlobalTie, ProjectStore, Tie};
use crate::validation::{NavAdjustError, Result};

/// Tie offset in the units the caller measured it in
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TieOffset {
    /// (lon°, lat°, z m)
    Angular(Vector3<f64>),
    /// (east m, north m, z m)
    Metric(Vector3<f64>),
}

impl TieOffset {
    /// Both representations through one scale
    pub fn resolve(&self, scale: &MetricScale) -> (Vector3<f64>, Vector3<f64>) {
        match self {
            TieOffset::Angular(v) => (*v, scale.to_meters(v)),
            TieOffset::Metric(v) => (scale.to_degrees(v), *v),
        }
    }
}

/// Status a crossing falls back to when its last tie is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Demotion {
    Unset,
    Skip,
}

/// Mutating tie operations over one project store
pub struct TieManager<'a> {
    store: &'a mut ProjectStore,
}

impl<'a> TieManager<'a> {
    pub fn new(store: &'a mut ProjectStore) -> Self {
        Self { store }
    }

    /// Add a tie to a crossing and return its index.
    ///
    /// `hint` gives preferred nav points (side 1, side 2), typically the
    /// ones nearest the chord intersection. A hinted point already tied in
    /// this crossing is replaced by the lowest free index on that side.
    pub fn add_tie(
        &mut self,
        crossing: usize,
        hint: Option<(usize, usize)>,
        offset: TieOffset,
        ellipsoid: Ellipsoid,
        mode: TieMode,
    ) -> Result<usize> {
        let scale = self.store.crossing_scale(crossing)?;
        let c = self.store.crossing(crossing)?;
        let count_1 = self.store.section(c.side_1)?.nav_points.len();
        let count_2 = self.store.section(c.side_2)?.nav_points.len();

        let used_1: Vec<usize> = c.ties.iter().map(|t| t.snav_1).collect();
        let used_2: Vec<usize> = c.ties.iter().map(|t| t.snav_2).collect();
        let snav_1 = pick_snav(count_1, &used_1, hint.map(|h| h.0))
            .ok_or(NavAdjustError::NoFreeNavPoint { crossing, side: 1 })?;
        let snav_2 = pick_snav(count_2, &used_2, hint.map(|h| h.1))
            .ok_or(NavAdjustError::NoFreeNavPoint { crossing, side: 2 })?;

        let nav_1 = NavRef::new(c.side_1.file, c.side_1.section, snav_1);
        let nav_2 = NavRef::new(c.side_2.file, c.side_2.section, snav_2);
        let snav_1_time = self.store.nav_point(nav_1)?.time_d;
        let snav_2_time = self.store.nav_point(nav_2)?.time_d;

        if !ellipsoid.is_valid_for(mode) {
            log::warn!(
                "Crossing {}: tie ellipsoid has a non-positive radius; inversion will refuse it",
                crossing
            );
        }

        let (offset, offset_m) = offset.resolve(&scale);
        let crossing_entry = self.store.crossing_mut(crossing)?;
        crossing_entry.ties.try_reserve(1)?;
        crossing_entry.ties.push(Tie {
            mode,
            snav_1,
            snav_1_time,
            snav_2,
            snav_2_time,
            offset,
            offset_m,
            ellipsoid,
            inversion_status: InversionState::None,
            inversion_offset: Vector3::zeros(),
            inversion_offset_m: Vector3::zeros(),
        });
        crossing_entry.status = CrossingStatus::Set;
        let index = crossing_entry.ties.len() - 1;

        self.store.increment_tie_count(nav_1)?;
        self.store.increment_tie_count(nav_2)?;
        self.store.recount();
        self.store.mark_inversion_stale();

        log::info!(
            "Crossing {}: added tie {} between snav {} and {} offset ({:.2}, {:.2}, {:.2}) m",
            crossing,
            index,
            snav_1,
            snav_2,
            offset_m.x,
            offset_m.y,
            offset_m.z
        );
        Ok(index)
    }

    /// Remove a tie; the crossing is demoted once it has no ties left
    pub fn delete_tie(&mut self, crossing: usize, tie: usize, demote: Demotion) -> Result<Tie> {
        let c = self.store.crossing(crossing)?;
        if tie >= c.ties.len() {
            return Err(NavAdjustError::UnknownTie { crossing, tie });
        }
        let (side_1, side_2) = (c.side_1, c.side_2);

        let crossing_entry = self.store.crossing_mut(crossing)?;
        let removed = crossing_entry.ties.remove(tie);
        if crossing_entry.ties.is_empty() {
            crossing_entry.status = match demote {
                Demotion::Unset => CrossingStatus::None,
                Demotion::Skip => CrossingStatus::Skip,
            };
        }

        self.store
            .decrement_tie_count(NavRef::new(side_1.file, side_1.section, removed.snav_1))?;
        self.store
            .decrement_tie_count(NavRef::new(side_2.file, side_2.section, removed.snav_2))?;
        self.store.recount();
        self.store.mark_inversion_stale();
        log::info!("Crossing {}: deleted tie {}", crossing, tie);
        Ok(removed)
    }

    pub fn set_tie_mode(&mut self, crossing: usize, tie: usize, mode: TieMode) -> Result<()> {
        let entry = self
            .store
            .crossing_mut(crossing)?
            .ties
            .get_mut(tie)
            .ok_or(NavAdjustError::UnknownTie { crossing, tie })?;
        if entry.mode != mode {
            entry.mode = mode;
            self.store.mark_inversion_stale();
            log::debug!("Crossing {}: tie {} mode set to {:?}", crossing, tie, mode);
        }
        Ok(())
    }

    /// Delete every tie of a crossing and mark it skipped
    pub fn skip_crossing(&mut self, crossing: usize) -> Result<usize> {
        let count = self.store.crossing(crossing)?.ties.len();
        for tie in (0..count).rev() {
            self.delete_tie(crossing, tie, Demotion::Skip)?;
        }
        self.store.crossing_mut(crossing)?.status = CrossingStatus::Skip;
        self.store.recount();
        log::info!("Crossing {}: skipped, {} ties removed", crossing, count);
        Ok(count)
    }

    /// Create or replace the global tie of a nav point
    pub fn set_global_tie(
        &mut self,
        nav: NavRef,
        offset: TieOffset,
        ellipsoid: Ellipsoid,
        mode: TieMode,
    ) -> Result<()> {
        let scale = MetricScale::at_latitude(self.store.section(nav.section_ref())?.mid_latitude());
        let snav_time = self.store.nav_point(nav)?.time_d;
        let (offset, offset_m) = offset.resolve(&scale);
        let global = GlobalTie {
            nav,
            mode,
            snav_time,
            offset,
            offset_m,
            ellipsoid,
            inversion_status: InversionState::None,
            inversion_offset: Vector3::zeros(),
            inversion_offset_m: Vector3::zeros(),
        };

        match self.store.global_ties.iter().position(|g| g.nav == nav) {
            Some(index) => self.store.global_ties[index] = global,
            None => {
                self.store.global_ties.try_reserve(1)?;
                self.store.global_ties.push(global);
                self.store.increment_tie_count(nav)?;
            }
        }
        self.store.mark_inversion_stale();
        log::info!("Global tie set at {:?}", nav);
        Ok(())
    }

    pub fn delete_global_tie(&mut self, nav: NavRef) -> Result<GlobalTie> {
        let index = self
            .store
            .global_ties
            .iter()
            .position(|g| g.nav == nav)
            .ok_or(NavAdjustError::UnknownNavPoint(nav))?;
        let removed = self.store.global_ties.remove(index);
        self.store.decrement_tie_count(nav)?;
        self.store.mark_inversion_stale();
        log::info!("Global tie removed at {:?}", nav);
        Ok(removed)
    }
}

/// Hinted index when free, else the lowest index unused in this crossing
fn pick_snav(count: usize, used: &[usize], hint: Option<usize>) -> Option<usize> {
    if let Some(h) = hint {
        if h < count && !used.contains(&h) {
            return Some(h);
        }
    }
    (0..count).find(|k| !used.contains(k))
}

/// In-progress edit of a stored tie
#[derive(Debug, Clone, PartialEq)]
pub struct TieEditor {
    crossing: usize,
    tie: usize,
    scale: MetricScale,
    pub offset: Vector3<f64>,
    pub offset_m: Vector3<f64>,
    pub ellipsoid: Ellipsoid,
    pub mode: TieMode,
}

impl TieEditor {
    pub fn load(store: &ProjectStore, crossing: usize, tie: usize) -> Result<Self> {
        let scale = store.crossing_scale(crossing)?;
        let stored = store
            .crossing(crossing)?
            .ties
            .get(tie)
            .ok_or(NavAdjustError::UnknownTie { crossing, tie })?;
        Ok(Self {
            crossing,
            tie,
            scale,
            offset: stored.offset,
            offset_m: stored.offset_m,
            ellipsoid: stored.ellipsoid.clone(),
            mode: stored.mode,
        })
    }

    pub fn crossing(&self) -> usize {
        self.crossing
    }

    pub fn tie(&self) -> usize {
        self.tie
    }

    /// Move the edited offset, keeping both units consistent
    pub fn set_offset(&mut self, offset: TieOffset) {
        let (deg, m) = offset.resolve(&self.scale);
        self.offset = deg;
        self.offset_m = m;
    }

    /// Discard edits and reload from the stored tie
    pub fn reset(&mut self, store: &ProjectStore) -> Result<()> {
        *self = Self::load(store, self.crossing, self.tie)?;
        Ok(())
    }

    /// Commit the edit into the store
    pub fn save(&self, store: &mut ProjectStore) -> Result<()> {
        let (crossing, tie) = (self.crossing, self.tie);
        let entry = store
            .crossing_mut(crossing)?
            .ties
            .get_mut(tie)
            .ok_or(NavAdjustError::UnknownTie { crossing, tie })?;
        entry.offset = self.offset;
        entry.offset_m = self.offset_m;
        entry.ellipsoid = self.ellipsoid.clone();
        entry.mode = self.mode;
        store.mark_inversion_stale();
        log::debug!("Crossing {}: tie {} saved", crossing, tie);
        Ok(())
    }
}
