//! One editing session over a project: owns the store, the engine
//! configuration, the progress sink and the current crossing selection.

use nalgebra::Vector3;

use crate::algorithms::crossing::chord_intersection;
use crate::algorithms::{CrossingDetector, InversionReport, InversionSolver, MisfitEngine, MisfitResult};
use crate::core::{Ellipsoid, FileStatus, NavRef, SectionRef, TieMode};
use crate::project::{FileRecord, GlobalTie, ProjectControls, ProjectStore, ProjectSummary, Tie};
use crate::ties::{
    select_next, select_next_unset, select_previous, CrossingFilter, Demotion, ResidualReport, TieEditor,
    TieManager, TieOffset,
};
use crate::utils::config::{ConfigurationManager, NavAdjustConfig};
use crate::utils::progress::{LogProgress, ProgressSink};
use crate::validation::{NavAdjustError, Result};

/// Outcome of an automatic pick over a filtered crossing list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AutopickReport {
    /// Crossings that received a tie
    pub tied: Vec<usize>,
    /// Crossings whose misfit volume had no usable overlap
    pub skipped: Vec<usize>,
}

pub struct Session {
    store: ProjectStore,
    config: NavAdjustConfig,
    progress: Box<dyn ProgressSink>,
    filter: CrossingFilter,
    current: Option<usize>,
}

impl Session {
    pub fn new(config: NavAdjustConfig) -> Self {
        Self::from_store(ProjectStore::new(), config)
    }

    /// Resume a session over a restored store
    pub fn from_store(store: ProjectStore, config: NavAdjustConfig) -> Self {
        Self {
            store,
            config,
            progress: Box::new(LogProgress),
            filter: CrossingFilter::default(),
            current: None,
        }
    }

    pub fn set_progress(&mut self, progress: Box<dyn ProgressSink>) {
        self.progress = progress;
    }

    pub fn store(&self) -> &ProjectStore {
        &self.store
    }

    pub fn into_store(self) -> ProjectStore {
        self.store
    }

    pub fn config(&self) -> &NavAdjustConfig {
        &self.config
    }

    /// Replace the engine configuration; the first validation error is returned
    pub fn set_config(&mut self, config: NavAdjustConfig) -> Result<()> {
        let validation = ConfigurationManager::validate_config(&config);
        if let Some(err) = validation.errors.into_iter().next() {
            return Err(err.into());
        }
        for warning in &validation.warnings {
            log::warn!("{}", warning);
        }
        self.config = config;
        Ok(())
    }

    /// Replace the persisted project controls
    pub fn set_controls(&mut self, controls: ProjectControls) {
        if self.store.controls != controls {
            self.store.controls = controls;
            self.store.mark_inversion_stale();
        }
    }

    pub fn summary(&self) -> ProjectSummary {
        self.store.summary()
    }

    fn log_summary(&self) {
        let s = self.store.summary();
        log::info!(
            "Project: {} files, {} blocks, {} crossings ({} analyzed), {} true ({} analyzed), {} ties, {} global ties",
            s.files,
            s.blocks,
            s.crossings,
            s.crossings_analyzed,
            s.truecrossings,
            s.truecrossings_analyzed,
            s.ties,
            s.global_ties
        );
    }

    pub fn add_file(&mut self, record: FileRecord) -> Result<usize> {
        let index = self.store.add_file(record)?;
        self.log_summary();
        Ok(index)
    }

    /// Fix or free a file; returns the previous status
    pub fn set_file_status(&mut self, file: usize, status: FileStatus) -> Result<FileStatus> {
        let entry = self
            .store
            .files
            .get_mut(file)
            .ok_or(NavAdjustError::UnknownFile(file))?;
        let old = std::mem::replace(&mut entry.status, status);
        if old != status {
            self.store.mark_inversion_stale();
            log::info!("File {} status {:?} -> {:?}", file, old, status);
        }
        Ok(old)
    }

    /// Scan files not yet scanned and merge the new crossings
    pub fn detect_new_crossings(&mut self) -> Result<usize> {
        let detector = CrossingDetector::new(self.config.detector.clone());
        let found = detector.find_crossings(self.store.files(), self.store.crossings(), self.progress.as_mut())?;

        let selected = self.current_sides();
        let added = self.store.merge_crossings(found)?;
        self.store.mark_files_scanned();
        if let Some((a, b)) = selected {
            self.current = self.store.crossings().iter().position(|c| c.joins(a, b));
        }

        self.progress.report(&format!("Crossing detection done: {} new crossings", added));
        self.log_summary();
        Ok(added)
    }

    /// Full rescan of every file; refused once crossings exist
    pub fn rebuild_crossings(&mut self) -> Result<usize> {
        if !self.store.crossings().is_empty() {
            return Err(NavAdjustError::ExistingState(format!(
                "project already holds {} crossings",
                self.store.crossings().len()
            )));
        }
        for file in &mut self.store.files {
            file.crossings_scanned = false;
        }
        self.detect_new_crossings()
    }

    pub fn filter(&self) -> &CrossingFilter {
        &self.filter
    }

    pub fn set_filter(&mut self, filter: CrossingFilter) {
        self.filter = filter;
    }

    pub fn current_crossing(&self) -> Option<usize> {
        self.current
    }

    pub fn select(&mut self, crossing: usize) -> Result<()> {
        self.store.crossing(crossing)?;
        self.current = Some(crossing);
        Ok(())
    }

    pub fn select_next(&mut self) -> Option<usize> {
        self.move_to(select_next(&self.store, &self.filter, self.current))
    }

    pub fn select_previous(&mut self) -> Option<usize> {
        self.move_to(select_previous(&self.store, &self.filter, self.current))
    }

    pub fn select_next_unset(&mut self) -> Option<usize> {
        self.move_to(select_next_unset(&self.store, &self.filter, self.current))
    }

    /// Keep the current selection when nothing matches
    fn move_to(&mut self, found: Option<usize>) -> Option<usize> {
        if found.is_some() {
            self.current = found;
        }
        found
    }

    fn current_sides(&self) -> Option<(SectionRef, SectionRef)> {
        let c = self.store.crossings().get(self.current?)?;
        Some((c.side_1, c.side_2))
    }

    /// Offset of side 2 relative to side 1 under the current solution
    fn trial_offset(&self, crossing: usize) -> Result<Vector3<f64>> {
        let c = self.store.crossing(crossing)?;
        Ok(self.store.section(c.side_2)?.mean_offset() - self.store.section(c.side_1)?.mean_offset())
    }

    /// Nav points nearest the chord intersection, when the chords cross
    pub fn snav_hint(&self, crossing: usize) -> Result<Option<(usize, usize)>> {
        let c = self.store.crossing(crossing)?;
        let s1 = self.store.section(c.side_1)?;
        let s2 = self.store.section(c.side_2)?;
        Ok(chord_intersection(s1, s2)
            .and_then(|(lon, lat)| Some((s1.nearest_snav(lon, lat)?, s2.nearest_snav(lon, lat)?))))
    }

    pub fn compute_misfit(&mut self, crossing: usize) -> Result<MisfitResult> {
        let trial = self.trial_offset(crossing)?;
        let engine = MisfitEngine::new(self.config.misfit.clone());
        engine.compute_misfit(
            &self.store,
            crossing,
            trial,
            self.config.misfit.search_half_width,
            self.progress.as_mut(),
        )
    }

    pub fn add_tie(
        &mut self,
        crossing: usize,
        hint: Option<(usize, usize)>,
        offset: TieOffset,
        ellipsoid: Ellipsoid,
        mode: TieMode,
    ) -> Result<usize> {
        TieManager::new(&mut self.store).add_tie(crossing, hint, offset, ellipsoid, mode)
    }

    pub fn delete_tie(&mut self, crossing: usize, tie: usize, demote: Demotion) -> Result<Tie> {
        TieManager::new(&mut self.store).delete_tie(crossing, tie, demote)
    }

    pub fn set_tie_mode(&mut self, crossing: usize, tie: usize, mode: TieMode) -> Result<()> {
        TieManager::new(&mut self.store).set_tie_mode(crossing, tie, mode)
    }

    pub fn skip_crossing(&mut self, crossing: usize) -> Result<usize> {
        TieManager::new(&mut self.store).skip_crossing(crossing)
    }

    pub fn edit_tie(&self, crossing: usize, tie: usize) -> Result<TieEditor> {
        TieEditor::load(&self.store, crossing, tie)
    }

    pub fn save_tie(&mut self, editor: &TieEditor) -> Result<()> {
        editor.save(&mut self.store)
    }

    pub fn set_global_tie(&mut self, nav: NavRef, offset: TieOffset, ellipsoid: Ellipsoid, mode: TieMode) -> Result<()> {
        TieManager::new(&mut self.store).set_global_tie(nav, offset, ellipsoid, mode)
    }

    pub fn delete_global_tie(&mut self, nav: NavRef) -> Result<GlobalTie> {
        TieManager::new(&mut self.store).delete_global_tie(nav)
    }

    /// Tie every un-analyzed crossing passing `filter` at its
    /// minimum-misfit offset
    pub fn autopick(&mut self, filter: &CrossingFilter) -> Result<AutopickReport> {
        let engine = MisfitEngine::new(self.config.misfit.clone());
        let half_width = self.config.misfit.search_half_width;
        let visible = filter.visible(&self.store);
        let candidates: Vec<usize> = self
            .store
            .unanalyzed_crossings()
            .filter(|i| visible.binary_search(i).is_ok())
            .collect();

        let mut report = AutopickReport::default();
        for crossing in candidates {
            if self.progress.is_cancelled() {
                return Err(NavAdjustError::Cancelled("autopick"));
            }
            let trial = self.trial_offset(crossing)?;
            let result = match engine.compute_misfit(&self.store, crossing, trial, half_width, self.progress.as_mut()) {
                Ok(result) => result,
                Err(NavAdjustError::NoOverlap(_)) => {
                    log::warn!("Autopick: crossing {} has no usable overlap", crossing);
                    report.skipped.push(crossing);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let hint = self.snav_hint(crossing)?;
            TieManager::new(&mut self.store).add_tie(
                crossing,
                hint,
                TieOffset::Angular(result.offset),
                result.ellipsoid,
                TieMode::Xyz,
            )?;
            report.tied.push(crossing);
        }

        self.progress.report(&format!(
            "Autopick done: {} tied, {} skipped",
            report.tied.len(),
            report.skipped.len()
        ));
        self.log_summary();
        Ok(report)
    }

    pub fn invert(&mut self) -> Result<InversionReport> {
        let solver = InversionSolver::new(self.config.solver.clone());
        let report = match solver.invert(&mut self.store, self.progress.as_mut()) {
            Ok(report) => report,
            Err(e) if e.is_precondition() => {
                self.progress.report(&format!("Inversion refused: {}", e));
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        self.log_summary();
        Ok(report)
    }

    pub fn residuals(&self) -> ResidualReport {
        ResidualReport::from_store(&self.store)
    }
}
