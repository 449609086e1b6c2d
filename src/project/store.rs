//! In-memory project graph owned by one session

use serde::{Deserialize, Serialize};

use crate::core::{
    CrossingStatus, InversionState, MetricScale, NavRef, SectionRef,
};
use crate::validation::{NavAdjustError, Result};

use super::records::FileRecord;
use super::types::{
    Crossing, GlobalTie, NavPoint, OverlapClass, ProjectControls, Section, SurveyFile,
};

/// Files, sections, nav points, crossings and ties of one project.
///
/// Entities reference each other by index. Counters are kept consistent
/// with the crossing list by every mutating operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectStore {
    pub controls: ProjectControls,
    pub(crate) files: Vec<SurveyFile>,
    pub(crate) crossings: Vec<Crossing>,
    pub(crate) global_ties: Vec<GlobalTie>,
    pub(crate) num_blocks: usize,
    pub(crate) num_ties: usize,
    pub(crate) num_crossings_analyzed: usize,
    pub(crate) num_truecrossings: usize,
    pub(crate) num_truecrossings_analyzed: usize,
    pub(crate) inversion: InversionState,
}

/// Summary counts of a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub files: usize,
    pub blocks: usize,
    pub sections: usize,
    pub nav_points: usize,
    pub crossings: usize,
    pub crossings_mediocre: usize,
    pub crossings_good: usize,
    pub crossings_better: usize,
    pub crossings_analyzed: usize,
    pub truecrossings: usize,
    pub truecrossings_analyzed: usize,
    pub ties: usize,
    pub global_ties: usize,
    pub inversion: InversionState,
}

impl Default for ProjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectStore {
    pub fn new() -> Self {
        Self::with_controls(ProjectControls::default())
    }

    pub fn with_controls(controls: ProjectControls) -> Self {
        Self {
            controls,
            files: Vec::new(),
            crossings: Vec::new(),
            global_ties: Vec::new(),
            num_blocks: 0,
            num_ties: 0,
            num_crossings_analyzed: 0,
            num_truecrossings: 0,
            num_truecrossings_analyzed: 0,
            inversion: InversionState::None,
        }
    }

    /// Ingest a survey file and return its index.
    ///
    /// The file joins the previous file's block when its first section
    /// continues from it.
    pub fn add_file(&mut self, record: FileRecord) -> Result<usize> {
        if record.sections.is_empty() {
            return Err(NavAdjustError::InvalidRecord(format!(
                "file {} has no sections",
                record.name
            )));
        }

        let mut sections = Vec::new();
        sections.try_reserve_exact(record.sections.len())?;
        for section_record in record.sections {
            sections.push(section_record.into_section()?);
        }

        if self.files.is_empty() && sections[0].continuity {
            log::warn!(
                "First section of first file {} claims continuity; cleared",
                record.name
            );
            sections[0].continuity = false;
        }

        let block = match self.files.last() {
            Some(previous) if sections[0].continuity => previous.block,
            _ => {
                self.num_blocks += 1;
                self.num_blocks - 1
            }
        };

        self.files.try_reserve(1)?;
        self.files.push(SurveyFile {
            name: record.name,
            status: record.status,
            block,
            crossings_scanned: false,
            sections,
        });

        let index = self.files.len() - 1;
        let file = &self.files[index];
        log::info!(
            "Added file {} ({}): {} sections, {} nav points, block {}",
            index,
            file.name,
            file.sections.len(),
            file.nav_count(),
            block
        );
        if self.inversion == InversionState::Current {
            self.inversion = InversionState::Old;
        }
        Ok(index)
    }

    pub fn files(&self) -> &[SurveyFile] {
        &self.files
    }

    pub fn file(&self, index: usize) -> Result<&SurveyFile> {
        self.files
            .get(index)
            .ok_or(NavAdjustError::UnknownFile(index))
    }

    pub fn section(&self, sref: SectionRef) -> Result<&Section> {
        self.files
            .get(sref.file)
            .and_then(|f| f.sections.get(sref.section))
            .ok_or(NavAdjustError::UnknownSection(sref))
    }

    pub fn nav_point(&self, nav: NavRef) -> Result<&NavPoint> {
        self.section(nav.section_ref())
            .ok()
            .and_then(|s| s.nav_points.get(nav.snav))
            .ok_or(NavAdjustError::UnknownNavPoint(nav))
    }

    pub(crate) fn nav_point_mut(&mut self, nav: NavRef) -> Result<&mut NavPoint> {
        self.files
            .get_mut(nav.file)
            .and_then(|f| f.sections.get_mut(nav.section))
            .and_then(|s| s.nav_points.get_mut(nav.snav))
            .ok_or(NavAdjustError::UnknownNavPoint(nav))
    }

    pub fn crossings(&self) -> &[Crossing] {
        &self.crossings
    }

    pub fn crossing(&self, index: usize) -> Result<&Crossing> {
        self.crossings
            .get(index)
            .ok_or(NavAdjustError::UnknownCrossing(index))
    }

    pub(crate) fn crossing_mut(&mut self, index: usize) -> Result<&mut Crossing> {
        self.crossings
            .get_mut(index)
            .ok_or(NavAdjustError::UnknownCrossing(index))
    }

    pub fn global_ties(&self) -> &[GlobalTie] {
        &self.global_ties
    }

    pub fn num_files(&self) -> usize {
        self.files.len()
    }

    pub fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    pub fn num_ties(&self) -> usize {
        self.num_ties
    }

    pub fn num_global_ties(&self) -> usize {
        self.global_ties.len()
    }

    pub fn num_crossings_analyzed(&self) -> usize {
        self.num_crossings_analyzed
    }

    pub fn num_truecrossings(&self) -> usize {
        self.num_truecrossings
    }

    pub fn num_truecrossings_analyzed(&self) -> usize {
        self.num_truecrossings_analyzed
    }

    pub fn inversion(&self) -> InversionState {
        self.inversion
    }

    pub fn total_nav_points(&self) -> usize {
        self.files.iter().map(|f| f.nav_count()).sum()
    }

    /// Any tie edit invalidates a current solution
    pub(crate) fn mark_inversion_stale(&mut self) {
        if self.inversion == InversionState::Current {
            self.inversion = InversionState::Old;
        }
    }

    pub(crate) fn increment_tie_count(&mut self, nav: NavRef) -> Result<()> {
        self.nav_point_mut(nav)?.tie_count += 1;
        Ok(())
    }

    pub(crate) fn decrement_tie_count(&mut self, nav: NavRef) -> Result<()> {
        let point = self.nav_point_mut(nav)?;
        point.tie_count = point.tie_count.saturating_sub(1);
        Ok(())
    }

    /// Meters-per-degree scale at the mean latitude of a crossing
    pub fn crossing_scale(&self, index: usize) -> Result<MetricScale> {
        let crossing = self.crossing(index)?;
        let lat_1 = self.section(crossing.side_1)?.mid_latitude();
        let lat_2 = self.section(crossing.side_2)?.mid_latitude();
        Ok(MetricScale::at_latitude(0.5 * (lat_1 + lat_2)))
    }

    /// Append newly detected crossings and restore the canonical order
    pub(crate) fn merge_crossings(&mut self, new_crossings: Vec<Crossing>) -> Result<usize> {
        let added = new_crossings.len();
        self.crossings.try_reserve(added)?;
        self.crossings.extend(new_crossings);
        self.crossings.sort_by(|a, b| a.canonical_cmp(b));
        self.recount();
        Ok(added)
    }

    pub(crate) fn mark_files_scanned(&mut self) {
        for file in &mut self.files {
            file.crossings_scanned = true;
        }
    }

    /// Recompute every derived counter from the crossing and tie lists
    pub(crate) fn recount(&mut self) {
        self.num_ties = self.crossings.iter().map(|c| c.ties.len()).sum();
        self.num_crossings_analyzed = self
            .crossings
            .iter()
            .filter(|c| c.status.is_analyzed())
            .count();
        self.num_truecrossings = self.crossings.iter().filter(|c| c.true_crossing).count();
        self.num_truecrossings_analyzed = self
            .crossings
            .iter()
            .filter(|c| c.true_crossing && c.status.is_analyzed())
            .count();
    }

    /// Rebuild nav point tie counts from the ties themselves
    pub(crate) fn recount_tie_counts(&mut self) -> Result<()> {
        for file in &mut self.files {
            for section in &mut file.sections {
                for point in &mut section.nav_points {
                    point.tie_count = 0;
                }
            }
        }
        let mut refs = Vec::new();
        for crossing in &self.crossings {
            for tie in &crossing.ties {
                refs.push(NavRef::new(crossing.side_1.file, crossing.side_1.section, tie.snav_1));
                refs.push(NavRef::new(crossing.side_2.file, crossing.side_2.section, tie.snav_2));
            }
        }
        refs.extend(self.global_ties.iter().map(|g| g.nav));
        for nav in refs {
            self.increment_tie_count(nav)?;
        }
        Ok(())
    }

    /// Nav point the solver treats as an unknown
    pub fn is_tied(&self, nav: NavRef) -> bool {
        self.nav_point(nav).map(|p| p.tie_count > 0).unwrap_or(false)
    }

    /// Counts for status reporting
    pub fn summary(&self) -> ProjectSummary {
        let count_class = |class: OverlapClass| {
            self.crossings
                .iter()
                .filter(|c| c.overlap_class() >= class)
                .count()
        };
        ProjectSummary {
            files: self.files.len(),
            blocks: self.num_blocks,
            sections: self.files.iter().map(|f| f.sections.len()).sum(),
            nav_points: self.total_nav_points(),
            crossings: self.crossings.len(),
            crossings_mediocre: count_class(OverlapClass::Mediocre),
            crossings_good: count_class(OverlapClass::Good),
            crossings_better: count_class(OverlapClass::Better),
            crossings_analyzed: self.num_crossings_analyzed,
            truecrossings: self.num_truecrossings,
            truecrossings_analyzed: self.num_truecrossings_analyzed,
            ties: self.num_ties,
            global_ties: self.global_ties.len(),
            inversion: self.inversion,
        }
    }

    /// Crossings whose status is still unset
    pub fn unanalyzed_crossings(&self) -> impl Iterator<Item = usize> + '_ {
        self.crossings
            .iter()
            .enumerate()
            .filter(|(_, c)| c.status == CrossingStatus::None)
            .map(|(i, _)| i)
    }

    /// Serialize the whole store for the persistence collaborator
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Restore a store, re-deriving counters so they match the ties
    pub fn from_json(text: &str) -> Result<Self> {
        let mut store: ProjectStore = serde_json::from_str(text)?;
        store.recount();
        store.recount_tie_counts()?;
        Ok(store)
    }
}
