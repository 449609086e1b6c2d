//! Spatial crossing detection between survey sections

use crate::core::{SectionRef, MIN_OVERLAP_PERCENT};
use crate::project::{Crossing, Section, SurveyFile};
use crate::utils::config::DetectorConfig;
use crate::utils::progress::ProgressSink;
use crate::validation::{NavAdjustError, Result};

/// Bounding box of a section shifted by its current offset estimate
#[derive(Debug, Clone, Copy, PartialEq)]
struct ShiftedBounds {
    lon_min: f64,
    lon_max: f64,
    lat_min: f64,
    lat_max: f64,
    /// Coverage cell size (degrees)
    dlon: f64,
    dlat: f64,
}

impl ShiftedBounds {
    fn of(section: &Section) -> Self {
        let offset = section.mean_offset();
        let dim = section.coverage.dim() as f64;
        Self {
            lon_min: section.lon_min + offset.x,
            lon_max: section.lon_max + offset.x,
            lat_min: section.lat_min + offset.y,
            lat_max: section.lat_max + offset.y,
            dlon: (section.lon_max - section.lon_min) / dim,
            dlat: (section.lat_max - section.lat_min) / dim,
        }
    }

    fn intersects(&self, other: &Self) -> bool {
        self.lon_min < other.lon_max
            && self.lon_max > other.lon_min
            && self.lat_min < other.lat_max
            && self.lat_max > other.lat_min
    }

    fn cell_area(&self) -> f64 {
        self.dlon * self.dlat
    }

    /// Absolute extent of coverage cell `(i, j)`
    fn cell(&self, i: usize, j: usize) -> (f64, f64, f64, f64) {
        (
            self.lon_min + self.dlon * i as f64,
            self.lon_min + self.dlon * (i + 1) as f64,
            self.lat_min + self.dlat * j as f64,
            self.lat_min + self.dlat * (j + 1) as f64,
        )
    }

    /// Index range of cells whose open extent meets `[lo, hi]` along one axis
    fn cell_range(origin: f64, step: f64, dim: usize, lo: f64, hi: f64) -> Option<(usize, usize)> {
        let first = ((lo - origin) / step).floor().max(0.0);
        let last = ((hi - origin) / step).ceil() - 1.0;
        let last = last.min(dim as f64 - 1.0);
        if last < first {
            return None;
        }
        Some((first as usize, last as usize))
    }
}

/// Matched and covered cell counts of one side of a candidate pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CellMatch {
    pub matched: usize,
    pub covered: usize,
}

/// Detects candidate overlaps between newly ingested and earlier sections
#[derive(Debug, Clone, Default)]
pub struct CrossingDetector {
    config: DetectorConfig,
}

impl CrossingDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Compare every section of an unscanned file against all earlier
    /// sections and return the new, deduplicated crossings in canonical order.
    pub fn find_crossings(
        &self,
        files: &[SurveyFile],
        existing: &[Crossing],
        progress: &mut dyn ProgressSink,
    ) -> Result<Vec<Crossing>> {
        let bounds: Vec<Vec<ShiftedBounds>> = files
            .iter()
            .map(|f| f.sections.iter().map(ShiftedBounds::of).collect())
            .collect();

        let mut found: Vec<Crossing> = Vec::new();
        let mut compared = 0usize;

        for (ifile, file) in files.iter().enumerate() {
            if file.crossings_scanned {
                continue;
            }
            for (isection, section) in file.sections.iter().enumerate() {
                if progress.is_cancelled() {
                    return Err(NavAdjustError::Cancelled("crossing detection"));
                }
                let new_ref = SectionRef::new(ifile, isection);
                let predecessor = if section.continuity {
                    previous_section(files, new_ref)
                } else {
                    None
                };

                for jfile in 0..=ifile {
                    let last_section = if jfile == ifile {
                        isection
                    } else {
                        files[jfile].sections.len()
                    };
                    for jsection in 0..last_section {
                        let earlier_ref = SectionRef::new(jfile, jsection);
                        if Some(earlier_ref) == predecessor {
                            continue;
                        }
                        compared += 1;
                        if !bounds[ifile][isection].intersects(&bounds[jfile][jsection]) {
                            continue;
                        }
                        if existing.iter().any(|c| c.joins(new_ref, earlier_ref))
                            || found.iter().any(|c| c.joins(new_ref, earlier_ref))
                        {
                            continue;
                        }
                        if let Some(crossing) = self.evaluate_pair(files, &bounds, earlier_ref, new_ref) {
                            found.push(crossing);
                            if found.len() % self.config.progress_interval.max(1) == 0 {
                                progress.report(&format!(
                                    "{} crossings found after {} section comparisons",
                                    found.len(),
                                    compared
                                ));
                            }
                        }
                    }
                }
            }
        }

        found.sort_by(|a, b| a.canonical_cmp(b));
        log::info!(
            "Crossing scan compared {} section pairs, found {} new crossings",
            compared,
            found.len()
        );
        progress.report(&format!("{} new crossings found", found.len()));
        Ok(found)
    }

    fn evaluate_pair(
        &self,
        files: &[SurveyFile],
        bounds: &[Vec<ShiftedBounds>],
        a: SectionRef,
        b: SectionRef,
    ) -> Option<Crossing> {
        let mut crossing = Crossing::new(a, b, MIN_OVERLAP_PERCENT, false);
        let (s1, s2) = (crossing.side_1, crossing.side_2);
        let section_1 = &files[s1.file].sections[s1.section];
        let section_2 = &files[s2.file].sections[s2.section];
        let bounds_1 = &bounds[s1.file][s1.section];
        let bounds_2 = &bounds[s2.file][s2.section];

        let match_1 = match_cells(section_1, bounds_1, section_2, bounds_2);
        let match_2 = match_cells(section_2, bounds_2, section_1, bounds_1);
        if match_1.matched == 0 && match_2.matched == 0 {
            log::trace!("{:?} and {:?}: boxes meet but coverage does not", s1, s2);
            return None;
        }

        crossing.overlap = overlap_percent(match_1, bounds_1.cell_area(), match_2, bounds_2.cell_area());
        crossing.true_crossing = chords_intersect(section_1, section_2);
        log::debug!(
            "Crossing {:?} x {:?}: overlap {}% true {}",
            s1,
            s2,
            crossing.overlap,
            crossing.true_crossing
        );
        Some(crossing)
    }
}

/// Section immediately preceding `sref` in acquisition order
fn previous_section(files: &[SurveyFile], sref: SectionRef) -> Option<SectionRef> {
    if sref.section > 0 {
        return Some(SectionRef::new(sref.file, sref.section - 1));
    }
    let previous_file = sref.file.checked_sub(1)?;
    let count = files.get(previous_file)?.sections.len();
    count.checked_sub(1).map(|s| SectionRef::new(previous_file, s))
}

/// Count covered cells of `a` that meet any covered cell of `b`
fn match_cells(a: &Section, a_bounds: &ShiftedBounds, b: &Section, b_bounds: &ShiftedBounds) -> CellMatch {
    let b_dim = b.coverage.dim();
    let mut result = CellMatch::default();
    for (i, j) in a.coverage.covered_cells() {
        result.covered += 1;
        let (lon_lo, lon_hi, lat_lo, lat_hi) = a_bounds.cell(i, j);
        let ii = ShiftedBounds::cell_range(b_bounds.lon_min, b_bounds.dlon, b_dim, lon_lo, lon_hi);
        let jj = ShiftedBounds::cell_range(b_bounds.lat_min, b_bounds.dlat, b_dim, lat_lo, lat_hi);
        let hit = match (ii, jj) {
            (Some((i0, i1)), Some((j0, j1))) => {
                (j0..=j1).any(|jb| (i0..=i1).any(|ib| b.coverage.is_covered(ib, jb)))
            }
            _ => false,
        };
        if hit {
            result.matched += 1;
        }
    }
    result
}

/// Area-weighted blend of the matched fractions, floored at the minimum
/// overlap percentage
pub fn overlap_percent(side_1: CellMatch, area_1: f64, side_2: CellMatch, area_2: f64) -> u32 {
    let fraction = |m: CellMatch| {
        if m.covered == 0 {
            0.0
        } else {
            m.matched as f64 / m.covered as f64
        }
    };
    let total_area = area_1 + area_2;
    let blended = if total_area > 0.0 {
        (area_1 * fraction(side_1) + area_2 * fraction(side_2)) / total_area
    } else {
        0.0
    };
    ((100.0 * blended) as u32).clamp(MIN_OVERLAP_PERCENT, 100)
}

/// Do the first-to-last nav chords of two sections intersect
pub fn chords_intersect(section_1: &Section, section_2: &Section) -> bool {
    chord_intersection(section_1, section_2).is_some()
}

/// Lon/lat where the two chords cross, if they do
pub fn chord_intersection(section_1: &Section, section_2: &Section) -> Option<(f64, f64)> {
    let (p0, p1) = section_1.chord()?;
    let (q0, q1) = section_2.chord()?;
    segment_intersection(p0, p1, q0, q1)
}

fn segment_intersection(p0: (f64, f64), p1: (f64, f64), q0: (f64, f64), q1: (f64, f64)) -> Option<(f64, f64)> {
    let r = (p1.0 - p0.0, p1.1 - p0.1);
    let s = (q1.0 - q0.0, q1.1 - q0.1);
    let denom = r.0 * s.1 - r.1 * s.0;
    if denom.abs() <= f64::EPSILON * (r.0.hypot(r.1) * s.0.hypot(s.1)).max(f64::MIN_POSITIVE) {
        // parallel or degenerate
        return None;
    }
    let qp = (q0.0 - p0.0, q0.1 - p0.1);
    let t = (qp.0 * s.1 - qp.1 * s.0) / denom;
    let u = (qp.0 * r.1 - qp.1 * r.0) / denom;
    ((0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u)).then(|| (p0.0 + t * r.0, p0.1 + t * r.1))
}
