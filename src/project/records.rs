//! Ingestion records consumed from the sonar resampling step

use serde::{Deserialize, Serialize};

use crate::core::FileStatus;
use crate::validation::{NavAdjustError, Result};

use super::types::{CoverageMask, NavPoint, Section, Sounding};

/// Nav sample of an ingested section
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NavRecord {
    pub ping_index: usize,
    pub distance: f64,
    pub time_d: f64,
    pub lon: f64,
    pub lat: f64,
}

/// Per-section summary produced by ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionRecord {
    pub ping_count: usize,
    pub beam_count: usize,
    pub continuity: bool,
    pub time_start: f64,
    pub time_end: f64,
    pub lon_min: f64,
    pub lon_max: f64,
    pub lat_min: f64,
    pub lat_max: f64,
    /// Coverage mask side length
    pub mask_dim: usize,
    /// Row-major (`i + j * mask_dim`) coverage flags
    pub coverage: Vec<bool>,
    pub nav_points: Vec<NavRecord>,
    #[serde(default)]
    pub soundings: Vec<Sounding>,
}

/// One survey track as delivered by ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub name: String,
    #[serde(default)]
    pub status: FileStatus,
    pub sections: Vec<SectionRecord>,
}

impl SectionRecord {
    /// Validate and convert into a store section
    pub fn into_section(self) -> Result<Section> {
        if self.nav_points.is_empty() {
            return Err(NavAdjustError::InvalidRecord(
                "section has no nav points".to_string(),
            ));
        }
        if !(self.lon_min < self.lon_max) || !(self.lat_min < self.lat_max) {
            return Err(NavAdjustError::InvalidRecord(format!(
                "degenerate bounds lon [{}, {}] lat [{}, {}]",
                self.lon_min, self.lon_max, self.lat_min, self.lat_max
            )));
        }
        if self
            .nav_points
            .windows(2)
            .any(|w| w[1].time_d < w[0].time_d)
        {
            return Err(NavAdjustError::InvalidRecord(
                "nav point times are not monotonic".to_string(),
            ));
        }
        let coverage = CoverageMask::new(self.mask_dim, self.coverage).ok_or_else(|| {
            NavAdjustError::InvalidRecord(format!(
                "coverage mask is not {0}x{0}",
                self.mask_dim
            ))
        })?;

        let (depth_min, depth_max) = self
            .soundings
            .iter()
            .fold(None, |acc: Option<(f64, f64)>, s| match acc {
                None => Some((s.depth, s.depth)),
                Some((lo, hi)) => Some((lo.min(s.depth), hi.max(s.depth))),
            })
            .unwrap_or((0.0, 0.0));

        let mut nav_points = Vec::new();
        nav_points.try_reserve_exact(self.nav_points.len())?;
        nav_points.extend(self.nav_points.iter().map(|n| NavPoint {
            ping_index: n.ping_index,
            distance: n.distance,
            time_d: n.time_d,
            lon: n.lon,
            lat: n.lat,
            offset: nalgebra::Vector3::zeros(),
            tie_count: 0,
        }));

        Ok(Section {
            ping_count: self.ping_count,
            beam_count: self.beam_count,
            continuity: self.continuity,
            time_start: self.time_start,
            time_end: self.time_end,
            lon_min: self.lon_min,
            lon_max: self.lon_max,
            lat_min: self.lat_min,
            lat_max: self.lat_max,
            depth_min,
            depth_max,
            coverage,
            nav_points,
            soundings: self.soundings,
        })
    }
}
