//! Collection contexts: what a single window is measuring.
//!
//! A context is built from raw operator input and validated before any window
//! is armed. Once built it is immutable and owned by the window for its whole
//! lifetime.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Which recording tool is driving the session.
///
/// The variant decides the fixed column layout, the sheet keyword, and
/// whether observed sources become dynamic table columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolVariant {
    /// Single-source calibration at a known distance.
    Calibration,
    /// Multi-source fingerprinting at a spatial location.
    Survey,
}

const CALIBRATION_COLUMNS: &[&str] = &["source", "distance_m", "rssi_mean", "note", "recorded_at"];
const SURVEY_COLUMNS: &[&str] = &["location", "x", "y", "z", "samples", "recorded_at"];

impl ToolVariant {
    /// Keyword used to locate this tool's sheet inside a workbook.
    pub fn sheet_keyword(self) -> &'static str {
        match self {
            Self::Calibration => "calibration",
            Self::Survey => "survey",
        }
    }

    /// Context columns that always lead the table, in order.
    pub fn fixed_columns(self) -> &'static [&'static str] {
        match self {
            Self::Calibration => CALIBRATION_COLUMNS,
            Self::Survey => SURVEY_COLUMNS,
        }
    }

    /// Whether observed sources are stored as their own trailing columns.
    pub fn has_source_columns(self) -> bool {
        matches!(self, Self::Survey)
    }

    /// Store file used when nothing else is configured.
    pub fn default_store_file(self) -> &'static str {
        match self {
            Self::Calibration => "calibration.json",
            Self::Survey => "survey.json",
        }
    }
}

impl std::fmt::Display for ToolVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Calibration => write!(f, "calibration"),
            Self::Survey => write!(f, "survey"),
        }
    }
}

impl std::str::FromStr for ToolVariant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "calibration" | "calibrate" | "point" => Ok(Self::Calibration),
            "survey" | "fingerprint" => Ok(Self::Survey),
            other => Err(Error::Config(format!("unknown tool '{other}'"))),
        }
    }
}

/// The measurement event a window is collecting for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CollectionContext {
    /// One filtered source at a known distance.
    Point {
        source_filter: String,
        distance_m: f64,
        note: Option<String>,
    },
    /// Every source, tagged with the survey location.
    Survey {
        location: String,
        x: f64,
        y: f64,
        z: f64,
    },
}

impl CollectionContext {
    /// Validate point-calibration input.
    ///
    /// The source id must be non-empty after trimming and the distance a
    /// positive finite number.
    pub fn point(source: &str, distance: &str, note: Option<&str>) -> Result<Self> {
        let source_filter = normalize_source_id(source)
            .ok_or_else(|| Error::invalid("source", "identifier must not be empty"))?;
        let distance_m = parse_finite("distance", distance)?;
        if distance_m <= 0.0 {
            return Err(Error::invalid(
                "distance",
                format!("must be positive, got {distance_m}"),
            ));
        }
        let note = note
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);

        Ok(Self::Point {
            source_filter,
            distance_m,
            note,
        })
    }

    /// Validate survey input. A blank or missing Z defaults to 0.
    pub fn survey(location: &str, x: &str, y: &str, z: Option<&str>) -> Result<Self> {
        let location = location.trim();
        if location.is_empty() {
            return Err(Error::invalid("location", "identifier must not be empty"));
        }
        let x = parse_finite("x", x)?;
        let y = parse_finite("y", y)?;
        let z = match z.map(str::trim).filter(|z| !z.is_empty()) {
            Some(raw) => parse_finite("z", raw)?,
            None => 0.0,
        };

        Ok(Self::Survey {
            location: location.to_string(),
            x,
            y,
            z,
        })
    }

    pub fn variant(&self) -> ToolVariant {
        match self {
            Self::Point { .. } => ToolVariant::Calibration,
            Self::Survey { .. } => ToolVariant::Survey,
        }
    }

    /// Whether messages from `source_id` (already normalized) feed this window.
    pub fn accepts_source(&self, source_id: &str) -> bool {
        match self {
            Self::Point { source_filter, .. } => source_filter == source_id,
            Self::Survey { .. } => true,
        }
    }

    /// Short human label for progress output and logs.
    pub fn label(&self) -> String {
        match self {
            Self::Point {
                source_filter,
                distance_m,
                ..
            } => format!("{source_filter} @ {distance_m} m"),
            Self::Survey { location, x, y, z } => format!("{location} ({x}, {y}, {z})"),
        }
    }
}

/// Trim and upper-case a source identifier. Empty ids yield `None`.
pub fn normalize_source_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_uppercase())
    }
}

fn parse_finite(field: &'static str, raw: &str) -> Result<f64> {
    let raw = raw.trim();
    let value: f64 = raw
        .parse()
        .map_err(|_| Error::invalid(field, format!("'{raw}' is not a number")))?;
    if !value.is_finite() {
        return Err(Error::invalid(field, format!("'{raw}' is not finite")));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // Point context
    // -----------------------------------------------------------------------

    #[test]
    fn point_normalizes_source() {
        let ctx = CollectionContext::point("  aa:bb:cc:dd:ee:ff ", "2.5", None).unwrap();
        assert_eq!(
            ctx,
            CollectionContext::Point {
                source_filter: "AA:BB:CC:DD:EE:FF".to_string(),
                distance_m: 2.5,
                note: None,
            }
        );
        assert_eq!(ctx.variant(), ToolVariant::Calibration);
    }

    #[test]
    fn point_rejects_non_positive_distance() {
        let err = CollectionContext::point("AA", "-5", None).unwrap_err();
        assert!(matches!(err, Error::InvalidContext { field: "distance", .. }));
        assert!(CollectionContext::point("AA", "0", None).is_err());
    }

    #[test]
    fn point_rejects_garbage_distance() {
        assert!(CollectionContext::point("AA", "two", None).is_err());
        assert!(CollectionContext::point("AA", "inf", None).is_err());
        assert!(CollectionContext::point("AA", "NaN", None).is_err());
    }

    #[test]
    fn point_rejects_blank_source() {
        let err = CollectionContext::point("   ", "1", None).unwrap_err();
        assert!(matches!(err, Error::InvalidContext { field: "source", .. }));
    }

    #[test]
    fn point_drops_blank_note() {
        let ctx = CollectionContext::point("AA", "1", Some("  ")).unwrap();
        assert!(matches!(ctx, CollectionContext::Point { note: None, .. }));
    }

    #[test]
    fn point_filters_sources() {
        let ctx = CollectionContext::point("aa", "1", None).unwrap();
        assert!(ctx.accepts_source("AA"));
        assert!(!ctx.accepts_source("BB"));
    }

    // -----------------------------------------------------------------------
    // Survey context
    // -----------------------------------------------------------------------

    #[test]
    fn survey_defaults_z_to_zero() {
        let ctx = CollectionContext::survey("point-1-2", "1", "2", None).unwrap();
        assert_eq!(
            ctx,
            CollectionContext::Survey {
                location: "point-1-2".to_string(),
                x: 1.0,
                y: 2.0,
                z: 0.0,
            }
        );
        let blank = CollectionContext::survey("p", "1", "2", Some(" ")).unwrap();
        assert!(matches!(blank, CollectionContext::Survey { z, .. } if z == 0.0));
    }

    #[test]
    fn survey_accepts_negative_coordinates() {
        let ctx = CollectionContext::survey("p", "-1.5", "0", Some("-3")).unwrap();
        assert!(matches!(ctx, CollectionContext::Survey { x, z, .. } if x == -1.5 && z == -3.0));
    }

    #[test]
    fn survey_rejects_bad_input() {
        assert!(CollectionContext::survey("", "1", "2", None).is_err());
        assert!(CollectionContext::survey("p", "x", "2", None).is_err());
        assert!(CollectionContext::survey("p", "1", "", None).is_err());
        assert!(CollectionContext::survey("p", "1", "2", Some("nan")).is_err());
    }

    #[test]
    fn survey_accepts_every_source() {
        let ctx = CollectionContext::survey("p", "0", "0", None).unwrap();
        assert!(ctx.accepts_source("ANYTHING"));
    }

    // -----------------------------------------------------------------------
    // Tool variant
    // -----------------------------------------------------------------------

    #[test]
    fn variant_layouts() {
        assert_eq!(ToolVariant::Calibration.fixed_columns().len(), 5);
        assert_eq!(ToolVariant::Survey.fixed_columns()[0], "location");
        assert!(ToolVariant::Survey.has_source_columns());
        assert!(!ToolVariant::Calibration.has_source_columns());
    }

    #[test]
    fn variant_parses() {
        assert_eq!("Survey".parse::<ToolVariant>().unwrap(), ToolVariant::Survey);
        assert_eq!("point".parse::<ToolVariant>().unwrap(), ToolVariant::Calibration);
        assert!("other".parse::<ToolVariant>().is_err());
    }
}
