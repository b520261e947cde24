use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Upper bound of the anterior-posterior axis in CCF micrometers.
pub const AP_MAX: f64 = 13200.0;
/// Upper bound of the dorsal-ventral axis in CCF micrometers.
pub const DV_MAX: f64 = 8000.0;
/// Upper bound of the left-right axis in CCF micrometers.
pub const LR_MAX: f64 = 11400.0;

pub const CCF_EXTENTS: [(&str, f64); 3] = [("AP", AP_MAX), ("DV", DV_MAX), ("LR", LR_MAX)];

/// Annotation label for voxels outside of any structure.
pub const NO_LABEL_ID: u32 = 0;
pub const ROOT_ID: u32 = 997;

/// Volumes are stored with axis order (AP, DV, LR).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SliceAxis {
    /// fixed AP
    Coronal,
    /// fixed LR
    Sagittal,
    /// fixed DV
    Horizontal,
}
impl SliceAxis {
    pub const ALL: [SliceAxis; 3] = [SliceAxis::Coronal, SliceAxis::Sagittal, SliceAxis::Horizontal];

    pub fn volume_axis(&self) -> usize {
        match self {
            SliceAxis::Coronal => 0,
            SliceAxis::Horizontal => 1,
            SliceAxis::Sagittal => 2,
        }
    }
    pub fn name(&self) -> &'static str {
        match self {
            SliceAxis::Coronal => "coronal",
            SliceAxis::Sagittal => "sagittal",
            SliceAxis::Horizontal => "horizontal",
        }
    }
}
impl fmt::Display for SliceAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}
impl FromStr for SliceAxis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SliceAxis::ALL
            .into_iter()
            .find(|axis| axis.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown slice axis {s:?}, expected one of coronal, sagittal, horizontal"))
    }
}
