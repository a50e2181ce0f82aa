//! Rendition ladder planning.
//!
//! Turns an ordered bitrate ladder into per-rendition encoder settings and the
//! master playlist that advertises them. Everything here is pure: nothing
//! touches the filesystem or measures the encoded output.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use streamforged_common::{Error, Result};

use crate::hls::{MasterPlaylist, VariantStream};

/// File name of the master playlist written for ladder sessions.
pub const MASTER_PLAYLIST_NAME: &str = "master.m3u8";

/// One rung of a bitrate ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenditionDescriptor {
    /// Label, also used as the file name stem of the rendition's outputs.
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Target video bitrate in kbps.
    pub bitrate_kbps: u32,
}

impl RenditionDescriptor {
    pub fn new(name: impl Into<String>, width: u32, height: u32, bitrate_kbps: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            bitrate_kbps,
        }
    }

    /// Declared bandwidth in bits per second.
    pub fn bandwidth(&self) -> u64 {
        u64::from(self.bitrate_kbps) * 1000
    }
}

/// Encoder parameters for a single rendition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenditionPlan {
    pub descriptor: RenditionDescriptor,
    /// Video filter, e.g. `scale=1280:720`.
    pub scale_filter: String,
    /// Value for `-b:v`.
    pub video_bitrate: String,
    /// Value for `-maxrate`; equal to the target bitrate.
    pub maxrate: String,
    /// Value for `-bufsize`; twice the target bitrate.
    pub bufsize: String,
    /// Media playlist file name, relative to the session directory.
    pub playlist_name: String,
    /// Segment file name pattern for `-hls_segment_filename`.
    pub segment_pattern: String,
}

impl RenditionPlan {
    fn from_descriptor(descriptor: &RenditionDescriptor) -> Self {
        let kbps = descriptor.bitrate_kbps;
        Self {
            scale_filter: format!("scale={}:{}", descriptor.width, descriptor.height),
            video_bitrate: format!("{}k", kbps),
            maxrate: format!("{}k", kbps),
            bufsize: format!("{}k", u64::from(kbps) * 2),
            playlist_name: format!("{}.m3u8", descriptor.name),
            segment_pattern: format!("{}_%05d.ts", descriptor.name),
            descriptor: descriptor.clone(),
        }
    }
}

/// Output of [`plan_ladder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LadderPlan {
    /// Per-rendition settings, in ladder order.
    pub renditions: Vec<RenditionPlan>,
    /// Master playlist text, one variant per rendition in ladder order.
    pub master_playlist: String,
}

impl LadderPlan {
    /// Media playlist file names, in ladder order.
    pub fn playlist_names(&self) -> impl Iterator<Item = &str> {
        self.renditions.iter().map(|r| r.playlist_name.as_str())
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::invalid_input(format!(
            "rendition name {:?} must be non-empty and use only [A-Za-z0-9_-]",
            name
        )))
    }
}

/// Plan encoder settings and the master playlist for a ladder.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for an empty ladder, duplicate or unsafe
/// rendition names, or a zero dimension or bitrate.
///
/// # Example
///
/// ```
/// use streamforged_media::ladder::{plan_ladder, RenditionDescriptor};
///
/// let plan = plan_ladder(&[
///     RenditionDescriptor::new("720p", 1280, 720, 2800),
///     RenditionDescriptor::new("360p", 640, 360, 800),
/// ])
/// .unwrap();
///
/// assert_eq!(plan.renditions[0].bufsize, "5600k");
/// assert!(plan.master_playlist.contains("BANDWIDTH=2800000,RESOLUTION=1280x720"));
/// ```
pub fn plan_ladder(ladder: &[RenditionDescriptor]) -> Result<LadderPlan> {
    if ladder.is_empty() {
        return Err(Error::invalid_input("rendition ladder is empty"));
    }

    let mut seen = HashSet::new();
    for descriptor in ladder {
        validate_name(&descriptor.name)?;
        if !seen.insert(descriptor.name.as_str()) {
            return Err(Error::invalid_input(format!(
                "duplicate rendition name {:?}",
                descriptor.name
            )));
        }
        if descriptor.width == 0 || descriptor.height == 0 || descriptor.bitrate_kbps == 0 {
            return Err(Error::invalid_input(format!(
                "rendition {:?} needs a non-zero resolution and bitrate",
                descriptor.name
            )));
        }
    }

    let renditions: Vec<RenditionPlan> =
        ladder.iter().map(RenditionPlan::from_descriptor).collect();

    let master = renditions
        .iter()
        .fold(MasterPlaylist::new(), |master, plan| {
            master.add_variant(VariantStream {
                uri: plan.playlist_name.clone(),
                bandwidth: plan.descriptor.bandwidth(),
                width: plan.descriptor.width,
                height: plan.descriptor.height,
            })
        });

    Ok(LadderPlan {
        renditions,
        master_playlist: master.render(),
    })
}

/// The ladder used when a session asks for adaptive output without one.
pub fn default_ladder() -> Vec<RenditionDescriptor> {
    vec![
        RenditionDescriptor::new("720p", 1280, 720, 2800),
        RenditionDescriptor::new("480p", 854, 480, 1400),
        RenditionDescriptor::new("240p", 426, 240, 400),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rendition_parameters() {
        let plan = plan_ladder(&[RenditionDescriptor::new("240p", 426, 240, 500)]).unwrap();
        let r = &plan.renditions[0];

        assert_eq!(r.scale_filter, "scale=426:240");
        assert_eq!(r.video_bitrate, "500k");
        assert_eq!(r.maxrate, "500k");
        assert_eq!(r.bufsize, "1000k");
        assert_eq!(r.playlist_name, "240p.m3u8");
        assert_eq!(r.segment_pattern, "240p_%05d.ts");
    }

    #[test]
    fn test_master_mirrors_ladder() {
        let ladder = default_ladder();
        let plan = plan_ladder(&ladder).unwrap();

        let master = MasterPlaylist::parse(&plan.master_playlist).unwrap();
        assert_eq!(master.variants.len(), ladder.len());

        for (variant, descriptor) in master.variants.iter().zip(&ladder) {
            assert_eq!(variant.bandwidth, u64::from(descriptor.bitrate_kbps) * 1000);
            assert_eq!(variant.width, descriptor.width);
            assert_eq!(variant.height, descriptor.height);
            assert_eq!(variant.uri, format!("{}.m3u8", descriptor.name));
        }
        assert_eq!(
            plan.playlist_names().collect::<Vec<_>>(),
            vec!["720p.m3u8", "480p.m3u8", "240p.m3u8"]
        );
    }

    #[test]
    fn test_planning_is_deterministic() {
        let ladder = default_ladder();
        assert_eq!(plan_ladder(&ladder).unwrap(), plan_ladder(&ladder).unwrap());
    }

    #[test]
    fn test_empty_ladder_rejected() {
        assert!(matches!(plan_ladder(&[]), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let ladder = vec![
            RenditionDescriptor::new("hd", 1280, 720, 2800),
            RenditionDescriptor::new("hd", 640, 360, 800),
        ];
        assert!(matches!(plan_ladder(&ladder), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_unsafe_names_rejected() {
        for name in ["", "../evil", "a b", "x/y"] {
            let ladder = vec![RenditionDescriptor::new(name, 640, 360, 800)];
            assert!(
                matches!(plan_ladder(&ladder), Err(Error::InvalidInput(_))),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_zero_bitrate_rejected() {
        let ladder = vec![RenditionDescriptor::new("low", 640, 360, 0)];
        assert!(matches!(plan_ladder(&ladder), Err(Error::InvalidInput(_))));
    }
}
