//! Codec parameter negotiation
//!
//! Encoders advertise what they can do as a list of [`EncoderCapabilities`].
//! [`select_codec_params`] turns a request into concrete profile, level and
//! bitrate values once, at configure time. Nothing here holds state.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use super::config::VideoCodecKind;

/// Encoding profiles, in the vocabulary of H.264
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Profile {
    Baseline,
    ConstrainedBaseline,
    Main,
    High,
}

impl Profile {
    /// `profile_idc` as written into the SPS
    pub fn idc(&self) -> u8 {
        match self {
            Profile::Baseline | Profile::ConstrainedBaseline => 66,
            Profile::Main => 77,
            Profile::High => 100,
        }
    }

    fn matches(&self, wanted: Profile) -> bool {
        match wanted {
            Profile::Baseline => {
                matches!(self, Profile::Baseline | Profile::ConstrainedBaseline)
            }
            other => *self == other,
        }
    }
}

/// One profile/level pair an encoder supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileLevel {
    pub profile: Profile,
    /// `level_idc`, e.g. 31 for level 3.1
    pub level: u32,
}

/// What one encoder reports for one codec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderCapabilities {
    pub codec: VideoCodecKind,
    pub name: String,
    pub hardware_accelerated: bool,
    pub profile_levels: Vec<ProfileLevel>,
    pub bitrate_range: RangeInclusive<u32>,
}

/// Result of negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecParams {
    pub profile: Option<Profile>,
    pub level: Option<u32>,
    pub bitrate: u32,
}

const PROFILE_PREFERENCE: [Profile; 3] = [Profile::High, Profile::Main, Profile::Baseline];

/// Pick profile, level and bitrate for `requested` from the first encoder that supports it.
///
/// Profiles are preferred High, then Main, then Baseline. The level is the
/// last one listed for the chosen profile. The bitrate is clamped into the
/// encoder's range. Without a matching encoder the request passes through
/// untouched and profile/level stay unset.
pub fn select_codec_params(
    requested: VideoCodecKind,
    bitrate: u32,
    available: &[EncoderCapabilities],
) -> CodecParams {
    let Some(caps) = available.iter().find(|c| c.codec == requested) else {
        log::debug!("No encoder advertises {}, using defaults", requested);
        return CodecParams {
            profile: None,
            level: None,
            bitrate,
        };
    };

    let chosen = PROFILE_PREFERENCE.iter().find_map(|wanted| {
        caps.profile_levels
            .iter()
            .find(|pl| pl.profile.matches(*wanted))
            .map(|pl| pl.profile)
    });

    let level = chosen.and_then(|profile| {
        caps.profile_levels
            .iter()
            .filter(|pl| pl.profile == profile)
            .last()
            .map(|pl| pl.level)
    });

    let clamped = bitrate.clamp(*caps.bitrate_range.start(), *caps.bitrate_range.end());
    if clamped != bitrate {
        log::info!(
            "Bitrate {} clamped to {} for encoder {}",
            bitrate,
            clamped,
            caps.name
        );
    }

    CodecParams {
        profile: chosen,
        level,
        bitrate: clamped,
    }
}
