//! Candidate channel list
//!
//! Built fresh for one radio every time channel selection computes a channel. Each
//! supported 20 MHz channel records how many other active radios use it as primary or
//! secondary, whether it is disallowed (restricted, radar affected, or in the sub-band
//! of the agent's own 5 GHz backhaul) and, on 2.4 GHz, whether a neighbouring channel
//! within the overlap window is in use.

use std::collections::BTreeMap;

use mesh_core::channel::{split_channel_to_20mhz, which_subband, ChannelRole, Subband, WifiChannel};
use mesh_core::protocol::vendor::SupportedChannel;
use mesh_core::{Bandwidth, FreqBand, MacAddress};

use crate::db::Database;

/// 2.4 GHz channels closer than this interfere
const OVERLAP_WINDOW_2G: u8 = 4;
/// Spacing of adjacent 20 MHz channels in 5 GHz
const CHANNEL_STEP_5G: u8 = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CclEntry {
    pub primary: u32,
    pub secondary: u32,
    pub overlap: bool,
    pub disallow: bool,
    pub radar_affected: bool,
}

impl CclEntry {
    pub fn is_used(&self) -> bool {
        self.primary > 0 || self.secondary > 0
    }

    /// Least-used score: primary usage weighs double
    pub fn score(&self) -> u32 {
        2 * self.primary + self.secondary
    }
}

#[derive(Debug, Clone)]
pub struct CandidateChannelList {
    band: FreqBand,
    entries: BTreeMap<u8, CclEntry>,
}

impl CandidateChannelList {
    /// One entry per supported channel; radar-affected channels start disallowed
    pub fn new(band: FreqBand, supported: &[SupportedChannel]) -> Self {
        let entries = supported
            .iter()
            .map(|channel| {
                (
                    channel.channel,
                    CclEntry {
                        radar_affected: channel.radar_affected,
                        disallow: channel.radar_affected,
                        ..CclEntry::default()
                    },
                )
            })
            .collect();
        Self { band, entries }
    }

    /// Candidate list of `ruid` against every other active radio of the same band
    pub fn from_database(db: &Database, ruid: &MacAddress) -> Option<Self> {
        let radio = db.radio(ruid)?;
        let mut ccl = Self::new(radio.band, &radio.supported_channels);
        ccl.disallow(&db.restricted_channels(ruid));
        for other in db.radios() {
            if other.ruid != *ruid && other.active && other.band == radio.band {
                ccl.add_usage(&other.channel);
            }
        }
        Some(ccl)
    }

    pub fn band(&self) -> FreqBand {
        self.band
    }

    pub fn entry(&self, channel: u8) -> Option<&CclEntry> {
        self.entries.get(&channel)
    }

    /// Count one radio operating on `channel`
    pub fn add_usage(&mut self, channel: &WifiChannel) {
        for (sub_channel, role) in split_channel_to_20mhz(channel) {
            if let Some(entry) = self.entries.get_mut(&sub_channel) {
                match role {
                    ChannelRole::Primary => entry.primary += 1,
                    ChannelRole::Secondary => entry.secondary += 1,
                }
            }
            if self.band == FreqBand::Band24G {
                let low = sub_channel.saturating_sub(OVERLAP_WINDOW_2G);
                let high = sub_channel.saturating_add(OVERLAP_WINDOW_2G);
                for (_, entry) in self.entries.range_mut(low..=high) {
                    entry.overlap = true;
                }
            }
        }
    }

    pub fn disallow(&mut self, channels: &[u8]) {
        for channel in channels {
            if let Some(entry) = self.entries.get_mut(channel) {
                entry.disallow = true;
            }
        }
    }

    /// Disallow every channel of a 5 GHz sub-band
    pub fn disallow_subband(&mut self, subband: Subband) {
        if subband == Subband::Invalid {
            return;
        }
        for (channel, entry) in self.entries.iter_mut() {
            if which_subband(*channel) == subband {
                entry.disallow = true;
            }
        }
    }

    pub fn is_free(&self, channel: u8) -> bool {
        self.entries
            .get(&channel)
            .map(|entry| !entry.is_used() && !entry.disallow)
            .unwrap_or(false)
    }

    /// A 2.4 GHz channel nobody uses, nearby channels included
    pub fn has_free_2g(&self) -> bool {
        self.free_2g_channel().is_some()
    }

    pub fn free_2g_channel(&self) -> Option<u8> {
        self.entries
            .iter()
            .find(|(channel, entry)| !entry.overlap && self.is_free(**channel))
            .map(|(channel, _)| *channel)
    }

    /// A run of contiguous free 20 MHz channels wide enough for `bandwidth`
    pub fn has_free_5g(&self, bandwidth: Bandwidth) -> bool {
        let needed = bandwidth.count_20mhz();
        let mut run = 0usize;
        let mut previous: Option<u8> = None;
        for channel in self.entries.keys().copied() {
            let contiguous = previous
                .map(|p| p.checked_add(CHANNEL_STEP_5G) == Some(channel))
                .unwrap_or(false);
            if self.is_free(channel) {
                run = if contiguous { run + 1 } else { 1 };
                if run >= needed {
                    return true;
                }
            } else {
                run = 0;
            }
            previous = Some(channel);
        }
        false
    }

    /// Channel with the lowest usage score
    ///
    /// Ties go to the channel whose neighbours carry fewer primaries, then to the
    /// gateway's 5 GHz sub-band, then to the lowest channel number.
    pub fn least_used_channel(&self, gw_subband: Option<Subband>) -> Option<u8> {
        let neighbour_primaries = |channel: u8| -> u32 {
            let step = if self.band == FreqBand::Band24G { 1 } else { CHANNEL_STEP_5G };
            let below = channel
                .checked_sub(step)
                .and_then(|c| self.entries.get(&c))
                .map(|entry| entry.primary)
                .unwrap_or(0);
            let above = channel
                .checked_add(step)
                .and_then(|c| self.entries.get(&c))
                .map(|entry| entry.primary)
                .unwrap_or(0);
            below + above
        };
        self.entries
            .iter()
            .filter(|(_, entry)| !entry.disallow)
            .min_by_key(|(channel, entry)| {
                let off_gw_subband = match gw_subband {
                    Some(subband) if subband != Subband::Invalid => which_subband(**channel) != subband,
                    _ => false,
                };
                (entry.score(), neighbour_primaries(**channel), off_gw_subband, **channel)
            })
            .map(|(channel, _)| *channel)
    }

    /// Channels in use by other radios
    pub fn used_channels(&self) -> Vec<u8> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.is_used())
            .map(|(channel, _)| *channel)
            .collect()
    }
}
