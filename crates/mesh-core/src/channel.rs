//! Wireless channel arithmetic
//!
//! Conversions between channel numbers and center frequencies, splitting a wide
//! channel into its 20 MHz constituents, DFS and 5 GHz sub-band classification.

use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};

use crate::types::{Bandwidth, FreqBand};

pub const LAST_2G_CHANNEL: u8 = 14;
pub const START_OF_LOW_BAND_NON_DFS: u8 = 36;
pub const END_OF_LOW_BAND_NON_DFS: u8 = 48;
pub const START_OF_LOW_DFS_SUBBAND: u8 = 52;
pub const END_OF_LOW_DFS_SUBBAND: u8 = 64;
pub const END_OF_LOW_BAND: u8 = 64;
pub const START_OF_HIGH_BAND: u8 = 100;
pub const START_OF_HIGH_DFS_SUBBAND: u8 = 100;
pub const END_OF_HIGH_DFS_SUBBAND: u8 = 144;
pub const START_OF_HIGH_BAND_NON_DFS: u8 = 149;
pub const END_OF_HIGH_BAND_NON_DFS: u8 = 161;
pub const END_OF_HIGH_BAND: u8 = 165;

/// 80 MHz blocks of the 5 GHz band, as the lowest 20 MHz channel of each block
const BLOCKS_80MHZ_5G: [u8; 6] = [36, 52, 100, 116, 132, 149];
/// 160 MHz blocks of the 5 GHz band
const BLOCKS_160MHZ_5G: [u8; 2] = [36, 100];

/// Role of a 20 MHz channel inside a wider operating channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelRole {
    Primary,
    Secondary,
}

/// 5 GHz sub-band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subband {
    Low,
    High,
    Invalid,
}

/// Current operating channel of a radio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WifiChannel {
    pub channel: u8,
    /// Center frequency of the whole operating channel in MHz
    pub center_frequency: u16,
    pub bandwidth: Bandwidth,
    /// Secondary 20 MHz channel lies above the primary
    pub ext_above: bool,
}

impl WifiChannel {
    pub fn new(channel: u8, center_frequency: u16, bandwidth: Bandwidth, ext_above: bool) -> Self {
        Self {
            channel,
            center_frequency,
            bandwidth,
            ext_above,
        }
    }

    /// Build a channel from its primary number, deriving the center frequency
    pub fn from_primary(channel: u8, bandwidth: Bandwidth, ext_above: bool) -> Self {
        let center_frequency = channel_to_vht_center_freq(channel, bandwidth, ext_above);
        Self::new(channel, center_frequency, bandwidth, ext_above)
    }

    pub fn is_empty(&self) -> bool {
        self.channel == 0
    }

    pub fn band(&self) -> FreqBand {
        if self.center_frequency != 0 {
            which_freq_type(self.center_frequency)
        } else {
            channel_band(self.channel)
        }
    }

    pub fn frequency(&self) -> u16 {
        channel_to_freq(self.channel, self.band())
    }

    /// Sanity check used before forwarding a northbound channel switch
    pub fn is_valid(&self) -> bool {
        if self.channel == 0 {
            return false;
        }
        match self.band() {
            FreqBand::Band24G => self.channel <= LAST_2G_CHANNEL && self.bandwidth <= Bandwidth::Bw40,
            FreqBand::Band5G => (START_OF_LOW_BAND_NON_DFS..=END_OF_HIGH_BAND).contains(&self.channel),
            FreqBand::Band6G => self.channel <= 233,
            FreqBand::Unknown => false,
        }
    }
}

/// Band of a bare channel number; numbers overlapping 6 GHz resolve to 5 GHz
pub fn channel_band(channel: u8) -> FreqBand {
    match channel {
        1..=LAST_2G_CHANNEL => FreqBand::Band24G,
        START_OF_LOW_BAND_NON_DFS..=END_OF_HIGH_BAND => FreqBand::Band5G,
        0 => FreqBand::Unknown,
        _ => FreqBand::Band6G,
    }
}

/// Band of a center frequency in MHz
pub fn which_freq_type(freq: u16) -> FreqBand {
    match freq {
        2401..=2495 => FreqBand::Band24G,
        5150..=5895 => FreqBand::Band5G,
        5945..=7125 => FreqBand::Band6G,
        _ => FreqBand::Unknown,
    }
}

pub fn channel_to_freq(channel: u8, band: FreqBand) -> u16 {
    let ch = channel as u16;
    match band {
        FreqBand::Band24G if channel == 14 => 2484,
        FreqBand::Band24G => 2407 + 5 * ch,
        FreqBand::Band5G => 5000 + 5 * ch,
        FreqBand::Band6G if channel == 2 => 5935,
        FreqBand::Band6G => 5950 + 5 * ch,
        FreqBand::Unknown => 0,
    }
}

pub fn freq_to_channel(freq: u16) -> u8 {
    match freq {
        2484 => 14,
        2412..=2472 => ((freq - 2407) / 5) as u8,
        5935 => 2,
        5160..=5885 => ((freq - 5000) / 5) as u8,
        5955..=7115 => ((freq - 5950) / 5) as u8,
        _ => 0,
    }
}

pub fn is_dfs_channel(channel: u8) -> bool {
    (START_OF_LOW_DFS_SUBBAND..=END_OF_HIGH_DFS_SUBBAND).contains(&channel)
}

pub fn which_subband(channel: u8) -> Subband {
    match channel {
        START_OF_LOW_BAND_NON_DFS..=END_OF_LOW_BAND => Subband::Low,
        START_OF_HIGH_BAND..=END_OF_HIGH_BAND => Subband::High,
        _ => Subband::Invalid,
    }
}

fn block_start(channel: u8, blocks: &[u8], width: u8) -> Option<u8> {
    blocks
        .iter()
        .copied()
        .find(|start| channel >= *start && channel < start + width * 4)
}

/// Center frequency of the operating channel whose primary is `channel`
pub fn channel_to_vht_center_freq(channel: u8, bandwidth: Bandwidth, ext_above: bool) -> u16 {
    let band = channel_band(channel);
    let primary = channel_to_freq(channel, band);
    match (band, bandwidth) {
        (_, Bandwidth::Bw20) => primary,
        (FreqBand::Band24G, _) | (FreqBand::Band6G, Bandwidth::Bw40) => {
            if ext_above {
                primary + 10
            } else {
                primary - 10
            }
        }
        (FreqBand::Band5G, Bandwidth::Bw40) => {
            // 40 MHz pairs start at 36, 44, 52, ...
            let low = channel - ((channel - START_OF_LOW_BAND_NON_DFS) % 8);
            channel_to_freq(low, band) + 10
        }
        (FreqBand::Band5G, Bandwidth::Bw80) | (FreqBand::Band5G, Bandwidth::Bw80Plus80) => {
            match block_start(channel, &BLOCKS_80MHZ_5G, 4) {
                Some(start) => channel_to_freq(start + 6, band),
                None => primary,
            }
        }
        (FreqBand::Band5G, Bandwidth::Bw160) => match block_start(channel, &BLOCKS_160MHZ_5G, 8) {
            Some(start) => channel_to_freq(start + 14, band),
            None => primary,
        },
        (FreqBand::Band6G, bw) => {
            let width = bw.count_20mhz() as u8;
            let index = (channel.saturating_sub(1)) / (4 * width);
            let start = 1 + index * 4 * width;
            channel_to_freq(start + 2 * (width - 1), band)
        }
        (FreqBand::Unknown, _) => 0,
    }
}

/// 20 MHz channels covered by a 5 GHz operating channel of the given width and center
pub fn get_5g_20mhz_channels(bandwidth: Bandwidth, center_frequency: u16) -> Vec<u8> {
    let center = freq_to_channel(center_frequency);
    if center == 0 {
        return Vec::new();
    }
    let count = bandwidth.count_20mhz() as u8;
    let span = 2 * (count - 1);
    if center < span {
        return Vec::new();
    }
    let first = center - span;
    (0..count).map(|i| first + 4 * i).collect()
}

/// Channels of the previous operating channel that are not part of the new one
pub fn calc_5g_20mhz_subband_channels(
    prev_bandwidth: Bandwidth,
    prev_center_frequency: u16,
    bandwidth: Bandwidth,
    center_frequency: u16,
) -> Vec<u8> {
    let current = get_5g_20mhz_channels(bandwidth, center_frequency);
    get_5g_20mhz_channels(prev_bandwidth, prev_center_frequency)
        .into_iter()
        .filter(|channel| !current.contains(channel))
        .collect()
}

// ----------------------------------------------------------------------------
// Operating Classes
// ----------------------------------------------------------------------------

/// Channel width of a global operating class (IEEE 802.11 Annex E, table E-4)
pub fn operating_class_bandwidth(operating_class: u8) -> Option<Bandwidth> {
    match operating_class {
        81 | 82 | 115 | 118 | 121 | 124 | 125 | 131 | 136 => Some(Bandwidth::Bw20),
        83 | 84 | 116 | 117 | 119 | 120 | 122 | 123 | 126 | 127 | 132 => Some(Bandwidth::Bw40),
        128 | 133 => Some(Bandwidth::Bw80),
        129 | 134 => Some(Bandwidth::Bw160),
        130 | 135 => Some(Bandwidth::Bw80Plus80),
        _ => None,
    }
}

/// Classes of 80 MHz and up name the center channel index instead of the primary
pub fn operating_class_uses_center_channel(operating_class: u8) -> bool {
    matches!(operating_class, 128..=130 | 133..=135)
}

/// 20 MHz channels of one operating channel; at most 8 (160 MHz)
pub type SplitChannels = SmallVec<[(u8, ChannelRole); 8]>;

/// Split an operating channel into its 20 MHz channels tagged by role
pub fn split_channel_to_20mhz(wifi_channel: &WifiChannel) -> SplitChannels {
    let primary = wifi_channel.channel;
    if primary == 0 {
        return SmallVec::new();
    }
    if wifi_channel.bandwidth == Bandwidth::Bw20 {
        return smallvec![(primary, ChannelRole::Primary)];
    }
    if wifi_channel.band() == FreqBand::Band24G {
        let secondary = if wifi_channel.ext_above {
            primary + 4
        } else {
            primary.saturating_sub(4)
        };
        let mut out: SplitChannels = smallvec![(primary, ChannelRole::Primary)];
        if (1..=LAST_2G_CHANNEL).contains(&secondary) {
            out.push((secondary, ChannelRole::Secondary));
        }
        return out;
    }
    let center = if wifi_channel.center_frequency != 0 {
        wifi_channel.center_frequency
    } else {
        channel_to_vht_center_freq(primary, wifi_channel.bandwidth, wifi_channel.ext_above)
    };
    get_5g_20mhz_channels(wifi_channel.bandwidth, center)
        .into_iter()
        .map(|channel| {
            let role = if channel == primary {
                ChannelRole::Primary
            } else {
                ChannelRole::Secondary
            };
            (channel, role)
        })
        .collect()
}
