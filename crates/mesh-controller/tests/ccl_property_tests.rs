//! Property-based tests for the candidate channel list

use mesh_controller::tasks::channel_selection::CandidateChannelList;
use mesh_core::channel::WifiChannel;
use mesh_core::protocol::vendor::SupportedChannel;
use mesh_core::{Bandwidth, FreqBand};
use proptest::prelude::*;

const CHANNELS_5G: [u8; 25] = [
    36, 40, 44, 48, 52, 56, 60, 64, 100, 104, 108, 112, 116, 120, 124, 128, 132, 136, 140, 144, 149, 153,
    157, 161, 165,
];

fn supported(channels: &[u8]) -> Vec<SupportedChannel> {
    channels
        .iter()
        .map(|channel| SupportedChannel {
            channel: *channel,
            bandwidth: Bandwidth::Bw20,
            tx_power: 20,
            is_dfs: false,
            radar_affected: false,
        })
        .collect()
}

/// Longest run of adjacent free 5 GHz channels, counted the slow way
fn longest_free_run(disallowed: &[bool]) -> usize {
    let mut best = 0;
    let mut run = 0;
    for (index, channel) in CHANNELS_5G.iter().enumerate() {
        let adjacent = index > 0 && CHANNELS_5G[index - 1] + 4 == *channel;
        if disallowed[index] {
            run = 0;
        } else {
            run = if adjacent { run + 1 } else { 1 };
        }
        best = best.max(run);
    }
    best
}

proptest! {
    #[test]
    fn prop_free_5g_matches_longest_run(disallowed in prop::collection::vec(any::<bool>(), CHANNELS_5G.len())) {
        let mut ccl = CandidateChannelList::new(FreqBand::Band5G, &supported(&CHANNELS_5G));
        let blocked: Vec<u8> = CHANNELS_5G
            .iter()
            .zip(&disallowed)
            .filter(|(_, blocked)| **blocked)
            .map(|(channel, _)| *channel)
            .collect();
        ccl.disallow(&blocked);

        let run = longest_free_run(&disallowed);
        for bandwidth in [Bandwidth::Bw20, Bandwidth::Bw40, Bandwidth::Bw80, Bandwidth::Bw160] {
            prop_assert_eq!(ccl.has_free_5g(bandwidth), run >= bandwidth.count_20mhz());
        }
    }

    #[test]
    fn prop_least_used_is_never_disallowed(
        disallowed in prop::collection::vec(any::<bool>(), CHANNELS_5G.len()),
        busy in prop::collection::vec(0usize..CHANNELS_5G.len(), 0..6),
    ) {
        let mut ccl = CandidateChannelList::new(FreqBand::Band5G, &supported(&CHANNELS_5G));
        for index in busy {
            ccl.add_usage(&WifiChannel::from_primary(CHANNELS_5G[index], Bandwidth::Bw20, true));
        }
        let blocked: Vec<u8> = CHANNELS_5G
            .iter()
            .zip(&disallowed)
            .filter(|(_, blocked)| **blocked)
            .map(|(channel, _)| *channel)
            .collect();
        ccl.disallow(&blocked);

        match ccl.least_used_channel(None) {
            Some(channel) => {
                prop_assert!(!ccl.entry(channel).unwrap().disallow);
                let best = ccl.entry(channel).unwrap().score();
                for other in CHANNELS_5G {
                    let entry = ccl.entry(other).unwrap();
                    if !entry.disallow {
                        prop_assert!(entry.score() >= best);
                    }
                }
            }
            None => prop_assert!(disallowed.iter().all(|blocked| *blocked)),
        }
    }

    #[test]
    fn prop_free_2g_channel_keeps_clear_of_neighbours(used in prop::collection::vec(1u8..=13, 0..4)) {
        let all: Vec<u8> = (1..=13).collect();
        let mut ccl = CandidateChannelList::new(FreqBand::Band24G, &supported(&all));
        for channel in &used {
            ccl.add_usage(&WifiChannel::from_primary(*channel, Bandwidth::Bw20, true));
        }

        match ccl.free_2g_channel() {
            Some(channel) => {
                for busy in &used {
                    prop_assert!(channel.abs_diff(*busy) > 4, "{} too close to {}", channel, busy);
                }
            }
            None => {
                let clear = all
                    .iter()
                    .any(|channel| used.iter().all(|busy| channel.abs_diff(*busy) > 4));
                prop_assert!(!clear);
            }
        }
    }
}
