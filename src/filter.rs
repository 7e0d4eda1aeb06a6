//! Frequency selection filter
//!
//! A mutable set of selected (frequency, modulation) channels. The empty
//! set is the unfiltered default and accepts every packet. Filtering is
//! applied once when a session's packet list is loaded, never
//! incrementally during playback; changing the selection requires
//! reloading the session.

use std::collections::HashSet;

use crate::packet::{FrequencyModulationKey, PacketRecord};

/// Set of selected channels
#[derive(Debug, Clone, Default)]
pub struct FrequencyFilter {
    selected: HashSet<FrequencyModulationKey>,
}

impl FrequencyFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter preloaded with a set of channels
    pub fn with_keys(keys: impl IntoIterator<Item = FrequencyModulationKey>) -> Self {
        Self {
            selected: keys.into_iter().collect(),
        }
    }

    pub fn select(&mut self, key: FrequencyModulationKey) {
        self.selected.insert(key);
    }

    pub fn deselect(&mut self, key: &FrequencyModulationKey) {
        self.selected.remove(key);
    }

    /// Clear the selection, returning to accept-everything
    pub fn clear(&mut self) {
        self.selected.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_selected(&self, key: &FrequencyModulationKey) -> bool {
        self.selected.contains(key)
    }

    /// Whether a packet passes the filter. An empty selection accepts
    /// everything; otherwise only exact channel matches pass.
    pub fn should_include(&self, record: &PacketRecord) -> bool {
        self.selected.is_empty() || self.selected.contains(&record.key())
    }

    /// Apply the filter to a full packet list
    pub fn apply(&self, packets: &[PacketRecord]) -> Vec<PacketRecord> {
        packets
            .iter()
            .filter(|p| self.should_include(p))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Modulation;
    use bytes::Bytes;

    fn record(frequency: f64, modulation: Modulation) -> PacketRecord {
        PacketRecord {
            ticks: 0,
            frequency,
            modulation,
            encryption: 0,
            transmitter_unit_id: 1,
            packet_id: 1,
            transmitter_guid: "guid".to_string(),
            speaker: None,
            sample_rate: 48_000,
            channel_count: 1,
            coalition: 1,
            audio: Bytes::new(),
        }
    }

    #[test]
    fn test_empty_filter_accepts_all() {
        let filter = FrequencyFilter::new();
        assert!(filter.should_include(&record(251.0e6, Modulation::Am)));
        assert!(filter.should_include(&record(30.0e6, Modulation::Fm)));
    }

    #[test]
    fn test_exact_match_only() {
        let mut filter = FrequencyFilter::new();
        filter.select(FrequencyModulationKey::new(251.0e6, Modulation::Am));

        assert!(filter.should_include(&record(251.0e6, Modulation::Am)));
        // Same frequency, different modulation
        assert!(!filter.should_include(&record(251.0e6, Modulation::Fm)));
        // Different frequency
        assert!(!filter.should_include(&record(251.1e6, Modulation::Am)));
    }

    #[test]
    fn test_clear_restores_accept_all() {
        let mut filter = FrequencyFilter::new();
        filter.select(FrequencyModulationKey::new(251.0e6, Modulation::Am));
        assert!(!filter.should_include(&record(30.0e6, Modulation::Fm)));

        filter.clear();
        assert!(filter.should_include(&record(30.0e6, Modulation::Fm)));
    }

    #[test]
    fn test_apply_filters_list() {
        let packets = vec![
            record(251.0e6, Modulation::Am),
            record(30.0e6, Modulation::Fm),
            record(251.0e6, Modulation::Am),
        ];
        let filter = FrequencyFilter::with_keys([FrequencyModulationKey::new(
            251.0e6,
            Modulation::Am,
        )]);
        assert_eq!(filter.apply(&packets).len(), 2);
    }
}
