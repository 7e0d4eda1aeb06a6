//! Batch file analysis: activity segmentation, channel rosters, totals
//!
//! Everything here is read-only over the packet stream and independent
//! of the playback pipeline, so an analysis pass can run while another
//! session is playing.

pub mod activity;
pub mod summary;

pub use activity::{scan_activity, ActivityPeriod};
pub use summary::{summarize, ChannelRoster, FileSummary, SpeakerEntry};

use std::time::Duration;

use crate::config::PlayerConfig;
use crate::packet::PacketRecord;

/// Combined single-file analysis result
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub summary: FileSummary,
    pub periods: Vec<ActivityPeriod>,
    pub activity_time: Duration,
    /// Activity time over total span, in percent
    pub activity_percentage: f64,
}

/// Run both analysis passes over a time-ordered packet list
pub fn analyze(packets: &[PacketRecord], config: &PlayerConfig) -> AnalysisReport {
    let summary = summarize(packets);
    let periods = scan_activity(packets, config);
    let activity_time = periods.iter().map(ActivityPeriod::duration).sum();
    let activity_percentage = summary.activity_percentage(activity_time);
    AnalysisReport {
        summary,
        periods,
        activity_time,
        activity_percentage,
    }
}
