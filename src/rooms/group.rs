use time::Duration;

use super::Message;

/// Gap after which a new visual group starts.
pub const BURST_GAP: Duration = Duration::minutes(10);

/// Splits a chronological run of messages into bursts.
///
/// A message starts a new burst when it arrives more than `gap` after the
/// previous one. The input is only borrowed; its order is kept.
pub fn group_bursts(messages: &[Message], gap: Duration) -> Vec<&[Message]> {
    let gap_ms = gap.whole_milliseconds();
    let mut groups = Vec::new();
    let mut start = 0;

    for (i, pair) in messages.windows(2).enumerate() {
        if i128::from(pair[1].created_at - pair[0].created_at) > gap_ms {
            groups.push(&messages[start..=i]);
            start = i + 1;
        }
    }
    if start < messages.len() {
        groups.push(&messages[start..]);
    }

    groups
}
