use chrono::{DateTime, Duration, Utc};
use promobot_core_types::EngagementKind;

/// Decides whether an engagement counts as occurring before campaign close.
///
/// Quotes and replies carry the platform's own timestamp, so they are judged
/// strictly against the close time. Likes and reposts come back without one;
/// for those the collection time stands in, padded by a grace window so that
/// an engagement made just before close but collected after it still counts.
pub fn timing_is_valid(
    kind: EngagementKind,
    observed_ts: Option<DateTime<Utc>>,
    collected_at: DateTime<Utc>,
    close_time: DateTime<Utc>,
    grace: Duration,
) -> bool {
    if kind.has_observed_timestamp() {
        match observed_ts {
            Some(ts) => ts <= close_time,
            None => false,
        }
    } else {
        collected_at <= close_time + grace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(minute: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .expect("parse base")
            .with_timezone(&Utc)
            + Duration::minutes(minute)
    }

    #[test]
    fn quote_is_judged_by_its_platform_timestamp() {
        let close = at(0);
        let grace = Duration::minutes(30);
        assert!(timing_is_valid(
            EngagementKind::Quote,
            Some(at(-5)),
            at(120),
            close,
            grace
        ));
        assert!(!timing_is_valid(
            EngagementKind::Quote,
            Some(at(1)),
            at(1),
            close,
            grace
        ));
    }

    #[test]
    fn quote_without_timestamp_is_invalid() {
        assert!(!timing_is_valid(
            EngagementKind::Reply,
            None,
            at(-5),
            at(0),
            Duration::minutes(30)
        ));
    }

    #[test]
    fn like_uses_collection_time_with_grace() {
        let close = at(0);
        let grace = Duration::minutes(30);
        assert!(timing_is_valid(EngagementKind::Like, None, at(29), close, grace));
        assert!(timing_is_valid(EngagementKind::Like, None, at(30), close, grace));
        assert!(!timing_is_valid(
            EngagementKind::Repost,
            None,
            at(31),
            close,
            grace
        ));
    }
}
