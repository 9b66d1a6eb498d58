//! End-to-end pass over the pure pipeline: raw index.txt bodies from several
//! YPs → merge → reconcile → favorite classification → list projections.

use chrono::{Duration, TimeZone, Utc};
use epcyp_proto::error::{CooldownError, FeedError};
use epcyp_proto::favorite::{Favorite, FavoriteMatcher, FavoriteTarget};
use epcyp_proto::reconcile::{merge_sources, reconcile, FeedStatus, SourceOutcome};
use epcyp_proto::scheduler::{RefreshOutcome, SchedulerConfig, UpdateScheduler};
use epcyp_proto::view::{filter_favorites, filter_search, sort_by, SortKey, SortOrder};
use epcyp_proto::yp::YpSource;

fn line(name: &str, id: &str, genre: &str, listeners: i32, time: &str) -> String {
    format!(
        "{name}<>{id}<>198.51.100.1:7144<>http://bbs.example/{id}<>{genre}<>detail<>{listeners}<>1<>800<>FLV<><><><><><>{time}<>click<>comment<>0"
    )
}

fn sp() -> YpSource {
    YpSource::new("SP", "http://sp.example/")
}

fn tp() -> YpSource {
    YpSource::new("TP", "http://tp.example/")
}

#[test]
fn two_fetch_cycles_with_one_failing_source() {
    // first cycle: both sources answer
    let first = merge_sources(vec![
        SourceOutcome::from_fetch(
            sp(),
            Ok([line("Alpha", "A1", "ゲーム", 10, "1:00"), line("Beta", "B1", "雑談", 3, "0:10")].join("\n")),
        ),
        SourceOutcome::from_fetch(tp(), Ok(line("Gamma", "C1", "music", 25, "3:30"))),
    ]);
    assert!(first.failures.is_empty());
    let r1 = reconcile(&[], first.channels);
    assert_eq!(r1.status, FeedStatus::Updated);
    assert_eq!(r1.newly_arrived.len(), 3);

    // second cycle: TP times out, SP lists a newcomer and drops Beta
    let second = merge_sources(vec![
        SourceOutcome::from_fetch(
            sp(),
            Ok([line("Alpha", "A1", "ゲーム", 14, "1:01"), line("Delta", "D1", "ゲーム", 7, "0:01")].join("\n")),
        ),
        SourceOutcome::from_fetch(
            tp(),
            Err(FeedError::Timeout {
                url: tp().index_url(),
                secs: 5,
            }),
        ),
    ]);
    assert_eq!(second.failures.len(), 1);
    assert_eq!(second.failures[0].source, "TP");

    let r2 = reconcile(&r1.merged, second.channels);
    let arrived: Vec<_> = r2.newly_arrived.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(arrived, ["Delta"]);
    let names: Vec<_> = r2.merged.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["Alpha", "Delta"]);

    // notification path uses the first matching favorite
    let mut games = Favorite::new("games", "ゲーム");
    games.target = FavoriteTarget {
        name: false,
        genre: true,
        ..FavoriteTarget::default()
    };
    games.notify = true;
    let matcher = FavoriteMatcher::new(vec![Favorite::new("delta", "^delta$"), games]);
    let notify: Vec<_> = r2
        .newly_arrived
        .iter()
        .filter(|ch| {
            matcher
                .match_first(ch)
                .and_then(|idx| matcher.get(idx))
                .map(|fav| fav.notify)
                .unwrap_or(false)
        })
        .collect();
    // "delta" (no notify) wins over "games" (notify) for Delta
    assert!(notify.is_empty());
    assert_eq!(matcher.match_all(&r2.newly_arrived[0]).len(), 2);

    // projections
    let sorted = sort_by(&r2.merged, SortKey::Time, SortOrder::Desc);
    assert_eq!(sorted[0].name, "Alpha");
    assert_eq!(filter_favorites(&sorted, &matcher).len(), 2);
    assert_eq!(filter_search(&sorted, "ALPHA").len(), 1);
    assert!(filter_search(&sorted, "").is_empty());
}

#[test]
fn empty_cycle_keeps_last_good_snapshot_and_allows_retry() {
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 20, 0, 0).unwrap();
    let mut scheduler = UpdateScheduler::new(SchedulerConfig::default(), true);

    let RefreshOutcome::Started(ticket) = scheduler.request_refresh(t0) else {
        panic!("first refresh must start");
    };
    let merged = merge_sources(vec![SourceOutcome::from_fetch(
        sp(),
        Ok(line("Alpha", "A1", "x", 1, "0:01")),
    )]);
    let good = reconcile(&[], merged.channels);
    assert!(scheduler.complete(ticket, t0, good.status));

    // 10s later the user is told to wait 20s more
    assert_eq!(
        scheduler.request_refresh(t0 + Duration::seconds(10)),
        RefreshOutcome::Rejected(CooldownError {
            seconds_remaining: 20
        })
    );

    let RefreshOutcome::Started(ticket) = scheduler.request_refresh(t0 + Duration::seconds(31)) else {
        panic!("refresh after the interval must start");
    };
    let empty = merge_sources(vec![SourceOutcome::from_fetch(sp(), Ok(String::new()))]);
    let r = reconcile(&good.merged, empty.channels);
    assert_eq!(r.status, FeedStatus::NoData);
    assert_eq!(r.merged, good.merged);
    assert!(scheduler.complete(ticket, t0 + Duration::seconds(32), r.status));

    // no-data does not start a new cooldown window
    assert_eq!(scheduler.last_update(), Some(t0));
    assert!(matches!(
        scheduler.request_refresh(t0 + Duration::seconds(33)),
        RefreshOutcome::Started(_)
    ));
}
