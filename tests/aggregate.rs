use std::fs;
use std::path::PathBuf;

use chrono::NaiveDate;

use hkpl_analytics::aggregate::{EntityType, Grouping, LEAGUE_ID, Window, compute, find};
use hkpl_analytics::dataset::Dataset;
use hkpl_analytics::error::ComputeError;
use hkpl_analytics::injuries::{self, simulated_injuries};
use hkpl_analytics::players::{ASSISTS, GOALS, MINUTES, PLAYER, player_schema, prepare_players};
use hkpl_analytics::raw::parse_csv;

fn read_fixture(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    fs::read_to_string(path).expect("fixture file should be readable")
}

fn fixture_dataset() -> Dataset {
    let raw = parse_csv(&read_fixture("hk_sample.csv")).expect("fixture parses");
    prepare_players(&raw, "2024-25", "fixture").expect("fixture prepares")
}

#[test]
fn identical_inputs_give_identical_results() {
    let ds = fixture_dataset();
    for grouping in [Grouping::League, Grouping::Team, Grouping::Position, Grouping::Player] {
        let a = compute(&ds, grouping, &[GOALS, ASSISTS, MINUTES], &Window::All).unwrap();
        let b = compute(&ds, grouping, &[GOALS, ASSISTS, MINUTES], &Window::All).unwrap();
        assert_eq!(a, b, "grouping {grouping}");
    }
}

#[test]
fn team_totals_match_the_fixture() {
    let ds = fixture_dataset();
    let out = compute(&ds, Grouping::Team, &[GOALS, ASSISTS], &Window::All).unwrap();
    let ids: Vec<&str> = out.iter().map(|r| r.entity_id.as_str()).collect();
    assert_eq!(
        ids,
        vec!["Eastern", "Eastern", "Kitchee", "Kitchee", "Lee Man", "Lee Man", "Tai Po", "Tai Po"]
    );
    assert!(out.iter().all(|r| r.entity_type == EntityType::Team));

    let kitchee = find(&out, "Kitchee", GOALS).unwrap();
    assert_eq!((kitchee.rows, kitchee.total), (5, 22.0));
    assert_eq!(find(&out, "Tai Po", ASSISTS).unwrap().total, 4.0);

    let league = compute(&ds, Grouping::League, &[GOALS], &Window::All).unwrap();
    assert_eq!(league.len(), 1);
    assert_eq!(league[0].entity_id, LEAGUE_ID);
    assert_eq!(league[0].total, 57.0);
    assert_eq!(league[0].max, Some(14.0));
}

#[test]
fn empty_dataset_by_team_is_an_empty_list() {
    let ds = Dataset::empty(player_schema());
    let out = compute(&ds, Grouping::Team, &[GOALS], &Window::All).unwrap();
    assert!(out.is_empty());

    let league = compute(&ds, Grouping::League, &[GOALS, ASSISTS], &Window::All).unwrap();
    assert_eq!(league.len(), 2);
    assert!(league.iter().all(|r| r.count == 0 && r.mean.is_none() && r.min.is_none()));
}

#[test]
fn season_window_filters_records() {
    let ds = fixture_dataset();
    let other = compute(&ds, Grouping::League, &[GOALS], &Window::Season("2023-24".into())).unwrap();
    assert_eq!(other[0].rows, 0);
    let same = compute(&ds, Grouping::League, &[GOALS], &Window::Season("2024-25".into())).unwrap();
    assert_eq!(same[0].rows, ds.len());
}

#[test]
fn invalid_metrics_and_windows_are_errors() {
    let ds = fixture_dataset();
    assert_eq!(
        compute(&ds, Grouping::Team, &["dribbles_won"], &Window::All).unwrap_err(),
        ComputeError::UnknownMetric("dribbles_won".into())
    );
    assert_eq!(
        compute(&ds, Grouping::Team, &[PLAYER], &Window::All).unwrap_err(),
        ComputeError::NonNumericMetric(PLAYER.into())
    );
    let range = Window::DateRange {
        from: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        to: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
    };
    assert_eq!(
        compute(&ds, Grouping::League, &[GOALS], &range).unwrap_err(),
        ComputeError::MissingRole("date")
    );
}

#[test]
fn date_range_window_on_injuries() {
    let today = NaiveDate::from_ymd_opt(2025, 6, 30).unwrap();
    let ds = simulated_injuries(7, today, 80).unwrap();
    let from = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
    let window = Window::DateRange { from, to: today };

    let out = compute(&ds, Grouping::League, &[injuries::RECOVERY_DAYS], &window).unwrap();
    let expected = ds
        .records
        .iter()
        .filter(|r| r.date(injuries::INJURY_DATE).is_some_and(|d| d >= from && d <= today))
        .count();
    assert_eq!(out[0].rows, expected);

    let by_team = compute(&ds, Grouping::Team, &[injuries::RECOVERY_DAYS], &Window::All).unwrap();
    assert_eq!(by_team.iter().map(|r| r.rows).sum::<usize>(), ds.len());
}
