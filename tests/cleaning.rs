use std::fs;
use std::path::PathBuf;

use hkpl_analytics::clean::{Cleaner, DropReason};
use hkpl_analytics::players::{self, PositionGroup, player_schema, prepare_players};
use hkpl_analytics::raw::{RawRecord, parse_csv};
use hkpl_analytics::schema::{FieldSpec, FieldType, Schema, Value};

fn read_fixture(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    fs::read_to_string(path).expect("fixture file should be readable")
}

fn goals_schema() -> Schema {
    Schema::new(
        "goals",
        vec![
            FieldSpec::required("player", FieldType::Text),
            FieldSpec::required("goals", FieldType::Int),
        ],
    )
    .expect("valid schema")
}

#[test]
fn unparseable_required_value_drops_the_row() {
    let raw = vec![
        RawRecord::from_pairs([("player", "A"), ("goals", "3")]),
        RawRecord::from_pairs([("player", "B"), ("goals", "bad")]),
    ];
    let out = Cleaner::clean(&raw, &goals_schema()).expect("columns resolve");

    assert_eq!(out.records.len(), 1);
    assert_eq!(out.records[0].text("player"), Some("A"));
    assert_eq!(out.records[0].get("goals"), Some(&Value::Int(3)));
    assert_eq!(out.dropped_count(), 1);
    assert_eq!(out.dropped[0].row, 1);
    assert!(matches!(
        &out.dropped[0].reason,
        DropReason::Unparseable { field, raw } if field == "goals" && raw == "bad"
    ));
}

#[test]
fn missing_required_column_is_a_schema_error() {
    let raw = vec![RawRecord::from_pairs([("player", "A")])];
    let err = Cleaner::clean(&raw, &goals_schema()).unwrap_err();
    assert!(err.to_string().contains("goals"));
}

#[test]
fn fixture_rows_conform_to_the_player_schema() {
    let raw = parse_csv(&read_fixture("hk_sample.csv")).expect("fixture parses");
    assert_eq!(raw.len(), 19);

    let schema = player_schema();
    let out = Cleaner::clean(&raw, &schema).expect("columns resolve");
    // Blank row and the row without a player name.
    assert_eq!(out.dropped_count(), 2);
    // "abc" shots per 90 falls back to the default.
    assert_eq!(out.coerced, 1);
    assert!(out.records.iter().all(|r| r.conforms_to(&schema)));
}

#[test]
fn prepared_fixture_is_deduplicated_and_sorted() {
    let raw = parse_csv(&read_fixture("hk_sample.csv")).expect("fixture parses");
    let ds = prepare_players(&raw, "2024-25", "fixture").expect("prepares");

    assert_eq!(ds.len(), 15);
    // Two cleaner drops plus the placeholder team.
    assert_eq!(ds.dropped, 3);
    assert_eq!(ds.distinct_text(players::TEAM), vec!["Eastern", "Kitchee", "Lee Man", "Tai Po"]);

    let severo: Vec<_> = ds
        .records
        .iter()
        .filter(|r| r.text(players::PLAYER) == Some("Mikael Severo"))
        .collect();
    assert_eq!(severo.len(), 1);
    assert_eq!(severo[0].number(players::GOALS), Some(14.0));
    assert_eq!(severo[0].text(players::POSITION_GROUP), Some(PositionGroup::Forward.as_str()));
    assert_eq!(severo[0].text(players::AGE_CATEGORY), Some("Experienced"));

    let first = &ds.records[0];
    assert_eq!(first.text(players::TEAM), Some("Eastern"));
    assert_eq!(first.text(players::PLAYER), Some("Everton Camargo"));

    let lau = ds
        .records
        .iter()
        .find(|r| r.text(players::PLAYER) == Some("Lau Cheuk Hin"))
        .expect("Lau kept");
    assert_eq!(lau.number(players::SHOTS_PER_90), Some(0.0));
    assert_eq!(lau.text(players::SEASON), Some("2024-25"));
    let per_match = lau.number(players::MINUTES_PER_MATCH).expect("derived");
    assert!((per_match - 1100.0 / 14.0).abs() < 1e-9);
}
