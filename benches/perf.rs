use std::fmt::Write as _;

use chrono::NaiveDate;
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use hkpl_analytics::aggregate::{Grouping, Window, compute};
use hkpl_analytics::clean::Cleaner;
use hkpl_analytics::injuries::simulated_injuries;
use hkpl_analytics::injury_reports::{InjuryFilter, injury_dashboard};
use hkpl_analytics::players::{ASSISTS, GOALS, MINUTES, XG, player_schema, prepare_players};
use hkpl_analytics::rankings::role_rankings;
use hkpl_analytics::raw::{RawRecord, parse_csv};
use hkpl_analytics::reports::{PlayerFilter, league_report};

const TEAMS: &[&str] = &[
    "Kitchee", "Eastern", "Lee Man", "Tai Po", "Southern", "Rangers", "North District",
    "HK FC", "Kowloon City",
];
const POSITIONS: &[&str] = &["GK", "CB", "LB", "RB", "DMF", "CMF", "AMF", "LW", "RW", "CF"];

/// A season-sized CSV: 9 teams of 30 players.
fn sample_csv() -> String {
    let mut out = String::from(
        "Player,Team,Position,Age,Matches played,Minutes played,Goals,Assists,xG,xA,\
Shots per 90,Tackles per 90,Interceptions per 90,Key passes per 90,Dribbles per 90\n",
    );
    for (t, team) in TEAMS.iter().enumerate() {
        for p in 0..30usize {
            let seed = t * 31 + p;
            let matches = 4 + seed % 20;
            let _ = writeln!(
                out,
                "Player {t}-{p},{team},{},{},{matches},{},{},{},{:.1},{:.1},{:.1},{:.1},{:.1},{:.1},{:.1}",
                POSITIONS[p % POSITIONS.len()],
                18 + seed % 17,
                matches * 75,
                seed % 13,
                seed % 9,
                (seed % 11) as f64 * 0.9,
                (seed % 7) as f64 * 0.6,
                (seed % 5) as f64 * 0.8,
                (seed % 6) as f64 * 0.5,
                (seed % 4) as f64 * 0.7,
                (seed % 3) as f64 * 0.9,
                (seed % 8) as f64 * 0.4,
            );
        }
    }
    out
}

fn sample_raw() -> Vec<RawRecord> {
    parse_csv(&sample_csv()).expect("generated csv parses")
}

fn bench_clean(c: &mut Criterion) {
    let raw = sample_raw();
    let schema = player_schema();
    c.bench_function("clean_season", |b| {
        b.iter(|| {
            let out = Cleaner::clean(black_box(&raw), &schema).unwrap();
            black_box(out.records.len());
        })
    });
}

fn bench_aggregate(c: &mut Criterion) {
    let ds = prepare_players(&sample_raw(), "2024-25", "bench").unwrap();
    c.bench_function("aggregate_by_team", |b| {
        b.iter(|| {
            let out = compute(
                black_box(&ds),
                Grouping::Team,
                &[GOALS, ASSISTS, MINUTES, XG],
                &Window::All,
            )
            .unwrap();
            black_box(out.len());
        })
    });
}

fn bench_league_report(c: &mut Criterion) {
    let ds = prepare_players(&sample_raw(), "2024-25", "bench").unwrap();
    c.bench_function("league_report", |b| {
        b.iter(|| {
            let report = league_report(black_box(&ds), &PlayerFilter::default()).unwrap();
            black_box(report.overview.total_players);
        })
    });
}

fn bench_rankings(c: &mut Criterion) {
    let ds = prepare_players(&sample_raw(), "2024-25", "bench").unwrap();
    c.bench_function("role_rankings", |b| {
        b.iter(|| {
            let entries = role_rankings(black_box(&ds));
            black_box(entries.len());
        })
    });
}

fn bench_injury_dashboard(c: &mut Criterion) {
    let today = NaiveDate::from_ymd_opt(2025, 6, 30).unwrap();
    let ds = simulated_injuries(42, today, 500).unwrap();
    c.bench_function("injury_dashboard", |b| {
        b.iter(|| {
            let dashboard = injury_dashboard(black_box(&ds), &InjuryFilter::default(), today);
            black_box(dashboard.summary.total_injuries);
        })
    });
}

criterion_group!(
    perf,
    bench_clean,
    bench_aggregate,
    bench_league_report,
    bench_rankings,
    bench_injury_dashboard
);
criterion_main!(perf);
