//! Library-level operations that sit next to sessions: importing
//! cartridges and ordering the game list.

use std::cmp::Reverse;
use std::time::SystemTime;

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, TimeZone, Utc};

use crate::engine::CoreEngine;
use crate::error::ImportError;
use crate::persistence::{Game, PersistenceGateway};

/// Validate `rom` against `engine` and add it to the library.
///
/// Validation boots a throwaway instance; the engine is the only judge of
/// what a playable cartridge is.
pub fn import_game(
    engine: &mut dyn CoreEngine,
    gateway: &dyn PersistenceGateway,
    name: &str,
    rom: Vec<u8>,
    now: SystemTime,
) -> Result<Game, ImportError> {
    let instance = engine.create_instance(&rom).map_err(ImportError::InvalidRom)?;
    engine.release_instance(instance);

    let game = Game::new(name, rom, now);
    gateway.add_game(game.clone())?;
    tracing::info!(id = %game.id, name = %game.name, bytes = game.rom.len(), "game imported");
    Ok(game)
}

/// Ordering of the game list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GameSort {
    /// Most recently played first; never-played games by import date.
    #[default]
    LastPlayed,
    /// By name, ignoring case.
    Alphabetical,
}

pub fn sort_games(games: &mut [Game], sort: GameSort) {
    match sort {
        GameSort::LastPlayed => games.sort_by_key(|g| Reverse(g.last_activity())),
        GameSort::Alphabetical => games.sort_by_cached_key(|g| g.name.to_lowercase()),
    }
}

// ---- Recency groups ----

/// Heading a game is listed under, by its last activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recency {
    Today,
    Yesterday,
    ThisWeek,
    LastWeek,
    ThisMonth,
    LastMonth,
    LastThreeMonths,
    LastSixMonths,
    ThisYear,
    /// An earlier calendar year.
    Year(i32),
}

impl std::fmt::Display for Recency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Today => f.write_str("Today"),
            Self::Yesterday => f.write_str("Yesterday"),
            Self::ThisWeek => f.write_str("This week"),
            Self::LastWeek => f.write_str("Last week"),
            Self::ThisMonth => f.write_str("This month"),
            Self::LastMonth => f.write_str("Last month"),
            Self::LastThreeMonths => f.write_str("Last three months"),
            Self::LastSixMonths => f.write_str("Last six months"),
            Self::ThisYear => f.write_str("This year"),
            Self::Year(year) => write!(f, "{year}"),
        }
    }
}

/// First day of each fixed heading as seen from `today`, latest first.
///
/// Weeks start on Monday. A heading that would start later than the one
/// before it is dropped, so "this month" disappears while "this week" still
/// reaches back into the previous month.
fn heading_starts(today: NaiveDate) -> Vec<(Recency, NaiveDate)> {
    let week = today.checked_sub_days(Days::new(u64::from(
        today.weekday().num_days_from_monday(),
    )));
    let month = today.with_day(1);
    let last_month = month.and_then(|d| d.checked_sub_months(Months::new(1)));
    let three_months = last_month.and_then(|d| d.checked_sub_months(Months::new(2)));
    let six_months = three_months.and_then(|d| d.checked_sub_months(Months::new(3)));

    let candidates = [
        (Recency::Today, Some(today)),
        (Recency::Yesterday, today.pred_opt()),
        (Recency::ThisWeek, week),
        (Recency::LastWeek, week.and_then(|d| d.checked_sub_days(Days::new(7)))),
        (Recency::ThisMonth, month),
        (Recency::LastMonth, last_month),
        (Recency::LastThreeMonths, three_months),
        (Recency::LastSixMonths, six_months),
        (Recency::ThisYear, NaiveDate::from_ymd_opt(today.year(), 1, 1)),
    ];

    let mut starts: Vec<(Recency, NaiveDate)> = Vec::new();
    for (heading, start) in candidates {
        let Some(start) = start else { continue };
        if starts.last().is_none_or(|&(_, previous)| start <= previous) {
            starts.push((heading, start));
        }
    }
    starts
}

/// Group `games` under recency headings, most recent activity first.
///
/// Days are calendar days in `now`'s time zone. Games older than every
/// fixed heading fall under the year they were last touched. Empty
/// headings are left out.
pub fn group_by_recency<Tz: TimeZone>(
    games: &[Game],
    now: &DateTime<Tz>,
) -> Vec<(Recency, Vec<Game>)> {
    let tz = now.timezone();
    let starts = heading_starts(now.date_naive());
    let mut sorted = games.to_vec();
    sort_games(&mut sorted, GameSort::LastPlayed);

    let mut groups: Vec<(Recency, Vec<Game>)> = Vec::new();
    for game in sorted {
        let day = DateTime::<Utc>::from(game.last_activity())
            .with_timezone(&tz)
            .date_naive();
        let heading = starts
            .iter()
            .find(|&&(_, start)| day >= start)
            .map_or(Recency::Year(day.year()), |&(heading, _)| heading);
        match groups.last_mut() {
            Some((last, members)) if *last == heading => members.push(game),
            _ => groups.push((heading, vec![game])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn game(name: &str, rom: u8, imported: u64, played: Option<u64>) -> Game {
        let mut game = Game::new(name, vec![rom], at(imported));
        game.last_played_at = played.map(at);
        game
    }

    #[test]
    fn last_played_prefers_play_time_over_import() {
        let mut games = vec![
            game("Old import, played today", 1, 10, Some(500)),
            game("Fresh import, never played", 2, 400, None),
            game("Played last week", 3, 20, Some(300)),
        ];
        sort_games(&mut games, GameSort::LastPlayed);
        let names: Vec<_> = games.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Old import, played today",
                "Fresh import, never played",
                "Played last week"
            ]
        );
    }

    fn played_on(name: &str, y: i32, m: u32, d: u32, h: u32) -> Game {
        let mut game = Game::new(name, name.as_bytes().to_vec(), at(0));
        game.last_played_at = Some(Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap().into());
        game
    }

    fn headings(groups: &[(Recency, Vec<Game>)]) -> Vec<(Recency, Vec<&str>)> {
        groups
            .iter()
            .map(|(heading, games)| (*heading, games.iter().map(|g| g.name.as_str()).collect()))
            .collect()
    }

    #[test]
    fn groups_follow_the_calendar() {
        // Thursday.
        let now = Utc.with_ymd_and_hms(2026, 10, 15, 12, 0, 0).unwrap();
        let games = vec![
            played_on("old", 2024, 1, 3, 9),
            played_on("today", 2026, 10, 15, 8),
            played_on("monday", 2026, 10, 12, 9),
            played_on("yesterday", 2026, 10, 14, 23),
            played_on("last week", 2026, 10, 6, 9),
            played_on("this month", 2026, 10, 2, 9),
            played_on("last month", 2026, 9, 10, 9),
            played_on("july", 2026, 7, 20, 9),
            played_on("may", 2026, 5, 1, 9),
            played_on("february", 2026, 2, 1, 9),
            played_on("older", 2024, 6, 1, 9),
        ];

        let groups = group_by_recency(&games, &now);

        assert_eq!(
            headings(&groups),
            vec![
                (Recency::Today, vec!["today"]),
                (Recency::Yesterday, vec!["yesterday"]),
                (Recency::ThisWeek, vec!["monday"]),
                (Recency::LastWeek, vec!["last week"]),
                (Recency::ThisMonth, vec!["this month"]),
                (Recency::LastMonth, vec!["last month"]),
                (Recency::LastThreeMonths, vec!["july"]),
                (Recency::LastSixMonths, vec!["may"]),
                (Recency::ThisYear, vec!["february"]),
                (Recency::Year(2024), vec!["older", "old"]),
            ]
        );
    }

    #[test]
    fn early_in_the_month_this_week_wins() {
        // Thursday the 1st: the week began in September.
        let now = Utc.with_ymd_and_hms(2026, 10, 1, 10, 0, 0).unwrap();
        let games = vec![
            played_on("tuesday", 2026, 9, 29, 9),
            played_on("week before", 2026, 9, 22, 9),
            played_on("early september", 2026, 9, 10, 9),
        ];

        assert_eq!(
            headings(&group_by_recency(&games, &now)),
            vec![
                (Recency::ThisWeek, vec!["tuesday"]),
                (Recency::LastWeek, vec!["week before"]),
                (Recency::LastMonth, vec!["early september"]),
            ]
        );
    }

    #[test]
    fn days_are_local_to_now() {
        let tokyo = chrono::FixedOffset::east_opt(9 * 3600).unwrap();
        // 2026-10-14 16:00 UTC.
        let now = tokyo.with_ymd_and_hms(2026, 10, 15, 1, 0, 0).unwrap();
        // Same UTC day as `now`, but the evening before in Tokyo.
        let game = played_on("late night", 2026, 10, 14, 14);

        assert_eq!(
            headings(&group_by_recency(&[game], &now)),
            vec![(Recency::Yesterday, vec!["late night"])]
        );
    }

    #[test]
    fn never_played_games_group_by_import() {
        let now = Utc.with_ymd_and_hms(2026, 10, 15, 12, 0, 0).unwrap();
        let imported: SystemTime = Utc.with_ymd_and_hms(2026, 10, 15, 7, 0, 0).unwrap().into();
        let game = Game::new("fresh", vec![9], imported);

        assert_eq!(
            headings(&group_by_recency(&[game], &now)),
            vec![(Recency::Today, vec!["fresh"])]
        );
        assert_eq!(Recency::Year(2019).to_string(), "2019");
        assert_eq!(Recency::LastThreeMonths.to_string(), "Last three months");
    }

    #[test]
    fn alphabetical_ignores_case() {
        let mut games = vec![
            game("zelda", 1, 0, None),
            game("Alleyway", 2, 0, None),
            game("kirby", 3, 0, None),
        ];
        sort_games(&mut games, GameSort::Alphabetical);
        let names: Vec<_> = games.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["Alleyway", "kirby", "zelda"]);
    }
}
