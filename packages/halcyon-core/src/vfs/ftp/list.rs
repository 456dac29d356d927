//! LIST reply parsing.
//!
//! Servers send whatever their local `ls` produces. The two formats that
//! matter in practice are UNIX `ls -l` lines and the MS-DOS style used by
//! IIS. Anything else is skipped rather than failing the whole listing.

use crate::utils::{civil_from_days, days_from_civil};

/// One parsed listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpListEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: Option<u64>,
    pub modified_ms: Option<u64>,
}

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Parses one LIST line, resolving year-less timestamps against `now_ms`.
///
/// Returns None for headers ("total 42"), the dot entries and lines in
/// neither known format.
pub fn parse_list_line(line: &str, now_ms: u64) -> Option<FtpListEntry> {
    let spans = token_spans(line);
    if spans.is_empty() {
        return None;
    }
    let first = token(line, &spans, 0);

    let entry = if looks_like_dos_date(first) {
        parse_dos_line(line, &spans)
    } else if looks_like_unix_mode(first) {
        parse_unix_line(line, &spans, now_ms)
    } else {
        None
    }?;

    if entry.name.is_empty() || entry.name == "." || entry.name == ".." {
        return None;
    }
    Some(entry)
}

// ─────────────────────────────────────────────────────────────────────────────
// UNIX format
// ─────────────────────────────────────────────────────────────────────────────

// -rw-r--r--   1 ftp ftp  1234567 Mar 01 12:30 Big File.mkv
// drwxr-xr-x   2 ftp ftp     4096 Feb 29  2020 Series
// lrwxrwxrwx   1 ftp ftp       11 Jan  5 09:00 current -> builds/v2

fn looks_like_unix_mode(token: &str) -> bool {
    token.len() >= 10 && matches!(token.as_bytes()[0], b'-' | b'd' | b'l' | b'b' | b'c' | b'p' | b's')
}

fn parse_unix_line(line: &str, spans: &[(usize, usize)], now_ms: u64) -> Option<FtpListEntry> {
    let mode = token(line, spans, 0);
    let is_dir = mode.starts_with('d');
    let is_link = mode.starts_with('l');

    // Column counts vary (group may be missing), so locate the date triple
    // instead of assuming fixed positions.
    let date_idx = (1..spans.len().checked_sub(3)?).find(|&i| {
        month_number(token(line, spans, i)).is_some()
            && token(line, spans, i + 1).parse::<u32>().is_ok()
            && parse_year_or_time(token(line, spans, i + 2)).is_some()
    })?;

    let month = month_number(token(line, spans, date_idx))?;
    let day: u32 = token(line, spans, date_idx + 1).parse().ok()?;
    let year_or_time = parse_year_or_time(token(line, spans, date_idx + 2))?;
    let modified_ms = resolve_timestamp(month, day, year_or_time, now_ms);

    let size = if is_dir {
        None
    } else {
        token(line, spans, date_idx - 1).parse::<u64>().ok()
    };

    let mut name = line[spans[date_idx + 2].1..].trim_start().to_string();
    if is_link {
        if let Some(pos) = name.find(" -> ") {
            name.truncate(pos);
        }
    }

    Some(FtpListEntry {
        name,
        is_dir,
        size,
        modified_ms,
    })
}

enum YearOrTime {
    Year(i64),
    Time { hour: i64, minute: i64 },
}

fn parse_year_or_time(token: &str) -> Option<YearOrTime> {
    if let Some((h, m)) = token.split_once(':') {
        let hour: i64 = h.parse().ok()?;
        let minute: i64 = m.parse().ok()?;
        if hour > 23 || minute > 59 {
            return None;
        }
        return Some(YearOrTime::Time { hour, minute });
    }
    let year: i64 = token.parse().ok()?;
    if (1970..=9999).contains(&year) {
        Some(YearOrTime::Year(year))
    } else {
        None
    }
}

fn month_number(token: &str) -> Option<u32> {
    MONTHS
        .iter()
        .position(|m| m.eq_ignore_ascii_case(token))
        .map(|i| i as u32 + 1)
}

/// Year-less timestamps mean "within the last year": a date that lands in
/// the future belongs to the previous year.
fn resolve_timestamp(month: u32, day: u32, year_or_time: YearOrTime, now_ms: u64) -> Option<u64> {
    let (year, hour, minute) = match year_or_time {
        YearOrTime::Year(year) => (year, 0, 0),
        YearOrTime::Time { hour, minute } => {
            let now_days = (now_ms / 86_400_000) as i64;
            let (now_year, _, _) = civil_from_days(now_days);
            let candidate = days_from_civil(now_year, month, day) * 86_400 + hour * 3600 + minute * 60;
            let year = if candidate > (now_ms / 1000) as i64 + 86_400 {
                now_year - 1
            } else {
                now_year
            };
            (year, hour, minute)
        }
    };
    let secs = days_from_civil(year, month, day) * 86_400 + hour * 3600 + minute * 60;
    u64::try_from(secs).ok().map(|s| s * 1000)
}

// ─────────────────────────────────────────────────────────────────────────────
// MS-DOS format
// ─────────────────────────────────────────────────────────────────────────────

// 01-15-20  12:34PM       <DIR>          Program Files
// 09-02-2004  11:22AM             12345 file.bin

fn looks_like_dos_date(token: &str) -> bool {
    token.as_bytes().first().is_some_and(u8::is_ascii_digit) && token.matches('-').count() == 2
}

fn parse_dos_line(line: &str, spans: &[(usize, usize)]) -> Option<FtpListEntry> {
    if spans.len() < 4 {
        return None;
    }
    let (month, day, year) = parse_dos_date(token(line, spans, 0))?;
    let (hour, minute) = parse_dos_time(token(line, spans, 1))?;
    let secs = days_from_civil(year, month, day) * 86_400 + hour * 3600 + minute * 60;
    let modified_ms = u64::try_from(secs).ok().map(|s| s * 1000);

    let marker = token(line, spans, 2);
    let (is_dir, size) = if marker.eq_ignore_ascii_case("<DIR>") {
        (true, None)
    } else {
        (false, marker.parse::<u64>().ok())
    };

    let name = line[spans[2].1..].trim_start().to_string();
    Some(FtpListEntry {
        name,
        is_dir,
        size,
        modified_ms,
    })
}

fn parse_dos_date(token: &str) -> Option<(u32, u32, i64)> {
    let mut parts = token.split('-');
    let month: u32 = parts.next()?.parse().ok()?;
    let day: u32 = parts.next()?.parse().ok()?;
    let raw_year = parts.next()?;
    let year: i64 = raw_year.parse().ok()?;
    let year = if raw_year.len() == 2 {
        if year < 70 {
            2000 + year
        } else {
            1900 + year
        }
    } else {
        year
    };
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    Some((month, day, year))
}

fn parse_dos_time(token: &str) -> Option<(i64, i64)> {
    let (clock, meridiem) = if let Some(t) = token.strip_suffix("AM") {
        (t, Some(false))
    } else if let Some(t) = token.strip_suffix("PM") {
        (t, Some(true))
    } else {
        (token, None)
    };
    let (h, m) = clock.split_once(':')?;
    let mut hour: i64 = h.parse().ok()?;
    let minute: i64 = m.parse().ok()?;
    match meridiem {
        Some(true) if hour != 12 => hour += 12,
        Some(false) if hour == 12 => hour = 0,
        _ => {}
    }
    if hour > 23 || minute > 59 {
        return None;
    }
    Some((hour, minute))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tokenizing
// ─────────────────────────────────────────────────────────────────────────────

fn token_spans(line: &str) -> Vec<(usize, usize)> {
    let bytes = line.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let start = i;
        while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i > start {
            spans.push((start, i));
        }
    }
    spans
}

fn token<'a>(line: &'a str, spans: &[(usize, usize)], index: usize) -> &'a str {
    let (start, end) = spans[index];
    &line[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2026-08-22T00:00:00Z
    const NOW_MS: u64 = 1_787_356_800_000;

    #[test]
    fn unix_file_with_explicit_year() {
        let entry =
            parse_list_line("-rw-r--r--   1 ftp ftp     1234 Feb 29  2020 leap.bin", NOW_MS)
                .unwrap();
        assert_eq!(entry.name, "leap.bin");
        assert!(!entry.is_dir);
        assert_eq!(entry.size, Some(1234));
        assert_eq!(entry.modified_ms, Some(1_582_934_400_000));
    }

    #[test]
    fn unix_directory_with_recent_time() {
        let entry =
            parse_list_line("drwxr-xr-x   2 ftp ftp     4096 Mar 01 12:30 Files", NOW_MS).unwrap();
        assert!(entry.is_dir);
        assert_eq!(entry.size, None);
        // March of the current year: in the past, so the year stands.
        assert_eq!(entry.modified_ms, Some(1_772_368_200_000));
    }

    #[test]
    fn unix_future_date_rolls_back_a_year() {
        // 2026-01-02T00:00:00Z
        let now = 1_767_312_000_000;
        let entry =
            parse_list_line("-rw-r--r-- 1 u g 5 Dec 31 23:59 old.log", now).unwrap();
        // December 31 hasn't happened yet this year.
        assert_eq!(entry.modified_ms, Some(1_767_225_540_000));
    }

    #[test]
    fn unix_name_with_spaces_survives() {
        let entry = parse_list_line(
            "-rw-r--r--   1 ftp ftp 99 Jan 15 10:00 My Movie (2024).mkv",
            NOW_MS,
        )
        .unwrap();
        assert_eq!(entry.name, "My Movie (2024).mkv");
    }

    #[test]
    fn unix_symlink_drops_target() {
        let entry = parse_list_line(
            "lrwxrwxrwx   1 ftp ftp 11 Jan  5 09:00 current -> builds/v2",
            NOW_MS,
        )
        .unwrap();
        assert_eq!(entry.name, "current");
        assert!(!entry.is_dir);
    }

    #[test]
    fn unix_listing_without_group_column() {
        let entry =
            parse_list_line("-rw-r--r-- 1 owner 2048 Jun 10 08:15 nogroup.dat", NOW_MS).unwrap();
        assert_eq!(entry.name, "nogroup.dat");
        assert_eq!(entry.size, Some(2048));
    }

    #[test]
    fn dos_directory() {
        let entry = parse_list_line(
            "01-15-20  12:34PM       <DIR>          Program Files",
            NOW_MS,
        )
        .unwrap();
        assert!(entry.is_dir);
        assert_eq!(entry.name, "Program Files");
        assert_eq!(entry.size, None);
        assert_eq!(entry.modified_ms, Some(1_579_091_640_000));
    }

    #[test]
    fn dos_file_with_four_digit_year() {
        let entry =
            parse_list_line("09-02-2004  11:22AM             12345 file.bin", NOW_MS).unwrap();
        assert!(!entry.is_dir);
        assert_eq!(entry.size, Some(12345));
        assert_eq!(entry.modified_ms, Some(1_094_124_120_000));
    }

    #[test]
    fn dos_midnight_uses_hour_zero() {
        let entry = parse_list_line("01-01-21  12:05AM  100 x.bin", NOW_MS).unwrap();
        assert_eq!(entry.modified_ms, Some(1_609_459_500_000));
    }

    #[test]
    fn headers_and_garbage_are_skipped() {
        assert_eq!(parse_list_line("total 42", NOW_MS), None);
        assert_eq!(parse_list_line("hello world", NOW_MS), None);
        assert_eq!(parse_list_line("", NOW_MS), None);
    }

    #[test]
    fn dot_entries_are_skipped() {
        assert_eq!(
            parse_list_line("drwxr-xr-x 2 ftp ftp 4096 Jan 01 00:00 .", NOW_MS),
            None
        );
        assert_eq!(
            parse_list_line("drwxr-xr-x 2 ftp ftp 4096 Jan 01 00:00 ..", NOW_MS),
            None
        );
    }
}
