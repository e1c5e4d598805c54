//! Parsers for the cgroup pseudo-files the collector reads.
//!
//! Every function here is tolerant: malformed or missing input yields `None`
//! or an empty map, never an error that could abort a collection cycle.

use std::collections::HashMap;
use std::path::Path;

/// Reads a single-integer file such as `cpuacct.usage` or
/// `cpu.cfs_period_us`. Only the first line is considered.
pub fn read_i64_file(path: &Path) -> Option<i64> {
    let contents = std::fs::read_to_string(path).ok()?;
    parse_first_line_i64(&contents)
}

pub fn parse_first_line_i64(contents: &str) -> Option<i64> {
    contents.lines().next()?.trim().parse().ok()
}

/// Reads a statistics file of `name value` lines (`cpu.stat`,
/// `memory.stat`) into a map keyed by metric name.
///
/// Lines that do not split into exactly a key and an integer are skipped.
/// Keying by name rather than line position keeps the parse immune to
/// kernel-version reordering of the file.
pub fn read_stat_file(path: &Path) -> HashMap<String, i64> {
    match std::fs::read_to_string(path) {
        Ok(contents) => parse_stat_lines(&contents),
        Err(_) => HashMap::new(),
    }
}

pub fn parse_stat_lines(contents: &str) -> HashMap<String, i64> {
    let mut stats = HashMap::new();
    for line in contents.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        if parts.next().is_some() {
            continue;
        }
        if let Ok(value) = value.parse::<i64>() {
            stats.insert(key.to_string(), value);
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_line_only() {
        assert_eq!(parse_first_line_i64("123456789\n"), Some(123456789));
        assert_eq!(parse_first_line_i64("42\n99\n"), Some(42));
        assert_eq!(parse_first_line_i64("  7  \n"), Some(7));
    }

    #[test]
    fn rejects_garbage_integers() {
        assert_eq!(parse_first_line_i64(""), None);
        assert_eq!(parse_first_line_i64("not a number\n"), None);
    }

    #[test]
    fn parses_stat_lines_by_key() {
        let contents = "nr_periods 120\nnr_throttled 4\nthrottled_time 98765\n";
        let stats = parse_stat_lines(contents);
        assert_eq!(stats.get("nr_throttled"), Some(&4));
        assert_eq!(stats.get("throttled_time"), Some(&98765));
        assert_eq!(stats.get("missing"), None);
    }

    #[test]
    fn stat_parse_survives_reordering_and_noise() {
        let contents = "throttled_time 11\n\nbogus line with extras\nnr_throttled 2\nbad notanumber\n";
        let stats = parse_stat_lines(contents);
        assert_eq!(stats.get("throttled_time"), Some(&11));
        assert_eq!(stats.get("nr_throttled"), Some(&2));
        assert_eq!(stats.len(), 2);
    }

    #[test]
    fn missing_file_yields_empty_map() {
        let stats = read_stat_file(Path::new("/nonexistent/cpu.stat"));
        assert!(stats.is_empty());
        assert_eq!(read_i64_file(Path::new("/nonexistent/cpuacct.usage")), None);
    }
}
