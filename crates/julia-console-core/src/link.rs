//! Path-like link candidates in terminal output.
//!
//! This is the pure half of link handling: [`find_candidates`] scans one line
//! of rendered text and returns every `<path>[:<line>]` substring the
//! platform grammar accepts. Whether a candidate is actually a link is
//! decided later by asking the runtime.
//!
//! Both grammars reject whitespace and the shell metacharacters
//! ``!$`&*()[]+'":;`` inside path segments, so a match never crosses a
//! line break.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::Platform;

lazy_static! {
    static ref POSIX_LINK: Regex = Regex::new(
        r#"(?P<path>((\.\.?|~)|([^\x00\s!$`&*()\[\]+'":;\\])+)?(/([^\x00\s!$`&*()\[\]+'":;\\])+)+)(:(?P<line>\d+))?"#
    )
    .unwrap();
    static ref WINDOWS_LINK: Regex = Regex::new(
        r#"(?P<path>(([a-zA-Z]:|\.\.?|~)|([^\x00<>?|/\s!$`&*()\[\]+'":;])+)?((\\|/)([^\x00<>?|/\s!$`&*()\[\]+'":;])+)+)(:(?P<line>\d+))?"#
    )
    .unwrap();
}

impl Platform {
    fn link_regex(&self) -> &'static Regex {
        match self {
            Platform::Posix => &POSIX_LINK,
            Platform::Windows => &WINDOWS_LINK,
        }
    }
}

/// A path-shaped substring found in terminal output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkMatch {
    /// Full matched text, including any `:<line>` suffix
    pub text: String,
    /// The path part of the match
    pub path: String,
    /// 1-based line number from a trailing `:<line>`
    pub line: Option<u32>,
    /// First column of the match (in characters)
    pub start: usize,
    /// Column one past the end of the match (in characters)
    pub end: usize,
}

impl LinkMatch {
    /// 0-based line the editor should open at.
    ///
    /// A match without a line suffix opens at the top of the file.
    pub fn open_line(&self) -> u32 {
        self.line.map(|n| n.saturating_sub(1)).unwrap_or(0)
    }

    /// Whether `col` falls inside this match.
    pub fn contains_col(&self, col: usize) -> bool {
        col >= self.start && col < self.end
    }
}

/// Find every link candidate in a single line of text.
///
/// Text containing newlines is scanned line by line; columns are relative to
/// the start of the line the match sits on.
pub fn find_candidates(text: &str, platform: Platform) -> Vec<LinkMatch> {
    text.lines()
        .flat_map(|line| find_in_line(line, platform))
        .collect()
}

fn find_in_line(line: &str, platform: Platform) -> Vec<LinkMatch> {
    platform
        .link_regex()
        .captures_iter(line)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let path = caps.name("path")?;
            let start = line[..whole.start()].chars().count();
            Some(LinkMatch {
                text: whole.as_str().to_string(),
                path: path.as_str().to_string(),
                line: caps.name("line").and_then(|n| n.as_str().parse().ok()),
                start,
                end: start + whole.as_str().chars().count(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn posix(text: &str) -> Vec<LinkMatch> {
        find_candidates(text, Platform::Posix)
    }

    fn windows(text: &str) -> Vec<LinkMatch> {
        find_candidates(text, Platform::Windows)
    }

    #[test]
    fn test_posix_absolute_path_with_line() {
        let found = posix("ERROR: LoadError at /home/user/proj/src/main.jl:42");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, "/home/user/proj/src/main.jl");
        assert_eq!(found[0].line, Some(42));
        assert_eq!(found[0].text, "/home/user/proj/src/main.jl:42");
        assert_eq!(found[0].start, 20);
        assert_eq!(found[0].end, 20 + found[0].text.len());
    }

    #[test]
    fn test_posix_relative_and_home_paths() {
        let found = posix("see ./src/a.jl and ~/b.jl and ../c/d.jl:3");
        let paths: Vec<&str> = found.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(paths, vec!["./src/a.jl", "~/b.jl", "../c/d.jl"]);
        assert_eq!(found[2].line, Some(3));
    }

    #[test]
    fn test_posix_stops_at_metacharacters() {
        let found = posix(r#"include("/tmp/x.jl")"#);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, "/tmp/x.jl");

        let found = posix("[1] top-level scope @ /a/b.jl:7;");
        assert_eq!(found[0].text, "/a/b.jl:7");
    }

    #[test]
    fn test_posix_rejects_plain_words() {
        assert!(posix("julia> 1 + 2").is_empty());
        assert!(posix("no slashes here").is_empty());
    }

    #[test]
    fn test_never_spans_lines() {
        let found = posix("/a/b\n/c/d.jl:1");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].text, "/a/b");
        assert_eq!(found[1].text, "/c/d.jl:1");
        assert_eq!(found[1].start, 0);
    }

    #[test]
    fn test_windows_drive_path() {
        let found = windows(r"at C:\Users\me\proj\main.jl:12");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, r"C:\Users\me\proj\main.jl");
        assert_eq!(found[0].line, Some(12));
    }

    #[test]
    fn test_windows_forward_slashes_and_unc() {
        let found = windows(r"D:/work/x.jl and \\server\share\y.jl");
        let paths: Vec<&str> = found.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(paths, vec!["D:/work/x.jl", r"\\server\share\y.jl"]);
    }

    #[test]
    fn test_windows_rejects_reserved_characters() {
        let found = windows(r"C:\a<b\c.jl");
        assert_eq!(found[0].path, r"C:\a");
    }

    #[test]
    fn test_open_line() {
        let with_line = &posix("/x/y.jl:10")[0];
        assert_eq!(with_line.open_line(), 9);

        let first_line = &posix("/x/y.jl:1")[0];
        assert_eq!(first_line.open_line(), 0);

        let without = &posix("/x/y.jl")[0];
        assert_eq!(without.line, None);
        assert_eq!(without.open_line(), 0);

        let zero = &posix("/x/y.jl:0")[0];
        assert_eq!(zero.open_line(), 0);
    }

    #[test]
    fn test_contains_col() {
        let m = &posix("at /x/y.jl")[0];
        assert!(!m.contains_col(2));
        assert!(m.contains_col(3));
        assert!(m.contains_col(9));
        assert!(!m.contains_col(10));
    }

    #[test]
    fn test_columns_count_characters() {
        let found = posix("λλ /é/ü.jl");
        assert_eq!(found[0].start, 3);
        assert_eq!(found[0].end, 10);
    }
}
