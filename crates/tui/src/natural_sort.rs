//! Ordering for names with embedded numbers, so `a9b` sorts before `a10b`.

use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chunk<'a> {
    Digits(&'a str),
    Text(&'a str),
}

fn chunks(value: &str) -> impl Iterator<Item = Chunk<'_>> {
    let mut rest = value;
    std::iter::from_fn(move || {
        let first = rest.chars().next()?;
        let digits = first.is_ascii_digit();
        let end = rest
            .find(|c: char| c.is_ascii_digit() != digits)
            .unwrap_or(rest.len());
        let (head, tail) = rest.split_at(end);
        rest = tail;
        Some(if digits {
            Chunk::Digits(head)
        } else {
            Chunk::Text(head)
        })
    })
}

/// Compare digit runs by value without parsing, so any length works.
fn cmp_digits(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn cmp_chunk(a: Chunk<'_>, b: Chunk<'_>) -> Ordering {
    match (a, b) {
        (Chunk::Digits(a), Chunk::Digits(b)) => cmp_digits(a, b),
        (Chunk::Text(a), Chunk::Text(b)) => a.cmp(b),
        (Chunk::Digits(_), Chunk::Text(_)) => Ordering::Less,
        (Chunk::Text(_), Chunk::Digits(_)) => Ordering::Greater,
    }
}

/// Natural order of two strings. Strings that differ only in leading
/// zeros (`a09`, `a9`) fall back to plain byte order so the result stays
/// a total order.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = chunks(a);
    let mut right = chunks(b);
    loop {
        match (left.next(), right.next()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => match cmp_chunk(x, y) {
                Ordering::Equal => continue,
                other => return other,
            },
        }
    }
}

/// Sort key wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NaturalSort<'a>(pub &'a str);

impl Ord for NaturalSort<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        natural_cmp(self.0, other.0)
    }
}

impl PartialOrd for NaturalSort<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lt(a: &str, b: &str) -> bool {
        NaturalSort(a) < NaturalSort(b)
    }

    #[test]
    fn plain_strings_compare_lexically() {
        assert!(!lt("", ""));
        assert!(lt("a", "b"));
        assert!(!lt("b", "a"));
    }

    #[test]
    fn digit_runs_compare_numerically() {
        assert!(lt("9", "10"));
        assert!(!lt("10", "9"));
        assert!(lt("a9b", "a10b"));
        assert!(!lt("a10b", "a9b"));
        assert!(lt("20240101T00", "20240101T6"));
    }

    #[test]
    fn numbers_before_text_and_prefixes_first() {
        assert!(lt("1", "a"));
        assert!(!lt("a", "1"));
        assert!(lt("a1b2", "a1b2c3"));
        assert!(!lt("a1b2c3", "a1b2"));
    }

    #[test]
    fn equality_and_totality() {
        assert_eq!(NaturalSort("a1b2c3"), NaturalSort("a1b2c3"));
        assert_eq!(natural_cmp("a1b2c3", "a1b2c3"), Ordering::Equal);
        assert_ne!(natural_cmp("a09", "a9"), Ordering::Equal);
        assert_eq!(natural_cmp("a09", "a9"), natural_cmp("a09", "a9"));
        assert_eq!(natural_cmp("a9", "a09"), natural_cmp("a09", "a9").reverse());
    }

    #[test]
    fn sorts_a_realistic_listing() {
        let mut names = vec!["task10", "task2", "Task1", "task1", "2", "10", "b"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, vec!["2", "10", "Task1", "b", "task1", "task2", "task10"]);
    }

    #[test]
    fn huge_numbers_do_not_overflow() {
        assert!(lt("x99999999999999999999999", "x100000000000000000000000"));
    }
}
