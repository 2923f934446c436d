//! Title similarity for near-duplicate detection.
//!
//! Titles are normalized (lowercase, punctuation stripped, stopwords and short
//! tokens dropped) and compared as character sequences with the
//! Ratcliff/Obershelp "gestalt pattern matching" ratio.

use std::collections::HashMap;

/// Portuguese function words ignored when comparing titles.
const STOPWORDS: &[&str] = &["o", "a", "de", "da", "do", "em", "no", "na", "e", "é", "são"];

/// Tokens shorter than this (in characters) are dropped.
const MIN_TOKEN_CHARS: usize = 3;

/// Normalize a title for comparison. Idempotent.
pub fn normalize_title(title: &str) -> String {
    let cleaned: String = title
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();

    cleaned
        .split_whitespace()
        .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
        .filter(|token| !STOPWORDS.contains(token))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Similarity of two titles in `[0.0, 1.0]`. Symmetric; 0.0 when either
/// title normalizes to nothing.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = normalize_title(a);
    let b = normalize_title(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    // Block matching breaks ties by position, which depends on argument
    // order. A canonical order makes the score symmetric.
    let (first, second) = if a <= b { (&a, &b) } else { (&b, &a) };
    let first: Vec<char> = first.chars().collect();
    let second: Vec<char> = second.chars().collect();
    ratio(&first, &second)
}

/// `2·M / T`, where M is the number of matched characters and T the total length.
pub fn ratio(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let matched = SequenceMatcher::new(a, b).matched_chars();
    (2 * matched) as f64 / total as f64
}

/// A maximal common block: `a[a_start..a_start+len] == b[b_start..b_start+len]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub a_start: usize,
    pub b_start: usize,
    pub len: usize,
}

struct SequenceMatcher<'s> {
    a: &'s [char],
    b: &'s [char],
    /// Positions of every character in `b`, ascending.
    b_index: HashMap<char, Vec<usize>>,
}

impl<'s> SequenceMatcher<'s> {
    fn new(a: &'s [char], b: &'s [char]) -> Self {
        let mut b_index: HashMap<char, Vec<usize>> = HashMap::new();
        for (j, &c) in b.iter().enumerate() {
            b_index.entry(c).or_default().push(j);
        }
        Self { a, b, b_index }
    }

    /// Longest common block inside `a[alo..ahi]` × `b[blo..bhi]`. Ties go to
    /// the block starting earliest in `a`, then earliest in `b`.
    fn longest_match(&self, alo: usize, ahi: usize, blo: usize, bhi: usize) -> Block {
        let mut best = Block {
            a_start: alo,
            b_start: blo,
            len: 0,
        };
        // run_len[j] = length of the common run ending at a[i-1], b[j].
        let mut run_len: HashMap<usize, usize> = HashMap::new();
        for i in alo..ahi {
            let mut next: HashMap<usize, usize> = HashMap::new();
            if let Some(positions) = self.b_index.get(&self.a[i]) {
                for &j in positions {
                    if j < blo {
                        continue;
                    }
                    if j >= bhi {
                        break;
                    }
                    let len = j
                        .checked_sub(1)
                        .and_then(|prev| run_len.get(&prev))
                        .copied()
                        .unwrap_or(0)
                        + 1;
                    next.insert(j, len);
                    if len > best.len {
                        best = Block {
                            a_start: i + 1 - len,
                            b_start: j + 1 - len,
                            len,
                        };
                    }
                }
            }
            run_len = next;
        }
        best
    }

    /// All matching blocks, found by taking the longest match and recursing on
    /// the unmatched regions to its left and right.
    fn matching_blocks(&self) -> Vec<Block> {
        let mut blocks = Vec::new();
        let mut pending = vec![(0, self.a.len(), 0, self.b.len())];
        while let Some((alo, ahi, blo, bhi)) = pending.pop() {
            let block = self.longest_match(alo, ahi, blo, bhi);
            if block.len == 0 {
                continue;
            }
            blocks.push(block);
            let (a_end, b_end) = (block.a_start + block.len, block.b_start + block.len);
            if alo < block.a_start && blo < block.b_start {
                pending.push((alo, block.a_start, blo, block.b_start));
            }
            if a_end < ahi && b_end < bhi {
                pending.push((a_end, ahi, b_end, bhi));
            }
        }
        blocks.sort_by_key(|b| (b.a_start, b.b_start));
        blocks
    }

    fn matched_chars(&self) -> usize {
        self.matching_blocks().iter().map(|b| b.len).sum()
    }
}
