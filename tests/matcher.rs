use anyhow::Result;
use oorandom::Rand32;

use SpeedTable::matcher::{search, search_nocase, BoyerMoore};

#[test]
fn finds_needle_after_partial_matches() -> Result<()> {
    assert_eq!(search("abcxabcdabxabcdabcdabcy", "abcdabcy"), Some(15));
    assert_eq!(search("abc", "abcd"), None, "needle longer than haystack");
    assert_eq!(search("", "a"), None);
    assert_eq!(search("abc", ""), Some(0));
    Ok(())
}

#[test]
fn nocase_folds_both_sides() -> Result<()> {
    assert_eq!(search_nocase("Hello WoRLD", "world"), Some(6));
    assert_eq!(search_nocase("Hello WoRLD", "HELLO"), Some(0));
    assert_eq!(search("Hello WoRLD", "world"), None);

    let bm = BoyerMoore::new(b"AbC", true);
    assert!(bm.is_nocase());
    assert_eq!(bm.needle_len(), 3);
    assert!(bm.is_match(b"xxabcxx"));
    Ok(())
}

#[test]
fn find_all_reports_overlapping_hits() -> Result<()> {
    let bm = BoyerMoore::new(b"aa", false);
    assert_eq!(bm.find_all(b"aaaa"), vec![0, 1, 2]);
    let bm = BoyerMoore::new(b"abab", false);
    assert_eq!(bm.find_all(b"abababab"), vec![0, 2, 4]);
    Ok(())
}

fn naive(hay: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    hay.windows(needle.len()).position(|w| w == needle)
}

#[test]
fn random_small_alphabet_agrees_with_naive() -> Result<()> {
    // маленький алфавит — много частичных совпадений и периодичных needle
    let mut rng = Rand32::new(0x5EED_B00F);
    for _ in 0..2000 {
        let hay_len = rng.rand_range(0..40) as usize;
        let needle_len = rng.rand_range(1..7) as usize;
        let hay: Vec<u8> = (0..hay_len).map(|_| b"ab c"[rng.rand_range(0..4) as usize]).collect();
        let needle: Vec<u8> = (0..needle_len)
            .map(|_| b"ab c"[rng.rand_range(0..4) as usize])
            .collect();
        let bm = BoyerMoore::new(&needle, false);
        assert_eq!(
            bm.find(&hay),
            naive(&hay, &needle),
            "hay={:?} needle={:?}",
            String::from_utf8_lossy(&hay),
            String::from_utf8_lossy(&needle)
        );
    }
    Ok(())
}
