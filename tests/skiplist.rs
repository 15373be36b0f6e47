use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use anyhow::Result;
use oorandom::Rand64;

use SpeedTable::skiplist::SkipList;

fn ints(seed: u64) -> SkipList<i64> {
    SkipList::with_seed(16, seed, |a: &i64, b: &i64| a.cmp(b))
}

#[test]
fn inserted_keys_are_findable_and_ordered() -> Result<()> {
    let mut rng = Rand64::new(7);
    let mut sl = ints(7);
    let mut model = BTreeSet::new();
    for _ in 0..5000 {
        let v = rng.rand_range(0..2000) as i64;
        assert_eq!(sl.insert_unique(v), model.insert(v), "insert_unique({})", v);
    }
    assert_eq!(sl.len(), model.len());
    for v in &model {
        assert_eq!(sl.find(v), Some(v));
    }
    assert_eq!(sl.find(&-1), None);

    let got: Vec<i64> = sl.iter().copied().collect();
    assert!(got.windows(2).all(|w| w[0] < w[1]), "traversal must be strictly increasing");
    assert_eq!(got, model.iter().copied().collect::<Vec<_>>());
    sl.check().map_err(anyhow::Error::msg)?;
    Ok(())
}

#[test]
fn erase_non_member_fails() -> Result<()> {
    let mut sl = ints(1);
    for v in [5, 1, 9] {
        sl.insert_unique(v);
    }
    assert!(!sl.erase(&4));
    assert!(sl.erase(&5));
    assert!(!sl.erase(&5));
    assert_eq!(sl.iter().copied().collect::<Vec<_>>(), vec![1, 9]);
    sl.check().map_err(anyhow::Error::msg)?;
    Ok(())
}

#[test]
fn duplicates_only_through_allow_duplicates() -> Result<()> {
    let mut sl = ints(3);
    assert!(sl.insert_unique(10));
    assert!(!sl.insert_unique(10));
    sl.insert_allow_duplicates(10);
    sl.insert_allow_duplicates(3);
    assert_eq!(sl.len(), 3);
    assert_eq!(sl.iter().copied().collect::<Vec<_>>(), vec![3, 10, 10]);

    // обе копии видны и удаляются по одной
    assert!(sl.erase(&10));
    assert_eq!(sl.iter().filter(|&&v| v == 10).count(), 1);
    assert!(sl.erase(&10));
    assert!(!sl.erase(&10));
    sl.check().map_err(anyhow::Error::msg)?;
    Ok(())
}

#[test]
fn cursor_walks_from_reset() -> Result<()> {
    let mut sl = ints(11);
    for v in [30, 10, 20] {
        sl.insert_unique(v);
    }
    assert_eq!(sl.reset().copied(), Some(10));
    assert_eq!(sl.current().copied(), Some(10));
    assert_eq!(sl.advance().copied(), Some(20));
    assert_eq!(sl.advance().copied(), Some(30));
    assert_eq!(sl.advance(), None);
    Ok(())
}

#[test]
fn release_callback_sees_erased_and_cleared_items() -> Result<()> {
    let released = Rc::new(RefCell::new(Vec::new()));
    let mut sl: SkipList<String> = SkipList::with_seed(8, 5, |a: &String, b: &String| a.cmp(b));
    let sink = Rc::clone(&released);
    sl.set_release(move |s| sink.borrow_mut().push(s));
    for s in ["b", "a", "c"] {
        sl.insert_unique(s.to_string());
    }
    assert!(sl.erase(&"b".to_string()));
    sl.clear();
    assert!(sl.is_empty());
    let mut got = released.borrow().clone();
    got.sort();
    assert_eq!(got, vec!["a", "b", "c"]);
    Ok(())
}

#[test]
fn random_erase_keeps_structure_consistent() -> Result<()> {
    let mut rng = Rand64::new(0xBADC0DE);
    let mut sl = ints(0xBADC0DE);
    let mut model = BTreeSet::new();
    for round in 0..20_000 {
        let v = rng.rand_range(0..500) as i64;
        if rng.rand_range(0..3) == 0 {
            assert_eq!(sl.erase(&v), model.remove(&v), "erase({}) at {}", v, round);
        } else {
            assert_eq!(sl.insert_unique(v), model.insert(v));
        }
    }
    sl.check().map_err(anyhow::Error::msg)?;
    assert_eq!(
        sl.iter().copied().collect::<Vec<_>>(),
        model.into_iter().collect::<Vec<_>>()
    );
    Ok(())
}
