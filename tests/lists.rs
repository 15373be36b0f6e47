use std::collections::HashSet;

use anyhow::Result;
use oorandom::Rand32;

use SpeedTable::config::TableConfig;
use SpeedTable::table::{DynamicSchema, Table, TableError, Value};

fn table_with_rows(n: usize) -> Result<Table> {
    let schema = DynamicSchema::builder().int("n").build()?;
    let mut t = Table::new("lists", schema, TableConfig::default());
    for i in 0..n {
        t.set(&format!("r{i}"), &[("n", Value::Int(i as i64))])?;
    }
    Ok(t)
}

fn shuffle(rng: &mut Rand32, v: &mut [usize]) {
    for i in (1..v.len()).rev() {
        let j = rng.rand_range(0..(i as u32 + 1)) as usize;
        v.swap(i, j);
    }
}

#[test]
fn push_front_then_remove_leaves_empty() -> Result<()> {
    let mut t = table_with_rows(1)?;
    t.define_list("todo")?;
    assert!(t.list_push_front("todo", "r0")?);
    assert!(!t.list_push_front("todo", "r0")?, "row already in list");
    assert!(t.list_remove("todo", "r0")?);
    assert!(!t.list_remove("todo", "r0")?);
    assert_eq!(t.list_len("todo")?, 0);
    assert!(t.list_keys("todo")?.is_empty());
    t.check().map_err(anyhow::Error::msg)?;
    Ok(())
}

#[test]
fn random_permutations_keep_expected_survivors() -> Result<()> {
    let n = 24;
    let mut rng = Rand32::new(0x1157);
    for round in 0..200 {
        let mut t = table_with_rows(n)?;
        t.define_list("main")?;

        let mut order: Vec<usize> = (0..n).collect();
        shuffle(&mut rng, &mut order);
        let mut expected: Vec<usize> = Vec::new();
        for &i in &order {
            // чередуем голову и хвост
            if rng.rand_range(0..2) == 0 {
                t.list_push_front("main", &format!("r{i}"))?;
                expected.insert(0, i);
            } else {
                t.list_push_back("main", &format!("r{i}"))?;
                expected.push(i);
            }
        }

        let mut victims: Vec<usize> = (0..n).collect();
        shuffle(&mut rng, &mut victims);
        victims.truncate(rng.rand_range(0..n as u32) as usize);
        for &i in &victims {
            assert!(t.list_remove("main", &format!("r{i}"))?, "round {round}: remove r{i}");
        }
        let gone: HashSet<usize> = victims.into_iter().collect();
        expected.retain(|i| !gone.contains(i));

        let want: Vec<String> = expected.iter().map(|i| format!("r{i}")).collect();
        assert_eq!(t.list_keys("main")?, want, "round {round}");
        assert_eq!(t.list_len("main")?, want.len());
        t.check().map_err(anyhow::Error::msg)?;
    }
    Ok(())
}

#[test]
fn insert_before_after_and_membership_in_two_lists() -> Result<()> {
    let mut t = table_with_rows(5)?;
    t.define_list("a")?;
    t.define_list("b")?;
    assert!(matches!(t.define_list("a"), Err(TableError::DuplicateList(_))));

    t.list_push_back("a", "r0")?;
    t.list_push_back("a", "r4")?;
    assert!(t.list_insert_after("a", "r0", "r1")?);
    assert!(t.list_insert_before("a", "r4", "r3")?);
    assert!(t.list_insert_before("a", "r3", "r2")?);
    // existing не в списке
    assert!(!t.list_insert_after("b", "r0", "r1")?);

    t.list_push_front("b", "r2")?;
    t.list_push_front("b", "r0")?;

    assert_eq!(t.list_keys("a")?, vec!["r0", "r1", "r2", "r3", "r4"]);
    assert_eq!(t.list_keys("b")?, vec!["r0", "r2"]);
    assert_eq!(t.list_names(), vec!["a", "b"]);

    // удаление строки убирает её из всех списков
    assert!(t.delete("r2")?);
    assert_eq!(t.list_keys("a")?, vec!["r0", "r1", "r3", "r4"]);
    assert_eq!(t.list_keys("b")?, vec!["r0"]);
    t.check().map_err(anyhow::Error::msg)?;

    assert!(matches!(t.list_push_back("nope", "r0"), Err(TableError::UnknownList(_))));
    assert!(matches!(t.list_push_back("a", "zz"), Err(TableError::UnknownKey(_))));
    Ok(())
}

#[test]
fn index_follows_updates_and_deletes() -> Result<()> {
    let mut t = table_with_rows(0)?;
    for (k, n) in [("x", 5), ("y", 1), ("z", 3), ("w", 3)] {
        t.set(k, &[("n", Value::Int(n))])?;
    }
    t.index_field("n")?;
    assert!(matches!(t.index_field("n"), Err(TableError::DuplicateIndex(_))));

    let order = |t: &Table| -> Result<Vec<String>> {
        Ok(t.index_scan("n")?.iter().map(|r| r.key().to_string()).collect())
    };
    // равные значения упорядочены по ключу
    assert_eq!(order(&t)?, vec!["y", "w", "z", "x"]);

    t.set("y", &[("n", Value::Int(9))])?;
    t.delete("z")?;
    t.set("v", &[("n", Value::Int(4))])?;
    assert_eq!(order(&t)?, vec!["w", "v", "x", "y"]);

    let mid: Vec<String> = t
        .index_range("n", &Value::Int(4), &Value::Int(9))?
        .iter()
        .map(|r| r.key().to_string())
        .collect();
    assert_eq!(mid, vec!["v", "x"]);
    assert!(matches!(t.index_scan("nope"), Err(TableError::UnknownField(_))));
    t.check().map_err(anyhow::Error::msg)?;
    Ok(())
}
