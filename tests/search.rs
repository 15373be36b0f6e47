use std::cell::RefCell;

use anyhow::Result;

use SpeedTable::config::TableConfig;
use SpeedTable::search::{
    Component, DelimitedSink, Op, RecordSink, SearchError, SearchRequest, SnippetOutcome, SortKey,
};
use SpeedTable::table::{DynamicSchema, Table, Value};

fn ages() -> Result<Table> {
    let schema = DynamicSchema::builder().int("age").string("name").build()?;
    let mut t = Table::new("ages", schema, TableConfig::default());
    t.set("k1", &[("age", Value::Int(30)), ("name", "ann".into())])?;
    t.set("k2", &[("age", Value::Int(20)), ("name", "bob".into())])?;
    t.set("k3", &[("age", Value::Int(40)), ("name", "Cleo".into())])?;
    Ok(t)
}

fn keys(out: &SpeedTable::search::SearchOutcome) -> Vec<String> {
    out.rows.iter().filter_map(|r| r.key.clone()).collect()
}

#[test]
fn sorted_window_delivers_smallest_match() -> Result<()> {
    let t = ages()?;
    let out = t.search(
        SearchRequest::new()
            .filter(Component::cmp("age", Op::Ge, 25))
            .sort_by(SortKey::asc("age"))
            .limit(1)
            .collect(),
    )?;
    assert_eq!(keys(&out), vec!["k1".to_string()]);
    assert_eq!(out.rows[0].values[0], Value::Int(30));
    assert_eq!(out.matched, 2);
    assert_eq!(out.delivered, 1);
    Ok(())
}

#[test]
fn count_only_counts_matches() -> Result<()> {
    let t = ages()?;
    let out = t.search(
        SearchRequest::new()
            .filter(Component::cmp("age", Op::Ge, 25))
            .count_only(),
    )?;
    assert_eq!(out.count, 2);
    assert_eq!(out.delivered, 0);
    assert!(out.rows.is_empty());
    Ok(())
}

#[test]
fn offset_skips_first_row_in_result_order() -> Result<()> {
    let t = ages()?;
    let all = t.search(SearchRequest::new().collect())?;
    let paged = t.search(SearchRequest::new().offset(1).limit(10).collect())?;
    assert_eq!(all.rows.len(), 3);
    assert_eq!(keys(&paged), keys(&all)[1..].to_vec());

    // то же для sort-then-page
    let sorted = t.search(
        SearchRequest::new()
            .sort_by(SortKey::desc("age"))
            .offset(1)
            .limit(10)
            .collect(),
    )?;
    assert_eq!(keys(&sorted), vec!["k1".to_string(), "k2".to_string()]);

    // offset за пределами числа совпадений — пусто, не ошибка
    let empty = t.search(
        SearchRequest::new()
            .sort_by(SortKey::asc("age"))
            .offset(5)
            .collect(),
    )?;
    assert!(empty.rows.is_empty());
    assert_eq!(empty.matched, 3);
    Ok(())
}

#[test]
fn zero_limit_is_unbounded_and_limit_short_circuits() -> Result<()> {
    let t = ages()?;
    let out = t.search(SearchRequest::new().limit(0).collect())?;
    assert_eq!(out.rows.len(), 3);

    let out = t.search(SearchRequest::new().limit(2).collect())?;
    assert_eq!(out.rows.len(), 2);
    // on-the-fly: скан остановлен на втором совпадении
    assert_eq!(out.matched, 2);
    Ok(())
}

#[test]
fn multi_key_sort_breaks_ties_by_next_field() -> Result<()> {
    let schema = DynamicSchema::builder().string("team").int("score").build()?;
    let mut t = Table::new("teams", schema, TableConfig::default());
    for (k, team, score) in [
        ("a", "red", 5),
        ("b", "blue", 7),
        ("c", "red", 9),
        ("d", "blue", 1),
        ("e", "green", 3),
    ] {
        t.set(k, &[("team", team.into()), ("score", Value::Int(score))])?;
    }
    let out = t.search(
        SearchRequest::new()
            .sort_by(SortKey::asc("team"))
            .sort_by(SortKey::parse("-score"))
            .collect(),
    )?;
    assert_eq!(keys(&out), vec!["b", "d", "e", "c", "a"]);
    Ok(())
}

#[test]
fn operators_filter_as_expected() -> Result<()> {
    let schema = DynamicSchema::builder().int("age").string("name").build()?;
    let mut t = Table::new("ops", schema, TableConfig::default());
    t.set("a", &[("age", Value::Int(10)), ("name", "Alice".into())])?;
    t.set("b", &[("age", Value::Int(20)), ("name", "bob".into())])?;
    t.set("c", &[("name", "carol".into())])?; // age = null

    let count = |c: Component| -> Result<u64> {
        Ok(t.search(SearchRequest::new().filter(c).count_only())?.count)
    };

    assert_eq!(count(Component::constant(true))?, 3);
    assert_eq!(count(Component::constant(false))?, 0);
    assert_eq!(count(Component::new("age", Op::Null, vec![]))?, 1);
    assert_eq!(count(Component::new("age", Op::NotNull, vec![]))?, 2);
    assert_eq!(count(Component::cmp("age", Op::Lt, 20))?, 1);
    assert_eq!(count(Component::cmp("age", Op::Le, 20))?, 2);
    assert_eq!(count(Component::cmp("age", Op::Ne, 10))?, 1);
    assert_eq!(count(Component::cmp("age", Op::Gt, "15"))?, 1);
    assert_eq!(count(Component::cmp("name", Op::Match, "a*"))?, 1);
    assert_eq!(count(Component::cmp("name", Op::MatchCase, "a*"))?, 0);
    assert_eq!(count(Component::cmp("name", Op::NotMatch, "*o*"))?, 1);
    assert_eq!(count(Component::cmp("name", Op::Contains, "ro"))?, 1);
    assert_eq!(count(Component::cmp("name", Op::ContainsNocase, "LI"))?, 1);
    assert_eq!(
        count(Component::new("age", Op::Range, vec![10.into(), 20.into()]))?,
        1
    );
    assert_eq!(
        count(Component::new("age", Op::In, vec![20.into(), 30.into()]))?,
        1
    );
    assert_eq!(count(Component::from_words(&[">=", "age", "10"])?)?, 2);
    Ok(())
}

#[test]
fn key_glob_prefilters_rows() -> Result<()> {
    let schema = DynamicSchema::builder().int("n").build()?;
    let mut t = Table::new("glob", schema, TableConfig::default());
    for k in ["user.1", "user.2", "group.1", "user.10"] {
        t.set(k, &[("n", Value::Int(1))])?;
    }
    let out = t.search(
        SearchRequest::new()
            .key_glob("user.?")
            .sort_by(SortKey::asc("n"))
            .collect(),
    )?;
    let mut got = keys(&out);
    got.sort();
    assert_eq!(got, vec!["user.1", "user.2"]);
    Ok(())
}

#[test]
fn projection_and_key_toggle() -> Result<()> {
    let t = ages()?;
    let out = t.search(
        SearchRequest::new()
            .filter(Component::cmp("name", Op::Eq, "bob"))
            .fields(&["name"])
            .include_key(false)
            .collect(),
    )?;
    assert_eq!(out.columns, vec!["name".to_string()]);
    assert_eq!(out.rows[0].key, None);
    assert_eq!(out.rows[0].values, vec![Value::from("bob")]);

    let out = t.search(
        SearchRequest::new()
            .filter(Component::cmp("name", Op::Eq, "bob"))
            .keys_only()
            .collect(),
    )?;
    assert_eq!(out.rows[0].key.as_deref(), Some("k2"));
    assert!(out.rows[0].values.is_empty());
    Ok(())
}

#[test]
fn snippet_stop_ends_successfully_and_error_aborts() -> Result<()> {
    let t = ages()?;
    let seen = RefCell::new(Vec::new());
    let out = t.search(
        SearchRequest::new()
            .sort_by(SortKey::asc("age"))
            .fields(&["age"])
            .snippet(|b| {
                seen.borrow_mut()
                    .push((b.key().map(str::to_string), b.get("age").cloned()));
                if seen.borrow().len() == 2 {
                    SnippetOutcome::Stop
                } else {
                    SnippetOutcome::Continue
                }
            }),
    )?;
    assert!(out.stopped);
    assert_eq!(out.delivered, 2);
    assert_eq!(
        seen.into_inner(),
        vec![
            (Some("k2".to_string()), Some(Value::Int(20))),
            (Some("k1".to_string()), Some(Value::Int(30))),
        ]
    );

    let mut calls = 0;
    let res = t.search(SearchRequest::new().snippet(|b| {
        calls += 1;
        assert_eq!(b.positional(0), b.get("age"));
        SnippetOutcome::Error("boom".into())
    }));
    assert!(matches!(res, Err(SearchError::Snippet(ref m)) if m == "boom"));
    assert_eq!(calls, 1);
    Ok(())
}

#[test]
fn stream_writes_delimited_records() -> Result<()> {
    let t = ages()?;
    let mut sink = DelimitedSink::new(Vec::new());
    let out = t.search(
        SearchRequest::new()
            .sort_by(SortKey::asc("age"))
            .stream(&mut sink),
    )?;
    assert_eq!(out.delivered, 3);
    assert_eq!(sink.records(), 3);
    let text = String::from_utf8(sink.into_inner())?;
    assert_eq!(text, "k2\t20\tbob\nk1\t30\tann\nk3\t40\tCleo\n");
    Ok(())
}

struct FailingSink {
    writes: usize,
}

impl RecordSink for FailingSink {
    fn write_record(&mut self, _fields: &[&str]) -> std::io::Result<()> {
        self.writes += 1;
        if self.writes == 2 {
            return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"));
        }
        Ok(())
    }
}

#[test]
fn sink_failure_aborts_search() -> Result<()> {
    let t = ages()?;
    let mut sink = FailingSink { writes: 0 };
    let res = t.search(SearchRequest::new().stream(&mut sink));
    assert!(matches!(res, Err(SearchError::Sink(_))));
    assert_eq!(sink.writes, 2);
    Ok(())
}

#[test]
fn invalid_requests_rejected_before_rows_are_touched() -> Result<()> {
    let t = ages()?;
    let mut calls = 0;
    let res = t.search(
        SearchRequest::new()
            .filter(Component::cmp("nope", Op::Eq, 1))
            .snippet(|_| {
                calls += 1;
                SnippetOutcome::Continue
            }),
    );
    assert!(matches!(res, Err(SearchError::UnknownField(_))));
    assert_eq!(calls, 0);

    assert!(matches!(
        t.search(SearchRequest::new().count_only().sort_by(SortKey::asc("age"))),
        Err(SearchError::Conflict(_, _))
    ));
    assert!(matches!(
        t.search(SearchRequest::new().filter(Component::cmp("age", Op::Eq, 1))),
        Err(SearchError::NoDelivery)
    ));
    assert!(matches!(
        t.search(SearchRequest::new().collect().sort_by(SortKey::asc("height"))),
        Err(SearchError::UnknownField(_))
    ));
    assert!(matches!(
        t.search(
            SearchRequest::new()
                .collect()
                .filter(Component::new("age", Op::In, vec![]))
        ),
        Err(SearchError::Arity { .. })
    ));
    Ok(())
}
