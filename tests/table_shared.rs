use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

use SpeedTable::config::TableConfig;
use SpeedTable::share::Share;
use SpeedTable::table::{DynamicSchema, Schema, SharedTableReader, Table, TableError, Value};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let base = std::env::temp_dir();
    base.join(format!("sttest-table-{prefix}-{pid}-{t}-{id}"))
}

fn people() -> Result<DynamicSchema> {
    DynamicSchema::builder().int("age").string("name").build()
}

fn cfg_for(root: &PathBuf) -> TableConfig {
    TableConfig::default()
        .with_share_dir(Some(root.to_string_lossy().to_string()))
        .with_share_size(512 * 1024)
        .with_share_buckets(64)
}

#[test]
fn reader_sees_published_rows() -> Result<()> {
    let root = unique_root("publish");
    let cfg = cfg_for(&root);
    let mut t = Table::new_shared("people", people()?, cfg.clone())?;
    assert!(t.is_shared());

    t.set("k1", &[("age", Value::Int(10)), ("name", Value::Str("ann".into()))])?;
    t.set("k2", &[("age", Value::Int(20)), ("name", Value::Str("bob".into()))])?;
    assert_eq!(t.published_len(), 2);

    let r = SharedTableReader::attach("people", &cfg)?;
    assert_eq!(r.len(), 2);
    assert_eq!(r.schema().fields().len(), 2);

    let k1 = r.get("k1").expect("k1 published");
    assert_eq!(r.field(&k1, "age"), Some(Value::Int(10)));
    assert_eq!(r.field(&k1, "name"), Some(Value::Str("ann".into())));
    assert_eq!(r.field(&k1, "nope"), None);
    // цикл записи совпадает с циклом локальной строки
    assert_eq!(Some(k1.cycle), t.get("k1").and_then(|v| v.cycle()));
    assert!(r.get("k3").is_none());

    let mut keys: Vec<String> = r.rows().into_iter().map(|row| row.key).collect();
    keys.sort();
    assert_eq!(keys, vec!["k1", "k2"]);

    drop(r);
    drop(t);
    Share::unlink("people", &cfg)?;
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn update_replaces_and_delete_unpublishes() -> Result<()> {
    let root = unique_root("update");
    let cfg = cfg_for(&root);
    let mut t = Table::new_shared("upd", people()?, cfg.clone())?;
    t.set("k1", &[("age", Value::Int(1))])?;
    let r = SharedTableReader::attach("upd", &cfg)?;
    let before = r.get("k1").expect("published").cycle;

    // частичное обновление сохраняет остальные поля
    t.set("k1", &[("name", Value::Str("zed".into()))])?;
    let row = r.get("k1").expect("still published");
    assert!(row.cycle > before);
    assert_eq!(r.field(&row, "age"), Some(Value::Int(1)));
    assert_eq!(r.field(&row, "name"), Some(Value::Str("zed".into())));
    assert_eq!(r.len(), 1);

    assert!(t.delete("k1")?);
    assert!(r.get("k1").is_none());
    assert_eq!(r.len(), 0);
    assert!(!t.delete("k1")?);

    drop(r);
    drop(t);
    Share::unlink("upd", &cfg)?;
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn explicit_bracket_groups_changes_into_one_cycle() -> Result<()> {
    let root = unique_root("bracket");
    let cfg = cfg_for(&root);
    let mut t = Table::new_shared("br", people()?, cfg.clone())?;
    let r = SharedTableReader::attach("br", &cfg)?;

    let c = t.write_lock()?;
    for i in 0..10 {
        t.set(&format!("k{i}"), &[("age", Value::Int(i))])?;
    }
    t.write_unlock()?;

    let rows = r.rows();
    assert_eq!(rows.len(), 10);
    assert!(rows.iter().all(|row| row.cycle == c));

    drop(r);
    drop(t);
    Share::unlink("br", &cfg)?;
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn pinned_reader_keeps_old_version_readable() -> Result<()> {
    let root = unique_root("pin");
    let cfg = cfg_for(&root).with_grace_window(0);
    let mut t = Table::new_shared("pin", people()?, cfg.clone())?;
    t.set("k", &[("name", Value::Str("v0".into()))])?;
    let r = SharedTableReader::attach("pin", &cfg)?;

    {
        let guard = r.pin();
        assert_eq!(guard.cycle(), r.share().cycle());
        let old = guard.get("k").expect("published");
        for i in 1..20 {
            t.set("k", &[("name", Value::Str(format!("v{i}")))])?;
        }
        // ни одна из заменённых записей не освобождена под закреплённым читателем
        assert!(t.share().map(|s| s.pending_garbage()).unwrap_or(0) >= 19);
        assert_eq!(r.field(&old, "name"), Some(Value::Str("v0".into())));
        let cur = guard.get("k").expect("published");
        assert_eq!(r.field(&cur, "name"), Some(Value::Str("v19".into())));
    }

    // после снятия guard GC догоняет
    t.write_lock()?;
    let reclaimed = t.write_unlock()?;
    assert!(reclaimed >= 19, "reclaimed {reclaimed}");

    drop(r);
    drop(t);
    Share::unlink("pin", &cfg)?;
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn share_full_leaves_local_row_untouched() -> Result<()> {
    let root = unique_root("full");
    let cfg = cfg_for(&root).with_share_size(64 * 1024).with_share_buckets(16);
    let mut t = Table::new_shared("full", people()?, cfg.clone())?;
    t.set("small", &[("name", Value::Str("tiny".into()))])?;

    let big = "x".repeat(3000);
    let mut stored = 0;
    let err = loop {
        match t.set(&format!("big{stored}"), &[("name", Value::Str(big.clone()))]) {
            Ok(_) => stored += 1,
            Err(e) => break e,
        }
        assert!(stored < 64, "region larger than configured");
    };
    assert!(matches!(err, TableError::ShareFull { .. }), "{err}");
    assert!(stored > 0);
    // строка, не попавшая в share, не появилась и локально
    assert!(t.get(&format!("big{stored}")).is_none());
    assert_eq!(t.len() as u64, t.published_len());

    let err = t
        .set("small", &[("name", Value::Str(big.clone()))])
        .err()
        .expect("no room for the new version");
    assert!(matches!(err, TableError::ShareFull { .. }));
    assert_eq!(
        t.get("small").and_then(|v| v.get("name").cloned()),
        Some(Value::Str("tiny".into()))
    );
    // скобка закрыта и после ошибки
    assert!(!t.share().map(|s| s.in_write()).unwrap_or(true));

    drop(t);
    Share::unlink("full", &cfg)?;
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn attach_without_table_fails() -> Result<()> {
    let root = unique_root("missing");
    let cfg = cfg_for(&root);
    assert!(SharedTableReader::attach("ghost", &cfg).is_err());

    // голый share без опубликованного индекса строк
    let s = Share::create("bare", &cfg)?;
    let err = SharedTableReader::attach("bare", &cfg).err().expect("no row index");
    assert!(format!("{err:#}").contains("row index"), "{err:#}");
    drop(s);
    Share::unlink("bare", &cfg)?;
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn nested_pins_hold_the_outer_cycle() -> Result<()> {
    let root = unique_root("nested");
    let cfg = cfg_for(&root).with_grace_window(0);
    let mut t = Table::new_shared("nest", people()?, cfg.clone())?;
    t.set("k", &[("name", Value::Str("v0".into()))])?;
    let r = SharedTableReader::attach("nest", &cfg)?;

    let outer = r.pin();
    t.set("k", &[("name", Value::Str("v1".into()))])?;
    {
        // внутренний pin не сдвигает цикл внешнего
        let inner = r.pin();
        assert_eq!(inner.cycle(), outer.cycle());
        assert_eq!(r.pin_depth(), 2);
    }
    assert_eq!(r.pin_depth(), 1);

    for i in 2..10 {
        t.set("k", &[("name", Value::Str(format!("v{i}")))])?;
    }
    let writer_horizon = t.share().map(|s| s.horizon());
    assert_eq!(writer_horizon, Some(outer.cycle()));
    // под внешним guard ничего не освобождено
    assert!(t.share().map(|s| s.pending_garbage()).unwrap_or(0) >= 9);
    let cur = outer.get("k").expect("published");
    assert_eq!(r.field(&cur, "name"), Some(Value::Str("v9".into())));

    drop(outer);
    assert_eq!(r.pin_depth(), 0);
    t.write_lock()?;
    assert!(t.write_unlock()? >= 9);

    drop(r);
    drop(t);
    Share::unlink("nest", &cfg)?;
    let _ = fs::remove_dir_all(&root);
    Ok(())
}
