use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

use SpeedTable::config::TableConfig;
use SpeedTable::share::{region_path, Share, ShareError, SymbolKind};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let base = std::env::temp_dir();
    base.join(format!("sttest-share-{prefix}-{pid}-{t}-{id}"))
}

fn cfg_for(root: &PathBuf) -> TableConfig {
    TableConfig::default()
        .with_share_dir(Some(root.to_string_lossy().to_string()))
        .with_share_size(256 * 1024)
        .with_share_readers(8)
}

fn share_err(e: &anyhow::Error) -> Option<&ShareError> {
    e.downcast_ref::<ShareError>()
}

#[test]
fn reader_sees_writer_cycle_and_symbols() -> Result<()> {
    let root = unique_root("symbols");
    let cfg = cfg_for(&root);
    let mut w = Share::create("sym", &cfg)?;
    assert!(w.is_writer());
    assert_eq!(w.writer_pid(), std::process::id());

    let c = w.write_lock()?;
    let off = w.alloc(64).expect("heap has room");
    w.write(off, b"hello shared world")?;
    w.publish_symbol("greeting", SymbolKind::Offset, off)?;
    w.publish_symbol("answer", SymbolKind::Value, 41)?;
    w.publish_symbol("answer", SymbolKind::Value, 42)?;
    w.write_unlock()?;

    let r = Share::attach("sym", &cfg)?;
    assert!(!r.is_writer());
    assert!(r.reader_slot().is_some());
    assert_eq!(r.cycle(), c);
    // дубликат имени — побеждает последняя запись
    let answer = r.lookup_symbol("answer").expect("published");
    assert_eq!((answer.kind, answer.value), (SymbolKind::Value, 42));
    let g = r.lookup_symbol("greeting").expect("published");
    assert_eq!(r.bytes(g.value, 18), Some(&b"hello shared world"[..]));
    assert_eq!(r.symbols().len(), 3);
    assert!(r.lookup_symbol("missing").is_none());

    // читатель не пишет
    let mut r = r;
    assert!(r.alloc(16).is_none());
    assert!(matches!(r.write_lock(), Err(ShareError::NotWriter { .. })));
    assert!(matches!(
        r.publish_symbol("x", SymbolKind::Value, 1),
        Err(ShareError::NotWriter { .. })
    ));

    drop(r);
    drop(w);
    Share::unlink("sym", &cfg)?;
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn freed_block_not_reused_while_reader_pinned() -> Result<()> {
    let root = unique_root("pinned");
    let cfg = cfg_for(&root).with_grace_window(0);
    let mut w = Share::create("pin", &cfg)?;
    let r = Share::attach("pin", &cfg)?;

    w.write_lock()?;
    let a = w.alloc(100).expect("alloc");
    w.write_unlock()?;

    let pinned = r.read_lock();
    assert_eq!(pinned, w.cycle());

    w.write_lock()?;
    w.free(a)?;
    w.write_unlock()?;
    for _ in 0..5 {
        w.write_lock()?;
        let b = w.alloc(100).expect("alloc");
        assert_ne!(a, b, "block reused under a pinned reader");
        w.free(b)?;
        w.write_unlock()?;
    }
    assert!(w.pending_garbage() >= 1);
    assert_eq!(w.horizon(), pinned);

    r.read_unlock();
    let mut reclaimed = 0;
    for _ in 0..3 {
        w.write_lock()?;
        reclaimed += w.write_unlock()?;
    }
    assert_eq!(w.pending_garbage(), 0);
    assert_eq!(reclaimed, 6);

    // после освобождения блок того же класса снова доступен
    w.write_lock()?;
    let mut reused = false;
    for _ in 0..6 {
        if w.alloc(100) == Some(a) {
            reused = true;
        }
    }
    w.write_unlock()?;
    assert!(reused, "reclaimed block must return to its free list");

    drop(r);
    drop(w);
    Share::unlink("pin", &cfg)?;
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn grace_window_delays_reclaim_without_readers() -> Result<()> {
    let root = unique_root("grace");
    let cfg = cfg_for(&root).with_grace_window(2);
    let mut w = Share::create("grace", &cfg)?;
    assert_eq!(w.grace_window(), 2);

    w.write_lock()?;
    let a = w.alloc(32).expect("alloc");
    w.free(a)?;
    // тот же цикл: age 0
    assert_eq!(w.write_unlock()?, 0);
    w.write_lock()?;
    assert_eq!(w.write_unlock()?, 0); // age 1
    w.write_lock()?;
    assert_eq!(w.write_unlock()?, 0); // age 2
    w.write_lock()?;
    assert_eq!(w.write_unlock()?, 1); // age 3 > grace
    assert_eq!(w.pending_garbage(), 0);

    // двойной free — ошибка, а не порча кучи
    w.write_lock()?;
    let b = w.alloc(32).expect("alloc");
    w.free(b)?;
    w.write_unlock()?;
    for _ in 0..4 {
        w.write_lock()?;
        w.write_unlock()?;
    }
    assert!(matches!(w.free(b), Err(ShareError::BadBlock { .. })));

    drop(w);
    Share::unlink("grace", &cfg)?;
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn nested_write_lock_keeps_cycle() -> Result<()> {
    let root = unique_root("nested");
    let cfg = cfg_for(&root);
    let mut w = Share::create("nested", &cfg)?;
    let c1 = w.write_lock()?;
    let c2 = w.write_lock()?;
    assert_eq!(c1, c2);
    assert!(w.in_write());
    w.write_unlock()?;
    assert!(!w.in_write());
    let c3 = w.write_lock()?;
    assert!(c3 != c1);
    w.write_unlock()?;

    // без читателей horizon = текущий цикл
    assert_eq!(w.horizon(), w.cycle());
    drop(w);
    Share::unlink("nested", &cfg)?;
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn heap_exhaustion_is_reported_not_fatal() -> Result<()> {
    let root = unique_root("oom");
    let cfg = cfg_for(&root).with_share_size(64 * 1024);
    let mut w = Share::create("oom", &cfg)?;
    w.write_lock()?;
    let mut blocks = 0;
    while w.alloc(4000).is_some() {
        blocks += 1;
        assert!(blocks < 64, "heap larger than region");
    }
    assert!(blocks > 0);
    // мелкие блоки ещё могут поместиться; огромный — никогда
    assert!(w.alloc(1 << 40).is_none());
    w.write_unlock()?;
    let usage = w.heap_usage();
    assert!(usage.bump_left() < 8192);

    drop(w);
    Share::unlink("oom", &cfg)?;
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn second_writer_is_refused() -> Result<()> {
    let root = unique_root("busy");
    let cfg = cfg_for(&root);
    let w = Share::create("busy", &cfg)?;
    let err = Share::create("busy", &cfg).err().expect("lock must be held");
    assert!(matches!(share_err(&err), Some(ShareError::WriterBusy { .. })), "{err:#}");
    // первый писатель не пострадал
    assert!(w.is_writer());
    assert!(Share::attach("busy", &cfg).is_ok());

    drop(w);
    Share::unlink("busy", &cfg)?;
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn corrupted_or_short_regions_refuse_attach() -> Result<()> {
    let root = unique_root("corrupt");
    let cfg = cfg_for(&root);

    // короткий файл
    fs::create_dir_all(&root)?;
    fs::write(region_path(&root, "short"), [0u8; 16])?;
    let err = Share::attach("short", &cfg).err().expect("undersized");
    assert!(matches!(share_err(&err), Some(ShareError::Undersized { .. })), "{err:#}");

    // испорченный magic
    {
        let _w = Share::create("bad", &cfg)?;
    }
    let path = region_path(&root, "bad");
    let mut f = OpenOptions::new().write(true).open(&path)?;
    f.seek(SeekFrom::Start(0))?;
    f.write_all(b"NOTMAGIC")?;
    f.sync_all()?;
    let err = Share::attach("bad", &cfg).err().expect("bad magic");
    assert!(matches!(share_err(&err), Some(ShareError::BadMagic { .. })), "{err:#}");

    // испорченное поле под checksum
    {
        let _w = Share::create("crc", &cfg)?;
    }
    let path = region_path(&root, "crc");
    let mut f = OpenOptions::new().write(true).open(&path)?;
    f.seek(SeekFrom::Start(28))?; // max_readers
    f.write_all(&999u32.to_le_bytes())?;
    f.sync_all()?;
    let err = Share::attach("crc", &cfg).err().expect("checksum");
    assert!(
        matches!(share_err(&err), Some(ShareError::HeaderChecksum { .. })),
        "{err:#}"
    );

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn double_free_before_reclaim_is_rejected() -> Result<()> {
    let root = unique_root("dfree");
    let cfg = cfg_for(&root).with_grace_window(0);
    let mut w = Share::create("dfree", &cfg)?;

    w.write_lock()?;
    let a = w.alloc(64).expect("alloc");
    w.free(a)?;
    // блок ещё в очереди — второй free не принимается
    assert!(matches!(w.free(a), Err(ShareError::BadBlock { .. })));
    assert_eq!(w.pending_garbage(), 1);
    assert_eq!(w.write_unlock()?, 0);

    w.write_lock()?;
    assert_eq!(w.write_unlock()?, 1);
    assert_eq!(w.pending_garbage(), 0);

    w.write_lock()?;
    assert_eq!(w.alloc(64), Some(a));
    w.free(a)?;
    w.write_unlock()?;

    // читатель не освобождает
    let mut r = Share::attach("dfree", &cfg)?;
    assert!(matches!(r.free(a), Err(ShareError::NotWriter { .. })));

    drop(r);
    drop(w);
    Share::unlink("dfree", &cfg)?;
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn recreate_leaves_old_readers_on_previous_region() -> Result<()> {
    let root = unique_root("recreate");
    let cfg = cfg_for(&root);

    let mut w1 = Share::create("gen", &cfg)?;
    let c1 = w1.write_lock()?;
    w1.publish_symbol("generation", SymbolKind::Value, 1)?;
    w1.write_unlock()?;
    let old = Share::attach("gen", &cfg)?;
    drop(w1);

    // новый писатель с регионом меньшего размера
    let mut w2 = Share::create("gen", &cfg.clone().with_share_size(64 * 1024))?;
    w2.write_lock()?;
    w2.publish_symbol("generation", SymbolKind::Value, 2)?;
    w2.write_unlock()?;

    // старый маппинг смотрит на прежний файл
    assert_eq!(old.cycle(), c1);
    assert_eq!(old.lookup_symbol("generation").map(|s| s.value), Some(1));

    let fresh = Share::attach("gen", &cfg)?;
    assert_eq!(fresh.lookup_symbol("generation").map(|s| s.value), Some(2));
    assert_eq!(fs::metadata(region_path(&root, "gen"))?.len(), 64 * 1024);

    drop(fresh);
    drop(old);
    drop(w2);
    Share::unlink("gen", &cfg)?;
    let _ = fs::remove_dir_all(&root);
    Ok(())
}
