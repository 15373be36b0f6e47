use std::path::PathBuf;

use anyhow::Result;

use SpeedTable::config::{parse_size, TableBuilder, TableConfig};
use SpeedTable::consts::{DEFAULT_GRACE_WINDOW, DEFAULT_SHARE_SIZE, SKIP_HARD_MAX_HEIGHT};

#[test]
fn builder_from_default_applies_overrides() -> Result<()> {
    let cfg = TableBuilder::from_default()
        .share_dir(Some("/tmp/st-builder"))
        .share_size(parse_size("8M")?)
        .share_readers(4)
        .share_buckets(128)
        .grace_window(0)
        .skip_max_height(1000)
        .build();

    assert_eq!(cfg.share_dir.as_deref(), Some("/tmp/st-builder"));
    assert_eq!(cfg.share_size, 8 << 20);
    assert_eq!(cfg.share_readers, 4);
    assert_eq!(cfg.share_buckets, 128);
    assert_eq!(cfg.grace_window, 0);
    // высота ограничена жёстким потолком
    assert_eq!(cfg.skip_max_height, SKIP_HARD_MAX_HEIGHT);
    assert_eq!(cfg.resolved_share_dir(), PathBuf::from("/tmp/st-builder"));
    Ok(())
}

#[test]
fn with_setters_chain_on_config() -> Result<()> {
    let cfg = TableConfig::default()
        .with_share_size(1 << 20)
        .with_share_symbols(16)
        .with_grace_window(5)
        .with_skip_third(true)
        .build();
    assert_eq!(cfg.share_size, 1 << 20);
    assert_eq!(cfg.share_symbols, 16);
    assert_eq!(cfg.grace_window, 5);
    assert!(cfg.skip_third);

    let d = TableConfig::default();
    assert_eq!(d.share_size, DEFAULT_SHARE_SIZE);
    assert_eq!(d.grace_window, DEFAULT_GRACE_WINDOW);
    assert!(d.share_dir.is_none());
    // Display не теряет ключевых полей
    let s = d.to_string();
    assert!(s.contains(&format!("grace_window: {DEFAULT_GRACE_WINDOW}")), "{s}");
    Ok(())
}

#[test]
fn env_overrides_and_ignores_garbage() -> Result<()> {
    // единственный тест этого файла, читающий окружение
    std::env::set_var("ST_SHARE_SIZE", "256K");
    std::env::set_var("ST_GRACE_WINDOW", "7");
    std::env::set_var("ST_SHARE_READERS", "not-a-number");
    std::env::set_var("ST_SKIP_THIRD", "yes");

    let cfg = TableConfig::from_env();
    assert_eq!(cfg.share_size, 256 * 1024);
    assert_eq!(cfg.grace_window, 7);
    assert_eq!(cfg.share_readers, TableConfig::default().share_readers);
    assert!(cfg.skip_third);

    // builder стартует от env и перекрывает его
    let cfg = TableBuilder::new().grace_window(1).build();
    assert_eq!(cfg.share_size, 256 * 1024);
    assert_eq!(cfg.grace_window, 1);

    std::env::set_var("ST_SHARE_SIZE", "12X");
    assert_eq!(TableConfig::from_env().share_size, DEFAULT_SHARE_SIZE);

    for k in ["ST_SHARE_SIZE", "ST_GRACE_WINDOW", "ST_SHARE_READERS", "ST_SKIP_THIRD"] {
        std::env::remove_var(k);
    }
    Ok(())
}

#[test]
fn size_literals() -> Result<()> {
    assert_eq!(parse_size("4096")?, 4096);
    assert_eq!(parse_size("64k")?, 64 * 1024);
    assert_eq!(parse_size("2G")?, 2 << 30);
    assert!(parse_size("1.5M").is_err());
    assert!(parse_size("M4").is_err());
    Ok(())
}
