use anyhow::{anyhow, Context, Result};
use clap::Parser;
use env_logger::{Builder, Env};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};

use SpeedTable::config::{parse_size, TableConfig};
use SpeedTable::search::{Component, DelimitedSink, Op, SearchRequest, SortKey};
use SpeedTable::table::{DynamicSchema, Table, Value};
use SpeedTable::util::unique_suffix;

/// SpeedTable micro-benchmark CLI
///
/// Примеры:
///   speedtable_bench --n 200000
///   speedtable_bench --n 50000 --shared --share-size 64M --json
#[derive(Parser, Debug)]
#[command(name = "speedtable_bench", version, about = "SpeedTable micro-bench CLI")]
struct Opt {
    /// Rows to load
    #[arg(long, default_value_t = 100_000)]
    n: u64,

    /// Searches per search phase
    #[arg(long, default_value_t = 200)]
    searches: u64,

    /// Page size (limit) for paged searches
    #[arg(long, default_value_t = 50)]
    page: usize,

    /// Publish rows into a shared-memory region
    #[arg(long, default_value_t = false)]
    shared: bool,

    /// Region size for --shared (K/M/G suffixes)
    #[arg(long, default_value = "64M")]
    share_size: String,

    /// Directory for share files (default: ST_SHARE_DIR or /dev/shm)
    #[arg(long)]
    share_dir: Option<String>,

    /// Rows per write bracket in shared mode
    #[arg(long, default_value_t = 256)]
    bracket: usize,

    /// Random seed
    #[arg(long, default_value_t = 0xA1B2_C3D4_E5F6_7788)]
    seed: u64,

    /// JSON output
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Debug, Clone)]
struct PhaseStats {
    name: String,
    ops: u64,
    elapsed: Duration,
    p50_ms: f64,
    p99_ms: f64,
    tput_ops: f64,
}

fn init_logger() {
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    init_logger();
    if let Err(e) = run() {
        eprintln!("bench error: {:#}", e);
        std::process::exit(1);
    }
}

const CITIES: [&str; 6] = ["Berlin", "Boston", "Lisbon", "Lima", "Oslo", "Osaka"];

fn run() -> Result<()> {
    let opt = Opt::parse();
    if opt.n == 0 {
        return Err(anyhow!("--n must be > 0"));
    }

    // Сброс метрик: отчёт только про текущий прогон.
    SpeedTable::metrics::reset();

    let schema = DynamicSchema::builder()
        .int("age")
        .float("score")
        .string("city")
        .boolean("active")
        .build()?;

    let mut cfg = TableConfig::from_env();
    if opt.shared {
        cfg = cfg
            .with_share_size(parse_size(&opt.share_size).context("--share-size")?)
            .with_share_dir(opt.share_dir.clone());
    }
    let name = format!("bench-{}", unique_suffix());
    let mut table = if opt.shared {
        Table::new_shared(&name, schema, cfg.clone())?
    } else {
        Table::new(&name, schema, cfg.clone())
    };
    info!("bench table '{}' (shared={})", name, opt.shared);

    let mut rng = StdRng::seed_from_u64(opt.seed);
    let keys: Vec<String> = (0..opt.n)
        .map(|i| format!("u-{:016x}-{:08x}", rng.gen::<u64>(), i as u32))
        .collect();

    let mut phases = Vec::new();

    println!("==> Phase: load ({} rows)", keys.len());
    phases.push(phase_load(&mut table, &keys, &mut rng, opt.bracket.max(1))?);

    println!("==> Phase: index (age)");
    let t0 = Instant::now();
    table.index_field("age")?;
    println!("    index built in {:.3}s", t0.elapsed().as_secs_f64());

    println!("==> Phase: get_hits ({} keys)", keys.len());
    phases.push(phase_get(&table, &keys)?);

    println!("==> Phase: search_paged ({} searches)", opt.searches);
    phases.push(phase_search_paged(&table, &mut rng, opt.searches, opt.page)?);

    println!("==> Phase: search_sorted ({} searches)", opt.searches);
    phases.push(phase_search_sorted(&table, &mut rng, opt.searches, opt.page)?);

    println!("==> Phase: search_stream (1 full scan)");
    phases.push(phase_search_stream(&table)?);

    println!("==> Phase: index_range ({} ranges)", opt.searches);
    phases.push(phase_index_range(&table, &mut rng, opt.searches)?);

    if let Err(e) = table.check() {
        return Err(anyhow!("structural check failed: {}", e));
    }

    let stats = table.hash_stats();
    let snap = SpeedTable::metrics::snapshot();
    let published = table.published_len();
    drop(table);
    if opt.shared {
        SpeedTable::share::Share::unlink(&name, &cfg)?;
    }

    if opt.json {
        let report = serde_json::json!({
            "rows": opt.n,
            "shared": opt.shared,
            "published": published,
            "hash": {
                "buckets": stats.buckets,
                "entries": stats.entries,
                "max_chain": stats.max_chain,
            },
            "phases": phases.iter().map(|p| serde_json::json!({
                "name": p.name,
                "ops": p.ops,
                "elapsed_sec": p.elapsed.as_secs_f64(),
                "tput_ops": p.tput_ops,
                "p50_ms": p.p50_ms,
                "p99_ms": p.p99_ms,
            })).collect::<Vec<_>>(),
            "metrics": {
                "hash_growths": snap.hash_growths,
                "skip_inserts": snap.skip_inserts,
                "skip_erases": snap.skip_erases,
                "share_allocs": snap.share_allocs,
                "share_alloc_failures": snap.share_alloc_failures,
                "share_frees_queued": snap.share_frees_queued,
                "gc_reclaimed": snap.gc_reclaimed,
                "searches": snap.searches,
                "rows_matched": snap.rows_matched,
                "rows_delivered": snap.rows_delivered,
            },
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("SpeedTable bench report:");
    println!("  rows         = {}", opt.n);
    println!("  published    = {}", published);
    println!("  hash         = {}", stats);
    println!("Phases:");
    for p in &phases {
        println!(
            "  {:>14}: ops={} elapsed={:.3}s tput={:.0} ops/s p50={:.3}ms p99={:.3}ms",
            p.name,
            p.ops,
            p.elapsed.as_secs_f64(),
            p.tput_ops,
            p.p50_ms,
            p.p99_ms
        );
    }
    println!("Metrics snapshot:");
    println!("  hash_growths           = {}", snap.hash_growths);
    println!("  skip inserts/erases    = {}/{}", snap.skip_inserts, snap.skip_erases);
    println!(
        "  share allocs/failures  = {}/{}",
        snap.share_allocs, snap.share_alloc_failures
    );
    println!(
        "  gc queued/reclaimed    = {}/{} ({:.2})",
        snap.share_frees_queued,
        snap.gc_reclaimed,
        snap.gc_reclaim_ratio()
    );
    println!("  searches               = {}", snap.searches);
    println!("  delivered/search       = {:.2}", snap.delivered_per_search());
    Ok(())
}

// ---------- phases ----------

fn random_row(rng: &mut StdRng) -> [(&'static str, Value); 4] {
    [
        ("age", Value::Int(rng.gen_range(18..90))),
        ("score", Value::Float(rng.gen_range(0.0..100.0))),
        ("city", Value::from(CITIES[rng.gen_range(0..CITIES.len())])),
        ("active", Value::Bool(rng.gen_bool(0.7))),
    ]
}

fn phase_load(table: &mut Table, keys: &[String], rng: &mut StdRng, bracket: usize) -> Result<PhaseStats> {
    let mut lat = Vec::with_capacity(keys.len() / bracket + 1);
    let start = Instant::now();
    for chunk in keys.chunks(bracket) {
        let t0 = Instant::now();
        table.write_lock()?;
        for k in chunk {
            let row = random_row(rng);
            table.set(k, &row)?;
        }
        table.write_unlock()?;
        lat.push(t0.elapsed());
    }
    let st = stats("load", keys.len() as u64, start.elapsed(), &mut lat);
    print_phase_summary(&st);
    Ok(st)
}

fn phase_get(table: &Table, keys: &[String]) -> Result<PhaseStats> {
    let mut lat = Vec::with_capacity(keys.len());
    let start = Instant::now();
    for k in keys {
        let t0 = Instant::now();
        if table.get(k).is_none() {
            return Err(anyhow!("get_hits: missing key {}", k));
        }
        lat.push(t0.elapsed());
    }
    let st = stats("get_hits", keys.len() as u64, start.elapsed(), &mut lat);
    print_phase_summary(&st);
    Ok(st)
}

fn phase_search_paged(table: &Table, rng: &mut StdRng, n: u64, page: usize) -> Result<PhaseStats> {
    let mut lat = Vec::with_capacity(n as usize);
    let start = Instant::now();
    for _ in 0..n {
        let lo: i64 = rng.gen_range(18..80);
        let t0 = Instant::now();
        let out = table.search(
            SearchRequest::new()
                .filter(Component::new("age", Op::Range, vec![lo.into(), (lo + 10).into()]))
                .filter(Component::cmp("city", Op::Match, "l*"))
                .offset(page)
                .limit(page)
                .collect(),
        )?;
        lat.push(t0.elapsed());
        if out.rows.len() > page {
            return Err(anyhow!("search_paged: window overflow ({})", out.rows.len()));
        }
    }
    let st = stats("search_paged", n, start.elapsed(), &mut lat);
    print_phase_summary(&st);
    Ok(st)
}

fn phase_search_sorted(table: &Table, rng: &mut StdRng, n: u64, page: usize) -> Result<PhaseStats> {
    let mut lat = Vec::with_capacity(n as usize);
    let start = Instant::now();
    for _ in 0..n {
        let min: f64 = rng.gen_range(0.0..90.0);
        let t0 = Instant::now();
        let out = table.search(
            SearchRequest::new()
                .filter(Component::cmp("score", Op::Ge, min))
                .filter(Component::cmp("active", Op::Eq, true))
                .sort_by(SortKey::desc("score"))
                .sort_by(SortKey::asc("age"))
                .limit(page)
                .fields(&["score", "age"])
                .collect(),
        )?;
        lat.push(t0.elapsed());
        for w in out.rows.windows(2) {
            let (a, b) = (w[0].values[0].as_float(), w[1].values[0].as_float());
            if a < b {
                return Err(anyhow!("search_sorted: order violated ({:?} < {:?})", a, b));
            }
        }
    }
    let st = stats("search_sorted", n, start.elapsed(), &mut lat);
    print_phase_summary(&st);
    Ok(st)
}

fn phase_search_stream(table: &Table) -> Result<PhaseStats> {
    let mut sink = DelimitedSink::new(std::io::sink());
    let t0 = Instant::now();
    let out = table.search(
        SearchRequest::new()
            .filter(Component::cmp("city", Op::ContainsNocase, "OS"))
            .stream(&mut sink),
    )?;
    let elapsed = t0.elapsed();
    println!("    streamed {} records", sink.records());
    let mut lat = vec![elapsed];
    let st = stats("search_stream", out.delivered, elapsed, &mut lat);
    print_phase_summary(&st);
    Ok(st)
}

fn phase_index_range(table: &Table, rng: &mut StdRng, n: u64) -> Result<PhaseStats> {
    let mut lat = Vec::with_capacity(n as usize);
    let start = Instant::now();
    for _ in 0..n {
        let lo: i64 = rng.gen_range(18..85);
        let t0 = Instant::now();
        let rows = table.index_range("age", &Value::Int(lo), &Value::Int(lo + 5))?;
        lat.push(t0.elapsed());
        if let Some(r) = rows.iter().find(|r| r.get("age").and_then(Value::as_int) < Some(lo)) {
            return Err(anyhow!("index_range: row {} below lower bound", r.key()));
        }
    }
    let st = stats("index_range", n, start.elapsed(), &mut lat);
    print_phase_summary(&st);
    Ok(st)
}

// ---------- helpers ----------

fn print_phase_summary(p: &PhaseStats) {
    println!(
        "    {:>14} done: ops={} elapsed={:.3}s, tput={:.0} ops/s, p50={:.3}ms p99={:.3}ms",
        p.name,
        p.ops,
        p.elapsed.as_secs_f64(),
        p.tput_ops,
        p.p50_ms,
        p.p99_ms
    );
}

fn stats(name: &str, ops: u64, elapsed: Duration, lat: &mut [Duration]) -> PhaseStats {
    lat.sort_unstable();
    let to_ms = |d: Duration| d.as_secs_f64() * 1000.0;
    let p = |q: f64| -> f64 {
        if lat.is_empty() {
            return 0.0;
        }
        let idx = ((lat.len() as f64 - 1.0) * q).round() as usize;
        to_ms(lat[idx])
    };
    let tput = if elapsed.as_secs_f64() > 0.0 {
        ops as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    };
    PhaseStats {
        name: name.to_string(),
        ops,
        elapsed,
        p50_ms: p(0.50),
        p99_ms: p(0.99),
        tput_ops: tput,
    }
}
