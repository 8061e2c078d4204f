use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tidal::align::{Align, AlignmentPeriod, FillMode};
use tidal::derive::Rate;
use tidal::expr::{NumericOp, Project};
use tidal::join::JoinSource;
use tidal::reduce::{ReduceSource, ReductionType};
use tidal::{
    DataType, Datasource, EngineConfig, ExecContext, Expr, FieldDescriptor, Pipeline, QueryError,
    SeriesStore,
};

const HOSTS: &[&str] = &["web-1", "web-2", "web-3", "db-1", "db-2", "cache-1", "api-1", "api-2"];

/// Irregular, monotonically increasing request counters
fn generate_series(
    store: &SeriesStore,
    name: &str,
    points: usize,
    seed: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut rng = StdRng::seed_from_u64(seed);
    store.create_series(FieldDescriptor::new(name, DataType::Decimal).with_unit("req"))?;

    let mut ts: DateTime<Utc> = Utc
        .timestamp_opt(1_700_000_000, 0)
        .single()
        .ok_or("invalid start time")?;
    let mut counter = 0.0;
    let samples = (0..points).map(|_| {
        ts += ChronoDuration::milliseconds(rng.gen_range(500..20_000));
        counter += rng.gen_range(0.0..500.0);
        (ts, tidal::Value::Decimal(counter))
    });
    let inserted = store.insert_batch(name, samples.collect::<Vec<_>>())?;
    if inserted < points {
        eprintln!("  {} samples rejected for {}", points - inserted, name);
    }
    Ok(())
}

struct BenchmarkStats {
    total_rows: usize,
    total_duration: Duration,
    run_latencies: Vec<Duration>,
}

impl BenchmarkStats {
    fn rows_per_sec(&self) -> f64 {
        self.total_rows as f64 / self.total_duration.as_secs_f64()
    }

    fn avg_latency(&self) -> Duration {
        let sum: Duration = self.run_latencies.iter().sum();
        sum / self.run_latencies.len().max(1) as u32
    }

    fn min_latency(&self) -> Duration {
        self.run_latencies.iter().min().copied().unwrap_or_default()
    }

    fn max_latency(&self) -> Duration {
        self.run_latencies.iter().max().copied().unwrap_or_default()
    }

    fn percentile(&self, pct: usize) -> Duration {
        let mut sorted = self.run_latencies.clone();
        sorted.sort();
        sorted
            .get(sorted.len() * pct / 100)
            .or(sorted.last())
            .copied()
            .unwrap_or_default()
    }

    fn print(&self) {
        println!("done");
        println!("  Rows/sec:    {:.0}", self.rows_per_sec());
        println!("  Total time:  {:?}", self.total_duration);
        println!(
            "  Latency:     avg={:?} min={:?} max={:?}",
            self.avg_latency(),
            self.min_latency(),
            self.max_latency()
        );
        println!(
            "  Percentiles: p50={:?} p99={:?}",
            self.percentile(50),
            self.percentile(99)
        );
        println!();
    }
}

/// Run `job` `runs` times across the rayon pool; each run returns its row count
fn bench<F>(
    label: &str,
    runs: usize,
    job: F,
) -> Result<BenchmarkStats, Box<dyn std::error::Error>>
where
    F: Fn(usize) -> Result<usize, QueryError> + Sync,
{
    print!("Benchmarking {}... ", label);
    std::io::Write::flush(&mut std::io::stdout())?;

    let start = Instant::now();
    let results = (0..runs)
        .into_par_iter()
        .map(|i| {
            let run_start = Instant::now();
            job(i).map(|rows| (rows, run_start.elapsed()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(BenchmarkStats {
        total_rows: results.iter().map(|(rows, _)| rows).sum(),
        total_duration: start.elapsed(),
        run_latencies: results.into_iter().map(|(_, latency)| latency).collect(),
    })
}

fn count(source: &dyn Datasource) -> Result<usize, QueryError> {
    let result = source.execute(&ExecContext::default())?;
    let mut rows = 0;
    for sample in result.samples {
        sample?;
        rows += 1;
    }
    Ok(rows)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    let points_per_series: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(100_000);
    let runs: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(32);
    let config = EngineConfig::from_env();
    config.init_tracing();

    println!("Tidal Benchmark");
    println!("===============");
    println!("Series:          {}", HOSTS.len());
    println!("Points/series:   {}", points_per_series);
    println!("Runs:            {}", runs);
    println!("Threads:         {}", rayon::current_num_threads());
    println!();

    let store = SeriesStore::new();
    for (i, host) in HOSTS.iter().enumerate() {
        generate_series(&store, host, points_per_series, 12345 + i as u64)?;
    }

    let minute: Arc<dyn AlignmentPeriod> = config.fixed_period(ChronoDuration::minutes(1))?;
    let sources = HOSTS
        .iter()
        .map(|host| store.source(host).map(|s| Arc::new(s) as Arc<dyn Datasource>))
        .collect::<Result<Vec<_>, _>>()?;
    let aligned = |i: usize| -> Arc<dyn Datasource> {
        Arc::new(
            Pipeline::new(Arc::clone(&sources[i % sources.len()]))
                .with_filter(Align::new(Arc::clone(&minute)))
                .with_filter(config.gap_fill(Arc::clone(&minute), FillMode::Linear)),
        )
    };

    bench("align + gap fill", runs, |i| count(aligned(i).as_ref()))?.print();

    bench("rate", runs, |i| {
        let pipeline = Pipeline::new(aligned(i)).with_filter(Rate);
        count(&pipeline)
    })?
    .print();

    bench("3-way join", runs, |i| {
        let join = JoinSource::inner(vec![aligned(i), aligned(i + 1), aligned(i + 2)]);
        let urn = |k: usize| HOSTS[(i + k) % HOSTS.len()];
        let total = Expr::numeric(
            NumericOp::Add,
            Expr::numeric(NumericOp::Add, Expr::reference(urn(0)), Expr::reference(urn(1))),
            Expr::reference(urn(2)),
        );
        let pipeline =
            Pipeline::new(Arc::new(join)).with_filter(Project::new().column_as("total", total));
        count(&pipeline)
    })?
    .print();

    for reduction in [ReductionType::Sum, ReductionType::Avg, ReductionType::Max] {
        bench(&format!("{} over {} series", reduction, HOSTS.len()), runs, |_| {
            let reduce = ReduceSource::new(
                reduction,
                Arc::clone(&minute),
                FieldDescriptor::new(format!("{}_requests", reduction), DataType::Decimal),
            )
            .with_inputs(sources.iter().cloned());
            count(&reduce)
        })?
        .print();
    }

    println!("Series Statistics:");
    for name in store.list_series() {
        if let Some(series) = store.get_series(&name) {
            println!("  {}: {} samples", name, series.len());
        }
    }

    Ok(())
}
