use bms_core::filter::Reading;
use bms_core::pack::{CellReading, Snapshot};
use bms_core::{Band, ChannelCfg, Limit, PackCfg, QuantityCfg, SafetyEngine};
use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};

// Cell voltages wandering around 3.3 V with a deterministic xorshift jitter
fn synth_snapshot(n: u16, seed: u32) -> Snapshot {
    let mut state = seed.max(1);
    let mut next_f32 = || {
        let mut x = state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        state = x;
        (x as f32) / (u32::MAX as f32 + 1.0)
    };
    let cells: Vec<CellReading> = (1..=n)
        .map(|index| CellReading {
            index,
            u: Reading::Fresh(3.3 + (next_f32() - 0.5) * 0.2),
            temp: Reading::Fresh(25.0 + next_f32() * 10.0),
        })
        .collect();
    let sum: f32 = cells.iter().filter_map(|c| c.u.fresh()).sum();
    Snapshot {
        pack_u: Reading::Fresh(sum),
        pack_i: Reading::Fresh(-20.0),
        cells,
        cycles: [1, 1, 1],
    }
}

fn pack_cfg(n: u16) -> PackCfg {
    let q = |min: f32, max: f32, lim: Option<f32>| QuantityCfg {
        channel: ChannelCfg::default(),
        limit: Limit {
            min: Some(min),
            max: Some(max),
            ext: Band::default(),
            lim: Band { min: None, max: lim },
        },
    };
    let mut cfg = PackCfg::uniform(
        n,
        q(2.8 * f32::from(n), 3.65 * f32::from(n), None),
        q(-100.0, 100.0, Some(80.0)),
        q(2.8, 3.65, Some(3.5)),
    );
    for c in &mut cfg.cells {
        c.temp = q(0.0, 55.0, Some(45.0));
    }
    cfg
}

pub fn bench_evaluate(c: &mut Criterion) {
    let mut g = c.benchmark_group("safety_engine");
    // Allow quick tweaking without CLI flags (Criterion 0.5):
    //   BENCH_SAMPLE_SIZE=10 BENCH_MEAS_MS=50 cargo bench -p bms_core --bench safety_engine
    if let Ok(ss) = std::env::var("BENCH_SAMPLE_SIZE") {
        if let Ok(n) = ss.parse::<usize>() {
            g.sample_size(n.max(1));
        }
    } else {
        g.sample_size(50);
    }
    if let Ok(ms) = std::env::var("BENCH_MEAS_MS")
        && let Ok(ms_u64) = ms.parse::<u64>()
    {
        g.measurement_time(std::time::Duration::from_millis(ms_u64));
    }

    for &n in &[16u16, 128, 256] {
        let snap = synth_snapshot(n, 0xC0FFEE);
        g.bench_function(format!("evaluate_{n}_cells"), |b| {
            b.iter_batched(
                || SafetyEngine::new(pack_cfg(n)),
                |mut engine| {
                    let report = engine.evaluate(black_box(&snap));
                    black_box(report.current_limit);
                },
                BatchSize::SmallInput,
            )
        });
    }
    g.finish();
}

criterion_group!(safety, bench_evaluate);
criterion_main!(safety);
