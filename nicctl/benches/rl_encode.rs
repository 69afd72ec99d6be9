use std::time::Duration;

use criterion::{
    black_box, criterion_group, criterion_main, measurement::WallTime, BenchmarkGroup, BenchmarkId, Criterion,
    Throughput,
};
use rand::Rng;

use nicctl::{Owner, PsmClock, RlEncoding, RlType, Scheduler, MAX_BW, MIN_BW};
use nicctl_sched::testing::{FakeFirmware, FwTopology};

const N_RATES: usize = 1_000;

fn random_rates(n: usize) -> Vec<u32> {
    let mut rng = rand::thread_rng();
    (0..n).map(|_| rng.gen_range(MIN_BW..=MAX_BW)).collect()
}

fn bench_encode(mut group: BenchmarkGroup<'_, WallTime>) {
    let rates = random_rates(N_RATES);
    group.throughput(Throughput::Elements(N_RATES as u64));

    for clock in [PsmClock::Mhz367, PsmClock::Mhz446] {
        group.bench_with_input(BenchmarkId::new("encode", clock.hz()), &rates, |b, rates| {
            b.iter(|| {
                for bw in rates {
                    black_box(RlEncoding::new(*bw, clock.hz()));
                }
            })
        });
    }
    group.finish();
}

/// Changing the limit of a VSI swaps profiles: one lookup or add, one release.
fn bench_set_limit(mut group: BenchmarkGroup<'_, WallTime>) {
    let sched = Scheduler::new(FakeFirmware::new(FwTopology::nine_layer(1)));
    sched.init().unwrap();
    sched.cfg_vsi(1, 0, 1, Owner::Lan, true).unwrap();

    // Few distinct rates so most calls hit an existing profile
    let rates: Vec<u32> = random_rates(16);
    group.throughput(Throughput::Elements(1));
    group.bench_function("vsi_limit", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % rates.len();
            sched.cfg_vsi_bw_lmt_per_tc(1, 0, RlType::Eir, rates[i]).unwrap();
        })
    });
    group.finish();
}

fn rl_profiles(c: &mut Criterion) {
    let _ = tracing_subscriber::fmt::try_init();

    bench_encode(c.benchmark_group("rl_encode"));
    bench_set_limit(c.benchmark_group("rl_profile"));
}

criterion_group! {
    name = benches;
    config = Criterion::default().warm_up_time(Duration::from_secs(1));
    targets = rl_profiles
}

criterion_main!(benches);
