//! Timing for a single call to the per-block engine.

use aecm_core::{AecmCore, PART_LEN};
use criterion::{Criterion, black_box, criterion_group, criterion_main};

fn bench_process_block(c: &mut Criterion) {
    let mut core = AecmCore::new(8000).expect("valid sample rate");

    // Stationary, mildly correlated far/near signals: representative load
    // for the NLMS adaptation and suppression stages, avoiding the cheaper
    // all-silence fast paths.
    let far: [i16; PART_LEN] =
        std::array::from_fn(|i| ((i as i32 * 37) % 2000 - 1000) as i16);
    let near: [i16; PART_LEN] =
        std::array::from_fn(|i| (far[i] as i32 / 2 + (i as i32 * 11) % 50) as i16);
    let mut out = [0i16; PART_LEN];

    c.bench_function("process_block_8k", |b| {
        b.iter(|| {
            core.process_block(black_box(&far), black_box(&near), None, &mut out).unwrap();
            black_box(out);
        });
    });
}

criterion_group!(benches, bench_process_block);
criterion_main!(benches);
