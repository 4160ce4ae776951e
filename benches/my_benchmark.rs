use criterion::{criterion_group, criterion_main, Criterion};
use env_logger::Builder;
use env_logger::Env;
use ndarray::Array4;
use perturb_rs::{AttackConfig, ExecutionContext, ProjectionAttacker, DNN};
use pprof::criterion::{Output, PProfProfiler};
use rand::SeedableRng;
use rand_pcg::Pcg64;
use std::time::Duration;

fn attack_config(attack_method: &str, lam: f64) -> AttackConfig {
    AttackConfig {
        attack_method: attack_method.to_string(),
        num_steps: 5,
        image_width: 32,
        image_resize: 36,
        prob: 0.5,
        momentum: 1.,
        ti_size: 5,
        lam,
        grid_scale: 4,
        sample_times: 8,
        sample_grid_num: 4,
        linbp_layer: 2,
        ila_layer: 2,
        ila_niters: 5,
        ..AttackConfig::default()
    }
}

fn bench(c: &mut Criterion) {
    let env = Env::default();
    let mut builder = Builder::from_env(env);
    builder.init();

    let mut rng = Pcg64::seed_from_u64(69);
    let model = DNN::random_cnn(3, 8, 10, &mut rng);
    let image = Array4::from_shape_fn((1, 3, 32, 32), |(_, c, y, x)| {
        ((c + 1) * (x + 2 * y) % 32) as f64 / 32.
    });

    c.bench_function("perturb::mi_di_ti", |b| {
        b.iter_batched(
            || ProjectionAttacker::new(attack_config("mi_di_ti", 0.), ExecutionContext::cpu(0)).unwrap(),
            |mut attacker: ProjectionAttacker| attacker.perturb(&model, image.view(), 0).unwrap(),
            criterion::BatchSize::SmallInput,
        )
    });

    let mut group = c.benchmark_group("interaction");
    group.warm_up_time(Duration::from_secs(5));
    group.sample_size(10);
    group.bench_function("perturb::interaction_reduced", |b| {
        b.iter_batched(
            || ProjectionAttacker::new(attack_config("ir", 1.), ExecutionContext::cpu(0)).unwrap(),
            |mut attacker: ProjectionAttacker| attacker.perturb(&model, image.view(), 0).unwrap(),
            criterion::BatchSize::SmallInput,
        )
    });
    group.bench_function("perturb_with_alternate_gradient_path::linbp_ila", |b| {
        b.iter_batched(
            || ProjectionAttacker::new(attack_config("linbp_ila", 0.), ExecutionContext::cpu(0)).unwrap(),
            |mut attacker: ProjectionAttacker| {
                attacker
                    .perturb_with_alternate_gradient_path(&model, image.view(), 0)
                    .unwrap()
            },
            criterion::BatchSize::SmallInput,
        )
    });
    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default().with_profiler(PProfProfiler::new(100, Output::Flamegraph(None)));
    targets = bench
}
criterion_main!(benches);
