use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use flip_fluid_engine::domain_state::DomainState;
use flip_fluid_engine::nalgebra::Vector3;

fn seed_block(state: &mut DomainState<f32>, size: usize) {
    let mut indices = Vec::new();
    for i in 1..size {
        for j in 1..size / 2 {
            for k in 1..size {
                indices.push((i, j, k));
            }
        }
    }
    state.add_fluid_cells(&indices, Vector3::zeros());
}

fn bench_single_substep(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_substep");
    for grid_size in [16usize, 24, 32] {
        group.bench_with_input(BenchmarkId::from_parameter(grid_size), &grid_size, |b, &grid_size| {
            let mut state = DomainState::<f32>::new(grid_size, grid_size, grid_size, 0.1);
            state.initialize().unwrap();
            seed_block(&mut state, grid_size);
            b.iter(|| {
                state.update(1.0 / 30.0).unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_single_substep);
criterion_main!(benches);
