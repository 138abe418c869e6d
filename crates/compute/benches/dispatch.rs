use compute::{Dispatch, DispatchEngine, ExecutionMode, LocalInvocationIndexKernel};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_dispatch(c: &mut Criterion) {
    let dispatch = Dispatch::new([16, 16, 1], [8, 8, 1]);
    let kernel = LocalInvocationIndexKernel::for_dispatch(&dispatch);
    let len = usize::try_from(kernel.output_length()).unwrap();

    for mode in [ExecutionMode::Sequential, ExecutionMode::Parallel] {
        let engine = DispatchEngine::with_mode(mode);
        c.bench_function(&format!("dispatch_128x128_{mode:?}"), |b| {
            b.iter(|| engine.run(black_box(&dispatch), len, &kernel).unwrap());
        });
    }
}

criterion_group!(benches, bench_dispatch);
criterion_main!(benches);
