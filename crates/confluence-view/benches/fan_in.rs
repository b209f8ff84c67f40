use std::rc::Rc;

use confluence_collection::Collection;
use confluence_view::AggregateView;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

const SOURCES: u32 = 8;
const KEYS_PER_SOURCE: u32 = 256;

fn sources() -> Vec<Rc<Collection<u32, u64>>> {
    (0..SOURCES)
        .map(|s| {
            Rc::new(Collection::with_entries(
                (0..KEYS_PER_SOURCE).map(|k| (s * KEYS_PER_SOURCE + k, u64::from(k))),
            ))
        })
        .collect()
}

fn attach_all(c: &mut Criterion) {
    c.bench_function("attach_8x256", |b| {
        b.iter_batched(
            sources,
            |sources| {
                let view = AggregateView::with_collections(&sources).unwrap();
                black_box(view.source_count())
            },
            BatchSize::SmallInput,
        )
    });
}

fn propagate_updates(c: &mut Criterion) {
    let sources = sources();
    let _view = AggregateView::with_collections(&sources).unwrap();
    let mut tick = 0u64;
    c.bench_function("propagate_update", |b| {
        b.iter(|| {
            tick += 1;
            let s = (tick % u64::from(SOURCES)) as u32;
            let key = s * KEYS_PER_SOURCE + (tick % u64::from(KEYS_PER_SOURCE)) as u32;
            sources[s as usize].set(black_box(key), tick);
        })
    });
}

criterion_group!(benches, attach_all, propagate_updates);
criterion_main!(benches);
