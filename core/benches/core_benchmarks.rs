use criterion::{Criterion, black_box, criterion_group, criterion_main};

use tessera_core::arena::StackArena;

// ---------------------------------------------------------------------------
// Stack arena
// ---------------------------------------------------------------------------

fn bench_arena_constant_staging(c: &mut Criterion) {
    c.bench_function("stack_arena_4096_constant_blocks", |b| {
        let mut arena = StackArena::new(1024 * 1024);
        b.iter(|| {
            arena.reset();
            for i in 0..4096u64 {
                black_box(arena.allocate(black_box(64 + (i % 3) * 16), 256));
            }
        });
    });
}

fn bench_arena_bookmarks(c: &mut Criterion) {
    c.bench_function("stack_arena_nested_bookmarks", |b| {
        let mut arena = StackArena::new(16 * 1024 * 1024);
        b.iter(|| {
            arena.reset();
            for _ in 0..256 {
                let mark = arena.push_bookmark();
                black_box(arena.allocate(black_box(32 * 1024), 256));
                arena.pop_bookmark(mark);
            }
        });
    });
}

criterion_group!(benches, bench_arena_constant_staging, bench_arena_bookmarks);
criterion_main!(benches);
