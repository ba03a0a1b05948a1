use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use glam::Vec3;

use cyclonite_ecs::World;
use cyclonite_ecs::components::{Material, Mesh, MeshHandle, Transform};

fn renderable_world(count: u32) -> World {
    let mut world = World::new();
    for i in 0..count {
        let entity = world.spawn();
        let _ = world.insert(entity, Transform::from_xyz(i as f32, 0.0, 0.0));
        let _ = world.insert(entity, Mesh::new(MeshHandle::new(i % 8), 36));
        // Every fourth entity lacks a material and is skipped by render queries.
        if i % 4 != 0 {
            let _ = world.insert(entity, Material::default());
        }
    }
    world
}

// ---------------------------------------------------------------------------
// Entity spawning
// ---------------------------------------------------------------------------

fn bench_spawn_entities_1k(c: &mut Criterion) {
    c.bench_function("spawn_1k_entities", |b| {
        b.iter_batched(
            World::new,
            |mut world| {
                for _ in 0..1_000 {
                    black_box(world.spawn());
                }
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_spawn_and_despawn_recycling(c: &mut Criterion) {
    c.bench_function("spawn_despawn_recycle_1k", |b| {
        b.iter_batched(
            || {
                let mut world = World::new();
                let entities: Vec<_> = (0..1_000).map(|_| world.spawn()).collect();
                for e in &entities {
                    let _ = world.despawn(*e);
                }
                world
            },
            |mut world| {
                for _ in 0..1_000 {
                    black_box(world.spawn());
                }
            },
            BatchSize::SmallInput,
        );
    });
}

// ---------------------------------------------------------------------------
// Component insert / remove
// ---------------------------------------------------------------------------

fn bench_insert_transform_1k(c: &mut Criterion) {
    c.bench_function("insert_transform_1k", |b| {
        b.iter_batched(
            || {
                let mut world = World::new();
                let entities: Vec<_> = (0..1_000).map(|_| world.spawn()).collect();
                (world, entities)
            },
            |(mut world, entities)| {
                for (i, e) in entities.iter().enumerate() {
                    let _ = world.insert(*e, Transform::from_translation(Vec3::splat(i as f32)));
                }
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_remove_transform_1k(c: &mut Criterion) {
    c.bench_function("remove_transform_1k", |b| {
        b.iter_batched(
            || {
                let world = renderable_world(1_000);
                let entities: Vec<_> = world.query::<Transform>().map(|(e, _)| e).collect();
                (world, entities)
            },
            |(mut world, entities)| {
                for e in &entities {
                    black_box(world.remove::<Transform>(*e));
                }
            },
            BatchSize::SmallInput,
        );
    });
}

// ---------------------------------------------------------------------------
// Render queries
// ---------------------------------------------------------------------------

fn bench_query3_renderables_10k(c: &mut Criterion) {
    let world = renderable_world(10_000);
    c.bench_function("query3_renderables_10k", |b| {
        b.iter(|| {
            let mut indices = 0u64;
            for (_, transform, mesh, _) in world.query3::<Transform, Mesh, Material>() {
                indices += mesh.index_count as u64;
                black_box(transform.compute_matrix());
            }
            black_box(indices)
        });
    });
}

criterion_group!(
    benches,
    bench_spawn_entities_1k,
    bench_spawn_and_despawn_recycling,
    bench_insert_transform_1k,
    bench_remove_transform_1k,
    bench_query3_renderables_10k,
);
criterion_main!(benches);
