use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};

use oxygen_core::hash::fnv1a64;
use oxygen_core::io::{MemoryStream, Reader, Stream, Writer};
use oxygen_core::math::{Frustum, Vec3, BoundingSphere, look_at_rh, perspective_rh};

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

fn bench_writer_reader_u32(c: &mut Criterion) {
    let values: Vec<u32> = (0..4096).collect();
    c.bench_function("writer_reader_4096_u32", |b| {
        b.iter(|| {
            let mut w = Writer::new(MemoryStream::new());
            w.write_array(black_box(&values)).unwrap();
            let mut stream = w.into_inner();
            stream.seek(0).unwrap();
            let mut r = Reader::new(stream);
            black_box(r.read_array::<u32>().unwrap())
        });
    });
}

// ---------------------------------------------------------------------------
// Hashing and culling
// ---------------------------------------------------------------------------

fn bench_fnv_64k(c: &mut Criterion) {
    let data = vec![0xA5u8; 64 * 1024];
    c.bench_function("fnv1a64_64k", |b| b.iter(|| fnv1a64(black_box(&data))));
}

fn bench_frustum_spheres(c: &mut Criterion) {
    let proj = perspective_rh(1.0, 16.0 / 9.0, 0.1, 500.0);
    let view = look_at_rh(&Vec3::new(0.0, 2.0, 10.0), &Vec3::zeros(), &Vec3::y());
    let frustum = Frustum::from_view_projection(&(proj * view));
    let spheres: Vec<BoundingSphere> = (0..1024)
        .map(|i| BoundingSphere::new(Vec3::new((i % 32) as f32, 0.0, -((i / 32) as f32)), 0.5))
        .collect();
    c.bench_function("frustum_cull_1024_spheres", |b| {
        b.iter(|| spheres.iter().filter(|s| frustum.intersects_sphere(black_box(s))).count());
    });
}

criterion_group!(benches, bench_writer_reader_u32, bench_fnv_64k, bench_frustum_spheres);
criterion_main!(benches);
