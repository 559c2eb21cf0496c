use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use chroma_image::Image;
use chroma_imgproc::{
    color::{rgb_from_yuv, yuv_from_rgb},
    recombine::recombine_by_saturation,
};

fn bench_yuv(c: &mut Criterion) {
    let mut group = c.benchmark_group("Yuv");

    for (width, height) in [(224, 224), (512, 448), (1024, 896)].iter() {
        group.throughput(criterion::Throughput::Elements((*width * *height) as u64));

        let parameter_string = format!("{}x{}", width, height);

        let image_data = (0..width * height * 3)
            .map(|i| (i % 255) as f32 / 255.0)
            .collect();
        let image = Image::<f32, 3>::new([*width, *height].into(), image_data).unwrap();
        let out = Image::<f32, 3>::from_size_val(image.size(), 0.0).unwrap();

        group.bench_with_input(
            BenchmarkId::new("yuv_from_rgb", &parameter_string),
            &(&image, &out),
            |b, i| {
                let (src, mut dst) = (i.0, i.1.clone());
                b.iter(|| black_box(yuv_from_rgb(src, &mut dst)))
            },
        );

        group.bench_with_input(
            BenchmarkId::new("rgb_from_yuv", &parameter_string),
            &(&image, &out),
            |b, i| {
                let (src, mut dst) = (i.0, i.1.clone());
                b.iter(|| black_box(rgb_from_yuv(src, &mut dst)))
            },
        );
    }

    group.finish();
}

fn bench_recombine(c: &mut Criterion) {
    let mut group = c.benchmark_group("Recombine");
    let weights = [1. / 8., 7. / 32., 7. / 32., 7. / 16.];

    for (width, height) in [(224, 224), (512, 448)].iter() {
        group.throughput(criterion::Throughput::Elements((*width * *height) as u64));

        let parameter_string = format!("{}x{}", width, height);

        let images = (0..4)
            .map(|k| {
                let data = (0..width * height * 3)
                    .map(|i| ((i + k * 31) % 255) as f32 / 255.0)
                    .collect();
                Image::<f32, 3>::new([*width, *height].into(), data).unwrap()
            })
            .collect::<Vec<_>>();

        group.bench_with_input(
            BenchmarkId::new("recombine_by_saturation", &parameter_string),
            &images,
            |b, i| b.iter(|| black_box(recombine_by_saturation(i, &weights))),
        );
    }

    group.finish();
}

criterion_group!(benches, bench_yuv, bench_recombine);
criterion_main!(benches);
