use capture::{EncoderConfig, EncodingFormat, EncodingParamKey, Frame, FrameEncoder, ImageEncoder};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

/// RGB frame with a gradient pattern
fn create_test_frame(width: u32, height: u32) -> Frame {
    let mut pixels = Vec::with_capacity((width * height * 3) as usize);

    for y in 0..height {
        for x in 0..width {
            pixels.push(((x * 255) / width) as u8);
            pixels.push(((y * 255) / height) as u8);
            pixels.push((((x + y) * 127) / (width + height)) as u8);
        }
    }

    Frame::new(pixels, width, height)
}

fn benchmark_frame_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encoding");
    group.sample_size(20);

    let sizes = [(640, 480, "VGA"), (1280, 720, "HD")];
    let configs = [
        EncoderConfig::new(EncodingFormat::Png),
        EncoderConfig::new(EncodingFormat::Jpeg).with_param(EncodingParamKey::JpegQuality, 85),
        EncoderConfig::new(EncodingFormat::Bitmap),
    ];

    for (width, height, label) in sizes {
        let frame = create_test_frame(width, height);
        group.throughput(Throughput::Elements(u64::from(width * height)));

        for config in &configs {
            group.bench_with_input(
                BenchmarkId::new(config.format().extension(), label),
                &frame,
                |b, frame| b.iter(|| ImageEncoder.encode(black_box(frame), config)),
            );
        }
    }

    group.finish();
}

criterion_group!(benches, benchmark_frame_encoding);
criterion_main!(benches);
