//! Byte-scan throughput over a megabyte-scale unclassified image, the
//! worst case the cascade falls back to.

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use ancalagon::image::address_space::{AddressSpace, Perms, Record};
use ancalagon::image::{Image, ImageKind};
use ancalagon::layout::{self, RuntimeVersion};
use ancalagon::locate::{self, Hints};
use ancalagon::progress::NullSink;

const METHOD_COUNT: u64 = 40_000;
const TYPE_COUNT: u64 = 6_000;
const IMAGE_SIZE: usize = 4 << 20;

fn put(buf: &mut [u8], at: u64, value: u64) {
    let at = at as usize;
    buf[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

/// Flat read-only image with the structures near the end of the buffer so
/// the scan covers almost the whole input before validating a hit.
fn build_image() -> Image {
    let mut buf = vec![0u8; IMAGE_SIZE];
    let code_table = (IMAGE_SIZE - 0x4000) as u64;
    let metadata_table = (IMAGE_SIZE - 0x2000) as u64;
    let method_array = code_table + 0x200;
    let types_array = metadata_table + 0x200;
    let sizes_array = metadata_table + 0x400;

    // Version 29 layout: code count/array at slots 2/3.
    put(&mut buf, code_table + 2 * 8, METHOD_COUNT);
    put(&mut buf, code_table + 3 * 8, method_array);
    put(&mut buf, method_array, 0x100);

    put(&mut buf, metadata_table + 6 * 8, TYPE_COUNT);
    put(&mut buf, metadata_table + 7 * 8, types_array);
    put(&mut buf, metadata_table + 12 * 8, TYPE_COUNT);
    put(&mut buf, metadata_table + 13 * 8, sizes_array);
    put(&mut buf, types_array, 0x100);
    put(&mut buf, sizes_array, 0x100);

    let records = vec![Record {
        virt_start: 0,
        virt_end: IMAGE_SIZE as u64,
        file_offset: 0,
        perms: Perms::READ,
        name: None,
    }];
    Image {
        kind: ImageKind::Elf64,
        space: AddressSpace::new(buf, records),
        ptr_size: 8,
        image_base: 0,
        exports: Vec::new(),
        is_dumped: false,
    }
}

fn bench_locate(c: &mut Criterion) {
    let image = build_image();
    let layout = layout::bind(RuntimeVersion::new(29, 0), 0).unwrap();
    let hints = Hints {
        method_count: METHOD_COUNT,
        type_count: TYPE_COUNT,
    };

    let mut group = c.benchmark_group("locate");
    group.throughput(Throughput::Bytes(IMAGE_SIZE as u64));
    group.bench_function("byte_scan_4mib", |b| {
        b.iter(|| locate::locate(&image, &layout, &hints, &mut NullSink).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_locate);
criterion_main!(benches);
