//! Memory management benchmarks

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use nos_api::Pid;
use nos_memory_management::{
    FrameAllocator, InvertedPageTable, MemoryImage, PAGE_SIZE, VmConfig, VmKernel,
};
use nos_sync::{Alarm, DEFAULT_TICKS_PER_INTERRUPT, Timer};

fn kernel(dir: &tempfile::TempDir, frames: usize) -> VmKernel {
    let timer = Timer::new(DEFAULT_TICKS_PER_INTERRUPT);
    let config = VmConfig::default()
        .with_num_frames(frames)
        .with_swap_file(dir.path().join("bench.swap"));
    VmKernel::new(config, Alarm::new(&timer)).unwrap()
}

fn image(pages: usize) -> Arc<MemoryImage> {
    Arc::new(MemoryImage::new().with_section(".data", vec![0x5Au8; pages * PAGE_SIZE], false))
}

fn bench_frame_allocation(c: &mut Criterion) {
    let pool = FrameAllocator::new(1024);
    c.bench_function("frame_allocate_release", |b| {
        b.iter(|| {
            let frame = pool.allocate().unwrap();
            pool.release(black_box(frame));
        })
    });
}

fn bench_clock_sweep(c: &mut Criterion) {
    let ipt = InvertedPageTable::new(256);
    c.bench_function("ipt_lock_all_pinned", |b| {
        b.iter(|| black_box(ipt.lock().all_pinned()))
    });
}

fn bench_resident_transfer(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let vm = kernel(&dir, 16);
    let space = vm.new_address_space(Pid::new(1), image(4)).unwrap();
    let mut buf = vec![0u8; PAGE_SIZE];
    vm.read_memory(&space, 0, &mut buf).unwrap();

    c.bench_function("read_resident_page", |b| {
        b.iter(|| vm.read_memory(&space, 0, black_box(&mut buf)).unwrap())
    });
}

fn bench_eviction_cycle(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let vm = kernel(&dir, 4);
    let space = vm.new_address_space(Pid::new(1), image(2)).unwrap();
    let pages = space.num_pages();

    c.bench_function("write_with_swap_pressure", |b| {
        b.iter_batched(
            || vec![0xA5u8; 16],
            |data| {
                for vpn in 1..pages {
                    vm.write_memory(&space, vpn * PAGE_SIZE, &data).unwrap();
                }
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    bench_frame_allocation,
    bench_clock_sweep,
    bench_resident_transfer,
    bench_eviction_cycle
);

criterion_main!(benches);
