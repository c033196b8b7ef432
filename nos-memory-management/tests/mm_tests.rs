//! Memory management integration tests
//!
//! Whole-pager scenarios: eviction accounting, pin-wait blocking, pinned
//! content stability under pressure, unrecoverable faults and concurrent
//! processes sharing a small frame pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nos_api::{Error, Pid, Result};
#[cfg(feature = "mock")]
use nos_memory_management::MockProgramImage;
use nos_memory_management::{
    AddressSpace, MemoryImage, PAGE_SIZE, ProgramImage, Section, VmConfig, VmKernel,
};
use nos_memory_management::physical::Page;
use nos_sync::{Alarm, DEFAULT_TICKS_PER_INTERRUPT, KThread, Timer};

struct Fixture {
    vm: Arc<VmKernel>,
    _dir: tempfile::TempDir,
}

fn fixture(frames: usize) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let timer = Timer::new(DEFAULT_TICKS_PER_INTERRUPT);
    let config = VmConfig::default()
        .with_num_frames(frames)
        .with_swap_file(dir.path().join("mm.swap"))
        .with_stack_pages(4);
    let vm = VmKernel::new(config, Alarm::new(&timer)).unwrap();
    Fixture {
        vm: Arc::new(vm),
        _dir: dir,
    }
}

/// Read-only text page at vpn 0, two writable data pages at vpns 1 and 2
fn three_page_image() -> Arc<MemoryImage> {
    Arc::new(
        MemoryImage::new()
            .with_section(".text", vec![0x7Eu8; PAGE_SIZE], true)
            .with_section(".data", vec![0xDAu8; 2 * PAGE_SIZE], false),
    )
}

fn page_of(vpn: usize) -> usize {
    vpn * PAGE_SIZE
}

#[test]
fn read_only_victim_is_discarded_without_swap_write() {
    let f = fixture(2);
    let space = f.vm.new_address_space(Pid::new(1), three_page_image()).unwrap();

    f.vm.handle_fault(&space, 0).unwrap();
    f.vm.handle_fault(&space, 1).unwrap();
    assert_eq!(f.vm.free_frames(), 0);

    f.vm.handle_fault(&space, 2).unwrap();
    let stats = f.vm.stats();
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.swap_writes, 0);
    assert_eq!(stats.clean_discards, 1);

    let text = space.entry(0).unwrap();
    assert!(!text.is_valid());
    assert_eq!(text.swap_slot, None);

    // The text page comes back from the image.
    assert_eq!(f.vm.read_vec(&space, 0, 4).unwrap(), vec![0x7E; 4]);
}

#[test]
fn dirty_victim_is_written_to_swap_exactly_once() {
    let f = fixture(2);
    let space = f.vm.new_address_space(Pid::new(1), three_page_image()).unwrap();

    assert_eq!(f.vm.write_memory(&space, page_of(1), b"dirty data").unwrap(), 10);
    f.vm.handle_fault(&space, 0).unwrap();

    f.vm.handle_fault(&space, 2).unwrap();
    let stats = f.vm.stats();
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.swap_writes, 1);

    let evicted = space.entry(1).unwrap();
    assert!(!evicted.is_valid());
    assert!(evicted.swap_slot.is_some());

    assert_eq!(f.vm.read_vec(&space, page_of(1), 10).unwrap(), b"dirty data");
    assert_eq!(f.vm.stats().swap_reads, 1);
}

#[test]
fn data_survives_repeated_eviction() {
    let f = fixture(3);
    let space = f.vm.new_address_space(Pid::new(1), three_page_image()).unwrap();
    let writable: Vec<usize> = (1..space.num_pages()).collect();

    for round in 0..3u8 {
        for &vpn in &writable {
            let pattern = vec![vpn as u8 ^ round; PAGE_SIZE];
            assert_eq!(f.vm.write_memory(&space, page_of(vpn), &pattern).unwrap(), PAGE_SIZE);
        }
        for &vpn in writable.iter().rev() {
            let back = f.vm.read_vec(&space, page_of(vpn), PAGE_SIZE).unwrap();
            assert!(back.iter().all(|&b| b == vpn as u8 ^ round), "vpn {vpn} round {round}");
        }
    }
    assert!(f.vm.stats().swap_writes > 0);
    assert_eq!(f.vm.read_vec(&space, 0, 2).unwrap(), vec![0x7E; 2]);
}

#[test]
fn fault_blocks_while_every_frame_is_pinned() {
    let f = fixture(2);
    let space = f.vm.new_address_space(Pid::new(1), three_page_image()).unwrap();

    let first = f.vm.pin_page(&space, 0).unwrap();
    let second = f.vm.pin_page(&space, 1).unwrap();
    let pinned_frame = second.frame();

    let done = Arc::new(AtomicBool::new(false));
    let faulter = {
        let vm = Arc::clone(&f.vm);
        let space = Arc::clone(&space);
        let done = Arc::clone(&done);
        KThread::spawn("faulter", move || {
            vm.handle_fault(&space, 2).unwrap();
            done.store(true, Ordering::SeqCst);
        })
        .unwrap()
    };

    std::thread::sleep(Duration::from_millis(50));
    assert!(!done.load(Ordering::SeqCst));
    assert!(!space.entry(2).unwrap().is_valid());

    drop(first);
    faulter.join().unwrap();
    assert!(done.load(Ordering::SeqCst));

    assert!(space.entry(2).unwrap().is_valid());
    assert!(!space.entry(0).unwrap().is_valid());
    assert_eq!(space.entry(1).unwrap().ppn, Some(pinned_frame));
    drop(second);
}

#[test]
fn pinned_frame_is_stable_under_eviction_pressure() {
    let f = fixture(2);
    let space = f.vm.new_address_space(Pid::new(1), three_page_image()).unwrap();
    let stack = space.stack_start();
    f.vm.write_memory(&space, page_of(stack), &[0x55u8; PAGE_SIZE]).unwrap();

    let pinned = f.vm.pin_page(&space, stack).unwrap();
    let before = f.vm.memory().snapshot(pinned.frame());

    let workers: Vec<_> = (0..3)
        .map(|n| {
            let vm = Arc::clone(&f.vm);
            let space = Arc::clone(&space);
            KThread::spawn(&format!("pressure-{n}"), move || {
                let others: Vec<usize> = (0..space.num_pages()).filter(|&v| v != stack).collect();
                for i in 0..40 {
                    let vpn = others[(i + n) % others.len()];
                    if !space.is_read_only(vpn) {
                        vm.write_memory(&space, page_of(vpn), &[n as u8; 8]).unwrap();
                    } else {
                        vm.handle_fault(&space, vpn).unwrap();
                    }
                }
            })
            .unwrap()
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(f.vm.memory().snapshot(pinned.frame()), before);
    assert_eq!(space.entry(stack).unwrap().ppn, Some(pinned.frame()));
    assert!(f.vm.stats().evictions > 0);
    drop(pinned);
}

/// An image whose section table promises more pages than it holds
struct TruncatedImage {
    text: Vec<u8>,
}

impl ProgramImage for TruncatedImage {
    fn sections(&self) -> Vec<Section> {
        vec![Section {
            name: ".text".into(),
            first_vpn: 0,
            num_pages: 2,
            read_only: true,
        }]
    }

    fn load_page(&self, section: usize, page_index: usize, page: &mut Page) -> Result<()> {
        let start = page_index * PAGE_SIZE;
        let bytes = self
            .text
            .get(start..start + PAGE_SIZE)
            .ok_or(Error::SectionUnreadable {
                section,
                page: page_index,
            })?;
        page.copy_from_slice(bytes);
        Ok(())
    }
}

#[test]
fn truncated_section_fails_only_the_missing_page() {
    let f = fixture(2);
    let image = Arc::new(TruncatedImage {
        text: vec![0x11u8; PAGE_SIZE],
    });
    let space = f.vm.new_address_space(Pid::new(3), image).unwrap();

    assert_eq!(f.vm.read_vec(&space, 0, 2).unwrap(), vec![0x11; 2]);
    let err = f.vm.read_vec(&space, page_of(1), 2).unwrap_err();
    assert!(err.is_fatal_to_process());
    assert!(!space.entry(1).unwrap().is_valid());
    assert_eq!(f.vm.free_frames(), 1);

    f.vm.unload(&space);
    assert_eq!(f.vm.free_frames(), 2);
}

#[cfg(feature = "mock")]
fn corrupt_image() -> Arc<MockProgramImage> {
    let mut image = MockProgramImage::new();
    image.expect_sections().return_const(vec![Section {
        name: ".text".into(),
        first_vpn: 0,
        num_pages: 1,
        read_only: true,
    }]);
    image
        .expect_load_page()
        .returning(|section, page, _| Err(Error::SectionUnreadable { section, page }));
    Arc::new(image)
}

#[cfg(feature = "mock")]
#[test]
fn corrupt_section_is_unrecoverable_and_frame_is_returned() {
    let f = fixture(1);
    let space = f.vm.new_address_space(Pid::new(7), corrupt_image()).unwrap();
    let stack = space.stack_start();

    // Occupy the only frame with a dirty page so the bad fault must evict.
    f.vm.write_memory(&space, page_of(stack), b"keep me").unwrap();

    let err = f.vm.handle_fault(&space, 0).unwrap_err();
    match err {
        Error::UnrecoverableFault { pid, vpn, .. } => {
            assert_eq!(pid, Pid::new(7));
            assert_eq!(vpn, 0);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(f.vm.free_frames(), 1);
    assert!(!space.entry(0).unwrap().is_in_transit());

    // The victim reached swap before the load failed and is still intact.
    assert_eq!(f.vm.read_vec(&space, page_of(stack), 7).unwrap(), b"keep me");
}

#[test]
fn unload_releases_frames_and_swap_slots() {
    let f = fixture(2);
    let space = f.vm.new_address_space(Pid::new(1), three_page_image()).unwrap();
    for vpn in 1..space.num_pages() {
        f.vm.write_memory(&space, page_of(vpn), b"x").unwrap();
    }
    assert!(f.vm.memory_info().swap_slots_in_use > 0);

    f.vm.unload(&space);
    let info = f.vm.memory_info();
    assert_eq!(info.free_frames, 2);
    assert_eq!(info.resident_frames, 0);
    assert_eq!(info.swap_slots_in_use, 0);
    assert!(space.entries().iter().all(|e| !e.is_valid() && e.swap_slot.is_none()));
}

#[test]
fn concurrent_processes_share_a_small_pool() {
    let f = fixture(4);
    let shared_text = three_page_image();

    let processes: Vec<_> = (1..=4u32)
        .map(|pid| {
            let vm = Arc::clone(&f.vm);
            let image = Arc::clone(&shared_text);
            KThread::spawn(&format!("proc-{pid}"), move || {
                let space: Arc<AddressSpace> = vm.new_address_space(Pid::new(pid), image).unwrap();
                for round in 0..4u8 {
                    for vpn in 1..space.num_pages() {
                        let tag = [pid as u8, vpn as u8, round, 0xEE];
                        vm.write_memory(&space, page_of(vpn) + 16, &tag).unwrap();
                    }
                    for vpn in 1..space.num_pages() {
                        let back = vm.read_vec(&space, page_of(vpn) + 16, 4).unwrap();
                        assert_eq!(back, [pid as u8, vpn as u8, round, 0xEE]);
                    }
                    assert_eq!(vm.read_vec(&space, 0, 1).unwrap(), [0x7E]);
                }
                vm.unload(&space);
            })
            .unwrap()
        })
        .collect();
    for process in processes {
        process.join().unwrap();
    }

    let info = f.vm.memory_info();
    assert_eq!(info.free_frames, 4);
    assert_eq!(info.swap_slots_in_use, 0);
    for frame in 0..4 {
        assert_eq!(f.vm.ipt().pin_count(frame), 0);
    }
}

#[test]
fn threads_faulting_the_same_page_share_one_load() {
    let f = fixture(4);
    let space = f.vm.new_address_space(Pid::new(1), three_page_image()).unwrap();

    let readers: Vec<_> = (0..6)
        .map(|n| {
            let vm = Arc::clone(&f.vm);
            let space = Arc::clone(&space);
            KThread::spawn(&format!("reader-{n}"), move || {
                vm.read_vec(&space, page_of(1), 8).unwrap()
            })
            .unwrap()
        })
        .collect();
    for reader in readers {
        assert_eq!(reader.join().unwrap(), vec![0xDA; 8]);
    }
    assert_eq!(f.vm.stats().section_loads, 1);
}

#[test]
fn fragmented_image_is_rejected() {
    let f = fixture(2);
    let image = Arc::new(
        MemoryImage::new()
            .with_section(".text", vec![0u8; 8], true)
            .with_section_at(".data", 3, vec![0u8; 8], false),
    );
    assert!(matches!(
        f.vm.new_address_space(Pid::new(1), image),
        Err(Error::InvalidImage(_))
    ));
}

#[cfg(feature = "serde")]
#[test]
fn config_from_json() {
    let config: VmConfig =
        serde_json::from_str(r#"{ "num_frames": 32, "swap_file": "/tmp/x.swap" }"#).unwrap();
    assert_eq!(config.num_frames, 32);
    assert_eq!(config.stack_pages, 8);
    assert!(config.validate().is_ok());

    let json = serde_json::to_string(&VmConfig::default()).unwrap();
    assert!(json.contains("nos-vm.swap"));
}
