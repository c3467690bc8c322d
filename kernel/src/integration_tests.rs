//! End-to-end scenarios across subsystem boundaries.
//!
//! These run on the host against the global kernel singletons (frame
//! allocator, kernel address space, scheduler, VFS, terminal), so they
//! serialize on one lock and rebuild the world in `KernelEnv::new`.
//! Frame memory comes from a leaked test arena; the global PMM manages
//! exactly the arena's frame range, so every path from syscall down to
//! page-table walk runs for real.

#![cfg(not(target_os = "none"))]

use std::boxed::Box;
use std::string::String;
use std::sync::{Mutex as StdMutex, MutexGuard};
use std::vec;
use std::vec::Vec;

use crate::drivers::{keyboard, terminal};
use crate::error::errno;
use crate::fs::{self, MountFlags, OpenFlags, UmountFlags, Vfs};
use crate::mm::user_validation::copy_to_user;
use crate::mm::vmm::{self, testmem::TestMemory, AddressSpace, FrameSource, GlobalFrames};
use crate::mm::{frame_allocator, MemoryRegion, PageFlags, PhysAddr, VirtAddr, PAGE_SIZE};
use crate::sched::{self, Priority, TaskState};
use crate::syscall::{self, Syscall};
use crate::timer;

static GLOBAL_LOCK: StdMutex<()> = StdMutex::new(());

/// Arena frames per scenario; covers stacks, tables and data pages.
const ENV_FRAMES: usize = 256;

/// A user-mapped scratch page every scenario can write through.
const USER_PAGE: u32 = 0x0040_0000;

struct KernelEnv {
    _guard: MutexGuard<'static, ()>,
    captured: alloc::sync::Arc<spin::Mutex<Vec<u8>>>,
}

impl KernelEnv {
    fn new() -> Self {
        let guard = GLOBAL_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        // Fresh arena, leaked so the global access hook can hold it.
        let arena: &'static TestMemory = Box::leak(Box::new(TestMemory::new(ENV_FRAMES)));
        vmm::set_test_access(arena);

        // The PMM manages exactly the arena's frame range.
        frame_allocator::init(&[MemoryRegion::new(
            vmm::testmem::TEST_PHYS_BASE,
            (ENV_FRAMES * PAGE_SIZE) as u32,
        )]);

        // Kernel address space over the arena, with one user page.
        let mut frames = GlobalFrames;
        let mut space =
            AddressSpace::new(&mut frames, arena).expect("arena has room for a directory");
        let user_frame = frames.alloc_frame().expect("arena frame for the user page");
        space
            .map(
                arena,
                &mut frames,
                VirtAddr::new(USER_PAGE),
                user_frame,
                PageFlags::user_rw(),
            )
            .expect("mapping the scratch user page");
        vmm::replace_kernel_space_for_test(space);

        // Scheduler with the boot context adopted as idle.
        sched::reset_for_test();
        sched::init().expect("scheduler init");

        // Root filesystem.
        let mut vfs = Vfs::new();
        vfs.register_filesystem(fs::ramfs::filesystem_type())
            .expect("ramfs registration");
        vfs.mount("/", "ramfs", None, MountFlags::empty())
            .expect("root mount");
        fs::reset_for_test(vfs);

        // Terminal capture and a clean keyboard/timer.
        let (sink, captured) = terminal::CaptureSink::new();
        terminal::set_sink(Box::new(sink));
        keyboard::flush_keys();
        timer::reset_for_test();

        Self {
            _guard: guard,
            captured,
        }
    }

    /// Place bytes into user memory through the validated copy path.
    fn poke_user(&self, addr: u32, bytes: &[u8]) {
        vmm::with_kernel_space(|space| {
            copy_to_user(space, vmm::phys_access(), addr, bytes).expect("user scratch write")
        })
        .expect("kernel space present");
    }

    /// Place a NUL-terminated string into user memory.
    fn poke_user_str(&self, addr: u32, s: &str) {
        let mut bytes = Vec::from(s.as_bytes());
        bytes.push(0);
        self.poke_user(addr, &bytes);
    }

    fn terminal_output(&self) -> String {
        terminal::flush();
        String::from_utf8(self.captured.lock().clone()).expect("terminal output is utf-8")
    }
}

extern "C" fn noop_entry(_arg: usize) {}

// ---------------------------------------------------------------------------
// Spec scenarios
// ---------------------------------------------------------------------------

#[test]
fn test_boot_and_idle_tick_accounting() {
    let _env = KernelEnv::new();

    // Only the idle task exists after init.
    let (task_count, idle_state) = sched::with_scheduler(|s| {
        let idle = s.current().expect("idle adopted at boot");
        (s.task_count(), s.state(idle))
    })
    .unwrap();
    assert_eq!(task_count, 1);
    assert_eq!(idle_state, Some(TaskState::Running));

    // Memory bookkeeping is stable while idling: no task, no I/O, no
    // allocation for 1000 ticks.
    let free_before = frame_allocator::free_pages();
    let start = timer::ticks();
    timer::advance_for_test(1000);
    assert_eq!(timer::ticks() - start, 1000);
    assert_eq!(frame_allocator::free_pages(), free_before);

    // Idle never rotated out.
    let task_count = sched::with_scheduler(|s| s.task_count()).unwrap();
    assert_eq!(task_count, 1);
}

#[test]
fn test_user_mode_echo_scenario() {
    let env = KernelEnv::new();
    const MESSAGE: &[u8] = b"PIC code - works anywhere!\n";
    assert_eq!(MESSAGE.len(), 27);

    // The user program's code page is mapped USER|RW|PRESENT at
    // USER_PAGE; its data (the message) sits on the same page.
    env.poke_user(USER_PAGE + 0x100, MESSAGE);

    let task = sched::task_create_user("echo", USER_PAGE, 0, Priority::Normal)
        .expect("user task creation");

    // Dispatch the user task.
    let sw = sched::with_scheduler(|s| s.schedule()).unwrap().unwrap();
    assert_eq!(sw.to, task);

    // The task issues write(1, msg, 27)...
    let ret = syscall::dispatch(
        Syscall::Write as usize,
        [1, (USER_PAGE + 0x100) as usize, 27, 0, 0],
    );
    assert_eq!(ret, 27);

    // ...then exit(0).
    let ret = syscall::dispatch(Syscall::Exit as usize, [0, 0, 0, 0, 0]);
    assert_eq!(ret, 0);

    assert_eq!(env.terminal_output().as_bytes(), MESSAGE);
    let (state, code) = sched::with_scheduler(|s| {
        let t = s.task(task).expect("zombie keeps its TCB until reaped");
        (t.state, t.exit_code)
    })
    .unwrap();
    assert_eq!(state, TaskState::Zombie);
    assert_eq!(code, 0);

    // Reaping frees the TCB and returns the exit code.
    assert_eq!(sched::task_reap(task).unwrap(), 0);
}

#[test]
fn test_vfs_enoent_scenario() {
    let env = KernelEnv::new();

    fs::vfs_mkdir("/mnt").unwrap();
    fs::vfs_mount("/mnt", "ramfs", None, MountFlags::empty()).unwrap();

    env.poke_user_str(USER_PAGE, "/mnt/does-not-exist");

    let mounts_before = fs::with_vfs(|v| v.mount_count()).unwrap();
    let fds_before = sched::with_scheduler(|s| {
        let id = s.current().unwrap();
        s.task(id).unwrap().fd_table.open_count()
    })
    .unwrap();

    let ret = syscall::dispatch(Syscall::Open as usize, [USER_PAGE as usize, 0, 0, 0, 0]);
    assert_eq!(ret, -(errno::ENOENT as isize));

    // No descriptor leaked, mount table untouched.
    let fds_after = sched::with_scheduler(|s| {
        let id = s.current().unwrap();
        s.task(id).unwrap().fd_table.open_count()
    })
    .unwrap();
    assert_eq!(fds_after, fds_before);
    assert_eq!(fs::with_vfs(|v| v.mount_count()).unwrap(), mounts_before);
}

#[test]
fn test_timer_driven_wakeup_scenario() {
    let _env = KernelEnv::new();

    let a = sched::task_create("a", noop_entry, 0, Priority::Normal).unwrap();
    let b = sched::task_create("b", noop_entry, 0, Priority::Normal).unwrap();

    // A runs first, then sleeps 50 ms (5 ticks at 100 Hz).
    assert_eq!(sched::with_scheduler(|s| s.schedule()).unwrap().unwrap().to, a);
    sched::task_sleep(50);

    // B takes over for the whole sleep.
    assert_eq!(
        sched::with_scheduler(|s| (s.current(), s.state(a))).unwrap(),
        (Some(b), Some(TaskState::Sleeping))
    );
    for _ in 0..4 {
        timer::advance_for_test(1);
        assert_eq!(
            sched::with_scheduler(|s| s.state(a)).unwrap(),
            Some(TaskState::Sleeping)
        );
    }

    // Tick 5 wakes A into Ready; B keeps the CPU until the next
    // scheduling decision.
    timer::advance_for_test(1);
    assert_eq!(
        sched::with_scheduler(|s| (s.state(a), s.state(b))).unwrap(),
        (Some(TaskState::Ready), Some(TaskState::Running))
    );

    // B's quantum expires at the next decision; A runs again.
    timer::advance_for_test(1);
    let next = sched::with_scheduler(|s| s.schedule()).unwrap().unwrap();
    assert_eq!(next.to, a);
}

#[test]
fn test_user_pointer_rejection_scenario() {
    let env = KernelEnv::new();

    // 0xC0001000 lies above the user/kernel split.
    let ret = syscall::dispatch(Syscall::Write as usize, [1, 0xC000_1000, 16, 0, 0]);
    assert_eq!(ret, -(errno::EFAULT as isize));
    assert!(env.terminal_output().is_empty());
}

// ---------------------------------------------------------------------------
// Cross-subsystem behavior beyond the literal scenarios
// ---------------------------------------------------------------------------

#[test]
fn test_file_io_through_syscalls() {
    let env = KernelEnv::new();

    env.poke_user_str(USER_PAGE, "/notes.txt");

    // open(O_WRONLY | O_CREAT)
    let fd = syscall::dispatch(
        Syscall::Open as usize,
        [USER_PAGE as usize, 0x0001 | 0x0040, 0, 0, 0],
    );
    assert_eq!(fd, 3);

    env.poke_user(USER_PAGE + 0x200, b"hello disk");
    let ret = syscall::dispatch(
        Syscall::Write as usize,
        [fd as usize, (USER_PAGE + 0x200) as usize, 10, 0, 0],
    );
    assert_eq!(ret, 10);

    assert_eq!(
        syscall::dispatch(Syscall::Close as usize, [fd as usize, 0, 0, 0, 0]),
        0
    );

    // Reopen read-only and read it back through user memory.
    let fd = syscall::dispatch(Syscall::Open as usize, [USER_PAGE as usize, 0, 0, 0, 0]);
    assert_eq!(fd, 3);
    let ret = syscall::dispatch(
        Syscall::Read as usize,
        [fd as usize, (USER_PAGE + 0x400) as usize, 32, 0, 0],
    );
    assert_eq!(ret, 10);

    // tell() reflects the read.
    assert_eq!(
        syscall::dispatch(Syscall::Tell as usize, [fd as usize, 0, 0, 0, 0]),
        10
    );

    // Verify the bytes really landed in user memory.
    let mut back = [0u8; 10];
    vmm::with_kernel_space(|space| {
        crate::mm::user_validation::copy_from_user(
            space,
            vmm::phys_access(),
            &mut back,
            USER_PAGE + 0x400,
        )
    })
    .unwrap()
    .unwrap();
    assert_eq!(&back, b"hello disk");
}

#[test]
fn test_cwd_and_namespace_syscalls() {
    let env = KernelEnv::new();

    env.poke_user_str(USER_PAGE, "/work");
    assert_eq!(
        syscall::dispatch(Syscall::Mkdir as usize, [USER_PAGE as usize, 0, 0, 0, 0]),
        0
    );
    assert_eq!(
        syscall::dispatch(Syscall::Chdir as usize, [USER_PAGE as usize, 0, 0, 0, 0]),
        0
    );

    // getcwd round-trips through user memory.
    let ret = syscall::dispatch(
        Syscall::Getcwd as usize,
        [(USER_PAGE + 0x100) as usize, 64, 0, 0, 0],
    );
    assert_eq!(ret, 5);
    let mut buf = [0u8; 6];
    vmm::with_kernel_space(|space| {
        crate::mm::user_validation::copy_from_user(
            space,
            vmm::phys_access(),
            &mut buf,
            USER_PAGE + 0x100,
        )
    })
    .unwrap()
    .unwrap();
    assert_eq!(&buf, b"/work\0");

    // Relative paths resolve against the new cwd.
    env.poke_user_str(USER_PAGE + 0x200, "sub");
    assert_eq!(
        syscall::dispatch(
            Syscall::Mkdir as usize,
            [(USER_PAGE + 0x200) as usize, 0, 0, 0, 0]
        ),
        0
    );
    assert!(fs::vfs_stat("/work/sub").is_ok());

    // unlink through the syscall surface.
    env.poke_user_str(USER_PAGE + 0x300, "/work/sub");
    assert_eq!(
        syscall::dispatch(
            Syscall::Unlink as usize,
            [(USER_PAGE + 0x300) as usize, 0, 0, 0, 0]
        ),
        0
    );
    assert!(fs::vfs_stat("/work/sub").is_err());
}

#[test]
fn test_tty_syscalls() {
    let env = KernelEnv::new();

    keyboard::push_key('h' as i32);
    keyboard::push_key('i' as i32);
    keyboard::push_key('\n' as i32);

    let ret = syscall::dispatch(
        Syscall::Read as usize,
        [0, USER_PAGE as usize, 8, 0, 0],
    );
    assert_eq!(ret, 3);
    let mut buf = [0u8; 3];
    vmm::with_kernel_space(|space| {
        crate::mm::user_validation::copy_from_user(space, vmm::phys_access(), &mut buf, USER_PAGE)
    })
    .unwrap()
    .unwrap();
    assert_eq!(&buf, b"hi\n");

    // Sentinels come back through readkey as negative values.
    keyboard::push_key(keyboard::KEY_UP);
    assert_eq!(
        syscall::dispatch(Syscall::Readkey as usize, [0; 5]),
        keyboard::KEY_UP as isize
    );

    // kbhit / kbflush.
    keyboard::push_key('x' as i32);
    assert_eq!(syscall::dispatch(Syscall::Kbhit as usize, [0; 5]), 1);
    assert_eq!(syscall::dispatch(Syscall::Kbflush as usize, [0; 5]), 0);
    assert_eq!(syscall::dispatch(Syscall::Kbhit as usize, [0; 5]), 0);

    let _ = env;
}

#[test]
fn test_ioctl_addresses_driver_by_name() {
    let env = KernelEnv::new();

    // The global registry persists across scenarios; the first run
    // registers, later runs find the instance already there.
    let _ = keyboard::register_driver();

    keyboard::flush_keys();
    keyboard::push_key('z' as i32);

    env.poke_user_str(USER_PAGE, "kbd0");
    let ret = syscall::dispatch(
        Syscall::Ioctl as usize,
        [
            USER_PAGE as usize,
            keyboard::KBD_IOCTL_QUEUED as usize,
            0,
            0,
            0,
        ],
    );
    assert_eq!(ret, 1);
    keyboard::flush_keys();

    // Unknown driver names surface ENODEV.
    env.poke_user_str(USER_PAGE, "no-such-driver");
    let ret = syscall::dispatch(
        Syscall::Ioctl as usize,
        [USER_PAGE as usize, 0, 0, 0, 0],
    );
    assert_eq!(ret, -(errno::ENODEV as isize));
}

#[test]
fn test_uname_syscall() {
    let env = KernelEnv::new();
    let ret = syscall::dispatch(Syscall::Uname as usize, [USER_PAGE as usize, 0, 0, 0, 0]);
    assert_eq!(ret, 0);

    let mut sysname = [0u8; 8];
    vmm::with_kernel_space(|space| {
        crate::mm::user_validation::copy_from_user(space, vmm::phys_access(), &mut sysname, USER_PAGE)
    })
    .unwrap()
    .unwrap();
    assert_eq!(&sysname, b"CinderOS");
    let _ = env;
}

#[test]
fn test_readonly_mount_rejects_mutation() {
    let _env = KernelEnv::new();

    fs::vfs_mkdir("/ro").unwrap();
    fs::vfs_mount("/ro", "ramfs", None, MountFlags::READ_ONLY).unwrap();

    let err = fs::vfs_mkdir("/ro/new").unwrap_err();
    assert_eq!(err.to_errno(), errno::EACCES);
    let err = fs::vfs_open("/ro/file", OpenFlags::WRITE | OpenFlags::CREATE).unwrap_err();
    assert_eq!(err.to_errno(), errno::EACCES);
}

#[test]
fn test_unmount_busy_and_force() {
    let _env = KernelEnv::new();

    fs::vfs_mkdir("/data").unwrap();
    fs::vfs_mount("/data", "ramfs", None, MountFlags::empty()).unwrap();

    let file = fs::vfs_open("/data/f", OpenFlags::WRITE | OpenFlags::CREATE).unwrap();
    let err = fs::vfs_unmount("/data", UmountFlags::empty()).unwrap_err();
    assert_eq!(err.to_errno(), errno::EBUSY);

    // Closing releases the reference; unmount proceeds.
    fs::vfs_close(file);
    fs::vfs_unmount("/data", UmountFlags::empty()).unwrap();

    // The root mount can never be unmounted, forced or not.
    assert!(fs::vfs_unmount("/", UmountFlags::FORCE).is_err());
}

#[test]
fn test_mount_longest_prefix_and_bind() {
    let _env = KernelEnv::new();

    fs::vfs_mkdir("/mnt").unwrap();
    fs::vfs_mkdir("/mnt/x").unwrap();
    fs::vfs_mount("/mnt/x", "ramfs", None, MountFlags::empty()).unwrap();

    // Spec property: /mnt/x wins over / for /mnt/x/foo.
    let (mp, residual) = fs::with_vfs(|v| v.mount_for_path("/mnt/x/foo")).unwrap().unwrap();
    assert_eq!(mp, "/mnt/x");
    assert_eq!(residual, "foo");

    // Files created under the mount resolve through it.
    let f = fs::vfs_open("/mnt/x/foo", OpenFlags::WRITE | OpenFlags::CREATE).unwrap();
    fs::vfs_close(f);

    // Bind /mnt/x at /bind and see the same file.
    fs::vfs_mkdir("/bind").unwrap();
    fs::vfs_bind_mount("/mnt/x", "/bind", MountFlags::empty()).unwrap();
    assert!(fs::vfs_stat("/bind/foo").is_ok());

    // A bind can add read-only on top of a writable source.
    fs::vfs_mkdir("/bindro").unwrap();
    fs::vfs_bind_mount("/mnt/x", "/bindro", MountFlags::READ_ONLY).unwrap();
    let err = fs::vfs_open("/bindro/other", OpenFlags::WRITE | OpenFlags::CREATE).unwrap_err();
    assert_eq!(err.to_errno(), errno::EACCES);
}

#[test]
fn test_symlink_resolution_and_loops() {
    let _env = KernelEnv::new();

    fs::vfs_mkdir("/etc").unwrap();
    let f = fs::vfs_open("/etc/config", OpenFlags::WRITE | OpenFlags::CREATE).unwrap();
    fs::vfs_close(f);
    fs::vfs_symlink("/etc/config", "/cfg").unwrap();

    // Following and not following.
    assert_eq!(fs::vfs_stat("/cfg").unwrap().kind, fs::VnodeKind::File);
    assert_eq!(fs::vfs_readlink("/cfg").unwrap(), "/etc/config");

    // A two-link cycle trips the depth bound.
    fs::vfs_symlink("/loop-b", "/loop-a").unwrap();
    fs::vfs_symlink("/loop-a", "/loop-b").unwrap();
    let err = fs::vfs_stat("/loop-a").unwrap_err();
    assert_eq!(err.to_errno(), errno::ELOOP);
}

#[test]
fn test_destroying_running_task_is_rejected() {
    let _env = KernelEnv::new();

    let a = sched::task_create("victim", noop_entry, 0, Priority::Normal).unwrap();
    sched::with_scheduler(|s| s.schedule()).unwrap();

    // `a` is now current; destroying it from "itself" must fail.
    assert!(sched::task_destroy(a).is_err());

    // Another task can be destroyed immediately.
    let b = sched::task_create("other", noop_entry, 0, Priority::Normal).unwrap();
    sched::task_destroy(b).unwrap();
    assert_eq!(
        sched::with_scheduler(|s| s.state(b)).unwrap(),
        Some(TaskState::Zombie)
    );
}

// ---------------------------------------------------------------------------
// Property tests
// ---------------------------------------------------------------------------

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_normalize_idempotent_and_clean(path in "(/([a-z]{1,6}|\\.|\\.\\.)){1,8}") {
            if let Ok(once) = fs::normalize_path(&path) {
                let twice = fs::normalize_path(&once).unwrap();
                prop_assert_eq!(&once, &twice);
                // Normal form: no '.' or '..' components survive.
                for comp in fs::path::components(&once) {
                    prop_assert_ne!(comp, ".");
                    prop_assert_ne!(comp, "..");
                }
            }
        }

        #[test]
        fn prop_pmm_conservation(holds in prop::collection::vec(any::<bool>(), 1..64)) {
            let mut a = Box::new(crate::mm::FrameAllocator::new());
            a.init(
                &[MemoryRegion::new(
                    crate::mm::LOW_MEMORY_FLOOR,
                    64 * PAGE_SIZE as u32,
                )],
                PhysAddr::new(crate::mm::LOW_MEMORY_FLOOR),
            );
            let total = a.total_pages();

            let mut held = Vec::new();
            for keep in holds {
                if let Some(frame) = a.alloc_page() {
                    prop_assert!(frame.as_u32() >= crate::mm::LOW_MEMORY_FLOOR);
                    if keep {
                        held.push(frame);
                    } else {
                        a.free_page(frame).unwrap();
                    }
                }
            }
            prop_assert_eq!(a.free_pages(), total - held.len());
            for frame in held {
                a.free_page(frame).unwrap();
            }
            prop_assert_eq!(a.free_pages(), total);
        }

        #[test]
        fn prop_partition_bounds(
            part_start in 0u64..2048,
            part_len in 1u64..2048,
            lba in 0u64..4096,
            count in 1u32..16,
        ) {
            let disk_sectors = 4096u64;
            prop_assume!(part_start + part_len <= disk_sectors);

            let mut t = crate::block::DiskTable::new();
            let disk = crate::block::MemDisk::new(disk_sectors, crate::block::SECTOR_SIZE);
            let id = t.register_disk(
                0,
                crate::block::TransportKind::PataDisk,
                disk_sectors,
                false,
                Box::new(disk),
            );
            let part = t.register_partition(id, part_start, part_len).unwrap();

            let mut buf = vec![0u8; count as usize * crate::block::SECTOR_SIZE];
            let result = t.read(part, lba, count, &mut buf);
            // Success exactly when the request fits inside the partition.
            if lba + count as u64 <= part_len {
                prop_assert!(result.is_ok());
            } else {
                prop_assert_eq!(result, Err(crate::block::DiskError::LbaOutOfRange));
            }
        }

        #[test]
        fn prop_mmu_map_translate_unmap(pages in prop::collection::btree_set(0u32..512, 1..8)) {
            let arena = TestMemory::new(64);
            let mut frames = arena.frames();
            let mut space = AddressSpace::new(&mut frames, &arena).unwrap();

            let mut mappings = Vec::new();
            for page in &pages {
                let virt = VirtAddr::new(0x0100_0000 + page * PAGE_SIZE as u32);
                let Some(phys) = frames.alloc_frame() else { break };
                space
                    .map(&arena, &mut frames, virt, phys, PageFlags::user_rw())
                    .unwrap();
                mappings.push((virt, phys));
            }

            for (virt, phys) in &mappings {
                prop_assert_eq!(space.virt_to_phys(&arena, *virt), Some(*phys));
                prop_assert_eq!(space.page_flags(&arena, *virt), Some(PageFlags::user_rw()));
            }
            for (virt, phys) in &mappings {
                let freed = space.unmap(&arena, &mut frames, *virt).unwrap();
                prop_assert_eq!(freed, *phys);
                prop_assert_eq!(space.virt_to_phys(&arena, *virt), None);
            }
        }
    }
}
