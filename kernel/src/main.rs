//! Bare-metal entry point. Boots via `bootloader_api`'s UEFI/BIOS loader,
//! which hands us a physical memory map the PMM bitmap allocator seeds
//! itself from (spec.md §4.1).

#![no_std]
#![no_main]
#![feature(abi_x86_interrupt)]

use core::panic::PanicInfo;

use aos_kernel::{mm, println, sched};
use bootloader_api::{entry_point, BootInfo, BootloaderConfig};

static BOOTLOADER_CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(bootloader_api::config::Mapping::Dynamic);
    config
};

entry_point!(kernel_main, config = &BOOTLOADER_CONFIG);

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    println!("aOS v{}", env!("CARGO_PKG_VERSION"));
    println!("booting...");

    aos_kernel::init();
    mm::seed_from_boot_info(boot_info);

    println!("aOS initialized, entering scheduler");
    sched::run();
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    aos_kernel::panic::handle(info)
}
