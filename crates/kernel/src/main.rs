#![no_std]
#![no_main]

use core::arch::global_asm;
use core::panic::PanicInfo;

use kernel::kprintln;

const MULTIBOOT_HEADER_MAGIC: u32 = 0x1BAD_B002;
/// Page-align modules, provide the memory map.
const MULTIBOOT_HEADER_FLAGS: u32 = (1 << 0) | (1 << 1);
const BOOT_STACK_SIZE: usize = 32 * 1024;

global_asm!(
    r#"
.section .multiboot, "a"
.balign 4
    .long {magic}
    .long {flags}
    .long -({magic} + {flags})

.section .bss
.balign 16
boot_stack_bottom:
    .skip {stack_size}
boot_stack_top:

.section .text
.global _start
_start:
    cli
    mov esp, offset boot_stack_top
    xor ebp, ebp
    push ebx
    push eax
    call {main}
2:
    hlt
    jmp 2b
"#,
    magic = const MULTIBOOT_HEADER_MAGIC,
    flags = const MULTIBOOT_HEADER_FLAGS,
    stack_size = const BOOT_STACK_SIZE,
    main = sym kernel_main,
);

extern "C" fn kernel_main(magic: u32, info: u32) -> ! {
    kernel::entry(magic, info)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    kprintln!("panic: {}", info);
    arch_i686::halt_forever()
}
