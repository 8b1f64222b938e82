use gbcore::convention::Term;
use gbcore::memory::Memory;
use gbcore::mmunit::Mmunit;
use std::io::Write as _;
use std::path::PathBuf;

// Nintendo's boot-up logo, checked by every real Game Boy (and here) before a cartridge is
// allowed to run. Not test-specific data of our own invention -- it is fixed by the hardware.
#[rustfmt::skip]
const NINTENDO_LOGO: [u8; 48] = [
    0xce, 0xed, 0x66, 0x66, 0xcc, 0x0d, 0x00, 0x0b, 0x03, 0x73, 0x00, 0x83, 0x00, 0x0c, 0x00, 0x0d,
    0x00, 0x08, 0x11, 0x1f, 0x88, 0x89, 0x00, 0x0e, 0xdc, 0xcc, 0x6e, 0xe6, 0xdd, 0xdd, 0xd9, 0x99,
    0xbb, 0xbb, 0x67, 0x63, 0x6e, 0x0e, 0xec, 0xcc, 0xdd, 0xdc, 0x99, 0x9f, 0xbb, 0xb9, 0x33, 0x3e,
];

// Writes a minimal valid ROM-only cartridge image to a unique file under the system temp
// directory and returns the path. The caller is responsible for cleanup.
fn write_sample_rom(name: &str) -> PathBuf {
    let mut rom = vec![0u8; 2 * 0x4000];
    rom[0x0104..0x0104 + 48].copy_from_slice(&NINTENDO_LOGO);
    rom[0x0147] = 0x00; // ROM only
    rom[0x0148] = 0x00; // 2 banks
    rom[0x0149] = 0x00; // no RAM
    let mut checksum: u8 = 0;
    for b in rom.iter().take(0x014d).skip(0x0134) {
        checksum = checksum.wrapping_sub(*b).wrapping_sub(1);
    }
    rom[0x014d] = checksum;

    let path = std::env::temp_dir().join(format!("gbcore-test-{}-{}.gb", name, std::process::id()));
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(&rom).unwrap();
    path
}

#[test]
fn oam_dma_copies_source_page_into_oam() {
    let path = write_sample_rom("oam-dma");
    let mut mmu = Mmunit::power_up(&path);

    for i in 0..0xa0u16 {
        mmu.set(0xc000 + i, (i & 0xff) as u8);
    }
    mmu.set(0xff46, 0xc0);

    for i in 0..0xa0u16 {
        assert_eq!(mmu.get(0xfe00 + i), (i & 0xff) as u8);
    }
    std::fs::remove_file(&path).ok();
}

#[test]
fn boot_rom_overlay_intercepts_low_memory_until_disabled() {
    let path = write_sample_rom("boot-rom");
    let mut boot = vec![0u8; 0x100];
    boot[0x00] = 0xaa;
    let mut mmu = Mmunit::power_up_with_boot_rom(&path, Some(boot));

    // 0xff50 reads back 0x00 (enabled) before the game has disabled it.
    assert_eq!(mmu.get(0xff50), 0x00);
    assert_eq!(mmu.get(0x0000), 0xaa);

    mmu.set(0xff50, 0x01);
    assert_eq!(mmu.get(0xff50), 0x01);
    // Once disabled, low memory falls through to the cartridge again.
    assert_eq!(mmu.get(0x0000), 0x00);
    std::fs::remove_file(&path).ok();
}

#[test]
fn no_boot_rom_means_0xff50_reads_back_disabled() {
    let path = write_sample_rom("no-boot-rom");
    let mmu = Mmunit::power_up(&path);
    assert_eq!(mmu.get(0xff50), 0x01);
    std::fs::remove_file(&path).ok();
}

#[test]
fn timer_overflow_raises_timer_interrupt() {
    let path = write_sample_rom("timer-overflow");
    let mut mmu = Mmunit::power_up(&path);

    // Fastest TAC frequency (every 16 cycles), TMA set so one overflow happens quickly.
    mmu.set(0xff06, 0x00); // TMA
    mmu.set(0xff05, 0xff); // TIMA, one tick from overflow
    mmu.set(0xff07, 0x05); // TAC: enabled, divider /16

    assert_eq!(mmu.get(0xff0f) & 0x04, 0x00);
    mmu.next(16);
    assert_eq!(mmu.get(0xff0f) & 0x04, 0x04);
    std::fs::remove_file(&path).ok();
}

#[test]
fn hdma5_reports_completed_transfer_and_block_count() {
    let path = write_sample_rom("hdma5");
    let mut mmu = Mmunit::power_up(&path);
    mmu.set(0xff51, 0x00); // source high
    mmu.set(0xff52, 0x00); // source low
    mmu.set(0xff53, 0x00); // dest high (masked into 0x8000 range)
    mmu.set(0xff54, 0x00); // dest low
    mmu.set(0xff55, 0x00); // general-purpose DMA, 1 block

    // A general-purpose transfer runs to completion immediately on the next `next()`.
    mmu.next(4);
    assert_eq!(mmu.get(0xff55) & 0x80, 0x80);
    std::fs::remove_file(&path).ok();
}

#[test]
fn gpu_mode_sequence_advances_through_oam_vram_hblank() {
    let path = write_sample_rom("gpu-mode");
    let mut mmu = Mmunit::power_up(&path);
    mmu.set(0xff40, 0x80); // LCD on only

    // A few dots in, still inside the OAM-scan window (1..=80).
    mmu.next(4);
    assert_eq!(mmu.get(0xff41) & 0x03, 0x02);
    // Past dot 80: VRAM-draw window (81..=252).
    mmu.next(81);
    assert_eq!(mmu.get(0xff41) & 0x03, 0x03);
    // Past dot 252: HBlank for the remainder of the scanline.
    mmu.next(172);
    assert_eq!(mmu.get(0xff41) & 0x03, 0x00);
    std::fs::remove_file(&path).ok();
}
