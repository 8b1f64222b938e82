// The orchestrator: owns the CPU and the MMU directly and drives them one instruction, or one
// frame, at a time. No shared/interior-mutable back-pointer between the two; each call borrows
// whichever piece it needs for as long as it needs it.
use super::convention::Term;
use super::cpu::Cpu;
use super::joypad::JoypadKey;
use super::memory::Memory;
use super::mmunit::Mmunit;
use std::path::Path;

// One full frame at base speed.
const DOTS_PER_FRAME: u32 = 70224;

pub struct MotherBoard {
    pub mmu: Mmunit,
    pub cpu: Cpu,
}

impl MotherBoard {
    pub fn power_up(term: Term, path: impl AsRef<Path>) -> Self {
        Self { mmu: Mmunit::power_up(path), cpu: Cpu::power_up(term) }
    }

    pub fn power_up_with_boot_rom(term: Term, path: impl AsRef<Path>, boot_rom: Option<Vec<u8>>) -> Self {
        Self { mmu: Mmunit::power_up_with_boot_rom(path, boot_rom), cpu: Cpu::power_up(term) }
    }

    // Executes a single instruction (or interrupt dispatch, or one tick of STOP/HALT idling) and
    // drives every other peripheral by the resulting number of dot-cycles. Returns those cycles.
    //
    // The opcode is peeked before `cpu.next` runs so a pending speed switch can be performed
    // immediately after the STOP that armed it completes, matching how the peeked instruction
    // decides (from the still-unconsumed KEY1 arm bit) whether to latch into low power at all.
    // Mmunit::switch_speed clears that arm bit unconditionally, so it must run after, not before,
    // cpu.next reads it.
    pub fn do_cycle(&mut self) -> u32 {
        let is_stop = self.mmu.get(self.cpu.reg.pc) == 0x10;
        let cycles = self.cpu.next(&mut self.mmu) * 4;
        if is_stop {
            self.mmu.switch_speed();
        }
        self.mmu.next(cycles)
    }

    // Runs instructions until the GPU latches a completed frame or the accumulated dot-cycles
    // exceed one frame's worth, whichever comes first; a CPU that reports zero cycles (the
    // STOP/HALT idle path) still makes progress one dot-cycle at a time so this always
    // terminates.
    pub fn step_frame(&mut self) {
        self.mmu.gpu.v_blank = false;
        let mut frame_cycles: u32 = 0;
        while frame_cycles < DOTS_PER_FRAME {
            let cycles = self.do_cycle();
            if cycles == 0 {
                break;
            }
            frame_cycles += cycles;
            if self.mmu.gpu.v_blank {
                break;
            }
        }
    }

    pub fn check_and_reset_gpu_updated(&mut self) -> bool {
        let result = self.mmu.gpu.v_blank;
        self.mmu.gpu.v_blank = false;
        result
    }

    pub fn get_gpu_data(&self) -> Vec<u8> {
        let mut d = vec![];
        for l in self.mmu.gpu.data.iter() {
            for w in l.iter() {
                d.extend(w);
            }
        }
        d
    }

    pub fn keyup(&mut self, key: JoypadKey) {
        self.mmu.joypad.keyup(key);
    }

    pub fn keydown(&mut self, key: JoypadKey) {
        self.mmu.joypad.keydown(key);
    }

    pub fn romname(&self) -> String {
        self.mmu.cartridge.title()
    }
}
