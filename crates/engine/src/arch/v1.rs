//! Salis v1 bytecode architecture
//!
//! 64 opcodes decoded as `byte % INST_COUNT`. Organisms address code with
//! a template system: `key*` opcodes match the `lok*` opcode at the same
//! family position, and the seek instructions walk the seek pointer until
//! key and lock meet. Register operands are selected by `nop0..nop3`
//! modifiers trailing the opcode; unselected operands default to `r0`.
//!
//! Every completing instruction advances `ip` and mirrors it into `sp`;
//! seek and walk instructions move `sp` one byte per slice until they
//! land. All pointer arithmetic wraps in the full `u64` space and is only
//! reduced modulo memory size on access.

use std::io::{Read, Write};

use crate::arch::Architecture;
use crate::core::Core;
use crate::memory::INST_CAPS;
use crate::persist::{read_u64, write_u64};

macro_rules! inst_set {
    ($(($name:ident, $symbol:literal, $mnemonic:literal)),+ $(,)?) => {
        /// One v1 opcode.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(u8)]
        pub enum Inst {
            $($name),+
        }

        impl Inst {
            pub const COUNT: usize = Self::ALL.len();
            pub const ALL: [Inst; 64] = [$(Inst::$name),+];

            /// Decode a raw memory byte (wraps modulo the opcode count).
            pub fn from_byte(byte: u8) -> Inst {
                Self::ALL[byte as usize % Self::COUNT]
            }

            /// Display glyph.
            pub fn symbol(self) -> char {
                match self {
                    $(Inst::$name => $symbol),+
                }
            }

            /// Assembler mnemonic.
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Inst::$name => $mnemonic),+
                }
            }
        }
    };
}

inst_set! {
    (Noop, ' ', "noop"),
    (Nop0, '0', "nop0"),
    (Nop1, '1', "nop1"),
    (Nop2, '2', "nop2"),
    (Nop3, '3', "nop3"),

    (Jmpb, '(', "jmpb"),
    (Jmpf, ')', "jmpf"),
    (Adrb, '[', "adrb"),
    (Adrf, ']', "adrf"),
    (Ifnz, '?', "ifnz"),

    (Allb, '{', "allb"),
    (Allf, '}', "allf"),
    (Bswp, '%', "bswp"),
    (Bclr, '|', "bclr"),
    (Splt, '$', "splt"),

    (Addn, '+', "addn"),
    (Subn, '-', "subn"),
    (Muln, '*', "muln"),
    (Divn, '/', "divn"),
    (Incn, '^', "incn"),
    (Decn, 'v', "decn"),
    (Notn, '!', "notn"),
    (Shfl, '<', "shfl"),
    (Shfr, '>', "shfr"),
    (Zero, 'z', "zero"),
    (Unit, 'u', "unit"),

    (Pshn, '#', "pshn"),
    (Popn, '~', "popn"),

    (Load, '.', "load"),
    (Wrte, ':', "wrte"),
    (Dupl, '"', "dupl"),
    (Swap, 'x', "swap"),

    (KeyA, 'a', "keya"),
    (KeyB, 'b', "keyb"),
    (KeyC, 'c', "keyc"),
    (KeyD, 'd', "keyd"),
    (KeyE, 'e', "keye"),
    (KeyF, 'f', "keyf"),
    (KeyG, 'g', "keyg"),
    (KeyH, 'h', "keyh"),
    (KeyI, 'i', "keyi"),
    (KeyJ, 'j', "keyj"),
    (KeyK, 'k', "keyk"),
    (KeyL, 'l', "keyl"),
    (KeyM, 'm', "keym"),
    (KeyN, 'n', "keyn"),
    (KeyO, 'o', "keyo"),
    (KeyP, 'p', "keyp"),

    (LokA, 'A', "loka"),
    (LokB, 'B', "lokb"),
    (LokC, 'C', "lokc"),
    (LokD, 'D', "lokd"),
    (LokE, 'E', "loke"),
    (LokF, 'F', "lokf"),
    (LokG, 'G', "lokg"),
    (LokH, 'H', "lokh"),
    (LokI, 'I', "loki"),
    (LokJ, 'J', "lokj"),
    (LokK, 'K', "lokk"),
    (LokL, 'L', "lokl"),
    (LokM, 'M', "lokm"),
    (LokN, 'N', "lokn"),
    (LokO, 'O', "loko"),
    (LokP, 'P', "lokp"),
}

impl Inst {
    fn is_key(self) -> bool {
        (self as u8) >= (Inst::KeyA as u8) && (self as u8) <= (Inst::KeyP as u8)
    }

    #[cfg(debug_assertions)]
    fn is_lock(self) -> bool {
        (self as u8) >= (Inst::LokA as u8) && (self as u8) <= (Inst::LokP as u8)
    }

    /// Register-modifier family (`nop0..nop3`).
    fn is_rmod(self) -> bool {
        (self as u8) >= (Inst::Nop0 as u8) && (self as u8) <= (Inst::Nop3 as u8)
    }
}

/// A key matches the lock at the same family position. The probed byte
/// need not be a lock at all; anything else simply never matches.
fn key_lock_match(key: Inst, lock: Inst) -> bool {
    debug_assert!(key.is_key());
    (key as i32 - Inst::KeyA as i32) == (lock as i32 - Inst::LokA as i32)
}

/// v1 process state. The engine reads it only through the architecture
/// contract; observers iterate [`PROC_FIELDS`] instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Proc {
    pub ip: u64,
    pub sp: u64,
    pub mb0a: u64,
    pub mb0s: u64,
    pub mb1a: u64,
    pub mb1s: u64,
    pub regs: [u64; 4],
    pub stack: [u64; 8],
}

/// Field descriptors for observers, in declaration order.
pub const PROC_FIELDS: [(&str, fn(&Proc) -> u64); 18] = [
    ("ip", |p| p.ip),
    ("sp", |p| p.sp),
    ("mb0a", |p| p.mb0a),
    ("mb0s", |p| p.mb0s),
    ("mb1a", |p| p.mb1a),
    ("mb1s", |p| p.mb1s),
    ("r0", |p| p.regs[0]),
    ("r1", |p| p.regs[1]),
    ("r2", |p| p.regs[2]),
    ("r3", |p| p.regs[3]),
    ("s0", |p| p.stack[0]),
    ("s1", |p| p.stack[1]),
    ("s2", |p| p.stack[2]),
    ("s3", |p| p.stack[3]),
    ("s4", |p| p.stack[4]),
    ("s5", |p| p.stack[5]),
    ("s6", |p| p.stack[6]),
    ("s7", |p| p.stack[7]),
];

/// The v1 architecture plug.
pub struct SalisV1;

fn fetch_inst(core: &Core<SalisV1>, addr: u64) -> Inst {
    Inst::from_byte(core.mem().get_inst(addr))
}

fn increment_ip(core: &mut Core<SalisV1>, pix: u64) {
    let proc = core.procs_mut().fetch(pix);
    proc.ip = proc.ip.wrapping_add(1);
    proc.sp = proc.ip;
}

/// Resolve up to `N` register operands from the modifiers trailing the
/// opcode. `after_key` shifts the scan one byte (seek instructions carry
/// their key at `ip + 1`). Scanning stops at the first non-modifier;
/// unresolved positions stay at `r0`.
fn reg_indices<const N: usize>(core: &Core<SalisV1>, pix: u64, after_key: bool) -> [usize; N] {
    let proc = core.procs().get(pix);
    let madr = proc.ip.wrapping_add(if after_key { 2 } else { 1 });

    let mut list = [0usize; N];
    for (i, slot) in list.iter_mut().enumerate() {
        let inst = fetch_inst(core, madr.wrapping_add(i as u64));
        if !inst.is_rmod() {
            break;
        }
        *slot = (inst as u8 - Inst::Nop0 as u8) as usize;
    }
    list
}

/// Shared walk of the seek instructions. Returns true once the key after
/// the opcode matches the lock under `sp`. Without a key the instruction
/// degenerates to an ip increment; without a match `sp` drifts one byte.
fn seek(core: &mut Core<SalisV1>, pix: u64, forward: bool) -> bool {
    let (ip, sp) = {
        let proc = core.procs().get(pix);
        (proc.ip, proc.sp)
    };

    let next = fetch_inst(core, ip.wrapping_add(1));
    if !next.is_key() {
        increment_ip(core, pix);
        return false;
    }

    if key_lock_match(next, fetch_inst(core, sp)) {
        return true;
    }

    let proc = core.procs_mut().fetch(pix);
    proc.sp = if forward {
        sp.wrapping_add(1)
    } else {
        sp.wrapping_sub(1)
    };
    false
}

fn jump(core: &mut Core<SalisV1>, pix: u64) {
    #[cfg(debug_assertions)]
    {
        let proc = core.procs().get(pix);
        let next = fetch_inst(core, proc.ip.wrapping_add(1));
        let spin = fetch_inst(core, proc.sp);
        debug_assert!(next.is_key());
        debug_assert!(spin.is_lock());
        debug_assert!(key_lock_match(next, spin));
    }

    let proc = core.procs_mut().fetch(pix);
    proc.ip = proc.sp;
}

fn addr_reg(core: &mut Core<SalisV1>, pix: u64) {
    let [reg] = reg_indices::<1>(core, pix, true);
    let sp = core.procs().get(pix).sp;

    core.procs_mut().fetch(pix).regs[reg] = sp;
    increment_ip(core, pix);
}

fn if_not_zero(core: &mut Core<SalisV1>, pix: u64) {
    let [reg] = reg_indices::<1>(core, pix, false);
    let ip = core.procs().get(pix).ip;
    let jmod = u64::from(fetch_inst(core, ip.wrapping_add(1)).is_rmod());

    let proc = core.procs_mut().fetch(pix);
    let rmod = if proc.regs[reg] != 0 { 1 } else { 2 };
    proc.ip = proc.ip.wrapping_add(jmod + rmod);
    proc.sp = proc.ip;
}

fn free_block(core: &mut Core<SalisV1>, addr: u64, size: u64) {
    assert!(size != 0);
    for i in 0..size {
        core.mem_mut().free(addr.wrapping_add(i));
    }
}

fn free_child(core: &mut Core<SalisV1>, pix: u64) {
    let (mb1a, mb1s) = {
        let proc = core.procs().get(pix);
        (proc.mb1a, proc.mb1s)
    };
    free_block(core, mb1a, mb1s);

    let proc = core.procs_mut().fetch(pix);
    proc.mb1a = 0;
    proc.mb1s = 0;
}

/// Grow the child block one byte per slice, `sp` leading the way.
fn alloc_block(core: &mut Core<SalisV1>, pix: u64, forward: bool) {
    let regs = reg_indices::<2>(core, pix, false);
    let proc = *core.procs().get(pix);
    let bsize = proc.regs[regs[0]];

    // nothing requested
    if bsize == 0 {
        increment_ip(core, pix);
        return;
    }

    // cancel when sp is not adjacent to the existing child block
    if proc.mb1s != 0 {
        let expected = if forward {
            proc.mb1a.wrapping_add(proc.mb1s)
        } else {
            proc.mb1a.wrapping_sub(1)
        };
        if proc.sp != expected {
            increment_ip(core, pix);
            return;
        }
    }

    // block complete: report its address
    if proc.mb1s == bsize {
        increment_ip(core, pix);
        core.procs_mut().fetch(pix).regs[regs[1]] = proc.mb1a;
        return;
    }

    // sp collided with foreign allocation: drop the partial block, skip
    // the obstacle and keep trying
    if core.mem().is_alloc(proc.sp) {
        if proc.mb1s != 0 {
            free_child(core, pix);
        }
        let p = core.procs_mut().fetch(pix);
        p.sp = if forward {
            p.sp.wrapping_add(1)
        } else {
            p.sp.wrapping_sub(1)
        };
        return;
    }

    // enlarge by one byte
    core.mem_mut().alloc(proc.sp);
    let p = core.procs_mut().fetch(pix);
    if p.mb1s == 0 || !forward {
        p.mb1a = p.sp;
    }
    p.mb1s += 1;
    p.sp = if forward {
        p.sp.wrapping_add(1)
    } else {
        p.sp.wrapping_sub(1)
    };
}

fn block_swap(core: &mut Core<SalisV1>, pix: u64) {
    let proc = core.procs_mut().fetch(pix);
    if proc.mb1s != 0 {
        std::mem::swap(&mut proc.mb0a, &mut proc.mb1a);
        std::mem::swap(&mut proc.mb0s, &mut proc.mb1s);
    }
    increment_ip(core, pix);
}

fn block_clear(core: &mut Core<SalisV1>, pix: u64) {
    if core.procs().get(pix).mb1s != 0 {
        free_child(core, pix);
    }
    increment_ip(core, pix);
}

fn split(core: &mut Core<SalisV1>, pix: u64) {
    let proc = *core.procs().get(pix);
    if proc.mb1s != 0 {
        let child = Proc {
            ip: proc.mb1a,
            sp: proc.mb1a,
            mb0a: proc.mb1a,
            mb0s: proc.mb1s,
            ..Proc::default()
        };

        let parent = core.procs_mut().fetch(pix);
        parent.mb1a = 0;
        parent.mb1s = 0;

        core.proc_new(child);
    } else {
        debug_assert_eq!(proc.mb1a, 0);
    }
    increment_ip(core, pix);
}

fn arith3(core: &mut Core<SalisV1>, pix: u64, inst: Inst) {
    let regs = reg_indices::<3>(core, pix, false);
    let proc = core.procs_mut().fetch(pix);
    let (a, b) = (proc.regs[regs[1]], proc.regs[regs[2]]);

    match inst {
        Inst::Addn => proc.regs[regs[0]] = a.wrapping_add(b),
        Inst::Subn => proc.regs[regs[0]] = a.wrapping_sub(b),
        Inst::Muln => proc.regs[regs[0]] = a.wrapping_mul(b),
        // division by zero leaves the output untouched
        Inst::Divn => {
            if b != 0 {
                proc.regs[regs[0]] = a / b;
            }
        }
        _ => unreachable!(),
    }
    increment_ip(core, pix);
}

fn arith1(core: &mut Core<SalisV1>, pix: u64, inst: Inst) {
    let [reg] = reg_indices::<1>(core, pix, false);
    let proc = core.procs_mut().fetch(pix);
    let r = &mut proc.regs[reg];

    match inst {
        Inst::Incn => *r = r.wrapping_add(1),
        Inst::Decn => *r = r.wrapping_sub(1),
        Inst::Notn => *r = u64::from(*r == 0),
        Inst::Shfl => *r <<= 1,
        Inst::Shfr => *r >>= 1,
        Inst::Zero => *r = 0,
        Inst::Unit => *r = 1,
        _ => unreachable!(),
    }
    increment_ip(core, pix);
}

fn stack_push(core: &mut Core<SalisV1>, pix: u64) {
    let [reg] = reg_indices::<1>(core, pix, false);
    let proc = core.procs_mut().fetch(pix);

    proc.stack.copy_within(0..7, 1);
    proc.stack[0] = proc.regs[reg];
    increment_ip(core, pix);
}

fn stack_pop(core: &mut Core<SalisV1>, pix: u64) {
    let [reg] = reg_indices::<1>(core, pix, false);
    let proc = core.procs_mut().fetch(pix);

    proc.regs[reg] = proc.stack[0];
    proc.stack.copy_within(1..8, 0);
    proc.stack[7] = 0;
    increment_ip(core, pix);
}

/// Walk direction for the load/write seek pointer: the shorter distance
/// in the full wrapping `u64` space (ties go backward).
fn sp_dir(src: u64, dst: u64) -> i32 {
    if src == dst {
        0
    } else if src.wrapping_sub(dst) <= dst.wrapping_sub(src) {
        -1
    } else {
        1
    }
}

fn load_inst(core: &mut Core<SalisV1>, pix: u64) {
    let regs = reg_indices::<2>(core, pix, false);
    let (sp, target) = {
        let proc = core.procs().get(pix);
        (proc.sp, proc.regs[regs[0]])
    };

    match sp_dir(sp, target) {
        0 => {
            let value = u64::from(core.mem().get_inst(target));
            core.procs_mut().fetch(pix).regs[regs[1]] = value;
            increment_ip(core, pix);
        }
        dir => {
            let proc = core.procs_mut().fetch(pix);
            proc.sp = if dir == 1 {
                sp.wrapping_add(1)
            } else {
                sp.wrapping_sub(1)
            };
        }
    }
}

fn is_writeable_by(core: &Core<SalisV1>, addr: u64, pix: u64) -> bool {
    !core.mem().is_alloc(addr) || core.is_proc_owner(addr, pix)
}

fn write_inst(core: &mut Core<SalisV1>, pix: u64) {
    let regs = reg_indices::<2>(core, pix, false);
    let (sp, target) = {
        let proc = core.procs().get(pix);
        (proc.sp, proc.regs[regs[0]])
    };

    match sp_dir(sp, target) {
        0 => {
            if is_writeable_by(core, target, pix) {
                let value = core.procs().get(pix).regs[regs[1]];
                core.mem_mut()
                    .set_inst(target, (value % u64::from(INST_CAPS)) as u8);
            }
            increment_ip(core, pix);
        }
        dir => {
            let proc = core.procs_mut().fetch(pix);
            proc.sp = if dir == 1 {
                sp.wrapping_add(1)
            } else {
                sp.wrapping_sub(1)
            };
        }
    }
}

fn move2(core: &mut Core<SalisV1>, pix: u64, inst: Inst) {
    let regs = reg_indices::<2>(core, pix, false);
    let proc = core.procs_mut().fetch(pix);

    match inst {
        Inst::Dupl => proc.regs[regs[1]] = proc.regs[regs[0]],
        Inst::Swap => proc.regs.swap(regs[0], regs[1]),
        _ => unreachable!(),
    }
    increment_ip(core, pix);
}

impl Architecture for SalisV1 {
    type Proc = Proc;

    fn mb0_addr(core: &Core<Self>, pix: u64) -> u64 {
        debug_assert!(core.procs().is_live(pix));
        core.procs().get(pix).mb0a
    }

    fn mb0_size(core: &Core<Self>, pix: u64) -> u64 {
        debug_assert!(core.procs().is_live(pix));
        core.procs().get(pix).mb0s
    }

    fn mb1_addr(core: &Core<Self>, pix: u64) -> u64 {
        debug_assert!(core.procs().is_live(pix));
        core.procs().get(pix).mb1a
    }

    fn mb1_size(core: &Core<Self>, pix: u64) -> u64 {
        debug_assert!(core.procs().is_live(pix));
        core.procs().get(pix).mb1s
    }

    fn ip_addr(core: &Core<Self>, pix: u64) -> u64 {
        debug_assert!(core.procs().is_live(pix));
        core.procs().get(pix).ip
    }

    fn sp_addr(core: &Core<Self>, pix: u64) -> u64 {
        debug_assert!(core.procs().is_live(pix));
        core.procs().get(pix).sp
    }

    fn slice(_core: &Core<Self>, _pix: u64) -> u64 {
        1
    }

    fn step(core: &mut Core<Self>, pix: u64) {
        let inst = fetch_inst(core, core.procs().get(pix).ip);

        match inst {
            Inst::Jmpb => {
                if seek(core, pix, false) {
                    jump(core, pix);
                }
            }
            Inst::Jmpf => {
                if seek(core, pix, true) {
                    jump(core, pix);
                }
            }
            Inst::Adrb => {
                if seek(core, pix, false) {
                    addr_reg(core, pix);
                }
            }
            Inst::Adrf => {
                if seek(core, pix, true) {
                    addr_reg(core, pix);
                }
            }
            Inst::Ifnz => if_not_zero(core, pix),
            Inst::Allb => alloc_block(core, pix, false),
            Inst::Allf => alloc_block(core, pix, true),
            Inst::Bswp => block_swap(core, pix),
            Inst::Bclr => block_clear(core, pix),
            Inst::Splt => split(core, pix),
            Inst::Addn | Inst::Subn | Inst::Muln | Inst::Divn => arith3(core, pix, inst),
            Inst::Incn
            | Inst::Decn
            | Inst::Notn
            | Inst::Shfl
            | Inst::Shfr
            | Inst::Zero
            | Inst::Unit => arith1(core, pix, inst),
            Inst::Pshn => stack_push(core, pix),
            Inst::Popn => stack_pop(core, pix),
            Inst::Load => load_inst(core, pix),
            Inst::Wrte => write_inst(core, pix),
            Inst::Dupl | Inst::Swap => move2(core, pix, inst),
            // keys, locks, modifiers and noop as primary opcodes
            _ => increment_ip(core, pix),
        }
    }

    fn on_kill(core: &mut Core<Self>) {
        assert!(core.procs().pnum() > 1);

        let pfst = core.procs().pfst();
        let doomed = *core.procs().get(pfst);

        if doomed.mb0s != 0 {
            free_block(core, doomed.mb0a, doomed.mb0s);
        }
        if doomed.mb1s != 0 {
            free_block(core, doomed.mb1a, doomed.mb1s);
        }

        *core.procs_mut().fetch(pfst) = Proc::default();
    }

    fn anc_init(core: &mut Core<Self>, size: u64) {
        if size == 0 {
            return;
        }

        let base = core.anc_base();
        let clones = core.params().anc_clones;
        let spacing = core.mem().len() / clones;

        for i in 0..clones {
            let addr = base.wrapping_add(spacing * i);

            if i > 0 {
                // replicate the assembled image for this clone
                for j in 0..size {
                    let inst = core.mem().get_inst(base.wrapping_add(j));
                    core.mem_mut().alloc(addr.wrapping_add(j));
                    core.mem_mut().set_inst(addr.wrapping_add(j), inst);
                }
            }

            let proc = Proc {
                ip: addr,
                sp: addr,
                mb0a: addr,
                mb0s: size,
                ..Proc::default()
            };

            if i == 0 {
                let pfst = core.procs().pfst();
                *core.procs_mut().fetch(pfst) = proc;
            } else {
                core.proc_new(proc);
            }
        }
    }

    fn symbol(inst: u8) -> char {
        Inst::from_byte(inst).symbol()
    }

    fn mnemonic(inst: u8) -> &'static str {
        Inst::from_byte(inst).mnemonic()
    }

    fn validate_proc(core: &Core<Self>, pix: u64) {
        let proc = core.procs().get(pix);

        // mb0s may be 0 on a core seeded without an ancestor; such a
        // process owns no primary block but can still grow a child
        if proc.mb1a != 0 {
            assert!(proc.mb1s != 0);
        }

        for i in 0..proc.mb0s {
            let addr = proc.mb0a.wrapping_add(i);
            assert!(core.mem().is_alloc(addr));
            assert!(core.is_proc_owner(addr, pix));
        }

        for i in 0..proc.mb1s {
            let addr = proc.mb1a.wrapping_add(i);
            assert!(core.mem().is_alloc(addr));
            assert!(core.is_proc_owner(addr, pix));
        }
    }

    fn store_proc<W: Write>(proc: &Proc, w: &mut W) -> std::io::Result<()> {
        write_u64(w, proc.ip)?;
        write_u64(w, proc.sp)?;
        write_u64(w, proc.mb0a)?;
        write_u64(w, proc.mb0s)?;
        write_u64(w, proc.mb1a)?;
        write_u64(w, proc.mb1s)?;
        for reg in proc.regs {
            write_u64(w, reg)?;
        }
        for slot in proc.stack {
            write_u64(w, slot)?;
        }
        Ok(())
    }

    fn load_proc<R: Read>(r: &mut R) -> std::io::Result<Proc> {
        let mut proc = Proc {
            ip: read_u64(r)?,
            sp: read_u64(r)?,
            mb0a: read_u64(r)?,
            mb0s: read_u64(r)?,
            mb1a: read_u64(r)?,
            mb1s: read_u64(r)?,
            ..Proc::default()
        };
        for reg in &mut proc.regs {
            *reg = read_u64(r)?;
        }
        for slot in &mut proc.stack {
            *slot = read_u64(r)?;
        }
        Ok(proc)
    }
}
