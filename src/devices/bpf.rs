//! Assembly, loading and attachment of the device-cgroup classifier.
//!
//! On cgroup v2 hosts the `devices` controller is gone; device policy is a
//! small eBPF program attached to the cgroup directory, consulted by the
//! kernel on every device access. This module builds that program from a
//! ruleset, loads it, and attaches it with atomic-replace semantics.
//!
//! The program shape follows the kernel's expectations: a prologue that
//! unpacks the context into registers, one comparison block per rule, and
//! an epilogue returning the default policy. Jump offsets within a block
//! are tracked with a running remaining-instruction counter, so every
//! conditional jump lands exactly one instruction past the block's `exit`
//! whatever subset of comparisons the rule emits.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::path::{Path, PathBuf};

use crate::error::OpError;

use super::rule::{DefaultPolicy, RulesetEntry};

/// Kernel ABI constants. Values mirror linux/bpf.h; the context layout is
/// struct bpf_cgroup_dev_ctx.
mod abi {
    /// Instruction classes.
    pub const BPF_LDX: u8 = 0x01;
    pub const BPF_ALU: u8 = 0x04;
    pub const BPF_JMP: u8 = 0x05;
    pub const BPF_ALU64: u8 = 0x07;

    /// Size modifier for 32-bit loads (BPF_W) and the memory mode bit.
    pub const BPF_W: u8 = 0x00;
    pub const BPF_MEM: u8 = 0x60;

    /// ALU/JMP operation codes.
    pub const BPF_AND: u8 = 0x50;
    pub const BPF_RSH: u8 = 0x70;
    pub const BPF_MOV: u8 = 0xb0;
    pub const BPF_JNE: u8 = 0x50;
    pub const BPF_EXIT: u8 = 0x90;

    /// Operand source: immediate or register.
    pub const BPF_K: u8 = 0x00;
    pub const BPF_X: u8 = 0x08;

    /// bpf(2) commands.
    pub const BPF_PROG_LOAD: i32 = 5;
    pub const BPF_PROG_ATTACH: i32 = 8;
    pub const BPF_PROG_DETACH: i32 = 9;

    /// BPF_PROG_TYPE_CGROUP_DEVICE.
    pub const PROG_TYPE_CGROUP_DEVICE: u32 = 15;
    /// BPF_CGROUP_DEVICE attach type.
    pub const ATTACH_TYPE_CGROUP_DEVICE: u32 = 6;

    /// Attach flags.
    pub const BPF_F_ALLOW_OVERRIDE: u32 = 1;
    pub const BPF_F_ALLOW_MULTI: u32 = 2;

    /// struct bpf_cgroup_dev_ctx field offsets: access_type (device kind in
    /// the low 16 bits, access mask in the high 16), major, minor.
    pub const CTX_ACCESS_TYPE: i16 = 0;
    pub const CTX_MAJOR: i16 = 4;
    pub const CTX_MINOR: i16 = 8;
}

pub use abi::{ATTACH_TYPE_CGROUP_DEVICE, BPF_F_ALLOW_MULTI, BPF_F_ALLOW_OVERRIDE};

/// One eBPF instruction, laid out as struct bpf_insn: the dst register in
/// the low nibble of `regs`, src in the high nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Insn {
    code: u8,
    regs: u8,
    off: i16,
    imm: i32,
}

impl Insn {
    fn new(code: u8, dst: u8, src: u8, off: i16, imm: i32) -> Self {
        Self {
            code,
            regs: (dst & 0x0f) | (src << 4),
            off,
            imm,
        }
    }

    /// `dst = *(u32 *)(src + off)`
    fn ldx_mem_w(dst: u8, src: u8, off: i16) -> Self {
        Self::new(abi::BPF_LDX | abi::BPF_W | abi::BPF_MEM, dst, src, off, 0)
    }

    /// `dst &= imm` (32-bit)
    fn alu32_and_imm(dst: u8, imm: i32) -> Self {
        Self::new(abi::BPF_ALU | abi::BPF_AND | abi::BPF_K, dst, 0, 0, imm)
    }

    /// `dst >>= imm` (32-bit)
    fn alu32_rsh_imm(dst: u8, imm: i32) -> Self {
        Self::new(abi::BPF_ALU | abi::BPF_RSH | abi::BPF_K, dst, 0, 0, imm)
    }

    /// `dst = imm`
    fn mov64_imm(dst: u8, imm: i32) -> Self {
        Self::new(abi::BPF_ALU64 | abi::BPF_MOV | abi::BPF_K, dst, 0, 0, imm)
    }

    /// `dst = src` (32-bit)
    fn mov32_reg(dst: u8, src: u8) -> Self {
        Self::new(abi::BPF_ALU | abi::BPF_MOV | abi::BPF_X, dst, src, 0, 0)
    }

    /// `if dst != imm goto pc + off`
    fn jne_imm(dst: u8, imm: i32, off: i16) -> Self {
        Self::new(abi::BPF_JMP | abi::BPF_JNE | abi::BPF_K, dst, 0, off, imm)
    }

    /// `if dst != src goto pc + off`
    fn jne_reg(dst: u8, src: u8, off: i16) -> Self {
        Self::new(abi::BPF_JMP | abi::BPF_JNE | abi::BPF_X, dst, src, off, 0)
    }

    fn exit() -> Self {
        Self::new(abi::BPF_JMP | abi::BPF_EXIT, 0, 0, 0, 0)
    }
}

/// Registers used by the classifier.
const REG_RET: u8 = 0;
const REG_CTX: u8 = 1;
const REG_TYPE: u8 = 2;
const REG_ACCESS: u8 = 3;
const REG_MAJOR: u8 = 4;
const REG_MINOR: u8 = 5;
/// r1 is free for scratch once the prologue has unpacked the context.
const REG_SCRATCH: u8 = 1;

/// A device-cgroup classifier program.
///
/// Built by appending rules, loaded into the kernel exactly once, and
/// attached to at most one cgroup directory. Dropping the program detaches
/// it and closes the kernel handle.
#[derive(Debug)]
pub struct Program {
    insns: Vec<Insn>,
    default_policy: DefaultPolicy,
    finalized: bool,
    kernel_fd: Option<OwnedFd>,
    attachment: Option<Attachment>,
}

#[derive(Debug)]
struct Attachment {
    path: PathBuf,
    flags: u32,
}

impl Program {
    /// Creates a program with the context-unpacking prologue and the
    /// default allowlist policy.
    pub fn new() -> Self {
        let insns = vec![
            // device kind: low 16 bits of access_type
            Insn::ldx_mem_w(REG_TYPE, REG_CTX, abi::CTX_ACCESS_TYPE),
            Insn::alu32_and_imm(REG_TYPE, 0xFFFF),
            // access mask: high 16 bits of access_type
            Insn::ldx_mem_w(REG_ACCESS, REG_CTX, abi::CTX_ACCESS_TYPE),
            Insn::alu32_rsh_imm(REG_ACCESS, 16),
            Insn::ldx_mem_w(REG_MAJOR, REG_CTX, abi::CTX_MAJOR),
            Insn::ldx_mem_w(REG_MINOR, REG_CTX, abi::CTX_MINOR),
        ];
        Self {
            insns,
            default_policy: DefaultPolicy::Allowlist,
            finalized: false,
            kernel_fd: None,
            attachment: None,
        }
    }

    /// Assembles a complete program from a ruleset.
    ///
    /// # Errors
    ///
    /// Propagates the per-entry errors of [`Program::append`].
    pub fn assemble(entries: &[RulesetEntry]) -> Result<Self, OpError> {
        let mut program = Self::new();
        for entry in entries {
            program.append(entry)?;
        }
        program.finalize()?;
        Ok(program)
    }

    /// Appends one ruleset entry.
    ///
    /// A global entry only updates the default policy. A device rule emits
    /// its match block: comparisons for exactly the attributes the rule
    /// constrains, then the verdict pair.
    ///
    /// # Errors
    ///
    /// `Busy` once the program has been loaded, `Invalid` after
    /// finalization.
    pub fn append(&mut self, entry: &RulesetEntry) -> Result<(), OpError> {
        if self.kernel_fd.is_some() {
            return Err(OpError::Busy);
        }
        if self.finalized {
            return Err(OpError::Invalid(
                "cannot append to a finalized program".to_owned(),
            ));
        }

        let rule = match entry {
            RulesetEntry::Default(policy) => {
                self.default_policy = *policy;
                return Ok(());
            }
            RulesetEntry::Rule(rule) => rule,
        };

        // Two-pass emission: the block length is known from the rule's
        // shape before anything is emitted, and `remaining` counts down as
        // instructions are appended. A conditional jump's offset is the
        // value of `remaining` after its own slot, which is exactly the
        // distance to the first instruction past the block.
        let type_value = rule.dev_type.kernel_value();
        let partial_access = !rule.access.is_all();

        let mut remaining: i16 = 2 // verdict: mov r0 + exit
            + if type_value.is_some() { 1 } else { 0 }
            + if partial_access { 3 } else { 0 }
            + if rule.major.is_some() { 1 } else { 0 }
            + if rule.minor.is_some() { 1 } else { 0 };

        if let Some(value) = type_value {
            remaining -= 1;
            self.insns.push(Insn::jne_imm(REG_TYPE, value as i32, remaining));
        }

        if partial_access {
            // Mask the requested access with the rule's; if anything was
            // requested beyond the rule's mask the result differs.
            remaining -= 1;
            self.insns.push(Insn::mov32_reg(REG_SCRATCH, REG_ACCESS));
            remaining -= 1;
            self.insns
                .push(Insn::alu32_and_imm(REG_SCRATCH, rule.access.mask() as i32));
            remaining -= 1;
            self.insns
                .push(Insn::jne_reg(REG_SCRATCH, REG_ACCESS, remaining));
        }

        if let Some(major) = rule.major {
            remaining -= 1;
            self.insns.push(Insn::jne_imm(REG_MAJOR, major as i32, remaining));
        }

        if let Some(minor) = rule.minor {
            remaining -= 1;
            self.insns.push(Insn::jne_imm(REG_MINOR, minor as i32, remaining));
        }

        self.insns
            .push(Insn::mov64_imm(REG_RET, if rule.allow { 1 } else { 0 }));
        self.insns.push(Insn::exit());

        Ok(())
    }

    /// Appends the epilogue returning the default policy.
    ///
    /// # Errors
    ///
    /// `Busy` once loaded, `Invalid` if already finalized.
    pub fn finalize(&mut self) -> Result<(), OpError> {
        if self.kernel_fd.is_some() {
            return Err(OpError::Busy);
        }
        if self.finalized {
            return Err(OpError::Invalid("program already finalized".to_owned()));
        }
        log::trace!(
            "finalizing {} device cgroup program with {} instructions",
            match self.default_policy {
                DefaultPolicy::Allowlist => "allowlist",
                DefaultPolicy::Denylist => "denylist",
            },
            self.insns.len() + 2,
        );
        self.insns
            .push(Insn::mov64_imm(REG_RET, self.default_policy.verdict() as i32));
        self.insns.push(Insn::exit());
        self.finalized = true;
        Ok(())
    }

    pub fn instructions(&self) -> &[Insn] {
        &self.insns
    }

    pub fn default_policy(&self) -> DefaultPolicy {
        self.default_policy
    }

    pub fn attached_path(&self) -> Option<&Path> {
        self.attachment.as_ref().map(|a| a.path.as_path())
    }

    /// Loads the program into the kernel. Idempotent once loaded.
    ///
    /// # Errors
    ///
    /// `NotSupported` when the kernel lacks the device cgroup program type
    /// (ENOSYS/EPERM), `Kernel` for other load failures.
    pub fn load(&mut self) -> Result<(), OpError> {
        if self.kernel_fd.is_some() {
            return Ok(());
        }

        let fd = prog_load(&self.insns)?;
        self.kernel_fd = Some(fd);
        Ok(())
    }

    /// Attaches the program to a cgroup directory.
    ///
    /// With `BPF_F_ALLOW_OVERRIDE`, re-attaching at the same path replaces
    /// the previous program atomically. Any other combination of an
    /// existing attachment and differing flags fails `Busy`.
    ///
    /// # Errors
    ///
    /// `Invalid` for unknown flags, `Busy` on conflicting attachment,
    /// `NotFound` when the cgroup directory is gone, errors of
    /// [`Program::load`].
    pub fn attach(&mut self, path: &Path, flags: u32) -> Result<(), OpError> {
        if flags & !(abi::BPF_F_ALLOW_OVERRIDE | abi::BPF_F_ALLOW_MULTI) != 0 {
            return Err(OpError::Invalid(format!(
                "invalid attach flags {flags:#x}"
            )));
        }

        if let Some(attachment) = &self.attachment {
            // A live program has at most one attachment; only a same-path
            // override re-attach may replace it.
            if attachment.flags != flags || attachment.path != path {
                return Err(OpError::Busy);
            }
            if flags != abi::BPF_F_ALLOW_OVERRIDE {
                return Ok(());
            }
        }

        self.load()?;

        let dir = open_cgroup_dir(path).map_err(|err| match err.raw_os_error() {
            Some(libc::ENOENT) => OpError::NotFound,
            _ => OpError::from(err),
        })?;

        let fd = self
            .kernel_fd
            .as_ref()
            .expect("loaded right above")
            .as_raw_fd();
        prog_attach(dir.as_raw_fd(), fd, flags)?;

        self.attachment = Some(Attachment {
            path: path.to_path_buf(),
            flags,
        });
        log::trace!(
            "loaded and attached device cgroup program to {}",
            path.display()
        );
        Ok(())
    }

    /// Detaches the program from its cgroup. Idempotent; a vanished cgroup
    /// directory counts as detached.
    ///
    /// # Errors
    ///
    /// `Kernel` if the detach call itself fails.
    pub fn detach(&mut self) -> Result<(), OpError> {
        let Some(attachment) = self.attachment.take() else {
            return Ok(());
        };

        match open_cgroup_dir(&attachment.path) {
            Ok(dir) => {
                let fd = self
                    .kernel_fd
                    .as_ref()
                    .map(|fd| fd.as_raw_fd())
                    .unwrap_or(-1);
                prog_detach(dir.as_raw_fd(), fd)?;
            }
            Err(err) if err.raw_os_error() == Some(libc::ENOENT) => {}
            Err(err) => {
                self.attachment = Some(attachment);
                return Err(err.into());
            }
        }
        Ok(())
    }

    /// Forgets the attachment without detaching.
    ///
    /// Used when another program has already replaced this one at the same
    /// path: detaching now would tear down the replacement.
    pub fn forget_attachment(&mut self) {
        self.attachment = None;
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        if let Err(err) = self.detach() {
            log::warn!("failed to detach device cgroup program on drop: {err}");
        }
    }
}

/// Probes kernel support with the smallest valid program.
///
/// `mov r0, 1; exit` loads if and only if the cgroup-device program type
/// exists and the caller is privileged enough to use it.
pub fn supported() -> bool {
    // SAFETY: geteuid has no preconditions.
    if unsafe { libc::geteuid() } != 0 {
        log::trace!("the bpf device cgroup requires real root");
        return false;
    }

    let probe = [Insn::mov64_imm(REG_RET, 1), Insn::exit()];
    match prog_load(&probe) {
        Ok(_fd) => {
            log::trace!("the bpf device cgroup is supported");
            true
        }
        Err(err) => {
            log::trace!("the bpf device cgroup is not supported: {err}");
            false
        }
    }
}

/// BPF_PROG_LOAD attribute layout (prefix of union bpf_attr).
#[repr(C)]
struct ProgLoadAttr {
    prog_type: u32,
    insn_cnt: u32,
    insns: u64,
    license: u64,
    log_level: u32,
    log_size: u32,
    log_buf: u64,
    kern_version: u32,
    prog_flags: u32,
}

/// BPF_PROG_ATTACH / BPF_PROG_DETACH attribute layout.
#[repr(C)]
struct ProgAttachAttr {
    target_fd: u32,
    attach_bpf_fd: u32,
    attach_type: u32,
    attach_flags: u32,
    replace_bpf_fd: u32,
}

fn bpf_syscall<T>(cmd: i32, attr: &T) -> std::io::Result<i64> {
    // SAFETY: attr points at a properly sized, initialized attribute
    // struct; the kernel reads exactly `size` bytes.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_bpf,
            cmd,
            attr as *const T as *const libc::c_void,
            std::mem::size_of::<T>(),
        )
    };
    if ret < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

fn prog_load(insns: &[Insn]) -> Result<OwnedFd, OpError> {
    const LICENSE: &[u8] = b"GPL\0";

    let attr = ProgLoadAttr {
        prog_type: abi::PROG_TYPE_CGROUP_DEVICE,
        insn_cnt: insns.len() as u32,
        insns: insns.as_ptr() as u64,
        license: LICENSE.as_ptr() as u64,
        log_level: 0,
        log_size: 0,
        log_buf: 0,
        kern_version: 0,
        prog_flags: 0,
    };

    match bpf_syscall(abi::BPF_PROG_LOAD, &attr) {
        // SAFETY: a successful BPF_PROG_LOAD returns a fresh fd we own.
        Ok(fd) => Ok(unsafe { OwnedFd::from_raw_fd(fd as i32) }),
        Err(err) => match err.raw_os_error() {
            Some(libc::ENOSYS) | Some(libc::EPERM) => {
                Err(OpError::NotSupported("device cgroup"))
            }
            Some(errno) => Err(OpError::Kernel(errno)),
            None => Err(OpError::Fatal(err.to_string())),
        },
    }
}

fn prog_attach(target_fd: i32, prog_fd: i32, flags: u32) -> Result<(), OpError> {
    let attr = ProgAttachAttr {
        target_fd: target_fd as u32,
        attach_bpf_fd: prog_fd as u32,
        attach_type: abi::ATTACH_TYPE_CGROUP_DEVICE,
        attach_flags: flags,
        replace_bpf_fd: 0,
    };
    bpf_syscall(abi::BPF_PROG_ATTACH, &attr)
        .map(|_| ())
        .map_err(|err| OpError::from(err))
}

fn prog_detach(target_fd: i32, prog_fd: i32) -> Result<(), OpError> {
    let attr = ProgAttachAttr {
        target_fd: target_fd as u32,
        attach_bpf_fd: prog_fd as u32,
        attach_type: abi::ATTACH_TYPE_CGROUP_DEVICE,
        attach_flags: 0,
        replace_bpf_fd: 0,
    };
    bpf_syscall(abi::BPF_PROG_DETACH, &attr)
        .map(|_| ())
        .map_err(|err| OpError::from(err))
}

fn open_cgroup_dir(path: &Path) -> std::io::Result<std::fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    std::fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_DIRECTORY | libc::O_CLOEXEC)
        .open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::rule::{Access, DeviceRule, DeviceType};

    /// Interprets the instruction subset the assembler emits, standing in
    /// for the kernel's executor in bytecode-level tests.
    fn eval(insns: &[Insn], access_type: u32, major: u32, minor: u32) -> u32 {
        let ctx = [access_type, major, minor];
        let mut reg = [0u64; 6];
        reg[REG_CTX as usize] = 1; // opaque non-null context handle

        let mut pc = 0usize;
        loop {
            let insn = insns[pc];
            pc += 1;
            let dst = (insn.regs & 0x0f) as usize;
            let src = (insn.regs >> 4) as usize;
            match insn.code {
                c if c == abi::BPF_LDX | abi::BPF_W | abi::BPF_MEM => {
                    assert_eq!(src, REG_CTX as usize, "loads must come from the context");
                    reg[dst] = ctx[(insn.off / 4) as usize] as u64;
                }
                c if c == abi::BPF_ALU | abi::BPF_AND | abi::BPF_K => {
                    reg[dst] = (reg[dst] as u32 & insn.imm as u32) as u64;
                }
                c if c == abi::BPF_ALU | abi::BPF_RSH | abi::BPF_K => {
                    reg[dst] = (reg[dst] as u32 >> insn.imm) as u64;
                }
                c if c == abi::BPF_ALU64 | abi::BPF_MOV | abi::BPF_K => {
                    reg[dst] = insn.imm as u32 as u64;
                }
                c if c == abi::BPF_ALU | abi::BPF_MOV | abi::BPF_X => {
                    reg[dst] = reg[src] as u32 as u64;
                }
                c if c == abi::BPF_JMP | abi::BPF_JNE | abi::BPF_K => {
                    if reg[dst] != insn.imm as u32 as u64 {
                        pc = (pc as i64 + insn.off as i64) as usize;
                    }
                }
                c if c == abi::BPF_JMP | abi::BPF_JNE | abi::BPF_X => {
                    if reg[dst] != reg[src] {
                        pc = (pc as i64 + insn.off as i64) as usize;
                    }
                }
                c if c == abi::BPF_JMP | abi::BPF_EXIT => {
                    return reg[REG_RET as usize] as u32;
                }
                other => panic!("unexpected opcode {other:#x} at pc {}", pc - 1),
            }
        }
    }

    fn ctx_word(dev_type: DeviceType, access_mask: u32) -> u32 {
        let kind = dev_type.kernel_value().unwrap_or(0);
        kind | (access_mask << 16)
    }

    /// Reference first-match walk over the ruleset.
    fn reference_verdict(
        entries: &[RulesetEntry],
        dev_type: DeviceType,
        major: u32,
        minor: u32,
        access_mask: u32,
    ) -> u32 {
        let mut default = DefaultPolicy::Allowlist;
        for entry in entries {
            match entry {
                RulesetEntry::Default(policy) => default = *policy,
                RulesetEntry::Rule(rule) => {
                    if rule.matches(dev_type, major, minor, access_mask) {
                        return if rule.allow { 1 } else { 0 };
                    }
                }
            }
        }
        default.verdict()
    }

    fn rule(
        dev_type: DeviceType,
        major: Option<u32>,
        minor: Option<u32>,
        access: u32,
        allow: bool,
    ) -> RulesetEntry {
        RulesetEntry::Rule(DeviceRule {
            dev_type,
            major,
            minor,
            access: Access::new(access),
            allow,
        })
    }

    #[test]
    fn test_prologue_shape() {
        let program = Program::new();
        assert_eq!(program.instructions().len(), 6);
    }

    #[test]
    fn test_jump_offsets_land_past_block_exit() {
        // All 16 combinations of (typed, partial access, major, minor).
        for shape in 0u32..16 {
            let dev_type = if shape & 1 != 0 { DeviceType::Char } else { DeviceType::Any };
            let access = if shape & 2 != 0 { Access::READ | Access::WRITE } else { Access::ALL };
            let major = if shape & 4 != 0 { Some(1) } else { None };
            let minor = if shape & 8 != 0 { Some(3) } else { None };

            let mut program = Program::new();
            program
                .append(&rule(dev_type, major, minor, access, true))
                .unwrap();

            let insns = program.instructions();
            let block_end = insns.len(); // first instruction past the exit
            for (pc, insn) in insns.iter().enumerate().skip(6) {
                let is_jump = insn.code == (abi::BPF_JMP | abi::BPF_JNE | abi::BPF_K)
                    || insn.code == (abi::BPF_JMP | abi::BPF_JNE | abi::BPF_X);
                if is_jump {
                    assert_eq!(
                        pc + 1 + insn.off as usize,
                        block_end,
                        "shape {shape:#06b}: jump at pc {pc} must land at the block end"
                    );
                }
            }
        }
    }

    #[test]
    fn test_classifier_matches_first_match_walk() {
        let type_choices = [DeviceType::Any, DeviceType::Block, DeviceType::Char];
        let number_choices = [None, Some(1), Some(8)];
        let access_choices = [
            Access::ALL,
            Access::READ,
            Access::READ | Access::WRITE,
            Access::MKNOD,
        ];

        for &dev_type in &type_choices {
            for &major in &number_choices {
                for &minor in &number_choices {
                    for &access in &access_choices {
                        for allow in [true, false] {
                            let entries = vec![
                                RulesetEntry::Default(DefaultPolicy::Allowlist),
                                rule(dev_type, major, minor, access, allow),
                            ];
                            let program = Program::assemble(&entries).unwrap();

                            for &req_type in &[DeviceType::Block, DeviceType::Char] {
                                for req_major in [1u32, 8] {
                                    for req_minor in [1u32, 3, 8] {
                                        for req_access in
                                            [Access::READ, Access::WRITE, Access::MKNOD]
                                        {
                                            let got = eval(
                                                program.instructions(),
                                                ctx_word(req_type, req_access),
                                                req_major,
                                                req_minor,
                                            );
                                            let want = reference_verdict(
                                                &entries, req_type, req_major, req_minor,
                                                req_access,
                                            );
                                            assert_eq!(
                                                got, want,
                                                "rule {dev_type:?} {major:?}:{minor:?} \
                                                 access {access:#x} allow {allow}, request \
                                                 {req_type:?} {req_major}:{req_minor} \
                                                 {req_access:#x}"
                                            );
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_char_1_3_rw_over_default_deny() {
        let entries = vec![
            RulesetEntry::Default(DefaultPolicy::Allowlist),
            rule(
                DeviceType::Char,
                Some(1),
                Some(3),
                Access::READ | Access::WRITE,
                true,
            ),
        ];
        let program = Program::assemble(&entries).unwrap();
        let insns = program.instructions();

        // (char,1,3,read) => permit
        assert_eq!(eval(insns, ctx_word(DeviceType::Char, Access::READ), 1, 3), 1);
        // (char,1,3,mknod) => deny
        assert_eq!(eval(insns, ctx_word(DeviceType::Char, Access::MKNOD), 1, 3), 0);
        // (block,1,3,read) => deny
        assert_eq!(eval(insns, ctx_word(DeviceType::Block, Access::READ), 1, 3), 0);
    }

    #[test]
    fn test_first_match_wins_across_rules() {
        let entries = vec![
            rule(DeviceType::Char, Some(1), Some(3), Access::ALL, false),
            rule(DeviceType::Char, None, None, Access::ALL, true),
            RulesetEntry::Default(DefaultPolicy::Allowlist),
        ];
        let program = Program::assemble(&entries).unwrap();
        let insns = program.instructions();

        assert_eq!(eval(insns, ctx_word(DeviceType::Char, Access::READ), 1, 3), 0);
        assert_eq!(eval(insns, ctx_word(DeviceType::Char, Access::READ), 1, 5), 1);
        assert_eq!(eval(insns, ctx_word(DeviceType::Block, Access::READ), 1, 5), 0);
    }

    #[test]
    fn test_global_entry_sets_default_without_instructions() {
        let mut program = Program::new();
        let before = program.instructions().len();
        program
            .append(&RulesetEntry::Default(DefaultPolicy::Denylist))
            .unwrap();
        assert_eq!(program.instructions().len(), before);
        assert_eq!(program.default_policy(), DefaultPolicy::Denylist);

        program.finalize().unwrap();
        assert_eq!(eval(program.instructions(), ctx_word(DeviceType::Char, Access::READ), 1, 3), 1);
    }

    #[test]
    fn test_catch_all_rule_is_unconditional_verdict() {
        let entries = vec![rule(DeviceType::Any, None, None, Access::ALL, false)];
        let mut program = Program::new();
        program.append(&entries[0]).unwrap();
        // Only the verdict pair was emitted.
        assert_eq!(program.instructions().len(), 8);
        program.finalize().unwrap();
        assert_eq!(eval(program.instructions(), ctx_word(DeviceType::Char, Access::READ), 1, 3), 0);
    }

    #[test]
    fn test_finalize_twice_fails() {
        let mut program = Program::new();
        program.finalize().unwrap();
        assert!(matches!(program.finalize(), Err(OpError::Invalid(_))));
    }

    #[test]
    fn test_insn_encoding() {
        let insn = Insn::jne_imm(REG_TYPE, 2, 7);
        assert_eq!(insn.code, 0x55);
        assert_eq!(insn.regs, 0x02);
        assert_eq!(insn.off, 7);
        assert_eq!(insn.imm, 2);

        let insn = Insn::mov32_reg(REG_SCRATCH, REG_ACCESS);
        assert_eq!(insn.code, 0xbc);
        assert_eq!(insn.regs, 0x31);

        let insn = Insn::ldx_mem_w(REG_MINOR, REG_CTX, abi::CTX_MINOR);
        assert_eq!(insn.code, 0x61);
        assert_eq!(insn.regs, 0x15);
        assert_eq!(insn.off, 8);
    }
}
