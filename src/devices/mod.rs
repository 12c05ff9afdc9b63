//! Device access policy for cgroup v2 containers.
//!
//! With the v1 `devices` controller gone from the unified hierarchy, device
//! policy is enforced by a classifier program attached to the container's
//! cgroup directory. This module owns the process-wide set of loaded
//! programs: one per cgroup directory, each behind its own mutex, replaced
//! atomically when the container manager pushes a new ruleset.

mod bpf;
mod rule;

pub use bpf::{
    ATTACH_TYPE_CGROUP_DEVICE, BPF_F_ALLOW_MULTI, BPF_F_ALLOW_OVERRIDE, Insn, Program, supported,
};
pub use rule::{Access, DefaultPolicy, DeviceRule, DeviceType, ParseError, RulesetEntry};

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::OnceLock;

use dashmap::DashMap;

use crate::error::OpError;

/// The process-wide registry of attached device programs.
#[derive(Debug, Default)]
pub struct DeviceController {
    programs: DashMap<PathBuf, Mutex<Program>>,
    support: OnceLock<bool>,
}

impl DeviceController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this kernel supports device cgroup programs at all.
    ///
    /// Probed once with a trivial load attempt; the answer is cached for
    /// the life of the process.
    pub fn supported(&self) -> bool {
        *self.support.get_or_init(bpf::supported)
    }

    /// Assembles, loads and attaches the classifier for a ruleset.
    ///
    /// An existing program on the same cgroup directory is replaced
    /// atomically via `BPF_F_ALLOW_OVERRIDE`; the replaced program's handle
    /// is released without detaching, since the kernel has already swapped
    /// it out.
    ///
    /// # Errors
    ///
    /// `NotSupported` on kernels without the feature (the rest of the
    /// filesystem keeps operating), `NotFound` when the cgroup directory is
    /// gone, `Busy` on attach conflicts, assembly errors from
    /// [`Program::assemble`].
    pub fn apply(&self, cgroup_dir: &Path, entries: &[RulesetEntry]) -> Result<(), OpError> {
        if !self.supported() {
            return Err(OpError::NotSupported("device cgroup"));
        }

        let mut program = Program::assemble(entries)?;
        program.attach(cgroup_dir, BPF_F_ALLOW_OVERRIDE)?;

        if let Some(previous) = self
            .programs
            .insert(cgroup_dir.to_path_buf(), Mutex::new(program))
        {
            let mut previous = previous.into_inner().expect("program lock poisoned");
            previous.forget_attachment();
        }

        log::debug!(
            "installed device policy with {} entries on {}",
            entries.len(),
            cgroup_dir.display()
        );
        Ok(())
    }

    /// Detaches the program attached to one cgroup directory, if any.
    pub fn remove(&self, cgroup_dir: &Path) -> Result<(), OpError> {
        if let Some((_, program)) = self.programs.remove(cgroup_dir) {
            program
                .into_inner()
                .expect("program lock poisoned")
                .detach()?;
        }
        Ok(())
    }

    /// Detaches every program; invoked during orderly shutdown.
    pub fn detach_all(&self) {
        let paths: Vec<PathBuf> = self
            .programs
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for path in paths {
            if let Err(err) = self.remove(&path) {
                log::warn!(
                    "failed to detach device program from {}: {err}",
                    path.display()
                );
            }
        }
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_ruleset_from_text() {
        let entries = vec![
            RulesetEntry::Default(DefaultPolicy::Allowlist),
            RulesetEntry::Rule(DeviceRule::parse("c 1:3 rwm", true).unwrap()),
            RulesetEntry::Rule(DeviceRule::parse("b 8:* r", true).unwrap()),
        ];
        let program = Program::assemble(&entries).unwrap();
        // Prologue + (type+major+minor+verdict) + (type+access+major+verdict)
        // + epilogue.
        assert_eq!(program.instructions().len(), 6 + 5 + 7 + 2);
        assert_eq!(program.default_policy(), DefaultPolicy::Allowlist);
    }

    #[test]
    fn test_controller_without_support_reports_not_supported() {
        let controller = DeviceController::new();
        // Force the probe result instead of touching the kernel.
        controller.support.set(false).unwrap();

        let err = controller
            .apply(Path::new("/sys/fs/cgroup/payload"), &[])
            .unwrap_err();
        assert!(matches!(err, OpError::NotSupported(_)));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let controller = DeviceController::new();
        assert!(controller.remove(Path::new("/nonexistent")).is_ok());
        assert!(controller.is_empty());
    }
}
