//! Patch engine
//!
//! Modules are taken in load order. Each erratum is scanned over the whole
//! image; every match gets its own plan, and the scan resumes one word after
//! the match so already-rewritten bytes are never revisited.

use arrayvec::ArrayVec;

use crate::a64::INSTRUCTION_LENGTH;
use crate::cache::CodeSync;
use crate::config::PatcherConfig;
use crate::erratum::Erratum;
use crate::error::{PatchError, Result};
use crate::handoff::{transfer_control, Continuation, Handoff};
use crate::module_list::LoadedModule;
use crate::plan::{PatchPlan, PatchSite};
use crate::scanner::Scanner;

/// Patch records kept per run; counters keep counting past it
pub const MAX_RECORDS: usize = 32;

/// One planned (and possibly applied) patch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchRecord {
    pub erratum: &'static str,
    /// Load-order index of the module
    pub module: usize,
    pub site: PatchSite,
    pub applied: bool,
}

/// Outcome of one engine run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineReport {
    pub modules_visited: usize,
    pub modules_skipped: usize,
    pub matches: usize,
    pub patches_applied: usize,
    pub rejected: usize,
    pub records: ArrayVec<PatchRecord, MAX_RECORDS>,
}

impl EngineReport {
    /// No signature was found anywhere
    pub fn is_clean(&self) -> bool {
        self.matches == 0
    }

    /// `NoSignatureFound` when nothing matched
    pub fn ensure_patched(&self) -> Result<()> {
        if self.is_clean() {
            Err(PatchError::NoSignatureFound)
        } else {
            Ok(())
        }
    }

    fn record(&mut self, record: PatchRecord) {
        if self.records.try_push(record).is_err() {
            log::debug!("Patch record list full, dropping record for module {}", record.module);
        }
    }
}

/// Scans modules and applies errata patches
#[derive(Debug)]
pub struct Engine<S: CodeSync> {
    config: PatcherConfig,
    sync: S,
}

impl<S: CodeSync> Engine<S> {
    pub fn new(config: PatcherConfig, sync: S) -> Self {
        Self { config, sync }
    }

    /// Patch every module; a malformed list aborts the run
    pub fn run<'a, I>(&mut self, modules: I) -> Result<EngineReport>
    where
        I: IntoIterator<Item = Result<LoadedModule<'a>>>,
    {
        let mut report = EngineReport::default();
        for module in modules {
            let mut module = match module {
                Ok(module) => module,
                Err(err) => {
                    log::error!("{}", err);
                    return Err(err);
                }
            };
            report.modules_visited += 1;
            self.patch_module(&mut module, &mut report);
        }

        if report.is_clean() {
            log::info!(
                "No errata found in {} modules, nothing patched",
                report.modules_visited
            );
        } else {
            log::info!(
                "{} of {} errata matches patched across {} modules",
                report.patches_applied,
                report.matches,
                report.modules_visited
            );
        }
        Ok(report)
    }

    /// Scan one module for every configured erratum
    pub fn patch_module(&mut self, module: &mut LoadedModule<'_>, report: &mut EngineReport) {
        if let Err(err) = module.descriptor.validate(self.config.memory_window) {
            log::warn!(
                "Skipping module {} '{}': {}",
                module.descriptor.index,
                module.descriptor.name,
                err
            );
            report.modules_skipped += 1;
            return;
        }
        // the loader may still be relocating or tearing down such an image
        if module.descriptor.flags.is_partially_loaded() {
            log::warn!(
                "Skipping module {} '{}': load or unload in progress ({:#x})",
                module.descriptor.index,
                module.descriptor.name,
                module.descriptor.flags.bits()
            );
            report.modules_skipped += 1;
            return;
        }
        log::trace!(
            "Scanning module {} '{}' at {:#x} ({:#x} bytes)",
            module.descriptor.index,
            module.descriptor.name,
            module.descriptor.base,
            module.descriptor.size
        );

        let errata = self.config.errata;
        for erratum in errata {
            self.patch_erratum(erratum, module, report);
        }
    }

    fn patch_erratum(
        &mut self,
        erratum: &Erratum,
        module: &mut LoadedModule<'_>,
        report: &mut EngineReport,
    ) {
        let descriptor = &module.descriptor;
        let image = &mut *module.image;
        let scanner = Scanner::new(erratum.signature);
        let mut cursor = 0;
        let mut patched_until = 0;

        while let Some(offset) = scanner.find_from(image, cursor) {
            cursor = offset + INSTRUCTION_LENGTH;
            report.matches += 1;
            log::debug!(
                "{}: signature {:#010x} in '{}' at +{:#x}",
                erratum.name,
                erratum.signature,
                descriptor.name,
                offset
            );

            let plan = match PatchPlan::for_match(erratum, offset, image.len()) {
                Ok(plan) => plan,
                Err(err) => {
                    log::warn!("{}: skipping match in '{}': {}", erratum.name, descriptor.name, err);
                    report.rejected += 1;
                    continue;
                }
            };
            let footprint = plan.footprint();
            if footprint.start < patched_until {
                let err = PatchError::OverlappingPatch { offset };
                log::warn!("{}: skipping match in '{}': {}", erratum.name, descriptor.name, err);
                report.rejected += 1;
                continue;
            }

            if !self.config.dry_run {
                if let Err(err) = plan.apply(image) {
                    log::warn!("{}: skipping match in '{}': {}", erratum.name, descriptor.name, err);
                    report.rejected += 1;
                    continue;
                }
                if self.config.sync_icache {
                    let start = image.as_ptr() as usize + footprint.start;
                    self.sync.sync_code(start, footprint.len());
                }
                report.patches_applied += 1;
            }
            patched_until = footprint.end;

            let site = *plan.site();
            log::info!(
                "{}: {} '{}' at +{:#x} (branch +{:#x}, trampoline +{:#x})",
                erratum.name,
                if self.config.dry_run { "would patch" } else { "patched" },
                descriptor.name,
                site.match_offset,
                site.branch_offset,
                site.trampoline_offset
            );
            report.record(PatchRecord {
                erratum: erratum.name,
                module: descriptor.index,
                site,
                applied: !self.config.dry_run,
            });
        }
    }
}

/// Patch every module, then enter the kernel
///
/// Returns only on failure: either the list was malformed and the kernel
/// was never entered, or the kernel entry point returned.
pub fn patch_and_transfer<'a, I, S, H>(
    config: PatcherConfig,
    sync: S,
    modules: I,
    handoff: &mut H,
    continuation: Continuation,
) -> PatchError
where
    I: IntoIterator<Item = Result<LoadedModule<'a>>>,
    S: CodeSync,
    H: Handoff + ?Sized,
{
    let mut engine = Engine::new(config, sync);
    if let Err(err) = engine.run(modules) {
        return err;
    }
    transfer_control(handoff, continuation)
}
