//! Offline errata scan of a kernel image file

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use errata_patcher::cache::NoCodeSync;
use errata_patcher::{Engine, EngineReport, ModuleArena, PatchRecord, PatcherConfig};
use serde::Serialize;

/// Base reported for a file image unless `--base` says otherwise
pub const DEFAULT_BASE: u64 = 0x1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    pub image: PathBuf,
    pub base: u64,
    pub json: bool,
    pub strict: bool,
    /// Write the patched image here; without it the scan is a dry run
    pub output: Option<PathBuf>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            image: PathBuf::new(),
            base: DEFAULT_BASE,
            json: false,
            strict: false,
            output: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SiteReport {
    pub erratum: &'static str,
    pub match_offset: usize,
    pub branch_offset: usize,
    pub trampoline_offset: usize,
    pub pad_offset: usize,
    pub applied: bool,
}

impl From<&PatchRecord> for SiteReport {
    fn from(record: &PatchRecord) -> Self {
        Self {
            erratum: record.erratum,
            match_offset: record.site.match_offset,
            branch_offset: record.site.branch_offset,
            trampoline_offset: record.site.trampoline_offset,
            pad_offset: record.site.pad_offset,
            applied: record.applied,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ScanReport {
    pub image: String,
    pub size: usize,
    pub dry_run: bool,
    pub matches: usize,
    pub patches_applied: usize,
    pub rejected: usize,
    pub sites: Vec<SiteReport>,
}

impl ScanReport {
    fn new(options: &ScanOptions, size: usize, report: &EngineReport) -> Self {
        Self {
            image: options.image.display().to_string(),
            size,
            dry_run: options.output.is_none(),
            matches: report.matches,
            patches_applied: report.patches_applied,
            rejected: report.rejected,
            sites: report.records.iter().map(SiteReport::from).collect(),
        }
    }
}

/// Run the patch engine over `image` in memory
pub fn scan_image(
    name: &str,
    base: u64,
    image: &mut [u8],
    dry_run: bool,
) -> Result<EngineReport> {
    let mut arena: ModuleArena<'_, 1> = ModuleArena::new();
    if arena.push(name, base, image).is_none() {
        bail!("module arena is full");
    }
    let config = PatcherConfig::default().with_dry_run(dry_run);
    let mut engine = Engine::new(config, NoCodeSync);
    let report = engine
        .run(arena.into_load_order())
        .map_err(|err| anyhow!("{}", err))?;
    if report.modules_skipped > 0 {
        bail!("{} is not a valid module (base {:#x})", name, base);
    }
    Ok(report)
}

pub fn scan(options: &ScanOptions) -> Result<()> {
    let mut image = fs::read(&options.image)
        .with_context(|| format!("failed to read {}", options.image.display()))?;
    let name = module_name(&options.image);
    let dry_run = options.output.is_none();
    let report = scan_image(&name, options.base, &mut image, dry_run)?;
    let summary = ScanReport::new(options, image.len(), &report);

    if options.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    if options.strict {
        report.ensure_patched().map_err(|err| anyhow!("{}", err))?;
        if report.rejected > 0 {
            bail!("{} matches could not be patched", report.rejected);
        }
    }

    if let Some(output) = &options.output {
        fs::write(output, &image)
            .with_context(|| format!("failed to write {}", output.display()))?;
        println!("[xtask] wrote patched image to {}", output.display());
    }
    Ok(())
}

fn module_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn print_summary(summary: &ScanReport) {
    println!(
        "[xtask] {} ({:#x} bytes): {} matches, {} patched, {} rejected{}",
        summary.image,
        summary.size,
        summary.matches,
        summary.patches_applied,
        summary.rejected,
        if summary.dry_run { " (dry run)" } else { "" }
    );
    for site in &summary.sites {
        println!(
            "  {} at +{:#x}: branch +{:#x}, trampoline +{:#x}",
            site.erratum, site.match_offset, site.branch_offset, site.trampoline_offset
        );
    }
}
