use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use errata_patcher::cache::NoCodeSync;
use errata_patcher::{Engine, ModuleArena, PatcherConfig, Scanner};

const SIGNATURE: u32 = 0xD518_CBAA;

// Kernel-sized image of pseudo-random instruction words
fn image(len: usize) -> Vec<u8> {
    let mut state = 0x2545_F491_4F6C_DD1Du64;
    let mut image = Vec::with_capacity(len);
    while image.len() < len {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        image.extend_from_slice(&(state as u32).to_le_bytes());
    }
    image.truncate(len);
    image
}

fn bench_scan(c: &mut Criterion) {
    let clean = image(8 * 1024 * 1024);
    let scanner = Scanner::new(SIGNATURE);
    c.bench_function("scan_8m_no_match", |b| {
        b.iter(|| scanner.matches(black_box(&clean)).count());
    });
}

fn bench_patch(c: &mut Criterion) {
    let mut template = image(8 * 1024 * 1024);
    for m in (0x1000..template.len() - 0x1000).step_by(0x10_0000) {
        template[m..m + 4].copy_from_slice(&SIGNATURE.to_le_bytes());
    }
    let config = PatcherConfig::default();

    c.bench_function("patch_8m_eight_sites", |b| {
        b.iter(|| {
            let mut image = template.clone();
            let mut arena: ModuleArena<'_, 1> = ModuleArena::new();
            arena.push("ntoskrnl.exe", 0x4000_0000, &mut image);
            let report = Engine::new(config, NoCodeSync)
                .run(arena.into_load_order())
                .map(|report| report.patches_applied);
            black_box(report)
        });
    });
}

criterion_group!(benches, bench_scan, bench_patch);
criterion_main!(benches);
