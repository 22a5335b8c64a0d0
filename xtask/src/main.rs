use std::path::PathBuf;
use std::process::Command;

use anyhow::{bail, Context, Result};

mod scan;

use scan::ScanOptions;

fn main() {
    let mut args = std::env::args().skip(1);
    let task = args.next().unwrap_or_else(|| "help".to_string());
    let result = match task.as_str() {
        "build" => build_hook(args.collect()),
        "scan" => parse_scan(args.collect()).and_then(|options| scan::scan(&options)),
        _ => {
            print_help();
            Ok(())
        }
    };
    if let Err(err) = result {
        eprintln!("[xtask] {} failed: {:#}", task, err);
        std::process::exit(1);
    }
}

fn build_hook(args: Vec<String>) -> Result<()> {
    let release = args.iter().any(|a| a == "--release");
    let dry_run = args.iter().any(|a| a == "--dry-run");
    let mut cmd = Command::new("cargo");
    cmd.arg("rustc")
        .arg("-p").arg("errata-bootloader")
        .arg("--target").arg("aarch64-unknown-none")
        .arg("--crate-type").arg("staticlib");
    if release {
        cmd.arg("--release");
    }
    if dry_run {
        cmd.arg("--features").arg("dry-run");
    }
    run(&mut cmd, "hook build")
}

fn parse_scan(args: Vec<String>) -> Result<ScanOptions> {
    let mut image = None;
    let mut options = ScanOptions::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--json" => options.json = true,
            "--strict" => options.strict = true,
            "--output" => {
                let path = args.next().context("--output needs a file name")?;
                options.output = Some(PathBuf::from(path));
            }
            "--base" => {
                let value = args.next().context("--base needs an address")?;
                options.base = parse_address(&value)?;
            }
            flag if flag.starts_with("--") => bail!("unknown flag {}", flag),
            path => {
                if image.replace(PathBuf::from(path)).is_some() {
                    bail!("only one image can be scanned at a time");
                }
            }
        }
    }
    options.image = image.context("missing image path")?;
    Ok(options)
}

fn parse_address(value: &str) -> Result<u64> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => value.parse(),
    };
    parsed.with_context(|| format!("invalid address {}", value))
}

fn run(cmd: &mut Command, name: &str) -> Result<()> {
    println!("[xtask] {}: {:?}", name, cmd);
    let status = cmd.status().with_context(|| format!("failed to run {}", name))?;
    if !status.success() {
        bail!("{} exited with {}", name, status);
    }
    Ok(())
}

fn print_help() {
    println!(
        "xtask usage:\n  cargo run -p xtask -- build [--release] [--dry-run]\n  cargo run -p xtask -- scan <image> [--json] [--strict] [--base <addr>] [--output <file>]"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_scan_flags() {
        let options = parse_scan(args(&[
            "ntoskrnl.exe",
            "--json",
            "--strict",
            "--base",
            "0x4000_0000",
            "--output",
            "patched.exe",
        ]))
        .unwrap();
        assert_eq!(options.image, PathBuf::from("ntoskrnl.exe"));
        assert!(options.json);
        assert!(options.strict);
        assert_eq!(options.base, 0x4000_0000);
        assert_eq!(options.output, Some(PathBuf::from("patched.exe")));
    }

    #[test]
    fn test_parse_scan_errors() {
        assert!(parse_scan(args(&[])).is_err());
        assert!(parse_scan(args(&["a", "b"])).is_err());
        assert!(parse_scan(args(&["a", "--bogus"])).is_err());
        assert!(parse_scan(args(&["a", "--output"])).is_err());
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("0x1000").unwrap(), 0x1000);
        assert_eq!(parse_address("4096").unwrap(), 4096);
        assert!(parse_address("0xZZ").is_err());
    }
}
