use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result, bail};

const EBPF_PACKAGE: &str = "ebaf-ebpf";
const BPF_TARGET: &str = "bpfel-unknown-none";
const ARTIFACT_NAME: &str = "ebaf.bpf.o";

/// Build the classifier with the nightly toolchain for the BPF target and
/// place the object at `obj/ebaf.bpf.o`, the first rung of the loader's
/// search ladder.
pub fn build() -> Result<()> {
    let workspace_root = workspace_root()?;

    println!("Building eBPF classifier: {EBPF_PACKAGE}");
    let status = Command::new("cargo")
        .arg("+nightly")
        .arg("build")
        .arg("--package")
        .arg(EBPF_PACKAGE)
        .arg("--release")
        .arg("-Z")
        .arg("build-std=core")
        .arg("--target")
        .arg(BPF_TARGET)
        .env(
            "CARGO_ENCODED_RUSTFLAGS",
            "-C\x1fdebuginfo=2\x1f-C\x1flink-arg=--btf",
        )
        .current_dir(&workspace_root)
        .status()
        .context("failed to run cargo for the eBPF build")?;
    if !status.success() {
        bail!("eBPF build failed for {EBPF_PACKAGE}");
    }

    let built = workspace_root
        .join("target")
        .join(BPF_TARGET)
        .join("release")
        .join(EBPF_PACKAGE);

    let obj_dir = workspace_root.join("obj");
    std::fs::create_dir_all(&obj_dir)
        .with_context(|| format!("failed to create {}", obj_dir.display()))?;
    let artifact = obj_dir.join(ARTIFACT_NAME);
    std::fs::copy(&built, &artifact)
        .with_context(|| format!("failed to copy {} -> {}", built.display(), artifact.display()))?;
    println!("  -> {}", artifact.display());

    Ok(())
}

fn workspace_root() -> Result<PathBuf> {
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR")
        .map(PathBuf::from)
        .context("CARGO_MANIFEST_DIR not set")?;
    manifest_dir
        .parent()
        .map(PathBuf::from)
        .context("xtask manifest has no parent directory")
}
