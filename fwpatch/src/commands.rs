use anyhow::{bail, Context, Result};
use battpatch::{image, ChecksumEngine, ChecksumLayout, ChecksumReport, PatchCoordinator, PatchProfile, PatchReport};
use std::path::{Path, PathBuf};

use crate::config::{ByteOverride, LevelOverride, ProfileFile};

/// Where a run gets its profile from.
#[derive(Clone, Debug)]
pub enum ProfileSource {
    Builtin(String),
    File(PathBuf),
}

impl ProfileSource {
    pub fn load(&self) -> Result<ProfileFile> {
        match self {
            ProfileSource::Builtin(revision) => ProfileFile::builtin(revision),
            ProfileSource::File(path) => ProfileFile::load(path),
        }
    }
}

/// Validate `input`, patch it, and write the result to `output`. Nothing is
/// written unless every check passes.
pub fn patch(
    input: &Path,
    output: &Path,
    source: &ProfileSource,
    levels: &[LevelOverride],
    sets: &[ByteOverride],
) -> Result<PatchReport> {
    let profile = source.load()?.into_patch_profile(levels, sets)?;
    let revision = profile.revision.clone();
    let coordinator = PatchCoordinator::new(profile);

    let data = image::load(input)?;
    println!("File {:?} opened successfully ({} bytes).", input, data.len());

    let patched = coordinator
        .patch(data)
        .with_context(|| format!("patching {:?} as revision {}", input, revision))?;
    println!("File patched with new battery values.");
    println!("New CRC32 value: {:08X}", patched.report.checksum);

    image::store(input, output, &patched.bytes)?;
    println!("Patched data written to {:?}.", output);

    Ok(patched.report)
}

/// Compare the stored checksum against a fresh one.
pub fn verify(input: &Path, layout: ChecksumLayout) -> Result<ChecksumReport> {
    let coordinator = PatchCoordinator::new(PatchProfile {
        revision: String::new(),
        layout,
        stock_values: Vec::new(),
        patch_set: Vec::new(),
    });
    let data = image::load(input)?;
    let report = coordinator.verify(&data)?;

    println!("Stored CRC32:   {:08X}", report.stored);
    println!("Computed CRC32: {:08X}", report.computed);
    if !report.is_consistent() {
        bail!("checksum mismatch in {:?}", input);
    }
    println!("OK");
    Ok(report)
}

pub fn checksum(input: &Path, coverage_start: usize) -> Result<u32> {
    let data = image::load(input)?;
    let crc = ChecksumEngine::with_coverage_start(coverage_start).compute(&data);
    println!("{:08X}", crc);
    Ok(crc)
}

/// Dump a built-in profile as JSON, to stdout or `out`.
pub fn profile(revision: &str, out: Option<&Path>) -> Result<()> {
    let json = ProfileFile::builtin(revision)?.to_json()?;
    match out {
        Some(path) => {
            std::fs::write(path, json + "\n").with_context(|| format!("writing {:?}", path))?;
            println!("Profile for {} written to {:?}.", revision, path);
        }
        None => println!("{}", json),
    }
    Ok(())
}
