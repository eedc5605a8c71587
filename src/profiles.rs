//! Resolves which FDL file(s) to load and at what addresses, either from a directory of
//! preinstalled target profiles or from CLI overrides.
//!
//! Profiles are named `<target>_<addrHex>_<tag>.<ext>`, where `tag` is one of `fdl1`, `fdl2`, or
//! `single`. A directory scan groups files by target prefix and recovers `(tag, addr)` from the
//! remaining filename fields.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("no FDL profile files found for target {0:?}")]
    TargetNotFound(String),
    #[error("profile file name {0:?} is missing its address/tag fields")]
    MalformedName(String),
    #[error("profile file name {0:?} has an unparseable address field {1:?}")]
    InvalidAddress(String, String),
    #[error("failed to scan profile directory {path:?}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
}

/// One resolved FDL file: its path on disk and the address it loads to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FdlFile {
    pub path: PathBuf,
    pub addr: u32,
}

/// The resolved set of loaders for a flashing session: either a matched FDL1/FDL2 pair, or a
/// single loader used by older chipsets that only need one bootstrap stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FdlPlan {
    Pair { fdl1: FdlFile, fdl2: FdlFile },
    Single { fdl: FdlFile },
}

impl FdlPlan {
    pub fn fdl1(&self) -> &FdlFile {
        match self {
            FdlPlan::Pair { fdl1, .. } => fdl1,
            FdlPlan::Single { fdl } => fdl,
        }
    }

    pub fn is_single(&self) -> bool {
        matches!(self, FdlPlan::Single { .. })
    }
}

/// Overrides supplied directly on the command line; any field set here takes precedence over
/// what the directory scan found, field-by-field.
#[derive(Debug, Clone, Default)]
pub struct FdlOverrides {
    pub fdl1_file: Option<PathBuf>,
    pub fdl1_addr: Option<u32>,
    pub fdl2_file: Option<PathBuf>,
    pub fdl2_addr: Option<u32>,
    pub single_fdl_file: Option<PathBuf>,
    pub single_fdl_addr: Option<u32>,
}

fn parse_addr(name: &str, field: &str) -> Result<u32, ProfileError> {
    let field = field.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(field, 16).map_err(|_| ProfileError::InvalidAddress(name.to_string(), field.to_string()))
}

struct ScannedEntry {
    tag: String,
    addr: u32,
    path: PathBuf,
}

/// Recursively walks `dir`, collecting every file matching `<target>_<addrHex>_<tag>.<ext>` found
/// at any depth, mirroring the reference `os.walk`-based scan over a `fdls/` tree that nests
/// profiles under per-target subdirectories.
fn scan_directory(dir: &Path, target: &str) -> Result<Vec<ScannedEntry>, ProfileError> {
    let prefix = format!("{target}_");
    let mut entries = Vec::new();
    walk_directory(dir, &prefix, &mut entries)?;
    Ok(entries)
}

fn walk_directory(dir: &Path, prefix: &str, entries: &mut Vec<ScannedEntry>) -> Result<(), ProfileError> {
    let read_dir = std::fs::read_dir(dir).map_err(|source| ProfileError::Io { path: dir.to_path_buf(), source })?;
    for entry in read_dir {
        let entry = entry.map_err(|source| ProfileError::Io { path: dir.to_path_buf(), source })?;
        let path = entry.path();

        let file_type = entry.file_type().map_err(|source| ProfileError::Io { path: path.clone(), source })?;
        if file_type.is_dir() {
            walk_directory(&path, prefix, entries)?;
            continue;
        }

        let Some(file_name) = path.file_stem().and_then(|s| s.to_str()) else { continue };
        let Some(rest) = file_name.strip_prefix(prefix) else { continue };

        let mut fields = rest.split('_');
        let addr_field = fields.next().ok_or_else(|| ProfileError::MalformedName(file_name.to_string()))?;
        let tag = fields.next().ok_or_else(|| ProfileError::MalformedName(file_name.to_string()))?;
        let addr = parse_addr(file_name, addr_field)?;

        entries.push(ScannedEntry { tag: tag.to_string(), addr, path: path.clone() });
    }
    Ok(())
}

/// Scans `dir` for files matching `<target>_<addrHex>_<tag>.<ext>`, then applies `overrides`
/// field-by-field on top of whatever the scan found.
pub fn resolve(dir: &Path, target: &str, overrides: &FdlOverrides) -> Result<FdlPlan, ProfileError> {
    let entries = scan_directory(dir, target)?;

    let mut fdl1: Option<FdlFile> = None;
    let mut fdl2: Option<FdlFile> = None;
    let mut single: Option<FdlFile> = None;
    for entry in entries {
        let file = FdlFile { path: entry.path, addr: entry.addr };
        match entry.tag.as_str() {
            "fdl1" => fdl1 = Some(file),
            "fdl2" => fdl2 = Some(file),
            "single" => single = Some(file),
            _ => {}
        }
    }

    if let Some(path) = &overrides.single_fdl_file {
        single = Some(FdlFile {
            path: path.clone(),
            addr: single.map(|f| f.addr).unwrap_or(0),
        });
    }
    if let Some(addr) = overrides.single_fdl_addr {
        single = Some(FdlFile { path: single.map(|f| f.path).unwrap_or_default(), addr });
    }
    if let Some(path) = &overrides.fdl1_file {
        fdl1 = Some(FdlFile { path: path.clone(), addr: fdl1.map(|f| f.addr).unwrap_or(0) });
    }
    if let Some(addr) = overrides.fdl1_addr {
        fdl1 = Some(FdlFile { path: fdl1.map(|f| f.path).unwrap_or_default(), addr });
    }
    if let Some(path) = &overrides.fdl2_file {
        fdl2 = Some(FdlFile { path: path.clone(), addr: fdl2.map(|f| f.addr).unwrap_or(0) });
    }
    if let Some(addr) = overrides.fdl2_addr {
        fdl2 = Some(FdlFile { path: fdl2.map(|f| f.path).unwrap_or_default(), addr });
    }

    if let Some(fdl) = single {
        return Ok(FdlPlan::Single { fdl });
    }
    match (fdl1, fdl2) {
        (Some(fdl1), Some(fdl2)) => Ok(FdlPlan::Pair { fdl1, fdl2 }),
        _ => Err(ProfileError::TargetNotFound(target.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_fixture(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"fdl placeholder").unwrap();
    }

    #[test]
    fn resolves_fdl1_fdl2_pair_from_directory_scan() {
        let dir = std::env::temp_dir().join(format!("unisoc-bfl-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        write_fixture(&dir, "sc6531efm_generic_50000000_fdl1.bin");
        write_fixture(&dir, "sc6531efm_generic_85000000_fdl2.bin");

        let plan = resolve(&dir, "sc6531efm_generic", &FdlOverrides::default()).unwrap();
        match plan {
            FdlPlan::Pair { fdl1, fdl2 } => {
                assert_eq!(fdl1.addr, 0x5000_0000);
                assert_eq!(fdl2.addr, 0x8500_0000);
            }
            FdlPlan::Single { .. } => panic!("expected a pair"),
        }
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn cli_override_takes_precedence_over_scan() {
        let dir = std::env::temp_dir().join(format!("unisoc-bfl-test-override-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        write_fixture(&dir, "sc6531efm_generic_50000000_fdl1.bin");
        write_fixture(&dir, "sc6531efm_generic_85000000_fdl2.bin");

        let overrides = FdlOverrides { fdl1_addr: Some(0x6000_0000), ..Default::default() };
        let plan = resolve(&dir, "sc6531efm_generic", &overrides).unwrap();
        assert_eq!(plan.fdl1().addr, 0x6000_0000);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn scan_finds_profiles_in_nested_subdirectories() {
        let dir = std::env::temp_dir().join(format!("unisoc-bfl-test-nested-{}", std::process::id()));
        let nested = dir.join("sc6531efm_generic");
        fs::create_dir_all(&nested).unwrap();
        write_fixture(&nested, "sc6531efm_generic_50000000_fdl1.bin");
        write_fixture(&nested, "sc6531efm_generic_85000000_fdl2.bin");

        let plan = resolve(&dir, "sc6531efm_generic", &FdlOverrides::default()).unwrap();
        match plan {
            FdlPlan::Pair { fdl1, fdl2 } => {
                assert_eq!(fdl1.addr, 0x5000_0000);
                assert_eq!(fdl2.addr, 0x8500_0000);
            }
            FdlPlan::Single { .. } => panic!("expected a pair"),
        }
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_target_is_an_error() {
        let dir = std::env::temp_dir().join(format!("unisoc-bfl-test-missing-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let err = resolve(&dir, "nonexistent_target", &FdlOverrides::default()).unwrap_err();
        assert!(matches!(err, ProfileError::TargetNotFound(_)));
        fs::remove_dir_all(&dir).ok();
    }
}
