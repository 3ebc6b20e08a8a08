// src/ops.rs

//! Multi-package operations
//!
//! The layer between the CLI and the transaction engine. It resolves package
//! specs against the configured repositories, plans and confirms the batch,
//! downloads what is needed, runs one transaction per package and threads
//! the installed-package store through as an explicit value.
//!
//! Mutating operations return `Ok(None)` when nothing was changed (declined
//! confirmation, download-only mode, nothing to do); the caller only
//! persists the store on `Ok(Some(..))`.

use crate::checksum::file_digest;
use crate::error::{Error, Result};
use crate::filesystem::recursive_listing;
use crate::package::{file_name_from, package_name, package_version, split_name_version};
use crate::repository;
use crate::store::PackageStore;
use crate::transaction::{self, Confirm, MergeTool};
use crate::version::compare_versions;
use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Shared settings for one CLI invocation.
pub struct OpsContext {
    /// Filesystem prefix packages install into.
    pub prefix: String,
    /// Directory downloaded archives are cached in.
    pub cache_dir: String,
    /// Directory scratch extraction trees are created in.
    pub scratch_dir: String,
    /// Repositories in priority order (local cache first).
    pub repos: Vec<String>,
    pub force: bool,
    pub offline: bool,
    pub download_only: bool,
    pub unverified_ssl: bool,
    /// Answer every confirmation yes without prompting.
    pub yes: bool,
    /// Answer every confirmation no without prompting.
    pub no: bool,
}

/// Terminal-backed confirmation: prompts on stdout, reads y/n from stdin.
/// EOF takes the default.
pub struct TerminalConfirm;

impl Confirm for TerminalConfirm {
    fn confirm(&self, prompt: &str, default_yes: bool) -> Result<bool> {
        let hint = if default_yes { "[Y/n]" } else { "[y/N]" };
        loop {
            print!("{prompt} {hint} ");
            std::io::stdout().flush()?;
            let mut line = String::new();
            if std::io::stdin().read_line(&mut line)? == 0 {
                return Ok(default_yes);
            }
            match line.trim().to_ascii_lowercase().as_str() {
                "" => return Ok(default_yes),
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => println!("please answer y or n"),
            }
        }
    }
}

/// Merge conflict artifacts side by side in `vim -d`.
pub struct VimDiff;

impl MergeTool for VimDiff {
    fn merge(&self, current: &str, artifact: &str) -> Result<()> {
        let status = std::process::Command::new("vim")
            .arg("-d")
            .arg(artifact)
            .arg(current)
            .status()?;
        if !status.success() {
            warn!("merge tool exited with {status}");
        }
        Ok(())
    }
}

fn proceed(ctx: &OpsContext, confirm: &dyn Confirm, prompt: &str) -> Result<bool> {
    if ctx.yes {
        return Ok(true);
    }
    if ctx.no {
        return Ok(false);
    }
    confirm.confirm(prompt, true)
}

fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Pick the locator for `name` at `version` (or the highest version when
/// `version` is empty) out of the availability map.
fn resolve_locator(
    available: &HashMap<String, Vec<String>>,
    name: &str,
    version: &str,
) -> Result<String> {
    let locators = available
        .get(name)
        .ok_or_else(|| Error::NotAvailable(name.to_string()))?;
    let locator = if version.is_empty() {
        repository::max_version_locator(locators)
    } else {
        repository::locator_for_version(locators, version)
    };
    locator.ok_or_else(|| Error::NotAvailable(format!("{name}-{version}")))
}

/// Install the given package specs (`name` or `name-version`).
pub fn install_packages(
    specs: &[String],
    store: &PackageStore,
    ctx: &OpsContext,
    confirm: &dyn Confirm,
) -> Result<Option<PackageStore>> {
    let available = repository::available_packages(&ctx.repos, ctx.offline, ctx.unverified_ssl)?;

    let mut planned = Vec::new();
    for spec in specs {
        let (name, version) = split_name_version(spec);
        if store.contains_key(&name) && !ctx.force {
            return Err(Error::AlreadyInstalled(name));
        }
        let locator = resolve_locator(&available, &name, &version)?;
        planned.push((name, locator));
    }

    for (_, locator) in &planned {
        let archive = file_name_from(locator).unwrap_or_else(|| locator.clone());
        println!("install {archive}");
    }
    if !proceed(ctx, confirm, "continue?")? {
        return Ok(None);
    }

    let mut archives = Vec::new();
    for (name, locator) in planned {
        let local = repository::download_if_needed(&locator, &ctx.cache_dir, ctx.unverified_ssl)?;
        archives.push((name, local));
    }
    if ctx.download_only {
        return Ok(None);
    }

    let mut new_store = store.clone();
    for (name, archive) in archives {
        let mut record =
            transaction::install_package(&archive, &ctx.prefix, ctx.force, &ctx.scratch_dir)?;
        record.installed_at = Some(now_epoch());
        println!("{name}-{} installed", record.version);
        new_store.insert(name, record);
    }
    Ok(Some(new_store))
}

/// Update installed packages.
///
/// With no specs every installed package is considered. A spec is `name`,
/// `name-version`, or a rename `old..new` which migrates the installed
/// record from one package name to another in the same transaction.
/// Packages already at the candidate version are skipped unless forced.
pub fn update_packages(
    specs: &[String],
    store: &PackageStore,
    ctx: &OpsContext,
    confirm: &dyn Confirm,
) -> Result<Option<PackageStore>> {
    let available = repository::available_packages(&ctx.repos, ctx.offline, ctx.unverified_ssl)?;

    let specs: Vec<String> = if specs.is_empty() {
        store.keys().cloned().collect()
    } else {
        specs.to_vec()
    };

    let mut planned = Vec::new();
    for spec in &specs {
        let (old_spec, new_spec) = match spec.split_once("..") {
            Some((old, new)) => (old.to_string(), new.to_string()),
            None => (spec.clone(), spec.clone()),
        };
        let (old_name, _) = split_name_version(&old_spec);
        let (new_name, new_version) = split_name_version(&new_spec);

        let old_record = store
            .get(&old_name)
            .ok_or_else(|| Error::NotInstalled(old_name.clone()))?;
        let locator = resolve_locator(&available, &new_name, &new_version)?;
        let candidate = file_name_from(&locator)
            .map(|f| package_version(&f))
            .unwrap_or_default();

        if !ctx.force && old_name == new_name && candidate == old_record.version {
            debug!("{old_name}-{candidate} already current");
            continue;
        }
        println!("update {old_name}-{} -> {new_name}-{candidate}", old_record.version);
        planned.push((old_name, new_name, locator));
    }

    if planned.is_empty() {
        println!("nothing to update");
        return Ok(None);
    }
    if !proceed(ctx, confirm, "continue?")? {
        return Ok(None);
    }

    let mut archives = Vec::new();
    for (old_name, new_name, locator) in planned {
        let local = repository::download_if_needed(&locator, &ctx.cache_dir, ctx.unverified_ssl)?;
        archives.push((old_name, new_name, local));
    }
    if ctx.download_only {
        return Ok(None);
    }

    let mut new_store = store.clone();
    for (old_name, new_name, archive) in archives {
        let old_record = new_store
            .remove(&old_name)
            .ok_or_else(|| Error::NotInstalled(old_name.clone()))?;
        let mut record = transaction::update_package(
            &archive,
            &old_name,
            &old_record,
            &ctx.prefix,
            ctx.force,
            &ctx.scratch_dir,
        )?;
        record.installed_at = Some(now_epoch());
        println!("{new_name}-{} updated", record.version);
        new_store.insert(new_name, record);
    }
    Ok(Some(new_store))
}

/// Remove installed packages. A spec with a version only matches when the
/// installed version is the same.
pub fn remove_packages(
    specs: &[String],
    store: &PackageStore,
    ctx: &OpsContext,
    confirm: &dyn Confirm,
) -> Result<Option<PackageStore>> {
    let mut names = Vec::new();
    for spec in specs {
        let (name, version) = split_name_version(spec);
        let record = store
            .get(&name)
            .ok_or_else(|| Error::NotInstalled(name.clone()))?;
        if !version.is_empty() && version != record.version {
            return Err(Error::NotInstalled(format!("{name}-{version}")));
        }
        println!("remove {name}-{}", record.version);
        names.push(name);
    }

    if !proceed(ctx, confirm, "continue?")? {
        return Ok(None);
    }

    let mut new_store = store.clone();
    for name in names {
        let record = new_store
            .remove(&name)
            .ok_or_else(|| Error::NotInstalled(name.clone()))?;
        transaction::remove_package(&name, &record, &ctx.prefix)?;
        println!("{name} removed");
    }
    Ok(Some(new_store))
}

/// Verify installed files against their recorded digests. Protected paths
/// are exempt; everything else must exist and match.
pub fn check_packages(specs: &[String], store: &PackageStore, prefix: &str) -> Result<()> {
    let names: Vec<String> = if specs.is_empty() {
        store.keys().cloned().collect()
    } else {
        specs.iter().map(|s| package_name(s)).collect()
    };

    let mut failures: u32 = 0;
    for name in &names {
        let record = store
            .get(name)
            .ok_or_else(|| Error::NotInstalled(name.clone()))?;
        for (path, digest) in &record.checksums {
            let target = format!("{prefix}/{path}");
            if !Path::new(&target).exists() {
                println!("{name}: missing {path}");
                failures += 1;
                continue;
            }
            // protected paths are exempt from the digest comparison only;
            // they still have to exist
            if record.protected.contains(path) {
                continue;
            }
            if file_digest(&target)? != *digest {
                println!("{name}: checksum mismatch {path}");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        return Err(Error::CheckFailed(failures));
    }
    println!("check ok");
    Ok(())
}

/// Print files under the prefix that no installed package owns.
///
/// Only subtrees some package actually installs into are walked, unless
/// explicit `paths` narrow the scan further.
pub fn show_untracked(store: &PackageStore, prefix: &str, paths: &[String]) -> Result<()> {
    let mut tracked: BTreeSet<String> = BTreeSet::new();
    for record in store.values() {
        tracked.extend(record.checksums.keys().cloned());
    }

    let roots: Vec<String> = if paths.is_empty() {
        tracked
            .iter()
            .filter_map(|p| p.split('/').next())
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    } else {
        paths.to_vec()
    };

    for root in roots {
        let base = format!("{prefix}/{root}");
        if !Path::new(&base).is_dir() {
            continue;
        }
        let (_, files) = recursive_listing(&base)?;
        for f in files {
            let relative = format!("{root}/{f}");
            if !tracked.contains(&relative) {
                println!("{prefix}/{relative}");
            }
        }
    }
    Ok(())
}

/// Whether a spec (`name` or `name-version`) matches an installed package.
pub fn is_installed(store: &PackageStore, spec: &str) -> bool {
    let (name, version) = split_name_version(spec);
    match store.get(&name) {
        Some(record) => version.is_empty() || record.version == version,
        None => false,
    }
}

/// Print every available `name-version`, optionally filtered to the given
/// package names.
pub fn list_available(specs: &[String], ctx: &OpsContext) -> Result<()> {
    let available = repository::available_packages(&ctx.repos, ctx.offline, ctx.unverified_ssl)?;

    let mut names: Vec<&String> = available.keys().collect();
    names.sort();
    for name in names {
        if !specs.is_empty() && !specs.contains(name) {
            continue;
        }
        let mut versions: Vec<String> = available[name]
            .iter()
            .filter_map(|locator| file_name_from(locator))
            .map(|f| package_version(&f))
            .collect();
        versions.sort_by(|a, b| compare_versions(a, b));
        versions.dedup();
        for version in versions {
            println!("{name}-{version}");
        }
    }
    Ok(())
}

/// Print every installed `name-version`.
pub fn list_installed(store: &PackageStore) {
    for (name, record) in store {
        println!("{name}-{}", record.version);
    }
}

/// Run the merge tool over outstanding conflict artifacts. With no specs
/// every installed package is visited.
pub fn merge_config(
    specs: &[String],
    store: &PackageStore,
    prefix: &str,
    tool: &dyn MergeTool,
    confirm: &dyn Confirm,
) -> Result<()> {
    let names: Vec<String> = if specs.is_empty() {
        store.keys().cloned().collect()
    } else {
        specs.iter().map(|s| package_name(s)).collect()
    };

    for name in names {
        let record = store
            .get(&name)
            .ok_or_else(|| Error::NotInstalled(name.clone()))?;
        transaction::merge_config_package(&name, record, prefix, tool, confirm)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InstalledPackage;
    use std::collections::BTreeMap;
    use std::fs::File;
    use zip::ZipWriter;
    use zip::write::FileOptions;

    struct AutoAnswer(bool);

    impl Confirm for AutoAnswer {
        fn confirm(&self, _prompt: &str, _default_yes: bool) -> Result<bool> {
            Ok(self.0)
        }
    }

    fn build_archive(dir: &str, archive_name: &str, files: &[(&str, &str)]) {
        let f = File::create(format!("{dir}/{archive_name}")).unwrap();
        let mut zip = ZipWriter::new(f);
        let options: FileOptions<()> =
            FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for (name, content) in files {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        repo: String,
        ctx: OpsContext,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().to_str().unwrap().to_string();
        let repo = format!("{base}/repo");
        for sub in ["repo", "prefix", "cache", "tmp"] {
            std::fs::create_dir(format!("{base}/{sub}")).unwrap();
        }
        let ctx = OpsContext {
            prefix: format!("{base}/prefix"),
            cache_dir: format!("{base}/cache"),
            scratch_dir: format!("{base}/tmp"),
            repos: vec![repo.clone()],
            force: false,
            offline: true,
            download_only: false,
            unverified_ssl: false,
            yes: false,
            no: false,
        };
        Fixture {
            _dir: dir,
            repo,
            ctx,
        }
    }

    #[test]
    fn test_install_update_remove_cycle() {
        let fx = fixture();
        build_archive(&fx.repo, "pkg-1.0-1.treepkg.zip", &[("a/b.txt", "v1")]);
        build_archive(&fx.repo, "pkg-2.0-1.treepkg.zip", &[("a/b.txt", "v2")]);

        let store = PackageStore::new();
        let store = install_packages(
            &["pkg-1.0-1".to_string()],
            &store,
            &fx.ctx,
            &AutoAnswer(true),
        )
        .unwrap()
        .unwrap();
        assert_eq!(store["pkg"].version, "1.0-1");
        assert!(store["pkg"].installed_at.is_some());
        assert_eq!(
            std::fs::read_to_string(format!("{}/a/b.txt", fx.ctx.prefix)).unwrap(),
            "v1"
        );

        let store = update_packages(&[], &store, &fx.ctx, &AutoAnswer(true))
            .unwrap()
            .unwrap();
        assert_eq!(store["pkg"].version, "2.0-1");
        assert_eq!(
            std::fs::read_to_string(format!("{}/a/b.txt", fx.ctx.prefix)).unwrap(),
            "v2"
        );

        let store = remove_packages(&["pkg".to_string()], &store, &fx.ctx, &AutoAnswer(true))
            .unwrap()
            .unwrap();
        assert!(store.is_empty());
        assert!(!Path::new(&format!("{}/a/b.txt", fx.ctx.prefix)).exists());
    }

    #[test]
    fn test_install_declined_changes_nothing() {
        let fx = fixture();
        build_archive(&fx.repo, "pkg-1.0-1.treepkg.zip", &[("a/b.txt", "v1")]);

        let store = PackageStore::new();
        let result = install_packages(&["pkg".to_string()], &store, &fx.ctx, &AutoAnswer(false))
            .unwrap();
        assert!(result.is_none());
        assert!(!Path::new(&format!("{}/a/b.txt", fx.ctx.prefix)).exists());
    }

    #[test]
    fn test_install_already_installed() {
        let fx = fixture();
        build_archive(&fx.repo, "pkg-1.0-1.treepkg.zip", &[("a/b.txt", "v1")]);

        let mut store = PackageStore::new();
        store.insert(
            "pkg".to_string(),
            InstalledPackage {
                installed_at: None,
                version: "1.0-1".to_string(),
                checksums: BTreeMap::new(),
                protected: Default::default(),
            },
        );

        let res = install_packages(&["pkg".to_string()], &store, &fx.ctx, &AutoAnswer(true));
        assert!(matches!(res, Err(Error::AlreadyInstalled(_))));
    }

    #[test]
    fn test_install_unavailable_package() {
        let fx = fixture();
        let store = PackageStore::new();
        let res = install_packages(&["ghost".to_string()], &store, &fx.ctx, &AutoAnswer(true));
        assert!(matches!(res, Err(Error::NotAvailable(_))));
    }

    #[test]
    fn test_update_skips_current_version() {
        let fx = fixture();
        build_archive(&fx.repo, "pkg-1.0-1.treepkg.zip", &[("a/b.txt", "v1")]);

        let store = install_packages(
            &["pkg".to_string()],
            &PackageStore::new(),
            &fx.ctx,
            &AutoAnswer(true),
        )
        .unwrap()
        .unwrap();

        let result = update_packages(&[], &store, &fx.ctx, &AutoAnswer(true)).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_update_renames_package() {
        let fx = fixture();
        build_archive(&fx.repo, "oldname-1.0-1.treepkg.zip", &[("a/b.txt", "v1")]);
        build_archive(&fx.repo, "newname-2.0-1.treepkg.zip", &[("a/b.txt", "v2")]);

        let store = install_packages(
            &["oldname".to_string()],
            &PackageStore::new(),
            &fx.ctx,
            &AutoAnswer(true),
        )
        .unwrap()
        .unwrap();

        let store = update_packages(
            &["oldname..newname".to_string()],
            &store,
            &fx.ctx,
            &AutoAnswer(true),
        )
        .unwrap()
        .unwrap();

        assert!(!store.contains_key("oldname"));
        assert_eq!(store["newname"].version, "2.0-1");
        assert_eq!(
            std::fs::read_to_string(format!("{}/a/b.txt", fx.ctx.prefix)).unwrap(),
            "v2"
        );
    }

    #[test]
    fn test_remove_version_mismatch() {
        let fx = fixture();
        build_archive(&fx.repo, "pkg-1.0-1.treepkg.zip", &[("a/b.txt", "v1")]);
        let store = install_packages(
            &["pkg".to_string()],
            &PackageStore::new(),
            &fx.ctx,
            &AutoAnswer(true),
        )
        .unwrap()
        .unwrap();

        let res = remove_packages(
            &["pkg-9.9-9".to_string()],
            &store,
            &fx.ctx,
            &AutoAnswer(true),
        );
        assert!(matches!(res, Err(Error::NotInstalled(_))));
    }

    #[test]
    fn test_check_detects_drift() {
        let fx = fixture();
        build_archive(&fx.repo, "pkg-1.0-1.treepkg.zip", &[("a/b.txt", "v1")]);
        let store = install_packages(
            &["pkg".to_string()],
            &PackageStore::new(),
            &fx.ctx,
            &AutoAnswer(true),
        )
        .unwrap()
        .unwrap();

        assert!(check_packages(&[], &store, &fx.ctx.prefix).is_ok());

        std::fs::write(format!("{}/a/b.txt", fx.ctx.prefix), "tampered").unwrap();
        let res = check_packages(&[], &store, &fx.ctx.prefix);
        assert!(matches!(res, Err(Error::CheckFailed(1))));

        std::fs::remove_file(format!("{}/a/b.txt", fx.ctx.prefix)).unwrap();
        let res = check_packages(&[], &store, &fx.ctx.prefix);
        assert!(matches!(res, Err(Error::CheckFailed(1))));
    }

    #[test]
    fn test_check_reports_missing_protected_file() {
        let fx = fixture();
        let mut store = PackageStore::new();
        store.insert(
            "pkg".to_string(),
            InstalledPackage {
                installed_at: None,
                version: "1.0-1".to_string(),
                checksums: BTreeMap::from([("etc/app.conf".to_string(), "0".repeat(64))]),
                protected: BTreeSet::from(["etc/app.conf".to_string()]),
            },
        );

        // a deleted protected file is still a failure
        let res = check_packages(&[], &store, &fx.ctx.prefix);
        assert!(matches!(res, Err(Error::CheckFailed(1))));

        // a present-but-edited protected file is fine
        std::fs::create_dir(format!("{}/etc", fx.ctx.prefix)).unwrap();
        std::fs::write(format!("{}/etc/app.conf", fx.ctx.prefix), "user edit").unwrap();
        assert!(check_packages(&[], &store, &fx.ctx.prefix).is_ok());
    }

    #[test]
    fn test_is_installed() {
        let fx = fixture();
        build_archive(&fx.repo, "pkg-1.0-1.treepkg.zip", &[("a/b.txt", "v1")]);
        let store = install_packages(
            &["pkg".to_string()],
            &PackageStore::new(),
            &fx.ctx,
            &AutoAnswer(true),
        )
        .unwrap()
        .unwrap();

        assert!(is_installed(&store, "pkg"));
        assert!(is_installed(&store, "pkg-1.0-1"));
        assert!(!is_installed(&store, "pkg-2.0-1"));
        assert!(!is_installed(&store, "other"));
    }

    #[test]
    fn test_download_only_leaves_prefix_untouched() {
        let fx = fixture();
        build_archive(&fx.repo, "pkg-1.0-1.treepkg.zip", &[("a/b.txt", "v1")]);

        let mut ctx = fx.ctx;
        ctx.download_only = true;
        let result = install_packages(
            &["pkg".to_string()],
            &PackageStore::new(),
            &ctx,
            &AutoAnswer(true),
        )
        .unwrap();
        assert!(result.is_none());
        assert!(!Path::new(&format!("{}/a/b.txt", ctx.prefix)).exists());
    }

    #[test]
    fn test_yes_flag_skips_confirmation() {
        let fx = fixture();
        build_archive(&fx.repo, "pkg-1.0-1.treepkg.zip", &[("a/b.txt", "v1")]);

        struct Unreachable;
        impl Confirm for Unreachable {
            fn confirm(&self, _: &str, _: bool) -> Result<bool> {
                panic!("confirmation must not be consulted with --yes");
            }
        }

        let mut ctx = fx.ctx;
        ctx.yes = true;
        let store = install_packages(
            &["pkg".to_string()],
            &PackageStore::new(),
            &ctx,
            &Unreachable,
        )
        .unwrap();
        assert!(store.is_some());
    }
}
