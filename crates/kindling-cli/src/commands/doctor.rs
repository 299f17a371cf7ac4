use super::{EXIT_FAILURE, EXIT_SUCCESS};
use kindling_kubeconfig::lock::lock_path;
use kindling_kubeconfig::path_for_merge;
use kindling_runtime::prereq::{check_engine_prereqs, format_missing};
use kindling_runtime::provider::PROVIDER_ENV_VAR;
use kindling_runtime::EngineKind;
use std::path::Path;

pub fn run(json_output: bool) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    check_engines(&mut checks, &mut all_pass);
    check_kubeconfig(&mut checks);
    check_disk_space(&std::env::temp_dir(), &mut checks);

    print_results(&checks, all_pass, json_output)
}

fn check_engines(checks: &mut Vec<Check>, all_pass: &mut bool) {
    let forced = std::env::var(PROVIDER_ENV_VAR)
        .ok()
        .filter(|v| !v.is_empty());
    if let Some(name) = &forced {
        if EngineKind::from_name(name).is_none() {
            *all_pass = false;
            checks.push(Check::fail(
                "provider",
                &format!("{PROVIDER_ENV_VAR}={name} is not one of docker, podman, nerdctl"),
            ));
            return;
        }
    }

    let mut usable = 0;
    let mut all_missing = Vec::new();
    for kind in EngineKind::ALL {
        if forced.as_deref().is_some_and(|name| name != kind.binary()) {
            continue;
        }
        let missing = check_engine_prereqs(kind);
        let name = format!("engine_{}", kind.binary());
        if missing.is_empty() {
            usable += 1;
            checks.push(Check::pass(&name, &format!("{} is usable", kind.binary())));
        } else {
            let detail = missing
                .iter()
                .map(|m| format!("{} missing ({})", m.name, m.install_hint))
                .collect::<Vec<_>>()
                .join("; ");
            checks.push(Check::info(&name, &format!("{}: {detail}", kind.binary())));
            all_missing.extend(missing);
        }
    }

    if usable == 0 {
        *all_pass = false;
        checks.push(Check::fail("engine", &format_missing(&all_missing)));
    }
}

fn check_kubeconfig(checks: &mut Vec<Check>) {
    let path = path_for_merge(None, |key| std::env::var(key).ok());
    if path.exists() {
        checks.push(Check::pass(
            "kubeconfig",
            &format!("Kubeconfig {} exists", path.display()),
        ));
    } else {
        checks.push(Check::info(
            "kubeconfig",
            &format!(
                "Kubeconfig {} will be created on first cluster",
                path.display()
            ),
        ));
    }
    let lock = lock_path(&path);
    if lock.exists() {
        checks.push(Check::warn(
            "kubeconfig_lock",
            &format!(
                "{} exists; remove it if no kindling or kind process is running",
                lock.display()
            ),
        ));
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?
        );
    } else {
        println!("kindling doctor\n");
        for check in checks {
            let icon = match check.status.as_str() {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: String,
    status: String,
    message: String,
}

impl Check {
    fn new(name: &str, status: &str, message: &str) -> Self {
        Self {
            name: name.to_owned(),
            status: status.to_owned(),
            message: message.to_owned(),
        }
    }

    fn pass(name: &str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}

/// Free space where logs and image archives are staged.
fn check_disk_space(dir: &Path, checks: &mut Vec<Check>) {
    let Ok(c_path) = std::ffi::CString::new(dir.to_string_lossy().as_bytes()) else {
        return;
    };

    // SAFETY: zeroed statvfs is a valid initial state for the struct.
    #[allow(unsafe_code, clippy::undocumented_unsafe_blocks)]
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: the path is NUL-terminated and the output struct is only read
    // after the call succeeds.
    #[allow(unsafe_code, clippy::undocumented_unsafe_blocks)]
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), &raw mut stat) };
    if ret != 0 {
        return;
    }

    #[allow(clippy::useless_conversion)]
    let avail_mb = u64::from(stat.f_bavail) * u64::from(stat.f_frsize) / (1024 * 1024);

    if avail_mb < 1024 {
        checks.push(Check::warn(
            "disk_space",
            &format!(
                "Low space in {}: {avail_mb} MB available, image loads may fail",
                dir.display()
            ),
        ));
    } else {
        checks.push(Check::pass(
            "disk_space",
            &format!("{} GB available in {}", avail_mb / 1024, dir.display()),
        ));
    }
}
