//! Environment preflight (SPEC_FULL §4 supplemented feature), grounded on
//! `cli-sub-agent/src/doctor.rs`'s tool-availability + resource-status
//! sections, generalized from AI-tool binaries to this orchestrator's own
//! collaborators (VCS binary, Task-Service, `PROJECT_BASE`).

use std::path::Path;

use sysinfo::System;

struct ToolStatus {
    name: &'static str,
    installed: bool,
    version: Option<String>,
}

fn check_tool(name: &'static str, exe: &str) -> ToolStatus {
    let installed = which::which(exe).is_ok();
    let version = installed
        .then(|| {
            std::process::Command::new(exe)
                .arg("--version")
                .output()
                .ok()
                .filter(|o| o.status.success())
                .and_then(|o| String::from_utf8(o.stdout).ok())
                .and_then(|s| s.lines().next().map(str::trim).map(str::to_string))
        })
        .flatten();
    ToolStatus { name, installed, version }
}

fn print_tool(status: &ToolStatus) {
    let mark = if status.installed { "ok" } else { "missing" };
    match &status.version {
        Some(v) => println!("{:<14} {mark} ({v})", format!("{}:", status.name)),
        None => println!("{:<14} {mark}", format!("{}:", status.name)),
    }
}

async fn check_task_service() -> (bool, String) {
    let Ok(url) = std::env::var("DASHBOARD_API_URL").or_else(|_| std::env::var("DASHBOARD_BASE_URL")) else {
        return (false, "DASHBOARD_API_URL is not set".to_string());
    };
    match reqwest::Client::new()
        .get(&url)
        .timeout(std::time::Duration::from_secs(3))
        .send()
        .await
    {
        Ok(resp) => (true, format!("{url} -> HTTP {}", resp.status().as_u16())),
        Err(e) => (false, format!("{url} -> {e}")),
    }
}

fn check_project_base() -> (bool, String) {
    let base = std::env::var("PROJECT_BASE")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("ma-repos"));
    match std::fs::create_dir_all(&base) {
        Ok(()) => (writable(&base), base.display().to_string()),
        Err(e) => (false, format!("{}: {e}", base.display())),
    }
}

fn writable(dir: &Path) -> bool {
    let probe = dir.join(".ma-orchestrator-doctor-probe");
    let ok = std::fs::write(&probe, b"").is_ok();
    let _ = std::fs::remove_file(&probe);
    ok
}

pub async fn run_doctor() -> anyhow::Result<()> {
    println!("=== Orchestrator Environment Check ===");
    println!("Platform: {} {}", std::env::consts::OS, std::env::consts::ARCH);
    println!("Version:  {}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("=== Tool Availability ===");
    print_tool(&check_tool("vcs (git)", "git"));
    println!();

    println!("=== Task Service ===");
    let (ok, detail) = check_task_service().await;
    println!("{} {detail}", if ok { "ok" } else { "unreachable" });
    println!();

    println!("=== Project Base ===");
    let (writable, detail) = check_project_base();
    println!("{} {detail}", if writable { "writable" } else { "not writable" });
    println!();

    println!("=== Resource Status ===");
    let mut sys = System::new_all();
    sys.refresh_all();
    println!("CPUs:   {}", sys.cpus().len());
    println!("Memory: {} / {} MB used", sys.used_memory() / 1024 / 1024, sys.total_memory() / 1024 / 1024);

    Ok(())
}
