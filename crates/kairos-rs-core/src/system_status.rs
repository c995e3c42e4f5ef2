//! Host resource snapshot injected into prompts.

use parking_lot::Mutex;
use sysinfo::{Disks, System};

/// Source of the `## System Status` prompt block.
pub trait SystemStatusProvider: Send + Sync {
    /// Markdown block, or an empty string when nothing is available.
    fn snapshot(&self) -> String;
}

/// Reads CPU, memory, and disk usage through `sysinfo`.
///
/// The `System` handle is kept between calls so CPU usage reflects the time
/// since the previous snapshot.
pub struct SysinfoStatus {
    sys: Mutex<System>,
}

impl SysinfoStatus {
    pub fn new() -> Self {
        Self {
            sys: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemStatusProvider for SysinfoStatus {
    fn snapshot(&self) -> String {
        let mut sys = self.sys.lock();
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        let cpus = sys.cpus();
        let cpu_usage = if cpus.is_empty() {
            0.0
        } else {
            cpus.iter().map(|cpu| cpu.cpu_usage()).sum::<f32>() / cpus.len() as f32
        };
        let used_memory = sys.used_memory();
        let total_memory = sys.total_memory();
        drop(sys);

        let disks = Disks::new_with_refreshed_list();
        let (disk_total, disk_available) = disks.list().iter().fold((0u64, 0u64), |acc, disk| {
            (acc.0 + disk.total_space(), acc.1 + disk.available_space())
        });

        render_status(StatusFigures {
            cpu_usage,
            used_memory,
            total_memory,
            disk_used: disk_total.saturating_sub(disk_available),
            disk_total,
        })
    }
}

/// Fixed text, for tests and hosts where probing is unwanted.
pub struct StaticStatus(pub String);

impl SystemStatusProvider for StaticStatus {
    fn snapshot(&self) -> String {
        self.0.clone()
    }
}

struct StatusFigures {
    cpu_usage: f32,
    used_memory: u64,
    total_memory: u64,
    disk_used: u64,
    disk_total: u64,
}

fn render_status(figures: StatusFigures) -> String {
    let mut out = String::from("## System Status\n\n");
    out.push_str(&format!("- CPU: {:.1}%\n", figures.cpu_usage));
    if figures.total_memory > 0 {
        out.push_str(&format!(
            "- Memory: {} / {} ({:.0}%)\n",
            human_bytes(figures.used_memory),
            human_bytes(figures.total_memory),
            percent(figures.used_memory, figures.total_memory)
        ));
    }
    if figures.disk_total > 0 {
        out.push_str(&format!(
            "- Disk: {} / {} ({:.0}%)\n",
            human_bytes(figures.disk_used),
            human_bytes(figures.disk_total),
            percent(figures.disk_used, figures.disk_total)
        ));
    }
    out
}

fn percent(used: u64, total: u64) -> f64 {
    used as f64 / total as f64 * 100.0
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
