use crate::container::UNAVAILABLE;
use crate::exec::{ProcessRunner, RemoteExecutor, ShellCommand};
use serde::Serialize;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeValue {
    Text,
    /// Count of matching listeners; reported as Open/Closed.
    PortOpen,
}

#[derive(Debug, Clone)]
pub struct Probe {
    section: &'static str,
    label: String,
    command: ShellCommand,
    value: ProbeValue,
}

impl Probe {
    fn text(section: &'static str, label: &str, script: &str) -> Self {
        Self {
            section,
            label: label.to_string(),
            command: ShellCommand::script(script),
            value: ProbeValue::Text,
        }
    }

    fn port(label: String, script: String) -> Self {
        Self {
            section: "Network Ports",
            label,
            command: ShellCommand::script(script),
            value: ProbeValue::PortOpen,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub section: String,
    pub label: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostContextReport {
    pub probes: Vec<ProbeResult>,
}

/// The fixed, ordered diagnostic battery.
pub fn default_battery(sudo: bool, rdp_port: u16) -> Vec<Probe> {
    let sudo = if sudo { "sudo " } else { "" };
    vec![
        Probe::text("Network", "Hostname", "hostname"),
        Probe::text(
            "Network",
            "External IP",
            "curl -s --max-time 5 ifconfig.me 2>/dev/null || curl -s --max-time 5 ipinfo.io/ip 2>/dev/null",
        ),
        Probe::text("Network", "Internal IP", "hostname -I | awk '{print $1}'"),
        Probe::text("System", "OS", "lsb_release -ds 2>/dev/null || uname -sr"),
        Probe::text("System", "Kernel", "uname -r"),
        Probe::text(
            "System",
            "CPU",
            "lscpu | grep 'Model name' | cut -d: -f2 | xargs",
        ),
        Probe::text("System", "CPU Cores", "nproc"),
        Probe::text("Memory", "Total RAM", "free -h | awk '/^Mem:/ {print $2}'"),
        Probe::text("Memory", "Used RAM", "free -h | awk '/^Mem:/ {print $3}'"),
        Probe::text("Memory", "Available RAM", "free -h | awk '/^Mem:/ {print $7}'"),
        Probe::text("Disk", "Total Disk", "df -h / | tail -1 | awk '{print $2}'"),
        Probe::text("Disk", "Used Disk", "df -h / | tail -1 | awk '{print $3}'"),
        Probe::text("Disk", "Available Disk", "df -h / | tail -1 | awk '{print $4}'"),
        Probe::text("Disk", "Usage", "df -h / | tail -1 | awk '{print $5}'"),
        Probe::text(
            "System Load",
            "Load Average",
            "uptime | awk -F'load average:' '{print $2}'",
        ),
        Probe::text("System Load", "Uptime", "uptime -p"),
        Probe::text("Docker", "Docker", "docker --version"),
        Probe::text(
            "Docker",
            "Running Containers",
            &format!("{sudo}docker ps -q | wc -l"),
        ),
        Probe::text(
            "Network Ports",
            "Listening Ports",
            &format!("{sudo}netstat -tlnp | grep LISTEN | wc -l"),
        ),
        Probe::port(
            format!("RDP Port ({rdp_port})"),
            format!("{sudo}netstat -tlnp | grep -c ':{rdp_port} '"),
        ),
        Probe::port(
            "SSH Port (22)".to_string(),
            format!("{sudo}netstat -tlnp | grep -c ':22 '"),
        ),
    ]
}

pub struct HostContextReporter<'a, R: ProcessRunner> {
    exec: &'a RemoteExecutor<'a, R>,
    probes: Vec<Probe>,
}

impl<'a, R: ProcessRunner> HostContextReporter<'a, R> {
    pub fn new(exec: &'a RemoteExecutor<'a, R>, probes: Vec<Probe>) -> Self {
        Self { exec, probes }
    }

    fn run_probe(&self, probe: &Probe) -> Option<String> {
        let result = match self.exec.execute(&probe.command) {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(probe = %probe.label, error = %err, "context probe failed");
                return None;
            }
        };
        let text = result.trimmed().to_string();
        match probe.value {
            ProbeValue::PortOpen => {
                // grep -c exits 1 on zero matches but still prints the count
                let count = text.parse::<u32>().ok()?;
                Some(if count > 0 { "Open" } else { "Closed" }.to_string())
            }
            ProbeValue::Text => {
                if !result.succeeded {
                    tracing::warn!(
                        probe = %probe.label,
                        exit_code = result.exit_code,
                        "context probe failed"
                    );
                    return None;
                }
                if text.is_empty() {
                    None
                } else {
                    Some(text)
                }
            }
        }
    }

    /// Runs every probe in order; a failed probe never stops the batch.
    pub fn gather(&self) -> HostContextReport {
        let probes = self
            .probes
            .iter()
            .map(|probe| ProbeResult {
                section: probe.section.to_string(),
                label: probe.label.clone(),
                value: self.run_probe(probe),
            })
            .collect();
        HostContextReport { probes }
    }
}

impl HostContextReport {
    pub fn unavailable_count(&self) -> usize {
        self.probes.iter().filter(|probe| probe.value.is_none()).count()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Host context");
        let _ = writeln!(out, "{}", "=".repeat(60));
        let mut current_section: Option<&str> = None;
        for probe in &self.probes {
            if current_section != Some(probe.section.as_str()) {
                if current_section.is_some() {
                    let _ = writeln!(out);
                }
                let _ = writeln!(out, "{}:", probe.section);
                current_section = Some(probe.section.as_str());
            }
            let value = probe.value.as_deref().unwrap_or(UNAVAILABLE);
            let _ = writeln!(out, "  {}: {}", probe.label, value);
        }
        let _ = writeln!(out, "{}", "=".repeat(60));
        out
    }
}
