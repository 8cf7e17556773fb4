//! Boot-time provisioning script for render nodes.
//!
//! The script runs once as `startup-script` metadata. It prepares the worker
//! directories, installs the render application, opens the transfer port and
//! starts the worker services listed in [`WORKER_UNITS`] under systemd.

use std::fmt::Write;

/// Default location of the prebuilt worker binaries.
pub const DEFAULT_ARTIFACT_URL: &str =
    "https://storage.googleapis.com/offrender-releases/latest";

const OS_PACKAGES: &[&str] = &[
    "wget",
    "libxi6",
    "libxxf86vm1",
    "libxfixes3",
    "libxrender1",
    "libgl1",
    "libxkbcommon0",
    "libsm6",
];

/// Worker services installed as systemd units, with their descriptions.
pub const WORKER_UNITS: &[(&str, &str)] = &[
    ("offrender-server", "offrender transfer server"),
    ("offrender-executor", "offrender render executor"),
    ("offrender-watchdog", "offrender idle shutdown watchdog"),
];

/// Inputs of the provisioning script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapConfig {
    /// Base URL serving the binaries named in [`WORKER_UNITS`]
    pub artifact_url: String,
    pub port: u16,
    pub inbox_dir: String,
    pub output_dir: String,
    pub quality_file: String,
    pub firewall_rule: String,
    /// Minutes without worker activity before the watchdog powers the node off
    pub idle_shutdown_mins: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            artifact_url: DEFAULT_ARTIFACT_URL.to_string(),
            port: 8089,
            inbox_dir: "/tmp/offrender_in".to_string(),
            output_dir: "/tmp/offrender_out".to_string(),
            quality_file: "/var/lib/offrender/render_quality.txt".to_string(),
            firewall_rule: "offrender-transfer".to_string(),
            idle_shutdown_mins: 120,
        }
    }
}

impl BootstrapConfig {
    /// Defaults with `OFFRENDER_ARTIFACT_URL` and `OFFRENDER_IDLE_SHUTDOWN_MINS` applied.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            artifact_url: std::env::var("OFFRENDER_ARTIFACT_URL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.artifact_url),
            idle_shutdown_mins: std::env::var("OFFRENDER_IDLE_SHUTDOWN_MINS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|&mins| mins > 0)
                .unwrap_or(defaults.idle_shutdown_mins),
            ..defaults
        }
    }

    /// Render the shell script.
    pub fn render(&self) -> String {
        let artifact_url = self.artifact_url.trim_end_matches('/');
        let quality_dir = self
            .quality_file
            .rsplit_once('/')
            .map(|(dir, _)| dir)
            .filter(|dir| !dir.is_empty())
            .unwrap_or("/var/lib/offrender");

        let mut script = String::from("#!/bin/bash\nset -u\n\n");

        // The transfer server may accept uploads before the packages are in
        let _ = writeln!(script, "mkdir -p {} {}", self.inbox_dir, quality_dir);
        let _ = writeln!(script, "rm -rf {}", self.output_dir);
        let _ = writeln!(script, "mkdir -p {}\n", self.output_dir);

        let _ = writeln!(script, "apt-get update");
        let _ = writeln!(script, "apt-get install -y {}", OS_PACKAGES.join(" "));
        let _ = writeln!(script, "snap install blender --classic\n");

        let _ = writeln!(
            script,
            "gcloud compute firewall-rules create {} --allow tcp:{} --quiet || true\n",
            self.firewall_rule, self.port
        );

        for (binary, _) in WORKER_UNITS {
            let _ = writeln!(
                script,
                "wget -q -O /usr/local/bin/{binary} {artifact_url}/{binary}"
            );
            let _ = writeln!(script, "chmod +x /usr/local/bin/{binary}");
        }
        script.push('\n');

        let env = format!(
            "Environment=OFFRENDER_PORT={}\n\
             Environment=OFFRENDER_INBOX_DIR={}\n\
             Environment=OFFRENDER_OUTPUT_DIR={}\n\
             Environment=OFFRENDER_QUALITY_FILE={}\n\
             Environment=OFFRENDER_IDLE_SHUTDOWN_MINS={}\n",
            self.port, self.inbox_dir, self.output_dir, self.quality_file, self.idle_shutdown_mins
        );

        for (unit, description) in WORKER_UNITS {
            let _ = write!(
                script,
                "cat > /etc/systemd/system/{unit}.service <<'UNIT'\n\
                 [Unit]\n\
                 Description={description}\n\
                 After=network-online.target\n\n\
                 [Service]\n\
                 ExecStart=/usr/local/bin/{unit}\n\
                 Restart=on-failure\n\
                 {env}\n\
                 [Install]\n\
                 WantedBy=multi-user.target\n\
                 UNIT\n\n"
            );
        }

        let units: Vec<String> = WORKER_UNITS
            .iter()
            .map(|(unit, _)| format!("{unit}.service"))
            .collect();
        let _ = writeln!(script, "systemctl daemon-reload");
        let _ = writeln!(script, "systemctl enable --now {}", units.join(" "));

        script
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_contents() {
        let script = BootstrapConfig {
            artifact_url: "https://example.test/bin/".into(),
            ..Default::default()
        }
        .render();

        assert!(script.starts_with("#!/bin/bash"));
        assert!(script.contains("snap install blender --classic"));
        assert!(script.contains("mkdir -p /tmp/offrender_in /var/lib/offrender"));
        assert!(script.contains("rm -rf /tmp/offrender_out"));
        assert!(script.contains("--allow tcp:8089"));
        assert!(script.contains(
            "wget -q -O /usr/local/bin/offrender-executor https://example.test/bin/offrender-executor"
        ));
        assert!(script.contains("cat > /etc/systemd/system/offrender-server.service"));
        assert!(script.contains("Environment=OFFRENDER_INBOX_DIR=/tmp/offrender_in"));
        assert!(script.contains("systemctl daemon-reload"));
    }

    #[test]
    fn test_inbox_exists_before_package_install() {
        let script = BootstrapConfig::default().render();
        let mkdir = script.find("mkdir -p /tmp/offrender_in").unwrap();
        let apt = script.find("apt-get update").unwrap();
        let snap = script.find("snap install blender").unwrap();
        assert!(mkdir < apt);
        assert!(mkdir < snap);
    }

    #[test]
    fn test_all_worker_services_enabled() {
        let script = BootstrapConfig {
            idle_shutdown_mins: 45,
            ..Default::default()
        }
        .render();

        assert!(script.contains("cat > /etc/systemd/system/offrender-watchdog.service"));
        assert!(script.contains("ExecStart=/usr/local/bin/offrender-watchdog"));
        assert!(script.contains("Environment=OFFRENDER_IDLE_SHUTDOWN_MINS=45"));
        assert!(script.contains(
            "systemctl enable --now offrender-server.service offrender-executor.service offrender-watchdog.service"
        ));
    }

    #[test]
    fn test_units_precede_start() {
        let script = BootstrapConfig::default().render();
        let unit = script.find("offrender-executor.service <<'UNIT'").unwrap();
        let start = script.find("systemctl enable --now").unwrap();
        assert!(unit < start);
    }
}
