//! Platform detection and package-manager templates
//!
//! Detection runs at most once per process; the result is read-only
//! afterwards and shared by every session.

use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;
use sysinfo::System;
use tracing::{debug, info};

/// Distribution family grouping used to pick package-manager commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PlatformFamily {
    Rhel,
    Debian,
    Arch,
    Suse,
    Gentoo,
    Unknown,
}

impl PlatformFamily {
    pub fn package_manager(&self) -> Option<&'static str> {
        match self {
            PlatformFamily::Rhel => Some("dnf"),
            PlatformFamily::Debian => Some("apt-get"),
            PlatformFamily::Arch => Some("pacman"),
            PlatformFamily::Suse => Some("zypper"),
            PlatformFamily::Gentoo => Some("emerge"),
            PlatformFamily::Unknown => None,
        }
    }

    /// Map an os-release `ID` (or one `ID_LIKE` entry) to a family.
    pub fn from_os_id(id: &str) -> Option<Self> {
        let family = match id.trim().to_lowercase().as_str() {
            "rhel" | "centos" | "fedora" | "rocky" | "almalinux" | "ol" | "amzn" => {
                PlatformFamily::Rhel
            }
            "debian" | "ubuntu" | "raspbian" | "linuxmint" | "pop" => PlatformFamily::Debian,
            "arch" | "manjaro" | "endeavouros" => PlatformFamily::Arch,
            "opensuse" | "opensuse-leap" | "opensuse-tumbleweed" | "sles" | "suse" => {
                PlatformFamily::Suse
            }
            "gentoo" => PlatformFamily::Gentoo,
            _ => return None,
        };
        Some(family)
    }
}

impl fmt::Display for PlatformFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlatformFamily::Rhel => "RHEL",
            PlatformFamily::Debian => "Debian",
            PlatformFamily::Arch => "Arch",
            PlatformFamily::Suse => "SUSE",
            PlatformFamily::Gentoo => "Gentoo",
            PlatformFamily::Unknown => "Unknown",
        };
        write!(f, "{}", name)
    }
}

/// Abstract package operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageIntent {
    Install,
    Search,
    Remove,
    Update,
}

impl PackageIntent {
    pub const ALL: [PackageIntent; 4] = [
        PackageIntent::Install,
        PackageIntent::Search,
        PackageIntent::Remove,
        PackageIntent::Update,
    ];
}

impl fmt::Display for PackageIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PackageIntent::Install => "install",
            PackageIntent::Search => "search",
            PackageIntent::Remove => "remove",
            PackageIntent::Update => "update",
        };
        write!(f, "{}", name)
    }
}

/// Package-manager invocation for `intent` on `family`.
///
/// `{package}` marks where the package name goes. `Unknown` has no
/// templates.
pub fn template_for(intent: PackageIntent, family: PlatformFamily) -> Option<&'static str> {
    use PackageIntent::*;
    use PlatformFamily::*;

    let template = match (family, intent) {
        (Rhel, Install) => "dnf install -y {package}",
        (Rhel, Search) => "dnf search {package}",
        (Rhel, Remove) => "dnf remove -y {package}",
        (Rhel, Update) => "dnf upgrade -y",
        (Debian, Install) => "apt-get install -y {package}",
        (Debian, Search) => "apt-cache search {package}",
        (Debian, Remove) => "apt-get remove -y {package}",
        (Debian, Update) => "apt-get update",
        (Arch, Install) => "pacman -S --noconfirm {package}",
        (Arch, Search) => "pacman -Ss {package}",
        (Arch, Remove) => "pacman -R --noconfirm {package}",
        (Arch, Update) => "pacman -Syu --noconfirm",
        (Suse, Install) => "zypper install -y {package}",
        (Suse, Search) => "zypper search {package}",
        (Suse, Remove) => "zypper remove -y {package}",
        (Suse, Update) => "zypper refresh",
        (Gentoo, Install) => "emerge {package}",
        (Gentoo, Search) => "emerge --search {package}",
        (Gentoo, Remove) => "emerge --unmerge {package}",
        (Gentoo, Update) => "emerge --sync",
        (Unknown, _) => return None,
    };
    Some(template)
}

/// Fill the `{package}` slot of a template.
pub fn render_template(template: &str, package: &str) -> String {
    template.replace("{package}", package).trim().to_string()
}

/// Detected platform details
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformInfo {
    pub family: PlatformFamily,
    pub distribution: String,
    pub version: Option<String>,
    /// How the family was determined
    pub detection_reason: String,
    pub kernel: Option<String>,
    pub os_long: Option<String>,
}

impl PlatformInfo {
    pub fn unknown(reason: impl Into<String>) -> Self {
        Self {
            family: PlatformFamily::Unknown,
            distribution: "unknown".to_string(),
            version: None,
            detection_reason: reason.into(),
            kernel: None,
            os_long: None,
        }
    }

    /// Parse `/etc/os-release` content. Pure.
    pub fn from_os_release(content: &str) -> Option<Self> {
        let fields = parse_os_release(content);
        let id = fields.get("ID").cloned().unwrap_or_default();
        let distribution = fields
            .get("NAME")
            .cloned()
            .unwrap_or_else(|| if id.is_empty() { "unknown".to_string() } else { id.clone() });
        let version = fields.get("VERSION_ID").cloned();

        if let Some(family) = PlatformFamily::from_os_id(&id) {
            return Some(Self {
                family,
                distribution,
                version,
                detection_reason: format!("os-release ID={}", id),
                kernel: None,
                os_long: None,
            });
        }

        let like = fields.get("ID_LIKE").cloned().unwrap_or_default();
        like.split_whitespace()
            .find_map(PlatformFamily::from_os_id)
            .map(|family| Self {
                family,
                distribution,
                version,
                detection_reason: format!("os-release ID_LIKE={}", like),
                kernel: None,
                os_long: None,
            })
    }

    pub fn templates(&self) -> Vec<(PackageIntent, &'static str)> {
        PackageIntent::ALL
            .iter()
            .filter_map(|intent| template_for(*intent, self.family).map(|t| (*intent, t)))
            .collect()
    }
}

fn parse_os_release(content: &str) -> std::collections::HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            (key.trim().to_string(), value.to_string())
        })
        .collect()
}

const MARKER_FILES: &[(&str, PlatformFamily)] = &[
    ("/etc/redhat-release", PlatformFamily::Rhel),
    ("/etc/fedora-release", PlatformFamily::Rhel),
    ("/etc/debian_version", PlatformFamily::Debian),
    ("/etc/arch-release", PlatformFamily::Arch),
    ("/etc/SuSE-release", PlatformFamily::Suse),
    ("/etc/gentoo-release", PlatformFamily::Gentoo),
];

const PACKAGE_MANAGERS: &[(&str, PlatformFamily)] = &[
    ("dnf", PlatformFamily::Rhel),
    ("yum", PlatformFamily::Rhel),
    ("apt-get", PlatformFamily::Debian),
    ("pacman", PlatformFamily::Arch),
    ("zypper", PlatformFamily::Suse),
    ("emerge", PlatformFamily::Gentoo),
];

/// Detect the platform from the filesystem rooted at `root`.
///
/// Order: os-release (`ID`, then `ID_LIKE`), marker files, package managers
/// on `PATH`. Package-manager probing only happens for the real root.
pub fn detect_at(root: &Path) -> PlatformInfo {
    for candidate in ["etc/os-release", "usr/lib/os-release"] {
        if let Ok(content) = std::fs::read_to_string(root.join(candidate)) {
            if let Some(info) = PlatformInfo::from_os_release(&content) {
                return info;
            }
        }
    }

    for (file, family) in MARKER_FILES {
        let path = root.join(file.trim_start_matches('/'));
        if path.exists() {
            let version = std::fs::read_to_string(&path)
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());
            return PlatformInfo {
                family: *family,
                distribution: family.to_string(),
                version,
                detection_reason: format!("marker file {}", file),
                kernel: None,
                os_long: None,
            };
        }
    }

    if root == Path::new("/") {
        for (binary, family) in PACKAGE_MANAGERS {
            if which::which(binary).is_ok() {
                return PlatformInfo {
                    family: *family,
                    distribution: family.to_string(),
                    version: None,
                    detection_reason: format!("package manager {} on PATH", binary),
                    kernel: None,
                    os_long: None,
                };
            }
        }
    }

    PlatformInfo::unknown("no os-release, marker file or known package manager")
}

static PLATFORM: OnceLock<PlatformInfo> = OnceLock::new();

/// Detect once per process and cache.
pub fn detect() -> &'static PlatformInfo {
    PLATFORM.get_or_init(|| {
        let mut info = detect_at(Path::new("/"));
        info.kernel = System::kernel_version();
        info.os_long = System::long_os_version();
        info!(
            family = %info.family,
            distribution = %info.distribution,
            reason = %info.detection_reason,
            "detected platform"
        );
        debug!(kernel = ?info.kernel, os = ?info.os_long, "platform details");
        info
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEDORA: &str = r#"NAME="Fedora Linux"
VERSION="39 (Workstation Edition)"
ID=fedora
VERSION_ID=39
"#;

    #[test]
    fn test_os_release_id() {
        let info = PlatformInfo::from_os_release(FEDORA).unwrap();
        assert_eq!(info.family, PlatformFamily::Rhel);
        assert_eq!(info.distribution, "Fedora Linux");
        assert_eq!(info.version.as_deref(), Some("39"));
        assert_eq!(info.detection_reason, "os-release ID=fedora");
    }

    #[test]
    fn test_os_release_id_like_fallback() {
        let content = "NAME=\"Zorin OS\"\nID=zorin\nID_LIKE=\"ubuntu debian\"\n";
        let info = PlatformInfo::from_os_release(content).unwrap();
        assert_eq!(info.family, PlatformFamily::Debian);
        assert!(info.detection_reason.starts_with("os-release ID_LIKE"));
    }

    #[test]
    fn test_os_release_unrecognised() {
        assert!(PlatformInfo::from_os_release("ID=plan9\n").is_none());
        assert!(PlatformInfo::from_os_release("").is_none());
    }

    #[test]
    fn test_templates_per_family() {
        assert_eq!(
            template_for(PackageIntent::Install, PlatformFamily::Rhel),
            Some("dnf install -y {package}")
        );
        assert_eq!(
            template_for(PackageIntent::Search, PlatformFamily::Debian),
            Some("apt-cache search {package}")
        );
        assert_eq!(
            template_for(PackageIntent::Remove, PlatformFamily::Arch),
            Some("pacman -R --noconfirm {package}")
        );
        assert_eq!(
            template_for(PackageIntent::Install, PlatformFamily::Suse),
            Some("zypper install -y {package}")
        );
        assert_eq!(
            template_for(PackageIntent::Search, PlatformFamily::Gentoo),
            Some("emerge --search {package}")
        );
        for intent in PackageIntent::ALL {
            assert_eq!(template_for(intent, PlatformFamily::Unknown), None);
        }
    }

    #[test]
    fn test_render_template() {
        let template = template_for(PackageIntent::Install, PlatformFamily::Debian).unwrap();
        assert_eq!(render_template(template, "nginx"), "apt-get install -y nginx");
    }

    #[test]
    fn test_detect_at_marker_file() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("etc")).unwrap();
        std::fs::write(root.path().join("etc/arch-release"), "").unwrap();
        let info = detect_at(root.path());
        assert_eq!(info.family, PlatformFamily::Arch);
        assert_eq!(info.detection_reason, "marker file /etc/arch-release");
    }

    #[test]
    fn test_detect_at_prefers_os_release() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("etc")).unwrap();
        std::fs::write(root.path().join("etc/os-release"), "ID=gentoo\n").unwrap();
        std::fs::write(root.path().join("etc/debian_version"), "12.0").unwrap();
        assert_eq!(detect_at(root.path()).family, PlatformFamily::Gentoo);
    }

    #[test]
    fn test_detect_at_empty_root_is_unknown() {
        let root = tempfile::tempdir().unwrap();
        let info = detect_at(root.path());
        assert_eq!(info.family, PlatformFamily::Unknown);
        assert!(info.templates().is_empty());
    }

    #[test]
    fn test_detect_is_cached() {
        let first = detect() as *const PlatformInfo;
        let second = detect() as *const PlatformInfo;
        assert_eq!(first, second);
    }
}
