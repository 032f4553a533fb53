//! Command risk classification
//!
//! A static rule table checked in order: forbidden rules first, then
//! destructive ones. Anything unmatched is safe.

use super::sanitizer::denylist_match;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::fmt;

/// Policy tier for a sanitised command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Runs without confirmation
    Safe,
    /// Needs confirmation unless auto-confirm is on
    Destructive,
    /// Never runs
    Forbidden,
}

impl RiskLevel {
    pub fn requires_confirmation(&self) -> bool {
        matches!(self, RiskLevel::Destructive)
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, RiskLevel::Forbidden)
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Safe => write!(f, "safe"),
            RiskLevel::Destructive => write!(f, "destructive"),
            RiskLevel::Forbidden => write!(f, "forbidden"),
        }
    }
}

/// Classification result with the rule that fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub reason: Option<&'static str>,
}

struct Rule {
    pattern: Regex,
    level: RiskLevel,
    reason: &'static str,
}

// Start of a simple command: beginning of text or after a separator,
// optionally behind env assignments.
const CMD_START: &str = r"(?:^|[;&|\n(`]|\$\()\s*(?:[A-Za-z_][A-Za-z0-9_]*=\S*\s+)*";

// Programs that run their arguments as a command, with their own options,
// assignments and a duration (`timeout 5`).
const WRAPPER: &str = r"(?:\S*/)?(?:xargs|env|nice|ionice|nohup|exec|stdbuf|setsid|time|timeout|sudo|doas)(?:\s+-{1,2}[A-Za-z0-9][A-Za-z0-9-]*(?:[=\s]\S+)?)*(?:\s+[A-Za-z_][A-Za-z0-9_]*=\S*)*(?:\s+\d+(?:\.\d+)?[smhd]?)?\s+";

// `sh -c '...'` and friends; the quoted script starts a new command.
const SHELL_C: &str = r#"(?:\S*/)?(?:sh|bash|zsh|dash|ksh)\s+(?:-[A-Za-z]+\s+)*-[A-Za-z]*c\s+['"]?"#;

fn rule(body: &str, level: RiskLevel, reason: &'static str) -> Rule {
    // Inside `sh -c '...'` or `$(...)` a word also ends at the closing quote or paren.
    let body = body.replace(r"(?:\s|$)", r#"(?:[\s'"`)]|$)"#);
    let pattern = format!(
        "(?i){}(?:{}|{})*(?:\\S*/)?{}",
        CMD_START, WRAPPER, SHELL_C, body
    );
    Rule {
        pattern: Regex::new(&pattern).expect("valid regex"),
        level,
        reason,
    }
}

lazy_static! {
    static ref RULES: Vec<Rule> = {
        use RiskLevel::*;
        vec![
            // Forbidden
            rule(r"chmod\s+(?:\S+\s+)*(?:-[a-z]*R[a-z]*|--recursive)\s+(?:\S+\s+)*[0-7]?777\s+/(?:\s|$)", Forbidden, "recursive world-writable permissions on /"),
            rule(r"chown\s+(?:\S+\s+)*(?:-[a-z]*R[a-z]*|--recursive)\s+(?:\S+\s+)*/(?:\s|$)", Forbidden, "recursive ownership change on /"),
            rule(r"mv\s+(?:-\S+\s+)*/\*?\s", Forbidden, "moving the root filesystem"),
            rule(r"shred\s+(?:\S+\s+)*/dev/", Forbidden, "shredding a device"),
            Rule {
                pattern: Regex::new(r">\s*/dev/(?:sd|hd|vd|xvd|nvme|mmcblk)").expect("valid regex"),
                level: Forbidden,
                reason: "redirect onto a block device",
            },
            // Destructive: file removal
            rule(r"(?:rm|rmdir|unlink|shred|truncate|dd)(?:\s|$)", Destructive, "removes or overwrites files"),
            rule(r"find\s[^;&|\n]*(?:-delete|-exec\s+rm)", Destructive, "removes files"),
            // Destructive: package removal
            rule(r"(?:apt|apt-get|aptitude|dnf|yum|zypper)\s+(?:\S+\s+)*(?:remove|purge|erase|autoremove|rm)(?:\s|$)", Destructive, "removes packages"),
            rule(r"pacman\s+(?:\S+\s+)*-R", Destructive, "removes packages"),
            rule(r"emerge\s+(?:\S+\s+)*(?:--unmerge|--depclean|-C)(?:\s|$)", Destructive, "removes packages"),
            rule(r"rpm\s+(?:\S+\s+)*(?:-e|--erase)(?:\s|$)", Destructive, "removes packages"),
            rule(r"dpkg\s+(?:\S+\s+)*(?:-r|-P|--remove|--purge)(?:\s|$)", Destructive, "removes packages"),
            rule(r"(?:pip|pip3|snap|flatpak)\s+(?:\S+\s+)*(?:uninstall|remove)(?:\s|$)", Destructive, "removes packages"),
            // Destructive: process termination
            rule(r"(?:kill|killall|pkill|xkill)(?:\s|$)", Destructive, "terminates processes"),
            // Destructive: power state and services
            rule(r"(?:shutdown|reboot|poweroff|halt)(?:\s|$)", Destructive, "changes power state"),
            rule(r"init\s+[06](?:\s|$)", Destructive, "changes power state"),
            rule(r"systemctl\s+(?:\S+\s+)*(?:poweroff|reboot|halt|stop|disable|mask|kill)(?:\s|$)", Destructive, "stops or disables services"),
            rule(r"service\s+\S+\s+stop(?:\s|$)", Destructive, "stops services"),
            // Destructive: privilege and ownership
            rule(r"(?:chmod|chown|chgrp|chattr|setfacl)(?:\s|$)", Destructive, "changes permissions or ownership"),
            rule(r"(?:sudo|su|doas|pkexec)(?:\s|$)", Destructive, "runs with elevated privileges"),
            rule(r"(?:useradd|usermod|userdel|groupadd|groupdel|passwd|visudo|chpasswd)(?:\s|$)", Destructive, "changes accounts or privileges"),
            // Destructive: history rewriting
            rule(r"git\s+(?:reset\s+--hard|clean\s+-[a-z]*f|push\s+(?:\S+\s+)*(?:-f|--force))", Destructive, "discards repository state"),
            rule(r"crontab\s+-r(?:\s|$)", Destructive, "removes scheduled jobs"),
        ]
    };
}

/// Deterministic risk tiering over a fixed rule table.
#[derive(Debug, Default, Clone, Copy)]
pub struct RiskClassifier;

impl RiskClassifier {
    pub fn new() -> Self {
        RiskClassifier
    }

    pub fn classify(&self, command: &str) -> RiskLevel {
        self.assess(command).level
    }

    /// Classify and report which rule fired.
    ///
    /// The sanitizer denylist is consulted again here so that execution
    /// never depends on sanitizer output alone.
    pub fn assess(&self, command: &str) -> RiskAssessment {
        if let Some(reason) = denylist_match(command) {
            return RiskAssessment {
                level: RiskLevel::Forbidden,
                reason: Some(reason),
            };
        }

        for level in [RiskLevel::Forbidden, RiskLevel::Destructive] {
            if let Some(rule) = RULES
                .iter()
                .find(|r| r.level == level && r.pattern.is_match(command))
            {
                return RiskAssessment {
                    level,
                    reason: Some(rule.reason),
                };
            }
        }

        RiskAssessment {
            level: RiskLevel::Safe,
            reason: None,
        }
    }
}
