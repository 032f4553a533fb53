//! Command and query sanitisation
//!
//! Pure text transforms applied before anything reaches a shell or the model.
//! Nothing here executes or logs beyond `debug!`.

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

/// Default upper bound on a command candidate, in characters.
pub const MAX_COMMAND_LENGTH: usize = 2000;

/// Upper bound on a user query, in characters.
pub const MAX_QUERY_LENGTH: usize = 10_000;

/// A command that passed sanitisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedCommand {
    pub text: String,
    pub had_sudo_stripped: bool,
}

/// Why a candidate was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct Rejection {
    pub reason: String,
}

impl Rejection {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

const ROOT_PATHS: &str = r"(?:/\*?|~/?\*?|\$HOME/?\*?|\$\{HOME\}/?\*?|/(?:bin|boot|dev|etc|home|lib|lib32|lib64|opt|proc|root|run|sbin|srv|sys|usr|var)/?\*?)";

lazy_static! {
    /// Enumerated denylist of destructive or injection patterns.
    static ref DENYLIST: Vec<(Regex, &'static str)> = vec![
        (
            Regex::new(&format!(
                r"(?i)\brm\s+(?:[^;&|\n]*\s)?(?:-[a-z]*r[a-z]*|--recursive)\s+(?:[^;&|\n]*\s)?{}(?:\s|$|[;&|])",
                ROOT_PATHS
            ))
            .expect("valid regex"),
            "recursive delete of a root-level path",
        ),
        (
            Regex::new(r"(?i)(?:^|[\s;&|(])(?:\S*/)?mkfs(?:\.[a-z0-9]+)?(?:\s|$)").expect("valid regex"),
            "filesystem format utility",
        ),
        (
            Regex::new(r"(?i)(?:^|[\s;&|(])(?:\S*/)?(?:fdisk|sfdisk|cfdisk|gdisk|parted|wipefs)(?:\s|$)")
                .expect("valid regex"),
            "disk partitioning utility",
        ),
        (
            Regex::new(r":\s*\(\s*\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:").expect("valid regex"),
            "fork bomb",
        ),
        (
            Regex::new(r"(?i)\bdd\s+[^;&|\n]*\bof=/dev/(?:sd|hd|vd|xvd|nvme|mmcblk|disk)").expect("valid regex"),
            "raw write to a block device",
        ),
        (
            Regex::new(r"(?i)<\s*script").expect("valid regex"),
            "script injection",
        ),
        (
            Regex::new(r"(?i)\b(?:javascript|vbscript)\s*:").expect("valid regex"),
            "script URI injection",
        ),
        (
            Regex::new(r"(?i)\bdata\s*:\s*text/html").expect("valid regex"),
            "HTML data URI injection",
        ),
        (
            Regex::new(r"(?i)<[a-z][^>]*[\s/]on[a-z]+\s*=").expect("valid regex"),
            "HTML event handler injection",
        ),
    ];

    static ref SUDO_PREFIX: Regex = Regex::new(
        r"(?m)(^|&&|\|\||[;|])([ \t]*)(?i:sudo)(?:[ \t]+(?:-[ugpCDhrt][ \t]+\S+|--[a-z-]+=\S+|-[A-Za-z]+|--[a-z-]+))*(?:[ \t]+|$)"
    )
    .expect("valid regex");

    static ref INLINE_WS: Regex = Regex::new(r"[ \t]+").expect("valid regex");
    static ref ANY_WS: Regex = Regex::new(r"\s+").expect("valid regex");

    static ref QUERY_INJECTION: Vec<Regex> = vec![
        Regex::new(r"(?is)<\s*script[^>]*>.*?<\s*/\s*script\s*>").expect("valid regex"),
        Regex::new(r"(?i)<\s*/?\s*script[^>]*>").expect("valid regex"),
        Regex::new(r"(?i)\b(?:javascript|vbscript)\s*:").expect("valid regex"),
        Regex::new(r"(?i)\bdata\s*:\s*text/html[^\s]*").expect("valid regex"),
        Regex::new(r"(?i)<[a-z][^>]*[\s/]on[a-z]+\s*=[^>]*>?").expect("valid regex"),
    ];
}

/// Returns the reason if `text` matches an entry of the denylist.
pub fn denylist_match(text: &str) -> Option<&'static str> {
    DENYLIST
        .iter()
        .find(|(pattern, _)| pattern.is_match(text))
        .map(|(_, reason)| *reason)
}

/// Validates and normalises command candidates proposed by the model.
#[derive(Debug, Clone)]
pub struct CommandSanitizer {
    max_length: usize,
}

impl Default for CommandSanitizer {
    fn default() -> Self {
        Self::new(MAX_COMMAND_LENGTH)
    }
}

impl CommandSanitizer {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Sanitise a candidate command.
    ///
    /// Idempotent: feeding an accepted `text` back in returns the same text.
    pub fn sanitize(&self, raw: &str, allow_sudo: bool) -> Result<SanitizedCommand, Rejection> {
        let stripped = strip_control_chars(raw);

        let length = stripped.chars().count();
        if length > self.max_length {
            return Err(Rejection::new(format!(
                "command is {} characters long, the limit is {}",
                length, self.max_length
            )));
        }

        if let Some(reason) = denylist_match(&stripped) {
            debug!(reason, "command rejected by denylist");
            return Err(Rejection::new(format!("blocked pattern: {}", reason)));
        }

        let (text, had_sudo_stripped) = if allow_sudo {
            (stripped, false)
        } else {
            strip_sudo(&stripped)
        };

        let text = normalize_whitespace(&text);
        if text.is_empty() {
            return Err(Rejection::new("command is empty after sanitisation"));
        }

        // Normalisation can join tokens a pattern was written against.
        if let Some(reason) = denylist_match(&text) {
            debug!(reason, "normalised command rejected by denylist");
            return Err(Rejection::new(format!("blocked pattern: {}", reason)));
        }

        if had_sudo_stripped {
            debug!(command = %text, "stripped sudo from command");
        }

        Ok(SanitizedCommand {
            text,
            had_sudo_stripped,
        })
    }
}

/// Clean up a user query before it becomes a conversation turn.
pub fn sanitize_query(query: &str) -> Result<String, Rejection> {
    if query.trim().is_empty() {
        return Err(Rejection::new("query is empty"));
    }
    let length = query.chars().count();
    if length > MAX_QUERY_LENGTH {
        return Err(Rejection::new(format!(
            "query is {} characters long, the limit is {}",
            length, MAX_QUERY_LENGTH
        )));
    }

    let mut text = strip_control_chars(query);
    for pattern in QUERY_INJECTION.iter() {
        text = pattern.replace_all(&text, "").into_owned();
    }
    let text = ANY_WS.replace_all(text.trim(), " ").into_owned();

    if text.is_empty() {
        return Err(Rejection::new("query is empty after sanitisation"));
    }
    Ok(text)
}

fn strip_control_chars(text: &str) -> String {
    // A bare carriage return lets the tail of a line overdraw its head on screen.
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t'))
        .collect()
}

fn strip_sudo(text: &str) -> (String, bool) {
    let mut current = text.to_string();
    let mut stripped = false;
    loop {
        let next = SUDO_PREFIX.replace_all(&current, "${1}${2}").into_owned();
        if next == current {
            return (current, stripped);
        }
        stripped = true;
        current = next;
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| INLINE_WS.replace_all(line.trim_matches([' ', '\t']), " ").into_owned())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanitize(raw: &str, allow_sudo: bool) -> Result<SanitizedCommand, Rejection> {
        CommandSanitizer::default().sanitize(raw, allow_sudo)
    }

    #[test]
    fn test_sudo_is_stripped_not_rejected() {
        let result = sanitize("sudo dnf install nginx", false).unwrap();
        assert_eq!(result.text, "dnf install nginx");
        assert!(result.had_sudo_stripped);
    }

    #[test]
    fn test_sudo_kept_when_allowed() {
        let result = sanitize("sudo dnf install nginx", true).unwrap();
        assert_eq!(result.text, "sudo dnf install nginx");
        assert!(!result.had_sudo_stripped);
    }

    #[test]
    fn test_sudo_variants() {
        let cases = [
            ("  SUDO   apt-get update", "apt-get update"),
            ("sudo -E make install", "make install"),
            ("sudo -u postgres psql -l", "psql -l"),
            ("apt-get update && sudo apt-get install vim", "apt-get update && apt-get install vim"),
            ("ls; sudo whoami", "ls; whoami"),
            ("cat x | sudo tee /tmp/y", "cat x | tee /tmp/y"),
            ("sudo sudo id", "id"),
        ];
        for (raw, expected) in cases {
            let result = sanitize(raw, false).unwrap();
            assert_eq!(result.text, expected, "input: {raw}");
            assert!(result.had_sudo_stripped);
        }
    }

    #[test]
    fn test_sudoedit_is_not_sudo() {
        let result = sanitize("sudoedit /etc/hosts", false).unwrap();
        assert_eq!(result.text, "sudoedit /etc/hosts");
        assert!(!result.had_sudo_stripped);
    }

    #[test]
    fn test_denylist_rejections() {
        let blocked = [
            "rm -rf /",
            "rm -rf /*",
            "rm -fr ~",
            "rm  -r   -f  /",
            "rm --recursive --force /etc",
            "rm -rf $HOME",
            "mkfs.ext4 /dev/sda1",
            "/sbin/mkfs -t ext4 /dev/sdb",
            "fdisk /dev/sda",
            "parted /dev/nvme0n1 mklabel gpt",
            ":(){ :|:& };:",
            "dd if=/dev/zero of=/dev/sda bs=1M",
            "echo '<script>alert(1)</script>'",
            "echo '<img src=x onerror=alert(1)>'",
            "curl javascript:alert(1)",
        ];
        for raw in blocked {
            assert!(sanitize(raw, false).is_err(), "expected rejection: {raw}");
        }
    }

    #[test]
    fn test_harmless_rm_allowed() {
        assert!(sanitize("rm -rf ./build", false).is_ok());
        assert!(sanitize("rm -rf /tmp/scratch", false).is_ok());
        assert!(sanitize("rm notes.txt", false).is_ok());
    }

    #[test]
    fn test_control_chars_and_whitespace() {
        let result = sanitize("ls\u{7}\u{1b}   -la \t /tmp\r\n\n  df   -h  ", false).unwrap();
        assert_eq!(result.text, "ls -la /tmp\ndf -h");
        assert!(!result.text.chars().any(|c| c.is_control() && c != '\n'));
    }

    #[test]
    fn test_carriage_return_cannot_hide_text() {
        let result = sanitize("rm -rf ./data\recho safe", false).unwrap();
        assert!(!result.text.contains('\r'));
        assert_eq!(result.text, "rm -rf ./data\necho safe");
    }

    #[test]
    fn test_redirect_with_on_flag_is_not_html() {
        assert!(sanitize("psql < dump.sql --onerror=stop", false).is_ok());
        assert!(sanitize("sort < names.txt --one=1", false).is_ok());
        assert!(sanitize("echo '<svg/onload=alert(1)>'", false).is_err());
        assert_eq!(sanitize_query("set one=1 in the config").unwrap(), "set one=1 in the config");
    }

    #[test]
    fn test_length_limit() {
        let sanitizer = CommandSanitizer::new(10);
        assert!(sanitizer.sanitize("echo 12345678", false).is_err());
        assert!(sanitizer.sanitize("echo 1", false).is_ok());
    }

    #[test]
    fn test_empty_rejected() {
        assert!(sanitize("   \n\t ", false).is_err());
        assert!(sanitize("sudo", false).is_err());
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "sudo   dnf install   nginx",
            "ls\t-la\n\n  pwd",
            "echo \"a   b\" && sudo -H id",
            "uname -a",
            " cat /etc/os-release | grep ID ",
        ];
        for input in inputs {
            for allow_sudo in [false, true] {
                let once = sanitize(input, allow_sudo).unwrap();
                let twice = sanitize(&once.text, allow_sudo).unwrap();
                assert_eq!(once.text, twice.text, "input: {input}");
            }
        }
    }

    #[test]
    fn test_sanitize_query() {
        assert_eq!(
            sanitize_query("  how   much\n disk\u{0} space?  ").unwrap(),
            "how much disk space?"
        );
        assert_eq!(
            sanitize_query("list <script>alert(1)</script>files").unwrap(),
            "list files"
        );
        assert!(sanitize_query("   ").is_err());
        assert!(sanitize_query(&"a".repeat(MAX_QUERY_LENGTH + 1)).is_err());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn fragment() -> impl Strategy<Value = String> {
            prop_oneof![
                "[a-z0-9 ./_=-]{0,12}",
                Just("sudo ".to_string()),
                Just("SUDO -u root ".to_string()),
                Just(" && ".to_string()),
                Just("; ".to_string()),
                Just(" | ".to_string()),
                Just("\t".to_string()),
                Just("\n  ".to_string()),
                Just("\r".to_string()),
                Just("\r\n".to_string()),
                Just("\u{1b}[2J".to_string()),
                Just("\u{7}".to_string()),
                Just("\u{a0}".to_string()),
                Just("rm -rf /".to_string()),
                Just("mkfs".to_string()),
                Just("<img src=x onerror=y>".to_string()),
                any::<char>().prop_map(String::from),
            ]
        }

        fn candidate() -> impl Strategy<Value = String> {
            proptest::collection::vec(fragment(), 0..10).prop_map(|parts| parts.concat())
        }

        proptest! {
            #[test]
            fn accepted_commands_are_fixed_points(raw in candidate(), allow_sudo in any::<bool>()) {
                if let Ok(once) = sanitize(&raw, allow_sudo) {
                    let twice = sanitize(&once.text, allow_sudo);
                    prop_assert!(twice.is_ok(), "re-sanitising {:?} failed", once.text);
                    let twice = twice.unwrap();
                    prop_assert_eq!(&once.text, &twice.text);
                    prop_assert!(!twice.had_sudo_stripped);
                    prop_assert!(!once.text.chars().any(|c| c.is_control() && c != '\n' && c != '\t'));
                }
            }

            #[test]
            fn sanitize_is_deterministic(raw in candidate(), allow_sudo in any::<bool>()) {
                prop_assert_eq!(sanitize(&raw, allow_sudo), sanitize(&raw, allow_sudo));
            }
        }
    }
}
