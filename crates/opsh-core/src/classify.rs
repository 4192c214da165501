//! Command classification policy.
//!
//! Decides whether a command gets batch (captured) execution or a
//! pseudo-terminal. Matching is plain substring membership: a command that
//! merely contains a keyword, even inside a longer word, is routed to the
//! interactive path. Over-matching is intentional: the interactive path can
//! run anything the simple path can, so a false positive only costs a PTY.

use std::fmt;

/// Execution strategy for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Finite command: capture merged output and record the exit code.
    Simple,
    /// Terminal-attaching command: run under a pseudo-terminal.
    Interactive,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::Simple => f.write_str("simple"),
            CommandKind::Interactive => f.write_str("interactive"),
        }
    }
}

/// Default keyword set: terminal-attaching tools, follow-mode viewers,
/// remote-shell clients.
pub const DEFAULT_INTERACTIVE_KEYWORDS: &[&str] = &[
    "ssh", "sshx", "tail -f", "ping", "watch", "htop", "top", "nano", "vim",
];

/// Keyword-based classifier. The keyword list is policy, not correctness;
/// deployments can override it from configuration.
#[derive(Debug, Clone)]
pub struct Classifier {
    keywords: Vec<String>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(
            DEFAULT_INTERACTIVE_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .collect(),
        )
    }
}

impl Classifier {
    pub fn new(keywords: Vec<String>) -> Self {
        Self { keywords }
    }

    /// Classify a raw command string. Pure and total.
    pub fn classify(&self, command: &str) -> CommandKind {
        if self.keywords.iter().any(|k| command.contains(k.as_str())) {
            CommandKind::Interactive
        } else {
            CommandKind::Simple
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_command_is_simple() {
        let c = Classifier::default();
        assert_eq!(c.classify("ls -la /tmp"), CommandKind::Simple);
        assert_eq!(c.classify("echo hi"), CommandKind::Simple);
    }

    #[test]
    fn keyword_command_is_interactive() {
        let c = Classifier::default();
        assert_eq!(c.classify("ping localhost"), CommandKind::Interactive);
        assert_eq!(c.classify("ssh user@host"), CommandKind::Interactive);
        assert_eq!(c.classify("tail -f /var/log/syslog"), CommandKind::Interactive);
    }

    #[test]
    fn matches_keyword_inside_longer_word() {
        // Substring policy: "laptop" contains "top". Routed interactive on
        // purpose rather than risking a hung batch capture.
        let c = Classifier::default();
        assert_eq!(c.classify("cat laptop.txt"), CommandKind::Interactive);
    }

    #[test]
    fn tail_without_follow_is_simple() {
        let c = Classifier::default();
        assert_eq!(c.classify("tail -n 5 file.log"), CommandKind::Simple);
    }

    #[test]
    fn empty_command_is_simple() {
        let c = Classifier::default();
        assert_eq!(c.classify(""), CommandKind::Simple);
    }

    #[test]
    fn custom_keyword_list() {
        let c = Classifier::new(vec!["mosh".to_string()]);
        assert_eq!(c.classify("mosh host"), CommandKind::Interactive);
        assert_eq!(c.classify("ssh host"), CommandKind::Simple);
    }
}
