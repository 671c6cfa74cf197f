//! Wire types shared by the HTTP surface, the in-process client, and the
//! subprocess runner.

use serde::{Deserialize, Serialize};

/// Marker used in listings for directory entries.
pub const PRE: &str = "PRE";

/// Captured result of a shell pipeline.
///
/// Nonzero exit is data, not an error: handlers decide whether it is a
/// user command failure (400) or an integrity failure (500).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CmdOutput {
    pub exitcode: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.exitcode == 0
    }

    /// Synthetic result for a user command killed by its deadline.
    pub fn timeout(op: &str) -> Self {
        Self {
            exitcode: 1,
            stdout: String::new(),
            stderr: format!("{} timeout", op),
        }
    }
}

/// One listing row: `[date, time, size, path]`.
///
/// `date`/`time` are the mtime as `YYYY-MM-DD` / `HH:MM:SS`, `size` is
/// bytes as a string, or `PRE` for a synthesized directory entry (which
/// carries empty date and time and a trailing slash on the path).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListEntry(pub String, pub String, pub String, pub String);

impl ListEntry {
    pub fn file(date: String, time: String, size: u64, path: String) -> Self {
        Self(date, time, size.to_string(), path)
    }

    pub fn prefix(path: String) -> Self {
        Self(String::new(), String::new(), PRE.to_string(), path)
    }

    pub fn is_prefix(&self) -> bool {
        self.2 == PRE
    }

    pub fn path(&self) -> &str {
        &self.3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmd_output_roundtrip() {
        let out = CmdOutput {
            exitcode: 2,
            stdout: "a".to_string(),
            stderr: "b".to_string(),
        };
        let json = serde_json::to_string(&out).unwrap();
        assert!(json.contains("\"exitcode\":2"));
        let back: CmdOutput = serde_json::from_str(&json).unwrap();
        assert_eq!(back, out);
    }

    #[test]
    fn test_list_entry_serializes_as_array() {
        let entry = ListEntry::file("2024-01-02".into(), "03:04:05".into(), 9, "a/b".into());
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"["2024-01-02","03:04:05","9","a/b"]"#);
    }

    #[test]
    fn test_prefix_entry() {
        let entry = ListEntry::prefix("dir/".into());
        assert!(entry.is_prefix());
        assert_eq!(
            serde_json::to_string(&entry).unwrap(),
            r#"["","","PRE","dir/"]"#
        );
    }

    #[test]
    fn test_timeout_shape() {
        let out = CmdOutput::timeout("map");
        assert_eq!(out.exitcode, 1);
        assert_eq!(out.stderr, "map timeout");
    }
}
