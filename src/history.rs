//! Paged commit history of a repository

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::command::GitBinary;

/// Commits returned per page of `/log`
pub const PER_PAGE_COMMIT_COUNT: u64 = 1000;

const FIELD_SEP: char = '\x1f';
const RECORD_SEP: char = '\x1e';
const LOG_FORMAT: &str = "--pretty=format:%H%x1f%s%x1f%b%x1f%aN%x1f%aE%x1f%ad%x1f%cN%x1f%cE%x1f%cd%x1e";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitItem {
    pub commit: String,
    pub subject: String,
    pub body: String,
    pub author: Signature,
    pub committer: Signature,
}

#[derive(Debug, Clone)]
pub struct CommitHistoryReader {
    git: GitBinary,
}

impl CommitHistoryReader {
    pub fn new(git: GitBinary) -> Self {
        Self { git }
    }

    /// One page of `git log`, newest first. A repository without commits
    /// has an empty history.
    pub async fn read(&self, repo_dir: &Path, page: u64) -> Vec<CommitItem> {
        let count = format!("-n{}", PER_PAGE_COMMIT_COUNT);
        let skip = format!("--skip={}", page.saturating_mul(PER_PAGE_COMMIT_COUNT));
        let args = ["log", "--date=iso-strict", LOG_FORMAT, count.as_str(), skip.as_str()];

        match self.git.output(repo_dir, None, args).await {
            Ok(out) => parse_log(&String::from_utf8_lossy(&out)),
            Err(e) => {
                debug!(dir = %repo_dir.display(), "git log failed: {}", e);
                Vec::new()
            }
        }
    }
}

/// Records that do not have every field are skipped.
fn parse_log(out: &str) -> Vec<CommitItem> {
    out.split(RECORD_SEP)
        .filter_map(|record| {
            let fields: Vec<&str> = record.trim_start_matches('\n').split(FIELD_SEP).collect();
            let [commit, subject, body, a_name, a_email, a_date, c_name, c_email, c_date] =
                fields.as_slice()
            else {
                return None;
            };
            if commit.is_empty() {
                return None;
            }
            Some(CommitItem {
                commit: commit.to_string(),
                subject: subject.to_string(),
                body: body.trim_end().to_string(),
                author: Signature {
                    name: a_name.to_string(),
                    email: a_email.to_string(),
                    date: a_date.to_string(),
                },
                committer: Signature {
                    name: c_name.to_string(),
                    email: c_email.to_string(),
                    date: c_date.to_string(),
                },
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(sha: &str, subject: &str) -> String {
        [
            sha,
            subject,
            "body line\n",
            "Ann",
            "ann@example.com",
            "2024-01-02T03:04:05+00:00",
            "Bob",
            "bob@example.com",
            "2024-01-02T03:04:06+00:00",
        ]
        .join("\x1f")
    }

    #[test]
    fn test_parse_log() {
        let out = format!(
            "{}\x1e\n{}\x1e",
            record("aaaa", "first \"quoted\" subject"),
            record("bbbb", "second")
        );
        let commits = parse_log(&out);

        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].commit, "aaaa");
        assert_eq!(commits[0].subject, "first \"quoted\" subject");
        assert_eq!(commits[0].body, "body line");
        assert_eq!(commits[0].author.email, "ann@example.com");
        assert_eq!(commits[1].committer.name, "Bob");
    }

    #[test]
    fn test_parse_log_skips_broken_records() {
        let out = format!("{}\x1egarbage\x1e", record("aaaa", "ok"));
        let commits = parse_log(&out);
        assert_eq!(commits.len(), 1);
        assert!(parse_log("").is_empty());
    }
}
