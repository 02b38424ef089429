use std::collections::HashMap;
use std::path::Path;
use std::process::Command;

use crate::protocol::{
    GitDiffResult, GitFileDiff, GitFileStatus, GitLogEntry, GitLogResult, GitStatusResult,
};

/// Max diff size before truncation (1MB)
const MAX_DIFF_SIZE: usize = 1_000_000;

/// Check if path is a git repository
pub fn is_git_repo(path: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--git-dir"])
        .current_dir(path)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Get git status for a repository
pub fn get_status(path: &Path) -> Result<GitStatusResult, String> {
    if !is_git_repo(path) {
        return Ok(GitStatusResult {
            branch_name: String::new(),
            staged_files: vec![],
            unstaged_files: vec![],
            total_additions: 0,
            total_deletions: 0,
        });
    }

    let branch_output = run_git(path, &["rev-parse", "--abbrev-ref", "HEAD"])?;
    let branch_name = String::from_utf8_lossy(&branch_output).trim().to_string();

    let status_output = run_git(path, &["status", "--porcelain=v1"])?;
    let (mut staged_files, mut unstaged_files) = parse_porcelain_status(&status_output);

    let staged_stats = parse_numstat(&run_git(path, &["diff", "--cached", "--numstat"])?);
    let unstaged_stats = parse_numstat(&run_git(path, &["diff", "--numstat"])?);

    for file in &mut staged_files {
        if let Some((add, del)) = staged_stats.get(&file.path) {
            file.additions = *add;
            file.deletions = *del;
        }
    }
    for file in &mut unstaged_files {
        if let Some((add, del)) = unstaged_stats.get(&file.path) {
            file.additions = *add;
            file.deletions = *del;
        }
    }

    let total_additions = staged_files.iter().map(|f| f.additions).sum::<i32>()
        + unstaged_files.iter().map(|f| f.additions).sum::<i32>();
    let total_deletions = staged_files.iter().map(|f| f.deletions).sum::<i32>()
        + unstaged_files.iter().map(|f| f.deletions).sum::<i32>();

    Ok(GitStatusResult {
        branch_name,
        staged_files,
        unstaged_files,
        total_additions,
        total_deletions,
    })
}

/// Get git diffs with truncation for large files
pub fn get_diff(path: &Path) -> Result<GitDiffResult, String> {
    if !is_git_repo(path) {
        return Ok(GitDiffResult {
            files: vec![],
            truncated: false,
            truncated_files: vec![],
        });
    }

    let mut collector = DiffCollector::new();
    collector.collect(path, true)?;
    collector.collect(path, false)?;

    Ok(GitDiffResult {
        files: collector.files,
        truncated: collector.truncated,
        truncated_files: collector.truncated_files,
    })
}

/// Accumulates per-file diffs until the size budget runs out; files past
/// the budget are listed as truncated instead of inlined.
struct DiffCollector {
    files: Vec<GitFileDiff>,
    truncated_files: Vec<String>,
    total_size: usize,
    truncated: bool,
}

impl DiffCollector {
    fn new() -> Self {
        Self {
            files: Vec::new(),
            truncated_files: Vec::new(),
            total_size: 0,
            truncated: false,
        }
    }

    fn collect(&mut self, path: &Path, staged: bool) -> Result<(), String> {
        let list_args: &[&str] = if staged {
            &["diff", "--cached", "--name-only"]
        } else {
            &["diff", "--name-only"]
        };
        let listing = run_git(path, list_args)?;
        let file_paths: Vec<String> = String::from_utf8_lossy(&listing)
            .lines()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();

        for file_path in file_paths {
            if self.files.iter().any(|d| d.path == file_path) {
                continue;
            }
            if self.truncated {
                if !self.truncated_files.contains(&file_path) {
                    self.truncated_files.push(file_path);
                }
                continue;
            }

            let diff_output = if staged {
                run_git(path, &["diff", "--cached", "--", &file_path])?
            } else {
                run_git(path, &["diff", "--", &file_path])?
            };
            let diff = String::from_utf8_lossy(&diff_output).to_string();

            if self.total_size + diff.len() > MAX_DIFF_SIZE {
                self.truncated = true;
                self.truncated_files.push(file_path);
            } else {
                self.total_size += diff.len();
                self.files.push(GitFileDiff {
                    path: file_path,
                    diff,
                });
            }
        }

        Ok(())
    }
}

/// Get git log with upstream status
pub fn get_log(path: &Path, limit: u32) -> Result<GitLogResult, String> {
    if !is_git_repo(path) {
        return Ok(GitLogResult {
            entries: vec![],
            ahead: 0,
            behind: 0,
            upstream: None,
        });
    }

    // Custom format with NUL-separated fields
    let log_output = run_git(
        path,
        &[
            "log",
            &format!("-{limit}"),
            "--format=%H%x00%s%x00%an%x00%at",
        ],
    )?;
    let entries = parse_log_output(&log_output);

    let (ahead, behind, upstream) = get_upstream_status(path);

    Ok(GitLogResult {
        entries,
        ahead,
        behind,
        upstream,
    })
}

// --- Internal helpers ---

fn run_git(path: &Path, args: &[&str]) -> Result<Vec<u8>, String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(path)
        .output()
        .map_err(|e| format!("Failed to run git {}: {e}", args.first().unwrap_or(&"")))?;
    Ok(output.stdout)
}

fn parse_porcelain_status(output: &[u8]) -> (Vec<GitFileStatus>, Vec<GitFileStatus>) {
    let mut staged = Vec::new();
    let mut unstaged = Vec::new();

    let output_str = String::from_utf8_lossy(output);
    for line in output_str.lines() {
        if line.len() < 3 {
            continue;
        }

        let index_status = line.chars().next().unwrap_or(' ');
        let worktree_status = line.chars().nth(1).unwrap_or(' ');
        let path = line[3..].to_string();

        // Staged changes (index column)
        if index_status != ' ' && index_status != '?' {
            staged.push(GitFileStatus {
                path: path.clone(),
                status: status_char_to_string(index_status),
                additions: 0,
                deletions: 0,
            });
        }

        // Unstaged changes (worktree column) or untracked files
        if worktree_status != ' ' {
            unstaged.push(GitFileStatus {
                path,
                status: if index_status == '?' {
                    "untracked".to_string()
                } else {
                    status_char_to_string(worktree_status)
                },
                additions: 0,
                deletions: 0,
            });
        }
    }

    (staged, unstaged)
}

fn status_char_to_string(c: char) -> String {
    match c {
        'M' => "modified",
        'A' => "added",
        'D' => "deleted",
        'R' => "renamed",
        'C' => "copied",
        'U' => "unmerged",
        '?' => "untracked",
        _ => "unknown",
    }
    .to_string()
}

fn parse_numstat(output: &[u8]) -> HashMap<String, (i32, i32)> {
    let mut stats = HashMap::new();
    let output_str = String::from_utf8_lossy(output);

    for line in output_str.lines() {
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() >= 3 {
            let additions = parts[0].parse::<i32>().unwrap_or(0);
            let deletions = parts[1].parse::<i32>().unwrap_or(0);
            let path = parts[2].to_string();
            stats.insert(path, (additions, deletions));
        }
    }

    stats
}

fn get_upstream_status(path: &Path) -> (i32, i32, Option<String>) {
    let upstream_output = Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "@{upstream}"])
        .current_dir(path)
        .output();

    let upstream = match upstream_output {
        Ok(output) if output.status.success() => {
            let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if name.is_empty() {
                None
            } else {
                Some(name)
            }
        }
        _ => return (0, 0, None),
    };

    let count_output = Command::new("git")
        .args(["rev-list", "--left-right", "--count", "HEAD...@{upstream}"])
        .current_dir(path)
        .output();

    let (ahead, behind) = match count_output {
        Ok(output) if output.status.success() => {
            let counts = String::from_utf8_lossy(&output.stdout);
            let parts: Vec<&str> = counts.trim().split('\t').collect();
            if parts.len() == 2 {
                (
                    parts[0].parse::<i32>().unwrap_or(0),
                    parts[1].parse::<i32>().unwrap_or(0),
                )
            } else {
                (0, 0)
            }
        }
        _ => (0, 0),
    };

    (ahead, behind, upstream)
}

fn parse_log_output(output: &[u8]) -> Vec<GitLogEntry> {
    let mut entries = Vec::new();
    let output_str = String::from_utf8_lossy(output);

    for line in output_str.lines() {
        let parts: Vec<&str> = line.split('\0').collect();
        if parts.len() >= 4 {
            entries.push(GitLogEntry {
                sha: parts[0].to_string(),
                summary: parts[1].to_string(),
                author: parts[2].to_string(),
                timestamp: parts[3].parse::<i64>().unwrap_or(0),
            });
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::{parse_log_output, parse_numstat, parse_porcelain_status};

    #[test]
    fn porcelain_splits_staged_and_unstaged() {
        let output = b"M  staged.rs\n M unstaged.rs\nMM both.rs\n?? new.rs\n";
        let (staged, unstaged) = parse_porcelain_status(output);

        let staged_paths: Vec<&str> = staged.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(staged_paths, ["staged.rs", "both.rs"]);

        let unstaged_paths: Vec<&str> = unstaged.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(unstaged_paths, ["unstaged.rs", "both.rs", "new.rs"]);
        assert_eq!(unstaged[2].status, "untracked");
    }

    #[test]
    fn numstat_parses_counts() {
        let output = b"12\t3\tsrc/main.rs\n-\t-\tassets/logo.png\n";
        let stats = parse_numstat(output);
        assert_eq!(stats.get("src/main.rs"), Some(&(12, 3)));
        // Binary files report "-" and fall back to zero
        assert_eq!(stats.get("assets/logo.png"), Some(&(0, 0)));
    }

    #[test]
    fn log_parses_nul_separated_fields() {
        let output = b"abc123\x00Fix parser\x00Ada\x001700000000\nbad line\n";
        let entries = parse_log_output(output);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sha, "abc123");
        assert_eq!(entries[0].summary, "Fix parser");
        assert_eq!(entries[0].author, "Ada");
        assert_eq!(entries[0].timestamp, 1_700_000_000);
    }
}
