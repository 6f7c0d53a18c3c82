//! Git output parsers

use super::types::{ChangeType, FileChange};
use std::collections::HashMap;

/// Parse `git show --numstat --format=` output into per-path insertion and
/// deletion counts. Binary files report "-" and count as zero.
pub fn parse_numstat(output: &str) -> HashMap<String, (usize, usize)> {
    let mut stats = HashMap::new();
    for line in output.lines() {
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() != 3 {
            continue;
        }
        let insertions = parts[0].parse::<usize>().unwrap_or(0);
        let deletions = parts[1].parse::<usize>().unwrap_or(0);
        // Renames render as "old => new" or "dir/{old => new}/file"
        let path = normalize_rename_path(parts[2]);
        stats.insert(path, (insertions, deletions));
    }
    stats
}

fn normalize_rename_path(raw: &str) -> String {
    if let (Some(open), Some(close)) = (raw.find('{'), raw.find('}')) {
        let inner = &raw[open + 1..close];
        if let Some((_, new)) = inner.split_once(" => ") {
            let mut path = String::new();
            path.push_str(&raw[..open]);
            path.push_str(new);
            path.push_str(&raw[close + 1..]);
            return path.replace("//", "/");
        }
    }
    if let Some((_, new)) = raw.split_once(" => ") {
        return new.to_string();
    }
    raw.to_string()
}

/// Parse `git show --name-status --format=` output into file changes, then
/// fold in the numstat counts.
pub fn parse_file_changes(
    name_status: &str,
    numstat: &HashMap<String, (usize, usize)>,
) -> Vec<FileChange> {
    let mut changes = Vec::new();
    for line in name_status.lines() {
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 2 {
            continue;
        }
        let code = parts[0];
        let (change_type, path, old_path) = match code.chars().next() {
            Some('A') => (ChangeType::Added, parts[1].to_string(), None),
            Some('M') => (ChangeType::Modified, parts[1].to_string(), None),
            Some('D') => (ChangeType::Deleted, parts[1].to_string(), None),
            Some('R') if parts.len() >= 3 => (
                ChangeType::Renamed,
                parts[2].to_string(),
                Some(parts[1].to_string()),
            ),
            _ => continue,
        };
        let (insertions, deletions) = numstat.get(&path).copied().unwrap_or((0, 0));
        changes.push(FileChange {
            path,
            change_type,
            insertions,
            deletions,
            old_path,
        });
    }
    changes
}

/// Totals across all parsed changes.
pub fn change_totals(changes: &[FileChange]) -> (usize, usize) {
    changes.iter().fold((0, 0), |(ins, del), c| {
        (ins + c.insertions, del + c.deletions)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numstat_lines() {
        let stats = parse_numstat("10\t3\tsrc/lib.rs\n-\t-\tlogo.png\n5\t0\tREADME.md\n");
        assert_eq!(stats.get("src/lib.rs"), Some(&(10, 3)));
        assert_eq!(stats.get("logo.png"), Some(&(0, 0)));
        assert_eq!(stats.get("README.md"), Some(&(5, 0)));
    }

    #[test]
    fn parses_rename_paths() {
        let stats = parse_numstat("2\t2\tsrc/{old.rs => new.rs}\n");
        assert_eq!(stats.get("src/new.rs"), Some(&(2, 2)));
        let stats = parse_numstat("1\t1\told.rs => new.rs\n");
        assert_eq!(stats.get("new.rs"), Some(&(1, 1)));
    }

    #[test]
    fn folds_name_status_and_numstat() {
        let numstat = parse_numstat("7\t1\tsrc/main.rs\n3\t3\tsrc/new.rs\n");
        let changes = parse_file_changes("M\tsrc/main.rs\nR100\tsrc/old.rs\tsrc/new.rs\n", &numstat);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].change_type, ChangeType::Modified);
        assert_eq!(changes[0].insertions, 7);
        assert_eq!(changes[1].change_type, ChangeType::Renamed);
        assert_eq!(changes[1].old_path.as_deref(), Some("src/old.rs"));
        assert_eq!(change_totals(&changes), (10, 4));
    }
}
