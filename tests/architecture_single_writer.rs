use std::fs;
use std::path::{Path, PathBuf};

const ALLOWED_UNIT_OF_WORK_CALLERS: &[&str] = &["src/engine/mod.rs", "src/engine/transaction.rs"];

fn collect_rust_files(root: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(root) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_rust_files(&path, out);
            continue;
        }
        if path.extension().and_then(|s| s.to_str()) == Some("rs") {
            out.push(path);
        }
    }
}

fn source_files() -> Vec<(String, String)> {
    let repo_root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let mut files = Vec::new();
    collect_rust_files(&repo_root.join("src"), &mut files);
    files
        .into_iter()
        .map(|file| {
            let rel = file
                .strip_prefix(repo_root)
                .unwrap_or(&file)
                .to_string_lossy()
                .replace('\\', "/");
            let content = fs::read_to_string(&file).unwrap_or_default();
            (rel, content)
        })
        .collect()
}

/// Code before the first `#[cfg(test)]`
fn non_test_code(content: &str) -> &str {
    content
        .find("#[cfg(test)]")
        .map(|i| &content[..i])
        .unwrap_or(content)
}

#[test]
fn ledger_units_of_work_are_opened_only_by_the_engine() {
    let mut offenders = Vec::new();
    for (rel, content) in source_files() {
        if ALLOWED_UNIT_OF_WORK_CALLERS.iter().any(|allowed| *allowed == rel) {
            continue;
        }
        for (idx, line) in content.lines().enumerate() {
            if line.contains("UnitOfWork::begin(") {
                offenders.push(format!("{rel}:{}: {}", idx + 1, line.trim()));
            }
        }
    }

    assert!(
        offenders.is_empty(),
        "ledger mutation outside the engine facade:\n{}",
        offenders.join("\n")
    );
}

#[test]
fn library_code_does_not_unwrap() {
    let mut offenders = Vec::new();
    for (rel, content) in source_files() {
        for (idx, line) in non_test_code(&content).lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.starts_with("//") {
                continue;
            }
            if trimmed.contains(".unwrap()") || trimmed.contains(".expect(") {
                offenders.push(format!("{rel}:{}: {}", idx + 1, trimmed));
            }
        }
    }

    assert!(
        offenders.is_empty(),
        "unwrap/expect in non-test code:\n{}",
        offenders.join("\n")
    );
}
