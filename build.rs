use std::fs;
use std::path::Path;

/// Crates and std modules that only the file-facing modules may reach.
const IO_PATHS: &[&str] = &["csv", "clap", "tracing_subscriber", "std::fs"];
const IO_MODULES: &[&str] = &["data.rs", "main.rs", "error.rs"];

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");

    let violations = io_path_violations(Path::new("src"));
    if !violations.is_empty() {
        eprintln!("\nerror: coreset engine modules reach file or CLI I/O:");
        for v in &violations {
            eprintln!("  - {v}");
        }
        panic!("{} I/O boundary violation(s) in src/", violations.len());
    }
}

/// Engine code is everything under `src/` except the I/O modules; within it,
/// flag any `use` item or qualified path rooted at an I/O path. Test modules
/// are exempt.
fn io_path_violations(src: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(src) else {
        return Vec::new();
    };
    let mut files: Vec<_> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "rs"))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !IO_MODULES.contains(&n))
        })
        .collect();
    files.sort();

    let mut out = Vec::new();
    for path in files {
        let Ok(text) = fs::read_to_string(&path) else {
            continue;
        };
        let engine_part = text.split("#[cfg(test)]").next().unwrap_or_default();
        for (idx, line) in engine_part.lines().enumerate() {
            let code = line.split("//").next().unwrap_or_default().trim();
            if let Some(root) = IO_PATHS.iter().find(|root| mentions_path(code, root)) {
                out.push(format!("{}:{}: `{root}` ({code})", path.display(), idx + 1));
            }
        }
    }
    out
}

/// `use root…` items, or `root::` appearing as a whole path segment.
fn mentions_path(code: &str, root: &str) -> bool {
    if let Some(item) = code.strip_prefix("use ").or_else(|| code.strip_prefix("pub use ")) {
        let item = item.trim_start_matches("::");
        let rest = item.strip_prefix(root).unwrap_or("-");
        if rest.is_empty() || rest.starts_with("::") || rest.starts_with(';') {
            return true;
        }
    }
    let needle = format!("{root}::");
    code.match_indices(&needle).any(|(at, _)| {
        code[..at]
            .chars()
            .next_back()
            .is_none_or(|c| !(c.is_alphanumeric() || c == '_'))
    })
}
