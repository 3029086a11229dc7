//! Input discovery and classification.
//!
//! Walks the input directories, drops files by extension, and assigns each
//! remaining file to exactly one tool. Filename heuristics are applied
//! first because several tools share generic extensions (`.xml`, `.json`);
//! only files no heuristic resolves are content-probed, in [`Tool::ALL`]
//! order, and the first tool to claim a file wins.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tracing::{debug, error, warn};
use walkdir::WalkDir;

use scan_indexer_core::models::Tool;

/// Extensions that are never scan results worth indexing: raw nmap text
/// output, process logs, screenshots, databases.
pub const DEFAULT_IGNORED_EXTENSIONS: &[&str] = &[
    "nmap", "gnmap", "stderr", "stdout", "log", "png", "txt", "sqlite",
];

/// Split extension arguments given space- or comma-separated into a set.
///
/// Leading dots are dropped and values lower-cased: `[".PDF,docx", "ini"]`
/// becomes `{"pdf", "docx", "ini"}`.
pub fn parse_extension_list<S: AsRef<str>>(args: &[S]) -> BTreeSet<String> {
    args.iter()
        .flat_map(|arg| {
            arg.as_ref()
                .split(|c: char| c == ',' || c.is_whitespace())
                .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
                .collect::<Vec<_>>()
        })
        .filter(|ext| !ext.is_empty())
        .collect()
}

/// Extension allow/deny lists. A non-empty include list takes precedence
/// over the ignore list.
#[derive(Debug, Clone)]
pub struct ExtensionFilter {
    ignored: BTreeSet<String>,
    included: BTreeSet<String>,
}

impl Default for ExtensionFilter {
    fn default() -> Self {
        Self::new(BTreeSet::new(), BTreeSet::new())
    }
}

impl ExtensionFilter {
    /// `extra_ignored` is added to [`DEFAULT_IGNORED_EXTENSIONS`].
    pub fn new(extra_ignored: BTreeSet<String>, included: BTreeSet<String>) -> Self {
        let mut ignored: BTreeSet<String> = DEFAULT_IGNORED_EXTENSIONS
            .iter()
            .map(|e| e.to_string())
            .collect();
        ignored.extend(extra_ignored);
        Self { ignored, included }
    }

    pub fn allows(&self, path: &Path) -> bool {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if !self.included.is_empty() {
            return self.included.contains(&ext);
        }
        !self.ignored.contains(&ext)
    }
}

/// Result of applying the filename heuristic table to one file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Heuristic {
    /// The name alone identifies the tool.
    Claim(Tool),
    /// The name identifies output we deliberately do not index.
    Skip,
    /// Undecided; fall back to content probing.
    Unknown,
}

/// The fixed filename heuristic table.
///
/// | Name | Tool |
/// |------|------|
/// | `*.nessus` | nessus |
/// | `*.pem` | pem |
/// | `sslyze*.xml` | sslyze |
/// | `nmap*.xml` | nmap |
/// | `sslscan*.xml` (any case) | sslscan |
/// | `nikto*.xml` | skipped |
/// | `*.json` | testssl |
pub fn heuristic(file_name: &str) -> Heuristic {
    if file_name.ends_with(".nessus") {
        return Heuristic::Claim(Tool::Nessus);
    }
    if file_name.ends_with(".pem") {
        return Heuristic::Claim(Tool::Pem);
    }
    if file_name.ends_with(".xml") {
        if file_name.starts_with("sslyze") {
            return Heuristic::Claim(Tool::Sslyze);
        }
        if file_name.starts_with("nmap") {
            return Heuristic::Claim(Tool::Nmap);
        }
        if file_name.to_lowercase().starts_with("sslscan") {
            return Heuristic::Claim(Tool::Sslscan);
        }
        if file_name.starts_with("nikto") {
            return Heuristic::Skip;
        }
        return Heuristic::Unknown;
    }
    if file_name.ends_with(".json") {
        return Heuristic::Claim(Tool::Testssl);
    }
    Heuristic::Unknown
}

/// Files assigned to tools, plus what could not be assigned.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub files: BTreeMap<Tool, BTreeSet<PathBuf>>,
    pub unrecognized: BTreeSet<PathBuf>,
    pub missing_dirs: Vec<PathBuf>,
}

impl Classification {
    /// Number of files assigned to any tool.
    pub fn total(&self) -> usize {
        self.files.values().map(BTreeSet::len).sum()
    }

    pub fn files_for(&self, tool: Tool) -> impl Iterator<Item = &PathBuf> {
        self.files.get(&tool).into_iter().flatten()
    }

    fn assign(&mut self, tool: Tool, path: PathBuf) {
        self.files.entry(tool).or_default().insert(path);
    }
}

/// Classify every file under `dirs`.
///
/// `probe` is asked, for files no heuristic resolves, which tool (if any)
/// recognises the content. It must try tools in [`Tool::ALL`] order.
pub fn classify<F>(dirs: &[PathBuf], filter: &ExtensionFilter, probe: F) -> Classification
where
    F: Fn(&Path) -> Option<Tool>,
{
    let mut result = Classification::default();

    for dir in dirs {
        if !dir.is_dir() {
            error!(dir = %dir.display(), "Input directory does not exist, skipping");
            result.missing_dirs.push(dir.clone());
            continue;
        }
        let root = std::fs::canonicalize(dir).unwrap_or_else(|_| dir.clone());

        for entry in WalkDir::new(&root).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(dir = %root.display(), error = %e, "Unable to read directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if !filter.allows(path) {
                debug!(path = %path.display(), "Ignoring file by extension");
                continue;
            }

            let file_name = entry.file_name().to_string_lossy();
            let full_path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
            match heuristic(&file_name) {
                Heuristic::Claim(tool) => result.assign(tool, full_path),
                Heuristic::Skip => debug!(path = %path.display(), "Skipping unsupported output"),
                Heuristic::Unknown => match probe(&full_path) {
                    Some(tool) => result.assign(tool, full_path),
                    None => {
                        warn!(path = %full_path.display(), "Unknown file type");
                        result.unrecognized.insert(full_path);
                    }
                },
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn no_probe(_: &Path) -> Option<Tool> {
        None
    }

    #[test]
    fn parse_extension_list_splits_spaces_and_commas() {
        let set = parse_extension_list(&[".PDF,docx", "ini", " , "]);
        let expected: BTreeSet<String> = ["pdf", "docx", "ini"].iter().map(|s| s.to_string()).collect();
        assert_eq!(set, expected);
        assert_eq!(parse_extension_list(&["docx pdf"]).len(), 2);
    }

    #[test]
    fn filter_defaults_and_include_precedence() {
        let filter = ExtensionFilter::default();
        assert!(!filter.allows(Path::new("scan.gnmap")));
        assert!(!filter.allows(Path::new("shot.PNG")));
        assert!(filter.allows(Path::new("scan.xml")));
        assert!(filter.allows(Path::new("README")));

        let include = ExtensionFilter::new(BTreeSet::new(), parse_extension_list(&["xml"]));
        assert!(include.allows(Path::new("a.XML")));
        assert!(!include.allows(Path::new("a.json")));
        // Include list overrides the default ignore list.
        let include_txt = ExtensionFilter::new(BTreeSet::new(), parse_extension_list(&["txt"]));
        assert!(include_txt.allows(Path::new("notes.txt")));

        let extra = ExtensionFilter::new(parse_extension_list(&["json"]), BTreeSet::new());
        assert!(!extra.allows(Path::new("testssl.json")));
    }

    #[test]
    fn heuristic_table() {
        assert_eq!(heuristic("scan.nessus"), Heuristic::Claim(Tool::Nessus));
        assert_eq!(heuristic("nmap.nessus"), Heuristic::Claim(Tool::Nessus));
        assert_eq!(heuristic("sslyze_web.xml"), Heuristic::Claim(Tool::Sslyze));
        assert_eq!(heuristic("nmap_tcp.xml"), Heuristic::Claim(Tool::Nmap));
        assert_eq!(heuristic("SSLScan-host.xml"), Heuristic::Claim(Tool::Sslscan));
        assert_eq!(heuristic("nikto.xml"), Heuristic::Skip);
        assert_eq!(heuristic("report.xml"), Heuristic::Unknown);
        assert_eq!(heuristic("host.json"), Heuristic::Claim(Tool::Testssl));
        assert_eq!(heuristic("cert.pem"), Heuristic::Claim(Tool::Pem));
        assert_eq!(heuristic("notes"), Heuristic::Unknown);
        // Prefix matching is case sensitive for everything but sslscan.
        assert_eq!(heuristic("NMAP.xml"), Heuristic::Unknown);
    }

    #[test]
    fn nessus_suffix_wins_regardless_of_content() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("odd.nessus"), "<nmaprun></nmaprun>").unwrap();
        let result = classify(
            &[tmp.path().to_path_buf()],
            &ExtensionFilter::default(),
            |_| Some(Tool::Nmap),
        );
        assert_eq!(result.files_for(Tool::Nessus).count(), 1);
        assert_eq!(result.files_for(Tool::Nmap).count(), 0);
    }

    #[test]
    fn prefix_heuristic_decides_identical_content() {
        let tmp = TempDir::new().unwrap();
        let body = "<document title=\"scan\"></document>";
        fs::write(tmp.path().join("sslyze_a.xml"), body).unwrap();
        fs::write(tmp.path().join("sslscan_a.xml"), body).unwrap();
        let result = classify(&[tmp.path().to_path_buf()], &ExtensionFilter::default(), no_probe);
        assert_eq!(result.files_for(Tool::Sslyze).count(), 1);
        assert_eq!(result.files_for(Tool::Sslscan).count(), 1);
        assert_eq!(result.total(), 2);
    }

    #[test]
    fn probe_claims_unresolved_files_and_rest_are_unrecognized() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("deep/er")).unwrap();
        fs::write(tmp.path().join("deep/er/results.xml"), "<nmaprun/>").unwrap();
        fs::write(tmp.path().join("mystery.dat"), "???").unwrap();
        fs::write(tmp.path().join("ignored.gnmap"), "# Nmap").unwrap();

        let result = classify(
            &[tmp.path().to_path_buf()],
            &ExtensionFilter::default(),
            |path| {
                fs::read_to_string(path)
                    .ok()
                    .filter(|c| c.contains("<nmaprun"))
                    .map(|_| Tool::Nmap)
            },
        );
        assert_eq!(result.files_for(Tool::Nmap).count(), 1);
        assert_eq!(result.unrecognized.len(), 1);
        assert!(result
            .unrecognized
            .iter()
            .next()
            .unwrap()
            .ends_with("mystery.dat"));
        assert_eq!(result.total(), 1);
    }

    #[test]
    fn missing_directory_is_skipped_not_fatal() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.nessus"), "").unwrap();
        let missing = tmp.path().join("does-not-exist");
        let result = classify(
            &[missing.clone(), tmp.path().to_path_buf()],
            &ExtensionFilter::default(),
            no_probe,
        );
        assert_eq!(result.missing_dirs, vec![missing]);
        assert_eq!(result.files_for(Tool::Nessus).count(), 1);
    }

    #[test]
    fn overlapping_directories_do_not_duplicate_files() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub/a.nessus"), "").unwrap();
        let result = classify(
            &[tmp.path().to_path_buf(), tmp.path().join("sub")],
            &ExtensionFilter::default(),
            no_probe,
        );
        assert_eq!(result.total(), 1);
    }
}
