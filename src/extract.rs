//! File extraction from model output.
//!
//! The generation prompt asks the model to label each file with a
//! `FILENAME: <name>` line followed by a fenced code block. Responses in
//! the wild also carry prose, stray markup, and sometimes a fence that is
//! never closed, so this module scans the output line by line and toggles
//! fence state instead of matching blocks with a greedy expression:
//! - `FILENAME: <name>` outside a fence names the next block
//! - an info string of the form `lang:<name>` on the opening fence names
//!   the block directly
//! - a fence still open at end of input is closed implicitly

use std::sync::LazyLock;

use regex::Regex;

use crate::errors::ExtractionError;
use crate::fileset::{FileSet, FileSetBuilder, MAIN_SOURCE_FILE, MANIFEST_FILE};

// Compile the marker regex once using LazyLock.
static FILENAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*FILENAME:\s*(.+?)\s*$").unwrap());

/// True when the line is a `FILENAME:` marker. Validation uses this to
/// spot markup that leaked into file content.
pub(crate) fn is_filename_marker(line: &str) -> bool {
    FILENAME_REGEX.is_match(line)
}

/// A successfully extracted file set plus scan diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub files: FileSet,
    /// Prose the model emitted outside any code block, kept for logs.
    pub commentary: String,
    /// Names of blocks that matched no known file and no asset path.
    pub dropped: Vec<String>,
}

/// Scans model output and recovers the generated files.
///
/// Fails when the entry point or manifest cannot be recovered; the error
/// carries whatever was recovered so callers can decide on defaults.
pub fn extract(raw: &str) -> Result<Extraction, ExtractionError> {
    let mut scanner = FenceScanner::new();
    for line in raw.lines() {
        scanner.feed(line);
    }
    scanner.finish()
}

struct FenceScanner {
    builder: FileSetBuilder,
    commentary: Vec<String>,
    dropped: Vec<String>,
    /// Name announced by a `FILENAME:` marker, consumed by the next fence.
    pending_name: Option<String>,
    /// Open block while inside a fence.
    block: Option<Block>,
}

struct Block {
    name: Option<String>,
    lines: Vec<String>,
}

impl FenceScanner {
    fn new() -> Self {
        Self {
            builder: FileSetBuilder::new(),
            commentary: Vec::new(),
            dropped: Vec::new(),
            pending_name: None,
            block: None,
        }
    }

    fn feed(&mut self, line: &str) {
        let trimmed = line.trim_start();
        let is_fence = trimmed.starts_with("```");

        // Inside a fence any fence line closes the block; everything else
        // is content, markers included.
        if let Some(mut block) = self.block.take() {
            if is_fence {
                self.close_block(block);
            } else {
                block.lines.push(line.to_string());
                self.block = Some(block);
            }
            return;
        }

        if is_fence {
            let name = fence_suffix_name(trimmed).or_else(|| self.pending_name.take());
            self.block = Some(Block { name, lines: Vec::new() });
            return;
        }

        if let Some(cap) = FILENAME_REGEX.captures(line) {
            self.pending_name = Some(clean_name(&cap[1]));
            return;
        }

        self.commentary.push(line.to_string());
    }

    fn close_block(&mut self, block: Block) {
        let content = block.lines.join("\n").trim().to_string();
        match block.name {
            Some(name) => {
                if name.contains(MAIN_SOURCE_FILE) {
                    self.builder.set_main_source(content);
                } else if name.contains(MANIFEST_FILE) {
                    self.builder.set_manifest(content);
                } else if !self.builder.add_asset(&name, content) {
                    self.dropped.push(name);
                }
            }
            None => self.dropped.push("<unnamed block>".to_string()),
        }
    }

    fn finish(mut self) -> Result<Extraction, ExtractionError> {
        // A fence left open at end of input still carries a usable file.
        if let Some(block) = self.block.take() {
            self.close_block(block);
        }
        let files = self.builder.build()?;
        Ok(Extraction {
            files,
            commentary: self.commentary.join("\n").trim().to_string(),
            dropped: self.dropped,
        })
    }
}

/// Pulls a file name out of a fence info string like `dart:main.dart`.
fn fence_suffix_name(fence_line: &str) -> Option<String> {
    let rest = fence_line.trim_start_matches('`');
    let (_, name) = rest.split_once(':')?;
    let name = clean_name(name);
    if name.is_empty() { None } else { Some(name) }
}

/// Normalizes a marker-announced name: models wrap names in backticks,
/// quotes, or emphasis often enough that stripping them here is cheaper
/// than failing the run.
fn clean_name(raw: &str) -> String {
    raw.trim().trim_matches(&['`', '"', '\'', '*'][..]).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileset::FileRole;

    const COUNTER_APP: &str = r#"
Here's a simple counter app for you:

FILENAME: main.dart
```dart
import 'package:flutter/material.dart';

void main() => runApp(const CounterApp());
```

FILENAME: pubspec.yaml
```yaml
name: counter_app
environment:
  sdk: '>=2.19.0 <4.0.0'
```

Let me know if you'd like any changes!
"#;

    #[test]
    fn test_extract_marker_labelled_blocks() {
        let extraction = extract(COUNTER_APP).unwrap();
        assert!(extraction.files.main_source().contains("void main()"));
        assert!(extraction.files.manifest().starts_with("name: counter_app"));
        assert!(extraction.dropped.is_empty());
    }

    #[test]
    fn test_commentary_is_kept_out_of_files() {
        let extraction = extract(COUNTER_APP).unwrap();
        assert!(extraction.commentary.contains("counter app for you"));
        assert!(extraction.commentary.contains("any changes"));
        assert!(!extraction.files.main_source().contains("counter app for you"));
    }

    #[test]
    fn test_fence_suffix_names_block() {
        let raw = "```dart:main.dart\nvoid main() {}\n```\n```yaml:pubspec.yaml\nname: x\n```";
        let extraction = extract(raw).unwrap();
        assert_eq!(extraction.files.main_source(), "void main() {}");
        assert_eq!(extraction.files.manifest(), "name: x");
    }

    #[test]
    fn test_unterminated_fence_closes_at_eof() {
        let raw = "FILENAME: pubspec.yaml\n```yaml\nname: x\n```\nFILENAME: main.dart\n```dart\nvoid main() {}";
        let extraction = extract(raw).unwrap();
        assert_eq!(extraction.files.main_source(), "void main() {}");
    }

    #[test]
    fn test_four_backtick_fence_toggles() {
        let raw = "FILENAME: main.dart\n````dart\nvoid main() {}\n````\nFILENAME: pubspec.yaml\n```\nname: x\n```";
        let extraction = extract(raw).unwrap();
        assert_eq!(extraction.files.main_source(), "void main() {}");
    }

    #[test]
    fn test_indented_fence_toggles() {
        let raw = "FILENAME: main.dart\n  ```dart\nvoid main() {}\n  ```\nFILENAME: pubspec.yaml\n```\nname: x\n```";
        let extraction = extract(raw).unwrap();
        assert_eq!(extraction.files.main_source(), "void main() {}");
    }

    #[test]
    fn test_pending_name_survives_intervening_prose() {
        let raw = "FILENAME: main.dart\nHere is the entry point:\n```dart\nvoid main() {}\n```\nFILENAME: pubspec.yaml\n```\nname: x\n```";
        let extraction = extract(raw).unwrap();
        assert_eq!(extraction.files.main_source(), "void main() {}");
        assert!(extraction.commentary.contains("Here is the entry point:"));
    }

    #[test]
    fn test_unnamed_block_is_dropped() {
        let raw = "```dart\nvoid main() {}\n```\nFILENAME: main.dart\n```dart\nvoid main() {}\n```\nFILENAME: pubspec.yaml\n```\nname: x\n```";
        let extraction = extract(raw).unwrap();
        assert_eq!(extraction.dropped, vec!["<unnamed block>"]);
    }

    #[test]
    fn test_filename_marker_inside_fence_is_content() {
        let raw = "FILENAME: main.dart\n```dart\n// FILENAME: not_a_marker.dart\nvoid main() {}\n```\nFILENAME: pubspec.yaml\n```\nname: x\n```";
        let extraction = extract(raw).unwrap();
        assert!(extraction.files.main_source().contains("FILENAME: not_a_marker.dart"));
        assert!(extraction.dropped.is_empty());
    }

    #[test]
    fn test_asset_block_recovered() {
        let raw = "FILENAME: main.dart\n```dart\nvoid main() {}\n```\nFILENAME: pubspec.yaml\n```\nname: x\n```\nFILENAME: assets/logo.svg\n```\n<svg width=\"1\"/>\n```";
        let extraction = extract(raw).unwrap();
        assert!(extraction.files.has_asset("assets/logo.svg"));
        let (_, content) = extraction.files.assets().next().unwrap();
        assert_eq!(content, "<svg width=\"1\"/>");
    }

    #[test]
    fn test_unrelated_filename_is_dropped_not_written() {
        let raw = "FILENAME: main.dart\n```dart\nvoid main() {}\n```\nFILENAME: pubspec.yaml\n```\nname: x\n```\nFILENAME: helper.dart\n```dart\nclass Helper {}\n```";
        let extraction = extract(raw).unwrap();
        assert_eq!(extraction.dropped, vec!["helper.dart"]);
        assert_eq!(extraction.files.assets().count(), 0);
    }

    #[test]
    fn test_traversal_asset_path_is_dropped() {
        let raw = "FILENAME: main.dart\n```dart\nvoid main() {}\n```\nFILENAME: pubspec.yaml\n```\nname: x\n```\nFILENAME: assets/../../etc/passwd\n```\nroot\n```";
        let extraction = extract(raw).unwrap();
        assert_eq!(extraction.dropped, vec!["assets/../../etc/passwd"]);
    }

    #[test]
    fn test_backticked_marker_name_is_cleaned() {
        let raw = "FILENAME: `main.dart`\n```dart\nvoid main() {}\n```\nFILENAME: pubspec.yaml\n```\nname: x\n```";
        let extraction = extract(raw).unwrap();
        assert_eq!(extraction.files.main_source(), "void main() {}");
    }

    #[test]
    fn test_last_block_wins_for_duplicate_names() {
        let raw = "FILENAME: main.dart\n```dart\nvoid main() { old(); }\n```\nFILENAME: main.dart\n```dart\nvoid main() { fresh(); }\n```\nFILENAME: pubspec.yaml\n```\nname: x\n```";
        let extraction = extract(raw).unwrap();
        assert!(extraction.files.main_source().contains("fresh()"));
    }

    #[test]
    fn test_missing_main_source_is_error() {
        let raw = "FILENAME: pubspec.yaml\n```yaml\nname: x\n```";
        let err = extract(raw).unwrap_err();
        assert_eq!(err.missing(), &[FileRole::MainSource]);
    }

    #[test]
    fn test_missing_manifest_keeps_recovered_main() {
        let raw = "FILENAME: main.dart\n```dart\nvoid main() {}\n```";
        let err = extract(raw).unwrap_err();
        assert!(err.missing_only_manifest());
        assert!(err.into_recovered().has_main_source());
    }

    #[test]
    fn test_plain_prose_yields_nothing() {
        let err = extract("I can't produce an app for that request.").unwrap_err();
        assert_eq!(err.missing(), &[FileRole::MainSource, FileRole::Manifest]);
        assert!(!err.into_recovered().has_main_source());
    }
}
