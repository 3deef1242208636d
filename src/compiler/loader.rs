//! Reads script files, runs the preprocessor on each one and splices
//! `include` lines into a single flattened line stream.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use super::error::{CompileError, Diagnostic};
use super::line_numbers::LineNumberTable;
use super::preprocessor::preprocess;

pub const SCRIPT_EXTENSION: &str = "lemon";
pub const MAX_INCLUDE_DEPTH: usize = 50;

/// Flattened source of one script plus the table mapping its lines back to
/// the files they came from.
#[derive(Debug, Default)]
pub struct LoadedSource {
    pub lines: Vec<String>,
    pub line_numbers: LineNumberTable,
}

/// Load a script file and everything it includes.
pub fn load_script(path: &Path, definitions: &BTreeMap<String, i64>) -> Result<LoadedSource, Diagnostic> {
    let filename = path.display().to_string();
    let text = fs::read_to_string(path)
        .map_err(|e| CompileError::io(format!("Cannot read script: {e}"), 0).in_file(&filename))?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    load_source(&filename, &text, dir, definitions)
}

/// Load in-memory source named `filename`; includes resolve against `dir`.
pub fn load_source(
    filename: &str,
    text: &str,
    dir: &Path,
    definitions: &BTreeMap<String, i64>,
) -> Result<LoadedSource, Diagnostic> {
    let mut loader = Loader {
        definitions,
        out: LoadedSource::default(),
    };
    loader.expand(filename, text, dir, 0)?;
    Ok(loader.out)
}

struct Loader<'a> {
    definitions: &'a BTreeMap<String, i64>,
    out: LoadedSource,
}

impl Loader<'_> {
    fn flattened_len(&self) -> u32 {
        u32::try_from(self.out.lines.len()).unwrap_or(u32::MAX)
    }

    fn expand(&mut self, filename: &str, text: &str, dir: &Path, depth: usize) -> Result<(), Diagnostic> {
        debug!("Preprocessing '{filename}' (include depth {depth})");
        let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
        preprocess(&mut lines, self.definitions).map_err(|e| e.in_file(filename))?;

        let start = self.flattened_len();
        self.out.line_numbers.push(start, filename, 0);

        for (index, line) in lines.into_iter().enumerate() {
            let Some(target) = include_target(&line) else {
                self.out.lines.push(line);
                continue;
            };
            let line_number = u32::try_from(index + 1).unwrap_or(u32::MAX);
            if depth >= MAX_INCLUDE_DEPTH {
                return Err(CompileError::structural(
                    format!("Includes nested deeper than {MAX_INCLUDE_DEPTH} levels (cyclic include?)"),
                    line_number,
                )
                .in_file(filename));
            }

            for path in resolve_include(dir, target, line_number).map_err(|e| e.in_file(filename))? {
                let included = path.display().to_string();
                let text = read_include(&path, line_number).map_err(|e| e.in_file(filename))?;
                let included_dir = path.parent().unwrap_or(dir).to_path_buf();
                self.expand(&included, &text, &included_dir, depth + 1)?;
            }
            // Continue with the line after the include.
            let resume = self.flattened_len();
            self.out.line_numbers.push(resume, filename, line_number);
        }
        Ok(())
    }
}

/// Path text of an `include <path>` line.
fn include_target(line: &str) -> Option<&str> {
    let rest = line.trim().strip_prefix("include")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let target = rest.trim();
    (!target.is_empty()).then_some(target)
}

fn read_include(path: &Path, line_number: u32) -> Result<String, CompileError> {
    fs::read_to_string(path)
        .map_err(|e| CompileError::io(format!("Cannot include '{}': {e}", path.display()), line_number))
}

/// Files named by an include target. `dir/?` expands to every script file in
/// that directory, ordered by file name.
fn resolve_include(dir: &Path, target: &str, line_number: u32) -> Result<Vec<PathBuf>, CompileError> {
    let Some(directory) = target.strip_suffix('?') else {
        return Ok(vec![dir.join(format!("{target}.{SCRIPT_EXTENSION}"))]);
    };
    let directory = dir.join(directory.trim_end_matches(['/', '\\']));
    let entries = fs::read_dir(&directory)
        .map_err(|e| CompileError::io(format!("Cannot list '{}': {e}", directory.display()), line_number))?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == SCRIPT_EXTENSION))
        .collect();
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}
