//! File-name patterns.
//!
//! Input patterns rename staged files:
//! - no pattern or `*` keeps each file's own name
//! - `a.txt b.txt` assigns the declared names to the files in order
//! - `*` becomes the 1-based file index (dropped when there is one file)
//! - a run of `?` becomes the index zero-padded to the run length
//! - a plain name given several files behaves as if it ended in `*`
//!
//! Output patterns select produced files with [`glob_match`].

use crate::item::FileHolder;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("pattern '{pattern}' declares {declared} names but {actual} files were given")]
pub struct PatternError {
  pub pattern: String,
  pub declared: usize,
  pub actual: usize,
}

/// Expand `pattern` against `files`, returning the files with their stage
/// names set.
pub fn expand_file_names(
  pattern: Option<&str>,
  files: Vec<FileHolder>,
) -> Result<Vec<FileHolder>, PatternError> {
  let pattern = match pattern.map(str::trim) {
    None | Some("") | Some("*") => return Ok(files),
    Some(p) => p,
  };
  if files.is_empty() {
    return Ok(files);
  }

  let names: Vec<&str> = pattern.split_whitespace().collect();
  if names.len() > 1 {
    if names.len() != files.len() {
      return Err(PatternError {
        pattern: pattern.to_string(),
        declared: names.len(),
        actual: files.len(),
      });
    }
    return Ok(
      files
        .iter()
        .zip(names)
        .map(|(f, name)| f.with_name(name))
        .collect(),
    );
  }

  let mut pattern = pattern.to_string();
  if !pattern.contains('*') && !pattern.contains('?') && files.len() > 1 {
    pattern.push('*');
  }

  let size = files.len();
  Ok(
    files
      .iter()
      .enumerate()
      .map(|(i, f)| f.with_name(expand_one(&pattern, &f.stage_name, i + 1, size)))
      .collect(),
  )
}

fn expand_one(pattern: &str, stage_name: &str, index: usize, size: usize) -> String {
  let (parent, name) = match pattern.rfind('/') {
    Some(p) => (Some(&pattern[..p]), &pattern[p + 1..]),
    None => (None, pattern),
  };

  let name = if name.is_empty() || name == "*" {
    stage_name.to_string()
  } else {
    replace_question_marks(&replace_stars(name, index, size <= 1), index)
  };

  match parent {
    Some(parent) => format!(
      "{}/{}",
      replace_question_marks(&replace_stars(parent, index, false), index),
      name
    ),
    None => name,
  }
}

fn replace_stars(text: &str, index: usize, strip: bool) -> String {
  let mut out = String::with_capacity(text.len());
  let mut in_run = false;
  for c in text.chars() {
    if c == '*' {
      if !in_run && !strip {
        out.push_str(&index.to_string());
      }
      in_run = true;
    } else {
      in_run = false;
      out.push(c);
    }
  }
  out
}

fn replace_question_marks(text: &str, index: usize) -> String {
  let mut out = String::with_capacity(text.len());
  let mut run = 0;
  for c in text.chars() {
    if c == '?' {
      run += 1;
      continue;
    }
    if run > 0 {
      out.push_str(&format!("{:0width$}", index, width = run));
      run = 0;
    }
    out.push(c);
  }
  if run > 0 {
    out.push_str(&format!("{:0width$}", index, width = run));
  }
  out
}

/// Match a file name against a glob pattern.
///
/// - `*` matches zero or more characters
/// - `?` matches exactly one character
pub fn glob_match(pattern: &str, input: &str) -> bool {
  let pat: Vec<char> = pattern.chars().collect();
  let text: Vec<char> = input.chars().collect();
  match_from(&pat, 0, &text, 0)
}

fn match_from(pat: &[char], mut p: usize, text: &[char], mut t: usize) -> bool {
  while p < pat.len() {
    match pat[p] {
      '*' => {
        // Collapse consecutive stars, then try every split point.
        while p < pat.len() && pat[p] == '*' {
          p += 1;
        }
        if p == pat.len() {
          return true;
        }
        return (t..=text.len()).any(|start| match_from(pat, p, text, start));
      }
      '?' => {
        if t >= text.len() {
          return false;
        }
      }
      c => {
        if t >= text.len() || text[t] != c {
          return false;
        }
      }
    }
    p += 1;
    t += 1;
  }
  t == text.len()
}
