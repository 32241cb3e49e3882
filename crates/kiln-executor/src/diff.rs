//! Line-based diff rendering for confirmation prompts

use std::path::Path;

/// Above this many line pairs the LCS table is skipped and the whole file is
/// shown as replaced.
const MAX_LCS_CELLS: usize = 4_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiffSummary {
    pub added: usize,
    pub removed: usize,
    pub unchanged: usize,
}

impl DiffSummary {
    pub fn has_changes(&self) -> bool {
        self.added > 0 || self.removed > 0
    }
}

impl std::fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} insertion(s)(+), {} deletion(s)(-)",
            self.added, self.removed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Line<'a> {
    Same(&'a str),
    Added(&'a str),
    Removed(&'a str),
}

fn lcs_lines<'a>(old: &[&'a str], new: &[&'a str]) -> Vec<Line<'a>> {
    let (n, m) = (old.len(), new.len());
    if n.saturating_mul(m) > MAX_LCS_CELLS {
        return old
            .iter()
            .map(|l| Line::Removed(*l))
            .chain(new.iter().map(|l| Line::Added(*l)))
            .collect();
    }

    // table[i][j] = LCS length of old[i..] and new[j..]
    let mut table = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if old[i] == new[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let mut lines = Vec::with_capacity(n.max(m));
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            lines.push(Line::Same(old[i]));
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            lines.push(Line::Removed(old[i]));
            i += 1;
        } else {
            lines.push(Line::Added(new[j]));
            j += 1;
        }
    }
    lines.extend(old[i..].iter().map(|l| Line::Removed(*l)));
    lines.extend(new[j..].iter().map(|l| Line::Added(*l)));
    lines
}

/// Render a diff of `old` -> `new` with `+`/`-`/` ` markers and a summary
/// line.
pub fn render_diff(path: &Path, old: &str, new: &str) -> (String, DiffSummary) {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    let lines = lcs_lines(&old_lines, &new_lines);

    let mut summary = DiffSummary::default();
    let mut out = format!("--- {0}\n+++ {0}\n", path.display());
    for line in &lines {
        match line {
            Line::Same(text) => {
                summary.unchanged += 1;
                out.push_str(&format!("  {}\n", text));
            }
            Line::Added(text) => {
                summary.added += 1;
                out.push_str(&format!("+ {}\n", text));
            }
            Line::Removed(text) => {
                summary.removed += 1;
                out.push_str(&format!("- {}\n", text));
            }
        }
    }
    out.push_str(&summary.to_string());
    out.push('\n');
    (out, summary)
}
