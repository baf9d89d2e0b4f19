//! Live dataset statistics.
//!
//! Loads a CSV export into memory, applies `column=value` filters (the
//! dashboard's slicers), and summarizes the filtered slice as
//! [`StatSnippet`]s for the context assembler:
//!
//! ```text
//! - Rows: 1,204
//! - Filters: Region = North
//! - Sales: Total=48,250, Average=402
//! - Top Product: Widget
//! ```
//!
//! A column is numeric when every non-empty cell in the slice parses as a
//! number (thousands separators allowed). Non-numeric columns report their
//! most frequent value; ties go to the value seen first.

use ainsights_core::assemble::StatSnippet;
use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use crate::progress::{format_number, group_thousands};

/// An equality filter on one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

impl FromStr for Filter {
    type Err = String;

    /// Parse `column=value`.
    fn from_str(s: &str) -> std::result::Result<Self, String> {
        let pos = s
            .find('=')
            .ok_or_else(|| format!("invalid COLUMN=VALUE: no '=' found in '{}'", s))?;
        let column = s[..pos].trim();
        if column.is_empty() {
            return Err(format!("invalid COLUMN=VALUE: empty column in '{}'", s));
        }
        Ok(Filter {
            column: column.to_string(),
            value: s[pos + 1..].trim().to_string(),
        })
    }
}

/// A CSV table held in memory.
#[derive(Debug, Clone)]
pub struct Dataset {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Dataset {
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open dataset: {}", path.display()))?;
        Self::from_reader(file).with_context(|| format!("Failed to read dataset: {}", path.display()))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.to_string()).collect();
        if headers.is_empty() {
            bail!("dataset has no header row");
        }

        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            let mut row: Vec<String> = record.iter().map(|c| c.to_string()).collect();
            row.resize(headers.len(), String::new());
            rows.push(row);
        }
        Ok(Self { headers, rows })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Select the rows matching every filter (exact match, case-sensitive).
    ///
    /// Fails if a filter names a column the dataset does not have.
    pub fn view(&self, filters: &[Filter]) -> Result<DatasetView<'_>> {
        let mut resolved = Vec::with_capacity(filters.len());
        for f in filters {
            let Some(col) = self.headers.iter().position(|h| h == &f.column) else {
                bail!(
                    "unknown column '{}' in filter (columns: {})",
                    f.column,
                    self.headers.join(", ")
                );
            };
            resolved.push((col, f.value.as_str()));
        }

        let rows = self
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| resolved.iter().all(|(col, value)| row[*col] == *value))
            .map(|(i, _)| i)
            .collect();

        Ok(DatasetView {
            dataset: self,
            filters: filters.to_vec(),
            rows,
        })
    }
}

/// A filtered slice of a [`Dataset`].
#[derive(Debug, Clone)]
pub struct DatasetView<'a> {
    dataset: &'a Dataset,
    filters: Vec<Filter>,
    rows: Vec<usize>,
}

impl<'a> DatasetView<'a> {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Summarize the slice. An empty slice yields only the row count
    /// (and the active filters).
    pub fn summarize(&self) -> Vec<StatSnippet> {
        let mut out = vec![StatSnippet::new("Rows", format_number(self.rows.len() as u64))];
        if !self.filters.is_empty() {
            let desc = self
                .filters
                .iter()
                .map(|f| format!("{} = {}", f.column, f.value))
                .collect::<Vec<_>>()
                .join(", ");
            out.push(StatSnippet::new("Filters", desc));
        }
        if self.rows.is_empty() {
            return out;
        }

        for (col, name) in self.dataset.headers.iter().enumerate() {
            let cells: Vec<&str> = self
                .rows
                .iter()
                .map(|&r| self.dataset.rows[r][col].as_str())
                .filter(|c| !c.is_empty())
                .collect();
            if cells.is_empty() {
                continue;
            }

            let numbers: Option<Vec<f64>> = cells.iter().map(|c| parse_number(c)).collect();
            match numbers {
                Some(values) => {
                    let total: f64 = values.iter().sum();
                    let average = total / values.len() as f64;
                    out.push(StatSnippet::new(
                        name.clone(),
                        format!(
                            "Total={}, Average={}",
                            format_whole(total),
                            format_whole(average)
                        ),
                    ));
                }
                None => {
                    if let Some(top) = most_frequent(&cells) {
                        out.push(StatSnippet::new(format!("Top {}", name), top));
                    }
                }
            }
        }
        out
    }
}

fn parse_number(cell: &str) -> Option<f64> {
    let cleaned: String = cell.chars().filter(|c| *c != ',').collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Most frequent value; ties go to the earliest first occurrence.
fn most_frequent(cells: &[&str]) -> Option<String> {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (i, c) in cells.iter().enumerate() {
        counts.entry(*c).or_insert((0, i)).0 += 1;
    }
    counts
        .into_iter()
        .max_by(|(_, (count_a, first_a)), (_, (count_b, first_b))| {
            count_a.cmp(count_b).then(first_b.cmp(first_a))
        })
        .map(|(value, _)| value.to_string())
}

/// Round to a whole number and group thousands: `48250.4` → `"48,250"`.
pub fn format_whole(value: f64) -> String {
    let rounded = value.round();
    let digits = format!("{:.0}", rounded.abs());
    let grouped = group_thousands(&digits);
    if rounded < 0.0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

/// Print the summary for `ainsights stats`.
pub fn run_stats(dataset_path: &Path, filters: &[Filter]) -> Result<()> {
    let dataset = Dataset::from_path(dataset_path)?;
    let view = dataset.view(filters)?;

    println!("Live data statistics: {}", dataset_path.display());
    println!();
    for snippet in view.summarize() {
        println!("  {}: {}", snippet.label, snippet.text);
    }
    println!();
    Ok(())
}
