//! The collector contract: something that yields scraped pages.
//!
//! Browser automation lives outside this repository. Anything that can turn a
//! ward's site into pages of [`ScrapedRow`]s plugs in through [`Collector`];
//! [`TsvCollector`] replays rows a scraper dumped to disk.

use std::io::BufRead;

use thiserror::Error;
use uuid::Uuid;

use crate::codec::{self, CodecError};
use crate::date::parse_year_header;
use crate::model::ScrapedRow;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

/// One scraped table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    /// Division pass this page belongs to, for wards scraped once per division.
    pub partition: Option<String>,
    pub rows: Vec<ScrapedRow>,
}

pub trait Collector {
    /// The next page, or `None` once the site is exhausted.
    fn next_page(&mut self) -> Result<Option<Page>, CollectError>;
}

impl Collector for std::vec::IntoIter<Page> {
    fn next_page(&mut self) -> Result<Option<Page>, CollectError> {
        Ok(self.next())
    }
}

// ── TSV replay ──

const REQUIRED: [&str; 6] = [
    "building",
    "institution",
    "date",
    "day_of_week",
    "division",
    "status",
];

#[derive(Debug, Clone, Copy)]
struct Layout {
    fields: [usize; 6],
    institution_id: Option<usize>,
    partition: Option<usize>,
    width: usize,
}

/// Reads scraped rows from a tab-delimited file with a header line.
///
/// Required columns: `building institution date day_of_week division status`;
/// optional: `institution_id`, `partition`. Consecutive rows sharing
/// `(partition, building, institution)` form one page. Lines starting with
/// `#` before the header are comments; the first one naming a year
/// (`# 2023年 4月`) sets [`year_hint`](Self::year_hint). After the header
/// every non-blank line is data.
pub struct TsvCollector<R> {
    lines: std::io::Lines<R>,
    line_no: usize,
    year_hint: Option<i32>,
    layout: Option<Layout>,
    pending: Option<(Option<String>, ScrapedRow)>,
}

impl<R: BufRead> TsvCollector<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
            year_hint: None,
            layout: None,
            pending: None,
        }
    }

    fn malformed(&self, reason: impl Into<String>) -> CollectError {
        CollectError::Malformed {
            line: self.line_no,
            reason: reason.into(),
        }
    }

    fn next_fields(&mut self) -> Result<Option<Vec<String>>, CollectError> {
        loop {
            let Some(line) = self.lines.next().transpose()? else {
                return Ok(None);
            };
            self.line_no += 1;
            if self.layout.is_none()
                && let Some(comment) = line.strip_prefix('#')
            {
                if self.year_hint.is_none() {
                    self.year_hint = parse_year_header(comment);
                }
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }
            return codec::split_row(&line)
                .map(Some)
                .map_err(|e: CodecError| self.malformed(e.to_string()));
        }
    }

    /// Year named by a comment before the header, if any.
    pub fn year_hint(&mut self) -> Result<Option<i32>, CollectError> {
        self.layout()?;
        Ok(self.year_hint)
    }

    fn layout(&mut self) -> Result<Option<Layout>, CollectError> {
        if self.layout.is_none() {
            self.layout = self.read_header()?;
        }
        Ok(self.layout)
    }

    fn read_header(&mut self) -> Result<Option<Layout>, CollectError> {
        let Some(header) = self.next_fields()? else {
            return Ok(None);
        };
        let position = |name: &str| header.iter().position(|h| h == name);
        let mut fields = [0; 6];
        for (slot, name) in fields.iter_mut().zip(REQUIRED) {
            *slot = position(name)
                .ok_or_else(|| self.malformed(format!("header lacks column `{name}`")))?;
        }
        Ok(Some(Layout {
            fields,
            institution_id: position("institution_id"),
            partition: position("partition"),
            width: header.len(),
        }))
    }

    fn next_row(&mut self, layout: Layout) -> Result<Option<(Option<String>, ScrapedRow)>, CollectError> {
        let Some(mut fields) = self.next_fields()? else {
            return Ok(None);
        };
        if fields.len() != layout.width {
            return Err(self.malformed(format!(
                "expected {} fields, found {}",
                layout.width,
                fields.len()
            )));
        }

        let institution_id = match layout.institution_id.map(|i| fields[i].trim()) {
            None | Some("") => None,
            Some(text) => Some(
                Uuid::parse_str(text)
                    .map_err(|e| self.malformed(format!("institution_id: {e}")))?,
            ),
        };
        let partition = layout
            .partition
            .map(|i| std::mem::take(&mut fields[i]))
            .filter(|p| !p.is_empty());

        let [building, institution, date, day_of_week, division, status] =
            layout.fields.map(|i| std::mem::take(&mut fields[i]));
        Ok(Some((
            partition,
            ScrapedRow {
                building,
                institution,
                date,
                day_of_week,
                division,
                status,
                institution_id,
            },
        )))
    }
}

impl<R: BufRead> Collector for TsvCollector<R> {
    fn next_page(&mut self) -> Result<Option<Page>, CollectError> {
        let Some(layout) = self.layout()? else {
            return Ok(None);
        };

        let first = match self.pending.take() {
            Some(row) => row,
            None => match self.next_row(layout)? {
                Some(row) => row,
                None => return Ok(None),
            },
        };

        let (partition, first_row) = first;
        let mut rows = vec![first_row];
        while let Some((next_partition, row)) = self.next_row(layout)? {
            if next_partition != partition
                || row.building != rows[0].building
                || row.institution != rows[0].institution
            {
                self.pending = Some((next_partition, row));
                break;
            }
            rows.push(row);
        }
        Ok(Some(Page { partition, rows }))
    }
}
