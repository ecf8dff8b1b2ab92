//! Filter/ordering builder for catalog queries.

use crate::types::FileKind;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use std::path::Path;

/// Rows fetched per page by streaming cursors.
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Sortable catalog columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Timetag,
    FileName,
    FileRoot,
    /// `file_root` compared with ASCII case folded
    FileRootFolded,
    AbsoluteVersion,
    DirectoryPath,
    /// `directory_path` with a trailing `/`: a directory sorts right before
    /// its subdirectories, which is depth-first walk order
    DirectoryTree,
    ModDate,
}

impl SortKey {
    /// Column the key reads.
    fn column(&self) -> &'static str {
        match self {
            Self::Timetag => "timetag",
            Self::FileName => "file_name",
            Self::FileRoot | Self::FileRootFolded => "file_root",
            Self::AbsoluteVersion => "absolute_version",
            Self::DirectoryPath | Self::DirectoryTree => "directory_path",
            Self::ModDate => "mod_date",
        }
    }

    /// The value compared in ORDER BY and seek predicates, applied to
    /// `operand` (the column, or a bound column value).
    fn expr(&self, operand: &str) -> String {
        match self {
            Self::FileRootFolded => format!("{} COLLATE NOCASE", operand),
            Self::DirectoryTree => format!("{} || '/'", operand),
            _ => operand.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub key: SortKey,
    pub descending: bool,
}

/// Catalog query: filters, ordering, limit and page size.
///
/// Empty set filters match everything. Set filters are ANDed together;
/// the values inside one set are ORed. `latest` keeps only the row with the
/// greatest `absolute_version` per family (`file_root`, `file_extension`),
/// breaking ties by `timetag`; version 0 and unversioned rows never qualify.
#[derive(Debug, Clone)]
pub struct FileQuery {
    pub kinds: Vec<FileKind>,
    pub instruments: Vec<String>,
    pub levels: Vec<String>,
    pub plans: Vec<String>,
    pub descriptors: Vec<String>,
    pub extensions: Vec<String>,
    pub exclude_extensions: Vec<String>,
    pub timetag_from: Option<DateTime<Utc>>,
    pub timetag_to: Option<DateTime<Utc>>,
    pub version: Option<u32>,
    pub revision: Option<u32>,
    /// SQL LIKE patterns (backslash escape) matched against `file_name`, ORed
    pub file_name_like: Vec<String>,
    /// SQL LIKE patterns (backslash escape) matched against `descriptor`, ORed
    pub descriptor_like: Vec<String>,
    pub released: Option<bool>,
    /// Family keys: exact `file_root` values
    pub file_roots: Vec<String>,
    /// Inclusive `file_root` range
    pub file_root_range: Option<(String, String)>,
    /// Restrict to rows whose directory is this path or below it
    pub under_directory: Option<String>,
    pub latest: bool,
    pub order: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub batch_size: usize,
}

impl Default for FileQuery {
    fn default() -> Self {
        Self {
            kinds: Vec::new(),
            instruments: Vec::new(),
            levels: Vec::new(),
            plans: Vec::new(),
            descriptors: Vec::new(),
            extensions: Vec::new(),
            exclude_extensions: Vec::new(),
            timetag_from: None,
            timetag_to: None,
            version: None,
            revision: None,
            file_name_like: Vec::new(),
            descriptor_like: Vec::new(),
            released: None,
            file_roots: Vec::new(),
            file_root_range: None,
            under_directory: None,
            latest: false,
            order: Vec::new(),
            limit: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

fn strings<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    values.into_iter().map(Into::into).collect()
}

impl FileQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = FileKind>) -> Self {
        self.kinds.extend(kinds);
        self
    }

    pub fn kind(self, kind: FileKind) -> Self {
        self.kinds([kind])
    }

    pub fn instruments<I: IntoIterator<Item = S>, S: Into<String>>(mut self, values: I) -> Self {
        self.instruments.extend(strings(values));
        self
    }

    pub fn instrument(self, instrument: &str) -> Self {
        self.instruments([instrument])
    }

    pub fn levels<I: IntoIterator<Item = S>, S: Into<String>>(mut self, values: I) -> Self {
        self.levels.extend(strings(values));
        self
    }

    pub fn plans<I: IntoIterator<Item = S>, S: Into<String>>(mut self, values: I) -> Self {
        self.plans.extend(strings(values));
        self
    }

    pub fn descriptors<I: IntoIterator<Item = S>, S: Into<String>>(mut self, values: I) -> Self {
        self.descriptors.extend(strings(values));
        self
    }

    pub fn extensions<I: IntoIterator<Item = S>, S: Into<String>>(mut self, values: I) -> Self {
        self.extensions.extend(strings(values));
        self
    }

    pub fn exclude_extensions<I: IntoIterator<Item = S>, S: Into<String>>(
        mut self,
        values: I,
    ) -> Self {
        self.exclude_extensions.extend(strings(values));
        self
    }

    /// Half-open window `[from, to)` on `timetag`.
    pub fn timetag_between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.timetag_from = Some(from);
        self.timetag_to = Some(to);
        self
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    pub fn revision(mut self, revision: u32) -> Self {
        self.revision = Some(revision);
        self
    }

    pub fn file_name_like(mut self, pattern: impl Into<String>) -> Self {
        self.file_name_like.push(pattern.into());
        self
    }

    pub fn descriptor_like(mut self, pattern: impl Into<String>) -> Self {
        self.descriptor_like.push(pattern.into());
        self
    }

    pub fn released(mut self, released: bool) -> Self {
        self.released = Some(released);
        self
    }

    pub fn file_root_between(mut self, low: impl Into<String>, high: impl Into<String>) -> Self {
        self.file_root_range = Some((low.into(), high.into()));
        self
    }

    pub fn file_roots<I: IntoIterator<Item = S>, S: Into<String>>(mut self, values: I) -> Self {
        self.file_roots.extend(strings(values));
        self
    }

    pub fn file_root(self, root: &str) -> Self {
        self.file_roots([root])
    }

    pub fn under_directory(mut self, dir: &Path) -> Self {
        let dir = dir.to_string_lossy();
        let trimmed = dir.trim_end_matches('/');
        self.under_directory = Some(if trimmed.is_empty() {
            "/".to_string()
        } else {
            trimmed.to_string()
        });
        self
    }

    pub fn latest(mut self) -> Self {
        self.latest = true;
        self
    }

    pub fn order_by(mut self, key: SortKey) -> Self {
        self.order.push(OrderBy {
            key,
            descending: false,
        });
        self
    }

    pub fn order_by_desc(mut self, key: SortKey) -> Self {
        self.order.push(OrderBy {
            key,
            descending: true,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Page size of the streaming cursor.
    pub fn yield_per(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Full SELECT statement with its ORDER BY, without paging.
    pub(crate) fn to_sql(&self) -> (String, Vec<Value>) {
        let plan = self.to_plan();
        (plan.sql(), plan.params)
    }

    /// Split statement used by keyset paging.
    pub(crate) fn to_plan(&self) -> SelectPlan {
        let (where_clause, params) = self.where_clause();

        let mut order: Vec<OrderTerm> = self
            .order
            .iter()
            .map(|o| OrderTerm {
                column: o.key.column(),
                expr: o.key.expr(o.key.column()),
                bound: o.key.expr("?"),
                descending: o.descending,
            })
            .collect();
        order.push(OrderTerm {
            column: "id",
            expr: "id".to_string(),
            bound: "?".to_string(),
            descending: false,
        });

        let (select, filtered) = if self.latest {
            (
                format!(
                    "SELECT * FROM (\
                     SELECT *, ROW_NUMBER() OVER (\
                     PARTITION BY file_root, file_extension \
                     ORDER BY absolute_version DESC, timetag DESC, id DESC) AS family_rank \
                     FROM file_metadata{}) WHERE family_rank = 1",
                    where_clause
                ),
                true,
            )
        } else {
            (
                format!("SELECT * FROM file_metadata{}", where_clause),
                !where_clause.is_empty(),
            )
        };
        SelectPlan {
            select,
            filtered,
            params,
            order,
        }
    }

    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<Value> = Vec::new();

        let kinds: Vec<String> = self.kinds.iter().map(|k| k.as_str().to_string()).collect();
        push_in(&mut clauses, &mut params, "kind", &kinds, false);
        push_in(&mut clauses, &mut params, "instrument", &self.instruments, false);
        push_in(&mut clauses, &mut params, "level", &self.levels, false);
        push_in(&mut clauses, &mut params, "plan", &self.plans, false);
        push_in(&mut clauses, &mut params, "descriptor", &self.descriptors, false);
        push_in(&mut clauses, &mut params, "file_root", &self.file_roots, false);
        push_in(&mut clauses, &mut params, "file_extension", &self.extensions, false);
        push_in(
            &mut clauses,
            &mut params,
            "file_extension",
            &self.exclude_extensions,
            true,
        );

        if let Some(from) = self.timetag_from {
            clauses.push("timetag >= ?".to_string());
            params.push(Value::Integer(from.timestamp_millis()));
        }
        if let Some(to) = self.timetag_to {
            clauses.push("timetag < ?".to_string());
            params.push(Value::Integer(to.timestamp_millis()));
        }
        if let Some(version) = self.version {
            clauses.push("version = ?".to_string());
            params.push(Value::Integer(i64::from(version)));
        }
        if let Some(revision) = self.revision {
            clauses.push("revision = ?".to_string());
            params.push(Value::Integer(i64::from(revision)));
        }
        push_like(&mut clauses, &mut params, "file_name", &self.file_name_like);
        push_like(&mut clauses, &mut params, "descriptor", &self.descriptor_like);
        if let Some(released) = self.released {
            clauses.push("released = ?".to_string());
            params.push(Value::Integer(i64::from(released)));
        }
        if let Some((low, high)) = &self.file_root_range {
            clauses.push("file_root BETWEEN ? AND ?".to_string());
            params.push(Value::Text(low.clone()));
            params.push(Value::Text(high.clone()));
        }
        if let Some(dir) = &self.under_directory {
            if dir == "/" {
                clauses.push("substr(directory_path, 1, 1) = '/'".to_string());
            } else {
                let prefix = format!("{}/", dir);
                clauses.push("(directory_path = ? OR substr(directory_path, 1, ?) = ?)".to_string());
                params.push(Value::Text(dir.clone()));
                params.push(Value::Integer(prefix.chars().count() as i64));
                params.push(Value::Text(prefix));
            }
        }
        if self.latest {
            clauses.push("version IS NOT NULL AND version > 0".to_string());
        }

        if clauses.is_empty() {
            (String::new(), params)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), params)
        }
    }
}

/// One ORDER BY term of a [`SelectPlan`].
#[derive(Debug, Clone)]
pub(crate) struct OrderTerm {
    /// Column read back from each row to position the next page
    pub column: &'static str,
    pub expr: String,
    /// `expr` applied to a bound value of `column`
    pub bound: String,
    pub descending: bool,
}

/// A SELECT split into its filtered source and its total ordering.
///
/// The ordering always ends with `id ASC`, so the values of the order
/// columns on the last row read identify a unique position. Pages resume
/// strictly after that position, which keeps rows inserted or deleted
/// behind the reader from shifting the rows still ahead of it.
#[derive(Debug, Clone)]
pub(crate) struct SelectPlan {
    select: String,
    /// `select` already carries a WHERE clause
    filtered: bool,
    pub params: Vec<Value>,
    pub order: Vec<OrderTerm>,
}

impl SelectPlan {
    fn order_clause(&self) -> String {
        self.order
            .iter()
            .map(|t| format!("{} {}", t.expr, if t.descending { "DESC" } else { "ASC" }))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn sql(&self) -> String {
        format!("{} ORDER BY {}", self.select, self.order_clause())
    }

    /// Statement for one page of at most `?` rows (the last parameter,
    /// appended by the caller) positioned after `after`, the order column
    /// values of the previous page's last row.
    pub fn page_sql(&self, after: Option<&[Value]>) -> (String, Vec<Value>) {
        let mut params = self.params.clone();
        let Some(after) = after else {
            return (format!("{} LIMIT ?", self.sql()), params);
        };

        // Lexicographic "greater than" over the order terms. SQLite sorts
        // NULL first ascending and last descending.
        let mut terms: Vec<String> = Vec::new();
        for (i, (term, value)) in self.order.iter().zip(after).enumerate() {
            let beyond = match (term.descending, value) {
                (false, Value::Null) => format!("{} IS NOT NULL", term.expr),
                (false, _) => format!("{} > {}", term.expr, term.bound),
                (true, Value::Null) => continue,
                (true, _) => format!("({expr} < {} OR {expr} IS NULL)", term.bound, expr = term.expr),
            };
            let mut parts: Vec<String> = self.order[..i]
                .iter()
                .map(|t| format!("{} IS {}", t.expr, t.bound))
                .collect();
            params.extend(after[..i].iter().cloned());
            parts.push(beyond);
            if !matches!(value, Value::Null) {
                params.push(value.clone());
            }
            terms.push(format!("({})", parts.join(" AND ")));
        }
        let seek = if terms.is_empty() {
            "0".to_string()
        } else {
            terms.join(" OR ")
        };
        let joiner = if self.filtered { "AND" } else { "WHERE" };
        (
            format!(
                "{} {} ({}) ORDER BY {} LIMIT ?",
                self.select,
                joiner,
                seek,
                self.order_clause()
            ),
            params,
        )
    }
}

fn push_in(
    clauses: &mut Vec<String>,
    params: &mut Vec<Value>,
    column: &str,
    values: &[String],
    negate: bool,
) {
    if values.is_empty() {
        return;
    }
    let placeholders = vec!["?"; values.len()].join(", ");
    if negate {
        // NULL columns are kept by NOT IN filters
        clauses.push(format!(
            "({column} IS NULL OR {column} NOT IN ({placeholders}))"
        ));
    } else {
        clauses.push(format!("{column} IN ({placeholders})"));
    }
    params.extend(values.iter().cloned().map(Value::Text));
}

fn push_like(clauses: &mut Vec<String>, params: &mut Vec<Value>, column: &str, patterns: &[String]) {
    if patterns.is_empty() {
        return;
    }
    let terms = patterns
        .iter()
        .map(|_| format!("{column} LIKE ? ESCAPE '\\'"))
        .collect::<Vec<_>>()
        .join(" OR ");
    clauses.push(format!("({terms})"));
    params.extend(patterns.iter().cloned().map(Value::Text));
}

/// Convert a glob pattern to SQL LIKE pattern.
///
/// # Examples
/// - `*.cdf` → `%.cdf`
/// - `mvn_swe_*` → `mvn\_swe\_%`
/// - `report_?.csv` → `report\__.csv` (single char)
pub fn glob_to_like_pattern(glob: &str) -> String {
    let mut result = String::with_capacity(glob.len() + 4);

    let glob = glob.replace("**/", "");
    let glob = glob.replace("**", "*");

    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => result.push('%'),
            '?' => result.push('_'),
            '_' | '%' => {
                result.push('\\');
                result.push(c);
            }
            '\\' => {
                if let Some(next) = chars.next() {
                    if next == '_' || next == '%' {
                        result.push('\\');
                    }
                    result.push(next);
                }
            }
            _ => result.push(c),
        }
    }

    result
}
