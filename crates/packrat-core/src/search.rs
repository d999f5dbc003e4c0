//! Indexed file search.
//!
//! Filters assemble into a single SQL statement over `package_file` joined
//! with `package`. Results come back as the read-only [`FileHit`] projection,
//! never as the mutable store records.

use crate::config::type_group;
use crate::error::{PackratError, Result};
use crate::store::{PackageOrigin, PreviewState, Store};
use rusqlite::types::Value;
use rusqlite::{Row, ToSql};

/// Direction of a numeric filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    AtLeast,
    AtMost,
}

/// A numeric constraint, e.g. "width at least 512".
#[derive(Debug, Clone, Copy)]
pub struct NumericFilter {
    pub value: i64,
    pub bound: Bound,
}

impl NumericFilter {
    pub fn at_least(value: i64) -> Self {
        Self {
            value,
            bound: Bound::AtLeast,
        }
    }

    pub fn at_most(value: i64) -> Self {
        Self {
            value,
            bound: Bound::AtMost,
        }
    }

    fn operator(&self) -> &'static str {
        match self.bound {
            Bound::AtLeast => ">=",
            Bound::AtMost => "<=",
        }
    }
}

/// Result column to order by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    Name,
    Path,
    Size,
    Type,
    Width,
    Height,
    Duration,
    PackageName,
}

impl SortField {
    /// Column expression plus whether it needs case-insensitive collation.
    fn column(&self) -> (&'static str, bool) {
        match self {
            SortField::Name => ("f.file_name", true),
            SortField::Path => ("f.path", true),
            SortField::Size => ("f.size_bytes", false),
            SortField::Type => ("f.file_type", true),
            SortField::Width => ("f.width", false),
            SortField::Height => ("f.height", false),
            SortField::Duration => ("f.duration_seconds", false),
            SortField::PackageName => ("p.safe_name", true),
        }
    }
}

/// All search criteria. Every field is optional; an empty filter matches
/// every non-excluded file.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Substring match against the stored path, so directory fragments
    /// match too. `_` and `%` are literal.
    pub query: Option<String>,
    /// Exact file type (lower-cased extension) or a group name from the
    /// type-group table, which expands to an IN list.
    pub file_type: Option<String>,
    /// Substring match against the owning package's names.
    pub package_name: Option<String>,
    /// Restrict to one package by id.
    pub package_id: Option<i64>,
    /// Substring match against the publisher.
    pub publisher: Option<String>,
    /// Substring match against the category.
    pub category: Option<String>,
    /// Only files of packages carrying this tag (case-insensitive).
    pub tag: Option<String>,
    /// Only files that have a generated preview.
    pub with_preview_only: bool,
    pub width: Option<NumericFilter>,
    pub height: Option<NumericFilter>,
    /// Whole seconds.
    pub duration: Option<NumericFilter>,
    pub size_bytes: Option<NumericFilter>,
    /// Extensions removed from every result set.
    pub excluded_extensions: Vec<String>,
    pub sort: SortField,
    pub descending: bool,
    /// Results per page; 0 returns everything.
    pub page_size: usize,
    /// 1-based page number.
    pub page: usize,
}

/// Read-only search result row: the file plus denormalized package fields.
#[derive(Debug, Clone)]
pub struct FileHit {
    pub id: i64,
    pub package_id: i64,
    pub path: String,
    pub source_path: String,
    pub file_name: String,
    pub file_type: String,
    pub size_bytes: i64,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub duration_seconds: Option<f64>,
    pub preview_file: Option<String>,
    pub preview_state: PreviewState,
    pub package_safe_name: String,
    pub package_display_name: Option<String>,
    pub package_publisher: Option<String>,
    pub package_category: Option<String>,
    pub package_location: Option<String>,
    pub package_origin: PackageOrigin,
}

impl FileHit {
    pub fn package_name(&self) -> &str {
        self.package_display_name
            .as_deref()
            .unwrap_or(&self.package_safe_name)
    }
}

/// One page of results together with the unpaged total.
#[derive(Debug, Clone)]
pub struct SearchPage {
    pub hits: Vec<FileHit>,
    pub total: i64,
    pub page: usize,
    pub page_size: usize,
}

impl SearchPage {
    pub fn total_pages(&self) -> usize {
        if self.page_size == 0 {
            usize::from(self.total > 0)
        } else {
            (self.total as usize).div_ceil(self.page_size)
        }
    }
}

const HIT_COLS: &str = "f.id, f.package_id, f.path, f.source_path, f.file_name, f.file_type, \
     f.size_bytes, f.width, f.height, f.duration_seconds, f.preview_file, f.preview_state, \
     p.safe_name, p.display_name, p.display_publisher, p.display_category, p.location, p.origin";

/// Escape LIKE wildcards so user input matches literally.
fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn row_to_hit(row: &Row) -> rusqlite::Result<FileHit> {
    Ok(FileHit {
        id: row.get(0)?,
        package_id: row.get(1)?,
        path: row.get(2)?,
        source_path: row.get(3)?,
        file_name: row.get(4)?,
        file_type: row.get(5)?,
        size_bytes: row.get(6)?,
        width: row.get(7)?,
        height: row.get(8)?,
        duration_seconds: row.get(9)?,
        preview_file: row.get(10)?,
        preview_state: PreviewState::from_i64(row.get(11)?),
        package_safe_name: row.get(12)?,
        package_display_name: row.get(13)?,
        package_publisher: row.get(14)?,
        package_category: row.get(15)?,
        package_location: row.get(16)?,
        package_origin: PackageOrigin::from_i64(row.get(17)?),
    })
}

/// Build the WHERE clause and its positional arguments.
fn build_conditions(filter: &SearchFilter) -> Result<(Vec<String>, Vec<Value>)> {
    let mut wheres: Vec<String> = Vec::new();
    let mut args: Vec<Value> = Vec::new();

    if let Some(query) = filter.query.as_deref().filter(|q| !q.trim().is_empty()) {
        wheres.push("f.path LIKE ? ESCAPE '\\'".to_string());
        args.push(Value::Text(format!("%{}%", escape_like(query.trim()))));
    }

    if let Some(ftype) = filter.file_type.as_deref().filter(|t| !t.is_empty()) {
        if let Some(exts) = type_group(ftype) {
            let placeholders = vec!["?"; exts.len()].join(", ");
            wheres.push(format!("f.file_type IN ({placeholders})"));
            for ext in exts {
                args.push(Value::Text((*ext).to_string()));
            }
        } else {
            wheres.push("f.file_type = ?".to_string());
            args.push(Value::Text(ftype.to_lowercase()));
        }
    }

    if let Some(id) = filter.package_id {
        wheres.push("f.package_id = ?".to_string());
        args.push(Value::Integer(id));
    }

    if let Some(name) = filter.package_name.as_deref().filter(|n| !n.is_empty()) {
        wheres.push(
            "(p.safe_name LIKE ? ESCAPE '\\' OR p.display_name LIKE ? ESCAPE '\\')".to_string(),
        );
        let pattern = format!("%{}%", escape_like(name));
        args.push(Value::Text(pattern.clone()));
        args.push(Value::Text(pattern));
    }

    if let Some(publisher) = filter.publisher.as_deref().filter(|p| !p.is_empty()) {
        wheres.push("p.display_publisher LIKE ? ESCAPE '\\'".to_string());
        args.push(Value::Text(format!("%{}%", escape_like(publisher))));
    }

    if let Some(category) = filter.category.as_deref().filter(|c| !c.is_empty()) {
        wheres.push("p.display_category LIKE ? ESCAPE '\\'".to_string());
        args.push(Value::Text(format!("%{}%", escape_like(category))));
    }

    if let Some(tag) = filter.tag.as_deref().filter(|t| !t.is_empty()) {
        wheres.push(
            "f.package_id IN (SELECT ta.target_id FROM tag_assignment ta \
             INNER JOIN tag t ON t.id = ta.tag_id \
             WHERE ta.target_kind = 0 AND LOWER(t.name) = LOWER(?))"
                .to_string(),
        );
        args.push(Value::Text(tag.to_string()));
    }

    if filter.with_preview_only {
        wheres.push("f.preview_file IS NOT NULL".to_string());
    }

    for (column, numeric) in [
        ("f.width", filter.width),
        ("f.height", filter.height),
        ("f.duration_seconds", filter.duration),
        ("f.size_bytes", filter.size_bytes),
    ] {
        if let Some(numeric) = numeric {
            if numeric.value < 0 {
                return Err(PackratError::InvalidFilter {
                    message: format!("negative bound for {column}"),
                });
            }
            wheres.push(format!("{column} {} ?", numeric.operator()));
            args.push(Value::Integer(numeric.value));
        }
    }

    if !filter.excluded_extensions.is_empty() {
        let placeholders = vec!["?"; filter.excluded_extensions.len()].join(", ");
        wheres.push(format!("f.file_type NOT IN ({placeholders})"));
        for ext in &filter.excluded_extensions {
            args.push(Value::Text(ext.to_lowercase()));
        }
    }

    // excluded packages never surface, regardless of filters
    wheres.push("(p.exclude = 0 OR p.exclude IS NULL)".to_string());

    Ok((wheres, args))
}

fn order_clause(filter: &SearchFilter) -> String {
    let (column, nocase) = filter.sort.column();
    let collation = if nocase { " COLLATE NOCASE" } else { "" };
    let direction = if filter.descending { " DESC" } else { "" };
    // path keeps the ordering stable across ties
    format!("ORDER BY {column}{collation}{direction}, f.path")
}

impl Store {
    /// Run a search and return one page of hits plus the unpaged total.
    pub fn search(&self, filter: &SearchFilter) -> Result<SearchPage> {
        let (wheres, args) = build_conditions(filter)?;
        let where_clause = format!("WHERE {}", wheres.join(" AND "));
        let from = "FROM package_file f INNER JOIN package p ON p.id = f.package_id";

        let conn = self.lock()?;
        let params: Vec<&dyn ToSql> = args.iter().map(|v| v as &dyn ToSql).collect();

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) {from} {where_clause}"),
            params.as_slice(),
            |row| row.get(0),
        )?;

        let mut sql = format!(
            "SELECT {HIT_COLS} {from} {where_clause} {}",
            order_clause(filter)
        );
        if filter.page_size > 0 {
            let page = filter.page.max(1);
            let offset = (page - 1) * filter.page_size;
            sql.push_str(&format!(" LIMIT {} OFFSET {}", filter.page_size, offset));
        }

        let mut stmt = conn.prepare(&sql)?;
        let hits = stmt
            .query_map(params.as_slice(), row_to_hit)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(SearchPage {
            hits,
            total,
            page: filter.page.max(1),
            page_size: filter.page_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Package, PackageFile, PackageOrigin, PackageState};
    use tempfile::TempDir;

    fn seeded_store() -> (Store, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = Store::open(temp.path().join("index.sqlite")).unwrap();

        let mut pkg = Package {
            safe_name: "Forest Pack".to_string(),
            display_name: Some("Forest Pack".to_string()),
            display_publisher: Some("Pine Studio".to_string()),
            display_category: Some("Scenes/Environments".to_string()),
            origin: PackageOrigin::CustomArchive,
            state: PackageState::Done,
            ..Default::default()
        };
        store.upsert_package(&mut pkg).unwrap();

        let files = [
            ("Assets/Tex/bark.png", "png", 4096, Some(512), Some(512)),
            ("Assets/Tex/leaf.png", "png", 1024, Some(256), Some(256)),
            ("Assets/Tex/moss.jpg", "jpg", 2048, Some(128), Some(128)),
            ("Assets/Audio/wind.wav", "wav", 900_000, None, None),
            ("Assets/notes_v2.txt", "txt", 64, None, None),
        ];
        for (path, ftype, size, w, h) in files {
            let mut file = PackageFile {
                package_id: pkg.id,
                path: path.to_string(),
                file_name: PackageFile::name_of(path),
                file_type: ftype.to_string(),
                size_bytes: size,
                width: w,
                height: h,
                ..Default::default()
            };
            store.upsert_file(&mut file).unwrap();
        }
        (store, temp)
    }

    #[test]
    fn test_empty_filter_matches_all() {
        let (store, _temp) = seeded_store();
        let page = store.search(&SearchFilter::default()).unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.hits.len(), 5);
    }

    #[test]
    fn test_type_and_size_filter() {
        let (store, _temp) = seeded_store();
        let filter = SearchFilter {
            file_type: Some("png".to_string()),
            size_bytes: Some(NumericFilter::at_least(2000)),
            ..Default::default()
        };
        let page = store.search(&filter).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.hits[0].file_name, "bark.png");
    }

    #[test]
    fn test_type_group_expansion() {
        let (store, _temp) = seeded_store();
        let filter = SearchFilter {
            file_type: Some("Images".to_string()),
            ..Default::default()
        };
        let page = store.search(&filter).unwrap();
        assert_eq!(page.total, 3);
    }

    #[test]
    fn test_underscore_matches_literally() {
        let (store, _temp) = seeded_store();
        let filter = SearchFilter {
            query: Some("notes_v2".to_string()),
            ..Default::default()
        };
        let page = store.search(&filter).unwrap();
        assert_eq!(page.total, 1);

        // without escaping, `_` would also match "notesXv2"
        let filter = SearchFilter {
            query: Some("notes_x2".to_string()),
            ..Default::default()
        };
        assert_eq!(store.search(&filter).unwrap().total, 0);
    }

    #[test]
    fn test_query_matches_directory_fragment() {
        let (store, _temp) = seeded_store();
        // the query runs against the whole stored path, not just the name
        let filter = SearchFilter {
            query: Some("Tex".to_string()),
            ..Default::default()
        };
        let page = store.search(&filter).unwrap();
        assert_eq!(page.total, 3);
        assert!(page.hits.iter().all(|h| h.path.starts_with("Assets/Tex/")));

        let filter = SearchFilter {
            query: Some("Audio/wind".to_string()),
            ..Default::default()
        };
        assert_eq!(store.search(&filter).unwrap().total, 1);
    }

    #[test]
    fn test_excluded_package_never_surfaces() {
        let (store, _temp) = seeded_store();
        let pkg = store.find_package_by_safe_name("Forest Pack").unwrap().unwrap();
        store.set_package_exclusion(pkg.id, true).unwrap();

        let page = store.search(&SearchFilter::default()).unwrap();
        assert_eq!(page.total, 0);
    }

    #[test]
    fn test_excluded_extensions() {
        let (store, _temp) = seeded_store();
        let filter = SearchFilter {
            excluded_extensions: vec!["txt".to_string(), "wav".to_string()],
            ..Default::default()
        };
        let page = store.search(&filter).unwrap();
        assert_eq!(page.total, 3);
    }

    #[test]
    fn test_pagination_and_total() {
        let (store, _temp) = seeded_store();
        let filter = SearchFilter {
            sort: SortField::Size,
            descending: true,
            page_size: 2,
            page: 2,
            ..Default::default()
        };
        let page = store.search(&filter).unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.total_pages(), 3);
        assert_eq!(page.hits.len(), 2);
        // page 1 holds 900000 and 4096; page 2 starts at 2048
        assert_eq!(page.hits[0].size_bytes, 2048);
        assert_eq!(page.hits[1].size_bytes, 1024);
    }

    #[test]
    fn test_sort_name_case_insensitive() {
        let (store, _temp) = seeded_store();
        let filter = SearchFilter {
            sort: SortField::Name,
            ..Default::default()
        };
        let page = store.search(&filter).unwrap();
        let names: Vec<&str> = page.hits.iter().map(|h| h.file_name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort_by_key(|n| n.to_lowercase());
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_tag_filter() {
        let (store, _temp) = seeded_store();
        let pkg = store.find_package_by_safe_name("Forest Pack").unwrap().unwrap();
        let tag = store.add_tag("nature", false).unwrap().unwrap();
        store.assign_tag(tag.id, pkg.id).unwrap();

        let filter = SearchFilter {
            tag: Some("NATURE".to_string()),
            ..Default::default()
        };
        assert_eq!(store.search(&filter).unwrap().total, 5);

        let filter = SearchFilter {
            tag: Some("urban".to_string()),
            ..Default::default()
        };
        assert_eq!(store.search(&filter).unwrap().total, 0);
    }

    #[test]
    fn test_negative_bound_rejected() {
        let (store, _temp) = seeded_store();
        let filter = SearchFilter {
            width: Some(NumericFilter::at_most(-5)),
            ..Default::default()
        };
        assert!(matches!(
            store.search(&filter),
            Err(PackratError::InvalidFilter { .. })
        ));
    }
}
