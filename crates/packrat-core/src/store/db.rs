//! SQLite store for packages, package files, tags and process metadata.
//!
//! Single connection, single writer. All mutation goes through this type
//! directly; there is no in-memory write-back cache.

use crate::error::{PackratError, Result};
use crate::store::models::{
    Package, PackageFile, PackageOrigin, PackageOverview, PackageState, PreviewState, Tag,
    TagAssignment, TagTarget, NO_PACKAGE,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Current schema version stamped into `app_property`.
const SCHEMA_VERSION: &str = "3";

const PACKAGE_COLS: &str = "id, safe_name, display_name, safe_publisher, display_publisher, \
     safe_category, display_category, origin, location, size_bytes, state, change_token, \
     foreign_id, preview_image, official_state, version, exclude";

const FILE_COLS: &str = "id, package_id, path, source_path, file_name, ref_id, size_bytes, \
     file_type, width, height, duration_seconds, preview_file, preview_state";

/// Relational persistence for the index.
pub struct Store {
    db_path: PathBuf,
    conn: Arc<Mutex<Connection>>,
    /// Bumped after every committed tag mutation; callers re-query when the
    /// generation they cached no longer matches.
    tag_generation: AtomicU64,
}

impl Store {
    /// Create or open the store at the given path, running one-time
    /// migrations keyed on the persisted schema version.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| PackratError::io_with_path(e, parent))?;
            }
        }

        let conn = Connection::open(&db_path)?;
        Self::configure_connection(&conn)?;
        Self::ensure_schema(&conn)?;

        let store = Self {
            db_path,
            conn: Arc::new(Mutex::new(conn)),
            tag_generation: AtomicU64::new(0),
        };
        store.migrate()?;

        Ok(store)
    }

    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA busy_timeout=30000;
            PRAGMA synchronous=NORMAL;
            PRAGMA temp_store=MEMORY;
            PRAGMA foreign_keys=ON;
            ",
        )?;
        Ok(())
    }

    fn ensure_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS package (
                id INTEGER PRIMARY KEY,
                safe_name TEXT NOT NULL,
                display_name TEXT,
                safe_publisher TEXT,
                display_publisher TEXT,
                safe_category TEXT,
                display_category TEXT,
                origin INTEGER NOT NULL DEFAULT 0,
                location TEXT,
                size_bytes INTEGER NOT NULL DEFAULT 0,
                state INTEGER NOT NULL DEFAULT 0,
                change_token TEXT,
                foreign_id INTEGER NOT NULL DEFAULT 0,
                preview_image TEXT,
                official_state TEXT,
                version TEXT,
                exclude INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_package_safe_name ON package(safe_name);
            CREATE INDEX IF NOT EXISTS idx_package_state ON package(state);

            CREATE TABLE IF NOT EXISTS package_file (
                id INTEGER PRIMARY KEY,
                package_id INTEGER NOT NULL REFERENCES package(id) ON DELETE CASCADE,
                path TEXT NOT NULL,
                source_path TEXT NOT NULL DEFAULT '',
                file_name TEXT NOT NULL DEFAULT '',
                ref_id TEXT,
                size_bytes INTEGER NOT NULL DEFAULT 0,
                file_type TEXT NOT NULL DEFAULT '',
                width INTEGER,
                height INTEGER,
                duration_seconds REAL,
                preview_file TEXT,
                preview_state INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_file_package ON package_file(package_id);
            CREATE INDEX IF NOT EXISTS idx_file_ref ON package_file(package_id, ref_id);
            CREATE INDEX IF NOT EXISTS idx_file_path ON package_file(path);
            CREATE INDEX IF NOT EXISTS idx_file_type ON package_file(file_type);

            CREATE TABLE IF NOT EXISTS tag (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                from_external_catalog INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS tag_assignment (
                id INTEGER PRIMARY KEY,
                tag_id INTEGER NOT NULL REFERENCES tag(id) ON DELETE CASCADE,
                target_kind INTEGER NOT NULL DEFAULT 0,
                target_id INTEGER NOT NULL,
                UNIQUE(tag_id, target_kind, target_id)
            );

            CREATE TABLE IF NOT EXISTS app_property (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// One-time upgrades driven by the persisted schema version.
    fn migrate(&self) -> Result<()> {
        let version = self.app_property("version")?;

        match version.as_deref() {
            None => {
                // v1 predates the file_name column; backfill it from path.
                let conn = self.lock()?;
                let mut stmt = conn.prepare("SELECT id, path FROM package_file")?;
                let rows: Vec<(i64, String)> = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<rusqlite::Result<_>>()?;
                for (id, path) in rows {
                    conn.execute(
                        "UPDATE package_file SET file_name = ?1 WHERE id = ?2",
                        params![PackageFile::name_of(&path), id],
                    )?;
                }
            }
            Some("2") => {
                // v2 change tokens predate the package state column; clear
                // them so the next catalog sync re-fetches details.
                self.lock()?
                    .execute("UPDATE package SET change_token = NULL", [])?;
            }
            _ => {}
        }

        if version.as_deref() != Some(SCHEMA_VERSION) {
            self.set_app_property("version", SCHEMA_VERSION)?;
            info!("Store schema migrated to version {}", SCHEMA_VERSION);
        }
        Ok(())
    }

    /// Get the database path.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| PackratError::Database {
            message: "Failed to acquire connection lock".to_string(),
            source: None,
        })
    }

    // ========================================
    // App properties
    // ========================================

    pub fn app_property(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM app_property WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_app_property(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.execute(
            "INSERT INTO app_property (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    // ========================================
    // Packages
    // ========================================

    fn row_to_package(row: &Row) -> rusqlite::Result<Package> {
        Ok(Package {
            id: row.get(0)?,
            safe_name: row.get(1)?,
            display_name: row.get(2)?,
            safe_publisher: row.get(3)?,
            display_publisher: row.get(4)?,
            safe_category: row.get(5)?,
            display_category: row.get(6)?,
            origin: PackageOrigin::from_i64(row.get(7)?),
            location: row.get(8)?,
            size_bytes: row.get(9)?,
            state: PackageState::from_i64(row.get(10)?),
            change_token: row.get(11)?,
            foreign_id: row.get(12)?,
            preview_image: row.get(13)?,
            official_state: row.get(14)?,
            version: row.get(15)?,
            exclude: row.get::<_, i64>(16)? != 0,
        })
    }

    pub fn find_package(&self, id: i64) -> Result<Option<Package>> {
        let conn = self.lock()?;
        let result = conn
            .query_row(
                &format!("SELECT {PACKAGE_COLS} FROM package WHERE id = ?1"),
                params![id],
                Self::row_to_package,
            )
            .optional()?;
        Ok(result)
    }

    /// Look up a package by identity key. Prefers the non-deprecated row
    /// when duplicates exist.
    pub fn find_package_by_safe_name(&self, safe_name: &str) -> Result<Option<Package>> {
        let conn = self.lock()?;
        let result = conn
            .query_row(
                &format!(
                    "SELECT {PACKAGE_COLS} FROM package WHERE safe_name = ?1 \
                     ORDER BY official_state DESC LIMIT 1"
                ),
                params![safe_name],
                Self::row_to_package,
            )
            .optional()?;
        Ok(result)
    }

    pub fn find_package_by_foreign_id(&self, foreign_id: i64) -> Result<Option<Package>> {
        let conn = self.lock()?;
        let result = conn
            .query_row(
                &format!("SELECT {PACKAGE_COLS} FROM package WHERE foreign_id = ?1"),
                params![foreign_id],
                Self::row_to_package,
            )
            .optional()?;
        Ok(result)
    }

    /// Insert or update a package. A package with `id == 0` is matched
    /// against an existing row by safe name; when found, that row's primary
    /// key is reused and the row is updated in place.
    pub fn upsert_package(&self, package: &mut Package) -> Result<()> {
        if package.id == 0 {
            if let Some(existing) = self.find_package_by_safe_name(&package.safe_name)? {
                package.id = existing.id;
                // keep fields the caller did not rediscover
                if package.display_name.is_none() {
                    package.display_name = existing.display_name;
                }
                if package.safe_publisher.is_none() {
                    package.safe_publisher = existing.safe_publisher;
                }
                if package.safe_category.is_none() {
                    package.safe_category = existing.safe_category;
                }
                if package.preview_image.is_none() {
                    package.preview_image = existing.preview_image;
                }
                if package.foreign_id == 0 {
                    package.foreign_id = existing.foreign_id;
                }
            }
        }

        let conn = self.lock()?;
        if package.id > 0 {
            conn.execute(
                "UPDATE package SET safe_name=?1, display_name=?2, safe_publisher=?3, \
                 display_publisher=?4, safe_category=?5, display_category=?6, origin=?7, \
                 location=?8, size_bytes=?9, state=?10, change_token=?11, foreign_id=?12, \
                 preview_image=?13, official_state=?14, version=?15, exclude=?16 WHERE id=?17",
                params![
                    package.safe_name,
                    package.display_name,
                    package.safe_publisher,
                    package.display_publisher,
                    package.safe_category,
                    package.display_category,
                    package.origin as i64,
                    package.location,
                    package.size_bytes,
                    package.state as i64,
                    package.change_token,
                    package.foreign_id,
                    package.preview_image,
                    package.official_state,
                    package.version,
                    package.exclude as i64,
                    package.id,
                ],
            )?;
        } else {
            conn.execute(
                "INSERT INTO package (safe_name, display_name, safe_publisher, display_publisher, \
                 safe_category, display_category, origin, location, size_bytes, state, \
                 change_token, foreign_id, preview_image, official_state, version, exclude) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    package.safe_name,
                    package.display_name,
                    package.safe_publisher,
                    package.display_publisher,
                    package.safe_category,
                    package.display_category,
                    package.origin as i64,
                    package.location,
                    package.size_bytes,
                    package.state as i64,
                    package.change_token,
                    package.foreign_id,
                    package.preview_image,
                    package.official_state,
                    package.version,
                    package.exclude as i64,
                ],
            )?;
            package.id = conn.last_insert_rowid();
        }
        debug!("Upserted package {} ({})", package.safe_name, package.id);
        Ok(())
    }

    /// Fetch or create the synthetic no-package owner for loose media.
    pub fn ensure_no_package(&self) -> Result<Package> {
        if let Some(existing) = self.find_package_by_safe_name(NO_PACKAGE)? {
            return Ok(existing);
        }
        let mut sentinel = Package::no_package();
        self.upsert_package(&mut sentinel)?;
        Ok(sentinel)
    }

    /// Packages in the given state, optionally skipping excluded ones.
    pub fn packages_in_state(
        &self,
        state: PackageState,
        skip_excluded: bool,
    ) -> Result<Vec<Package>> {
        let conn = self.lock()?;
        let sql = if skip_excluded {
            format!(
                "SELECT {PACKAGE_COLS} FROM package WHERE state = ?1 AND exclude = 0 ORDER BY id"
            )
        } else {
            format!("SELECT {PACKAGE_COLS} FROM package WHERE state = ?1 ORDER BY id")
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![state as i64], Self::row_to_package)?;
        rows.collect::<rusqlite::Result<_>>().map_err(Into::into)
    }

    /// All packages with their file count and summed uncompressed size.
    pub fn list_package_overviews(&self) -> Result<Vec<PackageOverview>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PACKAGE_COLS}, \
             (SELECT COUNT(*) FROM package_file f WHERE f.package_id = package.id), \
             (SELECT COALESCE(SUM(f.size_bytes), 0) FROM package_file f \
              WHERE f.package_id = package.id) \
             FROM package ORDER BY LOWER(safe_name)"
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok(PackageOverview {
                package: Self::row_to_package(row)?,
                file_count: row.get(17)?,
                uncompressed_size: row.get(18)?,
            })
        })?;
        rows.collect::<rusqlite::Result<_>>().map_err(Into::into)
    }

    pub fn set_package_exclusion(&self, id: i64, exclude: bool) -> Result<()> {
        self.lock()?.execute(
            "UPDATE package SET exclude = ?1 WHERE id = ?2",
            params![exclude as i64, id],
        )?;
        Ok(())
    }

    /// Drop a package's files and reset it to `New` so the next scan
    /// re-indexes it from scratch. The package row itself stays.
    pub fn forget_package(&self, id: i64) -> Result<Option<Package>> {
        {
            let conn = self.lock()?;
            conn.execute("DELETE FROM package_file WHERE package_id = ?1", params![id])?;
            conn.execute(
                "UPDATE package SET state = ?1 WHERE id = ?2",
                params![PackageState::New as i64, id],
            )?;
        }
        self.find_package(id)
    }

    /// Remove a package entirely; cascades to its files.
    pub fn remove_package(&self, id: i64) -> Result<()> {
        self.forget_package(id)?;
        self.lock()?
            .execute("DELETE FROM package WHERE id = ?1", params![id])?;
        debug!("Removed package {}", id);
        Ok(())
    }

    // ========================================
    // Package files
    // ========================================

    pub(crate) fn row_to_file(row: &Row) -> rusqlite::Result<PackageFile> {
        Ok(PackageFile {
            id: row.get(0)?,
            package_id: row.get(1)?,
            path: row.get(2)?,
            source_path: row.get(3)?,
            file_name: row.get(4)?,
            ref_id: row.get(5)?,
            size_bytes: row.get(6)?,
            file_type: row.get(7)?,
            width: row.get(8)?,
            height: row.get(9)?,
            duration_seconds: row.get(10)?,
            preview_file: row.get(11)?,
            preview_state: PreviewState::from_i64(row.get(12)?),
        })
    }

    pub fn find_file(&self, id: i64) -> Result<Option<PackageFile>> {
        let conn = self.lock()?;
        let result = conn
            .query_row(
                &format!("SELECT {FILE_COLS} FROM package_file WHERE id = ?1"),
                params![id],
                Self::row_to_file,
            )
            .optional()?;
        Ok(result)
    }

    pub fn find_file_by_path(&self, package_id: i64, path: &str) -> Result<Option<PackageFile>> {
        let conn = self.lock()?;
        let result = conn
            .query_row(
                &format!(
                    "SELECT {FILE_COLS} FROM package_file WHERE package_id = ?1 AND path = ?2"
                ),
                params![package_id, path],
                Self::row_to_file,
            )
            .optional()?;
        Ok(result)
    }

    /// Reference identifiers are scoped to one package; this lookup never
    /// crosses package boundaries.
    pub fn find_file_by_ref(&self, package_id: i64, ref_id: &str) -> Result<Option<PackageFile>> {
        let conn = self.lock()?;
        let result = conn
            .query_row(
                &format!(
                    "SELECT {FILE_COLS} FROM package_file WHERE package_id = ?1 AND ref_id = ?2"
                ),
                params![package_id, ref_id],
                Self::row_to_file,
            )
            .optional()?;
        Ok(result)
    }

    /// Insert or update a package file. A file with `id == 0` is matched by
    /// `(ref_id, package)` when an identifier is present, else by
    /// `(path, package)`; the existing primary key is reused.
    pub fn upsert_file(&self, file: &mut PackageFile) -> Result<()> {
        if file.id == 0 {
            let existing = match file.ref_id.as_deref() {
                Some(ref_id) if !ref_id.is_empty() => {
                    self.find_file_by_ref(file.package_id, ref_id)?
                }
                _ => self.find_file_by_path(file.package_id, &file.path)?,
            };
            if let Some(existing) = existing {
                file.id = existing.id;
            }
        }

        let conn = self.lock()?;
        if file.id > 0 {
            conn.execute(
                "UPDATE package_file SET package_id=?1, path=?2, source_path=?3, file_name=?4, \
                 ref_id=?5, size_bytes=?6, file_type=?7, width=?8, height=?9, \
                 duration_seconds=?10, preview_file=?11, preview_state=?12 WHERE id=?13",
                params![
                    file.package_id,
                    file.path,
                    file.source_path,
                    file.file_name,
                    file.ref_id,
                    file.size_bytes,
                    file.file_type,
                    file.width,
                    file.height,
                    file.duration_seconds,
                    file.preview_file,
                    file.preview_state as i64,
                    file.id,
                ],
            )?;
        } else {
            conn.execute(
                "INSERT INTO package_file (package_id, path, source_path, file_name, ref_id, \
                 size_bytes, file_type, width, height, duration_seconds, preview_file, \
                 preview_state) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    file.package_id,
                    file.path,
                    file.source_path,
                    file.file_name,
                    file.ref_id,
                    file.size_bytes,
                    file.file_type,
                    file.width,
                    file.height,
                    file.duration_seconds,
                    file.preview_file,
                    file.preview_state as i64,
                ],
            )?;
            file.id = conn.last_insert_rowid();
        }
        Ok(())
    }

    pub fn files_for_package(&self, package_id: i64) -> Result<Vec<PackageFile>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FILE_COLS} FROM package_file WHERE package_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![package_id], Self::row_to_file)?;
        rows.collect::<rusqlite::Result<_>>().map_err(Into::into)
    }

    pub fn file_count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count = conn.query_row("SELECT COUNT(*) FROM package_file", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Distinct lower-cased file types present in the index.
    pub fn list_file_types(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT file_type FROM package_file \
             WHERE file_type IS NOT NULL AND file_type != '' ORDER BY file_type",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<_>>().map_err(Into::into)
    }

    /// Flag every file of a package for preview regeneration.
    pub fn schedule_preview_regeneration(&self, package_id: i64) -> Result<usize> {
        let changed = self.lock()?.execute(
            "UPDATE package_file SET preview_state = ?1 WHERE package_id = ?2",
            params![PreviewState::NeedsRegeneration as i64, package_id],
        )?;
        Ok(changed)
    }

    /// Files flagged `NeedsRegeneration`, across all packages.
    pub fn files_needing_preview(&self) -> Result<Vec<PackageFile>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FILE_COLS} FROM package_file WHERE preview_state = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(
            params![PreviewState::NeedsRegeneration as i64],
            Self::row_to_file,
        )?;
        rows.collect::<rusqlite::Result<_>>().map_err(Into::into)
    }

    // ========================================
    // Tags
    // ========================================

    /// Monotonic counter callers use to notice committed tag mutations.
    pub fn tag_generation(&self) -> u64 {
        self.tag_generation.load(Ordering::SeqCst)
    }

    fn bump_tag_generation(&self) {
        self.tag_generation.fetch_add(1, Ordering::SeqCst);
    }

    fn row_to_tag(row: &Row) -> rusqlite::Result<Tag> {
        Ok(Tag {
            id: row.get(0)?,
            name: row.get(1)?,
            from_external_catalog: row.get::<_, i64>(2)? != 0,
        })
    }

    /// Get or create a tag by name (case-insensitive). An import-flagged
    /// re-add upgrades `from_external_catalog` but never clears it.
    pub fn add_tag(&self, name: &str, from_external_catalog: bool) -> Result<Option<Tag>> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }

        let existing = {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT id, name, from_external_catalog FROM tag WHERE LOWER(name) = LOWER(?1)",
                params![name],
                Self::row_to_tag,
            )
            .optional()?
        };

        match existing {
            Some(mut tag) => {
                if from_external_catalog && !tag.from_external_catalog {
                    // book-keeping only, not a caller-visible change
                    self.lock()?.execute(
                        "UPDATE tag SET from_external_catalog = 1 WHERE id = ?1",
                        params![tag.id],
                    )?;
                    tag.from_external_catalog = true;
                }
                Ok(Some(tag))
            }
            None => {
                let id = {
                    let conn = self.lock()?;
                    conn.execute(
                        "INSERT INTO tag (name, from_external_catalog) VALUES (?1, ?2)",
                        params![name, from_external_catalog as i64],
                    )?;
                    conn.last_insert_rowid()
                };
                self.bump_tag_generation();
                Ok(Some(Tag {
                    id,
                    name: name.to_string(),
                    from_external_catalog,
                }))
            }
        }
    }

    pub fn rename_tag(&self, id: i64, new_name: &str) -> Result<()> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Ok(());
        }
        self.lock()?.execute(
            "UPDATE tag SET name = ?1 WHERE id = ?2",
            params![new_name, id],
        )?;
        self.bump_tag_generation();
        Ok(())
    }

    /// Delete a tag; cascades to its assignments.
    pub fn delete_tag(&self, id: i64) -> Result<()> {
        {
            let conn = self.lock()?;
            conn.execute("DELETE FROM tag_assignment WHERE tag_id = ?1", params![id])?;
            conn.execute("DELETE FROM tag WHERE id = ?1", params![id])?;
        }
        self.bump_tag_generation();
        Ok(())
    }

    pub fn list_tags(&self) -> Result<Vec<Tag>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT id, name, from_external_catalog FROM tag ORDER BY name")?;
        let rows = stmt.query_map([], Self::row_to_tag)?;
        rows.collect::<rusqlite::Result<_>>().map_err(Into::into)
    }

    pub fn find_tag(&self, name: &str) -> Result<Option<Tag>> {
        let conn = self.lock()?;
        let result = conn
            .query_row(
                "SELECT id, name, from_external_catalog FROM tag WHERE LOWER(name) = LOWER(?1)",
                params![name],
                Self::row_to_tag,
            )
            .optional()?;
        Ok(result)
    }

    /// Assign a tag to a package. Returns false when the assignment already
    /// existed.
    pub fn assign_tag(&self, tag_id: i64, target_id: i64) -> Result<bool> {
        let inserted = {
            let conn = self.lock()?;
            conn.execute(
                "INSERT OR IGNORE INTO tag_assignment (tag_id, target_kind, target_id) \
                 VALUES (?1, ?2, ?3)",
                params![tag_id, TagTarget::Package as i64, target_id],
            )?
        };
        if inserted > 0 {
            self.bump_tag_generation();
        }
        Ok(inserted > 0)
    }

    pub fn remove_assignment(&self, assignment_id: i64) -> Result<()> {
        self.lock()?.execute(
            "DELETE FROM tag_assignment WHERE id = ?1",
            params![assignment_id],
        )?;
        self.bump_tag_generation();
        Ok(())
    }

    /// Tags assigned to one package, name-ordered, with assignment ids.
    pub fn tags_for_package(&self, package_id: i64) -> Result<Vec<(TagAssignment, Tag)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT ta.id, ta.tag_id, ta.target_id, t.name, t.from_external_catalog \
             FROM tag_assignment ta INNER JOIN tag t ON t.id = ta.tag_id \
             WHERE ta.target_kind = ?1 AND ta.target_id = ?2 ORDER BY t.name",
        )?;
        let rows = stmt.query_map(params![TagTarget::Package as i64, package_id], |row| {
            Ok((
                TagAssignment {
                    id: row.get(0)?,
                    tag_id: row.get(1)?,
                    target_kind: TagTarget::Package,
                    target_id: row.get(2)?,
                },
                Tag {
                    id: row.get(1)?,
                    name: row.get(3)?,
                    from_external_catalog: row.get::<_, i64>(4)? != 0,
                },
            ))
        })?;
        rows.collect::<rusqlite::Result<_>>().map_err(Into::into)
    }
}
