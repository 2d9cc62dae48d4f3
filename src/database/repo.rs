use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, ToSql, Transaction};
use tracing::debug;

use crate::database::models::{DetectedObject, DetectedText, ImageRecord, Tag};
use crate::database::schema::SCHEMA;
use crate::error::{Error, Result};

/// Which images a paginated read selects.
#[derive(Debug, Clone, Copy)]
pub enum ImageFilter<'a> {
    All,
    /// Images linked to exactly this canonical tag.
    Tagged(&'a str),
    /// Images linked to `tag`, or with any text containing the already lower-cased `needle`.
    TaggedOrText { tag: &'a str, needle: &'a str },
}

impl<'a> ImageFilter<'a> {
    fn where_clause(&self) -> &'static str {
        match self {
            ImageFilter::All => "",
            ImageFilter::Tagged(_) => {
                "WHERE i.id IN (SELECT it.image_id FROM image_tags it
                                JOIN tags t ON t.id = it.tag_id WHERE t.name = ?)"
            }
            ImageFilter::TaggedOrText { .. } => {
                "WHERE i.id IN (SELECT it.image_id FROM image_tags it
                                JOIN tags t ON t.id = it.tag_id WHERE t.name = ?)
                   OR i.id IN (SELECT d.image_id FROM detected_texts d
                               WHERE instr(fold(d.text), ?) > 0)"
            }
        }
    }

    fn bind(&self) -> Vec<&dyn ToSql> {
        match self {
            ImageFilter::All => Vec::new(),
            ImageFilter::Tagged(tag) => vec![tag as &dyn ToSql],
            ImageFilter::TaggedOrText { tag, needle } => {
                vec![tag as &dyn ToSql, needle as &dyn ToSql]
            }
        }
    }
}

/// SQLite-backed store for images, tags and detections.
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        register_functions(&conn)?;
        Ok(Self { conn })
    }

    /// Starts a write transaction. Dropping the writer without `commit` rolls back.
    pub fn writer(&mut self) -> Result<Writer<'_>> {
        Ok(Writer {
            tx: self.conn.transaction()?,
        })
    }

    pub fn tag_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare_cached("SELECT name FROM tags ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    #[cfg(test)]
    pub fn find_tag(&self, name: &str) -> Result<Option<Tag>> {
        find_tag(&self.conn, name)
    }

    pub fn image(&self, id: i64) -> Result<Option<ImageRecord>> {
        let header = self
            .conn
            .query_row(
                "SELECT id, filename, created_at FROM images WHERE id = ?1",
                params![id],
                image_header,
            )
            .optional()?;

        match header {
            Some((id, filename, created_at)) => Ok(Some(self.hydrate(id, filename, created_at)?)),
            None => Ok(None),
        }
    }

    /// Texts of an image, most confident first. `None` if the image is unknown.
    pub fn image_texts(&self, id: i64) -> Result<Option<Vec<DetectedText>>> {
        let exists: Option<i64> = self
            .conn
            .query_row("SELECT id FROM images WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        if exists.is_none() {
            return Ok(None);
        }

        let mut stmt = self.conn.prepare_cached(
            "SELECT text, confidence, bbox FROM detected_texts
             WHERE image_id = ?1 ORDER BY confidence DESC, id",
        )?;
        let texts = stmt
            .query_map(params![id], text_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Some(texts))
    }

    /// Removes an image with its objects, texts and tag links. Tags stay.
    pub fn delete_image(&self, id: i64) -> Result<bool> {
        let removed = self.conn.execute("DELETE FROM images WHERE id = ?1", params![id])?;
        debug!("Deleted image {} ({} rows)", id, removed);
        Ok(removed > 0)
    }

    pub fn count_images(&self, filter: ImageFilter<'_>) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM images i {}", filter.where_clause());
        let count: i64 = self.conn.query_row(&sql, &*filter.bind(), |row| row.get(0))?;
        Ok(count as u64)
    }

    /// One page of images in primary key order.
    pub fn images(
        &self,
        filter: ImageFilter<'_>,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<ImageRecord>> {
        let sql = format!(
            "SELECT i.id, i.filename, i.created_at FROM images i {} ORDER BY i.id LIMIT ? OFFSET ?",
            filter.where_clause()
        );
        let limit = i64::from(limit);
        let offset = offset as i64;
        let mut args = filter.bind();
        args.push(&limit);
        args.push(&offset);

        let headers = {
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(&*args, image_header)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        headers
            .into_iter()
            .map(|(id, filename, created_at)| self.hydrate(id, filename, created_at))
            .collect()
    }

    /// Distinct texts where `needle` (lower-cased) starts a word.
    pub fn texts_at_word(&self, needle: &str, limit: usize) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT DISTINCT text FROM detected_texts
             WHERE word_match(text, ?1) ORDER BY text LIMIT ?2",
        )?;
        let texts = stmt
            .query_map(params![needle, limit as i64], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(texts)
    }

    fn hydrate(&self, id: i64, filename: String, created_at: DateTime<Utc>) -> Result<ImageRecord> {
        let tags = {
            let mut stmt = self.conn.prepare_cached(
                "SELECT t.name FROM tags t JOIN image_tags it ON it.tag_id = t.id
                 WHERE it.image_id = ?1 ORDER BY t.name",
            )?;
            let rows = stmt.query_map(params![id], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<Vec<String>>>()?
        };

        let objects = {
            let mut stmt = self.conn.prepare_cached(
                "SELECT class_name, confidence FROM detected_objects
                 WHERE image_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![id], |row| {
                Ok(DetectedObject {
                    class_name: row.get(0)?,
                    confidence: row.get::<_, f64>(1)? as f32,
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let texts = {
            let mut stmt = self.conn.prepare_cached(
                "SELECT text, confidence, bbox FROM detected_texts WHERE image_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![id], text_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        Ok(ImageRecord {
            id,
            filename,
            created_at,
            tags,
            objects,
            texts,
        })
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }
}

/// A single write transaction over the store.
pub struct Writer<'r> {
    tx: Transaction<'r>,
}

impl<'r> Writer<'r> {
    pub fn find_tag(&self, name: &str) -> Result<Option<Tag>> {
        find_tag(&self.tx, name)
    }

    /// Inserts the tag unless a row with that name exists, and returns the row.
    pub fn insert_tag(&self, name: &str) -> Result<Tag> {
        self.tx
            .prepare_cached("INSERT OR IGNORE INTO tags (name) VALUES (?1)")?
            .execute(params![name])?;
        find_tag(&self.tx, name)?.ok_or(Error::Store(rusqlite::Error::QueryReturnedNoRows))
    }

    pub fn insert_image(&self, filename: &str, created_at: DateTime<Utc>) -> Result<i64> {
        let inserted = self.tx.execute(
            "INSERT INTO images (filename, created_at) VALUES (?1, ?2)",
            params![filename, created_at],
        );
        match inserted {
            Ok(_) => Ok(self.tx.last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(Error::Conflict(filename.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Links a tag to an image. Linking the same pair twice violates the primary key.
    pub fn link_tag(&self, image_id: i64, tag_id: i64) -> Result<()> {
        self.tx
            .prepare_cached("INSERT INTO image_tags (image_id, tag_id) VALUES (?1, ?2)")?
            .execute(params![image_id, tag_id])?;
        Ok(())
    }

    pub fn insert_object(&self, image_id: i64, object: &DetectedObject) -> Result<()> {
        self.tx
            .prepare_cached(
                "INSERT INTO detected_objects (image_id, class_name, confidence)
                 VALUES (?1, ?2, ?3)",
            )?
            .execute(params![image_id, object.class_name, f64::from(object.confidence)])?;
        Ok(())
    }

    pub fn insert_text(&self, image_id: i64, text: &DetectedText) -> Result<()> {
        let bbox = serde_json::to_string(&text.bbox)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        self.tx
            .prepare_cached(
                "INSERT INTO detected_texts (image_id, text, confidence, bbox)
                 VALUES (?1, ?2, ?3, ?4)",
            )?
            .execute(params![image_id, text.text, f64::from(text.confidence), bbox])?;
        Ok(())
    }

    pub fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }
}

fn find_tag(conn: &Connection, name: &str) -> Result<Option<Tag>> {
    let tag = conn
        .prepare_cached("SELECT id, name FROM tags WHERE name = ?1")?
        .query_row(params![name], |row| {
            Ok(Tag {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })
        .optional()?;
    Ok(tag)
}

fn image_header(row: &Row<'_>) -> rusqlite::Result<(i64, String, DateTime<Utc>)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn text_from_row(row: &Row<'_>) -> rusqlite::Result<DetectedText> {
    let bbox: String = row.get(2)?;
    let bbox = serde_json::from_str(&bbox)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    Ok(DetectedText {
        text: row.get(0)?,
        confidence: row.get::<_, f64>(1)? as f32,
        bbox,
    })
}

/// `fold(text)` lower-cases Unicode text, which SQLite's own `lower` does not.
/// `word_match(text, needle)` is true when `needle` starts a word inside `text`.
fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;
    conn.create_scalar_function("fold", 1, flags, |ctx| {
        let text = ctx.get::<String>(0)?;
        Ok(text.to_lowercase())
    })?;
    conn.create_scalar_function("word_match", 2, flags, |ctx| {
        let text = ctx.get::<String>(0)?;
        let needle = ctx.get::<String>(1)?;
        Ok(starts_word(&text.to_lowercase(), &needle))
    })?;
    Ok(())
}

pub(crate) fn starts_word(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(idx, _)| {
        haystack[..idx]
            .chars()
            .next_back()
            .map_or(true, char::is_whitespace)
    })
}
