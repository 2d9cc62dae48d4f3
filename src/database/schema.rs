pub const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS images (
        id INTEGER PRIMARY KEY,
        filename TEXT UNIQUE NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS tags (
        id INTEGER PRIMARY KEY,
        name TEXT UNIQUE NOT NULL
    );

    CREATE TABLE IF NOT EXISTS image_tags (
        image_id INTEGER NOT NULL,
        tag_id INTEGER NOT NULL,
        FOREIGN KEY(image_id) REFERENCES images(id) ON DELETE CASCADE,
        FOREIGN KEY(tag_id) REFERENCES tags(id),
        PRIMARY KEY(image_id, tag_id)
    );

    CREATE INDEX IF NOT EXISTS idx_image_tags_tag ON image_tags(tag_id);

    CREATE TABLE IF NOT EXISTS detected_objects (
        id INTEGER PRIMARY KEY,
        image_id INTEGER NOT NULL,
        class_name TEXT NOT NULL,
        confidence REAL NOT NULL,
        FOREIGN KEY(image_id) REFERENCES images(id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_objects_image ON detected_objects(image_id);

    CREATE TABLE IF NOT EXISTS detected_texts (
        id INTEGER PRIMARY KEY,
        image_id INTEGER NOT NULL,
        text TEXT NOT NULL,
        confidence REAL NOT NULL,
        bbox TEXT NOT NULL,
        FOREIGN KEY(image_id) REFERENCES images(id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_texts_image ON detected_texts(image_id);
";
