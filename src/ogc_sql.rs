// cf. https://www.geopackage.org/spec140/index.html#table_definition_sql

// Coordinate systems, keyed by srs_id.
pub(crate) const SQL_GPKG_SPATIAL_REF_SYS: &str = "
CREATE TABLE gpkg_spatial_ref_sys (
  srs_name TEXT NOT NULL,
  srs_id INTEGER PRIMARY KEY,
  organization TEXT NOT NULL,
  organization_coordsys_id INTEGER NOT NULL,
  definition  TEXT NOT NULL,
  description TEXT
);
";

// One row per feature table; discovery reads identifier, description and extent here.
pub(crate) const SQL_GPKG_CONTENTS: &str = "
CREATE TABLE gpkg_contents (
  table_name TEXT NOT NULL PRIMARY KEY,
  data_type TEXT NOT NULL,
  identifier TEXT UNIQUE,
  description TEXT DEFAULT '',
  last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
  min_x DOUBLE,
  min_y DOUBLE,
  max_x DOUBLE,
  max_y DOUBLE,
  srs_id INTEGER,
  CONSTRAINT fk_gc_r_srs_id FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys(srs_id)
);
";

// Geometry column, geometry type and srs_id of each feature table.
pub(crate) const SQL_GPKG_GEOMETRY_COLUMNS: &str = "
CREATE TABLE gpkg_geometry_columns (
  table_name TEXT NOT NULL,
  column_name TEXT NOT NULL,
  geometry_type_name TEXT NOT NULL,
  srs_id INTEGER NOT NULL,
  z TINYINT NOT NULL,
  m TINYINT NOT NULL,
  CONSTRAINT pk_geom_cols PRIMARY KEY (table_name, column_name),
  CONSTRAINT uk_gc_table_name UNIQUE (table_name),
  CONSTRAINT fk_gc_tn FOREIGN KEY (table_name) REFERENCES gpkg_contents(table_name),
  CONSTRAINT fk_gc_srs FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys (srs_id)
);
";

// Holds the gpkg_rtree_index registrations.
pub(crate) const SQL_GPKG_EXTENSIONS: &str = "
CREATE TABLE gpkg_extensions (
  table_name TEXT,
  column_name TEXT,
  extension_name TEXT NOT NULL,
  definition TEXT NOT NULL,
  scope TEXT NOT NULL,
  CONSTRAINT ge_tce UNIQUE (table_name, column_name, extension_name)
);
";

pub(crate) const SQL_INSERT_GPKG_SPATIAL_REF_SYS: &str = "
INSERT INTO gpkg_spatial_ref_sys
  (srs_name, srs_id, organization, organization_coordsys_id, definition, description)
VALUES
  (?1, ?2, ?3, ?4, ?5, ?6)
";

pub(crate) const SQL_INSERT_GPKG_CONTENTS: &str = "
INSERT INTO gpkg_contents
  (table_name, data_type, identifier, description, srs_id)
VALUES
  (?1, 'features', ?2, ?3, ?4)
";

pub(crate) const SQL_INSERT_GPKG_GEOMETRY_COLUMNS: &str = "
INSERT INTO gpkg_geometry_columns
  (table_name, column_name, geometry_type_name, srs_id, z, m)
VALUES
  (?1, ?2, ?3, ?4, 0, 0)
";

pub(crate) const SQL_SRS_EXISTS: &str =
    "SELECT EXISTS(SELECT 1 FROM gpkg_spatial_ref_sys WHERE srs_id = ?1)";

pub(crate) fn sql_create_table(quoted_table: &str, column_defs: &str) -> String {
    format!("CREATE TABLE {quoted_table} ({column_defs})")
}

pub(crate) fn sql_insert_feature(quoted_table: &str, columns: &str, values: &str) -> String {
    format!("INSERT INTO {quoted_table} ({columns}) VALUES ({values})")
}

/// Metadata tables in creation order; the SRS rows go in right after the first.
const SQL_GPKG_TABLES: [&str; 4] = [
    SQL_GPKG_SPATIAL_REF_SYS,
    SQL_GPKG_CONTENTS,
    SQL_GPKG_GEOMETRY_COLUMNS,
    SQL_GPKG_EXTENSIONS,
];

pub(crate) fn initialize_gpkg(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    let (srs_table, rest) = SQL_GPKG_TABLES.split_at(1);
    conn.execute_batch(srs_table[0])?;
    insert_builtin_srs(conn)?;
    rest.iter().try_for_each(|sql| conn.execute_batch(sql))
}

const EPSG4326_WKT: &str = r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AXIS["Latitude",NORTH],AXIS["Longitude",EAST],AUTHORITY["EPSG","4326"]]"#;

const EPSG3857_WKT: &str = r#"PROJCS["WGS 84 / Pseudo-Mercator",GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AUTHORITY["EPSG","4326"]],PROJECTION["Mercator_1SP"],PARAMETER["central_meridian",0],PARAMETER["scale_factor",1],PARAMETER["false_easting",0],PARAMETER["false_northing",0],UNIT["metre",1,AUTHORITY["EPSG","9001"]],AXIS["Easting",EAST],AXIS["Northing",NORTH],AUTHORITY["EPSG","3857"]]"#;

/// (srs_name, srs_id, organization, definition, description); the
/// organization code equals srs_id for all of them.
const BUILTIN_SRS: [(&str, i32, &str, &str, &str); 4] = [
    ("WGS 84", 4326, "EPSG", EPSG4326_WKT, "WGS 84"),
    (
        "WGS 84 / Pseudo-Mercator",
        3857,
        "EPSG",
        EPSG3857_WKT,
        "Web Mercator / Pseudo-Mercator",
    ),
    (
        "Undefined Cartesian SRS",
        -1,
        "NONE",
        "undefined",
        "undefined Cartesian coordinate reference system",
    ),
    (
        "Undefined geographic SRS",
        0,
        "NONE",
        "undefined",
        "undefined geographic coordinate reference system",
    ),
];

fn insert_builtin_srs(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(SQL_INSERT_GPKG_SPATIAL_REF_SYS)?;
    for (name, srs_id, organization, definition, description) in BUILTIN_SRS {
        stmt.execute(rusqlite::params![
            name,
            srs_id,
            organization,
            srs_id,
            definition,
            description
        ])?;
    }
    Ok(())
}

/// Name of the R-tree index table of a geometry column, unquoted.
pub(crate) fn rtree_table_name(table: &str, geom_column: &str) -> String {
    format!("rtree_{table}_{geom_column}")
}

// cf. https://www.geopackage.org/spec140/index.html#extension_rtree
//
// `r`, `t`, `c` and `i` are already quoted identifiers.
pub(crate) fn gpkg_rtree_create_sql(r: &str) -> String {
    format!("CREATE VIRTUAL TABLE {r} USING rtree(id, minx, maxx, miny, maxy);")
}

pub(crate) fn gpkg_rtree_load_sql(r: &str, t: &str, c: &str, i: &str) -> String {
    format!(
        "INSERT OR REPLACE INTO {r}
  SELECT {i}, ST_MinX({c}), ST_MaxX({c}), ST_MinY({c}), ST_MaxY({c})
  FROM {t} WHERE {c} NOT NULL AND NOT ST_IsEmpty({c});"
    )
}

pub(crate) fn gpkg_rtree_triggers_sql(
    r: &str,
    t: &str,
    c: &str,
    i: &str,
    trigger: &dyn Fn(&str) -> String,
) -> String {
    format!(
        "CREATE TRIGGER {insert} AFTER INSERT ON {t}
  WHEN (new.{c} NOT NULL AND NOT ST_IsEmpty(NEW.{c}))
BEGIN
  INSERT OR REPLACE INTO {r} VALUES (
    NEW.{i},
    ST_MinX(NEW.{c}), ST_MaxX(NEW.{c}),
    ST_MinY(NEW.{c}), ST_MaxY(NEW.{c})
  );
END;

CREATE TRIGGER {update2} AFTER UPDATE OF {c} ON {t}
  WHEN OLD.{i} = NEW.{i} AND
       (NEW.{c} ISNULL OR ST_IsEmpty(NEW.{c}))
BEGIN
  DELETE FROM {r} WHERE id = OLD.{i};
END;

CREATE TRIGGER {update4} AFTER UPDATE ON {t}
  WHEN OLD.{i} != NEW.{i} AND
       (NEW.{c} ISNULL OR ST_IsEmpty(NEW.{c}))
BEGIN
  DELETE FROM {r} WHERE id IN (OLD.{i}, NEW.{i});
END;

CREATE TRIGGER {update5} AFTER UPDATE ON {t}
  WHEN OLD.{i} != NEW.{i} AND
       (NEW.{c} NOTNULL AND NOT ST_IsEmpty(NEW.{c}))
BEGIN
  DELETE FROM {r} WHERE id = OLD.{i};
  INSERT OR REPLACE INTO {r} VALUES (
    NEW.{i},
    ST_MinX(NEW.{c}), ST_MaxX(NEW.{c}),
    ST_MinY(NEW.{c}), ST_MaxY(NEW.{c})
  );
END;

CREATE TRIGGER {update6} AFTER UPDATE OF {c} ON {t}
  WHEN OLD.{i} = NEW.{i} AND
       (NEW.{c} NOTNULL AND NOT ST_IsEmpty(NEW.{c})) AND
       (OLD.{c} NOTNULL AND NOT ST_IsEmpty(OLD.{c}))
BEGIN
  UPDATE {r} SET
    minx = ST_MinX(NEW.{c}),
    maxx = ST_MaxX(NEW.{c}),
    miny = ST_MinY(NEW.{c}),
    maxy = ST_MaxY(NEW.{c})
  WHERE id = NEW.{i};
END;

CREATE TRIGGER {update7} AFTER UPDATE OF {c} ON {t}
  WHEN OLD.{i} = NEW.{i} AND
       (NEW.{c} NOTNULL AND NOT ST_IsEmpty(NEW.{c})) AND
       (OLD.{c} ISNULL OR ST_IsEmpty(OLD.{c}))
BEGIN
  INSERT INTO {r} VALUES (
    NEW.{i},
    ST_MinX(NEW.{c}), ST_MaxX(NEW.{c}),
    ST_MinY(NEW.{c}), ST_MaxY(NEW.{c})
  );
END;

CREATE TRIGGER {delete} AFTER DELETE ON {t}
  WHEN old.{c} NOT NULL
BEGIN
  DELETE FROM {r} WHERE id = OLD.{i};
END;",
        insert = trigger("insert"),
        update2 = trigger("update2"),
        update4 = trigger("update4"),
        update5 = trigger("update5"),
        update6 = trigger("update6"),
        update7 = trigger("update7"),
        delete = trigger("delete"),
    )
}

pub(crate) fn execute_rtree_sqls(
    conn: &rusqlite::Connection,
    table: &str,
    geom_column: &str,
    id_column: &str,
) -> crate::Result<()> {
    use crate::ident::{quote_catalog_identifier as quote, wrap};

    let rtree = rtree_table_name(table, geom_column);
    let r = quote(&rtree)?;
    let t = quote(table)?;
    let c = quote(geom_column)?;
    let i = quote(id_column)?;
    let trigger = |suffix: &str| wrap(&format!("{rtree}_{suffix}"));

    conn.execute_batch(&gpkg_rtree_create_sql(&r))?;
    conn.execute_batch(&gpkg_rtree_load_sql(&r, &t, &c, &i))?;
    conn.execute_batch(&gpkg_rtree_triggers_sql(&r, &t, &c, &i, &trigger))?;
    Ok(())
}

// ---- catalog discovery ------------------------------------------------------
//
// `schema` arguments of the functions below are already quoted identifiers.

pub(crate) const SQL_LIST_SCHEMAS: &str =
    "SELECT name FROM pragma_database_list WHERE name <> 'temp' ORDER BY seq";

pub(crate) const SQL_LIST_TABLES: &str = r"
SELECT name FROM pragma_table_list
WHERE schema = ?1
  AND type IN ('table', 'view')
  AND name NOT LIKE 'sqlite\_%' ESCAPE '\'
  AND name NOT LIKE 'gpkg\_%' ESCAPE '\'
  AND name NOT LIKE 'rtree\_%' ESCAPE '\'
ORDER BY name
";

pub(crate) const SQL_TABLE_EXISTS: &str =
    "SELECT EXISTS(SELECT 1 FROM pragma_table_list WHERE schema = ?1 AND name = ?2)";

pub(crate) const SQL_TABLE_COLUMNS: &str =
    r#"SELECT name, type, "notnull", pk FROM pragma_table_info(?1, ?2) ORDER BY cid"#;

pub(crate) fn sql_geometry_column_meta(schema: &str) -> String {
    format!(
        "SELECT column_name, geometry_type_name, srs_id FROM {schema}.gpkg_geometry_columns \
         WHERE table_name = ?1"
    )
}

pub(crate) fn sql_contents_meta(schema: &str) -> String {
    format!(
        "SELECT identifier, description, min_x, min_y, max_x, max_y FROM {schema}.gpkg_contents \
         WHERE table_name = ?1"
    )
}

pub(crate) fn sql_rtree_extent(schema: &str, quoted_rtree: &str) -> String {
    format!("SELECT min(minx), min(miny), max(maxx), max(maxy) FROM {schema}.{quoted_rtree}")
}

pub(crate) fn sql_row_estimate(schema: &str) -> String {
    format!(
        "SELECT stat FROM {schema}.sqlite_stat1 WHERE tbl = ?1 ORDER BY idx IS NOT NULL LIMIT 1"
    )
}
