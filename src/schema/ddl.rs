//! SQL text for the star schema.

use std::fmt::Write as _;

use crate::loader::STAGING_TABLE;

/// First year with a fact partition.
pub const FIRST_PARTITION_YEAR: i32 = 2012;
/// Last year with a fact partition.
pub const LAST_PARTITION_YEAR: i32 = 2025;
/// Partitioned fact table.
pub const FACT_TABLE: &str = "fact_sales";
/// Dimension tables, in drop order.
pub const DIMENSION_TABLES: [&str; 4] = ["dim_date", "dim_store", "dim_product", "dim_vendor"];

/// Name of the partition holding `year`.
pub fn partition_name(year: i32) -> String {
    format!("{FACT_TABLE}_{year}")
}

/// Star-schema tables already present in `public`.
pub(crate) const EXISTING_TABLES_SQL: &str = "\
SELECT tablename FROM pg_tables
WHERE schemaname = 'public'
  AND (tablename IN ('fact_sales', 'dim_date', 'dim_store', 'dim_product', 'dim_vendor')
       OR tablename LIKE 'fact\\_sales\\_%')
ORDER BY tablename";

pub(crate) const POSTGIS_AVAILABLE_SQL: &str =
    "SELECT EXISTS (SELECT 1 FROM pg_available_extensions WHERE name = 'postgis')";

pub(crate) const ENABLE_POSTGIS_SQL: &str = "CREATE EXTENSION IF NOT EXISTS postgis;\n";

const DIMENSIONS: &str = r#"
CREATE TABLE dim_date (
    date_key     SERIAL PRIMARY KEY,
    date         DATE NOT NULL UNIQUE,
    year         INTEGER NOT NULL,
    quarter      INTEGER NOT NULL CHECK (quarter BETWEEN 1 AND 4),
    month        INTEGER NOT NULL CHECK (month BETWEEN 1 AND 12),
    day          INTEGER NOT NULL CHECK (day BETWEEN 1 AND 31),
    day_of_week  INTEGER NOT NULL CHECK (day_of_week BETWEEN 1 AND 7),
    is_weekend   BOOLEAN NOT NULL
);

CREATE TABLE dim_store (
    store_key      SERIAL PRIMARY KEY,
    store_number   INTEGER NOT NULL UNIQUE,
    store_name     TEXT,
    address        TEXT,
    city           TEXT,
    zip_code       TEXT,
    county         TEXT,
    county_number  INTEGER CHECK (county_number BETWEEN 1 AND 99),
    location_geom  geometry(Point, 4326)
);
CREATE INDEX idx_dim_store_location ON dim_store USING GIST (location_geom);
CREATE INDEX idx_dim_store_county ON dim_store (county_number);

CREATE TABLE dim_product (
    product_key       SERIAL PRIMARY KEY,
    item_number       INTEGER NOT NULL UNIQUE,
    item_description  TEXT,
    category_number   INTEGER,
    category_name     TEXT,
    pack              INTEGER NOT NULL CHECK (pack > 0),
    bottle_volume_ml  INTEGER NOT NULL CHECK (bottle_volume_ml > 0)
);
CREATE INDEX idx_dim_product_description
    ON dim_product USING GIN (to_tsvector('english', coalesce(item_description, '')));

CREATE TABLE dim_vendor (
    vendor_key     SERIAL PRIMARY KEY,
    vendor_number  INTEGER NOT NULL UNIQUE,
    vendor_name    TEXT NOT NULL
);
"#;

const FACTS: &str = r#"
CREATE TABLE fact_sales (
    sale_key             BIGSERIAL,
    date_key             INTEGER NOT NULL REFERENCES dim_date (date_key),
    year                 INTEGER NOT NULL,
    store_key            INTEGER NOT NULL REFERENCES dim_store (store_key),
    product_key          INTEGER NOT NULL REFERENCES dim_product (product_key),
    vendor_key           INTEGER NOT NULL REFERENCES dim_vendor (vendor_key),
    invoice_item_number  TEXT NOT NULL,
    state_bottle_cost    NUMERIC(10, 2) NOT NULL CHECK (state_bottle_cost >= 0),
    state_bottle_retail  NUMERIC(10, 2) NOT NULL CHECK (state_bottle_retail >= 0),
    bottles_sold         INTEGER NOT NULL CHECK (bottles_sold > 0),
    sale_dollars         NUMERIC(12, 2) NOT NULL CHECK (sale_dollars >= 0),
    volume_sold_liters   NUMERIC(10, 2) NOT NULL CHECK (volume_sold_liters >= 0),
    volume_sold_gallons  NUMERIC(10, 2) NOT NULL CHECK (volume_sold_gallons >= 0),
    PRIMARY KEY (sale_key, year),
    UNIQUE (invoice_item_number, year)
) PARTITION BY RANGE (year);
"#;

const FACT_INDEXES: &str = r#"
CREATE INDEX idx_fact_sales_date ON fact_sales (date_key);
CREATE INDEX idx_fact_sales_store ON fact_sales (store_key);
CREATE INDEX idx_fact_sales_product ON fact_sales (product_key);
CREATE INDEX idx_fact_sales_vendor ON fact_sales (vendor_key);
"#;

/// Full DDL: dimensions, the partitioned fact table, one partition per year.
pub fn create_sql() -> String {
    let mut sql = String::from(DIMENSIONS);
    sql.push_str(FACTS);
    for year in FIRST_PARTITION_YEAR..=LAST_PARTITION_YEAR {
        let _ = writeln!(
            sql,
            "CREATE TABLE {} PARTITION OF {FACT_TABLE} FOR VALUES FROM ({year}) TO ({});",
            partition_name(year),
            year + 1
        );
    }
    sql.push_str(FACT_INDEXES);
    sql
}

/// Drops partitions first, then the fact table, then the dimensions.
pub fn drop_sql(partitions: &[String]) -> String {
    let mut sql = String::new();
    for partition in partitions {
        let _ = writeln!(sql, "DROP TABLE IF EXISTS {partition} CASCADE;");
    }
    let _ = writeln!(sql, "DROP TABLE IF EXISTS {FACT_TABLE} CASCADE;");
    for table in DIMENSION_TABLES {
        let _ = writeln!(sql, "DROP TABLE IF EXISTS {table} CASCADE;");
    }
    sql
}

/// Fills every star table from the staging table, then analyzes them.
///
/// Rows are skipped rather than rejected: non-positive measures, unknown
/// dimension keys and years without a partition never reach the fact table,
/// and an already loaded `(invoice_item_number, year)` is left untouched.
pub fn populate_sql() -> String {
    format!(
        r#"
CREATE FUNCTION pg_temp.to_key(raw TEXT) RETURNS INTEGER
LANGUAGE sql IMMUTABLE AS $$
    SELECT CASE
        WHEN regexp_replace(lower(trim(raw)), '^x', '') ~ '^[0-9]{{1,9}}(\.0+)?$'
        THEN regexp_replace(lower(trim(raw)), '^x', '')::NUMERIC::INTEGER
    END
$$;

INSERT INTO dim_date (date, year, quarter, month, day, day_of_week, is_weekend)
SELECT DISTINCT
    date,
    EXTRACT(YEAR FROM date)::INTEGER,
    EXTRACT(QUARTER FROM date)::INTEGER,
    EXTRACT(MONTH FROM date)::INTEGER,
    EXTRACT(DAY FROM date)::INTEGER,
    EXTRACT(ISODOW FROM date)::INTEGER,
    EXTRACT(ISODOW FROM date) IN (6, 7)
FROM {staging}
WHERE date IS NOT NULL
ON CONFLICT (date) DO NOTHING;

INSERT INTO dim_store (store_number, store_name, address, city, zip_code, county,
                       county_number, location_geom)
SELECT DISTINCT ON (store_number)
    store_number,
    trim(store_name),
    trim(address),
    trim(city),
    trim(zip_code),
    trim(county),
    CASE WHEN pg_temp.to_key(county_number) BETWEEN 1 AND 99
         THEN pg_temp.to_key(county_number) END,
    CASE WHEN store_location ~ '^POINT ?\(-?[0-9.]+ -?[0-9.]+\)$'
         THEN ST_GeomFromText(store_location, 4326) END
FROM {staging}
WHERE store_number > 0
ORDER BY store_number, date DESC NULLS LAST
ON CONFLICT (store_number) DO UPDATE SET
    store_name = EXCLUDED.store_name,
    address = EXCLUDED.address,
    city = EXCLUDED.city,
    zip_code = EXCLUDED.zip_code,
    county = EXCLUDED.county,
    county_number = EXCLUDED.county_number,
    location_geom = EXCLUDED.location_geom;

INSERT INTO dim_product (item_number, item_description, category_number, category_name,
                         pack, bottle_volume_ml)
SELECT DISTINCT ON (pg_temp.to_key(item_number))
    pg_temp.to_key(item_number),
    trim(item_description),
    coalesce(pg_temp.to_key(category), 0),
    coalesce(nullif(trim(category_name), ''), 'Uncategorized'),
    CASE WHEN pack > 0 THEN pack ELSE 1 END,
    CASE WHEN bottle_volume_ml > 0 THEN bottle_volume_ml ELSE 750 END
FROM {staging}
WHERE pg_temp.to_key(item_number) IS NOT NULL
ORDER BY pg_temp.to_key(item_number), date DESC NULLS LAST
ON CONFLICT (item_number) DO UPDATE SET
    item_description = EXCLUDED.item_description,
    category_number = EXCLUDED.category_number,
    category_name = EXCLUDED.category_name,
    pack = EXCLUDED.pack,
    bottle_volume_ml = EXCLUDED.bottle_volume_ml;

INSERT INTO dim_vendor (vendor_number, vendor_name)
SELECT DISTINCT ON (vendor) vendor, name
FROM (
    SELECT pg_temp.to_key(vendor_number) AS vendor, trim(vendor_name) AS name, count(*) AS uses
    FROM {staging}
    WHERE pg_temp.to_key(vendor_number) > 0 AND nullif(trim(vendor_name), '') IS NOT NULL
    GROUP BY 1, 2
) named
ORDER BY vendor, uses DESC, name
ON CONFLICT (vendor_number) DO UPDATE SET vendor_name = EXCLUDED.vendor_name;

INSERT INTO fact_sales (date_key, year, store_key, product_key, vendor_key,
                        invoice_item_number, state_bottle_cost, state_bottle_retail,
                        bottles_sold, sale_dollars, volume_sold_liters, volume_sold_gallons)
SELECT
    d.date_key, d.year, s.store_key, p.product_key, v.vendor_key,
    trim(st.invoice_item_number),
    st.state_bottle_cost, st.state_bottle_retail, st.bottles_sold,
    st.sale_dollars, st.volume_sold_liters, st.volume_sold_gallons
FROM {staging} st
JOIN dim_date d ON d.date = st.date
JOIN dim_store s ON s.store_number = st.store_number
JOIN dim_product p ON p.item_number = pg_temp.to_key(st.item_number)
JOIN dim_vendor v ON v.vendor_number = pg_temp.to_key(st.vendor_number)
WHERE nullif(trim(st.invoice_item_number), '') IS NOT NULL
  AND st.state_bottle_cost > 0
  AND st.state_bottle_retail > 0
  AND st.bottles_sold > 0
  AND st.sale_dollars > 0
  AND st.volume_sold_liters > 0
  AND st.volume_sold_gallons > 0
  AND d.year BETWEEN {first} AND {last}
ON CONFLICT (invoice_item_number, year) DO NOTHING;

ANALYZE dim_date;
ANALYZE dim_store;
ANALYZE dim_product;
ANALYZE dim_vendor;
ANALYZE fact_sales;
"#,
        staging = STAGING_TABLE,
        first = FIRST_PARTITION_YEAR,
        last = LAST_PARTITION_YEAR,
    )
}

/// Row counts of every star table, one `name|count` row each.
pub(crate) const COUNTS_SQL: &str = "\
SELECT 'dim_date', count(*) FROM dim_date
UNION ALL SELECT 'dim_store', count(*) FROM dim_store
UNION ALL SELECT 'dim_product', count(*) FROM dim_product
UNION ALL SELECT 'dim_vendor', count(*) FROM dim_vendor
UNION ALL SELECT 'fact_sales', count(*) FROM fact_sales";
