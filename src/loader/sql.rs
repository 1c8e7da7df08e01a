use std::path::Path;

use super::STAGING_TABLE;

/// One script of the load pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlStep {
    /// Human-readable name, also used for the temp file.
    pub name: &'static str,
    /// Script body.
    pub sql: String,
}

/// One inspection query run after the load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationQuery {
    /// Heading printed above the result.
    pub title: &'static str,
    /// Statement.
    pub sql: &'static str,
}

fn staging_ddl() -> String {
    format!(
        "DROP TABLE IF EXISTS {STAGING_TABLE};
CREATE TABLE {STAGING_TABLE} (
    invoice_item_number  TEXT,
    date                 TEXT,
    store_number         INTEGER,
    store_name           TEXT,
    address              TEXT,
    city                 TEXT,
    zip_code             TEXT,
    store_location       TEXT,
    county_number        TEXT,
    county               TEXT,
    category             TEXT,
    category_name        TEXT,
    vendor_number        TEXT,
    vendor_name          TEXT,
    item_number          TEXT,
    item_description     TEXT,
    pack                 INTEGER,
    bottle_volume_ml     INTEGER,
    state_bottle_cost    NUMERIC(10, 2),
    state_bottle_retail  NUMERIC(10, 2),
    bottles_sold         INTEGER,
    sale_dollars         NUMERIC(12, 2),
    volume_sold_liters   NUMERIC(10, 2),
    volume_sold_gallons  NUMERIC(10, 2)
);
"
    )
}

/// Single-quoted argument for a psql meta-command.
fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

/// The load pipeline in execution order.
pub fn load_steps(csv: &Path) -> Vec<SqlStep> {
    vec![
        SqlStep {
            name: "create staging table",
            sql: staging_ddl(),
        },
        SqlStep {
            name: "load csv",
            sql: format!(
                "ALTER TABLE {STAGING_TABLE} SET UNLOGGED;\n\
                 \\copy {STAGING_TABLE} FROM {} WITH (FORMAT csv, HEADER true)\n",
                quote_literal(&csv.display().to_string())
            ),
        },
        SqlStep {
            name: "normalize dates",
            sql: format!(
                "ALTER TABLE {STAGING_TABLE} ADD COLUMN sale_date DATE;
UPDATE {STAGING_TABLE} SET sale_date = to_date(date, 'MM/DD/YYYY');
ALTER TABLE {STAGING_TABLE} DROP COLUMN date;
ALTER TABLE {STAGING_TABLE} RENAME COLUMN sale_date TO date;
"
            ),
        },
        SqlStep {
            name: "restore logging",
            sql: format!("ALTER TABLE {STAGING_TABLE} SET LOGGED;\n"),
        },
        SqlStep {
            name: "create indexes",
            sql: format!(
                "CREATE INDEX idx_staging_date ON {STAGING_TABLE} (date);
CREATE INDEX idx_staging_store ON {STAGING_TABLE} (store_number);
CREATE INDEX idx_staging_item ON {STAGING_TABLE} (item_number);
CREATE INDEX idx_staging_county ON {STAGING_TABLE} (county);
"
            ),
        },
        SqlStep {
            name: "analyze",
            sql: format!("ANALYZE {STAGING_TABLE};\n"),
        },
    ]
}

/// Eight inspection queries. Output is for a human; nothing here passes or fails.
pub const VALIDATIONS: [ValidationQuery; 8] = [
    ValidationQuery {
        title: "Row count",
        sql: "SELECT count(*) FROM liquor_sales_staging",
    },
    ValidationQuery {
        title: "Date range",
        sql: "SELECT min(date), max(date), count(DISTINCT date) FROM liquor_sales_staging",
    },
    ValidationQuery {
        title: "Top 5 counties by sales",
        sql: "SELECT county, sum(sale_dollars) AS total_sales FROM liquor_sales_staging \
              GROUP BY county ORDER BY total_sales DESC NULLS LAST LIMIT 5",
    },
    ValidationQuery {
        title: "Vendor numbers with several names",
        sql: "SELECT vendor_number, count(DISTINCT vendor_name) AS names FROM liquor_sales_staging \
              GROUP BY vendor_number HAVING count(DISTINCT vendor_name) > 1 \
              ORDER BY names DESC, vendor_number LIMIT 10",
    },
    ValidationQuery {
        title: "NULL audit",
        sql: "SELECT 'date', count(*) - count(date) FROM liquor_sales_staging \
              UNION ALL SELECT 'store_number', count(*) - count(store_number) FROM liquor_sales_staging \
              UNION ALL SELECT 'item_number', count(*) - count(item_number) FROM liquor_sales_staging \
              UNION ALL SELECT 'bottles_sold', count(*) - count(bottles_sold) FROM liquor_sales_staging \
              UNION ALL SELECT 'sale_dollars', count(*) - count(sale_dollars) FROM liquor_sales_staging",
    },
    ValidationQuery {
        title: "Retail below cost",
        sql: "SELECT count(*) FROM liquor_sales_staging WHERE state_bottle_retail < state_bottle_cost",
    },
    ValidationQuery {
        title: "Query plan smoke test",
        sql: "EXPLAIN ANALYZE SELECT store_number, sum(sale_dollars) FROM liquor_sales_staging \
              WHERE date >= DATE '2020-01-01' GROUP BY store_number",
    },
    ValidationQuery {
        title: "Sample rows",
        sql: "SELECT * FROM liquor_sales_staging LIMIT 5",
    },
];
