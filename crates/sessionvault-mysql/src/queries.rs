//! SQL text for a configured session table

use sessionvault_core::TableSchema;

/// Statements are rendered once per backend; identifiers are validated by
/// `TableSchema::validate` before they get here.
#[derive(Debug)]
pub(crate) struct Queries {
    pub fetch: String,
    pub fetch_for_update: String,
    pub insert: String,
    pub upsert: String,
    pub delete: String,
    pub delete_expired: String,
    pub create_table: String,
}

fn quote(ident: &str) -> String {
    format!("`{}`", ident)
}

impl Queries {
    pub fn new(schema: &TableSchema) -> Self {
        let table = quote(&schema.table);
        let id = quote(&schema.id_column);
        let expiry = quote(&schema.expiry_column);
        let data = quote(&schema.data_column);

        let fetch = format!(
            "SELECT {data}, {expiry} FROM {table} WHERE {id} = ?",
            data = data,
            expiry = expiry,
            table = table,
            id = id
        );

        Self {
            fetch_for_update: format!("{} FOR UPDATE", fetch),
            fetch,
            insert: format!(
                "INSERT INTO {table} ({id}, {expiry}, {data}) VALUES (?, ?, ?)",
                table = table,
                id = id,
                expiry = expiry,
                data = data
            ),
            upsert: format!(
                "INSERT INTO {table} ({id}, {expiry}, {data}) VALUES (?, ?, ?) \
                 ON DUPLICATE KEY UPDATE {data} = VALUES({data}), \
                 {expiry} = GREATEST({expiry}, VALUES({expiry}))",
                table = table,
                id = id,
                expiry = expiry,
                data = data
            ),
            delete: format!("DELETE FROM {} WHERE {} = ?", table, id),
            delete_expired: format!("DELETE FROM {} WHERE {} < ?", table, expiry),
            create_table: format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    {id} VARBINARY(128) NOT NULL,
                    {expiry} BIGINT NOT NULL,
                    {data} MEDIUMBLOB NOT NULL,
                    PRIMARY KEY ({id}),
                    KEY `idx_expiry` ({expiry})
                ) ENGINE=InnoDB
                "#,
                table = table,
                id = id,
                expiry = expiry,
                data = data
            ),
        }
    }
}
