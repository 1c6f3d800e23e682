//! SQL text for a configured session table

use sessionvault_core::TableSchema;

#[derive(Debug)]
pub(crate) struct Queries {
    pub fetch: String,
    pub insert: String,
    pub upsert: String,
    pub delete: String,
    pub delete_expired: String,
    pub create_table: String,
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident)
}

impl Queries {
    pub fn new(schema: &TableSchema) -> Self {
        let table = quote(&schema.table);
        let id = quote(&schema.id_column);
        let expiry = quote(&schema.expiry_column);
        let data = quote(&schema.data_column);
        // Index names share one namespace per database.
        let index = quote(&format!("{}_expiry_idx", schema.table));

        Self {
            fetch: format!("SELECT {}, {} FROM {} WHERE {} = ?", data, expiry, table, id),
            insert: format!(
                "INSERT INTO {table} ({id}, {expiry}, {data}) VALUES (?, ?, ?)",
                table = table,
                id = id,
                expiry = expiry,
                data = data
            ),
            upsert: format!(
                "INSERT INTO {table} ({id}, {expiry}, {data}) VALUES (?, ?, ?) \
                 ON CONFLICT({id}) DO UPDATE SET {data} = excluded.{data}, \
                 {expiry} = MAX({expiry}, excluded.{expiry})",
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
                    {id} TEXT NOT NULL PRIMARY KEY,
                    {expiry} INTEGER NOT NULL,
                    {data} BLOB NOT NULL
                );
                CREATE INDEX IF NOT EXISTS {index} ON {table} ({expiry});
                "#,
                table = table,
                id = id,
                expiry = expiry,
                data = data,
                index = index
            ),
        }
    }
}
