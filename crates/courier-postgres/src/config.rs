//! Schema, table, and column naming for the persisted event store.
//!
//! Every piece of SQL the adapters run is derived from these names, so a
//! deployment can nest the tables under its own schema or rename columns to
//! match house conventions. Migration scripts refer to the schema through
//! the literal `:SCHEMA` placeholder, substituted textually at runtime.

/// Default schema holding the events, routing, and migrations tables.
pub const DEFAULT_SCHEMA: &str = "opinionatedevents";

/// The `NOTIFY` channel for a given schema.
///
/// The insert trigger installed by the migrations notifies
/// `{schema}_events` with the queue name as payload; sources listening with
/// [`crate::NotifyTrigger`] should use this name.
pub fn notify_channel(schema: &str) -> String {
    format!("{schema}_events")
}

/// Replaces the `:SCHEMA` placeholder in a SQL script.
pub(crate) fn with_schema(sql: &str, schema: &str) -> String {
    sql.replace(":SCHEMA", schema)
}

/// Name and column layout of the events table.
#[derive(Debug, Clone)]
pub struct EventsTable {
    /// Table name, unqualified.
    pub name: String,
    /// Column names.
    pub columns: EventColumns,
}

impl Default for EventsTable {
    fn default() -> Self {
        Self { name: "events".to_string(), columns: EventColumns::default() }
    }
}

impl EventsTable {
    /// The schema-qualified table reference.
    pub(crate) fn qualified(&self, schema: &str) -> String {
        format!("{schema}.{}", self.name)
    }
}

/// Column names of the events table.
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct EventColumns {
    pub id: String,
    pub uuid: String,
    pub name: String,
    pub topic: String,
    pub queue: String,
    pub payload: String,
    pub status: String,
    pub published_at: String,
    pub deliver_at: String,
    pub delivery_attempts: String,
}

impl Default for EventColumns {
    fn default() -> Self {
        Self {
            id: "id".to_string(),
            uuid: "uuid".to_string(),
            name: "name".to_string(),
            topic: "topic".to_string(),
            queue: "queue".to_string(),
            payload: "payload".to_string(),
            status: "status".to_string(),
            published_at: "published_at".to_string(),
            deliver_at: "deliver_at".to_string(),
            delivery_attempts: "delivery_attempts".to_string(),
        }
    }
}
