//! redb table definitions for the Swell state store.

use redb::TableDefinition;

/// Scaling-event state keyed by the record's state path,
/// `{root}/state/jobs/{job}/{group}`.
pub const SCALING_STATE: TableDefinition<&str, &[u8]> = TableDefinition::new("scaling_state");
