//! Short ID prefix resolution for flow commands.
//!
//! Any unique prefix of a flow UUID is accepted, similar to git short hashes.

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

const FLOW_QUERY: &str = "SELECT id FROM flows WHERE id LIKE ? ORDER BY id";

fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        bail!("ID prefix must not be empty");
    }
    if !prefix.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
        bail!("Invalid ID prefix '{prefix}': must contain only hex characters and dashes");
    }
    Ok(())
}

/// Resolve a flow ID prefix to a full UUID.
pub async fn resolve_flow_id(pool: &SqlitePool, prefix: &str) -> Result<Uuid> {
    if let Ok(uuid) = Uuid::parse_str(prefix) {
        return Ok(uuid);
    }

    validate_prefix(prefix)?;

    let rows: Vec<(String,)> = sqlx::query_as(FLOW_QUERY)
        .bind(format!("{}%", prefix.to_lowercase()))
        .fetch_all(pool)
        .await?;

    match rows.as_slice() {
        [] => bail!("No flow found matching '{prefix}'"),
        [(id,)] => Ok(Uuid::parse_str(id)?),
        many => {
            let mut msg = format!("Ambiguous prefix '{prefix}': matches {} flows:", many.len());
            for (id,) in many {
                msg.push_str("\n  ");
                msg.push_str(id);
            }
            bail!("{msg}")
        }
    }
}
