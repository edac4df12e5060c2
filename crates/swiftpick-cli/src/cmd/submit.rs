use anyhow::{bail, Context};
use std::path::Path;
use swiftpick_sync::types::{EntityKind, EntityRef, Method};

use crate::output::print_json;

/// Enqueue an arbitrary mutating request. Delivery happens on the next
/// `drain` (or from the app's own drain loop).
pub fn run(
    root_dir: &Path,
    method: &str,
    path: &str,
    payload: Option<&str>,
    entity: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let method: Method = method.parse()?;
    let payload = match payload {
        Some(raw) => serde_json::from_str(raw).context("payload is not valid JSON")?,
        None => serde_json::Value::Null,
    };
    let entity = entity.map(parse_entity).transpose()?;

    let config = super::load_config(root_dir)?;
    let queue = super::open_queue(root_dir, &config)?;
    let id = queue.enqueue(method, path, payload, entity)?;

    if json {
        print_json(&serde_json::json!({"id": id}))?;
    } else {
        println!("Queued {method} {path} as {id}");
    }
    Ok(())
}

/// Parse `kind:id`, e.g. `pickup:7` or `bus_location:3`.
pub fn parse_entity(s: &str) -> anyhow::Result<EntityRef> {
    let Some((kind, id)) = s.split_once(':') else {
        bail!("entity must be kind:id, e.g. pickup:7");
    };
    let kind = match kind {
        "pickup" => EntityKind::Pickup,
        "trip" => EntityKind::Trip,
        "bus_location" => EntityKind::BusLocation,
        "admin_stats" => EntityKind::AdminStats,
        other => bail!("unknown entity kind: {other}"),
    };
    let id: i64 = id.parse().context("entity id must be an integer")?;
    Ok(EntityRef::new(kind, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kind_and_id() {
        assert_eq!(parse_entity("pickup:7").unwrap(), EntityRef::pickup(7));
        assert_eq!(
            parse_entity("bus_location:3").unwrap(),
            EntityRef::new(EntityKind::BusLocation, 3)
        );
    }

    #[test]
    fn rejects_malformed_entities() {
        assert!(parse_entity("pickup").is_err());
        assert!(parse_entity("rocket:1").is_err());
        assert!(parse_entity("pickup:x").is_err());
    }
}
