//! Rebuilding a device's cache from `Server.GetStatus`.
//!
//! The status document is walked field by field: anything missing or of the
//! wrong JSON type degrades to its zero value instead of failing the sync.

use std::collections::HashMap;

use serde_json::{Map, Value};
use snapdeck_rpc::method;
use snapdeck_types::{Client, Stream};
use tracing::{debug, warn};

use crate::device::{Device, DeviceCache};
use crate::error::CommandError;

/// Fetch the server status and publish it as the device's new cache.
///
/// Does nothing when no session is installed.
///
/// # Errors
///
/// Returns the request failure. The previous cache stays in place.
pub async fn sync(device: &Device) -> Result<(), CommandError> {
    let Some(session) = device.session().await else {
        debug!("[{}] Skipping sync, not connected", device.name());
        return Ok(());
    };

    let status = match session.request(method::SERVER_GET_STATUS, None).await {
        Ok(status) => status,
        Err(e) => {
            warn!("[{}] Failed to sync server status: {}", device.name(), e);
            return Err(e.into());
        }
    };

    let cache = parse_status(&status);
    debug!(
        "[{}] Synced {} clients, {} streams",
        device.name(),
        cache.clients.len(),
        cache.streams.len()
    );
    device.publish(cache).await;
    Ok(())
}

/// Build a cache from a `Server.GetStatus` result.
///
/// Clients without an id are skipped; they cannot be addressed by any
/// command.
#[must_use]
pub fn parse_status(result: &Value) -> DeviceCache {
    let server = result.get("server");

    let streams = array(server.and_then(|s| s.get("streams")))
        .filter_map(Value::as_object)
        .map(parse_stream)
        .collect();

    let mut clients = Vec::new();
    let mut client_groups = HashMap::new();

    for group in array(server.and_then(|s| s.get("groups"))).filter_map(Value::as_object) {
        let group_id = get_str(group, "id");
        let stream_id = get_str(group, "stream_id");

        for client in array(group.get("clients")).filter_map(Value::as_object) {
            let client = parse_client(client, &stream_id);
            if client.id.is_empty() {
                continue;
            }
            client_groups.insert(client.id.clone(), group_id.clone());
            clients.push(client);
        }
    }

    DeviceCache {
        clients,
        streams,
        client_groups,
    }
}

fn parse_stream(stream: &Map<String, Value>) -> Stream {
    Stream {
        id: get_str(stream, "id"),
        status: get_str(stream, "status"),
        meta: stream
            .get("meta")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
    }
}

fn parse_client(client: &Map<String, Value>, stream_id: &str) -> Client {
    let config = client.get("config").and_then(Value::as_object);
    let volume = config
        .and_then(|c| c.get("volume"))
        .and_then(Value::as_object);

    let mut name = config.map(|c| get_str(c, "name")).unwrap_or_default();
    if name.is_empty() {
        name = client
            .get("host")
            .and_then(Value::as_object)
            .map(|h| get_str(h, "name"))
            .unwrap_or_default();
    }

    Client {
        id: get_str(client, "id"),
        connected: get_bool(client, "connected"),
        name,
        latency: config.map_or(0, |c| get_u32(c, "latency")),
        muted: volume.is_some_and(|v| get_bool(v, "muted")),
        volume: volume.map_or(0, |v| get_percent(v, "percent")),
        stream: stream_id.to_string(),
    }
}

/// Elements of `value` when it is an array, nothing otherwise
fn array(value: Option<&Value>) -> impl Iterator<Item = &Value> {
    value.and_then(Value::as_array).into_iter().flatten()
}

fn get_str(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn get_bool(obj: &Map<String, Value>, key: &str) -> bool {
    obj.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// JSON numbers may carry a fraction; truncate and clamp into `u32`.
// Range is checked before the cast, so it cannot wrap
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn get_u32(obj: &Map<String, Value>, key: &str) -> u32 {
    let Some(n) = obj.get(key).and_then(Value::as_f64) else {
        return 0;
    };
    if n.is_nan() || n <= 0.0 {
        return 0;
    }
    n.trunc().min(f64::from(u32::MAX)) as u32
}

fn get_percent(obj: &Map<String, Value>, key: &str) -> u8 {
    u8::try_from(get_u32(obj, key).min(100)).unwrap_or(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn single_group_status() -> Value {
        json!({
            "server": {
                "groups": [{
                    "id": "g1",
                    "stream_id": "s1",
                    "clients": [{
                        "id": "c1",
                        "connected": true,
                        "config": {
                            "name": "Kitchen",
                            "latency": 20,
                            "volume": {"percent": 42, "muted": false}
                        }
                    }]
                }],
                "streams": [{
                    "id": "s1",
                    "status": "playing",
                    "meta": {"STREAM": "s1"}
                }]
            }
        })
    }

    #[test]
    fn test_single_group_example() {
        let cache = parse_status(&single_group_status());

        assert_eq!(cache.clients.len(), 1);
        let client = &cache.clients[0];
        assert_eq!(client.id, "c1");
        assert_eq!(client.stream, "s1");
        assert_eq!(client.name, "Kitchen");
        assert_eq!(client.latency, 20);
        assert_eq!(client.volume, 42);
        assert!(client.connected);
        assert!(!client.muted);

        assert_eq!(
            cache.client_groups,
            HashMap::from([("c1".to_string(), "g1".to_string())])
        );

        assert_eq!(cache.streams.len(), 1);
        assert_eq!(cache.streams[0].id, "s1");
        assert_eq!(cache.streams[0].status, "playing");
        assert_eq!(cache.streams[0].meta.get("STREAM"), Some(&json!("s1")));
    }

    #[test]
    fn test_index_matches_group_membership() {
        let status = json!({
            "server": {
                "groups": [
                    {"id": "g1", "stream_id": "s1", "clients": [{"id": "a"}, {"id": "b"}]},
                    {"id": "g2", "stream_id": "s2", "clients": [{"id": "c"}]},
                    {"id": "g3", "stream_id": "s1", "clients": []}
                ],
                "streams": []
            }
        });

        let cache = parse_status(&status);
        let mut ids: Vec<_> = cache.client_groups.keys().cloned().collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(cache.group_of("a"), Some("g1"));
        assert_eq!(cache.group_of("b"), Some("g1"));
        assert_eq!(cache.group_of("c"), Some("g2"));

        let streams: Vec<_> = cache.clients.iter().map(|c| c.stream.as_str()).collect();
        assert_eq!(streams, vec!["s1", "s1", "s2"]);
    }

    #[test]
    fn test_parse_is_idempotent() {
        let status = single_group_status();
        assert_eq!(parse_status(&status), parse_status(&status));
    }

    #[test]
    fn test_missing_volume_is_unmuted_zero() {
        let status = json!({
            "server": {
                "groups": [{"id": "g1", "stream_id": "s1", "clients": [
                    {"id": "c1", "connected": true, "config": {"name": "Den", "latency": 0}}
                ]}]
            }
        });

        let client = &parse_status(&status).clients[0];
        assert!(!client.muted);
        assert_eq!(client.volume, 0);
        assert_eq!(client.name, "Den");
    }

    #[test]
    fn test_name_falls_back_to_host_name() {
        let status = json!({
            "server": {
                "groups": [{"id": "g1", "stream_id": "s1", "clients": [
                    {"id": "c1", "config": {"name": ""}, "host": {"name": "raspberrypi"}},
                    {"id": "c2", "host": {"name": "livingroom-pi"}}
                ]}]
            }
        });

        let cache = parse_status(&status);
        assert_eq!(cache.clients[0].name, "raspberrypi");
        assert_eq!(cache.clients[1].name, "livingroom-pi");
    }

    #[test]
    fn test_numbers_are_truncated_and_clamped() {
        let status = json!({
            "server": {
                "groups": [{"id": "g1", "stream_id": "s1", "clients": [
                    {"id": "c1", "config": {"latency": 12.9, "volume": {"percent": 150.0}}},
                    {"id": "c2", "config": {"latency": -5, "volume": {"percent": -1}}},
                    {"id": "c3", "config": {"latency": "20", "volume": {"percent": "50", "muted": "yes"}}}
                ]}]
            }
        });

        let cache = parse_status(&status);
        assert_eq!(cache.clients[0].latency, 12);
        assert_eq!(cache.clients[0].volume, 100);
        assert_eq!(cache.clients[1].latency, 0);
        assert_eq!(cache.clients[1].volume, 0);
        assert_eq!(cache.clients[2].latency, 0);
        assert_eq!(cache.clients[2].volume, 0);
        assert!(!cache.clients[2].muted);
    }

    #[test]
    fn test_missing_sections_yield_empty_cache() {
        assert_eq!(parse_status(&json!({})), DeviceCache::default());
        assert_eq!(parse_status(&json!({"server": {}})), DeviceCache::default());
        assert_eq!(parse_status(&Value::Null), DeviceCache::default());
        assert_eq!(
            parse_status(&json!({"server": {"groups": "nope", "streams": 7}})),
            DeviceCache::default()
        );
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let status = json!({
            "server": {
                "groups": [
                    "not a group",
                    {"id": "g1", "stream_id": "s1", "clients": [42, {"config": {}}, {"id": "c1"}]}
                ],
                "streams": [null, {"id": "s1"}]
            }
        });

        let cache = parse_status(&status);
        assert_eq!(cache.clients.len(), 1);
        assert_eq!(cache.clients[0].id, "c1");
        assert_eq!(cache.client_groups.len(), 1);
        assert_eq!(cache.streams.len(), 1);
        assert_eq!(cache.streams[0].status, "");
        assert!(cache.streams[0].meta.is_empty());
    }
}
