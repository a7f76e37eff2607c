//! Property tests for option resolution.

use std::path::Path;

use proptest::prelude::*;
use syncbox_engine::config::parse_byte_size;
use syncbox_engine::{resolve_run_config, RunOptions};

const KEYS: [&str; 4] = ["host", "port", "ssl.mode", "ssl.verify"];

fn inline(overrides: Vec<String>) -> RunOptions {
    RunOptions {
        source_image: Some("acme/src".into()),
        destination_image: Some("acme/dst".into()),
        overrides,
        ..RunOptions::default()
    }
}

proptest! {
    #[test]
    fn last_override_for_each_key_wins(
        assignments in prop::collection::vec((0..KEYS.len(), any::<i64>()), 1..24)
    ) {
        let overrides = assignments
            .iter()
            .map(|(key, value)| format!("src.{}={value}", KEYS[*key]))
            .collect();
        let config = resolve_run_config(&inline(overrides), Path::new("/work")).unwrap();

        for (index, key) in KEYS.iter().enumerate() {
            let expected = assignments
                .iter()
                .rev()
                .find(|(k, _)| *k == index)
                .map(|(_, v)| *v);
            let pointer = format!("/{}", key.replace('.', "/"));
            let actual = config.source.config.pointer(&pointer).and_then(serde_json::Value::as_i64);
            prop_assert_eq!(actual, expected, "key {}", key);
        }
        prop_assert_eq!(config.destination.config, serde_json::json!({}));
    }

    #[test]
    fn byte_size_units_are_binary(n in 0u64..4096, unit in prop::sample::select(vec![
        ("", 1u64), ("k", 1024), ("MiB", 1024 * 1024), ("g", 1024 * 1024 * 1024),
    ])) {
        let (suffix, multiplier) = unit;
        prop_assert_eq!(parse_byte_size(&format!("{n}{suffix}")).unwrap(), n * multiplier);
    }
}
