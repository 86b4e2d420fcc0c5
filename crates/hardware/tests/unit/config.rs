//! Configuration deserialization.

use runahead_core::config::{Config, RunaheadExitPolicy};

#[test]
fn test_json_overrides_defaults() {
    let text = r#"{
        "pipeline": { "commit_width": 2, "squash_width": 4, "needs_tso": true },
        "runahead": {
            "lll_depth_threshold": 3,
            "runahead_exit_policy": "MinimumWork",
            "min_runahead_work": 25,
            "runahead_cache_size": 1024,
            "runahead_cache_block_size": 32
        },
        "memory": { "level_latencies": [1, 8, 30], "port_slots": 2 },
        "trace": false
    }"#;

    let config: Config = serde_json::from_str(text).expect("config parses");
    assert_eq!(config.pipeline.commit_width, 2);
    assert_eq!(config.pipeline.squash_width, 4);
    assert!(config.pipeline.needs_tso);
    assert_eq!(config.runahead.lll_depth_threshold, 3);
    assert_eq!(config.runahead.runahead_exit_policy, RunaheadExitPolicy::MinimumWork);
    assert_eq!(config.runahead.min_runahead_work, 25);
    assert_eq!(config.runahead.runahead_cache_size, 1024);
    assert_eq!(config.memory.level_latencies, vec![1, 8, 30]);

    // Unset sections keep their defaults.
    assert_eq!(config.pipeline.rename_width, Config::default().pipeline.rename_width);
    assert_eq!(
        config.runahead.runahead_exit_deadline,
        Config::default().runahead.runahead_exit_deadline
    );
}

#[test]
fn test_empty_object_is_default() {
    let config: Config = serde_json::from_str("{}").expect("parses");
    assert!(config.runahead.enable_runahead);
    assert_eq!(config.runahead.runahead_exit_policy, RunaheadExitPolicy::Eager);
}

#[test]
fn test_unknown_policy_rejected() {
    let text = r#"{ "runahead": { "runahead_exit_policy": "Sometimes" } }"#;
    assert!(serde_json::from_str::<Config>(text).is_err());
}
