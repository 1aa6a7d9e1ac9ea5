use assetsync_core::codec::Codec;
use assetsync_core::config::{SyncConfig, CONFIG_NAME};
use assetsync_core::digest::HashAlgorithm;
use assetsync_core::platform::PlatformFilter;
use assetsync_core::sync::{FailurePolicy, PatchFallback};

#[test]
fn load_writes_defaults_when_missing() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("nested").join(CONFIG_NAME);
    let cfg = SyncConfig::load(&path).unwrap();
    assert!(path.exists());
    assert_eq!(cfg, SyncConfig::default());
    assert_eq!(cfg.hash, HashAlgorithm::Sha1);
    assert_eq!(cfg.codec, Codec::Bzip2);
    assert!(cfg.patch_fallback);
    assert!(cfg.jobs >= 1);
    assert_eq!(SyncConfig::load(&path).unwrap(), cfg);
}

#[test]
fn partial_file_fills_in_defaults() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join(CONFIG_NAME);
    std::fs::write(&path, r#"{ "codec": "zstd", "fail_fast": true, "platform_tags": ["*"] }"#)
        .unwrap();
    let cfg = SyncConfig::load(&path).unwrap();
    assert_eq!(cfg.codec, Codec::Zstd);
    assert!(cfg.fail_fast);
    assert!(cfg.platform().applies(&["anything".to_string()]));

    let opts = cfg.to_options(td.path());
    assert_eq!(opts.failure_policy, FailurePolicy::FailFast);
    assert_eq!(opts.patch_fallback, PatchFallback::FullFetch);
    assert_eq!(opts.codec, Codec::Zstd);
    assert_eq!(opts.data_dir, td.path());
}

#[test]
fn explicit_tags_filter_entries() {
    let cfg = SyncConfig { platform_tags: Some(vec!["win64".into()]), ..Default::default() };
    let f = cfg.platform();
    assert!(f.applies(&["win32".to_string(), "win64".to_string()]));
    assert!(!f.applies(&["linux".to_string()]));
    assert!(!f.applies(&[]));
}

#[test]
fn invalid_file_is_an_error() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join(CONFIG_NAME);
    std::fs::write(&path, "{ not json").unwrap();
    assert!(SyncConfig::load(&path).is_err());
}
