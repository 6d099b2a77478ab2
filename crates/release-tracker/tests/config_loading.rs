use std::fs;
use std::path::Path;

use release_tracker::config::{self, ANON_KEY_ENV, URL_ENV};
use release_tracker::error::ErrorKind;

fn write(dir: &Path, name: &str, body: &str) {
    fs::write(dir.join(name), body).expect("write config");
}

fn backend_env_is_clear() -> bool {
    std::env::var_os(URL_ENV).is_none() && std::env::var_os(ANON_KEY_ENV).is_none()
}

#[test]
fn extends_merges_child_over_base() {
    let tmp = tempfile::tempdir().expect("tempdir");
    write(
        tmp.path(),
        "base.toml",
        r#"
[backend]
url = "https://base.example"
timeout_secs = 5

[catalog]
artists = ["Ivory Ocean"]
"#,
    );
    write(
        tmp.path(),
        "tracker.toml",
        r#"
extends = "base.toml"

[backend]
url = "https://child.example"

[audit]
enabled = true
"#,
    );

    let cfg = config::load(&tmp.path().join("tracker.toml")).expect("load");
    assert_eq!(cfg.backend.url, "https://child.example");
    assert_eq!(cfg.backend.timeout_secs, 5);
    assert_eq!(cfg.catalog.artists, vec!["Ivory Ocean"]);
    assert!(cfg.audit.enabled);
    assert_eq!(cfg.logging.dir, ".tracker/logs");
}

#[test]
fn extends_cycle_is_rejected() {
    let tmp = tempfile::tempdir().expect("tempdir");
    write(tmp.path(), "a.toml", "extends = \"b.toml\"\n");
    write(tmp.path(), "b.toml", "extends = \"a.toml\"\n");
    let err = config::load(&tmp.path().join("a.toml")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(err.to_string().contains("cycle"), "{err}");
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let cfg = config::load_or_default(&tmp.path().join("nope.toml")).expect("defaults");
    assert!(cfg.backend.url.is_empty());
    assert_eq!(cfg.catalog.artists.len(), 2);
}

#[test]
fn invalid_toml_reports_the_file() {
    let tmp = tempfile::tempdir().expect("tempdir");
    write(tmp.path(), "bad.toml", "[backend\nurl = 1");
    let err = config::load(&tmp.path().join("bad.toml")).unwrap_err();
    assert!(err.to_string().contains("bad.toml"), "{err}");
}

#[test]
fn resolve_backend_guards_scheme_and_key() {
    if !backend_env_is_clear() {
        return;
    }
    let tmp = tempfile::tempdir().expect("tempdir");
    write(
        tmp.path(),
        "ok.toml",
        "[backend]\nurl = \"https://proj.example/\"\nanon_key = \"sb_publishable_abc\"\n",
    );
    let resolved = config::load(&tmp.path().join("ok.toml"))
        .expect("load")
        .resolve_backend()
        .expect("resolve");
    assert_eq!(resolved.url, "https://proj.example/");
    assert_eq!(resolved.anon_key, "sb_publishable_abc");

    write(
        tmp.path(),
        "ftp.toml",
        "[backend]\nurl = \"ftp://proj.example\"\nanon_key = \"k\"\n",
    );
    let err = config::load(&tmp.path().join("ftp.toml"))
        .expect("load")
        .resolve_backend()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);

    write(
        tmp.path(),
        "secret.toml",
        "[backend]\nurl = \"https://proj.example\"\nanon_key = \"sb_secret_xyz\"\n",
    );
    let err = config::load(&tmp.path().join("secret.toml"))
        .expect("load")
        .resolve_backend()
        .unwrap_err();
    assert!(err.to_string().contains("secret"), "{err}");
}

#[test]
fn resolve_backend_requires_url_and_key() {
    if !backend_env_is_clear() {
        return;
    }
    let cfg = config::load_or_default(Path::new("/nonexistent/tracker.toml")).expect("defaults");
    let err = cfg.resolve_backend().unwrap_err();
    assert!(err.to_string().contains("backend url not set"), "{err}");
}
