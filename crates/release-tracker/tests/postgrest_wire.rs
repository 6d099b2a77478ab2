use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

use release_tracker::config::ResolvedBackend;
use release_tracker::model::Row;
use release_tracker::store::{Filter, PostgrestStore, RemoteStore, tracker_order};
use serde_json::json;

struct Canned {
    status: &'static str,
    headers: Vec<(&'static str, &'static str)>,
    body: &'static str,
}

impl Canned {
    fn json(status: &'static str, body: &'static str) -> Self {
        Self {
            status,
            headers: vec![("Content-Type", "application/json")],
            body,
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn content_length(head: &str) -> usize {
    head.lines()
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse().ok())
        .unwrap_or(0)
}

fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).expect("read request");
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = find(&buf, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_string();
            if buf.len() >= end + 4 + content_length(&head) {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

/// One canned response per connection; returns every raw request seen.
fn serve(responses: Vec<Canned>) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let handle = thread::spawn(move || {
        let mut seen = Vec::new();
        for canned in responses {
            let (mut stream, _) = listener.accept().expect("accept");
            seen.push(read_request(&mut stream));
            let mut out = format!(
                "HTTP/1.1 {}\r\nConnection: close\r\nContent-Length: {}\r\n",
                canned.status,
                canned.body.len()
            );
            for (k, v) in &canned.headers {
                out.push_str(&format!("{k}: {v}\r\n"));
            }
            out.push_str("\r\n");
            out.push_str(canned.body);
            stream.write_all(out.as_bytes()).expect("write response");
        }
        seen
    });
    (format!("http://{addr}"), handle)
}

fn store(url: &str) -> PostgrestStore {
    PostgrestStore::new(&ResolvedBackend {
        url: url.to_string(),
        anon_key: "anon-key".into(),
        timeout_secs: 5,
    })
    .expect("client")
}

#[test]
fn count_reads_content_range_total() {
    let (url, server) = serve(vec![Canned {
        status: "206 Partial Content",
        headers: vec![("Content-Range", "0-0/3")],
        body: "",
    }]);
    let n = store(&url)
        .count("music_tracker", &[Filter::gte("release_date", "2025-01-15")])
        .expect("count");
    assert_eq!(n, 3);

    let seen = server.join().expect("server");
    let req = seen[0].to_ascii_lowercase();
    assert!(
        req.starts_with("head /rest/v1/music_tracker?release_date=gte.2025-01-15"),
        "{req}"
    );
    assert!(req.contains("prefer: count=exact"), "{req}");
    assert!(req.contains("apikey: anon-key"), "{req}");
    assert!(req.contains("authorization: bearer anon-key"), "{req}");
}

#[test]
fn query_sends_order_and_parses_rows() {
    let (url, server) = serve(vec![Canned::json(
        "200 OK",
        r#"[{"id":1,"artist":"Ivory Ocean","status":"scheduled"},{"id":2}]"#,
    )]);
    let rows = store(&url)
        .query("v_scheduled", &[], &tracker_order())
        .expect("query");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["artist"], json!("Ivory Ocean"));

    let seen = server.join().expect("server");
    let line = seen[0].lines().next().unwrap_or_default().to_string();
    assert!(line.starts_with("GET /rest/v1/v_scheduled?"), "{line}");
    assert!(line.contains("select=*") || line.contains("select=%2A"), "{line}");
    assert!(line.contains("release_date.asc.nullslast"), "{line}");
}

#[test]
fn sample_asks_for_one_row() {
    let (url, server) = serve(vec![Canned::json(
        "200 OK",
        r#"[{"id":1,"streaming_status":"Released"}]"#,
    )]);
    let row = store(&url).sample("music_tracker").expect("sample");
    assert_eq!(row.expect("row")["id"], json!(1));

    let seen = server.join().expect("server");
    let line = seen[0].lines().next().unwrap_or_default().to_string();
    assert!(line.starts_with("GET /rest/v1/music_tracker?"), "{line}");
    assert!(line.contains("limit=1"), "{line}");
}

#[test]
fn top_level_filter_values_are_not_quoted() {
    let (url, server) = serve(vec![Canned::json("200 OK", "[]")]);
    let rows = store(&url)
        .query("music_tracker", &[Filter::eq("artist", "A, B")], &[])
        .expect("query");
    assert!(rows.is_empty());

    let seen = server.join().expect("server");
    let line = seen[0].lines().next().unwrap_or_default().to_string();
    assert!(line.contains("artist=eq.A%2C+B"), "{line}");
    assert!(!line.contains("%22"), "{line}");
}

#[test]
fn backend_error_keeps_code_for_fallback_decisions() {
    let (url, server) = serve(vec![Canned::json(
        "400 Bad Request",
        r#"{"code":"PGRST204","message":"Could not find the 'status' column of 'music_tracker' in the schema cache","details":null,"hint":null}"#,
    )]);
    let mut row = Row::new();
    row.insert("status".into(), json!("live"));
    let err = store(&url).insert("music_tracker", &row).unwrap_err();
    assert!(err.is_unknown_column(), "{err}");
    assert_eq!(err.code(), Some("PGRST204"));
    assert!(err.message().contains("'status' column"));

    let seen = server.join().expect("server");
    let req = seen[0].to_ascii_lowercase();
    assert!(req.starts_with("post /rest/v1/music_tracker"), "{req}");
    assert!(req.contains("prefer: return=representation"), "{req}");
    assert!(req.contains(r#""status":"live""#), "{req}");
}

#[test]
fn insert_returns_the_created_row() {
    let (url, server) = serve(vec![Canned::json(
        "201 Created",
        r#"[{"id":9,"artist":"Ivory Haven","title":"Tide"}]"#,
    )]);
    let mut row = Row::new();
    row.insert("artist".into(), json!("Ivory Haven"));
    row.insert("title".into(), json!("Tide"));
    let created = store(&url).insert("songs", &row).expect("insert");
    assert_eq!(created["id"], json!(9));
    server.join().expect("server");
}

#[test]
fn unauthorized_is_explicit() {
    let (url, server) = serve(vec![Canned::json(
        "401 Unauthorized",
        r#"{"message":"Invalid API key"}"#,
    )]);
    let err = store(&url).delete("songs", 4).unwrap_err();
    assert!(err.message().contains("not authorized"), "{err}");
    assert!(err.message().contains("Invalid API key"), "{err}");
    server.join().expect("server");
}

#[test]
fn unfiltered_bulk_delete_never_reaches_the_wire() {
    let err = store("http://127.0.0.1:9")
        .delete_where("music_tracker", &[])
        .unwrap_err();
    assert_eq!(err.kind(), release_tracker::error::ErrorKind::Validation);
}
