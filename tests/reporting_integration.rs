use aperture::models::{Exchange, RequestDetails, ResponseDetails};
use aperture::reporting::{write_report, ReportFormat};
use aperture::runner::ResultRecord;
use aperture::verdict::Verdict;
use std::fs;

fn sample_records() -> Vec<ResultRecord> {
    let exchange = |user: &str, status: u16| Exchange {
        request: RequestDetails {
            method: "GET".to_string(),
            url: "http://localhost:3000/api/users/1".to_string(),
            auth_user: user.to_string(),
            ..RequestDetails::default()
        },
        response: ResponseDetails {
            status,
            body: "{\"id\":1}".to_string(),
            ..ResponseDetails::default()
        },
    };
    vec![
        ResultRecord {
            endpoint: "/api/users/{id}".to_string(),
            method: "GET".to_string(),
            control: Some(exchange("alice", 200)),
            test: Some(exchange("bob", 200)),
            verdict: Verdict::IdorFound,
            skipped_reason: None,
            notes: Vec::new(),
            owner: Some("alice".to_string()),
            attacker: Some("bob".to_string()),
        },
        ResultRecord {
            endpoint: "/health".to_string(),
            method: "GET".to_string(),
            control: None,
            test: None,
            verdict: Verdict::Skipped,
            skipped_reason: Some("no security requirement".to_string()),
            notes: Vec::new(),
            owner: None,
            attacker: None,
        },
    ]
}

#[test]
fn reporting_exports_create_files() {
    let dir = tempfile::tempdir().expect("temp dir");
    let records = sample_records();

    for (format, name) in [
        (ReportFormat::Text, "log.txt"),
        (ReportFormat::Jsonl, "log.jsonl"),
        (ReportFormat::Csv, "log.csv"),
    ] {
        let path = dir.path().join(name);
        write_report(&path, format, &records, "http://localhost:3000")
            .expect("report export should succeed");
        assert!(fs::metadata(&path).is_ok(), "{} file should exist", format);
    }

    let text = fs::read_to_string(dir.path().join("log.txt")).unwrap();
    assert!(text.contains("GET /api/users/1 HTTP/1.1\nHost: localhost:3000\n"));
    assert!(text.contains("http://localhost:3000/health - skipped - no security requirement"));

    let jsonl = fs::read_to_string(dir.path().join("log.jsonl")).unwrap();
    let parsed: Vec<serde_json::Value> = jsonl
        .lines()
        .map(|l| serde_json::from_str(l).expect("each line is JSON"))
        .collect();
    assert_eq!(parsed.len(), 2);
    assert_eq!(parsed[0]["result"], "IDOR_FOUND");
    assert_eq!(parsed[0]["test"]["request"]["auth_user"], "bob");
    assert_eq!(parsed[1]["skipped_reason"], "no security requirement");

    let csv = fs::read_to_string(dir.path().join("log.csv")).unwrap();
    assert_eq!(
        csv,
        "Endpoint,Method,Result,Creds,Object,Notes\n\
         /api/users/{id},GET,IDOR_FOUND,bob,alice,\n\
         /health,GET,SKIPPED,,,no security requirement\n"
    );
}

#[test]
fn reporting_fails_on_missing_directory() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("missing").join("log.txt");
    assert!(write_report(&path, ReportFormat::Text, &sample_records(), "http://x").is_err());
}
