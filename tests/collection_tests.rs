/// Collection runs against real directories: rotated gzip files, live files
/// that grow between runs, rotation of the live file, and corrupt archives.
use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use proxylens::collection::{Collector, CollectorSettings, JobHandle, JobStatus};
use proxylens::config::types::DEFAULT_TEMPLATE;
use proxylens::geo::CountryLookup;
use proxylens::parser::LineTemplate;
use proxylens::query::{EntryParams, EntryQuery};
use proxylens::source::FilePatterns;
use proxylens::storage::duckdb::DuckDbStorage;
use proxylens::storage::Storage;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const LIVE: &str = "proxy-host-1_access.log";

/// Countries by first octet, enough to exercise enrichment.
struct OctetLookup;

impl CountryLookup for OctetLookup {
    fn country_code(&self, ip: IpAddr) -> Option<String> {
        match ip.to_string().split('.').next() {
            Some("81") => Some("GB".to_string()),
            Some("85") => Some("DE".to_string()),
            _ => None,
        }
    }
}

/// One Nginx Proxy Manager access line.
fn npm_line(day: u32, minute: u32, second: u32, status: u16, ip: &str, path: &str) -> String {
    format!(
        "[{:02}/Dec/2025:10:{:02}:{:02} +0000] - 200 {} - GET https shop.example.com \"{}\" [Client {}] [Length 1532] [Gzip 2.41] [Sent-to 10.0.0.5] \"Mozilla/5.0 (X11; Linux x86_64)\" \"-\"\n",
        day, minute, second, status, path, ip
    )
}

fn status_for(i: u32) -> u16 {
    if i % 5 == 0 {
        404
    } else {
        200
    }
}

fn ip_for(i: u32) -> String {
    if i % 2 == 0 {
        format!("81.2.69.{}", i % 250)
    } else {
        format!("85.214.132.{}", i % 250)
    }
}

fn write_gzip(path: &Path, content: &str) {
    let mut encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
    encoder.write_all(content.as_bytes()).unwrap();
    encoder.finish().unwrap();
}

fn append(path: &Path, content: &str) {
    let mut file = OpenOptions::new().create(true).append(true).open(path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
}

async fn collector(dir: &TempDir) -> (Collector, Arc<DuckDbStorage>) {
    let storage = Arc::new(DuckDbStorage::in_memory().unwrap());
    storage.init_schema().await.unwrap();

    let geo: Arc<dyn CountryLookup> = Arc::new(OctetLookup);
    let collector = Collector::new(
        storage.clone(),
        LineTemplate::compile(DEFAULT_TEMPLATE, None).unwrap(),
        Some(geo),
        CollectorSettings {
            log_dir: dir.path().to_path_buf(),
            patterns: FilePatterns::new("proxy-host-*_access.log", "proxy-host-*_access.log.*.gz")
                .unwrap(),
            batch_size: 8,
        },
        JobHandle::default(),
    );
    (collector, storage)
}

#[tokio::test]
async fn test_rotated_archive_and_new_live_lines() {
    let dir = TempDir::new().unwrap();
    let live = dir.path().join(LIVE);
    let (collector, storage) = collector(&dir).await;

    // Earlier run: five live lines are already checkpointed
    let mut first = String::new();
    for i in 0..5 {
        first.push_str(&npm_line(4, 0, i, status_for(i), &ip_for(i), &format!("/early/{}", i)));
    }
    append(&live, &first);
    let job = collector.collect_once().await.unwrap();
    assert_eq!(job.counts.entries_added, 5);

    // An older generation: 50 valid lines and 2 that do not fit the template
    let mut archive = String::new();
    for i in 0..50 {
        archive.push_str(&npm_line(3, i, 0, status_for(i), &ip_for(i), &format!("/old/{}", i)));
        if i == 10 || i == 30 {
            archive.push_str("upstream timed out (110: Connection timed out) while reading\n");
        }
    }
    write_gzip(&dir.path().join("proxy-host-1_access.log.2.gz"), &archive);

    // Ten new lines in the live file since the checkpoint
    let mut newer = String::new();
    for i in 0..10 {
        newer.push_str(&npm_line(4, 1 + i, 0, status_for(i), &ip_for(i), &format!("/new/{}", i)));
    }
    append(&live, &newer);

    let job = collector.collect_once().await.unwrap();
    assert_eq!(job.status, JobStatus::Finished);
    assert!(job.error.is_none());
    assert_eq!(job.counts.entries_added, 60);
    assert_eq!(job.counts.lines_malformed, 2);
    assert_eq!(job.counts.files_scanned, 2);
    assert_eq!(job.counts.files_skipped, 0);
    assert_eq!(storage.entry_count().await.unwrap(), 65);

    // 404s: 10 archived, 2 new live, 1 early live
    let query = EntryQuery::from_params(&EntryParams {
        status_code: Some("404".to_string()),
        limit: Some("5".to_string()),
        ..EntryParams::default()
    })
    .unwrap();
    let (entries, total) = storage.query_entries(&query).await.unwrap();

    assert_eq!(total, 13);
    assert_eq!(entries.len(), 5);
    assert!(entries.iter().all(|e| e.status_code == Some(404)));
    let times: Vec<DateTime<Utc>> = entries.iter().map(|e| e.timestamp).collect();
    let mut sorted = times.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(times, sorted);
    assert_eq!(entries[0].request_path.as_deref(), Some("/new/5"));

    // Enrichment and parsed fields made it through
    let newest = &entries[0];
    assert_eq!(newest.domain.as_deref(), Some("shop.example.com"));
    assert_eq!(newest.scheme.as_deref(), Some("https"));
    assert!(newest.gzip);
    assert_eq!(newest.bytes_sent, Some(1532));
    assert_eq!(newest.referrer, None);
    assert_eq!(newest.country, "DE");
}

#[tokio::test]
async fn test_repeated_runs_add_nothing() {
    let dir = TempDir::new().unwrap();
    let mut content = String::new();
    for i in 0..20 {
        content.push_str(&npm_line(4, i, 0, 200, &ip_for(i), "/"));
    }
    append(&dir.path().join(LIVE), &content);
    write_gzip(&dir.path().join("proxy-host-1_access.log.1.gz"), &npm_line(2, 0, 0, 200, "81.2.69.1", "/a"));

    let (collector, storage) = collector(&dir).await;
    let first = collector.collect_once().await.unwrap();
    assert_eq!(first.counts.entries_added, 21);

    for _ in 0..3 {
        let again = collector.collect_once().await.unwrap();
        assert_eq!(again.status, JobStatus::Finished);
        assert_eq!(again.counts.entries_added, 0);
    }
    assert_eq!(storage.entry_count().await.unwrap(), 21);
}

#[tokio::test]
async fn test_rotated_live_file_is_not_ingested_twice() {
    let dir = TempDir::new().unwrap();
    let live = dir.path().join(LIVE);
    let mut content = String::new();
    for i in 0..20 {
        content.push_str(&npm_line(4, i, 0, 200, &ip_for(i), &format!("/gen1/{}", i)));
    }
    append(&live, &content);

    let (collector, storage) = collector(&dir).await;
    assert_eq!(collector.collect_once().await.unwrap().counts.entries_added, 20);

    // logrotate: the live file becomes .1.gz and a fresh live file starts
    write_gzip(&dir.path().join("proxy-host-1_access.log.1.gz"), &content);
    std::fs::remove_file(&live).unwrap();
    let mut fresh = String::new();
    for i in 0..3 {
        fresh.push_str(&npm_line(5, i, 0, 200, &ip_for(i), &format!("/gen2/{}", i)));
    }
    append(&live, &fresh);

    let job = collector.collect_once().await.unwrap();
    assert_eq!(job.status, JobStatus::Finished);
    assert_eq!(job.counts.entries_added, 3);
    assert_eq!(storage.entry_count().await.unwrap(), 23);
}

#[tokio::test]
async fn test_corrupt_archive_is_skipped() {
    let dir = TempDir::new().unwrap();

    let mut archive = String::new();
    for i in 0..2000 {
        archive.push_str(&npm_line(1, i % 60, i % 60, status_for(i), &ip_for(i), &format!("/item/{}/{}", i, i * 7919)));
    }
    let broken = dir.path().join("proxy-host-1_access.log.3.gz");
    write_gzip(&broken, &archive);
    let bytes = std::fs::read(&broken).unwrap();
    std::fs::write(&broken, &bytes[..bytes.len() / 2]).unwrap();

    let mut good = String::new();
    for i in 0..4 {
        good.push_str(&npm_line(2, i, 0, 200, &ip_for(i), "/ok"));
    }
    write_gzip(&dir.path().join("proxy-host-1_access.log.1.gz"), &good);

    let (collector, storage) = collector(&dir).await;
    let job = collector.collect_once().await.unwrap();

    assert_eq!(job.status, JobStatus::Finished);
    assert_eq!(job.counts.files_scanned, 2);
    assert_eq!(job.counts.files_skipped, 1);

    let query = EntryQuery::from_params(&EntryParams {
        ip_address: Some("".to_string()),
        ..EntryParams::default()
    })
    .unwrap();
    let (_, total) = storage.query_entries(&query).await.unwrap();
    // The readable archive is complete; the broken one may have contributed
    // the batches committed before the damage
    assert!(total >= 4);
    let ok_query = EntryQuery {
        limit: 1000,
        ..EntryQuery::default()
    };
    let (entries, _) = storage.query_entries(&ok_query).await.unwrap();
    assert_eq!(
        entries.iter().filter(|e| e.request_path.as_deref() == Some("/ok")).count(),
        4
    );
}

#[tokio::test]
async fn test_pagination_over_collected_entries() {
    let dir = TempDir::new().unwrap();
    let mut content = String::new();
    // Same timestamp on every line: ordering relies on the insertion tie-break
    for i in 0..37 {
        content.push_str(&npm_line(4, 0, 0, 200, &ip_for(i), &format!("/p/{}", i)));
    }
    append(&dir.path().join(LIVE), &content);

    let (collector, storage) = collector(&dir).await;
    collector.collect_once().await.unwrap();

    let mut seen = Vec::new();
    let mut skip = 0;
    loop {
        let query = EntryQuery::from_params(&EntryParams {
            limit: Some("10".to_string()),
            skip: Some(skip.to_string()),
            sort_by: Some("timestamp".to_string()),
            sort_dir: Some("asc".to_string()),
            ..EntryParams::default()
        })
        .unwrap();
        let (page, total) = storage.query_entries(&query).await.unwrap();
        assert_eq!(total, 37);
        if page.is_empty() {
            break;
        }
        seen.extend(page.into_iter().map(|e| e.request_path.unwrap()));
        skip += 10;
    }

    let expected: Vec<String> = (0..37).map(|i| format!("/p/{}", i)).collect();
    assert_eq!(seen, expected);
    assert_eq!(seen.iter().collect::<HashSet<_>>().len(), 37);
}

#[tokio::test]
async fn test_country_filter_uses_resolved_country() {
    let dir = TempDir::new().unwrap();
    let mut content = String::new();
    for i in 0..6 {
        content.push_str(&npm_line(4, i, 0, 200, &ip_for(i), "/"));
    }
    content.push_str(&npm_line(4, 7, 0, 200, "192.168.1.20", "/"));
    append(&dir.path().join(LIVE), &content);

    let (collector, storage) = collector(&dir).await;
    collector.collect_once().await.unwrap();

    let query = EntryQuery::from_params(&EntryParams {
        country: Some("gb".to_string()),
        ..EntryParams::default()
    })
    .unwrap();
    let (_, gb) = storage.query_entries(&query).await.unwrap();
    assert_eq!(gb, 3);

    let summary = proxylens::query::country_summary(storage.as_ref()).await.unwrap();
    let flat: Vec<(String, u64)> = summary.into_iter().map(|s| (s.country, s.count)).collect();
    assert_eq!(
        flat,
        vec![
            ("DE".to_string(), 3),
            ("GB".to_string(), 3),
            ("Unknown".to_string(), 1)
        ]
    );
}

#[tokio::test]
async fn test_sibling_logs_with_identical_first_line_are_both_collected() {
    let dir = TempDir::new().unwrap();
    // An uptime monitor hits every host at the same second after rotation
    let monitor = npm_line(4, 0, 0, 200, "81.2.69.160", "/healthz");

    let mut host1 = monitor.clone();
    host1.push_str(&npm_line(4, 1, 0, 200, "81.2.69.1", "/host1/a"));
    host1.push_str(&npm_line(4, 2, 0, 200, "81.2.69.1", "/host1/b"));
    append(&dir.path().join("proxy-host-1_access.log"), &host1);

    let mut host2 = monitor.clone();
    host2.push_str(&npm_line(4, 1, 0, 404, "85.214.132.9", "/host2/a"));
    host2.push_str(&npm_line(4, 2, 0, 404, "85.214.132.9", "/host2/b"));
    append(&dir.path().join("proxy-host-2_access.log"), &host2);

    let (collector, storage) = collector(&dir).await;
    let job = collector.collect_once().await.unwrap();

    assert_eq!(job.status, JobStatus::Finished);
    assert_eq!(job.counts.lines_parsed, 6);
    assert_eq!(job.counts.entries_added, 6);
    assert_eq!(storage.entry_count().await.unwrap(), 6);

    let again = collector.collect_once().await.unwrap();
    assert_eq!(again.counts.entries_added, 0);

    // Rotating one host keeps it tied to its own checkpoint
    write_gzip(&dir.path().join("proxy-host-2_access.log.1.gz"), &host2);
    std::fs::remove_file(dir.path().join("proxy-host-2_access.log")).unwrap();
    let rotated = collector.collect_once().await.unwrap();
    assert_eq!(rotated.status, JobStatus::Finished);
    assert_eq!(rotated.counts.entries_added, 0);
    assert_eq!(storage.entry_count().await.unwrap(), 6);
}
