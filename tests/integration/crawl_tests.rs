use crate::common::{harness, harness_with, location, location_id, visits};
use chrono::{Duration, Utc};
use tidemark::crawler::{POLICY_FORBIDDEN, ROBOTS_DISALLOWED, STORAGE_FAILED};
use tidemark::storage::{CrawlPolicy, LocationType, Storage};
use tidemark::{CrawlUrl, StepOutcome};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html")
}

#[tokio::test]
async fn test_robots_is_fetched_before_seed_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nAllow: /\n"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html("<html><head><title>Home</title></head><body>Hi</body></html>"))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness();
    h.coordinator.add_seed(&format!("{}/", server.uri())).unwrap();

    let StepOutcome::Visited(first) = h.coordinator.step().await.unwrap() else {
        panic!("expected a visit");
    };
    assert_eq!(first.url.path(), "/robots.txt");
    assert_eq!(first.status, 200);

    let StepOutcome::Visited(second) = h.coordinator.step().await.unwrap() else {
        panic!("expected a visit");
    };
    assert_eq!(second.url.path(), "/");
    assert_eq!(second.status, 200);

    let seed = visits(&h.coordinator, &format!("{}/", server.uri()));
    assert_eq!(seed.len(), 1);
    assert_eq!(seed[0].content_type.as_deref(), Some("text/html"));
}

#[tokio::test]
async fn test_robots_disallow_prevents_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /x\n"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/x"))
        .respond_with(html("<html></html>"))
        .expect(0)
        .mount(&server)
        .await;

    let h = harness();
    let seed = format!("{}/x", server.uri());
    h.coordinator.add_seed(&seed).unwrap();

    let robots = h
        .coordinator
        .visit_location(location_id(&format!("{}/robots.txt", server.uri())))
        .await
        .unwrap();
    assert_eq!(robots.status, 200);

    let outcome = h.coordinator.visit_location(location_id(&seed)).await.unwrap();
    assert_eq!(outcome.status, ROBOTS_DISALLOWED);
    assert!(outcome.response_id.is_none());

    let recorded = visits(&h.coordinator, &seed);
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].status, ROBOTS_DISALLOWED);
    assert_eq!(recorded[0].content_length, None);
}

#[tokio::test]
async fn test_forbidden_origin_is_never_fetched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(html("<html></html>"))
        .expect(0)
        .mount(&server)
        .await;

    let h = harness();
    let seed = format!("{}/", server.uri());
    h.coordinator.add_seed(&seed).unwrap();
    let origin_id = CrawlUrl::parse(&seed).unwrap().origin_id();
    h.coordinator
        .set_crawl_policy(origin_id, CrawlPolicy::Forbidden)
        .unwrap();

    let outcome = h.coordinator.visit_location(location_id(&seed)).await.unwrap();
    assert_eq!(outcome.status, POLICY_FORBIDDEN);
}

#[tokio::test]
async fn test_connect_failure_still_advances_clocks() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let h = harness();
    let seed = format!("http://127.0.0.1:{}/", port);
    h.coordinator.add_seed(&seed).unwrap();

    let outcome = h.coordinator.visit_location(location_id(&seed)).await.unwrap();
    assert_eq!(outcome.status, tidemark::crawler::CONNECT_FAILED);
    assert!(outcome.response_id.is_none());

    let page = location(&h.coordinator, &seed).unwrap();
    assert!(page.last_visit.is_some());
    assert!(page.next_visit.unwrap() > Utc::now() + Duration::hours(23));
}

#[tokio::test]
async fn test_politeness_delay_follows_crawl_delay() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nCrawl-delay: 5\n"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html("<html><body>Hi</body></html>"))
        .mount(&server)
        .await;

    let h = harness_with(|config| config.crawler.max_delay_millis = 30_000);
    let seed = format!("{}/", server.uri());
    h.coordinator.add_seed(&seed).unwrap();
    h.coordinator
        .visit_location(location_id(&format!("{}/robots.txt", server.uri())))
        .await
        .unwrap();

    let origin_id = CrawlUrl::parse(&seed).unwrap().origin_id();
    let origin = h.coordinator.storage().lock().get_origin(origin_id).unwrap().unwrap();
    assert_eq!(origin.robots_crawl_delay, Some(5));

    let before = Utc::now();
    h.coordinator.visit_location(location_id(&seed)).await.unwrap();
    let origin = h.coordinator.storage().lock().get_origin(origin_id).unwrap().unwrap();
    let next_visit = origin.next_visit.unwrap().timestamp_millis();
    assert!(next_visit >= before.timestamp_millis() + 5000);
    assert!(next_visit <= Utc::now().timestamp_millis() + 5000);
}

#[tokio::test]
async fn test_politeness_delay_is_capped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nCrawl-delay: 60\n"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html("<html><body>Hi</body></html>"))
        .mount(&server)
        .await;

    let h = harness_with(|config| config.crawler.max_delay_millis = 2_000);
    let seed = format!("{}/", server.uri());
    h.coordinator.add_seed(&seed).unwrap();
    h.coordinator
        .visit_location(location_id(&format!("{}/robots.txt", server.uri())))
        .await
        .unwrap();

    let before = Utc::now();
    h.coordinator.visit_location(location_id(&seed)).await.unwrap();
    let origin_id = CrawlUrl::parse(&seed).unwrap().origin_id();
    let origin = h.coordinator.storage().lock().get_origin(origin_id).unwrap().unwrap();
    let next_visit = origin.next_visit.unwrap().timestamp_millis();
    assert!(next_visit >= before.timestamp_millis() + 2000);
    assert!(next_visit <= Utc::now().timestamp_millis() + 2000);
}

#[tokio::test]
async fn test_robots_sitemap_page_scenario() {
    let server = MockServer::start().await;
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("User-agent: *\nDisallow: /no\n\nSitemap: /s.xml\n"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/s.xml"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(
                format!(
                    r#"<?xml version="1.0" encoding="UTF-8"?>
                    <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
                      <url><loc>{base}/no</loc></url>
                      <url><loc>{base}/page</loc><changefreq>weekly</changefreq><priority>0.7</priority></url>
                    </urlset>"#
                ),
                "application/xml",
            ),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html("<html><body>Home</body></html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(html("<html><head><title>Page</title></head><body>Page</body></html>"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/no"))
        .respond_with(html("<html></html>"))
        .expect(0)
        .mount(&server)
        .await;

    let h = harness();
    h.coordinator.add_seed(&format!("{}/", base)).unwrap();

    for _ in 0..10 {
        match h.coordinator.step().await.unwrap() {
            StepOutcome::Visited(_) => {}
            _ => break,
        }
    }

    let robots = location(&h.coordinator, &format!("{}/robots.txt", base)).unwrap();
    assert_eq!(robots.location_type, LocationType::Robots);

    let sitemap = location(&h.coordinator, &format!("{}/s.xml", base)).unwrap();
    assert_eq!(sitemap.location_type, LocationType::Sitemap);
    assert_eq!(sitemap.via, Some(robots.id));

    let no = visits(&h.coordinator, &format!("{}/no", base));
    assert_eq!(no.len(), 1);
    assert_eq!(no[0].status, ROBOTS_DISALLOWED);

    let page = location(&h.coordinator, &format!("{}/page", base)).unwrap();
    assert_eq!(page.location_type, LocationType::Page);
    assert_eq!(page.sitemap_changefreq.as_deref(), Some("weekly"));
    assert_eq!(page.sitemap_priority, Some(0.7));
    let page_visits = visits(&h.coordinator, &format!("{}/page", base));
    assert_eq!(page_visits.len(), 1);
    assert_eq!(page_visits[0].status, 200);
}

#[tokio::test]
async fn test_page_links_and_resources_are_enqueued() {
    let server = MockServer::start().await;
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<html><head><link rel="stylesheet" href="/style.css"></head>
               <body><a href="/about">About</a><img src="/logo.png"></body></html>"#,
        ))
        .mount(&server)
        .await;

    let h = harness();
    let seed = format!("{}/", base);
    h.coordinator.add_seed(&seed).unwrap();
    h.coordinator.visit_location(location_id(&seed)).await.unwrap();

    let about = location(&h.coordinator, &format!("{}/about", base)).unwrap();
    assert_eq!(about.location_type, LocationType::Page);
    assert_eq!(about.depth, 1);
    for resource in ["/style.css", "/logo.png"] {
        let found = location(&h.coordinator, &format!("{}{}", base, resource)).unwrap();
        assert_eq!(found.location_type, LocationType::Transclusion);
        assert_eq!(found.priority, 40);
    }
    let links = h
        .coordinator
        .storage()
        .lock()
        .count_links_from(location_id(&seed))
        .unwrap();
    assert_eq!(links, 3);
}

#[tokio::test]
async fn test_redirect_target_is_enqueued() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("location", "/new"))
        .mount(&server)
        .await;

    let h = harness();
    let seed = format!("{}/old", server.uri());
    h.coordinator.add_seed(&seed).unwrap();
    let outcome = h.coordinator.visit_location(location_id(&seed)).await.unwrap();
    assert_eq!(outcome.status, 301);
    assert!(outcome.response_id.is_some());

    let target = location(&h.coordinator, &format!("{}/new", server.uri())).unwrap();
    assert_eq!(target.location_type, LocationType::Page);
    assert_eq!(target.via, Some(location_id(&seed)));
}

#[tokio::test]
async fn test_archive_files_are_written_to_configured_directory() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(html("<html><body>Hi</body></html>"))
        .mount(&server)
        .await;

    let h = harness();
    let seed = format!("{}/", server.uri());
    h.coordinator.add_seed(&seed).unwrap();
    h.coordinator.visit_location(location_id(&seed)).await.unwrap();
    h.coordinator.close().await.unwrap();

    let files: Vec<_> = std::fs::read_dir(h.dir.path().join("warcs"))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1);
    let content = std::fs::read(&files[0]).unwrap();
    assert!(content.starts_with(b"WARC/1.1\r\n"));

    let stats = h.coordinator.storage().lock().statistics().unwrap();
    assert_eq!(stats.warc_files, 1);
    // Request and response; warcinfo records are not indexed
    assert_eq!(stats.records, 2);
}

#[tokio::test]
async fn test_archive_failure_still_records_visit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html("<html><body>Hi</body></html>"))
        .mount(&server)
        .await;

    let h = harness();
    // A plain file where the archive directory should go
    std::fs::write(h.dir.path().join("warcs"), b"").unwrap();
    let seed = format!("{}/", server.uri());
    h.coordinator.add_seed(&seed).unwrap();
    let before = location(&h.coordinator, &seed).unwrap();

    assert!(h.coordinator.visit_location(location_id(&seed)).await.is_err());

    let recorded = visits(&h.coordinator, &seed);
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].status, STORAGE_FAILED);
    let after = location(&h.coordinator, &seed).unwrap();
    assert!(after.next_visit > before.next_visit);
}

#[tokio::test]
async fn test_crawl_continues_after_archive_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html("<html><body>Hi</body></html>"))
        .mount(&server)
        .await;

    let h = harness();
    std::fs::write(h.dir.path().join("warcs"), b"").unwrap();
    let base = server.uri();
    h.coordinator.add_seed(&format!("{}/", base)).unwrap();

    // Robots first, then the page; both fail to archive
    let visited = h.coordinator.run(Some(2)).await.unwrap();
    assert_eq!(visited, 0);

    for url in [format!("{}/robots.txt", base), format!("{}/", base)] {
        let recorded = visits(&h.coordinator, &url);
        assert_eq!(recorded.len(), 1, "{}", url);
        assert_eq!(recorded[0].status, STORAGE_FAILED);
    }
}
