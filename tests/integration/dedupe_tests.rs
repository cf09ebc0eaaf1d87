use crate::common::{harness, harness_with, location, location_id};
use tidemark::storage::{RecordType, Storage};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_not_modified_becomes_revisit_of_first_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/doc"))
        .and(header("if-none-match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304).insert_header("etag", "\"v1\""))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/doc"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"v1\"")
                .insert_header("content-type", "text/plain")
                .set_body_string("hello"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let h = harness();
    let doc = format!("{}/doc", server.uri());
    h.coordinator.add_seed(&doc).unwrap();

    let first = h.coordinator.visit_location(location_id(&doc)).await.unwrap();
    assert_eq!(first.status, 200);
    assert!(first.revisit_of.is_none());
    let cached = location(&h.coordinator, &doc).unwrap();
    assert_eq!(cached.etag.as_deref(), Some("\"v1\""));
    assert_eq!(cached.etag_response_id, first.response_id);

    let second = h.coordinator.visit_location(location_id(&doc)).await.unwrap();
    assert_eq!(second.status, 304);
    assert_eq!(second.revisit_of, first.response_id);

    let revisits = h
        .coordinator
        .storage()
        .lock()
        .records_for_visit(second.visit_id, RecordType::Revisit)
        .unwrap();
    assert_eq!(revisits.len(), 1);
    assert_eq!(revisits[0].payload_digest, None);

    // Reading the revisit resolves to the original payload
    let replayed = h
        .coordinator
        .store()
        .read_response(second.response_id.unwrap())
        .unwrap();
    assert_eq!(replayed.status, 200);
    assert_eq!(replayed.payload, b"hello");
}

#[tokio::test]
async fn test_identical_payload_becomes_revisit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/same"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/plain")
                .set_body_string("unchanged body"),
        )
        .expect(2)
        .mount(&server)
        .await;

    let h = harness_with(|config| config.crawler.dedupe_server = false);
    let url = format!("{}/same", server.uri());
    h.coordinator.add_seed(&url).unwrap();

    let first = h.coordinator.visit_location(location_id(&url)).await.unwrap();
    let second = h.coordinator.visit_location(location_id(&url)).await.unwrap();

    assert_eq!(first.status, 200);
    assert_eq!(second.status, 200);
    assert!(first.revisit_of.is_none());
    assert_eq!(second.revisit_of, first.response_id);

    let storage = h.coordinator.storage().lock();
    let response = storage
        .records_for_visit(first.visit_id, RecordType::Response)
        .unwrap();
    let revisit = storage
        .records_for_visit(second.visit_id, RecordType::Revisit)
        .unwrap();
    assert_eq!(response.len(), 1);
    assert_eq!(revisit.len(), 1);
    assert_eq!(revisit[0].payload_digest, response[0].payload_digest);
}

#[tokio::test]
async fn test_small_payloads_are_not_deduplicated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tiny"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let h = harness_with(|config| {
        config.crawler.dedupe_server = false;
        config.crawler.dedupe_min_length = 1024;
    });
    let url = format!("{}/tiny", server.uri());
    h.coordinator.add_seed(&url).unwrap();

    h.coordinator.visit_location(location_id(&url)).await.unwrap();
    let second = h.coordinator.visit_location(location_id(&url)).await.unwrap();
    assert!(second.revisit_of.is_none());
}

#[tokio::test]
async fn test_read_response_reproduces_payload() {
    let body: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/blob.bin"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/octet-stream")
                .set_body_bytes(body.clone()),
        )
        .mount(&server)
        .await;

    let h = harness();
    let url = format!("{}/blob.bin", server.uri());
    h.coordinator.add_seed(&url).unwrap();
    let outcome = h.coordinator.visit_location(location_id(&url)).await.unwrap();

    let response = h
        .coordinator
        .store()
        .read_response(outcome.response_id.unwrap())
        .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.target_uri, url);
    assert_eq!(response.header("content-type"), Some("application/octet-stream"));
    assert_eq!(response.payload, body);

    let visits = h
        .coordinator
        .storage()
        .lock()
        .visits_for_location(location_id(&url))
        .unwrap();
    assert_eq!(visits[0].content_length, Some(70_000));
}
