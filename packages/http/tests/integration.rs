use std::io::Write;
use std::net::TcpListener;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use serde::Deserialize;
use wiremock::matchers::{body_string, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use relay_http::{
    Callback, HttpClient, JsonResolver, RequestDescriptor, RequestExecutor, ResponseEnvelope,
    Scheme, Status, ThreadDispatcher,
};

#[derive(Debug, Deserialize, PartialEq, Clone)]
struct IpInfo {
    code: i32,
    ip: String,
}

fn host_of(server: &MockServer) -> String {
    server.address().to_string()
}

#[tokio::test]
async fn test_get_sends_query_parameters() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/service/getIpInfo.php"))
        .and(query_param("ip", "210.21.220.218"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"code":0,"ip":"210.21.220.218"}"#))
        .expect(1)
        .mount(&server)
        .await;

    let host = host_of(&server);
    let envelope = tokio::task::spawn_blocking(move || {
        let request = RequestDescriptor::get(host, Some("/service/getIpInfo.php"))
            .unwrap()
            .with_param("ip", "210.21.220.218");
        let mut resolver = JsonResolver::<IpInfo>::new();
        RequestExecutor::new(Scheme::Http)
            .execute(&request, Some(&mut resolver))
            .unwrap()
    })
    .await
    .unwrap();

    assert_eq!(envelope.status(), Status::Success);
    assert_eq!(envelope.http_status(), Some(200));
    assert_eq!(
        envelope.result(),
        Some(&IpInfo {
            code: 0,
            ip: "210.21.220.218".to_string()
        })
    );
}

#[tokio::test]
async fn test_post_sends_form_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string("pass=s%26cret&user=alice"))
        .respond_with(ResponseTemplate::new(200).set_body_string("welcome"))
        .expect(1)
        .mount(&server)
        .await;

    let host = host_of(&server);
    let envelope = tokio::task::spawn_blocking(move || {
        let request = RequestDescriptor::post(host, Some("/login"))
            .unwrap()
            .with_param("user", "alice")
            .with_param("pass", "s&cret");
        RequestExecutor::new(Scheme::Http).execute_raw(&request).unwrap()
    })
    .await
    .unwrap();

    assert_eq!(envelope.status(), Status::Success);
    assert_eq!(envelope.raw_body(), Some("welcome"));
}

#[tokio::test]
async fn test_multipart_upload() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(body_string_contains("name=\"note\"; filename=\"note.txt\""))
        .respond_with(ResponseTemplate::new(200).set_body_string("stored"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let upload = dir.path().join("note.txt");
    std::fs::File::create(&upload)
        .unwrap()
        .write_all(b"hello upload")
        .unwrap();

    let host = host_of(&server);
    let envelope = tokio::task::spawn_blocking(move || {
        let request = RequestDescriptor::post(host, Some("/upload"))
            .unwrap()
            .with_param("title", "notes")
            .with_file("note", &upload);
        RequestExecutor::new(Scheme::Http).execute_raw(&request).unwrap()
    })
    .await
    .unwrap();

    assert_eq!(envelope.status(), Status::Success);

    let received = server.received_requests().await.unwrap();
    let request = &received[0];
    let content_type = request.headers["content-type"].to_str().unwrap().to_string();
    let boundary = content_type
        .strip_prefix("multipart/form-data; boundary=")
        .unwrap();
    let declared: usize = request.headers["content-length"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(declared, request.body.len());
    let body = String::from_utf8(request.body.clone()).unwrap();
    assert!(body.contains("name=\"title\"\r\nContent-Type: text/plain; charset=UTF-8\r\n\r\nnotes\r\n"));
    assert!(body.contains("Content-Type: application/octet-stream\r\nContent-Transfer-Encoding: binary\r\n\r\nhello upload\r\n"));
    assert!(body.ends_with(&format!("--{}--\r\n", boundary)));
}

#[tokio::test]
async fn test_not_found_is_http_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("gone\nfor good"))
        .mount(&server)
        .await;

    let host = host_of(&server);
    let envelope = tokio::task::spawn_blocking(move || {
        let request = RequestDescriptor::get(host, Some("/missing")).unwrap();
        RequestExecutor::new(Scheme::Http).execute_raw(&request).unwrap()
    })
    .await
    .unwrap();

    assert_eq!(envelope.status(), Status::HttpError);
    assert_eq!(envelope.result_code(), 404);
    assert_eq!(envelope.message(), Some("Not Found"));
    assert_eq!(envelope.raw_body(), Some("gonefor good"));
}

#[tokio::test]
async fn test_bad_json_is_resolve_failed() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{bad json}"))
        .mount(&server)
        .await;

    let host = host_of(&server);
    let envelope = tokio::task::spawn_blocking(move || {
        let request = RequestDescriptor::get(host, Some("/")).unwrap();
        let mut resolver = JsonResolver::<IpInfo>::new();
        RequestExecutor::new(Scheme::Http)
            .execute(&request, Some(&mut resolver))
            .unwrap()
    })
    .await
    .unwrap();

    assert_eq!(envelope.status(), Status::ResolveFailed);
    assert_eq!(envelope.raw_body(), Some("{bad json}"));
}

#[tokio::test]
async fn test_read_timeout_is_request_failed() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("late")
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let host = host_of(&server);
    let envelope = tokio::task::spawn_blocking(move || {
        let request = RequestDescriptor::get(host, Some("/"))
            .unwrap()
            .with_timeout(Duration::from_millis(200));
        RequestExecutor::new(Scheme::Http).execute_raw(&request).unwrap()
    })
    .await
    .unwrap();

    assert_eq!(envelope.status(), Status::RequestFailed);
    assert!(envelope.raw_body().is_none());
}

#[tokio::test]
async fn test_zero_timeout_waits_for_slow_response() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("patient")
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let host = host_of(&server);
    let envelope = tokio::task::spawn_blocking(move || {
        let request = RequestDescriptor::get(host, Some("/"))
            .unwrap()
            .with_setting("RequestTimeout", "0");
        RequestExecutor::new(Scheme::Http).execute_raw(&request).unwrap()
    })
    .await
    .unwrap();

    assert_eq!(envelope.status(), Status::Success);
    assert_eq!(envelope.raw_body(), Some("patient"));
}

#[tokio::test]
async fn test_connection_refused_is_request_failed() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let envelope = tokio::task::spawn_blocking(move || {
        let request = RequestDescriptor::get(format!("127.0.0.1:{}", port), None).unwrap();
        RequestExecutor::new(Scheme::Http).execute_raw(&request).unwrap()
    })
    .await
    .unwrap();

    assert_eq!(envelope.status(), Status::RequestFailed);
}

struct Forward(mpsc::Sender<Arc<ResponseEnvelope<IpInfo>>>);

impl Callback<IpInfo> for Forward {
    fn on_response_success(&mut self, response: Arc<ResponseEnvelope<IpInfo>>) {
        self.0.send(response).unwrap();
    }

    fn on_response_failure(&mut self, response: Arc<ResponseEnvelope<IpInfo>>) {
        self.0.send(response).unwrap();
    }
}

#[tokio::test]
async fn test_client_delivers_to_callback() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ip"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"code":0,"ip":"10.0.0.1"}"#))
        .mount(&server)
        .await;

    let host = host_of(&server);
    let envelope = tokio::task::spawn_blocking(move || {
        let client = HttpClient::new().unwrap();
        let (tx, rx) = mpsc::channel();

        let session = client.get::<IpInfo>(
            RequestDescriptor::new(host, Some("/ip")).unwrap(),
            Some(Box::new(JsonResolver::new())),
            Some(Box::new(Forward(tx))),
        );

        let envelope = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(session.is_completed());
        envelope
    })
    .await
    .unwrap();

    assert!(envelope.is_success());
    assert_eq!(envelope.result().map(|info| info.ip.as_str()), Some("10.0.0.1"));
}

#[tokio::test]
async fn test_session_wait_times_out_before_slow_response() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("slow")
                .set_delay(Duration::from_millis(800)),
        )
        .mount(&server)
        .await;

    let host = host_of(&server);
    let (timed_out, cancelled) = tokio::task::spawn_blocking(move || {
        let (dispatcher, queue) = ThreadDispatcher::with_callback_queue();
        let client = HttpClient::new()
            .unwrap()
            .with_dispatcher(Arc::new(dispatcher));
        let (tx, rx) = mpsc::channel();

        let session = client.get::<IpInfo>(
            RequestDescriptor::new(host, Some("/")).unwrap(),
            None,
            Some(Box::new(Forward(tx))),
        );
        let envelope = session.await_response_timeout(Duration::from_millis(100), true);

        // The worker still finishes; its notification must be swallowed.
        queue.run_next_timeout(Duration::from_secs(5));
        queue.run_pending();
        assert!(rx.try_recv().is_err());

        (envelope.status(), session.is_cancelled())
    })
    .await
    .unwrap();

    assert_eq!(timed_out, Status::TimedOut);
    assert!(cancelled);
}
